use crate::helpers::*;
use stagegate::core::{ErrorKind, RunStatus, StageStatus};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const PIPELINE: &str = r#"
name: "orders-service"
stages:
  - name: "Start"
    steps:
      - start: { handle: "app", command: "java -jar target/orders.jar" }
  - name: "Deploy"
    steps:
      - run: { tool: deploy, command: "ansible-playbook deploy.yml" }
  - name: "Verify"
    steps:
      - run: { command: "curl -f http://prod/health" }
post:
  failure:
    - notify: { subject: "{{ pipeline }} {{ status }}", recipient: "ops@example.com" }
"#;

fn cancel_after(token: &CancellationToken, delay: Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        token.cancel();
    });
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_slow_deploy_aborts() {
    let h = Harness::new();
    h.tools.delay("ansible-playbook", Duration::from_secs(600));

    let cancel = CancellationToken::new();
    cancel_after(&cancel, Duration::from_secs(10));
    let result = h.run_with_cancel(PIPELINE, cancel).await;

    assert_eq!(result.outcome.status, RunStatus::Aborted);
    assert_eq!(result.outcome.exit_code(), 130);
    assert_eq!(result.outcome.failed_stage.as_deref(), Some("Deploy"));
    assert_eq!(
        result.outcome.error.as_ref().unwrap().error.kind(),
        ErrorKind::Cancelled
    );
    assert_eq!(
        result.outcome.stage("Deploy").unwrap().status,
        StageStatus::Aborted
    );
    assert!(!h.tools.was_invoked("curl"));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_still_runs_cleanup() {
    let h = Harness::new();
    h.tools.delay("ansible-playbook", Duration::from_secs(600));

    let cancel = CancellationToken::new();
    cancel_after(&cancel, Duration::from_secs(10));
    let result = h.run_with_cancel(PIPELINE, cancel).await;

    assert_eq!(result.outcome.status, RunStatus::Aborted);
    assert_eq!(h.inbox.subjects(), vec!["orders-service aborted"]);
    assert_eq!(h.tools.stopped(), vec!["java -jar target/orders.jar"]);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_stage_is_not_retried() {
    let h = Harness::new();
    h.tools.delay("ansible-playbook", Duration::from_secs(600));
    let yaml = PIPELINE.replace(
        "  - name: \"Deploy\"\n",
        "  - name: \"Deploy\"\n    retry: { attempts: 3, delay_secs: 1 }\n",
    );

    let cancel = CancellationToken::new();
    cancel_after(&cancel, Duration::from_secs(10));
    let result = h.run_with_cancel(&yaml, cancel).await;

    assert_eq!(result.outcome.status, RunStatus::Aborted);
    assert_eq!(h.tools.count("ansible-playbook"), 1);
}

#[tokio::test]
async fn test_cancel_before_start_runs_no_stage() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = h.run_with_cancel(PIPELINE, cancel).await;

    assert_eq!(result.outcome.status, RunStatus::Aborted);
    assert!(result.outcome.stages.is_empty());
    assert!(h.tools.spawned().is_empty());
    assert_eq!(h.inbox.subjects().len(), 1);
}
