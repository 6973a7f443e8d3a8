use crate::helpers::*;
use stagegate::core::{ErrorKind, StageStatus};
use stagegate::execution::ExecutionEvent;
use stagegate::tools::ToolKind;

const PIPELINE: &str = r#"
name: "orders-service"
stages:
  - name: "Build"
    steps:
      - run: { tool: build, command: "mvn -B package" }
  - name: "Test"
    steps:
      - run: { tool: test, command: "mvn test" }
  - name: "Scan"
    steps:
      - run: { tool: scanner, command: "zap-baseline.py -t http://localhost:8080" }
  - name: "Deploy"
    steps:
      - run: { tool: deploy, command: "ansible-playbook -i hosts/prod deploy.yml" }
post:
  always:
    - run: { command: "docker compose down" }
  success:
    - notify: { subject: "{{ pipeline }} {{ status }}", recipient: "team@example.com" }
  failure:
    - notify:
        subject: "{{ pipeline }} {{ status }} at {{ failed_stage }}"
        recipient: "team@example.com"
"#;

#[tokio::test]
async fn test_all_stages_run_in_order() {
    let h = Harness::new();

    let result = h.run(PIPELINE).await;

    assert_succeeded(&result);
    let kinds: Vec<ToolKind> = h.tools.calls().iter().map(|c| c.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ToolKind::Build,
            ToolKind::Test,
            ToolKind::Scanner,
            ToolKind::Deploy,
            ToolKind::Generic,
        ]
    );
    assert_eq!(result.outcome.stages.len(), 4);
    assert!(result.outcome.stages.iter().all(|s| s.status == StageStatus::Succeeded));
    assert_eq!(result.context.run.completed_stages, 4);
    assert_eq!(result.outcome.exit_code(), 0);
}

#[tokio::test]
async fn test_success_notification_sent() {
    let h = Harness::new();

    let result = h.run(PIPELINE).await;

    assert_succeeded(&result);
    assert_eq!(h.inbox.subjects(), vec!["orders-service succeeded"]);
    assert_eq!(h.inbox.sent()[0].recipient, "team@example.com");
}

#[tokio::test]
async fn test_failed_tests_stop_the_run() {
    let h = Harness::new();
    h.tools.exit("mvn test", 1);

    let result = h.run(PIPELINE).await;

    assert_failed_at(&result, "Test", ErrorKind::ToolFailure);
    assert!(h.tools.was_invoked("mvn -B package"));
    assert!(!h.tools.was_invoked("zap-baseline.py"));
    assert!(!h.tools.was_invoked("ansible-playbook"));
    assert_eq!(result.outcome.failed_step.as_deref(), Some("mvn test"));
    assert_eq!(result.outcome.stages.len(), 2);
    assert_eq!(result.outcome.exit_code(), 1);
}

#[tokio::test]
async fn test_failure_hooks_run_once() {
    let h = Harness::new();
    h.tools.exit("mvn test", 1);

    let result = h.run(PIPELINE).await;

    assert_failed_at(&result, "Test", ErrorKind::ToolFailure);
    assert_eq!(h.tools.count("docker compose down"), 1);
    assert_eq!(h.inbox.subjects(), vec!["orders-service failed at Test"]);
    assert_eq!(result.outcome.hooks.len(), 2);
    assert_eq!(
        h.count_events(|e| matches!(e, ExecutionEvent::HooksDispatched { .. })),
        1
    );
}

#[tokio::test]
async fn test_failing_hook_does_not_change_outcome() {
    let h = Harness::new();
    h.tools.exit("docker compose down", 3);

    let result = h.run(PIPELINE).await;

    assert_succeeded(&result);
    assert_eq!(result.outcome.hooks.failures().count(), 1);
    assert_eq!(h.inbox.subjects().len(), 1);
}

#[tokio::test]
async fn test_stage_hooks_run_before_next_stage() {
    let h = Harness::new();
    let yaml = r#"
name: "p"
stages:
  - name: "Build"
    steps:
      - run: { command: "make" }
    post:
      always:
        - run: { command: "make clean" }
  - name: "Deploy"
    steps:
      - run: { command: "make install" }
"#;

    let result = h.run(yaml).await;

    assert_succeeded(&result);
    assert_eq!(h.tools.commands(), vec!["make", "make clean", "make install"]);
    assert_eq!(result.outcome.stage("Build").unwrap().hooks.len(), 1);
}
