use crate::helpers::*;
use stagegate::core::{ErrorKind, StepError};
use std::time::Duration;
use tokio::time::Instant;

fn pipeline(gate_options: &str) -> String {
    format!(
        r#"
name: "orders-service"
stages:
  - name: "Build"
    steps:
      - run: {{ tool: build, command: "mvn -B package" }}
  - name: "Quality Gate"
    steps:
      - gate: {{ url: "http://sonar:9000/api/qualitygates/project_status?projectKey=orders", {} }}
  - name: "Deploy"
    steps:
      - run: {{ tool: deploy, command: "ansible-playbook deploy.yml" }}
post:
  always:
    - run: {{ command: "rm -rf target/tmp" }}
"#,
        gate_options
    )
}

#[tokio::test(start_paused = true)]
async fn test_gate_that_never_passes_times_out() {
    let h = Harness::new();
    h.http.verdicts(&["IN_PROGRESS"]);

    let started = Instant::now();
    let result = h.run(&pipeline("timeout_secs: 300, interval_secs: 10, max_attempts: 1000")).await;

    assert_failed_at(&result, "Quality Gate", ErrorKind::TimeoutFailure);
    assert_eq!(
        result.outcome.error.as_ref().unwrap().error,
        StepError::Timeout(Duration::from_secs(300))
    );
    assert_eq!(started.elapsed(), Duration::from_secs(300));
    assert!(!h.tools.was_invoked("ansible-playbook"));
    assert_eq!(h.tools.count("rm -rf target/tmp"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_gate_passes_on_later_poll() {
    let h = Harness::new();
    h.http.verdicts(&["IN_PROGRESS", "IN_PROGRESS", "OK"]);

    let result = h.run(&pipeline("interval_secs: 10")).await;

    assert_succeeded(&result);
    assert_eq!(h.http.json_calls(), 3);
    assert!(h.tools.was_invoked("ansible-playbook"));
}

#[tokio::test(start_paused = true)]
async fn test_failing_verdict_rejects_immediately() {
    let h = Harness::new();
    h.http.verdicts(&["IN_PROGRESS", "ERROR"]);

    let result = h.run(&pipeline("interval_secs: 10")).await;

    assert_failed_at(&result, "Quality Gate", ErrorKind::GateRejected);
    assert_eq!(h.http.json_calls(), 2);
    assert!(!h.tools.was_invoked("ansible-playbook"));
}

#[tokio::test(start_paused = true)]
async fn test_advisory_gate_lets_deploy_run() {
    let h = Harness::new();
    h.http.verdicts(&["ERROR"]);

    let result = h.run(&pipeline("advisory: true")).await;

    assert_succeeded(&result);
    assert!(h.tools.was_invoked("ansible-playbook"));
}

#[tokio::test(start_paused = true)]
async fn test_attempts_exhausted_before_deadline() {
    let h = Harness::new();
    h.http.verdicts(&["IN_PROGRESS"]);

    let result = h
        .run(&pipeline("timeout_secs: 300, interval_secs: 10, max_attempts: 3"))
        .await;

    assert_failed_at(&result, "Quality Gate", ErrorKind::UnreadyFailure);
    assert_eq!(h.http.json_calls(), 3);
}
