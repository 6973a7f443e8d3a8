use crate::helpers::*;
use stagegate::core::ErrorKind;
use std::time::Duration;
use tokio::time::Instant;

const PIPELINE: &str = r#"
name: "orders-service"
stages:
  - name: "Start"
    steps:
      - start: { handle: "app", command: "java -jar target/orders.jar" }
      - wait_for: { url: "http://localhost:8080/health", interval_secs: 2, max_attempts: 30 }
  - name: "Scan"
    steps:
      - run: { tool: scanner, command: "zap-baseline.py -t http://localhost:8080" }
post:
  always:
    - stop: "app"
"#;

#[tokio::test(start_paused = true)]
async fn test_ready_on_fifth_probe() {
    let h = Harness::new();
    h.http.ready_on(5);

    let started = Instant::now();
    let result = h.run(PIPELINE).await;

    assert_succeeded(&result);
    assert_eq!(h.http.status_calls(), 5);
    // Four two-second pauses between five probes
    assert_eq!(started.elapsed(), Duration::from_secs(8));
    assert!(h.tools.was_invoked("zap-baseline.py"));
    assert_eq!(h.tools.stopped(), vec!["java -jar target/orders.jar"]);
}

#[tokio::test(start_paused = true)]
async fn test_never_ready_fails_after_all_probes() {
    let h = Harness::new();
    h.http.never_ready();

    let result = h.run(PIPELINE).await;

    assert_failed_at(&result, "Start", ErrorKind::UnreadyFailure);
    assert_eq!(h.http.status_calls(), 30);
    assert!(!h.tools.was_invoked("zap-baseline.py"));
    assert_eq!(h.tools.stopped().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unstopped_process_is_cleaned_up() {
    let h = Harness::new();
    let yaml = r#"
name: "p"
stages:
  - name: "Start"
    steps:
      - start: { handle: "db", command: "postgres -D data" }
      - wait_for: { url: "http://localhost:5432" }
"#;

    let result = h.run(yaml).await;

    assert_succeeded(&result);
    assert_eq!(h.tools.spawned(), vec!["postgres -D data"]);
    assert_eq!(h.tools.stopped(), vec!["postgres -D data"]);
    assert!(result.context.handle_names().is_empty());
}
