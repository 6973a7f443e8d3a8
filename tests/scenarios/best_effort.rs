use crate::helpers::*;
use stagegate::core::ErrorKind;

const PIPELINE: &str = r#"
name: "orders-service"
stages:
  - name: "Security Scan"
    steps:
      - name: "zap"
        best_effort: true
        run: { tool: scanner, command: "zap-baseline.py -t http://localhost:8080 -r zap-report.html" }
      - artifact: { name: "zap-report", path: "zap-report.html", required: true }
  - name: "Deploy"
    steps:
      - run: { tool: deploy, command: "ansible-playbook deploy.yml" }
"#;

#[tokio::test]
async fn test_scanner_findings_do_not_fail_the_run() {
    let h = Harness::new();
    h.tools.exit("zap-baseline.py", 2);
    h.tools.creates("zap-baseline.py", "zap-report.html");

    let result = h.run(PIPELINE).await;

    assert_succeeded(&result);
    let scan = result.outcome.stage("Security Scan").unwrap();
    assert_eq!(scan.best_effort_failures.len(), 1);
    assert_eq!(scan.best_effort_failures[0].step, "zap");
    assert_eq!(scan.best_effort_failures[0].error.kind(), ErrorKind::ToolFailure);
    assert_eq!(
        result.outcome.artifacts.get("zap-report"),
        Some(&h.workdir.path().join("zap-report.html"))
    );
    assert!(h.tools.was_invoked("ansible-playbook"));
}

#[tokio::test]
async fn test_missing_report_fails_the_stage() {
    let h = Harness::new();
    h.tools.exit("zap-baseline.py", 2);

    let result = h.run(PIPELINE).await;

    assert_failed_at(&result, "Security Scan", ErrorKind::ArtifactMissing);
    assert!(!h.tools.was_invoked("ansible-playbook"));
}

#[tokio::test]
async fn test_optional_artifact_is_skipped() {
    let h = Harness::new();
    let yaml = r#"
name: "p"
stages:
  - name: "Test"
    steps:
      - run: { tool: test, command: "mvn test" }
      - artifact: { name: "coverage", path: "target/site/jacoco" }
"#;

    let result = h.run(yaml).await;

    assert_succeeded(&result);
    assert!(result.outcome.artifacts.is_empty());
}
