use crate::helpers::*;
use stagegate::core::ErrorKind;
use stagegate::execution::ExecutionEvent;

const PIPELINE: &str = r#"
name: "orders-service"
stages:
  - name: "Build"
    steps:
      - name: "compile"
        branch:
          variants:
            - label: "maven"
              when: { file_exists: "pom.xml" }
              steps:
                - run: { tool: build, command: "mvn -B package" }
            - label: "gradle"
              when: { file_exists: "build.gradle" }
              steps:
                - run: { tool: build, command: "./gradlew build" }
"#;

#[tokio::test]
async fn test_marker_file_selects_variant() {
    let h = Harness::new();
    h.touch("build.gradle");

    let result = h.run(PIPELINE).await;

    assert_succeeded(&result);
    assert_eq!(h.tools.commands(), vec!["./gradlew build"]);
    let selection = result.context.selection("Build", "0").unwrap();
    assert_eq!(selection.branch, "compile");
    assert_eq!(selection.variant.as_deref(), Some("gradle"));
}

#[tokio::test]
async fn test_first_matching_variant_wins() {
    let h = Harness::new();
    h.touch("pom.xml");
    h.touch("build.gradle");

    let result = h.run(PIPELINE).await;

    assert_succeeded(&result);
    assert_eq!(h.tools.commands(), vec!["mvn -B package"]);
}

#[tokio::test]
async fn test_no_match_without_otherwise_fails() {
    let h = Harness::new();

    let result = h.run(PIPELINE).await;

    assert_failed_at(&result, "Build", ErrorKind::ConditionFailure);
    assert!(h.tools.calls().is_empty());
}

#[tokio::test]
async fn test_otherwise_runs_when_nothing_matches() {
    let h = Harness::new();
    let yaml = r#"
name: "p"
variables:
  target: ""
stages:
  - name: "Deploy"
    steps:
      - branch:
          variants:
            - label: "kubernetes"
              when: { variable_set: "target" }
              steps:
                - run: { tool: deploy, command: "kubectl apply -f k8s/" }
          otherwise:
            - run: { tool: deploy, command: "ansible-playbook deploy.yml" }
"#;

    let result = h.run(yaml).await;

    assert_succeeded(&result);
    assert_eq!(h.tools.commands(), vec!["ansible-playbook deploy.yml"]);
    assert_eq!(
        h.count_events(|e| matches!(e, ExecutionEvent::BranchSelected { variant: None, .. })),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_keeps_the_first_selection() {
    let h = Harness::new();
    h.touch("build.gradle");
    // The failing gradle build leaves a pom.xml behind; a fresh evaluation
    // would now pick maven
    h.tools.exit("./gradlew build", 1);
    h.tools.creates("./gradlew build", "pom.xml");

    let yaml = PIPELINE.replace(
        "  - name: \"Build\"\n",
        "  - name: \"Build\"\n    retry: { attempts: 2, delay_secs: 5 }\n",
    );
    let result = h.run(&yaml).await;

    assert_failed_at(&result, "Build", ErrorKind::ToolFailure);
    assert_eq!(h.tools.count("./gradlew build"), 2);
    assert!(!h.tools.was_invoked("mvn"));
    assert_eq!(result.outcome.stage("Build").unwrap().attempts, 2);
    assert_eq!(
        h.count_events(|e| matches!(e, ExecutionEvent::BranchSelected { .. })),
        1
    );
}

#[tokio::test]
async fn test_nested_unnamed_branch_selects_independently() {
    let h = Harness::new();
    h.touch("pom.xml");
    h.touch("Dockerfile");
    let yaml = r#"
name: "p"
stages:
  - name: "Build"
    steps:
      - branch:
          variants:
            - label: "maven"
              when: { file_exists: "pom.xml" }
              steps:
                - branch:
                    variants:
                      - label: "image"
                        when: { file_exists: "Dockerfile" }
                        steps:
                          - run: { tool: build, command: "mvn -B package jib:build" }
                    otherwise:
                      - run: { tool: build, command: "mvn -B package" }
"#;

    let result = h.run(yaml).await;

    assert_succeeded(&result);
    assert_eq!(h.tools.commands(), vec!["mvn -B package jib:build"]);
    let selections = &result.context.selections;
    assert_eq!(selections.len(), 2);
    assert_eq!(selections[0].branch, selections[1].branch);
    assert_eq!(selections[1].path, "0/maven/0");
    assert_eq!(selections[1].variant.as_deref(), Some("image"));
}

#[tokio::test]
async fn test_branches_sharing_a_name_are_evaluated_separately() {
    let h = Harness::new();
    h.touch("first");
    let yaml = r#"
name: "p"
stages:
  - name: "Build"
    steps:
      - name: "tool"
        branch:
          variants:
            - label: "a"
              when: { file_exists: "first" }
              steps:
                - run: { command: "first-a" }
      - name: "tool"
        branch:
          variants:
            - label: "a"
              when: { file_exists: "missing" }
              steps:
                - run: { command: "second-a" }
          otherwise:
            - run: { command: "second-fallback" }
"#;

    let result = h.run(yaml).await;

    assert_succeeded(&result);
    assert_eq!(h.tools.commands(), vec!["first-a", "second-fallback"]);
    assert_eq!(result.context.selection("Build", "1").unwrap().variant, None);
}
