//! Pipeline domain model

use crate::core::{
    config::PipelineConfig,
    context::ExecutionContext,
    hook::HookSet,
    stage::Stage,
};
use std::collections::HashMap;
use std::path::PathBuf;

/// A pipeline definition
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Variables available to every template
    pub variables: HashMap<String, String>,

    /// Environment added to every invoked tool
    pub env: HashMap<String, String>,

    /// Working directory, relative to where the pipeline is launched
    pub working_dir: Option<String>,

    /// Stages in declaration order
    pub stages: Vec<Stage>,

    /// Post-run hooks
    pub hooks: HookSet,
}

impl Pipeline {
    /// Create a pipeline from configuration
    pub fn from_config(config: &PipelineConfig) -> Self {
        Pipeline {
            name: config.name.clone(),
            variables: config.variables_as_string_map(),
            env: config.env.clone().into_iter().collect(),
            working_dir: config.working_dir.clone(),
            stages: config.stages.iter().map(|s| s.to_stage()).collect(),
            hooks: config.post.to_hook_set(),
        }
    }

    pub fn new(name: impl Into<String>, stages: Vec<Stage>) -> Self {
        Pipeline {
            name: name.into(),
            variables: HashMap::new(),
            env: HashMap::new(),
            working_dir: None,
            stages,
            hooks: HookSet::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: HookSet) -> Self {
        self.hooks = hooks;
        self
    }

    /// Get a stage by name
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Create the execution context for a run rooted at `base_dir`
    pub fn create_context(&self, base_dir: impl Into<PathBuf>) -> ExecutionContext {
        let base_dir = base_dir.into();
        let working_dir = match &self.working_dir {
            Some(dir) => base_dir.join(dir),
            None => base_dir,
        };

        let mut context = ExecutionContext::new(self.name.clone(), working_dir);
        context.variables.extend(self.variables.clone());
        context.env.extend(self.env.clone());
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_is_declaration_order() {
        let yaml = r#"
name: "Service"
stages:
  - name: "Build"
    steps:
      - run: { tool: build, command: "make" }
  - name: "Test"
    steps:
      - run: { tool: test, command: "make test" }
  - name: "Deploy"
    steps:
      - run: { tool: deploy, command: "make deploy" }
"#;

        let config = PipelineConfig::from_yaml(yaml).unwrap();
        let pipeline = config.to_pipeline();

        assert_eq!(pipeline.stage_names(), vec!["Build", "Test", "Deploy"]);
        assert!(pipeline.stage("Test").is_some());
        assert!(pipeline.stage("Scan").is_none());
    }

    #[test]
    fn test_context_seeded_from_definition() {
        let yaml = r#"
name: "Service"
working_dir: "backend"
variables:
  inventory: "hosts/staging"
env:
  MAVEN_OPTS: "-Xmx1g"
stages: []
"#;

        let pipeline = PipelineConfig::from_yaml(yaml).unwrap().to_pipeline();
        let context = pipeline.create_context("/repo");

        assert_eq!(context.working_dir, PathBuf::from("/repo/backend"));
        assert_eq!(context.get_variable("inventory"), Some(&"hosts/staging".to_string()));
        assert_eq!(context.env.get("MAVEN_OPTS"), Some(&"-Xmx1g".to_string()));
        assert_eq!(context.pipeline_name, "Service");
    }
}
