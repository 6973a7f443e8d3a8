//! Execution context - the explicit state of one pipeline run

use crate::core::state::{RunState, StageStatus};
use crate::core::step::Branch;
use crate::tools::{BackgroundProcess, Invocation};
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Per-run state handed to every stage by `&mut`.
///
/// Only the stage currently executing mutates it; hooks read it once the
/// run has reached a terminal status.
#[derive(Debug)]
pub struct ExecutionContext {
    /// Pipeline being run
    pub pipeline_name: String,

    /// Directory commands run in and relative paths resolve against
    pub working_dir: PathBuf,

    /// Environment passed to every invoked tool
    pub env: HashMap<String, String>,

    /// Variables available to `{{ name }}` templates
    pub variables: HashMap<String, String>,

    /// Artifacts recorded by stages (name -> path)
    pub artifacts: BTreeMap<String, PathBuf>,

    /// Branch variants chosen during this run
    pub selections: Vec<BranchSelection>,

    /// Run bookkeeping, including the terminal status
    pub run: RunState,

    stage_statuses: HashMap<String, StageStatus>,

    /// Stage whose steps or post actions are executing
    current_stage: Option<String>,

    handles: BTreeMap<String, Box<dyn BackgroundProcess>>,
}

/// Which variant a branch resolved to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchSelection {
    pub stage: String,
    /// Position of the branch within its stage
    pub path: String,
    pub branch: String,
    /// Label of the chosen variant; None when the fallback steps ran
    pub variant: Option<String>,
}

fn template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("valid template regex"))
}

impl ExecutionContext {
    /// Create an empty context rooted at `working_dir`
    pub fn new(pipeline_name: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            working_dir: working_dir.into(),
            env: HashMap::new(),
            variables: HashMap::new(),
            artifacts: BTreeMap::new(),
            selections: Vec::new(),
            run: RunState::new(),
            stage_statuses: HashMap::new(),
            current_stage: None,
            handles: BTreeMap::new(),
        }
    }

    /// Fill in the environment from the current process; values already
    /// set by the pipeline win
    pub fn with_process_env(mut self) -> Self {
        for (key, value) in std::env::vars() {
            self.env.entry(key).or_insert(value);
        }
        self
    }

    pub fn execution_id(&self) -> uuid::Uuid {
        self.run.execution_id
    }

    /// Set a variable
    pub fn set_variable(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), value.into());
    }

    /// Get a variable
    pub fn get_variable(&self, key: &str) -> Option<&String> {
        self.variables.get(key)
    }

    /// Variables available to templates, including run metadata
    pub fn rendering_variables(&self) -> HashMap<String, String> {
        let mut vars = self.variables.clone();

        vars.insert("pipeline".to_string(), self.pipeline_name.clone());
        vars.insert("execution_id".to_string(), self.run.execution_id.to_string());
        vars.insert("status".to_string(), self.run.status.as_str().to_string());
        vars.insert(
            "failed_stage".to_string(),
            self.run.failed_stage.clone().unwrap_or_default(),
        );
        vars.insert(
            "failed_step".to_string(),
            self.run.failed_step.clone().unwrap_or_default(),
        );
        vars.insert(
            "working_dir".to_string(),
            self.working_dir.display().to_string(),
        );

        if let Some(stage) = &self.current_stage {
            vars.insert("stage".to_string(), stage.clone());
            if let Some(status) = self.stage_status(stage) {
                vars.insert("stage_status".to_string(), status.as_str().to_string());
            }
        }

        for (name, path) in &self.artifacts {
            vars.insert(format!("artifacts.{}", name), path.display().to_string());
        }

        vars
    }

    /// Substitute `{{ name }}` placeholders. Unknown names are left untouched.
    pub fn render(&self, template: &str) -> String {
        let vars = self.rendering_variables();
        template_pattern()
            .replace_all(template, |caps: &Captures| {
                vars.get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Resolve a (templated) path against the working directory
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let rendered = PathBuf::from(self.render(path));
        if rendered.is_absolute() {
            rendered
        } else {
            self.working_dir.join(rendered)
        }
    }

    /// Build an invocation for `command`, rendering templates and merging
    /// step-level environment over the run environment
    pub fn invocation(
        &self,
        command: &str,
        env: &BTreeMap<String, String>,
        working_dir: Option<&str>,
    ) -> Invocation {
        let mut merged = self.env.clone();
        for (key, value) in env {
            merged.insert(key.clone(), self.render(value));
        }

        Invocation {
            command: self.render(command),
            working_dir: working_dir
                .map(|dir| self.resolve_path(dir))
                .unwrap_or_else(|| self.working_dir.clone()),
            env: merged,
        }
    }

    /// Record an artifact produced by a stage
    pub fn record_artifact(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.artifacts.insert(name.into(), path.into());
    }

    pub fn artifact(&self, name: &str) -> Option<&Path> {
        self.artifacts.get(name).map(PathBuf::as_path)
    }

    pub fn set_stage_status(&mut self, stage: &str, status: StageStatus) {
        self.stage_statuses.insert(stage.to_string(), status);
    }

    pub fn stage_status(&self, stage: &str) -> Option<StageStatus> {
        self.stage_statuses.get(stage).copied()
    }

    /// Expose `{{ stage }}` and `{{ stage_status }}` to templates until `leave_stage`
    pub fn enter_stage(&mut self, stage: &str) {
        self.current_stage = Some(stage.to_string());
    }

    pub fn leave_stage(&mut self) {
        self.current_stage = None;
    }

    /// Remember which variant a branch picked
    pub fn record_selection(&mut self, stage: &str, branch: &Branch, variant: Option<String>) {
        self.selections.push(BranchSelection {
            stage: stage.to_string(),
            path: branch.path.clone(),
            branch: branch.name.clone(),
            variant,
        });
    }

    /// The earlier selection for the branch at `path`, if it was already resolved
    pub fn selection(&self, stage: &str, path: &str) -> Option<&BranchSelection> {
        self.selections
            .iter()
            .find(|s| s.stage == stage && s.path == path)
    }

    /// Track a running process under `name`, returning any handle it replaced
    pub fn insert_handle(
        &mut self,
        name: impl Into<String>,
        process: Box<dyn BackgroundProcess>,
    ) -> Option<Box<dyn BackgroundProcess>> {
        self.handles.insert(name.into(), process)
    }

    pub fn take_handle(&mut self, name: &str) -> Option<Box<dyn BackgroundProcess>> {
        self.handles.remove(name)
    }

    pub fn handle_names(&self) -> Vec<String> {
        self.handles.keys().cloned().collect()
    }

    /// Remove every remaining handle
    pub fn drain_handles(&mut self) -> Vec<(String, Box<dyn BackgroundProcess>)> {
        std::mem::take(&mut self.handles).into_iter().collect()
    }
}
