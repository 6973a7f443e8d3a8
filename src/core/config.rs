//! Pipeline configuration from YAML

use crate::core::{
    condition::Predicate,
    hook::{HookAction, HookSet, NotificationTemplate},
    stage::{RetryPolicy, Stage},
    step::{
        ArtifactCheck, BackgroundCall, Branch, QualityGate, Readiness, Step, StepAction, ToolCall,
        Variant,
    },
    Pipeline,
};
use crate::tools::{StatusRange, ToolKind};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Working directory, relative to where the run is launched
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Variables available to `{{ name }}` templates
    #[serde(default)]
    variables: BTreeMap<String, Value>,

    /// Environment added to every tool invocation
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// How notification hooks are delivered
    #[serde(default)]
    pub notifications: Option<NotificationsConfig>,

    /// Stages, run in declaration order
    #[serde(default)]
    pub stages: Vec<StageConfig>,

    /// Post-run hooks
    #[serde(default)]
    pub post: HookConfig,
}

/// Notification delivery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Shell command that receives the message body on stdin
    pub command: String,
}

/// Stage configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Steps, run in order
    pub steps: Vec<StepConfig>,

    /// Stage-scoped post actions
    #[serde(default)]
    pub post: HookConfig,

    /// Retry the whole step list on failure
    #[serde(default)]
    pub retry: Option<RetryConfig>,

    /// Bound on one attempt of the step list (seconds)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Failures are reported but do not stop the run
    #[serde(default)]
    pub advisory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub attempts: u32,

    /// Pause between attempts (seconds)
    #[serde(default)]
    pub delay_secs: u64,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Step name (derived from the action when omitted)
    #[serde(default)]
    pub name: Option<String>,

    /// Record failures without failing the stage
    #[serde(default)]
    pub best_effort: bool,

    /// What the step does
    #[serde(flatten)]
    pub action: ActionConfig,
}

/// Step action, keyed by its verb
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionConfig {
    Run(RunConfig),
    Branch(BranchConfig),
    WaitFor(WaitForConfig),
    Gate(GateConfig),
    Artifact(ArtifactConfig),
    Require(#[serde(with = "serde_yaml::with::singleton_map_recursive")] Predicate),
    Start(StartConfig),
    Stop(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Capability the command needs
    #[serde(default)]
    pub tool: ToolKind,

    /// Shell command line (templated)
    pub command: String,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchConfig {
    #[serde(default)]
    pub variants: Vec<VariantConfig>,

    /// Steps to run when no variant matches
    #[serde(default)]
    pub otherwise: Option<Vec<StepConfig>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantConfig {
    pub label: String,
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub when: Predicate,
    pub steps: Vec<StepConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitForConfig {
    pub url: String,

    #[serde(default = "default_wait_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_wait_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub expect_status: StatusRange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Verdict endpoint returning JSON
    pub url: String,

    /// Dotted path of the verdict field
    #[serde(default = "default_gate_field")]
    pub field: String,

    #[serde(default = "default_gate_pass")]
    pub pass: Vec<String>,

    #[serde(default = "default_gate_fail")]
    pub fail: Vec<String>,

    #[serde(default = "default_gate_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_gate_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_gate_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub advisory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub name: String,
    pub path: String,

    /// A missing required artifact fails the step
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartConfig {
    /// Name later steps and hooks use to stop the process
    pub handle: String,

    #[serde(default)]
    pub tool: ToolKind,

    pub command: String,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub working_dir: Option<String>,
}

/// Post actions keyed by outcome
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookConfig {
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub always: Vec<HookActionConfig>,

    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub success: Vec<HookActionConfig>,

    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub failure: Vec<HookActionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookActionConfig {
    Run(RunConfig),
    Notify(NotifyConfig),
    Stop(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub subject: String,

    #[serde(default)]
    pub body: String,

    pub recipient: String,
}

fn default_wait_interval() -> u64 {
    2
}

fn default_wait_attempts() -> u32 {
    30
}

fn default_gate_field() -> String {
    "projectStatus.status".to_string()
}

fn default_gate_pass() -> Vec<String> {
    vec!["OK".to_string()]
}

fn default_gate_fail() -> Vec<String> {
    vec!["ERROR".to_string()]
}

fn default_gate_interval() -> u64 {
    10
}

fn default_gate_attempts() -> u32 {
    30
}

fn default_gate_timeout() -> u64 {
    300
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Pipeline name must not be empty");
        }

        // Check that all stage names are unique
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                anyhow::bail!("Stage names must not be empty");
            }
            if !seen.insert(&stage.name) {
                anyhow::bail!("Duplicate stage name: {}", stage.name);
            }
        }

        let handles = self.started_handles();

        for stage in &self.stages {
            if let Some(retry) = &stage.retry {
                if retry.attempts == 0 {
                    anyhow::bail!("Stage '{}' retry attempts must be at least 1", stage.name);
                }
            }
            if stage.timeout_secs == Some(0) {
                anyhow::bail!("Stage '{}' timeout_secs must be at least 1", stage.name);
            }

            for step in &stage.steps {
                step.validate(&stage.name, &handles)?;
            }

            stage
                .post
                .validate(&handles)
                .with_context(|| format!("Invalid post hooks in stage '{}'", stage.name))?;
        }

        self.post
            .validate(&handles)
            .context("Invalid pipeline post hooks")?;

        Ok(())
    }

    /// Every handle a `start` step anywhere in the pipeline can create
    fn started_handles(&self) -> HashSet<String> {
        let mut handles = HashSet::new();
        for stage in &self.stages {
            for step in &stage.steps {
                step.collect_handles(&mut handles);
            }
        }
        handles
    }

    /// Variables rendered as strings
    pub fn variables_as_string_map(&self) -> HashMap<String, String> {
        self.variables
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    // Fallback: convert to string
                    other => serde_yaml::to_string(other)
                        .unwrap_or_default()
                        .trim()
                        .to_string(),
                };
                (key.clone(), rendered)
            })
            .collect()
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Pipeline {
        Pipeline::from_config(self)
    }
}

impl StageConfig {
    pub fn to_stage(&self) -> Stage {
        let retry = self
            .retry
            .as_ref()
            .map(|r| RetryPolicy {
                attempts: r.attempts.max(1),
                delay: Duration::from_secs(r.delay_secs),
            })
            .unwrap_or_default();

        Stage {
            name: self.name.clone(),
            steps: to_steps(&self.steps, None),
            hooks: self.post.to_hook_set(),
            retry,
            timeout: self.timeout_secs.map(Duration::from_secs),
            advisory: self.advisory,
        }
    }
}

/// `parent` is the position of the enclosing branch arm, if any
fn to_steps(configs: &[StepConfig], parent: Option<&str>) -> Vec<Step> {
    configs
        .iter()
        .enumerate()
        .map(|(index, config)| {
            let path = match parent {
                Some(parent) => format!("{}/{}", parent, index),
                None => index.to_string(),
            };
            config.to_step(index, path)
        })
        .collect()
}

impl StepConfig {
    /// Name shown in logs; derived from the action when not given
    pub fn display_name(&self, index: usize) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.action.default_name(index),
        }
    }

    fn to_step(&self, index: usize, path: String) -> Step {
        let name = self.display_name(index);
        let action = match &self.action {
            ActionConfig::Run(run) => StepAction::Run(run.to_tool_call()),
            ActionConfig::Branch(branch) => StepAction::Branch(Branch {
                name: name.clone(),
                variants: branch
                    .variants
                    .iter()
                    .map(|v| Variant {
                        label: v.label.clone(),
                        when: v.when.clone(),
                        steps: to_steps(&v.steps, Some(&format!("{}/{}", path, v.label))),
                    })
                    .collect(),
                otherwise: branch
                    .otherwise
                    .as_deref()
                    .map(|steps| to_steps(steps, Some(&format!("{}/otherwise", path)))),
                path,
            }),
            ActionConfig::WaitFor(wait) => StepAction::WaitFor(Readiness {
                url: wait.url.clone(),
                interval: Duration::from_secs(wait.interval_secs),
                max_attempts: wait.max_attempts,
                expect_status: wait.expect_status,
            }),
            ActionConfig::Gate(gate) => StepAction::Gate(QualityGate {
                url: gate.url.clone(),
                field: gate.field.clone(),
                pass: gate.pass.clone(),
                fail: gate.fail.clone(),
                interval: Duration::from_secs(gate.interval_secs),
                max_attempts: gate.max_attempts,
                timeout: Duration::from_secs(gate.timeout_secs),
                advisory: gate.advisory,
            }),
            ActionConfig::Artifact(artifact) => StepAction::Artifact(ArtifactCheck {
                name: artifact.name.clone(),
                path: artifact.path.clone(),
                required: artifact.required,
            }),
            ActionConfig::Require(predicate) => StepAction::Require(predicate.clone()),
            ActionConfig::Start(start) => StepAction::Start(BackgroundCall {
                handle: start.handle.clone(),
                tool: start.tool,
                command: start.command.clone(),
                env: start.env.clone(),
                working_dir: start.working_dir.clone(),
            }),
            ActionConfig::Stop(handle) => StepAction::Stop {
                handle: handle.clone(),
            },
        };

        Step {
            name,
            best_effort: self.best_effort,
            action,
        }
    }

    fn validate(&self, stage: &str, handles: &HashSet<String>) -> Result<()> {
        let name = self.display_name(0);
        let location = format!("Stage '{}' step '{}'", stage, name);

        match &self.action {
            ActionConfig::Run(run) => {
                if run.command.trim().is_empty() {
                    anyhow::bail!("{} has an empty command", location);
                }
            }
            ActionConfig::Start(start) => {
                if start.command.trim().is_empty() {
                    anyhow::bail!("{} has an empty command", location);
                }
                if start.handle.trim().is_empty() {
                    anyhow::bail!("{} has an empty handle", location);
                }
            }
            ActionConfig::Branch(branch) => {
                if branch.variants.is_empty() && branch.otherwise.is_none() {
                    anyhow::bail!("{} has no variants", location);
                }
                let mut labels = HashSet::new();
                for variant in &branch.variants {
                    if !labels.insert(&variant.label) {
                        anyhow::bail!("{} has duplicate variant '{}'", location, variant.label);
                    }
                    for step in &variant.steps {
                        step.validate(stage, handles)?;
                    }
                }
                for step in branch.otherwise.iter().flatten() {
                    step.validate(stage, handles)?;
                }
            }
            ActionConfig::WaitFor(wait) => {
                if wait.url.trim().is_empty() {
                    anyhow::bail!("{} has an empty url", location);
                }
                if wait.max_attempts == 0 {
                    anyhow::bail!("{} max_attempts must be at least 1", location);
                }
                if wait.expect_status.min > wait.expect_status.max {
                    anyhow::bail!(
                        "{} expect_status min {} is above max {}",
                        location,
                        wait.expect_status.min,
                        wait.expect_status.max
                    );
                }
            }
            ActionConfig::Gate(gate) => {
                if gate.url.trim().is_empty() {
                    anyhow::bail!("{} has an empty url", location);
                }
                if gate.pass.is_empty() {
                    anyhow::bail!("{} needs at least one passing verdict", location);
                }
                if gate.max_attempts == 0 {
                    anyhow::bail!("{} max_attempts must be at least 1", location);
                }
                if gate.timeout_secs == 0 {
                    anyhow::bail!("{} timeout_secs must be at least 1", location);
                }
            }
            ActionConfig::Artifact(artifact) => {
                if artifact.name.trim().is_empty() || artifact.path.trim().is_empty() {
                    anyhow::bail!("{} needs both a name and a path", location);
                }
            }
            ActionConfig::Require(_) => {}
            ActionConfig::Stop(handle) => {
                if !handles.contains(handle) {
                    anyhow::bail!("{} stops unknown process '{}'", location, handle);
                }
            }
        }

        Ok(())
    }

    fn collect_handles(&self, handles: &mut HashSet<String>) {
        match &self.action {
            ActionConfig::Start(start) => {
                handles.insert(start.handle.clone());
            }
            ActionConfig::Branch(branch) => {
                for step in branch
                    .variants
                    .iter()
                    .flat_map(|v| v.steps.iter())
                    .chain(branch.otherwise.iter().flatten())
                {
                    step.collect_handles(handles);
                }
            }
            _ => {}
        }
    }
}

impl ActionConfig {
    fn default_name(&self, index: usize) -> String {
        match self {
            ActionConfig::Run(run) => {
                let command = run.command.trim();
                let first_line = command.lines().next().unwrap_or_default();
                if first_line.chars().count() > 48 {
                    format!("{}...", first_line.chars().take(45).collect::<String>())
                } else {
                    first_line.to_string()
                }
            }
            ActionConfig::Branch(_) => format!("branch-{}", index + 1),
            ActionConfig::WaitFor(wait) => format!("wait for {}", wait.url),
            ActionConfig::Gate(_) => "quality gate".to_string(),
            ActionConfig::Artifact(artifact) => format!("artifact {}", artifact.name),
            ActionConfig::Require(predicate) => format!("require {}", predicate),
            ActionConfig::Start(start) => format!("start {}", start.handle),
            ActionConfig::Stop(handle) => format!("stop {}", handle),
        }
    }
}

impl RunConfig {
    fn to_tool_call(&self) -> ToolCall {
        ToolCall {
            tool: self.tool,
            command: self.command.clone(),
            env: self.env.clone(),
            working_dir: self.working_dir.clone(),
        }
    }
}

impl HookConfig {
    fn validate(&self, handles: &HashSet<String>) -> Result<()> {
        for action in self.always.iter().chain(&self.success).chain(&self.failure) {
            match action {
                HookActionConfig::Run(run) if run.command.trim().is_empty() => {
                    anyhow::bail!("Hook has an empty command");
                }
                HookActionConfig::Notify(notify) if notify.recipient.trim().is_empty() => {
                    anyhow::bail!("Notification '{}' has no recipient", notify.subject);
                }
                HookActionConfig::Stop(handle) if !handles.contains(handle) => {
                    anyhow::bail!("Hook stops unknown process '{}'", handle);
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn to_hook_set(&self) -> HookSet {
        let convert = |actions: &[HookActionConfig]| -> Vec<HookAction> {
            actions
                .iter()
                .map(|action| match action {
                    HookActionConfig::Run(run) => HookAction::Run(run.to_tool_call()),
                    HookActionConfig::Notify(notify) => HookAction::Notify(NotificationTemplate {
                        subject: notify.subject.clone(),
                        body: notify.body.clone(),
                        recipient: notify.recipient.clone(),
                    }),
                    HookActionConfig::Stop(handle) => HookAction::Stop {
                        handle: handle.clone(),
                    },
                })
                .collect()
        };

        HookSet {
            always: convert(&self.always),
            success: convert(&self.success),
            failure: convert(&self.failure),
        }
    }
}
