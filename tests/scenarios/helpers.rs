//! Test utilities: scripted tools, probes and notifications

use async_trait::async_trait;
use serde_json::{json, Value};
use stagegate::core::config::PipelineConfig;
use stagegate::core::{ErrorKind, ExecutionContext, RunStatus};
use stagegate::execution::{ExecutionEvent, PipelineEngine, RunOutcome};
use stagegate::tools::{
    BackgroundProcess, HttpClient, Invocation, InvocationResult, Notification,
    NotificationSender, NotifyError, ToolError, ToolInvoker, ToolKind, Toolbox,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const ALL_KINDS: [ToolKind; 6] = [
    ToolKind::Build,
    ToolKind::Test,
    ToolKind::Analysis,
    ToolKind::Scanner,
    ToolKind::Deploy,
    ToolKind::Generic,
];

/// A recorded tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub kind: ToolKind,
    pub command: String,
}

#[derive(Debug, Clone)]
struct Rule {
    /// Substring of the command the rule applies to
    pattern: String,
    exit_code: i32,
    delay: Option<Duration>,
    /// File (relative to the working directory) created by the command
    creates: Option<String>,
}

/// Scripted stand-in for every external tool.
///
/// Commands exit 0 unless a rule matching a substring of the command says
/// otherwise.
#[derive(Default)]
pub struct FakeTools {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Call>>,
    spawned: Mutex<Vec<String>>,
    stopped: Arc<Mutex<Vec<String>>>,
}

impl FakeTools {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn rule(&self, command: &str) -> Rule {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|r| command.contains(&r.pattern))
            .cloned()
            .unwrap_or(Rule {
                pattern: String::new(),
                exit_code: 0,
                delay: None,
                creates: None,
            })
    }

    fn add(&self, pattern: &str, update: impl FnOnce(&mut Rule)) {
        let mut rules = self.rules.lock().unwrap();
        if let Some(rule) = rules.iter_mut().find(|r| r.pattern == pattern) {
            update(rule);
        } else {
            let mut rule = Rule {
                pattern: pattern.to_string(),
                exit_code: 0,
                delay: None,
                creates: None,
            };
            update(&mut rule);
            rules.push(rule);
        }
    }

    /// Commands containing `pattern` exit with `code`
    pub fn exit(&self, pattern: &str, code: i32) {
        self.add(pattern, |r| r.exit_code = code);
    }

    /// Commands containing `pattern` take `delay` to finish
    pub fn delay(&self, pattern: &str, delay: Duration) {
        self.add(pattern, |r| r.delay = Some(delay));
    }

    /// Commands containing `pattern` create `file` in their working directory
    pub fn creates(&self, pattern: &str, file: &str) {
        self.add(pattern, |r| r.creates = Some(file.to_string()));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.command).collect()
    }

    pub fn was_invoked(&self, pattern: &str) -> bool {
        self.calls().iter().any(|c| c.command.contains(pattern))
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|c| c.command.contains(pattern)).count()
    }

    pub fn spawned(&self) -> Vec<String> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }

    /// A toolbox routing every tool kind to this fake
    pub fn toolbox(self: &Arc<Self>, http: Arc<FakeHttp>, inbox: Arc<Inbox>) -> Toolbox {
        let mut toolbox = Toolbox::new(
            Arc::new(KindInvoker {
                kind: ToolKind::Generic,
                tools: self.clone(),
            }),
            http,
        )
        .with_notifier(inbox);

        for kind in ALL_KINDS {
            toolbox = toolbox.with_invoker(
                kind,
                Arc::new(KindInvoker {
                    kind,
                    tools: self.clone(),
                }),
            );
        }
        toolbox
    }
}

struct KindInvoker {
    kind: ToolKind,
    tools: Arc<FakeTools>,
}

#[async_trait]
impl ToolInvoker for KindInvoker {
    async fn invoke(&self, invocation: &Invocation) -> Result<InvocationResult, ToolError> {
        self.tools.calls.lock().unwrap().push(Call {
            kind: self.kind,
            command: invocation.command.clone(),
        });

        let rule = self.tools.rule(&invocation.command);
        if let Some(delay) = rule.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(file) = &rule.creates {
            std::fs::write(invocation.working_dir.join(file), "report")
                .map_err(|e| ToolError::Io(e.to_string()))?;
        }

        let stderr = if rule.exit_code == 0 { "" } else { "FAILURE" };
        Ok(InvocationResult::new(rule.exit_code).with_output("", stderr))
    }

    async fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn BackgroundProcess>, ToolError> {
        self.tools.spawned.lock().unwrap().push(invocation.command.clone());
        Ok(Box::new(FakeProcess {
            command: invocation.command.clone(),
            stopped: self.tools.stopped.clone(),
        }))
    }
}

#[derive(Debug)]
struct FakeProcess {
    command: String,
    stopped: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl BackgroundProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(4242)
    }

    async fn stop(&mut self) -> Result<(), ToolError> {
        self.stopped.lock().unwrap().push(self.command.clone());
        Ok(())
    }
}

/// Scripted HTTP endpoints for readiness probes and gate verdicts
pub struct FakeHttp {
    /// Readiness answers 503 until this many probes have been made
    ready_on: Mutex<Option<usize>>,
    status_calls: Mutex<usize>,
    /// Verdicts served in order; the last one repeats
    verdicts: Mutex<Vec<String>>,
    json_calls: Mutex<usize>,
}

impl FakeHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ready_on: Mutex::new(Some(1)),
            status_calls: Mutex::new(0),
            verdicts: Mutex::new(vec!["OK".to_string()]),
            json_calls: Mutex::new(0),
        })
    }

    /// The readiness endpoint answers 200 from the `n`-th probe on
    pub fn ready_on(&self, n: usize) {
        *self.ready_on.lock().unwrap() = Some(n);
    }

    /// The readiness endpoint never answers 200
    pub fn never_ready(&self) {
        *self.ready_on.lock().unwrap() = None;
    }

    pub fn verdicts(&self, verdicts: &[&str]) {
        *self.verdicts.lock().unwrap() = verdicts.iter().map(|v| v.to_string()).collect();
    }

    pub fn status_calls(&self) -> usize {
        *self.status_calls.lock().unwrap()
    }

    pub fn json_calls(&self) -> usize {
        *self.json_calls.lock().unwrap()
    }
}

#[async_trait]
impl HttpClient for FakeHttp {
    async fn get_status(&self, _url: &str) -> Result<u16, ToolError> {
        let mut calls = self.status_calls.lock().unwrap();
        *calls += 1;
        match *self.ready_on.lock().unwrap() {
            Some(n) if *calls >= n => Ok(200),
            _ => Ok(503),
        }
    }

    async fn get_json(&self, _url: &str) -> Result<Value, ToolError> {
        *self.json_calls.lock().unwrap() += 1;
        let mut verdicts = self.verdicts.lock().unwrap();
        let verdict = if verdicts.len() > 1 {
            verdicts.remove(0)
        } else {
            verdicts[0].clone()
        };
        Ok(json!({ "projectStatus": { "status": verdict } }))
    }
}

/// Collects notifications instead of sending them
#[derive(Default)]
pub struct Inbox {
    sent: Mutex<Vec<Notification>>,
}

impl Inbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent().into_iter().map(|n| n.subject).collect()
    }
}

#[async_trait]
impl NotificationSender for Inbox {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Everything a scenario needs: fakes plus a scratch working directory
pub struct Harness {
    pub tools: Arc<FakeTools>,
    pub http: Arc<FakeHttp>,
    pub inbox: Arc<Inbox>,
    pub workdir: TempDir,
    pub events: Arc<Mutex<Vec<ExecutionEvent>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            tools: FakeTools::new(),
            http: FakeHttp::new(),
            inbox: Inbox::new(),
            workdir: tempfile::tempdir().unwrap(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a file in the working directory
    pub fn touch(&self, name: &str) {
        std::fs::write(self.workdir.path().join(name), "").unwrap();
    }

    pub async fn run(&self, yaml: &str) -> ScenarioResult {
        self.run_with_cancel(yaml, CancellationToken::new()).await
    }

    pub async fn run_with_cancel(&self, yaml: &str, cancel: CancellationToken) -> ScenarioResult {
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        let pipeline = config.to_pipeline();
        let mut context = pipeline.create_context(self.workdir.path());

        let engine = PipelineEngine::new(self.tools.toolbox(self.http.clone(), self.inbox.clone()));
        let sink = self.events.clone();
        engine.add_event_handler(move |event| sink.lock().unwrap().push(event));

        let outcome = engine.run(&pipeline, &mut context, &cancel).await;
        ScenarioResult { outcome, context }
    }

    /// Count events matching `predicate`
    pub fn count_events(&self, predicate: impl Fn(&ExecutionEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }
}

pub struct ScenarioResult {
    pub outcome: RunOutcome,
    pub context: ExecutionContext,
}

/// Assert the run succeeded
pub fn assert_succeeded(result: &ScenarioResult) {
    assert_eq!(
        result.outcome.status,
        RunStatus::Succeeded,
        "expected success, failed at {:?}: {:?}",
        result.outcome.failed_stage,
        result.outcome.error
    );
}

/// Assert the run failed in `stage` with an error of `kind`
pub fn assert_failed_at(result: &ScenarioResult, stage: &str, kind: ErrorKind) {
    assert_eq!(result.outcome.status, RunStatus::Failed);
    assert_eq!(result.outcome.failed_stage.as_deref(), Some(stage));
    let failure = result.outcome.error.as_ref().expect("failure recorded");
    assert_eq!(failure.error.kind(), kind, "unexpected error: {}", failure.error);
}
