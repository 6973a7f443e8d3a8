//! Shell subprocess invoker

use crate::tools::{BackgroundProcess, Invocation, InvocationResult, ToolError, ToolInvoker};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// How long a stopped process group gets to exit after SIGTERM
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Runs commands through `sh -c`
#[derive(Debug, Clone)]
pub struct ShellInvoker {
    /// Shell executable
    shell: String,
}

impl ShellInvoker {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    fn command(&self, invocation: &Invocation) -> Command {
        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&invocation.command)
            .current_dir(&invocation.working_dir)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        // The shell leads its own group so everything it forks can be signalled together
        #[cfg(unix)]
        command.process_group(0);
        command
    }
}

impl Default for ShellInvoker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolInvoker for ShellInvoker {
    async fn invoke(&self, invocation: &Invocation) -> Result<InvocationResult, ToolError> {
        debug!(
            "Spawning `{}` in {}",
            invocation.command,
            invocation.working_dir.display()
        );

        let started = Instant::now();
        let child = self
            .command(invocation)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ToolError::Spawn(format!("{}: {}", invocation.command, e)))?;

        // Dropped along with this future on timeout or cancellation
        let mut group = ProcessGroup::new(child.id());
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ToolError::Io(format!("{}: {}", invocation.command, e)))?;
        group.release();

        let result = InvocationResult {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: started.elapsed(),
        };

        debug!(
            "`{}` exited with {:?} after {:?} ({} bytes of output)",
            invocation.command,
            result.exit_code,
            result.duration,
            result.stdout.len() + result.stderr.len()
        );

        Ok(result)
    }

    async fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn BackgroundProcess>, ToolError> {
        let child = self
            .command(invocation)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ToolError::Spawn(format!("{}: {}", invocation.command, e)))?;

        debug!("Started `{}` as pid {:?}", invocation.command, child.id());
        let group = ProcessGroup::new(child.id());
        Ok(Box::new(ChildProcess { child, group }))
    }
}

/// Kills a shell's whole process group when dropped, unless released
#[derive(Debug)]
struct ProcessGroup {
    leader: Option<u32>,
}

impl ProcessGroup {
    fn new(leader: Option<u32>) -> Self {
        Self { leader }
    }

    /// The group finished on its own; leave it alone
    fn release(&mut self) {
        self.leader = None;
    }

    #[cfg(unix)]
    fn signal(&self, signal: libc::c_int) {
        let Some(leader) = self.leader else {
            return;
        };
        // A negative pid addresses the group; ESRCH just means it is gone
        unsafe {
            libc::kill(-(leader as libc::pid_t), signal);
        }
    }

    #[cfg(unix)]
    fn terminate(&self) {
        self.signal(libc::SIGTERM);
    }

    #[cfg(unix)]
    fn kill(&self) {
        self.signal(libc::SIGKILL);
    }

    #[cfg(not(unix))]
    fn terminate(&self) {}

    #[cfg(not(unix))]
    fn kill(&self) {}
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Some(leader) = self.leader {
            debug!("Killing process group {}", leader);
            self.kill();
        }
    }
}

/// A long-running process started by a `start` step
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    group: ProcessGroup,
}

#[async_trait]
impl BackgroundProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// SIGTERM to the whole group, then SIGKILL for whatever is left
    /// after the grace period.
    async fn stop(&mut self) -> Result<(), ToolError> {
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!("Process already exited with {}", status);
        } else {
            self.group.terminate();
            if tokio::time::timeout(STOP_GRACE, self.child.wait()).await.is_err() {
                warn!("Process {:?} ignored SIGTERM, killing it", self.child.id());
            }
        }

        self.group.kill();
        self.group.release();
        match self.child.try_wait() {
            Ok(Some(_)) => Ok(()),
            _ => self
                .child
                .kill()
                .await
                .map_err(|e| ToolError::Io(e.to_string())),
        }
    }
}
