//! Default Agent adapter backed by a persistent line-oriented CLI
//! subprocess. Grounded on the reference codebase's `agent_runner.rs`
//! (`LocalProcessRunner`/`LocalAgentHandle`: tokio `Command` spawn, piped
//! stdio, background stdout reader task, `nix`-based SIGTERM/SIGKILL).

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::errors::{is_cancelled_exit, AgentError, AgentResult};
use crate::signal_parser::parse_signal;
use crate::traits::{Agent, AgentConfig, MessageSink};

#[derive(Default)]
struct SharedState {
    messages: Vec<String>,
    response_buffer: String,
    exit_code: Option<i32>,
    message_target: Option<MessageSink>,
}

/// Drives a persistent `claude`/`opencode`-style CLI process across the
/// lifetime of a task: one process per spawned agent, repeated
/// `send_prompt` calls feed successive iteration prompts to the same stdin.
pub struct ProcessAgent {
    config: AgentConfig,
    model_override: Option<String>,
    auto_approve: bool,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    state: Arc<Mutex<SharedState>>,
    new_line: Arc<Notify>,
    reader_handle: Option<JoinHandle<()>>,
}

impl ProcessAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            model_override: None,
            auto_approve: false,
            child: None,
            stdin: None,
            state: Arc::new(Mutex::new(SharedState::default())),
            new_line: Arc::new(Notify::new()),
            reader_handle: None,
        }
    }

    fn program_for_identity(&self) -> &'static str {
        let lower = self.config.identity.to_lowercase();
        if lower.contains("opencode") {
            "opencode"
        } else {
            "claude"
        }
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(self.program_for_identity());
        cmd.current_dir(&self.config.working_dir);
        cmd.arg("--print").arg("--input-format").arg("stream-json");
        if self.config.read_only {
            cmd.arg("--read-only");
        }
        if self.auto_approve {
            cmd.arg("--auto-approve");
        }
        if let Some(model) = &self.model_override {
            cmd.arg("--model").arg(model);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }
}

#[async_trait::async_trait]
impl Agent for ProcessAgent {
    async fn start(&mut self) -> AgentResult<()> {
        let mut cmd = self.build_command();
        let mut child = cmd
            .spawn()
            .map_err(|e| AgentError::StartFailed(format!("{}: {e}", self.program_for_identity())))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        if let Some(stdout) = stdout {
            let state = self.state.clone();
            let notify = self.new_line.clone();
            self.reader_handle = Some(tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut guard = state.lock().await;
                    guard.response_buffer.push_str(&line);
                    guard.response_buffer.push('\n');
                    guard.messages.push(line.clone());
                    let sink = guard.message_target.clone();
                    drop(guard);
                    if let Some(sink) = sink {
                        sink(line);
                    }
                    notify.notify_waiters();
                }
            }));
        }
        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(stderr = %line, "agent stderr");
                }
            });
        }

        self.stdin = stdin;
        self.child = Some(child);
        Ok(())
    }

    async fn stop(&mut self) -> AgentResult<()> {
        if let Some(mut child) = self.child.take() {
            #[cfg(unix)]
            {
                if let Some(pid) = child.id() {
                    use nix::sys::signal::{kill, Signal};
                    use nix::unistd::Pid;
                    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
                }
            }
            let exited = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
            match exited {
                Ok(Ok(status)) => {
                    self.state.lock().await.exit_code = status.code();
                }
                _ => {
                    let _ = child.kill().await;
                }
            }
        }
        if let Some(handle) = self.reader_handle.take() {
            handle.abort();
        }
        Ok(())
    }

    async fn cancel(&mut self) -> AgentResult<()> {
        if let Some(child) = &mut self.child {
            #[cfg(unix)]
            {
                if let Some(pid) = child.id() {
                    use nix::sys::signal::{kill, Signal};
                    use nix::unistd::Pid;
                    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
                    return Ok(());
                }
            }
            #[cfg(not(unix))]
            {
                let _ = child.kill().await;
            }
        }
        Ok(())
    }

    async fn wait_ready(&mut self, timeout: Duration) -> AgentResult<()> {
        let Some(child) = &mut self.child else {
            return Err(AgentError::StartFailed("agent not started".to_string()));
        };
        let liveness_window = Duration::from_millis(50).min(timeout);
        tokio::select! {
            _ = tokio::time::sleep(liveness_window) => Ok(()),
            status = child.wait() => {
                match status {
                    Ok(s) => Err(AgentError::ProcessExited(format!("exited before ready: {s}"))),
                    Err(e) => Err(AgentError::Io(e)),
                }
            }
        }
    }

    async fn send_prompt(&mut self, text: &str) -> AgentResult<()> {
        {
            let mut guard = self.state.lock().await;
            guard.response_buffer.clear();
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AgentError::SendFailed("agent stdin unavailable".to_string()))?;
        stdin
            .write_all(text.as_bytes())
            .await
            .map_err(AgentError::Io)?;
        stdin.write_all(b"\n").await.map_err(AgentError::Io)?;
        stdin.flush().await.map_err(AgentError::Io)?;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(600);
        loop {
            {
                let guard = self.state.lock().await;
                if parse_signal(&guard.response_buffer).signal != crate::model::Signal::Continue {
                    return Ok(());
                }
            }
            if let Some(child) = &mut self.child {
                if let Ok(Some(status)) = child.try_wait() {
                    self.state.lock().await.exit_code = status.code();
                    if is_cancelled_exit(status.code()) {
                        return Err(AgentError::ProcessExited("cancelled".to_string()));
                    }
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AgentError::SendFailed("agent response timed out".to_string()));
            }
            let _ = tokio::time::timeout(Duration::from_millis(250), self.new_line.notified()).await;
        }
    }

    fn set_auto_approve(&mut self, value: bool) {
        self.auto_approve = value;
    }

    fn set_model_override(&mut self, model: Option<String>) {
        self.model_override = model;
    }

    fn set_task_id(&mut self, task_id: &str) {
        self.config.task_id = task_id.to_string();
    }

    fn get_response_text(&self) -> String {
        self.state
            .try_lock()
            .map(|g| g.response_buffer.clone())
            .unwrap_or_default()
    }

    fn get_messages(&self) -> Vec<String> {
        self.state
            .try_lock()
            .map(|g| g.messages.clone())
            .unwrap_or_default()
    }

    fn clear_tool_calls(&mut self) {
        if let Ok(mut guard) = self.state.try_lock() {
            guard.messages.clear();
        }
    }

    fn exit_code(&self) -> Option<i32> {
        self.state.try_lock().ok().and_then(|g| g.exit_code)
    }

    fn set_message_target(&mut self, target: Option<MessageSink>) {
        if let Ok(mut guard) = self.state.try_lock() {
            guard.message_target = target;
        }
    }
}

/// Default factory wiring a [`ProcessAgent`] for each spawn request.
pub fn process_agent_factory() -> crate::traits::AgentFactory {
    Arc::new(|config: AgentConfig| Box::new(ProcessAgent::new(config)) as Box<dyn Agent>)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_opencode_binary_for_opencode_identity() {
        let agent = ProcessAgent::new(AgentConfig {
            task_id: "t1".into(),
            identity: "opencode-cli".into(),
            working_dir: std::path::PathBuf::from("."),
            read_only: false,
        });
        assert_eq!(agent.program_for_identity(), "opencode");
    }

    #[test]
    fn defaults_to_claude_binary() {
        let agent = ProcessAgent::new(AgentConfig {
            task_id: "t1".into(),
            identity: "claude-code".into(),
            working_dir: std::path::PathBuf::from("."),
            read_only: false,
        });
        assert_eq!(agent.program_for_identity(), "claude");
    }
}
