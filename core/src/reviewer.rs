//! The Reviewer: a read-only agent pass that approves or
//! rejects a task's changes. Grounded on automation.py's `run_review` and on
//! the reference codebase's `AgentRunner::spawn` + `AgentHandle` lifecycle.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;

use crate::config::AGENT_TIMEOUT_LONG;
use crate::events::{DomainEvent, EventBus};
use crate::model::{Signal, Task};
use crate::prompt::build_review_prompt;
use crate::running_map::{RunningMap, SharedAgent};
use crate::signal_parser::parse_signal;
use crate::traits::{Agent, AgentConfig, AgentFactory, ExecutionRepository, WorkspaceService};

fn apply_model_override(agent: &mut dyn Agent, identity: &str, claude: Option<String>, opencode: Option<String>) {
    let lower = identity.to_lowercase();
    if lower.contains("claude") {
        agent.set_model_override(claude);
    } else if lower.contains("opencode") {
        agent.set_model_override(opencode);
    }
}

/// Result of a review pass.
pub struct ReviewResult {
    pub approved: bool,
    pub summary: String,
}

/// Run one review pass over `task`'s worktree: spawn a read-only reviewer
/// agent, send it the review prompt, parse its approve/reject signal, and
/// tear it down.
#[allow(clippy::too_many_arguments)]
pub async fn run_review(
    task: &Task,
    worktree: &Path,
    execution_id: &str,
    base_branch: &str,
    identity: &str,
    default_model_claude: Option<String>,
    default_model_opencode: Option<String>,
    workspace: &dyn WorkspaceService,
    executions: &dyn ExecutionRepository,
    agent_factory: &AgentFactory,
    running: &parking_lot::RwLock<RunningMap>,
    task_id: &str,
    event_bus: &EventBus,
) -> ReviewResult {
    let commit_log = workspace
        .get_commit_log(&task.id, base_branch)
        .await
        .unwrap_or_default();
    let diff_stats = workspace
        .get_diff_stats(&task.id, base_branch)
        .await
        .unwrap_or_default();
    let prompt = build_review_prompt(task, base_branch, &commit_log, &diff_stats);

    let mut agent = agent_factory(AgentConfig {
        task_id: task.id.clone(),
        identity: identity.to_string(),
        working_dir: worktree.to_path_buf(),
        read_only: true,
    });
    agent.set_auto_approve(true);
    apply_model_override(agent.as_mut(), identity, default_model_claude, default_model_opencode);

    if agent.start().await.is_err() {
        let _ = agent.stop().await;
        return ReviewResult {
            approved: false,
            summary: "Review agent failed to start".to_string(),
        };
    }

    if timeout(AGENT_TIMEOUT_LONG, agent.wait_ready(AGENT_TIMEOUT_LONG))
        .await
        .is_err()
    {
        let _ = agent.stop().await;
        return ReviewResult {
            approved: false,
            summary: "Review agent timed out".to_string(),
        };
    }

    let shared: SharedAgent = Arc::new(AsyncMutex::new(agent));
    {
        let mut map = running.write();
        if let Some(state) = map.get_mut(task_id) {
            state.review_agent = Some(shared.clone());
            state.is_reviewing = true;
        }
    }
    event_bus.publish(DomainEvent::AutomationReviewAgentAttached {
        task_id: task_id.to_string(),
    });

    let send_result = shared.lock().await.send_prompt(&prompt).await;
    let result = if let Err(e) = send_result {
        ReviewResult {
            approved: false,
            summary: format!("Review agent error: {e}"),
        }
    } else {
        let response_text = shared.lock().await.get_response_text();
        let _ = executions.append_execution_log(execution_id, &response_text).await;
        let parsed = parse_signal(&response_text);
        match parsed.signal {
            Signal::Approve => ReviewResult {
                approved: true,
                summary: parsed.reason,
            },
            Signal::Reject => ReviewResult {
                approved: false,
                summary: parsed.reason,
            },
            _ => ReviewResult {
                approved: false,
                summary: "No review signal found in agent response".to_string(),
            },
        }
    };

    let _ = shared.lock().await.stop().await;
    {
        let mut map = running.write();
        if let Some(state) = map.get_mut(task_id) {
            state.review_agent = None;
            state.is_reviewing = false;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_model_override_is_noop_for_unknown_identity() {
        struct NoopAgent;
        #[async_trait::async_trait]
        impl Agent for NoopAgent {
            async fn start(&mut self) -> crate::errors::AgentResult<()> {
                Ok(())
            }
            async fn stop(&mut self) -> crate::errors::AgentResult<()> {
                Ok(())
            }
            async fn cancel(&mut self) -> crate::errors::AgentResult<()> {
                Ok(())
            }
            async fn wait_ready(&mut self, _timeout: std::time::Duration) -> crate::errors::AgentResult<()> {
                Ok(())
            }
            async fn send_prompt(&mut self, _text: &str) -> crate::errors::AgentResult<()> {
                Ok(())
            }
            fn set_auto_approve(&mut self, _value: bool) {}
            fn set_model_override(&mut self, _model: Option<String>) {}
            fn set_task_id(&mut self, _task_id: &str) {}
            fn get_response_text(&self) -> String {
                String::new()
            }
            fn get_messages(&self) -> Vec<String> {
                Vec::new()
            }
            fn clear_tool_calls(&mut self) {}
            fn exit_code(&self) -> Option<i32> {
                None
            }
        }
        let mut a = NoopAgent;
        apply_model_override(&mut a, "some-other-cli", Some("m1".into()), Some("m2".into()));
    }
}
