//! The external collaborator contracts: Task Repository,
//! Execution Repository, Workspace Service, Agent, Notifier. Grounded on the
//! reference codebase's `traits.rs` (`StateStore`, `AgentRunner`,
//! `AgentHandle`, `ContextSyncer`: `#[async_trait] pub trait X: Send + Sync`).
//! These are *consumed*, not owned, by the automation core -- concrete
//! adapters live under `adapters/`.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{AgentResult, RepositoryResult, WorkspaceResult};
use crate::model::{Execution, ExecutionMetadata, ExecutionStatus, Lane, Task, TaskFieldUpdate, TaskStatus, TaskType};

/// Task Repository (consumed).
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn get_task(&self, id: &str) -> RepositoryResult<Option<Task>>;
    async fn get_by_status(&self, status: TaskStatus) -> RepositoryResult<Vec<Task>>;
    async fn list_tasks(&self) -> RepositoryResult<Vec<Task>>;
    async fn update_fields(&self, id: &str, update: TaskFieldUpdate) -> RepositoryResult<()>;
    async fn set_status(&self, id: &str, status: TaskStatus, reason: Option<&str>) -> RepositoryResult<()>;
    async fn increment_total_iterations(&self, id: &str) -> RepositoryResult<()>;
    async fn get_scratchpad(&self, id: &str) -> RepositoryResult<String>;
    async fn update_scratchpad(&self, id: &str, text: &str) -> RepositoryResult<()>;
    async fn append_event(&self, id: &str, kind: &str, message: &str) -> RepositoryResult<()>;
    async fn clear_agent_logs(&self, id: &str) -> RepositoryResult<()>;
}

/// Execution Repository (consumed).
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn create_execution(
        &self,
        task_id: &str,
        session_id: &str,
        run_reason: &str,
    ) -> RepositoryResult<Execution>;

    /// Metadata merging must be shallow-additive over existing keys:
    /// implementations read the current metadata, merge the provided keys
    /// in, and write back the union -- never a blind overwrite.
    async fn update_execution(
        &self,
        id: &str,
        status: Option<ExecutionStatus>,
        metadata_patch: Option<ExecutionMetadata>,
        completed: bool,
    ) -> RepositoryResult<()>;

    async fn append_execution_log(&self, execution_id: &str, payload: &str) -> RepositoryResult<()>;
    async fn get_execution_log_entries(&self, execution_id: &str) -> RepositoryResult<Vec<String>>;
    async fn get_latest_execution_for_task(&self, task_id: &str) -> RepositoryResult<Option<Execution>>;
    async fn get_execution(&self, id: &str) -> RepositoryResult<Option<Execution>>;

    /// The raw log entries regrouped into agent turns (one entry per
    /// `send_prompt` round-trip). The reference adapter treats each stored
    /// log entry as already one turn, so this defaults to the same rows as
    /// [`ExecutionRepository::get_execution_log_entries`].
    async fn list_agent_turns(&self, execution_id: &str) -> RepositoryResult<Vec<String>> {
        self.get_execution_log_entries(execution_id).await
    }
}

/// Workspace Service (consumed).
#[async_trait]
pub trait WorkspaceService: Send + Sync {
    async fn get_path(&self, task_id: &str) -> WorkspaceResult<Option<PathBuf>>;
    async fn create(&self, task_id: &str, base_branch: &str) -> WorkspaceResult<PathBuf>;
    async fn delete(&self, task_id: &str) -> WorkspaceResult<()>;

    async fn get_commit_log(&self, task_id: &str, base: &str) -> WorkspaceResult<Vec<String>>;
    async fn get_diff_stats(&self, task_id: &str, base: &str) -> WorkspaceResult<String>;
    async fn get_files_changed_on_base(&self, task_id: &str, base: &str) -> WorkspaceResult<Vec<String>>;

    /// Returns `(success, message, conflict_files)`.
    async fn rebase_onto_base(
        &self,
        task_id: &str,
        base: &str,
    ) -> WorkspaceResult<(bool, String, Vec<String>)>;

    async fn has_uncommitted_changes(&self, path: &std::path::Path) -> WorkspaceResult<bool>;
    async fn commit_all(&self, path: &std::path::Path, message: &str) -> WorkspaceResult<()>;

    /// Identity used for "Co-authored-by" trailers.
    async fn get_user_identity(&self) -> WorkspaceResult<(String, String)>;
}

/// Configuration for spawning an Agent (implementation or reviewer role).
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub task_id: String,
    pub identity: String,
    pub working_dir: PathBuf,
    pub read_only: bool,
}

/// Agent (consumed), polymorphic over {implementation, reviewer}.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn start(&mut self) -> AgentResult<()>;
    /// Idempotent: calling `stop` on an already-stopped agent is a no-op.
    async fn stop(&mut self) -> AgentResult<()>;
    async fn cancel(&mut self) -> AgentResult<()>;

    async fn wait_ready(&mut self, timeout: Duration) -> AgentResult<()>;
    async fn send_prompt(&mut self, text: &str) -> AgentResult<()>;

    fn set_auto_approve(&mut self, value: bool);
    fn set_model_override(&mut self, model: Option<String>);
    fn set_task_id(&mut self, task_id: &str);

    fn get_response_text(&self) -> String;
    fn get_messages(&self) -> Vec<String>;
    fn clear_tool_calls(&mut self);

    /// The subprocess exit code, once known, used for cancellation
    /// classification.
    fn exit_code(&self) -> Option<i32>;

    /// Registers (or clears, with `None`) a sink that receives each output
    /// line as it arrives, for live-streaming to a UI. Adapters that have no
    /// streaming surface may leave this as a no-op.
    fn set_message_target(&mut self, _target: Option<MessageSink>) {}
}

/// Factory creating a fresh `Agent` for a given worktree/config/role.
/// Mirrors the reference codebase's `create_agent`/`AgentFactory` callback
/// parameter.
pub type AgentFactory = std::sync::Arc<dyn Fn(AgentConfig) -> Box<dyn Agent> + Send + Sync>;

/// A callback an observer registers to live-stream an agent's output lines,
/// e.g. into a UI sink.
pub type MessageSink = std::sync::Arc<dyn Fn(String) + Send + Sync>;

/// Notifier (consumed), best-effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Information,
    Warning,
    Error,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str, title: &str, severity: Severity);
}

/// Marker re-export so callers importing `traits::*` get the task-type
/// filter predicate used throughout admission logic.
pub fn is_auto(task_type: TaskType) -> bool {
    matches!(task_type, TaskType::Auto)
}
