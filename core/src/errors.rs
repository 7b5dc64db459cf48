//! Error taxonomy for the automation core.
//!
//! Each subsystem gets its own `thiserror` enum and `Result` alias, mirroring
//! the reference codebase's `errors.rs` (`ProviderError`, `AgentError`,
//! `StateStoreError`, `ContextError`). The closed classification of run-loop
//! failure reasons is realized as `AutomationErrorKind`, used only at the boundary where
//! the run loop decides how to react to a failure -- it is never propagated
//! with `?` past that point.

use thiserror::Error;

/// Errors from a Task/Execution Repository adapter.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(String),
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("execution not found: {0}")]
    ExecutionNotFound(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Errors from the Workspace Service (git worktree adapter).
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("git error: {0}")]
    Git(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("workspace not found for task {0}")]
    NotFound(String),
}

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

/// Errors from an Agent adapter.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("agent failed to start: {0}")]
    StartFailed(String),
    #[error("agent readiness timed out")]
    ReadyTimeout,
    #[error("send_prompt failed: {0}")]
    SendFailed(String),
    #[error("agent io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("agent process exited unexpectedly: {0}")]
    ProcessExited(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Errors from the Merge Service.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("merge service unavailable")]
    Unavailable,
    #[error("merge conflict: {0}")]
    Conflict(String),
    #[error("merge failed: {0}")]
    Other(String),
}

pub type MergeResult<T> = Result<T, MergeError>;

/// Closed classification of run-loop failures. This is a
/// terminal, purely descriptive value: the run loop always consumes it in
/// place (logs, notifies, mutates task status) and never returns it to a
/// caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutomationErrorKind {
    AgentStartTimeout,
    AgentSendError,
    AgentCancelled,
    WorkspaceValidation,
    WorkspaceGit,
    BlockedSignal,
    MaxIterations,
    MergeUnavailable,
    MergeConflictRetry,
    MergeConflictNoRetry,
    MergeOther,
    WorkerLoopException,
}

impl std::fmt::Display for AutomationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AutomationErrorKind::AgentStartTimeout => "agent_start_timeout",
            AutomationErrorKind::AgentSendError => "agent_send_error",
            AutomationErrorKind::AgentCancelled => "agent_cancelled",
            AutomationErrorKind::WorkspaceValidation => "workspace_validation",
            AutomationErrorKind::WorkspaceGit => "workspace_git",
            AutomationErrorKind::BlockedSignal => "blocked_signal",
            AutomationErrorKind::MaxIterations => "max_iterations",
            AutomationErrorKind::MergeUnavailable => "merge_unavailable",
            AutomationErrorKind::MergeConflictRetry => "merge_conflict_retry",
            AutomationErrorKind::MergeConflictNoRetry => "merge_conflict_no_retry",
            AutomationErrorKind::MergeOther => "merge_other",
            AutomationErrorKind::WorkerLoopException => "worker_loop_exception",
        };
        write!(f, "{s}")
    }
}

/// Classifies a subprocess exit status: a SIGTERM exit (-15, or 143 =
/// 128+15 depending on how the OS reports it) must be treated as
/// cancellation, not failure.
pub fn is_cancelled_exit(code: Option<i32>) -> bool {
    matches!(code, Some(-15) | Some(143))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_exit_classification() {
        assert!(is_cancelled_exit(Some(-15)));
        assert!(is_cancelled_exit(Some(143)));
        assert!(!is_cancelled_exit(Some(0)));
        assert!(!is_cancelled_exit(Some(1)));
        assert!(!is_cancelled_exit(None));
    }

    #[test]
    fn kind_display_is_stable() {
        assert_eq!(
            AutomationErrorKind::BlockedSignal.to_string(),
            "blocked_signal"
        );
    }
}
