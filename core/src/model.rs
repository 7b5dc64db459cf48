//! The data model: Task, Execution, queued messages and
//! agent signals. Modeled on the reference codebase's `traits.rs` enum/struct
//! conventions (serde derives, `Display`/`FromStr` on small enums) but with
//! Kagan's own field set -- this is not the reference's `Task`/`TaskStatus`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum length a task title is truncated to in log lines, matching the
/// original Python module's `MODAL_TITLE_MAX_LENGTH`.
pub const MODAL_TITLE_MAX_LENGTH: usize = 80;

/// Truncation length for `last_error` / `merge_error` on persistence.
pub const ERROR_FIELD_MAX_LENGTH: usize = 500;

/// Truncation length for the per-iteration scratchpad progress note (keeps
/// the trailing N characters of the agent's response).
pub const SCRATCHPAD_TAIL_MAX_LENGTH: usize = 2000;

/// Cap applied to a single queued message's content when it is drained into
/// a prompt (see DESIGN.md "Additional implementation decisions").
pub const MAX_QUEUED_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    InProgress,
    Review,
    Done,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Backlog => "BACKLOG",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Review => "REVIEW",
            TaskStatus::Done => "DONE",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Auto,
    Pair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeReadiness {
    Risk,
    Blocked,
    Ready,
}

/// The external Task entity, consumed read-mostly through the Task
/// Repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub task_type: TaskType,
    pub title: String,
    pub description: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub scratchpad: String,
    pub base_branch: Option<String>,
    pub total_iterations: u64,
    pub merge_readiness: MergeReadiness,
    pub checks_passed: Option<bool>,
    pub review_summary: Option<String>,
    pub last_error: Option<String>,
    pub block_reason: Option<String>,
    pub agent_backend: Option<String>,
    pub merge_failed: bool,
    pub merge_error: Option<String>,
}

impl Task {
    /// Title truncated for log lines, matching `MODAL_TITLE_MAX_LENGTH`.
    pub fn title_for_log(&self) -> &str {
        let max = MODAL_TITLE_MAX_LENGTH;
        if self.title.len() <= max {
            &self.title
        } else {
            let mut end = max;
            while !self.title.is_char_boundary(end) {
                end -= 1;
            }
            &self.title[..end]
        }
    }
}

/// Partial update applied via `TaskRepository::update_fields`. Every field is
/// optional; `None` means "leave unchanged". `status` is wrapped separately
/// so callers can distinguish "don't touch status" from any real status,
/// matching the repository's rule of emitting `TaskStatusChanged` only when
/// `status` is actually set.
#[derive(Debug, Clone, Default)]
pub struct TaskFieldUpdate {
    pub status: Option<TaskStatus>,
    pub checks_passed: Option<Option<bool>>,
    pub review_summary: Option<Option<String>>,
    pub merge_failed: Option<bool>,
    pub merge_error: Option<Option<String>>,
    pub merge_readiness: Option<MergeReadiness>,
    pub last_error: Option<Option<String>>,
    pub block_reason: Option<Option<String>>,
}

impl TaskFieldUpdate {
    /// The reset applied at spawn time, before a fresh runner starts work.
    pub fn reset_for_spawn() -> Self {
        Self {
            checks_passed: Some(None),
            review_summary: Some(None),
            merge_failed: Some(false),
            merge_error: Some(None),
            last_error: Some(None),
            block_reason: Some(None),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Metadata bag attached to an Execution. Kept as a generic JSON map so the
/// shallow-additive read-modify-write merge rule can be expressed directly
/// on an ordinary map rather than requiring bespoke merge logic per
/// well-known key.
pub type ExecutionMetadata = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub task_id: String,
    pub session_id: String,
    pub run_reason: String,
    pub status: ExecutionStatus,
    pub metadata: ExecutionMetadata,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub const METADATA_REVIEW_LOG_START_INDEX: &str = "review_log_start_index";
pub const METADATA_REVIEW_RESULT: &str = "review_result";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Implementation,
    Review,
    Planner,
}

#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub task_id: String,
    pub lane: Lane,
    pub content: String,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
}

/// The structured tag parsed out of agent response text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Complete,
    Blocked,
    Approve,
    Reject,
    Continue,
}

/// Result of `parse_signal`: the signal plus an optional reason string
/// (present for Blocked/Approve/Reject).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalResult {
    pub signal: Signal,
    pub reason: String,
}

impl SignalResult {
    pub fn continue_() -> Self {
        Self {
            signal: Signal::Continue,
            reason: String::new(),
        }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            signal: Signal::Blocked,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_for_log_truncates_on_char_boundary() {
        let t = Task {
            id: "t1".into(),
            status: TaskStatus::Backlog,
            task_type: TaskType::Auto,
            title: "x".repeat(200),
            description: None,
            acceptance_criteria: None,
            scratchpad: String::new(),
            base_branch: None,
            total_iterations: 0,
            merge_readiness: MergeReadiness::Risk,
            checks_passed: None,
            review_summary: None,
            last_error: None,
            block_reason: None,
            agent_backend: None,
            merge_failed: false,
            merge_error: None,
        };
        assert_eq!(t.title_for_log().len(), MODAL_TITLE_MAX_LENGTH);
    }

    #[test]
    fn reset_for_spawn_clears_expected_fields() {
        let u = TaskFieldUpdate::reset_for_spawn();
        assert_eq!(u.checks_passed, Some(None));
        assert_eq!(u.merge_failed, Some(false));
        assert_eq!(u.status, None);
    }
}
