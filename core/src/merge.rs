//! Auto-Merge and the Auto-Commit Safety Net.
//! Grounded on the reference codebase's `flow_git.rs` (git plumbing
//! idiom: `std::process::Command`, tolerant "nothing to commit" handling) and
//! on automation.py's `_auto_merge`/`_handle_merge_conflict_retry`.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::errors::{AutomationErrorKind, WorkspaceResult};
use crate::model::{MergeReadiness, Task, TaskFieldUpdate, ERROR_FIELD_MAX_LENGTH};
use crate::prompt::build_merge_conflict_note;
use crate::traits::{Notifier, Severity, TaskRepository, WorkspaceService};

fn truncate_error(s: &str) -> String {
    if s.chars().count() <= ERROR_FIELD_MAX_LENGTH {
        s.to_string()
    } else {
        s.chars().take(ERROR_FIELD_MAX_LENGTH).collect()
    }
}

fn commit_message_for(task: &Task) -> String {
    let lower = task.title.to_lowercase();
    let prefix = if lower.contains("fix") || lower.contains("bug") {
        "fix"
    } else if lower.contains("doc") {
        "docs"
    } else if lower.contains("chore") || lower.contains("cleanup") {
        "chore"
    } else {
        "feat"
    };
    format!("{prefix}: {} [auto-commit]", task.title_for_log())
}

/// Auto-commits any uncommitted changes in the worktree.
/// Must be called before a REVIEW transition, before merge, and before
/// rebase. A no-op when the worktree is already clean.
pub async fn ensure_committed(
    workspace: &dyn WorkspaceService,
    worktree: &Path,
    task: &Task,
) -> WorkspaceResult<()> {
    if workspace.has_uncommitted_changes(worktree).await? {
        workspace.commit_all(worktree, &commit_message_for(task)).await?;
    }
    Ok(())
}

/// Outcome of a single auto-merge attempt.
pub enum MergeOutcome {
    Merged,
    BlockedNonRetryable,
    ConflictReEntered,
}

/// Placeholder contract for the (external) Merge Service. The automation
/// core only depends on this narrow signature; a concrete implementation is
/// out of scope.
#[async_trait::async_trait]
pub trait MergeBackend: Send + Sync {
    /// Attempt to merge the task's branch into `base_branch`. `Err` messages
    /// containing the substring "conflict" trigger the conflict-retry path.
    async fn merge(&self, task_id: &str, base_branch: &str) -> Result<(), String>;
}

pub struct MergeCoordinator {
    lock: Arc<AsyncMutex<()>>,
}

impl MergeCoordinator {
    pub fn new() -> Self {
        Self {
            lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Run the full auto-merge contract under the
    /// process-wide merge lock, serializing all merge attempts.
    #[allow(clippy::too_many_arguments)]
    pub async fn auto_merge(
        &self,
        merge_backend: Option<&dyn MergeBackend>,
        tasks: &dyn TaskRepository,
        workspace: &dyn WorkspaceService,
        notifier: &dyn Notifier,
        auto_retry_on_conflict: bool,
        task: &Task,
        default_base_branch: &str,
    ) -> MergeOutcome {
        let _guard = self.lock.lock().await;
        let base_branch = task.base_branch.clone().unwrap_or_else(|| default_base_branch.to_string());

        let Some(backend) = merge_backend else {
            tracing::warn!(kind = %AutomationErrorKind::MergeUnavailable, task_id = %task.id, "auto-merge unavailable");
            let _ = tasks
                .update_fields(
                    &task.id,
                    TaskFieldUpdate {
                        merge_failed: Some(true),
                        merge_error: Some(Some("Auto-merge unavailable".to_string())),
                        merge_readiness: Some(MergeReadiness::Blocked),
                        ..Default::default()
                    },
                )
                .await;
            let _ = tasks.append_event(&task.id, "merge", "Auto-merge unavailable").await;
            notifier
                .notify("Auto-merge unavailable", &task.title_for_log().to_string(), Severity::Error)
                .await;
            return MergeOutcome::BlockedNonRetryable;
        };

        match backend.merge(&task.id, &base_branch).await {
            Ok(()) => {
                let _ = tasks
                    .append_event(&task.id, "merge", &format!("merged to {base_branch}"))
                    .await;
                notifier
                    .notify(
                        &format!("Merged to {base_branch}"),
                        &task.title_for_log().to_string(),
                        Severity::Information,
                    )
                    .await;
                MergeOutcome::Merged
            }
            Err(msg) if msg.to_lowercase().contains("conflict") && auto_retry_on_conflict => {
                tracing::warn!(kind = %AutomationErrorKind::MergeConflictRetry, task_id = %task.id, "merge conflict, retrying");
                self.retry_on_conflict(tasks, workspace, notifier, task, &base_branch, &msg)
                    .await
            }
            Err(msg) => {
                let kind = if msg.to_lowercase().contains("conflict") {
                    AutomationErrorKind::MergeConflictNoRetry
                } else {
                    AutomationErrorKind::MergeOther
                };
                tracing::warn!(kind = %kind, task_id = %task.id, error = %msg, "auto-merge failed");
                let truncated = truncate_error(&msg);
                let _ = tasks
                    .update_fields(
                        &task.id,
                        TaskFieldUpdate {
                            merge_failed: Some(true),
                            merge_error: Some(Some(truncated.clone())),
                            merge_readiness: Some(MergeReadiness::Blocked),
                            ..Default::default()
                        },
                    )
                    .await;
                let _ = tasks.append_event(&task.id, "merge", &truncated).await;
                notifier
                    .notify(&truncated, &task.title_for_log().to_string(), Severity::Error)
                    .await;
                MergeOutcome::BlockedNonRetryable
            }
        }
    }

    async fn retry_on_conflict(
        &self,
        tasks: &dyn TaskRepository,
        workspace: &dyn WorkspaceService,
        notifier: &dyn Notifier,
        task: &Task,
        base_branch: &str,
        original_error: &str,
    ) -> MergeOutcome {
        let worktree = match workspace.get_path(&task.id).await {
            Ok(Some(p)) => p,
            _ => {
                let _ = tasks
                    .update_fields(
                        &task.id,
                        TaskFieldUpdate {
                            merge_failed: Some(true),
                            merge_error: Some(Some("Worktree missing during conflict retry".to_string())),
                            merge_readiness: Some(MergeReadiness::Blocked),
                            ..Default::default()
                        },
                    )
                    .await;
                return MergeOutcome::BlockedNonRetryable;
            }
        };

        let files_changed_on_base = workspace
            .get_files_changed_on_base(&task.id, base_branch)
            .await
            .unwrap_or_default();

        let (_success, rebase_message, conflict_files) = workspace
            .rebase_onto_base(&task.id, base_branch)
            .await
            .unwrap_or((false, "rebase failed to run".to_string(), Vec::new()));

        let note = build_merge_conflict_note(
            original_error,
            &rebase_message,
            &conflict_files,
            &files_changed_on_base,
            base_branch,
        );
        let current_scratchpad = tasks.get_scratchpad(&task.id).await.unwrap_or_default();
        let _ = tasks
            .update_scratchpad(&task.id, &format!("{current_scratchpad}{note}"))
            .await;
        let _ = ensure_committed(workspace, &worktree, task).await;

        let _ = tasks
            .update_fields(
                &task.id,
                TaskFieldUpdate {
                    status: Some(crate::model::TaskStatus::InProgress),
                    checks_passed: Some(None),
                    review_summary: Some(None),
                    merge_failed: Some(false),
                    merge_error: Some(None),
                    merge_readiness: Some(MergeReadiness::Risk),
                    ..Default::default()
                },
            )
            .await;
        let _ = tasks
            .append_event(&task.id, "merge", "conflict: rebased and re-queued for retry")
            .await;
        notifier
            .notify(
                "Merge conflict: rebased onto latest base, re-queued",
                &task.title_for_log().to_string(),
                Severity::Warning,
            )
            .await;

        MergeOutcome::ConflictReEntered
    }
}

impl Default for MergeCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_message_infers_fix_prefix() {
        let t = Task {
            id: "t1".into(),
            status: crate::model::TaskStatus::InProgress,
            task_type: crate::model::TaskType::Auto,
            title: "Fix off-by-one in parser".into(),
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
        assert!(commit_message_for(&t).starts_with("fix:"));
    }

    #[test]
    fn truncate_error_bounds_length() {
        let long = "x".repeat(1000);
        assert_eq!(truncate_error(&long).chars().count(), ERROR_FIELD_MAX_LENGTH);
    }
}
