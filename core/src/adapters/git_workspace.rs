//! Default Workspace Service adapter backed by `git worktree`, extending
//! the reference codebase's `flow_git.rs` `FlowGit` (`std::process::Command`
//! wrapping, tolerant "nothing to commit" handling) with worktree creation,
//! commit-log/diff-stat queries, and rebase.

use std::path::{Path, PathBuf};
use std::process::Output;

use tokio::process::Command;

use crate::errors::{WorkspaceError, WorkspaceResult};
use crate::traits::WorkspaceService;

pub struct GitWorkspaceService {
    repo_root: PathBuf,
    worktrees_root: PathBuf,
}

impl GitWorkspaceService {
    pub fn new(repo_root: impl Into<PathBuf>, worktrees_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            worktrees_root: worktrees_root.into(),
        }
    }

    fn worktree_path(&self, task_id: &str) -> PathBuf {
        self.worktrees_root.join(task_id)
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> WorkspaceResult<Output> {
        Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .output()
            .await
            .map_err(WorkspaceError::Io)
    }

    fn require_success(output: &Output, context: &str) -> WorkspaceResult<()> {
        if output.status.success() {
            Ok(())
        } else {
            Err(WorkspaceError::Git(format!(
                "{context}: {}",
                String::from_utf8_lossy(&output.stderr)
            )))
        }
    }
}

#[async_trait::async_trait]
impl WorkspaceService for GitWorkspaceService {
    async fn get_path(&self, task_id: &str) -> WorkspaceResult<Option<PathBuf>> {
        let path = self.worktree_path(task_id);
        Ok(if path.exists() { Some(path) } else { None })
    }

    async fn create(&self, task_id: &str, base_branch: &str) -> WorkspaceResult<PathBuf> {
        if !self.repo_root.join(".git").exists() {
            return Err(WorkspaceError::Git(format!(
                "{} is not a git repository",
                self.repo_root.display()
            )));
        }
        let path = self.worktree_path(task_id);
        let branch = format!("kagan/{task_id}");
        let output = self
            .git(
                &self.repo_root,
                &[
                    "worktree",
                    "add",
                    "-b",
                    &branch,
                    path.to_str().ok_or_else(|| WorkspaceError::Validation("invalid path".into()))?,
                    base_branch,
                ],
            )
            .await?;
        Self::require_success(&output, "git worktree add")?;
        Ok(path)
    }

    async fn delete(&self, task_id: &str) -> WorkspaceResult<()> {
        let path = self.worktree_path(task_id);
        if !path.exists() {
            return Ok(());
        }
        let output = self
            .git(
                &self.repo_root,
                &["worktree", "remove", "--force", path.to_str().unwrap_or_default()],
            )
            .await?;
        Self::require_success(&output, "git worktree remove")
    }

    async fn get_commit_log(&self, task_id: &str, base: &str) -> WorkspaceResult<Vec<String>> {
        let path = self
            .get_path(task_id)
            .await?
            .ok_or_else(|| WorkspaceError::NotFound(task_id.to_string()))?;
        let output = self
            .git(&path, &["log", "--oneline", &format!("{base}..HEAD")])
            .await?;
        Self::require_success(&output, "git log")?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.to_string())
            .collect())
    }

    async fn get_diff_stats(&self, task_id: &str, base: &str) -> WorkspaceResult<String> {
        let path = self
            .get_path(task_id)
            .await?
            .ok_or_else(|| WorkspaceError::NotFound(task_id.to_string()))?;
        let output = self.git(&path, &["diff", "--stat", &format!("{base}...HEAD")]).await?;
        Self::require_success(&output, "git diff --stat")?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn get_files_changed_on_base(&self, task_id: &str, base: &str) -> WorkspaceResult<Vec<String>> {
        let path = self
            .get_path(task_id)
            .await?
            .ok_or_else(|| WorkspaceError::NotFound(task_id.to_string()))?;
        let output = self
            .git(&path, &["diff", "--name-only", &format!("HEAD...{base}")])
            .await?;
        Self::require_success(&output, "git diff --name-only")?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.to_string())
            .collect())
    }

    async fn rebase_onto_base(&self, task_id: &str, base: &str) -> WorkspaceResult<(bool, String, Vec<String>)> {
        let path = self
            .get_path(task_id)
            .await?
            .ok_or_else(|| WorkspaceError::NotFound(task_id.to_string()))?;
        let output = self.git(&path, &["rebase", base]).await?;
        if output.status.success() {
            return Ok((true, "rebase completed cleanly".to_string(), Vec::new()));
        }
        let conflicts_output = self.git(&path, &["diff", "--name-only", "--diff-filter=U"]).await?;
        let conflicts: Vec<String> = String::from_utf8_lossy(&conflicts_output.stdout)
            .lines()
            .map(|l| l.to_string())
            .collect();
        let _ = self.git(&path, &["rebase", "--abort"]).await;
        Ok((
            false,
            String::from_utf8_lossy(&output.stderr).to_string(),
            conflicts,
        ))
    }

    async fn has_uncommitted_changes(&self, path: &Path) -> WorkspaceResult<bool> {
        let output = self.git(path, &["status", "--porcelain"]).await?;
        Self::require_success(&output, "git status")?;
        Ok(!output.stdout.is_empty())
    }

    async fn commit_all(&self, path: &Path, message: &str) -> WorkspaceResult<()> {
        let add = self.git(path, &["add", "-A"]).await?;
        Self::require_success(&add, "git add")?;
        let commit = self.git(path, &["commit", "-m", message]).await?;
        if commit.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&commit.stderr);
        if stderr.contains("nothing to commit") {
            return Ok(());
        }
        Err(WorkspaceError::Git(format!("git commit: {stderr}")))
    }

    async fn get_user_identity(&self) -> WorkspaceResult<(String, String)> {
        let name = self.git(&self.repo_root, &["config", "user.name"]).await?;
        let email = self.git(&self.repo_root, &["config", "user.email"]).await?;
        Ok((
            String::from_utf8_lossy(&name.stdout).trim().to_string(),
            String::from_utf8_lossy(&email.stdout).trim().to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        let run = |args: &[&str]| {
            std::process::Command::new("git")
                .arg("-C")
                .arg(dir.path())
                .args(args)
                .output()
                .unwrap()
        };
        run(&["init"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "Test User"]);
        std::fs::write(dir.path().join("README.md"), "hello").unwrap();
        run(&["add", "-A"]);
        run(&["commit", "-m", "initial"]);
        dir
    }

    #[tokio::test]
    async fn create_rejects_non_git_root() {
        let dir = TempDir::new().unwrap();
        let svc = GitWorkspaceService::new(dir.path(), dir.path().join("worktrees"));
        let result = svc.create("t1", "main").await;
        assert!(matches!(result, Err(WorkspaceError::Git(_))));
    }

    #[tokio::test]
    async fn get_path_none_when_absent() {
        let dir = setup_repo().await;
        let svc = GitWorkspaceService::new(dir.path(), dir.path().join("worktrees"));
        assert_eq!(svc.get_path("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn has_uncommitted_changes_reflects_dirty_tree() {
        let dir = setup_repo().await;
        let svc = GitWorkspaceService::new(dir.path(), dir.path().join("worktrees"));
        assert!(!svc.has_uncommitted_changes(dir.path()).await.unwrap());
        std::fs::write(dir.path().join("README.md"), "changed").unwrap();
        assert!(svc.has_uncommitted_changes(dir.path()).await.unwrap());
    }
}
