//! SQLite-backed Task/Execution Repository adapters. Grounded on the
//! reference codebase's `state_store.rs` (`SqliteStateStore`: raw `sqlx::query`
//! + `Row::get` row mapping, `SqliteConnectOptions::create_if_missing`,
//! `IF NOT EXISTS` migrations run once at construction) adapted to Kagan's
//! own Task/Execution schema.

use std::path::Path;
use std::str::FromStr;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::errors::{RepositoryError, RepositoryResult};
use crate::model::{
    Execution, ExecutionMetadata, ExecutionStatus, MergeReadiness, Task, TaskFieldUpdate, TaskStatus, TaskType,
};
use crate::traits::{ExecutionRepository, TaskRepository};

fn status_to_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Backlog => "backlog",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Review => "review",
        TaskStatus::Done => "done",
    }
}

fn status_from_str(s: &str) -> TaskStatus {
    match s {
        "in_progress" => TaskStatus::InProgress,
        "review" => TaskStatus::Review,
        "done" => TaskStatus::Done,
        _ => TaskStatus::Backlog,
    }
}

fn task_type_to_str(t: TaskType) -> &'static str {
    match t {
        TaskType::Auto => "auto",
        TaskType::Pair => "pair",
    }
}

fn task_type_from_str(s: &str) -> TaskType {
    match s {
        "pair" => TaskType::Pair,
        _ => TaskType::Auto,
    }
}

fn readiness_to_str(r: MergeReadiness) -> &'static str {
    match r {
        MergeReadiness::Risk => "risk",
        MergeReadiness::Blocked => "blocked",
        MergeReadiness::Ready => "ready",
    }
}

fn readiness_from_str(s: &str) -> MergeReadiness {
    match s {
        "blocked" => MergeReadiness::Blocked,
        "ready" => MergeReadiness::Ready,
        _ => MergeReadiness::Risk,
    }
}

fn exec_status_to_str(s: ExecutionStatus) -> &'static str {
    match s {
        ExecutionStatus::Pending => "pending",
        ExecutionStatus::Running => "running",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Cancelled => "cancelled",
    }
}

fn exec_status_from_str(s: &str) -> ExecutionStatus {
    match s {
        "running" => ExecutionStatus::Running,
        "completed" => ExecutionStatus::Completed,
        "failed" => ExecutionStatus::Failed,
        "cancelled" => ExecutionStatus::Cancelled,
        _ => ExecutionStatus::Pending,
    }
}

fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Task {
    Task {
        id: row.get("id"),
        status: status_from_str(&row.get::<String, _>("status")),
        task_type: task_type_from_str(&row.get::<String, _>("task_type")),
        title: row.get("title"),
        description: row.get("description"),
        acceptance_criteria: row.get("acceptance_criteria"),
        scratchpad: row.get("scratchpad"),
        base_branch: row.get("base_branch"),
        total_iterations: row.get::<i64, _>("total_iterations") as u64,
        merge_readiness: readiness_from_str(&row.get::<String, _>("merge_readiness")),
        checks_passed: row.get("checks_passed"),
        review_summary: row.get("review_summary"),
        last_error: row.get("last_error"),
        block_reason: row.get("block_reason"),
        agent_backend: row.get("agent_backend"),
        merge_failed: row.get::<i64, _>("merge_failed") != 0,
        merge_error: row.get("merge_error"),
    }
}

/// A SQLite-backed implementation of the Task Repository.
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub async fn new<P: AsRef<Path>>(db_path: P) -> RepositoryResult<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let options = SqliteConnectOptions::from_str(&db_path.to_string_lossy())
            .map_err(|e| RepositoryError::Database(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .connect_with(options)
            .await?;
        let repo = Self { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    async fn migrate(&self) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                task_type TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                acceptance_criteria TEXT,
                scratchpad TEXT NOT NULL DEFAULT '',
                base_branch TEXT,
                total_iterations INTEGER NOT NULL DEFAULT 0,
                merge_readiness TEXT NOT NULL DEFAULT 'risk',
                checks_passed INTEGER,
                review_summary TEXT,
                last_error TEXT,
                block_reason TEXT,
                agent_backend TEXT,
                merge_failed INTEGER NOT NULL DEFAULT 0,
                merge_error TEXT,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn get_task(&self, id: &str) -> RepositoryResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_task))
    }

    async fn get_by_status(&self, status: TaskStatus) -> RepositoryResult<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE status = ? ORDER BY created_at ASC")
            .bind(status_to_str(status))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_task).collect())
    }

    async fn list_tasks(&self) -> RepositoryResult<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_task).collect())
    }

    async fn update_fields(&self, id: &str, update: TaskFieldUpdate) -> RepositoryResult<()> {
        let current = self
            .get_task(id)
            .await?
            .ok_or_else(|| RepositoryError::TaskNotFound(id.to_string()))?;

        let status = update.status.unwrap_or(current.status);
        let checks_passed = update.checks_passed.unwrap_or(current.checks_passed);
        let review_summary = update.review_summary.unwrap_or(current.review_summary);
        let merge_readiness = update.merge_readiness.unwrap_or(current.merge_readiness);
        let last_error = update.last_error.unwrap_or(current.last_error);
        let block_reason = update.block_reason.unwrap_or(current.block_reason);
        let merge_failed = update.merge_failed.unwrap_or(current.merge_failed);
        let merge_error = update.merge_error.unwrap_or(current.merge_error);

        sqlx::query(
            r#"
            UPDATE tasks SET status = ?, checks_passed = ?, review_summary = ?,
                last_error = ?, block_reason = ?, merge_readiness = ?,
                merge_failed = ?, merge_error = ?
            WHERE id = ?
            "#,
        )
        .bind(status_to_str(status))
        .bind(checks_passed)
        .bind(review_summary)
        .bind(last_error)
        .bind(block_reason)
        .bind(readiness_to_str(merge_readiness))
        .bind(merge_failed)
        .bind(merge_error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_status(&self, id: &str, status: TaskStatus, reason: Option<&str>) -> RepositoryResult<()> {
        sqlx::query("UPDATE tasks SET status = ?, block_reason = ? WHERE id = ?")
            .bind(status_to_str(status))
            .bind(reason)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn increment_total_iterations(&self, id: &str) -> RepositoryResult<()> {
        sqlx::query("UPDATE tasks SET total_iterations = total_iterations + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_scratchpad(&self, id: &str) -> RepositoryResult<String> {
        let row = sqlx::query("SELECT scratchpad FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("scratchpad")).unwrap_or_default())
    }

    async fn update_scratchpad(&self, id: &str, text: &str) -> RepositoryResult<()> {
        sqlx::query("UPDATE tasks SET scratchpad = ? WHERE id = ?")
            .bind(text)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_event(&self, id: &str, kind: &str, message: &str) -> RepositoryResult<()> {
        sqlx::query("INSERT INTO task_events (task_id, kind, message, created_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(kind)
            .bind(message)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_agent_logs(&self, id: &str) -> RepositoryResult<()> {
        sqlx::query("DELETE FROM task_events WHERE task_id = ? AND kind IN ('implementation', 'review')")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// A SQLite-backed implementation of the Execution Repository, sharing the
/// connection pool style of [`SqliteTaskRepository`].
pub struct SqliteExecutionRepository {
    pool: SqlitePool,
}

impl SqliteExecutionRepository {
    pub async fn new<P: AsRef<Path>>(db_path: P) -> RepositoryResult<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let options = SqliteConnectOptions::from_str(&db_path.to_string_lossy())
            .map_err(|e| RepositoryError::Database(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .connect_with(options)
            .await?;
        let repo = Self { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    async fn migrate(&self) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                run_reason TEXT NOT NULL,
                status TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL,
                completed_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_log_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                execution_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_execution(row: &sqlx::sqlite::SqliteRow) -> RepositoryResult<Execution> {
        let metadata_str: String = row.get("metadata");
        let metadata: ExecutionMetadata = serde_json::from_str(&metadata_str)?;
        let created_ts: i64 = row.get("created_at");
        let completed_ts: Option<i64> = row.get("completed_at");
        Ok(Execution {
            id: row.get("id"),
            task_id: row.get("task_id"),
            session_id: row.get("session_id"),
            run_reason: row.get("run_reason"),
            status: exec_status_from_str(&row.get::<String, _>("status")),
            metadata,
            created_at: chrono::DateTime::from_timestamp(created_ts, 0).unwrap_or_else(Utc::now),
            completed_at: completed_ts.and_then(|t| chrono::DateTime::from_timestamp(t, 0)),
        })
    }
}

#[async_trait::async_trait]
impl ExecutionRepository for SqliteExecutionRepository {
    async fn create_execution(&self, task_id: &str, session_id: &str, run_reason: &str) -> RepositoryResult<Execution> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO executions (id, task_id, session_id, run_reason, status, metadata, created_at) VALUES (?, ?, ?, ?, ?, '{}', ?)",
        )
        .bind(&id)
        .bind(task_id)
        .bind(session_id)
        .bind(run_reason)
        .bind(exec_status_to_str(ExecutionStatus::Running))
        .bind(now.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(Execution {
            id,
            task_id: task_id.to_string(),
            session_id: session_id.to_string(),
            run_reason: run_reason.to_string(),
            status: ExecutionStatus::Running,
            metadata: ExecutionMetadata::new(),
            created_at: now,
            completed_at: None,
        })
    }

    async fn update_execution(
        &self,
        id: &str,
        status: Option<ExecutionStatus>,
        metadata_patch: Option<ExecutionMetadata>,
        completed: bool,
    ) -> RepositoryResult<()> {
        let row = sqlx::query("SELECT metadata, status FROM executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepositoryError::ExecutionNotFound(id.to_string()))?;

        let current_metadata_str: String = row.get("metadata");
        let mut merged: ExecutionMetadata = serde_json::from_str(&current_metadata_str)?;
        if let Some(patch) = metadata_patch {
            // Shallow-additive merge, never a blind overwrite.
            for (k, v) in patch {
                merged.insert(k, v);
            }
        }
        let merged_str = serde_json::to_string(&merged)?;

        let current_status_str: String = row.get("status");
        let next_status = status.map(exec_status_to_str).unwrap_or(&current_status_str);
        let completed_at = if completed { Some(Utc::now().timestamp()) } else { None };

        sqlx::query("UPDATE executions SET status = ?, metadata = ?, completed_at = COALESCE(?, completed_at) WHERE id = ?")
            .bind(next_status)
            .bind(merged_str)
            .bind(completed_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_execution_log(&self, execution_id: &str, payload: &str) -> RepositoryResult<()> {
        sqlx::query("INSERT INTO execution_log_entries (execution_id, payload, created_at) VALUES (?, ?, ?)")
            .bind(execution_id)
            .bind(payload)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_execution_log_entries(&self, execution_id: &str) -> RepositoryResult<Vec<String>> {
        let rows = sqlx::query("SELECT payload FROM execution_log_entries WHERE execution_id = ? ORDER BY id ASC")
            .bind(execution_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("payload")).collect())
    }

    async fn get_latest_execution_for_task(&self, task_id: &str) -> RepositoryResult<Option<Execution>> {
        let row = sqlx::query("SELECT * FROM executions WHERE task_id = ? ORDER BY created_at DESC LIMIT 1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_execution).transpose()
    }

    async fn get_execution(&self, id: &str) -> RepositoryResult<Option<Execution>> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_execution).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            status: TaskStatus::Backlog,
            task_type: TaskType::Auto,
            title: "Implement widget".into(),
            description: None,
            acceptance_criteria: None,
            scratchpad: String::new(),
            base_branch: Some("main".into()),
            total_iterations: 0,
            merge_readiness: MergeReadiness::Risk,
            checks_passed: None,
            review_summary: None,
            last_error: None,
            block_reason: None,
            agent_backend: None,
            merge_failed: false,
            merge_error: None,
        }
    }

    async fn insert_task(repo: &SqliteTaskRepository, task: &Task) {
        sqlx::query(
            "INSERT INTO tasks (id, status, task_type, title, base_branch, total_iterations, merge_readiness) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.id)
        .bind(status_to_str(task.status))
        .bind(task_type_to_str(task.task_type))
        .bind(&task.title)
        .bind(&task.base_branch)
        .bind(task.total_iterations as i64)
        .bind(readiness_to_str(task.merge_readiness))
        .execute(&repo.pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn round_trips_task_fields() {
        let dir = TempDir::new().unwrap();
        let repo = SqliteTaskRepository::new(dir.path().join("kagan.sqlite3")).await.unwrap();
        insert_task(&repo, &sample_task("t1")).await;

        let fetched = repo.get_task("t1").await.unwrap().unwrap();
        assert_eq!(fetched.title, "Implement widget");
        assert_eq!(fetched.status, TaskStatus::Backlog);
        assert_eq!(fetched.base_branch.as_deref(), Some("main"));
    }

    #[tokio::test]
    async fn update_fields_applies_partial_patch() {
        let dir = TempDir::new().unwrap();
        let repo = SqliteTaskRepository::new(dir.path().join("kagan.sqlite3")).await.unwrap();
        insert_task(&repo, &sample_task("t1")).await;

        repo.update_fields(
            "t1",
            TaskFieldUpdate {
                status: Some(TaskStatus::InProgress),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let fetched = repo.get_task("t1").await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::InProgress);
        assert_eq!(fetched.title, "Implement widget");
    }

    #[tokio::test]
    async fn increment_total_iterations_bumps_counter() {
        let dir = TempDir::new().unwrap();
        let repo = SqliteTaskRepository::new(dir.path().join("kagan.sqlite3")).await.unwrap();
        insert_task(&repo, &sample_task("t1")).await;

        repo.increment_total_iterations("t1").await.unwrap();
        repo.increment_total_iterations("t1").await.unwrap();

        let fetched = repo.get_task("t1").await.unwrap().unwrap();
        assert_eq!(fetched.total_iterations, 2);
    }

    #[tokio::test]
    async fn execution_metadata_merges_additively() {
        let dir = TempDir::new().unwrap();
        let repo = SqliteExecutionRepository::new(dir.path().join("kagan_exec.sqlite3")).await.unwrap();
        let exec = repo.create_execution("t1", "sess-1", "manual").await.unwrap();

        let mut first_patch = ExecutionMetadata::new();
        first_patch.insert("review_log_start_index".to_string(), serde_json::json!(3));
        repo.update_execution(&exec.id, None, Some(first_patch), false).await.unwrap();

        let mut second_patch = ExecutionMetadata::new();
        second_patch.insert("review_result".to_string(), serde_json::json!({"status": "approved"}));
        repo.update_execution(&exec.id, None, Some(second_patch), true).await.unwrap();

        let fetched = repo.get_execution(&exec.id).await.unwrap().unwrap();
        assert!(fetched.metadata.contains_key("review_log_start_index"));
        assert!(fetched.metadata.contains_key("review_result"));
        assert!(fetched.completed_at.is_some());
    }

    #[tokio::test]
    async fn execution_log_entries_preserve_append_order() {
        let dir = TempDir::new().unwrap();
        let repo = SqliteExecutionRepository::new(dir.path().join("kagan_exec.sqlite3")).await.unwrap();
        let exec = repo.create_execution("t1", "sess-1", "manual").await.unwrap();

        repo.append_execution_log(&exec.id, "chunk one").await.unwrap();
        repo.append_execution_log(&exec.id, "chunk two").await.unwrap();

        let entries = repo.get_execution_log_entries(&exec.id).await.unwrap();
        assert_eq!(entries, vec!["chunk one".to_string(), "chunk two".to_string()]);
    }
}
