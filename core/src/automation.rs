//! The Automation Service: Event Queue, Worker Loop,
//! Spawn Procedure, per-task Run Loop, and the public API surface. This is
//! the central module; it ties together `running_map`, `pending_spawn`,
//! `queue`, `reviewer`, `merge`, and `prompt`.
//!
//! Grounded on automation.py's `AutomationServiceImpl` (`_event_loop`,
//! `_worker_loop`, `_process_event`, `_ensure_running`, `_spawn`,
//! `_run_task_loop`, `_handle_complete`) and on the reference codebase's
//! `AgentRunner` spawn/kill/signal lifecycle (`traits.rs`).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::{AutomationConfig, AGENT_TIMEOUT_LONG};
use crate::errors::{AutomationErrorKind, WorkspaceError};
use crate::events::{DomainEvent, EventBus};
use crate::merge::{ensure_committed, MergeBackend, MergeCoordinator, MergeOutcome};
use crate::model::{
    ExecutionStatus, Lane, MergeReadiness, Signal, Task, TaskFieldUpdate, TaskStatus, TaskType,
    ERROR_FIELD_MAX_LENGTH, METADATA_REVIEW_LOG_START_INDEX, METADATA_REVIEW_RESULT,
    SCRATCHPAD_TAIL_MAX_LENGTH,
};
use crate::pending_spawn::PendingSpawnQueue;
use crate::prompt::{build_prompt, tail_chars};
use crate::queue::QueuedMessageService;
use crate::reviewer::run_review;
use crate::running_map::{RunningMap, SharedAgent};
use crate::signal_parser::parse_signal;
use crate::traits::{Agent, AgentConfig, AgentFactory, ExecutionRepository, Notifier, Severity, TaskRepository, WorkspaceService};

use tokio::sync::Mutex as AsyncMutex;

fn truncate_error(s: &str) -> String {
    if s.chars().count() <= ERROR_FIELD_MAX_LENGTH {
        s.to_string()
    } else {
        s.chars().take(ERROR_FIELD_MAX_LENGTH).collect()
    }
}

/// The external collaborators the automation core consumes.
pub struct AutomationServices {
    pub tasks: Arc<dyn TaskRepository>,
    pub executions: Arc<dyn ExecutionRepository>,
    pub workspace: Arc<dyn WorkspaceService>,
    pub notifier: Arc<dyn Notifier>,
    pub agent_factory: AgentFactory,
    pub merge_backend: Option<Arc<dyn MergeBackend>>,
}

enum WorkerEvent {
    StatusChanged {
        task_id: String,
        old_status: Option<TaskStatus>,
        new_status: Option<TaskStatus>,
    },
    RunnerFinished {
        task_id: String,
    },
    RequeueForFollowup {
        task_id: String,
    },
    ResetIterations {
        task_id: String,
    },
}

enum RunnerOutcome {
    Normal,
    RequeueForFollowup,
    RequeueAfterConflictRetry,
}

/// Completion guard: guarantees the worker loop is notified the runner has
/// exited even if `run_task_loop` panics. The normal-path code disarms it
/// and sends `RunnerFinished` explicitly so ordering against a trailing
/// `RequeueForFollowup` is deterministic (see DESIGN.md).
struct CompletionGuard {
    tx: mpsc::UnboundedSender<WorkerEvent>,
    task_id: String,
    armed: bool,
}

impl CompletionGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.tx.send(WorkerEvent::RunnerFinished {
                task_id: self.task_id.clone(),
            });
        }
    }
}

/// Handle shared by runners and by the public API to reach the running map,
/// config, and collaborators without threading a dozen parameters through
/// every call.
#[derive(Clone)]
struct RunnerContext {
    services: Arc<AutomationServices>,
    config: AutomationConfig,
    event_bus: EventBus,
    queued: Arc<QueuedMessageService>,
    running: Arc<parking_lot::RwLock<RunningMap>>,
    merge: Arc<MergeCoordinator>,
}

/// The automation core's public handle (the Job Surface façade builds on
/// top of this).
pub struct AutomationService {
    services: Arc<AutomationServices>,
    config: AutomationConfig,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
    event_bus: EventBus,
    queued: Arc<QueuedMessageService>,
    running: Arc<parking_lot::RwLock<RunningMap>>,
    merge: Arc<MergeCoordinator>,
    worker_handle: AsyncMutex<Option<JoinHandle<()>>>,
    rx_holder: AsyncMutex<Option<mpsc::UnboundedReceiver<WorkerEvent>>>,
}

impl AutomationService {
    pub fn new(services: AutomationServices, config: AutomationConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            services: Arc::new(services),
            config,
            event_tx: tx,
            event_bus: EventBus::new(),
            queued: Arc::new(QueuedMessageService::new()),
            running: Arc::new(parking_lot::RwLock::new(RunningMap::new())),
            merge: Arc::new(MergeCoordinator::new()),
            worker_handle: AsyncMutex::new(None),
            rx_holder: AsyncMutex::new(Some(rx)),
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn queued_messages(&self) -> &Arc<QueuedMessageService> {
        &self.queued
    }

    /// Start the worker loop task; if `auto_start` is enabled, reconcile
    /// pre-existing IN_PROGRESS AUTO tasks left running from a prior process.
    pub async fn start(&self) {
        let mut holder = self.rx_holder.lock().await;
        let rx = holder.take();
        drop(holder);
        // `rx` is only `Some` on the very first `start()` call; the channel
        // is created in `new`, so we must recover it from the constructor
        // path the first time.
        let rx = match rx {
            Some(r) => r,
            None => return,
        };

        let worker = WorkerLoop {
            rx,
            event_tx: self.event_tx.clone(),
            services: self.services.clone(),
            config: self.config.clone(),
            event_bus: self.event_bus.clone(),
            queued: self.queued.clone(),
            running: self.running.clone(),
            merge: self.merge.clone(),
            pending: PendingSpawnQueue::new(),
        };
        let handle = tokio::spawn(worker.run());
        *self.worker_handle.lock().await = Some(handle);

        if self.config.auto_start {
            self.initialize_existing_tasks().await;
        }
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.worker_handle.lock().await.take() {
            handle.abort();
        }
    }

    /// Re-admit pre-existing IN_PROGRESS AUTO tasks at startup (grounded on
    /// automation.py's `initialize_existing_tasks`).
    pub async fn initialize_existing_tasks(&self) {
        let tasks = match self.services.tasks.get_by_status(TaskStatus::InProgress).await {
            Ok(t) => t,
            Err(_) => return,
        };
        for task in tasks {
            if task.task_type == TaskType::Auto {
                self.spawn_for_task(&task.id);
            }
        }
    }

    /// Forward a status-change observation into the worker loop.
    pub fn handle_event(&self, task_id: &str, old_status: Option<TaskStatus>, new_status: Option<TaskStatus>) {
        let _ = self.event_tx.send(WorkerEvent::StatusChanged {
            task_id: task_id.to_string(),
            old_status,
            new_status,
        });
    }

    /// Explicit UI/MCP request to start a task (encoded as `(task_id, none, IN_PROGRESS)`).
    pub fn spawn_for_task(&self, task_id: &str) {
        self.handle_event(task_id, None, Some(TaskStatus::InProgress));
    }

    /// Explicit UI/MCP request to stop a task (encoded as `(task_id, IN_PROGRESS, BACKLOG)`).
    /// Returns immediately; the stop itself is cooperative, not instantaneous.
    pub fn stop_task(&self, task_id: &str) -> bool {
        let sent = self
            .event_tx
            .send(WorkerEvent::StatusChanged {
                task_id: task_id.to_string(),
                old_status: Some(TaskStatus::InProgress),
                new_status: Some(TaskStatus::Backlog),
            })
            .is_ok();
        sent
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.running.read().contains(task_id)
    }

    pub fn get_iteration_count(&self, task_id: &str) -> Option<u32> {
        self.running.read().get(task_id).map(|s| s.iteration)
    }

    pub fn is_reviewing(&self, task_id: &str) -> bool {
        self.running
            .read()
            .get(task_id)
            .map(|s| s.is_reviewing)
            .unwrap_or(false)
    }

    pub fn get_running_agent(&self, task_id: &str) -> Option<SharedAgent> {
        self.running.read().get(task_id).and_then(|s| s.agent.clone())
    }

    pub fn get_review_agent(&self, task_id: &str) -> Option<SharedAgent> {
        self.running.read().get(task_id).and_then(|s| s.review_agent.clone())
    }

    /// Reset the in-memory session iteration counter (not the lifetime
    /// `total_iterations` total). Grounded on automation.py's
    /// `reset_iterations`.
    pub fn reset_iterations(&self, task_id: &str) {
        let _ = self.event_tx.send(WorkerEvent::ResetIterations {
            task_id: task_id.to_string(),
        });
    }
}

struct WorkerLoop {
    rx: mpsc::UnboundedReceiver<WorkerEvent>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
    services: Arc<AutomationServices>,
    config: AutomationConfig,
    event_bus: EventBus,
    queued: Arc<QueuedMessageService>,
    running: Arc<parking_lot::RwLock<RunningMap>>,
    merge: Arc<MergeCoordinator>,
    pending: PendingSpawnQueue,
}

impl WorkerLoop {
    async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            self.handle_one(event).await;
        }
    }

    async fn handle_one(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::StatusChanged {
                task_id,
                old_status,
                new_status,
            } => self.handle_status_changed(task_id, old_status, new_status).await,
            WorkerEvent::RunnerFinished { task_id } => self.handle_runner_finished(task_id).await,
            WorkerEvent::RequeueForFollowup { task_id } => self.handle_requeue(task_id).await,
            WorkerEvent::ResetIterations { task_id } => {
                if let Some(st) = self.running.write().get_mut(&task_id) {
                    st.iteration = 0;
                }
            }
        }
    }

    async fn handle_status_changed(
        &mut self,
        task_id: String,
        old_status: Option<TaskStatus>,
        new_status: Option<TaskStatus>,
    ) {
        if new_status.is_none() {
            self.request_stop(&task_id).await;
            return;
        }

        let task = match self.services.tasks.get_task(&task_id).await {
            Ok(Some(t)) => t,
            Ok(None) => {
                self.request_stop(&task_id).await;
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, task_id = %task_id, "failed to fetch task for event");
                return;
            }
        };

        if task.task_type != TaskType::Auto {
            return;
        }

        if new_status == Some(TaskStatus::InProgress) {
            self.try_spawn(task).await;
        } else if old_status == Some(TaskStatus::InProgress) && new_status != Some(TaskStatus::Review) {
            self.request_stop(&task_id).await;
        }
    }

    /// Marks the runner stopping, aborts it, and tears down its attached
    /// agents, then persists the BACKLOG transition so the Task Repository
    /// agrees with the running map -- otherwise `reconcile_waiting_tasks`
    /// would re-discover and re-spawn the task on the next slot release.
    async fn request_stop(&self, task_id: &str) {
        {
            let map = self.running.read();
            if let Some(st) = map.get(task_id) {
                st.mark_stopping();
                if let Some(handle) = &st.runner {
                    handle.abort();
                }
                if let Some(agent) = st.agent.clone() {
                    tokio::spawn(async move {
                        let _ = agent.lock().await.stop().await;
                    });
                }
                if let Some(agent) = st.review_agent.clone() {
                    tokio::spawn(async move {
                        let _ = agent.lock().await.stop().await;
                    });
                }
            }
        }
        let _ = self.services.tasks.set_status(task_id, TaskStatus::Backlog, None).await;
        self.event_bus.publish(DomainEvent::TaskStatusChanged {
            task_id: task_id.to_string(),
            from_status: Some(TaskStatus::InProgress),
            to_status: Some(TaskStatus::Backlog),
        });
    }

    async fn try_spawn(&mut self, task: Task) {
        if self.running.read().contains(&task.id) {
            return;
        }
        if self.running.read().len() >= self.config.max_concurrent_agents {
            self.pending.push_back(&task.id);
            return;
        }
        self.spawn_runner(task).await;
    }

    /// The Spawn Procedure: reset review state, clear prior agent logs,
    /// register the running-map entry, then launch the runner task.
    async fn spawn_runner(&mut self, task: Task) {
        let task_id = task.id.clone();

        // Step 1: reset review state.
        let _ = self
            .services
            .tasks
            .update_fields(&task_id, TaskFieldUpdate::reset_for_spawn())
            .await;

        // Step 2: clear prior agent logs unconditionally, scoped to the task.
        let _ = self.services.tasks.clear_agent_logs(&task_id).await;

        // Step 3: running-map entry exists before the runner begins.
        self.running.write().insert_empty(&task_id);
        self.event_bus.publish(DomainEvent::AutomationTaskStarted {
            task_id: task_id.clone(),
        });

        // Step 4: launch the runner.
        let ctx = RunnerContext {
            services: self.services.clone(),
            config: self.config.clone(),
            event_bus: self.event_bus.clone(),
            queued: self.queued.clone(),
            running: self.running.clone(),
            merge: self.merge.clone(),
        };
        let event_tx = self.event_tx.clone();
        let spawn_task_id = task_id.clone();

        let handle = tokio::spawn(async move {
            let mut guard = CompletionGuard {
                tx: event_tx.clone(),
                task_id: spawn_task_id.clone(),
                armed: true,
            };
            let outcome = run_task_loop(&ctx, task).await;
            guard.disarm();
            let _ = event_tx.send(WorkerEvent::RunnerFinished {
                task_id: spawn_task_id.clone(),
            });
            match outcome {
                RunnerOutcome::RequeueForFollowup => {
                    let _ = event_tx.send(WorkerEvent::RequeueForFollowup {
                        task_id: spawn_task_id,
                    });
                }
                RunnerOutcome::RequeueAfterConflictRetry => {
                    let _ = event_tx.send(WorkerEvent::StatusChanged {
                        task_id: spawn_task_id,
                        old_status: Some(TaskStatus::Review),
                        new_status: Some(TaskStatus::InProgress),
                    });
                }
                RunnerOutcome::Normal => {}
            }
        });

        if let Some(st) = self.running.write().get_mut(&task_id) {
            st.runner = Some(handle);
        }
    }

    async fn handle_runner_finished(&mut self, task_id: String) {
        self.running.write().remove(&task_id);
        self.event_bus.publish(DomainEvent::AutomationTaskEnded {
            task_id: task_id.clone(),
        });
        self.drain_pending();
        self.reconcile_waiting_tasks().await;
    }

    async fn handle_requeue(&mut self, task_id: String) {
        self.pending.push_back(&task_id);
        self.drain_pending();
        self.reconcile_waiting_tasks().await;
    }

    /// Pop the head of the pending-spawn queue and re-enter it through the
    /// normal event pipeline, releasing the slot it was waiting on.
    fn drain_pending(&mut self) {
        if let Some(next_id) = self.pending.pop_front() {
            let _ = self.event_tx.send(WorkerEvent::StatusChanged {
                task_id: next_id,
                old_status: None,
                new_status: Some(TaskStatus::InProgress),
            });
        }
    }

    /// Defensive reconciliation pass: re-scan for any IN_PROGRESS AUTO task
    /// that is neither running nor pending, and admit at most one such task
    /// per drain. Covers a task whose `StatusChanged` event was dropped or
    /// raced (e.g. a crash mid-event, or a direct repository write bypassing
    /// the event pipeline).
    async fn reconcile_waiting_tasks(&mut self) {
        let tasks = match self.services.tasks.get_by_status(TaskStatus::InProgress).await {
            Ok(t) => t,
            Err(_) => return,
        };
        for task in tasks {
            if task.task_type != TaskType::Auto {
                continue;
            }
            if self.running.read().contains(&task.id) || self.pending.contains(&task.id) {
                continue;
            }
            let _ = self.event_tx.send(WorkerEvent::StatusChanged {
                task_id: task.id,
                old_status: None,
                new_status: Some(TaskStatus::InProgress),
            });
            break;
        }
    }
}

fn resolve_model_override(identity: &str, claude: Option<String>, opencode: Option<String>) -> Option<String> {
    let lower = identity.to_lowercase();
    if lower.contains("claude") {
        claude
    } else if lower.contains("opencode") {
        opencode
    } else {
        None
    }
}

/// The per-task Run Loop: provision the workspace, resolve identity, create
/// an execution record, then iterate prompt/response rounds until the agent
/// signals completion, blockage, or the iteration budget is exhausted.
async fn run_task_loop(ctx: &RunnerContext, task: Task) -> RunnerOutcome {
    let task_id = task.id.clone();
    let base_branch = task
        .base_branch
        .clone()
        .unwrap_or_else(|| ctx.config.default_base_branch.clone());

    // Transient marker, overwritten on the first real update.
    let _ = ctx
        .services
        .tasks
        .update_fields(
            &task_id,
            TaskFieldUpdate {
                last_error: Some(Some("Agent starting...".to_string())),
                ..Default::default()
            },
        )
        .await;

    // Workspace provisioning.
    let worktree = match ctx.services.workspace.get_path(&task_id).await {
        Ok(Some(p)) => p,
        Ok(None) => match ctx.services.workspace.create(&task_id, &base_branch).await {
            Ok(p) => p,
            Err(e) => {
                let kind = workspace_error_kind(&e);
                backlog_with_notice(ctx, &task_id, &e.to_string(), kind).await;
                return RunnerOutcome::Normal;
            }
        },
        Err(e) => {
            let kind = workspace_error_kind(&e);
            backlog_with_notice(ctx, &task_id, &e.to_string(), kind).await;
            return RunnerOutcome::Normal;
        }
    };

    // Identity resolution.
    let (user_name, user_email) = ctx
        .services
        .workspace
        .get_user_identity()
        .await
        .unwrap_or_else(|_| ("agent".to_string(), "agent@example.invalid".to_string()));

    let execution = match ctx
        .services
        .executions
        .create_execution(&task_id, &uuid::Uuid::new_v4().to_string(), "auto")
        .await
    {
        Ok(e) => e,
        Err(e) => {
            backlog_with_notice(ctx, &task_id, &e.to_string(), AutomationErrorKind::WorkerLoopException).await;
            return RunnerOutcome::Normal;
        }
    };

    let mut agent: Option<SharedAgent> = None;
    let identity = task.agent_backend.clone().unwrap_or_else(|| "default".to_string());

    for iteration in 1..=ctx.config.max_iterations {
        if is_stopping(ctx, &task_id) {
            return RunnerOutcome::Normal;
        }

        let _ = ctx.services.tasks.increment_total_iterations(&task_id).await;
        if let Some(st) = ctx.running.write().get_mut(&task_id) {
            st.iteration = iteration;
            st.execution_id = Some(execution.id.clone());
        }

        let mut followups = Vec::new();
        while let Some(msg) = ctx.queued.take_queued_message(&task_id, Lane::Implementation) {
            followups.push(msg.content);
        }
        let had_followups = !followups.is_empty();

        let current_task = match ctx.services.tasks.get_task(&task_id).await {
            Ok(Some(t)) => t,
            _ => task.clone(),
        };
        let prompt_text = build_prompt(
            &current_task,
            iteration,
            ctx.config.max_iterations,
            &user_name,
            &user_email,
            &followups,
        );

        if agent.is_none() {
            let mut a = (ctx.services.agent_factory)(AgentConfig {
                task_id: task_id.clone(),
                identity: identity.clone(),
                working_dir: worktree.clone(),
                read_only: false,
            });
            a.set_auto_approve(ctx.config.auto_approve);
            a.set_model_override(resolve_model_override(
                &identity,
                ctx.config.default_model_claude.clone(),
                ctx.config.default_model_opencode.clone(),
            ));
            let shared: SharedAgent = Arc::new(AsyncMutex::new(a));
            if let Some(st) = ctx.running.write().get_mut(&task_id) {
                st.agent = Some(shared.clone());
            }
            ctx.event_bus.publish(DomainEvent::AutomationAgentAttached {
                task_id: task_id.clone(),
            });

            let startup_ok = {
                let mut guard = shared.lock().await;
                if guard.start().await.is_err() {
                    false
                } else {
                    matches!(
                        timeout(AGENT_TIMEOUT_LONG, guard.wait_ready(AGENT_TIMEOUT_LONG)).await,
                        Ok(Ok(()))
                    )
                }
            };
            if !startup_ok {
                handle_blocked(ctx, &task_id, "Agent failed to start", AutomationErrorKind::AgentStartTimeout).await;
                return RunnerOutcome::Normal;
            }
            agent = Some(shared);
        }

        let shared_agent = agent.as_ref().unwrap().clone();
        let send_result = shared_agent.lock().await.send_prompt(&prompt_text).await;
        if let Err(e) = send_result {
            handle_blocked(ctx, &task_id, &format!("Agent error: {e}"), AutomationErrorKind::AgentSendError).await;
            return RunnerOutcome::Normal;
        }

        // Incremental persistence: one append per captured message chunk.
        let messages = shared_agent.lock().await.get_messages();
        for chunk in &messages {
            let _ = ctx
                .services
                .executions
                .append_execution_log(&execution.id, chunk)
                .await;
        }

        let response_text = shared_agent.lock().await.get_response_text();
        let parsed = parse_signal(&response_text);
        shared_agent.lock().await.clear_tool_calls();

        match parsed.signal {
            Signal::Complete => {
                if had_followups {
                    let note = format!("\n[FOLLOW-UP] {}\n", followups.join("\n"));
                    append_scratchpad(ctx, &task_id, &note).await;
                    return RunnerOutcome::RequeueForFollowup;
                }
                return handle_complete(ctx, &task_id, &execution.id, &base_branch, &identity).await;
            }
            Signal::Blocked => {
                handle_blocked(ctx, &task_id, &parsed.reason, AutomationErrorKind::BlockedSignal).await;
                return RunnerOutcome::Normal;
            }
            _ => {
                let tail = tail_chars(&response_text, SCRATCHPAD_TAIL_MAX_LENGTH);
                append_scratchpad(ctx, &task_id, &format!("\n{tail}\n")).await;
                tokio::time::sleep(ctx.config.iteration_delay()).await;
            }
        }
    }

    // Termination after max_iterations.
    tracing::warn!(kind = %AutomationErrorKind::MaxIterations, task_id = %task_id, "iteration budget exhausted");
    append_scratchpad(ctx, &task_id, "\n[MAX ITERATIONS] Iteration budget exhausted.\n").await;
    let _ = ctx
        .services
        .tasks
        .set_status(&task_id, TaskStatus::Backlog, Some("max iterations reached"))
        .await;
    RunnerOutcome::Normal
}

fn workspace_error_kind(e: &WorkspaceError) -> AutomationErrorKind {
    match e {
        WorkspaceError::Validation(_) => AutomationErrorKind::WorkspaceValidation,
        WorkspaceError::NotFound(_) => AutomationErrorKind::WorkspaceValidation,
        WorkspaceError::Git(_) | WorkspaceError::Io(_) => AutomationErrorKind::WorkspaceGit,
    }
}

fn is_stopping(ctx: &RunnerContext, task_id: &str) -> bool {
    ctx.running.read().get(task_id).map(|s| s.is_stopping()).unwrap_or(true)
}

async fn append_scratchpad(ctx: &RunnerContext, task_id: &str, note: &str) {
    let current = ctx.services.tasks.get_scratchpad(task_id).await.unwrap_or_default();
    let _ = ctx.services.tasks.update_scratchpad(task_id, &format!("{current}{note}")).await;
}

async fn backlog_with_notice(ctx: &RunnerContext, task_id: &str, message: &str, kind: AutomationErrorKind) {
    tracing::warn!(kind = %kind, task_id = %task_id, message = %message, "run loop backlogging task");
    ctx.services
        .notifier
        .notify(message, task_id, Severity::Error)
        .await;
    let _ = ctx
        .services
        .tasks
        .update_fields(
            task_id,
            TaskFieldUpdate {
                last_error: Some(Some(truncate_error(message))),
                ..Default::default()
            },
        )
        .await;
    let _ = ctx.services.tasks.set_status(task_id, TaskStatus::Backlog, Some(message)).await;
}

async fn handle_blocked(ctx: &RunnerContext, task_id: &str, reason: &str, kind: AutomationErrorKind) {
    tracing::warn!(kind = %kind, task_id = %task_id, reason = %reason, "run loop blocked");
    append_scratchpad(ctx, task_id, &format!("\n[BLOCKED] {reason}\n")).await;
    let _ = ctx
        .services
        .tasks
        .update_fields(
            task_id,
            TaskFieldUpdate {
                block_reason: Some(Some(reason.to_string())),
                last_error: Some(Some(truncate_error(reason))),
                ..Default::default()
            },
        )
        .await;
    let _ = ctx.services.tasks.set_status(task_id, TaskStatus::Backlog, Some(reason)).await;
}

/// Handles a `Complete` signal with no pending follow-ups: moves the task to
/// review, runs the reviewer pass, and on approval runs auto-merge.
async fn handle_complete(
    ctx: &RunnerContext,
    task_id: &str,
    execution_id: &str,
    base_branch: &str,
    identity: &str,
) -> RunnerOutcome {
    let task = match ctx.services.tasks.get_task(task_id).await {
        Ok(Some(t)) => t,
        _ => return RunnerOutcome::Normal,
    };
    let worktree = match ctx.services.workspace.get_path(task_id).await {
        Ok(Some(p)) => p,
        _ => return RunnerOutcome::Normal,
    };
    let _ = ensure_committed(ctx.services.workspace.as_ref(), &worktree, &task).await;

    // Step 1: move to REVIEW, clear previous merge failure.
    let _ = ctx
        .services
        .tasks
        .update_fields(
            task_id,
            TaskFieldUpdate {
                status: Some(TaskStatus::Review),
                merge_failed: Some(false),
                merge_error: Some(None),
                merge_readiness: Some(MergeReadiness::Risk),
                ..Default::default()
            },
        )
        .await;
    ctx.event_bus.publish(DomainEvent::TaskStatusChanged {
        task_id: task_id.to_string(),
        from_status: Some(TaskStatus::InProgress),
        to_status: Some(TaskStatus::Review),
    });

    // Step 3: mark the implementation/review log boundary before the first
    // review append.
    let current_len = ctx
        .services
        .executions
        .get_execution_log_entries(execution_id)
        .await
        .map(|v| v.len())
        .unwrap_or(0);
    let mut boundary_patch = HashMap::new();
    boundary_patch.insert(
        METADATA_REVIEW_LOG_START_INDEX.to_string(),
        serde_json::json!(current_len),
    );
    let _ = ctx
        .services
        .executions
        .update_execution(execution_id, Some(ExecutionStatus::Running), Some(boundary_patch), false)
        .await;

    let review = run_review(
        &task,
        &worktree,
        execution_id,
        base_branch,
        identity,
        ctx.config.default_model_claude.clone(),
        ctx.config.default_model_opencode.clone(),
        ctx.services.workspace.as_ref(),
        ctx.services.executions.as_ref(),
        &ctx.services.agent_factory,
        &ctx.running,
        task_id,
        &ctx.event_bus,
    )
    .await;

    let mut review_patch = HashMap::new();
    review_patch.insert(
        METADATA_REVIEW_RESULT.to_string(),
        serde_json::json!({ "status": if review.approved { "approved" } else { "rejected" }, "summary": review.summary }),
    );
    let _ = ctx
        .services
        .executions
        .update_execution(execution_id, None, Some(review_patch), true)
        .await;
    let _ = ctx
        .services
        .tasks
        .append_event(task_id, "review", &review.summary)
        .await;

    if !review.approved {
        let _ = ctx
            .services
            .tasks
            .update_fields(
                task_id,
                TaskFieldUpdate {
                    review_summary: Some(Some(review.summary)),
                    merge_readiness: Some(MergeReadiness::Blocked),
                    ..Default::default()
                },
            )
            .await;
        return RunnerOutcome::Normal;
    }

    let _ = ctx
        .services
        .tasks
        .update_fields(
            task_id,
            TaskFieldUpdate {
                review_summary: Some(Some(review.summary)),
                checks_passed: Some(Some(true)),
                ..Default::default()
            },
        )
        .await;

    if ctx.config.auto_merge {
        let backend = ctx.services.merge_backend.as_deref();
        let outcome = ctx
            .merge
            .auto_merge(
                backend,
                ctx.services.tasks.as_ref(),
                ctx.services.workspace.as_ref(),
                ctx.services.notifier.as_ref(),
                ctx.config.auto_retry_on_merge_conflict,
                &task,
                &ctx.config.default_base_branch,
            )
            .await;
        if let MergeOutcome::ConflictReEntered = outcome {
            return RunnerOutcome::RequeueAfterConflictRetry;
        }
    }

    RunnerOutcome::Normal
}
