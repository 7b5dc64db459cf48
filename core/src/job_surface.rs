//! The Job Surface: a thin façade over `spawn_for_task` /
//! `stop_task` for UI-style callers, honoring the "queued; awaiting
//! scheduler" wait rule. Not a network RPC surface -- IPC transport is out
//! of scope.

use tokio::time::timeout;

use crate::automation::AutomationService;
use crate::config::JOB_SUBMISSION_WAIT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct JobResult {
    pub status: JobStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub enum JobAction {
    StartAgent,
    StopAgent,
}

/// Submits `{start_agent, stop_agent}` jobs and waits up to
/// `JOB_SUBMISSION_WAIT` before reporting "queued" rather than blocking the
/// caller until the runner actually starts.
pub struct JobSurface<'a> {
    service: &'a AutomationService,
}

impl<'a> JobSurface<'a> {
    pub fn new(service: &'a AutomationService) -> Self {
        Self { service }
    }

    pub async fn submit(&self, action: JobAction, task_id: &str) -> JobResult {
        match action {
            JobAction::StartAgent => self.service.spawn_for_task(task_id),
            JobAction::StopAgent => {
                self.service.stop_task(task_id);
            }
        }

        let became_running = timeout(JOB_SUBMISSION_WAIT, self.wait_for_state(action, task_id)).await;
        match became_running {
            Ok(()) => JobResult {
                status: match action {
                    JobAction::StartAgent => JobStatus::Running,
                    JobAction::StopAgent => JobStatus::Succeeded,
                },
                message: None,
            },
            Err(_) => JobResult {
                status: JobStatus::Queued,
                message: Some("queued; awaiting scheduler".to_string()),
            },
        }
    }

    async fn wait_for_state(&self, action: JobAction, task_id: &str) {
        loop {
            let satisfied = match action {
                JobAction::StartAgent => self.service.is_running(task_id),
                JobAction::StopAgent => !self.service.is_running(task_id),
            };
            if satisfied {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }
}
