// Kagan automation core: a reactive scheduler supervising autonomous coding
// agents across isolated git worktrees.

pub mod adapters;
pub mod automation;
pub mod config;
pub mod errors;
pub mod events;
pub mod job_surface;
pub mod merge;
pub mod model;
pub mod pending_spawn;
pub mod prompt;
pub mod queue;
pub mod reviewer;
pub mod running_map;
pub mod signal_parser;
pub mod traits;

pub use automation::{AutomationService, AutomationServices};
pub use config::{AutomationConfig, KaganConfig, AGENT_TIMEOUT_LONG, JOB_SUBMISSION_WAIT};
pub use errors::{
    AgentError, AgentResult, AutomationErrorKind, MergeError, MergeResult, RepositoryError, RepositoryResult,
    WorkspaceError, WorkspaceResult,
};
pub use events::{DomainEvent, EventBus};
pub use job_surface::{JobAction, JobResult, JobStatus, JobSurface};
pub use merge::{MergeBackend, MergeCoordinator, MergeOutcome};
pub use model::{
    Execution, ExecutionMetadata, ExecutionStatus, Lane, MergeReadiness, QueuedMessage, Signal, SignalResult, Task,
    TaskFieldUpdate, TaskStatus, TaskType,
};
pub use pending_spawn::PendingSpawnQueue;
pub use queue::QueuedMessageService;
pub use running_map::{RunningMap, RunningSnapshotEntry, SharedAgent};
pub use signal_parser::parse_signal;
pub use traits::{
    Agent, AgentConfig, AgentFactory, ExecutionRepository, MessageSink, Notifier, Severity, TaskRepository,
    WorkspaceService,
};
