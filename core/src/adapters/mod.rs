//! Default/illustrative adapters wiring the automation core's external
//! collaborator traits to concrete local implementations.
//! None of these are load-bearing for the automation core's own invariants
//! -- the core only ever depends on the trait objects in `traits.rs`.

pub mod git_workspace;
pub mod logging_notifier;
pub mod process_agent;
pub mod sqlite_repositories;

pub use git_workspace::GitWorkspaceService;
pub use logging_notifier::LoggingNotifier;
pub use process_agent::{process_agent_factory, ProcessAgent};
pub use sqlite_repositories::{SqliteExecutionRepository, SqliteTaskRepository};
