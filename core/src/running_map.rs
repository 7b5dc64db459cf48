//! The Running Map: in-memory index of currently running
//! task slots, exclusively owned and mutated by the worker loop.
//!
//! **Deviation from the reference codebase, documented in DESIGN.md:** the
//! reference's `daemon/src/pool.rs` `ConnectionPool` is a concurrent
//! `DashMap` + atomic counter, reachable from any task. Copying that
//! structure verbatim would allow more than one writer to mutate entry
//! existence concurrently. Here `RunningMap` is
//! a plain `HashMap` that only the worker loop task ever holds `&mut`
//! access to; readers (UI, tests) only ever see an immutable `RunningSnapshot`
//! published by the worker loop after each mutation.

use crate::traits::Agent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

/// Shared handle to an agent, mutably accessible by the runner and
/// read-only (via the trait's read methods) by anything holding a clone.
pub type SharedAgent = Arc<AsyncMutex<Box<dyn Agent>>>;

/// Per-task state while a runner is active.
pub struct RunningTaskState {
    pub runner: Option<JoinHandle<()>>,
    pub agent: Option<SharedAgent>,
    pub review_agent: Option<SharedAgent>,
    pub iteration: u32,
    pub is_reviewing: bool,
    pub execution_id: Option<String>,
    /// Cooperative cancellation latch: set by `stop_task`, observed by the
    /// run loop at every suspension point.
    pub stopping: Arc<AtomicBool>,
}

impl Default for RunningTaskState {
    fn default() -> Self {
        Self {
            runner: None,
            agent: None,
            review_agent: None,
            iteration: 0,
            is_reviewing: false,
            execution_id: None,
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl RunningTaskState {
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub fn mark_stopping(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }
}

/// A read-only snapshot entry, safe to hand to UI/tests without exposing the
/// running map's mutation surface.
#[derive(Debug, Clone)]
pub struct RunningSnapshotEntry {
    pub task_id: String,
    pub iteration: u32,
    pub is_reviewing: bool,
}

#[derive(Default)]
pub struct RunningMap {
    inner: HashMap<String, RunningTaskState>,
}

impl RunningMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.inner.contains_key(task_id)
    }

    pub fn get(&self, task_id: &str) -> Option<&RunningTaskState> {
        self.inner.get(task_id)
    }

    pub fn get_mut(&mut self, task_id: &str) -> Option<&mut RunningTaskState> {
        self.inner.get_mut(task_id)
    }

    /// Insert an empty entry; must happen before the runner activity begins
    /// executing.
    pub fn insert_empty(&mut self, task_id: &str) {
        self.inner.insert(task_id.to_string(), RunningTaskState::default());
    }

    pub fn remove(&mut self, task_id: &str) -> Option<RunningTaskState> {
        self.inner.remove(task_id)
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.inner.keys().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<RunningSnapshotEntry> {
        self.inner
            .iter()
            .map(|(id, st)| RunningSnapshotEntry {
                task_id: id.clone(),
                iteration: st.iteration,
                is_reviewing: st.is_reviewing,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_empty_then_contains() {
        let mut m = RunningMap::new();
        assert!(!m.contains("t1"));
        m.insert_empty("t1");
        assert!(m.contains("t1"));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn remove_clears_entry() {
        let mut m = RunningMap::new();
        m.insert_empty("t1");
        let removed = m.remove("t1");
        assert!(removed.is_some());
        assert!(!m.contains("t1"));
    }

    #[test]
    fn stopping_latch_round_trips() {
        let mut m = RunningMap::new();
        m.insert_empty("t1");
        let st = m.get_mut("t1").unwrap();
        assert!(!st.is_stopping());
        st.mark_stopping();
        assert!(m.get("t1").unwrap().is_stopping());
    }
}
