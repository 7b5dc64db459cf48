//! Queued-Message Service: a per-(task, lane) FIFO of
//! follow-up prompts. Internally synchronized so it is safe to call from any
//! runner or from the worker loop.
//! Modeled in the idiom of the reference codebase's per-key `DashMap`
//! indexing (`lease_manager.rs`), not copied from any single file verbatim.

use crate::model::{Lane, QueuedMessage};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Default)]
pub struct QueuedMessageService {
    lanes: DashMap<(String, Lane), Arc<Mutex<VecDeque<QueuedMessage>>>>,
}

impl QueuedMessageService {
    pub fn new() -> Self {
        Self {
            lanes: DashMap::new(),
        }
    }

    fn lane_queue(&self, task_id: &str, lane: Lane) -> Arc<Mutex<VecDeque<QueuedMessage>>> {
        self.lanes
            .entry((task_id.to_string(), lane))
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .clone()
    }

    pub fn queue_message(&self, task_id: &str, content: &str, lane: Lane) {
        let q = self.lane_queue(task_id, lane);
        q.lock().push_back(QueuedMessage {
            task_id: task_id.to_string(),
            lane,
            content: content.to_string(),
            enqueued_at: chrono::Utc::now(),
        });
    }

    /// Read without consuming.
    pub fn get_queued_messages(&self, task_id: &str, lane: Lane) -> Vec<QueuedMessage> {
        let q = self.lane_queue(task_id, lane);
        q.lock().iter().cloned().collect()
    }

    /// Pop the head, if any.
    pub fn take_queued_message(&self, task_id: &str, lane: Lane) -> Option<QueuedMessage> {
        let q = self.lane_queue(task_id, lane);
        q.lock().pop_front()
    }

    /// Remove by index (0-based, FIFO order). No-op if out of range.
    pub fn remove_queued_message(&self, task_id: &str, lane: Lane, index: usize) {
        let q = self.lane_queue(task_id, lane);
        let mut guard = q.lock();
        if index < guard.len() {
            guard.remove(index);
        }
    }

    pub fn has_queued(&self, task_id: &str, lane: Lane) -> bool {
        let q = self.lane_queue(task_id, lane);
        !q.lock().is_empty()
    }
}

impl Clone for QueuedMessage {
    fn clone(&self) -> Self {
        Self {
            task_id: self.task_id.clone(),
            lane: self.lane,
            content: self.content.clone(),
            enqueued_at: self.enqueued_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lanes_are_independent() {
        let svc = QueuedMessageService::new();
        svc.queue_message("t1", "impl note", Lane::Implementation);
        svc.queue_message("t1", "review note", Lane::Review);

        assert!(svc.has_queued("t1", Lane::Implementation));
        assert!(svc.has_queued("t1", Lane::Review));

        let taken = svc.take_queued_message("t1", Lane::Review).unwrap();
        assert_eq!(taken.content, "review note");
        assert!(!svc.has_queued("t1", Lane::Review));
        // implementation lane untouched
        assert!(svc.has_queued("t1", Lane::Implementation));
    }

    #[test]
    fn fifo_order_preserved() {
        let svc = QueuedMessageService::new();
        svc.queue_message("t1", "first", Lane::Implementation);
        svc.queue_message("t1", "second", Lane::Implementation);
        let first = svc.take_queued_message("t1", Lane::Implementation).unwrap();
        let second = svc.take_queued_message("t1", Lane::Implementation).unwrap();
        assert_eq!(first.content, "first");
        assert_eq!(second.content, "second");
    }

    #[test]
    fn duplicate_content_not_deduplicated() {
        let svc = QueuedMessageService::new();
        svc.queue_message("t1", "same", Lane::Implementation);
        svc.queue_message("t1", "same", Lane::Implementation);
        assert_eq!(svc.get_queued_messages("t1", Lane::Implementation).len(), 2);
    }

    #[test]
    fn remove_by_index() {
        let svc = QueuedMessageService::new();
        svc.queue_message("t1", "a", Lane::Planner);
        svc.queue_message("t1", "b", Lane::Planner);
        svc.queue_message("t1", "c", Lane::Planner);
        svc.remove_queued_message("t1", Lane::Planner, 1);
        let remaining: Vec<_> = svc
            .get_queued_messages("t1", Lane::Planner)
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(remaining, vec!["a", "c"]);
    }
}
