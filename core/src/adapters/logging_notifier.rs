//! Best-effort Notifier adapter logging through `tracing`,
//! the way the reference codebase reports everywhere it isn't holding a
//! direct UI channel. A bounded ring buffer of recent notifications is kept
//! alongside so tests can assert on what was surfaced without parsing logs.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::traits::{Notifier, Severity};

const RING_BUFFER_CAPACITY: usize = 200;

#[derive(Debug, Clone)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub severity: Severity,
}

/// Logs every notification via `tracing` at a level matching its severity,
/// and retains the last [`RING_BUFFER_CAPACITY`] for inspection.
pub struct LoggingNotifier {
    recent: Mutex<VecDeque<Notification>>,
}

impl LoggingNotifier {
    pub fn new() -> Self {
        Self {
            recent: Mutex::new(VecDeque::with_capacity(RING_BUFFER_CAPACITY)),
        }
    }

    pub fn recent(&self) -> Vec<Notification> {
        self.recent.lock().iter().cloned().collect()
    }
}

impl Default for LoggingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, message: &str, title: &str, severity: Severity) {
        match severity {
            Severity::Information => tracing::info!(title, message, "notification"),
            Severity::Warning => tracing::warn!(title, message, "notification"),
            Severity::Error => tracing::error!(title, message, "notification"),
        }

        let mut ring = self.recent.lock();
        if ring.len() == RING_BUFFER_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(Notification {
            title: title.to_string(),
            message: message.to_string(),
            severity,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retains_recent_notifications() {
        let notifier = LoggingNotifier::new();
        notifier.notify("merged", "task-1", Severity::Information).await;
        notifier.notify("conflict", "task-2", Severity::Warning).await;

        let recent = notifier.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "merged");
        assert_eq!(recent[1].severity, Severity::Warning);
    }

    #[tokio::test]
    async fn ring_buffer_drops_oldest_past_capacity() {
        let notifier = LoggingNotifier::new();
        for i in 0..(RING_BUFFER_CAPACITY + 5) {
            notifier
                .notify(&format!("msg-{i}"), "task", Severity::Information)
                .await;
        }
        let recent = notifier.recent();
        assert_eq!(recent.len(), RING_BUFFER_CAPACITY);
        assert_eq!(recent.first().unwrap().message, "msg-5");
    }
}
