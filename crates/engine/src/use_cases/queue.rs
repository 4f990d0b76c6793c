//! Queue monitor: polls the backend queue and keeps the finished-run history.

use std::sync::Arc;

use comfyui_mini_domain::{EnrichedQueue, PromptId, QueueHistoryTracker};
use tokio::sync::Mutex;

use crate::infrastructure::ports::{BackendError, BackendPort, ClockPort};

pub struct QueueMonitor {
    backend: Arc<dyn BackendPort>,
    clock: Arc<dyn ClockPort>,
    tracker: Mutex<QueueHistoryTracker>,
}

impl QueueMonitor {
    pub fn new(backend: Arc<dyn BackendPort>, clock: Arc<dyn ClockPort>, capacity: usize) -> Self {
        Self {
            backend,
            clock,
            tracker: Mutex::new(QueueHistoryTracker::new(capacity)),
        }
    }

    pub async fn remember_name(&self, prompt_id: &PromptId, name: &str) {
        self.tracker
            .lock()
            .await
            .remember_name(prompt_id.clone(), name);
    }

    pub async fn forget_name(&self, prompt_id: &PromptId) {
        self.tracker.lock().await.forget_name(prompt_id.as_str());
    }

    /// Fetch the backend queue, record runs that left it, and return the
    /// enriched view.
    pub async fn poll(&self) -> Result<EnrichedQueue, BackendError> {
        let snapshot = self.backend.get_queue().await?;
        let now = self.clock.now();

        let mut tracker = self.tracker.lock().await;
        let finished = tracker.observe(&snapshot, now);
        for prompt_id in &finished {
            tracing::debug!(prompt_id = %prompt_id, "Run left the queue");
        }
        Ok(tracker.view(&snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::FixedClock;
    use crate::infrastructure::ports::MockBackendPort;
    use comfyui_mini_domain::{QueueItem, QueueSnapshot};
    use mockall::Sequence;
    use serde_json::json;

    fn running(id: &str) -> QueueSnapshot {
        QueueSnapshot {
            running: vec![QueueItem::new(1, id, json!({}))],
            pending: Vec::new(),
        }
    }

    #[tokio::test]
    async fn poll_enriches_and_tracks_completion() {
        let mut seq = Sequence::new();
        let mut backend = MockBackendPort::new();
        backend
            .expect_get_queue()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(running("p1")));
        backend
            .expect_get_queue()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(QueueSnapshot::default()));

        let clock = Arc::new(FixedClock::at(1_000));
        let monitor = QueueMonitor::new(Arc::new(backend), clock.clone(), 50);
        monitor.remember_name(&PromptId::from("p1"), "Portrait").await;

        let first = monitor.poll().await.unwrap();
        assert_eq!(first.running[0].workflow_name.as_deref(), Some("Portrait"));
        assert!(first.completed.is_empty());

        clock.advance(30);
        let second = monitor.poll().await.unwrap();
        assert!(second.running.is_empty());
        assert_eq!(second.completed.len(), 1);
        assert_eq!(second.completed[0].item.workflow_name.as_deref(), Some("Portrait"));
        assert_eq!(second.completed[0].finished_at.timestamp(), 1_030);
    }

    #[tokio::test]
    async fn backend_failure_leaves_history_untouched() {
        let mut backend = MockBackendPort::new();
        backend
            .expect_get_queue()
            .returning(|| Err(BackendError::Unavailable));

        let monitor = QueueMonitor::new(Arc::new(backend), Arc::new(FixedClock::at(0)), 50);
        assert!(matches!(monitor.poll().await, Err(BackendError::Unavailable)));
    }
}
