//! In-process broker. Keeps the most recently accepted tasks in memory.
//!
//! Used when no Redis URL is configured and throughout the test suite.
//! Nothing consumes the retained tasks, so the buffer is bounded and the
//! oldest entries are dropped first.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rill_core::{Broker, BrokerError, TaskId, TaskSignature, TaskState};

/// Tasks retained by [`InMemoryBroker::new`].
pub const DEFAULT_RETAINED_TASKS: usize = 1024;

#[derive(Debug)]
pub struct InMemoryBroker {
    published: Mutex<VecDeque<TaskSignature>>,
    retain: usize,
    results: DashMap<TaskId, TaskState>,
    reachable: AtomicBool,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETAINED_TASKS)
    }

    /// Keeps at most `retain` published tasks (at least one).
    #[must_use]
    pub fn with_retention(retain: usize) -> Self {
        Self {
            published: Mutex::new(VecDeque::new()),
            retain: retain.max(1),
            results: DashMap::new(),
            reachable: AtomicBool::new(true),
        }
    }

    /// Simulates the broker going away (or coming back).
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Snapshot of retained tasks in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<TaskSignature> {
        self.published.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn published_to(&self, queue: &str) -> Vec<TaskSignature> {
        self.published
            .lock()
            .iter()
            .filter(|t| t.routing_key == queue)
            .cloned()
            .collect()
    }

    /// Stands in for a worker reporting progress.
    pub fn record_result(&self, task_id: TaskId, state: TaskState) {
        self.results.insert(task_id, state);
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, task: &TaskSignature) -> Result<(), BrokerError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(BrokerError::Unreachable("in-memory broker is offline".to_string()));
        }
        let mut published = self.published.lock();
        if published.len() == self.retain {
            published.pop_front();
        }
        published.push_back(task.clone());
        Ok(())
    }

    async fn fetch_result(&self, task_id: TaskId) -> Result<Option<TaskState>, BrokerError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(BrokerError::Unreachable("in-memory broker is offline".to_string()));
        }
        Ok(self.results.get(&task_id).map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn filters_by_queue() {
        let broker = InMemoryBroker::new();
        broker
            .publish(&TaskSignature::new("a", "images", json!({})))
            .await
            .unwrap();
        broker
            .publish(&TaskSignature::new("b", "notifications", json!({})))
            .await
            .unwrap();

        assert_eq!(broker.published().len(), 2);
        let images = broker.published_to("images");
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].name, "a");
    }

    #[tokio::test]
    async fn retention_drops_oldest_tasks() {
        let broker = InMemoryBroker::with_retention(2);
        for name in ["a", "b", "c"] {
            broker
                .publish(&TaskSignature::new(name, "images", json!({})))
                .await
                .unwrap();
        }

        let names: Vec<_> = broker.published().into_iter().map(|t| t.name).collect();
        assert_eq!(names, ["b", "c"]);
    }

    #[tokio::test]
    async fn offline_broker_rejects_and_recovers() {
        let broker = InMemoryBroker::new();
        broker.set_reachable(false);
        let task = TaskSignature::new("a", "images", json!({}));
        assert!(matches!(
            broker.publish(&task).await,
            Err(BrokerError::Unreachable(_))
        ));

        broker.set_reachable(true);
        broker.publish(&task).await.unwrap();
        assert_eq!(broker.published().len(), 1);
    }
}
