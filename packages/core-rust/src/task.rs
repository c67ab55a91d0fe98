//! Job task types exchanged with the broker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::TaskId;

/// Wire form of a task as published to the broker.
///
/// Retry policy belongs to the consumer side; producers always publish
/// with `retry_count == 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSignature {
    pub uuid: TaskId,
    pub name: String,
    pub routing_key: String,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TaskSignature {
    /// Builds an immediate task with a fresh id.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        routing_key: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            uuid: TaskId::generate(),
            name: name.into(),
            routing_key: routing_key.into(),
            payload,
            eta: None,
            retry_count: 0,
            request_id: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// True when the task should not run before its ETA.
    #[must_use]
    pub fn is_delayed(&self, now: DateTime<Utc>) -> bool {
        self.eta.is_some_and(|eta| eta > now)
    }

    #[must_use]
    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            task_id: self.uuid,
            task_name: self.name.clone(),
            queue: self.routing_key.clone(),
        }
    }
}

/// What a producer gets back after a successful publish.
///
/// The handle carries identifiers only. Status is always fetched from the
/// broker's result backend by `task_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskHandle {
    pub task_id: TaskId,
    pub task_name: String,
    pub queue: String,
}

/// Task state as reported by the result backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Received,
    Started,
    Retry,
    Success {
        #[serde(default)]
        result: serde_json::Value,
    },
    Failure {
        error: String,
    },
}

impl TaskState {
    /// Success and failure are final; everything else may still change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Failure { .. })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;

    #[test]
    fn new_signature_is_immediate() {
        let sig = TaskSignature::new("resize-avatar", "images", json!({"w": 64}));
        assert_eq!(sig.retry_count, 0);
        assert!(!sig.is_delayed(Utc::now()));

        let handle = sig.handle();
        assert_eq!(handle.task_id, sig.uuid);
        assert_eq!(handle.task_name, "resize-avatar");
        assert_eq!(handle.queue, "images");
    }

    #[test]
    fn eta_in_future_is_delayed() {
        let now = Utc::now();
        let sig = TaskSignature::new("vacuum", "maintenance", json!(null))
            .with_eta(now + Duration::minutes(5));
        assert!(sig.is_delayed(now));
        assert!(!sig.is_delayed(now + Duration::minutes(6)));
    }

    #[test]
    fn signature_wire_form_uses_camel_case() {
        let sig = TaskSignature::new("n", "q", json!({})).with_request_id("req-1");
        let value = serde_json::to_value(&sig).unwrap();
        assert_eq!(value["routingKey"], "q");
        assert_eq!(value["requestId"], "req-1");
        assert_eq!(value["retryCount"], 0);
        assert!(value.get("eta").is_none());
    }

    #[test]
    fn task_state_reads_result_backend_json() {
        let state: TaskState =
            serde_json::from_value(json!({"state": "SUCCESS", "result": {"ok": true}})).unwrap();
        assert!(state.is_terminal());
        assert_eq!(state, TaskState::Success { result: json!({"ok": true}) });

        let state: TaskState = serde_json::from_value(json!({"state": "STARTED"})).unwrap();
        assert!(!state.is_terminal());
    }
}
