//! `JobQueue`: turns "do this later" into a task published to the broker.
//!
//! A successful `enqueue` means the broker accepted the task. Nothing about
//! the task is kept here afterwards; status lookups always go to the broker.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rill_core::{Broker, BrokerError, RequestContext, TaskHandle, TaskId, TaskSignature, TaskState};
use serde::Serialize;
use tracing::{debug, warn};

/// Task and queue names known to the worker fleet.
pub mod tasks {
    pub const RESIZE_AVATAR: &str = "resize-avatar";
    pub const SEND_CONFIRMATION_EMAIL: &str = "send-confirmation-email";

    pub const IMAGES_QUEUE: &str = "images";
    pub const NOTIFICATIONS_QUEUE: &str = "notifications";
    pub const MAINTENANCE_QUEUE: &str = "maintenance";
}

/// Why a task could not be handed to the broker.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown queue: {0}")]
    UnknownQueue(String),
    #[error("payload is not serializable: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("request cancelled before the task was published")]
    Cancelled,
    #[error("broker did not acknowledge within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl DispatchError {
    fn reason(&self) -> &'static str {
        match self {
            Self::UnknownQueue(_) => "unknown_queue",
            Self::Serialize(_) => "serialize",
            Self::Broker(BrokerError::Unreachable(_)) => "unreachable",
            Self::Broker(_) => "rejected",
            Self::Cancelled => "cancelled",
            Self::Timeout { .. } => "timeout",
        }
    }
}

/// Process-wide producer handle. Cloning is cheap.
#[derive(Clone)]
pub struct JobQueue {
    broker: Arc<dyn Broker>,
    queues: Arc<HashSet<String>>,
    publish_timeout: Duration,
}

impl JobQueue {
    #[must_use]
    pub fn new<I, Q>(broker: Arc<dyn Broker>, queues: I, publish_timeout: Duration) -> Self
    where
        I: IntoIterator<Item = Q>,
        Q: Into<String>,
    {
        Self {
            broker,
            queues: Arc::new(queues.into_iter().map(Into::into).collect()),
            publish_timeout,
        }
    }

    #[must_use]
    pub fn knows_queue(&self, queue: &str) -> bool {
        self.queues.contains(queue)
    }

    /// Publishes `task_name` with `payload` to `queue` on behalf of a request.
    ///
    /// The publish races the request's cancellation and the broker timeout.
    /// A request that is already cancelled never reaches the broker.
    ///
    /// # Errors
    ///
    /// Returns a `DispatchError` for unknown queues, unserializable payloads,
    /// broker failures, timeouts, and cancellation.
    pub async fn enqueue<P>(
        &self,
        ctx: &RequestContext,
        task_name: &str,
        payload: &P,
        queue: &str,
    ) -> Result<TaskHandle, DispatchError>
    where
        P: Serialize + ?Sized,
    {
        let signature = self
            .signature(task_name, payload, queue)?
            .with_request_id(ctx.request_id().as_str());
        self.dispatch(Some(ctx), signature).await
    }

    /// Like [`enqueue`](Self::enqueue) but the task must not run before `eta`.
    ///
    /// # Errors
    ///
    /// Same as [`enqueue`](Self::enqueue).
    pub async fn enqueue_at<P>(
        &self,
        ctx: &RequestContext,
        task_name: &str,
        payload: &P,
        queue: &str,
        eta: DateTime<Utc>,
    ) -> Result<TaskHandle, DispatchError>
    where
        P: Serialize + ?Sized,
    {
        let signature = self
            .signature(task_name, payload, queue)?
            .with_request_id(ctx.request_id().as_str())
            .with_eta(eta);
        self.dispatch(Some(ctx), signature).await
    }

    /// Publishes a prepared signature outside any request, bounded only by
    /// the broker timeout.
    ///
    /// # Errors
    ///
    /// Returns a `DispatchError` for unknown queues, broker failures and timeouts.
    pub async fn publish(&self, signature: TaskSignature) -> Result<TaskHandle, DispatchError> {
        self.dispatch(None, signature).await
    }

    /// Fetches task state from the broker's result backend.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Broker` if the backend is missing or failing.
    pub async fn status(&self, task_id: TaskId) -> Result<Option<TaskState>, DispatchError> {
        let timeout_ms = self.timeout_ms();
        tokio::time::timeout(self.publish_timeout, self.broker.fetch_result(task_id))
            .await
            .map_err(|_| DispatchError::Timeout { timeout_ms })?
            .map_err(DispatchError::from)
    }

    fn signature<P>(
        &self,
        task_name: &str,
        payload: &P,
        queue: &str,
    ) -> Result<TaskSignature, DispatchError>
    where
        P: Serialize + ?Sized,
    {
        if !self.knows_queue(queue) {
            return Err(DispatchError::UnknownQueue(queue.to_string()));
        }
        let payload = serde_json::to_value(payload)?;
        Ok(TaskSignature::new(task_name, queue, payload))
    }

    async fn dispatch(
        &self,
        ctx: Option<&RequestContext>,
        signature: TaskSignature,
    ) -> Result<TaskHandle, DispatchError> {
        let queue = signature.routing_key.clone();
        let result = self.try_dispatch(ctx, &signature).await;

        match &result {
            Ok(handle) => {
                metrics::counter!("jobs_enqueued_total", "queue" => queue).increment(1);
                debug!(
                    task_id = %handle.task_id,
                    task = %handle.task_name,
                    queue = %handle.queue,
                    eta = ?signature.eta,
                    "task published"
                );
            }
            Err(err) => {
                metrics::counter!(
                    "jobs_dispatch_failures_total",
                    "queue" => queue.clone(),
                    "reason" => err.reason()
                )
                .increment(1);
                warn!(task = %signature.name, queue = %queue, error = %err, "task dispatch failed");
            }
        }
        result
    }

    async fn try_dispatch(
        &self,
        ctx: Option<&RequestContext>,
        signature: &TaskSignature,
    ) -> Result<TaskHandle, DispatchError> {
        if !self.knows_queue(&signature.routing_key) {
            return Err(DispatchError::UnknownQueue(signature.routing_key.clone()));
        }

        let timeout_ms = self.timeout_ms();
        let publish = tokio::time::timeout(self.publish_timeout, self.broker.publish(signature));
        let outcome = match ctx {
            Some(ctx) => ctx
                .run_until_cancelled(publish)
                .await
                .map_err(|_| DispatchError::Cancelled)?,
            None => publish.await,
        };

        outcome.map_err(|_| DispatchError::Timeout { timeout_ms })??;
        Ok(signature.handle())
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.publish_timeout.as_millis()).unwrap_or(u64::MAX)
    }
}
