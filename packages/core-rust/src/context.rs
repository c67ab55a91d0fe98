//! Per-request context shared by every pipeline stage.
//!
//! A `RequestContext` is created once at ingress and handed around as
//! `Arc<RequestContext>`. The request id is fixed at construction; the user
//! id and the deadline are write-once cells filled by later stages.
//! Cancellation is a `CancellationToken` that the deadline stage trips and
//! that every blocking call downstream races against.

use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::types::{RequestId, UserId};

/// Errors raised by context operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("request context was cancelled")]
    Cancelled,
    #[error("user id already set for this request")]
    UserAlreadySet,
    #[error("deadline already set for this request")]
    DeadlineAlreadySet,
}

/// Request-scoped carrier of identifiers and cancellation state.
#[derive(Debug)]
pub struct RequestContext {
    request_id: RequestId,
    remote_addr: Option<String>,
    received_at: DateTime<Utc>,
    user_id: OnceLock<UserId>,
    deadline: OnceLock<Instant>,
    cancel: CancellationToken,
}

impl RequestContext {
    #[must_use]
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            remote_addr: None,
            received_at: Utc::now(),
            user_id: OnceLock::new(),
            deadline: OnceLock::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Records the caller address resolved at ingress.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: Option<String>) -> Self {
        self.remote_addr = addr;
        self
    }

    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    #[must_use]
    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    #[must_use]
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// The authenticated user, if authentication has run and succeeded.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id.get().copied()
    }

    /// Binds the authenticated user to this request.
    ///
    /// # Errors
    ///
    /// Returns `ContextError::UserAlreadySet` if a user is already bound,
    /// even when it is the same user.
    pub fn set_user_id(&self, user_id: UserId) -> Result<(), ContextError> {
        self.user_id
            .set(user_id)
            .map_err(|_| ContextError::UserAlreadySet)
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.get().copied()
    }

    /// Arms the deadline `timeout` from now and returns the absolute instant.
    ///
    /// # Errors
    ///
    /// Returns `ContextError::DeadlineAlreadySet` if a deadline was armed before.
    pub fn arm_deadline(&self, timeout: Duration) -> Result<Instant, ContextError> {
        let deadline = Instant::now() + timeout;
        self.deadline
            .set(deadline)
            .map_err(|_| ContextError::DeadlineAlreadySet)?;
        Ok(deadline)
    }

    /// Time left before the deadline. `None` when no deadline is armed.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// A child token for work that must stop when this request is cancelled.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Drives `fut` unless the context is cancelled first.
    ///
    /// Already-cancelled contexts never poll `fut`.
    ///
    /// # Errors
    ///
    /// Returns `ContextError::Cancelled` if cancellation wins the race.
    pub async fn run_until_cancelled<F>(&self, fut: F) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        if self.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ContextError::Cancelled),
            out = fut => Ok(out),
        }
    }
}
