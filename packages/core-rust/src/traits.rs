use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::task::{TaskSignature, TaskState};
use crate::types::{
    AccountLogin, NewAccount, PendingAccount, Session, SessionToken, TaskId, UserId,
};

/// Failures of the persistence collaborator.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists: {0}")]
    Conflict(String),
    #[error("record not found")]
    NotFound,
    #[error("persistence unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the broker collaborator.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),
    #[error("broker rejected task: {0}")]
    Rejected(String),
    #[error("broker has no result backend")]
    NoResultBackend,
}

/// Session lookup used by authentication.
/// Implementations must be safe for concurrent use (pooled connections).
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Single atomic read. `Ok(None)` means the token is unknown.
    async fn lookup_session(&self, token: &SessionToken)
        -> Result<Option<Session>, RepositoryError>;

    /// Creates a session for `user_id` valid until `expires_at`.
    async fn create_session(
        &self,
        user_id: UserId,
        expires_at: DateTime<Utc>,
    ) -> Result<Session, RepositoryError>;

    /// Removes the session. Returns whether it existed.
    async fn delete_session(&self, token: &SessionToken) -> Result<bool, RepositoryError>;
}

/// Account operations used by the public auth routes and the avatar upload.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Registers an inactive account and issues a confirmation token.
    async fn create_account(&self, account: NewAccount) -> Result<PendingAccount, RepositoryError>;

    /// Activates the account owning `confirm_token`. `Ok(None)` for unknown tokens.
    async fn confirm_account(&self, confirm_token: Uuid) -> Result<Option<UserId>, RepositoryError>;

    /// Credentials for `username`. `Ok(None)` if no such account exists.
    async fn find_login(&self, username: &str) -> Result<Option<AccountLogin>, RepositoryError>;

    async fn set_avatar_url(&self, user_id: UserId, url: &str) -> Result<(), RepositoryError>;
}

/// Minimal producer interface onto a durable message transport.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publishes `task` to the queue named by `task.routing_key`.
    /// Returns only after the broker has accepted the task.
    async fn publish(&self, task: &TaskSignature) -> Result<(), BrokerError>;

    /// Reads task state from the result backend. `Ok(None)` if no state is recorded.
    async fn fetch_result(&self, _task_id: TaskId) -> Result<Option<TaskState>, BrokerError> {
        Err(BrokerError::NoResultBackend)
    }
}
