//! Rill core: per-request context, identifiers, job task types, and the
//! narrow traits through which the server reaches its collaborators.

pub mod context;
pub mod task;
pub mod traits;
pub mod types;

pub use context::{ContextError, RequestContext};
pub use task::{TaskHandle, TaskSignature, TaskState};
pub use traits::{AccountRepository, Broker, BrokerError, RepositoryError, SessionRepository};
pub use types::{
    AccountLogin, NewAccount, PendingAccount, RequestId, Session, SessionToken, TaskId, UserId,
};
