//! Producer side of background job dispatch.
//!
//! - [`queue`]: `JobQueue`, the handle handlers use to enqueue work
//! - [`memory`]: in-process broker for development and tests
//! - [`redis`]: Redis-backed broker and result backend

pub mod memory;
pub mod queue;
pub mod redis;

pub use memory::InMemoryBroker;
pub use queue::{tasks, DispatchError, JobQueue};
pub use self::redis::RedisBroker;
