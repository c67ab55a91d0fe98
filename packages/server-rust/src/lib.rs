//! Rill server: the HTTP request pipeline, session authentication, and the
//! background job producer for the task board backend.

pub mod config;
pub mod error;
pub mod jobs;
pub mod network;
pub mod password;
pub mod storage;
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use error::{json_error, ApiError};
pub use jobs::{DispatchError, JobQueue};
pub use network::{build_router, AppSettings, AppState, NetworkConfig, NetworkModule};
