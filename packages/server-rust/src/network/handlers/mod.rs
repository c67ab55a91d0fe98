//! HTTP handler definitions for the Rill server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for building the router.

pub mod auth;
pub mod avatar;
pub mod client_log;
pub mod graphql;
pub mod settings;

pub use auth::{confirm_handler, login_handler, logout_handler, register_handler};
pub use avatar::avatar_handler;
pub use client_log::client_log_handler;
pub use graphql::{
    graphql_handler, playground_handler, GraphqlExecutor, GraphqlRequest, SchemaNotMounted,
};
pub use settings::settings_handler;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::TimeDelta;
use rill_core::{AccountRepository, SessionRepository};

use crate::jobs::JobQueue;

/// Maximum accepted avatar upload.
pub const DEFAULT_MAX_AVATAR_BYTES: usize = 2 * 1024 * 1024;

/// Deployment-level switches read by handlers.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub allow_public_registration: bool,
    /// Lifetime of a session created at account confirmation.
    pub session_ttl: TimeDelta,
    /// Directory avatars are written to and served from.
    pub upload_dir: PathBuf,
    pub max_avatar_bytes: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            allow_public_registration: false,
            session_ttl: TimeDelta::hours(24),
            upload_dir: PathBuf::from("./uploads"),
            max_avatar_bytes: DEFAULT_MAX_AVATAR_BYTES,
        }
    }
}

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Session store consulted by the auth stage.
    pub sessions: Arc<dyn SessionRepository>,
    pub accounts: Arc<dyn AccountRepository>,
    /// Producer handle for background work.
    pub jobs: JobQueue,
    pub graphql: Arc<dyn GraphqlExecutor>,
    pub settings: Arc<AppSettings>,
}
