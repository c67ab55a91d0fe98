//! HTTP surface: configuration, the request pipeline, handlers, routes and
//! the server lifecycle.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod routes;

pub use config::*;
pub use handlers::{AppSettings, AppState};
pub use module::NetworkModule;
pub use routes::build_router;
