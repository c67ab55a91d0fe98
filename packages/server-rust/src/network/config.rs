//! Network configuration types for the Rill server.

use std::time::Duration;

use axum::http::{HeaderName, Method};

/// Fixed per-request processing budget.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Top-level network configuration for the server.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Cross-origin policy applied before routing.
    pub cors: CorsConfig,
    /// Wall-clock budget for a whole request, including authentication.
    pub request_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            cors: CorsConfig::default(),
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

/// Cross-origin resource sharing policy.
///
/// Origins are patterns: `*` matches any run of characters, so
/// `https://*` admits every HTTPS origin.
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<Method>,
    pub allowed_headers: Vec<HeaderName>,
    pub exposed_headers: Vec<HeaderName>,
    pub allow_credentials: bool,
    /// Preflight cache lifetime.
    pub max_age: Duration,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["https://*".to_string(), "http://*".to_string()],
            allowed_methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ],
            allowed_headers: vec![
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
                http::header::COOKIE,
                http::header::CONTENT_TYPE,
                HeaderName::from_static("x-csrf-token"),
            ],
            exposed_headers: vec![http::header::LINK],
            allow_credentials: true,
            max_age: Duration::from_secs(300),
        }
    }
}
