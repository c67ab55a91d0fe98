//! Client-side log ingestion.
//!
//! Browser clients post their own log lines here; each is re-emitted as a
//! `tracing` event under the `rill::client` target, tagged with the request
//! id, so client and server logs land in one stream.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::{Extension, Json};
use rill_core::RequestContext;
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct ClientLogEntry {
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// Log level of a client entry. Unknown names map to `Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl ClientLevel {
    fn parse(level: &str) -> Self {
        match level.trim().to_ascii_lowercase().as_str() {
            "error" | "fatal" | "panic" => Self::Error,
            "warn" | "warning" => Self::Warn,
            "debug" => Self::Debug,
            "trace" => Self::Trace,
            _ => Self::Info,
        }
    }
}

macro_rules! client_event {
    ($level:expr, $ctx:expr, $entry:expr, $fields:expr) => {
        tracing::event!(
            target: "rill::client",
            $level,
            request_id = %$ctx.request_id(),
            user_id = $ctx.user_id().map(tracing::field::display),
            fields = %$fields,
            "{}",
            $entry.message
        )
    };
}

/// `POST /logger`
pub async fn client_log_handler(
    Extension(ctx): Extension<Arc<RequestContext>>,
    Json(entry): Json<ClientLogEntry>,
) -> StatusCode {
    let fields = Value::Object(entry.fields.clone());
    match ClientLevel::parse(&entry.level) {
        ClientLevel::Error => client_event!(tracing::Level::ERROR, ctx, entry, fields),
        ClientLevel::Warn => client_event!(tracing::Level::WARN, ctx, entry, fields),
        ClientLevel::Info => client_event!(tracing::Level::INFO, ctx, entry, fields),
        ClientLevel::Debug => client_event!(tracing::Level::DEBUG, ctx, entry, fields),
        ClientLevel::Trace => client_event!(tracing::Level::TRACE, ctx, entry, fields),
    }
    StatusCode::NO_CONTENT
}
