//! HTTP-facing error type and the JSON error body shared by handlers and
//! pipeline short-circuits.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rill_core::RepositoryError;
use serde_json::json;

use crate::jobs::DispatchError;

/// Builds `{"error": code, "message": message}` with the given status.
pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Errors a handler may return.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(msg) => json_error(StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Unauthorized => {
                json_error(StatusCode::UNAUTHORIZED, "unauthorized", "unauthorized")
            }
            Self::Forbidden(code) => json_error(StatusCode::FORBIDDEN, code, code),
            Self::Conflict(msg) | Self::Repository(RepositoryError::Conflict(msg)) => {
                json_error(StatusCode::CONFLICT, "conflict", msg)
            }
            Self::UnsupportedMediaType(msg) => {
                json_error(StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_media_type", msg)
            }
            Self::DeadlineExceeded | Self::Dispatch(DispatchError::Cancelled) => json_error(
                StatusCode::GATEWAY_TIMEOUT,
                "deadline_exceeded",
                "request deadline exceeded",
            ),
            Self::Repository(RepositoryError::NotFound) => {
                json_error(StatusCode::NOT_FOUND, "not_found", "not found")
            }
            Self::Dispatch(err) => {
                tracing::error!(error = %err, "job dispatch failed");
                json_error(StatusCode::BAD_GATEWAY, "dispatch_error", err.to_string())
            }
            Self::Repository(err) => {
                tracing::error!(error = %err, "repository call failed");
                json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error",
                )
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "handler failed");
                json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error",
                )
            }
        }
    }
}
