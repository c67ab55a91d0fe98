//! Session authentication for the protected route group.
//!
//! The credential is the `authToken` cookie, or failing that an
//! `Authorization: Bearer` header. A valid, unexpired session writes the
//! user id into the shared request context before the handler runs;
//! anything else short-circuits and the handler never executes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use rill_core::{RepositoryError, RequestContext, SessionRepository, SessionToken, UserId};
use tower::{Layer, Service};
use tracing::{debug, error, warn};

use crate::error::json_error;

/// Cookie carrying the session token.
pub const SESSION_COOKIE: &str = "authToken";

/// Why a request was not authenticated.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no credential presented")]
    MissingCredential,
    #[error("credential is not a session token")]
    MalformedCredential,
    #[error("unknown session")]
    UnknownSession,
    #[error("session expired")]
    ExpiredSession,
    #[error("request context missing")]
    MissingContext,
    #[error("request cancelled during authentication")]
    Cancelled,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::MissingCredential
            | Self::MalformedCredential
            | Self::UnknownSession
            | Self::ExpiredSession => {
                json_error(StatusCode::UNAUTHORIZED, "unauthorized", "unauthorized")
            }
            Self::Cancelled => json_error(
                StatusCode::GATEWAY_TIMEOUT,
                "deadline_exceeded",
                "request deadline exceeded",
            ),
            Self::MissingContext | Self::Repository(_) => json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal server error",
            ),
        }
    }
}

/// Extracts the raw credential. The cookie wins over the header.
pub fn credential(headers: &HeaderMap) -> Option<&str> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim())
        .filter(|v| !v.is_empty());

    from_cookie.or_else(|| {
        let (scheme, token) = headers
            .get(header::AUTHORIZATION)?
            .to_str()
            .ok()?
            .trim()
            .split_once(' ')?;
        let token = token.trim();
        (scheme.eq_ignore_ascii_case("Bearer") && !token.is_empty()).then_some(token)
    })
}

/// Resolves the caller's user id. Repository calls race the context's
/// cancellation.
pub async fn authenticate(
    sessions: &dyn SessionRepository,
    ctx: &RequestContext,
    headers: &HeaderMap,
) -> Result<UserId, AuthError> {
    let raw = credential(headers).ok_or(AuthError::MissingCredential)?;
    let token: SessionToken = raw.parse().map_err(|_| AuthError::MalformedCredential)?;

    let session = ctx
        .run_until_cancelled(sessions.lookup_session(&token))
        .await
        .map_err(|_| AuthError::Cancelled)??
        .ok_or(AuthError::UnknownSession)?;

    if !session.is_valid_at(Utc::now()) {
        return Err(AuthError::ExpiredSession);
    }
    Ok(session.user_id)
}

// ---------------------------------------------------------------------------
// AuthLayer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AuthLayer {
    sessions: Arc<dyn SessionRepository>,
}

impl AuthLayer {
    pub fn new(sessions: Arc<dyn SessionRepository>) -> Self {
        Self { sessions }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            sessions: Arc::clone(&self.sessions),
        }
    }
}

// ---------------------------------------------------------------------------
// AuthService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    sessions: Arc<dyn SessionRepository>,
}

impl<S> Service<Request> for AuthService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        // Keep the service that was polled ready; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let sessions = Arc::clone(&self.sessions);

        Box::pin(async move {
            let Some(ctx) = req.extensions().get::<Arc<RequestContext>>().cloned() else {
                error!("auth stage reached without a request context");
                return Ok(AuthError::MissingContext.into_response());
            };

            let (parts, body) = req.into_parts();
            let user_id = match authenticate(sessions.as_ref(), &ctx, &parts.headers).await {
                Ok(user_id) => user_id,
                Err(err) => {
                    match &err {
                        AuthError::Repository(source) => {
                            error!(request_id = %ctx.request_id(), error = %source, "session lookup failed");
                        }
                        AuthError::Cancelled => {
                            warn!(request_id = %ctx.request_id(), "authentication cancelled");
                        }
                        other => {
                            debug!(request_id = %ctx.request_id(), reason = %other, "request not authenticated");
                        }
                    }
                    metrics::counter!("http_auth_rejected_total").increment(1);
                    return Ok(err.into_response());
                }
            };

            if ctx.set_user_id(user_id).is_err() && ctx.user_id() != Some(user_id) {
                error!(request_id = %ctx.request_id(), "user id already bound to another user");
                return Ok(AuthError::MissingContext.into_response());
            }

            inner.call(Request::from_parts(parts, body)).await
        })
    }
}
