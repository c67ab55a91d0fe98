//! Per-request deadline.
//!
//! Arms the context deadline; when it passes, the context is cancelled so
//! cooperative work (repository lookups, publishes) stops, and the client
//! gets a 504 instead of waiting on the handler.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::Response;
use rill_core::RequestContext;
use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::warn;

use crate::error::json_error;

#[derive(Debug, Clone, Copy)]
pub struct DeadlineLayer {
    timeout: Duration,
}

impl DeadlineLayer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl<S> Layer<S> for DeadlineLayer {
    type Service = DeadlineService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DeadlineService {
            inner,
            timeout: self.timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeadlineService<S> {
    inner: S,
    timeout: Duration,
}

impl<S> Service<Request> for DeadlineService<S>
where
    S: Service<Request, Response = Response> + Send,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let timeout = self.timeout;
        let ctx = req.extensions().get::<Arc<RequestContext>>().cloned();
        // An earlier deadline set upstream is kept.
        let deadline = ctx
            .as_ref()
            .and_then(|ctx| ctx.arm_deadline(timeout).ok().or_else(|| ctx.deadline()))
            .unwrap_or_else(|| Instant::now() + timeout);

        let fut = self.inner.call(req);
        Box::pin(async move {
            if let Ok(result) = tokio::time::timeout_at(deadline, fut).await {
                return result;
            }

            if let Some(ctx) = &ctx {
                ctx.cancel();
            }
            warn!(
                request_id = ctx.as_ref().map(|c| c.request_id().as_str()),
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "request deadline exceeded"
            );
            metrics::counter!("http_deadline_exceeded_total").increment(1);

            Ok(json_error(
                StatusCode::GATEWAY_TIMEOUT,
                "deadline_exceeded",
                "request deadline exceeded",
            ))
        })
    }
}
