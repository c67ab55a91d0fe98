//! Structured request logging.
//!
//! Exactly one [`RequestRecord`] is emitted per request, after the inner
//! stages finish. A response future dropped before completion (client
//! disconnect) is recorded with status 499. Sink failures never reach the
//! client.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::extract::Request;
use axum::http::Method;
use axum::response::Response;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rill_core::{RequestContext, UserId};
use serde::Serialize;
use tower::{Layer, Service};

/// Status recorded when the response future is dropped unfinished.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// One line of the access log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub status: u16,
    #[serde(with = "latency_ms")]
    pub latency: Duration,
    pub request_id: Option<String>,
    pub user_id: Option<UserId>,
    pub remote_addr: Option<String>,
}

mod latency_ms {
    use std::time::Duration;

    use serde::Serializer;

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(latency: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(latency.as_secs_f64() * 1000.0)
    }
}

/// Destination for access-log records.
pub trait LogSink: Send + Sync {
    fn emit(&self, record: &RequestRecord);
}

/// Writes records through `tracing` under the `rill::http` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

macro_rules! access_event {
    ($level:expr, $record:expr) => {
        tracing::event!(
            target: "rill::http",
            $level,
            method = %$record.method,
            path = %$record.path,
            status = $record.status,
            latency_ms = $record.latency.as_secs_f64() * 1000.0,
            request_id = $record.request_id.as_deref(),
            user_id = $record.user_id.as_ref().map(tracing::field::display),
            remote_addr = $record.remote_addr.as_deref(),
            "request completed"
        )
    };
}

impl LogSink for TracingSink {
    fn emit(&self, record: &RequestRecord) {
        match record.status {
            500.. => access_event!(tracing::Level::ERROR, record),
            400..=499 => access_event!(tracing::Level::WARN, record),
            _ => access_event!(tracing::Level::INFO, record),
        }
    }
}

/// Keeps records in memory. Used by tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<RequestRecord>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<RequestRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl LogSink for MemorySink {
    fn emit(&self, record: &RequestRecord) {
        self.records.lock().push(record.clone());
    }
}

/// The logger component handed to the pipeline at construction.
#[derive(Clone)]
pub struct RequestLogger {
    sink: Arc<dyn LogSink>,
}

impl RequestLogger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    /// Logger backed by the process-wide `tracing` subscriber.
    #[must_use]
    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingSink))
    }

    fn emit(&self, record: &RequestRecord) {
        metrics::counter!(
            "http_requests_total",
            "method" => record.method.clone(),
            "status" => record.status.to_string(),
        )
        .increment(1);
        metrics::histogram!("http_request_duration_seconds").record(record.latency.as_secs_f64());

        if catch_unwind(AssertUnwindSafe(|| self.sink.emit(record))).is_err() {
            metrics::counter!("http_log_sink_failures_total").increment(1);
        }
    }
}

impl std::fmt::Debug for RequestLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLogger").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// RequestLoggerLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RequestLoggerLayer {
    logger: RequestLogger,
}

impl RequestLoggerLayer {
    pub fn new(logger: RequestLogger) -> Self {
        Self { logger }
    }
}

impl<S> Layer<S> for RequestLoggerLayer {
    type Service = RequestLoggerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLoggerService {
            inner,
            logger: self.logger.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// RequestLoggerService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RequestLoggerService<S> {
    inner: S,
    logger: RequestLogger,
}

impl<S> Service<Request> for RequestLoggerService<S>
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
        let ctx = req.extensions().get::<Arc<RequestContext>>().cloned();
        let pending = PendingRecord {
            logger: self.logger.clone(),
            timestamp: ctx.as_ref().map_or_else(Utc::now, |c| c.received_at()),
            started: Instant::now(),
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            status: None,
            ctx,
        };

        let fut = self.inner.call(req);
        Box::pin(async move {
            // Bind the whole guard so it lives as long as the response future.
            let mut pending = pending;
            let result = fut.await;
            pending.status = Some(match &result {
                Ok(response) => response.status().as_u16(),
                Err(_) => 500,
            });
            result
        })
    }
}

/// Emits the record on drop so completion and cancellation share one path.
struct PendingRecord {
    logger: RequestLogger,
    ctx: Option<Arc<RequestContext>>,
    timestamp: DateTime<Utc>,
    started: Instant,
    method: Method,
    path: String,
    status: Option<u16>,
}

impl Drop for PendingRecord {
    fn drop(&mut self) {
        // user_id is read here, after the auth stage had its chance to set it.
        let record = RequestRecord {
            timestamp: self.timestamp,
            method: self.method.to_string(),
            path: std::mem::take(&mut self.path),
            status: self.status.unwrap_or(CLIENT_CLOSED_REQUEST),
            latency: self.started.elapsed(),
            request_id: self.ctx.as_ref().map(|c| c.request_id().to_string()),
            user_id: self.ctx.as_ref().and_then(|c| c.user_id()),
            remote_addr: self
                .ctx
                .as_ref()
                .and_then(|c| c.remote_addr().map(ToString::to_string)),
        };
        self.logger.emit(&record);
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use axum::body::Body;
    use axum::http::StatusCode;
    use rill_core::RequestId;
    use tower::ServiceExt;

    use super::*;

    #[derive(Clone)]
    struct Respond(StatusCode);

    impl Service<Request> for Respond {
        type Response = Response;
        type Error = Infallible;
        type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request) -> Self::Future {
            let status = self.0;
            let ctx = req.extensions().get::<Arc<RequestContext>>().cloned();
            Box::pin(async move {
                if let Some(ctx) = ctx {
                    let _ = ctx.set_user_id(UserId::new());
                }
                if status == StatusCode::REQUEST_TIMEOUT {
                    std::future::pending::<()>().await;
                }
                let mut response = Response::new(Body::empty());
                *response.status_mut() = status;
                Ok(response)
            })
        }
    }

    struct PanickingSink;

    impl LogSink for PanickingSink {
        fn emit(&self, _record: &RequestRecord) {
            panic!("sink exploded");
        }
    }

    fn request_with_context() -> (Request, Arc<RequestContext>) {
        let ctx = Arc::new(
            RequestContext::new(RequestId::from_header("log-test").unwrap())
                .with_remote_addr(Some("192.0.2.1".into())),
        );
        let mut req = Request::builder()
            .method(Method::POST)
            .uri("/graphql?x=1")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut().insert(Arc::clone(&ctx));
        (req, ctx)
    }

    #[tokio::test]
    async fn emits_one_record_with_context_fields() {
        let sink = Arc::new(MemorySink::new());
        let svc = RequestLoggerLayer::new(RequestLogger::new(sink.clone()))
            .layer(Respond(StatusCode::CREATED));
        let (req, ctx) = request_with_context();

        let resp = svc.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.method, "POST");
        assert_eq!(record.path, "/graphql");
        assert_eq!(record.status, 201);
        assert_eq!(record.request_id.as_deref(), Some("log-test"));
        assert_eq!(record.remote_addr.as_deref(), Some("192.0.2.1"));
        assert_eq!(record.user_id, ctx.user_id());
        assert!(record.user_id.is_some());
    }

    #[tokio::test]
    async fn completed_response_keeps_its_status_and_ingress_timestamp() {
        let sink = Arc::new(MemorySink::new());
        let svc = RequestLoggerLayer::new(RequestLogger::new(sink.clone()))
            .layer(Respond(StatusCode::OK));
        let (req, ctx) = request_with_context();

        svc.oneshot(req).await.unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_ne!(records[0].status, CLIENT_CLOSED_REQUEST);
        assert_eq!(records[0].status, 200);
        assert_eq!(records[0].timestamp, ctx.received_at());
    }

    #[tokio::test]
    async fn dropped_response_is_logged_as_client_closed() {
        let sink = Arc::new(MemorySink::new());
        let mut svc = RequestLoggerLayer::new(RequestLogger::new(sink.clone()))
            .layer(Respond(StatusCode::REQUEST_TIMEOUT));
        let (req, _ctx) = request_with_context();

        let fut = svc.call(req);
        let outcome = tokio::time::timeout(Duration::from_millis(10), fut).await;
        assert!(outcome.is_err());

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, CLIENT_CLOSED_REQUEST);
    }

    #[tokio::test]
    async fn sink_panic_does_not_reach_the_caller() {
        let svc = RequestLoggerLayer::new(RequestLogger::new(Arc::new(PanickingSink)))
            .layer(Respond(StatusCode::OK));
        let (req, _ctx) = request_with_context();

        let resp = svc.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn record_serializes_latency_in_millis() {
        let record = RequestRecord {
            timestamp: Utc::now(),
            method: "GET".into(),
            path: "/settings".into(),
            status: 200,
            latency: Duration::from_millis(12),
            request_id: Some("abc".into()),
            user_id: None,
            remote_addr: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["latency"], 12.0);
        assert_eq!(json["requestId"], "abc");
        assert!(json["userId"].is_null());
    }
}
