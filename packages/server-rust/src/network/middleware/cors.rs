//! Cross-origin policy.
//!
//! Two pieces: [`CorsGuardLayer`] rejects cross-origin requests whose origin
//! or method is outside the policy before they reach routing, and
//! [`build_cors_layer`] produces the `tower-http` layer that answers
//! preflights and decorates allowed responses.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::Response;
use tower::{Layer, Service};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer, ExposeHeaders};
use tracing::debug;

use crate::error::json_error;
use crate::network::config::CorsConfig;

/// Compiled origin and method rules.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    patterns: Vec<String>,
    methods: Vec<Method>,
}

impl OriginPolicy {
    pub fn from_config(config: &CorsConfig) -> Self {
        Self {
            patterns: config
                .allowed_origins
                .iter()
                .map(|p| p.to_ascii_lowercase())
                .collect(),
            methods: config.allowed_methods.clone(),
        }
    }

    pub fn allows_origin(&self, origin: &str) -> bool {
        let origin = origin.to_ascii_lowercase();
        self.patterns.iter().any(|p| wildcard_match(p, &origin))
    }

    pub fn allows_method(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }
}

/// Glob match where `*` stands for any run of characters.
fn wildcard_match(pattern: &str, value: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return value.is_empty();
    };
    let Some(mut rest) = value.strip_prefix(first) else {
        return false;
    };

    let tail: Vec<&str> = parts.collect();
    let Some((last, middle)) = tail.split_last() else {
        // No wildcard at all.
        return rest.is_empty();
    };

    for part in middle {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

/// `tower-http` layer for preflight answers and response headers.
pub fn build_cors_layer(config: &CorsConfig) -> CorsLayer {
    let policy = Arc::new(OriginPolicy::from_config(config));
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin.to_str().is_ok_and(|o| policy.allows_origin(o))
        }))
        .allow_methods(AllowMethods::list(config.allowed_methods.iter().cloned()))
        .allow_headers(AllowHeaders::list(config.allowed_headers.iter().cloned()))
        .expose_headers(ExposeHeaders::list(config.exposed_headers.iter().cloned()))
        .allow_credentials(config.allow_credentials)
        .max_age(config.max_age)
}

// ---------------------------------------------------------------------------
// CorsGuardLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CorsGuardLayer {
    policy: Arc<OriginPolicy>,
}

impl CorsGuardLayer {
    pub fn new(config: &CorsConfig) -> Self {
        Self {
            policy: Arc::new(OriginPolicy::from_config(config)),
        }
    }
}

impl<S> Layer<S> for CorsGuardLayer {
    type Service = CorsGuardService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorsGuardService {
            inner,
            policy: Arc::clone(&self.policy),
        }
    }
}

// ---------------------------------------------------------------------------
// CorsGuardService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CorsGuardService<S> {
    inner: S,
    policy: Arc<OriginPolicy>,
}

impl<S> CorsGuardService<S> {
    /// Requests without `Origin` are same-origin or non-browser and pass.
    fn permits(&self, req: &Request) -> bool {
        let Some(origin) = req.headers().get(header::ORIGIN) else {
            return true;
        };
        if !origin.to_str().is_ok_and(|o| self.policy.allows_origin(o)) {
            return false;
        }

        let requested = req.headers().get(header::ACCESS_CONTROL_REQUEST_METHOD);
        match requested {
            Some(value) if req.method() == Method::OPTIONS => Method::from_bytes(value.as_bytes())
                .is_ok_and(|m| self.policy.allows_method(&m)),
            _ => self.policy.allows_method(req.method()),
        }
    }
}

impl<S> Service<Request> for CorsGuardService<S>
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
        if !self.permits(&req) {
            debug!(
                origin = ?req.headers().get(header::ORIGIN),
                method = %req.method(),
                "cross-origin request rejected"
            );
            metrics::counter!("http_cors_rejected_total").increment(1);
            return Box::pin(async {
                Ok(json_error(
                    StatusCode::FORBIDDEN,
                    "forbidden_origin",
                    "cross-origin request not allowed",
                ))
            });
        }

        let fut = self.inner.call(req);
        Box::pin(fut)
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use axum::body::Body;
    use proptest::prelude::*;
    use tower::ServiceExt;

    use super::*;

    #[derive(Clone)]
    struct Ok200;

    impl Service<Request> for Ok200 {
        type Response = Response;
        type Error = Infallible;
        type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: Request) -> Self::Future {
            Box::pin(async { Ok(Response::new(Body::empty())) })
        }
    }

    fn strict_config() -> CorsConfig {
        CorsConfig {
            allowed_origins: vec!["https://*.rill.dev".into()],
            ..CorsConfig::default()
        }
    }

    #[test]
    fn wildcard_matching() {
        assert!(wildcard_match("https://*", "https://app.example"));
        assert!(!wildcard_match("https://*", "http://app.example"));
        assert!(wildcard_match("https://*.rill.dev", "https://board.rill.dev"));
        assert!(!wildcard_match("https://*.rill.dev", "https://rill.dev.evil"));
        assert!(wildcard_match("http://localhost:3000", "http://localhost:3000"));
        assert!(!wildcard_match("http://localhost:3000", "http://localhost:30001"));
        assert!(wildcard_match("*", ""));
        assert!(!wildcard_match("a*a", "a"));
    }

    #[test]
    fn policy_is_case_insensitive_on_origin() {
        let policy = OriginPolicy::from_config(&strict_config());
        assert!(policy.allows_origin("HTTPS://Board.Rill.Dev"));
        assert!(!policy.allows_method(&Method::PATCH));
    }

    #[tokio::test]
    async fn disallowed_method_from_matching_origin_is_rejected() {
        let svc = CorsGuardLayer::new(&CorsConfig::default()).layer(Ok200);
        let req = Request::builder()
            .method(Method::PATCH)
            .header(header::ORIGIN, "http://evil.example")
            .body(Body::empty())
            .unwrap();
        let resp = svc.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unknown_origin_is_rejected() {
        let svc = CorsGuardLayer::new(&strict_config()).layer(Ok200);
        let req = Request::builder()
            .method(Method::GET)
            .header(header::ORIGIN, "https://evil.example")
            .body(Body::empty())
            .unwrap();
        let resp = svc.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn preflight_checks_requested_method() {
        let svc = CorsGuardLayer::new(&CorsConfig::default()).layer(Ok200);
        let req = Request::builder()
            .method(Method::OPTIONS)
            .header(header::ORIGIN, "https://app.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PATCH")
            .body(Body::empty())
            .unwrap();
        let resp = svc.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let req = Request::builder()
            .method(Method::OPTIONS)
            .header(header::ORIGIN, "https://app.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();
        let resp = svc.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn requests_without_origin_pass() {
        let svc = CorsGuardLayer::new(&strict_config()).layer(Ok200);
        let req = Request::builder()
            .method(Method::PATCH)
            .body(Body::empty())
            .unwrap();
        let resp = svc.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    proptest! {
        #[test]
        fn literal_patterns_match_only_themselves(a in "[a-z.:/]{0,24}", b in "[a-z.:/]{0,24}") {
            prop_assert_eq!(wildcard_match(&a, &b), a == b);
        }

        #[test]
        fn prefix_star_matches_any_suffix(prefix in "[a-z:/]{0,12}", suffix in "[a-z.]{0,24}") {
            let pattern = format!("{prefix}*");
            let value = format!("{prefix}{suffix}");
            prop_assert!(wildcard_match(&pattern, &value));
        }
    }
}
