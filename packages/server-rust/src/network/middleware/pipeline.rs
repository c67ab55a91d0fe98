//! The fixed request pipeline applied to every route.
//!
//! Ordering follows the outer-to-inner convention: the first layer listed
//! sees the request first and the response last. Authentication is not part
//! of this stack; it is attached only to the protected route group.

use tower::layer::util::{Identity, Stack};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use super::context::ContextLayer;
use super::cors::{build_cors_layer, CorsGuardLayer};
use super::deadline::DeadlineLayer;
use super::logger::{RequestLogger, RequestLoggerLayer};
use super::recover::RecoverLayer;
use crate::network::config::NetworkConfig;

/// The composed layer type produced by [`build_http_layers`].
pub type HttpLayers = Stack<
    CorsLayer,
    Stack<
        CorsGuardLayer,
        Stack<
            DeadlineLayer,
            Stack<RecoverLayer, Stack<RequestLoggerLayer, Stack<ContextLayer, Identity>>>,
        >,
    >,
>;

/// Builds the pipeline.
///
/// **Stage order (outermost to innermost):**
/// 1. `Context` -- request id, caller address, shared request context
/// 2. `Logger` -- one structured record per request, after the inner stages
/// 3. `Recover` -- panics become a single 500 response
/// 4. `Deadline` -- cancels the context and answers 504 when the budget runs out
/// 5. `CorsGuard` -- rejects disallowed cross-origin requests with 403
/// 6. `Cors` -- preflight answers and CORS response headers
#[must_use]
pub fn build_http_layers(config: &NetworkConfig, logger: RequestLogger) -> HttpLayers {
    ServiceBuilder::new()
        .layer(ContextLayer)
        .layer(RequestLoggerLayer::new(logger))
        .layer(RecoverLayer)
        .layer(DeadlineLayer::new(config.request_timeout))
        .layer(CorsGuardLayer::new(&config.cors))
        .layer(build_cors_layer(&config.cors))
        .into_inner()
}
