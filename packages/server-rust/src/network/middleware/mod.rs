//! HTTP middleware: the fixed request pipeline and the auth stage.

pub mod auth;
pub mod context;
pub mod cors;
pub mod deadline;
pub mod logger;
pub mod pipeline;
pub mod recover;

pub use auth::{credential, AuthLayer, SESSION_COOKIE};
pub use context::{ContextLayer, REQUEST_ID_HEADER};
pub use cors::{build_cors_layer, CorsGuardLayer, OriginPolicy};
pub use deadline::DeadlineLayer;
pub use logger::{LogSink, MemorySink, RequestLogger, RequestLoggerLayer, RequestRecord, TracingSink};
pub use pipeline::{build_http_layers, HttpLayers};
pub use recover::RecoverLayer;
