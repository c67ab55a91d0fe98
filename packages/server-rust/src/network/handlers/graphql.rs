//! GraphQL endpoint and playground.
//!
//! The schema itself is a collaborator: the handler hands the parsed request,
//! the request context and the job queue to a [`GraphqlExecutor`].

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::response::Html;
use axum::{Extension, Json};
use rill_core::RequestContext;
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::jobs::JobQueue;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlRequest {
    pub query: String,
    #[serde(default)]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub variables: Value,
}

/// Executes GraphQL documents. Resolvers read the caller from `ctx` and
/// may enqueue background work through `jobs`.
#[async_trait]
pub trait GraphqlExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: Arc<RequestContext>,
        jobs: JobQueue,
        request: GraphqlRequest,
    ) -> Value;
}

/// Executor used when no schema is mounted.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaNotMounted;

#[async_trait]
impl GraphqlExecutor for SchemaNotMounted {
    async fn execute(
        &self,
        _ctx: Arc<RequestContext>,
        _jobs: JobQueue,
        request: GraphqlRequest,
    ) -> Value {
        json!({
            "data": null,
            "errors": [{
                "message": "no GraphQL schema is mounted on this server",
                "extensions": { "operationName": request.operation_name },
            }],
        })
    }
}

/// `POST /graphql`
pub async fn graphql_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<Arc<RequestContext>>,
    Json(request): Json<GraphqlRequest>,
) -> Json<Value> {
    Json(state.graphql.execute(ctx, state.jobs.clone(), request).await)
}

const PLAYGROUND_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8" />
  <title>Rill GraphQL Playground</title>
  <link rel="stylesheet" href="https://cdn.jsdelivr.net/npm/graphql-playground-react/build/static/css/index.css" />
  <script src="https://cdn.jsdelivr.net/npm/graphql-playground-react/build/static/js/middleware.js"></script>
</head>
<body>
  <div id="root"></div>
  <script>
    window.addEventListener('load', function () {
      GraphQLPlayground.init(document.getElementById('root'), {
        endpoint: '/graphql',
        settings: { 'request.credentials': 'include' },
      });
    });
  </script>
</body>
</html>
"#;

/// `GET /__graphql`
pub async fn playground_handler() -> Html<&'static str> {
    Html(PLAYGROUND_HTML)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::handlers::test_support::{context, fixture};
    use crate::network::handlers::AppSettings;

    #[tokio::test]
    async fn default_executor_returns_error_document() {
        let fx = fixture(AppSettings::default());
        let request: GraphqlRequest =
            serde_json::from_str(r#"{"query":"{ me { id } }","operationName":"Me"}"#).unwrap();

        let Json(body) = graphql_handler(State(fx.state), Extension(context()), Json(request)).await;

        assert!(body["data"].is_null());
        assert_eq!(body["errors"][0]["extensions"]["operationName"], "Me");
    }

    #[tokio::test]
    async fn playground_points_at_endpoint() {
        let Html(page) = playground_handler().await;
        assert!(page.contains("endpoint: '/graphql'"));
    }
}
