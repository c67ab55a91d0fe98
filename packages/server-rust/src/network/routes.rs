//! Route table.
//!
//! Every route belongs to exactly one of two groups. The public group is
//! served as-is; the protected group has the auth stage attached with
//! `route_layer`, so it runs only for requests that matched a protected
//! route. Unmatched paths fall through to a JSON 404 without
//! authentication.

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::services::ServeDir;

use super::config::NetworkConfig;
use super::handlers::{
    avatar_handler, client_log_handler, confirm_handler, graphql_handler, login_handler,
    logout_handler, playground_handler, register_handler, settings_handler, AppState,
};
use super::middleware::{build_http_layers, AuthLayer, RequestLogger};
use crate::error::json_error;

/// Routes reachable without a session.
pub fn public_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register_handler))
        .route("/auth/confirm", post(confirm_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/settings", get(settings_handler))
        .route("/logger", post(client_log_handler))
        .route("/__graphql", get(playground_handler))
        .nest_service("/uploads", ServeDir::new(&state.settings.upload_dir))
}

/// Routes that require a valid session.
pub fn protected_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/users/me/avatar",
            post(avatar_handler).layer(DefaultBodyLimit::max(state.settings.max_avatar_bytes)),
        )
        .route("/graphql", post(graphql_handler))
        .route_layer(AuthLayer::new(state.sessions.clone()))
}

async fn not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, "not_found", "no such route")
}

/// Assembles both groups behind the request pipeline.
pub fn build_router(state: AppState, config: &NetworkConfig, logger: RequestLogger) -> Router {
    public_routes(&state)
        .merge(protected_routes(&state))
        .fallback(not_found)
        .layer(build_http_layers(config, logger))
        .with_state(state)
}
