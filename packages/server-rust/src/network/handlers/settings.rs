//! Public deployment settings the client reads before login.

use axum::extract::State;
use axum::Json;
use serde_json::json;

use super::AppState;

/// `GET /settings`
pub async fn settings_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "allowPublicRegistration": state.settings.allow_public_registration,
    }))
}
