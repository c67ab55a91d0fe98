//! Avatar upload for the authenticated user.
//!
//! The raw image is written under the upload directory, the profile is
//! pointed at it, and a `resize-avatar` task is queued. A dispatch failure
//! does not fail the upload; the response reports `resizeQueued: false`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::{Extension, Json};
use bytes::Bytes;
use rill_core::{RequestContext, UserId};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::AppState;
use crate::error::ApiError;
use crate::jobs::tasks;

/// Payload of the `resize-avatar` task.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeAvatar {
    pub user_id: UserId,
    pub path: String,
}

/// File extension for a supported image content type.
fn image_extension(headers: &HeaderMap) -> Result<&'static str, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "image/png" => Ok("png"),
        "image/jpeg" | "image/jpg" => Ok("jpg"),
        "image/gif" => Ok("gif"),
        "image/webp" => Ok("webp"),
        _ => Err(ApiError::UnsupportedMediaType(format!(
            "expected png, jpeg, gif or webp, got {content_type:?}"
        ))),
    }
}

/// `POST /users/me/avatar`
pub async fn avatar_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<Arc<RequestContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = ctx.user_id().ok_or(ApiError::Unauthorized)?;
    let ext = image_extension(&headers)?;
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty upload".into()));
    }

    let upload_dir = state.settings.upload_dir.clone();
    let file_name = format!("{}.{ext}", Uuid::new_v4());
    let path = upload_dir.join(&file_name);

    ctx.run_until_cancelled(async {
        tokio::fs::create_dir_all(&upload_dir).await?;
        tokio::fs::write(&path, &body).await
    })
    .await
    .map_err(|_| ApiError::DeadlineExceeded)?
    .map_err(|e| ApiError::Internal(format!("storing avatar: {e}")))?;

    let url = format!("/uploads/{file_name}");
    ctx.run_until_cancelled(state.accounts.set_avatar_url(user_id, &url))
        .await
        .map_err(|_| ApiError::DeadlineExceeded)??;

    let task = ResizeAvatar {
        user_id,
        path: path.to_string_lossy().into_owned(),
    };
    let task_id = match state
        .jobs
        .enqueue(&ctx, tasks::RESIZE_AVATAR, &task, tasks::IMAGES_QUEUE)
        .await
    {
        Ok(handle) => Some(handle.task_id),
        Err(err) => {
            warn!(
                request_id = %ctx.request_id(),
                user_id = %user_id,
                error = %err,
                "avatar resize not queued"
            );
            None
        }
    };

    info!(request_id = %ctx.request_id(), user_id = %user_id, url = %url, "avatar stored");
    Ok(Json(json!({
        "url": url,
        "resizeQueued": task_id.is_some(),
        "taskId": task_id,
    })))
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderValue, StatusCode};
    use axum::response::IntoResponse;
    use rill_core::{AccountRepository, NewAccount};

    use super::*;
    use crate::network::handlers::test_support::{context, fixture, Fixture};
    use crate::network::handlers::AppSettings;

    fn png_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
        headers
    }

    async fn signed_in(dir: &std::path::Path) -> (Fixture, Arc<RequestContext>) {
        let fx = fixture(AppSettings {
            upload_dir: dir.to_path_buf(),
            ..AppSettings::default()
        });
        let pending = fx
            .repo
            .create_account(NewAccount {
                username: "grace".into(),
                full_name: "Grace Hopper".into(),
                email: "grace@example.com".into(),
                initials: "GH".into(),
                password_hash: String::new(),
            })
            .await
            .unwrap();
        let ctx = context();
        ctx.set_user_id(pending.user_id).unwrap();
        (fx, ctx)
    }

    #[test]
    fn content_types() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("image/JPEG; charset=binary"),
        );
        assert_eq!(image_extension(&headers).unwrap(), "jpg");

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let err = image_extension(&headers).unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn stores_file_and_queues_resize() {
        let dir = tempfile::tempdir().unwrap();
        let (fx, ctx) = signed_in(dir.path()).await;
        let user_id = ctx.user_id().unwrap();

        let Json(body) = avatar_handler(
            State(fx.state.clone()),
            Extension(ctx),
            png_headers(),
            Bytes::from_static(b"\x89PNG fake"),
        )
        .await
        .unwrap();

        assert_eq!(body["resizeQueued"], true);
        let url = body["url"].as_str().unwrap();
        assert_eq!(fx.repo.avatar_url(user_id).as_deref(), Some(url));

        let file = dir.path().join(url.trim_start_matches("/uploads/"));
        assert_eq!(std::fs::read(file).unwrap(), b"\x89PNG fake");

        let published = fx.broker.published_to(tasks::IMAGES_QUEUE);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].name, tasks::RESIZE_AVATAR);
        assert_eq!(published[0].payload["userId"], user_id.to_string());
    }

    #[tokio::test]
    async fn broker_outage_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let (fx, ctx) = signed_in(dir.path()).await;
        fx.broker.set_reachable(false);

        let Json(body) = avatar_handler(
            State(fx.state.clone()),
            Extension(ctx),
            png_headers(),
            Bytes::from_static(b"img"),
        )
        .await
        .unwrap();

        assert_eq!(body["resizeQueued"], false);
        assert!(body["taskId"].is_null());
    }

    #[tokio::test]
    async fn requires_authenticated_context() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(AppSettings {
            upload_dir: dir.path().to_path_buf(),
            ..AppSettings::default()
        });

        let err = avatar_handler(
            State(fx.state),
            Extension(context()),
            png_headers(),
            Bytes::from_static(b"img"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
    }
}
