//! Account registration, confirmation, login and logout.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use rill_core::{NewAccount, RequestContext, Session, SessionToken};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::AppState;
use crate::error::ApiError;
use crate::jobs::tasks;
use crate::network::middleware::{credential, SESSION_COOKIE};
use crate::password;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub fullname: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub initials: String,
}

impl RegisterRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.username.trim().is_empty() {
            return Err(ApiError::BadRequest("username is required".into()));
        }
        if !self.email.contains('@') {
            return Err(ApiError::BadRequest("email is invalid".into()));
        }
        if self.password.is_empty() {
            return Err(ApiError::BadRequest("password is required".into()));
        }
        Ok(())
    }

    fn initials(&self) -> String {
        if !self.initials.trim().is_empty() {
            return self.initials.trim().to_uppercase();
        }
        self.fullname
            .split_whitespace()
            .filter_map(|word| word.chars().next())
            .take(2)
            .collect::<String>()
            .to_uppercase()
    }
}

/// `POST /auth/register`: creates an inactive account and queues the
/// confirmation email.
pub async fn register_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<Arc<RequestContext>>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if !state.settings.allow_public_registration {
        return Err(ApiError::Forbidden("registration_disabled"));
    }
    body.validate()?;

    let secret = body.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || password::hash(&secret))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::Internal)?;

    let account = NewAccount {
        username: body.username.trim().to_string(),
        full_name: body.fullname.trim().to_string(),
        email: body.email.trim().to_string(),
        initials: body.initials(),
        password_hash,
    };
    let pending = ctx
        .run_until_cancelled(state.accounts.create_account(account))
        .await
        .map_err(|_| ApiError::DeadlineExceeded)??;

    let payload = json!({
        "userId": pending.user_id,
        "email": body.email.trim(),
        "confirmToken": pending.confirm_token,
    });
    if let Err(err) = state
        .jobs
        .enqueue(
            &ctx,
            tasks::SEND_CONFIRMATION_EMAIL,
            &payload,
            tasks::NOTIFICATIONS_QUEUE,
        )
        .await
    {
        warn!(
            request_id = %ctx.request_id(),
            user_id = %pending.user_id,
            error = %err,
            "confirmation email not queued"
        );
    }

    info!(request_id = %ctx.request_id(), user_id = %pending.user_id, "account registered");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "setup": false, "userId": pending.user_id })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub confirm_token: Uuid,
}

/// `POST /auth/confirm`: activates the account and opens a session.
pub async fn confirm_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<Arc<RequestContext>>,
    Json(body): Json<ConfirmRequest>,
) -> Result<Response, ApiError> {
    let user_id = ctx
        .run_until_cancelled(state.accounts.confirm_account(body.confirm_token))
        .await
        .map_err(|_| ApiError::DeadlineExceeded)??
        .ok_or_else(|| ApiError::BadRequest("invalid confirm token".into()))?;

    let ttl = state.settings.session_ttl;
    let session = ctx
        .run_until_cancelled(state.sessions.create_session(user_id, Utc::now() + ttl))
        .await
        .map_err(|_| ApiError::DeadlineExceeded)??;

    info!(request_id = %ctx.request_id(), user_id = %user_id, "account confirmed");

    Ok((
        [(header::SET_COOKIE, session_cookie(&session, ttl.num_seconds()))],
        Json(json!({ "hasConfirmToken": true, "success": true })),
    )
        .into_response())
}

fn session_cookie(session: &Session, max_age_secs: i64) -> String {
    format!(
        "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}",
        session.token
    )
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// `POST /auth/login`: verifies the password and opens a session.
///
/// Unknown usernames and wrong passwords are indistinguishable to the caller.
pub async fn login_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<Arc<RequestContext>>,
    Json(body): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let login = ctx
        .run_until_cancelled(state.accounts.find_login(body.username.trim()))
        .await
        .map_err(|_| ApiError::DeadlineExceeded)??
        .ok_or(ApiError::Unauthorized)?;

    let hash = login.password_hash;
    let secret = body.password;
    let matches = tokio::task::spawn_blocking(move || password::verify(&secret, &hash))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !matches {
        warn!(request_id = %ctx.request_id(), "login rejected");
        return Err(ApiError::Unauthorized);
    }
    if !login.active {
        return Err(ApiError::Forbidden("account_not_confirmed"));
    }

    let ttl = state.settings.session_ttl;
    let session = ctx
        .run_until_cancelled(state.sessions.create_session(login.user_id, Utc::now() + ttl))
        .await
        .map_err(|_| ApiError::DeadlineExceeded)??;

    info!(request_id = %ctx.request_id(), user_id = %login.user_id, "user logged in");
    Ok((
        [(header::SET_COOKIE, session_cookie(&session, ttl.num_seconds()))],
        Json(json!({ "userID": login.user_id })),
    )
        .into_response())
}

/// `POST /auth/logout`: drops the caller's session, if any, and clears the
/// cookie. Always succeeds for a missing or unknown credential.
pub async fn logout_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<Arc<RequestContext>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if let Some(token) = credential(&headers).and_then(|raw| raw.parse::<SessionToken>().ok()) {
        let removed = ctx
            .run_until_cancelled(state.sessions.delete_session(&token))
            .await
            .map_err(|_| ApiError::DeadlineExceeded)??;
        if removed {
            info!(request_id = %ctx.request_id(), "session closed");
        }
    }

    let cleared = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    Ok(([(header::SET_COOKIE, cleared)], Json(json!({ "success": true }))).into_response())
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use rill_core::{AccountRepository, SessionRepository};

    use super::*;
    use crate::jobs::tasks;
    use crate::network::handlers::test_support::{context, fixture, Fixture};
    use crate::network::handlers::AppSettings;

    fn open_settings() -> AppSettings {
        AppSettings {
            allow_public_registration: true,
            ..AppSettings::default()
        }
    }

    fn request(username: &str, email: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.into(),
            fullname: "Ada Lovelace".into(),
            email: email.into(),
            password: "analytical-engine".into(),
            initials: String::new(),
        }
    }

    #[test]
    fn initials_fall_back_to_full_name() {
        assert_eq!(request("ada", "ada@example.com").initials(), "AL");
    }

    #[tokio::test]
    async fn registration_disabled_is_forbidden() {
        let fx = fixture(AppSettings::default());
        let err = register_handler(
            State(fx.state),
            Extension(context()),
            Json(request("ada", "ada@example.com")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden("registration_disabled")));
    }

    #[tokio::test]
    async fn register_creates_account_and_queues_email() {
        let fx = fixture(open_settings());
        let (status, Json(body)) = register_handler(
            State(fx.state.clone()),
            Extension(context()),
            Json(request("ada", "ada@example.com")),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["setup"], false);
        let published = fx.broker.published_to(tasks::NOTIFICATIONS_QUEUE);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].name, tasks::SEND_CONFIRMATION_EMAIL);
        assert_eq!(published[0].payload["email"], "ada@example.com");
    }

    #[tokio::test]
    async fn register_survives_broker_outage() {
        let fx = fixture(open_settings());
        fx.broker.set_reachable(false);

        let (status, _) = register_handler(
            State(fx.state.clone()),
            Extension(context()),
            Json(request("ada", "ada@example.com")),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::CREATED);
        assert!(fx.broker.published().is_empty());
    }

    #[tokio::test]
    async fn duplicate_username_conflicts() {
        let fx = fixture(open_settings());
        register_handler(
            State(fx.state.clone()),
            Extension(context()),
            Json(request("ada", "ada@example.com")),
        )
        .await
        .unwrap();

        let err = register_handler(
            State(fx.state.clone()),
            Extension(context()),
            Json(request("ada", "other@example.com")),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn confirm_sets_session_cookie() {
        let fx = fixture(AppSettings {
            session_ttl: TimeDelta::hours(2),
            ..open_settings()
        });
        register_handler(
            State(fx.state.clone()),
            Extension(context()),
            Json(request("ada", "ada@example.com")),
        )
        .await
        .unwrap();
        let token: Uuid = serde_json::from_value(
            fx.broker.published()[0].payload["confirmToken"].clone(),
        )
        .unwrap();

        let resp = confirm_handler(
            State(fx.state.clone()),
            Extension(context()),
            Json(ConfirmRequest {
                confirm_token: token,
            }),
        )
        .await
        .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let cookie = resp.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("authToken="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=7200"));

        let raw = cookie
            .trim_start_matches("authToken=")
            .split(';')
            .next()
            .unwrap();
        let session_token: SessionToken = raw.parse().unwrap();
        let session = fx
            .repo
            .lookup_session(&session_token)
            .await
            .unwrap()
            .unwrap();
        assert!(fx.repo.is_active(session.user_id));
    }

    async fn registered(fx: &Fixture, confirm: bool) {
        register_handler(
            State(fx.state.clone()),
            Extension(context()),
            Json(request("ada", "ada@example.com")),
        )
        .await
        .unwrap();
        if confirm {
            let token: Uuid = serde_json::from_value(
                fx.broker.published()[0].payload["confirmToken"].clone(),
            )
            .unwrap();
            fx.repo.confirm_account(token).await.unwrap();
        }
    }

    fn login(username: &str, password: &str) -> Json<LoginRequest> {
        Json(LoginRequest {
            username: username.into(),
            password: password.into(),
        })
    }

    fn cookie_token(resp: &Response) -> String {
        resp.headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .trim_start_matches("authToken=")
            .split(';')
            .next()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn login_opens_a_session_for_confirmed_account() {
        let fx = fixture(open_settings());
        registered(&fx, true).await;

        let resp = login_handler(
            State(fx.state.clone()),
            Extension(context()),
            login("ada", "analytical-engine"),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let token: SessionToken = cookie_token(&resp).parse().unwrap();
        let session = fx.repo.lookup_session(&token).await.unwrap().unwrap();
        let expected = fx.repo.find_login("ada").await.unwrap().unwrap();
        assert_eq!(session.user_id, expected.user_id);
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_the_same() {
        let fx = fixture(open_settings());
        registered(&fx, true).await;

        for (user, pass) in [("ada", "difference-engine"), ("babbage", "analytical-engine")] {
            let err = login_handler(State(fx.state.clone()), Extension(context()), login(user, pass))
                .await
                .unwrap_err();
            assert!(matches!(err, ApiError::Unauthorized), "{user}");
        }
        assert_eq!(fx.repo.session_count(), 0);
    }

    #[tokio::test]
    async fn unconfirmed_account_cannot_log_in() {
        let fx = fixture(open_settings());
        registered(&fx, false).await;

        let err = login_handler(
            State(fx.state.clone()),
            Extension(context()),
            login("ada", "analytical-engine"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn logout_deletes_session_and_clears_cookie() {
        let fx = fixture(open_settings());
        registered(&fx, true).await;
        let resp = login_handler(
            State(fx.state.clone()),
            Extension(context()),
            login("ada", "analytical-engine"),
        )
        .await
        .unwrap();
        let raw = cookie_token(&resp);

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, format!("authToken={raw}").parse().unwrap());
        let resp = logout_handler(State(fx.state.clone()), Extension(context()), headers)
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let cleared = resp.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cleared.starts_with("authToken=;"));
        assert!(cleared.contains("Max-Age=0"));
        let token: SessionToken = raw.parse().unwrap();
        assert_eq!(fx.repo.lookup_session(&token).await.unwrap(), None);
    }

    #[tokio::test]
    async fn logout_without_credential_still_clears_cookie() {
        let fx = fixture(open_settings());
        let resp = logout_handler(State(fx.state), Extension(context()), HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key(header::SET_COOKIE));
    }

    #[tokio::test]
    async fn unknown_confirm_token_is_bad_request() {
        let fx = fixture(open_settings());
        let err = confirm_handler(
            State(fx.state),
            Extension(context()),
            Json(ConfirmRequest {
                confirm_token: Uuid::new_v4(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
