//! Login, logout and current-user endpoints

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use grc_core::validation::required;
use serde::{Deserialize, Serialize};

use crate::db::repos::{SessionRepo, User, UserRepo};
use crate::http::auth::{new_session_token, verify_password, CurrentUser};
use crate::http::error::ApiError;
use crate::http::server::AppState;

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

/// POST /auth/login
async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let email = required("email", &req.email, 254)?;
    if req.password.is_empty() {
        return Err(grc_core::ValidationError::Empty { field: "password" }.into());
    }

    let users = UserRepo::new(&state.pool);
    let Some((user, hash)) = users.find_for_login(&email).await? else {
        tracing::info!(%email, "login failed: unknown user");
        return Err(ApiError::Unauthorized);
    };
    if !user.is_active || !verify_password(&hash, &req.password) {
        tracing::info!(%email, active = user.is_active, "login failed");
        return Err(ApiError::Unauthorized);
    }

    let (token, digest) = new_session_token();
    let expires_at = Utc::now() + state.session_ttl;
    SessionRepo::new(&state.pool)
        .create(user.id, &digest, expires_at)
        .await?;
    users.record_login(user.id).await?;
    tracing::info!(user = %user.email, role = %user.role, "login");

    Ok(Json(LoginResponse {
        token,
        expires_at,
        user,
    }))
}

/// POST /auth/logout
async fn logout(State(state): State<Arc<AppState>>, current: CurrentUser) -> Result<StatusCode, ApiError> {
    SessionRepo::new(&state.pool).delete(&current.token_digest).await?;
    tracing::info!(user = %current.name(), "logout");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /auth/me
async fn me(current: CurrentUser) -> Json<User> {
    Json(current.user)
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
}

#[cfg(test)]
mod tests {
    use crate::http::routes::test_support::{app, send};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn login_validates_before_lookup() {
        let (status, body) = send(app(), "POST", "/auth/login", Some(r#"{"email":"  ","password":"x"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");

        let (status, _) = send(app(), "POST", "/auth/login", Some(r#"{"email":"a@b.c"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn me_requires_session() {
        let (status, body) = send(app(), "GET", "/auth/me", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");
    }
}
