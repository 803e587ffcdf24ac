//! User administration (Admin only)

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use grc_core::validation::{optional, required};
use grc_core::{Policy, UserRole, ValidationError};
use serde::Deserialize;

use crate::db::repos::users::{NewUser, UserUpdate};
use crate::db::repos::{User, UserRepo};
use crate::http::auth::{hash_password, CurrentUser, MIN_PASSWORD_LEN};
use crate::http::error::ApiError;
use crate::http::extractors::ValidUuid;
use crate::http::server::AppState;
use crate::models::input::NAME_MAX;
use crate::models::{Paginated, PaginationParams, Versioned};

#[derive(Debug, Default, Deserialize)]
pub struct ListUsersQuery {
    pub search: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateUserRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub department: Option<String>,
    pub job_title: Option<String>,
    pub role: Option<UserRole>,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateUserRequest {
    pub first_name: String,
    pub last_name: String,
    pub department: Option<String>,
    pub job_title: Option<String>,
    pub role: Option<UserRole>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PasswordRequest {
    pub password: String,
}

pub fn validate_email(email: &str) -> Result<String, ValidationError> {
    let email = required("email", email, 254)?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !email.contains(' ') => {
            Ok(email.to_lowercase())
        }
        _ => Err(ValidationError::InvalidFormat {
            field: "email",
            reason: "not an email address",
        }),
    }
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::OutOfRange {
            field: "password",
            reason: format!("must be at least {} characters", MIN_PASSWORD_LEN),
        });
    }
    Ok(())
}

impl UpdateUserRequest {
    fn validate(self) -> Result<UserUpdate, ValidationError> {
        Ok(UserUpdate {
            first_name: required("first name", &self.first_name, NAME_MAX)?,
            last_name: required("last name", &self.last_name, NAME_MAX)?,
            department: optional("department", self.department.as_deref(), NAME_MAX)?,
            job_title: optional("job title", self.job_title.as_deref(), NAME_MAX)?,
            role: self.role.ok_or(ValidationError::Empty { field: "role" })?,
        })
    }
}

/// GET /users
async fn list_users(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(query): Query<ListUsersQuery>,
    Query(page): Query<PaginationParams>,
) -> Result<Json<Paginated<User>>, ApiError> {
    current.require(Policy::RequireAdminRole)?;
    let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let users = UserRepo::new(&state.pool)
        .list(search, page.into())
        .await?;
    Ok(Json(users))
}

/// POST /users
async fn create_user(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    current.require(Policy::RequireAdminRole)?;
    let email = validate_email(&req.email)?;
    validate_password(&req.password)?;
    let new = NewUser {
        email,
        first_name: required("first name", &req.first_name, NAME_MAX)?,
        last_name: required("last name", &req.last_name, NAME_MAX)?,
        department: optional("department", req.department.as_deref(), NAME_MAX)?,
        job_title: optional("job title", req.job_title.as_deref(), NAME_MAX)?,
        role: req.role.unwrap_or(UserRole::ItUser),
        password_hash: hash_password(&req.password)?,
    };

    let user = UserRepo::new(&state.pool).create(new).await?;
    tracing::info!(user = %user.email, role = %user.role, by = %current.name(), "user created");
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /users/{id}
async fn get_user(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<User>, ApiError> {
    current.require(Policy::RequireAdminRole)?;
    Ok(Json(UserRepo::new(&state.pool).get(id).await?))
}

/// PUT /users/{id}
async fn update_user(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<Versioned<UpdateUserRequest>>,
) -> Result<Json<User>, ApiError> {
    current.require(Policy::RequireAdminRole)?;
    let update = req.body.validate()?;
    if id == current.user.id && update.role != UserRole::Admin {
        return Err(ApiError::conflict("you cannot remove your own Admin role"));
    }
    let user = UserRepo::new(&state.pool)
        .update(id, req.row_version, update)
        .await?;
    Ok(Json(user))
}

async fn set_active(state: &AppState, current: &CurrentUser, id: uuid::Uuid, active: bool) -> Result<User, ApiError> {
    current.require(Policy::RequireAdminRole)?;
    if !active && id == current.user.id {
        return Err(ApiError::conflict("you cannot deactivate your own account"));
    }
    let user = UserRepo::new(&state.pool).set_active(id, active).await?;
    tracing::info!(user = %user.email, active, by = %current.name(), "user activation changed");
    Ok(user)
}

/// POST /users/{id}/activate
async fn activate(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<User>, ApiError> {
    Ok(Json(set_active(&state, &current, id, true).await?))
}

/// POST /users/{id}/deactivate
async fn deactivate(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<User>, ApiError> {
    Ok(Json(set_active(&state, &current, id, false).await?))
}

/// POST /users/{id}/password
async fn set_password(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<PasswordRequest>,
) -> Result<StatusCode, ApiError> {
    current.require(Policy::RequireAdminRole)?;
    validate_password(&req.password)?;
    let hash = hash_password(&req.password)?;
    UserRepo::new(&state.pool).set_password(id, &hash).await?;
    tracing::info!(%id, by = %current.name(), "password reset");
    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/{id}", get(get_user).put(update_user))
        .route("/users/{id}/activate", post(activate))
        .route("/users/{id}/deactivate", post(deactivate))
        .route("/users/{id}/password", post(set_password))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::routes::test_support::{app, send};

    #[test]
    fn email_shape() {
        assert_eq!(validate_email(" Alice@Example.com ").unwrap(), "alice@example.com");
        assert!(validate_email("alice").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("a b@example.com").is_err());
    }

    #[test]
    fn short_passwords_rejected() {
        assert!(validate_password("1234567").is_err());
        assert!(validate_password("12345678").is_ok());
    }

    #[test]
    fn update_requires_role() {
        let req = UpdateUserRequest {
            first_name: "Ana".into(),
            last_name: "Lee".into(),
            ..Default::default()
        };
        assert_eq!(req.validate().unwrap_err(), ValidationError::Empty { field: "role" });
    }

    #[tokio::test]
    async fn listing_requires_session() {
        let (status, _) = send(app(), "GET", "/users", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
