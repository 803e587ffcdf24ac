//! API error types with IntoResponse
//!
//! Errors are converted to `{"error", "message"}` JSON bodies with matching
//! status codes. Database and internal failures are logged and answered with
//! a generic message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use grc_core::backlog::TransitionError;
use grc_core::requests::RequestError;
use grc_core::ValidationError;
use serde_json::json;

use crate::backup::BackupError;
use crate::db::repos::backlog::BacklogError;
use crate::db::repos::requests::RequestRepoError;
use crate::db::repos::DbError;

/// API error type with automatic HTTP status mapping
#[derive(Debug)]
pub enum ApiError {
    /// Validation failed (400)
    Validation(ValidationError),

    /// Malformed request that is not a field validation, e.g. a bad upload (400)
    BadRequest { message: String },

    /// Missing, expired or unknown session (401)
    Unauthorized,

    /// Authenticated but not permitted (403)
    Forbidden { reason: String },

    /// Resource not found (404)
    NotFound { resource: &'static str, id: String },

    /// Duplicate or stale row version (409)
    Conflict { message: String },

    /// Workflow command not allowed from the current state (422)
    Transition { message: String },

    /// Database error (500, logged)
    Database(DbError),

    /// Internal error (500, logged)
    Internal { message: String },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::Validation(e) => (StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
            Self::BadRequest { message } => (StatusCode::BAD_REQUEST, "bad_request", message),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing or invalid session".to_string(),
            ),
            Self::Forbidden { reason } => (StatusCode::FORBIDDEN, "forbidden", reason),
            Self::NotFound { resource, id } => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("{} '{}' not found", resource, id),
            ),
            Self::Conflict { message } => (StatusCode::CONFLICT, "conflict", message),
            Self::Transition { message } => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_transition", message),
            Self::Database(e) => {
                tracing::error!(error = %e, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "an internal error occurred".to_string(),
                )
            }
            Self::Internal { message } => {
                tracing::error!(%message, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "an internal error occurred".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<TransitionError> for ApiError {
    fn from(e: TransitionError) -> Self {
        Self::Transition {
            message: e.to_string(),
        }
    }
}

impl From<RequestError> for ApiError {
    fn from(e: RequestError) -> Self {
        Self::Transition {
            message: e.to_string(),
        }
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound { resource, id } => Self::NotFound { resource, id },
            DbError::Conflict { .. } | DbError::Duplicate { .. } => Self::conflict(e.to_string()),
            DbError::Sqlx(_) => Self::Database(e),
        }
    }
}

impl From<BacklogError> for ApiError {
    fn from(e: BacklogError) -> Self {
        match e {
            BacklogError::Db(db) => db.into(),
            BacklogError::Transition(t) => t.into(),
            BacklogError::Forbidden { .. } => Self::forbidden(e.to_string()),
            BacklogError::Validation(v) => v.into(),
        }
    }
}

impl From<RequestRepoError> for ApiError {
    fn from(e: RequestRepoError) -> Self {
        match e {
            RequestRepoError::Db(db) => db.into(),
            RequestRepoError::Transition(t) => t.into(),
            RequestRepoError::Forbidden { .. } => Self::forbidden(e.to_string()),
        }
    }
}

impl From<BackupError> for ApiError {
    fn from(e: BackupError) -> Self {
        match e {
            BackupError::InvalidName(_) | BackupError::InvalidFile(_) => Self::bad_request(e.to_string()),
            BackupError::NotFound(name) => Self::NotFound {
                resource: "backup",
                id: name,
            },
            BackupError::Conflict(message) => Self::conflict(message),
            BackupError::Db(db) => Self::Database(DbError::Sqlx(db)),
            BackupError::Io(_) | BackupError::Json(_) => Self::internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use grc_core::backlog::BacklogStatus;

    async fn body_of(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), 1024 * 64).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn validation_error_is_400() {
        let err = ApiError::Validation(ValidationError::Empty { field: "title" });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_of(response).await;
        assert_eq!(body["error"], "validation_error");
        assert_eq!(body["message"], "title cannot be empty");
    }

    #[tokio::test]
    async fn duplicate_and_stale_are_409() {
        let dup: ApiError = DbError::Duplicate {
            resource: "reference data",
            value: "Finance".into(),
        }
        .into();
        assert_eq!(dup.into_response().status(), StatusCode::CONFLICT);

        let stale: ApiError = DbError::conflict("risk", "record was modified").into();
        assert_eq!(stale.into_response().status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn not_found_is_404() {
        let err: ApiError = DbError::not_found("finding", "abc").into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn illegal_transition_is_422() {
        let err: ApiError = BacklogError::Transition(TransitionError::NotAllowed {
            action: "manager-approve",
            from: BacklogStatus::Unassigned,
        })
        .into();
        assert_eq!(err.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn request_transition_is_422() {
        let err: ApiError = RequestRepoError::Transition(RequestError::NotAllowed {
            action: "approve",
            kind: "finding closure request",
            from: grc_core::requests::RequestStatus::Completed,
        })
        .into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_of(response).await;
        assert_eq!(
            body["message"],
            "cannot approve a finding closure request in status Completed"
        );
    }

    #[tokio::test]
    async fn backlog_forbidden_is_403() {
        let err: ApiError = BacklogError::Forbidden {
            user: "it@example.com".into(),
            action: "escalate",
        }
        .into();
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn internal_hides_details() {
        let err = ApiError::internal("disk on fire");
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_of(response).await;
        assert_eq!(body["message"], "an internal error occurred");
    }
}
