//! Backup, upload and restore (administrators only)

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use grc_core::validation::optional;
use grc_core::Policy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::read_upload;
use crate::backup::progress::{registry, RestoreProgress};
use crate::backup::{BackupInfo, BackupResult, BackupType};
use crate::http::auth::CurrentUser;
use crate::http::error::ApiError;
use crate::http::extractors::ValidUuid;
use crate::http::server::AppState;
use crate::models::input::{DESCRIPTION_MAX, NAME_MAX};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateBackupRequest {
    pub name: String,
    pub description: Option<String>,
    pub backup_type: BackupType,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CleanupRequest {
    pub keep_days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub removed: usize,
}

#[derive(Debug, Serialize)]
pub struct TotalSize {
    pub total_bytes: u64,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct RestoreStarted {
    pub progress_id: Uuid,
}

/// GET /backups
async fn list(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<Vec<BackupInfo>>, ApiError> {
    current.require(Policy::RequireAdminRole)?;
    Ok(Json(state.backups.list().await?))
}

/// POST /backups
async fn create(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<CreateBackupRequest>,
) -> Result<(StatusCode, Json<BackupResult>), ApiError> {
    current.require(Policy::RequireAdminRole)?;
    let name = optional("name", Some(req.name.as_str()), NAME_MAX)?.unwrap_or_else(|| "backup".to_string());
    let description = optional("description", req.description.as_deref(), DESCRIPTION_MAX)?;
    let result = state
        .backups
        .create(&name, description, req.backup_type, current.name())
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// GET /backups/total-size
async fn total_size(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<TotalSize>, ApiError> {
    current.require(Policy::RequireAdminRole)?;
    let total_bytes = state.backups.total_size().await?;
    let count = state.backups.list().await?.len();
    Ok(Json(TotalSize { total_bytes, count }))
}

/// POST /backups/cleanup?keep_days=N
async fn cleanup(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(req): Query<CleanupRequest>,
) -> Result<Json<CleanupResponse>, ApiError> {
    current.require(Policy::RequireAdminRole)?;
    let removed = state.backups.cleanup(req.keep_days).await?;
    Ok(Json(CleanupResponse { removed }))
}

/// POST /backups/upload
async fn upload(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    multipart: Multipart,
) -> Result<(StatusCode, Json<BackupInfo>), ApiError> {
    current.require(Policy::RequireAdminRole)?;
    let file = read_upload(multipart).await?;
    let info = state.backups.save_upload(&file.file_name, &file.bytes).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

/// GET /backups/progress/{id}
async fn progress(
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<RestoreProgress>, ApiError> {
    current.require(Policy::RequireAdminRole)?;
    registry()
        .get(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound {
            resource: "restore progress",
            id: id.to_string(),
        })
}

/// GET /backups/{file_name}
async fn download(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(file_name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    current.require(Policy::RequireAdminRole)?;
    let bytes = state.backups.read(&file_name).await?;
    let disposition = format!("attachment; filename=\"{}\"", file_name);
    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}

/// DELETE /backups/{file_name}
async fn remove(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(file_name): Path<String>,
) -> Result<StatusCode, ApiError> {
    current.require(Policy::RequireAdminRole)?;
    state.backups.delete(&file_name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /backups/{file_name}/validate
async fn validate(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(file_name): Path<String>,
) -> Result<Json<BackupResult>, ApiError> {
    current.require(Policy::RequireAdminRole)?;
    Ok(Json(state.backups.validate(&file_name).await?))
}

/// POST /backups/{file_name}/restore
async fn restore(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(file_name): Path<String>,
) -> Result<(StatusCode, Json<RestoreStarted>), ApiError> {
    current.require(Policy::RequireAdminRole)?;
    let progress_id = state.backups.start_restore(&file_name).await?;
    tracing::info!(file = %file_name, %progress_id, by = %current.name(), "restore requested");
    Ok((StatusCode::ACCEPTED, Json(RestoreStarted { progress_id })))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/backups", get(list).post(create))
        .route("/backups/total-size", get(total_size))
        .route("/backups/cleanup", post(cleanup))
        .route("/backups/upload", post(upload))
        .route("/backups/progress/{id}", get(progress))
        .route("/backups/{file_name}", get(download).delete(remove))
        .route("/backups/{file_name}/validate", post(validate))
        .route("/backups/{file_name}/restore", post(restore))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::routes::test_support::{app, send};

    #[test]
    fn create_request_defaults_to_database_only() {
        let req: CreateBackupRequest = serde_json::from_str(r#"{"name": "nightly"}"#).unwrap();
        assert_eq!(req.backup_type, BackupType::DatabaseOnly);
        assert_eq!(req.description, None);
    }

    #[tokio::test]
    async fn backup_routes_require_session() {
        let (status, _) = send(app(), "GET", "/backups", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let uri = format!("/backups/progress/{}", Uuid::new_v4());
        let (status, _) = send(app(), "GET", &uri, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
