//! Finding endpoints

use std::sync::Arc;

use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use grc_core::{FindingStatus, Policy, RiskLevel};
use serde::Deserialize;

use super::{csv_error, read_upload};
use crate::db::repos::findings::FindingFilter;
use crate::db::repos::{Finding, FindingRepo, MatrixRepo};
use crate::http::auth::CurrentUser;
use crate::http::error::ApiError;
use crate::http::extractors::ValidUuid;
use crate::http::server::AppState;
use crate::import;
use crate::models::input::{ExpectedVersion, FindingRequest};
use crate::models::{ImportReport, Paginated, PaginationParams, Versioned};

#[derive(Debug, Default, Deserialize)]
pub struct ListFindingsQuery {
    pub status: Option<FindingStatus>,
    pub rating: Option<RiskLevel>,
    pub overdue: Option<bool>,
    pub search: Option<String>,
}

impl ListFindingsQuery {
    fn filter(&self) -> FindingFilter {
        FindingFilter {
            status: self.status,
            rating: self.rating,
            overdue: self.overdue,
            search: self
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned),
        }
    }
}

/// GET /findings
async fn list_findings(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(query): Query<ListFindingsQuery>,
    Query(page): Query<PaginationParams>,
) -> Result<Json<Paginated<Finding>>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    let filter = query.filter();
    let findings = FindingRepo::new(&state.pool)
        .list(&filter, page.into())
        .await?;
    Ok(Json(findings))
}

/// GET /findings/{id}
async fn get_finding(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<Finding>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(FindingRepo::new(&state.pool).get(id).await?))
}

/// POST /findings
async fn create_finding(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<FindingRequest>,
) -> Result<(StatusCode, Json<Finding>), ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let input = req.validate()?;
    let sla = MatrixRepo::new(&state.pool).default_sla().await?;
    let finding = FindingRepo::new(&state.pool)
        .create(input, &sla, current.name())
        .await?;
    Ok((StatusCode::CREATED, Json(finding)))
}

/// PUT /findings/{id}
async fn update_finding(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<Versioned<FindingRequest>>,
) -> Result<Json<Finding>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let input = req.body.validate()?;
    let finding = FindingRepo::new(&state.pool)
        .update(id, req.row_version, input, current.name())
        .await?;
    Ok(Json(finding))
}

/// POST /findings/{id}/close
async fn close_finding(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Query(expected): Query<ExpectedVersion>,
) -> Result<Json<Finding>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let finding = FindingRepo::new(&state.pool)
        .set_status(id, FindingStatus::Closed, expected.row_version, current.name())
        .await?;
    Ok(Json(finding))
}

/// DELETE /findings/{id}
async fn delete_finding(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<StatusCode, ApiError> {
    current.require(Policy::RequireAdminRole)?;
    FindingRepo::new(&state.pool).delete(id).await?;
    tracing::info!(%id, by = %current.name(), "finding deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /findings/import
///
/// Creates every valid row; rows that fail validation or insertion are
/// reported by row number and never abort the batch.
async fn import_findings(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    multipart: Multipart,
) -> Result<Json<ImportReport>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let upload = read_upload(multipart).await?;
    let parsed = import::findings(&upload.bytes).map_err(csv_error)?;

    let sla = MatrixRepo::new(&state.pool).default_sla().await?;
    let repo = FindingRepo::new(&state.pool);
    let mut report = ImportReport::default();
    for (row, input) in parsed.rows {
        match repo.create(input, &sla, current.name()).await {
            Ok(_) => report.created += 1,
            Err(e) => report.skip(row, e.to_string()),
        }
    }
    report.merge_skipped(parsed.skipped);
    tracing::info!(
        file = %upload.file_name,
        created = report.created,
        skipped = report.skipped.len(),
        "findings imported"
    );
    Ok(Json(report))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/findings", get(list_findings).post(create_finding))
        .route("/findings/import", post(import_findings))
        .route(
            "/findings/{id}",
            get(get_finding).put(update_finding).delete(delete_finding),
        )
        .route("/findings/{id}/close", post(close_finding))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::routes::test_support::{app, send};

    #[test]
    fn blank_search_is_dropped() {
        let query: ListFindingsQuery =
            serde_json::from_str(r#"{"search": "  ", "status": "open", "overdue": true}"#).unwrap();
        let filter = query.filter();
        assert_eq!(filter.search, None);
        assert_eq!(filter.status, Some(FindingStatus::Open));
        assert_eq!(filter.overdue, Some(true));
    }

    #[tokio::test]
    async fn writes_require_session() {
        let (status, _) = send(app(), "POST", "/findings", Some("{}")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(app(), "DELETE", &format!("/findings/{}", uuid::Uuid::new_v4()), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
