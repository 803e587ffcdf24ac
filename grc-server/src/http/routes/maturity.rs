//! Maturity frameworks and assessments

use std::sync::Arc;

use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use grc_core::validation::optional;
use grc_core::{AssessmentStatus, MaturityLevel, Policy, ValidationError};
use serde::Deserialize;
use uuid::Uuid;

use super::{csv_error, read_upload};
use crate::db::repos::compliance::AssessmentFilter;
use crate::db::repos::maturity::{
    MaturityAssessmentDetail, MaturityControlUpdate, MaturityFrameworkDetail, MaturityScores,
};
use crate::db::repos::{
    MatrixRepo, MaturityAssessment, MaturityControlAssessment, MaturityFramework, MaturityRepo,
};
use crate::http::auth::CurrentUser;
use crate::http::error::ApiError;
use crate::http::extractors::{ValidUuid, ValidUuidPair};
use crate::http::server::AppState;
use crate::import;
use crate::models::input::{AssessmentHeaderRequest, FrameworkRequest, LONG_TEXT_MAX};
use crate::models::{ImportReport, Paginated, PaginationParams, Versioned};

#[derive(Debug, Default, Deserialize)]
pub struct ListAssessmentsQuery {
    pub framework_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
    pub status: Option<AssessmentStatus>,
}

/// A maturity level given either by name ("Defined") or by value (3).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum LevelInput {
    Value(u8),
    Name(MaturityLevel),
}

impl LevelInput {
    fn resolve(self, field: &'static str) -> Result<MaturityLevel, ValidationError> {
        match self {
            Self::Name(level) => Ok(level),
            Self::Value(v) => MaturityLevel::from_value(v).ok_or(ValidationError::OutOfRange {
                field,
                reason: "must be between 0 and 4".into(),
            }),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ControlUpdateRequest {
    pub current_level: Option<LevelInput>,
    pub target_level: Option<LevelInput>,
    pub evidence: Option<String>,
    pub comments: Option<String>,
}

impl ControlUpdateRequest {
    /// The target defaults to the current level.
    fn validate(self) -> Result<MaturityControlUpdate, ValidationError> {
        let current = self
            .current_level
            .ok_or(ValidationError::Empty { field: "current level" })?
            .resolve("current level")?;
        let target = match self.target_level {
            Some(t) => t.resolve("target level")?,
            None => current,
        };
        Ok(MaturityControlUpdate {
            current_level: current,
            target_level: target,
            evidence: optional("evidence", self.evidence.as_deref(), LONG_TEXT_MAX)?,
            comments: optional("comments", self.comments.as_deref(), LONG_TEXT_MAX)?,
        })
    }
}

/// GET /maturity-frameworks
async fn list_frameworks(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<Vec<MaturityFramework>>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(MaturityRepo::new(&state.pool).frameworks().await?))
}

/// GET /maturity-frameworks/{id}
async fn get_framework(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<MaturityFrameworkDetail>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(MaturityRepo::new(&state.pool).framework_detail(id).await?))
}

/// POST /maturity-frameworks
async fn create_framework(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<FrameworkRequest>,
) -> Result<(StatusCode, Json<MaturityFramework>), ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let input = req.validate()?;
    let framework = MaturityRepo::new(&state.pool)
        .create_framework(input, current.name())
        .await?;
    Ok((StatusCode::CREATED, Json(framework)))
}

/// PUT /maturity-frameworks/{id}
async fn update_framework(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<Versioned<FrameworkRequest>>,
) -> Result<Json<MaturityFramework>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let input = req.body.validate()?;
    let framework = MaturityRepo::new(&state.pool)
        .update_framework(id, req.row_version, input, current.name())
        .await?;
    Ok(Json(framework))
}

/// DELETE /maturity-frameworks/{id}
async fn delete_framework(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<StatusCode, ApiError> {
    current.require(Policy::RequireAdminRole)?;
    MaturityRepo::new(&state.pool).delete_framework(id).await?;
    tracing::info!(%id, by = %current.name(), "maturity framework deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /maturity-frameworks/{id}/controls/import
async fn import_controls(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    multipart: Multipart,
) -> Result<Json<ImportReport>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let upload = read_upload(multipart).await?;
    let parsed = import::maturity_controls(&upload.bytes).map_err(csv_error)?;
    let mut report = MaturityRepo::new(&state.pool)
        .import_controls(id, &parsed.rows)
        .await?;
    report.merge_skipped(parsed.skipped);
    Ok(Json(report))
}

/// GET /maturity-assessments
async fn list_assessments(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(query): Query<ListAssessmentsQuery>,
    Query(page): Query<PaginationParams>,
) -> Result<Json<Paginated<MaturityAssessment>>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    let filter = AssessmentFilter {
        framework_id: query.framework_id,
        organization_id: query.organization_id,
        status: query.status,
    };
    let assessments = MaturityRepo::new(&state.pool)
        .assessments(&filter, page.into())
        .await?;
    Ok(Json(assessments))
}

/// GET /maturity-assessments/{id}
async fn get_assessment(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<MaturityAssessmentDetail>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(MaturityRepo::new(&state.pool).assessment_detail(id).await?))
}

/// POST /maturity-assessments
async fn create_assessment(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<AssessmentHeaderRequest>,
) -> Result<(StatusCode, Json<MaturityAssessment>), ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let header = req.validate(current.name())?;
    let hours = MatrixRepo::new(&state.pool).default_sla().await?;
    let assessment = MaturityRepo::new(&state.pool)
        .create_assessment(header, &hours, current.name())
        .await?;
    Ok((StatusCode::CREATED, Json(assessment)))
}

/// PUT /maturity-assessments/{id}
async fn update_assessment(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<Versioned<AssessmentHeaderRequest>>,
) -> Result<Json<MaturityAssessment>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let header = req.body.validate(current.name())?;
    let assessment = MaturityRepo::new(&state.pool)
        .update_assessment(id, req.row_version, header, current.name())
        .await?;
    Ok(Json(assessment))
}

/// DELETE /maturity-assessments/{id}
async fn delete_assessment(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<StatusCode, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    MaturityRepo::new(&state.pool).delete_assessment(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /maturity-assessments/{id}/controls/{cid}
async fn update_control(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuidPair(id, cid): ValidUuidPair,
    Json(req): Json<ControlUpdateRequest>,
) -> Result<Json<MaturityControlAssessment>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let update = req.validate()?;
    let control = MaturityRepo::new(&state.pool)
        .update_control(id, cid, update, current.name())
        .await?;
    Ok(Json(control))
}

/// GET /maturity-assessments/{id}/scores
async fn scores(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<MaturityScores>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(MaturityRepo::new(&state.pool).scores(id).await?))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/maturity-frameworks", get(list_frameworks).post(create_framework))
        .route(
            "/maturity-frameworks/{id}",
            get(get_framework).put(update_framework).delete(delete_framework),
        )
        .route("/maturity-frameworks/{id}/controls/import", post(import_controls))
        .route("/maturity-assessments", get(list_assessments).post(create_assessment))
        .route(
            "/maturity-assessments/{id}",
            get(get_assessment).put(update_assessment).delete(delete_assessment),
        )
        .route("/maturity-assessments/{id}/controls/{cid}", put(update_control))
        .route("/maturity-assessments/{id}/scores", get(scores))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::routes::test_support::{app, send};

    #[test]
    fn levels_by_name_or_value() {
        let req: ControlUpdateRequest =
            serde_json::from_str(r#"{"current_level": 2, "target_level": "managed"}"#).unwrap();
        let update = req.validate().unwrap();
        assert_eq!(update.current_level, MaturityLevel::Developing);
        assert_eq!(update.target_level, MaturityLevel::Managed);
    }

    #[test]
    fn target_defaults_to_current_and_range_is_checked() {
        let req: ControlUpdateRequest = serde_json::from_str(r#"{"current_level": 1}"#).unwrap();
        assert_eq!(req.validate().unwrap().target_level, MaturityLevel::Initial);

        let req: ControlUpdateRequest = serde_json::from_str(r#"{"current_level": 7}"#).unwrap();
        assert!(matches!(req.validate(), Err(ValidationError::OutOfRange { .. })));
    }

    #[tokio::test]
    async fn scores_require_session() {
        let uri = format!("/maturity-assessments/{}/scores", Uuid::new_v4());
        let (status, _) = send(app(), "GET", &uri, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
