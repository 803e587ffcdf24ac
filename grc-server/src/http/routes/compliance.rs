//! Compliance frameworks, business organizations and compliance assessments

use std::sync::Arc;

use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use grc_core::validation::{optional, required};
use grc_core::{AssessmentStatus, ComplianceStatus, OrganizationType, Policy, TShirtSize, ValidationError};
use serde::Deserialize;
use uuid::Uuid;

use super::{csv_error, read_upload};
use crate::db::repos::compliance::{
    AssessmentDetail, AssessmentFilter, ControlAssessmentInput, FrameworkDetail, OrganizationInput,
};
use crate::db::repos::{
    BusinessOrganization, ComplianceAssessment, ComplianceFramework, ComplianceRepo, ControlAssessment,
    MatrixRepo,
};
use crate::http::auth::CurrentUser;
use crate::http::error::ApiError;
use crate::http::extractors::{ValidUuid, ValidUuidPair};
use crate::http::server::AppState;
use crate::import;
use crate::models::input::{
    AssessmentHeaderRequest, FrameworkRequest, DESCRIPTION_MAX, LONG_TEXT_MAX, NAME_MAX, TITLE_MAX,
};
use crate::models::{ImportReport, Paginated, PaginationParams, Versioned};

#[derive(Debug, Default, Deserialize)]
pub struct ListOrganizationsQuery {
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListAssessmentsQuery {
    pub framework_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
    pub status: Option<AssessmentStatus>,
}

impl From<ListAssessmentsQuery> for AssessmentFilter {
    fn from(q: ListAssessmentsQuery) -> Self {
        Self {
            framework_id: q.framework_id,
            organization_id: q.organization_id,
            status: q.status,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OrganizationRequest {
    pub name: String,
    pub code: Option<String>,
    pub description: Option<String>,
    pub compliance_owner: Option<String>,
    pub organization_type: Option<OrganizationType>,
    pub is_active: bool,
}

impl Default for OrganizationRequest {
    fn default() -> Self {
        Self {
            name: String::new(),
            code: None,
            description: None,
            compliance_owner: None,
            organization_type: None,
            is_active: true,
        }
    }
}

impl OrganizationRequest {
    fn validate(self) -> Result<OrganizationInput, ValidationError> {
        Ok(OrganizationInput {
            name: required("name", &self.name, TITLE_MAX)?,
            code: optional("code", self.code.as_deref(), 20)?,
            description: optional("description", self.description.as_deref(), DESCRIPTION_MAX)?,
            compliance_owner: optional("compliance owner", self.compliance_owner.as_deref(), NAME_MAX)?,
            organization_type: self.organization_type.unwrap_or(OrganizationType::Other),
            is_active: self.is_active,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ControlAssessmentRequest {
    pub status: Option<ComplianceStatus>,
    pub evidence: Option<String>,
    pub gap_notes: Option<String>,
    pub ownership: Option<String>,
    pub projected_compliance_date: Option<DateTime<Utc>>,
    pub project_needed: bool,
    pub tshirt_size: Option<TShirtSize>,
    pub project_number: Option<String>,
}

impl ControlAssessmentRequest {
    fn validate(self) -> Result<ControlAssessmentInput, ValidationError> {
        Ok(ControlAssessmentInput {
            status: self.status.ok_or(ValidationError::Empty { field: "status" })?,
            evidence: optional("evidence", self.evidence.as_deref(), LONG_TEXT_MAX)?,
            gap_notes: optional("gap notes", self.gap_notes.as_deref(), LONG_TEXT_MAX)?,
            ownership: optional("ownership", self.ownership.as_deref(), NAME_MAX)?,
            projected_compliance_date: self.projected_compliance_date,
            project_needed: self.project_needed,
            tshirt_size: self.tshirt_size,
            project_number: optional("project number", self.project_number.as_deref(), 50)?,
        })
    }
}

// Frameworks

/// GET /compliance-frameworks
async fn list_frameworks(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<Vec<ComplianceFramework>>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(ComplianceRepo::new(&state.pool).frameworks().await?))
}

/// GET /compliance-frameworks/{id}
async fn get_framework(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<FrameworkDetail>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(ComplianceRepo::new(&state.pool).framework_detail(id).await?))
}

/// POST /compliance-frameworks
async fn create_framework(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<FrameworkRequest>,
) -> Result<(StatusCode, Json<ComplianceFramework>), ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let input = req.validate()?;
    let framework = ComplianceRepo::new(&state.pool)
        .create_framework(input, current.name())
        .await?;
    Ok((StatusCode::CREATED, Json(framework)))
}

/// PUT /compliance-frameworks/{id}
async fn update_framework(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<Versioned<FrameworkRequest>>,
) -> Result<Json<ComplianceFramework>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let input = req.body.validate()?;
    let framework = ComplianceRepo::new(&state.pool)
        .update_framework(id, req.row_version, input, current.name())
        .await?;
    Ok(Json(framework))
}

/// DELETE /compliance-frameworks/{id}
async fn delete_framework(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<StatusCode, ApiError> {
    current.require(Policy::RequireAdminRole)?;
    ComplianceRepo::new(&state.pool).delete_framework(id).await?;
    tracing::info!(%id, by = %current.name(), "compliance framework deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /compliance-frameworks/{id}/controls/import
async fn import_controls(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    multipart: Multipart,
) -> Result<Json<ImportReport>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let upload = read_upload(multipart).await?;
    let parsed = import::compliance_controls(&upload.bytes).map_err(csv_error)?;
    let mut report = ComplianceRepo::new(&state.pool)
        .import_controls(id, &parsed.rows)
        .await?;
    report.merge_skipped(parsed.skipped);
    Ok(Json(report))
}

// Organizations

/// GET /organizations
async fn list_organizations(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(query): Query<ListOrganizationsQuery>,
) -> Result<Json<Vec<BusinessOrganization>>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(
        ComplianceRepo::new(&state.pool)
            .organizations(query.active_only)
            .await?,
    ))
}

/// GET /organizations/{id}
async fn get_organization(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<BusinessOrganization>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(ComplianceRepo::new(&state.pool).organization(id).await?))
}

/// POST /organizations
async fn create_organization(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<OrganizationRequest>,
) -> Result<(StatusCode, Json<BusinessOrganization>), ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let input = req.validate()?;
    let org = ComplianceRepo::new(&state.pool)
        .create_organization(input, current.name())
        .await?;
    Ok((StatusCode::CREATED, Json(org)))
}

/// PUT /organizations/{id}
async fn update_organization(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<Versioned<OrganizationRequest>>,
) -> Result<Json<BusinessOrganization>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let input = req.body.validate()?;
    let org = ComplianceRepo::new(&state.pool)
        .update_organization(id, req.row_version, input, current.name())
        .await?;
    Ok(Json(org))
}

/// DELETE /organizations/{id}
async fn delete_organization(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<StatusCode, ApiError> {
    current.require(Policy::RequireAdminRole)?;
    ComplianceRepo::new(&state.pool).delete_organization(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Assessments

/// GET /compliance-assessments
async fn list_assessments(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(query): Query<ListAssessmentsQuery>,
    Query(page): Query<PaginationParams>,
) -> Result<Json<Paginated<ComplianceAssessment>>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    let filter = AssessmentFilter::from(query);
    let assessments = ComplianceRepo::new(&state.pool)
        .assessments(&filter, page.into())
        .await?;
    Ok(Json(assessments))
}

/// GET /compliance-assessments/{id}
async fn get_assessment(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<AssessmentDetail>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(ComplianceRepo::new(&state.pool).assessment_detail(id).await?))
}

/// POST /compliance-assessments
async fn create_assessment(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<AssessmentHeaderRequest>,
) -> Result<(StatusCode, Json<ComplianceAssessment>), ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let header = req.validate(current.name())?;
    let hours = MatrixRepo::new(&state.pool).default_sla().await?;
    let assessment = ComplianceRepo::new(&state.pool)
        .create_assessment(header, &hours, current.name())
        .await?;
    Ok((StatusCode::CREATED, Json(assessment)))
}

/// PUT /compliance-assessments/{id}
async fn update_assessment(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<Versioned<AssessmentHeaderRequest>>,
) -> Result<Json<ComplianceAssessment>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let header = req.body.validate(current.name())?;
    let assessment = ComplianceRepo::new(&state.pool)
        .update_assessment(id, req.row_version, header, current.name())
        .await?;
    Ok(Json(assessment))
}

/// DELETE /compliance-assessments/{id}
async fn delete_assessment(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<StatusCode, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    ComplianceRepo::new(&state.pool).delete_assessment(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /compliance-assessments/{id}/controls/{cid}
///
/// `cid` is the framework control id; the assessment's percentage is recomputed.
async fn update_control(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuidPair(id, cid): ValidUuidPair,
    Json(req): Json<ControlAssessmentRequest>,
) -> Result<Json<ControlAssessment>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let input = req.validate()?;
    let control = ComplianceRepo::new(&state.pool)
        .update_control(id, cid, input, current.name())
        .await?;
    Ok(Json(control))
}

/// POST /compliance-assessments/{id}/complete
async fn complete_assessment(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<ComplianceAssessment>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let hours = MatrixRepo::new(&state.pool).default_sla().await?;
    let assessment = ComplianceRepo::new(&state.pool)
        .complete_assessment(id, &hours, current.name())
        .await?;
    Ok(Json(assessment))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/compliance-frameworks", get(list_frameworks).post(create_framework))
        .route(
            "/compliance-frameworks/{id}",
            get(get_framework).put(update_framework).delete(delete_framework),
        )
        .route("/compliance-frameworks/{id}/controls/import", post(import_controls))
        .route("/organizations", get(list_organizations).post(create_organization))
        .route(
            "/organizations/{id}",
            get(get_organization)
                .put(update_organization)
                .delete(delete_organization),
        )
        .route("/compliance-assessments", get(list_assessments).post(create_assessment))
        .route(
            "/compliance-assessments/{id}",
            get(get_assessment).put(update_assessment).delete(delete_assessment),
        )
        .route("/compliance-assessments/{id}/controls/{cid}", put(update_control))
        .route("/compliance-assessments/{id}/complete", post(complete_assessment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::routes::test_support::{app, send};

    #[test]
    fn organization_defaults_active() {
        let req: OrganizationRequest = serde_json::from_str(r#"{"name": "Plant 4", "organization_type": "ot"}"#).unwrap();
        let input = req.validate().unwrap();
        assert!(input.is_active);
        assert_eq!(input.organization_type, OrganizationType::Ot);
    }

    #[test]
    fn control_update_needs_status() {
        let req = ControlAssessmentRequest::default();
        assert_eq!(req.validate().unwrap_err(), ValidationError::Empty { field: "status" });

        let req: ControlAssessmentRequest =
            serde_json::from_str(r#"{"status": "PartiallyCompliant", "tshirt_size": "M", "project_needed": true}"#)
                .unwrap();
        let input = req.validate().unwrap();
        assert_eq!(input.tshirt_size, Some(TShirtSize::M));
        assert!(input.project_needed);
    }

    #[tokio::test]
    async fn nested_control_path_requires_session() {
        let uri = format!(
            "/compliance-assessments/{}/controls/{}",
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        let (status, _) = send(app(), "PUT", &uri, Some("{}")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
