//! Risk register endpoints

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use grc_core::{Policy, RiskLevel, RiskStatus};
use serde::Deserialize;
use uuid::Uuid;

use crate::db::repos::risks::{RiskFilter, RiskSummary};
use crate::db::repos::{MatrixRepo, Risk, RiskRepo};
use crate::http::auth::CurrentUser;
use crate::http::error::ApiError;
use crate::http::extractors::ValidUuid;
use crate::http::server::AppState;
use crate::models::input::{ExpectedVersion, RiskRequest};
use crate::models::{Paginated, PaginationParams, Versioned};

#[derive(Debug, Default, Deserialize)]
pub struct ListRisksQuery {
    pub status: Option<RiskStatus>,
    pub level: Option<RiskLevel>,
    pub risk_assessment_id: Option<Uuid>,
    pub finding_id: Option<Uuid>,
}

/// GET /risks
async fn list_risks(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(query): Query<ListRisksQuery>,
    Query(page): Query<PaginationParams>,
) -> Result<Json<Paginated<Risk>>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    let filter = RiskFilter {
        status: query.status,
        level: query.level,
        risk_assessment_id: query.risk_assessment_id,
        finding_id: query.finding_id,
    };
    let risks = RiskRepo::new(&state.pool)
        .list(&filter, page.into())
        .await?;
    Ok(Json(risks))
}

/// GET /risks/summary
async fn summary(State(state): State<Arc<AppState>>, current: CurrentUser) -> Result<Json<RiskSummary>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(RiskRepo::new(&state.pool).summary().await?))
}

/// GET /risks/{id}
async fn get_risk(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<Risk>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(RiskRepo::new(&state.pool).get(id).await?))
}

/// POST /risks
async fn create_risk(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<RiskRequest>,
) -> Result<(StatusCode, Json<Risk>), ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let input = req.validate()?;
    let risk = RiskRepo::new(&state.pool).create(input, current.name()).await?;
    Ok((StatusCode::CREATED, Json(risk)))
}

/// PUT /risks/{id}
async fn update_risk(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<Versioned<RiskRequest>>,
) -> Result<Json<Risk>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let input = req.body.validate()?;
    let risk = RiskRepo::new(&state.pool)
        .update(id, req.row_version, input, current.name())
        .await?;
    Ok(Json(risk))
}

/// DELETE /risks/{id}
async fn delete_risk(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<StatusCode, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    RiskRepo::new(&state.pool).delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /risks/{id}/accept
///
/// The next review is due after the default matrix's review window for the risk's level.
async fn accept_risk(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Query(expected): Query<ExpectedVersion>,
) -> Result<Json<Risk>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let hours = MatrixRepo::new(&state.pool).default_sla().await?;
    let risk = RiskRepo::new(&state.pool)
        .accept(id, expected.row_version, &hours, current.name())
        .await?;
    Ok(Json(risk))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/risks", get(list_risks).post(create_risk))
        .route("/risks/summary", get(summary))
        .route("/risks/{id}", get(get_risk).put(update_risk).delete(delete_risk))
        .route("/risks/{id}/accept", post(accept_risk))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::routes::test_support::{app, send};
    use grc_core::{ExposureLevel, ImpactLevel, LikelihoodLevel, TreatmentStrategy, ValidationError};

    fn request() -> RiskRequest {
        RiskRequest {
            title: "Ransomware on file servers".into(),
            impact: Some(ImpactLevel::Critical),
            likelihood: Some(LikelihoodLevel::Possible),
            exposure: Some(ExposureLevel::Exposed),
            inherent_risk_level: Some(RiskLevel::High),
            ..Default::default()
        }
    }

    #[test]
    fn residual_defaults_to_inherent() {
        let input = request().validate().unwrap();
        assert_eq!(input.residual_risk_level, RiskLevel::High);
        assert_eq!(input.status, RiskStatus::Open);
        assert_eq!(input.treatment, TreatmentStrategy::Mitigate);
    }

    #[test]
    fn negative_ale_rejected() {
        let mut req = request();
        req.ale = Some(-5.0);
        assert!(matches!(req.validate(), Err(ValidationError::OutOfRange { .. })));
    }

    #[tokio::test]
    async fn summary_requires_session() {
        let (status, _) = send(app(), "GET", "/risks/summary", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
