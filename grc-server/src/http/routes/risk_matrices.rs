//! Risk matrix endpoints
//!
//! Reads are open to every role; all writes are Admin only.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use grc_core::matrix::{self, CellSpec, LevelSpec, MatrixThresholds, RiskCalculation};
use grc_core::sla::SlaHours;
use grc_core::validation::{optional, required};
use grc_core::{MatrixType, Policy, RiskLevel, ValidationError};
use serde::{Deserialize, Serialize};

use crate::db::repos::matrices::{MatrixDetail, MatrixInput};
use crate::db::repos::{MatrixRepo, RiskMatrix};
use crate::http::auth::CurrentUser;
use crate::http::error::ApiError;
use crate::http::extractors::ValidUuid;
use crate::http::server::AppState;
use crate::models::input::{DESCRIPTION_MAX, NAME_MAX};
use crate::models::Versioned;

#[derive(Debug, Default, Deserialize)]
pub struct ListMatricesQuery {
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct MatrixRequest {
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
    pub matrix_size: i32,
    pub matrix_type: MatrixType,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
    #[serde(default)]
    pub thresholds: MatrixThresholds,
    #[serde(default)]
    pub sla: SlaHours,
    #[serde(default)]
    pub levels: Vec<LevelSpec>,
}

fn active_by_default() -> bool {
    true
}

fn validate_thresholds(t: &MatrixThresholds) -> Result<(), ValidationError> {
    if t.critical > t.high && t.high > t.medium && t.medium > 0.0 && t.risk_appetite >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field: "thresholds",
            reason: "must satisfy critical > high > medium > 0".into(),
        })
    }
}

impl MatrixRequest {
    pub fn validate(self) -> Result<MatrixInput, ValidationError> {
        matrix::validate_levels(self.matrix_size, self.matrix_type, &self.levels)?;
        validate_thresholds(&self.thresholds)?;
        if !self.sla.is_valid() {
            return Err(ValidationError::OutOfRange {
                field: "sla hours",
                reason: "must all be positive".into(),
            });
        }
        Ok(MatrixInput {
            name: required("name", &self.name, NAME_MAX)?,
            description: optional("description", self.description.as_deref(), DESCRIPTION_MAX)?,
            matrix_size: self.matrix_size,
            matrix_type: self.matrix_type,
            is_default: self.is_default,
            is_active: self.is_active,
            thresholds: self.thresholds,
            sla: self.sla,
            levels: self.levels,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CalculateRequest {
    pub impact: Option<f64>,
    pub likelihood: Option<f64>,
    pub exposure: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub impact: i32,
    pub likelihood: i32,
    pub exposure: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct LookupResponse {
    pub risk_level: RiskLevel,
    pub score: f64,
    pub color: &'static str,
}

#[derive(Debug, Serialize)]
pub struct SeedResponse {
    pub created: Vec<String>,
}

/// GET /risk-matrices
async fn list_matrices(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(query): Query<ListMatricesQuery>,
) -> Result<Json<Vec<RiskMatrix>>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(MatrixRepo::new(&state.pool).list(query.active_only).await?))
}

/// GET /risk-matrices/default
async fn default_matrix(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<MatrixDetail>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    let repo = MatrixRepo::new(&state.pool);
    let matrix = repo
        .default_matrix()
        .await?
        .ok_or(ApiError::NotFound {
            resource: "risk matrix",
            id: "default".into(),
        })?;
    Ok(Json(repo.detail(matrix.id).await?))
}

/// GET /risk-matrices/{id}
async fn get_matrix(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<MatrixDetail>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(MatrixRepo::new(&state.pool).detail(id).await?))
}

/// POST /risk-matrices
async fn create_matrix(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<MatrixRequest>,
) -> Result<(StatusCode, Json<MatrixDetail>), ApiError> {
    current.require(Policy::RequireAdminRole)?;
    let input = req.validate()?;
    let detail = MatrixRepo::new(&state.pool).create(input, current.name()).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// PUT /risk-matrices/{id}
async fn update_matrix(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<Versioned<MatrixRequest>>,
) -> Result<Json<MatrixDetail>, ApiError> {
    current.require(Policy::RequireAdminRole)?;
    let input = req.body.validate()?;
    let detail = MatrixRepo::new(&state.pool)
        .update(id, req.row_version, input, current.name())
        .await?;
    Ok(Json(detail))
}

/// DELETE /risk-matrices/{id}
async fn delete_matrix(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<StatusCode, ApiError> {
    current.require(Policy::RequireAdminRole)?;
    MatrixRepo::new(&state.pool).delete(id).await?;
    tracing::info!(%id, by = %current.name(), "risk matrix deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /risk-matrices/{id}/set-default
async fn set_default(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<RiskMatrix>, ApiError> {
    current.require(Policy::RequireAdminRole)?;
    Ok(Json(MatrixRepo::new(&state.pool).set_default(id, current.name()).await?))
}

/// POST /risk-matrices/{id}/regenerate-cells
async fn regenerate_cells(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<MatrixDetail>, ApiError> {
    current.require(Policy::RequireAdminRole)?;
    Ok(Json(MatrixRepo::new(&state.pool).regenerate_cells(id).await?))
}

/// POST /risk-matrices/{id}/calculate
async fn calculate(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<CalculateRequest>,
) -> Result<Json<RiskCalculation>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    let m = MatrixRepo::new(&state.pool).get(id).await?;
    let result = matrix::calculate_risk(
        m.matrix_type,
        req.impact,
        req.likelihood,
        req.exposure,
        &m.thresholds(),
    )?;
    Ok(Json(result))
}

/// GET /risk-matrices/{id}/lookup
async fn lookup(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Query(query): Query<LookupQuery>,
) -> Result<Json<LookupResponse>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    let detail = MatrixRepo::new(&state.pool).detail(id).await?;
    let cells: Vec<CellSpec> = detail.cells.iter().map(CellSpec::from).collect();
    let (risk_level, score) = matrix::lookup(&cells, query.impact, query.likelihood, query.exposure);
    Ok(Json(LookupResponse {
        risk_level,
        score,
        color: risk_level.color(),
    }))
}

/// POST /risk-matrices/seed
async fn seed(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<SeedResponse>, ApiError> {
    current.require(Policy::RequireAdminRole)?;
    let created = MatrixRepo::new(&state.pool)
        .seed(matrix::default_seeds(), current.name())
        .await?;
    tracing::info!(count = created.len(), "risk matrices seeded");
    Ok(Json(SeedResponse { created }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/risk-matrices", get(list_matrices).post(create_matrix))
        .route("/risk-matrices/default", get(default_matrix))
        .route("/risk-matrices/seed", post(seed))
        .route(
            "/risk-matrices/{id}",
            get(get_matrix).put(update_matrix).delete(delete_matrix),
        )
        .route("/risk-matrices/{id}/set-default", post(set_default))
        .route("/risk-matrices/{id}/regenerate-cells", post(regenerate_cells))
        .route("/risk-matrices/{id}/calculate", post(calculate))
        .route("/risk-matrices/{id}/lookup", get(lookup))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::routes::test_support::{app, send};
    use grc_core::LevelType;

    fn levels(size: i32, types: &[LevelType]) -> Vec<LevelSpec> {
        types
            .iter()
            .flat_map(|t| {
                (1..=size).map(move |v| LevelSpec {
                    level_type: *t,
                    level_value: v,
                    name: format!("{} {}", t, v),
                    description: String::new(),
                    color: "#ffffff".into(),
                    multiplier: None,
                })
            })
            .collect()
    }

    fn request(matrix_type: MatrixType, levels: Vec<LevelSpec>) -> MatrixRequest {
        MatrixRequest {
            name: "Board 3x3".into(),
            description: None,
            matrix_size: 3,
            matrix_type,
            is_default: false,
            is_active: true,
            thresholds: MatrixThresholds::default(),
            sla: SlaHours::default(),
            levels,
        }
    }

    #[test]
    fn level_counts_must_match_size() {
        let ok = request(
            MatrixType::ImpactLikelihood,
            levels(3, &[LevelType::Impact, LevelType::Likelihood]),
        );
        assert!(ok.validate().is_ok());

        let missing_exposure = request(
            MatrixType::ImpactLikelihoodExposure,
            levels(3, &[LevelType::Impact, LevelType::Likelihood]),
        );
        assert!(missing_exposure.validate().is_err());
    }

    #[test]
    fn thresholds_must_descend() {
        let mut req = request(
            MatrixType::ImpactLikelihood,
            levels(3, &[LevelType::Impact, LevelType::Likelihood]),
        );
        req.thresholds.high = 20.0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn body_defaults() {
        let req: MatrixRequest =
            serde_json::from_str(r#"{"name": "m", "matrix_size": 3, "matrix_type": "ImpactLikelihood"}"#)
                .unwrap();
        assert!(req.is_active);
        assert_eq!(req.sla, SlaHours::default());
    }

    #[tokio::test]
    async fn seed_requires_session() {
        let (status, _) = send(app(), "POST", "/risk-matrices/seed", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
