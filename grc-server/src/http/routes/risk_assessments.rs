//! Risk assessments, their threat scenarios, and the risk level settings

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use grc_core::monte_carlo::{self, SimulationInput, SimulationResult};
use grc_core::rating::RiskLevelSettings;
use grc_core::validation::{non_negative, optional, probability, required};
use grc_core::{
    AssessmentStatus, AssessmentType, CiaTriad, ExposureLevel, ImpactLevel, LikelihoodLevel, Policy,
    ValidationError,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::db::repos::assessments::{AssessmentInput, ScenarioInput};
use crate::db::repos::{MatrixRepo, RiskAssessment, RiskAssessmentRepo, SettingsRepo, ThreatScenario};
use crate::http::auth::CurrentUser;
use crate::http::error::ApiError;
use crate::http::extractors::{ValidUuid, ValidUuidPair};
use crate::http::server::AppState;
use crate::models::input::{DESCRIPTION_MAX, NAME_MAX, TITLE_MAX};
use crate::models::{Paginated, PaginationParams, Versioned};

const SCENARIO_DESCRIPTION_MAX: usize = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct ListAssessmentsQuery {
    pub status: Option<AssessmentStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AssessmentRequest {
    pub title: String,
    pub description: Option<String>,
    pub asset: Option<String>,
    pub business_unit: Option<String>,
    pub business_owner: Option<String>,
    pub technical_controls_in_place: Option<String>,
    pub threat_scenario: Option<String>,
    pub cia_triad: Option<CiaTriad>,
    pub risk_matrix_id: Option<Uuid>,
    pub status: Option<AssessmentStatus>,
    pub assessment_type: Option<AssessmentType>,
    pub assessor: Option<String>,
    pub finding_id: Option<Uuid>,
    pub tef_min: Option<f64>,
    pub tef_most_likely: Option<f64>,
    pub tef_max: Option<f64>,
    pub vulnerability: Option<f64>,
    pub primary_loss_magnitude: Option<f64>,
    pub secondary_loss_magnitude: Option<f64>,
    pub qualitative_likelihood: Option<LikelihoodLevel>,
    pub qualitative_impact: Option<ImpactLevel>,
    pub qualitative_exposure: Option<ExposureLevel>,
}

fn amount(field: &'static str, value: Option<f64>) -> Result<Option<f64>, ValidationError> {
    value.map(|v| non_negative(field, v)).transpose()
}

impl AssessmentRequest {
    /// The assessor defaults to the caller.
    fn validate(self, caller: &str) -> Result<AssessmentInput, ValidationError> {
        let assessor = match self.assessor.as_deref().map(str::trim) {
            None | Some("") => caller.to_owned(),
            Some(a) => required("assessor", a, NAME_MAX)?,
        };
        Ok(AssessmentInput {
            title: required("title", &self.title, TITLE_MAX)?,
            description: optional("description", self.description.as_deref(), DESCRIPTION_MAX)?,
            asset: optional("asset", self.asset.as_deref(), TITLE_MAX)?,
            business_unit: optional("business unit", self.business_unit.as_deref(), NAME_MAX)?,
            business_owner: optional("business owner", self.business_owner.as_deref(), NAME_MAX)?,
            technical_controls_in_place: optional(
                "technical controls in place",
                self.technical_controls_in_place.as_deref(),
                DESCRIPTION_MAX,
            )?,
            threat_scenario: optional("threat scenario", self.threat_scenario.as_deref(), DESCRIPTION_MAX)?,
            cia_triad: self.cia_triad,
            risk_matrix_id: self.risk_matrix_id,
            status: self.status.unwrap_or(AssessmentStatus::Draft),
            assessment_type: self.assessment_type.unwrap_or(AssessmentType::Qualitative),
            assessor,
            finding_id: self.finding_id,
            tef_min: amount("tef min", self.tef_min)?,
            tef_most_likely: amount("tef most likely", self.tef_most_likely)?,
            tef_max: amount("tef max", self.tef_max)?,
            vulnerability: self
                .vulnerability
                .map(|v| probability("vulnerability", v))
                .transpose()?,
            primary_loss_magnitude: amount("primary loss magnitude", self.primary_loss_magnitude)?,
            secondary_loss_magnitude: amount("secondary loss magnitude", self.secondary_loss_magnitude)?,
            qualitative_likelihood: self.qualitative_likelihood,
            qualitative_impact: self.qualitative_impact,
            qualitative_exposure: self.qualitative_exposure,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ScenarioRequest {
    pub description: String,
    pub likelihood: Option<f64>,
    pub impact: Option<f64>,
    pub exposure: Option<f64>,
}

impl ScenarioRequest {
    fn validate(self) -> Result<ScenarioInput, ValidationError> {
        Ok(ScenarioInput {
            description: required("description", &self.description, SCENARIO_DESCRIPTION_MAX)?,
            likelihood: amount("likelihood", self.likelihood)?,
            impact: amount("impact", self.impact)?,
            exposure: amount("exposure", self.exposure)?,
        })
    }
}

/// GET /risk-assessments
async fn list_assessments(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(query): Query<ListAssessmentsQuery>,
    Query(page): Query<PaginationParams>,
) -> Result<Json<Paginated<RiskAssessment>>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    let assessments = RiskAssessmentRepo::new(&state.pool)
        .list(query.status, page.into())
        .await?;
    Ok(Json(assessments))
}

/// GET /risk-assessments/{id}
async fn get_assessment(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<RiskAssessment>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(RiskAssessmentRepo::new(&state.pool).get(id).await?))
}

/// POST /risk-assessments
async fn create_assessment(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<AssessmentRequest>,
) -> Result<(StatusCode, Json<RiskAssessment>), ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let input = req.validate(current.name())?;
    let settings = SettingsRepo::new(&state.pool).active().await?;
    let assessment = RiskAssessmentRepo::new(&state.pool)
        .create(input, &settings, current.name())
        .await?;
    Ok((StatusCode::CREATED, Json(assessment)))
}

/// PUT /risk-assessments/{id}
async fn update_assessment(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<Versioned<AssessmentRequest>>,
) -> Result<Json<RiskAssessment>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let input = req.body.validate(current.name())?;
    let settings = SettingsRepo::new(&state.pool).active().await?;
    let assessment = RiskAssessmentRepo::new(&state.pool)
        .update(id, req.row_version, input, &settings, current.name())
        .await?;
    Ok(Json(assessment))
}

/// POST /risk-assessments/{id}/complete
async fn complete_assessment(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<RiskAssessment>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let hours = MatrixRepo::new(&state.pool).default_sla().await?;
    let assessment = RiskAssessmentRepo::new(&state.pool)
        .complete(id, &hours, current.name())
        .await?;
    Ok(Json(assessment))
}

/// DELETE /risk-assessments/{id}
async fn delete_assessment(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<StatusCode, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    RiskAssessmentRepo::new(&state.pool).delete(id).await?;
    tracing::info!(%id, by = %current.name(), "risk assessment deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /risk-assessments/{id}/scenarios
async fn list_scenarios(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<Vec<ThreatScenario>>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    let repo = RiskAssessmentRepo::new(&state.pool);
    repo.get(id).await?;
    Ok(Json(repo.scenarios(id).await?))
}

/// GET /risk-assessments/{id}/scenarios/{sid}
async fn get_scenario(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuidPair(id, sid): ValidUuidPair,
) -> Result<Json<ThreatScenario>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(RiskAssessmentRepo::new(&state.pool).scenario(id, sid).await?))
}

/// POST /risk-assessments/{id}/scenarios
async fn create_scenario(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<ScenarioRequest>,
) -> Result<(StatusCode, Json<ThreatScenario>), ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let input = req.validate()?;
    let settings = SettingsRepo::new(&state.pool).active().await?;
    let scenario = RiskAssessmentRepo::new(&state.pool)
        .create_scenario(id, input, &settings, current.name())
        .await?;
    Ok((StatusCode::CREATED, Json(scenario)))
}

/// PUT /risk-assessments/{id}/scenarios/{sid}
async fn update_scenario(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuidPair(id, sid): ValidUuidPair,
    Json(req): Json<Versioned<ScenarioRequest>>,
) -> Result<Json<ThreatScenario>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let input = req.body.validate()?;
    let settings = SettingsRepo::new(&state.pool).active().await?;
    let scenario = RiskAssessmentRepo::new(&state.pool)
        .update_scenario(id, sid, req.row_version, input, &settings, current.name())
        .await?;
    Ok(Json(scenario))
}

/// DELETE /risk-assessments/{id}/scenarios/{sid}
async fn delete_scenario(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuidPair(id, sid): ValidUuidPair,
) -> Result<StatusCode, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    RiskAssessmentRepo::new(&state.pool)
        .delete_scenario(id, sid)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /risk-level-settings
async fn get_settings(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<RiskLevelSettings>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(SettingsRepo::new(&state.pool).active().await?))
}

/// PUT /risk-level-settings
async fn save_settings(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(settings): Json<RiskLevelSettings>,
) -> Result<Json<RiskLevelSettings>, ApiError> {
    current.require(Policy::RequireAdminRole)?;
    settings.validate()?;
    let saved = SettingsRepo::new(&state.pool)
        .save(&settings, current.name())
        .await?;
    tracing::info!(by = %current.name(), "risk level settings updated");
    Ok(Json(saved))
}

/// POST /fair/simulate
///
/// Runs off the async runtime; a full run is up to 100k iterations.
async fn simulate(
    current: CurrentUser,
    Json(input): Json<SimulationInput>,
) -> Result<Json<SimulationResult>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    input.validate()?;
    let result = tokio::task::spawn_blocking(move || monte_carlo::simulate(&input, &mut rand::thread_rng()))
        .await
        .map_err(|e| ApiError::internal(format!("simulation task failed: {}", e)))??;
    tracing::debug!(
        iterations = result.iterations,
        mean_ale = result.mean_ale,
        by = %current.name(),
        "fair simulation run"
    );
    Ok(Json(result))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/fair/simulate", post(simulate))
        .route("/risk-assessments", get(list_assessments).post(create_assessment))
        .route(
            "/risk-assessments/{id}",
            get(get_assessment)
                .put(update_assessment)
                .delete(delete_assessment),
        )
        .route("/risk-assessments/{id}/complete", post(complete_assessment))
        .route(
            "/risk-assessments/{id}/scenarios",
            get(list_scenarios).post(create_scenario),
        )
        .route(
            "/risk-assessments/{id}/scenarios/{sid}",
            get(get_scenario).put(update_scenario).delete(delete_scenario),
        )
        .route("/risk-level-settings", get(get_settings).put(save_settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::routes::test_support::{app, send};

    #[test]
    fn assessor_defaults_to_caller() {
        let req = AssessmentRequest {
            title: "Payroll FAIR review".into(),
            assessment_type: Some(AssessmentType::Fair),
            tef_most_likely: Some(4.0),
            vulnerability: Some(0.25),
            primary_loss_magnitude: Some(50_000.0),
            ..Default::default()
        };
        let input = req.validate("grc@example.com").unwrap();
        assert_eq!(input.assessor, "grc@example.com");
        assert_eq!(input.status, AssessmentStatus::Draft);

        let scores = input.scores(&RiskLevelSettings::default());
        assert_eq!(scores.annual_loss_expectancy, Some(50_000.0));
    }

    #[test]
    fn vulnerability_is_a_probability() {
        let req = AssessmentRequest {
            title: "x".into(),
            vulnerability: Some(1.5),
            ..Default::default()
        };
        assert!(req.validate("a").is_err());
    }

    #[test]
    fn scenario_description_required() {
        let req = ScenarioRequest {
            description: " ".into(),
            ..Default::default()
        };
        assert_eq!(req.validate().unwrap_err(), ValidationError::Empty { field: "description" });
    }

    #[tokio::test]
    async fn settings_require_session() {
        let (status, _) = send(app(), "PUT", "/risk-level-settings", Some("{}")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn simulation_requires_session() {
        let body = r#"{"tef": {"min": 1, "most_likely": 2, "max": 4}}"#;
        let (status, _) = send(app(), "POST", "/fair/simulate", Some(body)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
