//! Threat events, loss events and attack chains

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use grc_core::attack_chain::Estimate;
use grc_core::validation::{non_negative, optional, probability, required};
use grc_core::{AttackChainStatus, Policy, ValidationError};
use serde::Deserialize;
use uuid::Uuid;

use crate::db::repos::attack_chains::{
    AttackChainInput, ChainDetail, LossEventInput, StepInput, ThreatEventInput,
};
use crate::db::repos::{AttackChain, AttackChainRepo, ChainStep, LossEvent, ThreatEvent};
use crate::http::auth::CurrentUser;
use crate::http::error::ApiError;
use crate::http::extractors::{ValidUuid, ValidUuidPair};
use crate::http::server::AppState;
use crate::models::input::{DESCRIPTION_MAX, NAME_MAX, TITLE_MAX};
use crate::models::Versioned;

const EVENT_DESCRIPTION_MAX: usize = 500;
const CONTROL_MAX: usize = 200;

/// Three-point estimate from request fields, checked per value and for order.
fn estimate(
    field: &'static str,
    min: f64,
    most_likely: f64,
    max: f64,
    check: fn(&'static str, f64) -> Result<f64, ValidationError>,
) -> Result<Estimate, ValidationError> {
    let e = Estimate::new(check(field, min)?, check(field, most_likely)?, check(field, max)?);
    if !e.is_ordered() {
        return Err(ValidationError::OutOfRange {
            field,
            reason: "must satisfy min <= most likely <= max".into(),
        });
    }
    Ok(e)
}

fn controls(field: &'static str, values: Vec<String>) -> Result<Vec<String>, ValidationError> {
    values
        .iter()
        .filter(|v| !v.trim().is_empty())
        .map(|v| required(field, v, CONTROL_MAX))
        .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ThreatEventRequest {
    pub title: String,
    pub description: Option<String>,
    pub tef_min: f64,
    pub tef_most_likely: f64,
    pub tef_max: f64,
    pub preventive_controls: Vec<String>,
    pub detective_controls: Vec<String>,
    pub threat_scenario_id: Option<Uuid>,
}

impl ThreatEventRequest {
    fn validate(self) -> Result<ThreatEventInput, ValidationError> {
        Ok(ThreatEventInput {
            title: required("title", &self.title, TITLE_MAX)?,
            description: optional("description", self.description.as_deref(), EVENT_DESCRIPTION_MAX)?,
            tef: estimate("tef", self.tef_min, self.tef_most_likely, self.tef_max, non_negative)?,
            preventive_controls: controls("preventive control", self.preventive_controls)?,
            detective_controls: controls("detective control", self.detective_controls)?,
            threat_scenario_id: self.threat_scenario_id,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LossEventRequest {
    pub title: String,
    pub description: Option<String>,
    pub primary_loss_min: f64,
    pub primary_loss_most_likely: f64,
    pub primary_loss_max: f64,
    pub secondary_loss_min: Option<f64>,
    pub secondary_loss_most_likely: Option<f64>,
    pub secondary_loss_max: Option<f64>,
    pub loss_type: Option<String>,
    pub business_impact_category: Option<String>,
    pub threat_scenario_id: Option<Uuid>,
}

impl LossEventRequest {
    /// Secondary loss is recorded only when its most likely value is given;
    /// a missing min or max falls back to it.
    fn validate(self) -> Result<LossEventInput, ValidationError> {
        let secondary_loss = match self.secondary_loss_most_likely {
            Some(ml) => Some(estimate(
                "secondary loss",
                self.secondary_loss_min.unwrap_or(ml),
                ml,
                self.secondary_loss_max.unwrap_or(ml),
                non_negative,
            )?),
            None => None,
        };
        Ok(LossEventInput {
            title: required("title", &self.title, TITLE_MAX)?,
            description: optional("description", self.description.as_deref(), EVENT_DESCRIPTION_MAX)?,
            primary_loss: estimate(
                "primary loss",
                self.primary_loss_min,
                self.primary_loss_most_likely,
                self.primary_loss_max,
                non_negative,
            )?,
            secondary_loss,
            loss_type: optional("loss type", self.loss_type.as_deref(), NAME_MAX)?,
            business_impact_category: optional(
                "business impact category",
                self.business_impact_category.as_deref(),
                NAME_MAX,
            )?,
            threat_scenario_id: self.threat_scenario_id,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AttackChainRequest {
    pub name: String,
    pub description: Option<String>,
    pub threat_event_id: Option<Uuid>,
    pub loss_event_id: Option<Uuid>,
}

impl AttackChainRequest {
    fn validate(self) -> Result<AttackChainInput, ValidationError> {
        Ok(AttackChainInput {
            name: required("name", &self.name, TITLE_MAX)?,
            description: optional("description", self.description.as_deref(), DESCRIPTION_MAX)?,
            threat_event_id: self.threat_event_id,
            loss_event_id: self.loss_event_id,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StepRequest {
    pub title: String,
    pub description: Option<String>,
    pub vulnerability_min: f64,
    pub vulnerability_most_likely: f64,
    pub vulnerability_max: f64,
}

impl StepRequest {
    fn validate(self) -> Result<StepInput, ValidationError> {
        Ok(StepInput {
            title: required("title", &self.title, TITLE_MAX)?,
            description: optional("description", self.description.as_deref(), EVENT_DESCRIPTION_MAX)?,
            vulnerability: estimate(
                "vulnerability",
                self.vulnerability_min,
                self.vulnerability_most_likely,
                self.vulnerability_max,
                probability,
            )?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: AttackChainStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListChainsQuery {
    pub status: Option<AttackChainStatus>,
}

/// GET /threat-events
async fn list_threat_events(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<Vec<ThreatEvent>>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(AttackChainRepo::new(&state.pool).threat_events().await?))
}

/// GET /threat-events/{id}
async fn get_threat_event(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<ThreatEvent>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(AttackChainRepo::new(&state.pool).threat_event(id).await?))
}

/// POST /threat-events
async fn create_threat_event(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<ThreatEventRequest>,
) -> Result<(StatusCode, Json<ThreatEvent>), ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let input = req.validate()?;
    let event = AttackChainRepo::new(&state.pool)
        .create_threat_event(input, current.name())
        .await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// PUT /threat-events/{id}
async fn update_threat_event(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<Versioned<ThreatEventRequest>>,
) -> Result<Json<ThreatEvent>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let input = req.body.validate()?;
    let event = AttackChainRepo::new(&state.pool)
        .update_threat_event(id, req.row_version, input, current.name())
        .await?;
    Ok(Json(event))
}

/// DELETE /threat-events/{id}
async fn delete_threat_event(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<StatusCode, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    AttackChainRepo::new(&state.pool).delete_threat_event(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /loss-events
async fn list_loss_events(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<Vec<LossEvent>>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(AttackChainRepo::new(&state.pool).loss_events().await?))
}

/// GET /loss-events/{id}
async fn get_loss_event(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<LossEvent>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(AttackChainRepo::new(&state.pool).loss_event(id).await?))
}

/// POST /loss-events
async fn create_loss_event(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<LossEventRequest>,
) -> Result<(StatusCode, Json<LossEvent>), ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let input = req.validate()?;
    let event = AttackChainRepo::new(&state.pool)
        .create_loss_event(input, current.name())
        .await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// PUT /loss-events/{id}
async fn update_loss_event(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<Versioned<LossEventRequest>>,
) -> Result<Json<LossEvent>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let input = req.body.validate()?;
    let event = AttackChainRepo::new(&state.pool)
        .update_loss_event(id, req.row_version, input, current.name())
        .await?;
    Ok(Json(event))
}

/// DELETE /loss-events/{id}
async fn delete_loss_event(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<StatusCode, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    AttackChainRepo::new(&state.pool).delete_loss_event(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /attack-chains
async fn list_chains(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(query): Query<ListChainsQuery>,
) -> Result<Json<Vec<AttackChain>>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(AttackChainRepo::new(&state.pool).chains(query.status).await?))
}

/// GET /attack-chains/{id}
async fn get_chain(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<ChainDetail>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(AttackChainRepo::new(&state.pool).detail(id).await?))
}

/// POST /attack-chains
async fn create_chain(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<AttackChainRequest>,
) -> Result<(StatusCode, Json<AttackChain>), ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let input = req.validate()?;
    let chain = AttackChainRepo::new(&state.pool)
        .create_chain(input, current.name())
        .await?;
    Ok((StatusCode::CREATED, Json(chain)))
}

/// PUT /attack-chains/{id}
async fn update_chain(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<Versioned<AttackChainRequest>>,
) -> Result<Json<AttackChain>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let input = req.body.validate()?;
    let chain = AttackChainRepo::new(&state.pool)
        .update_chain(id, req.row_version, input, current.name())
        .await?;
    Ok(Json(chain))
}

/// DELETE /attack-chains/{id}
async fn delete_chain(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<StatusCode, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    AttackChainRepo::new(&state.pool).delete_chain(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /attack-chains/{id}/status
async fn set_status(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<StatusRequest>,
) -> Result<Json<AttackChain>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let chain = AttackChainRepo::new(&state.pool)
        .set_status(id, req.status, current.name())
        .await?;
    Ok(Json(chain))
}

/// POST /attack-chains/{id}/steps
async fn add_step(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<StepRequest>,
) -> Result<(StatusCode, Json<ChainStep>), ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let input = req.validate()?;
    let step = AttackChainRepo::new(&state.pool).add_step(id, input).await?;
    Ok((StatusCode::CREATED, Json(step)))
}

/// DELETE /attack-chains/{id}/steps/{step_id}
async fn delete_step(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuidPair(id, step_id): ValidUuidPair,
) -> Result<StatusCode, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    AttackChainRepo::new(&state.pool).delete_step(id, step_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /attack-chains/{id}/calculate
async fn calculate(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<ChainDetail>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let detail = AttackChainRepo::new(&state.pool)
        .calculate(id, current.name())
        .await?;
    Ok(Json(detail))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/threat-events", get(list_threat_events).post(create_threat_event))
        .route(
            "/threat-events/{id}",
            get(get_threat_event).put(update_threat_event).delete(delete_threat_event),
        )
        .route("/loss-events", get(list_loss_events).post(create_loss_event))
        .route(
            "/loss-events/{id}",
            get(get_loss_event).put(update_loss_event).delete(delete_loss_event),
        )
        .route("/attack-chains", get(list_chains).post(create_chain))
        .route(
            "/attack-chains/{id}",
            get(get_chain).put(update_chain).delete(delete_chain),
        )
        .route("/attack-chains/{id}/status", put(set_status))
        .route("/attack-chains/{id}/steps", post(add_step))
        .route("/attack-chains/{id}/steps/{step_id}", delete(delete_step))
        .route("/attack-chains/{id}/calculate", post(calculate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::routes::test_support::{app, send};

    #[test]
    fn threat_event_estimates_must_be_ordered() {
        let req: ThreatEventRequest = serde_json::from_str(
            r#"{"title": "Phishing", "tef_min": 2, "tef_most_likely": 6, "tef_max": 12,
                "preventive_controls": ["MFA", " "]}"#,
        )
        .unwrap();
        let input = req.validate().unwrap();
        assert_eq!(input.tef.most_likely, 6.0);
        assert_eq!(input.preventive_controls, vec!["MFA".to_string()]);

        let req: ThreatEventRequest = serde_json::from_str(
            r#"{"title": "Phishing", "tef_min": 10, "tef_most_likely": 6, "tef_max": 12}"#,
        )
        .unwrap();
        assert!(matches!(req.validate(), Err(ValidationError::OutOfRange { field: "tef", .. })));
    }

    #[test]
    fn step_vulnerability_is_a_probability() {
        let req = StepRequest {
            title: "Credential reuse".into(),
            vulnerability_min: 0.2,
            vulnerability_most_likely: 0.5,
            vulnerability_max: 1.3,
            ..Default::default()
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn secondary_loss_fills_missing_bounds() {
        let req = LossEventRequest {
            title: "Data breach".into(),
            primary_loss_min: 1000.0,
            primary_loss_most_likely: 5000.0,
            primary_loss_max: 20000.0,
            secondary_loss_most_likely: Some(2000.0),
            ..Default::default()
        };
        let input = req.validate().unwrap();
        assert_eq!(input.secondary_loss, Some(Estimate::new(2000.0, 2000.0, 2000.0)));

        let req = LossEventRequest {
            title: "Data breach".into(),
            primary_loss_min: -1.0,
            ..Default::default()
        };
        assert!(req.validate().is_err());
    }

    #[tokio::test]
    async fn calculate_requires_session() {
        let uri = format!("/attack-chains/{}/calculate", Uuid::new_v4());
        let (status, _) = send(app(), "POST", &uri, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
