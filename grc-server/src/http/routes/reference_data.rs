//! Reference data used to autocomplete free-text fields

use std::sync::Arc;

use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use grc_core::reference::{self, ReferenceValue};
use grc_core::validation::optional;
use grc_core::{Policy, ReferenceCategory, ValidationError};
use serde::Deserialize;

use super::{csv_error, read_upload};
use crate::db::repos::reference_data::BulkOutcome;
use crate::db::repos::{ReferenceData, ReferenceDataRepo};
use crate::http::auth::CurrentUser;
use crate::http::error::ApiError;
use crate::http::extractors::ValidUuid;
use crate::http::server::AppState;
use crate::import;
use crate::models::Versioned;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub category: Option<ReferenceCategory>,
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub category: Option<ReferenceCategory>,
    pub term: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CategoryQuery {
    pub category: Option<ReferenceCategory>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReferenceRequest {
    pub value: String,
    pub category: Option<ReferenceCategory>,
    pub description: Option<String>,
}

/// Validated value and description; the category is only needed on create.
struct ValidReference {
    category: Option<ReferenceCategory>,
    value: ReferenceValue,
    description: Option<String>,
}

impl ReferenceRequest {
    fn validate(self) -> Result<ValidReference, ValidationError> {
        Ok(ValidReference {
            category: self.category,
            value: ReferenceValue::new(&self.value)?,
            description: optional(
                "description",
                self.description.as_deref(),
                reference::MAX_DESCRIPTION_LEN,
            )?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BulkRequest {
    pub category: Option<ReferenceCategory>,
    pub values: Vec<String>,
}

fn category_of(category: Option<ReferenceCategory>) -> Result<ReferenceCategory, ValidationError> {
    category.ok_or(ValidationError::Empty { field: "category" })
}

/// GET /reference-data
async fn list(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ReferenceData>>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    if query.include_deleted {
        current.require(Policy::RequireGRCOrAdminRole)?;
    }
    let rows = ReferenceDataRepo::new(&state.pool)
        .list(query.category, query.include_deleted)
        .await?;
    Ok(Json(rows))
}

/// GET /reference-data/search?category=&term=
async fn search(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<ReferenceData>>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    let category = category_of(query.category)?;
    let rows = ReferenceDataRepo::new(&state.pool)
        .search(category, query.term.as_deref().unwrap_or_default())
        .await?;
    Ok(Json(rows))
}

/// GET /reference-data/{id}
async fn get_one(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<ReferenceData>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(ReferenceDataRepo::new(&state.pool).get(id).await?))
}

/// POST /reference-data
async fn create(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<ReferenceRequest>,
) -> Result<(StatusCode, Json<ReferenceData>), ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let valid = req.validate()?;
    let category = category_of(valid.category)?;
    let row = ReferenceDataRepo::new(&state.pool)
        .create(category, &valid.value, valid.description.as_deref(), current.name())
        .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// PUT /reference-data/{id}
async fn update(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<Versioned<ReferenceRequest>>,
) -> Result<Json<ReferenceData>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let valid = req.body.validate()?;
    let row = ReferenceDataRepo::new(&state.pool)
        .update(id, req.row_version, &valid.value, valid.description.as_deref(), current.name())
        .await?;
    Ok(Json(row))
}

/// DELETE /reference-data/{id}
async fn remove(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<StatusCode, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    ReferenceDataRepo::new(&state.pool).delete(id, current.name()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /reference-data/{id}/use
async fn record_use(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<ReferenceData>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    Ok(Json(ReferenceDataRepo::new(&state.pool).record_use(id).await?))
}

/// POST /reference-data/bulk
async fn bulk(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<BulkRequest>,
) -> Result<Json<BulkOutcome>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let category = category_of(req.category)?;
    let outcome = ReferenceDataRepo::new(&state.pool)
        .bulk_create(category, req.values.iter().map(String::as_str), current.name())
        .await?;
    Ok(Json(outcome))
}

/// POST /reference-data/import?category=
async fn import_csv(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(query): Query<CategoryQuery>,
    multipart: Multipart,
) -> Result<Json<BulkOutcome>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let category = category_of(query.category)?;
    let upload = read_upload(multipart).await?;
    let values = import::reference_values(&upload.bytes).map_err(csv_error)?;
    tracing::debug!(file = %upload.file_name, rows = values.len(), "reference data upload");
    let outcome = ReferenceDataRepo::new(&state.pool)
        .bulk_create(category, values.iter().map(String::as_str), current.name())
        .await?;
    Ok(Json(outcome))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/reference-data", get(list).post(create))
        .route("/reference-data/search", get(search))
        .route("/reference-data/bulk", post(bulk))
        .route("/reference-data/import", post(import_csv))
        .route("/reference-data/{id}", get(get_one).put(update).delete(remove))
        .route("/reference-data/{id}/use", post(record_use))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::routes::test_support::{app, send};

    #[test]
    fn request_checks_value_pattern() {
        let req: ReferenceRequest =
            serde_json::from_str(r#"{"value": "  Core Router (DC-1) ", "category": "asset"}"#).unwrap();
        let valid = req.validate().unwrap();
        assert_eq!(valid.value.as_str(), "Core Router (DC-1)");
        assert_eq!(valid.category, Some(ReferenceCategory::Asset));

        let req: ReferenceRequest = serde_json::from_str(r#"{"value": "drop;table"}"#).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn category_is_required() {
        assert_eq!(category_of(None).unwrap_err(), ValidationError::Empty { field: "category" });
    }

    #[tokio::test]
    async fn search_requires_session() {
        let (status, _) = send(app(), "GET", "/reference-data/search?category=Asset", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
