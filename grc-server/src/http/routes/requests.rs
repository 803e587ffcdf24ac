//! Assessment, risk acceptance and finding closure request endpoints
//!
//! Anyone may raise a request. IT users only see requests they raised or
//! were assigned; GRC staff see everything.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use grc_core::backlog::Actor;
use grc_core::requests::{RequestStatus, ReviewDecision};
use grc_core::{Policy, UserRole};
use serde::{Deserialize, Serialize};

use crate::db::repos::requests::{involves, RequestFilter, RequestRow};
use crate::db::repos::{AssessmentRequest, FindingClosureRequest, RequestRepo, RiskAcceptanceRequest};
use crate::http::auth::CurrentUser;
use crate::http::error::ApiError;
use crate::http::extractors::ValidUuid;
use crate::http::server::AppState;
use crate::models::input::{
    AcceptanceRequestBody, AssessmentRequestBody, AssignBody, ClosureRequestBody, CompleteBody,
    ExpectedVersion, ReviewBody,
};
use crate::models::{Paginated, PaginationParams};

#[derive(Debug, Default, Deserialize)]
pub struct ListRequestsQuery {
    pub status: Option<RequestStatus>,
    /// Only requests the caller raised or was assigned.
    pub mine: Option<bool>,
}

impl ListRequestsQuery {
    fn filter(&self, actor: Actor<'_>) -> RequestFilter {
        let own_only = self.mine.unwrap_or(false) || actor.role == UserRole::ItUser;
        RequestFilter {
            status: self.status,
            involving: own_only.then(|| actor.user.to_owned()),
        }
    }
}

fn visible<T: RequestRow>(row: &T, actor: Actor<'_>) -> bool {
    actor.role != UserRole::ItUser || involves(row, actor.user)
}

async fn list_requests<T>(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(query): Query<ListRequestsQuery>,
    Query(page): Query<PaginationParams>,
) -> Result<Json<Paginated<T>>, ApiError>
where
    T: RequestRow + Serialize,
{
    current.require(Policy::RequireAnyRole)?;
    let filter = query.filter(current.actor());
    let rows = RequestRepo::new(&state.pool)
        .list::<T>(&filter, page.into())
        .await?;
    Ok(Json(rows))
}

async fn get_request<T>(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<T>, ApiError>
where
    T: RequestRow + Serialize,
{
    current.require(Policy::RequireAnyRole)?;
    let row = RequestRepo::new(&state.pool).get::<T>(id).await?;
    if !visible(&row, current.actor()) {
        return Err(ApiError::forbidden(format!(
            "{} is not a party to this {}",
            current.name(),
            T::KIND.name()
        )));
    }
    Ok(Json(row))
}

async fn delete_request<T>(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<StatusCode, ApiError>
where
    T: RequestRow,
{
    current.require(Policy::RequireAdminRole)?;
    RequestRepo::new(&state.pool).delete::<T>(id).await?;
    tracing::info!(%id, kind = T::KIND.name(), by = %current.name(), "request deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn assign_request<T>(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Query(expected): Query<ExpectedVersion>,
    Json(body): Json<AssignBody>,
) -> Result<Json<T>, ApiError>
where
    T: RequestRow + Serialize,
{
    current.require(Policy::RequireGRCOrAdminRole)?;
    let assignment = body.validate()?;
    let row = RequestRepo::new(&state.pool)
        .assign::<T>(id, expected.row_version, &assignment, current.actor())
        .await?;
    Ok(Json(row))
}

/// Only the assignee may start; the repository enforces it.
async fn start_request<T>(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Query(expected): Query<ExpectedVersion>,
) -> Result<Json<T>, ApiError>
where
    T: RequestRow + Serialize,
{
    current.require(Policy::RequireAnyRole)?;
    let row = RequestRepo::new(&state.pool)
        .start::<T>(id, expected.row_version, current.actor())
        .await?;
    Ok(Json(row))
}

async fn complete_request<T>(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Query(expected): Query<ExpectedVersion>,
    body: Option<Json<CompleteBody>>,
) -> Result<Json<T>, ApiError>
where
    T: RequestRow + Serialize,
{
    current.require(Policy::RequireAnyRole)?;
    let completion = body.map(|Json(b)| b).unwrap_or_default().validate()?;
    let row = RequestRepo::new(&state.pool)
        .complete::<T>(id, expected.row_version, &completion, current.actor())
        .await?;
    Ok(Json(row))
}

async fn review_request<T>(
    state: Arc<AppState>,
    current: CurrentUser,
    id: uuid::Uuid,
    expected: ExpectedVersion,
    body: Option<Json<ReviewBody>>,
    decision: ReviewDecision,
) -> Result<Json<T>, ApiError>
where
    T: RequestRow + Serialize,
{
    current.require(Policy::RequireGRCOrAdminRole)?;
    let review = body.map(|Json(b)| b).unwrap_or_default().validate(decision)?;
    let row = RequestRepo::new(&state.pool)
        .review::<T>(id, expected.row_version, &review, current.actor())
        .await?;
    Ok(Json(row))
}

async fn approve_request<T>(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Query(expected): Query<ExpectedVersion>,
    body: Option<Json<ReviewBody>>,
) -> Result<Json<T>, ApiError>
where
    T: RequestRow + Serialize,
{
    review_request(state, current, id, expected, body, ReviewDecision::Approved).await
}

async fn reject_request<T>(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Query(expected): Query<ExpectedVersion>,
    body: Option<Json<ReviewBody>>,
) -> Result<Json<T>, ApiError>
where
    T: RequestRow + Serialize,
{
    review_request(state, current, id, expected, body, ReviewDecision::Rejected).await
}

/// POST /assessment-requests
async fn create_assessment_request(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(body): Json<AssessmentRequestBody>,
) -> Result<(StatusCode, Json<AssessmentRequest>), ApiError> {
    current.require(Policy::RequireAnyRole)?;
    let input = body.validate()?;
    let row = RequestRepo::new(&state.pool)
        .create_assessment(input, current.name())
        .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// POST /acceptance-requests
async fn create_acceptance_request(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(body): Json<AcceptanceRequestBody>,
) -> Result<(StatusCode, Json<RiskAcceptanceRequest>), ApiError> {
    current.require(Policy::RequireAnyRole)?;
    let input = body.validate()?;
    let row = RequestRepo::new(&state.pool)
        .create_acceptance(input, current.name())
        .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// POST /closure-requests
async fn create_closure_request(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(body): Json<ClosureRequestBody>,
) -> Result<(StatusCode, Json<FindingClosureRequest>), ApiError> {
    current.require(Policy::RequireAnyRole)?;
    let input = body.validate()?;
    let row = RequestRepo::new(&state.pool)
        .create_closure(input, current.name())
        .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub fn router() -> Router<Arc<AppState>> {
    type A = AssessmentRequest;
    type R = RiskAcceptanceRequest;
    type C = FindingClosureRequest;

    Router::new()
        .route(
            "/assessment-requests",
            get(list_requests::<A>).post(create_assessment_request),
        )
        .route(
            "/assessment-requests/{id}",
            get(get_request::<A>).delete(delete_request::<A>),
        )
        .route("/assessment-requests/{id}/assign", post(assign_request::<A>))
        .route("/assessment-requests/{id}/start", post(start_request::<A>))
        .route("/assessment-requests/{id}/complete", post(complete_request::<A>))
        .route("/assessment-requests/{id}/reject", post(reject_request::<A>))
        .route(
            "/acceptance-requests",
            get(list_requests::<R>).post(create_acceptance_request),
        )
        .route(
            "/acceptance-requests/{id}",
            get(get_request::<R>).delete(delete_request::<R>),
        )
        .route("/acceptance-requests/{id}/assign", post(assign_request::<R>))
        .route("/acceptance-requests/{id}/approve", post(approve_request::<R>))
        .route("/acceptance-requests/{id}/reject", post(reject_request::<R>))
        .route("/acceptance-requests/{id}/complete", post(complete_request::<R>))
        .route(
            "/closure-requests",
            get(list_requests::<C>).post(create_closure_request),
        )
        .route(
            "/closure-requests/{id}",
            get(get_request::<C>).delete(delete_request::<C>),
        )
        .route("/closure-requests/{id}/assign", post(assign_request::<C>))
        .route("/closure-requests/{id}/approve", post(approve_request::<C>))
        .route("/closure-requests/{id}/reject", post(reject_request::<C>))
        .route("/closure-requests/{id}/complete", post(complete_request::<C>))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::routes::test_support::{app, send};

    #[test]
    fn it_users_only_list_their_own() {
        let query = ListRequestsQuery::default();
        let it = Actor {
            user: "dev@example.com",
            role: UserRole::ItUser,
        };
        let grc = Actor {
            user: "grc@example.com",
            role: UserRole::GrcUser,
        };
        assert_eq!(query.filter(it).involving.as_deref(), Some("dev@example.com"));
        assert_eq!(query.filter(grc).involving, None);

        let query: ListRequestsQuery = serde_json::from_str(r#"{"mine": true, "status": "pending"}"#).unwrap();
        let filter = query.filter(grc);
        assert_eq!(filter.involving.as_deref(), Some("grc@example.com"));
        assert_eq!(filter.status, Some(RequestStatus::Pending));
    }

    #[tokio::test]
    async fn requests_require_session() {
        let id = uuid::Uuid::new_v4();
        for (method, uri) in [
            ("GET", "/assessment-requests".to_owned()),
            ("POST", "/acceptance-requests".to_owned()),
            ("POST", format!("/closure-requests/{}/approve", id)),
            ("POST", format!("/assessment-requests/{}/start?row_version=2", id)),
        ] {
            let body = (method == "POST").then_some("{}");
            let (status, _) = send(app(), method, &uri, body).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{} {}", method, uri);
        }
    }
}
