//! Risk backlog queue and its approval workflow

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use grc_core::backlog::{self, BacklogActionType, BacklogPriority, BacklogStats, BacklogStatus, Command, CommentType};
use grc_core::validation::{optional, required};
use grc_core::{Policy, ValidationError};
use serde::Deserialize;
use uuid::Uuid;

use crate::db::repos::backlog::{BacklogDetail, BacklogFilter, NewEntry};
use crate::db::repos::{BacklogComment, BacklogEntry, BacklogRepo, MatrixRepo};
use crate::http::auth::CurrentUser;
use crate::http::error::ApiError;
use crate::http::extractors::ValidUuid;
use crate::http::server::AppState;
use crate::models::input::{LONG_TEXT_MAX, NAME_MAX};
use crate::models::{Paginated, PaginationParams};

#[derive(Debug, Default, Deserialize)]
pub struct ListBacklogQuery {
    pub status: Option<BacklogStatus>,
    pub action_type: Option<BacklogActionType>,
    pub priority: Option<BacklogPriority>,
    pub assignee: Option<String>,
    pub overdue: Option<bool>,
}

impl From<ListBacklogQuery> for BacklogFilter {
    fn from(q: ListBacklogQuery) -> Self {
        Self {
            status: q.status,
            action_type: q.action_type,
            priority: q.priority,
            assignee: q.assignee.filter(|a| !a.trim().is_empty()),
            overdue: q.overdue,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateBacklogRequest {
    pub action_type: Option<BacklogActionType>,
    pub priority: Option<BacklogPriority>,
    pub risk_id: Option<Uuid>,
    pub finding_id: Option<Uuid>,
    pub request_description: String,
    pub request_justification: Option<String>,
}

impl CreateBacklogRequest {
    fn validate(self) -> Result<NewEntry, ValidationError> {
        let action_type = self
            .action_type
            .ok_or(ValidationError::Empty { field: "action type" })?;
        Ok(NewEntry {
            action_type,
            priority: self.priority,
            risk_id: self.risk_id,
            finding_id: self.finding_id,
            request_description: required("request description", &self.request_description, LONG_TEXT_MAX)?,
            request_justification: optional(
                "request justification",
                self.request_justification.as_deref(),
                LONG_TEXT_MAX,
            )?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AssignRequest {
    pub user: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ApproveRequest {
    pub comments: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct PriorityRequest {
    pub priority: BacklogPriority,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CommentRequest {
    pub comment: String,
    pub comment_type: Option<CommentType>,
    pub is_internal: bool,
}

fn approve_comments(req: ApproveRequest) -> Result<Option<String>, ValidationError> {
    optional("comments", req.comments.as_deref(), LONG_TEXT_MAX)
}

/// Run one workflow command; the repository checks who may issue it.
async fn run(state: &AppState, current: &CurrentUser, id: Uuid, command: Command) -> Result<Json<BacklogEntry>, ApiError> {
    let hours = MatrixRepo::new(&state.pool).default_sla().await?;
    let entry = BacklogRepo::new(&state.pool)
        .transition(id, command, current.actor(), &hours)
        .await?;
    Ok(Json(entry))
}

/// GET /backlog
async fn list(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(query): Query<ListBacklogQuery>,
    Query(page): Query<PaginationParams>,
) -> Result<Json<Paginated<BacklogEntry>>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let entries = BacklogRepo::new(&state.pool)
        .list(&query.into(), page.into())
        .await?;
    Ok(Json(entries))
}

/// GET /backlog/mine
async fn mine(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(page): Query<PaginationParams>,
) -> Result<Json<Paginated<BacklogEntry>>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    let entries = BacklogRepo::new(&state.pool)
        .mine(current.name(), page.into())
        .await?;
    Ok(Json(entries))
}

/// GET /backlog/stats
async fn stats(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<BacklogStats>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let rows = BacklogRepo::new(&state.pool).stats_rows().await?;
    Ok(Json(BacklogStats::compute(&rows, Utc::now())))
}

/// GET /backlog/{id}
async fn get_entry(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<BacklogDetail>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    let detail = BacklogRepo::new(&state.pool).detail(id).await?;
    if !backlog::can_view(current.actor(), detail.entry.participants()) {
        return Err(ApiError::forbidden("not a participant of this backlog entry"));
    }
    Ok(Json(detail))
}

/// POST /backlog
async fn create(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<CreateBacklogRequest>,
) -> Result<(StatusCode, Json<BacklogEntry>), ApiError> {
    current.require(Policy::RequireAnyRole)?;
    let new = req.validate()?;
    let entry = BacklogRepo::new(&state.pool).create(new, current.name()).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// POST /backlog/{id}/assign-analyst
async fn assign_analyst(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<AssignRequest>,
) -> Result<Json<BacklogEntry>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let user = required("analyst", &req.user, NAME_MAX)?;
    run(&state, &current, id, Command::AssignAnalyst(user)).await
}

/// POST /backlog/{id}/assign-manager
async fn assign_manager(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<AssignRequest>,
) -> Result<Json<BacklogEntry>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let user = required("manager", &req.user, NAME_MAX)?;
    run(&state, &current, id, Command::AssignManager(user)).await
}

/// POST /backlog/{id}/analyst-approve
async fn analyst_approve(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<ApproveRequest>,
) -> Result<Json<BacklogEntry>, ApiError> {
    let comments = approve_comments(req)?;
    run(&state, &current, id, Command::AnalystApprove { comments }).await
}

/// POST /backlog/{id}/analyst-reject
async fn analyst_reject(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<BacklogEntry>, ApiError> {
    run(&state, &current, id, Command::AnalystReject { reason: req.reason }).await
}

/// POST /backlog/{id}/manager-approve
async fn manager_approve(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<ApproveRequest>,
) -> Result<Json<BacklogEntry>, ApiError> {
    let comments = approve_comments(req)?;
    run(&state, &current, id, Command::ManagerApprove { comments }).await
}

/// POST /backlog/{id}/manager-reject
async fn manager_reject(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<BacklogEntry>, ApiError> {
    run(&state, &current, id, Command::ManagerReject { reason: req.reason }).await
}

/// POST /backlog/{id}/escalate
async fn escalate(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<BacklogEntry>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    run(&state, &current, id, Command::Escalate { reason: req.reason }).await
}

/// POST /backlog/{id}/unassign
async fn unassign(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
) -> Result<Json<BacklogEntry>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    run(&state, &current, id, Command::Unassign).await
}

/// POST /backlog/{id}/priority
async fn set_priority(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<PriorityRequest>,
) -> Result<Json<BacklogEntry>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    run(&state, &current, id, Command::SetPriority(req.priority)).await
}

/// POST /backlog/{id}/comments
async fn add_comment(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    ValidUuid(id): ValidUuid,
    Json(req): Json<CommentRequest>,
) -> Result<(StatusCode, Json<BacklogComment>), ApiError> {
    current.require(Policy::RequireAnyRole)?;
    let comment = required("comment", &req.comment, LONG_TEXT_MAX)?;
    let repo = BacklogRepo::new(&state.pool);
    let entry = repo.get(id).await?;
    if !backlog::can_view(current.actor(), entry.participants()) {
        return Err(ApiError::forbidden("not a participant of this backlog entry"));
    }
    let comment_type = req
        .comment_type
        .unwrap_or_else(|| default_comment_type(&entry, current.name()));
    let row = repo
        .add_comment(id, &comment, comment_type, req.is_internal, current.name())
        .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// Assigned managers comment as Manager, everyone else as Analyst.
fn default_comment_type(entry: &BacklogEntry, user: &str) -> CommentType {
    let is_manager = entry
        .assigned_to_manager
        .as_deref()
        .is_some_and(|m| m.eq_ignore_ascii_case(user));
    if is_manager {
        CommentType::Manager
    } else {
        CommentType::Analyst
    }
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/backlog", get(list).post(create))
        .route("/backlog/mine", get(mine))
        .route("/backlog/stats", get(stats))
        .route("/backlog/{id}", get(get_entry))
        .route("/backlog/{id}/assign-analyst", post(assign_analyst))
        .route("/backlog/{id}/assign-manager", post(assign_manager))
        .route("/backlog/{id}/analyst-approve", post(analyst_approve))
        .route("/backlog/{id}/analyst-reject", post(analyst_reject))
        .route("/backlog/{id}/manager-approve", post(manager_approve))
        .route("/backlog/{id}/manager-reject", post(manager_reject))
        .route("/backlog/{id}/escalate", post(escalate))
        .route("/backlog/{id}/unassign", post(unassign))
        .route("/backlog/{id}/priority", post(set_priority))
        .route("/backlog/{id}/comments", post(add_comment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::routes::test_support::{app, send};

    #[test]
    fn create_requires_action_and_description() {
        let req: CreateBacklogRequest =
            serde_json::from_str(r#"{"request_description": "accept RISK-2026-001"}"#).unwrap();
        assert_eq!(req.validate().unwrap_err(), ValidationError::Empty { field: "action type" });

        let req: CreateBacklogRequest =
            serde_json::from_str(r#"{"action_type": "riskacceptance", "request_description": "  "}"#).unwrap();
        assert!(req.validate().is_err());

        let req: CreateBacklogRequest = serde_json::from_str(
            r#"{"action_type": "NewFinding", "request_description": "{\"title\": \"Open port\"}"}"#,
        )
        .unwrap();
        let new = req.validate().unwrap();
        assert_eq!(new.action_type, BacklogActionType::NewFinding);
        assert_eq!(new.priority, None);
    }

    #[test]
    fn list_query_drops_blank_assignee() {
        let filter: BacklogFilter = ListBacklogQuery {
            assignee: Some(" ".into()),
            overdue: Some(true),
            ..Default::default()
        }
        .into();
        assert_eq!(filter.assignee, None);
        assert_eq!(filter.overdue, Some(true));
    }

    #[tokio::test]
    async fn workflow_routes_require_session() {
        let uri = format!("/backlog/{}/manager-approve", Uuid::new_v4());
        let (status, _) = send(app(), "POST", &uri, Some("{}")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(app(), "GET", "/backlog/stats", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
