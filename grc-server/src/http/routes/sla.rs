//! SLA dashboard and upcoming deadlines
//!
//! Remediation deadlines run from a finding's creation, review deadlines from
//! the last update of an accepted risk. Hours come from the default matrix.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use grc_core::sla::{self, SlaHours, SlaState};
use grc_core::sla_history::{self, PerformanceReport, SlaType};
use grc_core::{Policy, RiskLevel};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::repos::sla_history::HistoryFilter;
use crate::db::repos::{
    Finding, FindingRepo, MatrixRepo, Risk, RiskRepo, SlaHistoryEntry, SlaHistoryRepo,
};
use crate::http::auth::CurrentUser;
use crate::http::error::ApiError;
use crate::http::server::AppState;
use crate::models::{Paginated, PaginationParams};

const DEFAULT_UPCOMING_DAYS: i64 = 7;
const MAX_UPCOMING_DAYS: i64 = 365;
const DEFAULT_PERFORMANCE_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlaKind {
    Remediation,
    Review,
}

/// One open item measured against its deadline.
#[derive(Debug, Clone, Serialize)]
pub struct TrackedItem {
    pub kind: SlaKind,
    pub id: Uuid,
    pub reference: String,
    pub title: String,
    pub level: RiskLevel,
    pub deadline: DateTime<Utc>,
}

impl TrackedItem {
    fn remediation(f: &Finding, hours: &SlaHours) -> Self {
        Self {
            kind: SlaKind::Remediation,
            id: f.id,
            reference: f.finding_number.clone(),
            title: f.title.clone(),
            level: f.risk_rating,
            deadline: sla::deadline(f.created_at, hours.remediation(f.risk_rating)),
        }
    }

    fn review(r: &Risk, hours: &SlaHours) -> Self {
        Self {
            kind: SlaKind::Review,
            id: r.id,
            reference: r.risk_number.clone(),
            title: r.title.clone(),
            level: r.risk_level,
            deadline: sla::deadline(r.updated_at, hours.review(r.risk_level)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SlaSummary {
    pub total: usize,
    pub breaches: usize,
    pub compliance_percentage: f64,
}

impl SlaSummary {
    fn of<'a>(items: impl IntoIterator<Item = &'a TrackedItem>, now: DateTime<Utc>) -> Self {
        let (total, breaches) = items.into_iter().fold((0, 0), |(t, b), item| {
            (t + 1, b + usize::from(sla::is_breached(item.deadline, now)))
        });
        Self {
            total,
            breaches,
            compliance_percentage: sla::compliance_percentage(total, breaches),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelHours {
    pub level: RiskLevel,
    pub remediation: String,
    pub review: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlaDashboard {
    pub remediation: SlaSummary,
    pub review: SlaSummary,
    pub overall: SlaSummary,
    pub breached: Vec<TrackedItem>,
    pub hours: Vec<LevelHours>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpcomingDeadline {
    #[serde(flatten)]
    pub item: TrackedItem,
    pub days_left: i64,
    pub urgency: RiskLevel,
    pub status: &'static str,
    pub status_color: &'static str,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpcomingQuery {
    pub days: Option<i64>,
}

fn level_hours(hours: &SlaHours) -> Vec<LevelHours> {
    RiskLevel::ALL
        .iter()
        .rev()
        .map(|&level| LevelHours {
            level,
            remediation: sla::format_sla_hours(hours.remediation(level)),
            review: sla::format_sla_hours(hours.review(level)),
        })
        .collect()
}

pub fn dashboard(items: Vec<TrackedItem>, hours: &SlaHours, now: DateTime<Utc>) -> SlaDashboard {
    let of_kind = |kind| SlaSummary::of(items.iter().filter(|i| i.kind == kind), now);
    let remediation = of_kind(SlaKind::Remediation);
    let review = of_kind(SlaKind::Review);
    let overall = SlaSummary::of(&items, now);

    let mut breached: Vec<TrackedItem> = items
        .into_iter()
        .filter(|i| sla::is_breached(i.deadline, now))
        .collect();
    breached.sort_by_key(|i| i.deadline);

    SlaDashboard {
        remediation,
        review,
        overall,
        breached,
        hours: level_hours(hours),
        generated_at: now,
    }
}

/// Items due within `days`, overdue ones included, soonest first.
pub fn upcoming(items: Vec<TrackedItem>, now: DateTime<Utc>, days: i64) -> Vec<UpcomingDeadline> {
    let horizon = now + Duration::days(days);
    let mut due: Vec<UpcomingDeadline> = items
        .into_iter()
        .filter(|i| i.deadline <= horizon)
        .map(|item| {
            let days_left = (item.deadline - now).num_days();
            let state = SlaState::classify(false, now, item.deadline);
            UpcomingDeadline {
                days_left,
                urgency: sla::urgency(days_left),
                status: state.text(),
                status_color: state.color(),
                item,
            }
        })
        .collect();
    due.sort_by_key(|d| d.item.deadline);
    due
}

async fn tracked_items(state: &AppState) -> Result<(Vec<TrackedItem>, SlaHours), ApiError> {
    let hours = MatrixRepo::new(&state.pool).default_sla().await?;
    let findings = FindingRepo::new(&state.pool).open().await?;
    let risks = RiskRepo::new(&state.pool).accepted().await?;
    let items = findings
        .iter()
        .map(|f| TrackedItem::remediation(f, &hours))
        .chain(risks.iter().map(|r| TrackedItem::review(r, &hours)))
        .collect();
    Ok((items, hours))
}

/// GET /sla/dashboard
async fn get_dashboard(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<SlaDashboard>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    let (items, hours) = tracked_items(&state).await?;
    Ok(Json(dashboard(items, &hours, Utc::now())))
}

/// GET /sla/upcoming?days=N
async fn get_upcoming(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(query): Query<UpcomingQuery>,
) -> Result<Json<Vec<UpcomingDeadline>>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    let days = query
        .days
        .unwrap_or(DEFAULT_UPCOMING_DAYS)
        .clamp(0, MAX_UPCOMING_DAYS);
    let (items, _) = tracked_items(&state).await?;
    Ok(Json(upcoming(items, Utc::now(), days)))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub sla_type: Option<SlaType>,
    pub item_id: Option<Uuid>,
}

/// GET /sla/history
async fn get_history(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(query): Query<HistoryQuery>,
    Query(page): Query<PaginationParams>,
) -> Result<Json<Paginated<SlaHistoryEntry>>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let filter = HistoryFilter {
        from: query.from,
        to: query.to,
        sla_type: query.sla_type,
        item_id: query.item_id,
    };
    let rows = SlaHistoryRepo::new(&state.pool)
        .list(&filter, page.into())
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Default, Deserialize)]
pub struct PerformanceQuery {
    pub days: Option<i64>,
}

/// Window of completions the report covers, ending now.
fn performance_window(days: Option<i64>, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let days = days.unwrap_or(DEFAULT_PERFORMANCE_DAYS).clamp(1, MAX_UPCOMING_DAYS);
    (now - Duration::days(days), now)
}

/// GET /sla/performance?days=N
async fn get_performance(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(query): Query<PerformanceQuery>,
) -> Result<Json<PerformanceReport>, ApiError> {
    current.require(Policy::RequireGRCOrAdminRole)?;
    let (from, to) = performance_window(query.days, Utc::now());
    let rows = SlaHistoryRepo::new(&state.pool).report_rows(from, to).await?;
    Ok(Json(sla_history::performance_report(&rows)))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sla/dashboard", get(get_dashboard))
        .route("/sla/upcoming", get(get_upcoming))
        .route("/sla/history", get(get_history))
        .route("/sla/performance", get(get_performance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::routes::test_support::{app, send};
    use axum::http::StatusCode;
    use chrono::TimeZone;

    fn item(kind: SlaKind, reference: &str, deadline: DateTime<Utc>) -> TrackedItem {
        TrackedItem {
            kind,
            id: Uuid::new_v4(),
            reference: reference.into(),
            title: reference.into(),
            level: RiskLevel::High,
            deadline,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn dashboard_counts_breaches_per_kind() {
        let now = now();
        let items = vec![
            item(SlaKind::Remediation, "F-2026-0001", now - Duration::hours(2)),
            item(SlaKind::Remediation, "F-2026-0002", now + Duration::days(3)),
            item(SlaKind::Review, "RISK-2026-001", now + Duration::days(30)),
        ];
        let d = dashboard(items, &SlaHours::default(), now);
        assert_eq!(d.remediation.total, 2);
        assert_eq!(d.remediation.breaches, 1);
        assert_eq!(d.remediation.compliance_percentage, 50.0);
        assert_eq!(d.review.compliance_percentage, 100.0);
        assert_eq!(d.overall.compliance_percentage, 66.7);
        assert_eq!(d.breached.len(), 1);
        assert_eq!(d.hours[0].level, RiskLevel::Critical);
        assert_eq!(d.hours[0].remediation, "4 hours");
    }

    #[test]
    fn empty_dashboard_is_fully_compliant() {
        let d = dashboard(Vec::new(), &SlaHours::default(), now());
        assert_eq!(d.overall.compliance_percentage, 100.0);
    }

    #[test]
    fn upcoming_window_and_urgency() {
        let now = now();
        let items = vec![
            item(SlaKind::Remediation, "late", now - Duration::days(1)),
            item(SlaKind::Remediation, "soon", now + Duration::hours(30)),
            item(SlaKind::Review, "later", now + Duration::days(3) + Duration::hours(1)),
            item(SlaKind::Review, "far", now + Duration::days(20)),
        ];
        let due = upcoming(items, now, 7);
        let refs: Vec<&str> = due.iter().map(|d| d.item.reference.as_str()).collect();
        assert_eq!(refs, vec!["late", "soon", "later"]);
        assert_eq!(due[0].urgency, RiskLevel::Critical);
        assert_eq!(due[0].status, "Overdue");
        assert_eq!(due[1].urgency, RiskLevel::High);
        assert_eq!(due[1].status, "On Track");
        assert_eq!(due[2].urgency, RiskLevel::Medium);
    }

    #[test]
    fn performance_window_defaults_and_clamps() {
        let now = now();
        assert_eq!(performance_window(None, now).0, now - Duration::days(30));
        assert_eq!(performance_window(Some(0), now).0, now - Duration::days(1));
        assert_eq!(performance_window(Some(5000), now).0, now - Duration::days(365));
        assert_eq!(performance_window(Some(7), now).1, now);
    }

    #[tokio::test]
    async fn dashboard_requires_session() {
        for uri in ["/sla/dashboard", "/sla/history", "/sla/performance?days=7"] {
            let (status, _) = send(app(), "GET", uri, None).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }
}
