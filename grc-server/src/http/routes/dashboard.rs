//! Home and executive dashboards
//!
//! Aggregation is pure over rows the repositories return, so every rule here
//! is tested without a database.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use grc_core::rating::round_to;
use grc_core::requests::RequestStatus;
use grc_core::{FindingStatus, Policy, RiskLevel, RiskLevelSettings};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::repos::compliance::AssessmentFilter;
use crate::db::repos::requests::RequestFilter;
use crate::db::repos::{
    AssessmentRequest, ComplianceAssessment, ComplianceRepo, DbError, Finding, FindingRepo,
    RequestRepo, Risk, RiskRepo, SettingsRepo,
};
use crate::http::auth::CurrentUser;
use crate::http::error::ApiError;
use crate::http::server::AppState;
use crate::models::{Paginated, Pagination};

const TOP_N: usize = 5;
/// Open risks at or above this ALE are listed as high value.
pub const HIGH_VALUE_ALE: f64 = 50_000.0;
const ASSESSMENT_OPTIONS: u32 = 100;

#[derive(Debug, Clone, Serialize)]
pub struct FindingBrief {
    pub id: Uuid,
    pub finding_number: String,
    pub title: String,
    pub risk_rating: RiskLevel,
    pub status: FindingStatus,
    pub sla_date: Option<DateTime<Utc>>,
    pub is_overdue: bool,
}

impl FindingBrief {
    fn of(f: &Finding, now: DateTime<Utc>) -> Self {
        Self {
            id: f.id,
            finding_number: f.finding_number.clone(),
            title: f.title.clone(),
            risk_rating: f.risk_rating,
            status: f.status,
            sla_date: f.sla_date,
            is_overdue: f.is_overdue(now),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskBrief {
    pub id: Uuid,
    pub risk_number: String,
    pub title: String,
    pub asset: Option<String>,
    pub risk_level: RiskLevel,
    pub ale: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub total_risks: i64,
    /// Sum of ALE over open risks.
    pub total_ale: f64,
    pub open_findings: usize,
    pub high_risk_findings: usize,
    pub overdue_findings: usize,
    pub pending_assessment_requests: i64,
    pub recent_findings: Vec<FindingBrief>,
    pub high_value_risks: Vec<RiskBrief>,
    pub pending_assessments: Vec<AssessmentRequest>,
}

fn total_ale(open_risks: &[Risk]) -> f64 {
    round_to(open_risks.iter().filter_map(|r| r.ale).sum(), 2)
}

/// Home dashboard. `unresolved` is every finding not yet closed.
pub fn overview(
    unresolved: &[Finding],
    recent: &[Finding],
    open_risks: &[Risk],
    total_risks: i64,
    pending: Paginated<AssessmentRequest>,
    now: DateTime<Utc>,
) -> Overview {
    let open: Vec<&Finding> = unresolved
        .iter()
        .filter(|f| f.status == FindingStatus::Open)
        .collect();

    let mut high_value: Vec<&Risk> = open_risks
        .iter()
        .filter(|r| r.ale.is_some_and(|a| a >= HIGH_VALUE_ALE))
        .collect();
    high_value.sort_by(|a, b| b.ale.unwrap_or(0.0).total_cmp(&a.ale.unwrap_or(0.0)));

    Overview {
        total_risks,
        total_ale: total_ale(open_risks),
        open_findings: open.len(),
        high_risk_findings: open
            .iter()
            .filter(|f| matches!(f.risk_rating, RiskLevel::High | RiskLevel::Critical))
            .count(),
        overdue_findings: unresolved.iter().filter(|f| f.is_overdue(now)).count(),
        pending_assessment_requests: pending.total,
        recent_findings: recent.iter().take(TOP_N).map(|f| FindingBrief::of(f, now)).collect(),
        high_value_risks: high_value
            .into_iter()
            .take(TOP_N)
            .map(|r| RiskBrief {
                id: r.id,
                risk_number: r.risk_number.clone(),
                title: r.title.clone(),
                asset: r.asset.clone(),
                risk_level: r.risk_level,
                ale: r.ale.unwrap_or(0.0),
            })
            .collect(),
        pending_assessments: pending.items.into_iter().take(TOP_N).collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Critical,
    Warning,
    Good,
    Excellent,
}

impl UnitStatus {
    pub fn classify(critical: usize, high: usize, overdue: usize) -> Self {
        if critical > 0 || overdue > 5 {
            Self::Critical
        } else if high > 3 || overdue > 2 {
            Self::Warning
        } else if high > 0 || overdue > 0 {
            Self::Good
        } else {
            Self::Excellent
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusinessUnitMetric {
    pub business_unit: String,
    pub total_findings: usize,
    pub critical_count: usize,
    pub high_count: usize,
    pub overdue_count: usize,
    pub status: UnitStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriticalIssue {
    pub id: Uuid,
    pub issue: String,
    pub business_unit: Option<String>,
    pub risk_level: RiskLevel,
    pub days_overdue: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinancialRisk {
    pub id: Uuid,
    pub title: String,
    pub asset: String,
    pub ale: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RiskDistribution {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutiveSummary {
    pub total_critical_high: usize,
    pub total_ale: f64,
    /// On-time share of unresolved findings that carry an SLA date.
    pub sla_performance: f64,
    pub compliance_percentage: f64,
    pub overdue_count: usize,
    pub risks_above_appetite: usize,
    pub risk_appetite_trend: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutiveDashboard {
    pub summary: ExecutiveSummary,
    pub risk_distribution: RiskDistribution,
    pub business_unit_metrics: Vec<BusinessUnitMetric>,
    pub top_critical_issues: Vec<CriticalIssue>,
    pub top_financial_risks: Vec<FinancialRisk>,
    pub selected_assessment: Option<Uuid>,
}

const UNASSIGNED_UNIT: &str = "Unassigned";

fn days_overdue(f: &Finding, now: DateTime<Utc>) -> i64 {
    match f.sla_date {
        Some(due) if f.is_overdue(now) => (now.date_naive() - due.date_naive()).num_days(),
        _ => 0,
    }
}

pub fn business_units(unresolved: &[Finding], now: DateTime<Utc>) -> Vec<BusinessUnitMetric> {
    let mut groups: BTreeMap<&str, Vec<&Finding>> = BTreeMap::new();
    for f in unresolved {
        let unit = f.business_unit.as_deref().unwrap_or(UNASSIGNED_UNIT);
        groups.entry(unit).or_default().push(f);
    }
    groups
        .into_iter()
        .map(|(unit, members)| {
            let count = |level| members.iter().filter(|f| f.risk_rating == level).count();
            let critical = count(RiskLevel::Critical);
            let high = count(RiskLevel::High);
            let overdue = members.iter().filter(|f| f.is_overdue(now)).count();
            BusinessUnitMetric {
                business_unit: unit.to_owned(),
                total_findings: members.len(),
                critical_count: critical,
                high_count: high,
                overdue_count: overdue,
                status: UnitStatus::classify(critical, high, overdue),
            }
        })
        .collect()
}

/// Critical or overdue findings, worst rating first, then longest overdue.
pub fn critical_issues(unresolved: &[Finding], now: DateTime<Utc>) -> Vec<CriticalIssue> {
    let mut issues: Vec<CriticalIssue> = unresolved
        .iter()
        .filter(|f| f.risk_rating == RiskLevel::Critical || f.is_overdue(now))
        .map(|f| CriticalIssue {
            id: f.id,
            issue: f.title.clone(),
            business_unit: f.business_unit.clone(),
            risk_level: f.risk_rating,
            days_overdue: days_overdue(f, now),
        })
        .collect();
    issues.sort_by(|a, b| {
        b.risk_level
            .cmp(&a.risk_level)
            .then(b.days_overdue.cmp(&a.days_overdue))
    });
    issues.truncate(TOP_N);
    issues
}

pub fn sla_performance(unresolved: &[Finding], now: DateTime<Utc>) -> f64 {
    let with_sla: Vec<&Finding> = unresolved.iter().filter(|f| f.sla_date.is_some()).collect();
    if with_sla.is_empty() {
        return 0.0;
    }
    let on_time = with_sla.iter().filter(|f| !f.is_overdue(now)).count();
    round_to(on_time as f64 / with_sla.len() as f64 * 100.0, 1)
}

pub fn distribution(unresolved: &[Finding]) -> RiskDistribution {
    unresolved.iter().fold(RiskDistribution::default(), |mut d, f| {
        match f.risk_rating {
            RiskLevel::Critical => d.critical += 1,
            RiskLevel::High => d.high += 1,
            RiskLevel::Medium => d.medium += 1,
            RiskLevel::Low => d.low += 1,
        }
        d
    })
}

pub fn executive(
    unresolved: &[Finding],
    open_risks: &[Risk],
    settings: &RiskLevelSettings,
    compliance: Option<&ComplianceAssessment>,
    now: DateTime<Utc>,
) -> ExecutiveDashboard {
    let dist = distribution(unresolved);
    let above_appetite = open_risks
        .iter()
        .filter(|r| settings.exceeds_appetite(r.ale, r.likelihood, r.impact, r.exposure))
        .count();

    // Open risks arrive sorted by ALE, largest first.
    let top_financial_risks = open_risks
        .iter()
        .take(TOP_N)
        .map(|r| FinancialRisk {
            id: r.id,
            title: r.title.clone(),
            asset: r.asset.clone().unwrap_or_else(|| "Not specified".to_owned()),
            ale: r.ale.unwrap_or(0.0),
        })
        .collect();

    ExecutiveDashboard {
        summary: ExecutiveSummary {
            total_critical_high: dist.critical + dist.high,
            total_ale: total_ale(open_risks),
            sla_performance: sla_performance(unresolved, now),
            compliance_percentage: compliance.map_or(0.0, |a| round_to(a.compliance_percentage, 1)),
            overdue_count: unresolved.iter().filter(|f| f.is_overdue(now)).count(),
            risks_above_appetite: above_appetite,
            risk_appetite_trend: if above_appetite > 0 { "up" } else { "stable" },
        },
        risk_distribution: dist,
        business_unit_metrics: business_units(unresolved, now),
        top_critical_issues: critical_issues(unresolved, now),
        top_financial_risks,
        selected_assessment: compliance.map(|a| a.id),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssessmentOption {
    pub value: Uuid,
    pub text: String,
}

/// Newest first, labelled "{title} ({status})".
pub fn assessment_options(mut assessments: Vec<ComplianceAssessment>) -> Vec<AssessmentOption> {
    assessments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    assessments
        .into_iter()
        .map(|a| AssessmentOption {
            value: a.id,
            text: format!("{} ({})", a.title, a.status),
        })
        .collect()
}

/// GET /dashboard
async fn get_overview(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<Overview>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    let findings = FindingRepo::new(&state.pool);
    let risks = RiskRepo::new(&state.pool);
    let unresolved = findings.unresolved().await?;
    let recent = findings.recent(TOP_N as i64).await?;
    let open_risks = risks.open().await?;
    let total_risks = risks.summary().await?.total;
    let pending = RequestRepo::new(&state.pool)
        .list::<AssessmentRequest>(
            &RequestFilter {
                status: Some(RequestStatus::Pending),
                involving: None,
            },
            Pagination::new(1, TOP_N as u32),
        )
        .await?;
    Ok(Json(overview(
        &unresolved,
        &recent,
        &open_risks,
        total_risks,
        pending,
        Utc::now(),
    )))
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecutiveQuery {
    pub assessment_id: Option<Uuid>,
}

/// GET /dashboard/executive?assessment_id=
///
/// An unknown assessment reports 0% compliance rather than failing the page.
async fn get_executive(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(query): Query<ExecutiveQuery>,
) -> Result<Json<ExecutiveDashboard>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    let unresolved = FindingRepo::new(&state.pool).unresolved().await?;
    let open_risks = RiskRepo::new(&state.pool).open().await?;
    let settings = SettingsRepo::new(&state.pool).active().await?;
    let compliance = match query.assessment_id {
        Some(id) => match ComplianceRepo::new(&state.pool).assessment(id).await {
            Ok(a) => Some(a),
            Err(DbError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        },
        None => None,
    };
    Ok(Json(executive(
        &unresolved,
        &open_risks,
        &settings,
        compliance.as_ref(),
        Utc::now(),
    )))
}

/// GET /dashboard/assessments
async fn get_assessment_options(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<Vec<AssessmentOption>>, ApiError> {
    current.require(Policy::RequireAnyRole)?;
    let page = ComplianceRepo::new(&state.pool)
        .assessments(&AssessmentFilter::default(), Pagination::new(1, ASSESSMENT_OPTIONS))
        .await?;
    Ok(Json(assessment_options(page.items)))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/dashboard", get(get_overview))
        .route("/dashboard/executive", get(get_executive))
        .route("/dashboard/assessments", get(get_assessment_options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::routes::test_support::{app, send};
    use axum::http::StatusCode;
    use chrono::{Duration, TimeZone};
    use grc_core::{
        AssessmentStatus, ExposureLevel, ImpactLevel, LikelihoodLevel, RiskStatus, TreatmentStrategy,
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap()
    }

    /// `sla_days` is relative to now; negative is overdue.
    fn finding(title: &str, rating: RiskLevel, unit: Option<&str>, sla_days: Option<i64>) -> Finding {
        let opened = now() - Duration::days(30);
        Finding {
            id: Uuid::new_v4(),
            finding_number: format!("F-2026-{}", title),
            title: title.into(),
            details: String::new(),
            impact: ImpactLevel::Medium,
            likelihood: LikelihoodLevel::Possible,
            exposure: ExposureLevel::Exposed,
            risk_rating: rating,
            status: FindingStatus::Open,
            owner: "ops".into(),
            domain: None,
            business_unit: unit.map(str::to_owned),
            business_owner: None,
            asset: None,
            technical_control: None,
            assigned_to: None,
            open_date: opened,
            sla_date: sla_days.map(|d| now() + Duration::days(d)),
            closed_date: None,
            created_at: opened,
            updated_at: opened,
            created_by: None,
            updated_by: None,
            row_version: 1,
        }
    }

    fn risk(title: &str, ale: Option<f64>, impact: ImpactLevel) -> Risk {
        Risk {
            id: Uuid::new_v4(),
            risk_number: format!("RISK-2026-{}", title),
            title: title.into(),
            description: None,
            threat_scenario: None,
            cia_triad: None,
            business_unit: None,
            asset: None,
            owner: None,
            impact,
            likelihood: LikelihoodLevel::Possible,
            exposure: ExposureLevel::Exposed,
            inherent_risk_level: RiskLevel::Medium,
            residual_risk_level: RiskLevel::Medium,
            risk_level: RiskLevel::Medium,
            treatment: TreatmentStrategy::Mitigate,
            treatment_plan: None,
            risk_assessment_reference: None,
            open_date: now(),
            next_review_date: None,
            ale,
            status: RiskStatus::Open,
            finding_id: None,
            risk_assessment_id: None,
            created_at: now(),
            updated_at: now(),
            created_by: None,
            updated_by: None,
            row_version: 1,
        }
    }

    #[test]
    fn unit_status_thresholds() {
        assert_eq!(UnitStatus::classify(1, 0, 0), UnitStatus::Critical);
        assert_eq!(UnitStatus::classify(0, 0, 6), UnitStatus::Critical);
        assert_eq!(UnitStatus::classify(0, 4, 0), UnitStatus::Warning);
        assert_eq!(UnitStatus::classify(0, 0, 3), UnitStatus::Warning);
        assert_eq!(UnitStatus::classify(0, 3, 2), UnitStatus::Good);
        assert_eq!(UnitStatus::classify(0, 0, 0), UnitStatus::Excellent);
    }

    #[test]
    fn business_units_group_and_default() {
        let rows = vec![
            finding("a", RiskLevel::High, Some("Finance"), Some(-2)),
            finding("b", RiskLevel::Low, Some("Finance"), Some(5)),
            finding("c", RiskLevel::Low, None, None),
        ];
        let units = business_units(&rows, now());
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].business_unit, "Finance");
        assert_eq!(units[0].total_findings, 2);
        assert_eq!(units[0].overdue_count, 1);
        assert_eq!(units[0].status, UnitStatus::Good);
        assert_eq!(units[1].business_unit, "Unassigned");
        assert_eq!(units[1].status, UnitStatus::Excellent);
    }

    #[test]
    fn critical_issues_rank_by_rating_then_lateness() {
        let rows = vec![
            finding("late-medium", RiskLevel::Medium, None, Some(-10)),
            finding("critical-on-time", RiskLevel::Critical, None, Some(3)),
            finding("later-medium", RiskLevel::Medium, None, Some(-20)),
            finding("low-on-time", RiskLevel::Low, None, Some(3)),
        ];
        let issues = critical_issues(&rows, now());
        let titles: Vec<&str> = issues.iter().map(|i| i.issue.as_str()).collect();
        assert_eq!(titles, vec!["critical-on-time", "later-medium", "late-medium"]);
        assert_eq!(issues[0].days_overdue, 0);
        assert_eq!(issues[1].days_overdue, 20);
    }

    #[test]
    fn sla_performance_counts_only_dated_findings() {
        let rows = vec![
            finding("a", RiskLevel::Low, None, Some(-1)),
            finding("b", RiskLevel::Low, None, Some(1)),
            finding("c", RiskLevel::Low, None, Some(2)),
            finding("d", RiskLevel::Low, None, None),
        ];
        assert_eq!(sla_performance(&rows, now()), 66.7);
        assert_eq!(sla_performance(&rows[3..], now()), 0.0);
    }

    #[test]
    fn executive_summary_totals() {
        let rows = vec![
            finding("a", RiskLevel::Critical, Some("IT"), Some(-1)),
            finding("b", RiskLevel::High, Some("IT"), Some(4)),
            finding("c", RiskLevel::Medium, Some("HR"), None),
        ];
        let risks = vec![
            risk("big", Some(2_000_000.0), ImpactLevel::Low),
            risk("small", Some(500.0), ImpactLevel::Low),
            risk("qualitative", None, ImpactLevel::Low),
        ];
        let settings = RiskLevelSettings::default();
        let d = executive(&rows, &risks, &settings, None, now());
        assert_eq!(d.summary.total_critical_high, 2);
        assert_eq!(d.summary.total_ale, 2_000_500.0);
        assert_eq!(d.summary.overdue_count, 1);
        assert_eq!(d.summary.compliance_percentage, 0.0);
        assert_eq!(
            d.risk_distribution,
            RiskDistribution {
                critical: 1,
                high: 1,
                medium: 1,
                low: 0
            }
        );
        assert_eq!(d.top_financial_risks[0].title, "big");
        assert_eq!(d.top_financial_risks[2].asset, "Not specified");
        assert_eq!(d.summary.risk_appetite_trend == "up", d.summary.risks_above_appetite > 0);
        assert_eq!(d.selected_assessment, None);
    }

    #[test]
    fn overview_lists_high_value_risks() {
        let rows = vec![
            finding("open-high", RiskLevel::High, None, Some(-1)),
            finding("open-low", RiskLevel::Low, None, Some(4)),
        ];
        let risks = vec![
            risk("mid", Some(60_000.0), ImpactLevel::Low),
            risk("top", Some(900_000.0), ImpactLevel::Low),
            risk("below", Some(49_999.0), ImpactLevel::Low),
        ];
        let pending = Pagination::new(1, 5).wrap(Vec::new(), 3);
        let o = overview(&rows, &rows, &risks, 7, pending, now());
        assert_eq!(o.total_risks, 7);
        assert_eq!(o.open_findings, 2);
        assert_eq!(o.high_risk_findings, 1);
        assert_eq!(o.overdue_findings, 1);
        assert_eq!(o.pending_assessment_requests, 3);
        let titles: Vec<&str> = o.high_value_risks.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["top", "mid"]);
        assert!(o.recent_findings[0].is_overdue);
    }

    #[test]
    fn assessment_options_newest_first() {
        let make = |title: &str, day: u32| ComplianceAssessment {
            id: Uuid::new_v4(),
            title: title.into(),
            description: None,
            status: AssessmentStatus::InProgress,
            assessor: "grc".into(),
            start_date: now(),
            due_date: None,
            completed_date: None,
            sla_deadline: None,
            compliance_percentage: 42.0,
            framework_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            created_at: Utc.with_ymd_and_hms(2026, 1, day, 0, 0, 0).unwrap(),
            updated_at: now(),
            created_by: None,
            updated_by: None,
            row_version: 1,
        };
        let options = assessment_options(vec![make("Old", 1), make("New", 20)]);
        assert_eq!(options[0].text, "New (InProgress)");
        assert_eq!(options[1].text, "Old (InProgress)");
    }

    #[tokio::test]
    async fn dashboards_require_session() {
        for uri in ["/dashboard", "/dashboard/executive", "/dashboard/assessments"] {
            let (status, _) = send(app(), "GET", uri, None).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }
}
