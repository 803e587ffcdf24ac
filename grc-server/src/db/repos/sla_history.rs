//! SLA history repository
//!
//! One row per item and SLA type, written when the item completes. Rows
//! outlive the item they describe, so `item_id` carries no foreign key.

use chrono::{DateTime, Utc};
use grc_core::sla::{self, AssessmentKind, SlaHours};
use grc_core::sla_history::{HistoryRow, SlaEvent, SlaOutcome, SlaType};
use grc_core::RiskLevel;
use serde::Serialize;
use sqlx::{FromRow, PgExecutor, PgPool};
use uuid::Uuid;

use super::{DbError, Finding, RiskAssessment, WithTotal};
use crate::db::repos::compliance::ComplianceAssessment;
use crate::models::{Paginated, Pagination};

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SlaHistoryEntry {
    pub id: Uuid,
    #[sqlx(try_from = "String")]
    pub sla_type: SlaType,
    pub item_type: String,
    pub item_id: Uuid,
    pub item_description: String,
    #[sqlx(try_from = "String")]
    pub risk_level: RiskLevel,
    pub assigned_to: String,
    pub sla_start_date: DateTime<Utc>,
    pub sla_deadline: DateTime<Utc>,
    pub completed_date: DateTime<Utc>,
    pub sla_hours: i32,
    #[sqlx(try_from = "String")]
    pub compliance_status: SlaOutcome,
    pub completion_hours: f64,
    pub variance_hours: f64,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl SlaHistoryEntry {
    fn report_row(self) -> HistoryRow {
        HistoryRow {
            sla_type: self.sla_type,
            risk_level: self.risk_level,
            assigned_to: self.assigned_to,
            outcome: self.compliance_status,
            completed: self.completed_date,
            completion_hours: self.completion_hours,
            variance_hours: self.variance_hours,
        }
    }
}

/// A completed item about to be written to history.
#[derive(Debug, Clone)]
pub(crate) struct Completion {
    pub item_type: &'static str,
    pub item_id: Uuid,
    pub description: String,
    pub event: SlaEvent,
}

const UNASSIGNED: &str = "Unassigned";

impl Completion {
    /// Remediation of a closed finding, measured from its open date to its SLA date.
    pub fn finding(f: &Finding, completed: DateTime<Utc>) -> Option<Self> {
        let deadline = f.sla_date?;
        Some(Self {
            item_type: "Finding",
            item_id: f.id,
            description: f.title.clone(),
            event: SlaEvent {
                sla_type: SlaType::Remediation,
                risk_level: f.risk_rating,
                assigned_to: f.assigned_to.clone().unwrap_or_else(|| f.owner.clone()),
                started: f.open_date,
                deadline,
                completed,
            },
        })
    }

    pub fn risk_assessment(a: &RiskAssessment, hours: &SlaHours, completed: DateTime<Utc>) -> Self {
        Self::assessment(
            "RiskAssessment",
            a.id,
            &a.title,
            &a.assessor,
            a.created_at,
            sla::deadline(a.created_at, hours.assessment(AssessmentKind::Risk)),
            completed,
        )
    }

    /// The assessment's own SLA deadline wins over the matrix hours.
    pub fn compliance_assessment(a: &ComplianceAssessment, hours: &SlaHours, completed: DateTime<Utc>) -> Self {
        let deadline = a
            .sla_deadline
            .unwrap_or_else(|| sla::deadline(a.start_date, hours.assessment(AssessmentKind::Compliance)));
        Self::assessment(
            "ComplianceAssessment",
            a.id,
            &a.title,
            &a.assessor,
            a.start_date,
            deadline,
            completed,
        )
    }

    fn assessment(
        item_type: &'static str,
        item_id: Uuid,
        title: &str,
        assessor: &str,
        started: DateTime<Utc>,
        deadline: DateTime<Utc>,
        completed: DateTime<Utc>,
    ) -> Self {
        let assigned_to = if assessor.trim().is_empty() {
            UNASSIGNED.to_owned()
        } else {
            assessor.to_owned()
        };
        Self {
            item_type,
            item_id,
            description: title.to_owned(),
            event: SlaEvent {
                sla_type: SlaType::Assessment,
                risk_level: RiskLevel::Medium,
                assigned_to,
                started,
                deadline,
                completed,
            },
        }
    }
}

/// Write one completion; an item already recorded for this SLA type is left alone.
pub(crate) async fn record<'e, E>(exec: E, c: &Completion, actor: &str) -> Result<bool, DbError>
where
    E: PgExecutor<'e>,
{
    let e = &c.event;
    let result = sqlx::query(
        r#"
        INSERT INTO sla_history (
            sla_type, item_type, item_id, item_description, risk_level, assigned_to,
            sla_start_date, sla_deadline, completed_date, sla_hours, compliance_status,
            completion_hours, variance_hours, created_by
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (item_type, item_id, sla_type) DO NOTHING
        "#,
    )
    .bind(e.sla_type.as_str())
    .bind(c.item_type)
    .bind(c.item_id)
    .bind(&c.description)
    .bind(e.risk_level.as_str())
    .bind(&e.assigned_to)
    .bind(e.started)
    .bind(e.deadline)
    .bind(e.completed)
    .bind(e.sla_hours())
    .bind(e.outcome().as_str())
    .bind(e.completion_hours())
    .bind(e.variance_hours())
    .bind(actor)
    .execute(exec)
    .await?;

    let recorded = result.rows_affected() == 1;
    if recorded {
        tracing::debug!(item = %c.item_id, kind = c.item_type, outcome = %e.outcome(), "sla history recorded");
    }
    Ok(recorded)
}

#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub sla_type: Option<SlaType>,
    pub item_id: Option<Uuid>,
}

pub struct SlaHistoryRepo<'a> {
    pool: &'a PgPool,
}

impl<'a> SlaHistoryRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, filter: &HistoryFilter, page: Pagination) -> Result<Paginated<SlaHistoryEntry>, DbError> {
        let rows: Vec<WithTotal<SlaHistoryEntry>> = sqlx::query_as(
            r#"
            SELECT *, COUNT(*) OVER() AS total
            FROM sla_history
            WHERE ($1::timestamptz IS NULL OR completed_date >= $1)
              AND ($2::timestamptz IS NULL OR completed_date <= $2)
              AND ($3::text IS NULL OR sla_type = $3)
              AND ($4::uuid IS NULL OR item_id = $4)
            ORDER BY completed_date DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.sla_type.map(|t| t.as_str()))
        .bind(filter.item_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(self.pool)
        .await?;
        Ok(WithTotal::paginate(rows, page))
    }

    /// Rows completed in `[from, to]`, reduced for reporting.
    pub async fn report_rows(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<HistoryRow>, DbError> {
        let rows = sqlx::query_as::<_, SlaHistoryEntry>(
            r#"
            SELECT * FROM sla_history
            WHERE completed_date >= $1 AND completed_date <= $2
            ORDER BY completed_date
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(SlaHistoryEntry::report_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use grc_core::{ExposureLevel, FindingStatus, ImpactLevel, LikelihoodLevel};

    fn finding(sla_date: Option<DateTime<Utc>>, assigned_to: Option<&str>) -> Finding {
        let opened = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        Finding {
            id: Uuid::new_v4(),
            finding_number: "F-2026-0001".into(),
            title: "Weak TLS".into(),
            details: "TLS 1.0 enabled".into(),
            impact: ImpactLevel::High,
            likelihood: LikelihoodLevel::Likely,
            exposure: ExposureLevel::Exposed,
            risk_rating: RiskLevel::High,
            status: FindingStatus::Closed,
            owner: "netops".into(),
            domain: None,
            business_unit: None,
            business_owner: None,
            asset: None,
            technical_control: None,
            assigned_to: assigned_to.map(str::to_owned),
            open_date: opened,
            sla_date,
            closed_date: None,
            created_at: opened,
            updated_at: opened,
            created_by: None,
            updated_by: None,
            row_version: 2,
        }
    }

    #[test]
    fn finding_completion_measures_against_sla_date() {
        let f = finding(Some(Utc.with_ymd_and_hms(2026, 5, 2, 9, 0, 0).unwrap()), None);
        let late = f.open_date + Duration::hours(30);
        let c = Completion::finding(&f, late).unwrap();
        assert_eq!(c.item_type, "Finding");
        assert_eq!(c.event.sla_type, SlaType::Remediation);
        assert_eq!(c.event.assigned_to, "netops");
        assert_eq!(c.event.sla_hours(), 24);
        assert_eq!(c.event.outcome(), SlaOutcome::Breached);

        let f = finding(f.sla_date, Some("alice"));
        assert_eq!(Completion::finding(&f, late).unwrap().event.assigned_to, "alice");
    }

    #[test]
    fn finding_without_sla_date_is_not_tracked() {
        let f = finding(None, None);
        assert!(Completion::finding(&f, Utc::now()).is_none());
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn closing_a_finding_records_history_once() {
        use crate::db::repos::FindingRepo;
        use crate::db::{create_pool, run_migrations};
        use crate::models::input::FindingRequest;

        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = create_pool(&url).await.expect("pool");
        run_migrations(&pool).await.expect("migrations");

        let input = FindingRequest {
            title: "History check".into(),
            details: "closed twice".into(),
            impact: Some(ImpactLevel::Low),
            likelihood: Some(LikelihoodLevel::Unlikely),
            exposure: Some(ExposureLevel::SlightlyExposed),
            owner: "tester".into(),
            ..Default::default()
        }
        .validate()
        .unwrap();
        let repo = FindingRepo::new(&pool);
        let created = repo.create(input, &SlaHours::default(), "tester").await.unwrap();
        repo.set_status(created.id, FindingStatus::Closed, None, "tester").await.unwrap();
        repo.set_status(created.id, FindingStatus::Closed, None, "tester").await.unwrap();

        let filter = HistoryFilter {
            item_id: Some(created.id),
            ..Default::default()
        };
        let page = SlaHistoryRepo::new(&pool)
            .list(&filter, Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].compliance_status, SlaOutcome::Completed);
        assert_eq!(page.items[0].sla_type, SlaType::Remediation);
    }
}
