//! Finding repository
//!
//! Rating and SLA date are derived before insert; the numbering scheme is
//! `F-{year}-{n:04}`, where n counts this year's findings.

use chrono::{DateTime, Datelike, Utc};
use grc_core::sla::{self, SlaHours};
use grc_core::{rating, ExposureLevel, FindingStatus, ImpactLevel, LikelihoodLevel, RiskLevel};
use serde::Serialize;
use sqlx::{Acquire, FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::sla_history::{self, Completion};
use super::{found, stale_or_missing, DbError, WithTotal};
use crate::models::{Paginated, Pagination};

const NUMBER_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Finding {
    pub id: Uuid,
    pub finding_number: String,
    pub title: String,
    pub details: String,
    #[sqlx(try_from = "String")]
    pub impact: ImpactLevel,
    #[sqlx(try_from = "String")]
    pub likelihood: LikelihoodLevel,
    #[sqlx(try_from = "String")]
    pub exposure: ExposureLevel,
    #[sqlx(try_from = "String")]
    pub risk_rating: RiskLevel,
    #[sqlx(try_from = "String")]
    pub status: FindingStatus,
    pub owner: String,
    pub domain: Option<String>,
    pub business_unit: Option<String>,
    pub business_owner: Option<String>,
    pub asset: Option<String>,
    pub technical_control: Option<String>,
    pub assigned_to: Option<String>,
    pub open_date: DateTime<Utc>,
    pub sla_date: Option<DateTime<Utc>>,
    pub closed_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub row_version: i32,
}

impl Finding {
    /// Open past its SLA date.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status != FindingStatus::Closed && self.sla_date.is_some_and(|d| now > d)
    }
}

/// Validated finding fields.
#[derive(Debug, Clone)]
pub struct FindingInput {
    pub title: String,
    pub details: String,
    pub impact: ImpactLevel,
    pub likelihood: LikelihoodLevel,
    pub exposure: ExposureLevel,
    pub status: FindingStatus,
    pub owner: String,
    pub domain: Option<String>,
    pub business_unit: Option<String>,
    pub business_owner: Option<String>,
    pub asset: Option<String>,
    pub technical_control: Option<String>,
    pub assigned_to: Option<String>,
    pub open_date: Option<DateTime<Utc>>,
    pub sla_date: Option<DateTime<Utc>>,
}

impl FindingInput {
    pub fn rating(&self) -> RiskLevel {
        rating::finding_rating(self.impact, self.likelihood, self.exposure)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FindingFilter {
    pub status: Option<FindingStatus>,
    pub rating: Option<RiskLevel>,
    pub overdue: Option<bool>,
    pub search: Option<String>,
}

pub struct FindingRepo<'a> {
    pool: &'a PgPool,
}

impl<'a> FindingRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, filter: &FindingFilter, page: Pagination) -> Result<Paginated<Finding>, DbError> {
        let rows: Vec<WithTotal<Finding>> = sqlx::query_as(
            r#"
            SELECT *, COUNT(*) OVER() AS total
            FROM findings
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR risk_rating = $2)
              AND ($3::bool IS NULL
                   OR $3 = (status <> 'Closed' AND sla_date IS NOT NULL AND sla_date < NOW()))
              AND ($4::text IS NULL OR title ILIKE $4 OR owner ILIKE $4 OR asset ILIKE $4)
            ORDER BY created_at DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.rating.map(|r| r.as_str()))
        .bind(filter.overdue)
        .bind(filter.search.as_deref().map(super::like_pattern))
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(self.pool)
        .await?;
        Ok(WithTotal::paginate(rows, page))
    }

    pub async fn get(&self, id: Uuid) -> Result<Finding, DbError> {
        let row = sqlx::query_as::<_, Finding>("SELECT * FROM findings WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        found(row, "finding", id)
    }

    /// Insert with a derived rating, number and (if absent) SLA date.
    pub async fn create(&self, input: FindingInput, sla_hours: &SlaHours, actor: &str) -> Result<Finding, DbError> {
        let mut tx = self.pool.begin().await?;
        let finding = create_in(&mut tx, &input, sla_hours, actor).await?;
        tx.commit().await?;
        Ok(finding)
    }

    /// Full update; the rating is recomputed. A closed status stamps `closed_date`
    /// and records remediation SLA history.
    pub async fn update(
        &self,
        id: Uuid,
        row_version: i32,
        input: FindingInput,
        actor: &str,
    ) -> Result<Finding, DbError> {
        let rating = input.rating();
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, Finding>(
            r#"
            UPDATE findings SET
                title = $3, details = $4, impact = $5, likelihood = $6, exposure = $7,
                risk_rating = $8, status = $9, owner = $10, domain = $11, business_unit = $12,
                business_owner = $13, asset = $14, technical_control = $15, assigned_to = $16,
                open_date = COALESCE($17, open_date), sla_date = COALESCE($18, sla_date),
                closed_date = CASE WHEN $9 = 'Closed' THEN COALESCE(closed_date, NOW()) ELSE NULL END,
                updated_by = $19, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1 AND row_version = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(row_version)
        .bind(&input.title)
        .bind(&input.details)
        .bind(input.impact.as_str())
        .bind(input.likelihood.as_str())
        .bind(input.exposure.as_str())
        .bind(rating.as_str())
        .bind(input.status.as_str())
        .bind(&input.owner)
        .bind(&input.domain)
        .bind(&input.business_unit)
        .bind(&input.business_owner)
        .bind(&input.asset)
        .bind(&input.technical_control)
        .bind(&input.assigned_to)
        .bind(input.open_date)
        .bind(input.sla_date)
        .bind(actor)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(finding) = row else {
            tx.rollback().await?;
            return Err(stale_or_missing(self.pool, "findings", "finding", id).await);
        };
        record_closure(&mut tx, &finding, actor).await?;
        tx.commit().await?;
        Ok(finding)
    }

    /// Change status; `expected` guards against a stale read when given.
    pub async fn set_status(
        &self,
        id: Uuid,
        status: FindingStatus,
        expected: Option<i32>,
        actor: &str,
    ) -> Result<Finding, DbError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, Finding>(
            r#"
            UPDATE findings SET
                status = $2,
                closed_date = CASE WHEN $2 = 'Closed' THEN NOW() ELSE closed_date END,
                updated_by = $3, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1 AND ($4::int IS NULL OR row_version = $4)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(actor)
        .bind(expected)
        .fetch_optional(&mut *tx)
        .await?;
        let finding = match (row, expected) {
            (Some(finding), _) => finding,
            (None, Some(_)) => {
                tx.rollback().await?;
                return Err(stale_or_missing(self.pool, "findings", "finding", id).await);
            }
            (None, None) => return Err(DbError::not_found("finding", id)),
        };
        record_closure(&mut tx, &finding, actor).await?;
        tx.commit().await?;
        tracing::info!(finding = %finding.finding_number, status = %status, "finding status changed");
        Ok(finding)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), DbError> {
        super::delete_by_id(self.pool, "findings", "finding", id).await
    }

    /// Open findings, used by the SLA dashboard.
    pub async fn open(&self) -> Result<Vec<Finding>, DbError> {
        let rows = sqlx::query_as::<_, Finding>(
            "SELECT * FROM findings WHERE status = 'Open' ORDER BY created_at",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// Findings not yet closed, newest first.
    pub async fn unresolved(&self) -> Result<Vec<Finding>, DbError> {
        let rows = sqlx::query_as::<_, Finding>(
            "SELECT * FROM findings WHERE status <> 'Closed' ORDER BY created_at DESC",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<Finding>, DbError> {
        let rows = sqlx::query_as::<_, Finding>("SELECT * FROM findings ORDER BY created_at DESC LIMIT $1")
            .bind(limit)
            .fetch_all(self.pool)
            .await?;
        Ok(rows)
    }
}

/// Record remediation SLA history for a finding that is now closed.
pub(crate) async fn record_closure(
    tx: &mut Transaction<'_, Postgres>,
    finding: &Finding,
    actor: &str,
) -> Result<(), DbError> {
    if finding.status != FindingStatus::Closed {
        return Ok(());
    }
    let completed = finding.closed_date.unwrap_or_else(Utc::now);
    if let Some(c) = Completion::finding(finding, completed) {
        sla_history::record(&mut **tx, &c, actor).await?;
    }
    Ok(())
}

/// Insert inside an existing transaction; backlog approval uses this too.
///
/// Each attempt runs under a savepoint so a taken number does not abort `tx`.
pub(crate) async fn create_in(
    tx: &mut Transaction<'_, Postgres>,
    input: &FindingInput,
    sla_hours: &SlaHours,
    actor: &str,
) -> Result<Finding, DbError> {
    let now = Utc::now();
    let open_date = input.open_date.unwrap_or(now);
    let rating = input.rating();
    let sla_date = input
        .sla_date
        .unwrap_or_else(|| sla::deadline(open_date, sla_hours.remediation(rating)));

    let mut attempt = 0;
    loop {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM findings WHERE EXTRACT(YEAR FROM created_at)::int = $1",
        )
        .bind(now.year())
        .fetch_one(&mut **tx)
        .await?;
        let number = format!("F-{}-{:04}", now.year(), count + 1 + i64::from(attempt));

        let mut savepoint = (&mut **tx).begin().await?;
        let result = sqlx::query_as::<_, Finding>(
            r#"
            INSERT INTO findings (
                finding_number, title, details, impact, likelihood, exposure, risk_rating,
                status, owner, domain, business_unit, business_owner, asset,
                technical_control, assigned_to, open_date, sla_date, created_by, updated_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $18)
            RETURNING *
            "#,
        )
        .bind(&number)
        .bind(&input.title)
        .bind(&input.details)
        .bind(input.impact.as_str())
        .bind(input.likelihood.as_str())
        .bind(input.exposure.as_str())
        .bind(rating.as_str())
        .bind(input.status.as_str())
        .bind(&input.owner)
        .bind(&input.domain)
        .bind(&input.business_unit)
        .bind(&input.business_owner)
        .bind(&input.asset)
        .bind(&input.technical_control)
        .bind(&input.assigned_to)
        .bind(open_date)
        .bind(sla_date)
        .bind(actor)
        .fetch_one(&mut *savepoint)
        .await
        .map_err(|e| DbError::classify(e, "finding number", number.clone()));

        match result {
            Ok(finding) => {
                savepoint.commit().await?;
                tracing::info!(finding = %finding.finding_number, rating = %rating, "finding created");
                return Ok(finding);
            }
            Err(e) if e.is_unique_violation() && attempt + 1 < NUMBER_ATTEMPTS => {
                savepoint.rollback().await?;
                tracing::debug!(number = %number, "finding number taken, retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
