//! Risk register repository

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Utc};
use grc_core::sla::{self, SlaHours};
use grc_core::{
    CiaTriad, ExposureLevel, ImpactLevel, LikelihoodLevel, RiskLevel, RiskStatus, TreatmentStrategy,
};
use serde::Serialize;
use sqlx::{Acquire, FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{found, stale_or_missing, DbError, WithTotal, STALE_REASON};
use crate::models::{Paginated, Pagination};

const NUMBER_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Risk {
    pub id: Uuid,
    pub risk_number: String,
    pub title: String,
    pub description: Option<String>,
    pub threat_scenario: Option<String>,
    pub cia_triad: Option<String>,
    pub business_unit: Option<String>,
    pub asset: Option<String>,
    pub owner: Option<String>,
    #[sqlx(try_from = "String")]
    pub impact: ImpactLevel,
    #[sqlx(try_from = "String")]
    pub likelihood: LikelihoodLevel,
    #[sqlx(try_from = "String")]
    pub exposure: ExposureLevel,
    #[sqlx(try_from = "String")]
    pub inherent_risk_level: RiskLevel,
    #[sqlx(try_from = "String")]
    pub residual_risk_level: RiskLevel,
    #[sqlx(try_from = "String")]
    pub risk_level: RiskLevel,
    #[sqlx(try_from = "String")]
    pub treatment: TreatmentStrategy,
    pub treatment_plan: Option<String>,
    pub risk_assessment_reference: Option<String>,
    pub open_date: DateTime<Utc>,
    pub next_review_date: Option<DateTime<Utc>>,
    pub ale: Option<f64>,
    #[sqlx(try_from = "String")]
    pub status: RiskStatus,
    pub finding_id: Option<Uuid>,
    pub risk_assessment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub row_version: i32,
}

/// Validated risk fields.
#[derive(Debug, Clone)]
pub struct RiskInput {
    pub title: String,
    pub description: Option<String>,
    pub threat_scenario: Option<String>,
    pub cia_triad: Option<CiaTriad>,
    pub business_unit: Option<String>,
    pub asset: Option<String>,
    pub owner: Option<String>,
    pub impact: ImpactLevel,
    pub likelihood: LikelihoodLevel,
    pub exposure: ExposureLevel,
    pub inherent_risk_level: RiskLevel,
    pub residual_risk_level: RiskLevel,
    pub treatment: TreatmentStrategy,
    pub treatment_plan: Option<String>,
    pub risk_assessment_reference: Option<String>,
    pub open_date: Option<DateTime<Utc>>,
    pub next_review_date: Option<DateTime<Utc>>,
    pub ale: Option<f64>,
    pub status: RiskStatus,
    pub finding_id: Option<Uuid>,
    pub risk_assessment_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct RiskFilter {
    pub status: Option<RiskStatus>,
    pub level: Option<RiskLevel>,
    pub risk_assessment_id: Option<Uuid>,
    pub finding_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RiskSummary {
    pub total: i64,
    pub by_level: BTreeMap<String, i64>,
    pub by_status: BTreeMap<String, i64>,
}

pub struct RiskRepo<'a> {
    pool: &'a PgPool,
}

impl<'a> RiskRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, filter: &RiskFilter, page: Pagination) -> Result<Paginated<Risk>, DbError> {
        let rows: Vec<WithTotal<Risk>> = sqlx::query_as(
            r#"
            SELECT *, COUNT(*) OVER() AS total
            FROM risks
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR risk_level = $2)
              AND ($3::uuid IS NULL OR risk_assessment_id = $3)
              AND ($4::uuid IS NULL OR finding_id = $4)
            ORDER BY created_at DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.level.map(|l| l.as_str()))
        .bind(filter.risk_assessment_id)
        .bind(filter.finding_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(self.pool)
        .await?;
        Ok(WithTotal::paginate(rows, page))
    }

    pub async fn get(&self, id: Uuid) -> Result<Risk, DbError> {
        let row = sqlx::query_as::<_, Risk>("SELECT * FROM risks WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        found(row, "risk", id)
    }

    pub async fn create(&self, input: RiskInput, actor: &str) -> Result<Risk, DbError> {
        let mut tx = self.pool.begin().await?;
        let risk = create_in(&mut tx, &input, actor).await?;
        tx.commit().await?;
        Ok(risk)
    }

    pub async fn update(&self, id: Uuid, row_version: i32, input: RiskInput, actor: &str) -> Result<Risk, DbError> {
        let row = sqlx::query_as::<_, Risk>(
            r#"
            UPDATE risks SET
                title = $3, description = $4, threat_scenario = $5, cia_triad = $6,
                business_unit = $7, asset = $8, owner = $9, impact = $10, likelihood = $11,
                exposure = $12, inherent_risk_level = $13, residual_risk_level = $14,
                risk_level = $14, treatment = $15, treatment_plan = $16,
                risk_assessment_reference = $17, open_date = COALESCE($18, open_date),
                next_review_date = $19, ale = $20, status = $21, finding_id = $22,
                risk_assessment_id = $23,
                updated_by = $24, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1 AND row_version = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(row_version)
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.threat_scenario)
        .bind(input.cia_triad.map(|c| c.as_str()))
        .bind(&input.business_unit)
        .bind(&input.asset)
        .bind(&input.owner)
        .bind(input.impact.as_str())
        .bind(input.likelihood.as_str())
        .bind(input.exposure.as_str())
        .bind(input.inherent_risk_level.as_str())
        .bind(input.residual_risk_level.as_str())
        .bind(input.treatment.as_str())
        .bind(&input.treatment_plan)
        .bind(&input.risk_assessment_reference)
        .bind(input.open_date)
        .bind(input.next_review_date)
        .bind(input.ale)
        .bind(input.status.as_str())
        .bind(input.finding_id)
        .bind(input.risk_assessment_id)
        .bind(actor)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| DbError::classify(e, "risk", id.to_string()))?;
        match row {
            Some(r) => Ok(r),
            None => Err(stale_or_missing(self.pool, "risks", "risk", id).await),
        }
    }

    /// Accept the risk; the next review falls `hours.review(level)` from now.
    ///
    /// The level is read under a row lock in the same transaction as the update.
    pub async fn accept(
        &self,
        id: Uuid,
        expected: Option<i32>,
        hours: &SlaHours,
        actor: &str,
    ) -> Result<Risk, DbError> {
        let mut tx = self.pool.begin().await?;
        let current = sqlx::query_as::<_, Risk>("SELECT * FROM risks WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let current = found(current, "risk", id)?;
        if expected.is_some_and(|v| v != current.row_version) {
            return Err(DbError::conflict("risk", STALE_REASON));
        }

        let next_review = sla::deadline(Utc::now(), hours.review(current.risk_level));
        let risk = sqlx::query_as::<_, Risk>(
            r#"
            UPDATE risks SET
                status = 'Accepted', treatment = 'Accept', next_review_date = $2,
                updated_by = $3, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(next_review)
        .bind(actor)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        tracing::info!(risk = %risk.risk_number, review = %next_review, "risk accepted");
        Ok(risk)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), DbError> {
        super::delete_by_id(self.pool, "risks", "risk", id).await
    }

    pub async fn summary(&self) -> Result<RiskSummary, DbError> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT risk_level, status, COUNT(*) FROM risks GROUP BY risk_level, status",
        )
        .fetch_all(self.pool)
        .await?;

        let mut summary = RiskSummary::default();
        for level in RiskLevel::ALL {
            summary.by_level.insert(level.to_string(), 0);
        }
        for status in RiskStatus::ALL {
            summary.by_status.insert(status.to_string(), 0);
        }
        for (level, status, n) in rows {
            summary.total += n;
            *summary.by_level.entry(level).or_default() += n;
            *summary.by_status.entry(status).or_default() += n;
        }
        Ok(summary)
    }

    /// Open risks, largest ALE first; risks without an ALE trail.
    pub async fn open(&self) -> Result<Vec<Risk>, DbError> {
        let rows = sqlx::query_as::<_, Risk>(
            "SELECT * FROM risks WHERE status = 'Open' ORDER BY ale DESC NULLS LAST, created_at",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// Accepted risks, used by the SLA dashboard.
    pub async fn accepted(&self) -> Result<Vec<Risk>, DbError> {
        let rows = sqlx::query_as::<_, Risk>(
            "SELECT * FROM risks WHERE status = 'Accepted' ORDER BY updated_at",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }
}

/// Insert inside an existing transaction; used by backlog approval as well.
///
/// Each attempt runs under a savepoint so a taken number does not abort `tx`.
pub(crate) async fn create_in(
    tx: &mut Transaction<'_, Postgres>,
    input: &RiskInput,
    actor: &str,
) -> Result<Risk, DbError> {
    let year = Utc::now().year();
    let mut attempt = 0;
    loop {
        let max: i32 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(CAST(SPLIT_PART(risk_number, '-', 3) AS INTEGER)), 0)
            FROM risks
            WHERE risk_number LIKE $1
            "#,
        )
        .bind(format!("RISK-{}-%", year))
        .fetch_one(&mut **tx)
        .await?;
        let number = format!("RISK-{}-{:03}", year, max + 1);

        let mut savepoint = (&mut **tx).begin().await?;
        let result = sqlx::query_as::<_, Risk>(
            r#"
            INSERT INTO risks (
                risk_number, title, description, threat_scenario, cia_triad, business_unit,
                asset, owner, impact, likelihood, exposure, inherent_risk_level,
                residual_risk_level, risk_level, treatment, treatment_plan,
                risk_assessment_reference, open_date, next_review_date, ale, status,
                finding_id, risk_assessment_id, created_by, updated_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13, $14, $15,
                    $16, COALESCE($17, NOW()), $18, $19, $20, $21, $22, $23, $23)
            RETURNING *
            "#,
        )
        .bind(&number)
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.threat_scenario)
        .bind(input.cia_triad.map(|c| c.as_str()))
        .bind(&input.business_unit)
        .bind(&input.asset)
        .bind(&input.owner)
        .bind(input.impact.as_str())
        .bind(input.likelihood.as_str())
        .bind(input.exposure.as_str())
        .bind(input.inherent_risk_level.as_str())
        .bind(input.residual_risk_level.as_str())
        .bind(input.treatment.as_str())
        .bind(&input.treatment_plan)
        .bind(&input.risk_assessment_reference)
        .bind(input.open_date)
        .bind(input.next_review_date)
        .bind(input.ale)
        .bind(input.status.as_str())
        .bind(input.finding_id)
        .bind(input.risk_assessment_id)
        .bind(actor)
        .fetch_one(&mut *savepoint)
        .await;

        match result {
            Ok(risk) => {
                savepoint.commit().await?;
                tracing::info!(risk = %risk.risk_number, level = %risk.risk_level, "risk created");
                return Ok(risk);
            }
            Err(e) => {
                let err = DbError::classify(e, "risk number", number.clone());
                if !(err.is_unique_violation() && attempt + 1 < NUMBER_ATTEMPTS) {
                    return Err(err);
                }
                savepoint.rollback().await?;
                tracing::debug!(number = %number, "risk number taken, retrying");
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires database"]
    async fn summary_lists_every_level() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = crate::db::create_pool(&url).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();

        let summary = RiskRepo::new(&pool).summary().await.unwrap();
        assert_eq!(summary.by_level.len(), 4);
        assert_eq!(summary.by_status.len(), 4);
    }

    fn input() -> RiskInput {
        RiskInput {
            title: "Ransomware on file servers".into(),
            description: None,
            threat_scenario: None,
            cia_triad: None,
            business_unit: None,
            asset: None,
            owner: None,
            impact: ImpactLevel::High,
            likelihood: LikelihoodLevel::Likely,
            exposure: ExposureLevel::Exposed,
            inherent_risk_level: RiskLevel::High,
            residual_risk_level: RiskLevel::High,
            treatment: TreatmentStrategy::Mitigate,
            treatment_plan: None,
            risk_assessment_reference: None,
            open_date: None,
            next_review_date: None,
            ale: None,
            status: RiskStatus::Open,
            finding_id: None,
            risk_assessment_id: None,
        }
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn accept_sets_review_from_level() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = crate::db::create_pool(&url).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();

        let repo = RiskRepo::new(&pool);
        let risk = repo.create(input(), "tester").await.unwrap();
        let hours = SlaHours::default();

        let err = repo
            .accept(risk.id, Some(risk.row_version + 1), &hours, "tester")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict { .. }));

        let before = Utc::now();
        let accepted = repo.accept(risk.id, Some(risk.row_version), &hours, "tester").await.unwrap();
        assert_eq!(accepted.status, RiskStatus::Accepted);
        assert_eq!(accepted.treatment, TreatmentStrategy::Accept);
        let review = accepted.next_review_date.unwrap();
        assert!(review >= sla::deadline(before, hours.review(RiskLevel::High)));

        let missing = repo.accept(Uuid::new_v4(), None, &hours, "tester").await.unwrap_err();
        assert!(matches!(missing, DbError::NotFound { .. }));
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn concurrent_accepts_at_one_version_let_one_through() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = crate::db::create_pool(&url).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();

        let repo = RiskRepo::new(&pool);
        let risk = repo.create(input(), "tester").await.unwrap();
        let hours = SlaHours::default();

        let (a, b) = tokio::join!(
            repo.accept(risk.id, Some(risk.row_version), &hours, "alice"),
            repo.accept(risk.id, Some(risk.row_version), &hours, "bob"),
        );
        let accepted = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(accepted, 1);
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser.unwrap_err(), DbError::Conflict { .. }));
    }
}
