//! Reference data (asset names, business units, owners, controls)

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use grc_core::reference::{self, Ranked, ReferenceValue};
use grc_core::ReferenceCategory;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{found, stale_or_missing, DbError};

/// Upper bound on rows pulled for ranking a term search.
const CANDIDATE_LIMIT: i64 = 200;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ReferenceData {
    pub id: Uuid,
    pub value: String,
    #[sqlx(try_from = "String")]
    pub category: ReferenceCategory,
    pub description: Option<String>,
    pub usage_count: i32,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub row_version: i32,
}

/// Result of a bulk insert.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkOutcome {
    pub created: usize,
    pub skipped_invalid: Vec<String>,
    pub skipped_duplicate: Vec<String>,
}

pub struct ReferenceDataRepo<'a> {
    pool: &'a PgPool,
}

impl<'a> ReferenceDataRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, category: Option<ReferenceCategory>, include_deleted: bool) -> Result<Vec<ReferenceData>, DbError> {
        let rows = sqlx::query_as::<_, ReferenceData>(
            r#"
            SELECT * FROM reference_data
            WHERE ($1::text IS NULL OR category = $1)
              AND ($2 OR NOT is_deleted)
            ORDER BY category, value
            "#,
        )
        .bind(category.map(|c| c.as_str()))
        .bind(include_deleted)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get(&self, id: Uuid) -> Result<ReferenceData, DbError> {
        let row = sqlx::query_as::<_, ReferenceData>("SELECT * FROM reference_data WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        found(row, "reference data", id)
    }

    pub async fn create(
        &self,
        category: ReferenceCategory,
        value: &ReferenceValue,
        description: Option<&str>,
        actor: &str,
    ) -> Result<ReferenceData, DbError> {
        let row = sqlx::query_as::<_, ReferenceData>(
            r#"
            INSERT INTO reference_data (value, category, description, created_by, updated_by)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING *
            "#,
        )
        .bind(value.as_str())
        .bind(category.as_str())
        .bind(description)
        .bind(actor)
        .fetch_one(self.pool)
        .await
        .map_err(|e| DbError::classify(e, "reference data", value.as_str()))?;
        Ok(row)
    }

    pub async fn update(
        &self,
        id: Uuid,
        row_version: i32,
        value: &ReferenceValue,
        description: Option<&str>,
        actor: &str,
    ) -> Result<ReferenceData, DbError> {
        let row = sqlx::query_as::<_, ReferenceData>(
            r#"
            UPDATE reference_data SET
                value = $3, description = $4,
                updated_by = $5, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1 AND row_version = $2 AND NOT is_deleted
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(row_version)
        .bind(value.as_str())
        .bind(description)
        .bind(actor)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| DbError::classify(e, "reference data", value.as_str()))?;
        match row {
            Some(r) => Ok(r),
            None => Err(stale_or_missing(self.pool, "reference_data", "reference data", id).await),
        }
    }

    /// Soft delete; the value may be created again afterwards.
    pub async fn delete(&self, id: Uuid, actor: &str) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE reference_data SET
                is_deleted = TRUE, deleted_at = NOW(), deleted_by = $2,
                updated_by = $2, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1 AND NOT is_deleted
            "#,
        )
        .bind(id)
        .bind(actor)
        .execute(self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("reference data", id));
        }
        Ok(())
    }

    pub async fn record_use(&self, id: Uuid) -> Result<ReferenceData, DbError> {
        let row = sqlx::query_as::<_, ReferenceData>(
            r#"
            UPDATE reference_data SET usage_count = usage_count + 1
            WHERE id = $1 AND NOT is_deleted
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        found(row, "reference data", id)
    }

    /// Most used values for an empty term; ranked contains-matches otherwise.
    pub async fn search(&self, category: ReferenceCategory, term: &str) -> Result<Vec<ReferenceData>, DbError> {
        let term = term.trim();
        if term.is_empty() {
            let rows = sqlx::query_as::<_, ReferenceData>(
                r#"
                SELECT * FROM reference_data
                WHERE category = $1 AND NOT is_deleted
                ORDER BY usage_count DESC, value
                LIMIT $2
                "#,
            )
            .bind(category.as_str())
            .bind(reference::POPULAR_LIMIT as i64)
            .fetch_all(self.pool)
            .await?;
            return Ok(rows);
        }

        let candidates = sqlx::query_as::<_, ReferenceData>(
            r#"
            SELECT * FROM reference_data
            WHERE category = $1 AND NOT is_deleted AND value ILIKE $2
            ORDER BY usage_count DESC
            LIMIT $3
            "#,
        )
        .bind(category.as_str())
        .bind(super::like_pattern(term))
        .bind(CANDIDATE_LIMIT)
        .fetch_all(self.pool)
        .await?;

        let ranked: Vec<String> = reference::rank(
            candidates
                .iter()
                .map(|r| Ranked {
                    value: &r.value,
                    usage_count: r.usage_count,
                })
                .collect(),
            term,
        )
        .into_iter()
        .map(|r| r.value.to_owned())
        .collect();

        let mut rows = candidates;
        rows.retain(|r| ranked.contains(&r.value));
        rows.sort_by_key(|r| ranked.iter().position(|v| *v == r.value));
        Ok(rows)
    }

    /// Insert a batch, skipping invalid values and duplicates (stored or in-batch).
    pub async fn bulk_create<'v>(
        &self,
        category: ReferenceCategory,
        values: impl IntoIterator<Item = &'v str>,
        actor: &str,
    ) -> Result<BulkOutcome, DbError> {
        let mut tx = self.pool.begin().await?;
        let existing: Vec<String> = sqlx::query_scalar(
            "SELECT LOWER(TRIM(value)) FROM reference_data WHERE category = $1 AND NOT is_deleted",
        )
        .bind(category.as_str())
        .fetch_all(&mut *tx)
        .await?;
        let existing: HashSet<String> = existing.into_iter().collect();

        let plan = reference::plan_bulk(values, &existing);
        for value in &plan.accepted {
            sqlx::query(
                r#"
                INSERT INTO reference_data (value, category, created_by, updated_by)
                VALUES ($1, $2, $3, $3)
                "#,
            )
            .bind(value.as_str())
            .bind(category.as_str())
            .bind(actor)
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::classify(e, "reference data", value.as_str()))?;
        }
        tx.commit().await?;

        let outcome = BulkOutcome {
            created: plan.accepted.len(),
            skipped_invalid: plan.skipped_invalid,
            skipped_duplicate: plan.skipped_duplicate,
        };
        tracing::info!(
            category = %category,
            created = outcome.created,
            invalid = outcome.skipped_invalid.len(),
            duplicate = outcome.skipped_duplicate.len(),
            "reference data bulk insert"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires database"]
    async fn duplicate_is_case_insensitive_until_deleted() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = crate::db::create_pool(&url).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        let repo = ReferenceDataRepo::new(&pool);

        let raw = format!("Finance {}", &Uuid::new_v4().simple().to_string()[..8]);
        let value = ReferenceValue::new(&raw).unwrap();
        let created = repo
            .create(ReferenceCategory::BusinessUnit, &value, None, "tester")
            .await
            .unwrap();

        let upper = ReferenceValue::new(&format!("  {}  ", raw.to_uppercase())).unwrap();
        let err = repo
            .create(ReferenceCategory::BusinessUnit, &upper, None, "tester")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Duplicate { .. }));

        repo.delete(created.id, "tester").await.unwrap();
        repo.create(ReferenceCategory::BusinessUnit, &upper, None, "tester")
            .await
            .unwrap();
    }
}
