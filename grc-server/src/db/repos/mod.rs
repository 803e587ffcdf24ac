//! Repositories over the GRC schema
//!
//! Each repository borrows the pool (`XRepo::new(&pool)`) and returns
//! `Result<_, DbError>`. Patterns shared by all of them:
//! - unique violations become `DbError::Duplicate`
//! - updates match on `row_version`; zero rows means stale or missing
//! - multi-step writes run inside one transaction

pub mod assessments;
pub mod attack_chains;
pub mod backlog;
pub mod compliance;
pub mod findings;
pub mod matrices;
pub mod maturity;
pub mod reference_data;
pub mod requests;
pub mod risks;
pub mod sla_history;
pub mod users;

use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use uuid::Uuid;

use crate::models::{Paginated, Pagination};

pub use assessments::{RiskAssessment, RiskAssessmentRepo, SettingsRepo, ThreatScenario};
pub use attack_chains::{AttackChain, AttackChainRepo, ChainStep, LossEvent, ThreatEvent};
pub use backlog::{BacklogActivity, BacklogComment, BacklogEntry, BacklogRepo};
pub use compliance::{
    BusinessOrganization, ComplianceAssessment, ComplianceControl, ComplianceFramework,
    ComplianceRepo, ControlAssessment,
};
pub use findings::{Finding, FindingRepo};
pub use matrices::{MatrixRepo, RiskMatrix};
pub use maturity::{
    MaturityAssessment, MaturityControl, MaturityControlAssessment, MaturityFramework, MaturityRepo,
};
pub use reference_data::{ReferenceData, ReferenceDataRepo};
pub use requests::{
    AssessmentRequest, FindingClosureRequest, RequestRepo, RiskAcceptanceRequest,
};
pub use risks::{Risk, RiskRepo};
pub use sla_history::{SlaHistoryEntry, SlaHistoryRepo};
pub use users::{SessionRepo, User, UserRepo};

/// Database error type
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("not found: {resource} '{id}'")]
    NotFound { resource: &'static str, id: String },

    /// Row version did not match, or the row is still referenced
    #[error("conflict on {resource}: {reason}")]
    Conflict {
        resource: &'static str,
        reason: String,
    },

    #[error("duplicate {resource}: '{value}'")]
    Duplicate {
        resource: &'static str,
        value: String,
    },
}

impl DbError {
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    pub fn conflict(resource: &'static str, reason: impl Into<String>) -> Self {
        Self::Conflict {
            resource,
            reason: reason.into(),
        }
    }

    /// Map constraint violations onto typed variants; anything else stays `Sqlx`.
    pub fn classify(e: sqlx::Error, resource: &'static str, value: impl Into<String>) -> Self {
        if let Some(db) = e.as_database_error() {
            if db.is_unique_violation() {
                return Self::Duplicate {
                    resource,
                    value: value.into(),
                };
            }
            if db.is_foreign_key_violation() {
                return Self::conflict(resource, "referenced by or referencing another record");
            }
        }
        Self::Sqlx(e)
    }

    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Duplicate { .. } => true,
            Self::Sqlx(e) => e
                .as_database_error()
                .is_some_and(|d| d.is_unique_violation()),
            _ => false,
        }
    }
}

pub(crate) const STALE_REASON: &str = "record was modified by someone else; reload and retry";

/// Turn an empty `fetch_optional` into `NotFound`.
pub(crate) fn found<T>(row: Option<T>, resource: &'static str, id: Uuid) -> Result<T, DbError> {
    row.ok_or_else(|| DbError::not_found(resource, id))
}

/// Explain why a versioned update touched no rows.
///
/// `table` must be one of the schema's table names.
pub(crate) async fn stale_or_missing(
    pool: &PgPool,
    table: &'static str,
    resource: &'static str,
    id: Uuid,
) -> DbError {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)", table);
    match sqlx::query_scalar::<_, bool>(&sql)
        .bind(id)
        .fetch_one(pool)
        .await
    {
        Ok(true) => DbError::conflict(resource, STALE_REASON),
        Ok(false) => DbError::not_found(resource, id),
        Err(e) => DbError::Sqlx(e),
    }
}

/// Delete by id from one of the schema's tables.
pub(crate) async fn delete_by_id(
    pool: &PgPool,
    table: &'static str,
    resource: &'static str,
    id: Uuid,
) -> Result<(), DbError> {
    let sql = format!("DELETE FROM {} WHERE id = $1", table);
    let result = sqlx::query(&sql)
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| DbError::classify(e, resource, id.to_string()))?;
    if result.rows_affected() == 0 {
        return Err(DbError::not_found(resource, id));
    }
    Ok(())
}

/// A row plus the `COUNT(*) OVER() AS total` column of a paginated list.
pub(crate) struct WithTotal<T> {
    pub row: T,
    pub total: i64,
}

impl<'r, T> FromRow<'r, PgRow> for WithTotal<T>
where
    T: FromRow<'r, PgRow>,
{
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            row: T::from_row(row)?,
            total: row.try_get("total")?,
        })
    }
}

impl<T> WithTotal<T> {
    pub fn paginate(rows: Vec<Self>, page: Pagination) -> Paginated<T> {
        let total = rows.first().map(|r| r.total).unwrap_or(0);
        page.wrap(rows.into_iter().map(|r| r.row).collect(), total)
    }
}

/// `%term%` for ILIKE, with LIKE metacharacters escaped.
pub(crate) fn like_pattern(term: &str) -> String {
    let escaped = term
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes() {
        assert_eq!(like_pattern(" web "), "%web%");
        assert_eq!(like_pattern("100%_done"), "%100\\%\\_done%");
    }

    #[test]
    fn error_display() {
        let err = DbError::not_found("finding", "abc");
        assert_eq!(err.to_string(), "not found: finding 'abc'");

        let err = DbError::Duplicate {
            resource: "reference data",
            value: "Finance".into(),
        };
        assert!(err.is_unique_violation());
    }
}
