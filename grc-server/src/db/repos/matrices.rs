//! Risk matrix repository
//!
//! A matrix owns its levels and generated cells. Levels are replaced
//! wholesale on update and cells are regenerated from them in the same
//! transaction.

use chrono::{DateTime, Utc};
use grc_core::matrix::{self, CellSpec, LevelSpec, MatrixSeed, MatrixThresholds};
use grc_core::sla::SlaHours;
use grc_core::{LevelType, MatrixType, RiskLevel};
use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{found, stale_or_missing, DbError};

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RiskMatrix {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub matrix_size: i32,
    #[sqlx(try_from = "String")]
    pub matrix_type: MatrixType,
    pub is_default: bool,
    pub is_active: bool,
    pub qualitative_medium: f64,
    pub qualitative_high: f64,
    pub qualitative_critical: f64,
    pub risk_appetite: f64,
    pub critical_remediation_hours: i32,
    pub high_remediation_hours: i32,
    pub medium_remediation_hours: i32,
    pub low_remediation_hours: i32,
    pub critical_review_hours: i32,
    pub high_review_hours: i32,
    pub medium_review_hours: i32,
    pub low_review_hours: i32,
    pub risk_assessment_hours: i32,
    pub compliance_assessment_hours: i32,
    pub maturity_assessment_hours: i32,
    pub assessment_approval_hours: i32,
    pub risk_acceptance_approval_hours: i32,
    pub exception_approval_hours: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub row_version: i32,
}

impl RiskMatrix {
    pub fn thresholds(&self) -> MatrixThresholds {
        MatrixThresholds {
            medium: self.qualitative_medium,
            high: self.qualitative_high,
            critical: self.qualitative_critical,
            risk_appetite: self.risk_appetite,
        }
    }

    pub fn sla(&self) -> SlaHours {
        SlaHours {
            critical_remediation: self.critical_remediation_hours,
            high_remediation: self.high_remediation_hours,
            medium_remediation: self.medium_remediation_hours,
            low_remediation: self.low_remediation_hours,
            critical_review: self.critical_review_hours,
            high_review: self.high_review_hours,
            medium_review: self.medium_review_hours,
            low_review: self.low_review_hours,
            risk_assessment: self.risk_assessment_hours,
            compliance_assessment: self.compliance_assessment_hours,
            maturity_assessment: self.maturity_assessment_hours,
            assessment_approval: self.assessment_approval_hours,
            risk_acceptance_approval: self.risk_acceptance_approval_hours,
            exception_approval: self.exception_approval_hours,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MatrixLevel {
    pub id: Uuid,
    pub matrix_id: Uuid,
    #[sqlx(try_from = "String")]
    pub level_type: LevelType,
    pub level_value: i32,
    pub name: String,
    pub description: String,
    pub color: String,
    pub multiplier: Option<f64>,
}

impl From<&MatrixLevel> for LevelSpec {
    fn from(l: &MatrixLevel) -> Self {
        LevelSpec {
            level_type: l.level_type,
            level_value: l.level_value,
            name: l.name.clone(),
            description: l.description.clone(),
            color: l.color.clone(),
            multiplier: l.multiplier,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MatrixCell {
    pub id: Uuid,
    pub matrix_id: Uuid,
    pub impact_level: i32,
    pub likelihood_level: i32,
    pub exposure_level: Option<i32>,
    pub score: f64,
    #[sqlx(try_from = "String")]
    pub resulting_level: RiskLevel,
    pub color: String,
}

impl From<&MatrixCell> for CellSpec {
    fn from(c: &MatrixCell) -> Self {
        CellSpec {
            impact_level: c.impact_level,
            likelihood_level: c.likelihood_level,
            exposure_level: c.exposure_level,
            score: c.score,
            resulting_level: c.resulting_level,
            color: c.color.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MatrixDetail {
    #[serde(flatten)]
    pub matrix: RiskMatrix,
    pub levels: Vec<MatrixLevel>,
    pub cells: Vec<MatrixCell>,
}

/// Validated matrix definition.
#[derive(Debug, Clone)]
pub struct MatrixInput {
    pub name: String,
    pub description: Option<String>,
    pub matrix_size: i32,
    pub matrix_type: MatrixType,
    pub is_default: bool,
    pub is_active: bool,
    pub thresholds: MatrixThresholds,
    pub sla: SlaHours,
    pub levels: Vec<LevelSpec>,
}

impl From<MatrixSeed> for MatrixInput {
    fn from(seed: MatrixSeed) -> Self {
        Self {
            thresholds: seed.thresholds(),
            sla: seed.sla(),
            name: seed.name.to_string(),
            description: Some(seed.description.to_string()),
            matrix_size: seed.size,
            matrix_type: seed.matrix_type,
            is_default: seed.is_default,
            is_active: true,
            levels: seed.levels,
        }
    }
}

pub struct MatrixRepo<'a> {
    pool: &'a PgPool,
}

impl<'a> MatrixRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, active_only: bool) -> Result<Vec<RiskMatrix>, DbError> {
        let rows = sqlx::query_as::<_, RiskMatrix>(
            r#"
            SELECT * FROM risk_matrices
            WHERE NOT $1 OR is_active
            ORDER BY is_default DESC, name
            "#,
        )
        .bind(active_only)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get(&self, id: Uuid) -> Result<RiskMatrix, DbError> {
        let row = sqlx::query_as::<_, RiskMatrix>("SELECT * FROM risk_matrices WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        found(row, "risk matrix", id)
    }

    pub async fn detail(&self, id: Uuid) -> Result<MatrixDetail, DbError> {
        let matrix = self.get(id).await?;
        let levels = sqlx::query_as::<_, MatrixLevel>(
            "SELECT * FROM risk_matrix_levels WHERE matrix_id = $1 ORDER BY level_type, level_value",
        )
        .bind(id)
        .fetch_all(self.pool)
        .await?;
        let cells = sqlx::query_as::<_, MatrixCell>(
            r#"
            SELECT * FROM risk_matrix_cells WHERE matrix_id = $1
            ORDER BY impact_level, likelihood_level, exposure_level NULLS FIRST
            "#,
        )
        .bind(id)
        .fetch_all(self.pool)
        .await?;
        Ok(MatrixDetail {
            matrix,
            levels,
            cells,
        })
    }

    /// The active default matrix, if any.
    pub async fn default_matrix(&self) -> Result<Option<RiskMatrix>, DbError> {
        let row = sqlx::query_as::<_, RiskMatrix>(
            "SELECT * FROM risk_matrices WHERE is_default AND is_active LIMIT 1",
        )
        .fetch_optional(self.pool)
        .await?;
        Ok(row)
    }

    /// SLA hours of the default matrix, or the built-in fallbacks.
    pub async fn default_sla(&self) -> Result<SlaHours, DbError> {
        Ok(self
            .default_matrix()
            .await?
            .map(|m| m.sla())
            .unwrap_or_default())
    }

    pub async fn create(&self, input: MatrixInput, actor: &str) -> Result<MatrixDetail, DbError> {
        let mut tx = self.pool.begin().await?;
        if input.is_default {
            clear_default(&mut tx).await?;
        }
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO risk_matrices (
                name, description, matrix_size, matrix_type, is_default, is_active,
                qualitative_medium, qualitative_high, qualitative_critical, risk_appetite,
                critical_remediation_hours, high_remediation_hours, medium_remediation_hours,
                low_remediation_hours, critical_review_hours, high_review_hours,
                medium_review_hours, low_review_hours, risk_assessment_hours,
                compliance_assessment_hours, maturity_assessment_hours,
                assessment_approval_hours, risk_acceptance_approval_hours,
                exception_approval_hours, created_by, updated_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23, $24, $25, $25)
            RETURNING id
            "#,
        )
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.matrix_size)
        .bind(input.matrix_type.as_str())
        .bind(input.is_default)
        .bind(input.is_active)
        .bind(input.thresholds.medium)
        .bind(input.thresholds.high)
        .bind(input.thresholds.critical)
        .bind(input.thresholds.risk_appetite)
        .bind(input.sla.critical_remediation)
        .bind(input.sla.high_remediation)
        .bind(input.sla.medium_remediation)
        .bind(input.sla.low_remediation)
        .bind(input.sla.critical_review)
        .bind(input.sla.high_review)
        .bind(input.sla.medium_review)
        .bind(input.sla.low_review)
        .bind(input.sla.risk_assessment)
        .bind(input.sla.compliance_assessment)
        .bind(input.sla.maturity_assessment)
        .bind(input.sla.assessment_approval)
        .bind(input.sla.risk_acceptance_approval)
        .bind(input.sla.exception_approval)
        .bind(actor)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| DbError::classify(e, "risk matrix", input.name.clone()))?;

        replace_levels_and_cells(&mut tx, id, &input).await?;
        tx.commit().await?;

        tracing::info!(matrix = %id, name = %input.name, "risk matrix created");
        self.detail(id).await
    }

    pub async fn update(
        &self,
        id: Uuid,
        row_version: i32,
        input: MatrixInput,
        actor: &str,
    ) -> Result<MatrixDetail, DbError> {
        let mut tx = self.pool.begin().await?;
        if input.is_default {
            clear_default(&mut tx).await?;
        }
        let updated = sqlx::query(
            r#"
            UPDATE risk_matrices SET
                name = $3, description = $4, matrix_size = $5, matrix_type = $6,
                is_default = $7, is_active = $8,
                qualitative_medium = $9, qualitative_high = $10, qualitative_critical = $11,
                risk_appetite = $12,
                critical_remediation_hours = $13, high_remediation_hours = $14,
                medium_remediation_hours = $15, low_remediation_hours = $16,
                critical_review_hours = $17, high_review_hours = $18,
                medium_review_hours = $19, low_review_hours = $20,
                risk_assessment_hours = $21, compliance_assessment_hours = $22,
                maturity_assessment_hours = $23, assessment_approval_hours = $24,
                risk_acceptance_approval_hours = $25, exception_approval_hours = $26,
                updated_by = $27, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1 AND row_version = $2
            "#,
        )
        .bind(id)
        .bind(row_version)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.matrix_size)
        .bind(input.matrix_type.as_str())
        .bind(input.is_default)
        .bind(input.is_active)
        .bind(input.thresholds.medium)
        .bind(input.thresholds.high)
        .bind(input.thresholds.critical)
        .bind(input.thresholds.risk_appetite)
        .bind(input.sla.critical_remediation)
        .bind(input.sla.high_remediation)
        .bind(input.sla.medium_remediation)
        .bind(input.sla.low_remediation)
        .bind(input.sla.critical_review)
        .bind(input.sla.high_review)
        .bind(input.sla.medium_review)
        .bind(input.sla.low_review)
        .bind(input.sla.risk_assessment)
        .bind(input.sla.compliance_assessment)
        .bind(input.sla.maturity_assessment)
        .bind(input.sla.assessment_approval)
        .bind(input.sla.risk_acceptance_approval)
        .bind(input.sla.exception_approval)
        .bind(actor)
        .execute(&mut *tx)
        .await
        .map_err(|e| DbError::classify(e, "risk matrix", input.name.clone()))?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(stale_or_missing(self.pool, "risk_matrices", "risk matrix", id).await);
        }

        replace_levels_and_cells(&mut tx, id, &input).await?;
        tx.commit().await?;
        self.detail(id).await
    }

    /// The default matrix cannot be deleted.
    pub async fn delete(&self, id: Uuid) -> Result<(), DbError> {
        let matrix = self.get(id).await?;
        if matrix.is_default {
            return Err(DbError::conflict(
                "risk matrix",
                "the default matrix cannot be deleted; set another default first",
            ));
        }
        super::delete_by_id(self.pool, "risk_matrices", "risk matrix", id).await
    }

    pub async fn set_default(&self, id: Uuid, actor: &str) -> Result<RiskMatrix, DbError> {
        let mut tx = self.pool.begin().await?;
        clear_default(&mut tx).await?;
        let row = sqlx::query_as::<_, RiskMatrix>(
            r#"
            UPDATE risk_matrices
            SET is_default = TRUE, is_active = TRUE, updated_by = $2, updated_at = NOW(),
                row_version = row_version + 1
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(actor)
        .fetch_optional(&mut *tx)
        .await?;
        let matrix = found(row, "risk matrix", id)?;
        tx.commit().await?;

        tracing::info!(matrix = %id, "default risk matrix changed");
        Ok(matrix)
    }

    pub async fn regenerate_cells(&self, id: Uuid) -> Result<MatrixDetail, DbError> {
        let detail = self.detail(id).await?;
        let levels: Vec<LevelSpec> = detail.levels.iter().map(LevelSpec::from).collect();
        let cells = matrix::generate_cells(detail.matrix.matrix_size, detail.matrix.matrix_type, &levels);

        let mut tx = self.pool.begin().await?;
        insert_cells(&mut tx, id, &cells).await?;
        tx.commit().await?;
        self.detail(id).await
    }

    /// Create any built-in matrix whose name is not taken yet.
    pub async fn seed(&self, seeds: Vec<MatrixSeed>, actor: &str) -> Result<Vec<String>, DbError> {
        let mut created = Vec::new();
        let has_default = self.default_matrix().await?.is_some();
        for seed in seeds {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM risk_matrices WHERE name = $1)")
                    .bind(seed.name)
                    .fetch_one(self.pool)
                    .await?;
            if exists {
                continue;
            }
            let mut input = MatrixInput::from(seed);
            input.is_default = input.is_default && !has_default;
            let name = input.name.clone();
            self.create(input, actor).await?;
            created.push(name);
        }
        Ok(created)
    }
}

async fn clear_default(tx: &mut Transaction<'_, Postgres>) -> Result<(), DbError> {
    sqlx::query("UPDATE risk_matrices SET is_default = FALSE WHERE is_default")
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn replace_levels_and_cells(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    input: &MatrixInput,
) -> Result<(), DbError> {
    sqlx::query("DELETE FROM risk_matrix_levels WHERE matrix_id = $1")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    for level in &input.levels {
        sqlx::query(
            r#"
            INSERT INTO risk_matrix_levels
                (matrix_id, level_type, level_value, name, description, color, multiplier)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(level.level_type.as_str())
        .bind(level.level_value)
        .bind(&level.name)
        .bind(&level.description)
        .bind(&level.color)
        .bind(level.multiplier)
        .execute(&mut **tx)
        .await
        .map_err(|e| DbError::classify(e, "matrix level", level.name.clone()))?;
    }

    let cells = matrix::generate_cells(input.matrix_size, input.matrix_type, &input.levels);
    insert_cells(tx, id, &cells).await
}

async fn insert_cells(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    cells: &[CellSpec],
) -> Result<(), DbError> {
    sqlx::query("DELETE FROM risk_matrix_cells WHERE matrix_id = $1")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    for cell in cells {
        sqlx::query(
            r#"
            INSERT INTO risk_matrix_cells
                (matrix_id, impact_level, likelihood_level, exposure_level, score, resulting_level, color)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(cell.impact_level)
        .bind(cell.likelihood_level)
        .bind(cell.exposure_level)
        .bind(cell.score)
        .bind(cell.resulting_level.as_str())
        .bind(&cell.color)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}
