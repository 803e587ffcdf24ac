//! Maturity frameworks and assessments

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use grc_core::maturity::{self, PracticeScore};
use grc_core::sla::{AssessmentKind, SlaHours};
use grc_core::{AssessmentStatus, ControlPriority, FrameworkStatus, FrameworkType, MaturityLevel};
use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::compliance::{AssessmentFilter, AssessmentHeader, FrameworkInput};
use super::{found, stale_or_missing, DbError, WithTotal};
use crate::models::{ImportReport, Paginated, Pagination};

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MaturityFramework {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    #[sqlx(try_from = "String")]
    pub framework_type: FrameworkType,
    #[sqlx(try_from = "String")]
    pub status: FrameworkStatus,
    pub uploaded_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub row_version: i32,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MaturityControl {
    pub id: Uuid,
    pub framework_id: Uuid,
    pub control_id: String,
    pub title: String,
    pub description: Option<String>,
    pub function: String,
    pub category: String,
    pub subcategory: Option<String>,
    pub implementation_guidance: Option<String>,
    #[sqlx(try_from = "String")]
    pub priority: ControlPriority,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaturityControlInput {
    pub control_id: String,
    pub title: String,
    pub description: Option<String>,
    pub function: String,
    pub category: String,
    pub subcategory: Option<String>,
    pub implementation_guidance: Option<String>,
    pub priority: ControlPriority,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaturityFrameworkDetail {
    #[serde(flatten)]
    pub framework: MaturityFramework,
    pub controls: Vec<MaturityControl>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MaturityAssessment {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: AssessmentStatus,
    pub assessor: String,
    pub start_date: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub sla_deadline: Option<DateTime<Utc>>,
    pub overall_maturity_score: f64,
    pub framework_id: Uuid,
    pub organization_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub row_version: i32,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MaturityControlAssessment {
    pub id: Uuid,
    pub maturity_assessment_id: Uuid,
    pub control_id: Uuid,
    #[sqlx(try_from = "String")]
    pub current_level: MaturityLevel,
    #[sqlx(try_from = "String")]
    pub target_level: MaturityLevel,
    pub evidence: Option<String>,
    pub comments: Option<String>,
    pub assessed_by: Option<String>,
    pub assessment_date: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub row_version: i32,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MaturityControlView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub assessment: MaturityControlAssessment,
    pub control_ref: String,
    pub control_title: String,
    pub function: String,
    pub category: String,
}

impl MaturityControlView {
    fn practice(&self) -> PracticeScore<'_> {
        PracticeScore {
            control_id: &self.control_ref,
            function: &self.function,
            category: &self.category,
            current: self.assessment.current_level,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MaturityControlUpdate {
    pub current_level: MaturityLevel,
    pub target_level: MaturityLevel,
    pub evidence: Option<String>,
    pub comments: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaturityAssessmentDetail {
    #[serde(flatten)]
    pub assessment: MaturityAssessment,
    pub controls: Vec<MaturityControlView>,
}

/// Score breakdown for one assessment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaturityScores {
    pub framework_type: FrameworkType,
    pub overall: f64,
    pub by_function: BTreeMap<String, f64>,
    /// Achieved MIL per objective, grouped by domain; C2M2 only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objectives: Option<BTreeMap<String, BTreeMap<String, u8>>>,
}

impl MaturityScores {
    pub fn compute(framework_type: FrameworkType, controls: &[MaturityControlView]) -> Self {
        let practices: Vec<PracticeScore<'_>> = controls.iter().map(MaturityControlView::practice).collect();
        let by_function = maturity::scores_by_function(&practices);
        if framework_type == FrameworkType::C2m2 {
            Self {
                framework_type,
                overall: maturity::c2m2_score(&practices),
                by_function,
                objectives: Some(maturity::c2m2_objective_scores(&practices)),
            }
        } else {
            let levels: Vec<MaturityLevel> = practices.iter().map(|p| p.current).collect();
            Self {
                framework_type,
                overall: maturity::standard_score(&levels),
                by_function,
                objectives: None,
            }
        }
    }
}

pub struct MaturityRepo<'a> {
    pool: &'a PgPool,
}

impl<'a> MaturityRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn frameworks(&self) -> Result<Vec<MaturityFramework>, DbError> {
        let rows = sqlx::query_as::<_, MaturityFramework>("SELECT * FROM maturity_frameworks ORDER BY name, version")
            .fetch_all(self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn framework(&self, id: Uuid) -> Result<MaturityFramework, DbError> {
        let row = sqlx::query_as::<_, MaturityFramework>("SELECT * FROM maturity_frameworks WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        found(row, "maturity framework", id)
    }

    pub async fn framework_detail(&self, id: Uuid) -> Result<MaturityFrameworkDetail, DbError> {
        let framework = self.framework(id).await?;
        let controls = sqlx::query_as::<_, MaturityControl>(
            "SELECT * FROM maturity_controls WHERE framework_id = $1 ORDER BY function, control_id",
        )
        .bind(id)
        .fetch_all(self.pool)
        .await?;
        Ok(MaturityFrameworkDetail { framework, controls })
    }

    pub async fn create_framework(&self, input: FrameworkInput, actor: &str) -> Result<MaturityFramework, DbError> {
        let row = sqlx::query_as::<_, MaturityFramework>(
            r#"
            INSERT INTO maturity_frameworks (
                name, version, description, framework_type, status, uploaded_by, created_by, updated_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $6, $6)
            RETURNING *
            "#,
        )
        .bind(&input.name)
        .bind(&input.version)
        .bind(&input.description)
        .bind(input.framework_type.as_str())
        .bind(input.status.as_str())
        .bind(actor)
        .fetch_one(self.pool)
        .await
        .map_err(|e| DbError::classify(e, "maturity framework", format!("{} {}", input.name, input.version)))?;
        Ok(row)
    }

    pub async fn update_framework(
        &self,
        id: Uuid,
        row_version: i32,
        input: FrameworkInput,
        actor: &str,
    ) -> Result<MaturityFramework, DbError> {
        let row = sqlx::query_as::<_, MaturityFramework>(
            r#"
            UPDATE maturity_frameworks SET
                name = $3, version = $4, description = $5, framework_type = $6, status = $7,
                updated_by = $8, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1 AND row_version = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(row_version)
        .bind(&input.name)
        .bind(&input.version)
        .bind(&input.description)
        .bind(input.framework_type.as_str())
        .bind(input.status.as_str())
        .bind(actor)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| DbError::classify(e, "maturity framework", format!("{} {}", input.name, input.version)))?;
        match row {
            Some(f) => Ok(f),
            None => Err(stale_or_missing(self.pool, "maturity_frameworks", "maturity framework", id).await),
        }
    }

    pub async fn delete_framework(&self, id: Uuid) -> Result<(), DbError> {
        super::delete_by_id(self.pool, "maturity_frameworks", "maturity framework", id).await
    }

    pub async fn import_controls(
        &self,
        framework_id: Uuid,
        rows: &[(usize, MaturityControlInput)],
    ) -> Result<ImportReport, DbError> {
        self.framework(framework_id).await?;
        let mut report = ImportReport::default();
        let mut tx = self.pool.begin().await?;
        for (row, control) in rows {
            let result = sqlx::query(
                r#"
                INSERT INTO maturity_controls (
                    framework_id, control_id, title, description, function, category,
                    subcategory, implementation_guidance, priority
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (framework_id, control_id) DO NOTHING
                "#,
            )
            .bind(framework_id)
            .bind(&control.control_id)
            .bind(&control.title)
            .bind(&control.description)
            .bind(&control.function)
            .bind(&control.category)
            .bind(&control.subcategory)
            .bind(&control.implementation_guidance)
            .bind(control.priority.as_str())
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 1 {
                report.created += 1;
            } else {
                report.skip(*row, format!("control '{}' already exists", control.control_id));
            }
        }
        tx.commit().await?;
        tracing::info!(
            framework = %framework_id,
            created = report.created,
            skipped = report.skipped.len(),
            "maturity controls imported"
        );
        Ok(report)
    }

    pub async fn assessments(
        &self,
        filter: &AssessmentFilter,
        page: Pagination,
    ) -> Result<Paginated<MaturityAssessment>, DbError> {
        let rows: Vec<WithTotal<MaturityAssessment>> = sqlx::query_as(
            r#"
            SELECT *, COUNT(*) OVER() AS total
            FROM maturity_assessments
            WHERE ($1::uuid IS NULL OR framework_id = $1)
              AND ($2::uuid IS NULL OR organization_id = $2)
              AND ($3::text IS NULL OR status = $3)
            ORDER BY start_date DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(filter.framework_id)
        .bind(filter.organization_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(self.pool)
        .await?;
        Ok(WithTotal::paginate(rows, page))
    }

    pub async fn assessment(&self, id: Uuid) -> Result<MaturityAssessment, DbError> {
        let row = sqlx::query_as::<_, MaturityAssessment>("SELECT * FROM maturity_assessments WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        found(row, "maturity assessment", id)
    }

    pub async fn assessment_detail(&self, id: Uuid) -> Result<MaturityAssessmentDetail, DbError> {
        let assessment = self.assessment(id).await?;
        let controls = control_views(self.pool, id).await?;
        Ok(MaturityAssessmentDetail { assessment, controls })
    }

    pub async fn create_assessment(
        &self,
        input: AssessmentHeader,
        hours: &SlaHours,
        actor: &str,
    ) -> Result<MaturityAssessment, DbError> {
        let (start, deadline) = input.schedule(hours, AssessmentKind::Maturity);
        let mut tx = self.pool.begin().await?;
        let assessment = sqlx::query_as::<_, MaturityAssessment>(
            r#"
            INSERT INTO maturity_assessments (
                title, description, status, assessor, start_date, due_date, sla_deadline,
                framework_id, organization_id, created_by, updated_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            RETURNING *
            "#,
        )
        .bind(&input.title)
        .bind(&input.description)
        .bind(input.status.as_str())
        .bind(&input.assessor)
        .bind(start)
        .bind(input.due_date)
        .bind(deadline)
        .bind(input.framework_id)
        .bind(input.organization_id)
        .bind(actor)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| DbError::classify(e, "maturity assessment", input.title.clone()))?;

        let seeded = sqlx::query(
            r#"
            INSERT INTO maturity_control_assessments (maturity_assessment_id, control_id)
            SELECT $1, id FROM maturity_controls WHERE framework_id = $2
            "#,
        )
        .bind(assessment.id)
        .bind(input.framework_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(
            assessment = %assessment.id,
            controls = seeded.rows_affected(),
            "maturity assessment created"
        );
        Ok(assessment)
    }

    pub async fn update_assessment(
        &self,
        id: Uuid,
        row_version: i32,
        input: AssessmentHeader,
        actor: &str,
    ) -> Result<MaturityAssessment, DbError> {
        let row = sqlx::query_as::<_, MaturityAssessment>(
            r#"
            UPDATE maturity_assessments SET
                title = $3, description = $4, status = $5, assessor = $6,
                start_date = COALESCE($7, start_date), due_date = $8,
                sla_deadline = COALESCE($9, sla_deadline), organization_id = $10,
                completed_date = CASE WHEN $5 IN ('Completed', 'Approved')
                                      THEN COALESCE(completed_date, NOW()) ELSE completed_date END,
                updated_by = $11, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1 AND row_version = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(row_version)
        .bind(&input.title)
        .bind(&input.description)
        .bind(input.status.as_str())
        .bind(&input.assessor)
        .bind(input.start_date)
        .bind(input.due_date)
        .bind(input.sla_deadline)
        .bind(input.organization_id)
        .bind(actor)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| DbError::classify(e, "maturity assessment", id.to_string()))?;
        match row {
            Some(a) => Ok(a),
            None => Err(stale_or_missing(self.pool, "maturity_assessments", "maturity assessment", id).await),
        }
    }

    pub async fn delete_assessment(&self, id: Uuid) -> Result<(), DbError> {
        super::delete_by_id(self.pool, "maturity_assessments", "maturity assessment", id).await
    }

    /// Update one control and refresh the overall score.
    pub async fn update_control(
        &self,
        assessment_id: Uuid,
        control_id: Uuid,
        update: MaturityControlUpdate,
        actor: &str,
    ) -> Result<MaturityControlAssessment, DbError> {
        let framework_type = self.framework_type_of(assessment_id).await?;
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, MaturityControlAssessment>(
            r#"
            UPDATE maturity_control_assessments SET
                current_level = $3, target_level = $4, evidence = $5, comments = $6,
                assessed_by = $7, assessment_date = NOW(),
                updated_at = NOW(), row_version = row_version + 1
            WHERE maturity_assessment_id = $1 AND control_id = $2
            RETURNING *
            "#,
        )
        .bind(assessment_id)
        .bind(control_id)
        .bind(update.current_level.as_str())
        .bind(update.target_level.as_str())
        .bind(&update.evidence)
        .bind(&update.comments)
        .bind(actor)
        .fetch_optional(&mut *tx)
        .await?;
        let row = found(row, "maturity control assessment", control_id)?;

        let controls = control_views(&mut *tx, assessment_id).await?;
        let scores = MaturityScores::compute(framework_type, &controls);
        store_overall(&mut tx, assessment_id, scores.overall, actor).await?;
        tx.commit().await?;
        Ok(row)
    }

    pub async fn scores(&self, assessment_id: Uuid) -> Result<MaturityScores, DbError> {
        let framework_type = self.framework_type_of(assessment_id).await?;
        let controls = control_views(self.pool, assessment_id).await?;
        Ok(MaturityScores::compute(framework_type, &controls))
    }

    async fn framework_type_of(&self, assessment_id: Uuid) -> Result<FrameworkType, DbError> {
        let raw: Option<String> = sqlx::query_scalar(
            r#"
            SELECT f.framework_type
            FROM maturity_assessments a
            JOIN maturity_frameworks f ON f.id = a.framework_id
            WHERE a.id = $1
            "#,
        )
        .bind(assessment_id)
        .fetch_optional(self.pool)
        .await?;
        let raw = found(raw, "maturity assessment", assessment_id)?;
        raw.parse()
            .map_err(|e: grc_core::ValidationError| DbError::Sqlx(sqlx::Error::Decode(Box::new(e))))
    }
}

async fn control_views<'e, E>(executor: E, assessment_id: Uuid) -> Result<Vec<MaturityControlView>, DbError>
where
    E: sqlx::PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, MaturityControlView>(
        r#"
        SELECT mca.*, c.control_id AS control_ref, c.title AS control_title, c.function, c.category
        FROM maturity_control_assessments mca
        JOIN maturity_controls c ON c.id = mca.control_id
        WHERE mca.maturity_assessment_id = $1
        ORDER BY c.function, c.control_id
        "#,
    )
    .bind(assessment_id)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

async fn store_overall(
    tx: &mut Transaction<'_, Postgres>,
    assessment_id: Uuid,
    overall: f64,
    actor: &str,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        UPDATE maturity_assessments SET
            overall_maturity_score = $2, updated_by = $3, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(assessment_id)
    .bind(overall)
    .bind(actor)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(control: &str, function: &str, category: &str, current: MaturityLevel) -> MaturityControlView {
        MaturityControlView {
            assessment: MaturityControlAssessment {
                id: Uuid::new_v4(),
                maturity_assessment_id: Uuid::nil(),
                control_id: Uuid::new_v4(),
                current_level: current,
                target_level: MaturityLevel::Defined,
                evidence: None,
                comments: None,
                assessed_by: None,
                assessment_date: None,
                updated_at: Utc::now(),
                row_version: 1,
            },
            control_ref: control.into(),
            control_title: control.into(),
            function: function.into(),
            category: category.into(),
        }
    }

    #[test]
    fn standard_framework_uses_mean_level() {
        let controls = vec![
            view("ID.AM-1", "Identify", "Asset Management", MaturityLevel::Managed),
            view("PR.AC-1", "Protect", "Access Control", MaturityLevel::Developing),
        ];
        let scores = MaturityScores::compute(FrameworkType::NistCsf, &controls);
        assert_eq!(scores.overall, 75.0);
        assert_eq!(scores.by_function["Identify"], 4.0);
        assert!(scores.objectives.is_none());
    }

    #[test]
    fn c2m2_framework_reports_objectives() {
        let controls = vec![
            view("ASSET-1a", "ASSET", "MIL1", MaturityLevel::Initial),
            view("ASSET-1b", "ASSET", "MIL2", MaturityLevel::Developing),
            view("RISK-1a", "RISK", "MIL1", MaturityLevel::NotImplemented),
        ];
        let scores = MaturityScores::compute(FrameworkType::C2m2, &controls);
        // ASSET reaches MIL2 (67), RISK reaches nothing (0)
        assert_eq!(scores.overall, 33.5);
        let objectives = scores.objectives.unwrap();
        assert_eq!(objectives["ASSET"]["ASSET-1"], 2);
        assert_eq!(objectives["RISK"]["RISK-1"], 0);
    }
}
