//! Compliance frameworks, organizations and assessments

use chrono::{DateTime, Utc};
use grc_core::compliance;
use grc_core::sla::{self, AssessmentKind, SlaHours};
use grc_core::{
    AssessmentStatus, ComplianceStatus, ControlPriority, FrameworkStatus, FrameworkType,
    OrganizationType, TShirtSize,
};
use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::sla_history::{self, Completion};
use super::{found, stale_or_missing, DbError, WithTotal};
use crate::models::{ImportReport, Paginated, Pagination};

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ComplianceFramework {
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

/// Framework header fields, shared by compliance and maturity frameworks.
#[derive(Debug, Clone)]
pub struct FrameworkInput {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub framework_type: FrameworkType,
    pub status: FrameworkStatus,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ComplianceControl {
    pub id: Uuid,
    pub framework_id: Uuid,
    pub control_id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    #[sqlx(try_from = "String")]
    pub priority: ControlPriority,
    pub control_text: Option<String>,
    pub supplemental_guidance: Option<String>,
    pub related_controls: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlInput {
    pub control_id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub priority: ControlPriority,
    pub control_text: Option<String>,
    pub supplemental_guidance: Option<String>,
    pub related_controls: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameworkDetail {
    #[serde(flatten)]
    pub framework: ComplianceFramework,
    pub controls: Vec<ComplianceControl>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BusinessOrganization {
    pub id: Uuid,
    pub name: String,
    pub code: Option<String>,
    pub description: Option<String>,
    pub compliance_owner: Option<String>,
    #[sqlx(try_from = "String")]
    pub organization_type: OrganizationType,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub row_version: i32,
}

#[derive(Debug, Clone)]
pub struct OrganizationInput {
    pub name: String,
    pub code: Option<String>,
    pub description: Option<String>,
    pub compliance_owner: Option<String>,
    pub organization_type: OrganizationType,
    pub is_active: bool,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ComplianceAssessment {
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
    pub compliance_percentage: f64,
    pub framework_id: Uuid,
    pub organization_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub row_version: i32,
}

impl ComplianceAssessment {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        compliance::is_overdue(self.status, self.sla_deadline, now)
    }
}

/// Assessment header fields, shared by compliance and maturity assessments.
#[derive(Debug, Clone)]
pub struct AssessmentHeader {
    pub title: String,
    pub description: Option<String>,
    pub status: AssessmentStatus,
    pub assessor: String,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub sla_deadline: Option<DateTime<Utc>>,
    pub framework_id: Uuid,
    pub organization_id: Uuid,
}

impl AssessmentHeader {
    /// Start date and SLA deadline, filling gaps from the matrix hours.
    pub fn schedule(&self, hours: &SlaHours, kind: AssessmentKind) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.start_date.unwrap_or_else(Utc::now);
        let deadline = self
            .sla_deadline
            .unwrap_or_else(|| sla::deadline(start, hours.assessment(kind)));
        (start, deadline)
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ControlAssessment {
    pub id: Uuid,
    pub compliance_assessment_id: Uuid,
    pub control_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: ComplianceStatus,
    pub evidence: Option<String>,
    pub gap_notes: Option<String>,
    pub ownership: Option<String>,
    pub projected_compliance_date: Option<DateTime<Utc>>,
    pub project_needed: bool,
    pub tshirt_size: Option<String>,
    pub project_number: Option<String>,
    pub assessed_by: Option<String>,
    pub assessment_date: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub row_version: i32,
}

/// A control assessment joined with the control it covers.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ControlAssessmentView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub assessment: ControlAssessment,
    pub control_ref: String,
    pub control_title: String,
    pub category: Option<String>,
    #[sqlx(try_from = "String")]
    pub priority: ControlPriority,
}

#[derive(Debug, Clone)]
pub struct ControlAssessmentInput {
    pub status: ComplianceStatus,
    pub evidence: Option<String>,
    pub gap_notes: Option<String>,
    pub ownership: Option<String>,
    pub projected_compliance_date: Option<DateTime<Utc>>,
    pub project_needed: bool,
    pub tshirt_size: Option<TShirtSize>,
    pub project_number: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssessmentDetail {
    #[serde(flatten)]
    pub assessment: ComplianceAssessment,
    pub is_overdue: bool,
    pub status_breakdown: Vec<(ComplianceStatus, usize)>,
    pub controls: Vec<ControlAssessmentView>,
}

#[derive(Debug, Clone, Default)]
pub struct AssessmentFilter {
    pub framework_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
    pub status: Option<AssessmentStatus>,
}

pub struct ComplianceRepo<'a> {
    pool: &'a PgPool,
}

impl<'a> ComplianceRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    // Frameworks

    pub async fn frameworks(&self) -> Result<Vec<ComplianceFramework>, DbError> {
        let rows = sqlx::query_as::<_, ComplianceFramework>(
            "SELECT * FROM compliance_frameworks ORDER BY name, version",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn framework(&self, id: Uuid) -> Result<ComplianceFramework, DbError> {
        let row = sqlx::query_as::<_, ComplianceFramework>("SELECT * FROM compliance_frameworks WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        found(row, "compliance framework", id)
    }

    pub async fn framework_detail(&self, id: Uuid) -> Result<FrameworkDetail, DbError> {
        let framework = self.framework(id).await?;
        let controls = self.controls(id).await?;
        Ok(FrameworkDetail { framework, controls })
    }

    pub async fn create_framework(&self, input: FrameworkInput, actor: &str) -> Result<ComplianceFramework, DbError> {
        let row = sqlx::query_as::<_, ComplianceFramework>(
            r#"
            INSERT INTO compliance_frameworks (
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
        .map_err(|e| DbError::classify(e, "compliance framework", format!("{} {}", input.name, input.version)))?;
        Ok(row)
    }

    pub async fn update_framework(
        &self,
        id: Uuid,
        row_version: i32,
        input: FrameworkInput,
        actor: &str,
    ) -> Result<ComplianceFramework, DbError> {
        let row = sqlx::query_as::<_, ComplianceFramework>(
            r#"
            UPDATE compliance_frameworks SET
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
        .map_err(|e| DbError::classify(e, "compliance framework", format!("{} {}", input.name, input.version)))?;
        match row {
            Some(f) => Ok(f),
            None => Err(stale_or_missing(self.pool, "compliance_frameworks", "compliance framework", id).await),
        }
    }

    /// Fails with a conflict while assessments reference the framework.
    pub async fn delete_framework(&self, id: Uuid) -> Result<(), DbError> {
        super::delete_by_id(self.pool, "compliance_frameworks", "compliance framework", id).await
    }

    pub async fn controls(&self, framework_id: Uuid) -> Result<Vec<ComplianceControl>, DbError> {
        let rows = sqlx::query_as::<_, ComplianceControl>(
            "SELECT * FROM compliance_controls WHERE framework_id = $1 ORDER BY control_id",
        )
        .bind(framework_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// Insert numbered control rows; control ids already in the framework are skipped.
    pub async fn import_controls(
        &self,
        framework_id: Uuid,
        rows: &[(usize, ControlInput)],
    ) -> Result<ImportReport, DbError> {
        self.framework(framework_id).await?;
        let mut report = ImportReport::default();
        let mut tx = self.pool.begin().await?;
        for (row, control) in rows {
            if insert_control(&mut tx, framework_id, control).await? {
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
            "compliance controls imported"
        );
        Ok(report)
    }

    // Organizations

    pub async fn organizations(&self, active_only: bool) -> Result<Vec<BusinessOrganization>, DbError> {
        let rows = sqlx::query_as::<_, BusinessOrganization>(
            "SELECT * FROM business_organizations WHERE (NOT $1 OR is_active) ORDER BY name",
        )
        .bind(active_only)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn organization(&self, id: Uuid) -> Result<BusinessOrganization, DbError> {
        let row = sqlx::query_as::<_, BusinessOrganization>("SELECT * FROM business_organizations WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        found(row, "organization", id)
    }

    pub async fn create_organization(&self, input: OrganizationInput, actor: &str) -> Result<BusinessOrganization, DbError> {
        let row = sqlx::query_as::<_, BusinessOrganization>(
            r#"
            INSERT INTO business_organizations (
                name, code, description, compliance_owner, organization_type, is_active,
                created_by, updated_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING *
            "#,
        )
        .bind(&input.name)
        .bind(&input.code)
        .bind(&input.description)
        .bind(&input.compliance_owner)
        .bind(input.organization_type.as_str())
        .bind(input.is_active)
        .bind(actor)
        .fetch_one(self.pool)
        .await
        .map_err(|e| DbError::classify(e, "organization", input.name.clone()))?;
        Ok(row)
    }

    pub async fn update_organization(
        &self,
        id: Uuid,
        row_version: i32,
        input: OrganizationInput,
        actor: &str,
    ) -> Result<BusinessOrganization, DbError> {
        let row = sqlx::query_as::<_, BusinessOrganization>(
            r#"
            UPDATE business_organizations SET
                name = $3, code = $4, description = $5, compliance_owner = $6,
                organization_type = $7, is_active = $8,
                updated_by = $9, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1 AND row_version = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(row_version)
        .bind(&input.name)
        .bind(&input.code)
        .bind(&input.description)
        .bind(&input.compliance_owner)
        .bind(input.organization_type.as_str())
        .bind(input.is_active)
        .bind(actor)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| DbError::classify(e, "organization", input.name.clone()))?;
        match row {
            Some(o) => Ok(o),
            None => Err(stale_or_missing(self.pool, "business_organizations", "organization", id).await),
        }
    }

    pub async fn delete_organization(&self, id: Uuid) -> Result<(), DbError> {
        super::delete_by_id(self.pool, "business_organizations", "organization", id).await
    }

    // Assessments

    pub async fn assessments(
        &self,
        filter: &AssessmentFilter,
        page: Pagination,
    ) -> Result<Paginated<ComplianceAssessment>, DbError> {
        let rows: Vec<WithTotal<ComplianceAssessment>> = sqlx::query_as(
            r#"
            SELECT *, COUNT(*) OVER() AS total
            FROM compliance_assessments
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

    pub async fn assessment(&self, id: Uuid) -> Result<ComplianceAssessment, DbError> {
        let row = sqlx::query_as::<_, ComplianceAssessment>("SELECT * FROM compliance_assessments WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        found(row, "compliance assessment", id)
    }

    pub async fn assessment_detail(&self, id: Uuid) -> Result<AssessmentDetail, DbError> {
        let assessment = self.assessment(id).await?;
        let controls = sqlx::query_as::<_, ControlAssessmentView>(
            r#"
            SELECT ca.*, c.control_id AS control_ref, c.title AS control_title, c.category, c.priority
            FROM control_assessments ca
            JOIN compliance_controls c ON c.id = ca.control_id
            WHERE ca.compliance_assessment_id = $1
            ORDER BY c.control_id
            "#,
        )
        .bind(id)
        .fetch_all(self.pool)
        .await?;
        let statuses: Vec<ComplianceStatus> = controls.iter().map(|c| c.assessment.status).collect();
        Ok(AssessmentDetail {
            is_overdue: assessment.is_overdue(Utc::now()),
            status_breakdown: compliance::status_breakdown(&statuses),
            assessment,
            controls,
        })
    }

    /// Create an assessment with one NonCompliant row per framework control.
    pub async fn create_assessment(
        &self,
        input: AssessmentHeader,
        hours: &SlaHours,
        actor: &str,
    ) -> Result<ComplianceAssessment, DbError> {
        let (start, deadline) = input.schedule(hours, AssessmentKind::Compliance);
        let mut tx = self.pool.begin().await?;
        let assessment = sqlx::query_as::<_, ComplianceAssessment>(
            r#"
            INSERT INTO compliance_assessments (
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
        .map_err(|e| DbError::classify(e, "compliance assessment", input.title.clone()))?;

        let seeded = sqlx::query(
            r#"
            INSERT INTO control_assessments (compliance_assessment_id, control_id)
            SELECT $1, id FROM compliance_controls WHERE framework_id = $2
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
            "compliance assessment created"
        );
        Ok(assessment)
    }

    pub async fn update_assessment(
        &self,
        id: Uuid,
        row_version: i32,
        input: AssessmentHeader,
        actor: &str,
    ) -> Result<ComplianceAssessment, DbError> {
        let row = sqlx::query_as::<_, ComplianceAssessment>(
            r#"
            UPDATE compliance_assessments SET
                title = $3, description = $4, status = $5, assessor = $6,
                start_date = COALESCE($7, start_date), due_date = $8,
                sla_deadline = COALESCE($9, sla_deadline), organization_id = $10,
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
        .map_err(|e| DbError::classify(e, "compliance assessment", id.to_string()))?;
        match row {
            Some(a) => Ok(a),
            None => Err(stale_or_missing(self.pool, "compliance_assessments", "compliance assessment", id).await),
        }
    }

    /// Update one control and recompute the assessment percentage.
    ///
    /// `control_id` is the framework control's id.
    pub async fn update_control(
        &self,
        assessment_id: Uuid,
        control_id: Uuid,
        input: ControlAssessmentInput,
        actor: &str,
    ) -> Result<ControlAssessment, DbError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, ControlAssessment>(
            r#"
            UPDATE control_assessments SET
                status = $3, evidence = $4, gap_notes = $5, ownership = $6,
                projected_compliance_date = $7, project_needed = $8, tshirt_size = $9,
                project_number = $10, assessed_by = $11, assessment_date = NOW(),
                updated_at = NOW(), row_version = row_version + 1
            WHERE compliance_assessment_id = $1 AND control_id = $2
            RETURNING *
            "#,
        )
        .bind(assessment_id)
        .bind(control_id)
        .bind(input.status.as_str())
        .bind(&input.evidence)
        .bind(&input.gap_notes)
        .bind(&input.ownership)
        .bind(input.projected_compliance_date)
        .bind(input.project_needed)
        .bind(input.tshirt_size.map(|t| t.as_str()))
        .bind(&input.project_number)
        .bind(actor)
        .fetch_optional(&mut *tx)
        .await?;
        let row = found(row, "control assessment", control_id)?;

        let percentage = recompute_percentage(&mut tx, assessment_id, actor).await?;
        tx.commit().await?;
        tracing::debug!(assessment = %assessment_id, percentage, "compliance percentage updated");
        Ok(row)
    }

    pub async fn complete_assessment(
        &self,
        id: Uuid,
        hours: &SlaHours,
        actor: &str,
    ) -> Result<ComplianceAssessment, DbError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, ComplianceAssessment>(
            r#"
            UPDATE compliance_assessments SET
                status = 'Completed', completed_date = NOW(),
                updated_by = $2, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(actor)
        .fetch_optional(&mut *tx)
        .await?;
        let assessment = found(row, "compliance assessment", id)?;
        let completed = assessment.completed_date.unwrap_or_else(Utc::now);
        let completion = Completion::compliance_assessment(&assessment, hours, completed);
        sla_history::record(&mut *tx, &completion, actor).await?;
        tx.commit().await?;
        Ok(assessment)
    }

    pub async fn delete_assessment(&self, id: Uuid) -> Result<(), DbError> {
        super::delete_by_id(self.pool, "compliance_assessments", "compliance assessment", id).await
    }
}

/// Returns false when the control id already exists in the framework.
async fn insert_control(
    tx: &mut Transaction<'_, Postgres>,
    framework_id: Uuid,
    control: &ControlInput,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        r#"
        INSERT INTO compliance_controls (
            framework_id, control_id, title, description, category, priority,
            control_text, supplemental_guidance, related_controls
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (framework_id, control_id) DO NOTHING
        "#,
    )
    .bind(framework_id)
    .bind(&control.control_id)
    .bind(&control.title)
    .bind(&control.description)
    .bind(&control.category)
    .bind(control.priority.as_str())
    .bind(&control.control_text)
    .bind(&control.supplemental_guidance)
    .bind(&control.related_controls)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() == 1)
}

async fn recompute_percentage(
    tx: &mut Transaction<'_, Postgres>,
    assessment_id: Uuid,
    actor: &str,
) -> Result<f64, DbError> {
    let raw: Vec<String> =
        sqlx::query_scalar("SELECT status FROM control_assessments WHERE compliance_assessment_id = $1")
            .bind(assessment_id)
            .fetch_all(&mut **tx)
            .await?;
    let statuses: Vec<ComplianceStatus> = raw.iter().filter_map(|s| s.parse().ok()).collect();
    let percentage = compliance::compliance_percentage(&statuses);

    sqlx::query(
        r#"
        UPDATE compliance_assessments SET
            compliance_percentage = $2, updated_by = $3, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(assessment_id)
    .bind(percentage)
    .bind(actor)
    .execute(&mut **tx)
    .await?;
    Ok(percentage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn header() -> AssessmentHeader {
        AssessmentHeader {
            title: "ISO 27001 annual review".into(),
            description: None,
            status: AssessmentStatus::Draft,
            assessor: "auditor@example.com".into(),
            start_date: Some(Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap()),
            due_date: None,
            sla_deadline: None,
            framework_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn schedule_defaults_deadline_from_hours() {
        let h = header();
        let (start, deadline) = h.schedule(&SlaHours::default(), AssessmentKind::Compliance);
        assert_eq!(deadline - start, Duration::hours(720));
    }

    #[test]
    fn schedule_keeps_explicit_deadline() {
        let mut h = header();
        let explicit = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        h.sla_deadline = Some(explicit);
        let (_, deadline) = h.schedule(&SlaHours::default(), AssessmentKind::Maturity);
        assert_eq!(deadline, explicit);
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn control_update_recomputes_percentage() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = crate::db::create_pool(&url).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        let repo = ComplianceRepo::new(&pool);
        let suffix = Uuid::new_v4().to_string();

        let framework = repo
            .create_framework(
                FrameworkInput {
                    name: format!("Test framework {}", suffix),
                    version: "1.0".into(),
                    description: None,
                    framework_type: FrameworkType::Custom,
                    status: FrameworkStatus::Active,
                },
                "tester",
            )
            .await
            .unwrap();
        let controls: Vec<(usize, ControlInput)> = ["AC-1", "AC-2"]
            .iter()
            .enumerate()
            .map(|(i, id)| {
                (
                    i + 1,
                    ControlInput {
                        control_id: (*id).into(),
                        title: format!("Control {}", id),
                        description: None,
                        category: None,
                        priority: ControlPriority::High,
                        control_text: None,
                        supplemental_guidance: None,
                        related_controls: None,
                    },
                )
            })
            .collect();
        let report = repo.import_controls(framework.id, &controls).await.unwrap();
        assert_eq!(report.created, 2);

        let org = repo
            .create_organization(
                OrganizationInput {
                    name: format!("Org {}", suffix),
                    code: None,
                    description: None,
                    compliance_owner: None,
                    organization_type: OrganizationType::It,
                    is_active: true,
                },
                "tester",
            )
            .await
            .unwrap();

        let mut h = header();
        h.framework_id = framework.id;
        h.organization_id = org.id;
        let assessment = repo.create_assessment(h, &SlaHours::default(), "tester").await.unwrap();
        let detail = repo.assessment_detail(assessment.id).await.unwrap();
        assert_eq!(detail.controls.len(), 2);

        let first = detail.controls[0].assessment.control_id;
        repo.update_control(
            assessment.id,
            first,
            ControlAssessmentInput {
                status: ComplianceStatus::FullyCompliant,
                evidence: Some("policy v3".into()),
                gap_notes: None,
                ownership: None,
                projected_compliance_date: None,
                project_needed: false,
                tshirt_size: None,
                project_number: None,
            },
            "tester",
        )
        .await
        .unwrap();
        let reloaded = repo.assessment(assessment.id).await.unwrap();
        assert_eq!(reloaded.compliance_percentage, 50.0);
    }
}
