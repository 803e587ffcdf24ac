//! Risk assessments, threat scenarios and level settings

use chrono::{DateTime, Utc};
use grc_core::rating::{self, RiskLevelSettings};
use grc_core::sla::SlaHours;
use grc_core::{
    AssessmentStatus, AssessmentType, CiaTriad, ExposureLevel, ImpactLevel, LikelihoodLevel,
    RiskLevel,
};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::sla_history::{self, Completion};
use super::{found, stale_or_missing, DbError, WithTotal};
use crate::models::{Paginated, Pagination};

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RiskAssessment {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub asset: Option<String>,
    pub business_unit: Option<String>,
    pub business_owner: Option<String>,
    pub technical_controls_in_place: Option<String>,
    pub threat_scenario: Option<String>,
    pub cia_triad: Option<String>,
    pub risk_matrix_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub status: AssessmentStatus,
    #[sqlx(try_from = "String")]
    pub assessment_type: AssessmentType,
    pub assessor: String,
    pub date_completed: Option<DateTime<Utc>>,
    pub finding_id: Option<Uuid>,
    pub tef_min: Option<f64>,
    pub tef_most_likely: Option<f64>,
    pub tef_max: Option<f64>,
    pub vulnerability: Option<f64>,
    pub primary_loss_magnitude: Option<f64>,
    pub secondary_loss_magnitude: Option<f64>,
    pub qualitative_likelihood: Option<String>,
    pub qualitative_impact: Option<String>,
    pub qualitative_exposure: Option<String>,
    pub qualitative_risk_score: Option<f64>,
    pub qualitative_risk_level: Option<String>,
    pub loss_event_frequency: Option<f64>,
    pub annual_loss_expectancy: Option<f64>,
    pub fair_risk_level: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub row_version: i32,
}

/// Validated assessment fields. Scores are derived, never supplied.
#[derive(Debug, Clone)]
pub struct AssessmentInput {
    pub title: String,
    pub description: Option<String>,
    pub asset: Option<String>,
    pub business_unit: Option<String>,
    pub business_owner: Option<String>,
    pub technical_controls_in_place: Option<String>,
    pub threat_scenario: Option<String>,
    pub cia_triad: Option<CiaTriad>,
    pub risk_matrix_id: Option<Uuid>,
    pub status: AssessmentStatus,
    pub assessment_type: AssessmentType,
    pub assessor: String,
    pub finding_id: Option<Uuid>,
    pub tef_min: Option<f64>,
    pub tef_most_likely: Option<f64>,
    pub tef_max: Option<f64>,
    pub vulnerability: Option<f64>,
    pub primary_loss_magnitude: Option<f64>,
    pub secondary_loss_magnitude: Option<f64>,
    pub qualitative_likelihood: Option<LikelihoodLevel>,
    pub qualitative_impact: Option<ImpactLevel>,
    pub qualitative_exposure: Option<ExposureLevel>,
}

/// Values derived from an assessment's inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssessmentScores {
    pub qualitative_risk_score: Option<f64>,
    pub qualitative_risk_level: Option<RiskLevel>,
    pub loss_event_frequency: Option<f64>,
    pub annual_loss_expectancy: Option<f64>,
    pub fair_risk_level: Option<RiskLevel>,
}

impl AssessmentInput {
    /// Qualitative score needs all three levels; FAIR needs TEF, vulnerability and primary loss.
    pub fn scores(&self, settings: &RiskLevelSettings) -> AssessmentScores {
        let mut scores = AssessmentScores::default();
        if let (Some(l), Some(i), Some(e)) = (
            self.qualitative_likelihood,
            self.qualitative_impact,
            self.qualitative_exposure,
        ) {
            let scored = settings.score_qualitative(l, i, e);
            scores.qualitative_risk_score = Some(rating::round_to(scored.score, 2));
            scores.qualitative_risk_level = Some(scored.level);
        }
        if let (Some(tef), Some(vuln), Some(primary)) = (
            self.tef_most_likely,
            self.vulnerability,
            self.primary_loss_magnitude,
        ) {
            let (lef, ale) = rating::fair_ale(tef, vuln, primary, self.secondary_loss_magnitude);
            scores.loss_event_frequency = Some(lef);
            scores.annual_loss_expectancy = Some(rating::round_to(ale, 2));
            scores.fair_risk_level = Some(settings.fair_level(ale));
        }
        scores
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ThreatScenario {
    pub id: Uuid,
    pub risk_assessment_id: Uuid,
    pub description: String,
    pub likelihood: Option<f64>,
    pub impact: Option<f64>,
    pub exposure: Option<f64>,
    pub risk_score: Option<f64>,
    pub risk_level: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub row_version: i32,
}

#[derive(Debug, Clone)]
pub struct ScenarioInput {
    pub description: String,
    pub likelihood: Option<f64>,
    pub impact: Option<f64>,
    pub exposure: Option<f64>,
}

impl ScenarioInput {
    pub fn score(&self, settings: &RiskLevelSettings) -> (Option<f64>, Option<RiskLevel>) {
        let score = rating::scenario_score(self.likelihood, self.impact, self.exposure);
        (score, score.map(|s| settings.qualitative_level(s)))
    }
}

pub struct RiskAssessmentRepo<'a> {
    pool: &'a PgPool,
}

impl<'a> RiskAssessmentRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(
        &self,
        status: Option<AssessmentStatus>,
        page: Pagination,
    ) -> Result<Paginated<RiskAssessment>, DbError> {
        let rows: Vec<WithTotal<RiskAssessment>> = sqlx::query_as(
            r#"
            SELECT *, COUNT(*) OVER() AS total
            FROM risk_assessments
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(self.pool)
        .await?;
        Ok(WithTotal::paginate(rows, page))
    }

    pub async fn get(&self, id: Uuid) -> Result<RiskAssessment, DbError> {
        let row = sqlx::query_as::<_, RiskAssessment>("SELECT * FROM risk_assessments WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        found(row, "risk assessment", id)
    }

    pub async fn create(
        &self,
        input: AssessmentInput,
        settings: &RiskLevelSettings,
        actor: &str,
    ) -> Result<RiskAssessment, DbError> {
        let scores = input.scores(settings);
        let assessment = sqlx::query_as::<_, RiskAssessment>(
            r#"
            INSERT INTO risk_assessments (
                title, description, asset, business_unit, business_owner,
                technical_controls_in_place, threat_scenario, cia_triad, risk_matrix_id,
                status, assessment_type, assessor, finding_id, tef_min, tef_most_likely,
                tef_max, vulnerability, primary_loss_magnitude, secondary_loss_magnitude,
                qualitative_likelihood, qualitative_impact, qualitative_exposure,
                qualitative_risk_score, qualitative_risk_level, loss_event_frequency,
                annual_loss_expectancy, fair_risk_level, created_by, updated_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $28)
            RETURNING *
            "#,
        )
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.asset)
        .bind(&input.business_unit)
        .bind(&input.business_owner)
        .bind(&input.technical_controls_in_place)
        .bind(&input.threat_scenario)
        .bind(input.cia_triad.map(|c| c.as_str()))
        .bind(input.risk_matrix_id)
        .bind(input.status.as_str())
        .bind(input.assessment_type.as_str())
        .bind(&input.assessor)
        .bind(input.finding_id)
        .bind(input.tef_min)
        .bind(input.tef_most_likely)
        .bind(input.tef_max)
        .bind(input.vulnerability)
        .bind(input.primary_loss_magnitude)
        .bind(input.secondary_loss_magnitude)
        .bind(input.qualitative_likelihood.map(|l| l.as_str()))
        .bind(input.qualitative_impact.map(|i| i.as_str()))
        .bind(input.qualitative_exposure.map(|e| e.as_str()))
        .bind(scores.qualitative_risk_score)
        .bind(scores.qualitative_risk_level.map(|l| l.as_str()))
        .bind(scores.loss_event_frequency)
        .bind(scores.annual_loss_expectancy)
        .bind(scores.fair_risk_level.map(|l| l.as_str()))
        .bind(actor)
        .fetch_one(self.pool)
        .await
        .map_err(|e| DbError::classify(e, "risk assessment", input.title.clone()))?;
        tracing::info!(id = %assessment.id, kind = %assessment.assessment_type, "risk assessment created");
        Ok(assessment)
    }

    pub async fn update(
        &self,
        id: Uuid,
        row_version: i32,
        input: AssessmentInput,
        settings: &RiskLevelSettings,
        actor: &str,
    ) -> Result<RiskAssessment, DbError> {
        let scores = input.scores(settings);
        let row = sqlx::query_as::<_, RiskAssessment>(
            r#"
            UPDATE risk_assessments SET
                title = $3, description = $4, asset = $5, business_unit = $6,
                business_owner = $7, technical_controls_in_place = $8, threat_scenario = $9,
                cia_triad = $10, risk_matrix_id = $11, status = $12, assessment_type = $13,
                assessor = $14, finding_id = $15, tef_min = $16, tef_most_likely = $17,
                tef_max = $18, vulnerability = $19, primary_loss_magnitude = $20,
                secondary_loss_magnitude = $21, qualitative_likelihood = $22,
                qualitative_impact = $23, qualitative_exposure = $24,
                qualitative_risk_score = $25, qualitative_risk_level = $26,
                loss_event_frequency = $27, annual_loss_expectancy = $28, fair_risk_level = $29,
                updated_by = $30, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1 AND row_version = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(row_version)
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.asset)
        .bind(&input.business_unit)
        .bind(&input.business_owner)
        .bind(&input.technical_controls_in_place)
        .bind(&input.threat_scenario)
        .bind(input.cia_triad.map(|c| c.as_str()))
        .bind(input.risk_matrix_id)
        .bind(input.status.as_str())
        .bind(input.assessment_type.as_str())
        .bind(&input.assessor)
        .bind(input.finding_id)
        .bind(input.tef_min)
        .bind(input.tef_most_likely)
        .bind(input.tef_max)
        .bind(input.vulnerability)
        .bind(input.primary_loss_magnitude)
        .bind(input.secondary_loss_magnitude)
        .bind(input.qualitative_likelihood.map(|l| l.as_str()))
        .bind(input.qualitative_impact.map(|i| i.as_str()))
        .bind(input.qualitative_exposure.map(|e| e.as_str()))
        .bind(scores.qualitative_risk_score)
        .bind(scores.qualitative_risk_level.map(|l| l.as_str()))
        .bind(scores.loss_event_frequency)
        .bind(scores.annual_loss_expectancy)
        .bind(scores.fair_risk_level.map(|l| l.as_str()))
        .bind(actor)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| DbError::classify(e, "risk assessment", id.to_string()))?;
        match row {
            Some(a) => Ok(a),
            None => Err(stale_or_missing(self.pool, "risk_assessments", "risk assessment", id).await),
        }
    }

    /// Mark completed and record the assessment SLA against `hours`.
    pub async fn complete(&self, id: Uuid, hours: &SlaHours, actor: &str) -> Result<RiskAssessment, DbError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, RiskAssessment>(
            r#"
            UPDATE risk_assessments SET
                status = 'Completed', date_completed = NOW(),
                updated_by = $2, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(actor)
        .fetch_optional(&mut *tx)
        .await?;
        let assessment = found(row, "risk assessment", id)?;
        let completion = Completion::risk_assessment(&assessment, hours, Utc::now());
        sla_history::record(&mut *tx, &completion, actor).await?;
        tx.commit().await?;
        Ok(assessment)
    }

    /// Detach linked risks and events, drop scenarios, then the assessment.
    pub async fn delete(&self, id: Uuid) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE risks SET risk_assessment_id = NULL WHERE risk_assessment_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for table in ["threat_events", "loss_events"] {
            let sql = format!(
                r#"
                UPDATE {} SET threat_scenario_id = NULL
                WHERE threat_scenario_id IN (SELECT id FROM threat_scenarios WHERE risk_assessment_id = $1)
                "#,
                table
            );
            sqlx::query(&sql).bind(id).execute(&mut *tx).await?;
        }
        sqlx::query("DELETE FROM threat_scenarios WHERE risk_assessment_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM risk_assessments WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("risk assessment", id));
        }

        tx.commit().await?;
        tracing::info!(id = %id, "risk assessment deleted");
        Ok(())
    }

    pub async fn scenarios(&self, assessment_id: Uuid) -> Result<Vec<ThreatScenario>, DbError> {
        let rows = sqlx::query_as::<_, ThreatScenario>(
            "SELECT * FROM threat_scenarios WHERE risk_assessment_id = $1 ORDER BY created_at",
        )
        .bind(assessment_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn scenario(&self, assessment_id: Uuid, id: Uuid) -> Result<ThreatScenario, DbError> {
        let row = sqlx::query_as::<_, ThreatScenario>(
            "SELECT * FROM threat_scenarios WHERE id = $1 AND risk_assessment_id = $2",
        )
        .bind(id)
        .bind(assessment_id)
        .fetch_optional(self.pool)
        .await?;
        found(row, "threat scenario", id)
    }

    pub async fn create_scenario(
        &self,
        assessment_id: Uuid,
        input: ScenarioInput,
        settings: &RiskLevelSettings,
        actor: &str,
    ) -> Result<ThreatScenario, DbError> {
        // Surface a missing parent as 404 rather than an FK conflict.
        self.get(assessment_id).await?;
        let (score, level) = input.score(settings);
        let row = sqlx::query_as::<_, ThreatScenario>(
            r#"
            INSERT INTO threat_scenarios (
                risk_assessment_id, description, likelihood, impact, exposure,
                risk_score, risk_level, created_by, updated_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING *
            "#,
        )
        .bind(assessment_id)
        .bind(&input.description)
        .bind(input.likelihood)
        .bind(input.impact)
        .bind(input.exposure)
        .bind(score)
        .bind(level.map(|l| l.as_str()))
        .bind(actor)
        .fetch_one(self.pool)
        .await?;
        Ok(row)
    }

    pub async fn update_scenario(
        &self,
        assessment_id: Uuid,
        id: Uuid,
        row_version: i32,
        input: ScenarioInput,
        settings: &RiskLevelSettings,
        actor: &str,
    ) -> Result<ThreatScenario, DbError> {
        let (score, level) = input.score(settings);
        let row = sqlx::query_as::<_, ThreatScenario>(
            r#"
            UPDATE threat_scenarios SET
                description = $4, likelihood = $5, impact = $6, exposure = $7,
                risk_score = $8, risk_level = $9,
                updated_by = $10, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1 AND risk_assessment_id = $2 AND row_version = $3
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(assessment_id)
        .bind(row_version)
        .bind(&input.description)
        .bind(input.likelihood)
        .bind(input.impact)
        .bind(input.exposure)
        .bind(score)
        .bind(level.map(|l| l.as_str()))
        .bind(actor)
        .fetch_optional(self.pool)
        .await?;
        match row {
            Some(s) => Ok(s),
            None => Err(stale_or_missing(self.pool, "threat_scenarios", "threat scenario", id).await),
        }
    }

    pub async fn delete_scenario(&self, assessment_id: Uuid, id: Uuid) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        for table in ["threat_events", "loss_events"] {
            let sql = format!("UPDATE {} SET threat_scenario_id = NULL WHERE threat_scenario_id = $1", table);
            sqlx::query(&sql).bind(id).execute(&mut *tx).await?;
        }
        let result = sqlx::query("DELETE FROM threat_scenarios WHERE id = $1 AND risk_assessment_id = $2")
            .bind(id)
            .bind(assessment_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("threat scenario", id));
        }
        tx.commit().await?;
        Ok(())
    }
}

#[derive(FromRow)]
struct SettingsRow {
    qualitative_critical: f64,
    qualitative_high: f64,
    qualitative_medium: f64,
    risk_appetite: f64,
    fair_critical: f64,
    fair_high: f64,
    fair_medium: f64,
}

impl From<SettingsRow> for RiskLevelSettings {
    fn from(r: SettingsRow) -> Self {
        Self {
            qualitative_critical: r.qualitative_critical,
            qualitative_high: r.qualitative_high,
            qualitative_medium: r.qualitative_medium,
            risk_appetite: r.risk_appetite,
            fair_critical: r.fair_critical,
            fair_high: r.fair_high,
            fair_medium: r.fair_medium,
        }
    }
}

/// The single active row of `risk_level_settings`.
pub struct SettingsRepo<'a> {
    pool: &'a PgPool,
}

impl<'a> SettingsRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Active settings, or the built-in defaults when none are stored.
    pub async fn active(&self) -> Result<RiskLevelSettings, DbError> {
        let row = sqlx::query_as::<_, SettingsRow>(
            r#"
            SELECT qualitative_critical, qualitative_high, qualitative_medium, risk_appetite,
                   fair_critical, fair_high, fair_medium
            FROM risk_level_settings
            WHERE is_active
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(Into::into).unwrap_or_default())
    }

    /// Replace the active settings. Callers validate first.
    pub async fn save(&self, settings: &RiskLevelSettings, actor: &str) -> Result<RiskLevelSettings, DbError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE risk_level_settings SET is_active = FALSE, updated_at = NOW() WHERE is_active")
            .execute(&mut *tx)
            .await?;
        let row = sqlx::query_as::<_, SettingsRow>(
            r#"
            INSERT INTO risk_level_settings (
                qualitative_critical, qualitative_high, qualitative_medium, risk_appetite,
                fair_critical, fair_high, fair_medium, created_by, updated_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING qualitative_critical, qualitative_high, qualitative_medium, risk_appetite,
                      fair_critical, fair_high, fair_medium
            "#,
        )
        .bind(settings.qualitative_critical)
        .bind(settings.qualitative_high)
        .bind(settings.qualitative_medium)
        .bind(settings.risk_appetite)
        .bind(settings.fair_critical)
        .bind(settings.fair_high)
        .bind(settings.fair_medium)
        .bind(actor)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        tracing::info!(actor, "risk level settings updated");
        Ok(row.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> AssessmentInput {
        AssessmentInput {
            title: "Payroll exposure".into(),
            description: None,
            asset: None,
            business_unit: None,
            business_owner: None,
            technical_controls_in_place: None,
            threat_scenario: None,
            cia_triad: None,
            risk_matrix_id: None,
            status: AssessmentStatus::Draft,
            assessment_type: AssessmentType::Qualitative,
            assessor: "analyst@example.com".into(),
            finding_id: None,
            tef_min: None,
            tef_most_likely: None,
            tef_max: None,
            vulnerability: None,
            primary_loss_magnitude: None,
            secondary_loss_magnitude: None,
            qualitative_likelihood: None,
            qualitative_impact: None,
            qualitative_exposure: None,
        }
    }

    #[test]
    fn qualitative_scores_need_all_three_levels() {
        let settings = RiskLevelSettings::default();
        let mut a = input();
        a.qualitative_likelihood = Some(LikelihoodLevel::Likely);
        a.qualitative_impact = Some(ImpactLevel::Critical);
        assert_eq!(a.scores(&settings), AssessmentScores::default());

        a.qualitative_exposure = Some(ExposureLevel::HighlyExposed);
        let scores = a.scores(&settings);
        assert_eq!(scores.qualitative_risk_score, Some(12.0));
        assert_eq!(scores.qualitative_risk_level, Some(RiskLevel::High));
    }

    #[test]
    fn fair_scores_use_most_likely_tef() {
        let mut a = input();
        a.assessment_type = AssessmentType::Fair;
        a.tef_most_likely = Some(2.0);
        a.vulnerability = Some(0.5);
        a.primary_loss_magnitude = Some(100_000.0);
        a.secondary_loss_magnitude = Some(50_000.0);

        let scores = a.scores(&RiskLevelSettings::default());
        assert_eq!(scores.loss_event_frequency, Some(1.0));
        assert_eq!(scores.annual_loss_expectancy, Some(150_000.0));
        assert_eq!(scores.fair_risk_level, Some(RiskLevel::High));
    }

    #[test]
    fn scenario_without_exposure_is_unscored() {
        let settings = RiskLevelSettings::default();
        let s = ScenarioInput {
            description: "Phishing".into(),
            likelihood: Some(3.0),
            impact: Some(4.0),
            exposure: None,
        };
        assert_eq!(s.score(&settings), (None, None));

        let s = ScenarioInput { exposure: Some(1.5), ..s };
        assert_eq!(s.score(&settings), (Some(18.0), Some(RiskLevel::Critical)));
    }
}
