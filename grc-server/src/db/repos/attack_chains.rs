//! Threat events, loss events and attack chains

use chrono::{DateTime, Utc};
use grc_core::attack_chain::{self, ChainResult, Estimate};
use grc_core::AttackChainStatus;
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{found, stale_or_missing, DbError};

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ThreatEvent {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub tef_min: f64,
    pub tef_most_likely: f64,
    pub tef_max: f64,
    pub preventive_controls: Json<Vec<String>>,
    pub detective_controls: Json<Vec<String>>,
    pub threat_scenario_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub row_version: i32,
}

impl ThreatEvent {
    pub fn tef(&self) -> Estimate {
        Estimate::new(self.tef_min, self.tef_most_likely, self.tef_max)
    }
}

#[derive(Debug, Clone)]
pub struct ThreatEventInput {
    pub title: String,
    pub description: Option<String>,
    pub tef: Estimate,
    pub preventive_controls: Vec<String>,
    pub detective_controls: Vec<String>,
    pub threat_scenario_id: Option<Uuid>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LossEvent {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub primary_loss_min: f64,
    pub primary_loss_most_likely: f64,
    pub primary_loss_max: f64,
    pub secondary_loss_min: Option<f64>,
    pub secondary_loss_most_likely: Option<f64>,
    pub secondary_loss_max: Option<f64>,
    pub loss_type: Option<String>,
    pub business_impact_category: Option<String>,
    pub threat_scenario_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub row_version: i32,
}

#[derive(Debug, Clone)]
pub struct LossEventInput {
    pub title: String,
    pub description: Option<String>,
    pub primary_loss: Estimate,
    pub secondary_loss: Option<Estimate>,
    pub loss_type: Option<String>,
    pub business_impact_category: Option<String>,
    pub threat_scenario_id: Option<Uuid>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AttackChain {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: AttackChainStatus,
    pub threat_event_id: Option<Uuid>,
    pub loss_event_id: Option<Uuid>,
    pub chain_probability: Option<f64>,
    pub lef: Option<f64>,
    pub lef_min: Option<f64>,
    pub lef_max: Option<f64>,
    pub ale_min: Option<f64>,
    pub ale_most_likely: Option<f64>,
    pub ale_max: Option<f64>,
    pub calculated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub row_version: i32,
}

#[derive(Debug, Clone)]
pub struct AttackChainInput {
    pub name: String,
    pub description: Option<String>,
    pub threat_event_id: Option<Uuid>,
    pub loss_event_id: Option<Uuid>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChainStep {
    pub id: Uuid,
    pub attack_chain_id: Uuid,
    pub step_order: i32,
    pub title: String,
    pub description: Option<String>,
    pub vulnerability_min: f64,
    pub vulnerability_most_likely: f64,
    pub vulnerability_max: f64,
    pub step_probability: Option<f64>,
    pub cumulative_probability: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl ChainStep {
    fn vulnerability(&self) -> Estimate {
        Estimate::new(
            self.vulnerability_min,
            self.vulnerability_most_likely,
            self.vulnerability_max,
        )
    }
}

#[derive(Debug, Clone)]
pub struct StepInput {
    pub title: String,
    pub description: Option<String>,
    pub vulnerability: Estimate,
}

/// A chain with its ordered steps and linked events.
#[derive(Debug, Clone, Serialize)]
pub struct ChainDetail {
    #[serde(flatten)]
    pub chain: AttackChain,
    pub steps: Vec<ChainStep>,
    pub threat_event: Option<ThreatEvent>,
    pub loss_event: Option<LossEvent>,
}

pub struct AttackChainRepo<'a> {
    pool: &'a PgPool,
}

impl<'a> AttackChainRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    // Threat events

    pub async fn threat_events(&self) -> Result<Vec<ThreatEvent>, DbError> {
        let rows = sqlx::query_as::<_, ThreatEvent>("SELECT * FROM threat_events ORDER BY title")
            .fetch_all(self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn threat_event(&self, id: Uuid) -> Result<ThreatEvent, DbError> {
        let row = sqlx::query_as::<_, ThreatEvent>("SELECT * FROM threat_events WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        found(row, "threat event", id)
    }

    pub async fn create_threat_event(&self, input: ThreatEventInput, actor: &str) -> Result<ThreatEvent, DbError> {
        let row = sqlx::query_as::<_, ThreatEvent>(
            r#"
            INSERT INTO threat_events (
                title, description, tef_min, tef_most_likely, tef_max,
                preventive_controls, detective_controls, threat_scenario_id, created_by, updated_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            RETURNING *
            "#,
        )
        .bind(&input.title)
        .bind(&input.description)
        .bind(input.tef.min)
        .bind(input.tef.most_likely)
        .bind(input.tef.max)
        .bind(Json(&input.preventive_controls))
        .bind(Json(&input.detective_controls))
        .bind(input.threat_scenario_id)
        .bind(actor)
        .fetch_one(self.pool)
        .await
        .map_err(|e| DbError::classify(e, "threat event", input.title.clone()))?;
        Ok(row)
    }

    pub async fn update_threat_event(
        &self,
        id: Uuid,
        row_version: i32,
        input: ThreatEventInput,
        actor: &str,
    ) -> Result<ThreatEvent, DbError> {
        let row = sqlx::query_as::<_, ThreatEvent>(
            r#"
            UPDATE threat_events SET
                title = $3, description = $4, tef_min = $5, tef_most_likely = $6, tef_max = $7,
                preventive_controls = $8, detective_controls = $9, threat_scenario_id = $10,
                updated_by = $11, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1 AND row_version = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(row_version)
        .bind(&input.title)
        .bind(&input.description)
        .bind(input.tef.min)
        .bind(input.tef.most_likely)
        .bind(input.tef.max)
        .bind(Json(&input.preventive_controls))
        .bind(Json(&input.detective_controls))
        .bind(input.threat_scenario_id)
        .bind(actor)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| DbError::classify(e, "threat event", id.to_string()))?;
        match row {
            Some(t) => Ok(t),
            None => Err(stale_or_missing(self.pool, "threat_events", "threat event", id).await),
        }
    }

    pub async fn delete_threat_event(&self, id: Uuid) -> Result<(), DbError> {
        super::delete_by_id(self.pool, "threat_events", "threat event", id).await
    }

    // Loss events

    pub async fn loss_events(&self) -> Result<Vec<LossEvent>, DbError> {
        let rows = sqlx::query_as::<_, LossEvent>("SELECT * FROM loss_events ORDER BY title")
            .fetch_all(self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn loss_event(&self, id: Uuid) -> Result<LossEvent, DbError> {
        let row = sqlx::query_as::<_, LossEvent>("SELECT * FROM loss_events WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        found(row, "loss event", id)
    }

    pub async fn create_loss_event(&self, input: LossEventInput, actor: &str) -> Result<LossEvent, DbError> {
        let secondary = input.secondary_loss;
        let row = sqlx::query_as::<_, LossEvent>(
            r#"
            INSERT INTO loss_events (
                title, description, primary_loss_min, primary_loss_most_likely, primary_loss_max,
                secondary_loss_min, secondary_loss_most_likely, secondary_loss_max,
                loss_type, business_impact_category, threat_scenario_id, created_by, updated_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
            RETURNING *
            "#,
        )
        .bind(&input.title)
        .bind(&input.description)
        .bind(input.primary_loss.min)
        .bind(input.primary_loss.most_likely)
        .bind(input.primary_loss.max)
        .bind(secondary.map(|s| s.min))
        .bind(secondary.map(|s| s.most_likely))
        .bind(secondary.map(|s| s.max))
        .bind(&input.loss_type)
        .bind(&input.business_impact_category)
        .bind(input.threat_scenario_id)
        .bind(actor)
        .fetch_one(self.pool)
        .await
        .map_err(|e| DbError::classify(e, "loss event", input.title.clone()))?;
        Ok(row)
    }

    pub async fn update_loss_event(
        &self,
        id: Uuid,
        row_version: i32,
        input: LossEventInput,
        actor: &str,
    ) -> Result<LossEvent, DbError> {
        let secondary = input.secondary_loss;
        let row = sqlx::query_as::<_, LossEvent>(
            r#"
            UPDATE loss_events SET
                title = $3, description = $4, primary_loss_min = $5,
                primary_loss_most_likely = $6, primary_loss_max = $7, secondary_loss_min = $8,
                secondary_loss_most_likely = $9, secondary_loss_max = $10, loss_type = $11,
                business_impact_category = $12, threat_scenario_id = $13,
                updated_by = $14, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1 AND row_version = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(row_version)
        .bind(&input.title)
        .bind(&input.description)
        .bind(input.primary_loss.min)
        .bind(input.primary_loss.most_likely)
        .bind(input.primary_loss.max)
        .bind(secondary.map(|s| s.min))
        .bind(secondary.map(|s| s.most_likely))
        .bind(secondary.map(|s| s.max))
        .bind(&input.loss_type)
        .bind(&input.business_impact_category)
        .bind(input.threat_scenario_id)
        .bind(actor)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| DbError::classify(e, "loss event", id.to_string()))?;
        match row {
            Some(l) => Ok(l),
            None => Err(stale_or_missing(self.pool, "loss_events", "loss event", id).await),
        }
    }

    pub async fn delete_loss_event(&self, id: Uuid) -> Result<(), DbError> {
        super::delete_by_id(self.pool, "loss_events", "loss event", id).await
    }

    // Attack chains

    pub async fn chains(&self, status: Option<AttackChainStatus>) -> Result<Vec<AttackChain>, DbError> {
        let rows = sqlx::query_as::<_, AttackChain>(
            r#"
            SELECT * FROM attack_chains
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY updated_at DESC
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn chain(&self, id: Uuid) -> Result<AttackChain, DbError> {
        let row = sqlx::query_as::<_, AttackChain>("SELECT * FROM attack_chains WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        found(row, "attack chain", id)
    }

    pub async fn detail(&self, id: Uuid) -> Result<ChainDetail, DbError> {
        let chain = self.chain(id).await?;
        let steps = self.steps(id).await?;
        let threat_event = match chain.threat_event_id {
            Some(t) => Some(self.threat_event(t).await?),
            None => None,
        };
        let loss_event = match chain.loss_event_id {
            Some(l) => Some(self.loss_event(l).await?),
            None => None,
        };
        Ok(ChainDetail {
            chain,
            steps,
            threat_event,
            loss_event,
        })
    }

    pub async fn create_chain(&self, input: AttackChainInput, actor: &str) -> Result<AttackChain, DbError> {
        let row = sqlx::query_as::<_, AttackChain>(
            r#"
            INSERT INTO attack_chains (name, description, threat_event_id, loss_event_id, created_by, updated_by)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING *
            "#,
        )
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.threat_event_id)
        .bind(input.loss_event_id)
        .bind(actor)
        .fetch_one(self.pool)
        .await
        .map_err(|e| DbError::classify(e, "attack chain", input.name.clone()))?;
        tracing::info!(chain = %row.id, name = %row.name, "attack chain created");
        Ok(row)
    }

    pub async fn update_chain(
        &self,
        id: Uuid,
        row_version: i32,
        input: AttackChainInput,
        actor: &str,
    ) -> Result<AttackChain, DbError> {
        let row = sqlx::query_as::<_, AttackChain>(
            r#"
            UPDATE attack_chains SET
                name = $3, description = $4, threat_event_id = $5, loss_event_id = $6,
                updated_by = $7, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1 AND row_version = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(row_version)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.threat_event_id)
        .bind(input.loss_event_id)
        .bind(actor)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| DbError::classify(e, "attack chain", id.to_string()))?;
        match row {
            Some(c) => Ok(c),
            None => Err(stale_or_missing(self.pool, "attack_chains", "attack chain", id).await),
        }
    }

    pub async fn set_status(&self, id: Uuid, status: AttackChainStatus, actor: &str) -> Result<AttackChain, DbError> {
        let row = sqlx::query_as::<_, AttackChain>(
            r#"
            UPDATE attack_chains SET
                status = $2, updated_by = $3, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(actor)
        .fetch_optional(self.pool)
        .await?;
        found(row, "attack chain", id)
    }

    pub async fn delete_chain(&self, id: Uuid) -> Result<(), DbError> {
        super::delete_by_id(self.pool, "attack_chains", "attack chain", id).await
    }

    pub async fn steps(&self, chain_id: Uuid) -> Result<Vec<ChainStep>, DbError> {
        let rows = sqlx::query_as::<_, ChainStep>(
            "SELECT * FROM attack_chain_steps WHERE attack_chain_id = $1 ORDER BY step_order",
        )
        .bind(chain_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// Append a step at the end of the chain.
    pub async fn add_step(&self, chain_id: Uuid, input: StepInput) -> Result<ChainStep, DbError> {
        let mut tx = self.pool.begin().await?;
        // Lock the chain so concurrent appends get distinct orders.
        let exists = sqlx::query_scalar::<_, Uuid>("SELECT id FROM attack_chains WHERE id = $1 FOR UPDATE")
            .bind(chain_id)
            .fetch_optional(&mut *tx)
            .await?;
        found(exists, "attack chain", chain_id)?;

        let step = sqlx::query_as::<_, ChainStep>(
            r#"
            INSERT INTO attack_chain_steps (
                attack_chain_id, step_order, title, description,
                vulnerability_min, vulnerability_most_likely, vulnerability_max
            )
            SELECT $1, COALESCE(MAX(step_order), 0) + 1, $2, $3, $4, $5, $6
            FROM attack_chain_steps WHERE attack_chain_id = $1
            RETURNING *
            "#,
        )
        .bind(chain_id)
        .bind(&input.title)
        .bind(&input.description)
        .bind(input.vulnerability.min)
        .bind(input.vulnerability.most_likely)
        .bind(input.vulnerability.max)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(step)
    }

    pub async fn delete_step(&self, chain_id: Uuid, step_id: Uuid) -> Result<(), DbError> {
        let result = sqlx::query("DELETE FROM attack_chain_steps WHERE id = $1 AND attack_chain_id = $2")
            .bind(step_id)
            .bind(chain_id)
            .execute(self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("attack chain step", step_id));
        }
        Ok(())
    }

    /// Compute and store step probabilities and chain results.
    pub async fn calculate(&self, id: Uuid, actor: &str) -> Result<ChainDetail, DbError> {
        let detail = self.detail(id).await?;
        let threat = detail
            .threat_event
            .as_ref()
            .ok_or_else(|| DbError::conflict("attack chain", "a threat event is required to calculate"))?;

        let estimates: Vec<Estimate> = detail.steps.iter().map(ChainStep::vulnerability).collect();
        let result: ChainResult = attack_chain::calculate(
            threat.tef(),
            &estimates,
            detail.loss_event.as_ref().map(|l| l.primary_loss_most_likely),
            detail.loss_event.as_ref().and_then(|l| l.secondary_loss_most_likely),
        );

        let mut tx = self.pool.begin().await?;
        for (step, computed) in detail.steps.iter().zip(&result.steps) {
            sqlx::query(
                "UPDATE attack_chain_steps SET step_probability = $2, cumulative_probability = $3 WHERE id = $1",
            )
            .bind(step.id)
            .bind(computed.step_probability)
            .bind(computed.cumulative_probability)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            r#"
            UPDATE attack_chains SET
                chain_probability = $2, lef = $3, lef_min = $4, lef_max = $5,
                ale_min = $6, ale_most_likely = $7, ale_max = $8, calculated_at = NOW(),
                updated_by = $9, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(result.chain_probability)
        .bind(result.lef_most_likely)
        .bind(result.lef_min)
        .bind(result.lef_max)
        .bind(result.ale.map(|a| a.min))
        .bind(result.ale.map(|a| a.most_likely))
        .bind(result.ale.map(|a| a.max))
        .bind(actor)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(
            chain = %id,
            probability = result.chain_probability,
            lef = result.lef_most_likely,
            "attack chain calculated"
        );
        self.detail(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires database"]
    async fn calculate_stores_cumulative_probability() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = crate::db::create_pool(&url).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        let repo = AttackChainRepo::new(&pool);

        let threat = repo
            .create_threat_event(
                ThreatEventInput {
                    title: "Credential stuffing".into(),
                    description: None,
                    tef: Estimate::new(2.0, 4.0, 6.0),
                    preventive_controls: vec!["MFA".into()],
                    detective_controls: vec![],
                    threat_scenario_id: None,
                },
                "tester",
            )
            .await
            .unwrap();
        let chain = repo
            .create_chain(
                AttackChainInput {
                    name: "Account takeover".into(),
                    description: None,
                    threat_event_id: Some(threat.id),
                    loss_event_id: None,
                },
                "tester",
            )
            .await
            .unwrap();
        for title in ["Valid login", "Bypass MFA"] {
            repo.add_step(
                chain.id,
                StepInput {
                    title: title.into(),
                    description: None,
                    vulnerability: Estimate::new(0.5, 0.5, 0.5),
                },
            )
            .await
            .unwrap();
        }

        let detail = repo.calculate(chain.id, "tester").await.unwrap();
        assert_eq!(detail.steps[1].step_order, 2);
        assert_eq!(detail.chain.chain_probability, Some(0.25));
        assert_eq!(detail.chain.lef, Some(1.0));
        assert!(detail.chain.ale_most_likely.is_none());
    }
}
