//! Risk backlog repository
//!
//! Transitions lock the entry row, run the pure workflow in
//! `grc_core::backlog`, then persist the new state, the activity record and
//! any approval side effect in the same transaction.

use chrono::{DateTime, Datelike, Utc};
use grc_core::backlog::{
    self, Activity, Actor, BacklogActionType, BacklogPriority, BacklogStatus, Command,
    CommentType, Participants, RiskSource, StatsRow, TransitionError, WorkflowState,
};
use grc_core::sla::{self, SlaHours};
use grc_core::{
    rating, ExposureLevel, FindingStatus, ImpactLevel, LikelihoodLevel, RiskStatus,
    TreatmentStrategy, ValidationError,
};
use serde::{Deserialize, Serialize};
use sqlx::{Acquire, FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::findings::{self, FindingInput};
use super::risks::{self, RiskInput};
use super::{found, DbError, WithTotal};
use crate::models::input::{FindingRequest, RiskRequest};
use crate::models::{Paginated, Pagination};

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BacklogEntry {
    pub id: Uuid,
    pub backlog_number: String,
    #[sqlx(try_from = "String")]
    pub action_type: BacklogActionType,
    #[sqlx(try_from = "String")]
    pub status: BacklogStatus,
    #[sqlx(try_from = "String")]
    pub priority: BacklogPriority,
    pub risk_id: Option<Uuid>,
    pub finding_id: Option<Uuid>,
    pub request_description: String,
    pub request_justification: Option<String>,
    pub requester: String,
    pub assigned_to_analyst: Option<String>,
    pub assigned_to_manager: Option<String>,
    pub assigned_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub analyst_comments: Option<String>,
    pub manager_comments: Option<String>,
    pub rejection_reason: Option<String>,
    pub completed_date: Option<DateTime<Utc>>,
    #[sqlx(try_from = "String")]
    pub risk_source: RiskSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub row_version: i32,
}

impl BacklogEntry {
    pub fn participants(&self) -> Participants<'_> {
        Participants {
            requester: &self.requester,
            analyst: self.assigned_to_analyst.as_deref(),
            manager: self.assigned_to_manager.as_deref(),
        }
    }

    pub fn workflow(&self) -> WorkflowState {
        WorkflowState {
            status: self.status,
            priority: self.priority,
            assigned_to_analyst: self.assigned_to_analyst.clone(),
            assigned_to_manager: self.assigned_to_manager.clone(),
            assigned_date: self.assigned_date,
            analyst_comments: self.analyst_comments.clone(),
            manager_comments: self.manager_comments.clone(),
            rejection_reason: self.rejection_reason.clone(),
            completed_date: self.completed_date,
        }
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        backlog::is_overdue(self.status, self.due_date, now)
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BacklogComment {
    pub id: Uuid,
    pub backlog_entry_id: Uuid,
    pub comment: String,
    #[sqlx(try_from = "String")]
    pub comment_type: CommentType,
    pub is_internal: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BacklogActivity {
    pub id: Uuid,
    pub backlog_entry_id: Uuid,
    pub activity_type: String,
    pub from_value: Option<String>,
    pub to_value: Option<String>,
    pub description: String,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacklogDetail {
    #[serde(flatten)]
    pub entry: BacklogEntry,
    pub is_overdue: bool,
    pub comments: Vec<BacklogComment>,
    pub activities: Vec<BacklogActivity>,
}

#[derive(Debug, Clone)]
pub struct NewEntry {
    pub action_type: BacklogActionType,
    pub priority: Option<BacklogPriority>,
    pub risk_id: Option<Uuid>,
    pub finding_id: Option<Uuid>,
    pub request_description: String,
    pub request_justification: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BacklogFilter {
    pub status: Option<BacklogStatus>,
    pub action_type: Option<BacklogActionType>,
    pub priority: Option<BacklogPriority>,
    pub assignee: Option<String>,
    pub overdue: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum BacklogError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("{user} may not {action} this backlog entry")]
    Forbidden { user: String, action: &'static str },

    /// The request payload cannot become a valid risk or finding
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl From<sqlx::Error> for BacklogError {
    fn from(e: sqlx::Error) -> Self {
        Self::Db(DbError::Sqlx(e))
    }
}

/// Fields a requester may put in `request_description` as a JSON object.
///
/// Plain text is accepted as well and becomes the description.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RequestPayload {
    pub title: Option<String>,
    pub description: Option<String>,
    pub details: Option<String>,
    pub threat_scenario: Option<String>,
    pub asset: Option<String>,
    pub business_unit: Option<String>,
    pub business_owner: Option<String>,
    pub owner: Option<String>,
    pub domain: Option<String>,
    pub technical_control: Option<String>,
    pub impact: Option<ImpactLevel>,
    pub likelihood: Option<LikelihoodLevel>,
    pub exposure: Option<ExposureLevel>,
    pub risk_assessment_id: Option<Uuid>,
}

impl RequestPayload {
    pub fn parse(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or_else(|_| Self {
            description: Some(text.to_owned()),
            ..Self::default()
        })
    }

    fn levels(&self) -> (ImpactLevel, LikelihoodLevel, ExposureLevel) {
        (
            self.impact.unwrap_or(ImpactLevel::Medium),
            self.likelihood.unwrap_or(LikelihoodLevel::Possible),
            self.exposure.unwrap_or(ExposureLevel::ModeratelyExposed),
        )
    }

    /// Validated the same way as `POST /risks`.
    pub fn risk_input(
        &self,
        entry: &BacklogEntry,
        approver: &str,
        sla_hours: &SlaHours,
    ) -> Result<RiskInput, ValidationError> {
        let (impact, likelihood, exposure) = self.levels();
        let level = rating::finding_rating(impact, likelihood, exposure);
        RiskRequest {
            title: self
                .title
                .clone()
                .unwrap_or_else(|| format!("Risk from backlog entry {}", entry.backlog_number)),
            description: self.description.clone(),
            threat_scenario: self.threat_scenario.clone(),
            business_unit: self.business_unit.clone(),
            asset: self.asset.clone(),
            owner: Some(self.owner.clone().unwrap_or_else(|| approver.to_owned())),
            impact: Some(impact),
            likelihood: Some(likelihood),
            exposure: Some(exposure),
            inherent_risk_level: Some(level),
            treatment: Some(TreatmentStrategy::Mitigate),
            next_review_date: Some(sla::deadline(Utc::now(), sla_hours.review(level))),
            status: Some(RiskStatus::Open),
            finding_id: entry.finding_id,
            risk_assessment_id: self.risk_assessment_id,
            ..RiskRequest::default()
        }
        .validate()
    }

    /// Validated the same way as `POST /findings`.
    pub fn finding_input(&self, entry: &BacklogEntry, approver: &str) -> Result<FindingInput, ValidationError> {
        let (impact, likelihood, exposure) = self.levels();
        let owner = self.business_owner.clone().unwrap_or_else(|| approver.to_owned());
        FindingRequest {
            title: self
                .title
                .clone()
                .unwrap_or_else(|| format!("Finding from backlog entry {}", entry.backlog_number)),
            details: self
                .details
                .clone()
                .or_else(|| self.description.clone())
                .unwrap_or_default(),
            impact: Some(impact),
            likelihood: Some(likelihood),
            exposure: Some(exposure),
            status: Some(FindingStatus::Open),
            owner: owner.clone(),
            domain: self.domain.clone(),
            business_unit: self.business_unit.clone(),
            business_owner: Some(owner),
            asset: self.asset.clone(),
            technical_control: self.technical_control.clone(),
            ..FindingRequest::default()
        }
        .validate()
    }
}

pub struct BacklogRepo<'a> {
    pool: &'a PgPool,
}

impl<'a> BacklogRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, filter: &BacklogFilter, page: Pagination) -> Result<Paginated<BacklogEntry>, DbError> {
        let rows: Vec<WithTotal<BacklogEntry>> = sqlx::query_as(
            r#"
            SELECT *, COUNT(*) OVER() AS total
            FROM risk_backlog_entries
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR action_type = $2)
              AND ($3::text IS NULL OR priority = $3)
              AND ($4::text IS NULL
                   OR LOWER(assigned_to_analyst) = LOWER($4)
                   OR LOWER(assigned_to_manager) = LOWER($4))
              AND ($5::bool IS NULL
                   OR $5 = (due_date IS NOT NULL AND due_date < NOW()
                            AND status NOT IN ('Approved', 'Rejected')))
            ORDER BY due_date NULLS LAST, created_at
            LIMIT $6 OFFSET $7
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.action_type.map(|a| a.as_str()))
        .bind(filter.priority.map(|p| p.as_str()))
        .bind(filter.assignee.as_deref())
        .bind(filter.overdue)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(self.pool)
        .await?;
        Ok(WithTotal::paginate(rows, page))
    }

    /// Open entries the user requested or is assigned to.
    pub async fn mine(&self, user: &str, page: Pagination) -> Result<Paginated<BacklogEntry>, DbError> {
        let rows: Vec<WithTotal<BacklogEntry>> = sqlx::query_as(
            r#"
            SELECT *, COUNT(*) OVER() AS total
            FROM risk_backlog_entries
            WHERE status NOT IN ('Approved', 'Rejected')
              AND (LOWER(requester) = LOWER($1)
                   OR LOWER(assigned_to_analyst) = LOWER($1)
                   OR LOWER(assigned_to_manager) = LOWER($1))
            ORDER BY due_date NULLS LAST, created_at
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(self.pool)
        .await?;
        Ok(WithTotal::paginate(rows, page))
    }

    pub async fn get(&self, id: Uuid) -> Result<BacklogEntry, DbError> {
        let row = sqlx::query_as::<_, BacklogEntry>("SELECT * FROM risk_backlog_entries WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        found(row, "backlog entry", id)
    }

    pub async fn detail(&self, id: Uuid) -> Result<BacklogDetail, DbError> {
        let entry = self.get(id).await?;
        let comments = sqlx::query_as::<_, BacklogComment>(
            "SELECT * FROM backlog_comments WHERE backlog_entry_id = $1 ORDER BY created_at",
        )
        .bind(id)
        .fetch_all(self.pool)
        .await?;
        let activities = sqlx::query_as::<_, BacklogActivity>(
            "SELECT * FROM backlog_activities WHERE backlog_entry_id = $1 ORDER BY created_at",
        )
        .bind(id)
        .fetch_all(self.pool)
        .await?;
        Ok(BacklogDetail {
            is_overdue: entry.is_overdue(Utc::now()),
            entry,
            comments,
            activities,
        })
    }

    pub async fn create(&self, new: NewEntry, requester: &str) -> Result<BacklogEntry, DbError> {
        let mut tx = self.pool.begin().await?;
        let source = self.source_of(&mut tx, &new).await?;
        let now = Utc::now();
        let priority = new.priority.unwrap_or_else(|| new.action_type.default_priority());
        let due = new.action_type.due_date(now);

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM risk_backlog_entries WHERE EXTRACT(YEAR FROM created_at)::int = $1",
        )
        .bind(now.year())
        .fetch_one(&mut *tx)
        .await?;

        let mut attempt = 0;
        let entry = loop {
            let number = backlog::backlog_number(now.year(), count, attempt);
            let mut savepoint = (&mut *tx).begin().await?;
            let result = sqlx::query_as::<_, BacklogEntry>(
                r#"
                INSERT INTO risk_backlog_entries (
                    backlog_number, action_type, priority, risk_id, finding_id,
                    request_description, request_justification, requester, due_date,
                    risk_source, created_by, updated_by
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $8, $8)
                RETURNING *
                "#,
            )
            .bind(&number)
            .bind(new.action_type.as_str())
            .bind(priority.as_str())
            .bind(new.risk_id)
            .bind(new.finding_id)
            .bind(&new.request_description)
            .bind(&new.request_justification)
            .bind(requester)
            .bind(due)
            .bind(source.as_str())
            .fetch_one(&mut *savepoint)
            .await
            .map_err(|e| DbError::classify(e, "backlog number", number.clone()));

            match result {
                Ok(entry) => {
                    savepoint.commit().await?;
                    break entry;
                }
                Err(e) if e.is_unique_violation() && attempt + 1 < backlog::NUMBER_ATTEMPTS => {
                    savepoint.rollback().await?;
                    tracing::debug!(number = %number, "backlog number taken, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        let activity = Activity {
            activity_type: "Created",
            from_value: None,
            to_value: Some(entry.status.to_string()),
            description: format!("{} request created", entry.action_type),
        };
        insert_activity(&mut tx, entry.id, &activity, requester).await?;
        tx.commit().await?;

        tracing::info!(
            entry = %entry.backlog_number,
            action = %entry.action_type,
            source = %entry.risk_source,
            "backlog entry created"
        );
        Ok(entry)
    }

    async fn source_of(&self, tx: &mut Transaction<'_, Postgres>, new: &NewEntry) -> Result<RiskSource, DbError> {
        let (has_assessment, risk_finding) = match new.risk_id {
            Some(risk_id) => {
                let row: Option<(Option<Uuid>, Option<Uuid>)> =
                    sqlx::query_as("SELECT risk_assessment_id, finding_id FROM risks WHERE id = $1")
                        .bind(risk_id)
                        .fetch_optional(&mut **tx)
                        .await?;
                let (assessment, finding) = found(row, "risk", risk_id)?;
                (assessment.is_some(), finding.is_some())
            }
            None => (false, false),
        };
        Ok(backlog::risk_source(
            has_assessment,
            risk_finding || new.finding_id.is_some(),
        ))
    }

    /// Apply a workflow command on behalf of `actor`.
    pub async fn transition(
        &self,
        id: Uuid,
        command: Command,
        actor: Actor<'_>,
        sla_hours: &SlaHours,
    ) -> Result<BacklogEntry, BacklogError> {
        let mut tx = self.pool.begin().await?;
        let entry = sqlx::query_as::<_, BacklogEntry>(
            "SELECT * FROM risk_backlog_entries WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let entry = found(entry, "backlog entry", id)?;

        if !backlog::can_issue(actor, command.authority(), entry.status, entry.participants()) {
            return Err(BacklogError::Forbidden {
                user: actor.user.to_owned(),
                action: command.name(),
            });
        }

        let approving = matches!(command, Command::ManagerApprove { .. });
        let mut state = entry.workflow();
        let activity = backlog::apply(&mut state, command, Utc::now())?;

        let mut updated = sqlx::query_as::<_, BacklogEntry>(
            r#"
            UPDATE risk_backlog_entries SET
                status = $2, priority = $3, assigned_to_analyst = $4, assigned_to_manager = $5,
                assigned_date = $6, analyst_comments = $7, manager_comments = $8,
                rejection_reason = $9, completed_date = $10,
                updated_by = $11, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(state.status.as_str())
        .bind(state.priority.as_str())
        .bind(&state.assigned_to_analyst)
        .bind(&state.assigned_to_manager)
        .bind(state.assigned_date)
        .bind(&state.analyst_comments)
        .bind(&state.manager_comments)
        .bind(&state.rejection_reason)
        .bind(state.completed_date)
        .bind(actor.user)
        .fetch_one(&mut *tx)
        .await?;
        insert_activity(&mut tx, id, &activity, actor.user).await?;

        if approving {
            updated = apply_approval(&mut tx, updated, actor.user, sla_hours).await?;
        }
        tx.commit().await?;

        tracing::info!(
            entry = %updated.backlog_number,
            from = %entry.status,
            to = %updated.status,
            actor = actor.user,
            "backlog transition"
        );
        Ok(updated)
    }

    pub async fn add_comment(
        &self,
        id: Uuid,
        comment: &str,
        comment_type: CommentType,
        is_internal: bool,
        actor: &str,
    ) -> Result<BacklogComment, DbError> {
        let row = sqlx::query_as::<_, BacklogComment>(
            r#"
            INSERT INTO backlog_comments (backlog_entry_id, comment, comment_type, is_internal, created_by)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(comment)
        .bind(comment_type.as_str())
        .bind(is_internal)
        .bind(actor)
        .fetch_one(self.pool)
        .await
        .map_err(|e| DbError::classify(e, "backlog entry", id.to_string()))?;
        Ok(row)
    }

    pub async fn stats_rows(&self) -> Result<Vec<StatsRow>, DbError> {
        let rows: Vec<StatsProjection> = sqlx::query_as(
            r#"
            SELECT action_type, status, priority, assigned_to_analyst, assigned_to_manager,
                   due_date, updated_at
            FROM risk_backlog_entries
            "#,
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[derive(FromRow)]
struct StatsProjection {
    #[sqlx(try_from = "String")]
    action_type: BacklogActionType,
    #[sqlx(try_from = "String")]
    status: BacklogStatus,
    #[sqlx(try_from = "String")]
    priority: BacklogPriority,
    assigned_to_analyst: Option<String>,
    assigned_to_manager: Option<String>,
    due_date: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl From<StatsProjection> for StatsRow {
    fn from(p: StatsProjection) -> Self {
        Self {
            action_type: p.action_type,
            status: p.status,
            priority: p.priority,
            assigned_to_analyst: p.assigned_to_analyst,
            assigned_to_manager: p.assigned_to_manager,
            due_date: p.due_date,
            updated_at: p.updated_at,
        }
    }
}

async fn insert_activity(
    tx: &mut Transaction<'_, Postgres>,
    entry_id: Uuid,
    activity: &Activity,
    actor: &str,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO backlog_activities (backlog_entry_id, activity_type, from_value, to_value, description, actor)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(entry_id)
    .bind(activity.activity_type)
    .bind(&activity.from_value)
    .bind(&activity.to_value)
    .bind(&activity.description)
    .bind(actor)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// NewRisk reopens or creates the risk; NewFinding creates the finding.
async fn apply_approval(
    tx: &mut Transaction<'_, Postgres>,
    entry: BacklogEntry,
    approver: &str,
    sla_hours: &SlaHours,
) -> Result<BacklogEntry, BacklogError> {
    match entry.action_type {
        BacklogActionType::NewRisk => {
            if let Some(risk_id) = entry.risk_id {
                sqlx::query(
                    r#"
                    UPDATE risks SET status = 'Open', updated_by = $2, updated_at = NOW(),
                        row_version = row_version + 1
                    WHERE id = $1
                    "#,
                )
                .bind(risk_id)
                .bind(approver)
                .execute(&mut **tx)
                .await?;
                return Ok(entry);
            }
            let payload = RequestPayload::parse(&entry.request_description);
            let input = payload.risk_input(&entry, approver, sla_hours)?;
            let risk = risks::create_in(tx, &input, approver).await?;
            let activity = Activity {
                activity_type: "RiskCreated",
                from_value: None,
                to_value: Some(risk.risk_number.clone()),
                description: format!("Risk {} added to the register", risk.risk_number),
            };
            insert_activity(tx, entry.id, &activity, approver).await?;
            Ok(link(tx, entry.id, "risk_id", risk.id).await?)
        }
        BacklogActionType::NewFinding => {
            let payload = RequestPayload::parse(&entry.request_description);
            let input = payload.finding_input(&entry, approver)?;
            let finding = findings::create_in(tx, &input, sla_hours, approver).await?;
            let activity = Activity {
                activity_type: "FindingCreated",
                from_value: None,
                to_value: Some(finding.finding_number.clone()),
                description: format!("Finding {} created", finding.finding_number),
            };
            insert_activity(tx, entry.id, &activity, approver).await?;
            Ok(link(tx, entry.id, "finding_id", finding.id).await?)
        }
        _ => Ok(entry),
    }
}

/// `column` is `risk_id` or `finding_id`.
async fn link(
    tx: &mut Transaction<'_, Postgres>,
    entry_id: Uuid,
    column: &'static str,
    target: Uuid,
) -> Result<BacklogEntry, DbError> {
    let sql = format!(
        "UPDATE risk_backlog_entries SET {} = $2 WHERE id = $1 RETURNING *",
        column
    );
    let entry = sqlx::query_as::<_, BacklogEntry>(&sql)
        .bind(entry_id)
        .bind(target)
        .fetch_one(&mut **tx)
        .await?;
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use grc_core::{RiskLevel, UserRole};

    fn entry(action_type: BacklogActionType, description: &str) -> BacklogEntry {
        let now = Utc::now();
        BacklogEntry {
            id: Uuid::new_v4(),
            backlog_number: "RBL-2025-00007".into(),
            action_type,
            status: BacklogStatus::AssignedToManager,
            priority: BacklogPriority::Medium,
            risk_id: None,
            finding_id: None,
            request_description: description.into(),
            request_justification: None,
            requester: "requester@example.com".into(),
            assigned_to_analyst: Some("analyst@example.com".into()),
            assigned_to_manager: Some("manager@example.com".into()),
            assigned_date: Some(now),
            due_date: Some(now),
            analyst_comments: None,
            manager_comments: None,
            rejection_reason: None,
            completed_date: None,
            risk_source: RiskSource::ManualImport,
            created_at: now,
            updated_at: now,
            created_by: None,
            updated_by: None,
            row_version: 1,
        }
    }

    #[test]
    fn payload_falls_back_to_plain_text() {
        let p = RequestPayload::parse("Legacy FTP server still reachable");
        assert_eq!(p.description.as_deref(), Some("Legacy FTP server still reachable"));
        assert!(p.title.is_none());
    }

    #[test]
    fn payload_reads_json_fields() {
        let json = r#"{"title":"Shadow IT SaaS","impact":"Critical","likelihood":"Likely","exposure":"HighlyExposed"}"#;
        let p = RequestPayload::parse(json);
        assert_eq!(p.title.as_deref(), Some("Shadow IT SaaS"));
        assert_eq!(p.impact, Some(ImpactLevel::Critical));
    }

    #[test]
    fn risk_input_defaults() {
        let e = entry(BacklogActionType::NewRisk, "not json");
        let input = RequestPayload::parse(&e.request_description)
            .risk_input(&e, "boss@example.com", &SlaHours::default())
            .unwrap();

        assert_eq!(input.title, "Risk from backlog entry RBL-2025-00007");
        assert_eq!(input.owner.as_deref(), Some("boss@example.com"));
        // Medium, Possible, ModeratelyExposed average to 2.33
        assert_eq!(input.inherent_risk_level, RiskLevel::Medium);
        assert_eq!(input.residual_risk_level, RiskLevel::Medium);
        assert_eq!(input.status, RiskStatus::Open);
        assert!(input.next_review_date.is_some());
    }

    #[test]
    fn finding_input_uses_business_owner() {
        let e = entry(
            BacklogActionType::NewFinding,
            r#"{"title":"Open S3 bucket","details":"Public read","business_owner":"cfo@example.com"}"#,
        );
        let input = RequestPayload::parse(&e.request_description)
            .finding_input(&e, "boss@example.com")
            .unwrap();
        assert_eq!(input.title, "Open S3 bucket");
        assert_eq!(input.details, "Public read");
        assert_eq!(input.owner, "cfo@example.com");
    }

    #[test]
    fn finding_input_enforces_field_limits() {
        let long_title = format!(r#"{{"title":"{}","details":"Public read"}}"#, "x".repeat(500));
        let e = entry(BacklogActionType::NewFinding, &long_title);
        let err = RequestPayload::parse(&e.request_description)
            .finding_input(&e, "boss@example.com")
            .unwrap_err();
        assert!(matches!(err, ValidationError::TooLong { field: "title", .. }));

        let e = entry(BacklogActionType::NewFinding, r#"{"title":"No details"}"#);
        let err = RequestPayload::parse(&e.request_description)
            .finding_input(&e, "boss@example.com")
            .unwrap_err();
        assert_eq!(err, ValidationError::Empty { field: "details" });

        let long_owner = format!(r#"{{"details":"d","business_owner":"{}"}}"#, "o".repeat(150));
        let e = entry(BacklogActionType::NewFinding, &long_owner);
        assert!(RequestPayload::parse(&e.request_description)
            .finding_input(&e, "boss@example.com")
            .is_err());
    }

    #[test]
    fn risk_input_enforces_field_limits() {
        let long_title = format!(r#"{{"title":"{}"}}"#, "r".repeat(201));
        let e = entry(BacklogActionType::NewRisk, &long_title);
        let err = RequestPayload::parse(&e.request_description)
            .risk_input(&e, "boss@example.com", &SlaHours::default())
            .unwrap_err();
        assert!(matches!(err, ValidationError::TooLong { field: "title", .. }));
    }

    #[test]
    fn participants_and_overdue() {
        let e = entry(BacklogActionType::RiskReview, "");
        let viewer = Actor {
            user: "ANALYST@example.com",
            role: UserRole::ItUser,
        };
        assert!(backlog::can_view(viewer, e.participants()));
        assert!(e.is_overdue(Utc::now() + chrono::Duration::hours(1)));
        assert_eq!(e.workflow().status, BacklogStatus::AssignedToManager);
    }
}
