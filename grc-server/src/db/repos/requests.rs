//! Assessment, risk acceptance and finding closure requests
//!
//! The three request tables share their workflow columns (`status`,
//! assignment, review, `row_version`), so commands are written once over
//! [`RequestRow`] and pick up kind-specific columns where they differ.
//! Every command locks the row, checks the caller, then checks the move.

use chrono::{DateTime, NaiveDate, Utc};
use grc_core::backlog::Actor;
use grc_core::requests::{
    self, RequestAction, RequestError, RequestKind, RequestPriority, RequestStatus, ReviewDecision,
};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::findings::{self, Finding};
use super::{found, DbError, WithTotal, STALE_REASON};
use crate::models::{Paginated, Pagination};

#[derive(Debug, thiserror::Error)]
pub enum RequestRepoError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Transition(#[from] RequestError),

    #[error("{user} may not {action} this request")]
    Forbidden { user: String, action: &'static str },
}

impl From<sqlx::Error> for RequestRepoError {
    fn from(e: sqlx::Error) -> Self {
        Self::Db(DbError::Sqlx(e))
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AssessmentRequest {
    pub id: Uuid,
    pub requester: String,
    pub department: Option<String>,
    pub contact_email: Option<String>,
    pub scope: String,
    pub justification: String,
    #[sqlx(try_from = "String")]
    pub priority: RequestPriority,
    pub requested_timeline: Option<NaiveDate>,
    pub request_date: DateTime<Utc>,
    #[sqlx(try_from = "String")]
    pub status: RequestStatus,
    pub assigned_to: Option<String>,
    pub assigned_by: Option<String>,
    pub assignment_date: Option<DateTime<Utc>>,
    pub assignment_notes: Option<String>,
    pub started_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub notes: Option<String>,
    pub reviewed_by: Option<String>,
    pub review_date: Option<DateTime<Utc>>,
    pub review_comments: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub row_version: i32,
    #[sqlx(skip)]
    pub is_overdue: bool,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RiskAcceptanceRequest {
    pub id: Uuid,
    pub description: String,
    pub business_need: String,
    pub requester: String,
    pub request_date: DateTime<Utc>,
    #[sqlx(try_from = "String")]
    pub status: RequestStatus,
    pub finding_id: Option<Uuid>,
    pub risk_id: Option<Uuid>,
    pub risk_assessment_id: Option<Uuid>,
    pub risk_summary: Option<String>,
    pub current_compensating_controls: Option<String>,
    pub current_risk_level_with_controls: Option<String>,
    pub treatment_plan: Option<String>,
    pub proposed_compensating_controls: Option<String>,
    pub future_risk_level_with_mitigations: Option<String>,
    pub ciso_recommendation: Option<String>,
    pub assigned_to: Option<String>,
    pub assigned_by: Option<String>,
    pub assignment_date: Option<DateTime<Utc>>,
    pub assignment_notes: Option<String>,
    pub started_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub reviewed_by: Option<String>,
    pub review_date: Option<DateTime<Utc>>,
    pub review_comments: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub row_version: i32,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FindingClosureRequest {
    pub id: Uuid,
    pub finding_id: Uuid,
    pub requester: String,
    pub closure_justification: String,
    pub evidence_links: Option<String>,
    pub additional_notes: Option<String>,
    pub request_date: DateTime<Utc>,
    pub requested_closure_date: Option<NaiveDate>,
    #[sqlx(try_from = "String")]
    pub status: RequestStatus,
    pub assigned_to: Option<String>,
    pub assigned_by: Option<String>,
    pub assignment_date: Option<DateTime<Utc>>,
    pub assignment_notes: Option<String>,
    pub started_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub reviewed_by: Option<String>,
    pub review_date: Option<DateTime<Utc>>,
    pub review_comments: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub row_version: i32,
}

/// A request table and the workflow columns every request carries.
pub trait RequestRow: for<'r> FromRow<'r, PgRow> + Send + Unpin {
    const KIND: RequestKind;
    /// One of the schema's table names.
    const TABLE: &'static str;

    fn status(&self) -> RequestStatus;
    fn requester(&self) -> &str;
    fn assigned_to(&self) -> Option<&str>;
    fn row_version(&self) -> i32;

    /// Fill fields derived at read time.
    fn derive(&mut self, _today: NaiveDate) {}
}

macro_rules! request_row {
    (@derive Assessment) => {
        fn derive(&mut self, today: NaiveDate) {
            self.is_overdue = requests::assessment_overdue(
                self.status,
                self.requested_timeline,
                self.request_date,
                today,
            );
        }
    };
    (@derive $kind:ident) => {};
    ($ty:ty, $kind:ident, $table:literal) => {
        impl RequestRow for $ty {
            const KIND: RequestKind = RequestKind::$kind;
            const TABLE: &'static str = $table;

            fn status(&self) -> RequestStatus {
                self.status
            }
            fn requester(&self) -> &str {
                &self.requester
            }
            fn assigned_to(&self) -> Option<&str> {
                self.assigned_to.as_deref()
            }
            fn row_version(&self) -> i32 {
                self.row_version
            }
            request_row!(@derive $kind);
        }
    };
}

request_row!(AssessmentRequest, Assessment, "assessment_requests");
request_row!(RiskAcceptanceRequest, RiskAcceptance, "risk_acceptance_requests");
request_row!(FindingClosureRequest, FindingClosure, "finding_closure_requests");

/// Whether `user` raised or was assigned the request.
pub fn involves<T: RequestRow>(row: &T, user: &str) -> bool {
    row.requester().eq_ignore_ascii_case(user)
        || row.assigned_to().is_some_and(|a| a.eq_ignore_ascii_case(user))
}

/// Validated assessment request fields.
#[derive(Debug, Clone)]
pub struct AssessmentRequestInput {
    pub department: Option<String>,
    pub contact_email: Option<String>,
    pub scope: String,
    pub justification: String,
    pub priority: RequestPriority,
    pub requested_timeline: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct AcceptanceRequestInput {
    pub description: String,
    pub business_need: String,
    pub finding_id: Option<Uuid>,
    pub risk_id: Option<Uuid>,
    pub risk_assessment_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct ClosureRequestInput {
    pub finding_id: Uuid,
    pub closure_justification: String,
    pub evidence_links: Option<String>,
    pub additional_notes: Option<String>,
    pub requested_closure_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct Assignment {
    pub assigned_to: String,
    pub notes: Option<String>,
    /// Assessment requests only.
    pub estimated_hours: Option<f64>,
}

/// GRC analysis recorded on a risk acceptance request at review.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcceptanceAnalysis {
    pub risk_summary: Option<String>,
    pub current_compensating_controls: Option<String>,
    pub current_risk_level_with_controls: Option<String>,
    pub treatment_plan: Option<String>,
    pub proposed_compensating_controls: Option<String>,
    pub future_risk_level_with_mitigations: Option<String>,
    pub ciso_recommendation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Review {
    pub decision: ReviewDecision,
    pub comments: Option<String>,
    pub analysis: AcceptanceAnalysis,
}

#[derive(Debug, Clone, Default)]
pub struct CompletionInput {
    /// Assessment requests only.
    pub actual_hours: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    /// Requester or assignee.
    pub involving: Option<String>,
}

pub struct RequestRepo<'a> {
    pool: &'a PgPool,
}

impl<'a> RequestRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn list<T: RequestRow>(&self, filter: &RequestFilter, page: Pagination) -> Result<Paginated<T>, DbError> {
        let sql = format!(
            r#"
            SELECT *, COUNT(*) OVER() AS total
            FROM {}
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR LOWER(requester) = LOWER($2) OR LOWER(assigned_to) = LOWER($2))
            ORDER BY request_date DESC
            LIMIT $3 OFFSET $4
            "#,
            T::TABLE
        );
        let rows: Vec<WithTotal<T>> = sqlx::query_as(&sql)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.involving.as_deref())
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(self.pool)
            .await?;
        let mut page = WithTotal::paginate(rows, page);
        let today = Utc::now().date_naive();
        page.items.iter_mut().for_each(|r| r.derive(today));
        Ok(page)
    }

    pub async fn get<T: RequestRow>(&self, id: Uuid) -> Result<T, DbError> {
        let sql = format!("SELECT * FROM {} WHERE id = $1", T::TABLE);
        let row = sqlx::query_as::<_, T>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        let mut row = found(row, T::KIND.name(), id)?;
        row.derive(Utc::now().date_naive());
        Ok(row)
    }

    pub async fn create_assessment(
        &self,
        input: AssessmentRequestInput,
        requester: &str,
    ) -> Result<AssessmentRequest, DbError> {
        let mut row = sqlx::query_as::<_, AssessmentRequest>(
            r#"
            INSERT INTO assessment_requests (
                requester, department, contact_email, scope, justification, priority,
                requested_timeline, status, created_by, updated_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $1, $1)
            RETURNING *
            "#,
        )
        .bind(requester)
        .bind(&input.department)
        .bind(&input.contact_email)
        .bind(&input.scope)
        .bind(&input.justification)
        .bind(input.priority.as_str())
        .bind(input.requested_timeline)
        .bind(RequestKind::Assessment.initial_status().as_str())
        .fetch_one(self.pool)
        .await?;
        row.derive(Utc::now().date_naive());
        tracing::info!(request = %row.id, requester, priority = %row.priority, "assessment requested");
        Ok(row)
    }

    pub async fn create_acceptance(
        &self,
        input: AcceptanceRequestInput,
        requester: &str,
    ) -> Result<RiskAcceptanceRequest, DbError> {
        let row = sqlx::query_as::<_, RiskAcceptanceRequest>(
            r#"
            INSERT INTO risk_acceptance_requests (
                description, business_need, requester, status, finding_id, risk_id,
                risk_assessment_id, created_by, updated_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $3, $3)
            RETURNING *
            "#,
        )
        .bind(&input.description)
        .bind(&input.business_need)
        .bind(requester)
        .bind(RequestKind::RiskAcceptance.initial_status().as_str())
        .bind(input.finding_id)
        .bind(input.risk_id)
        .bind(input.risk_assessment_id)
        .fetch_one(self.pool)
        .await
        .map_err(|e| DbError::classify(e, "risk acceptance request", requester))?;
        tracing::info!(request = %row.id, requester, "risk acceptance requested");
        Ok(row)
    }

    /// The finding must exist and still be open.
    pub async fn create_closure(
        &self,
        input: ClosureRequestInput,
        requester: &str,
    ) -> Result<FindingClosureRequest, DbError> {
        let mut tx = self.pool.begin().await?;
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM findings WHERE id = $1 FOR SHARE")
                .bind(input.finding_id)
                .fetch_optional(&mut *tx)
                .await?;
        match status.as_deref() {
            None => return Err(DbError::not_found("finding", input.finding_id)),
            Some("Closed") => {
                return Err(DbError::conflict("finding closure request", "finding is already closed"))
            }
            Some(_) => {}
        }

        let row = sqlx::query_as::<_, FindingClosureRequest>(
            r#"
            INSERT INTO finding_closure_requests (
                finding_id, requester, closure_justification, evidence_links,
                additional_notes, requested_closure_date, status, created_by, updated_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $2, $2)
            RETURNING *
            "#,
        )
        .bind(input.finding_id)
        .bind(requester)
        .bind(&input.closure_justification)
        .bind(&input.evidence_links)
        .bind(&input.additional_notes)
        .bind(input.requested_closure_date)
        .bind(RequestKind::FindingClosure.initial_status().as_str())
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        tracing::info!(request = %row.id, finding = %row.finding_id, requester, "finding closure requested");
        Ok(row)
    }

    pub async fn delete<T: RequestRow>(&self, id: Uuid) -> Result<(), DbError> {
        super::delete_by_id(self.pool, T::TABLE, T::KIND.name(), id).await
    }

    /// Assign to a GRC analyst. Assessment requests also take an estimate.
    pub async fn assign<T: RequestRow>(
        &self,
        id: Uuid,
        expected: Option<i32>,
        assignment: &Assignment,
        actor: Actor<'_>,
    ) -> Result<T, RequestRepoError> {
        let mut tx = self.pool.begin().await?;
        let (_, to) = lock::<T>(&mut tx, id, expected, RequestAction::Assign, actor).await?;

        let sql = format!(
            r#"
            UPDATE {} SET
                status = $2, assigned_to = $3, assigned_by = $4, assignment_date = NOW(),
                assignment_notes = $5, updated_by = $4, updated_at = NOW(),
                row_version = row_version + 1
            WHERE id = $1
            "#,
            T::TABLE
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(to.as_str())
            .bind(&assignment.assigned_to)
            .bind(actor.user)
            .bind(&assignment.notes)
            .execute(&mut *tx)
            .await?;
        if T::KIND == RequestKind::Assessment {
            sqlx::query("UPDATE assessment_requests SET estimated_hours = COALESCE($2, estimated_hours) WHERE id = $1")
                .bind(id)
                .bind(assignment.estimated_hours)
                .execute(&mut *tx)
                .await?;
        }
        finish(tx, id, "assign", actor).await
    }

    /// Assignee begins work on an assessment request.
    pub async fn start<T: RequestRow>(
        &self,
        id: Uuid,
        expected: Option<i32>,
        actor: Actor<'_>,
    ) -> Result<T, RequestRepoError> {
        let mut tx = self.pool.begin().await?;
        let (_, to) = lock::<T>(&mut tx, id, expected, RequestAction::Start, actor).await?;
        let sql = format!(
            r#"
            UPDATE {} SET
                status = $2, started_date = NOW(), updated_by = $3, updated_at = NOW(),
                row_version = row_version + 1
            WHERE id = $1
            "#,
            T::TABLE
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(to.as_str())
            .bind(actor.user)
            .execute(&mut *tx)
            .await?;
        finish(tx, id, "start", actor).await
    }

    /// Approve or reject.
    ///
    /// Acceptance reviews carry the GRC analysis. Approving a closure request
    /// closes its finding in the same transaction.
    pub async fn review<T: RequestRow>(
        &self,
        id: Uuid,
        expected: Option<i32>,
        review: &Review,
        actor: Actor<'_>,
    ) -> Result<T, RequestRepoError> {
        let action = RequestAction::Review(review.decision);
        let mut tx = self.pool.begin().await?;
        let (_, to) = lock::<T>(&mut tx, id, expected, action, actor).await?;

        let sql = format!(
            r#"
            UPDATE {} SET
                status = $2, reviewed_by = $3, review_date = NOW(), review_comments = $4,
                updated_by = $3, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1
            "#,
            T::TABLE
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(to.as_str())
            .bind(actor.user)
            .bind(&review.comments)
            .execute(&mut *tx)
            .await?;

        match T::KIND {
            RequestKind::RiskAcceptance => record_analysis(&mut tx, id, &review.analysis).await?,
            RequestKind::FindingClosure if review.decision == ReviewDecision::Approved => {
                close_finding(&mut tx, id, actor.user).await?;
            }
            _ => {}
        }
        finish(tx, id, action.name(), actor).await
    }

    /// Mark done. Assessment requests record hours and append notes.
    pub async fn complete<T: RequestRow>(
        &self,
        id: Uuid,
        expected: Option<i32>,
        completion: &CompletionInput,
        actor: Actor<'_>,
    ) -> Result<T, RequestRepoError> {
        let mut tx = self.pool.begin().await?;
        let (_, to) = lock::<T>(&mut tx, id, expected, RequestAction::Complete, actor).await?;
        let sql = format!(
            r#"
            UPDATE {} SET
                status = $2, completed_date = NOW(), updated_by = $3, updated_at = NOW(),
                row_version = row_version + 1
            WHERE id = $1
            "#,
            T::TABLE
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(to.as_str())
            .bind(actor.user)
            .execute(&mut *tx)
            .await?;

        if T::KIND == RequestKind::Assessment {
            let existing: Option<String> =
                sqlx::query_scalar("SELECT notes FROM assessment_requests WHERE id = $1")
                    .bind(id)
                    .fetch_one(&mut *tx)
                    .await?;
            let notes = requests::append_completion_notes(existing.as_deref(), completion.notes.as_deref());
            sqlx::query(
                "UPDATE assessment_requests SET actual_hours = COALESCE($2, actual_hours), notes = $3 WHERE id = $1",
            )
            .bind(id)
            .bind(completion.actual_hours)
            .bind(notes)
            .execute(&mut *tx)
            .await?;
        }
        finish(tx, id, "complete", actor).await
    }
}

/// Lock the row, check the caller may act, and work out the next status.
async fn lock<T: RequestRow>(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    expected: Option<i32>,
    action: RequestAction,
    actor: Actor<'_>,
) -> Result<(T, RequestStatus), RequestRepoError> {
    let sql = format!("SELECT * FROM {} WHERE id = $1 FOR UPDATE", T::TABLE);
    let row = sqlx::query_as::<_, T>(&sql)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
    let row = found(row, T::KIND.name(), id)?;

    if expected.is_some_and(|v| v != row.row_version()) {
        return Err(DbError::conflict(T::KIND.name(), STALE_REASON).into());
    }
    if !requests::can_act(actor, T::KIND, action, row.assigned_to()) {
        return Err(RequestRepoError::Forbidden {
            user: actor.user.to_owned(),
            action: action.name(),
        });
    }
    let to = requests::transition(T::KIND, row.status(), action)?;
    Ok((row, to))
}

async fn finish<T: RequestRow>(
    mut tx: Transaction<'_, Postgres>,
    id: Uuid,
    action: &'static str,
    actor: Actor<'_>,
) -> Result<T, RequestRepoError> {
    let sql = format!("SELECT * FROM {} WHERE id = $1", T::TABLE);
    let mut row = sqlx::query_as::<_, T>(&sql)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;
    row.derive(Utc::now().date_naive());
    tracing::info!(
        request = %id,
        kind = T::KIND.name(),
        action,
        to = %row.status(),
        actor = actor.user,
        "request updated"
    );
    Ok(row)
}

async fn record_analysis(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    a: &AcceptanceAnalysis,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        UPDATE risk_acceptance_requests SET
            risk_summary = COALESCE($2, risk_summary),
            current_compensating_controls = COALESCE($3, current_compensating_controls),
            current_risk_level_with_controls = COALESCE($4, current_risk_level_with_controls),
            treatment_plan = COALESCE($5, treatment_plan),
            proposed_compensating_controls = COALESCE($6, proposed_compensating_controls),
            future_risk_level_with_mitigations = COALESCE($7, future_risk_level_with_mitigations),
            ciso_recommendation = COALESCE($8, ciso_recommendation)
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(&a.risk_summary)
    .bind(&a.current_compensating_controls)
    .bind(&a.current_risk_level_with_controls)
    .bind(&a.treatment_plan)
    .bind(&a.proposed_compensating_controls)
    .bind(&a.future_risk_level_with_mitigations)
    .bind(&a.ciso_recommendation)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Close the request's finding unless it is closed already.
async fn close_finding(tx: &mut Transaction<'_, Postgres>, request_id: Uuid, actor: &str) -> Result<(), DbError> {
    let closed = sqlx::query_as::<_, Finding>(
        r#"
        UPDATE findings SET
            status = 'Closed', closed_date = NOW(),
            updated_by = $2, updated_at = NOW(), row_version = row_version + 1
        WHERE id = (SELECT finding_id FROM finding_closure_requests WHERE id = $1)
          AND status <> 'Closed'
        RETURNING *
        "#,
    )
    .bind(request_id)
    .bind(actor)
    .fetch_optional(&mut **tx)
    .await?;
    if let Some(finding) = closed {
        findings::record_closure(tx, &finding, actor).await?;
        tracing::info!(finding = %finding.finding_number, request = %request_id, "finding closed by request");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use grc_core::UserRole;

    #[test]
    fn involvement_ignores_case() {
        let now = Utc::now();
        let row = FindingClosureRequest {
            id: Uuid::new_v4(),
            finding_id: Uuid::new_v4(),
            requester: "Dev@Example.com".into(),
            closure_justification: "patched".into(),
            evidence_links: None,
            additional_notes: None,
            request_date: now,
            requested_closure_date: None,
            status: RequestStatus::Pending,
            assigned_to: Some("grc@example.com".into()),
            assigned_by: None,
            assignment_date: None,
            assignment_notes: None,
            started_date: None,
            completed_date: None,
            reviewed_by: None,
            review_date: None,
            review_comments: None,
            created_at: now,
            updated_at: now,
            created_by: None,
            updated_by: None,
            row_version: 1,
        };
        assert!(involves(&row, "dev@example.com"));
        assert!(involves(&row, "GRC@example.com"));
        assert!(!involves(&row, "other@example.com"));
        assert_eq!(row.status(), RequestStatus::Pending);
        assert_eq!(<FindingClosureRequest as RequestRow>::TABLE, "finding_closure_requests");
    }

    #[test]
    fn forbidden_names_user_and_action() {
        let err = RequestRepoError::Forbidden {
            user: "it@example.com".into(),
            action: "approve",
        };
        assert_eq!(err.to_string(), "it@example.com may not approve this request");
    }

    mod db {
        use super::*;
        use crate::db::repos::FindingRepo;
        use crate::models::input::FindingRequest;
        use grc_core::sla::SlaHours;
        use grc_core::{ExposureLevel, FindingStatus, ImpactLevel, LikelihoodLevel};

        const GRC: Actor<'static> = Actor {
            user: "grc@example.com",
            role: UserRole::GrcUser,
        };
        const IT: Actor<'static> = Actor {
            user: "it@example.com",
            role: UserRole::ItUser,
        };

        async fn pool() -> PgPool {
            let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
            let pool = crate::db::create_pool(&url).await.expect("pool");
            crate::db::run_migrations(&pool).await.expect("migrations");
            pool
        }

        async fn open_finding(pool: &PgPool) -> Finding {
            let input = FindingRequest {
                title: "Default credentials on printer".into(),
                details: "admin/admin".into(),
                impact: Some(ImpactLevel::Medium),
                likelihood: Some(LikelihoodLevel::Possible),
                exposure: Some(ExposureLevel::Exposed),
                owner: "facilities".into(),
                ..Default::default()
            }
            .validate()
            .unwrap();
            FindingRepo::new(pool)
                .create(input, &SlaHours::default(), "tester")
                .await
                .unwrap()
        }

        #[tokio::test]
        #[ignore = "requires database"]
        async fn approved_closure_closes_the_finding() {
            let pool = pool().await;
            let finding = open_finding(&pool).await;
            let repo = RequestRepo::new(&pool);

            let request = repo
                .create_closure(
                    ClosureRequestInput {
                        finding_id: finding.id,
                        closure_justification: "Password rotated".into(),
                        evidence_links: None,
                        additional_notes: None,
                        requested_closure_date: None,
                    },
                    IT.user,
                )
                .await
                .unwrap();

            let denied = repo
                .review::<FindingClosureRequest>(
                    request.id,
                    None,
                    &Review {
                        decision: ReviewDecision::Approved,
                        comments: None,
                        analysis: AcceptanceAnalysis::default(),
                    },
                    IT,
                )
                .await
                .unwrap_err();
            assert!(matches!(denied, RequestRepoError::Forbidden { .. }));

            let approved = repo
                .review::<FindingClosureRequest>(
                    request.id,
                    Some(request.row_version),
                    &Review {
                        decision: ReviewDecision::Approved,
                        comments: Some("evidence checked".into()),
                        analysis: AcceptanceAnalysis::default(),
                    },
                    GRC,
                )
                .await
                .unwrap();
            assert_eq!(approved.status, RequestStatus::Approved);
            assert_eq!(approved.reviewed_by.as_deref(), Some(GRC.user));

            let finding = FindingRepo::new(&pool).get(finding.id).await.unwrap();
            assert_eq!(finding.status, FindingStatus::Closed);

            let again = repo
                .create_closure(
                    ClosureRequestInput {
                        finding_id: finding.id,
                        closure_justification: "again".into(),
                        evidence_links: None,
                        additional_notes: None,
                        requested_closure_date: None,
                    },
                    IT.user,
                )
                .await
                .unwrap_err();
            assert!(matches!(again, DbError::Conflict { .. }));
        }

        #[tokio::test]
        #[ignore = "requires database"]
        async fn only_the_assignee_starts_an_assessment() {
            let pool = pool().await;
            let repo = RequestRepo::new(&pool);
            let request = repo
                .create_assessment(
                    AssessmentRequestInput {
                        department: Some("Payments".into()),
                        contact_email: None,
                        scope: "New card vault".into(),
                        justification: "PCI scope change".into(),
                        priority: RequestPriority::High,
                        requested_timeline: None,
                    },
                    IT.user,
                )
                .await
                .unwrap();
            assert_eq!(request.status, RequestStatus::Pending);
            assert!(!request.is_overdue);

            let assigned = repo
                .assign::<AssessmentRequest>(
                    request.id,
                    None,
                    &Assignment {
                        assigned_to: "analyst@example.com".into(),
                        notes: None,
                        estimated_hours: Some(16.0),
                    },
                    GRC,
                )
                .await
                .unwrap();
            assert_eq!(assigned.estimated_hours, Some(16.0));

            let stale = repo
                .start::<AssessmentRequest>(request.id, Some(request.row_version), GRC)
                .await
                .unwrap_err();
            assert!(matches!(stale, RequestRepoError::Db(DbError::Conflict { .. })));

            let wrong_user = repo
                .start::<AssessmentRequest>(request.id, None, IT)
                .await
                .unwrap_err();
            assert!(matches!(wrong_user, RequestRepoError::Forbidden { .. }));

            let analyst = Actor {
                user: "analyst@example.com",
                role: UserRole::GrcUser,
            };
            let started = repo
                .start::<AssessmentRequest>(request.id, None, analyst)
                .await
                .unwrap();
            assert_eq!(started.status, RequestStatus::InProgress);

            let done = repo
                .complete::<AssessmentRequest>(
                    request.id,
                    None,
                    &CompletionInput {
                        actual_hours: Some(12.5),
                        notes: Some("report delivered".into()),
                    },
                    analyst,
                )
                .await
                .unwrap();
            assert_eq!(done.status, RequestStatus::Completed);
            assert_eq!(done.actual_hours, Some(12.5));
            assert_eq!(done.notes.as_deref(), Some("Completion Notes: report delivered"));

            let again = repo
                .complete::<AssessmentRequest>(request.id, None, &CompletionInput::default(), analyst)
                .await
                .unwrap_err();
            assert!(matches!(again, RequestRepoError::Transition(_)));
        }
    }
}
