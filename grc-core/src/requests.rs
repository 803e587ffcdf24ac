//! Assessment, risk acceptance and finding closure requests
//!
//! Any user may raise a request. GRC staff assign and review it; the
//! assignee starts and completes the work.
//!
//! ```text
//! assessment:  Pending ──start──▶ InProgress ──complete──▶ Completed
//!                 └──reject──▶ Rejected
//! acceptance:  PendingApproval ─┬─assign──▶ InProgress ─┐
//! closure:     Pending ─────────┘                       ├─review──▶ Approved ──complete──▶ Completed
//!                 └─────────────────review──────────────┘      └──▶ Rejected
//! ```

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::backlog::Actor;
use crate::enums::{text_enum, UserRole};

/// Assessment requests without a requested timeline fall overdue after this.
pub const DEFAULT_TIMELINE_DAYS: i64 = 30;

text_enum! {
    pub enum RequestStatus ("request status") {
        Pending => "Pending",
        InProgress => "InProgress",
        Completed => "Completed",
        Rejected => "Rejected",
        PendingApproval => "PendingApproval",
        Approved => "Approved",
    }
}

text_enum! {
    pub enum RequestPriority ("request priority") {
        Low => "Low",
        Medium => "Medium",
        High => "High",
        Urgent => "Urgent",
    }
}

text_enum! {
    pub enum ReviewDecision ("decision") {
        Approved => "Approved",
        Rejected => "Rejected",
    }
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected)
    }
}

impl ReviewDecision {
    pub fn status(&self) -> RequestStatus {
        match self {
            Self::Approved => RequestStatus::Approved,
            Self::Rejected => RequestStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RequestKind {
    Assessment,
    RiskAcceptance,
    FindingClosure,
}

impl RequestKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Assessment => "assessment request",
            Self::RiskAcceptance => "risk acceptance request",
            Self::FindingClosure => "finding closure request",
        }
    }

    /// Status a new request is created in.
    pub fn initial_status(&self) -> RequestStatus {
        match self {
            Self::RiskAcceptance => RequestStatus::PendingApproval,
            Self::Assessment | Self::FindingClosure => RequestStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAction {
    Assign,
    Start,
    Complete,
    Review(ReviewDecision),
}

impl RequestAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Assign => "assign",
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Review(ReviewDecision::Approved) => "approve",
            Self::Review(ReviewDecision::Rejected) => "reject",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("cannot {action} a {kind} in status {from}")]
    NotAllowed {
        action: &'static str,
        kind: &'static str,
        from: RequestStatus,
    },
}

/// Status after `action`, or why it is not allowed from `from`.
pub fn transition(
    kind: RequestKind,
    from: RequestStatus,
    action: RequestAction,
) -> Result<RequestStatus, RequestError> {
    use RequestStatus::*;
    let pending = kind.initial_status();
    let to = match (kind, action) {
        (RequestKind::Assessment, RequestAction::Assign) if from == Pending => Some(Pending),
        (RequestKind::Assessment, RequestAction::Start) if from == Pending => Some(InProgress),
        (RequestKind::Assessment, RequestAction::Complete) if from == InProgress => Some(Completed),
        (RequestKind::Assessment, RequestAction::Review(ReviewDecision::Rejected)) if from == Pending => {
            Some(Rejected)
        }
        (RequestKind::Assessment, _) => None,
        (_, RequestAction::Assign) if from == pending || from == InProgress => Some(InProgress),
        (_, RequestAction::Review(decision)) if from == pending || from == InProgress => {
            Some(decision.status())
        }
        (_, RequestAction::Complete) if from == Approved => Some(Completed),
        _ => None,
    };
    to.ok_or(RequestError::NotAllowed {
        action: action.name(),
        kind: kind.name(),
        from,
    })
}

fn is_coordinator(actor: Actor<'_>) -> bool {
    matches!(actor.role, UserRole::GrcUser | UserRole::Admin)
}

fn is_named(actor: Actor<'_>, name: Option<&str>) -> bool {
    name.is_some_and(|n| actor.user.eq_ignore_ascii_case(n))
}

/// Whether `actor` may take `action` on a request assigned to `assignee`.
///
/// Assignment and review belong to GRC staff. Only the assignee starts work
/// or completes an assessment; an approved acceptance or closure may also be
/// completed by GRC staff, since it need never have been assigned.
pub fn can_act(actor: Actor<'_>, kind: RequestKind, action: RequestAction, assignee: Option<&str>) -> bool {
    match action {
        RequestAction::Assign | RequestAction::Review(_) => is_coordinator(actor),
        RequestAction::Start => is_named(actor, assignee),
        RequestAction::Complete => match kind {
            RequestKind::Assessment => is_named(actor, assignee),
            _ => is_named(actor, assignee) || is_coordinator(actor),
        },
    }
}

/// Assessment request still open past its requested timeline.
pub fn assessment_overdue(
    status: RequestStatus,
    requested_timeline: Option<NaiveDate>,
    request_date: DateTime<Utc>,
    today: NaiveDate,
) -> bool {
    if status.is_terminal() {
        return false;
    }
    let due = requested_timeline
        .unwrap_or_else(|| (request_date + Duration::days(DEFAULT_TIMELINE_DAYS)).date_naive());
    today > due
}

/// Completion notes are appended to whatever notes the request carries.
pub fn append_completion_notes(existing: Option<&str>, notes: Option<&str>) -> Option<String> {
    let notes = notes.map(str::trim).filter(|n| !n.is_empty());
    match (existing.filter(|e| !e.trim().is_empty()), notes) {
        (Some(e), Some(n)) => Some(format!("{}\n\nCompletion Notes: {}", e, n)),
        (None, Some(n)) => Some(format!("Completion Notes: {}", n)),
        (e, None) => e.map(str::to_owned),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use RequestStatus::*;

    const APPROVE: RequestAction = RequestAction::Review(ReviewDecision::Approved);
    const REJECT: RequestAction = RequestAction::Review(ReviewDecision::Rejected);

    #[test]
    fn assessment_lifecycle() {
        let kind = RequestKind::Assessment;
        assert_eq!(kind.initial_status(), Pending);
        assert_eq!(transition(kind, Pending, RequestAction::Assign), Ok(Pending));
        assert_eq!(transition(kind, Pending, RequestAction::Start), Ok(InProgress));
        assert_eq!(transition(kind, InProgress, RequestAction::Complete), Ok(Completed));
        assert_eq!(transition(kind, Pending, REJECT), Ok(Rejected));

        assert!(transition(kind, Pending, APPROVE).is_err());
        assert!(transition(kind, Pending, RequestAction::Complete).is_err());
        assert!(transition(kind, Completed, RequestAction::Start).is_err());
    }

    #[test]
    fn acceptance_reviews_only_while_open() {
        let kind = RequestKind::RiskAcceptance;
        assert_eq!(kind.initial_status(), PendingApproval);
        assert_eq!(transition(kind, PendingApproval, RequestAction::Assign), Ok(InProgress));
        assert_eq!(transition(kind, PendingApproval, APPROVE), Ok(Approved));
        assert_eq!(transition(kind, InProgress, REJECT), Ok(Rejected));
        assert_eq!(transition(kind, Approved, RequestAction::Complete), Ok(Completed));

        let err = transition(kind, Approved, REJECT).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot reject a risk acceptance request in status Approved"
        );
        assert!(transition(kind, PendingApproval, RequestAction::Start).is_err());
        assert!(transition(kind, Rejected, RequestAction::Assign).is_err());
    }

    #[test]
    fn closure_starts_pending() {
        let kind = RequestKind::FindingClosure;
        assert_eq!(kind.initial_status(), Pending);
        assert_eq!(transition(kind, Pending, APPROVE), Ok(Approved));
        assert!(transition(kind, PendingApproval, APPROVE).is_err());
        assert!(transition(kind, Completed, RequestAction::Complete).is_err());
    }

    #[test]
    fn only_the_assignee_starts_work() {
        let grc = Actor {
            user: "grc@example.com",
            role: UserRole::GrcUser,
        };
        let it = Actor {
            user: "IT@example.com",
            role: UserRole::ItUser,
        };
        let kind = RequestKind::Assessment;

        assert!(can_act(grc, kind, RequestAction::Assign, None));
        assert!(!can_act(it, kind, RequestAction::Assign, None));
        assert!(!can_act(it, kind, APPROVE, None));

        assert!(can_act(it, kind, RequestAction::Start, Some("it@example.com")));
        assert!(!can_act(grc, kind, RequestAction::Start, Some("it@example.com")));
        assert!(!can_act(grc, kind, RequestAction::Complete, Some("it@example.com")));
        assert!(can_act(grc, RequestKind::FindingClosure, RequestAction::Complete, None));
    }

    #[test]
    fn overdue_uses_timeline_or_thirty_days() {
        let requested = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let day = |m, d| NaiveDate::from_ymd_opt(2026, m, d).unwrap();

        assert!(!assessment_overdue(Pending, None, requested, day(1, 31)));
        assert!(assessment_overdue(Pending, None, requested, day(2, 1)));
        assert!(assessment_overdue(InProgress, Some(day(1, 10)), requested, day(1, 11)));
        assert!(!assessment_overdue(InProgress, Some(day(1, 10)), requested, day(1, 10)));
        assert!(!assessment_overdue(Completed, Some(day(1, 10)), requested, day(3, 1)));
    }

    #[test]
    fn completion_notes_are_appended() {
        assert_eq!(
            append_completion_notes(Some("scope agreed"), Some("done")).as_deref(),
            Some("scope agreed\n\nCompletion Notes: done")
        );
        assert_eq!(
            append_completion_notes(None, Some(" done ")).as_deref(),
            Some("Completion Notes: done")
        );
        assert_eq!(
            append_completion_notes(Some("kept"), Some("  ")).as_deref(),
            Some("kept")
        );
        assert_eq!(append_completion_notes(None, None), None);
    }
}
