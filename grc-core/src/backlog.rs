//! Risk backlog workflow
//!
//! A backlog entry queues a risk or finding decision for analyst and manager
//! review. All status changes go through [`apply`], which rejects any
//! command not valid for the entry's current status.
//!
//! ```text
//! Unassigned ──assign analyst──▶ AssignedToAnalyst ──approve──▶ AssignedToManager ──approve──▶ Approved
//!     │                               │                              │
//!     └──────────escalate─────────────┴──────────reject──────────────┴──▶ Rejected / Escalated
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;

use crate::enums::{text_enum, UserRole};

text_enum! {
    pub enum BacklogActionType ("action type") {
        NewRisk => "NewRisk",
        RiskAcceptance => "RiskAcceptance",
        RiskExtension => "RiskExtension",
        RiskReview => "RiskReview",
        RiskReassessment => "RiskReassessment",
        NewFinding => "NewFinding",
        FindingReview => "FindingReview",
        FindingClosure => "FindingClosure",
    }
}

text_enum! {
    pub enum BacklogStatus ("backlog status") {
        Unassigned => "Unassigned",
        AssignedToAnalyst => "AssignedToAnalyst",
        AssignedToManager => "AssignedToManager",
        Approved => "Approved",
        Rejected => "Rejected",
        Escalated => "Escalated",
    }
}

text_enum! {
    pub enum BacklogPriority ("priority") {
        Low => "Low",
        Medium => "Medium",
        High => "High",
        Critical => "Critical",
    }
}

text_enum! {
    pub enum RiskSource ("risk source") {
        RiskAssessment => "RiskAssessment",
        FindingAcceptance => "FindingAcceptance",
        ManualImport => "ManualImport",
    }
}

text_enum! {
    pub enum CommentType ("comment type") {
        Analyst => "Analyst",
        Manager => "Manager",
        System => "System",
    }
}

/// Attempts at allocating a unique backlog number before giving up.
pub const NUMBER_ATTEMPTS: u32 = 10;

impl BacklogActionType {
    pub fn default_priority(&self) -> BacklogPriority {
        match self {
            Self::NewRisk => BacklogPriority::Medium,
            Self::RiskAcceptance => BacklogPriority::High,
            Self::RiskExtension => BacklogPriority::Low,
            Self::RiskReview => BacklogPriority::Medium,
            Self::RiskReassessment => BacklogPriority::High,
            Self::NewFinding => BacklogPriority::Medium,
            Self::FindingReview => BacklogPriority::Medium,
            Self::FindingClosure => BacklogPriority::Low,
        }
    }

    pub fn due_days(&self) -> i64 {
        match self {
            Self::NewRisk => 5,
            Self::RiskAcceptance => 3,
            Self::RiskExtension => 2,
            Self::RiskReview => 7,
            Self::RiskReassessment => 10,
            Self::NewFinding => 3,
            Self::FindingReview => 5,
            Self::FindingClosure => 2,
        }
    }

    pub fn due_date(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        from + Duration::days(self.due_days())
    }

    pub fn is_finding_workflow(&self) -> bool {
        matches!(
            self,
            Self::NewFinding | Self::FindingReview | Self::FindingClosure
        )
    }
}

impl BacklogStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

/// `RBL-{year}-{seq:05}` where seq = existing entries this year + 1 + attempt.
pub fn backlog_number(year: i32, existing_this_year: i64, attempt: u32) -> String {
    format!("RBL-{}-{:05}", year, existing_this_year + 1 + i64::from(attempt))
}

/// Where the risk behind an entry originated.
pub fn risk_source(has_assessment: bool, has_finding: bool) -> RiskSource {
    if has_assessment {
        RiskSource::RiskAssessment
    } else if has_finding {
        RiskSource::FindingAcceptance
    } else {
        RiskSource::ManualImport
    }
}

pub fn is_overdue(status: BacklogStatus, due: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    matches!(due, Some(d) if d < now) && !status.is_terminal()
}

/// Workflow-relevant fields of an entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowState {
    pub status: BacklogStatus,
    pub priority: BacklogPriority,
    pub assigned_to_analyst: Option<String>,
    pub assigned_to_manager: Option<String>,
    pub assigned_date: Option<DateTime<Utc>>,
    pub analyst_comments: Option<String>,
    pub manager_comments: Option<String>,
    pub rejection_reason: Option<String>,
    pub completed_date: Option<DateTime<Utc>>,
}

impl WorkflowState {
    pub fn new(priority: BacklogPriority) -> Self {
        Self {
            status: BacklogStatus::Unassigned,
            priority,
            assigned_to_analyst: None,
            assigned_to_manager: None,
            assigned_date: None,
            analyst_comments: None,
            manager_comments: None,
            rejection_reason: None,
            completed_date: None,
        }
    }
}

/// A request to move an entry through the workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    AssignAnalyst(String),
    AssignManager(String),
    AnalystApprove { comments: Option<String> },
    AnalystReject { reason: String },
    ManagerApprove { comments: Option<String> },
    ManagerReject { reason: String },
    Escalate { reason: String },
    Unassign,
    SetPriority(BacklogPriority),
}

/// Who is allowed to issue a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// GRC staff or administrators
    Coordinator,
    /// The assigned analyst (or an administrator)
    Analyst,
    /// The assigned manager (or an administrator)
    Manager,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AssignAnalyst(_) => "assign analyst to",
            Self::AssignManager(_) => "assign manager to",
            Self::AnalystApprove { .. } => "analyst-approve",
            Self::AnalystReject { .. } => "analyst-reject",
            Self::ManagerApprove { .. } => "manager-approve",
            Self::ManagerReject { .. } => "manager-reject",
            Self::Escalate { .. } => "escalate",
            Self::Unassign => "unassign",
            Self::SetPriority(_) => "reprioritise",
        }
    }

    pub fn authority(&self) -> Authority {
        match self {
            Self::AnalystApprove { .. } | Self::AnalystReject { .. } => Authority::Analyst,
            Self::ManagerApprove { .. } | Self::ManagerReject { .. } => Authority::Manager,
            _ => Authority::Coordinator,
        }
    }

    fn allowed_from(&self, from: BacklogStatus) -> bool {
        use BacklogStatus::*;
        match self {
            Self::AssignAnalyst(_) => matches!(from, Unassigned | Escalated),
            Self::AssignManager(_) => matches!(from, Unassigned | AssignedToAnalyst | Escalated),
            Self::AnalystApprove { .. } | Self::AnalystReject { .. } => from == AssignedToAnalyst,
            Self::ManagerApprove { .. } | Self::ManagerReject { .. } => from == AssignedToManager,
            Self::Escalate { .. } => matches!(from, Unassigned | AssignedToAnalyst | AssignedToManager),
            Self::Unassign => matches!(from, AssignedToAnalyst | AssignedToManager | Escalated),
            Self::SetPriority(_) => !from.is_terminal(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot {action} a backlog entry in status {from}")]
    NotAllowed {
        action: &'static str,
        from: BacklogStatus,
    },

    #[error("{field} is required")]
    Missing { field: &'static str },
}

/// Audit record produced by a successful transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Activity {
    pub activity_type: &'static str,
    pub from_value: Option<String>,
    pub to_value: Option<String>,
    pub description: String,
}

impl Activity {
    fn status_change(from: BacklogStatus, to: BacklogStatus, description: String) -> Self {
        Self {
            activity_type: "StatusChange",
            from_value: Some(from.to_string()),
            to_value: Some(to.to_string()),
            description,
        }
    }
}

/// Apply a command, mutating `state` only on success.
pub fn apply(
    state: &mut WorkflowState,
    command: Command,
    now: DateTime<Utc>,
) -> Result<Activity, TransitionError> {
    let from = state.status;
    if !command.allowed_from(from) {
        return Err(TransitionError::NotAllowed {
            action: command.name(),
            from,
        });
    }

    let activity = match command {
        Command::AssignAnalyst(user) => {
            let user = non_blank("analyst", user)?;
            state.status = BacklogStatus::AssignedToAnalyst;
            state.assigned_to_analyst = Some(user.clone());
            state.assigned_to_manager = None;
            state.assigned_date = Some(now);
            Activity {
                activity_type: "Assignment",
                from_value: Some(from.to_string()),
                to_value: Some(user.clone()),
                description: format!("Assigned to analyst {}", user),
            }
        }
        Command::AssignManager(user) => {
            let user = non_blank("manager", user)?;
            state.status = BacklogStatus::AssignedToManager;
            state.assigned_to_manager = Some(user.clone());
            if state.assigned_date.is_none() {
                state.assigned_date = Some(now);
            }
            Activity {
                activity_type: "Assignment",
                from_value: Some(from.to_string()),
                to_value: Some(user.clone()),
                description: format!("Assigned to manager {}", user),
            }
        }
        Command::AnalystApprove { comments } => {
            state.status = BacklogStatus::AssignedToManager;
            state.analyst_comments = comments;
            Activity::status_change(from, state.status, "Analyst approved; forwarded to manager".into())
        }
        Command::AnalystReject { reason } => {
            let reason = non_blank("rejection reason", reason)?;
            state.analyst_comments = Some(format!("Rejected: {}", reason));
            reject(state, reason, now);
            Activity::status_change(from, state.status, "Rejected by analyst".into())
        }
        Command::ManagerApprove { comments } => {
            state.status = BacklogStatus::Approved;
            state.manager_comments = comments;
            state.completed_date = Some(now);
            Activity::status_change(from, state.status, "Approved by manager".into())
        }
        Command::ManagerReject { reason } => {
            let reason = non_blank("rejection reason", reason)?;
            state.manager_comments = Some(format!("Rejected: {}", reason));
            reject(state, reason, now);
            Activity::status_change(from, state.status, "Rejected by manager".into())
        }
        Command::Escalate { reason } => {
            let reason = non_blank("escalation reason", reason)?;
            state.status = BacklogStatus::Escalated;
            state.priority = BacklogPriority::Critical;
            Activity::status_change(from, state.status, format!("Escalated: {}", reason))
        }
        Command::Unassign => {
            state.status = BacklogStatus::Unassigned;
            state.assigned_to_analyst = None;
            state.assigned_to_manager = None;
            Activity::status_change(from, state.status, "Unassigned".into())
        }
        Command::SetPriority(priority) => {
            let old = state.priority;
            state.priority = priority;
            Activity {
                activity_type: "Priority",
                from_value: Some(old.to_string()),
                to_value: Some(priority.to_string()),
                description: format!("Priority changed from {} to {}", old, priority),
            }
        }
    };

    Ok(activity)
}

fn reject(state: &mut WorkflowState, reason: String, now: DateTime<Utc>) {
    state.status = BacklogStatus::Rejected;
    state.rejection_reason = Some(reason);
    state.completed_date = Some(now);
}

fn non_blank(field: &'static str, value: String) -> Result<String, TransitionError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TransitionError::Missing { field });
    }
    Ok(trimmed.to_owned())
}

/// Identity of the caller for access checks.
#[derive(Debug, Clone, Copy)]
pub struct Actor<'a> {
    pub user: &'a str,
    pub role: UserRole,
}

/// People attached to an entry.
#[derive(Debug, Clone, Copy)]
pub struct Participants<'a> {
    pub requester: &'a str,
    pub analyst: Option<&'a str>,
    pub manager: Option<&'a str>,
}

pub fn can_view(actor: Actor<'_>, p: Participants<'_>) -> bool {
    actor.role == UserRole::Admin
        || actor.user.eq_ignore_ascii_case(p.requester)
        || p.analyst.is_some_and(|a| actor.user.eq_ignore_ascii_case(a))
        || p.manager.is_some_and(|m| actor.user.eq_ignore_ascii_case(m))
}

/// Whether `actor` may issue a command with the given authority.
pub fn can_issue(
    actor: Actor<'_>,
    authority: Authority,
    status: BacklogStatus,
    p: Participants<'_>,
) -> bool {
    if actor.role == UserRole::Admin {
        return true;
    }
    match authority {
        Authority::Coordinator => actor.role == UserRole::GrcUser,
        Authority::Analyst => {
            status == BacklogStatus::AssignedToAnalyst
                && p.analyst.is_some_and(|a| actor.user.eq_ignore_ascii_case(a))
        }
        Authority::Manager => {
            status == BacklogStatus::AssignedToManager
                && p.manager.is_some_and(|m| actor.user.eq_ignore_ascii_case(m))
        }
    }
}

/// Minimal projection of an entry for statistics.
#[derive(Debug, Clone)]
pub struct StatsRow {
    pub action_type: BacklogActionType,
    pub status: BacklogStatus,
    pub priority: BacklogPriority,
    pub assigned_to_analyst: Option<String>,
    pub assigned_to_manager: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BacklogStats {
    pub total_entries: usize,
    pub unassigned: usize,
    pub assigned_to_analyst: usize,
    pub assigned_to_manager: usize,
    pub escalated: usize,
    pub overdue: usize,
    pub completed_this_week: usize,
    pub completed_this_month: usize,
    pub rejected_this_month: usize,
    pub total_findings: usize,
    pub total_risks: usize,
    pub action_type_counts: HashMap<String, usize>,
    pub priority_counts: HashMap<String, usize>,
    pub top_analysts: Vec<(String, usize)>,
    pub top_managers: Vec<(String, usize)>,
    pub sla_compliance_rate: f64,
}

impl BacklogStats {
    pub fn compute(rows: &[StatsRow], now: DateTime<Utc>) -> Self {
        let week_start = now - Duration::days(i64::from(now.weekday().num_days_from_sunday()));
        let month_start = now - Duration::days(30);
        let count = |f: &dyn Fn(&StatsRow) -> bool| rows.iter().filter(|r| f(*r)).count();

        let mut stats = Self {
            total_entries: rows.len(),
            unassigned: count(&|r| r.status == BacklogStatus::Unassigned),
            assigned_to_analyst: count(&|r| r.status == BacklogStatus::AssignedToAnalyst),
            assigned_to_manager: count(&|r| r.status == BacklogStatus::AssignedToManager),
            escalated: count(&|r| r.status == BacklogStatus::Escalated),
            overdue: count(&|r| is_overdue(r.status, r.due_date, now)),
            completed_this_week: count(&|r| r.status.is_terminal() && r.updated_at >= week_start),
            completed_this_month: count(&|r| r.status.is_terminal() && r.updated_at >= month_start),
            rejected_this_month: count(&|r| {
                r.status == BacklogStatus::Rejected && r.updated_at >= month_start
            }),
            total_findings: count(&|r| r.action_type.is_finding_workflow()),
            total_risks: count(&|r| !r.action_type.is_finding_workflow()),
            sla_compliance_rate: sla_compliance_rate(rows),
            ..Default::default()
        };

        for r in rows {
            *stats
                .action_type_counts
                .entry(r.action_type.to_string())
                .or_default() += 1;
            *stats
                .priority_counts
                .entry(r.priority.to_string())
                .or_default() += 1;
        }
        stats.top_analysts = top_five(rows.iter().filter_map(|r| r.assigned_to_analyst.as_deref()));
        stats.top_managers = top_five(rows.iter().filter_map(|r| r.assigned_to_manager.as_deref()));
        stats
    }
}

fn top_five<'a>(names: impl Iterator<Item = &'a str>) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for n in names.filter(|n| !n.is_empty()) {
        *counts.entry(n).or_default() += 1;
    }
    let mut v: Vec<(String, usize)> = counts.into_iter().map(|(k, c)| (k.to_owned(), c)).collect();
    v.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    v.truncate(5);
    v
}

/// Approved on or before due, over entries that have a due date.
pub fn sla_compliance_rate(rows: &[StatsRow]) -> f64 {
    let with_due: Vec<&StatsRow> = rows.iter().filter(|r| r.due_date.is_some()).collect();
    if with_due.is_empty() {
        return 100.0;
    }
    let compliant = with_due
        .iter()
        .filter(|r| {
            r.status == BacklogStatus::Approved && r.due_date.is_some_and(|d| r.updated_at <= d)
        })
        .count();
    compliant as f64 / with_due.len() as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 12, 10, 0, 0).unwrap()
    }

    fn fresh() -> WorkflowState {
        WorkflowState::new(BacklogPriority::Medium)
    }

    #[test]
    fn defaults_per_action() {
        assert_eq!(BacklogActionType::RiskAcceptance.default_priority(), BacklogPriority::High);
        assert_eq!(BacklogActionType::FindingClosure.default_priority(), BacklogPriority::Low);
        assert_eq!(BacklogActionType::RiskReassessment.due_days(), 10);
        assert_eq!(BacklogActionType::NewFinding.due_days(), 3);
        assert_eq!(
            BacklogActionType::RiskReview.due_date(now()),
            now() + Duration::days(7)
        );
    }

    #[test]
    fn number_format() {
        assert_eq!(backlog_number(2025, 0, 0), "RBL-2025-00001");
        assert_eq!(backlog_number(2025, 41, 2), "RBL-2025-00044");
    }

    #[test]
    fn source_precedence() {
        assert_eq!(risk_source(true, true), RiskSource::RiskAssessment);
        assert_eq!(risk_source(false, true), RiskSource::FindingAcceptance);
        assert_eq!(risk_source(false, false), RiskSource::ManualImport);
    }

    #[test]
    fn happy_path_to_approval() {
        let mut s = fresh();
        apply(&mut s, Command::AssignAnalyst("ana@corp".into()), now()).unwrap();
        assert_eq!(s.status, BacklogStatus::AssignedToAnalyst);
        assert_eq!(s.assigned_date, Some(now()));

        apply(&mut s, Command::AssignManager("max@corp".into()), now()).unwrap();
        assert_eq!(s.status, BacklogStatus::AssignedToManager);
        assert_eq!(s.assigned_to_analyst.as_deref(), Some("ana@corp"));

        let a = apply(
            &mut s,
            Command::ManagerApprove {
                comments: Some("ok".into()),
            },
            now(),
        )
        .unwrap();
        assert_eq!(s.status, BacklogStatus::Approved);
        assert_eq!(s.completed_date, Some(now()));
        assert_eq!(a.to_value.as_deref(), Some("Approved"));
    }

    #[test]
    fn analyst_approval_forwards_to_manager() {
        let mut s = fresh();
        apply(&mut s, Command::AssignAnalyst("ana".into()), now()).unwrap();
        apply(&mut s, Command::AnalystApprove { comments: Some("looks fine".into()) }, now()).unwrap();
        assert_eq!(s.status, BacklogStatus::AssignedToManager);
        assert_eq!(s.analyst_comments.as_deref(), Some("looks fine"));
    }

    #[test]
    fn rejection_records_reason() {
        let mut s = fresh();
        apply(&mut s, Command::AssignAnalyst("ana".into()), now()).unwrap();
        apply(&mut s, Command::AnalystReject { reason: "duplicate".into() }, now()).unwrap();
        assert_eq!(s.status, BacklogStatus::Rejected);
        assert_eq!(s.rejection_reason.as_deref(), Some("duplicate"));
        assert_eq!(s.analyst_comments.as_deref(), Some("Rejected: duplicate"));
        assert!(s.completed_date.is_some());
    }

    #[test]
    fn illegal_transitions_leave_state_untouched() {
        let mut s = fresh();
        let before = s.clone();
        let err = apply(&mut s, Command::ManagerApprove { comments: None }, now()).unwrap_err();
        assert_eq!(
            err,
            TransitionError::NotAllowed {
                action: "manager-approve",
                from: BacklogStatus::Unassigned
            }
        );
        assert_eq!(s, before);

        assert!(apply(&mut s, Command::Unassign, now()).is_err());
        assert!(apply(&mut s, Command::AnalystApprove { comments: None }, now()).is_err());
    }

    #[test]
    fn terminal_states_accept_nothing() {
        let mut s = fresh();
        apply(&mut s, Command::AssignManager("max".into()), now()).unwrap();
        apply(&mut s, Command::ManagerReject { reason: "no".into() }, now()).unwrap();

        for cmd in [
            Command::AssignAnalyst("a".into()),
            Command::AssignManager("m".into()),
            Command::Escalate { reason: "x".into() },
            Command::Unassign,
            Command::SetPriority(BacklogPriority::High),
            Command::ManagerApprove { comments: None },
        ] {
            assert!(apply(&mut s, cmd, now()).is_err());
        }
    }

    #[test]
    fn escalation_raises_priority_and_can_be_reassigned() {
        let mut s = fresh();
        apply(&mut s, Command::Escalate { reason: "stuck".into() }, now()).unwrap();
        assert_eq!(s.status, BacklogStatus::Escalated);
        assert_eq!(s.priority, BacklogPriority::Critical);
        assert!(apply(&mut s, Command::Escalate { reason: "again".into() }, now()).is_err());
        apply(&mut s, Command::AssignAnalyst("ana".into()), now()).unwrap();
        assert_eq!(s.status, BacklogStatus::AssignedToAnalyst);
    }

    #[test]
    fn blank_reason_is_rejected() {
        let mut s = fresh();
        apply(&mut s, Command::AssignAnalyst("ana".into()), now()).unwrap();
        let err = apply(&mut s, Command::AnalystReject { reason: "  ".into() }, now()).unwrap_err();
        assert_eq!(err, TransitionError::Missing { field: "rejection reason" });
        assert_eq!(s.status, BacklogStatus::AssignedToAnalyst);
    }

    #[test]
    fn overdue_ignores_terminal_entries() {
        let past = Some(now() - Duration::hours(1));
        assert!(is_overdue(BacklogStatus::AssignedToAnalyst, past, now()));
        assert!(!is_overdue(BacklogStatus::Approved, past, now()));
        assert!(!is_overdue(BacklogStatus::Unassigned, None, now()));
    }

    #[test]
    fn access_rules() {
        let p = Participants {
            requester: "req@corp",
            analyst: Some("ana@corp"),
            manager: Some("max@corp"),
        };
        fn it(user: &str) -> Actor<'_> {
            Actor { user, role: UserRole::ItUser }
        }

        assert!(can_view(it("REQ@corp"), p));
        assert!(can_view(it("ana@corp"), p));
        assert!(!can_view(it("other@corp"), p));
        assert!(can_view(Actor { user: "root", role: UserRole::Admin }, p));

        assert!(can_issue(it("ana@corp"), Authority::Analyst, BacklogStatus::AssignedToAnalyst, p));
        assert!(!can_issue(it("ana@corp"), Authority::Analyst, BacklogStatus::AssignedToManager, p));
        assert!(!can_issue(it("max@corp"), Authority::Analyst, BacklogStatus::AssignedToAnalyst, p));
        assert!(can_issue(it("max@corp"), Authority::Manager, BacklogStatus::AssignedToManager, p));
        assert!(!can_issue(it("ana@corp"), Authority::Coordinator, BacklogStatus::Unassigned, p));
        assert!(can_issue(
            Actor { user: "g", role: UserRole::GrcUser },
            Authority::Coordinator,
            BacklogStatus::Unassigned,
            p
        ));
    }

    #[test]
    fn statistics() {
        let row = |status, analyst: Option<&str>, due: Option<DateTime<Utc>>, updated| StatsRow {
            action_type: BacklogActionType::NewRisk,
            status,
            priority: BacklogPriority::Medium,
            assigned_to_analyst: analyst.map(String::from),
            assigned_to_manager: None,
            due_date: due,
            updated_at: updated,
        };
        let n = now();
        let rows = vec![
            row(BacklogStatus::Approved, Some("ana"), Some(n + Duration::days(1)), n),
            row(BacklogStatus::Approved, Some("ana"), Some(n - Duration::days(2)), n),
            row(BacklogStatus::AssignedToAnalyst, Some("bob"), Some(n - Duration::days(1)), n),
            row(BacklogStatus::Rejected, None, None, n - Duration::days(40)),
        ];
        let stats = BacklogStats::compute(&rows, n);
        assert_eq!(stats.total_entries, 4);
        assert_eq!(stats.overdue, 1);
        assert_eq!(stats.completed_this_week, 2);
        assert_eq!(stats.completed_this_month, 2);
        assert_eq!(stats.rejected_this_month, 0);
        assert_eq!(stats.top_analysts[0], ("ana".to_string(), 2));
        assert_eq!(stats.action_type_counts.get("NewRisk"), Some(&4));
        // one of three entries with a due date was approved in time
        assert!((stats.sla_compliance_rate - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(sla_compliance_rate(&[]), 100.0);
    }
}
