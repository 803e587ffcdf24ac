//! SLA hours, deadlines and status classification

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::RiskLevel;
use crate::rating::round_to;

/// SLA configuration carried by a risk matrix, all values in hours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaHours {
    pub critical_remediation: i32,
    pub high_remediation: i32,
    pub medium_remediation: i32,
    pub low_remediation: i32,
    pub critical_review: i32,
    pub high_review: i32,
    pub medium_review: i32,
    pub low_review: i32,
    pub risk_assessment: i32,
    pub compliance_assessment: i32,
    pub maturity_assessment: i32,
    pub assessment_approval: i32,
    pub risk_acceptance_approval: i32,
    pub exception_approval: i32,
}

impl Default for SlaHours {
    fn default() -> Self {
        Self {
            critical_remediation: 4,
            high_remediation: 24,
            medium_remediation: 168,
            low_remediation: 720,
            critical_review: 720,
            high_review: 2160,
            medium_review: 4380,
            low_review: 8760,
            risk_assessment: 336,
            compliance_assessment: 720,
            maturity_assessment: 720,
            assessment_approval: 72,
            risk_acceptance_approval: 120,
            exception_approval: 72,
        }
    }
}

/// Kinds of assessment with their own SLA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssessmentKind {
    Risk,
    Compliance,
    Maturity,
}

/// Kinds of approval with their own SLA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalKind {
    Assessment,
    RiskAcceptance,
    Exception,
}

impl SlaHours {
    pub fn remediation(&self, level: RiskLevel) -> i32 {
        match level {
            RiskLevel::Critical => self.critical_remediation,
            RiskLevel::High => self.high_remediation,
            RiskLevel::Medium => self.medium_remediation,
            RiskLevel::Low => self.low_remediation,
        }
    }

    pub fn review(&self, level: RiskLevel) -> i32 {
        match level {
            RiskLevel::Critical => self.critical_review,
            RiskLevel::High => self.high_review,
            RiskLevel::Medium => self.medium_review,
            RiskLevel::Low => self.low_review,
        }
    }

    pub fn assessment(&self, kind: AssessmentKind) -> i32 {
        match kind {
            AssessmentKind::Risk => self.risk_assessment,
            AssessmentKind::Compliance => self.compliance_assessment,
            AssessmentKind::Maturity => self.maturity_assessment,
        }
    }

    pub fn approval(&self, kind: ApprovalKind) -> i32 {
        match kind {
            ApprovalKind::Assessment => self.assessment_approval,
            ApprovalKind::RiskAcceptance => self.risk_acceptance_approval,
            ApprovalKind::Exception => self.exception_approval,
        }
    }

    /// Every value must be a positive number of hours.
    pub fn is_valid(&self) -> bool {
        [
            self.critical_remediation,
            self.high_remediation,
            self.medium_remediation,
            self.low_remediation,
            self.critical_review,
            self.high_review,
            self.medium_review,
            self.low_review,
            self.risk_assessment,
            self.compliance_assessment,
            self.maturity_assessment,
            self.assessment_approval,
            self.risk_acceptance_approval,
            self.exception_approval,
        ]
        .iter()
        .all(|h| *h > 0)
    }
}

pub fn deadline(from: DateTime<Utc>, hours: i32) -> DateTime<Utc> {
    from + Duration::hours(i64::from(hours))
}

pub fn is_breached(deadline: DateTime<Utc>, at: DateTime<Utc>) -> bool {
    at > deadline
}

/// Human readable SLA duration.
pub fn format_sla_hours(hours: i32) -> String {
    match hours {
        h if h < 24 => format!("{} hours", h),
        h if h < 168 => format!("{} days", h / 24),
        h if h < 720 => format!("{} weeks", h / 168),
        h => format!("{} months", round_to(f64::from(h) / 720.0, 1)),
    }
}

/// Status of one tracked item against its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlaState {
    Completed,
    Overdue,
    DueSoon,
    OnTrack,
}

impl SlaState {
    pub fn classify(completed: bool, now: DateTime<Utc>, deadline: DateTime<Utc>) -> Self {
        if completed {
            Self::Completed
        } else if now > deadline {
            Self::Overdue
        } else if deadline - now <= Duration::hours(24) {
            Self::DueSoon
        } else {
            Self::OnTrack
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            Self::Completed => "Completed",
            Self::Overdue => "Overdue",
            Self::DueSoon => "Due Soon",
            Self::OnTrack => "On Track",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Self::Completed => "success",
            Self::Overdue => "danger",
            Self::DueSoon => "warning",
            Self::OnTrack => "primary",
        }
    }
}

/// Urgency of an upcoming deadline by whole days left.
pub fn urgency(days_left: i64) -> RiskLevel {
    match days_left {
        d if d <= 0 => RiskLevel::Critical,
        1 => RiskLevel::High,
        2 | 3 => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

/// Share of tracked items without a breach, one decimal place.
pub fn compliance_percentage(total: usize, breaches: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let ok = total.saturating_sub(breaches) as f64;
    round_to(ok / total as f64 * 100.0, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn format_hours() {
        assert_eq!(format_sla_hours(4), "4 hours");
        assert_eq!(format_sla_hours(24), "1 days");
        assert_eq!(format_sla_hours(72), "3 days");
        assert_eq!(format_sla_hours(167), "6 days");
        assert_eq!(format_sla_hours(168), "1 weeks");
        assert_eq!(format_sla_hours(336), "2 weeks");
        assert_eq!(format_sla_hours(720), "1 months");
        assert_eq!(format_sla_hours(2160), "3 months");
        assert_eq!(format_sla_hours(4380), "6.1 months");
    }

    #[test]
    fn fallback_hours_by_level() {
        let sla = SlaHours::default();
        assert_eq!(sla.remediation(RiskLevel::Critical), 4);
        assert_eq!(sla.remediation(RiskLevel::High), 24);
        assert_eq!(sla.remediation(RiskLevel::Medium), 168);
        assert_eq!(sla.remediation(RiskLevel::Low), 720);
        assert_eq!(sla.review(RiskLevel::Low), 8760);
        assert_eq!(sla.assessment(AssessmentKind::Risk), 336);
        assert_eq!(sla.approval(ApprovalKind::RiskAcceptance), 120);
        assert!(sla.is_valid());
    }

    #[test]
    fn deadline_and_breach() {
        let from = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let due = deadline(from, 24);
        assert_eq!(due, Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap());
        assert!(!is_breached(due, due));
        assert!(is_breached(due, due + Duration::seconds(1)));
    }

    #[test]
    fn state_classification() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(SlaState::classify(true, now, now - Duration::days(3)), SlaState::Completed);
        assert_eq!(SlaState::classify(false, now, now - Duration::hours(1)), SlaState::Overdue);
        assert_eq!(SlaState::classify(false, now, now + Duration::hours(24)), SlaState::DueSoon);
        assert_eq!(SlaState::classify(false, now, now + Duration::hours(25)), SlaState::OnTrack);
        assert_eq!(SlaState::DueSoon.text(), "Due Soon");
        assert_eq!(SlaState::Overdue.color(), "danger");
    }

    #[test]
    fn urgency_by_days_left() {
        assert_eq!(urgency(-2), RiskLevel::Critical);
        assert_eq!(urgency(0), RiskLevel::Critical);
        assert_eq!(urgency(1), RiskLevel::High);
        assert_eq!(urgency(3), RiskLevel::Medium);
        assert_eq!(urgency(4), RiskLevel::Low);
    }

    #[test]
    fn compliance_share() {
        assert_eq!(compliance_percentage(0, 0), 100.0);
        assert_eq!(compliance_percentage(3, 1), 66.7);
        assert_eq!(compliance_percentage(4, 4), 0.0);
    }
}
