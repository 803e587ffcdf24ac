//! Compliance assessment scoring

use chrono::{DateTime, Utc};

use crate::enums::{AssessmentStatus, ComplianceStatus};
use crate::rating::round_to;

/// Share of applicable controls that are at least partially compliant, two decimals.
///
/// Returns 0 when every control is `NotApplicable` or the slice is empty.
pub fn compliance_percentage(statuses: &[ComplianceStatus]) -> f64 {
    let applicable = statuses
        .iter()
        .filter(|s| **s != ComplianceStatus::NotApplicable)
        .count();
    if applicable == 0 {
        return 0.0;
    }
    let met = statuses
        .iter()
        .filter(|s| {
            matches!(
                s,
                ComplianceStatus::FullyCompliant
                    | ComplianceStatus::MajorlyCompliant
                    | ComplianceStatus::PartiallyCompliant
            )
        })
        .count();
    round_to(met as f64 / applicable as f64 * 100.0, 2)
}

pub fn is_overdue(
    status: AssessmentStatus,
    sla_deadline: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    !status.is_finished() && sla_deadline.is_some_and(|d| now > d)
}

/// Per-status tally for an assessment summary.
pub fn status_breakdown(statuses: &[ComplianceStatus]) -> Vec<(ComplianceStatus, usize)> {
    ComplianceStatus::ALL
        .iter()
        .map(|s| (*s, statuses.iter().filter(|x| *x == s).count()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ComplianceStatus::*;

    #[test]
    fn percentage_excludes_not_applicable() {
        let s = [FullyCompliant, MajorlyCompliant, NonCompliant, NotApplicable];
        assert_eq!(compliance_percentage(&s), 66.67);
    }

    #[test]
    fn partial_counts_as_met() {
        assert_eq!(compliance_percentage(&[PartiallyCompliant, NonCompliant]), 50.0);
    }

    #[test]
    fn empty_or_all_na_is_zero() {
        assert_eq!(compliance_percentage(&[]), 0.0);
        assert_eq!(compliance_percentage(&[NotApplicable, NotApplicable]), 0.0);
    }

    #[test]
    fn overdue_only_when_open() {
        let now = Utc::now();
        let past = Some(now - Duration::days(1));
        assert!(is_overdue(AssessmentStatus::InProgress, past, now));
        assert!(!is_overdue(AssessmentStatus::Completed, past, now));
        assert!(!is_overdue(AssessmentStatus::Draft, None, now));
    }

    #[test]
    fn breakdown_covers_every_status() {
        let b = status_breakdown(&[NonCompliant, NonCompliant, FullyCompliant]);
        assert_eq!(b.len(), 5);
        assert_eq!(b[0], (NonCompliant, 2));
        assert_eq!(b[3], (FullyCompliant, 1));
    }
}
