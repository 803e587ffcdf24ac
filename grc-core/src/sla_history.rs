//! Completed-SLA history and performance reporting

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::enums::{text_enum, RiskLevel};
use crate::rating::round_to;

text_enum! {
    pub enum SlaType ("sla type") {
        Remediation => "Remediation",
        Review => "Review",
        Assessment => "Assessment",
        Approval => "Approval",
    }
}

text_enum! {
    pub enum SlaOutcome ("sla outcome") {
        Completed => "Completed",
        Breached => "Breached",
    }
}

/// An item finished against its SLA.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlaEvent {
    pub sla_type: SlaType,
    pub risk_level: RiskLevel,
    pub assigned_to: String,
    pub started: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub completed: DateTime<Utc>,
}

fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    round_to((to - from).num_seconds() as f64 / 3600.0, 2)
}

impl SlaEvent {
    /// Finishing exactly at the deadline still counts as met.
    pub fn outcome(&self) -> SlaOutcome {
        if self.completed <= self.deadline {
            SlaOutcome::Completed
        } else {
            SlaOutcome::Breached
        }
    }

    pub fn sla_hours(&self) -> i32 {
        i32::try_from((self.deadline - self.started).num_hours()).unwrap_or(i32::MAX)
    }

    pub fn completion_hours(&self) -> f64 {
        hours_between(self.started, self.completed)
    }

    /// Hours to spare; negative when late.
    pub fn variance_hours(&self) -> f64 {
        hours_between(self.completed, self.deadline)
    }
}

/// Stored history, reduced to what the reports read.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub sla_type: SlaType,
    pub risk_level: RiskLevel,
    pub assigned_to: String,
    pub outcome: SlaOutcome,
    pub completed: DateTime<Utc>,
    pub completion_hours: f64,
    pub variance_hours: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Performance {
    pub total: usize,
    pub breached: usize,
    /// Met / total × 100, one decimal; 0 when there is nothing to measure.
    pub compliance_rate: f64,
    pub average_completion_hours: f64,
    pub average_variance_hours: f64,
}

impl Performance {
    fn of<'a>(rows: impl IntoIterator<Item = &'a HistoryRow>) -> Self {
        let mut total = 0;
        let mut breached = 0;
        let mut completion = 0.0;
        let mut variance = 0.0;
        for row in rows {
            total += 1;
            breached += usize::from(row.outcome == SlaOutcome::Breached);
            completion += row.completion_hours;
            variance += row.variance_hours;
        }
        if total == 0 {
            return Self::default();
        }
        let n = total as f64;
        Self {
            total,
            breached,
            compliance_rate: round_to((total - breached) as f64 / n * 100.0, 1),
            average_completion_hours: round_to(completion / n, 1),
            average_variance_hours: round_to(variance / n, 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub total: usize,
    pub breached: usize,
    pub compliance_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub overall: Performance,
    pub by_type: BTreeMap<String, Performance>,
    pub by_risk_level: BTreeMap<String, Performance>,
    pub by_assignee: BTreeMap<String, Performance>,
    /// One point per completion day, oldest first.
    pub trend: Vec<TrendPoint>,
    /// SLA type with the most breaches, if any were breached.
    pub most_breached_type: Option<SlaType>,
}

fn grouped<K: Ord>(rows: &[HistoryRow], key: impl Fn(&HistoryRow) -> K) -> BTreeMap<K, Performance> {
    let mut groups: BTreeMap<K, Vec<&HistoryRow>> = BTreeMap::new();
    for row in rows {
        groups.entry(key(row)).or_default().push(row);
    }
    groups
        .into_iter()
        .map(|(k, members)| (k, Performance::of(members)))
        .collect()
}

pub fn performance_report(rows: &[HistoryRow]) -> PerformanceReport {
    let by_type = grouped(rows, |r| r.sla_type);
    let most_breached_type = by_type
        .iter()
        .filter(|(_, p)| p.breached > 0)
        .max_by_key(|(_, p)| p.breached)
        .map(|(t, _)| *t);

    let trend = grouped(rows, |r| r.completed.date_naive())
        .into_iter()
        .map(|(date, p)| TrendPoint {
            date,
            total: p.total,
            breached: p.breached,
            compliance_rate: p.compliance_rate,
        })
        .collect();

    PerformanceReport {
        overall: Performance::of(rows),
        by_type: stringify(by_type),
        by_risk_level: stringify(grouped(rows, |r| r.risk_level)),
        by_assignee: grouped(rows, |r| r.assigned_to.clone()),
        trend,
        most_breached_type,
    }
}

fn stringify<K: std::fmt::Display>(map: BTreeMap<K, Performance>) -> BTreeMap<String, Performance> {
    map.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap()
    }

    fn event(hours: i64, took: i64) -> SlaEvent {
        SlaEvent {
            sla_type: SlaType::Remediation,
            risk_level: RiskLevel::High,
            assigned_to: "ops".into(),
            started: start(),
            deadline: start() + Duration::hours(hours),
            completed: start() + Duration::hours(took),
        }
    }

    fn row(sla_type: SlaType, who: &str, outcome: SlaOutcome, day: u32) -> HistoryRow {
        HistoryRow {
            sla_type,
            risk_level: RiskLevel::Medium,
            assigned_to: who.into(),
            outcome,
            completed: Utc.with_ymd_and_hms(2026, 4, day, 10, 0, 0).unwrap(),
            completion_hours: 10.0,
            variance_hours: if outcome == SlaOutcome::Breached { -5.0 } else { 5.0 },
        }
    }

    #[test]
    fn deadline_is_inclusive() {
        assert_eq!(event(24, 24).outcome(), SlaOutcome::Completed);
        assert_eq!(event(24, 25).outcome(), SlaOutcome::Breached);
    }

    #[test]
    fn event_measures() {
        let e = event(24, 30);
        assert_eq!(e.sla_hours(), 24);
        assert_eq!(e.completion_hours(), 30.0);
        assert_eq!(e.variance_hours(), -6.0);
        assert_eq!(event(24, 20).variance_hours(), 4.0);
    }

    #[test]
    fn report_groups_and_rates() {
        use SlaOutcome::*;
        let rows = vec![
            row(SlaType::Remediation, "alice", Completed, 1),
            row(SlaType::Remediation, "alice", Breached, 1),
            row(SlaType::Remediation, "bob", Breached, 2),
            row(SlaType::Assessment, "bob", Completed, 3),
        ];
        let report = performance_report(&rows);
        assert_eq!(report.overall.total, 4);
        assert_eq!(report.overall.breached, 2);
        assert_eq!(report.overall.compliance_rate, 50.0);
        assert_eq!(report.overall.average_variance_hours, 0.0);

        assert_eq!(report.by_type["Remediation"].compliance_rate, 33.3);
        assert_eq!(report.by_type["Assessment"].compliance_rate, 100.0);
        assert_eq!(report.by_assignee["bob"].breached, 1);
        assert_eq!(report.by_risk_level["Medium"].total, 4);
        assert_eq!(report.most_breached_type, Some(SlaType::Remediation));

        let days: Vec<u32> = report.trend.iter().map(|p| p.total as u32).collect();
        assert_eq!(days, vec![2, 1, 1]);
        assert_eq!(report.trend[0].compliance_rate, 50.0);
    }

    #[test]
    fn empty_report() {
        let report = performance_report(&[]);
        assert_eq!(report.overall, Performance::default());
        assert_eq!(report.overall.compliance_rate, 0.0);
        assert!(report.trend.is_empty());
        assert_eq!(report.most_breached_type, None);
    }
}
