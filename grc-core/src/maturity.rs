//! Maturity assessment scoring
//!
//! Two models:
//! - standard: mean current level as a share of the top level (4)
//! - C2M2: per-domain MIL achievement, averaged across domains

use std::collections::BTreeMap;

use crate::enums::MaturityLevel;
use crate::rating::round_to;

/// One assessed practice with the control fields scoring depends on.
#[derive(Debug, Clone)]
pub struct PracticeScore<'a> {
    pub control_id: &'a str,
    pub function: &'a str,
    pub category: &'a str,
    pub current: MaturityLevel,
}

const TOP_LEVEL: f64 = 4.0;

/// Sum of levels over the best achievable sum, as a percentage.
pub fn standard_score(levels: &[MaturityLevel]) -> f64 {
    if levels.is_empty() {
        return 0.0;
    }
    let sum: f64 = levels.iter().map(|l| f64::from(l.value())).sum();
    round_to(sum / (levels.len() as f64 * TOP_LEVEL) * 100.0, 2)
}

/// Parse "2" or "MIL2" into a MIL number; anything else is 0.
pub fn parse_mil(category: &str) -> u8 {
    let trimmed = category.trim();
    let digits = trimmed
        .strip_prefix("MIL")
        .or_else(|| trimmed.strip_prefix("mil"))
        .unwrap_or(trimmed)
        .trim();
    digits.parse().unwrap_or(0)
}

/// Highest MIL reached walking levels upward, stopping at the first level
/// where some practice falls short.
pub fn achieved_mil(practices: &[&PracticeScore<'_>]) -> u8 {
    let mut by_mil: BTreeMap<u8, Vec<MaturityLevel>> = BTreeMap::new();
    for p in practices {
        let mil = parse_mil(p.category);
        if mil > 0 {
            by_mil.entry(mil).or_default().push(p.current);
        }
    }

    let mut achieved = 0;
    for (mil, levels) in by_mil {
        if levels.iter().all(|l| l.value() >= mil) {
            achieved = mil;
        } else {
            break;
        }
    }
    achieved
}

fn mil_percentage(mil: u8) -> f64 {
    match mil {
        3 => 100.0,
        2 => 67.0,
        1 => 33.0,
        _ => 0.0,
    }
}

/// Overall C2M2 score: mean of per-domain MIL percentages.
pub fn c2m2_score(practices: &[PracticeScore<'_>]) -> f64 {
    let domains = group_by(practices, |p| p.function.to_owned());
    if domains.is_empty() {
        return 0.0;
    }
    let total: f64 = domains.values().map(|d| mil_percentage(achieved_mil(d))).sum();
    round_to(total / domains.len() as f64, 2)
}

/// Objective of a practice id, e.g. `ASSET-1a` belongs to `ASSET-1`.
pub fn objective_of(practice_id: &str) -> &str {
    match practice_id.chars().last() {
        Some(c) if c.is_alphabetic() => &practice_id[..practice_id.len() - c.len_utf8()],
        _ => practice_id,
    }
}

/// Achieved MIL per objective, grouped by domain.
pub fn c2m2_objective_scores(practices: &[PracticeScore<'_>]) -> BTreeMap<String, BTreeMap<String, u8>> {
    group_by(practices, |p| p.function.to_owned())
        .into_iter()
        .map(|(domain, ps)| {
            let owned: Vec<PracticeScore<'_>> = ps.into_iter().cloned().collect();
            let objectives = group_by(&owned, |p| objective_of(p.control_id).to_owned())
                .into_iter()
                .map(|(objective, ops)| (objective, achieved_mil(&ops)))
                .collect();
            (domain, objectives)
        })
        .collect()
}

/// Mean current level per function.
pub fn scores_by_function(practices: &[PracticeScore<'_>]) -> BTreeMap<String, f64> {
    group_by(practices, |p| p.function.to_owned())
        .into_iter()
        .map(|(function, ps)| {
            let sum: f64 = ps.iter().map(|p| f64::from(p.current.value())).sum();
            (function, round_to(sum / ps.len() as f64, 2))
        })
        .collect()
}

fn group_by<'p, 'a, K: Ord>(
    practices: &'p [PracticeScore<'a>],
    key: impl Fn(&PracticeScore<'a>) -> K,
) -> BTreeMap<K, Vec<&'p PracticeScore<'a>>> {
    let mut map: BTreeMap<K, Vec<&PracticeScore<'a>>> = BTreeMap::new();
    for p in practices {
        map.entry(key(p)).or_default().push(p);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use MaturityLevel::*;

    fn p<'a>(id: &'a str, function: &'a str, category: &'a str, current: MaturityLevel) -> PracticeScore<'a> {
        PracticeScore {
            control_id: id,
            function,
            category,
            current,
        }
    }

    #[test]
    fn standard_is_share_of_top_level() {
        assert_eq!(standard_score(&[Managed, Managed]), 100.0);
        assert_eq!(standard_score(&[Initial, Defined]), 50.0);
        assert_eq!(standard_score(&[]), 0.0);
    }

    #[test]
    fn mil_parsing() {
        assert_eq!(parse_mil("2"), 2);
        assert_eq!(parse_mil("MIL3"), 3);
        assert_eq!(parse_mil(" MIL 1 "), 1);
        assert_eq!(parse_mil("Identify"), 0);
    }

    #[test]
    fn achieved_mil_stops_at_first_gap() {
        let practices = [
            p("ASSET-1a", "ASSET", "MIL1", Initial),
            p("ASSET-1b", "ASSET", "MIL1", Defined),
            p("ASSET-2a", "ASSET", "MIL2", Initial),
            p("ASSET-3a", "ASSET", "MIL3", Managed),
        ];
        let refs: Vec<_> = practices.iter().collect();
        assert_eq!(achieved_mil(&refs), 1);
    }

    #[test]
    fn c2m2_averages_domains() {
        let practices = [
            p("ASSET-1a", "ASSET", "1", Defined),
            p("ASSET-2a", "ASSET", "2", Defined),
            p("ASSET-3a", "ASSET", "3", Defined),
            p("THREAT-1a", "THREAT", "1", NotImplemented),
        ];
        // ASSET reaches MIL3 (100), THREAT MIL0 (0)
        assert_eq!(c2m2_score(&practices), 50.0);
        assert_eq!(c2m2_score(&[]), 0.0);
    }

    #[test]
    fn objectives_strip_trailing_letter() {
        assert_eq!(objective_of("ASSET-1a"), "ASSET-1");
        assert_eq!(objective_of("THREAT-2"), "THREAT-2");

        let practices = [
            p("ASSET-1a", "ASSET", "1", Initial),
            p("ASSET-1b", "ASSET", "2", Developing),
            p("ASSET-2a", "ASSET", "1", NotImplemented),
        ];
        let scores = c2m2_objective_scores(&practices);
        assert_eq!(scores["ASSET"]["ASSET-1"], 2);
        assert_eq!(scores["ASSET"]["ASSET-2"], 0);
    }

    #[test]
    fn function_means() {
        let practices = [
            p("ID.AM-1", "Identify", "", Initial),
            p("ID.AM-2", "Identify", "", Defined),
            p("PR.AC-1", "Protect", "", Managed),
        ];
        let scores = scores_by_function(&practices);
        assert_eq!(scores["Identify"], 2.0);
        assert_eq!(scores["Protect"], 4.0);
    }
}
