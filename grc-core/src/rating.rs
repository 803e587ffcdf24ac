//! Risk scoring rules
//!
//! Three independent scales live here:
//! - finding rating: mean of the three ordinal inputs
//! - qualitative score: likelihood × impact × exposure multiplier
//! - FAIR level: annual loss expectancy against money thresholds

use serde::{Deserialize, Serialize};

use crate::enums::{ExposureLevel, ImpactLevel, LikelihoodLevel, RiskLevel};
use crate::validation::ValidationError;

/// Rating of a finding from the mean of its three ordinal inputs.
pub fn finding_rating(
    impact: ImpactLevel,
    likelihood: LikelihoodLevel,
    exposure: ExposureLevel,
) -> RiskLevel {
    let avg = f64::from(impact.value() + likelihood.value() + exposure.value()) / 3.0;
    if avg >= 4.0 {
        RiskLevel::Critical
    } else if avg >= 3.0 {
        RiskLevel::High
    } else if avg >= 2.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Qualitative score of an assessment.
pub fn qualitative_score(
    likelihood: LikelihoodLevel,
    impact: ImpactLevel,
    exposure: ExposureLevel,
) -> f64 {
    f64::from(likelihood.value()) * f64::from(impact.value()) * exposure.multiplier()
}

/// Score of a threat scenario; `None` unless all three inputs are present.
pub fn scenario_score(
    likelihood: Option<f64>,
    impact: Option<f64>,
    exposure: Option<f64>,
) -> Option<f64> {
    Some(likelihood? * impact? * exposure?)
}

/// A score together with its bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreLevel {
    pub score: f64,
    pub level: RiskLevel,
}

/// Organisation-wide thresholds for both qualitative and FAIR scales.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLevelSettings {
    pub qualitative_critical: f64,
    pub qualitative_high: f64,
    pub qualitative_medium: f64,
    pub risk_appetite: f64,
    pub fair_critical: f64,
    pub fair_high: f64,
    pub fair_medium: f64,
}

impl Default for RiskLevelSettings {
    fn default() -> Self {
        Self {
            qualitative_critical: 16.0,
            qualitative_high: 10.0,
            qualitative_medium: 4.0,
            risk_appetite: 6.0,
            fair_critical: 1_000_000.0,
            fair_high: 100_000.0,
            fair_medium: 10_000.0,
        }
    }
}

impl RiskLevelSettings {
    /// Thresholds must be strictly descending and positive on both scales.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let descending = |c: f64, h: f64, m: f64| c > h && h > m && m > 0.0;
        if !descending(
            self.qualitative_critical,
            self.qualitative_high,
            self.qualitative_medium,
        ) {
            return Err(ValidationError::OutOfRange {
                field: "qualitative thresholds",
                reason: "must satisfy critical > high > medium > 0".into(),
            });
        }
        if !descending(self.fair_critical, self.fair_high, self.fair_medium) {
            return Err(ValidationError::OutOfRange {
                field: "FAIR thresholds",
                reason: "must satisfy critical > high > medium > 0".into(),
            });
        }
        if self.risk_appetite < 0.0 {
            return Err(ValidationError::OutOfRange {
                field: "risk appetite",
                reason: "must not be negative".into(),
            });
        }
        Ok(())
    }

    pub fn qualitative_level(&self, score: f64) -> RiskLevel {
        bucket(
            score,
            self.qualitative_critical,
            self.qualitative_high,
            self.qualitative_medium,
        )
    }

    pub fn fair_level(&self, ale: f64) -> RiskLevel {
        bucket(ale, self.fair_critical, self.fair_high, self.fair_medium)
    }

    pub fn within_appetite(&self, score: f64) -> bool {
        score <= self.risk_appetite
    }

    /// Appetite check for a register entry. A positive ALE is bucketed on the
    /// FAIR scale and compared by its level score; otherwise the qualitative
    /// score applies.
    pub fn exceeds_appetite(
        &self,
        ale: Option<f64>,
        likelihood: LikelihoodLevel,
        impact: ImpactLevel,
        exposure: ExposureLevel,
    ) -> bool {
        let score = match ale.filter(|a| *a > 0.0) {
            Some(ale) => level_score(self.fair_level(ale)),
            None => qualitative_score(likelihood, impact, exposure),
        };
        !self.within_appetite(score)
    }

    pub fn score_qualitative(
        &self,
        likelihood: LikelihoodLevel,
        impact: ImpactLevel,
        exposure: ExposureLevel,
    ) -> ScoreLevel {
        let score = qualitative_score(likelihood, impact, exposure);
        ScoreLevel {
            score,
            level: self.qualitative_level(score),
        }
    }
}

/// Qualitative score standing in for a bucket when only the level is known.
pub fn level_score(level: RiskLevel) -> f64 {
    match level {
        RiskLevel::Critical => 16.0,
        RiskLevel::High => 10.0,
        RiskLevel::Medium => 4.0,
        RiskLevel::Low => 1.0,
    }
}

/// Map a value onto four buckets by inclusive lower bounds.
pub fn bucket(value: f64, critical: f64, high: f64, medium: f64) -> RiskLevel {
    if value >= critical {
        RiskLevel::Critical
    } else if value >= high {
        RiskLevel::High
    } else if value >= medium {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Simplified FAIR: loss event frequency and annual loss expectancy.
pub fn fair_ale(
    tef_most_likely: f64,
    vulnerability: f64,
    primary_loss: f64,
    secondary_loss: Option<f64>,
) -> (f64, f64) {
    let lef = tef_most_likely * vulnerability;
    let ale = lef * (primary_loss + secondary_loss.unwrap_or(0.0));
    (lef, ale)
}

/// Round half away from zero to `places` decimals.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finding_rating_buckets_on_mean() {
        use ExposureLevel as E;
        use ImpactLevel as I;
        use LikelihoodLevel as L;

        assert_eq!(finding_rating(I::Critical, L::AlmostCertain, E::HighlyExposed), RiskLevel::Critical);
        // (4+4+3)/3 = 3.67
        assert_eq!(finding_rating(I::Critical, L::AlmostCertain, E::ModeratelyExposed), RiskLevel::High);
        // (3+3+3)/3 = 3.0 is inclusive
        assert_eq!(finding_rating(I::High, L::Likely, E::ModeratelyExposed), RiskLevel::High);
        // (2+2+1)/3 = 1.67
        assert_eq!(finding_rating(I::Medium, L::Possible, E::SlightlyExposed), RiskLevel::Low);
        // (2+2+2)/3 = 2.0
        assert_eq!(finding_rating(I::Medium, L::Possible, E::Exposed), RiskLevel::Medium);
        assert_eq!(finding_rating(I::Low, L::Unlikely, E::SlightlyExposed), RiskLevel::Low);
    }

    #[test]
    fn qualitative_scores() {
        let s = RiskLevelSettings::default();
        let r = s.score_qualitative(
            LikelihoodLevel::AlmostCertain,
            ImpactLevel::Critical,
            ExposureLevel::HighlyExposed,
        );
        assert_eq!(r.score, 16.0);
        assert_eq!(r.level, RiskLevel::Critical);

        let r = s.score_qualitative(
            LikelihoodLevel::Likely,
            ImpactLevel::High,
            ExposureLevel::ModeratelyExposed,
        );
        assert!((r.score - 7.2).abs() < 1e-9);
        assert_eq!(r.level, RiskLevel::Medium);

        let r = s.score_qualitative(
            LikelihoodLevel::Unlikely,
            ImpactLevel::Low,
            ExposureLevel::SlightlyExposed,
        );
        assert_eq!(r.level, RiskLevel::Low);
    }

    #[test]
    fn fair_levels() {
        let s = RiskLevelSettings::default();
        assert_eq!(s.fair_level(1_000_000.0), RiskLevel::Critical);
        assert_eq!(s.fair_level(250_000.0), RiskLevel::High);
        assert_eq!(s.fair_level(10_000.0), RiskLevel::Medium);
        assert_eq!(s.fair_level(9_999.99), RiskLevel::Low);
    }

    #[test]
    fn settings_must_descend() {
        assert!(RiskLevelSettings::default().validate().is_ok());

        let bad = RiskLevelSettings {
            qualitative_high: 20.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = RiskLevelSettings {
            fair_medium: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn scenario_score_needs_all_inputs() {
        assert_eq!(scenario_score(Some(2.0), Some(3.0), Some(0.5)), Some(3.0));
        assert_eq!(scenario_score(Some(2.0), None, Some(0.5)), None);
    }

    #[test]
    fn fair_ale_includes_secondary() {
        let (lef, ale) = fair_ale(4.0, 0.25, 10_000.0, Some(5_000.0));
        assert_eq!(lef, 1.0);
        assert_eq!(ale, 15_000.0);
        let (_, ale) = fair_ale(4.0, 0.25, 10_000.0, None);
        assert_eq!(ale, 10_000.0);
    }

    #[test]
    fn appetite_is_inclusive() {
        let s = RiskLevelSettings::default();
        assert!(s.within_appetite(6.0));
        assert!(!s.within_appetite(6.01));
    }

    #[test]
    fn appetite_prefers_ale_when_present() {
        let s = RiskLevelSettings::default();
        // 2 x 2 x 0.4 = 1.6 qualitatively, but the ALE lands in High (10)
        assert!(s.exceeds_appetite(
            Some(250_000.0),
            LikelihoodLevel::Possible,
            ImpactLevel::Medium,
            ExposureLevel::Exposed,
        ));
        assert!(!s.exceeds_appetite(
            Some(0.0),
            LikelihoodLevel::Possible,
            ImpactLevel::Medium,
            ExposureLevel::Exposed,
        ));
        // Medium FAIR level scores 4
        assert!(!s.exceeds_appetite(
            Some(20_000.0),
            LikelihoodLevel::AlmostCertain,
            ImpactLevel::Critical,
            ExposureLevel::HighlyExposed,
        ));
        assert!(s.exceeds_appetite(
            None,
            LikelihoodLevel::Likely,
            ImpactLevel::High,
            ExposureLevel::ModeratelyExposed,
        ));
    }

    #[test]
    fn rounding() {
        assert_eq!(round_to(66.666, 2), 66.67);
        assert_eq!(round_to(87.56, 1), 87.6);
    }
}
