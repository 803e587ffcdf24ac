//! Risk matrix rules: level validation, cell generation, lookups and seeds

use serde::{Deserialize, Serialize};

use crate::enums::{LevelType, MatrixType, RiskLevel};
use crate::rating::{bucket, round_to};
use crate::sla::SlaHours;
use crate::validation::ValidationError;

/// Supported matrix sizes
pub const MATRIX_SIZES: [i32; 3] = [3, 4, 5];

/// One configured axis value of a matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSpec {
    pub level_type: LevelType,
    pub level_value: i32,
    pub name: String,
    pub description: String,
    pub color: String,
    pub multiplier: Option<f64>,
}

impl LevelSpec {
    fn new(level_type: LevelType, level_value: i32, name: &str, description: &str, color: &str) -> Self {
        Self {
            level_type,
            level_value,
            name: name.to_owned(),
            description: description.to_owned(),
            color: color.to_owned(),
            multiplier: None,
        }
    }

    fn with_multiplier(mut self, m: f64) -> Self {
        self.multiplier = Some(m);
        self
    }

    /// Weight used for exposure; falls back to the level value.
    pub fn weight(&self) -> f64 {
        self.multiplier.unwrap_or(f64::from(self.level_value))
    }
}

/// Generated cell; axis positions are 1-based indices into the sorted levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSpec {
    pub impact_level: i32,
    pub likelihood_level: i32,
    pub exposure_level: Option<i32>,
    pub score: f64,
    pub resulting_level: RiskLevel,
    pub color: String,
}

/// Qualitative thresholds carried on a matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatrixThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
    pub risk_appetite: f64,
}

impl Default for MatrixThresholds {
    fn default() -> Self {
        Self {
            medium: 4.0,
            high: 10.0,
            critical: 16.0,
            risk_appetite: 6.0,
        }
    }
}

/// Result of an ad-hoc score calculation against a matrix's thresholds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskCalculation {
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub within_risk_appetite: bool,
    pub risk_appetite_status: &'static str,
}

pub fn validate_size(size: i32) -> Result<(), ValidationError> {
    if MATRIX_SIZES.contains(&size) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field: "matrix size",
            reason: "must be 3, 4 or 5".into(),
        })
    }
}

/// Each required axis must have exactly `size` levels.
pub fn validate_levels(
    size: i32,
    matrix_type: MatrixType,
    levels: &[LevelSpec],
) -> Result<(), ValidationError> {
    validate_size(size)?;
    let count = |t: LevelType| levels.iter().filter(|l| l.level_type == t).count() as i32;

    let mut required = vec![
        (LevelType::Impact, "impact levels"),
        (LevelType::Likelihood, "likelihood levels"),
    ];
    if matrix_type == MatrixType::ImpactLikelihoodExposure {
        required.push((LevelType::Exposure, "exposure levels"));
    }

    for (level_type, field) in required {
        if count(level_type) != size {
            return Err(ValidationError::OutOfRange {
                field,
                reason: format!("must contain exactly {} entries", size),
            });
        }
    }
    Ok(())
}

/// Bucket a cell score by its share of `size²`.
pub fn level_from_score(score: f64, size: i32) -> RiskLevel {
    let max = f64::from(size * size);
    bucket(score / max, 0.8, 0.6, 0.4)
}

fn sorted(levels: &[LevelSpec], t: LevelType) -> Vec<&LevelSpec> {
    let mut v: Vec<&LevelSpec> = levels.iter().filter(|l| l.level_type == t).collect();
    v.sort_by_key(|l| l.level_value);
    v
}

/// Build every cell of a matrix from its levels.
pub fn generate_cells(size: i32, matrix_type: MatrixType, levels: &[LevelSpec]) -> Vec<CellSpec> {
    let impacts = sorted(levels, LevelType::Impact);
    let likelihoods = sorted(levels, LevelType::Likelihood);
    let exposures = sorted(levels, LevelType::Exposure);

    let mut cells = Vec::new();
    for (i, impact) in impacts.iter().enumerate() {
        for (l, likelihood) in likelihoods.iter().enumerate() {
            let base = f64::from(impact.level_value * likelihood.level_value);
            match matrix_type {
                MatrixType::ImpactLikelihood => {
                    cells.push(cell(i as i32 + 1, l as i32 + 1, None, base, size));
                }
                MatrixType::ImpactLikelihoodExposure => {
                    for (e, exposure) in exposures.iter().enumerate() {
                        let score = base * exposure.weight();
                        cells.push(cell(i as i32 + 1, l as i32 + 1, Some(e as i32 + 1), score, size));
                    }
                }
            }
        }
    }
    cells
}

fn cell(impact: i32, likelihood: i32, exposure: Option<i32>, score: f64, size: i32) -> CellSpec {
    let level = level_from_score(score, size);
    CellSpec {
        impact_level: impact,
        likelihood_level: likelihood,
        exposure_level: exposure,
        score,
        resulting_level: level,
        color: level.color().to_owned(),
    }
}

/// Find the cell for the given coordinates; missing cells read as Medium with a zero score.
pub fn lookup(
    cells: &[CellSpec],
    impact: i32,
    likelihood: i32,
    exposure: Option<i32>,
) -> (RiskLevel, f64) {
    cells
        .iter()
        .find(|c| {
            c.impact_level == impact
                && c.likelihood_level == likelihood
                && c.exposure_level == exposure
        })
        .map(|c| (c.resulting_level, c.score))
        .unwrap_or((RiskLevel::Medium, 0.0))
}

/// Score raw inputs against thresholds, rounding the score to two places.
pub fn calculate_risk(
    matrix_type: MatrixType,
    impact: Option<f64>,
    likelihood: Option<f64>,
    exposure: Option<f64>,
    thresholds: &MatrixThresholds,
) -> Result<RiskCalculation, ValidationError> {
    let (impact, likelihood) = match (impact, likelihood) {
        (Some(i), Some(l)) => (i, l),
        _ => {
            return Err(ValidationError::Empty {
                field: "impact and likelihood",
            })
        }
    };
    let score = match matrix_type {
        MatrixType::ImpactLikelihood => impact * likelihood,
        MatrixType::ImpactLikelihoodExposure => {
            let exposure = exposure.ok_or(ValidationError::Empty { field: "exposure" })?;
            impact * likelihood * exposure
        }
    };

    let within = score <= thresholds.risk_appetite;
    Ok(RiskCalculation {
        risk_score: round_to(score, 2),
        risk_level: bucket(score, thresholds.critical, thresholds.high, thresholds.medium),
        within_risk_appetite: within,
        risk_appetite_status: if within { "Within Appetite" } else { "Above Appetite" },
    })
}

/// Built-in matrix definition used by seeding.
#[derive(Debug, Clone)]
pub struct MatrixSeed {
    pub name: &'static str,
    pub description: &'static str,
    pub size: i32,
    pub matrix_type: MatrixType,
    pub is_default: bool,
    pub levels: Vec<LevelSpec>,
}

impl MatrixSeed {
    pub fn thresholds(&self) -> MatrixThresholds {
        MatrixThresholds::default()
    }

    pub fn sla(&self) -> SlaHours {
        SlaHours::default()
    }
}

/// The three matrices every fresh installation starts with.
pub fn default_seeds() -> Vec<MatrixSeed> {
    use LevelType::{Exposure, Impact, Likelihood};

    let five = vec![
        LevelSpec::new(Impact, 1, "Very Low", "Minimal impact", "#28a745"),
        LevelSpec::new(Impact, 2, "Low", "Minor impact", "#6f42c1"),
        LevelSpec::new(Impact, 3, "Medium", "Moderate impact", "#ffc107"),
        LevelSpec::new(Impact, 4, "High", "Major impact", "#fd7e14"),
        LevelSpec::new(Impact, 5, "Very High", "Severe impact", "#dc3545"),
        LevelSpec::new(Likelihood, 1, "Very Unlikely", "Less than 5% chance", "#28a745"),
        LevelSpec::new(Likelihood, 2, "Unlikely", "5-25% chance", "#6f42c1"),
        LevelSpec::new(Likelihood, 3, "Possible", "25-50% chance", "#ffc107"),
        LevelSpec::new(Likelihood, 4, "Likely", "50-75% chance", "#fd7e14"),
        LevelSpec::new(Likelihood, 5, "Very Likely", "More than 75% chance", "#dc3545"),
        LevelSpec::new(Exposure, 1, "Slightly Exposed", "Minimal exposure", "#28a745").with_multiplier(0.2),
        LevelSpec::new(Exposure, 2, "Exposed", "Limited exposure", "#6f42c1").with_multiplier(0.4),
        LevelSpec::new(Exposure, 3, "Moderately Exposed", "Moderate exposure", "#ffc107").with_multiplier(0.8),
        LevelSpec::new(Exposure, 4, "Highly Exposed", "High exposure", "#fd7e14").with_multiplier(1.0),
        LevelSpec::new(Exposure, 5, "Extremely Exposed", "Maximum exposure", "#dc3545").with_multiplier(1.2),
    ];

    let three = vec![
        LevelSpec::new(Impact, 1, "Low", "Minor impact", "#28a745"),
        LevelSpec::new(Impact, 2, "Medium", "Moderate impact", "#ffc107"),
        LevelSpec::new(Impact, 3, "High", "Major impact", "#dc3545"),
        LevelSpec::new(Likelihood, 1, "Unlikely", "Low probability", "#28a745"),
        LevelSpec::new(Likelihood, 2, "Possible", "Medium probability", "#ffc107"),
        LevelSpec::new(Likelihood, 3, "Likely", "High probability", "#dc3545"),
    ];

    let four = vec![
        LevelSpec::new(Impact, 1, "Very Low", "Minimal impact", "#28a745"),
        LevelSpec::new(Impact, 2, "Low", "Minor impact", "#20c997"),
        LevelSpec::new(Impact, 3, "High", "Major impact", "#fd7e14"),
        LevelSpec::new(Impact, 4, "Very High", "Severe impact", "#dc3545"),
        LevelSpec::new(Likelihood, 1, "Very Unlikely", "Very low probability", "#28a745"),
        LevelSpec::new(Likelihood, 2, "Unlikely", "Low probability", "#20c997"),
        LevelSpec::new(Likelihood, 3, "Likely", "High probability", "#fd7e14"),
        LevelSpec::new(Likelihood, 4, "Very Likely", "Very high probability", "#dc3545"),
        LevelSpec::new(Exposure, 1, "Slightly Exposed", "Minimal exposure", "#28a745").with_multiplier(0.25),
        LevelSpec::new(Exposure, 2, "Exposed", "Limited exposure", "#20c997").with_multiplier(0.5),
        LevelSpec::new(Exposure, 3, "Highly Exposed", "High exposure", "#fd7e14").with_multiplier(0.75),
        LevelSpec::new(Exposure, 4, "Extremely Exposed", "Maximum exposure", "#dc3545").with_multiplier(1.0),
    ];

    vec![
        MatrixSeed {
            name: "Default 5×5 Impact × Likelihood × Exposure",
            description: "Traditional risk assessment matrix with exposure factor",
            size: 5,
            matrix_type: MatrixType::ImpactLikelihoodExposure,
            is_default: true,
            levels: five,
        },
        MatrixSeed {
            name: "Simple 3×3 Impact × Likelihood",
            description: "Basic risk matrix for quick assessments",
            size: 3,
            matrix_type: MatrixType::ImpactLikelihood,
            is_default: false,
            levels: three,
        },
        MatrixSeed {
            name: "Standard 4×4 Impact × Likelihood × Exposure",
            description: "Balanced 4x4 risk matrix with exposure factor",
            size: 4,
            matrix_type: MatrixType::ImpactLikelihoodExposure,
            is_default: false,
            levels: four,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_are_valid() {
        for seed in default_seeds() {
            validate_levels(seed.size, seed.matrix_type, &seed.levels)
                .unwrap_or_else(|e| panic!("{}: {}", seed.name, e));
        }
        assert_eq!(default_seeds().iter().filter(|s| s.is_default).count(), 1);
    }

    #[test]
    fn validation_counts_levels_per_axis() {
        let seed = &default_seeds()[0];
        let mut levels = seed.levels.clone();
        levels.retain(|l| !(l.level_type == LevelType::Exposure && l.level_value == 5));
        assert!(validate_levels(5, MatrixType::ImpactLikelihoodExposure, &levels).is_err());
        // Exposure is ignored for 2D matrices
        let two_d: Vec<_> = levels
            .into_iter()
            .filter(|l| l.level_type != LevelType::Exposure)
            .collect();
        assert!(validate_levels(5, MatrixType::ImpactLikelihood, &two_d).is_ok());
        assert!(validate_levels(6, MatrixType::ImpactLikelihood, &two_d).is_err());
    }

    #[test]
    fn two_dimensional_cells() {
        let seed = &default_seeds()[1];
        let cells = generate_cells(seed.size, seed.matrix_type, &seed.levels);
        assert_eq!(cells.len(), 9);

        // 3×3 = 9 / 9 = 1.0
        assert_eq!(lookup(&cells, 3, 3, None), (RiskLevel::Critical, 9.0));
        // 2×3 = 6 / 9 = 0.67
        assert_eq!(lookup(&cells, 2, 3, None), (RiskLevel::High, 6.0));
        // 2×2 = 4 / 9 = 0.44
        assert_eq!(lookup(&cells, 2, 2, None), (RiskLevel::Medium, 4.0));
        assert_eq!(lookup(&cells, 1, 3, None), (RiskLevel::Low, 3.0));
        assert_eq!(cells[0].color, "#28a745");
    }

    #[test]
    fn three_dimensional_cells_use_multiplier() {
        let seed = &default_seeds()[0];
        let cells = generate_cells(seed.size, seed.matrix_type, &seed.levels);
        assert_eq!(cells.len(), 125);

        let (level, score) = lookup(&cells, 5, 5, Some(5));
        assert!((score - 30.0).abs() < 1e-9);
        assert_eq!(level, RiskLevel::Critical);

        let (level, score) = lookup(&cells, 5, 5, Some(1));
        assert!((score - 5.0).abs() < 1e-9);
        assert_eq!(level, RiskLevel::Low);
    }

    #[test]
    fn exposure_without_multiplier_uses_value() {
        let mut levels = default_seeds()[2].levels.clone();
        for l in levels.iter_mut() {
            l.multiplier = None;
        }
        let cells = generate_cells(4, MatrixType::ImpactLikelihoodExposure, &levels);
        let (_, score) = lookup(&cells, 1, 1, Some(3));
        assert_eq!(score, 3.0);
    }

    #[test]
    fn missing_cell_defaults_to_medium() {
        assert_eq!(lookup(&[], 1, 1, None), (RiskLevel::Medium, 0.0));
    }

    #[test]
    fn calculate_two_and_three_dimensional() {
        let t = MatrixThresholds::default();
        let r = calculate_risk(MatrixType::ImpactLikelihood, Some(4.0), Some(4.0), None, &t).unwrap();
        assert_eq!(r.risk_score, 16.0);
        assert_eq!(r.risk_level, RiskLevel::Critical);
        assert_eq!(r.risk_appetite_status, "Above Appetite");

        let r = calculate_risk(
            MatrixType::ImpactLikelihoodExposure,
            Some(3.0),
            Some(2.0),
            Some(0.333),
            &t,
        )
        .unwrap();
        assert_eq!(r.risk_score, 2.0);
        assert_eq!(r.risk_level, RiskLevel::Low);
        assert!(r.within_risk_appetite);
    }

    #[test]
    fn calculate_requires_inputs() {
        let t = MatrixThresholds::default();
        assert!(calculate_risk(MatrixType::ImpactLikelihood, Some(1.0), None, None, &t).is_err());
        assert!(
            calculate_risk(MatrixType::ImpactLikelihoodExposure, Some(1.0), Some(1.0), None, &t)
                .is_err()
        );
    }
}
