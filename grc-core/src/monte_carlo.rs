//! Monte Carlo FAIR simulation
//!
//! Each iteration samples threat event frequency and every loss component
//! from a three-point estimate, then computes one annual loss expectancy.
//! The sorted outcomes give percentiles and spread. Sampling is generic over
//! [`rand::Rng`] so callers can seed it.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::enums::text_enum;
use crate::rating::round_to;
use crate::validation::{non_negative, probability, ValidationError};

pub const DEFAULT_ITERATIONS: u32 = 10_000;
pub const MAX_ITERATIONS: u32 = 100_000;

/// Replacement costs and fines only count once they exceed this amount.
const MATERIAL_LOSS: f64 = 1000.0;

text_enum! {
    pub enum Distribution ("distribution") {
        Pert => "PERT",
        Normal => "Normal",
        LogNormal => "LogNormal",
        Uniform => "Uniform",
    }
}

/// Three-point estimate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    #[serde(default)]
    pub min: f64,
    #[serde(default)]
    pub most_likely: f64,
    #[serde(default)]
    pub max: f64,
}

impl Estimate {
    pub const fn fixed(value: f64) -> Self {
        Self {
            min: value,
            most_likely: value,
            max: value,
        }
    }

    fn validate(&self, field: &'static str) -> Result<(), ValidationError> {
        for v in [self.min, self.most_likely, self.max] {
            non_negative(field, v)?;
        }
        if !(self.min <= self.most_likely && self.most_likely <= self.max) {
            return Err(ValidationError::OutOfRange {
                field,
                reason: "must satisfy min <= most likely <= max".into(),
            });
        }
        Ok(())
    }
}

fn default_iterations() -> u32 {
    DEFAULT_ITERATIONS
}

fn default_confidence() -> f64 {
    90.0
}

fn default_vulnerability() -> f64 {
    0.5
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecondaryLoss {
    /// Secondary loss event frequency; when absent the primary LEF applies.
    #[serde(default)]
    pub frequency: Option<f64>,
    #[serde(default)]
    pub response: Estimate,
    #[serde(default)]
    pub productivity: Estimate,
    #[serde(default)]
    pub reputation: Estimate,
    #[serde(default)]
    pub competitive_advantage: Estimate,
    #[serde(default)]
    pub external_stakeholder: Estimate,
}

impl SecondaryLoss {
    fn components(&self) -> [(&'static str, &Estimate); 5] {
        [
            ("secondary response cost", &self.response),
            ("secondary productivity loss", &self.productivity),
            ("reputation damage", &self.reputation),
            ("competitive advantage loss", &self.competitive_advantage),
            ("external stakeholder loss", &self.external_stakeholder),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationInput {
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default)]
    pub distribution: Option<Distribution>,
    pub tef: Estimate,
    #[serde(default = "default_confidence")]
    pub tef_confidence: f64,
    #[serde(default = "default_vulnerability")]
    pub vulnerability: f64,
    #[serde(default)]
    pub productivity_loss: Estimate,
    #[serde(default)]
    pub response_costs: Estimate,
    #[serde(default)]
    pub replacement_cost: Estimate,
    #[serde(default)]
    pub fines: Estimate,
    #[serde(default)]
    pub secondary: Option<SecondaryLoss>,
    #[serde(default = "default_confidence")]
    pub loss_confidence: f64,
    /// Deducted from every iteration's ALE, floored at zero.
    #[serde(default)]
    pub insurance: Option<f64>,
}

impl SimulationInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.iterations == 0 || self.iterations > MAX_ITERATIONS {
            return Err(ValidationError::OutOfRange {
                field: "iterations",
                reason: format!("must be between 1 and {}", MAX_ITERATIONS),
            });
        }
        for (field, value) in [
            ("tef confidence", self.tef_confidence),
            ("loss confidence", self.loss_confidence),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ValidationError::OutOfRange {
                    field,
                    reason: "must be between 0 and 100".into(),
                });
            }
        }
        probability("vulnerability", self.vulnerability)?;
        self.tef.validate("tef")?;
        self.productivity_loss.validate("productivity loss")?;
        self.response_costs.validate("response costs")?;
        self.replacement_cost.validate("replacement cost")?;
        self.fines.validate("fines")?;
        if let Some(secondary) = &self.secondary {
            if let Some(f) = secondary.frequency {
                non_negative("secondary loss event frequency", f)?;
            }
            for (field, estimate) in secondary.components() {
                estimate.validate(field)?;
            }
        }
        if let Some(amount) = self.insurance {
            non_negative("insurance amount", amount)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Percentiles {
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
}

impl Percentiles {
    fn of(sorted: &[f64]) -> Self {
        Self {
            p10: round_to(percentile(sorted, 10), 2),
            p50: round_to(percentile(sorted, 50), 2),
            p90: round_to(percentile(sorted, 90), 2),
            p95: round_to(percentile(sorted, 95), 2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationResult {
    pub iterations: u32,
    pub distribution: Distribution,
    pub ale: Percentiles,
    pub primary_loss: Percentiles,
    pub mean_ale: f64,
    pub standard_deviation: f64,
    pub min_ale: f64,
    pub max_ale: f64,
}

/// Run the simulation with the given random source.
pub fn simulate<R: Rng + ?Sized>(
    input: &SimulationInput,
    rng: &mut R,
) -> Result<SimulationResult, ValidationError> {
    input.validate()?;
    let distribution = input.distribution.unwrap_or(Distribution::Pert);
    let n = input.iterations as usize;
    let mut ales = Vec::with_capacity(n);
    let mut primaries = Vec::with_capacity(n);

    for _ in 0..n {
        let tef = sample(rng, distribution, &input.tef, input.tef_confidence);
        let lef = tef * input.vulnerability;
        let mut loss = |e: &Estimate| sample(rng, distribution, e, input.loss_confidence);

        let mut primary = loss(&input.productivity_loss) + loss(&input.response_costs);
        let replacement = loss(&input.replacement_cost);
        if replacement > MATERIAL_LOSS {
            primary += replacement;
        }
        let fines = loss(&input.fines);
        if fines > MATERIAL_LOSS {
            primary += fines;
        }

        let mut ale = lef * primary;
        if let Some(secondary) = &input.secondary {
            let amount: f64 = secondary.components().into_iter().map(|(_, e)| loss(e)).sum();
            let frequency = secondary.frequency.filter(|f| *f > 0.0).unwrap_or(lef);
            ale += frequency * amount;
        }
        if let Some(insurance) = input.insurance.filter(|a| *a > 0.0) {
            ale = (ale - insurance).max(0.0);
        }

        ales.push(ale);
        primaries.push(primary);
    }

    ales.sort_by(f64::total_cmp);
    primaries.sort_by(f64::total_cmp);
    let mean = ales.iter().sum::<f64>() / n as f64;

    Ok(SimulationResult {
        iterations: input.iterations,
        distribution,
        ale: Percentiles::of(&ales),
        primary_loss: Percentiles::of(&primaries),
        mean_ale: round_to(mean, 2),
        standard_deviation: round_to(sample_std_dev(&ales, mean), 2),
        min_ale: round_to(ales.first().copied().unwrap_or(0.0), 2),
        max_ale: round_to(ales.last().copied().unwrap_or(0.0), 2),
    })
}

/// Nearest-rank percentile of an ascending slice; 0 when empty.
pub fn percentile(sorted: &[f64], p: u32) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (f64::from(p) / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

/// Sample standard deviation (n - 1 denominator); 0 below two values.
pub fn sample_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let squares: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (squares / (values.len() - 1) as f64).sqrt()
}

/// One draw from `estimate`, never negative.
pub fn sample<R: Rng + ?Sized>(
    rng: &mut R,
    distribution: Distribution,
    estimate: &Estimate,
    confidence: f64,
) -> f64 {
    let Estimate {
        min,
        most_likely,
        max,
    } = *estimate;
    let spread = max - min;
    if spread <= 0.0 {
        return most_likely;
    }
    let value = match distribution {
        Distribution::Pert => {
            let lambda = if confidence >= 95.0 { 4.0 } else { 2.0 };
            let alpha = 1.0 + lambda * (most_likely - min) / spread;
            let beta = 1.0 + lambda * (max - most_likely) / spread;
            min + sample_beta(rng, alpha, beta) * spread
        }
        Distribution::Normal => most_likely + standard_normal(rng) * spread / 4.0,
        Distribution::LogNormal => {
            if most_likely <= 0.0 {
                return most_likely;
            }
            let log_sd = (spread / 4.0).ln().abs();
            (most_likely.ln() + standard_normal(rng) * log_sd).exp()
        }
        Distribution::Uniform => min + rng.gen::<f64>() * spread,
    };
    value.max(0.0)
}

/// Rejection sampling; the density bound is 1 for shape parameters >= 1.
fn sample_beta<R: Rng + ?Sized>(rng: &mut R, alpha: f64, beta: f64) -> f64 {
    loop {
        let x: f64 = rng.gen();
        let y: f64 = rng.gen();
        if y <= x.powf(alpha - 1.0) * (1.0 - x).powf(beta - 1.0) {
            return x;
        }
    }
}

/// Box-Muller.
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1 = 1.0 - rng.gen::<f64>();
    let u2 = 1.0 - rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).sin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fixed_input() -> SimulationInput {
        SimulationInput {
            iterations: 200,
            distribution: None,
            tef: Estimate::fixed(2.0),
            tef_confidence: 90.0,
            vulnerability: 0.5,
            productivity_loss: Estimate::fixed(10_000.0),
            response_costs: Estimate::fixed(5_000.0),
            replacement_cost: Estimate::fixed(800.0),
            fines: Estimate::fixed(20_000.0),
            secondary: None,
            loss_confidence: 90.0,
            insurance: None,
        }
    }

    #[test]
    fn percentile_uses_nearest_rank() {
        let sorted: Vec<f64> = (1..=10).map(f64::from).collect();
        assert_eq!(percentile(&sorted, 10), 1.0);
        assert_eq!(percentile(&sorted, 50), 5.0);
        assert_eq!(percentile(&sorted, 95), 10.0);
        assert_eq!(percentile(&[], 50), 0.0);
        assert_eq!(percentile(&[7.0], 10), 7.0);
    }

    #[test]
    fn std_dev_is_sample_based() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let sd = sample_std_dev(&values, 5.0);
        assert!((sd - 2.138).abs() < 0.001, "{}", sd);
        assert_eq!(sample_std_dev(&[3.0], 3.0), 0.0);
    }

    #[test]
    fn fixed_estimates_give_a_point_result() {
        let mut rng = StdRng::seed_from_u64(7);
        let result = simulate(&fixed_input(), &mut rng).unwrap();
        // lef 1.0; replacement stays under the materiality floor
        assert_eq!(result.ale.p50, 35_000.0);
        assert_eq!(result.ale.p10, result.ale.p95);
        assert_eq!(result.primary_loss.p90, 35_000.0);
        assert_eq!(result.mean_ale, 35_000.0);
        assert_eq!(result.standard_deviation, 0.0);
        assert_eq!(result.distribution, Distribution::Pert);
    }

    #[test]
    fn insurance_is_floored_at_zero() {
        let mut input = fixed_input();
        input.insurance = Some(1_000_000.0);
        let result = simulate(&input, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(result.max_ale, 0.0);

        input.insurance = Some(5_000.0);
        let result = simulate(&input, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(result.min_ale, 30_000.0);
    }

    #[test]
    fn secondary_loss_uses_its_own_frequency() {
        let mut input = fixed_input();
        input.secondary = Some(SecondaryLoss {
            frequency: Some(0.1),
            reputation: Estimate::fixed(50_000.0),
            ..Default::default()
        });
        let result = simulate(&input, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(result.mean_ale, 40_000.0);

        input.secondary = Some(SecondaryLoss {
            frequency: None,
            reputation: Estimate::fixed(50_000.0),
            ..Default::default()
        });
        let result = simulate(&input, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(result.mean_ale, 85_000.0);
    }

    #[test]
    fn samples_stay_within_bounds() {
        let estimate = Estimate {
            min: 100.0,
            most_likely: 400.0,
            max: 1000.0,
        };
        let mut rng = StdRng::seed_from_u64(42);
        for distribution in [Distribution::Pert, Distribution::Uniform] {
            for _ in 0..500 {
                let v = sample(&mut rng, distribution, &estimate, 90.0);
                assert!((100.0..=1000.0).contains(&v), "{} {}", distribution, v);
            }
        }
        for _ in 0..500 {
            assert!(sample(&mut rng, Distribution::Normal, &estimate, 90.0) >= 0.0);
            assert!(sample(&mut rng, Distribution::LogNormal, &estimate, 90.0) > 0.0);
        }
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let mut input = fixed_input();
        input.tef = Estimate {
            min: 0.5,
            most_likely: 2.0,
            max: 6.0,
        };
        input.distribution = Some(Distribution::Normal);
        let a = simulate(&input, &mut StdRng::seed_from_u64(99)).unwrap();
        let b = simulate(&input, &mut StdRng::seed_from_u64(99)).unwrap();
        assert_eq!(a, b);
        assert!(a.ale.p10 <= a.ale.p50 && a.ale.p50 <= a.ale.p90 && a.ale.p90 <= a.ale.p95);
    }

    #[test]
    fn rejects_bad_input() {
        let mut input = fixed_input();
        input.iterations = 0;
        assert!(matches!(
            simulate(&input, &mut StdRng::seed_from_u64(0)),
            Err(ValidationError::OutOfRange { field: "iterations", .. })
        ));

        let mut input = fixed_input();
        input.tef = Estimate {
            min: 5.0,
            most_likely: 1.0,
            max: 10.0,
        };
        assert!(matches!(
            input.validate(),
            Err(ValidationError::OutOfRange { field: "tef", .. })
        ));

        let mut input = fixed_input();
        input.vulnerability = 1.5;
        assert!(input.validate().is_err());
    }

    #[test]
    fn input_defaults_from_json() {
        let input: SimulationInput = serde_json::from_str(
            r#"{"tef": {"min": 1, "most_likely": 2, "max": 4}, "distribution": "pert"}"#,
        )
        .unwrap();
        assert_eq!(input.iterations, DEFAULT_ITERATIONS);
        assert_eq!(input.tef_confidence, 90.0);
        assert_eq!(input.vulnerability, 0.5);
        assert_eq!(input.distribution, Some(Distribution::Pert));
        assert!(input.validate().is_ok());
    }
}
