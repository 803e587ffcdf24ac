//! FAIR-style attack chain calculation
//!
//! A chain starts at a threat event, passes through ordered vulnerability
//! steps and ends in a loss event. Each estimate is a (min, most likely, max)
//! triple collapsed to its mean.

use serde::{Deserialize, Serialize};

/// Three-point estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub min: f64,
    pub most_likely: f64,
    pub max: f64,
}

impl Estimate {
    pub fn new(min: f64, most_likely: f64, max: f64) -> Self {
        Self { min, most_likely, max }
    }

    pub fn mean(&self) -> f64 {
        (self.min + self.max + self.most_likely) / 3.0
    }

    /// min ≤ most likely ≤ max
    pub fn is_ordered(&self) -> bool {
        self.min <= self.most_likely && self.most_likely <= self.max
    }
}

/// Probability recorded against one step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepResult {
    pub step_probability: f64,
    pub cumulative_probability: f64,
}

/// Annual loss figures; only present when a primary loss is known.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AleRange {
    pub min: f64,
    pub most_likely: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainResult {
    pub tef: f64,
    pub chain_probability: f64,
    pub steps: Vec<StepResult>,
    pub lef_min: f64,
    pub lef_most_likely: f64,
    pub lef_max: f64,
    pub ale: Option<AleRange>,
}

/// Run the chain: `tef` from the threat event, `steps` in order, and the loss
/// event's most-likely primary and secondary magnitudes.
pub fn calculate(
    tef: Estimate,
    steps: &[Estimate],
    primary_loss_most_likely: Option<f64>,
    secondary_loss_most_likely: Option<f64>,
) -> ChainResult {
    let tef_mean = tef.mean();

    let mut cumulative = 1.0;
    let steps: Vec<StepResult> = steps
        .iter()
        .map(|s| {
            let p = s.mean();
            cumulative *= p;
            StepResult {
                step_probability: p,
                cumulative_probability: cumulative,
            }
        })
        .collect();

    let lef = tef_mean * cumulative;
    let lef_min = tef.min * cumulative * 0.8;
    let lef_max = tef.max * cumulative * 1.2;

    let ale = primary_loss_most_likely.map(|primary| {
        let total = primary + secondary_loss_most_likely.unwrap_or(0.0);
        AleRange {
            min: lef_min * total,
            most_likely: lef * total,
            max: lef_max * total,
        }
    });

    ChainResult {
        tef: tef_mean,
        chain_probability: cumulative,
        steps,
        lef_min,
        lef_most_likely: lef,
        lef_max,
        ale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn chain_multiplies_step_means() {
        let tef = Estimate::new(2.0, 3.0, 4.0);
        let steps = [Estimate::new(0.4, 0.5, 0.6), Estimate::new(0.1, 0.2, 0.3)];
        let r = calculate(tef, &steps, Some(1000.0), Some(500.0));

        assert!(close(r.tef, 3.0));
        assert!(close(r.steps[0].cumulative_probability, 0.5));
        assert!(close(r.steps[1].step_probability, 0.2));
        assert!(close(r.chain_probability, 0.1));
        assert!(close(r.lef_most_likely, 0.3));
        assert!(close(r.lef_min, 2.0 * 0.1 * 0.8));
        assert!(close(r.lef_max, 4.0 * 0.1 * 1.2));

        let ale = r.ale.unwrap();
        assert!(close(ale.most_likely, 450.0));
        assert!(close(ale.min, 0.16 * 1500.0));
        assert!(close(ale.max, 0.48 * 1500.0));
    }

    #[test]
    fn no_steps_means_certain_chain() {
        let r = calculate(Estimate::new(1.0, 1.0, 1.0), &[], None, None);
        assert_eq!(r.chain_probability, 1.0);
        assert_eq!(r.lef_most_likely, 1.0);
        assert!(r.ale.is_none());
    }

    #[test]
    fn missing_secondary_counts_as_zero() {
        let r = calculate(Estimate::new(1.0, 1.0, 1.0), &[], Some(200.0), None);
        assert!(close(r.ale.unwrap().most_likely, 200.0));
    }

    #[test]
    fn estimate_ordering() {
        assert!(Estimate::new(1.0, 2.0, 3.0).is_ordered());
        assert!(!Estimate::new(3.0, 2.0, 1.0).is_ordered());
    }
}
