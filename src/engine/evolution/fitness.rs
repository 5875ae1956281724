//! Bootstrap confidence intervals over pass/fail outcomes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::schema::Fitness;

/// Scoring errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScoreError {
    #[error("Cannot score an empty outcome list")]
    Empty,
}

/// Reduces 0/1 outcomes to a median and 95% interval by resampling.
#[derive(Debug, Clone)]
pub struct BootstrapScorer {
    samples: usize,
    rng: StdRng,
}

impl BootstrapScorer {
    /// `samples` resamples per estimate, seeded for reproducible runs.
    pub fn new(samples: usize, seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(rand::random);
        Self {
            samples: samples.max(1),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Bootstrap the mean of `outcomes`.
    ///
    /// The point estimate is the median of the resampled means, not the raw
    /// sample mean.
    pub fn score(&mut self, outcomes: &[u8]) -> Result<Fitness, ScoreError> {
        if outcomes.is_empty() {
            return Err(ScoreError::Empty);
        }

        let n = outcomes.len();
        let mut means: Vec<f64> = (0..self.samples)
            .map(|_| {
                let hits: u64 = (0..n)
                    .map(|_| u64::from(outcomes[self.rng.gen_range(0..n)]))
                    .sum();
                hits as f64 / n as f64
            })
            .collect();
        means.sort_by(f64::total_cmp);

        Ok(Fitness {
            median: percentile(&means, 50.0) * 100.0,
            lower: percentile(&means, 2.5) * 100.0,
            upper: percentile(&means, 97.5) * 100.0,
        })
    }
}

/// Linear-interpolated percentile of sorted, non-empty data.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let weight = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * weight
}
