//! # Bootstrap Percentile Intervals
//!
//! A sequential nonparametric bootstrap over observation tables. Each resample
//! is an independent copy of the table drawn with replacement; the estimator is
//! re-run on it and its output vector recorded. Estimation failures on individual
//! resamples are logged and counted, never fatal to the loop.

use crate::data::ObservationTable;
use ndarray::{Array1, Array2, ArrayView1};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub num_bootstraps: usize,
    /// Two-sided miscoverage; the interval spans the `alpha/2` and `1 - alpha/2` quantiles.
    pub alpha: f64,
    pub seed: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            num_bootstraps: 200,
            alpha: 0.05,
            seed: 42,
        }
    }
}

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("At least one bootstrap resample is required.")]
    NoResamples,
    #[error("The interval level alpha must lie strictly between 0 and 1, got {0}.")]
    InvalidAlpha(f64),
    #[error("All {attempts} bootstrap resamples failed. The last failure was: {last}")]
    AllResamplesFailed { attempts: usize, last: String },
    #[error("Bootstrap replicate {index} has {found} coordinates, but earlier ones have {expected}.")]
    InconsistentReplicate {
        index: usize,
        found: usize,
        expected: usize,
    },
}

/// Per-coordinate percentile interval together with the replicates behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapInterval {
    pub lower: Array1<f64>,
    pub upper: Array1<f64>,
    /// One row per successful resample, in drawing order.
    pub replicates: Array2<f64>,
    pub failures: usize,
    pub alpha: f64,
}

impl BootstrapInterval {
    pub fn successes(&self) -> usize {
        self.replicates.nrows()
    }

    /// True when every coordinate of `point` lies inside its interval.
    pub fn contains(&self, point: ArrayView1<f64>) -> bool {
        point.len() == self.lower.len()
            && point
                .iter()
                .zip(self.lower.iter().zip(self.upper.iter()))
                .all(|(&p, (&lo, &hi))| lo <= p && p <= hi)
    }
}

/// The `q`-quantile of ascending `sorted`, interpolating linearly between
/// neighbouring order statistics. `q` is clamped to [0, 1].
///
/// # Panics
///
/// If `sorted` is empty.
pub fn quantile_linear_sorted(sorted: &[f64], q: f64) -> f64 {
    let last = sorted.len() - 1;
    let rank = q.clamp(0.0, 1.0) * last as f64;
    let below = rank.floor() as usize;
    let above = (below + 1).min(last);
    sorted[below] + (rank - below as f64) * (sorted[above] - sorted[below])
}

/// Resamples `table` `config.num_bootstraps` times and reports the percentile
/// interval of `estimator`'s output.
pub fn bootstrap_interval<E, F>(
    table: &ObservationTable,
    config: &BootstrapConfig,
    mut estimator: F,
) -> Result<BootstrapInterval, BootstrapError>
where
    E: Display,
    F: FnMut(&ObservationTable) -> Result<Array1<f64>, E>,
{
    if config.num_bootstraps == 0 {
        return Err(BootstrapError::NoResamples);
    }
    if !(config.alpha > 0.0 && config.alpha < 1.0) {
        return Err(BootstrapError::InvalidAlpha(config.alpha));
    }

    log::info!(
        "Running {} bootstrap resamples of {} rows (seed {})",
        config.num_bootstraps,
        table.n_rows(),
        config.seed
    );

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut replicates: Vec<Array1<f64>> = Vec::with_capacity(config.num_bootstraps);
    let mut failures = 0usize;
    let mut last_failure = None;

    for b in 0..config.num_bootstraps {
        let resample = table.resample(&mut rng);
        match estimator(&resample) {
            Ok(values) => {
                if let Some(first) = replicates.first() {
                    if first.len() != values.len() {
                        return Err(BootstrapError::InconsistentReplicate {
                            index: b,
                            found: values.len(),
                            expected: first.len(),
                        });
                    }
                }
                replicates.push(values);
            }
            Err(e) => {
                log::warn!("Bootstrap resample {} failed: {e}", b + 1);
                failures += 1;
                last_failure = Some(e.to_string());
            }
        }
    }

    if replicates.is_empty() {
        return Err(BootstrapError::AllResamplesFailed {
            attempts: config.num_bootstraps,
            last: last_failure.unwrap_or_default(),
        });
    }
    if failures > 0 {
        log::warn!(
            "{failures} of {} bootstrap resamples failed and were left out of the interval",
            config.num_bootstraps
        );
    }

    let dim = replicates[0].len();
    let mut matrix = Array2::zeros((replicates.len(), dim));
    for (mut row, values) in matrix.rows_mut().into_iter().zip(replicates.iter()) {
        row.assign(values);
    }

    let mut lower = Array1::zeros(dim);
    let mut upper = Array1::zeros(dim);
    for (k, column) in matrix.columns().into_iter().enumerate() {
        let mut sorted = column.to_vec();
        sorted.sort_by(f64::total_cmp);
        lower[k] = quantile_linear_sorted(&sorted, config.alpha / 2.0);
        upper[k] = quantile_linear_sorted(&sorted, 1.0 - config.alpha / 2.0);
    }

    Ok(BootstrapInterval {
        lower,
        upper,
        replicates: matrix,
        failures,
        alpha: config.alpha,
    })
}
