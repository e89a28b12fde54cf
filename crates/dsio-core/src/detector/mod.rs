//! Anomaly detector contract and the built-in variants.
//!
//! Every detector scores a one-dimensional series. Callers hold a
//! `Box<dyn AnomalyDetector>` resolved through the
//! [`DetectorRegistry`](crate::registry::DetectorRegistry) and never see the
//! concrete type. Each instance owns its model state; nothing is shared
//! between instances.

pub mod gaussian;
pub mod lof;
pub mod percentile;

use crate::error::{DsioError, Result};
use crate::formulae::decision_rule;

pub use gaussian::GaussianTracker;
pub use lof::{LofTracker, NeighborIndex};
pub use percentile::PercentileTracker;

/// Online anomaly detector over a scalar series.
pub trait AnomalyDetector: Send {
    /// Registry name of the variant.
    fn name(&self) -> &'static str;

    /// Resets the model from a training sample.
    fn fit(&mut self, x: &[f64]) -> Result<()>;

    /// Revises the model with a mini-batch. Fails with `NotFitted` before `fit`.
    fn update(&mut self, x: &[f64]) -> Result<()>;

    /// One score per element. Does not mutate the model.
    fn score_anomaly(&self, x: &[f64]) -> Result<Vec<f64>>;

    fn is_fitted(&self) -> bool;

    /// Decision threshold applied by [`flag_anomaly`](Self::flag_anomaly).
    fn threshold(&self) -> f64;

    fn two_sided(&self) -> bool {
        true
    }

    /// One flag per element, derived from the scores with [`decision_rule`].
    fn flag_anomaly(&self, x: &[f64]) -> Result<Vec<bool>> {
        let threshold = self.threshold();
        let two_sided = self.two_sided();
        Ok(self
            .score_anomaly(x)?
            .into_iter()
            .map(|score| decision_rule(score, threshold, two_sided))
            .collect())
    }
}

pub(crate) fn check_threshold(threshold: f64) -> Result<()> {
    if threshold > 0.0 && threshold < 1.0 {
        Ok(())
    } else {
        Err(DsioError::invalid_parameter(
            "threshold",
            format!("must lie in (0, 1), got {}", threshold),
        ))
    }
}

pub(crate) fn check_window_size(window_size: usize) -> Result<()> {
    if window_size == 0 {
        return Err(DsioError::invalid_parameter(
            "window_size",
            "must be a positive integer",
        ));
    }
    Ok(())
}
