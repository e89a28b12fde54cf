use serde::{Deserialize, Serialize};

use super::{AnomalyDetector, check_threshold, check_window_size};
use crate::config::DetectorParams;
use crate::error::{DsioError, Result};
use crate::formulae::{percentile_of_score, rolling_window_update, validate_sample};

pub const NAME: &str = "percentile1d";
pub const DEFAULT_WINDOW_SIZE: usize = 100;

/// Percentile rank against a rolling window of recent values.
///
/// Scores near 0 or 1 sit in the tails of the retained window.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PercentileTracker {
    window_size: usize,
    threshold: f64,
    sample: Option<Vec<f64>>,
}

impl PercentileTracker {
    pub fn new(window_size: usize, threshold: f64) -> Result<Self> {
        check_window_size(window_size)?;
        check_threshold(threshold)?;
        Ok(Self {
            window_size,
            threshold,
            sample: None,
        })
    }

    pub fn from_params(params: &DetectorParams) -> Result<Self> {
        Self::new(
            params.window_size.unwrap_or(DEFAULT_WINDOW_SIZE),
            params.threshold,
        )
    }

    /// Retained window, in arrival order.
    pub fn sample(&self) -> Option<&[f64]> {
        self.sample.as_deref()
    }
}

impl Default for PercentileTracker {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            threshold: 0.99,
            sample: None,
        }
    }
}

impl AnomalyDetector for PercentileTracker {
    fn name(&self) -> &'static str {
        NAME
    }

    fn fit(&mut self, x: &[f64]) -> Result<()> {
        validate_sample(x)?;
        let keep = x.len().min(self.window_size);
        self.sample = Some(x[..keep].to_vec());
        Ok(())
    }

    fn update(&mut self, x: &[f64]) -> Result<()> {
        let sample = self.sample.as_ref().ok_or(DsioError::NotFitted(NAME))?;
        validate_sample(x)?;
        self.sample = Some(rolling_window_update(sample, x, self.window_size));
        Ok(())
    }

    fn score_anomaly(&self, x: &[f64]) -> Result<Vec<f64>> {
        let sample = self.sample.as_ref().ok_or(DsioError::NotFitted(NAME))?;
        Ok(x.iter().map(|z| percentile_of_score(sample, *z)).collect())
    }

    fn is_fitted(&self) -> bool {
        self.sample.is_some()
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }
}
