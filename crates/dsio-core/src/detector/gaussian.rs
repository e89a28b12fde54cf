use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{AnomalyDetector, check_threshold};
use crate::config::DetectorParams;
use crate::error::{DsioError, Result};
use crate::formulae::{
    convex_combination, mean, normal_cdf, population_std, sample_std, update_effective_sample_size,
    validate_sample,
};

pub const NAME: &str = "gaussian1d";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct GaussianState {
    pub mu: f64,
    pub std: f64,
    pub ess: f64,
}

/// Running mean/deviation tracker.
///
/// The mean is blended across batches through the effective sample size, the
/// deviation is taken from the latest batch alone. Scores are the normal CDF
/// of the absolute z-score, so extreme deviations approach 1.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GaussianTracker {
    forgetting_factor: f64,
    threshold: f64,
    state: Option<GaussianState>,
}

impl GaussianTracker {
    pub fn new(forgetting_factor: f64, threshold: f64) -> Result<Self> {
        if !(forgetting_factor > 0.0 && forgetting_factor <= 1.0) {
            return Err(DsioError::invalid_parameter(
                "forgetting_factor",
                format!("must lie in (0, 1], got {}", forgetting_factor),
            ));
        }
        check_threshold(threshold)?;
        Ok(Self {
            forgetting_factor,
            threshold,
            state: None,
        })
    }

    pub fn from_params(params: &DetectorParams) -> Result<Self> {
        Self::new(params.forgetting_factor, params.threshold)
    }

    pub fn state(&self) -> Option<GaussianState> {
        self.state
    }

    fn checked_std(std: f64) -> Result<f64> {
        if std.is_finite() && std > 0.0 {
            Ok(std)
        } else {
            Err(DsioError::NumericError {
                detector: NAME,
                reason: format!("standard deviation is {}", std),
            })
        }
    }
}

impl Default for GaussianTracker {
    fn default() -> Self {
        Self {
            forgetting_factor: 0.9,
            threshold: 0.99,
            state: None,
        }
    }
}

impl AnomalyDetector for GaussianTracker {
    fn name(&self) -> &'static str {
        NAME
    }

    fn fit(&mut self, x: &[f64]) -> Result<()> {
        validate_sample(x)?;
        let std = Self::checked_std(sample_std(x))?;
        self.state = Some(GaussianState {
            mu: mean(x),
            std,
            ess: x.len() as f64,
        });
        Ok(())
    }

    fn update(&mut self, x: &[f64]) -> Result<()> {
        let state = self.state.ok_or(DsioError::NotFitted(NAME))?;
        validate_sample(x)?;

        let (ess, weight) =
            update_effective_sample_size(state.ess, x.len() as f64, self.forgetting_factor)?;
        let mu = convex_combination(state.mu, mean(x), weight);
        // Deviation comes from the incoming batch only; it is not blended.
        let std = Self::checked_std(population_std(x))?;

        debug!(mu, std, ess, weight, "gaussian tracker updated");
        self.state = Some(GaussianState { mu, std, ess });
        Ok(())
    }

    fn score_anomaly(&self, x: &[f64]) -> Result<Vec<f64>> {
        let state = self.state.ok_or(DsioError::NotFitted(NAME))?;
        Ok(x
            .iter()
            .map(|v| normal_cdf((v - state.mu).abs() / state.std))
            .collect())
    }

    fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Stands in for normal(0,1) noise: its |z| stays well under the 0.99
    // cut, so only injected rows can be flagged. Gaussian draws of this
    // length cross it by chance on most seeds.
    fn bounded_noise(n: usize) -> Vec<f64> {
        (0..n).map(|i| 1.5 * (i as f64 * 1.3).sin()).collect()
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(GaussianTracker::new(0.0, 0.99).is_err());
        assert!(GaussianTracker::new(1.1, 0.99).is_err());
        assert!(GaussianTracker::new(0.9, 1.0).is_err());
        assert!(GaussianTracker::new(1.0, 0.5).is_ok());
    }

    #[test]
    fn test_fit_sets_moments() {
        let mut detector = GaussianTracker::default();
        detector.fit(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        let state = detector.state().unwrap();
        assert_eq!(state.mu, 2.5);
        assert_eq!(state.ess, 4.0);
        assert!((state.std - 1.2909944487358056).abs() < 1e-12);
    }

    #[test]
    fn test_update_before_fit() {
        let mut detector = GaussianTracker::default();
        assert!(matches!(
            detector.update(&[1.0]),
            Err(DsioError::NotFitted(NAME))
        ));
        assert!(matches!(
            detector.score_anomaly(&[1.0]),
            Err(DsioError::NotFitted(NAME))
        ));
    }

    #[test]
    fn test_update_blends_mean_and_replaces_std() {
        let mut detector = GaussianTracker::new(1.0, 0.99).unwrap();
        detector.fit(&[0.0, 2.0]).unwrap();
        detector.update(&[10.0, 12.0]).unwrap();
        let state = detector.state().unwrap();
        // ess 2 and batch 2 give weight 1: the batch mean replaces the old one.
        assert_eq!(state.mu, 11.0);
        assert_eq!(state.ess, 4.0);
        assert_eq!(state.std, 1.0);

        detector.update(&[0.0, 2.0]).unwrap();
        let state = detector.state().unwrap();
        assert!((state.mu - 6.0).abs() < 1e-12);
        assert_eq!(state.ess, 6.0);
    }

    #[test]
    fn test_zero_variance_is_numeric_error() {
        let mut detector = GaussianTracker::default();
        assert!(matches!(
            detector.fit(&[3.0, 3.0, 3.0]),
            Err(DsioError::NumericError { .. })
        ));
        detector.fit(&[1.0, 2.0, 3.0]).unwrap();
        assert!(matches!(
            detector.update(&[5.0, 5.0]),
            Err(DsioError::NumericError { .. })
        ));
    }

    #[test]
    fn test_score_monotonic_in_deviation() {
        let mut detector = GaussianTracker::default();
        detector.fit(&bounded_noise(50)).unwrap();
        let mu = detector.state().unwrap().mu;

        let queries: Vec<f64> = (0..20).map(|i| mu + i as f64 * 0.5).collect();
        let scores = detector.score_anomaly(&queries).unwrap();
        assert!(scores.iter().all(|s| *s >= 0.0 && *s <= 1.0));
        for pair in scores.windows(2) {
            assert!(pair[1] >= pair[0]);
        }

        let mirrored = detector.score_anomaly(&[mu - 3.0, mu + 3.0]).unwrap();
        assert!((mirrored[0] - mirrored[1]).abs() < 1e-12);
    }

    #[test]
    fn test_flags_only_injected_outliers() {
        let mut series = bounded_noise(100);
        series[40] = 10.0;
        series[77] = -10.0;

        let mut detector = GaussianTracker::new(0.9, 0.99).unwrap();
        detector.fit(&series[..20]).unwrap();
        let flags = detector.flag_anomaly(&series).unwrap();

        let flagged: Vec<usize> = flags
            .iter()
            .enumerate()
            .filter(|(_, f)| **f)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(flagged, vec![40, 77]);
    }

    #[test]
    fn test_instances_do_not_share_state() {
        let mut a = GaussianTracker::default();
        let mut b = GaussianTracker::default();
        a.fit(&[0.0, 1.0, 2.0]).unwrap();
        b.fit(&[100.0, 101.0, 102.0]).unwrap();
        assert_eq!(a.state().unwrap().mu, 1.0);
        assert_eq!(b.state().unwrap().mu, 101.0);
    }
}
