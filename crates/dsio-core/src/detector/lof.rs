//! k-nearest-neighbour local outlier factor over a rolling window.
//!
//! Reachability and density follow the usual LOF construction:
//! `reach(p, o) = max(d(p, o), k_distance(o))` and
//! `lrd(p) = 1 / (mean reach over the k neighbours of p + 1e-10)`.
//! The factor of `p` is the mean of `lrd(o) / lrd(p)` over its neighbours.
//! The index is rebuilt from scratch on every update.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AnomalyDetector, check_window_size};
use crate::config::DetectorParams;
use crate::error::{DsioError, Result};
use crate::formulae::{decision_rule, mean, rolling_window_update, score_at_percentile, validate_sample};

pub const NAME: &str = "lof";
pub const DEFAULT_WINDOW_SIZE: usize = 1000;

/// Keeps densities finite when more than k points coincide.
const DENSITY_EPSILON: f64 = 1e-10;

/// Nearest-neighbour index over scalar points, backed by a sorted copy.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NeighborIndex {
    /// Point values in ascending order
    sorted: Vec<f64>,
    /// Original position of each sorted value
    order: Vec<usize>,
}

impl NeighborIndex {
    pub fn build(points: &[f64]) -> Self {
        let mut order: Vec<usize> = (0..points.len()).collect();
        order.sort_by(|a, b| points[*a].total_cmp(&points[*b]));
        let sorted = order.iter().map(|i| points[*i]).collect();
        Self { sorted, order }
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// The `k` nearest points to `query` as `(distance, original index)`,
    /// closest first. `exclude` removes one point (the query itself during
    /// training).
    pub fn query(&self, query: f64, k: usize, exclude: Option<usize>) -> Vec<(f64, usize)> {
        let mut neighbors = Vec::with_capacity(k);
        let split = self.sorted.partition_point(|v| *v < query);
        let mut left = split;
        let mut right = split;

        while neighbors.len() < k {
            let left_dist = (left > 0).then(|| query - self.sorted[left - 1]);
            let right_dist = (right < self.sorted.len()).then(|| self.sorted[right] - query);

            let (dist, pos) = match (left_dist, right_dist) {
                (Some(l), Some(r)) if l <= r => {
                    left -= 1;
                    (l, left)
                }
                (_, Some(r)) => {
                    right += 1;
                    (r, right - 1)
                }
                (Some(l), None) => {
                    left -= 1;
                    (l, left)
                }
                (None, None) => break,
            };

            let idx = self.order[pos];
            if exclude == Some(idx) {
                continue;
            }
            neighbors.push((dist, idx));
        }

        neighbors
    }
}

/// Fitted neighbour structure and training statistics.
#[derive(Serialize, Deserialize, Clone, Debug)]
struct LofModel {
    index: NeighborIndex,
    k: usize,
    k_distance: Vec<f64>,
    lrd: Vec<f64>,
    negative_outlier_factor: Vec<f64>,
    /// Outlier factor above which a point is flagged
    threshold: f64,
}

impl LofModel {
    fn local_density(&self, neighbors: &[(f64, usize)]) -> f64 {
        let reach = neighbors
            .iter()
            .map(|(dist, j)| dist.max(self.k_distance[*j]));
        let mean_reach = reach.sum::<f64>() / neighbors.len() as f64;
        1.0 / (mean_reach + DENSITY_EPSILON)
    }

    fn outlier_factor(&self, neighbors: &[(f64, usize)], own_density: f64) -> f64 {
        let ratios: Vec<f64> = neighbors
            .iter()
            .map(|(_, j)| self.lrd[*j] / own_density)
            .collect();
        mean(&ratios)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LofTracker {
    n_neighbors: usize,
    contamination: f64,
    window_size: usize,
    sample: Option<Vec<f64>>,
    model: Option<LofModel>,
}

impl LofTracker {
    pub fn new(n_neighbors: usize, contamination: f64, window_size: usize) -> Result<Self> {
        if n_neighbors == 0 {
            return Err(DsioError::invalid_parameter(
                "n_neighbors",
                "must be at least 1",
            ));
        }
        if !(contamination > 0.0 && contamination <= 0.5) {
            return Err(DsioError::invalid_parameter(
                "contamination",
                format!("must lie in (0, 0.5], got {}", contamination),
            ));
        }
        check_window_size(window_size)?;
        Ok(Self {
            n_neighbors,
            contamination,
            window_size,
            sample: None,
            model: None,
        })
    }

    pub fn from_params(params: &DetectorParams) -> Result<Self> {
        Self::new(
            params.n_neighbors,
            params.contamination,
            params.window_size.unwrap_or(DEFAULT_WINDOW_SIZE),
        )
    }

    /// Neighbour count actually in use after clamping to the sample size.
    pub fn effective_neighbors(&self) -> Option<usize> {
        self.model.as_ref().map(|m| m.k)
    }

    pub fn sample(&self) -> Option<&[f64]> {
        self.sample.as_deref()
    }

    /// Negated outlier factors of the training sample (larger is more normal).
    pub fn negative_outlier_factor(&self) -> Option<&[f64]> {
        self.model
            .as_ref()
            .map(|m| m.negative_outlier_factor.as_slice())
    }

    fn fit_sample(&mut self, sample: Vec<f64>) -> Result<()> {
        let n = sample.len();
        if n < 2 {
            return Err(DsioError::InvalidSample(format!(
                "local outlier factor needs at least 2 points, got {}",
                n
            )));
        }

        let mut k = self.n_neighbors;
        if k > n - 1 {
            warn!(
                n_neighbors = self.n_neighbors,
                samples = n,
                "n_neighbors exceeds the sample size, using n_samples - 1"
            );
            k = n - 1;
        }

        let index = NeighborIndex::build(&sample);
        let neighborhoods: Vec<Vec<(f64, usize)>> = sample
            .iter()
            .enumerate()
            .map(|(i, v)| index.query(*v, k, Some(i)))
            .collect();
        let k_distance: Vec<f64> = neighborhoods.iter().map(|nb| nb[k - 1].0).collect();

        let mut model = LofModel {
            index,
            k,
            k_distance,
            lrd: Vec::new(),
            negative_outlier_factor: Vec::new(),
            threshold: f64::NAN,
        };
        model.lrd = neighborhoods
            .iter()
            .map(|nb| model.local_density(nb))
            .collect();

        let factors: Vec<f64> = neighborhoods
            .iter()
            .zip(&model.lrd)
            .map(|(nb, own)| model.outlier_factor(nb, *own))
            .collect();
        model.threshold = score_at_percentile(&factors, 100.0 * (1.0 - self.contamination));
        model.negative_outlier_factor = factors.iter().map(|f| -f).collect();

        debug!(samples = n, k, threshold = model.threshold, "lof model fitted");
        self.sample = Some(sample);
        self.model = Some(model);
        Ok(())
    }
}

impl Default for LofTracker {
    fn default() -> Self {
        Self {
            n_neighbors: 20,
            contamination: 0.1,
            window_size: DEFAULT_WINDOW_SIZE,
            sample: None,
            model: None,
        }
    }
}

impl AnomalyDetector for LofTracker {
    fn name(&self) -> &'static str {
        NAME
    }

    fn fit(&mut self, x: &[f64]) -> Result<()> {
        validate_sample(x)?;
        let keep = x.len().min(self.window_size);
        self.fit_sample(x[..keep].to_vec())
    }

    fn update(&mut self, x: &[f64]) -> Result<()> {
        let sample = self.sample.as_ref().ok_or(DsioError::NotFitted(NAME))?;
        validate_sample(x)?;
        let window = rolling_window_update(sample, x, self.window_size);
        self.fit_sample(window)
    }

    fn score_anomaly(&self, x: &[f64]) -> Result<Vec<f64>> {
        let model = self.model.as_ref().ok_or(DsioError::NotFitted(NAME))?;
        Ok(x
            .iter()
            .map(|q| {
                let neighbors = model.index.query(*q, model.k, None);
                let own = model.local_density(&neighbors);
                model.outlier_factor(&neighbors, own)
            })
            .collect())
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    fn threshold(&self) -> f64 {
        self.model.as_ref().map_or(f64::NAN, |m| m.threshold)
    }

    fn two_sided(&self) -> bool {
        false
    }

    fn flag_anomaly(&self, x: &[f64]) -> Result<Vec<bool>> {
        let threshold = self
            .model
            .as_ref()
            .ok_or(DsioError::NotFitted(NAME))?
            .threshold;
        Ok(self
            .score_anomaly(x)?
            .into_iter()
            .map(|score| decision_rule(score, threshold, false))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(n: usize) -> Vec<f64> {
        (0..n).map(|i| 1.5 * (i as f64 * 1.3).sin()).collect()
    }

    #[test]
    fn test_index_query_orders_by_distance() {
        let index = NeighborIndex::build(&[10.0, 0.0, 2.0, 1.0]);
        let found = index.query(1.2, 3, None);
        let ids: Vec<usize> = found.iter().map(|(_, i)| *i).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert!((found[0].0 - 0.2).abs() < 1e-12);
        assert!((found[2].0 - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_index_query_excludes_self_only() {
        let index = NeighborIndex::build(&[1.0, 1.0, 5.0]);
        let found = index.query(1.0, 2, Some(0));
        assert_eq!(found[0], (0.0, 1));
        assert_eq!(found[1], (4.0, 2));
    }

    #[test]
    fn test_index_query_short_when_exhausted() {
        let index = NeighborIndex::build(&[1.0, 2.0]);
        assert_eq!(index.query(0.0, 5, Some(1)).len(), 1);
    }

    #[test]
    fn test_rejects_bad_contamination() {
        for bad in [0.0, 0.6, -0.1] {
            assert!(matches!(
                LofTracker::new(20, bad, 100),
                Err(DsioError::InvalidParameter {
                    name: "contamination",
                    ..
                })
            ));
        }
        assert!(LofTracker::new(20, 0.5, 100).is_ok());
    }

    #[test]
    fn test_neighbors_clamped_to_sample() {
        let mut detector = LofTracker::default();
        detector.fit(&[1.0, 2.0, 4.0, 8.0, 16.0]).unwrap();
        assert_eq!(detector.effective_neighbors(), Some(4));
    }

    #[test]
    fn test_single_point_is_invalid() {
        let mut detector = LofTracker::default();
        assert!(matches!(
            detector.fit(&[1.0]),
            Err(DsioError::InvalidSample(_))
        ));
    }

    #[test]
    fn test_duplicates_stay_finite() {
        let mut detector = LofTracker::new(2, 0.1, 100).unwrap();
        detector.fit(&[3.0, 3.0, 3.0, 3.0, 4.0]).unwrap();
        let scores = detector.score_anomaly(&[3.0, 4.0, 9.0]).unwrap();
        assert!(scores.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_far_points_score_higher() {
        let mut detector = LofTracker::default();
        detector.fit(&wave(200)).unwrap();

        let scores = detector.score_anomaly(&[0.0, 3.0, 10.0, -10.0]).unwrap();
        assert!(scores[0] < 1.05);
        assert!(scores[1] > 10.0);
        assert!(scores[2] > scores[1]);
        assert!(scores[3] > 10.0);
    }

    #[test]
    fn test_flags_against_training_percentile() {
        let mut detector = LofTracker::default();
        detector.fit(&wave(200)).unwrap();
        let flags = detector.flag_anomaly(&[0.0, 10.0, -10.0]).unwrap();
        assert_eq!(flags, vec![false, true, true]);

        let training = detector.negative_outlier_factor().unwrap();
        let flagged = training
            .iter()
            .filter(|nof| -**nof > detector.threshold())
            .count();
        assert!(flagged <= 20);
    }

    #[test]
    fn test_update_refits_on_rolling_window() {
        let mut detector = LofTracker::new(5, 0.1, 50).unwrap();
        detector.fit(&wave(50)).unwrap();
        detector.update(&[100.0, 101.0, 102.0]).unwrap();

        let sample = detector.sample().unwrap();
        assert_eq!(sample.len(), 50);
        assert_eq!(&sample[47..], &[100.0, 101.0, 102.0]);
        assert_eq!(detector.negative_outlier_factor().unwrap().len(), 50);
    }

    #[test]
    fn test_update_before_fit() {
        let mut detector = LofTracker::default();
        assert!(matches!(
            detector.update(&[1.0, 2.0]),
            Err(DsioError::NotFitted(NAME))
        ));
        assert!(matches!(
            detector.flag_anomaly(&[1.0]),
            Err(DsioError::NotFitted(NAME))
        ));
    }
}
