//! Update formulae for streaming estimates.
//!
//! Pure numeric primitives shared by the detectors: weighted blending of a
//! running estimate with a batch estimate, decay of the effective sample size
//! under a forgetting factor, rolling-window retention and the decision rule
//! that turns a score into a flag.

use crate::error::{DsioError, Result};
use statrs::function::erf::erfc;

/// `(1 - weight) * a + weight * b`
///
/// ```
/// use dsio_core::formulae::convex_combination;
/// assert_eq!(convex_combination(10.0, 20.0, 0.3), 13.0);
/// ```
pub fn convex_combination(a: f64, b: f64, weight: f64) -> f64 {
    (1.0 - weight) * a + weight * b
}

/// Returns the decayed effective sample size after absorbing a batch, and the
/// blend weight for [`convex_combination`].
///
/// The weight is computed against the sample size *before* the update.
pub fn update_effective_sample_size(
    effective_sample_size: f64,
    batch_size: f64,
    forgetting_factor: f64,
) -> Result<(f64, f64)> {
    if effective_sample_size <= 0.0 || !effective_sample_size.is_finite() {
        return Err(DsioError::invalid_parameter(
            "effective_sample_size",
            format!("must be strictly positive, got {}", effective_sample_size),
        ));
    }
    let updated = effective_sample_size * forgetting_factor + batch_size;
    let weight = 1.0 - (effective_sample_size - batch_size) / effective_sample_size;
    Ok((updated, weight))
}

/// The `w` most recent values of `old ++ new`, oldest dropped first.
pub fn rolling_window_update(old: &[f64], new: &[f64], w: usize) -> Vec<f64> {
    let total = old.len() + new.len();
    let skip = total.saturating_sub(w);
    old.iter().chain(new.iter()).skip(skip).copied().collect()
}

/// Flags a probability-like score.
///
/// Two-sided rules flag both tails (`score < 1 - threshold` or
/// `score > threshold`), one-sided rules only the upper one.
pub fn decision_rule(score: f64, threshold: f64, two_sided: bool) -> bool {
    if two_sided {
        score < 1.0 - threshold || score > threshold
    } else {
        score > threshold
    }
}

pub fn mean(x: &[f64]) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    x.iter().sum::<f64>() / x.len() as f64
}

fn sum_squared_deviations(x: &[f64]) -> f64 {
    let mu = mean(x);
    x.iter().map(|v| (v - mu) * (v - mu)).sum()
}

/// Standard deviation with Bessel's correction (n - 1). NaN below two values.
pub fn sample_std(x: &[f64]) -> f64 {
    if x.len() < 2 {
        return f64::NAN;
    }
    (sum_squared_deviations(x) / (x.len() - 1) as f64).sqrt()
}

/// Standard deviation over n.
pub fn population_std(x: &[f64]) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    (sum_squared_deviations(x) / x.len() as f64).sqrt()
}

/// Standard normal CDF.
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z / std::f64::consts::SQRT_2)
}

/// Fraction of `sample` that is less than or equal to `z`, in `[0, 1]`.
pub fn percentile_of_score(sample: &[f64], z: f64) -> f64 {
    if sample.is_empty() {
        return f64::NAN;
    }
    let at_or_below = sample.iter().filter(|v| **v <= z).count();
    at_or_below as f64 / sample.len() as f64
}

/// Value at percentile `per` (0..=100) using linear interpolation between
/// closest ranks.
pub fn score_at_percentile(sample: &[f64], per: f64) -> f64 {
    if sample.is_empty() {
        return f64::NAN;
    }
    let mut sorted = sample.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (per.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Rejects empty input and non-finite values.
pub fn validate_sample(x: &[f64]) -> Result<()> {
    if x.is_empty() {
        return Err(DsioError::InvalidSample("sample is empty".to_string()));
    }
    if let Some(pos) = x.iter().position(|v| !v.is_finite()) {
        return Err(DsioError::InvalidSample(format!(
            "non-finite value {} at position {}",
            x[pos], pos
        )));
    }
    Ok(())
}
