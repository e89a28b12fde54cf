//! Offline detector evaluation against generated ground truth.

use serde::Serialize;
use tracing::info;

use dsio_core::{ConfusionMatrix, DetectorParams, DetectorRegistry, DsioError, Result};

use crate::generator::SyntheticSeries;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EvaluationPlan {
    /// `fit` uses rows `[0, train)`
    pub train: usize,
    /// `update` uses rows `[update_from, n)`
    pub update_from: usize,
}

impl Default for EvaluationPlan {
    fn default() -> Self {
        Self {
            train: 50,
            update_from: 101,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub detector: String,
    pub after_fit: ConfusionMatrix,
    pub after_update: ConfusionMatrix,
    /// Scores of the injected rows after fit
    pub anomaly_scores: Vec<f64>,
}

/// Fits, flags, updates and flags again, recording a confusion matrix at
/// each stage.
pub fn evaluate(
    registry: &DetectorRegistry,
    name: &str,
    params: &DetectorParams,
    series: &SyntheticSeries,
    plan: EvaluationPlan,
) -> Result<Evaluation> {
    let n = series.len();
    if plan.train == 0 || plan.train > n || plan.update_from >= n {
        return Err(DsioError::invalid_parameter(
            "plan",
            format!(
                "train {} / update_from {} do not fit {} rows",
                plan.train, plan.update_from, n
            ),
        ));
    }

    let mut detector = registry.create(name, params)?;
    detector.fit(&series.values[..plan.train])?;
    let after_fit =
        ConfusionMatrix::from_flags(&detector.flag_anomaly(&series.values)?, &series.anomalies)?;
    let scores = detector.score_anomaly(&series.values)?;
    let anomaly_scores = series.anomalies.iter().map(|&i| scores[i]).collect();

    detector.update(&series.values[plan.update_from..])?;
    let after_update =
        ConfusionMatrix::from_flags(&detector.flag_anomaly(&series.values)?, &series.anomalies)?;

    info!(
        detector = detector.name(),
        f1_fit = after_fit.f1_score(),
        f1_update = after_update.f1_score(),
        "evaluation done"
    );
    Ok(Evaluation {
        detector: detector.name().to_string(),
        after_fit,
        after_update,
        anomaly_scores,
    })
}

/// Evaluates every registered detector on the same series.
pub fn evaluate_all(
    registry: &DetectorRegistry,
    params: &DetectorParams,
    series: &SyntheticSeries,
    plan: EvaluationPlan,
) -> Result<Vec<Evaluation>> {
    registry
        .names()
        .map(|name| evaluate(registry, name, params, series, plan))
        .collect()
}
