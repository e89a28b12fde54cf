//! Confusion matrix of detector flags against known injected anomalies.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{DsioError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub true_positives: u64,
    pub false_positives: u64,
    pub true_negatives: u64,
    pub false_negatives: u64,
}

impl ConfusionMatrix {
    /// Row `i` is an actual anomaly iff `i` is in `injected`.
    pub fn from_flags(flags: &[bool], injected: &[usize]) -> Result<Self> {
        let actual: BTreeSet<usize> = injected.iter().copied().collect();
        if let Some(&out_of_range) = actual.range(flags.len()..).next() {
            return Err(DsioError::invalid_parameter(
                "injected",
                format!("index {} outside {} rows", out_of_range, flags.len()),
            ));
        }

        let mut matrix = Self::default();
        for (i, &flagged) in flags.iter().enumerate() {
            match (actual.contains(&i), flagged) {
                (true, true) => matrix.true_positives += 1,
                (false, true) => matrix.false_positives += 1,
                (false, false) => matrix.true_negatives += 1,
                (true, false) => matrix.false_negatives += 1,
            }
        }
        Ok(matrix)
    }

    pub fn total(&self) -> u64 {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    pub fn f1_score(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 }
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den > 0 { num as f64 / den as f64 } else { 0.0 }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "                 predicted+  predicted-")?;
        writeln!(
            f,
            "  actual+      {:>10}  {:>10}",
            self.true_positives, self.false_negatives
        )?;
        writeln!(
            f,
            "  actual-      {:>10}  {:>10}",
            self.false_positives, self.true_negatives
        )?;
        write!(
            f,
            "  precision {:.3}  recall {:.3}  f1 {:.3}",
            self.precision(),
            self.recall(),
            self.f1_score()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts() {
        let flags = [true, false, true, false, false, true];
        let m = ConfusionMatrix::from_flags(&flags, &[0, 3, 5]).unwrap();
        assert_eq!(
            m,
            ConfusionMatrix {
                true_positives: 2,
                false_positives: 1,
                true_negatives: 2,
                false_negatives: 1,
            }
        );
        assert_eq!(m.total(), 6);
        assert!((m.precision() - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.recall() - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.f1_score() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_flags_no_anomalies() {
        let m = ConfusionMatrix::from_flags(&[false; 4], &[]).unwrap();
        assert_eq!(m.true_negatives, 4);
        assert_eq!(m.precision(), 0.0);
        assert_eq!(m.f1_score(), 0.0);
    }

    #[test]
    fn test_duplicate_indices_count_once() {
        let m = ConfusionMatrix::from_flags(&[true, false], &[0, 0]).unwrap();
        assert_eq!(m.true_positives, 1);
        assert_eq!(m.total(), 2);
    }

    #[test]
    fn test_out_of_range_index() {
        assert!(matches!(
            ConfusionMatrix::from_flags(&[false; 3], &[3]),
            Err(DsioError::InvalidParameter { name: "injected", .. })
        ));
    }
}
