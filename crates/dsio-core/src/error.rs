//! Error kinds shared by the detectors, the replayer and the binaries.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DsioError>;

#[derive(Debug, Error)]
pub enum DsioError {
    #[error("Time field not found in data: {0}")]
    MissingTimeField(String),

    #[error("Selected sensors not found in data: {}", .0.join(", "))]
    MissingSensorFields(Vec<String>),

    #[error("Anomaly detector not found: {0}")]
    DetectorNotFound(String),

    #[error("Detector {0} used before fit")]
    NotFitted(&'static str),

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Invalid training sample: {0}")]
    InvalidSample(String),

    #[error("Numeric failure in {detector}: {reason}")]
    NumericError {
        detector: &'static str,
        reason: String,
    },

    #[error("Time field is not non-decreasing at row {row} ({previous} > {current})")]
    UnorderedTime { row: usize, previous: i64, current: i64 },

    #[error("Sink unavailable after {attempts} attempts: {reason}")]
    SinkUnavailable { attempts: u32, reason: String },

    #[error("Dashboard generation failed: {0}")]
    Dashboard(String),

    #[error("Replay cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DsioError {
    pub fn invalid_parameter(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// Process exit status for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::DetectorNotFound(_) => 2,
            Self::MissingTimeField(_) => 3,
            Self::MissingSensorFields(_) => 4,
            Self::SinkUnavailable { .. } => 5,
            Self::Dashboard(_) => 6,
            Self::UnorderedTime { .. } => 7,
            Self::InvalidParameter { .. } => 8,
            Self::InvalidSample(_) | Self::NumericError { .. } | Self::NotFitted(_) => 9,
            Self::Io(_) => 10,
            Self::Cancelled => 130,
        }
    }

    /// Errors that only disqualify a single sensor's detector during replay.
    pub fn is_sensor_local(&self) -> bool {
        matches!(
            self,
            Self::NumericError { .. } | Self::InvalidSample(_) | Self::NotFitted(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_have_distinct_codes() {
        let codes = [
            DsioError::DetectorNotFound("x".into()).code(),
            DsioError::MissingTimeField("t".into()).code(),
            DsioError::MissingSensorFields(vec!["a".into()]).code(),
        ];
        assert_eq!(codes, [2, 3, 4]);
        assert!(codes.iter().all(|c| *c != 0));
    }

    #[test]
    fn test_missing_sensor_message_lists_names() {
        let err = DsioError::MissingSensorFields(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Selected sensors not found in data: a, b");
    }

    #[test]
    fn test_sensor_local_classification() {
        let numeric = DsioError::NumericError {
            detector: "gaussian1d",
            reason: "zero variance".into(),
        };
        assert!(numeric.is_sensor_local());
        assert!(!DsioError::Cancelled.is_sensor_local());
    }
}
