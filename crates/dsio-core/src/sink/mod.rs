//! Sinks - destinations for replayed, scored rows
//!
//! A sink receives each time window as a slice of rows. The first upload of a
//! run carries `recreate = true` and may discard an existing target of the
//! same name; every later upload appends. Uploads go through
//! [`upload_with_retry`], which retries transient failures with bounded
//! exponential backoff.

pub mod elastic;
pub mod jsonl;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::RetryPolicy;
use crate::error::{DsioError, Result};
use crate::pacing::CancelToken;

pub use elastic::ElasticSink;
pub use jsonl::JsonLinesSink;

pub const SCORE_PREFIX: &str = "SCORE_";
pub const FLAG_PREFIX: &str = "FLAG_";

pub fn score_column(sensor: &str) -> String {
    format!("{}{}", SCORE_PREFIX, sensor)
}

pub fn flag_column(sensor: &str) -> String {
    format!("{}{}", FLAG_PREFIX, sensor)
}

/// One output row: the time field, sensor readings and the score/flag
/// columns added by the replayer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoredRow(pub Map<String, Value>);

impl ScoredRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SinkError {
    /// Worth retrying (timeouts, throttling, server-side errors)
    #[error("transient sink failure: {0}")]
    Transient(String),
    /// Retrying cannot help (rejected payload, bad target)
    #[error("sink rejected upload: {0}")]
    Fatal(String),
}

pub trait Sink {
    fn upload(
        &mut self,
        rows: &[ScoredRow],
        index_name: &str,
        recreate: bool,
    ) -> std::result::Result<(), SinkError>;
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn upload(
        &mut self,
        rows: &[ScoredRow],
        index_name: &str,
        recreate: bool,
    ) -> std::result::Result<(), SinkError> {
        (**self).upload(rows, index_name, recreate)
    }
}

/// Record of a single upload call.
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub index_name: String,
    pub recreate: bool,
    pub rows: Vec<ScoredRow>,
}

/// Keeps every upload in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub uploads: Vec<Upload>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows in upload order.
    pub fn rows(&self) -> impl Iterator<Item = &ScoredRow> {
        self.uploads.iter().flat_map(|u| u.rows.iter())
    }
}

impl Sink for MemorySink {
    fn upload(
        &mut self,
        rows: &[ScoredRow],
        index_name: &str,
        recreate: bool,
    ) -> std::result::Result<(), SinkError> {
        if recreate {
            self.uploads.retain(|u| u.index_name != index_name);
        }
        self.uploads.push(Upload {
            index_name: index_name.to_string(),
            recreate,
            rows: rows.to_vec(),
        });
        Ok(())
    }
}

/// Uploads with bounded retries. Returns the number of retries used.
///
/// Fatal errors and exhausted retries become `SinkUnavailable`; rows already
/// accepted by earlier calls are left in place.
pub fn upload_with_retry<S: Sink + ?Sized>(
    sink: &mut S,
    rows: &[ScoredRow],
    index_name: &str,
    recreate: bool,
    policy: &RetryPolicy,
    cancel: &CancelToken,
) -> Result<u32> {
    let mut last_error = String::new();

    for attempt in 0..=policy.max_retries {
        match sink.upload(rows, index_name, recreate) {
            Ok(()) => {
                debug!(count = rows.len(), index = index_name, attempt, "uploaded rows");
                return Ok(attempt);
            }
            Err(SinkError::Fatal(reason)) => {
                error!(index = index_name, reason = %reason, "sink rejected upload");
                return Err(DsioError::SinkUnavailable {
                    attempts: attempt + 1,
                    reason,
                });
            }
            Err(SinkError::Transient(reason)) => {
                warn!(attempt, index = index_name, reason = %reason, "sink upload failed");
                last_error = reason;
            }
        }

        if attempt < policy.max_retries {
            let delay = Duration::from_millis(policy.delay_ms(attempt));
            if cancel.wait(delay) {
                return Err(DsioError::Cancelled);
            }
        }
    }

    error!(count = rows.len(), index = index_name, "upload failed after max retries");
    Err(DsioError::SinkUnavailable {
        attempts: policy.max_retries + 1,
        reason: last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakySink {
        failures_left: u32,
        calls: u32,
    }

    impl Sink for FlakySink {
        fn upload(
            &mut self,
            _rows: &[ScoredRow],
            _index_name: &str,
            _recreate: bool,
        ) -> std::result::Result<(), SinkError> {
            self.calls += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(SinkError::Transient("connection reset".into()));
            }
            Ok(())
        }
    }

    struct RejectingSink;

    impl Sink for RejectingSink {
        fn upload(
            &mut self,
            _rows: &[ScoredRow],
            _index_name: &str,
            _recreate: bool,
        ) -> std::result::Result<(), SinkError> {
            Err(SinkError::Fatal("mapping conflict".into()))
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 1,
        }
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let mut sink = FlakySink {
            failures_left: 2,
            calls: 0,
        };
        let retries =
            upload_with_retry(&mut sink, &[], "idx", false, &fast_policy(3), &CancelToken::new())
                .unwrap();
        assert_eq!(retries, 2);
        assert_eq!(sink.calls, 3);
    }

    #[test]
    fn test_retries_exhaust() {
        let mut sink = FlakySink {
            failures_left: 10,
            calls: 0,
        };
        let result =
            upload_with_retry(&mut sink, &[], "idx", false, &fast_policy(2), &CancelToken::new());
        assert!(matches!(
            result,
            Err(DsioError::SinkUnavailable { attempts: 3, .. })
        ));
        assert_eq!(sink.calls, 3);
    }

    #[test]
    fn test_fatal_is_not_retried() {
        let result = upload_with_retry(
            &mut RejectingSink,
            &[],
            "idx",
            true,
            &fast_policy(5),
            &CancelToken::new(),
        );
        assert!(matches!(
            result,
            Err(DsioError::SinkUnavailable { attempts: 1, ref reason }) if reason == "mapping conflict"
        ));
    }

    #[test]
    fn test_memory_sink_recreate_discards_target() {
        let mut sink = MemorySink::new();
        let mut row = ScoredRow::new();
        row.insert("time", 1);
        sink.upload(&[row.clone()], "a", true).unwrap();
        sink.upload(&[row.clone()], "a", false).unwrap();
        sink.upload(&[row.clone()], "b", false).unwrap();
        sink.upload(&[row], "a", true).unwrap();

        assert_eq!(sink.uploads.len(), 2);
        assert_eq!(sink.uploads[0].index_name, "b");
        assert!(sink.uploads[1].recreate);
    }

    #[test]
    fn test_row_accessors() {
        let mut row = ScoredRow::new();
        row.insert("time", 1_500_000_000_000i64);
        row.insert(score_column("speed"), 0.25);
        row.insert(flag_column("speed"), true);

        assert_eq!(row.get_i64("time"), Some(1_500_000_000_000));
        assert_eq!(row.get_f64("SCORE_speed"), Some(0.25));
        assert_eq!(row.get_bool("FLAG_speed"), Some(true));
        assert_eq!(
            serde_json::to_string(&row).unwrap(),
            r#"{"FLAG_speed":true,"SCORE_speed":0.25,"time":1500000000000}"#
        );
    }
}
