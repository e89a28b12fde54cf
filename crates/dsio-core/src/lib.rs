//! dsio-core: online anomaly scoring of sensor series and paced replay of
//! historical data as a simulated live feed.

pub mod config;
pub mod dashboard;
pub mod dataset;
pub mod detector;
pub mod error;
pub mod evaluation;
pub mod formulae;
pub mod pacing;
pub mod registry;
pub mod replay;
pub mod sink;
pub mod window;

pub use config::{DetectorParams, ReplayConfig, RetryPolicy, RunConfig};
pub use dataset::{Batch, Dataset};
pub use detector::AnomalyDetector;
pub use error::{DsioError, Result};
pub use evaluation::ConfusionMatrix;
pub use pacing::{CancelToken, Pacer};
pub use registry::{DEFAULT_DETECTOR, DetectorConstructor, DetectorRegistry};
pub use replay::{ReplayReport, ReplayState, Replayer};
pub use sink::{MemorySink, ScoredRow, Sink, SinkError};
