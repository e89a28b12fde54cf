//! # dsio-sim - data sources and tooling around the dsio replay core
//!
//! - [`generator`]: seeded synthetic series with injected anomalies and
//!   their ground truth
//! - [`loader`]: CSV ingestion with time-field detection
//! - [`evaluate`]: confusion matrices of the built-in detectors on
//!   generated data
//! - [`console`]: live per-window view fed by the replayer
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dsio_core::{DetectorParams, DetectorRegistry, MemorySink, ReplayConfig, Replayer};
//! use dsio_sim::generator::{GeneratorConfig, SyntheticSeries};
//!
//! let series = SyntheticSeries::generate(&GeneratorConfig::default())?;
//! let dataset = series.to_dataset("simulated_data", 0, 1000)?;
//!
//! let registry = DetectorRegistry::with_builtins();
//! let detector = registry.resolve("gaussian1d")?;
//! let mut replayer = Replayer::new(ReplayConfig::default(), MemorySink::new())?;
//! let report = replayer.run(&dataset, None, &detector, &DetectorParams::default())?;
//! println!("{} windows emitted", report.windows);
//! # Ok::<(), dsio_core::DsioError>(())
//! ```

pub mod console;
pub mod evaluate;
pub mod generator;
pub mod loader;

pub use evaluate::{Evaluation, EvaluationPlan, evaluate, evaluate_all};
pub use generator::{GeneratorConfig, SyntheticSeries};
pub use loader::{LoadError, LoadOptions, LoadedTable, TimeUnit, index_name_from_path, load_csv};
