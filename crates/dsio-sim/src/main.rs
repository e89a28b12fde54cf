//! dsio - score sensor data for anomalies and replay it as a live stream
//!
//! Usage:
//!   dsio restream data/car_sensors.csv --detector gaussian1d --live
//!   dsio restream data.csv --es-uri http://localhost:9200 --kibana-export dash.json
//!   dsio generate -n 1000 --anomalies 10 -o simulated.csv
//!   dsio evaluate --anomalies 50
//!   dsio list

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dsio_core::dashboard::{KibanaDashboard, LiveFeed};
use dsio_core::sink::{ElasticSink, JsonLinesSink};
use dsio_core::{
    CancelToken, DEFAULT_DETECTOR, DetectorParams, DetectorRegistry, DsioError, Replayer,
    RunConfig, Sink, SinkError,
};
use dsio_sim::console::spawn_console_feed;
use dsio_sim::{
    EvaluationPlan, GeneratorConfig, LoadError, LoadOptions, SyntheticSeries, TimeUnit,
    evaluate, evaluate_all, index_name_from_path, load_csv,
};

const ELASTIC_TIMEOUT_MS: u64 = 5000;
const DEFAULT_OUT_DIR: &str = "dsio-out";

#[derive(Parser)]
#[command(name = "dsio")]
#[command(about = "Online anomaly scoring and paced replay of sensor data")]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a CSV file and replay it window by window
    Restream(RestreamArgs),

    /// Write a synthetic series with injected anomalies
    Generate {
        #[command(flatten)]
        data: DataArgs,

        /// Output CSV file
        #[arg(short, long, default_value = "simulated_data.csv")]
        output: PathBuf,

        /// Column header
        #[arg(long, default_value = dsio_sim::generator::DEFAULT_COLUMN)]
        column: String,
    },

    /// Compare detectors on generated data with known anomalies
    Evaluate {
        #[command(flatten)]
        data: DataArgs,

        /// Detector to evaluate; every registered detector when omitted
        #[arg(short, long)]
        detector: Option<String>,

        /// Rows used for fit
        #[arg(long, default_value = "50")]
        train: usize,

        /// First row used for update
        #[arg(long, default_value = "101")]
        update_from: usize,

        #[command(flatten)]
        params: DetectorArgs,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// List registered detectors
    List,
}

#[derive(Args)]
struct RestreamArgs {
    /// Input CSV file
    input: PathBuf,

    #[arg(short, long, default_value = DEFAULT_DETECTOR)]
    detector: String,

    /// Sensors to score; all numeric columns when omitted
    #[arg(short, long, num_args = 1..)]
    sensors: Option<Vec<String>>,

    /// Name of the time column; detected when omitted
    #[arg(short, long)]
    timefield: Option<String>,

    /// Unit of numeric time values
    #[arg(long, value_enum, default_value = "seconds")]
    time_unit: TimeUnitArg,

    /// JSON run configuration ({"replay": {...}, "detector": {...}})
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sink index name; derived from the input file name when omitted
    #[arg(long)]
    index: Option<String>,

    #[arg(long)]
    interval_ms: Option<i64>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Virtual milliseconds per wall-clock millisecond
    #[arg(long)]
    speed: Option<f64>,

    /// Emit windows back-to-back
    #[arg(long)]
    no_pacing: bool,

    /// Elasticsearch base URL; rows go to JSON-lines files otherwise
    #[arg(long)]
    es_uri: Option<String>,

    /// Directory for JSON-lines output
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Write Kibana saved objects for the run to this file
    #[arg(long)]
    kibana_export: Option<PathBuf>,

    /// Print a line per emitted window
    #[arg(long)]
    live: bool,

    #[command(flatten)]
    params: DetectorArgs,
}

#[derive(Args)]
struct DataArgs {
    /// Number of samples
    #[arg(short, long, default_value = "1000")]
    n: usize,

    #[arg(short, long, default_value = "10")]
    anomalies: usize,

    /// Anomaly shift in standard deviations
    #[arg(long, default_value = "5.0")]
    sigmas: f64,

    #[arg(long)]
    seed: Option<u64>,
}

impl DataArgs {
    fn config(&self) -> GeneratorConfig {
        GeneratorConfig {
            n: self.n,
            anomalies: self.anomalies,
            sigmas: self.sigmas,
            seed: self.seed,
        }
    }
}

#[derive(Args)]
struct DetectorArgs {
    #[arg(long)]
    threshold: Option<f64>,

    #[arg(long)]
    forgetting_factor: Option<f64>,

    #[arg(long)]
    window_size: Option<usize>,

    #[arg(long)]
    n_neighbors: Option<usize>,

    #[arg(long)]
    contamination: Option<f64>,
}

impl DetectorArgs {
    fn apply(&self, params: &mut DetectorParams) {
        if let Some(v) = self.threshold {
            params.threshold = v;
        }
        if let Some(v) = self.forgetting_factor {
            params.forgetting_factor = v;
        }
        if self.window_size.is_some() {
            params.window_size = self.window_size;
        }
        if let Some(v) = self.n_neighbors {
            params.n_neighbors = v;
        }
        if let Some(v) = self.contamination {
            params.contamination = v;
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum TimeUnitArg {
    Seconds,
    Millis,
}

impl From<TimeUnitArg> for TimeUnit {
    fn from(unit: TimeUnitArg) -> Self {
        match unit {
            TimeUnitArg::Seconds => TimeUnit::Seconds,
            TimeUnitArg::Millis => TimeUnit::Millis,
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Dsio(#[from] DsioError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("cannot set up sink: {0}")]
    Sink(#[from] SinkError),

    #[error("cannot encode output: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    fn code(&self) -> i32 {
        match self {
            Self::Dsio(err) => err.code(),
            Self::Load(err) => err.code(),
            Self::Sink(_) => 5,
            Self::Json(_) => 10,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Restream(args) => run_restream(args),
        Commands::Generate {
            data,
            output,
            column,
        } => run_generate(&data, &output, &column),
        Commands::Evaluate {
            data,
            detector,
            train,
            update_from,
            params,
            json,
        } => run_evaluate(
            &data,
            detector.as_deref(),
            EvaluationPlan { train, update_from },
            &params,
            json,
        ),
        Commands::List => {
            run_list();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!(code = err.code(), "{}", err);
        eprintln!("dsio: {}", err);
        std::process::exit(err.code());
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Cancels `token` on Ctrl-C. The watcher thread lives until the process exits.
fn install_ctrl_c(token: CancelToken) {
    let spawned = std::thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    warn!(error = %err, "Ctrl-C handling unavailable");
                    return;
                }
            };
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, stopping replay");
                    token.cancel();
                }
            });
        });
    if let Err(err) = spawned {
        warn!(error = %err, "Ctrl-C handling unavailable");
    }
}

fn run_restream(args: RestreamArgs) -> Result<(), CliError> {
    let mut run = match &args.config {
        Some(path) => RunConfig::from_json_file(path)?,
        None => RunConfig::default(),
    };
    run.replay.index_name = resolve_index_name(args.index.as_deref(), &run, &args.input);
    if let Some(v) = args.interval_ms {
        run.replay.interval_ms = v;
    }
    if let Some(v) = args.batch_size {
        run.replay.max_batch_size = v;
    }
    if let Some(v) = args.speed {
        run.replay.speed = v;
    }
    if args.no_pacing {
        run.replay.pacing = false;
    }
    args.params.apply(&mut run.detector);
    run.replay.validate()?;

    let registry = DetectorRegistry::with_builtins();
    let constructor = registry.resolve(&args.detector)?;

    let table = load_csv(
        &args.input,
        &LoadOptions {
            time_field: args.timefield.clone(),
            time_unit: args.time_unit.into(),
        },
    )?;
    let sensors = table.select_sensors(args.sensors.as_deref())?;

    let sink: Box<dyn Sink> = match &args.es_uri {
        Some(uri) => Box::new(ElasticSink::new(
            uri,
            table.dataset.time_field(),
            ELASTIC_TIMEOUT_MS,
        )?),
        None => {
            let dir = args
                .out_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR));
            info!(dir = %dir.display(), "writing JSON-lines output");
            Box::new(JsonLinesSink::new(dir))
        }
    };

    let cancel = CancelToken::new();
    install_ctrl_c(cancel.clone());

    let mut replayer = Replayer::new(run.replay.clone(), sink)?.with_cancel(cancel);
    if let Some(path) = &args.kibana_export {
        replayer = replayer.with_dashboard(Box::new(KibanaDashboard::new(path)));
    }
    let mut consumer = None;
    if args.live {
        let (feed, rx) = LiveFeed::bounded(run.replay.feed_capacity);
        consumer = Some(spawn_console_feed(rx));
        replayer = replayer.with_feed(feed);
    }

    eprintln!(
        "Restreaming {} rows of {} sensor(s) to '{}' with {}",
        table.dataset.len(),
        sensors.len(),
        run.replay.index_name,
        args.detector
    );
    let result = replayer.run(
        &table.dataset,
        Some(sensors.as_slice()),
        &constructor,
        &run.detector,
    );
    // closing the feed lets the console consumer finish
    drop(replayer);
    if let Some(handle) = consumer {
        let _ = handle.join();
    }

    let report = result?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// `--index` wins, then an `index_name` set in the config file, then the
/// input file name.
fn resolve_index_name(flag: Option<&str>, run: &RunConfig, input: &Path) -> String {
    match flag {
        Some(index) => index.to_string(),
        None if run.sets_index_name() => run.replay.index_name.clone(),
        None => index_name_from_path(input),
    }
}

fn run_generate(data: &DataArgs, output: &Path, column: &str) -> Result<(), CliError> {
    let series = SyntheticSeries::generate(&data.config())?;
    series.write_csv(output, column)?;
    eprintln!(
        "Wrote {} samples ({} anomalies, {} sigmas) to {}",
        series.len(),
        series.anomalies.len(),
        data.sigmas,
        output.display()
    );
    println!(
        "{}",
        serde_json::to_string(&serde_json::json!({ "anomalies": series.anomalies }))?
    );
    Ok(())
}

fn run_evaluate(
    data: &DataArgs,
    detector: Option<&str>,
    plan: EvaluationPlan,
    params: &DetectorArgs,
    json: bool,
) -> Result<(), CliError> {
    let series = SyntheticSeries::generate(&data.config())?;
    let registry = DetectorRegistry::with_builtins();
    let mut detector_params = DetectorParams::default();
    params.apply(&mut detector_params);

    let evaluations = match detector {
        Some(name) => vec![evaluate(&registry, name, &detector_params, &series, plan)?],
        None => evaluate_all(&registry, &detector_params, &series, plan)?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&evaluations)?);
        return Ok(());
    }
    for eval in &evaluations {
        println!("== {} ==", eval.detector);
        let sample: Vec<String> = eval
            .anomaly_scores
            .iter()
            .take(5)
            .map(|s| format!("{:.4}", s))
            .collect();
        println!("scores at injected rows: [{}]", sample.join(", "));
        println!("after fit on rows [0, {}):", plan.train);
        println!("{}", eval.after_fit);
        println!("after update with rows [{}, {}):", plan.update_from, series.len());
        println!("{}", eval.after_update);
        println!();
    }
    Ok(())
}

fn run_list() {
    let registry = DetectorRegistry::with_builtins();
    println!("Available detectors:");
    for name in registry.names() {
        let marker = if name == DEFAULT_DETECTOR { " (default)" } else { "" };
        println!("  {}{}", name, marker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_name_precedence() {
        let input = Path::new("data/car_sensors.csv");
        let defaulted = RunConfig::from_json_str(r#"{"replay": {"speed": 2.0}}"#).unwrap();
        assert_eq!(resolve_index_name(None, &defaulted, input), "car");
        assert_eq!(resolve_index_name(None, &RunConfig::default(), input), "car");

        let named = RunConfig::from_json_str(r#"{"replay": {"index_name": "fleet"}}"#).unwrap();
        assert_eq!(resolve_index_name(None, &named, input), "fleet");
        assert_eq!(resolve_index_name(Some("manual"), &named, input), "manual");
    }
}
