//! Batch Replayer
//!
//! Drives one replay run through its states:
//!
//! ```text
//! Init -> FitFirstBatch -> { ScoreAndReplay -> UpdateModels }* -> Done
//! ```
//!
//! Every tracked sensor gets its own detector instance. The first batch fits
//! the detectors and is never used for `update`. Each batch is scored as a
//! whole, cut into windows on the run's virtual clock, and the windows are
//! paced out to the sink in time order. A detector failing with a
//! sensor-local error is dropped for the rest of the run; everything else
//! aborts it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::{DetectorParams, ReplayConfig};
use crate::dashboard::{DashboardGenerator, FeedWindow, LiveFeed};
use crate::dataset::{Batch, Dataset};
use crate::detector::AnomalyDetector;
use crate::error::{DsioError, Result};
use crate::pacing::{CancelToken, Pacer, Unpaced, WallClockPacer};
use crate::registry::DetectorConstructor;
use crate::sink::{ScoredRow, Sink, flag_column, score_column, upload_with_retry};
use crate::window::{VirtualClock, segment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    Init,
    FitFirstBatch,
    ScoreAndReplay,
    UpdateModels,
    Done,
}

impl fmt::Display for ReplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::FitFirstBatch => "FIT_FIRST_BATCH",
            Self::ScoreAndReplay => "SCORE_AND_REPLAY_BATCH",
            Self::UpdateModels => "UPDATE_MODELS",
            Self::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplayReport {
    pub detector: String,
    pub batches: usize,
    pub windows: usize,
    pub rows_emitted: usize,
    /// Upload retries across all windows
    pub retries: u32,
    pub flagged: BTreeMap<String, usize>,
    /// Sensor name -> reason it stopped being scored
    pub excluded: BTreeMap<String, String>,
    pub feed_dropped: u64,
}

struct SensorTrack {
    name: String,
    detector: Box<dyn AnomalyDetector>,
    active: bool,
}

struct ScoredColumn {
    sensor: String,
    scores: Vec<f64>,
    flags: Vec<bool>,
}

pub struct Replayer<S: Sink> {
    config: ReplayConfig,
    sink: S,
    pacer: Option<Box<dyn Pacer>>,
    dashboard: Option<Box<dyn DashboardGenerator>>,
    feed: Option<LiveFeed>,
    cancel: CancelToken,
    state: ReplayState,
}

impl<S: Sink> Replayer<S> {
    pub fn new(config: ReplayConfig, sink: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            sink,
            pacer: None,
            dashboard: None,
            feed: None,
            cancel: CancelToken::new(),
            state: ReplayState::Init,
        })
    }

    /// Shares an externally owned cancel token (e.g. a Ctrl-C handler).
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replaces the pacer derived from the config.
    pub fn with_pacer(mut self, pacer: Box<dyn Pacer>) -> Self {
        self.pacer = Some(pacer);
        self
    }

    pub fn with_dashboard(mut self, dashboard: Box<dyn DashboardGenerator>) -> Self {
        self.dashboard = Some(dashboard);
        self
    }

    pub fn with_feed(mut self, feed: LiveFeed) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> ReplayState {
        self.state
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn default_pacer(&self) -> Box<dyn Pacer> {
        if self.config.pacing {
            Box::new(WallClockPacer::new(self.config.speed, self.cancel.clone()))
        } else {
            Box::new(Unpaced::new(self.cancel.clone()))
        }
    }

    /// Replays `dataset`, scoring `sensors` (all sensor columns when `None`)
    /// with detectors built by `constructor`.
    pub fn run(
        &mut self,
        dataset: &Dataset,
        sensors: Option<&[String]>,
        constructor: &DetectorConstructor,
        params: &DetectorParams,
    ) -> Result<ReplayReport> {
        self.state = ReplayState::Init;
        let selected = dataset.select_sensors(sensors)?;
        if selected.is_empty() {
            return Err(DsioError::MissingSensorFields(Vec::new()));
        }
        let mut tracks = selected
            .iter()
            .map(|name| {
                Ok(SensorTrack {
                    name: name.clone(),
                    detector: constructor(params)?,
                    active: true,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let custom = self.pacer.take();
        let keep = custom.is_some();
        let mut pacer = custom.unwrap_or_else(|| self.default_pacer());
        let result = self.replay(dataset, &mut tracks, pacer.as_mut());
        if keep {
            self.pacer = Some(pacer);
        }
        result
    }

    fn replay(
        &mut self,
        dataset: &Dataset,
        tracks: &mut [SensorTrack],
        pacer: &mut dyn Pacer,
    ) -> Result<ReplayReport> {
        let batches = dataset.batches(self.config.max_batch_size);
        let clock = VirtualClock::new(dataset.times()[0], self.config.interval_ms);
        let mut report = ReplayReport {
            detector: tracks
                .first()
                .map(|t| t.detector.name().to_string())
                .unwrap_or_default(),
            batches: batches.len(),
            flagged: tracks.iter().map(|t| (t.name.clone(), 0)).collect(),
            ..Default::default()
        };
        let mut target_ready = false;

        info!(
            rows = dataset.len(),
            batches = batches.len(),
            sensors = tracks.len(),
            detector = %report.detector,
            index = %self.config.index_name,
            "replay starting"
        );

        for batch in &batches {
            if self.cancel.is_cancelled() {
                return Err(DsioError::Cancelled);
            }

            if batch.is_first() {
                self.enter(ReplayState::FitFirstBatch);
                for track in tracks.iter_mut() {
                    let values = batch_values(batch, &track.name)?;
                    if let Err(err) = track.detector.fit(values) {
                        exclude(track, err, &mut report)?;
                    }
                }
            }

            self.enter(ReplayState::ScoreAndReplay);
            let columns = score_batch(batch, tracks, &mut report)?;
            let rows = build_rows(batch, &columns);

            for window in segment(batch.times(), &clock) {
                pacer.wait_for(window.end_time)?;

                let window_rows = &rows[window.rows.clone()];
                let recreate = !target_ready;
                report.retries += upload_with_retry(
                    &mut self.sink,
                    window_rows,
                    &self.config.index_name,
                    recreate,
                    &self.config.retry,
                    &self.cancel,
                )?;

                if recreate {
                    target_ready = true;
                    if let Some(dashboard) = self.dashboard.as_mut() {
                        let active: Vec<String> =
                            columns.iter().map(|c| c.sensor.clone()).collect();
                        dashboard.generate(&active, &self.config.index_name)?;
                    }
                }

                let mut flagged = BTreeMap::new();
                for column in &columns {
                    let count = column.flags[window.rows.clone()]
                        .iter()
                        .filter(|f| **f)
                        .count();
                    *report.flagged.entry(column.sensor.clone()).or_default() += count;
                    flagged.insert(column.sensor.clone(), count);
                }
                if let Some(feed) = &self.feed {
                    feed.publish(FeedWindow {
                        start_time: window.start_time,
                        end_time: window.end_time,
                        rows: window.len(),
                        flagged,
                    });
                }

                info!(
                    batch = batch.index,
                    rows = window.len(),
                    start = %format_millis(window.start_time),
                    end = %format_millis(window.end_time),
                    "window emitted"
                );
                report.windows += 1;
                report.rows_emitted += window.len();
            }

            if !batch.is_first() {
                self.enter(ReplayState::UpdateModels);
                for track in tracks.iter_mut().filter(|t| t.active) {
                    let values = batch_values(batch, &track.name)?;
                    if let Err(err) = track.detector.update(values) {
                        exclude(track, err, &mut report)?;
                    }
                }
            }
        }

        self.enter(ReplayState::Done);
        if let Some(feed) = &self.feed {
            report.feed_dropped = feed.dropped();
        }
        info!(
            windows = report.windows,
            rows = report.rows_emitted,
            excluded = report.excluded.len(),
            "replay finished"
        );
        Ok(report)
    }

    fn enter(&mut self, state: ReplayState) {
        debug!(from = %self.state, to = %state, "replay state");
        self.state = state;
    }
}

fn batch_values<'a>(batch: &Batch<'a>, sensor: &str) -> Result<&'a [f64]> {
    batch
        .sensor(sensor)
        .ok_or_else(|| DsioError::MissingSensorFields(vec![sensor.to_string()]))
}

/// Deactivates the track on a sensor-local error; propagates anything else.
fn exclude(track: &mut SensorTrack, err: DsioError, report: &mut ReplayReport) -> Result<()> {
    if !err.is_sensor_local() {
        return Err(err);
    }
    warn!(sensor = %track.name, error = %err, "sensor excluded from scoring");
    track.active = false;
    report.excluded.insert(track.name.clone(), err.to_string());
    Ok(())
}

fn score_batch(
    batch: &Batch<'_>,
    tracks: &mut [SensorTrack],
    report: &mut ReplayReport,
) -> Result<Vec<ScoredColumn>> {
    let mut columns = Vec::new();
    for track in tracks.iter_mut().filter(|t| t.active) {
        let values = batch_values(batch, &track.name)?;
        let scored = track
            .detector
            .score_anomaly(values)
            .and_then(|scores| Ok((scores, track.detector.flag_anomaly(values)?)));
        match scored {
            Ok((scores, flags)) => columns.push(ScoredColumn {
                sensor: track.name.clone(),
                scores,
                flags,
            }),
            Err(err) => exclude(track, err, report)?,
        }
    }
    Ok(columns)
}

fn build_rows(batch: &Batch<'_>, columns: &[ScoredColumn]) -> Vec<ScoredRow> {
    let dataset = batch.dataset();
    let sensor_columns: Vec<(&str, &[f64])> = dataset
        .sensor_names()
        .filter_map(|name| batch.sensor(name).map(|values| (name, values)))
        .collect();

    batch
        .times()
        .iter()
        .enumerate()
        .map(|(i, &time)| {
            let mut row = ScoredRow::new();
            row.insert(dataset.time_field(), time);
            for (name, values) in &sensor_columns {
                row.insert(*name, values[i]);
            }
            for column in columns {
                row.insert(score_column(&column.sensor), column.scores[i]);
                row.insert(flag_column(&column.sensor), column.flags[i]);
            }
            row
        })
        .collect()
}

fn format_millis(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| ms.to_string())
}
