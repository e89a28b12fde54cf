//! CSV ingestion: time-field detection, time normalisation to epoch
//! milliseconds, and numeric sensor extraction.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use dsio_core::config::DEFAULT_INDEX_NAME;
use dsio_core::{Dataset, DsioError};

/// Column names tried, in order, when no time field is given.
pub const TIME_CANDIDATES: [&str; 4] = ["time", "datetime", "date", "timestamp"];
/// Rows inspected when deciding whether a candidate column holds time.
const DETECTION_ROWS: usize = 10;
const SYNTHETIC_TIME_FIELD: &str = "time";

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read csv input: {0}")]
    Csv(#[from] csv::Error),

    #[error("row {row}: cannot parse time value {value:?}")]
    UnparsableTime { row: usize, value: String },

    #[error("input has no data rows")]
    Empty,

    #[error(transparent)]
    Dsio(#[from] DsioError),
}

impl LoadError {
    pub fn code(&self) -> i32 {
        match self {
            Self::Dsio(err) => err.code(),
            Self::UnparsableTime { .. } => 3,
            Self::Csv(_) | Self::Empty => 10,
        }
    }
}

/// How numeric time values are interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    #[default]
    Seconds,
    Millis,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit time column; detected from [`TIME_CANDIDATES`] when absent
    pub time_field: Option<String>,
    pub time_unit: TimeUnit,
}

/// A loaded table plus the columns left out because they were not numeric.
#[derive(Debug, Clone)]
pub struct LoadedTable {
    pub dataset: Dataset,
    pub non_numeric: Vec<String>,
    /// Whether the time column was generated rather than read
    pub synthetic_time: bool,
}

impl LoadedTable {
    /// Resolves a sensor selection. Requested non-numeric columns are
    /// dropped with a warning; names absent from the input are an error.
    pub fn select_sensors(&self, requested: Option<&[String]>) -> Result<Vec<String>, DsioError> {
        let Some(names) = requested else {
            return self.dataset.select_sensors(None);
        };
        let numeric: Vec<String> = names
            .iter()
            .filter(|name| {
                let skipped = self.non_numeric.contains(*name);
                if skipped {
                    warn!(sensor = %name, "ignoring non-numeric sensor");
                }
                !skipped
            })
            .cloned()
            .collect();
        self.dataset.select_sensors(Some(&numeric))
    }
}

pub fn load_csv(path: impl AsRef<Path>, options: &LoadOptions) -> Result<LoadedTable, LoadError> {
    let path = path.as_ref();
    info!(path = %path.display(), "loading data");
    let file = std::fs::File::open(path).map_err(DsioError::from)?;
    read_table(file, options)
}

pub fn read_table<R: Read>(reader: R, options: &LoadOptions) -> Result<LoadedTable, LoadError> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
    let records = csv_reader
        .records()
        .collect::<Result<Vec<csv::StringRecord>, csv::Error>>()?;
    if records.is_empty() {
        return Err(LoadError::Empty);
    }
    let column = |index: usize| {
        records
            .iter()
            .map(|r| r.get(index).unwrap_or("").trim())
            .collect::<Vec<&str>>()
    };

    let time_index = match &options.time_field {
        Some(field) => Some(
            headers
                .iter()
                .position(|h| h == field)
                .ok_or_else(|| DsioError::MissingTimeField(field.clone()))?,
        ),
        None => detect_time_field(&headers, &column, options.time_unit),
    };

    let (time_field, times, synthetic_time) = match time_index {
        Some(index) => {
            let times = column(index)
                .into_iter()
                .enumerate()
                .map(|(row, value)| {
                    parse_time(value, options.time_unit).ok_or_else(|| {
                        LoadError::UnparsableTime {
                            row,
                            value: value.to_string(),
                        }
                    })
                })
                .collect::<Result<Vec<i64>, LoadError>>()?;
            (headers[index].clone(), times, false)
        }
        None => {
            let start = Utc::now().timestamp() * 1000;
            let times = (0..records.len() as i64).map(|i| start + i * 1000).collect();
            info!(rows = records.len(), "no time field found, generating one at 1 s steps");
            (SYNTHETIC_TIME_FIELD.to_string(), times, true)
        }
    };

    let mut sensors = BTreeMap::new();
    let mut non_numeric = Vec::new();
    for (index, name) in headers.iter().enumerate() {
        if Some(index) == time_index {
            continue;
        }
        if *name == time_field {
            warn!(column = %name, "column shadows the generated time field, skipped");
            continue;
        }
        match parse_numeric(&column(index)) {
            Some(values) => {
                sensors.insert(name.clone(), values);
            }
            None => non_numeric.push(name.clone()),
        }
    }
    if !non_numeric.is_empty() {
        info!(columns = ?non_numeric, "non-numeric columns left out");
    }

    let dataset = Dataset::new(time_field, times, sensors)?;
    if let (Some(first), Some(last)) = (dataset.times().first(), dataset.times().last()) {
        info!(
            rows = dataset.len(),
            from = %format_millis(*first),
            to = %format_millis(*last),
            "data loaded"
        );
    }
    Ok(LoadedTable {
        dataset,
        non_numeric,
        synthetic_time,
    })
}

/// First candidate whose leading values parse as non-decreasing times.
fn detect_time_field<'a>(
    headers: &[String],
    column: &impl Fn(usize) -> Vec<&'a str>,
    unit: TimeUnit,
) -> Option<usize> {
    TIME_CANDIDATES.iter().find_map(|candidate| {
        let index = headers.iter().position(|h| h == candidate)?;
        let values = column(index);
        let parsed: Option<Vec<i64>> = values
            .iter()
            .take(DETECTION_ROWS)
            .map(|v| parse_time(v, unit))
            .collect();
        match parsed {
            Some(times) if times.windows(2).all(|w| w[0] <= w[1]) => Some(index),
            _ => None,
        }
    })
}

/// Epoch milliseconds from a numeric timestamp or a calendar date/time.
/// Calendar values without an offset are read as UTC.
pub fn parse_time(value: &str, unit: TimeUnit) -> Option<i64> {
    let value = value.trim();
    if let Ok(number) = value.parse::<f64>() {
        if !number.is_finite() {
            return None;
        }
        let millis = match unit {
            TimeUnit::Seconds => number * 1000.0,
            TimeUnit::Millis => number,
        };
        return Some(millis.floor() as i64);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Some(t.timestamp_millis());
    }
    for format in DATETIME_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(value, format) {
            return Some(t.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc().timestamp_millis())
}

/// Empty cells become NaN; any other unparsable cell makes the column
/// non-numeric. A column with no values at all is non-numeric too.
fn parse_numeric(values: &[&str]) -> Option<Vec<f64>> {
    if values.iter().all(|v| v.is_empty()) {
        return None;
    }
    values
        .iter()
        .map(|v| {
            if v.is_empty() {
                Some(f64::NAN)
            } else {
                v.parse::<f64>().ok()
            }
        })
        .collect()
}

fn format_millis(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

/// Index name from an input path: the file name up to its first `.`, then
/// up to its first `_`. Falls back to `dsio`.
pub fn index_name_from_path(path: impl AsRef<Path>) -> String {
    let name = path
        .as_ref()
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    let stem = name.split('.').next().unwrap_or("");
    let prefix = stem.split('_').next().unwrap_or("");
    if prefix.is_empty() {
        DEFAULT_INDEX_NAME.to_string()
    } else {
        prefix.to_lowercase()
    }
}
