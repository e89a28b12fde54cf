//! In-memory sensor table and its batch segmentation.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::error::{DsioError, Result};

/// Column-oriented table with one millisecond time column and numeric sensors.
///
/// Time values are validated non-decreasing on construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    time_field: String,
    times: Vec<i64>,
    sensors: BTreeMap<String, Vec<f64>>,
}

impl Dataset {
    pub fn new(
        time_field: impl Into<String>,
        times: Vec<i64>,
        sensors: BTreeMap<String, Vec<f64>>,
    ) -> Result<Self> {
        let time_field = time_field.into();
        if times.is_empty() {
            return Err(DsioError::InvalidSample("dataset has no rows".to_string()));
        }
        for (name, column) in &sensors {
            if column.len() != times.len() {
                return Err(DsioError::invalid_parameter(
                    "sensors",
                    format!(
                        "column {} has {} rows, time field has {}",
                        name,
                        column.len(),
                        times.len()
                    ),
                ));
            }
        }
        if let Some(row) = times.windows(2).position(|w| w[1] < w[0]) {
            return Err(DsioError::UnorderedTime {
                row: row + 1,
                previous: times[row],
                current: times[row + 1],
            });
        }
        Ok(Self {
            time_field,
            times,
            sensors,
        })
    }

    pub fn time_field(&self) -> &str {
        &self.time_field
    }

    pub fn times(&self) -> &[i64] {
        &self.times
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn sensor_names(&self) -> impl Iterator<Item = &str> {
        self.sensors.keys().map(String::as_str)
    }

    pub fn sensor(&self, name: &str) -> Option<&[f64]> {
        self.sensors.get(name).map(Vec::as_slice)
    }

    /// Validates a sensor selection; `None` selects every sensor column.
    pub fn select_sensors(&self, requested: Option<&[String]>) -> Result<Vec<String>> {
        match requested {
            None => Ok(self.sensors.keys().cloned().collect()),
            Some(names) => {
                let missing: Vec<String> = names
                    .iter()
                    .filter(|n| !self.sensors.contains_key(n.as_str()))
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    return Err(DsioError::MissingSensorFields(missing));
                }
                let mut selected = names.to_vec();
                selected.sort();
                selected.dedup();
                Ok(selected)
            }
        }
    }

    /// Splits rows into `ceil(len / max_batch_size)` contiguous batches whose
    /// sizes differ by at most one, larger batches first.
    pub fn batches(&self, max_batch_size: usize) -> Vec<Batch<'_>> {
        batch_ranges(self.len(), max_batch_size)
            .into_iter()
            .enumerate()
            .map(|(index, rows)| Batch {
                index,
                rows,
                dataset: self,
            })
            .collect()
    }
}

/// Row ranges for an even split into batches of at most `max_batch_size`.
pub fn batch_ranges(len: usize, max_batch_size: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let max = max_batch_size.max(1);
    let count = len.div_ceil(max);
    let base = len / count;
    let extra = len % count;

    let mut ranges = Vec::with_capacity(count);
    let mut start = 0;
    for i in 0..count {
        let size = base + usize::from(i < extra);
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}

/// Borrowed view over a contiguous slice of rows.
#[derive(Debug, Clone)]
pub struct Batch<'a> {
    pub index: usize,
    pub rows: Range<usize>,
    dataset: &'a Dataset,
}

impl<'a> Batch<'a> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_first(&self) -> bool {
        self.index == 0
    }

    pub fn times(&self) -> &'a [i64] {
        &self.dataset.times[self.rows.clone()]
    }

    pub fn sensor(&self, name: &str) -> Option<&'a [f64]> {
        self.dataset
            .sensors
            .get(name)
            .map(|column| &column[self.rows.clone()])
    }

    pub fn dataset(&self) -> &'a Dataset {
        self.dataset
    }
}
