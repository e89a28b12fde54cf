//! Dashboards - a static Kibana export and a live per-window feed.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::error::{DsioError, Result};
use crate::sink::score_column;

pub const REFRESH_INTERVAL_MS: u64 = 5000;
pub const TIME_FROM: &str = "now-15m";

/// Invoked once per run, after the sink target has been created.
pub trait DashboardGenerator {
    fn generate(&mut self, sensors: &[String], index_name: &str) -> Result<()>;
}

/// Writes Kibana saved objects (one line chart per sensor plus a dashboard
/// holding them) to a JSON file for import.
#[derive(Debug, Clone)]
pub struct KibanaDashboard {
    path: PathBuf,
}

impl KibanaDashboard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl DashboardGenerator for KibanaDashboard {
    fn generate(&mut self, sensors: &[String], index_name: &str) -> Result<()> {
        let objects = saved_objects(sensors, index_name);
        let text = serde_json::to_string_pretty(&objects)
            .map_err(|e| DsioError::Dashboard(e.to_string()))?;
        std::fs::write(&self.path, text).map_err(|e| {
            DsioError::Dashboard(format!("cannot write {}: {}", self.path.display(), e))
        })?;
        info!(path = %self.path.display(), panels = sensors.len(), "dashboard written");
        Ok(())
    }
}

fn match_all() -> Value {
    json!({ "query_string": { "analyze_wildcard": true, "query": "*" } })
}

fn visualization(sensor: &str, index_name: &str) -> Value {
    let title = format!("{}-{}", index_name, sensor);
    let vis_state = json!({
        "title": title,
        "type": "line",
        "params": {
            "addLegend": true,
            "addTimeMarker": true,
            "addTooltip": true,
            "defaultYExtents": true,
            "drawLinesBetweenPoints": true,
            "interpolate": "linear",
            "scale": "linear",
            "shareYAxis": true,
            "showCircles": true,
            "smoothLines": true
        },
        "aggs": [{
            "id": "2",
            "type": "max",
            "schema": "radius",
            "params": { "field": score_column(sensor) }
        }]
    });
    let search_source = json!({ "index": index_name, "query": match_all(), "filter": [] });

    json!({
        "id": title,
        "type": "visualization",
        "attributes": {
            "title": title,
            "visState": vis_state.to_string(),
            "kibanaSavedObjectMeta": { "searchSourceJSON": search_source.to_string() }
        }
    })
}

/// Saved-object list: visualizations first, then the dashboard.
pub fn saved_objects(sensors: &[String], index_name: &str) -> Vec<Value> {
    let mut objects: Vec<Value> = sensors
        .iter()
        .map(|s| visualization(s, index_name))
        .collect();

    let panels: Vec<Value> = sensors
        .iter()
        .enumerate()
        .map(|(i, sensor)| {
            json!({
                "id": format!("{}-{}", index_name, sensor),
                "panelIndex": i,
                "row": i,
                "col": i,
                "size_x": 7,
                "size_y": 4,
                "type": "visualization"
            })
        })
        .collect();

    let search_source = json!({ "filter": [{ "query": match_all() }] });
    objects.push(json!({
        "id": format!("{}-dashboard", index_name),
        "type": "dashboard",
        "attributes": {
            "title": format!("{} dashboard", index_name),
            "panelsJSON": Value::Array(panels).to_string(),
            "optionsJSON": json!({ "darkTheme": true }).to_string(),
            "timeRestore": true,
            "timeFrom": TIME_FROM,
            "timeTo": "now",
            "refreshInterval": { "display": "5 seconds", "pause": false, "value": REFRESH_INTERVAL_MS },
            "kibanaSavedObjectMeta": { "searchSourceJSON": search_source.to_string() }
        }
    }));
    objects
}

/// Summary of one emitted window for live consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedWindow {
    pub start_time: i64,
    pub end_time: i64,
    pub rows: usize,
    /// Flagged rows per sensor within the window
    pub flagged: BTreeMap<String, usize>,
}

/// Producer half of the live feed. Never blocks: a full queue drops the
/// window and counts it.
#[derive(Debug, Clone)]
pub struct LiveFeed {
    tx: Sender<FeedWindow>,
    dropped: Arc<AtomicU64>,
}

impl LiveFeed {
    pub fn bounded(capacity: usize) -> (Self, Receiver<FeedWindow>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Returns `false` when the window was dropped.
    pub fn publish(&self, window: FeedWindow) -> bool {
        match self.tx.try_send(window) {
            Ok(()) => true,
            Err(TrySendError::Full(w)) | Err(TrySendError::Disconnected(w)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(start = w.start_time, "live feed dropped window");
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: i64) -> FeedWindow {
        FeedWindow {
            start_time: start,
            end_time: start + 10,
            rows: 1,
            flagged: BTreeMap::new(),
        }
    }

    #[test]
    fn test_saved_objects_layout() {
        let sensors = vec!["rpm".to_string(), "speed".to_string()];
        let objects = saved_objects(&sensors, "car");
        assert_eq!(objects.len(), 3);
        assert_eq!(objects[0]["id"], "car-rpm");

        let vis: Value =
            serde_json::from_str(objects[1]["attributes"]["visState"].as_str().unwrap()).unwrap();
        assert_eq!(vis["aggs"][0]["type"], "max");
        assert_eq!(vis["aggs"][0]["params"]["field"], "SCORE_speed");

        let dash = &objects[2];
        assert_eq!(dash["id"], "car-dashboard");
        assert_eq!(dash["attributes"]["timeFrom"], "now-15m");
        assert_eq!(dash["attributes"]["refreshInterval"]["value"], 5000);
        let panels: Value =
            serde_json::from_str(dash["attributes"]["panelsJSON"].as_str().unwrap()).unwrap();
        assert_eq!(panels.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_kibana_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut dashboard = KibanaDashboard::new(dir.path().join("dash.json"));
        dashboard.generate(&["a".to_string()], "dsio").unwrap();

        let text = std::fs::read_to_string(dashboard.path()).unwrap();
        let objects: Vec<Value> = serde_json::from_str(&text).unwrap();
        assert_eq!(objects.len(), 2);
    }

    #[test]
    fn test_kibana_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut dashboard = KibanaDashboard::new(dir.path().join("missing").join("dash.json"));
        assert!(matches!(
            dashboard.generate(&[], "dsio"),
            Err(DsioError::Dashboard(_))
        ));
    }

    #[test]
    fn test_full_feed_drops_without_blocking() {
        let (feed, rx) = LiveFeed::bounded(2);
        assert!(feed.publish(window(0)));
        assert!(feed.publish(window(10)));
        assert!(!feed.publish(window(20)));
        assert_eq!(feed.dropped(), 1);

        assert_eq!(rx.recv().unwrap().start_time, 0);
        assert!(feed.publish(window(30)));
    }
}
