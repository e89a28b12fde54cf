//! Elasticsearch-compatible HTTP sink.

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

use super::{ScoredRow, Sink, SinkError};

pub const DEFAULT_ELASTIC_URL: &str = "http://localhost:9200";

pub struct ElasticSink {
    base_url: String,
    time_field: String,
    client: Client,
}

impl ElasticSink {
    pub fn new(base_url: &str, time_field: &str, timeout_ms: u64) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| SinkError::Fatal(format!("cannot build http client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            time_field: time_field.to_string(),
            client,
        })
    }

    fn index_url(&self, index_name: &str) -> String {
        format!("{}/{}", self.base_url, index_name)
    }

    fn recreate_index(&self, index_name: &str) -> Result<(), SinkError> {
        let url = self.index_url(index_name);
        let response = self.client.delete(&url).send().map_err(transport)?;
        if response.status() != StatusCode::NOT_FOUND {
            check_status(response)?;
        }

        let response = self
            .client
            .put(&url)
            .json(&index_mapping(&self.time_field))
            .send()
            .map_err(transport)?;
        check_status(response)?;
        info!(index = index_name, "index recreated");
        Ok(())
    }
}

impl std::fmt::Debug for ElasticSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticSink")
            .field("base_url", &self.base_url)
            .field("time_field", &self.time_field)
            .finish()
    }
}

/// Index body mapping the time field as epoch milliseconds.
pub fn index_mapping(time_field: &str) -> Value {
    json!({
        "mappings": {
            "properties": {
                time_field: { "type": "date", "format": "epoch_millis" }
            }
        }
    })
}

/// NDJSON body for the `_bulk` endpoint, newline-terminated.
pub fn bulk_body(rows: &[ScoredRow], index_name: &str) -> Result<String, SinkError> {
    let action = json!({ "index": { "_index": index_name } }).to_string();
    let mut body = String::new();
    for row in rows {
        body.push_str(&action);
        body.push('\n');
        let doc = serde_json::to_string(row).map_err(|e| SinkError::Fatal(e.to_string()))?;
        body.push_str(&doc);
        body.push('\n');
    }
    Ok(body)
}

/// Throttling and server errors are worth another attempt.
pub fn classify_status(status: StatusCode, body: &str) -> Result<(), SinkError> {
    if status.is_success() {
        return Ok(());
    }
    let reason = format!("{}: {}", status, body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(SinkError::Transient(reason))
    } else {
        Err(SinkError::Fatal(reason))
    }
}

fn check_status(response: Response) -> Result<Value, SinkError> {
    let status = response.status();
    let body = response.text().map_err(transport)?;
    classify_status(status, &body)?;
    Ok(serde_json::from_str(&body).unwrap_or(Value::Null))
}

fn transport(err: reqwest::Error) -> SinkError {
    SinkError::Transient(err.to_string())
}

impl Sink for ElasticSink {
    fn upload(
        &mut self,
        rows: &[ScoredRow],
        index_name: &str,
        recreate: bool,
    ) -> Result<(), SinkError> {
        if recreate {
            self.recreate_index(index_name)?;
        }
        if rows.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(format!("{}/_bulk", self.base_url))
            .header("Content-Type", "application/x-ndjson")
            .body(bulk_body(rows, index_name)?)
            .send()
            .map_err(transport)?;
        let reply = check_status(response)?;
        if reply.get("errors").and_then(Value::as_bool) == Some(true) {
            return Err(SinkError::Fatal(format!(
                "bulk upload to {} reported item errors",
                index_name
            )));
        }
        debug!(count = rows.len(), index = index_name, "bulk upload accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_body_pairs_action_and_document() {
        let mut row = ScoredRow::new();
        row.insert("time", 1000);
        row.insert("SCORE_a", 0.5);
        let body = bulk_body(&[row.clone(), row], "sensors").unwrap();
        let lines: Vec<&str> = body.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], r#"{"index":{"_index":"sensors"}}"#);
        assert_eq!(lines[1], r#"{"SCORE_a":0.5,"time":1000}"#);
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_mapping_uses_time_field() {
        let mapping = index_mapping("ts");
        assert_eq!(mapping["mappings"]["properties"]["ts"]["type"], "date");
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::OK, "").is_ok());
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, ""),
            Err(SinkError::Transient(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            Err(SinkError::Transient(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "mapper_parsing_exception"),
            Err(SinkError::Fatal(reason)) if reason.contains("mapper_parsing_exception")
        ));
    }

    #[test]
    fn test_unreachable_host_is_transient() {
        let mut sink = ElasticSink::new("http://127.0.0.1:1", "time", 200).unwrap();
        let result = sink.upload(&[ScoredRow::new()], "dsio", false);
        assert!(matches!(result, Err(SinkError::Transient(_))));
    }
}
