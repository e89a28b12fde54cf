use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use super::{ScoredRow, Sink, SinkError};

/// Writes each target as `<dir>/<index_name>.jsonl`, one row per line.
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    dir: PathBuf,
}

impl JsonLinesSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, index_name: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", index_name))
    }

    fn open(&self, path: &Path, recreate: bool) -> std::io::Result<File> {
        std::fs::create_dir_all(&self.dir)?;
        if recreate {
            File::create(path)
        } else {
            OpenOptions::new().create(true).append(true).open(path)
        }
    }
}

fn classify(err: std::io::Error) -> SinkError {
    match err.kind() {
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut => {
            SinkError::Transient(err.to_string())
        }
        _ => SinkError::Fatal(err.to_string()),
    }
}

impl Sink for JsonLinesSink {
    fn upload(
        &mut self,
        rows: &[ScoredRow],
        index_name: &str,
        recreate: bool,
    ) -> Result<(), SinkError> {
        let path = self.path_for(index_name);
        if recreate {
            info!(path = %path.display(), "recreating output file");
        }
        let file = self.open(&path, recreate).map_err(classify)?;
        let mut writer = BufWriter::new(file);
        for row in rows {
            serde_json::to_writer(&mut writer, row)
                .map_err(|e| SinkError::Fatal(e.to_string()))?;
            writer.write_all(b"\n").map_err(classify)?;
        }
        writer.flush().map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(t: i64) -> ScoredRow {
        let mut row = ScoredRow::new();
        row.insert("time", t);
        row
    }

    #[test]
    fn test_recreate_truncates_then_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonLinesSink::new(dir.path().join("out"));

        sink.upload(&[row(1), row(2)], "run", true).unwrap();
        sink.upload(&[row(3)], "run", false).unwrap();
        let text = std::fs::read_to_string(sink.path_for("run")).unwrap();
        assert_eq!(text.lines().count(), 3);

        sink.upload(&[row(4)], "run", true).unwrap();
        let text = std::fs::read_to_string(sink.path_for("run")).unwrap();
        assert_eq!(text, "{\"time\":4}\n");
    }
}
