//! Live console view of the replay, fed from the replayer's bounded queue.

use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use std::io::Write;
use std::thread::JoinHandle;

use dsio_core::dashboard::FeedWindow;

pub fn render(window: &FeedWindow) -> String {
    let time = |ms: i64| {
        DateTime::<Utc>::from_timestamp_millis(ms)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| ms.to_string())
    };
    let flagged: Vec<String> = window
        .flagged
        .iter()
        .map(|(sensor, count)| format!("{}={}", sensor, count))
        .collect();
    format!(
        "[{} .. {}] rows={:<5} flagged: {}",
        time(window.start_time),
        time(window.end_time),
        window.rows,
        if flagged.is_empty() {
            "-".to_string()
        } else {
            flagged.join(" ")
        }
    )
}

/// Prints every received window until the producer side is dropped.
/// Returns the number of windows shown.
pub fn spawn_console_feed(rx: Receiver<FeedWindow>) -> JoinHandle<usize> {
    std::thread::spawn(move || {
        let mut shown = 0;
        let stdout = std::io::stdout();
        for window in rx.iter() {
            let mut out = stdout.lock();
            if writeln!(out, "{}", render(&window)).is_err() {
                break;
            }
            shown += 1;
        }
        shown
    })
}
