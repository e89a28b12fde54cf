//! Wall-clock pacing of virtual windows, with cooperative cancellation.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::{DsioError, Result};

const UNREACHABLE_POLL: Duration = Duration::from_secs(3600);

/// Cloneable cancellation handle. Cancelling wakes any pending pacing wait.
#[derive(Clone, Debug)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            wake_tx,
            wake_rx,
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let _ = self.wake_tx.try_send(());
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Blocks for up to `timeout`; returns `true` if cancelled meanwhile.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        match self.wake_rx.recv_timeout(timeout) {
            Ok(()) => {
                // leave the wake-up in place for other waiters
                let _ = self.wake_tx.try_send(());
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                self.is_cancelled()
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Decides when a window ending at a virtual time may be emitted.
pub trait Pacer {
    /// Returns once the window ending at `end_time` (virtual ms) may be
    /// emitted, or `Err(Cancelled)`.
    fn wait_for(&mut self, end_time: i64) -> Result<()>;
}

/// Emits windows back-to-back; still honours cancellation between windows.
#[derive(Debug, Clone, Default)]
pub struct Unpaced {
    cancel: CancelToken,
}

impl Unpaced {
    pub fn new(cancel: CancelToken) -> Self {
        Self { cancel }
    }
}

impl Pacer for Unpaced {
    fn wait_for(&mut self, _end_time: i64) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(DsioError::Cancelled);
        }
        Ok(())
    }
}

/// Maps virtual time onto the wall clock.
///
/// The first window is released immediately and fixes the origin; every
/// later window waits until `origin + (end_time - first_end) / speed`.
#[derive(Debug, Clone)]
pub struct WallClockPacer {
    speed: f64,
    origin: Option<(Instant, i64)>,
    cancel: CancelToken,
}

impl WallClockPacer {
    pub fn new(speed: f64, cancel: CancelToken) -> Self {
        Self {
            speed,
            origin: None,
            cancel,
        }
    }

    /// `None` when the deadline lies beyond what `Instant` can represent.
    fn deadline(&self, origin: Instant, first_end: i64, end_time: i64) -> Option<Instant> {
        let virtual_ms = end_time.saturating_sub(first_end).max(0) as f64;
        let delay = Duration::try_from_secs_f64(virtual_ms / self.speed / 1000.0).ok()?;
        origin.checked_add(delay)
    }
}

impl Pacer for WallClockPacer {
    fn wait_for(&mut self, end_time: i64) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(DsioError::Cancelled);
        }
        let Some((origin, first_end)) = self.origin else {
            self.origin = Some((Instant::now(), end_time));
            return Ok(());
        };

        let Some(deadline) = self.deadline(origin, first_end, end_time) else {
            warn!(end_time, speed = self.speed, "window deadline unreachable, waiting for cancel");
            while !self.cancel.wait(UNREACHABLE_POLL) {}
            return Err(DsioError::Cancelled);
        };
        let now = Instant::now();
        if deadline > now && self.cancel.wait(deadline - now) {
            return Err(DsioError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_window_is_immediate() {
        let mut pacer = WallClockPacer::new(1.0, CancelToken::new());
        let start = Instant::now();
        pacer.wait_for(1_000_000).unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_waits_until_virtual_end() {
        let mut pacer = WallClockPacer::new(1.0, CancelToken::new());
        pacer.wait_for(1_000).unwrap();
        let start = Instant::now();
        pacer.wait_for(1_060).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(55));
    }

    #[test]
    fn test_speed_compresses_time() {
        let mut pacer = WallClockPacer::new(100.0, CancelToken::new());
        pacer.wait_for(0).unwrap();
        let start = Instant::now();
        pacer.wait_for(2_000).unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(15));
        assert!(elapsed < Duration::from_millis(1_000));
    }

    #[test]
    fn test_past_deadline_does_not_wait() {
        let mut pacer = WallClockPacer::new(1.0, CancelToken::new());
        pacer.wait_for(5_000).unwrap();
        let start = Instant::now();
        pacer.wait_for(4_000).unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_cancel_interrupts_wait() {
        let cancel = CancelToken::new();
        let mut pacer = WallClockPacer::new(1.0, cancel.clone());
        pacer.wait_for(0).unwrap();

        let trigger = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            trigger.cancel();
        });

        let start = Instant::now();
        let result = pacer.wait_for(60_000);
        assert!(matches!(result, Err(DsioError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_unrepresentable_deadline_waits_for_cancel() {
        let cancel = CancelToken::new();
        let mut pacer = WallClockPacer::new(1e-18, cancel.clone());
        pacer.wait_for(0).unwrap();

        let trigger = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            trigger.cancel();
        });

        let start = Instant::now();
        assert!(matches!(pacer.wait_for(10_000), Err(DsioError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_unpaced_checks_cancellation() {
        let cancel = CancelToken::new();
        let mut pacer = Unpaced::new(cancel.clone());
        assert!(pacer.wait_for(10).is_ok());
        cancel.cancel();
        assert!(matches!(pacer.wait_for(20), Err(DsioError::Cancelled)));
        assert!(cancel.wait(Duration::from_secs(10)));
    }
}
