//! Virtual clock and time-window segmentation.
//!
//! Windows are half-open `[start_time, end_time)` intervals on a grid
//! anchored at the first timestamp of the run, so windows from consecutive
//! batches never move backwards in time. Only windows that contain rows are
//! produced, so the emitted sequence can skip grid steps. Segmentation runs
//! per batch: a grid window straddling a batch boundary comes out once from
//! each batch, with the same bounds and disjoint rows.

use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualClock {
    anchor: i64,
    interval: i64,
}

impl VirtualClock {
    /// `interval` must be positive.
    pub fn new(anchor: i64, interval: i64) -> Self {
        debug_assert!(interval > 0);
        Self { anchor, interval }
    }

    pub fn interval(&self) -> i64 {
        self.interval
    }

    /// Grid step containing `time`.
    pub fn step_of(&self, time: i64) -> i64 {
        (time - self.anchor).div_euclid(self.interval)
    }

    pub fn bounds(&self, step: i64) -> (i64, i64) {
        let start = self.anchor + step * self.interval;
        (start, start + self.interval)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_time: i64,
    pub end_time: i64,
    /// Rows relative to the segmented slice
    pub rows: Range<usize>,
}

impl TimeWindow {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Groups non-decreasing `times` into consecutive windows of `clock`.
///
/// Grid steps without rows yield no window. Row ranges partition `times`;
/// bounds are strictly increasing within one call.
pub fn segment(times: &[i64], clock: &VirtualClock) -> Vec<TimeWindow> {
    let mut windows: Vec<TimeWindow> = Vec::new();
    let mut current: Option<(i64, usize)> = None;

    for (row, time) in times.iter().enumerate() {
        let step = clock.step_of(*time);
        match current {
            Some((open_step, _)) if open_step == step => {}
            Some((open_step, start_row)) => {
                windows.push(window(clock, open_step, start_row..row));
                current = Some((step, row));
            }
            None => current = Some((step, row)),
        }
    }
    if let Some((open_step, start_row)) = current {
        windows.push(window(clock, open_step, start_row..times.len()));
    }
    windows
}

fn window(clock: &VirtualClock, step: i64, rows: Range<usize>) -> TimeWindow {
    let (start_time, end_time) = clock.bounds(step);
    TimeWindow {
        start_time,
        end_time,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_partition_rows() {
        let times = [0, 10, 999, 1000, 1500, 3999, 4000, 4000, 9000];
        let clock = VirtualClock::new(0, 1000);
        let windows = segment(&times, &clock);

        let starts: Vec<i64> = windows.iter().map(|w| w.start_time).collect();
        assert_eq!(starts, vec![0, 1000, 3000, 4000, 9000]);

        let mut next_row = 0;
        for w in &windows {
            assert_eq!(w.end_time - w.start_time, 1000);
            assert_eq!(w.rows.start, next_row);
            next_row = w.rows.end;
            for t in &times[w.rows.clone()] {
                assert!(*t >= w.start_time && *t < w.end_time);
            }
        }
        assert_eq!(next_row, times.len());
    }

    #[test]
    fn test_grid_is_shared_across_slices() {
        let clock = VirtualClock::new(100, 10_000);
        let first = segment(&[100, 5_000], &clock);
        let second = segment(&[9_000, 12_000], &clock);

        assert_eq!(first[0].end_time, 10_100);
        assert_eq!(second[0].start_time, 100);
        assert_eq!(second[1].start_time, 10_100);
    }

    #[test]
    fn test_straddling_window_repeats_bounds_per_slice() {
        let clock = VirtualClock::new(0, 1000);
        let times = [100, 400, 700, 1200];
        let (head, tail) = times.split_at(2);

        let first = segment(head, &clock);
        let second = segment(tail, &clock);
        assert_eq!((first[0].start_time, first[0].end_time), (0, 1000));
        assert_eq!((second[0].start_time, second[0].end_time), (0, 1000));
        assert_eq!(first[0].len() + second[0].len(), 3);
        assert_eq!(second[1].start_time, 1000);
    }

    #[test]
    fn test_empty_times() {
        assert!(segment(&[], &VirtualClock::new(0, 10)).is_empty());
    }

    #[test]
    fn test_step_before_anchor() {
        let clock = VirtualClock::new(1000, 100);
        assert_eq!(clock.step_of(950), -1);
        assert_eq!(clock.bounds(-1), (900, 1000));
    }
}
