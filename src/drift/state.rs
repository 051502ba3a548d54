//! Drift accounting shared between the telemetry listener and the controller.
//!
//! The listener is the only writer. All counters sit behind one lock so a
//! reader always sees the window and the cumulative error from the same
//! instant.

use crate::telemetry::FrameRateSample;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Instant;

#[derive(Debug)]
struct DriftCounters {
    total_frames: u64,
    cumulative_error: f64,
    window: VecDeque<f64>,
    total_rate_sum: f64,
}

/// Shared drift counters and rolling window
#[derive(Debug)]
pub struct DriftState {
    target_framerate: f64,
    capacity: usize,
    started_at: DateTime<Utc>,
    started: Instant,
    counters: Mutex<DriftCounters>,
}

/// Consistent view of the counters at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftSnapshot {
    pub total_frames: u64,
    pub cumulative_error: f64,
    pub window_len: usize,
    pub window_full: bool,
    /// Mean of the window, `None` while empty
    pub recent_average: Option<f64>,
}

/// Reporting view, as logged and printed by the simulator
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub total_frames: u64,
    pub effective_fps: f64,
    pub cumulative_error: f64,
    pub recent_average_fps: f64,
    pub overall_average_fps: f64,
}

impl DriftState {
    pub fn new(target_framerate: f64, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            target_framerate,
            capacity,
            started_at: Utc::now(),
            started: Instant::now(),
            counters: Mutex::new(DriftCounters {
                total_frames: 0,
                cumulative_error: 0.0,
                window: VecDeque::with_capacity(capacity),
                total_rate_sum: 0.0,
            }),
        }
    }

    pub fn target_framerate(&self) -> f64 {
        self.target_framerate
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Account one accepted sample and return the updated snapshot
    pub fn record(&self, sample: FrameRateSample) -> DriftSnapshot {
        let value = sample.value();
        let mut counters = self.counters.lock();

        counters.total_frames += 1;
        counters.total_rate_sum += value;
        counters.cumulative_error += value - self.target_framerate;

        if counters.window.len() == self.capacity {
            counters.window.pop_front();
        }
        counters.window.push_back(value);

        self.snapshot_locked(&counters)
    }

    pub fn snapshot(&self) -> DriftSnapshot {
        let counters = self.counters.lock();
        self.snapshot_locked(&counters)
    }

    pub fn cumulative_error(&self) -> f64 {
        self.counters.lock().cumulative_error
    }

    pub fn total_frames(&self) -> u64 {
        self.counters.lock().total_frames
    }

    /// Zero the accumulated error. Used once, when bound search completes.
    pub fn reset_cumulative_error(&self) {
        self.counters.lock().cumulative_error = 0.0;
    }

    /// Window contents, oldest first
    pub fn window(&self) -> Vec<f64> {
        self.counters.lock().window.iter().copied().collect()
    }

    pub fn report(&self) -> DriftReport {
        let counters = self.counters.lock();
        let elapsed_secs = self.started.elapsed().as_secs_f64();
        let snapshot = self.snapshot_locked(&counters);

        DriftReport {
            started_at: self.started_at,
            elapsed_secs,
            total_frames: counters.total_frames,
            effective_fps: if elapsed_secs > 0.0 {
                counters.total_frames as f64 / elapsed_secs
            } else {
                0.0
            },
            cumulative_error: counters.cumulative_error,
            recent_average_fps: snapshot.recent_average.unwrap_or(0.0),
            overall_average_fps: if counters.total_frames > 0 {
                counters.total_rate_sum / counters.total_frames as f64
            } else {
                0.0
            },
        }
    }

    fn snapshot_locked(&self, counters: &DriftCounters) -> DriftSnapshot {
        let window_len = counters.window.len();
        let recent_average = if window_len > 0 {
            Some(counters.window.iter().sum::<f64>() / window_len as f64)
        } else {
            None
        };

        DriftSnapshot {
            total_frames: counters.total_frames,
            cumulative_error: counters.cumulative_error,
            window_len,
            window_full: window_len == self.capacity,
            recent_average,
        }
    }
}
