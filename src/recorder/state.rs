//! Recording state management
//!
//! Defines the mediator's state machine, the recording flags mirrored in the
//! store, and session tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Store key holding the operator's intent to record
pub const IS_RECORDING: &str = "is_recording";

/// Store key mirroring the storage write acknowledgement
pub const IS_WRITING: &str = "is_writing";

/// Store key telling the pipeline to buffer frames for writing
pub const IS_WRITING_BUF: &str = "is_writing_buf";

/// Current state of the recording mediator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording in progress
    #[default]
    Idle,
    /// Recording asserted and storage writing
    Recording,
    /// Storage paused; grace timer running
    Stopping,
}

/// Parse a flag value as written to the store.
///
/// Integers are truthy when non-zero; `true`/`false` are accepted as well.
pub fn parse_flag(value: &str) -> Option<bool> {
    let value = value.trim();
    if let Ok(n) = value.parse::<i64>() {
        return Some(n != 0);
    }
    match value.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Store representation of a flag
pub fn flag_value(on: bool) -> &'static str {
    if on {
        "1"
    } else {
        "0"
    }
}

/// Why a recording session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    /// `is_recording` was cleared externally
    Command,
    /// Storage stayed paused past the grace period
    TimerExpired,
    /// The storage device disappeared
    StorageRemoved,
}

/// One recording cycle, from assertion to stop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    /// Correlation id for logs
    pub id: Uuid,

    pub started_at: DateTime<Utc>,

    pub ended_at: Option<DateTime<Utc>>,

    /// Storage write pauses seen during the session
    pub write_pauses: u32,

    pub stop_reason: Option<StopReason>,
}

impl RecordingSession {
    /// Create a new session starting now
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: None,
            write_pauses: 0,
            stop_reason: None,
        }
    }

    /// End the session
    pub fn end(&mut self, reason: StopReason) {
        self.ended_at = Some(Utc::now());
        self.stop_reason = Some(reason);
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self::new()
    }
}
