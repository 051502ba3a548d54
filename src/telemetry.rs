//! Capture statistics
//!
//! The capture pipeline publishes one JSON record per frame on the stats
//! channel. Only the `framerate` field matters here; everything else in the
//! record is ignored.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Malformed stats payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// One stats record as published by the capture pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsMessage {
    #[serde(default)]
    pub framerate: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<u64>,
}

/// Instantaneous measured frame rate. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct FrameRateSample(f64);

impl FrameRateSample {
    /// Accepts only finite positive rates
    pub fn new(value: f64) -> Option<Self> {
        (value.is_finite() && value > 0.0).then_some(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

/// Parse a stats payload.
///
/// `Ok(None)` means the record is well-formed but carries no usable rate
/// (absent, zero or negative).
pub fn parse_stats(payload: &str) -> Result<Option<FrameRateSample>, TelemetryError> {
    let message: StatsMessage = serde_json::from_str(payload.trim())?;
    Ok(message.framerate.and_then(FrameRateSample::new))
}

/// Ordered stream of raw payloads from the stats channel
pub struct TelemetryStream {
    rx: broadcast::Receiver<String>,
}

impl TelemetryStream {
    pub fn new(rx: broadcast::Receiver<String>) -> Self {
        Self { rx }
    }

    /// Next payload in delivery order; `None` once the channel is gone.
    ///
    /// A lagging receiver skips the overwritten messages and keeps going.
    pub async fn next_payload(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Stats channel lagged, {} messages dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
