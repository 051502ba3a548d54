//! Telemetry listener task
//!
//! Consumes stats payloads in delivery order and feeds accepted samples into
//! [`DriftState`]. Malformed payloads are logged and skipped.

use super::state::{DriftSnapshot, DriftState};
use crate::shutdown::Shutdown;
use crate::telemetry::{parse_stats, TelemetryStream};
use std::sync::Arc;

/// Account one payload. Returns the updated snapshot when a sample was accepted.
pub fn handle_payload(state: &DriftState, payload: &str) -> Option<DriftSnapshot> {
    let sample = match parse_stats(payload) {
        Ok(Some(sample)) => sample,
        Ok(None) => {
            tracing::trace!("Stats payload without usable framerate");
            return None;
        }
        Err(e) => {
            tracing::warn!("Discarding stats payload: {}", e);
            return None;
        }
    };

    let snapshot = state.record(sample);

    if tracing::enabled!(tracing::Level::DEBUG) {
        let report = state.report();
        tracing::debug!(
            "Current Frame Rate: {:.6} FPS | Effective FPS: {:.6} | Cumulative Error: {:.6} | \
             Recent Average FPS (Last {}): {:.6} | Overall Average FPS: {:.6}",
            sample.value(),
            report.effective_fps,
            snapshot.cumulative_error,
            snapshot.window_len,
            report.recent_average_fps,
            report.overall_average_fps
        );
    }

    Some(snapshot)
}

/// Run until the stats channel closes or shutdown is triggered
pub async fn run_listener(mut stream: TelemetryStream, state: Arc<DriftState>, mut shutdown: Shutdown) {
    tracing::info!(
        "Telemetry listener started (target {:.3} fps)",
        state.target_framerate()
    );

    loop {
        tokio::select! {
            _ = shutdown.wait() => {
                tracing::info!("Telemetry listener stopping");
                break;
            }
            payload = stream.next_payload() => match payload {
                Some(payload) => {
                    handle_payload(&state, &payload);
                }
                None => {
                    tracing::warn!("Stats channel closed, telemetry listener exiting");
                    break;
                }
            },
        }
    }
}
