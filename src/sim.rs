//! Simulated capture pipeline
//!
//! Stands in for the camera: follows the commanded frame rate key, runs it
//! through a skewed clock, and publishes one stats record per frame. Jitter
//! alternates sign frame to frame so it cancels out over any even number of
//! frames.

use crate::config::FrameKeeperConfig;
use crate::shutdown::Shutdown;
use crate::store::ParameterStore;
use crate::telemetry::StatsMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct SimulationParams {
    /// Rate used until the first command arrives
    pub initial_rate: f64,
    /// Fractional clock error; -0.0001 runs 100 ppm slow
    pub clock_skew: f64,
    /// Peak per-frame deviation of the reported rate
    pub jitter: f64,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            initial_rate: 24.0,
            clock_skew: -0.0001,
            jitter: 0.0,
        }
    }
}

pub struct SimulatedCamera {
    store: Arc<dyn ParameterStore>,
    params: SimulationParams,
    stats_channel: String,
    controls_channel: String,
    fps_key: String,
    fps_actual_key: String,
}

impl SimulatedCamera {
    pub fn new(config: &FrameKeeperConfig, store: Arc<dyn ParameterStore>, params: SimulationParams) -> Self {
        Self {
            store,
            params,
            stats_channel: config.channels.stats.clone(),
            controls_channel: config.channels.controls.clone(),
            fps_key: config.keys.fps.clone(),
            fps_actual_key: config.keys.fps_actual.clone(),
        }
    }

    /// Rate the sensor actually produces for a commanded rate
    pub fn measured_rate(&self, commanded: f64) -> f64 {
        commanded * (1.0 + self.params.clock_skew)
    }

    pub fn spawn(self, shutdown: Shutdown) -> JoinHandle<()> {
        let controls = self.store.subscribe(&self.controls_channel);
        tokio::spawn(self.run(controls, shutdown))
    }

    async fn run(self, mut controls: tokio::sync::broadcast::Receiver<String>, mut shutdown: Shutdown) {
        let mut measured = self.measured_rate(self.params.initial_rate);
        let mut frame_count: u64 = 0;
        let mut next_frame = Instant::now() + frame_period(measured);
        self.report_actual(measured).await;

        tracing::info!(
            "Simulated camera running at {:.6} fps (skew {:+.6})",
            measured,
            self.params.clock_skew
        );

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep_until(next_frame) => {
                    frame_count += 1;
                    let sign = if frame_count % 2 == 0 { 1.0 } else { -1.0 };
                    let message = StatsMessage {
                        framerate: Some(measured + sign * self.params.jitter),
                        frame_count: Some(frame_count),
                    };
                    match serde_json::to_string(&message) {
                        Ok(payload) => {
                            if let Err(e) = self.store.publish(&self.stats_channel, &payload).await {
                                tracing::warn!("Simulated camera failed to publish stats: {}", e);
                            }
                        }
                        Err(e) => tracing::warn!("Simulated camera failed to encode stats: {}", e),
                    }
                    next_frame += frame_period(measured);
                }
                key = controls.recv() => match key {
                    Ok(key) if key == self.fps_key => {
                        if let Some(rate) = self.read_commanded().await {
                            measured = self.measured_rate(rate);
                            self.report_actual(measured).await;
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Simulated camera missed {} control notifications", skipped);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        tracing::info!("Simulated camera stopped after {} frames", frame_count);
    }

    async fn read_commanded(&self) -> Option<f64> {
        match self.store.get(&self.fps_key).await {
            Ok(Some(value)) => match value.parse::<f64>() {
                Ok(rate) if rate > 0.0 => Some(rate),
                _ => {
                    tracing::warn!("Simulated camera ignoring {}={:?}", self.fps_key, value);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Simulated camera failed to read {}: {}", self.fps_key, e);
                None
            }
        }
    }

    async fn report_actual(&self, measured: f64) {
        if let Err(e) = self.store.set(&self.fps_actual_key, &measured.to_string()).await {
            tracing::warn!("Simulated camera failed to set {}: {}", self.fps_actual_key, e);
        }
    }
}

fn frame_period(rate: f64) -> Duration {
    Duration::from_secs_f64(1.0 / rate.max(1e-3))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::shutdown_channel;
    use crate::store::MemoryStore;
    use crate::telemetry::parse_stats;

    #[tokio::test(start_paused = true)]
    async fn test_camera_follows_commanded_rate() {
        let config = FrameKeeperConfig::default();
        let store = MemoryStore::new(config.channels.controls.clone());
        let mut stats = store.subscribe(&config.channels.stats);
        let (trigger, shutdown) = shutdown_channel();

        let camera = SimulatedCamera::new(
            &config,
            Arc::new(store.client("camera")),
            SimulationParams {
                initial_rate: 24.0,
                clock_skew: 0.0,
                jitter: 0.0,
            },
        );
        let task = camera.spawn(shutdown);

        let first = parse_stats(&stats.recv().await.unwrap()).unwrap().unwrap();
        assert_eq!(first.value(), 24.0);

        store.set("fps", "30").await.unwrap();
        // Drain until the new rate shows up
        let mut latest = first.value();
        for _ in 0..5 {
            latest = parse_stats(&stats.recv().await.unwrap()).unwrap().unwrap().value();
        }
        assert_eq!(latest, 30.0);
        assert_eq!(store.get("fps_actual").await.unwrap().as_deref(), Some("30"));

        trigger.trigger();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_cancels_over_pairs() {
        let config = FrameKeeperConfig::default();
        let store = MemoryStore::new(config.channels.controls.clone());
        let mut stats = store.subscribe(&config.channels.stats);
        let (trigger, shutdown) = shutdown_channel();

        let camera = SimulatedCamera::new(
            &config,
            Arc::new(store.client("camera")),
            SimulationParams {
                initial_rate: 24.0,
                clock_skew: 0.0,
                jitter: 0.5,
            },
        );
        let task = camera.spawn(shutdown);

        let a = parse_stats(&stats.recv().await.unwrap()).unwrap().unwrap().value();
        let b = parse_stats(&stats.recv().await.unwrap()).unwrap().unwrap().value();
        assert_eq!(a, 23.5);
        assert_eq!(b, 24.5);

        trigger.trigger();
        task.await.unwrap();
    }
}
