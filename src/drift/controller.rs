//! Drift controller
//!
//! Owns the two long-lived tasks:
//! - the telemetry listener, sole writer of [`DriftState`]
//! - the control task, which runs bound search once and then flip-switches
//!   until shutdown
//!
//! The bound pair and flip state belong to the control task; the status
//! handle only receives copies for reporting.

use super::bounds::{search_bounds, BoundPair, BoundSearchParams};
use super::command::RateCommander;
use super::flip::{FlipParams, FlipState, FlipSwitcher};
use super::listener::run_listener;
use super::state::{DriftReport, DriftState};
use crate::config::FrameKeeperConfig;
use crate::shutdown::Shutdown;
use crate::store::ParameterStore;
use crate::telemetry::TelemetryStream;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Controller phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DriftPhase {
    /// Tasks not yet spawned
    Idle,
    /// Scanning candidates for the bound pair
    BoundSearch,
    /// Alternating between the bounds
    FlipSwitching,
    /// Shut down
    Stopped,
}

#[derive(Debug, Clone)]
struct ControlStatus {
    phase: DriftPhase,
    sweep: u32,
    bounds: Option<BoundPair>,
    flip: Option<FlipState>,
    commanded: Option<f64>,
    flips: u64,
}

/// Status snapshot for logging and the simulator
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftStatus {
    pub phase: DriftPhase,
    pub sweep: u32,
    pub bounds: Option<BoundPair>,
    pub use_lower: Option<bool>,
    pub commanded_fps: Option<f64>,
    pub flips: u64,
    #[serde(flatten)]
    pub report: DriftReport,
}

/// Join handles of the spawned controller tasks
pub struct DriftTasks {
    pub listener: JoinHandle<()>,
    pub control: JoinHandle<()>,
}

impl DriftTasks {
    pub async fn join(self) {
        if let Err(e) = self.listener.await {
            tracing::error!("Telemetry listener task failed: {}", e);
        }
        if let Err(e) = self.control.await {
            tracing::error!("Drift control task failed: {}", e);
        }
    }
}

/// Frame-rate drift controller
pub struct DriftController {
    state: Arc<DriftState>,
    store: Arc<dyn ParameterStore>,
    commander: RateCommander,
    stats_channel: String,
    search: BoundSearchParams,
    flip: FlipParams,
    status: Arc<RwLock<ControlStatus>>,
}

impl DriftController {
    pub fn new(config: &FrameKeeperConfig, store: Arc<dyn ParameterStore>) -> Self {
        let target = config.target_framerate;
        let drift = &config.drift;

        Self {
            state: Arc::new(DriftState::new(target, drift.window_capacity)),
            commander: RateCommander::new(store.clone(), config.keys.fps.clone()),
            store,
            stats_channel: config.channels.stats.clone(),
            search: BoundSearchParams {
                target,
                step: drift.step,
                margin: drift.margin,
                settle: drift.settle_duration(target),
            },
            flip: FlipParams {
                error_threshold: drift.error_threshold,
                interval: drift.monitoring_interval(),
            },
            status: Arc::new(RwLock::new(ControlStatus {
                phase: DriftPhase::Idle,
                sweep: 0,
                bounds: None,
                flip: None,
                commanded: None,
                flips: 0,
            })),
        }
    }

    pub fn state(&self) -> Arc<DriftState> {
        self.state.clone()
    }

    pub fn status(&self) -> DriftStatus {
        Self::build_status(&self.status, &self.state)
    }

    /// Status reader usable after the controller has been spawned
    pub fn status_handle(&self) -> DriftStatusHandle {
        DriftStatusHandle {
            status: self.status.clone(),
            state: self.state.clone(),
        }
    }

    fn build_status(status: &RwLock<ControlStatus>, state: &DriftState) -> DriftStatus {
        let status = status.read().clone();
        DriftStatus {
            phase: status.phase,
            sweep: status.sweep,
            bounds: status.bounds,
            use_lower: status.flip.map(|f| f.use_lower),
            commanded_fps: status.commanded,
            flips: status.flips,
            report: state.report(),
        }
    }

    /// Spawn the listener and control tasks.
    ///
    /// The stats subscription is taken before returning, so no message
    /// published after this call is missed.
    pub fn spawn(self, shutdown: Shutdown) -> DriftTasks {
        let stream = TelemetryStream::new(self.store.subscribe(&self.stats_channel));
        let listener = tokio::spawn(run_listener(stream, self.state.clone(), shutdown.clone()));
        let control = tokio::spawn(self.run_control(shutdown));

        DriftTasks { listener, control }
    }

    async fn run_control(self, mut shutdown: Shutdown) {
        self.status.write().phase = DriftPhase::BoundSearch;
        tracing::info!(
            "Drift controller started, target {:.6} fps",
            self.search.target
        );

        let status = self.status.clone();
        let bounds = search_bounds(
            &self.commander,
            &self.state,
            &self.search,
            &mut shutdown,
            |sweep| status.write().sweep = sweep,
        )
        .await;

        let Some(bounds) = bounds else {
            self.status.write().phase = DriftPhase::Stopped;
            tracing::info!("Drift controller stopped during bound search");
            return;
        };

        self.state.reset_cumulative_error();
        {
            let mut status = self.status.write();
            status.phase = DriftPhase::FlipSwitching;
            status.bounds = Some(bounds);
            status.flip = Some(FlipState::default());
        }

        let mut switcher = FlipSwitcher::new(&self.commander, &self.state, bounds, self.flip.clone());
        switcher
            .run(&mut shutdown, |step, flip| {
                let mut status = status.write();
                status.commanded = Some(step.commanded);
                status.flip = Some(flip);
                if step.flipped {
                    status.flips += 1;
                }
            })
            .await;

        self.status.write().phase = DriftPhase::Stopped;
    }
}

/// Cloneable status reader
#[derive(Clone)]
pub struct DriftStatusHandle {
    status: Arc<RwLock<ControlStatus>>,
    state: Arc<DriftState>,
}

impl DriftStatusHandle {
    pub fn status(&self) -> DriftStatus {
        DriftController::build_status(&self.status, &self.state)
    }
}
