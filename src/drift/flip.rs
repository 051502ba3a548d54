//! Flip-switching
//!
//! Steady-state loop alternating between the two bounds. The accumulated
//! error is never zeroed here; it keeps growing for the controller's lifetime
//! and the flip frequency does the correcting.

use super::bounds::BoundPair;
use super::command::RateCommander;
use super::state::DriftState;
use crate::shutdown::Shutdown;
use serde::Serialize;
use std::time::Duration;

/// Which bound is currently commanded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlipState {
    pub use_lower: bool,
}

impl Default for FlipState {
    fn default() -> Self {
        Self { use_lower: true }
    }
}

impl FlipState {
    pub fn toggle(&mut self) {
        self.use_lower = !self.use_lower;
    }

    pub fn select(&self, bounds: &BoundPair) -> f64 {
        if self.use_lower {
            bounds.lower_bound
        } else {
            bounds.upper_bound
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlipParams {
    pub error_threshold: f64,
    pub interval: Duration,
}

/// Flip when the error is outside the threshold or grew over the interval
pub fn should_flip(cumulative_error: f64, snapshot: f64, error_threshold: f64) -> bool {
    let delta = cumulative_error - snapshot;
    cumulative_error.abs() > error_threshold || delta > 0.0
}

/// Result of one monitoring iteration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlipStep {
    pub commanded: f64,
    pub cumulative_error: f64,
    pub delta: f64,
    pub flipped: bool,
}

pub struct FlipSwitcher<'a> {
    commander: &'a RateCommander,
    state: &'a DriftState,
    bounds: BoundPair,
    params: FlipParams,
    flip: FlipState,
}

impl<'a> FlipSwitcher<'a> {
    pub fn new(
        commander: &'a RateCommander,
        state: &'a DriftState,
        bounds: BoundPair,
        params: FlipParams,
    ) -> Self {
        Self {
            commander,
            state,
            bounds,
            params,
            flip: FlipState::default(),
        }
    }

    pub fn flip_state(&self) -> FlipState {
        self.flip
    }

    /// Command the selected bound, wait one interval, then decide on a flip.
    ///
    /// `Ok(None)` means shutdown interrupted the wait.
    pub async fn step(
        &mut self,
        shutdown: &mut Shutdown,
    ) -> Result<Option<FlipStep>, crate::store::StoreError> {
        let commanded = self.flip.select(&self.bounds);
        if let Err(e) = self.commander.command(commanded).await {
            // Keep the cadence; the next iteration re-commands the rate
            if !shutdown.sleep(self.params.interval).await {
                return Ok(None);
            }
            return Err(e);
        }

        let snapshot = self.state.cumulative_error();
        if !shutdown.sleep(self.params.interval).await {
            return Ok(None);
        }
        let cumulative_error = self.state.cumulative_error();

        let flipped = should_flip(cumulative_error, snapshot, self.params.error_threshold);
        if flipped {
            self.flip.toggle();
        }

        Ok(Some(FlipStep {
            commanded,
            cumulative_error,
            delta: cumulative_error - snapshot,
            flipped,
        }))
    }

    /// Run until shutdown. Iteration faults are logged and skipped.
    pub async fn run(&mut self, shutdown: &mut Shutdown, mut on_step: impl FnMut(&FlipStep, FlipState)) {
        tracing::info!(
            "Flip-switching between {:.6} and {:.6} every {:?}",
            self.bounds.lower_bound,
            self.bounds.upper_bound,
            self.params.interval
        );

        loop {
            match self.step(shutdown).await {
                Ok(Some(step)) => {
                    if step.flipped {
                        tracing::debug!(
                            "Flip after {:.6}: cumulative error {:.6}, delta {:.6}, now {}",
                            step.commanded,
                            step.cumulative_error,
                            step.delta,
                            if self.flip.use_lower { "lower" } else { "upper" }
                        );
                    }
                    on_step(&step, self.flip);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Flip-switching iteration failed: {}", e);
                }
            }
        }

        tracing::info!("Flip-switching stopped");
    }
}
