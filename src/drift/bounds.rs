//! Bound search
//!
//! Scans commanded rates around the target and keeps the best rate whose
//! measured average lands below the target (lower bound) and the best one
//! above it (upper bound). Sweeps repeat until both are known.

use super::command::RateCommander;
use super::state::DriftState;
use crate::shutdown::Shutdown;
use serde::Serialize;
use std::time::Duration;

/// Two commanded rates straddling the target
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundPair {
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// Bound-search tuning
#[derive(Debug, Clone)]
pub struct BoundSearchParams {
    pub target: f64,
    pub step: f64,
    pub margin: f64,
    pub settle: Duration,
}

/// Candidate rates from `target - margin` to `target + margin`, ascending.
///
/// Rates are computed from integer offsets so the grid does not accumulate
/// floating point error, then rounded to nanounits.
pub fn candidate_rates(target: f64, margin: f64, step: f64) -> Vec<f64> {
    if !(step > 0.0) || !(margin >= 0.0) {
        return vec![round_rate(target)];
    }

    let half = (margin / step).round() as i64;
    (-half..=half)
        .map(|offset| round_rate(target + offset as f64 * step))
        .collect()
}

fn round_rate(rate: f64) -> f64 {
    (rate * 1e9).round() / 1e9
}

/// Gaps closer than this are the same measurement up to float noise
const GAP_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Measured {
    rate: f64,
    average: f64,
}

/// Outcome of evaluating one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundUpdate {
    Lower,
    Upper,
    Unchanged,
}

/// Best lower and upper candidates seen so far
#[derive(Debug, Clone)]
pub struct BoundTracker {
    target: f64,
    lower: Option<Measured>,
    upper: Option<Measured>,
}

impl BoundTracker {
    pub fn new(target: f64) -> Self {
        Self {
            target,
            lower: None,
            upper: None,
        }
    }

    /// Evaluate a commanded rate against its measured average.
    ///
    /// A candidate replaces the current bound on its side only when its
    /// average is closer to the target. When both averages are equally far,
    /// the commanded rate nearer the target wins.
    pub fn consider(&mut self, rate: f64, average: f64) -> BoundUpdate {
        let candidate = Measured { rate, average };

        if average < self.target {
            if Self::improves(self.target, self.lower, candidate) {
                self.lower = Some(candidate);
                return BoundUpdate::Lower;
            }
        } else if average > self.target {
            if Self::improves(self.target, self.upper, candidate) {
                self.upper = Some(candidate);
                return BoundUpdate::Upper;
            }
        }

        BoundUpdate::Unchanged
    }

    fn improves(target: f64, best: Option<Measured>, candidate: Measured) -> bool {
        let Some(best) = best else {
            return true;
        };

        let gap = (candidate.average - target).abs();
        let best_gap = (best.average - target).abs();

        if gap < best_gap - GAP_EPSILON {
            return true;
        }

        (gap - best_gap).abs() <= GAP_EPSILON
            && (candidate.rate - target).abs() < (best.rate - target).abs()
    }

    pub fn lower(&self) -> Option<f64> {
        self.lower.map(|m| m.rate)
    }

    pub fn upper(&self) -> Option<f64> {
        self.upper.map(|m| m.rate)
    }

    pub fn bounds(&self) -> Option<BoundPair> {
        match (self.lower, self.upper) {
            (Some(lower), Some(upper)) => Some(BoundPair {
                lower_bound: lower.rate,
                upper_bound: upper.rate,
            }),
            _ => None,
        }
    }
}

/// Sweep candidates until both bounds are found.
///
/// Returns `None` only when shutdown interrupts the search. A candidate whose
/// command fails, or whose window is not full after settling, is skipped.
pub async fn search_bounds(
    commander: &RateCommander,
    state: &DriftState,
    params: &BoundSearchParams,
    shutdown: &mut Shutdown,
    mut on_sweep: impl FnMut(u32),
) -> Option<BoundPair> {
    let candidates = candidate_rates(params.target, params.margin, params.step);
    let mut tracker = BoundTracker::new(params.target);
    let mut sweep: u32 = 0;

    tracing::info!(
        "Bound search over {} candidates ({:.6}..={:.6}), settle {:?}",
        candidates.len(),
        candidates.first().copied().unwrap_or(params.target),
        candidates.last().copied().unwrap_or(params.target),
        params.settle
    );

    loop {
        sweep += 1;
        on_sweep(sweep);

        for &rate in &candidates {
            if let Err(e) = commander.command(rate).await {
                tracing::error!("Bound search: failed to command {:.6}: {}", rate, e);
                if !shutdown.sleep(params.settle).await {
                    return None;
                }
                continue;
            }

            if !shutdown.sleep(params.settle).await {
                return None;
            }

            let snapshot = state.snapshot();
            let average = match snapshot.recent_average {
                Some(average) if snapshot.window_full => average,
                _ => {
                    tracing::warn!(
                        "Bound search: window not full after settling at {:.6} ({}/{} samples)",
                        rate,
                        snapshot.window_len,
                        state.capacity()
                    );
                    continue;
                }
            };

            match tracker.consider(rate, average) {
                BoundUpdate::Lower => tracing::info!(
                    "Lower bound candidate {:.6} (avg {:.6})",
                    rate,
                    average
                ),
                BoundUpdate::Upper => tracing::info!(
                    "Upper bound candidate {:.6} (avg {:.6})",
                    rate,
                    average
                ),
                BoundUpdate::Unchanged => tracing::debug!(
                    "Candidate {:.6} rejected (avg {:.6})",
                    rate,
                    average
                ),
            }
        }

        if let Some(bounds) = tracker.bounds() {
            tracing::info!(
                "Bounds found after {} sweep(s): lower {:.6}, upper {:.6}",
                sweep,
                bounds.lower_bound,
                bounds.upper_bound
            );
            return Some(bounds);
        }

        tracing::warn!(
            "Sweep {} incomplete (lower {:?}, upper {:?}), sweeping again",
            sweep,
            tracker.lower(),
            tracker.upper()
        );
    }
}
