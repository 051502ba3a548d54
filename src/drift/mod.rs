//! Frame-rate drift control
//!
//! Keeps the long-run average frame rate on target when the hardware only
//! accepts discrete rates near it:
//! - `state`: counters and rolling window fed by the telemetry listener
//! - `bounds`: empirical search for two rates straddling the target
//! - `flip`: steady-state alternation between the two bounds
//! - `controller`: task orchestration and status reporting

pub mod bounds;
pub mod command;
pub mod controller;
pub mod flip;
pub mod listener;
pub mod state;

pub use bounds::{BoundPair, BoundTracker};
pub use command::RateCommander;
pub use controller::{DriftController, DriftPhase, DriftStatus, DriftStatusHandle, DriftTasks};
pub use flip::FlipState;
pub use state::{DriftReport, DriftSnapshot, DriftState};
