//! FrameKeeper - recording control for a camera pipeline.
//!
//! Two cooperating controllers sit on a shared parameter store:
//! - the drift controller keeps the long-run frame rate on target by
//!   alternating between two measured hardware rates
//! - the recording mediator owns the recording indicator line and rides out
//!   short storage write pauses

pub mod config;
pub mod drift;
pub mod output;
pub mod recorder;
pub mod shutdown;
pub mod sim;
pub mod storage;
pub mod store;
pub mod telemetry;
pub mod utils;

pub use config::FrameKeeperConfig;
pub use utils::{AppError, AppResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default `framekeeper=info` filter.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "framekeeper=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
