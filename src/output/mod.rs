//! Recording indicator output
//!
//! The mediator is the only caller of the indicator line. Implementations:
//! - [`LoggingIndicator`] for runs without hardware
//! - [`SysfsGpioIndicator`] for a sysfs-exported GPIO line

pub mod sysfs;

pub use sysfs::SysfsGpioIndicator;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output line unavailable: {0}")]
    Unavailable(String),
}

/// Digital output that shows whether recording is asserted
#[async_trait]
pub trait RecordingIndicator: Send + Sync {
    async fn set_recording(&self, on: bool) -> Result<(), OutputError>;
}

/// Indicator that only logs transitions
#[derive(Debug, Default)]
pub struct LoggingIndicator;

#[async_trait]
impl RecordingIndicator for LoggingIndicator {
    async fn set_recording(&self, on: bool) -> Result<(), OutputError> {
        tracing::info!("Recording indicator {}", if on { "on" } else { "off" });
        Ok(())
    }
}
