//! GPIO line driven through the sysfs interface.
//!
//! The line must already be exported and configured as an output
//! (`/sys/class/gpio/gpioN/direction` = `out`).

use super::{OutputError, RecordingIndicator};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct SysfsGpioIndicator {
    value_path: PathBuf,
}

impl SysfsGpioIndicator {
    /// Open an exported line by number
    pub fn open(line: u32) -> Result<Self, OutputError> {
        Self::with_value_path(format!("/sys/class/gpio/gpio{line}/value"))
    }

    /// Open a line by the path of its `value` file
    pub fn with_value_path(path: impl AsRef<Path>) -> Result<Self, OutputError> {
        let value_path = path.as_ref().to_path_buf();
        if !value_path.exists() {
            return Err(OutputError::Unavailable(format!(
                "{} does not exist (line not exported?)",
                value_path.display()
            )));
        }
        Ok(Self { value_path })
    }
}

#[async_trait]
impl RecordingIndicator for SysfsGpioIndicator {
    async fn set_recording(&self, on: bool) -> Result<(), OutputError> {
        tokio::fs::write(&self.value_path, if on { "1" } else { "0" }).await?;
        tracing::debug!("Wrote {} to {:?}", on as u8, self.value_path);
        Ok(())
    }
}
