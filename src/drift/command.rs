//! Frame-rate command output

use crate::store::{ParameterStore, StoreResult};
use std::sync::Arc;

/// Writes the commanded frame rate to the store.
///
/// The store announces the key on the controls channel after each write,
/// which is what the capture pipeline listens for.
#[derive(Clone)]
pub struct RateCommander {
    store: Arc<dyn ParameterStore>,
    key: String,
}

impl RateCommander {
    pub fn new(store: Arc<dyn ParameterStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn command(&self, rate: f64) -> StoreResult<()> {
        self.store.set(&self.key, &rate.to_string()).await?;
        tracing::debug!("Set {} to {:.6}", self.key, rate);
        Ok(())
    }
}
