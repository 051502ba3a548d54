//! In-process store
//!
//! Values live in a map behind a `parking_lot` lock; channels are tokio
//! broadcast senders created on first use. Handles are cheap to clone and
//! [`MemoryStore::client`] derives a handle with a different writer name over
//! the same data.

use super::{ParameterChange, ParameterStore, StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

struct Shared {
    values: RwLock<HashMap<String, String>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    changes: broadcast::Sender<ParameterChange>,
    controls_channel: String,
    closed: AtomicBool,
}

/// Store handle backed by process memory
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    client: String,
}

impl MemoryStore {
    /// Create a store whose writes are announced on `controls_channel`
    pub fn new(controls_channel: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                values: RwLock::new(HashMap::new()),
                channels: Mutex::new(HashMap::new()),
                changes,
                controls_channel: controls_channel.into(),
                closed: AtomicBool::new(false),
            }),
            client: "default".to_string(),
        }
    }

    /// Handle over the same data that writes under another client name
    pub fn client(&self, name: impl Into<String>) -> Self {
        Self {
            shared: self.shared.clone(),
            client: name.into(),
        }
    }

    /// Simulate a lost connection: every later operation fails
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }

    /// Undo [`MemoryStore::close`]
    pub fn reopen(&self) {
        self.shared.closed.store(false, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn channel(&self, name: &str) -> broadcast::Sender<String> {
        self.shared
            .channels
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("cp_controls")
    }
}

#[async_trait]
impl ParameterStore for MemoryStore {
    fn client_name(&self) -> &str {
        &self.client
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.ensure_open()?;
        Ok(self.shared.values.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.ensure_open()?;
        self.shared
            .values
            .write()
            .insert(key.to_string(), value.to_string());

        let _ = self.shared.changes.send(ParameterChange {
            key: key.to_string(),
            value: value.to_string(),
            writer: self.client.clone(),
        });

        let controls = self.shared.controls_channel.clone();
        self.publish(&controls, key).await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<usize> {
        self.ensure_open()?;
        // No subscribers is not an error, matching pub/sub semantics
        Ok(self.channel(channel).send(message.to_string()).unwrap_or(0))
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        self.channel(channel).subscribe()
    }

    fn watch_parameters(&self) -> broadcast::Receiver<ParameterChange> {
        self.shared.changes.subscribe()
    }
}
