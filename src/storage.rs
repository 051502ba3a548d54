//! Storage monitor events
//!
//! External storage monitors report write activity and device removal
//! through a [`StorageEventSender`]; the recording mediator consumes the
//! receiving end.

use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageEvent {
    /// Write activity started (`true`) or stopped (`false`)
    WriteStatus(bool),
    /// The storage device disappeared
    Removed,
}

#[derive(Debug, Clone)]
pub struct StorageEventSender {
    tx: mpsc::Sender<StorageEvent>,
}

/// Create the monitor-to-mediator channel
pub fn storage_channel(capacity: usize) -> (StorageEventSender, mpsc::Receiver<StorageEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (StorageEventSender { tx }, rx)
}

impl StorageEventSender {
    pub async fn write_status_changed(&self, writing: bool) -> bool {
        self.send(StorageEvent::WriteStatus(writing)).await
    }

    pub async fn removed(&self) -> bool {
        self.send(StorageEvent::Removed).await
    }

    /// Deliver an event; returns `false` when the mediator is gone
    pub async fn send(&self, event: StorageEvent) -> bool {
        match self.tx.send(event).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Dropping storage event {:?}: mediator not running", e.0);
                false
            }
        }
    }
}
