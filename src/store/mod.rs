//! Shared key-value store
//!
//! The controllers talk to the rest of the camera through a shared store with
//! publish/subscribe channels:
//! - parameter writes are followed by a notification on the controls channel
//!   naming the key that changed
//! - every write is also surfaced as a [`ParameterChange`] so watchers can
//!   react to keys written by other clients

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

/// Store transport errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store connection closed")]
    Closed,

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A key written through the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterChange {
    pub key: String,
    pub value: String,
    /// Client name of the writer
    pub writer: String,
}

/// Client view of the shared store
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Name stamped on every change this client writes
    fn client_name(&self) -> &str;

    /// Read a value
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a value, then announce the key on the controls channel
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Publish a message; returns the number of subscribers that received it
    async fn publish(&self, channel: &str, message: &str) -> StoreResult<usize>;

    /// Subscribe to a pub/sub channel
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String>;

    /// Watch every parameter write
    fn watch_parameters(&self) -> broadcast::Receiver<ParameterChange>;
}
