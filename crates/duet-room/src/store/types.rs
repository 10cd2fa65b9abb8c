//! The store capability and its error type.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("invalid store path: {0:?}")]
    InvalidPath(String),

    #[error("nothing stored at {0}")]
    NotFound(String),

    #[error("write to {path} rejected: {reason}")]
    WriteRejected { path: String, reason: String },

    #[error("store connection lost")]
    Disconnected,
}

// ---------------------------------------------------------------------------
// SharedStore
// ---------------------------------------------------------------------------

/// One client's connection to the synchronized store.
///
/// Paths are `/`-separated. Absent nodes read as `Value::Null`, and writing
/// `Null` (or an empty object) removes a node.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Read the subtree at `path`.
    async fn get(&self, path: &str) -> StoreResult<Value>;

    /// Replace the subtree at `path`.
    async fn set(&self, path: &str, value: Value) -> StoreResult<()>;

    /// Merge `fields` into the node at `path`, leaving other children alone.
    async fn update(&self, path: &str, fields: Map<String, Value>) -> StoreResult<()>;

    /// Delete the subtree at `path`. Fails with `NotFound` if nothing is there.
    async fn remove(&self, path: &str) -> StoreResult<()>;

    /// Register a write the store performs on this client's behalf once its
    /// connection is lost.
    async fn on_disconnect_set(&self, path: &str, value: Value) -> StoreResult<()>;

    /// Subscribe to the subtree at `path`. The current value is delivered
    /// first, then one value per distinct change.
    async fn watch(&self, path: &str) -> StoreResult<StoreWatch>;

    /// Generate a child key locally. Keys from one store sort in generation
    /// order.
    fn new_key(&self) -> String;

    /// Append `value` under a fresh key and return the key.
    async fn push(&self, path: &str, value: Value) -> StoreResult<String> {
        let key = self.new_key();
        self.set(&format!("{path}/{key}"), value).await?;
        Ok(key)
    }
}

// ---------------------------------------------------------------------------
// StoreWatch
// ---------------------------------------------------------------------------

/// A live subscription to one subtree.
#[derive(Debug)]
pub struct StoreWatch {
    path: String,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl StoreWatch {
    pub fn new(path: impl Into<String>, rx: mpsc::UnboundedReceiver<Value>) -> Self {
        Self {
            path: path.into(),
            rx,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait for the next value of the subtree.
    ///
    /// Returns `None` once the store ends the subscription.
    pub async fn changed(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}
