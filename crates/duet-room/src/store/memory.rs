//! In-process store shared by any number of connections.
//!
//! `MemoryStore` plays the server: it owns the tree, fans out changes to
//! watchers and runs on-disconnect hooks. Each client talks to it through
//! its own `MemoryConnection`, which can be dropped to simulate a lost
//! connection.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use duet_common::now_millis;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::protocol::is_server_timestamp;

use super::path::segments;
use super::types::{SharedStore, StoreError, StoreResult, StoreWatch};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct Watcher {
    connection: u64,
    path: Vec<String>,
    last: Value,
    tx: mpsc::UnboundedSender<Value>,
}

struct DisconnectHook {
    path: Vec<String>,
    value: Value,
}

#[derive(Default)]
struct StoreState {
    root: Value,
    watchers: Vec<Watcher>,
    hooks: HashMap<u64, Vec<DisconnectHook>>,
    dropped: HashSet<u64>,
    next_connection: u64,
    next_key: u64,
    /// Path prefixes whose writes are refused.
    failing: Vec<Vec<String>>,
    /// Removal attempts per path, successful or not.
    removals: HashMap<String, usize>,
}

impl StoreState {
    fn check_connected(&self, connection: u64) -> StoreResult<()> {
        if self.dropped.contains(&connection) {
            Err(StoreError::Disconnected)
        } else {
            Ok(())
        }
    }

    fn check_writable(&self, connection: u64, path: &[String]) -> StoreResult<()> {
        self.check_connected(connection)?;
        if self.failing.iter().any(|prefix| path.starts_with(prefix)) {
            return Err(StoreError::WriteRejected {
                path: path.join("/"),
                reason: "permission denied".to_string(),
            });
        }
        Ok(())
    }

    fn write(&mut self, path: &[String], value: Value) {
        let value = normalize(resolve_server_values(value, now_millis()));
        set_in(&mut self.root, path, value);
    }

    /// Push the current value to every watcher whose subtree changed.
    fn notify(&mut self) {
        let StoreState { root, watchers, .. } = self;
        watchers.retain_mut(|watcher| {
            let current = value_at(root, &watcher.path);
            if current == watcher.last {
                return true;
            }
            watcher.last = current.clone();
            watcher.tx.send(current).is_ok()
        });
    }
}

// ---------------------------------------------------------------------------
// Tree helpers
// ---------------------------------------------------------------------------

fn value_at(root: &Value, path: &[String]) -> Value {
    let mut node = root;
    for segment in path {
        match node.get(segment) {
            Some(child) => node = child,
            None => return Value::Null,
        }
    }
    node.clone()
}

/// Write `value` at `path`, creating parents as needed. Writing `Null`
/// removes the node and any parent left empty.
fn set_in(node: &mut Value, path: &[String], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *node = value;
        return;
    };

    if value.is_null() {
        if let Value::Object(map) = node {
            if let Some(child) = map.get_mut(head) {
                set_in(child, rest, Value::Null);
                if child.is_null() {
                    map.remove(head);
                }
            }
            if map.is_empty() {
                *node = Value::Null;
            }
        }
        return;
    }

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(head.clone()).or_insert(Value::Null);
        set_in(child, rest, value);
    }
}

/// Drop nulls and empty objects, which the store never keeps.
fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let map: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if map.is_empty() {
                Value::Null
            } else {
                Value::Object(map)
            }
        }
        other => other,
    }
}

fn resolve_server_values(value: Value, now: i64) -> Value {
    if is_server_timestamp(&value) {
        return Value::from(now);
    }
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, resolve_server_values(v, now)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| resolve_server_values(v, now))
                .collect(),
        ),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// The shared tree. Cloning yields another handle to the same tree.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new client connection.
    pub fn connect(&self) -> MemoryConnection {
        let mut state = self.lock();
        let id = state.next_connection;
        state.next_connection += 1;
        debug!(connection = id, "Store connection opened");
        MemoryConnection {
            store: self.clone(),
            id,
        }
    }

    /// Read a subtree directly, bypassing any connection.
    pub fn read(&self, path: &str) -> Value {
        match segments(path) {
            Ok(path) => value_at(&self.lock().root, &path),
            Err(_) => Value::Null,
        }
    }

    /// Refuse every write at or below `prefix` until cleared.
    pub fn fail_writes_under(&self, prefix: &str) {
        if let Ok(prefix) = segments(prefix) {
            self.lock().failing.push(prefix);
        }
    }

    pub fn clear_write_failures(&self) {
        self.lock().failing.clear();
    }

    /// How many times any connection tried to remove `path`.
    pub fn removal_attempts(&self, path: &str) -> usize {
        let key = segments(path).map(|s| s.join("/")).unwrap_or_default();
        self.lock().removals.get(&key).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// MemoryConnection
// ---------------------------------------------------------------------------

/// One client's view of a `MemoryStore`.
#[derive(Clone)]
pub struct MemoryConnection {
    store: MemoryStore,
    id: u64,
}

impl MemoryConnection {
    pub fn connection_id(&self) -> u64 {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        !self.store.lock().dropped.contains(&self.id)
    }

    /// Simulate losing this connection.
    ///
    /// Registered on-disconnect writes are applied, this connection's
    /// watches end, and every later operation fails with `Disconnected`.
    pub fn drop_connection(&self) {
        let mut state = self.store.lock();
        if !state.dropped.insert(self.id) {
            return;
        }
        let hooks = state.hooks.remove(&self.id).unwrap_or_default();
        info!(connection = self.id, hooks = hooks.len(), "Store connection dropped");
        for hook in hooks {
            state.write(&hook.path, hook.value);
        }
        let id = self.id;
        state.watchers.retain(|w| w.connection != id);
        state.notify();
    }
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .finish()
    }
}

#[async_trait]
impl SharedStore for MemoryConnection {
    async fn get(&self, path: &str) -> StoreResult<Value> {
        let path = segments(path)?;
        let state = self.store.lock();
        state.check_connected(self.id)?;
        Ok(value_at(&state.root, &path))
    }

    async fn set(&self, path: &str, value: Value) -> StoreResult<()> {
        let path = segments(path)?;
        let mut state = self.store.lock();
        state.check_writable(self.id, &path)?;
        state.write(&path, value);
        state.notify();
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> StoreResult<()> {
        let path = segments(path)?;
        let mut state = self.store.lock();
        state.check_writable(self.id, &path)?;
        for (key, value) in fields {
            let mut child = path.clone();
            child.extend(segments(&key)?);
            state.write(&child, value);
        }
        state.notify();
        Ok(())
    }

    async fn remove(&self, path: &str) -> StoreResult<()> {
        let path = segments(path)?;
        let mut state = self.store.lock();
        *state.removals.entry(path.join("/")).or_insert(0) += 1;
        state.check_writable(self.id, &path)?;
        if value_at(&state.root, &path).is_null() {
            return Err(StoreError::NotFound(path.join("/")));
        }
        set_in(&mut state.root, &path, Value::Null);
        state.notify();
        Ok(())
    }

    async fn on_disconnect_set(&self, path: &str, value: Value) -> StoreResult<()> {
        let path = segments(path)?;
        let mut state = self.store.lock();
        state.check_connected(self.id)?;
        state
            .hooks
            .entry(self.id)
            .or_default()
            .push(DisconnectHook { path, value });
        Ok(())
    }

    async fn watch(&self, path: &str) -> StoreResult<StoreWatch> {
        let segments = segments(path)?;
        let mut state = self.store.lock();
        state.check_connected(self.id)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let current = value_at(&state.root, &segments);
        let _ = tx.send(current.clone());
        state.watchers.push(Watcher {
            connection: self.id,
            path: segments,
            last: current,
            tx,
        });
        Ok(StoreWatch::new(path, rx))
    }

    fn new_key(&self) -> String {
        let mut state = self.store.lock();
        let key = state.next_key;
        state.next_key += 1;
        format!("k{key:016x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::protocol::server_timestamp;

    #[tokio::test]
    async fn set_get_and_null_removes() {
        let store = MemoryStore::new();
        let conn = store.connect();

        conn.set("rooms/R1/users/a", json!({ "id": "a" })).await.unwrap();
        assert_eq!(conn.get("rooms/R1/users/a/id").await.unwrap(), json!("a"));

        conn.set("rooms/R1/users/a", Value::Null).await.unwrap();
        assert_eq!(store.read("rooms"), Value::Null);
    }

    #[tokio::test]
    async fn update_merges_children() {
        let store = MemoryStore::new();
        let conn = store.connect();
        conn.set("calls/c1", json!({ "status": "pending", "roomId": "R1" }))
            .await
            .unwrap();

        let mut fields = Map::new();
        fields.insert("status".into(), json!("active"));
        fields.insert("answer".into(), json!({ "type": "answer", "sdp": "x" }));
        conn.update("calls/c1", fields).await.unwrap();

        assert_eq!(
            store.read("calls/c1"),
            json!({
                "status": "active",
                "roomId": "R1",
                "answer": { "type": "answer", "sdp": "x" },
            })
        );
    }

    #[tokio::test]
    async fn push_keys_sort_in_order() {
        let store = MemoryStore::new();
        let conn = store.connect();
        let mut keys = Vec::new();
        for i in 0..20 {
            keys.push(conn.push("list", json!(i)).await.unwrap());
        }
        let stored: Vec<String> = store
            .read("list")
            .as_object()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        assert_eq!(stored, keys);
    }

    #[tokio::test]
    async fn server_timestamps_are_resolved() {
        let store = MemoryStore::new();
        let conn = store.connect();
        conn.set("a", json!({ "at": server_timestamp() })).await.unwrap();
        assert!(store.read("a/at").as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn watch_delivers_initial_value_and_distinct_changes() {
        let store = MemoryStore::new();
        let conn = store.connect();
        let mut watch = conn.watch("rooms/R1").await.unwrap();
        assert_eq!(watch.changed().await, Some(Value::Null));

        conn.set("rooms/R1/x", json!(1)).await.unwrap();
        conn.set("rooms/R2/x", json!(1)).await.unwrap();
        conn.set("rooms/R1/x", json!(1)).await.unwrap();
        conn.set("rooms/R1/x", json!(2)).await.unwrap();

        assert_eq!(watch.changed().await, Some(json!({ "x": 1 })));
        assert_eq!(watch.changed().await, Some(json!({ "x": 2 })));
    }

    #[tokio::test]
    async fn remove_missing_is_not_found_and_counted() {
        let store = MemoryStore::new();
        let conn = store.connect();
        conn.set("calls/c1/status", json!("pending")).await.unwrap();

        conn.remove("calls/c1").await.unwrap();
        let err = conn.remove("calls/c1").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(store.removal_attempts("calls/c1"), 2);
    }

    #[tokio::test]
    async fn failing_prefix_rejects_writes() {
        let store = MemoryStore::new();
        let conn = store.connect();
        store.fail_writes_under("calls");

        let err = conn.set("calls/c1", json!(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::WriteRejected { .. }));
        conn.set("rooms/R1", json!(1)).await.unwrap();

        store.clear_write_failures();
        conn.set("calls/c1", json!(1)).await.unwrap();
    }

    #[tokio::test]
    async fn dropping_connection_runs_hooks_and_ends_watches() {
        let store = MemoryStore::new();
        let a = store.connect();
        let b = store.connect();

        a.set("users/a", json!({ "online": true })).await.unwrap();
        a.on_disconnect_set("users/a", json!({ "online": false, "at": server_timestamp() }))
            .await
            .unwrap();
        let mut a_watch = a.watch("users").await.unwrap();
        let mut b_watch = b.watch("users/a/online").await.unwrap();
        a_watch.changed().await;
        assert_eq!(b_watch.changed().await, Some(json!(true)));

        a.drop_connection();

        assert_eq!(b_watch.changed().await, Some(json!(false)));
        assert!(store.read("users/a/at").is_i64());
        assert_eq!(a_watch.changed().await, None);
        assert!(!a.is_connected());
        assert_eq!(a.get("users").await.unwrap_err(), StoreError::Disconnected);
    }
}
