//! The staged key-value store client.
//!
//! Every sync engine talks to the shared store tier through the
//! [`StateStore`] trait: durable tables of key → attribute-set entries with
//! per-key change notifications. Handles are plain values passed explicitly
//! to each engine, never process-wide singletons, so engines can be tested
//! in isolation against [`MemoryStore`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};

use crate::error::Result;
use crate::fvs::{FieldValue, FieldValues};

/// Operation kind carried by a keyspace notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// Entry was created or replaced
    Set,
    /// Entry was removed
    Del,
}

/// A per-key change notification from a table.
///
/// Delivery is at-least-once: consumers must tolerate duplicates and fetch
/// current entry contents themselves.
#[derive(Debug, Clone)]
pub struct KeyspaceEvent {
    /// The operation observed
    pub op: StoreOp,
    /// The entry key within the table
    pub key: String,
}

impl KeyspaceEvent {
    /// Creates a Set notification.
    pub fn set(key: impl Into<String>) -> Self {
        Self {
            op: StoreOp::Set,
            key: key.into(),
        }
    }

    /// Creates a Del notification.
    pub fn del(key: impl Into<String>) -> Self {
        Self {
            op: StoreOp::Del,
            key: key.into(),
        }
    }
}

/// Typed accessor over the staged key-value store.
///
/// `set_entry` fully replaces the entry; partial merges are never performed
/// at this layer. A new subscription observes changes from the moment it is
/// created — there is no historical replay.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Enumerates all entry keys in `table`.
    async fn get_keys(&self, table: &str) -> Result<Vec<String>>;

    /// Reads the attribute set for `key`, or `None` if absent.
    async fn get_entry(&self, table: &str, key: &str) -> Result<Option<FieldValues>>;

    /// Replaces the entry for `key` with `fvs`.
    async fn set_entry(&self, table: &str, key: &str, fvs: &[FieldValue]) -> Result<()>;

    /// Removes the entry for `key`. Removing an absent key is a no-op.
    async fn del_entry(&self, table: &str, key: &str) -> Result<()>;

    /// Subscribes to per-key change notifications for `table`.
    async fn subscribe(&self, table: &str) -> Result<mpsc::UnboundedReceiver<KeyspaceEvent>>;
}

/// Shared handle to a state store.
pub type StoreHandle = Arc<dyn StateStore>;

#[derive(Default)]
struct MemoryInner {
    tables: HashMap<String, BTreeMap<String, BTreeMap<String, String>>>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<KeyspaceEvent>>>,
}

impl MemoryInner {
    fn notify(&mut self, table: &str, event: KeyspaceEvent) {
        if let Some(senders) = self.subscribers.get_mut(table) {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

/// In-memory [`StateStore`] used by tests and single-process setups.
///
/// Entries are stored as name→value maps, so duplicate fields in a write
/// collapse to the last value. Keys enumerate in sorted order.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store behind a shared handle.
    pub fn handle() -> StoreHandle {
        Arc::new(Self::new())
    }

    /// Number of entries in `table`.
    pub async fn len(&self, table: &str) -> usize {
        let inner = self.inner.read().await;
        inner.tables.get(table).map_or(0, |t| t.len())
    }

    /// True if `table` has no entries.
    pub async fn is_empty(&self, table: &str) -> bool {
        self.len(table).await == 0
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get_keys(&self, table: &str) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tables
            .get(table)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_entry(&self, table: &str, key: &str) -> Result<Option<FieldValues>> {
        let inner = self.inner.read().await;
        Ok(inner.tables.get(table).and_then(|t| {
            t.get(key)
                .map(|e| e.iter().map(|(f, v)| (f.clone(), v.clone())).collect())
        }))
    }

    async fn set_entry(&self, table: &str, key: &str, fvs: &[FieldValue]) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry: BTreeMap<String, String> = fvs.iter().cloned().collect();
        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), entry);
        inner.notify(table, KeyspaceEvent::set(key));
        Ok(())
    }

    async fn del_entry(&self, table: &str, key: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let removed = inner
            .tables
            .get_mut(table)
            .and_then(|t| t.remove(key))
            .is_some();
        if removed {
            inner.notify(table, KeyspaceEvent::del(key));
        }
        Ok(())
    }

    async fn subscribe(&self, table: &str) -> Result<mpsc::UnboundedReceiver<KeyspaceEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.write().await;
        inner
            .subscribers
            .entry(table.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}
