//! Downstream delta publication.
//!
//! The engine hands each computed delta to a [`DeltaPublisher`] as atomic
//! per-key operations. Failures are isolated per key: a key that cannot be
//! published is parked in [`PendingRetries`] and retried independently
//! while other keys continue to flow.

use std::collections::BTreeMap;

use async_trait::async_trait;
use statesync_common::{FieldValues, Table};
use tracing::{debug, warn};

use crate::error::{EngineError, Result};

/// An atomic per-key operation bound for the next pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyOp {
    /// Replace the downstream entry for `key`
    Set { key: String, fvs: FieldValues },
    /// Remove the downstream entry for `key`
    Del { key: String },
}

impl KeyOp {
    /// The entity key this operation targets.
    pub fn key(&self) -> &str {
        match self {
            KeyOp::Set { key, .. } | KeyOp::Del { key } => key,
        }
    }
}

/// Applies per-key operations to the next pipeline stage.
///
/// Operations for independent keys may be applied in any order; operations
/// for one key arrive in submission order.
#[async_trait]
pub trait DeltaPublisher: Send {
    /// Publishes the attribute set for `key`.
    async fn set(&mut self, key: &str, fvs: &FieldValues) -> Result<()>;

    /// Removes `key` downstream.
    async fn del(&mut self, key: &str) -> Result<()>;
}

/// Publisher writing into one staged-store table.
pub struct TablePublisher {
    table: Table,
}

impl TablePublisher {
    /// Creates a publisher over `table`.
    pub fn new(table: Table) -> Self {
        Self { table }
    }
}

#[async_trait]
impl DeltaPublisher for TablePublisher {
    async fn set(&mut self, key: &str, fvs: &FieldValues) -> Result<()> {
        self.table
            .set(key, fvs)
            .await
            .map_err(|e| EngineError::publish(key, e.to_string()))
    }

    async fn del(&mut self, key: &str) -> Result<()> {
        self.table
            .del(key)
            .await
            .map_err(|e| EngineError::publish(key, e.to_string()))
    }
}

/// Per-key retry queue for failed publications.
///
/// Only the latest pending operation per key is kept; an earlier failed
/// set is superseded by a later set or delete for the same key.
#[derive(Debug, Default)]
pub struct PendingRetries {
    ops: BTreeMap<String, KeyOp>,
}

impl PendingRetries {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys awaiting retry.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True if nothing is awaiting retry.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Parks a failed operation, superseding any earlier one for its key.
    pub fn park(&mut self, op: KeyOp) {
        warn!(key = op.key(), "publish failed, queued for retry");
        self.ops.insert(op.key().to_string(), op);
    }

    /// Retries every parked operation once; keys that fail again stay
    /// parked without affecting the others.
    pub async fn flush<P: DeltaPublisher>(&mut self, publisher: &mut P) {
        let parked = std::mem::take(&mut self.ops);
        for (key, op) in parked {
            let outcome = match &op {
                KeyOp::Set { fvs, .. } => publisher.set(&key, fvs).await,
                KeyOp::Del { .. } => publisher.del(&key).await,
            };
            match outcome {
                Ok(()) => debug!(key, "retried publish succeeded"),
                Err(e) => {
                    warn!(key, error = %e, "retried publish failed");
                    self.ops.insert(key, op);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statesync_common::fvs;

    /// Publisher that fails every operation for one configured key.
    struct FlakyPublisher {
        bad_key: Option<String>,
        sets: Vec<String>,
        dels: Vec<String>,
    }

    impl FlakyPublisher {
        fn new(bad_key: Option<&str>) -> Self {
            Self {
                bad_key: bad_key.map(String::from),
                sets: vec![],
                dels: vec![],
            }
        }
    }

    #[async_trait]
    impl DeltaPublisher for FlakyPublisher {
        async fn set(&mut self, key: &str, _fvs: &FieldValues) -> Result<()> {
            if self.bad_key.as_deref() == Some(key) {
                return Err(EngineError::publish(key, "backend down"));
            }
            self.sets.push(key.to_string());
            Ok(())
        }

        async fn del(&mut self, key: &str) -> Result<()> {
            if self.bad_key.as_deref() == Some(key) {
                return Err(EngineError::publish(key, "backend down"));
            }
            self.dels.push(key.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn later_op_supersedes_parked_set() {
        let mut retries = PendingRetries::new();
        retries.park(KeyOp::Set {
            key: "k".into(),
            fvs: fvs(&[("a", "1")]),
        });
        retries.park(KeyOp::Del { key: "k".into() });
        assert_eq!(retries.len(), 1);

        let mut publisher = FlakyPublisher::new(None);
        retries.flush(&mut publisher).await;
        assert!(retries.is_empty());
        assert_eq!(publisher.dels, vec!["k"]);
        assert!(publisher.sets.is_empty());
    }

    #[tokio::test]
    async fn failing_key_does_not_block_others() {
        let mut retries = PendingRetries::new();
        retries.park(KeyOp::Set {
            key: "bad".into(),
            fvs: fvs(&[("a", "1")]),
        });
        retries.park(KeyOp::Set {
            key: "good".into(),
            fvs: fvs(&[("a", "2")]),
        });

        let mut publisher = FlakyPublisher::new(Some("bad"));
        retries.flush(&mut publisher).await;

        assert_eq!(publisher.sets, vec!["good"]);
        assert_eq!(retries.len(), 1);

        // Backend recovers; the parked key drains on the next flush.
        publisher.bad_key = None;
        retries.flush(&mut publisher).await;
        assert!(retries.is_empty());
        assert_eq!(publisher.sets, vec!["good", "bad"]);
    }
}
