//! External source adapter seam.
//!
//! An adapter normalizes one external source of truth (kernel tables, an
//! FPM feed, conntrack, a config table) into typed change records plus a
//! full-snapshot query used only during the reconciliation pass. The wire
//! format behind an adapter is out of scope here.

use std::collections::HashMap;

use async_trait::async_trait;
use statesync_common::FieldValues;
use tokio::sync::mpsc;

use crate::error::Result;

/// Operation carried by a change record.
///
/// Add and update share `Set`: the engine decides which one applies by
/// diffing against its shadow, mirroring how the staged store treats both
/// as a full entry replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOp {
    /// Entity exists with exactly this attribute set
    Set(FieldValues),
    /// Entity no longer exists
    Del,
}

impl ChangeOp {
    /// Returns true for a Set.
    pub fn is_set(&self) -> bool {
        matches!(self, ChangeOp::Set(_))
    }
}

/// One normalized change event from an external source.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    /// Composite entity key in its wire encoding
    pub key: String,
    /// The observed operation
    pub op: ChangeOp,
}

impl ChangeRecord {
    /// Creates a Set record.
    pub fn set(key: impl Into<String>, fvs: FieldValues) -> Self {
        Self {
            key: key.into(),
            op: ChangeOp::Set(fvs),
        }
    }

    /// Creates a Del record.
    pub fn del(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op: ChangeOp::Del,
        }
    }
}

/// Full snapshot of external truth: entity key → attribute set.
pub type Snapshot = HashMap<String, FieldValues>;

/// Adapter over an external source of truth.
#[async_trait]
pub trait SourceAdapter: Send {
    /// Returns the current full truth. Used only by the reconciliation
    /// pass; a failure here leaves the engine's state untouched.
    async fn snapshot(&mut self) -> Result<Snapshot>;

    /// Starts the change event stream.
    ///
    /// The stream is infinite and non-restartable: a new subscription
    /// observes changes from current truth onward, never a historical
    /// replay. Delivery may duplicate records; the engine's diff is
    /// idempotent.
    async fn subscribe(&mut self) -> Result<mpsc::UnboundedReceiver<ChangeRecord>>;
}
