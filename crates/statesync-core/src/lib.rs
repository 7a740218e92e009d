//! Warm-restartable state synchronization pipeline.
//!
//! A sync daemon is three stages glued by this crate: a [`SourceAdapter`]
//! normalizing an external source of truth into change records, a
//! [`ReconciliationEngine`] diffing those records against a shadow of
//! last-published state, and a [`DeltaPublisher`] applying the minimal
//! deltas downstream. A [`WarmRestartTracker`] persists the restart
//! lifecycle so an in-place restart resumes instead of rebuilding.

pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod publish;
pub mod source;

pub use engine::{ReconciliationEngine, SyncCounters};
pub use error::{EngineError, Result};
pub use lifecycle::{
    get_restore_count, get_state, LifecycleState, WarmRestartTracker,
    CFG_WARM_RESTART_TABLE, DEFAULT_RECONCILE_TIMER_SECS, STATE_WARM_RESTART_TABLE, SYSTEM_KEY,
};
pub use publish::{DeltaPublisher, KeyOp, PendingRetries, TablePublisher};
pub use source::{ChangeOp, ChangeRecord, Snapshot, SourceAdapter};
