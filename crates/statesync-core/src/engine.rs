//! The reconciliation engine.
//!
//! One engine instance owns the synchronization of a single external truth
//! source into a single downstream table: steady-state change records are
//! diffed against an exclusively-owned shadow of last-published state, and
//! a warm restart triggers exactly one full reconcile pass after a bounded
//! grace period.
//!
//! The engine runs on one task; the shadow needs no locking.

use std::collections::BTreeMap;

use statesync_common::{fvs_eq, FieldValues, Table};
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::lifecycle::WarmRestartTracker;
use crate::publish::{DeltaPublisher, KeyOp, PendingRetries};
use crate::source::{ChangeOp, ChangeRecord, Snapshot, SourceAdapter};

const SNAPSHOT_RETRY_MAX: u32 = 3;
const SNAPSHOT_RETRY_BASE: Duration = Duration::from_millis(200);

/// Downstream operations performed, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCounters {
    /// Entries published for previously unknown keys
    pub added: u64,
    /// Entries republished with changed attributes
    pub updated: u64,
    /// Entries removed downstream
    pub deleted: u64,
}

impl SyncCounters {
    /// Total downstream operations.
    pub fn total(&self) -> u64 {
        self.added + self.updated + self.deleted
    }

    fn since(&self, earlier: &SyncCounters) -> SyncCounters {
        SyncCounters {
            added: self.added - earlier.added,
            updated: self.updated - earlier.updated,
            deleted: self.deleted - earlier.deleted,
        }
    }
}

/// Synchronizes one external truth source into one downstream consumer,
/// surviving in-place restarts without dropping or duplicating state.
pub struct ReconciliationEngine<S, P> {
    tracker: WarmRestartTracker,
    source: S,
    publisher: P,
    /// Last-published state, readable across restarts for shadow recovery
    published: Table,
    /// What was last published, keyed by entity
    shadow: BTreeMap<String, FieldValues>,
    /// Net effect of records that arrived during the restore window
    pending: BTreeMap<String, ChangeOp>,
    restoring: bool,
    retries: PendingRetries,
    counters: SyncCounters,
    reconcile_deadline: Option<Instant>,
}

impl<S: SourceAdapter, P: DeltaPublisher> ReconciliationEngine<S, P> {
    /// Creates an engine over its collaborators. Nothing is read or
    /// published until [`start`](Self::start).
    pub fn new(tracker: WarmRestartTracker, source: S, publisher: P, published: Table) -> Self {
        Self {
            tracker,
            source,
            publisher,
            published,
            shadow: BTreeMap::new(),
            pending: BTreeMap::new(),
            restoring: false,
            retries: PendingRetries::new(),
            counters: SyncCounters::default(),
            reconcile_deadline: None,
        }
    }

    /// Detects cold vs warm start and prepares the shadow accordingly.
    ///
    /// Cold: empty shadow, every subsequent record is an add. Warm: the
    /// shadow is recovered from the published table (failure is fatal) and
    /// a reconcile deadline is armed from the configured grace period.
    /// Returns true on a warm start.
    pub async fn start(&mut self) -> Result<bool> {
        let warm = self.tracker.check_warm_start().await?;
        if !warm {
            return Ok(false);
        }

        self.load_shadow().await?;
        self.restoring = true;
        let timer = self.tracker.reconcile_timer().await?;
        self.reconcile_deadline = Some(Instant::now() + Duration::from_secs(timer));
        info!(
            app = %self.tracker.app(),
            entries = self.shadow.len(),
            timer_secs = timer,
            "pre-restart state restored, reconcile pending"
        );
        Ok(true)
    }

    async fn load_shadow(&mut self) -> Result<()> {
        let fatal = |e: EngineError| EngineError::StartupStateUnavailable {
            app: self.tracker.app().to_string(),
            reason: e.to_string(),
        };

        let keys = self
            .published
            .keys()
            .await
            .map_err(|e| fatal(EngineError::Store(e)))?;
        for key in keys {
            if let Some(entry) = self
                .published
                .get(&key)
                .await
                .map_err(|e| fatal(EngineError::Store(e)))?
            {
                self.shadow.insert(key, entry);
            }
        }
        Ok(())
    }

    /// The restart lifecycle of this engine.
    pub fn tracker(&self) -> &WarmRestartTracker {
        &self.tracker
    }

    /// Cumulative downstream operation counters.
    pub fn counters(&self) -> SyncCounters {
        self.counters
    }

    /// Number of entities currently shadowed.
    pub fn shadow_len(&self) -> usize {
        self.shadow.len()
    }

    /// True while the restore window is open (reconcile pass pending).
    pub fn is_restoring(&self) -> bool {
        self.restoring
    }

    /// Deadline of the pending reconcile pass, if one is armed.
    pub fn reconcile_deadline(&self) -> Option<Instant> {
        self.reconcile_deadline
    }

    /// Keys currently parked for publish retry.
    pub fn retry_backlog(&self) -> usize {
        self.retries.len()
    }

    /// Processes one change record.
    ///
    /// During the restore window records are coalesced to their net
    /// per-key effect and replayed after the reconcile diff; otherwise the
    /// record is diffed against the shadow and the minimal delta published.
    pub async fn handle_change(&mut self, record: ChangeRecord) {
        if record.key.is_empty() {
            warn!(app = %self.tracker.app(), "dropping change record with empty key");
            return;
        }

        if self.restoring {
            // Latest op wins: a delete cancels a pending set and vice
            // versa, so add-then-delete within the window nets to nothing.
            debug!(app = %self.tracker.app(), key = %record.key, "coalescing during restore window");
            self.pending.insert(record.key, record.op);
            return;
        }

        self.apply(&record.key, &record.op).await;
    }

    async fn apply(&mut self, key: &str, op: &ChangeOp) {
        match op {
            ChangeOp::Set(fvs) => match self.shadow.get(key) {
                Some(prev) if fvs_eq(prev, fvs) => {
                    debug!(key, "unchanged, no-op");
                }
                Some(_) => {
                    self.publish_set(key, fvs).await;
                    self.shadow.insert(key.to_string(), fvs.clone());
                    self.counters.updated += 1;
                }
                None => {
                    self.publish_set(key, fvs).await;
                    self.shadow.insert(key.to_string(), fvs.clone());
                    self.counters.added += 1;
                }
            },
            ChangeOp::Del => {
                if self.shadow.remove(key).is_some() {
                    self.publish_del(key).await;
                    self.counters.deleted += 1;
                } else {
                    debug!(key, "delete for unknown key, no-op");
                }
            }
        }
    }

    // Publish failures park the op for independent retry; the shadow is
    // advanced regardless (at-least-once, retried until successful).
    async fn publish_set(&mut self, key: &str, fvs: &FieldValues) {
        if let Err(e) = self.publisher.set(key, fvs).await {
            warn!(key, error = %e, "downstream set failed");
            self.retries.park(KeyOp::Set {
                key: key.to_string(),
                fvs: fvs.clone(),
            });
        }
    }

    async fn publish_del(&mut self, key: &str) {
        if let Err(e) = self.publisher.del(key).await {
            warn!(key, error = %e, "downstream del failed");
            self.retries.park(KeyOp::Del {
                key: key.to_string(),
            });
        }
    }

    /// Runs the post-restart reconcile pass.
    ///
    /// Queries a full truth snapshot, publishes the minimal delta against
    /// the recovered shadow, replays coalesced records, and advances the
    /// lifecycle to `reconciled`. Returns the operations performed by this
    /// pass alone.
    pub async fn reconcile(&mut self) -> Result<SyncCounters> {
        if !self.restoring {
            return Ok(SyncCounters::default());
        }

        let started = Instant::now();
        let before = self.counters;

        let truth: BTreeMap<String, FieldValues> =
            self.snapshot_with_retry().await?.into_iter().collect();

        let stale: Vec<String> = self
            .shadow
            .keys()
            .filter(|k| !truth.contains_key(*k))
            .cloned()
            .collect();
        for key in stale {
            self.apply(&key, &ChangeOp::Del).await;
        }
        for (key, fvs) in &truth {
            self.apply(key, &ChangeOp::Set(fvs.clone())).await;
        }

        // Events observed during the window, net effect per key.
        let pending = std::mem::take(&mut self.pending);
        for (key, op) in pending {
            self.apply(&key, &op).await;
        }

        self.restoring = false;
        self.reconcile_deadline = None;
        self.tracker
            .record_reconciled(started.elapsed().as_secs())
            .await?;

        let delta = self.counters.since(&before);
        info!(
            app = %self.tracker.app(),
            nadd = delta.added,
            nupd = delta.updated,
            ndel = delta.deleted,
            "reconcile pass complete"
        );
        Ok(delta)
    }

    async fn snapshot_with_retry(&mut self) -> Result<Snapshot> {
        let mut delay = SNAPSHOT_RETRY_BASE;
        let mut attempt = 0;
        loop {
            match self.source.snapshot().await {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) => {
                    attempt += 1;
                    if attempt >= SNAPSHOT_RETRY_MAX {
                        return Err(e);
                    }
                    warn!(app = %self.tracker.app(), attempt, error = %e, "snapshot failed, backing off");
                    sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    /// Retries parked publications once.
    pub async fn flush_retries(&mut self) {
        self.retries.flush(&mut self.publisher).await;
    }

    /// Event loop: consumes the source stream, fires the reconcile pass
    /// when the armed deadline expires, and drains cleanly on shutdown.
    ///
    /// The deadline is a deferred one-shot: it exists only as state on this
    /// engine, so a restart (a new engine instance) never inherits a stale
    /// pending transition.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        let mut events = self.source.subscribe().await?;
        loop {
            let deadline = self.reconcile_deadline;
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.drain(&mut events).await;
                    info!(app = %self.tracker.app(), "shutdown drain complete");
                    return Ok(());
                }
                _ = deadline_elapsed(deadline) => {
                    self.reconcile().await?;
                }
                record = events.recv() => match record {
                    Some(record) => {
                        self.handle_change(record).await;
                        self.flush_retries().await;
                    }
                    None => {
                        info!(app = %self.tracker.app(), "source stream ended");
                        self.flush_retries().await;
                        return Ok(());
                    }
                }
            }
        }
    }

    // Finish applying whatever is already queued before exiting, so the
    // published state stays consistent with the shadow.
    async fn drain(&mut self, events: &mut mpsc::UnboundedReceiver<ChangeRecord>) {
        while let Ok(record) = events.try_recv() {
            self.handle_change(record).await;
        }
        self.retries.flush(&mut self.publisher).await;
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
