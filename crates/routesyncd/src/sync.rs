//! Wiring of the route pipeline: feed source → engine → ROUTE_TABLE.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use statesync_common::{FieldValues, StoreHandle, Table, TableSchema};
use statesync_core::{
    ChangeOp, ChangeRecord, ReconciliationEngine, Result, Snapshot, SourceAdapter, SyncCounters,
    TablePublisher, WarmRestartTracker,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::route::{feed_to_change, FeedRecord, APP_NAME, APP_ROUTE_TABLE};

/// Source adapter over the decoded route feed.
///
/// The adapter accumulates the feed into its own truth map so the
/// reconcile pass can snapshot it. After a restart the feed re-announces
/// the full table (zebra behavior on reconnect), which repopulates the
/// map within the reconcile grace period.
pub struct FeedSource {
    feed: Option<mpsc::UnboundedReceiver<FeedRecord>>,
    truth: Arc<Mutex<HashMap<String, FieldValues>>>,
}

impl FeedSource {
    pub fn new(feed: mpsc::UnboundedReceiver<FeedRecord>) -> Self {
        Self {
            feed: Some(feed),
            truth: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl SourceAdapter for FeedSource {
    async fn snapshot(&mut self) -> Result<Snapshot> {
        Ok(self.truth.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    async fn subscribe(&mut self) -> Result<mpsc::UnboundedReceiver<ChangeRecord>> {
        let mut feed = self
            .feed
            .take()
            .ok_or_else(|| statesync_core::EngineError::source("feed already subscribed"))?;
        let truth = self.truth.clone();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(record) = feed.recv().await {
                let change = match feed_to_change(record) {
                    Ok(change) => change,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed feed record");
                        continue;
                    }
                };
                {
                    let mut truth = truth.lock().unwrap_or_else(|p| p.into_inner());
                    match &change.op {
                        ChangeOp::Set(fvs) => {
                            truth.insert(change.key.clone(), fvs.clone());
                        }
                        ChangeOp::Del => {
                            truth.remove(&change.key);
                        }
                    }
                }
                if tx.send(change).is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

/// The assembled daemon: one engine from the route feed into ROUTE_TABLE.
pub struct RouteSyncd {
    engine: ReconciliationEngine<FeedSource, TablePublisher>,
}

impl RouteSyncd {
    /// Builds the pipeline over the stores and the decoded feed.
    pub async fn new(
        appl: StoreHandle,
        config: StoreHandle,
        state: StoreHandle,
        feed: mpsc::UnboundedReceiver<FeedRecord>,
    ) -> Result<Self> {
        let tracker = WarmRestartTracker::new(APP_NAME, state, config).await?;
        let table = Table::with_schema(
            appl,
            TableSchema::new(APP_ROUTE_TABLE, &["nexthop", "ifname"]),
        );
        Ok(Self {
            engine: ReconciliationEngine::new(
                tracker,
                FeedSource::new(feed),
                TablePublisher::new(table.clone()),
                table,
            ),
        })
    }

    /// Cold or warm startup; the feed's own full re-announcement covers
    /// the initial sync in both cases.
    pub async fn start(&mut self) -> Result<bool> {
        self.engine.start().await
    }

    /// Runs the event loop until shutdown.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        self.engine.run(shutdown).await
    }

    /// Engine access for scenario tests.
    pub fn engine_mut(&mut self) -> &mut ReconciliationEngine<FeedSource, TablePublisher> {
        &mut self.engine
    }

    pub fn counters(&self) -> SyncCounters {
        self.engine.counters()
    }
}
