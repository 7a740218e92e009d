//! Wiring of the NAT pipeline: config source → engine → dataplane
//! publisher.

use async_trait::async_trait;
use statesync_common::{StateStore, StoreHandle, Table, TableSchema};
use statesync_core::{
    ChangeRecord, DeltaPublisher, EngineError, ReconciliationEngine, Result, Snapshot,
    SourceAdapter, SyncCounters, WarmRestartTracker,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::nat::{
    dataplane_entries, dnat_key, dnat_pool_key, snat_key, translated_ip, NatEntry, APP_NAME,
    APP_NAT_TABLE, CFG_STATIC_NAT_TABLE, DATAPLANE_NAT_TABLE,
};

/// Reads the full `STATIC_NAT` table as app-entry truth. Entries without
/// a `local_ip` are skipped with a diagnostic.
pub async fn load_static_nat(config: &dyn StateStore) -> Result<Snapshot> {
    let mut snapshot = Snapshot::new();
    for key in config.get_keys(CFG_STATIC_NAT_TABLE).await? {
        let Some(entry) = config.get_entry(CFG_STATIC_NAT_TABLE, &key).await? else {
            continue;
        };
        match NatEntry::from_config(&key, &entry) {
            Some(nat) => {
                snapshot.insert(key, nat.app_entry());
            }
            None => warn!(global_ip = %key, "STATIC_NAT entry has no local_ip, skipping"),
        }
    }
    Ok(snapshot)
}

/// Source adapter over the `STATIC_NAT` config table.
pub struct ConfigNatSource {
    config: StoreHandle,
}

impl ConfigNatSource {
    pub fn new(config: StoreHandle) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SourceAdapter for ConfigNatSource {
    async fn snapshot(&mut self) -> Result<Snapshot> {
        load_static_nat(self.config.as_ref()).await
    }

    async fn subscribe(&mut self) -> Result<mpsc::UnboundedReceiver<ChangeRecord>> {
        let mut events = self.config.subscribe(CFG_STATIC_NAT_TABLE).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let config = self.config.clone();

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                // A full-replace write can surface as del followed by set,
                // so both kinds re-read current contents and let the entry's
                // presence decide.
                let record = match config.get_entry(CFG_STATIC_NAT_TABLE, &event.key).await {
                    Ok(Some(entry)) => match NatEntry::from_config(&event.key, &entry) {
                        Some(nat) => ChangeRecord::set(event.key, nat.app_entry()),
                        None => {
                            warn!(
                                global_ip = %event.key,
                                "STATIC_NAT entry has no local_ip, skipping"
                            );
                            continue;
                        }
                    },
                    Ok(None) => ChangeRecord::del(event.key),
                    Err(e) => {
                        warn!(global_ip = %event.key, error = %e, "config read failed");
                        continue;
                    }
                };
                if tx.send(record).is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

/// Publishes app entries and expands each into its three dataplane
/// entries (SNAT, DNAT, DNAT pool); deletion removes all three.
pub struct DataplanePublisher {
    app: Table,
    dataplane: Table,
}

impl DataplanePublisher {
    pub fn new(app: Table, dataplane: Table) -> Self {
        Self { app, dataplane }
    }
}

#[async_trait]
impl DeltaPublisher for DataplanePublisher {
    async fn set(&mut self, key: &str, fvs: &statesync_common::FieldValues) -> Result<()> {
        let publish_err = |e: statesync_common::StoreError| EngineError::publish(key, e.to_string());

        let local_ip = translated_ip(fvs)
            .ok_or_else(|| EngineError::publish(key, "app entry missing translated_ip"))?
            .to_string();

        // A changed local address leaves a stale reverse entry behind.
        if let Some(prev) = self.app.get(key).await.map_err(publish_err)? {
            if let Some(old) = translated_ip(&prev) {
                if old != local_ip {
                    self.dataplane.del(&snat_key(old)).await.map_err(publish_err)?;
                }
            }
        }

        self.app.set(key, fvs).await.map_err(publish_err)?;
        for (dp_key, dp_entry) in dataplane_entries(key, &local_ip) {
            self.dataplane
                .set(&dp_key, &dp_entry)
                .await
                .map_err(publish_err)?;
        }
        Ok(())
    }

    async fn del(&mut self, key: &str) -> Result<()> {
        let publish_err = |e: statesync_common::StoreError| EngineError::publish(key, e.to_string());

        if let Some(prev) = self.app.get(key).await.map_err(publish_err)? {
            if let Some(local_ip) = translated_ip(&prev) {
                self.dataplane
                    .del(&snat_key(local_ip))
                    .await
                    .map_err(publish_err)?;
            }
        }
        self.dataplane.del(&dnat_key(key)).await.map_err(publish_err)?;
        self.dataplane
            .del(&dnat_pool_key(key))
            .await
            .map_err(publish_err)?;
        self.app.del(key).await.map_err(publish_err)?;
        Ok(())
    }
}

/// The assembled daemon: one engine over the config source and the
/// dataplane publisher.
pub struct NatSyncd {
    engine: ReconciliationEngine<ConfigNatSource, DataplanePublisher>,
    config: StoreHandle,
}

impl NatSyncd {
    /// Builds the pipeline over the three stores.
    pub async fn new(appl: StoreHandle, config: StoreHandle, state: StoreHandle) -> Result<Self> {
        let tracker = WarmRestartTracker::new(APP_NAME, state, config.clone()).await?;
        let app_table = Table::with_schema(
            appl.clone(),
            TableSchema::new(APP_NAT_TABLE, &["translated_ip", "nat_type", "entry_type"]),
        );
        let publisher = DataplanePublisher::new(
            app_table.clone(),
            Table::new(appl, DATAPLANE_NAT_TABLE),
        );
        let source = ConfigNatSource::new(config.clone());
        Ok(Self {
            engine: ReconciliationEngine::new(tracker, source, publisher, app_table),
            config,
        })
    }

    /// Cold or warm startup. A cold start syncs the already-present
    /// config before the event stream takes over; a warm start leaves
    /// that to the reconcile pass.
    pub async fn start(&mut self) -> Result<bool> {
        let warm = self.engine.start().await?;
        if !warm {
            let existing = load_static_nat(self.config.as_ref()).await?;
            info!(entries = existing.len(), "initial static NAT sync");
            for (key, entry) in existing {
                self.engine.handle_change(ChangeRecord::set(key, entry)).await;
            }
        }
        Ok(warm)
    }

    /// Runs the event loop until shutdown.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        self.engine.run(shutdown).await
    }

    /// Engine access for scenario tests.
    pub fn engine_mut(
        &mut self,
    ) -> &mut ReconciliationEngine<ConfigNatSource, DataplanePublisher> {
        &mut self.engine
    }

    pub fn counters(&self) -> SyncCounters {
        self.engine.counters()
    }
}
