//! Static NAT pipeline scenarios over in-memory stores.

use std::sync::Arc;
use std::time::Duration;

use natsyncd::{NatSyncd, APP_NAME, APP_NAT_TABLE, CFG_STATIC_NAT_TABLE, DATAPLANE_NAT_TABLE};
use pretty_assertions::assert_eq;
use statesync_common::{fvs, MemoryStore, StateStore, StoreHandle};
use statesync_core::{get_restore_count, ChangeRecord, CFG_WARM_RESTART_TABLE};
use tokio_util::sync::CancellationToken;

const GLOBAL_IP: &str = "67.66.65.1";
const LOCAL_IP: &str = "18.18.18.2";

struct Harness {
    appl: MemoryStore,
    config: StoreHandle,
    state: StoreHandle,
}

impl Harness {
    async fn new() -> Self {
        let config = MemoryStore::handle();
        config
            .set_entry(
                CFG_WARM_RESTART_TABLE,
                APP_NAME,
                &fvs(&[("enable", "true")]),
            )
            .await
            .unwrap();
        Self {
            appl: MemoryStore::new(),
            config,
            state: MemoryStore::handle(),
        }
    }

    async fn configure_nat(&self, global_ip: &str, local_ip: &str) {
        self.config
            .set_entry(
                CFG_STATIC_NAT_TABLE,
                global_ip,
                &fvs(&[("local_ip", local_ip)]),
            )
            .await
            .unwrap();
    }

    async fn boot(&self) -> NatSyncd {
        let appl: StoreHandle = Arc::new(self.appl.clone());
        let mut daemon = NatSyncd::new(appl, self.config.clone(), self.state.clone())
            .await
            .unwrap();
        daemon.start().await.unwrap();
        daemon
    }

    async fn dataplane_count(&self) -> usize {
        self.appl.len(DATAPLANE_NAT_TABLE).await
    }
}

/// One configured mapping becomes one app entry plus exactly three
/// dataplane entries, and deletion removes all of them.
#[tokio::test]
async fn static_nat_expands_to_three_dataplane_entries() {
    let h = Harness::new().await;
    h.configure_nat(GLOBAL_IP, LOCAL_IP).await;

    let mut daemon = h.boot().await;

    let app_entry = h
        .appl
        .get_entry(APP_NAT_TABLE, GLOBAL_IP)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        app_entry,
        fvs(&[
            ("entry_type", "static"),
            ("nat_type", "dnat"),
            ("translated_ip", LOCAL_IP),
        ])
    );

    assert_eq!(h.dataplane_count().await, 3);
    let snat = h
        .appl
        .get_entry(DATAPLANE_NAT_TABLE, &format!("snat:{LOCAL_IP}"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        snat,
        fvs(&[
            ("entry_type", "static"),
            ("nat_type", "snat"),
            ("translated_ip", GLOBAL_IP),
        ])
    );
    assert!(h
        .appl
        .get_entry(DATAPLANE_NAT_TABLE, &format!("dnat:{GLOBAL_IP}"))
        .await
        .unwrap()
        .is_some());
    assert!(h
        .appl
        .get_entry(DATAPLANE_NAT_TABLE, &format!("dnat_pool:{GLOBAL_IP}"))
        .await
        .unwrap()
        .is_some());

    daemon
        .engine_mut()
        .handle_change(ChangeRecord::del(GLOBAL_IP))
        .await;
    assert_eq!(h.dataplane_count().await, 0);
    assert!(h
        .appl
        .get_entry(APP_NAT_TABLE, GLOBAL_IP)
        .await
        .unwrap()
        .is_none());
}

/// Restarting with the same config republishes nothing.
#[tokio::test]
async fn warm_restart_with_unchanged_config_is_a_noop() {
    let h = Harness::new().await;
    h.configure_nat(GLOBAL_IP, LOCAL_IP).await;

    let run1 = h.boot().await;
    assert_eq!(run1.counters().added, 1);
    drop(run1);

    let mut run2 = h.boot().await;
    let delta = run2.engine_mut().reconcile().await.unwrap();

    assert_eq!(delta.added + delta.updated + delta.deleted, 0);
    assert_eq!(h.dataplane_count().await, 3);
    assert_eq!(get_restore_count(h.state.as_ref(), APP_NAME).await.unwrap(), 1);
}

/// A mapping deleted while the daemon was down is cleaned up by the
/// reconcile pass, dataplane entries included.
#[tokio::test]
async fn mapping_removed_during_downtime_is_reconciled_away() {
    let h = Harness::new().await;
    h.configure_nat(GLOBAL_IP, LOCAL_IP).await;
    h.configure_nat("67.66.65.2", "18.18.18.3").await;

    let run1 = h.boot().await;
    assert_eq!(h.dataplane_count().await, 6);
    drop(run1);

    h.config
        .del_entry(CFG_STATIC_NAT_TABLE, "67.66.65.2")
        .await
        .unwrap();

    let mut run2 = h.boot().await;
    let delta = run2.engine_mut().reconcile().await.unwrap();

    assert_eq!(delta.deleted, 1);
    assert_eq!(delta.added, 0);
    assert_eq!(h.dataplane_count().await, 3);
    assert!(h
        .appl
        .get_entry(APP_NAT_TABLE, "67.66.65.2")
        .await
        .unwrap()
        .is_none());
}

/// Changing the local address republishes the mapping and clears the
/// stale reverse SNAT entry.
#[tokio::test]
async fn changed_local_ip_drops_stale_snat_entry() {
    let h = Harness::new().await;
    h.configure_nat(GLOBAL_IP, LOCAL_IP).await;

    let mut daemon = h.boot().await;

    daemon
        .engine_mut()
        .handle_change(ChangeRecord::set(
            GLOBAL_IP,
            fvs(&[
                ("translated_ip", "18.18.18.9"),
                ("nat_type", "dnat"),
                ("entry_type", "static"),
            ]),
        ))
        .await;

    assert_eq!(daemon.counters().updated, 1);
    assert_eq!(h.dataplane_count().await, 3);
    assert!(h
        .appl
        .get_entry(DATAPLANE_NAT_TABLE, &format!("snat:{LOCAL_IP}"))
        .await
        .unwrap()
        .is_none());
    assert!(h
        .appl
        .get_entry(DATAPLANE_NAT_TABLE, "snat:18.18.18.9")
        .await
        .unwrap()
        .is_some());
}

/// Live config writes flow through the store subscription into the
/// published tables.
#[tokio::test]
async fn config_subscription_drives_the_pipeline() {
    let h = Harness::new().await;
    let mut daemon = h.boot().await;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    let task = tokio::spawn(async move {
        daemon.run(shutdown).await.unwrap();
    });

    h.configure_nat(GLOBAL_IP, LOCAL_IP).await;

    let mut published = false;
    for _ in 0..200 {
        if h.dataplane_count().await == 3 {
            published = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(published, "config write never reached the dataplane table");

    h.config
        .del_entry(CFG_STATIC_NAT_TABLE, GLOBAL_IP)
        .await
        .unwrap();

    let mut cleared = false;
    for _ in 0..200 {
        if h.dataplane_count().await == 0 {
            cleared = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(cleared, "config delete never reached the dataplane table");

    trigger.cancel();
    task.await.unwrap();
}
