//! Restart lifecycle tracking.
//!
//! Each engine instance persists a restart record in the state store under
//! `WARM_RESTART_TABLE|<app>`:
//!
//! - `restore_count` — incremented exactly once per observed restart cycle
//! - `state` — `initialized` → `restored` → `reconciled`
//! - `last_reconcile_duration` — seconds taken by the last reconcile pass
//!
//! Warm restart is enabled per app (or system-wide) through the config
//! store table `WARM_RESTART` (`enable` flag, optional `<app>_timer`).
//! When disabled, no state is ever written for the app.
//!
//! The tracker is single-writer (the owning engine); external health checks
//! read the same fields through [`get_state`] / [`get_restore_count`]
//! without touching the engine.

use statesync_common::{fvs_get, FieldValue, StateStore, StoreHandle, Table};
use tracing::{info, warn};

use crate::error::{EngineError, Result};

/// State-store table holding per-app restart records.
pub const STATE_WARM_RESTART_TABLE: &str = "WARM_RESTART_TABLE";
/// Config-store table holding per-app warm restart configuration.
pub const CFG_WARM_RESTART_TABLE: &str = "WARM_RESTART";
/// Config key enabling warm restart for every app at once.
pub const SYSTEM_KEY: &str = "system";

/// Fallback reconcile grace period when no timer is configured.
pub const DEFAULT_RECONCILE_TIMER_SECS: u64 = 5;

/// Restart lifecycle phase of one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    /// Cold start completed, no prior state recovered
    Initialized,
    /// Pre-restart state loaded, reconcile pass pending
    Restored,
    /// Reconcile pass finished; downstream matches external truth
    Reconciled,
}

impl LifecycleState {
    /// The persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Initialized => "initialized",
            LifecycleState::Restored => "restored",
            LifecycleState::Reconciled => "reconciled",
        }
    }

    /// Parses the persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initialized" => Some(LifecycleState::Initialized),
            "restored" => Some(LifecycleState::Restored),
            "reconciled" => Some(LifecycleState::Reconciled),
            _ => None,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads an app's lifecycle state, `None` if unset (disabled or never run).
pub async fn get_state(store: &dyn StateStore, app: &str) -> Result<Option<LifecycleState>> {
    let entry = store.get_entry(STATE_WARM_RESTART_TABLE, app).await?;
    Ok(entry
        .as_deref()
        .and_then(|e| fvs_get(e, "state"))
        .and_then(LifecycleState::parse))
}

/// Reads an app's restore counter, 0 if the app never persisted one.
pub async fn get_restore_count(store: &dyn StateStore, app: &str) -> Result<u32> {
    let entry = store.get_entry(STATE_WARM_RESTART_TABLE, app).await?;
    Ok(entry
        .as_deref()
        .and_then(|e| fvs_get(e, "restore_count"))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0))
}

/// Persists and exposes the restart lifecycle of one engine instance.
pub struct WarmRestartTracker {
    app: String,
    state_table: Table,
    config_table: Table,
    enabled: bool,
    restore_count: u32,
    state: Option<LifecycleState>,
    last_reconcile_duration: Option<u64>,
}

impl WarmRestartTracker {
    /// Creates a tracker for `app`, reading the enable flag from the
    /// config store. Store failures here are fatal to engine startup.
    pub async fn new(
        app: impl Into<String>,
        state_store: StoreHandle,
        config_store: StoreHandle,
    ) -> Result<Self> {
        let app = app.into();
        let config_table = Table::new(config_store, CFG_WARM_RESTART_TABLE);

        let enabled = Self::enable_flag(&config_table, SYSTEM_KEY).await?
            || Self::enable_flag(&config_table, &app).await?;

        Ok(Self {
            app,
            state_table: Table::new(state_store, STATE_WARM_RESTART_TABLE),
            config_table,
            enabled,
            restore_count: 0,
            state: None,
            last_reconcile_duration: None,
        })
    }

    async fn enable_flag(config: &Table, key: &str) -> Result<bool> {
        let entry = config.get(key).await?;
        Ok(entry
            .as_deref()
            .and_then(|e| fvs_get(e, "enable"))
            .map(|v| v == "true")
            .unwrap_or(false))
    }

    /// The app name this tracker belongs to.
    pub fn app(&self) -> &str {
        &self.app
    }

    /// True if warm restart is enabled for this app.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current lifecycle state; `None` when warm restart is disabled.
    pub fn state(&self) -> Option<LifecycleState> {
        self.state
    }

    /// Current restore counter.
    pub fn restore_count(&self) -> u32 {
        self.restore_count
    }

    /// Detects whether this start resumes a prior run.
    ///
    /// On a warm start the restore counter is bumped exactly once and the
    /// state enters `restored`; on a cold start the counter starts at 0 in
    /// `initialized`. Returns true for a warm start. When warm restart is
    /// disabled nothing is persisted and the result is always false.
    pub async fn check_warm_start(&mut self) -> Result<bool> {
        if !self.enabled {
            info!(app = %self.app, "warm restart disabled");
            return Ok(false);
        }

        let prior = self.state_table.get(&self.app).await.map_err(|e| {
            EngineError::StartupStateUnavailable {
                app: self.app.clone(),
                reason: e.to_string(),
            }
        })?;

        let warm = match prior
            .as_deref()
            .and_then(|e| fvs_get(e, "restore_count"))
            .and_then(|v| v.parse::<u32>().ok())
        {
            Some(count) => {
                self.restore_count = count + 1;
                self.state = Some(LifecycleState::Restored);
                true
            }
            None => {
                self.restore_count = 0;
                self.state = Some(LifecycleState::Initialized);
                false
            }
        };

        self.persist().await?;
        info!(
            app = %self.app,
            warm,
            restore_count = self.restore_count,
            state = %self.state.unwrap_or(LifecycleState::Initialized),
            "restart cycle started"
        );
        Ok(warm)
    }

    /// Advances the lifecycle state. Transitions only move forward within
    /// a cycle; a backward request is ignored with a diagnostic.
    pub async fn set_state(&mut self, state: LifecycleState) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if let Some(current) = self.state {
            if state < current {
                warn!(app = %self.app, from = %current, to = %state, "ignoring backward lifecycle transition");
                return Ok(());
            }
        }
        self.state = Some(state);
        self.persist().await?;
        info!(app = %self.app, state = %state, "lifecycle state");
        Ok(())
    }

    /// Marks the reconcile pass done, recording its duration.
    pub async fn record_reconciled(&mut self, duration_secs: u64) -> Result<()> {
        self.last_reconcile_duration = Some(duration_secs);
        self.set_state(LifecycleState::Reconciled).await
    }

    /// Reads the configured reconcile grace period for this app.
    ///
    /// A missing or non-numeric `<app>_timer` falls back to
    /// [`DEFAULT_RECONCILE_TIMER_SECS`] with a diagnostic that external
    /// checks can distinguish from a configured timer.
    pub async fn reconcile_timer(&self) -> Result<u64> {
        let field = format!("{}_timer", self.app);
        let entry = self.config_table.get(&self.app).await?;
        match entry.as_deref().and_then(|e| fvs_get(e, &field)) {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) => {
                    info!(app = %self.app, "warm start timer configured: {}", secs);
                    Ok(secs)
                }
                Err(_) => {
                    warn!(
                        app = %self.app,
                        value = raw,
                        "warm start timer invalid, using default {}",
                        DEFAULT_RECONCILE_TIMER_SECS
                    );
                    Ok(DEFAULT_RECONCILE_TIMER_SECS)
                }
            },
            None => {
                warn!(
                    app = %self.app,
                    "warm start timer invalid (not configured), using default {}",
                    DEFAULT_RECONCILE_TIMER_SECS
                );
                Ok(DEFAULT_RECONCILE_TIMER_SECS)
            }
        }
    }

    async fn persist(&self) -> Result<()> {
        let mut record: Vec<FieldValue> = vec![(
            "restore_count".to_string(),
            self.restore_count.to_string(),
        )];
        if let Some(state) = self.state {
            record.push(("state".to_string(), state.as_str().to_string()));
        }
        if let Some(duration) = self.last_reconcile_duration {
            record.push((
                "last_reconcile_duration".to_string(),
                duration.to_string(),
            ));
        }
        self.state_table.set(&self.app, &record).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statesync_common::{fvs, MemoryStore, StoreHandle};

    async fn enable(config: &StoreHandle, key: &str) {
        config
            .set_entry(CFG_WARM_RESTART_TABLE, key, &fvs(&[("enable", "true")]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn disabled_app_never_writes_state() {
        let state = MemoryStore::handle();
        let config = MemoryStore::handle();

        let mut tracker = WarmRestartTracker::new("neighsyncd", state.clone(), config)
            .await
            .unwrap();
        assert!(!tracker.is_enabled());
        assert!(!tracker.check_warm_start().await.unwrap());
        tracker.set_state(LifecycleState::Reconciled).await.unwrap();

        assert!(get_state(state.as_ref(), "neighsyncd").await.unwrap().is_none());
        assert_eq!(get_restore_count(state.as_ref(), "neighsyncd").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cold_then_warm_increments_restore_count_once() {
        let state = MemoryStore::handle();
        let config = MemoryStore::handle();
        enable(&config, "neighsyncd").await;

        // First start is cold.
        let mut tracker =
            WarmRestartTracker::new("neighsyncd", state.clone(), config.clone())
                .await
                .unwrap();
        assert!(!tracker.check_warm_start().await.unwrap());
        assert_eq!(tracker.restore_count(), 0);
        assert_eq!(tracker.state(), Some(LifecycleState::Initialized));
        tracker.record_reconciled(0).await.unwrap();

        // Second start resumes the first run's record.
        let mut tracker =
            WarmRestartTracker::new("neighsyncd", state.clone(), config.clone())
                .await
                .unwrap();
        assert!(tracker.check_warm_start().await.unwrap());
        assert_eq!(tracker.restore_count(), 1);
        assert_eq!(tracker.state(), Some(LifecycleState::Restored));
        tracker.record_reconciled(2).await.unwrap();

        assert_eq!(get_restore_count(state.as_ref(), "neighsyncd").await.unwrap(), 1);
        assert_eq!(
            get_state(state.as_ref(), "neighsyncd").await.unwrap(),
            Some(LifecycleState::Reconciled)
        );

        // Steady-state activity never touches the counter; only a third
        // restart does.
        let mut tracker = WarmRestartTracker::new("neighsyncd", state.clone(), config)
            .await
            .unwrap();
        assert!(tracker.check_warm_start().await.unwrap());
        assert_eq!(tracker.restore_count(), 2);
    }

    #[tokio::test]
    async fn system_wide_enable_covers_all_apps() {
        let state = MemoryStore::handle();
        let config = MemoryStore::handle();
        enable(&config, SYSTEM_KEY).await;

        let tracker = WarmRestartTracker::new("routesyncd", state, config)
            .await
            .unwrap();
        assert!(tracker.is_enabled());
    }

    #[tokio::test]
    async fn backward_transition_is_ignored() {
        let state = MemoryStore::handle();
        let config = MemoryStore::handle();
        enable(&config, "natsyncd").await;

        let mut tracker = WarmRestartTracker::new("natsyncd", state.clone(), config)
            .await
            .unwrap();
        tracker.check_warm_start().await.unwrap();
        tracker.set_state(LifecycleState::Reconciled).await.unwrap();
        tracker.set_state(LifecycleState::Restored).await.unwrap();

        assert_eq!(tracker.state(), Some(LifecycleState::Reconciled));
        assert_eq!(
            get_state(state.as_ref(), "natsyncd").await.unwrap(),
            Some(LifecycleState::Reconciled)
        );
    }

    #[tokio::test]
    async fn timer_configured_and_fallback() {
        let state = MemoryStore::handle();
        let config = MemoryStore::handle();
        config
            .set_entry(
                CFG_WARM_RESTART_TABLE,
                "neighsyncd",
                &fvs(&[("enable", "true"), ("neighsyncd_timer", "15")]),
            )
            .await
            .unwrap();

        let tracker = WarmRestartTracker::new("neighsyncd", state.clone(), config.clone())
            .await
            .unwrap();
        assert_eq!(tracker.reconcile_timer().await.unwrap(), 15);

        // Unconfigured app falls back to the default.
        enable(&config, "natsyncd").await;
        let tracker = WarmRestartTracker::new("natsyncd", state.clone(), config.clone())
            .await
            .unwrap();
        assert_eq!(
            tracker.reconcile_timer().await.unwrap(),
            DEFAULT_RECONCILE_TIMER_SECS
        );

        // Non-numeric value also falls back.
        config
            .set_entry(
                CFG_WARM_RESTART_TABLE,
                "routesyncd",
                &fvs(&[("enable", "true"), ("routesyncd_timer", "soon")]),
            )
            .await
            .unwrap();
        let tracker = WarmRestartTracker::new("routesyncd", state, config)
            .await
            .unwrap();
        assert_eq!(
            tracker.reconcile_timer().await.unwrap(),
            DEFAULT_RECONCILE_TIMER_SECS
        );
    }

    #[tokio::test]
    async fn duration_is_recorded() {
        let state = MemoryStore::handle();
        let config = MemoryStore::handle();
        enable(&config, "bgp").await;

        let mut tracker = WarmRestartTracker::new("bgp", state.clone(), config)
            .await
            .unwrap();
        tracker.check_warm_start().await.unwrap();
        tracker.record_reconciled(7).await.unwrap();

        let entry = state
            .get_entry(STATE_WARM_RESTART_TABLE, "bgp")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fvs_get(&entry, "last_reconcile_duration"), Some("7"));
    }
}
