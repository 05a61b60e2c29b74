//! Background refresh scheduling.
//!
//! One timer task drives usage refreshes at the configured cadence. At most
//! one refresh runs at a time: a timer tick that lands while a refresh is in
//! flight is skipped, while [`RefreshScheduler::refresh_now`] aborts the
//! running refresh and starts over. Token cost runs on its own hourly task
//! with the filesystem scan on the blocking pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Local;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use usagebar_core::ProviderKind;

use crate::cost::{CostScanner, ProviderFilter};
use crate::error::StoreError;
use crate::settings::RefreshCadence;
use crate::usage_store::{UsageProbe, UsageStore};

/// Interval between token-cost scans.
pub const COST_INTERVAL: Duration = Duration::from_secs(3600);

type TaskSlot = Mutex<Option<JoinHandle<()>>>;

fn take(slot: &TaskSlot) -> Option<JoinHandle<()>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

fn abort(slot: &TaskSlot) {
    if let Some(handle) = take(slot) {
        handle.abort();
    }
}

// ============================================================================
// Shared State
// ============================================================================

struct Shared {
    store: Arc<UsageStore>,
    probe: Arc<dyn UsageProbe>,
    in_flight: TaskSlot,
    with_status: AtomicBool,
}

impl Shared {
    /// Starts a refresh. When one is already running, `replace` aborts it;
    /// otherwise nothing starts and `false` is returned.
    fn start_refresh(self: &Arc<Self>, replace: bool) -> bool {
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.as_ref().filter(|h| !h.is_finished()) {
            if !replace {
                return false;
            }
            debug!("Aborting in-flight refresh");
            handle.abort();
        }

        let shared = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            shared.store.refresh_enabled(shared.probe.as_ref()).await;
            if shared.with_status.load(Ordering::Relaxed) {
                shared.store.refresh_status(shared.probe.as_ref()).await;
            }
        }));
        true
    }

    fn is_refreshing(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Drives periodic usage and token-cost refreshes for a [`UsageStore`].
pub struct RefreshScheduler {
    shared: Arc<Shared>,
    timer: TaskSlot,
    cost: TaskSlot,
}

impl RefreshScheduler {
    /// Creates an idle scheduler. Nothing runs until a cadence is set or a
    /// refresh is requested.
    pub fn new(store: Arc<UsageStore>, probe: Arc<dyn UsageProbe>) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                probe,
                in_flight: Mutex::new(None),
                with_status: AtomicBool::new(false),
            }),
            timer: Mutex::new(None),
            cost: Mutex::new(None),
        }
    }

    /// Also polls service status after each usage refresh.
    pub fn set_status_polling(&self, enabled: bool) {
        self.shared.with_status.store(enabled, Ordering::Relaxed);
    }

    /// The store being refreshed.
    pub fn store(&self) -> &Arc<UsageStore> {
        &self.shared.store
    }

    /// Refreshes now, replacing any refresh in flight.
    pub fn refresh_now(&self) {
        info!("Manual refresh requested");
        self.shared.start_refresh(true);
    }

    /// True while a refresh runs.
    pub fn is_refreshing(&self) -> bool {
        self.shared.is_refreshing()
    }

    /// Restarts the timer for `cadence`. `Manual` leaves no timer running.
    pub fn set_cadence(&self, cadence: RefreshCadence) {
        info!(cadence = %cadence, "Refresh cadence set");
        self.set_interval(cadence.as_duration());
    }

    fn set_interval(&self, period: Option<Duration>) {
        abort(&self.timer);
        let Some(period) = period else { return };

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !shared.start_refresh(false) {
                    debug!("Refresh still in flight, skipping tick");
                }
            }
        });
        *self.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Starts the hourly token-cost task. The first scan runs immediately.
    pub fn start_cost(&self, scanner: Arc<CostScanner>) {
        abort(&self.cost);
        let store = Arc::clone(&self.shared.store);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(COST_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                scan_costs(&store, &scanner).await;
            }
        });
        *self.cost.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Stops every task, including a refresh in flight.
    pub fn shutdown(&self) {
        abort(&self.timer);
        abort(&self.cost);
        abort(&self.shared.in_flight);
        info!("Refresh scheduler stopped");
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        abort(&self.timer);
        abort(&self.cost);
        abort(&self.shared.in_flight);
    }
}

/// Scans token cost for every enabled provider that has local logs.
async fn scan_costs(store: &UsageStore, scanner: &Arc<CostScanner>) {
    let enabled = store.enabled_providers().await;
    let vertex_enabled = enabled.contains(&ProviderKind::VertexAI);

    for provider in enabled {
        let Ok(filter) = ProviderFilter::for_provider(provider, vertex_enabled) else {
            continue;
        };
        let scanner = Arc::clone(scanner);
        let result = tokio::task::spawn_blocking(move || scanner.scan(filter, Local::now().date_naive(), false))
            .await
            .map_err(StoreError::from)
            .and_then(|r| r);
        if let Err(e) = &result {
            warn!(provider = %provider, error = %e, "Token cost scan failed");
        }
        store.apply_cost(provider, result).await;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostRoots;
    use crate::usage_store::ProviderPhase;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use usagebar_core::{FetchSource, RateWindow, UsageSnapshot};
    use usagebar_fetch::ProbeError;
    use usagebar_providers::ProviderFetch;

    struct CountingProbe {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingProbe {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UsageProbe for CountingProbe {
        async fn fetch(&self, provider: ProviderKind) -> Result<ProviderFetch, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let mut snapshot = UsageSnapshot::new(provider);
            snapshot.primary = Some(RateWindow::new(12.0));
            Ok(ProviderFetch {
                snapshot,
                credits: None,
                dashboard: None,
                source: FetchSource::Rpc,
                version: None,
                attempts: Vec::new(),
            })
        }
    }

    fn scheduler(probe: Arc<CountingProbe>) -> RefreshScheduler {
        let store = Arc::new(UsageStore::new(&[ProviderKind::Codex], Duration::from_secs(5)));
        RefreshScheduler::new(store, probe)
    }

    async fn wait_for_fresh(store: &UsageStore) {
        let mut rx = store.subscribe();
        tokio::time::timeout(Duration::from_secs(2), async {
            while store.phase(ProviderKind::Codex).await != ProviderPhase::Fresh {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_refresh_now_updates_store() {
        let probe = CountingProbe::new(Duration::ZERO);
        let scheduler = scheduler(Arc::clone(&probe));
        scheduler.refresh_now();
        wait_for_fresh(scheduler.store()).await;
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_now_replaces_in_flight() {
        let probe = CountingProbe::new(Duration::from_millis(100));
        let scheduler = scheduler(Arc::clone(&probe));
        scheduler.refresh_now();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(scheduler.is_refreshing());
        scheduler.refresh_now();
        wait_for_fresh(scheduler.store()).await;
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test]
    async fn test_ticks_skip_while_in_flight() {
        let probe = CountingProbe::new(Duration::from_millis(200));
        let scheduler = scheduler(Arc::clone(&probe));
        scheduler.set_interval(Some(Duration::from_millis(20)));
        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.shutdown();
        let calls = probe.calls();
        assert!((1..=3).contains(&calls), "expected skipped ticks, got {calls} calls");
    }

    #[tokio::test]
    async fn test_shutdown_stops_timer() {
        let probe = CountingProbe::new(Duration::ZERO);
        let scheduler = scheduler(Arc::clone(&probe));
        scheduler.set_interval(Some(Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_shutdown = probe.calls();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(probe.calls(), after_shutdown);
        assert!(!scheduler.is_refreshing());
    }

    #[tokio::test]
    async fn test_shutdown_mid_refresh_leaves_settled_phase() {
        let probe = CountingProbe::new(Duration::from_secs(5));
        let scheduler = scheduler(Arc::clone(&probe));
        scheduler.refresh_now();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(scheduler.store().phase(ProviderKind::Codex).await, ProviderPhase::Fetching);

        scheduler.shutdown();
        tokio::time::timeout(Duration::from_secs(2), async {
            while scheduler.store().phase(ProviderKind::Codex).await == ProviderPhase::Fetching {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(scheduler.store().phase(ProviderKind::Codex).await, ProviderPhase::Idle);
    }

    #[tokio::test]
    async fn test_manual_cadence_runs_nothing() {
        let probe = CountingProbe::new(Duration::ZERO);
        let scheduler = scheduler(Arc::clone(&probe));
        scheduler.set_cadence(RefreshCadence::Manual);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_cost_task_applies_results() {
        let home = tempfile::tempdir().unwrap();
        let probe = CountingProbe::new(Duration::ZERO);
        let scheduler = scheduler(probe);
        let scanner = Arc::new(
            CostScanner::new(CostRoots {
                codex: vec![home.path().join("sessions")],
                claude: vec![],
            })
            .with_cache_path(None),
        );

        let mut rx = scheduler.store().subscribe();
        scheduler.start_cost(scanner);
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .unwrap()
            .unwrap();
        scheduler.shutdown();

        let entry = scheduler.store().entry(ProviderKind::Codex).await.unwrap();
        assert!(entry.cost.is_none());
        assert!(entry.cost_error.is_none());
    }
}
