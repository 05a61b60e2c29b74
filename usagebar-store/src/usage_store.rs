//! Main usage state store.
//!
//! Holds one entry per enabled provider. A refresh runs every enabled
//! probe concurrently and applies each result under the write lock as soon
//! as it arrives, so a slow provider never holds back the others and one
//! provider's result never touches another provider's entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{RwLock, broadcast, watch};
use tracing::{debug, info, instrument, warn};
use usagebar_core::{
    CostUsageTokenSnapshot, CreditsSnapshot, FetchSource, OpenAIDashboardSnapshot, ProviderKind,
    ProviderStatus, UsageSnapshot,
};
use usagebar_fetch::{ProbeContext, ProbeError};
use usagebar_providers::{Provider, ProviderFetch};

use crate::error::StoreError;
use crate::failure_gate::ConsecutiveFailureGate;

/// Capacity of the depletion broadcast channel.
const EVENT_CAPACITY: usize = 32;

// ============================================================================
// Probe Seam
// ============================================================================

/// Source of provider fetches.
#[async_trait]
pub trait UsageProbe: Send + Sync {
    /// Fetches one provider.
    async fn fetch(&self, provider: ProviderKind) -> Result<ProviderFetch, ProbeError>;

    /// Fetches service health. The default reports nothing.
    async fn status(&self, _provider: ProviderKind) -> Option<ProviderStatus> {
        None
    }
}

/// Probe backed by the real provider implementations.
#[derive(Debug, Clone)]
pub struct ProviderProbe {
    ctx: Arc<ProbeContext>,
}

impl ProviderProbe {
    /// Creates a probe over `ctx`.
    pub fn new(ctx: Arc<ProbeContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl UsageProbe for ProviderProbe {
    async fn fetch(&self, provider: ProviderKind) -> Result<ProviderFetch, ProbeError> {
        Provider::from(provider).fetch(&self.ctx).await
    }

    async fn status(&self, provider: ProviderKind) -> Option<ProviderStatus> {
        match Provider::from(provider).fetch_status(&self.ctx).await {
            Ok(status) => Some(status),
            Err(e) => {
                debug!(provider = %provider, error = %e, "Status unavailable");
                None
            }
        }
    }
}

// ============================================================================
// Phases and Events
// ============================================================================

/// Lifecycle of one provider's usage data.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderPhase {
    /// Not enabled; holds no state.
    Disabled,
    /// Enabled, never fetched.
    Idle,
    /// A fetch is running.
    Fetching,
    /// The last visible outcome was a success.
    Fresh,
    /// The last fetch failed and the failure surfaced.
    Stale {
        /// The surfaced failure.
        error: ProbeError,
    },
}

/// Primary-window quota transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepletionKind {
    /// Remaining dropped from above zero to zero.
    Depleted,
    /// Remaining rose from zero to above zero.
    Restored,
}

/// A quota transition for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepletionEvent {
    /// Provider whose quota changed.
    pub provider: ProviderKind,
    /// Direction.
    pub kind: DepletionKind,
}

fn depletion_between(previous: Option<&UsageSnapshot>, current: &UsageSnapshot) -> Option<DepletionKind> {
    let before = previous?.primary.as_ref()?.remaining_percent();
    let after = current.primary.as_ref()?.remaining_percent();
    if before > 0.0 && after <= 0.0 {
        Some(DepletionKind::Depleted)
    } else if before <= 0.0 && after > 0.0 {
        Some(DepletionKind::Restored)
    } else {
        None
    }
}

/// Rejects a dashboard signed in as someone other than the provider account.
fn check_dashboard_account(
    dashboard: OpenAIDashboardSnapshot,
    account: Option<&str>,
) -> Result<OpenAIDashboardSnapshot, ProbeError> {
    match account {
        Some(expected) if !expected.trim().eq_ignore_ascii_case(dashboard.signed_in_email.trim()) => {
            Err(ProbeError::AccountMismatch {
                expected: expected.to_string(),
                found: dashboard.signed_in_email,
            })
        }
        _ => Ok(dashboard),
    }
}

// ============================================================================
// Provider Entry
// ============================================================================

/// Everything the store knows about one provider.
#[derive(Debug, Clone)]
pub struct ProviderEntry {
    /// Current phase.
    pub phase: ProviderPhase,
    /// Last good snapshot.
    pub snapshot: Option<UsageSnapshot>,
    /// Credits, merged across refreshes.
    pub credits: Option<CreditsSnapshot>,
    /// Last OpenAI dashboard read for the expected account.
    pub dashboard: Option<OpenAIDashboardSnapshot>,
    /// Last dashboard failure, e.g. an account mismatch.
    pub dashboard_error: Option<ProbeError>,
    /// Surfaced usage failure.
    pub error: Option<ProbeError>,
    /// Strategy behind the snapshot.
    pub source: FetchSource,
    /// CLI version.
    pub version: Option<String>,
    /// Service health.
    pub status: Option<ProviderStatus>,
    /// Token cost.
    pub cost: Option<CostUsageTokenSnapshot>,
    /// Surfaced token-cost failure.
    pub cost_error: Option<String>,
    /// When the last fetch finished, successful or not.
    pub last_attempt: Option<DateTime<Utc>>,
    usage_gate: ConsecutiveFailureGate,
    cost_gate: ConsecutiveFailureGate,
}

impl ProviderEntry {
    fn new() -> Self {
        Self {
            phase: ProviderPhase::Idle,
            snapshot: None,
            credits: None,
            dashboard: None,
            dashboard_error: None,
            error: None,
            source: FetchSource::Unknown,
            version: None,
            status: None,
            cost: None,
            cost_error: None,
            last_attempt: None,
            usage_gate: ConsecutiveFailureGate::new(),
            cost_gate: ConsecutiveFailureGate::new(),
        }
    }

    fn apply_success(&mut self, fetch: ProviderFetch) {
        self.usage_gate.record_success();
        self.error = None;
        self.phase = ProviderPhase::Fresh;
        self.source = fetch.source;
        if fetch.version.is_some() {
            self.version = fetch.version;
        }
        if let Some(credits) = fetch.credits {
            self.credits = Some(credits.merged_over(self.credits.as_ref()));
        }
        let dashboard = fetch
            .dashboard
            .map(|result| result.and_then(|d| check_dashboard_account(d, fetch.snapshot.account_email())));
        match dashboard {
            Some(Ok(dashboard)) => {
                self.dashboard = Some(dashboard);
                self.dashboard_error = None;
            }
            Some(Err(e)) => {
                warn!(provider = %fetch.snapshot.provider, error = %e, "Dashboard failed, keeping cached copy");
                self.dashboard_error = Some(e);
            }
            None => {}
        }
        self.snapshot = Some(fetch.snapshot);
    }

    fn apply_failure(&mut self, error: ProbeError) {
        let surfaced = self.usage_gate.record_failure(self.snapshot.is_some());
        if surfaced {
            self.error = Some(error.clone());
            self.phase = ProviderPhase::Stale { error };
        } else {
            debug!(error = %error, streak = self.usage_gate.streak(), "Suppressed first failure");
            self.phase = if self.snapshot.is_some() {
                ProviderPhase::Fresh
            } else {
                ProviderPhase::Idle
            };
        }
    }
}

// ============================================================================
// Inner State
// ============================================================================

#[derive(Default)]
struct UsageStoreInner {
    enabled: Vec<ProviderKind>,
    entries: HashMap<ProviderKind, ProviderEntry>,
    last_refresh: Option<DateTime<Utc>>,
}

// ============================================================================
// Usage Store
// ============================================================================

/// Marks one provider as fetching until dropped. Dropping it mid-fetch, as
/// when a refresh task is aborted, clears the mark as well.
struct FetchingGuard<'a> {
    store: &'a UsageStore,
    provider: ProviderKind,
}

impl Drop for FetchingGuard<'_> {
    fn drop(&mut self) {
        self.store.finish_fetching(self.provider);
    }
}

/// Provider-keyed usage state, observable through a version counter.
///
/// `Fetching` is never stored in an entry. It is reported while a refresh
/// holds the provider, so an aborted refresh leaves the last settled phase.
pub struct UsageStore {
    inner: RwLock<UsageStoreInner>,
    fetching: Mutex<HashMap<ProviderKind, usize>>,
    notify: watch::Sender<u64>,
    events: broadcast::Sender<DepletionEvent>,
    notifications_enabled: bool,
    refresh_timeout: Duration,
}

impl UsageStore {
    /// Creates a store for `enabled` providers with a hard per-refresh timeout.
    pub fn new(enabled: &[ProviderKind], refresh_timeout: Duration) -> Self {
        let (notify, _) = watch::channel(0);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut inner = UsageStoreInner::default();
        for provider in enabled {
            if !inner.enabled.contains(provider) {
                inner.enabled.push(*provider);
                inner.entries.insert(*provider, ProviderEntry::new());
            }
        }
        Self {
            inner: RwLock::new(inner),
            fetching: Mutex::new(HashMap::new()),
            notify,
            events,
            notifications_enabled: true,
            refresh_timeout,
        }
    }

    /// Enables or disables depletion events.
    pub fn with_notifications(mut self, enabled: bool) -> Self {
        self.notifications_enabled = enabled;
        self
    }

    // ========================================================================
    // Access
    // ========================================================================

    /// Enabled providers in order.
    pub async fn enabled_providers(&self) -> Vec<ProviderKind> {
        self.inner.read().await.enabled.clone()
    }

    /// Entry for a provider.
    pub async fn entry(&self, provider: ProviderKind) -> Option<ProviderEntry> {
        let mut entry = self.inner.read().await.entries.get(&provider).cloned()?;
        if self.is_fetching(provider) {
            entry.phase = ProviderPhase::Fetching;
        }
        Some(entry)
    }

    /// Phase for a provider.
    pub async fn phase(&self, provider: ProviderKind) -> ProviderPhase {
        let phase = self
            .inner
            .read()
            .await
            .entries
            .get(&provider)
            .map_or(ProviderPhase::Disabled, |e| e.phase.clone());
        if phase != ProviderPhase::Disabled && self.is_fetching(provider) {
            ProviderPhase::Fetching
        } else {
            phase
        }
    }

    fn is_fetching(&self, provider: ProviderKind) -> bool {
        self.fetching
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&provider)
    }

    fn start_fetching(&self, provider: ProviderKind) -> FetchingGuard<'_> {
        *self
            .fetching
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(provider)
            .or_default() += 1;
        FetchingGuard { store: self, provider }
    }

    fn finish_fetching(&self, provider: ProviderKind) {
        {
            let mut fetching = self.fetching.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(count) = fetching.get_mut(&provider) {
                *count -= 1;
                if *count == 0 {
                    fetching.remove(&provider);
                }
            }
        }
        self.notify_change();
    }

    /// Snapshot for a provider.
    pub async fn snapshot(&self, provider: ProviderKind) -> Option<UsageSnapshot> {
        self.inner.read().await.entries.get(&provider).and_then(|e| e.snapshot.clone())
    }

    /// When the last refresh cycle finished.
    pub async fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.inner.read().await.last_refresh
    }

    // ========================================================================
    // Provider Management
    // ========================================================================

    /// Enables or disables a provider. Disabling drops all of its state.
    pub async fn set_enabled(&self, provider: ProviderKind, enabled: bool) {
        {
            let mut inner = self.inner.write().await;
            if enabled {
                if !inner.enabled.contains(&provider) {
                    inner.enabled.push(provider);
                    inner.entries.insert(provider, ProviderEntry::new());
                }
            } else {
                inner.enabled.retain(|p| *p != provider);
                inner.entries.remove(&provider);
            }
        }
        self.notify_change();
        info!(provider = %provider, enabled, "Provider enabled state changed");
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Refreshes `providers` that are enabled, concurrently.
    ///
    /// Every probe is bounded by the store's refresh timeout; a probe that
    /// misses it is recorded as timed out.
    #[instrument(skip(self, probe))]
    pub async fn refresh(&self, probe: &dyn UsageProbe, providers: &[ProviderKind]) {
        let targets: Vec<ProviderKind> = {
            let inner = self.inner.read().await;
            providers
                .iter()
                .copied()
                .filter(|p| inner.entries.contains_key(p))
                .collect()
        };
        if targets.is_empty() {
            return;
        }
        let guards: Vec<FetchingGuard<'_>> = targets.iter().map(|p| self.start_fetching(*p)).collect();
        self.notify_change();

        let timeout = self.refresh_timeout;
        join_all(guards.into_iter().map(|guard| async move {
            let provider = guard.provider;
            let result = match tokio::time::timeout(timeout, probe.fetch(provider)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(provider = %provider, timeout = ?timeout, "Refresh deadline exceeded");
                    Err(ProbeError::TimedOut(timeout))
                }
            };
            self.apply(provider, result).await;
            drop(guard);
        }))
        .await;

        self.inner.write().await.last_refresh = Some(Utc::now());
        self.notify_change();
    }

    /// Refreshes every enabled provider.
    pub async fn refresh_enabled(&self, probe: &dyn UsageProbe) {
        let providers = self.enabled_providers().await;
        self.refresh(probe, &providers).await;
    }

    /// Applies one fetch result atomically.
    pub async fn apply(&self, provider: ProviderKind, result: Result<ProviderFetch, ProbeError>) {
        let event = {
            let mut inner = self.inner.write().await;
            let Some(entry) = inner.entries.get_mut(&provider) else {
                debug!(provider = %provider, "Dropping result for disabled provider");
                return;
            };
            entry.last_attempt = Some(Utc::now());
            match result {
                Ok(fetch) => {
                    let kind = depletion_between(entry.snapshot.as_ref(), &fetch.snapshot);
                    debug!(provider = %provider, source = fetch.source.as_str(), "Usage updated");
                    entry.apply_success(fetch);
                    kind
                }
                Err(error) => {
                    entry.apply_failure(error);
                    None
                }
            }
        };

        if let Some(kind) = event.filter(|_| self.notifications_enabled) {
            info!(provider = %provider, kind = ?kind, "Quota transition");
            // No receivers is fine.
            let _ = self.events.send(DepletionEvent { provider, kind });
        }
        self.notify_change();
    }

    /// Fetches status for every enabled provider.
    pub async fn refresh_status(&self, probe: &dyn UsageProbe) {
        let providers = self.enabled_providers().await;
        let statuses = join_all(providers.iter().map(|p| probe.status(*p))).await;
        {
            let mut inner = self.inner.write().await;
            for (provider, status) in providers.into_iter().zip(statuses) {
                if let (Some(entry), Some(status)) = (inner.entries.get_mut(&provider), status) {
                    entry.status = Some(status);
                }
            }
        }
        self.notify_change();
    }

    /// Applies a token-cost scan result through the cost gate.
    pub async fn apply_cost(
        &self,
        provider: ProviderKind,
        result: Result<Option<CostUsageTokenSnapshot>, StoreError>,
    ) {
        {
            let mut inner = self.inner.write().await;
            let Some(entry) = inner.entries.get_mut(&provider) else {
                return;
            };
            match result {
                Ok(cost) => {
                    entry.cost_gate.record_success();
                    entry.cost = cost;
                    entry.cost_error = None;
                }
                Err(e) => {
                    if entry.cost_gate.record_failure(entry.cost.is_some()) {
                        entry.cost_error = Some(e.to_string());
                    }
                }
            }
        }
        self.notify_change();
    }

    // ========================================================================
    // Observable
    // ========================================================================

    /// Subscribes to the change counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.notify.subscribe()
    }

    /// Subscribes to depletion events.
    pub fn subscribe_depletion(&self) -> broadcast::Receiver<DepletionEvent> {
        self.events.subscribe()
    }

    fn notify_change(&self) {
        self.notify.send_modify(|version| *version += 1);
    }
}

// ============================================================================
// Tests
// ============================================================================
