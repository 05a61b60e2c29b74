//! Usage-related types.
//!
//! - [`UsageSnapshot`] - Normalized per-provider result
//! - [`RateWindow`] - Individual usage window
//! - [`ProviderCostSnapshot`] - Spend-based quota

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::provider::{ProviderIdentitySnapshot, ProviderKind};
use super::status::FetchSource;
use crate::error::CoreError;

// ============================================================================
// Rate Window
// ============================================================================

/// When a window resets: an absolute time, or the source's own wording when
/// no absolute time could be derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowReset {
    /// Absolute reset time.
    At(DateTime<Utc>),
    /// Opaque text from the source (e.g. "Resets in 3h").
    Description(String),
}

/// A single usage window (session, weekly, or model-specific).
///
/// `used_percent` is clamped to `[0, 100]` on construction and on
/// deserialization, so `used_percent() + remaining_percent() == 100` holds
/// for every value, including out-of-range or NaN upstream data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RateWindowRepr", into = "RateWindowRepr")]
pub struct RateWindow {
    used_percent: f64,
    /// Window duration in minutes (300 = 5 hours, 10080 = 1 week).
    pub window_minutes: Option<u32>,
    /// Reset time, if the source reported one.
    pub reset: Option<WindowReset>,
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

impl RateWindow {
    /// Creates a window from a used percentage.
    pub fn new(used_percent: f64) -> Self {
        Self {
            used_percent: clamp_percent(used_percent),
            window_minutes: None,
            reset: None,
        }
    }

    /// Creates a window from a remaining percentage.
    pub fn from_remaining(remaining_percent: f64) -> Self {
        Self::new(100.0 - clamp_percent(remaining_percent))
    }

    /// Sets the window duration.
    pub fn with_window_minutes(mut self, minutes: u32) -> Self {
        self.window_minutes = Some(minutes);
        self
    }

    /// Sets an absolute reset time, replacing any description.
    pub fn with_resets_at(mut self, at: DateTime<Utc>) -> Self {
        self.reset = Some(WindowReset::At(at));
        self
    }

    /// Sets a reset description unless an absolute time is already known.
    pub fn with_reset_description(mut self, text: impl Into<String>) -> Self {
        if !matches!(self.reset, Some(WindowReset::At(_))) {
            self.reset = Some(WindowReset::Description(text.into()));
        }
        self
    }

    /// Percentage of the quota used, in `[0, 100]`.
    pub fn used_percent(&self) -> f64 {
        self.used_percent
    }

    /// Percentage of the quota remaining, in `[0, 100]`.
    pub fn remaining_percent(&self) -> f64 {
        100.0 - self.used_percent
    }

    /// Returns the absolute reset time, if known.
    pub fn resets_at(&self) -> Option<DateTime<Utc>> {
        match &self.reset {
            Some(WindowReset::At(at)) => Some(*at),
            _ => None,
        }
    }

    /// Returns the opaque reset description, if that is all the source gave.
    pub fn reset_description(&self) -> Option<&str> {
        match &self.reset {
            Some(WindowReset::Description(text)) => Some(text),
            _ => None,
        }
    }

    /// Returns true when nothing is left in this window.
    pub fn is_exhausted(&self) -> bool {
        self.remaining_percent() <= 0.0
    }

    /// Returns the window duration.
    pub fn window_duration(&self) -> Option<Duration> {
        self.window_minutes.map(|m| Duration::minutes(i64::from(m)))
    }
}

#[derive(Serialize, Deserialize)]
struct RateWindowRepr {
    used_percent: f64,
    #[serde(default)]
    window_minutes: Option<u32>,
    #[serde(default)]
    resets_at: Option<DateTime<Utc>>,
    #[serde(default)]
    reset_description: Option<String>,
}

impl From<RateWindowRepr> for RateWindow {
    fn from(repr: RateWindowRepr) -> Self {
        let reset = match (repr.resets_at, repr.reset_description) {
            (Some(at), _) => Some(WindowReset::At(at)),
            (None, Some(text)) => Some(WindowReset::Description(text)),
            (None, None) => None,
        };
        Self {
            used_percent: clamp_percent(repr.used_percent),
            window_minutes: repr.window_minutes,
            reset,
        }
    }
}

impl From<RateWindow> for RateWindowRepr {
    fn from(window: RateWindow) -> Self {
        let resets_at = window.resets_at();
        let reset_description = window.reset_description().map(str::to_string);
        Self {
            used_percent: window.used_percent,
            window_minutes: window.window_minutes,
            resets_at,
            reset_description,
        }
    }
}

// ============================================================================
// Provider Cost
// ============================================================================

/// Spend-based quota reported by a provider (e.g. monthly overage budget).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCostSnapshot {
    /// Amount spent in the current period.
    pub used: f64,
    /// Spending limit for the period.
    pub limit: f64,
    /// ISO currency code.
    pub currency_code: String,
    /// Period label ("Monthly").
    pub period: Option<String>,
    /// When the period resets.
    pub resets_at: Option<DateTime<Utc>>,
}

impl ProviderCostSnapshot {
    /// Returns spend as a percentage of the limit, clamped to `[0, 100]`.
    pub fn used_percent(&self) -> f64 {
        if self.limit <= 0.0 {
            return 0.0;
        }
        clamp_percent(self.used / self.limit * 100.0)
    }
}

// ============================================================================
// Usage Snapshot
// ============================================================================

/// Normalized usage for one provider.
///
/// - **Primary** = session window (e.g. 5 hours)
/// - **Secondary** = weekly window
/// - **Tertiary** = model-specific window (Opus/Sonnet only)
///
/// A snapshot is built fresh by a probe on every successful fetch and
/// replaced wholesale on the next one. Deserialization applies the same
/// identity check as [`UsageSnapshot::with_identity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UsageSnapshotRepr")]
pub struct UsageSnapshot {
    /// Provider that produced this snapshot.
    pub provider: ProviderKind,
    /// Primary usage window (session).
    pub primary: Option<RateWindow>,
    /// Secondary usage window (weekly).
    pub secondary: Option<RateWindow>,
    /// Tertiary usage window (model-specific).
    pub tertiary: Option<RateWindow>,
    /// Spend-based quota, if the provider reports one.
    pub provider_cost: Option<ProviderCostSnapshot>,
    /// When this snapshot was produced.
    pub updated_at: DateTime<Utc>,
    identity: Option<ProviderIdentitySnapshot>,
    /// How this data was fetched.
    #[serde(default)]
    pub fetch_source: FetchSource,
}

impl UsageSnapshot {
    /// Creates an empty snapshot for a provider.
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            primary: None,
            secondary: None,
            tertiary: None,
            provider_cost: None,
            updated_at: Utc::now(),
            identity: None,
            fetch_source: FetchSource::default(),
        }
    }

    /// Attaches an identity.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IdentityMismatch`] when the identity belongs to
    /// a different provider.
    pub fn with_identity(mut self, identity: ProviderIdentitySnapshot) -> Result<Self, CoreError> {
        if identity.provider_id != self.provider {
            return Err(CoreError::IdentityMismatch {
                snapshot: self.provider,
                identity: identity.provider_id,
            });
        }
        self.identity = Some(identity);
        Ok(self)
    }

    /// Returns the identity attached to this snapshot.
    pub fn identity(&self) -> Option<&ProviderIdentitySnapshot> {
        self.identity.as_ref()
    }

    /// Returns the account email, if known.
    pub fn account_email(&self) -> Option<&str> {
        self.identity.as_ref()?.account_email.as_deref()
    }

    /// Returns true if any window data is present.
    pub fn has_data(&self) -> bool {
        self.primary.is_some() || self.secondary.is_some() || self.tertiary.is_some()
    }

    /// Returns the highest usage percentage across all windows.
    pub fn max_usage_percent(&self) -> f64 {
        [&self.primary, &self.secondary, &self.tertiary]
            .into_iter()
            .flatten()
            .map(RateWindow::used_percent)
            .fold(0.0, f64::max)
    }

    /// Returns true if this snapshot is older than `threshold`.
    pub fn is_stale(&self, threshold: Duration) -> bool {
        Utc::now() - self.updated_at > threshold
    }
}

#[derive(Deserialize)]
struct UsageSnapshotRepr {
    provider: ProviderKind,
    primary: Option<RateWindow>,
    secondary: Option<RateWindow>,
    tertiary: Option<RateWindow>,
    provider_cost: Option<ProviderCostSnapshot>,
    updated_at: DateTime<Utc>,
    identity: Option<ProviderIdentitySnapshot>,
    #[serde(default)]
    fetch_source: FetchSource,
}

impl TryFrom<UsageSnapshotRepr> for UsageSnapshot {
    type Error = CoreError;

    fn try_from(repr: UsageSnapshotRepr) -> Result<Self, Self::Error> {
        let snapshot = Self {
            provider: repr.provider,
            primary: repr.primary,
            secondary: repr.secondary,
            tertiary: repr.tertiary,
            provider_cost: repr.provider_cost,
            updated_at: repr.updated_at,
            identity: None,
            fetch_source: repr.fetch_source,
        };
        match repr.identity {
            Some(identity) => snapshot.with_identity(identity),
            None => Ok(snapshot),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_sum_invariant() {
        for value in [-20.0, 0.0, 12.5, 72.0, 100.0, 105.0, f64::NAN, f64::INFINITY] {
            let window = RateWindow::new(value);
            let sum = window.used_percent() + window.remaining_percent();
            assert!((sum - 100.0).abs() < f64::EPSILON, "value {value}");
            assert!((0.0..=100.0).contains(&window.used_percent()));
            assert!((0.0..=100.0).contains(&window.remaining_percent()));
        }
    }

    #[test]
    fn test_over_limit_clamps_to_zero_remaining() {
        let window = RateWindow::new(105.0);
        assert!((window.remaining_percent() - 0.0).abs() < 0.01);
        assert!(window.is_exhausted());
    }

    #[test]
    fn test_from_remaining() {
        let window = RateWindow::from_remaining(72.0);
        assert!((window.used_percent() - 28.0).abs() < 0.01);
    }

    #[test]
    fn test_deserialize_clamps() {
        let window: RateWindow = serde_json::from_str(r#"{"used_percent": 140.0}"#).unwrap();
        assert!((window.used_percent() - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_reset_at_wins_over_description() {
        let at = Utc::now();
        let window = RateWindow::new(10.0)
            .with_resets_at(at)
            .with_reset_description("in 3h");
        assert_eq!(window.resets_at(), Some(at));
        assert!(window.reset_description().is_none());

        let described = RateWindow::new(10.0).with_reset_description("in 3h");
        assert_eq!(described.reset_description(), Some("in 3h"));
        assert!(described.resets_at().is_none());
    }

    #[test]
    fn test_serde_keeps_reset() {
        let window = RateWindow::new(40.0)
            .with_window_minutes(300)
            .with_reset_description("Resets 2pm");
        let json = serde_json::to_string(&window).unwrap();
        let back: RateWindow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, window);
    }

    #[test]
    fn test_identity_must_match_provider() {
        let claude_identity =
            ProviderIdentitySnapshot::new(ProviderKind::Claude).with_organization("Acme");
        let result = UsageSnapshot::new(ProviderKind::Codex).with_identity(claude_identity);
        assert!(matches!(result, Err(CoreError::IdentityMismatch { .. })));

        let codex_identity =
            ProviderIdentitySnapshot::new(ProviderKind::Codex).with_email("a@x.com");
        let snapshot = UsageSnapshot::new(ProviderKind::Codex)
            .with_identity(codex_identity)
            .unwrap();
        assert_eq!(snapshot.account_email(), Some("a@x.com"));
    }

    #[test]
    fn test_deserialize_rejects_foreign_identity() {
        let snapshot = UsageSnapshot::new(ProviderKind::Codex)
            .with_identity(ProviderIdentitySnapshot::new(ProviderKind::Codex).with_email("a@x.com"))
            .unwrap();
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: UsageSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);

        let mut value = serde_json::to_value(&snapshot).unwrap();
        value["identity"]["provider_id"] = serde_json::to_value(ProviderKind::Claude).unwrap();
        let err = serde_json::from_value::<UsageSnapshot>(value).unwrap_err();
        assert!(err.to_string().contains("cannot be attached"));
    }

    #[test]
    fn test_absent_and_exhausted_are_distinct() {
        let mut snapshot = UsageSnapshot::new(ProviderKind::Claude);
        assert!(snapshot.secondary.is_none());
        snapshot.secondary = Some(RateWindow::new(100.0));
        assert!(snapshot.secondary.as_ref().is_some_and(RateWindow::is_exhausted));
    }

    #[test]
    fn test_max_usage_percent() {
        let mut snapshot = UsageSnapshot::new(ProviderKind::Claude);
        snapshot.primary = Some(RateWindow::new(30.0));
        snapshot.secondary = Some(RateWindow::new(55.0));
        assert!((snapshot.max_usage_percent() - 55.0).abs() < 0.01);
    }

    #[test]
    fn test_provider_cost_percent() {
        let cost = ProviderCostSnapshot {
            used: 25.0,
            limit: 100.0,
            currency_code: "USD".to_string(),
            period: Some("Monthly".to_string()),
            resets_at: None,
        };
        assert!((cost.used_percent() - 25.0).abs() < 0.01);
    }
}
