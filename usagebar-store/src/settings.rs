//! User settings with persistence.
//!
//! Settings live as JSON at `<config_dir>/usagebar/settings.json`. A missing
//! or unreadable file yields defaults; unknown fields are ignored and
//! missing fields take their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use usagebar_core::ProviderKind;
use usagebar_fetch::ProbeSettings;

use crate::error::StoreError;
use crate::persistence::{default_settings_path, load_json_or_default, save_json};

// ============================================================================
// Refresh Cadence
// ============================================================================

/// Refresh cadence options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefreshCadence {
    /// Manual refresh only.
    Manual,
    /// Every minute.
    OneMinute,
    /// Every two minutes.
    #[default]
    TwoMinutes,
    /// Every five minutes.
    FiveMinutes,
    /// Every fifteen minutes.
    FifteenMinutes,
}

impl RefreshCadence {
    /// Returns the interval, or None for manual.
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            RefreshCadence::Manual => None,
            RefreshCadence::OneMinute => Some(Duration::from_secs(60)),
            RefreshCadence::TwoMinutes => Some(Duration::from_secs(120)),
            RefreshCadence::FiveMinutes => Some(Duration::from_secs(300)),
            RefreshCadence::FifteenMinutes => Some(Duration::from_secs(900)),
        }
    }

    /// All available cadences.
    pub fn all() -> &'static [RefreshCadence] {
        &[
            RefreshCadence::Manual,
            RefreshCadence::OneMinute,
            RefreshCadence::TwoMinutes,
            RefreshCadence::FiveMinutes,
            RefreshCadence::FifteenMinutes,
        ]
    }
}

impl std::fmt::Display for RefreshCadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshCadence::Manual => write!(f, "Manual"),
            RefreshCadence::OneMinute => write!(f, "1 minute"),
            RefreshCadence::TwoMinutes => write!(f, "2 minutes"),
            RefreshCadence::FiveMinutes => write!(f, "5 minutes"),
            RefreshCadence::FifteenMinutes => write!(f, "15 minutes"),
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Persisted user preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Providers refreshed by default, in display order.
    pub enabled_providers: Vec<ProviderKind>,

    /// Background refresh cadence.
    pub refresh_cadence: RefreshCadence,

    /// Scan local logs for token cost.
    pub token_cost_enabled: bool,

    /// Broadcast depletion and restore events.
    pub depletion_notifications: bool,

    /// Account the OpenAI dashboard session must be signed in as.
    pub codex_web_account: Option<String>,

    /// Web enrichment timeout in seconds.
    pub web_timeout_secs: u64,

    /// Per-probe timeout in seconds.
    pub probe_timeout_secs: u64,

    /// Hard bound on one whole refresh cycle, in seconds.
    pub refresh_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled_providers: vec![ProviderKind::Codex, ProviderKind::Claude],
            refresh_cadence: RefreshCadence::default(),
            token_cost_enabled: false,
            depletion_notifications: true,
            codex_web_account: None,
            web_timeout_secs: 60,
            probe_timeout_secs: 20,
            refresh_timeout_secs: 90,
        }
    }
}

impl Settings {
    /// Loads settings from `path`, falling back to defaults.
    pub async fn load(path: &Path) -> Self {
        let settings: Self = load_json_or_default(path).await;
        debug!(path = %path.display(), providers = settings.enabled_providers.len(), "Settings loaded");
        settings
    }

    /// Loads settings from the default location.
    pub async fn load_default() -> Self {
        Self::load(&default_settings_path()).await
    }

    /// Saves settings to `path` with owner-only permissions.
    pub async fn save(&self, path: &Path) -> Result<(), StoreError> {
        save_json(path, self).await?;
        info!(path = %path.display(), "Settings saved");
        Ok(())
    }

    /// Default settings path.
    pub fn default_path() -> PathBuf {
        default_settings_path()
    }

    /// Whole-refresh timeout.
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs.max(1))
    }

    /// Refresh deadline for a run with `probe` settings.
    ///
    /// The Codex dashboard runs after the CLI fetch, so web enrichment extends
    /// the deadline by its own timeout.
    pub fn refresh_deadline(&self, probe: &ProbeSettings) -> Duration {
        if probe.web_enabled {
            self.refresh_timeout() + probe.web_timeout
        } else {
            self.refresh_timeout()
        }
    }

    /// Probe settings derived from these preferences.
    ///
    /// Web enrichment is off unless the caller turns it on.
    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            probe_timeout: Duration::from_secs(self.probe_timeout_secs.max(1)),
            web_timeout: Duration::from_secs(self.web_timeout_secs.max(1)),
            expected_web_account: self.codex_web_account.clone(),
            ..ProbeSettings::default()
        }
    }

    /// Enables or disables a provider, keeping display order.
    pub fn set_provider_enabled(&mut self, provider: ProviderKind, enabled: bool) {
        let present = self.enabled_providers.contains(&provider);
        if enabled && !present {
            self.enabled_providers.push(provider);
        } else if !enabled && present {
            self.enabled_providers.retain(|p| *p != provider);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cadence_durations() {
        assert_eq!(RefreshCadence::Manual.as_duration(), None);
        assert_eq!(RefreshCadence::FiveMinutes.as_duration(), Some(Duration::from_secs(300)));
        assert_eq!(RefreshCadence::all().len(), 5);
    }

    #[test]
    fn test_refresh_deadline_covers_web_timeout() {
        let settings = Settings::default();
        let probe = settings.probe_settings();
        assert_eq!(settings.refresh_deadline(&probe), Duration::from_secs(90));

        let probe = probe.with_web(Duration::from_secs(300));
        assert_eq!(settings.refresh_deadline(&probe), Duration::from_secs(390));
    }

    #[test]
    fn test_partial_file_takes_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"refresh_cadence":"fifteen_minutes","unknown":1}"#).unwrap();
        assert_eq!(settings.refresh_cadence, RefreshCadence::FifteenMinutes);
        assert_eq!(settings.enabled_providers, vec![ProviderKind::Codex, ProviderKind::Claude]);
        assert_eq!(settings.web_timeout_secs, 60);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usagebar").join("settings.json");

        assert_eq!(Settings::load(&path).await, Settings::default());

        let mut settings = Settings::default();
        settings.set_provider_enabled(ProviderKind::VertexAI, true);
        settings.set_provider_enabled(ProviderKind::Codex, false);
        settings.codex_web_account = Some("dev@example.com".into());
        settings.save(&path).await.unwrap();

        let loaded = Settings::load(&path).await;
        assert_eq!(loaded, settings);
        assert_eq!(loaded.enabled_providers, vec![ProviderKind::Claude, ProviderKind::VertexAI]);
        assert_eq!(
            loaded.probe_settings().expected_web_account.as_deref(),
            Some("dev@example.com")
        );
    }
}
