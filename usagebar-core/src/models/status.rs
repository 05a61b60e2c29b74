//! Status and fetch-related types.
//!
//! - [`ProviderStatus`] - Service health from a status page
//! - [`StatusIndicator`] - Status levels
//! - [`FetchSource`] - How data was obtained
//! - [`OpenAIDashboardSnapshot`] - Usage read from the signed-in web dashboard

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::usage::RateWindow;

// ============================================================================
// Provider Status
// ============================================================================

/// Provider service status from a statuspage.io page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatus {
    /// Status indicator level.
    pub indicator: StatusIndicator,
    /// Human-readable status description.
    pub description: String,
    /// When the status page last changed.
    pub updated_at: Option<DateTime<Utc>>,
    /// URL of the status page.
    pub url: Option<String>,
}

impl ProviderStatus {
    /// Creates a status with the given indicator and description.
    pub fn new(indicator: StatusIndicator, description: impl Into<String>) -> Self {
        Self {
            indicator,
            description: description.into(),
            updated_at: None,
            url: None,
        }
    }

    /// Returns true if the service is fully operational.
    pub fn is_operational(&self) -> bool {
        self.indicator == StatusIndicator::None
    }
}

/// Status indicator levels from provider status pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatusIndicator {
    /// Operational.
    None,
    /// Degraded performance.
    Minor,
    /// Partial outage.
    Major,
    /// Major outage.
    Critical,
    /// Scheduled maintenance.
    Maintenance,
    /// Status unknown.
    #[default]
    Unknown,
}

impl StatusIndicator {
    /// Parses a statuspage.io indicator string.
    pub fn from_statuspage(value: &str) -> Self {
        match value {
            "none" => Self::None,
            "minor" => Self::Minor,
            "major" => Self::Major,
            "critical" => Self::Critical,
            "maintenance" => Self::Maintenance,
            _ => Self::Unknown,
        }
    }

    /// Returns the wire name used in JSON output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Minor => "minor",
            Self::Major => "major",
            Self::Critical => "critical",
            Self::Maintenance => "maintenance",
            Self::Unknown => "unknown",
        }
    }

    /// Returns a human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "Operational",
            Self::Minor => "Degraded",
            Self::Major => "Partial Outage",
            Self::Critical => "Major Outage",
            Self::Maintenance => "Under Maintenance",
            Self::Unknown => "Unknown",
        }
    }
}

// ============================================================================
// Fetch Source
// ============================================================================

/// How a snapshot was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FetchSource {
    /// Not recorded.
    #[default]
    Unknown,
    /// Structured JSON-RPC session with a CLI.
    Rpc,
    /// Scraped from an interactive CLI in a pseudo-terminal.
    Pty,
    /// Cookie-authenticated web API.
    Web,
    /// OAuth or application-default credentials against a cloud API.
    OAuth,
}

impl FetchSource {
    /// Returns the label used in CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Rpc => "codex-cli",
            Self::Pty => "pty",
            Self::Web => "web",
            Self::OAuth => "oauth",
        }
    }
}

// ============================================================================
// Web Dashboard
// ============================================================================

/// Usage read from the OpenAI web dashboard for a signed-in account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAIDashboardSnapshot {
    /// Email of the account the cookies are signed in as.
    pub signed_in_email: String,
    /// Session window.
    pub primary: Option<RateWindow>,
    /// Weekly window.
    pub secondary: Option<RateWindow>,
    /// Remaining credit balance shown on the dashboard.
    pub credits_remaining: Option<f64>,
    /// When the dashboard was read.
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Tests
// ============================================================================
