//! The closed set of providers and their common fetch contract.

use std::fmt;

use tracing::instrument;
use usagebar_core::{CreditsSnapshot, FetchSource, OpenAIDashboardSnapshot, ProviderKind, ProviderStatus, UsageSnapshot};
use usagebar_fetch::{FetchAttempt, ProbeContext, ProbeError, ProbeSettings, StatusError, StrategyKind};

use crate::{claude, codex, gemini, vertexai};

// ============================================================================
// Fetch Result
// ============================================================================

/// Everything one provider fetch produced.
#[derive(Debug, Clone)]
pub struct ProviderFetch {
    /// Normalized usage.
    pub snapshot: UsageSnapshot,
    /// Credits balance, when the provider reports one and credits were requested.
    pub credits: Option<CreditsSnapshot>,
    /// Web dashboard outcome. `None` when the dashboard was not requested.
    pub dashboard: Option<Result<OpenAIDashboardSnapshot, ProbeError>>,
    /// Strategy that produced the snapshot.
    pub source: FetchSource,
    /// CLI version, when known.
    pub version: Option<String>,
    /// Every strategy attempt in order.
    pub attempts: Vec<FetchAttempt>,
}

// ============================================================================
// Status Source
// ============================================================================

/// Where a provider publishes service health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    /// A statuspage.io `status.json` URL.
    Statuspage(&'static str),
    /// Google Cloud incidents filtered by product title.
    GoogleCloud(&'static str),
}

// ============================================================================
// Provider
// ============================================================================

/// A supported provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// OpenAI Codex.
    Codex,
    /// Anthropic Claude.
    Claude,
    /// Google Gemini.
    Gemini,
    /// Google Cloud Vertex AI.
    VertexAI,
}

impl Provider {
    /// All providers in display order.
    pub const ALL: [Provider; 4] = [Self::Codex, Self::Claude, Self::Gemini, Self::VertexAI];

    /// Provider kind in the core model.
    pub fn kind(self) -> ProviderKind {
        match self {
            Self::Codex => ProviderKind::Codex,
            Self::Claude => ProviderKind::Claude,
            Self::Gemini => ProviderKind::Gemini,
            Self::VertexAI => ProviderKind::VertexAI,
        }
    }

    /// Strategies tried, in order, under `settings`.
    pub fn strategies(self, settings: &ProbeSettings) -> Vec<StrategyKind> {
        match self {
            Self::Codex => codex::fetcher::STRATEGIES.to_vec(),
            Self::Claude => claude::fetcher::strategies(settings.web_enabled),
            Self::Gemini => gemini::fetcher::STRATEGIES.to_vec(),
            Self::VertexAI => vertexai::fetcher::STRATEGIES.to_vec(),
        }
    }

    /// Health source.
    pub fn status_source(self) -> StatusSource {
        match self {
            Self::Codex => StatusSource::Statuspage("https://status.openai.com/api/v2/status.json"),
            Self::Claude => StatusSource::Statuspage("https://status.anthropic.com/api/v2/status.json"),
            Self::Gemini => StatusSource::GoogleCloud("Gemini"),
            Self::VertexAI => StatusSource::GoogleCloud("Vertex AI"),
        }
    }

    /// Fetches usage.
    #[instrument(skip(ctx), fields(provider = %self))]
    pub async fn fetch(self, ctx: &ProbeContext) -> Result<ProviderFetch, ProbeError> {
        match self {
            Self::Codex => codex::fetch(ctx).await,
            Self::Claude => claude::fetch(ctx).await,
            Self::Gemini => gemini::fetch(ctx).await,
            Self::VertexAI => vertexai::fetch(ctx).await,
        }
    }

    /// Fetches service health.
    pub async fn fetch_status(self, ctx: &ProbeContext) -> Result<ProviderStatus, StatusError> {
        match self.status_source() {
            StatusSource::Statuspage(url) => ctx.status.fetch_statuspage(url).await,
            StatusSource::GoogleCloud(product) => ctx.status.fetch_google_cloud(product).await,
        }
    }
}

impl From<ProviderKind> for Provider {
    fn from(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Codex => Self::Codex,
            ProviderKind::Claude => Self::Claude,
            ProviderKind::Gemini => Self::Gemini,
            ProviderKind::VertexAI => Self::VertexAI,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind().cli_name())
    }
}

// ============================================================================
// Tests
// ============================================================================
