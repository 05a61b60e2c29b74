//! Gemini fetch orchestration.

use tracing::instrument;
use usagebar_core::{FetchSource, ProviderKind, UsageSnapshot};
use usagebar_fetch::{ProbeContext, ProbeError, StrategyKind, run_ordered};

use super::probe::fetch_quota;
use crate::provider::ProviderFetch;

/// Gemini only has the OAuth quota API.
pub const STRATEGIES: &[StrategyKind] = &[StrategyKind::OAuthQuota];

/// Fetches Gemini quota.
#[instrument(skip(ctx))]
pub async fn fetch(ctx: &ProbeContext) -> Result<ProviderFetch, ProbeError> {
    let outcome = run_ordered(STRATEGIES, |_: &ProbeError| false, move |_| async move {
        fetch_quota(ctx).await.map_err(ProbeError::from)
    })
    .await;
    let source = outcome.kind.map_or(FetchSource::Unknown, |k| k.fetch_source());
    let attempts = outcome.attempts;
    let result = outcome.result?;

    let mut snapshot = UsageSnapshot::new(ProviderKind::Gemini);
    snapshot.primary = result.quota.primary;
    snapshot.secondary = result.quota.secondary;
    snapshot.fetch_source = source;
    let snapshot = snapshot
        .with_identity(result.identity)
        .map_err(|e| ProbeError::Unexpected(e.to_string()))?;

    Ok(ProviderFetch {
        snapshot,
        credits: None,
        dashboard: None,
        source,
        version: None,
        attempts,
    })
}
