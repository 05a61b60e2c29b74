//! Vertex AI fetch orchestration.

use tracing::{debug, instrument};
use usagebar_core::{FetchSource, LoginMethod, ProviderIdentitySnapshot, ProviderKind, UsageSnapshot};
use usagebar_fetch::{ProbeContext, ProbeError, StrategyKind, run_ordered};

use super::credentials::{access_token, load_credentials, resolve_project};
use super::error::VertexError;
use super::monitoring::{QuotaPeak, fetch_peak};
use crate::provider::ProviderFetch;

/// Vertex AI only has the ADC quota query.
pub const STRATEGIES: &[StrategyKind] = &[StrategyKind::OAuthQuota];

async fn fetch_quota(ctx: &ProbeContext) -> Result<(QuotaPeak, String), VertexError> {
    let creds = load_credentials(ctx)?;
    let project = resolve_project(ctx, &creds)?;
    let token = access_token(ctx, &creds).await?;
    let peak = fetch_peak(&ctx.http, &token, &project).await?;
    debug!(project = %project, percent = peak.percent, "Vertex AI quota peak");
    Ok((peak, project))
}

/// Fetches Vertex AI quota usage.
#[instrument(skip(ctx))]
pub async fn fetch(ctx: &ProbeContext) -> Result<ProviderFetch, ProbeError> {
    let outcome = run_ordered(STRATEGIES, |_: &ProbeError| false, move |_| async move {
        fetch_quota(ctx).await.map_err(ProbeError::from)
    })
    .await;
    let source = outcome.kind.map_or(FetchSource::Unknown, |k| k.fetch_source());
    let attempts = outcome.attempts;
    let (peak, project) = outcome.result?;

    let mut snapshot = UsageSnapshot::new(ProviderKind::VertexAI);
    snapshot.primary = Some(peak.to_window());
    snapshot.fetch_source = source;
    let identity = ProviderIdentitySnapshot::new(ProviderKind::VertexAI)
        .with_organization(project)
        .with_login_method(LoginMethod::ApplicationDefault);
    let snapshot = snapshot
        .with_identity(identity)
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
