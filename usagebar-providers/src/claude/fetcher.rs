//! Claude fetch orchestration.

use tracing::{debug, instrument};
use usagebar_core::{FetchSource, ProviderIdentitySnapshot, ProviderKind, UsageSnapshot};
use usagebar_fetch::{ProbeContext, ProbeError, StrategyKind, run_ordered};

use super::CLAUDE_BINARY;
use super::config::try_read_identity;
use super::error::ClaudeError;
use super::parser::ClaudeUsage;
use super::pty_probe::fetch_pty;
use super::web::fetch_web;
use crate::provider::ProviderFetch;

/// Strategies in order. The web strategy is only listed when enabled.
pub fn strategies(web_enabled: bool) -> Vec<StrategyKind> {
    let mut kinds = vec![StrategyKind::PtyScrape];
    if web_enabled {
        kinds.push(StrategyKind::WebCookie);
    }
    kinds
}

async fn run_strategy(
    ctx: &ProbeContext,
    cli_identity: Option<&ProviderIdentitySnapshot>,
    kind: StrategyKind,
) -> Result<(ClaudeUsage, Option<ProviderIdentitySnapshot>), ClaudeError> {
    match kind {
        StrategyKind::PtyScrape => Ok((fetch_pty(ctx).await?, cli_identity.cloned())),
        StrategyKind::WebCookie => {
            let expected = cli_identity.and_then(|i| i.account_email.as_deref());
            let web = fetch_web(ctx, expected).await?;
            Ok((web.usage, Some(web.identity)))
        }
        other => Err(ClaudeError::Probe(ProbeError::Unexpected(format!(
            "{other} is not a Claude strategy"
        )))),
    }
}

/// Fetches Claude usage.
#[instrument(skip(ctx))]
pub async fn fetch(ctx: &ProbeContext) -> Result<ProviderFetch, ProbeError> {
    let cli_identity = try_read_identity(ctx);
    let expected = cli_identity.as_ref();
    let kinds = strategies(ctx.settings.web_enabled);
    let outcome = run_ordered(&kinds, ClaudeError::allows_web_fallback, move |kind| {
        run_strategy(ctx, expected, kind)
    })
    .await;
    let source = outcome.kind.map_or(FetchSource::Unknown, |k| k.fetch_source());
    let attempts = outcome.attempts;
    let (usage, identity) = outcome.result.map_err(ProbeError::from)?;

    let mut snapshot = UsageSnapshot::new(ProviderKind::Claude);
    snapshot.primary = Some(usage.primary);
    snapshot.secondary = Some(usage.secondary);
    snapshot.tertiary = usage.tertiary;
    snapshot.fetch_source = source;
    if let Some(identity) = identity {
        snapshot = snapshot
            .with_identity(identity)
            .map_err(|e| ProbeError::Unexpected(e.to_string()))?;
    }

    let version = if source == FetchSource::Pty {
        ctx.process.version(CLAUDE_BINARY).await
    } else {
        None
    };

    debug!(source = source.as_str(), "Claude fetch complete");
    Ok(ProviderFetch {
        snapshot,
        credits: None,
        dashboard: None,
        source,
        version,
        attempts,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategies() {
        assert_eq!(strategies(false), vec![StrategyKind::PtyScrape]);
        assert_eq!(strategies(true), vec![StrategyKind::PtyScrape, StrategyKind::WebCookie]);
    }
}
