//! Codex fetch orchestration.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, instrument, warn};
use usagebar_core::{
    FetchSource, LoginMethod, OpenAIDashboardSnapshot, ProviderIdentitySnapshot, ProviderKind, UsageSnapshot,
};
use usagebar_fetch::{ProbeContext, ProbeError, StrategyKind, run_ordered};

use super::CODEX_BINARY;
use super::auth::{AccountInfo, try_read_account_info};
use super::error::CodexError;
use super::parser::{CodexUsage, usage_from_rate_limits};
use super::pty_probe::fetch_pty;
use super::rpc::{RpcAccount, fetch_rpc};
use super::web::fetch_dashboard;
use crate::provider::ProviderFetch;

/// App-server first, `/status` screen when the app-server is unavailable.
pub const STRATEGIES: &[StrategyKind] = &[StrategyKind::Rpc, StrategyKind::PtyScrape];

/// What one strategy produced.
struct Fetched {
    usage: CodexUsage,
    account: Option<RpcAccount>,
    version: Option<String>,
}

async fn run_strategy(ctx: &ProbeContext, kind: StrategyKind) -> Result<Fetched, CodexError> {
    match kind {
        StrategyKind::Rpc => {
            let rpc = fetch_rpc(ctx).await?;
            Ok(Fetched {
                usage: usage_from_rate_limits(&rpc.rate_limits)?,
                account: rpc.account,
                version: rpc.server_version,
            })
        }
        StrategyKind::PtyScrape => Ok(Fetched {
            usage: fetch_pty(ctx).await?,
            account: None,
            version: None,
        }),
        other => Err(CodexError::Probe(ProbeError::Unexpected(format!(
            "{other} is not a Codex strategy"
        )))),
    }
}

/// Merges the RPC account over `auth.json`.
fn identity_from(account: Option<&RpcAccount>, file: Option<AccountInfo>) -> ProviderIdentitySnapshot {
    let mut identity = file.map_or_else(|| ProviderIdentitySnapshot::new(ProviderKind::Codex), |info| info.to_identity());
    let Some(account) = account else {
        return identity;
    };

    if let Some(email) = account.email.as_deref().filter(|e| !e.is_empty()) {
        identity.account_email = Some(email.to_string());
    }
    if let Some(plan) = account.plan_type.as_deref().filter(|p| !p.is_empty()) {
        identity.plan_name = Some(plan.to_string());
    }
    match account.kind.as_deref() {
        Some("apiKey") => identity.login_method = Some(LoginMethod::ApiKey),
        Some("chatgpt") => identity.login_method = Some(LoginMethod::Cli),
        _ => {}
    }
    identity
}

/// Account the dashboard must be signed in as: the Codex account, or the
/// configured one when Codex reports no email.
fn dashboard_account(snapshot: &UsageSnapshot, configured: Option<&str>) -> Option<String> {
    snapshot.account_email().or(configured).map(str::to_string)
}

/// Bounds the dashboard read so a slow page never costs the usage result.
async fn bounded_dashboard<F>(timeout: Duration, dashboard: F) -> Result<OpenAIDashboardSnapshot, ProbeError>
where
    F: Future<Output = Result<OpenAIDashboardSnapshot, ProbeError>>,
{
    match tokio::time::timeout(timeout, dashboard).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::TimedOut(timeout)),
    }
}

/// Fetches Codex usage.
///
/// Only an unavailable app-server falls back to the PTY probe; a login or
/// parse failure from the app-server is returned as is.
#[instrument(skip(ctx))]
pub async fn fetch(ctx: &ProbeContext) -> Result<ProviderFetch, ProbeError> {
    let outcome = run_ordered(STRATEGIES, CodexError::is_rpc_unavailable, move |kind| run_strategy(ctx, kind)).await;
    let source = outcome.kind.map_or(FetchSource::Unknown, |k| k.fetch_source());
    let attempts = outcome.attempts;
    let fetched = outcome.result.map_err(ProbeError::from)?;

    let mut snapshot = UsageSnapshot::new(ProviderKind::Codex);
    snapshot.primary = fetched.usage.primary;
    snapshot.secondary = fetched.usage.secondary;
    snapshot.fetch_source = source;

    let identity = identity_from(fetched.account.as_ref(), try_read_account_info(ctx));
    if !identity.is_empty() {
        snapshot = snapshot
            .with_identity(identity)
            .map_err(|e| ProbeError::Unexpected(e.to_string()))?;
    }

    let version = match fetched.version {
        Some(version) => Some(version),
        None => ctx.process.version(CODEX_BINARY).await,
    };

    let credits = if ctx.settings.include_credits {
        fetched.usage.credits
    } else {
        None
    };

    let dashboard = if ctx.settings.web_enabled {
        let expected = dashboard_account(&snapshot, ctx.settings.expected_web_account.as_deref());
        let result = bounded_dashboard(ctx.settings.web_timeout, fetch_dashboard(ctx, expected.as_deref())).await;
        if let Err(e) = &result {
            warn!(error = %e, "OpenAI dashboard unavailable");
        }
        Some(result)
    } else {
        None
    };

    debug!(source = source.as_str(), has_credits = credits.is_some(), "Codex fetch complete");
    Ok(ProviderFetch {
        snapshot,
        credits,
        dashboard,
        source,
        version,
        attempts,
    })
}

// ============================================================================
// Tests
// ============================================================================
