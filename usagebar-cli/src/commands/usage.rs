//! Usage command - fetch and display provider usage.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;
use usagebar_core::ProviderKind;
use usagebar_fetch::{ProbeContext, ProbeSettings};
use usagebar_store::{ProviderEntry, ProviderProbe, Settings, UsageStore};

use crate::output::{JsonFormatter, TextFormatter};
use crate::{Cli, ExitCode, OutputFormat};

/// Arguments for the usage command.
#[derive(Args, Debug, Clone)]
pub struct UsageArgs {
    /// Omit Codex credits.
    #[arg(long, global = true)]
    pub no_credits: bool,

    /// Include status-page state.
    #[arg(long, global = true)]
    pub status: bool,

    /// Enrich Codex with the OpenAI web dashboard.
    #[arg(long, global = true)]
    pub web: bool,

    /// Web timeout in seconds.
    #[arg(long, default_value_t = 60, global = true)]
    pub web_timeout: u64,

    /// Account the web dashboard must be signed in as when Codex reports none.
    #[arg(long, global = true)]
    pub account: Option<String>,
}

/// One provider's result, in selection order.
pub struct ProviderReport {
    /// Provider.
    pub provider: ProviderKind,
    /// Store entry after the refresh.
    pub entry: ProviderEntry,
}

/// Runs the usage command and returns the exit code.
pub async fn run(args: &UsageArgs, cli: &Cli) -> Result<i32> {
    let settings = Settings::load_default().await;
    let providers = parse_provider_selection(cli.provider.as_deref(), &settings.enabled_providers)?;

    info!(providers = ?providers, web = args.web, "Fetching usage");

    let probe_settings = probe_settings(args, &settings);
    let deadline = settings.refresh_deadline(&probe_settings);
    let ctx = ProbeContext::with_settings(probe_settings).context("failed to set up HTTP client")?;
    let probe = ProviderProbe::new(Arc::new(ctx));

    let store = UsageStore::new(&providers, deadline).with_notifications(false);
    store.refresh(&probe, &providers).await;
    if args.status {
        store.refresh_status(&probe).await;
    }

    let mut reports = Vec::with_capacity(providers.len());
    for provider in &providers {
        if let Some(entry) = store.entry(*provider).await {
            reports.push(ProviderReport {
                provider: *provider,
                entry,
            });
        }
    }

    output_results(&reports, args, cli)?;
    Ok(exit_code(&reports))
}

/// Probe settings for this invocation.
fn probe_settings(args: &UsageArgs, settings: &Settings) -> ProbeSettings {
    let mut probe = settings.probe_settings();
    if args.web {
        probe = probe.with_web(Duration::from_secs(args.web_timeout.max(1)));
    }
    if args.account.is_some() {
        probe = probe.with_expected_account(args.account.clone());
    }
    probe.include_credits = !args.no_credits;
    probe
}

/// Parses the provider selection.
///
/// `None` selects the providers enabled in settings, `both` selects Codex and
/// Claude and `all` selects every provider. Names may be comma-separated.
fn parse_provider_selection(arg: Option<&str>, enabled: &[ProviderKind]) -> Result<Vec<ProviderKind>> {
    let both = vec![ProviderKind::Codex, ProviderKind::Claude];
    match arg.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None => Ok(if enabled.is_empty() { both } else { enabled.to_vec() }),
        Some("both") => Ok(both),
        Some("all") => Ok(ProviderKind::all().to_vec()),
        Some(names) => {
            let mut providers = Vec::new();
            for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                let kind: ProviderKind = name.parse()?;
                if !providers.contains(&kind) {
                    providers.push(kind);
                }
            }
            if providers.is_empty() {
                anyhow::bail!("No valid providers specified");
            }
            Ok(providers)
        }
    }
}

/// The first failing provider in selection order decides the exit code.
fn exit_code(reports: &[ProviderReport]) -> i32 {
    reports
        .iter()
        .find_map(|r| r.entry.error.as_ref())
        .map_or(ExitCode::Success as i32, usagebar_fetch::ProbeError::exit_code)
}

/// Outputs results in the requested format.
fn output_results(reports: &[ProviderReport], args: &UsageArgs, cli: &Cli) -> Result<()> {
    match cli.format {
        OutputFormat::Text => {
            let formatter = TextFormatter::new(!cli.no_color);
            let blocks: Vec<String> = reports
                .iter()
                .map(|r| formatter.format_report(r.provider, &r.entry, !args.no_credits))
                .collect();
            println!("{}", blocks.join("\n\n"));
        }
        OutputFormat::Json => {
            let formatter = JsonFormatter::new(cli.pretty);
            println!("{}", formatter.format_reports(reports, !args.no_credits)?);
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
