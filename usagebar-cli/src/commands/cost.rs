//! Cost command - show local token cost report.
//!
//! Scans Codex and Claude session logs for token usage and prices it.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Args;
use tracing::{info, warn};
use usagebar_core::{CostUsageTokenSnapshot, ProviderKind};
use usagebar_fetch::ProbeContext;
use usagebar_store::{CostRoots, CostScanner, ProviderFilter, Settings};

use crate::output::{JsonFormatter, TextFormatter};
use crate::{Cli, ExitCode, OutputFormat};

type CostResult = Result<Option<CostUsageTokenSnapshot>, String>;

/// Arguments for the cost command.
#[derive(Args, Debug, Clone)]
pub struct CostArgs {
    /// Re-read every log file, ignoring the cache and the throttle.
    #[arg(long)]
    pub force: bool,
}

/// Runs the cost command and returns the exit code.
pub async fn run(args: &CostArgs, cli: &Cli) -> Result<i32> {
    let providers = parse_cost_providers(cli.provider.as_deref())?;
    info!(providers = ?providers, force = args.force, "Running cost report");

    let settings = Settings::load_default().await;
    let vertex_enabled = settings.enabled_providers.contains(&ProviderKind::VertexAI);

    let ctx = ProbeContext::builder().build().context("failed to resolve environment")?;
    let scanner = Arc::new(CostScanner::new(CostRoots::from_context(&ctx)));
    let today = Local::now().date_naive();

    let mut results: Vec<(ProviderKind, CostResult)> = Vec::with_capacity(providers.len());
    for provider in providers {
        let filter = ProviderFilter::for_provider(provider, vertex_enabled)?;
        let scanner = Arc::clone(&scanner);
        let force = args.force;
        let result = tokio::task::spawn_blocking(move || scanner.scan(filter, today, force))
            .await
            .context("cost scan task failed")?
            .map_err(|e| {
                warn!(provider = %provider, error = %e, "Cost scan failed");
                e.to_string()
            });
        results.push((provider, result));
    }

    output_cost_results(&results, cli)?;

    let code = if results.iter().any(|(_, r)| r.is_err()) {
        ExitCode::Error
    } else {
        ExitCode::Success
    };
    Ok(code as i32)
}

/// Parses the provider argument. Only Codex and Claude keep local logs.
fn parse_cost_providers(arg: Option<&str>) -> Result<Vec<ProviderKind>> {
    let both = vec![ProviderKind::Codex, ProviderKind::Claude];
    match arg.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("both" | "all") => Ok(both),
        Some(name) => {
            let kind: ProviderKind = name.parse()?;
            match kind {
                ProviderKind::Codex | ProviderKind::Claude => Ok(vec![kind]),
                other => anyhow::bail!("{} does not keep local usage logs", other.display_name()),
            }
        }
    }
}

fn output_cost_results(results: &[(ProviderKind, CostResult)], cli: &Cli) -> Result<()> {
    match cli.format {
        OutputFormat::Text => {
            let formatter = TextFormatter::new(!cli.no_color);
            let blocks: Vec<String> = results
                .iter()
                .map(|(provider, result)| match result {
                    Ok(snapshot) => formatter.format_cost(*provider, snapshot.as_ref()),
                    Err(e) => format!("{}\n{}", provider.display_name(), formatter.format_error(e)),
                })
                .collect();
            println!("{}", blocks.join("\n\n"));
        }
        OutputFormat::Json => {
            let formatter = JsonFormatter::new(cli.pretty);
            println!("{}", formatter.format_costs(results)?);
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cost_providers_default() {
        assert_eq!(
            parse_cost_providers(None).unwrap(),
            vec![ProviderKind::Codex, ProviderKind::Claude]
        );
        assert_eq!(parse_cost_providers(Some("all")).unwrap().len(), 2);
    }

    #[test]
    fn test_parse_cost_providers_single() {
        assert_eq!(parse_cost_providers(Some("anthropic")).unwrap(), vec![ProviderKind::Claude]);
        assert_eq!(parse_cost_providers(Some("Codex")).unwrap(), vec![ProviderKind::Codex]);
    }

    #[test]
    fn test_parse_cost_providers_rejects_unsupported() {
        assert!(parse_cost_providers(Some("gemini")).is_err());
        assert!(parse_cost_providers(Some("nope")).is_err());
    }
}
