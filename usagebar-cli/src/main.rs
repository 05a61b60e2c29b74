// Lint configuration for this crate
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! usagebar CLI - AI coding assistant quota monitoring from the command line.
//!
//! # Examples
//!
//! ```bash
//! # Usage for the providers enabled in settings
//! usagebar
//!
//! # Codex and Claude
//! usagebar --provider both
//!
//! # JSON output with service status
//! usagebar --format json --pretty --status
//!
//! # OpenAI dashboard enrichment, signed in as the Codex account
//! usagebar --provider codex --web --web-timeout 30
//!
//! # Token cost over the last 30 days
//! usagebar cost --provider claude
//! ```

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use commands::{cost, usage};

// ============================================================================
// CLI Definition
// ============================================================================

/// usagebar CLI - AI coding assistant quota monitoring.
#[derive(Parser)]
#[command(name = "usagebar")]
#[command(about = "Quota and usage monitoring for AI coding assistants")]
#[command(long_about = r"
usagebar reads rate-limit windows, credits and account identity from the
CLIs and services of AI coding assistants.

Supported providers:
  • OpenAI Codex (codex)
  • Claude (claude)
  • Google Gemini (gemini)
  • Vertex AI (vertexai)

Examples:
  usagebar                        # Providers enabled in settings
  usagebar --provider all         # All providers
  usagebar --provider codex       # Single provider
  usagebar --format json          # JSON output
  usagebar cost                   # Token cost report
")]
#[command(version)]
pub struct Cli {
    /// Subcommand to run. If none, runs 'usage'.
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Output format.
    #[arg(long, short = 'f', default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Pretty-print JSON output.
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Provider to query: a name, "both" (codex + claude) or "all".
    /// Names can be comma-separated.
    #[arg(long, short, global = true)]
    pub provider: Option<String>,

    /// Verbose logging.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Usage flags, accepted with or without the `usage` subcommand.
    #[command(flatten)]
    pub usage: usage::UsageArgs,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Fetch current usage (default).
    #[command(visible_alias = "u")]
    Usage,

    /// Show the local token cost report.
    #[command(visible_alias = "c")]
    Cost(cost::CostArgs),
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable text with colors.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// CLI exit codes.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Success.
    Success = 0,
    /// General error.
    Error = 1,
}

// ============================================================================
// Logging Setup
// ============================================================================

fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let result = match &cli.command {
        Some(Commands::Cost(args)) => cost::run(args, &cli).await,
        Some(Commands::Usage) | None => usage::run(&cli.usage, &cli).await,
    };

    match result {
        Ok(code) if code == ExitCode::Success as i32 => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(ExitCode::Error as i32);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_usage_flags_without_subcommand() {
        let cli = Cli::try_parse_from([
            "usagebar",
            "--provider",
            "codex",
            "--web",
            "--web-timeout",
            "15",
            "--account",
            "me@example.com",
            "--format",
            "json",
        ])
        .unwrap();
        assert!(cli.command.is_none());
        assert!(cli.usage.web);
        assert_eq!(cli.usage.web_timeout, 15);
        assert_eq!(cli.usage.account.as_deref(), Some("me@example.com"));
        assert_eq!(cli.format, OutputFormat::Json);
    }

    #[test]
    fn test_usage_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["usagebar", "usage", "--status", "--no-credits"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Usage)));
        assert!(cli.usage.status);
        assert!(cli.usage.no_credits);
        assert_eq!(cli.usage.web_timeout, 60);
    }

    #[test]
    fn test_cost_subcommand() {
        let cli = Cli::try_parse_from(["usagebar", "cost", "--provider", "claude", "--force", "--pretty"]).unwrap();
        match cli.command {
            Some(Commands::Cost(args)) => assert!(args.force),
            _ => panic!("expected cost"),
        }
        assert_eq!(cli.provider.as_deref(), Some("claude"));
        assert!(cli.pretty);
    }
}
