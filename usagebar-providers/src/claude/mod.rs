//! Claude (Anthropic) provider.
//!
//! Usage is read from the `/usage` screen of the interactive `claude` CLI.
//! With web enabled, claude.ai is tried when the CLI is missing or hangs,
//! using browser cookies signed in as the CLI's account.
//!
//! Identity comes from `.claude.json`.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod parser;
pub mod pty_probe;
pub mod web;

/// Claude binary name.
pub const CLAUDE_BINARY: &str = "claude";

pub use config::{config_dir, try_read_identity};
pub use error::ClaudeError;
pub use fetcher::fetch;
pub use parser::{ClaudeUsage, parse_usage_output};
