//! Codex (OpenAI) provider.
//!
//! ## Fetch Strategies
//!
//! 1. **RPC**: JSON-RPC to `codex -s read-only -a untrusted app-server`
//!    (`initialize`, `account/rateLimits/read`, `account/read`)
//! 2. **PTY**: the interactive `/status` screen, only when the app-server
//!    cannot be used at all
//!
//! With `--web`, the OpenAI dashboard is read as enrichment. It never
//! replaces the CLI data.
//!
//! ## Authentication
//!
//! Account identity comes from `account/read`, falling back to the JWT in
//! `$CODEX_HOME/auth.json`.

pub mod auth;
pub mod error;
pub mod fetcher;
pub mod parser;
pub mod pty_probe;
pub mod rpc;
pub mod web;

/// Codex binary name.
pub const CODEX_BINARY: &str = "codex";

pub use auth::{AccountInfo, read_account_info, try_read_account_info};
pub use error::CodexError;
pub use fetcher::fetch;
pub use parser::{CodexUsage, parse_status_output, usage_from_rate_limits};
pub use web::fetch_dashboard;
