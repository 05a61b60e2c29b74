//! Codex-specific error types.

use std::time::Duration;

use thiserror::Error;
use usagebar_fetch::{ProbeError, PtyError};

/// Errors specific to Codex operations.
#[derive(Debug, Error)]
pub enum CodexError {
    /// The app-server could not be used: spawn failure, the stream closed
    /// before a reply, or the method is unknown to this CLI version.
    #[error("Codex app-server unavailable: {0}")]
    RpcUnavailable(String),

    /// The CLI is not signed in.
    #[error("Codex login required: {0}")]
    LoginRequired(String),

    /// RPC returned an error.
    #[error("RPC error ({code}): {message}")]
    Rpc {
        /// RPC error code.
        code: i64,
        /// RPC error message.
        message: String,
    },

    /// RPC operation timed out.
    #[error("RPC operation timed out after {0:?}")]
    Timeout(Duration),

    /// Output could not be understood.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Auth file problem.
    #[error("Invalid auth file: {0}")]
    InvalidAuth(String),

    /// Host-level failure.
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

impl CodexError {
    /// Returns true when the PTY probe should be tried instead.
    pub fn is_rpc_unavailable(&self) -> bool {
        matches!(self, Self::RpcUnavailable(_))
    }
}

impl From<PtyError> for CodexError {
    fn from(e: PtyError) -> Self {
        CodexError::Probe(e.into())
    }
}

impl From<serde_json::Error> for CodexError {
    fn from(e: serde_json::Error) -> Self {
        CodexError::Parse(e.to_string())
    }
}

impl From<CodexError> for ProbeError {
    fn from(err: CodexError) -> Self {
        match err {
            CodexError::RpcUnavailable(detail) => ProbeError::Unexpected(format!("Codex app-server unavailable: {detail}")),
            CodexError::LoginRequired(detail) => ProbeError::LoginRequired(detail),
            CodexError::Timeout(after) => ProbeError::TimedOut(after),
            CodexError::Parse(detail) => ProbeError::ParseFailed(detail),
            CodexError::Probe(inner) => inner,
            other => ProbeError::Unexpected(other.to_string()),
        }
    }
}
