//! Claude-specific error types.

use thiserror::Error;
use usagebar_fetch::{ProbeError, PtyError};

/// Errors specific to Claude operations.
#[derive(Debug, Error)]
pub enum ClaudeError {
    /// The session expired or the CLI is signed out.
    #[error("Claude login required: {0}")]
    LoginRequired(String),

    /// The CLI printed an API error other than an auth failure.
    #[error("Claude API error: {0}")]
    Api(String),

    /// `/usage` output could not be understood.
    #[error("Parse error: {0}")]
    Parse(String),

    /// `.claude.json` could not be read.
    #[error("Invalid Claude config: {0}")]
    InvalidConfig(String),

    /// Host-level failure.
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

impl ClaudeError {
    /// Returns true when the web strategy may be tried after this failure.
    ///
    /// Only a CLI that is missing or hung qualifies; output the CLI did
    /// produce is never overridden.
    pub fn allows_web_fallback(&self) -> bool {
        matches!(
            self,
            Self::Probe(ProbeError::NotInstalled(_) | ProbeError::TimedOut(_))
        )
    }
}

impl From<PtyError> for ClaudeError {
    fn from(e: PtyError) -> Self {
        ClaudeError::Probe(e.into())
    }
}

impl From<serde_json::Error> for ClaudeError {
    fn from(e: serde_json::Error) -> Self {
        ClaudeError::Parse(e.to_string())
    }
}

impl From<ClaudeError> for ProbeError {
    fn from(err: ClaudeError) -> Self {
        match err {
            ClaudeError::LoginRequired(detail) => ProbeError::LoginRequired(detail),
            ClaudeError::Parse(detail) => ProbeError::ParseFailed(detail),
            ClaudeError::Probe(inner) => inner,
            other => ProbeError::Unexpected(other.to_string()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_web_fallback_only_for_missing_or_hung_cli() {
        assert!(ClaudeError::from(PtyError::BinaryNotFound("claude".into())).allows_web_fallback());
        assert!(ClaudeError::from(PtyError::TimedOut(Duration::from_secs(20))).allows_web_fallback());
        assert!(!ClaudeError::Parse("missing".into()).allows_web_fallback());
        assert!(!ClaudeError::LoginRequired("expired".into()).allows_web_fallback());
    }

    #[test]
    fn test_probe_mapping() {
        assert_eq!(ProbeError::from(ClaudeError::Parse("x".into())).exit_code(), 3);
        assert_eq!(ProbeError::from(ClaudeError::LoginRequired("x".into())).kind(), "login_required");
    }
}
