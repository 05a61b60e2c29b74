//! Error types for probes and host services.
//!
//! Every host-level error converts into [`ProbeError`], the taxonomy the
//! aggregation layer and the CLI reason about.

use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Probe Error
// ============================================================================

/// Failure taxonomy shared by every provider probe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The CLI binary or service is not installed.
    #[error("{0} is not installed")]
    NotInstalled(String),

    /// The account needs to sign in (or sign in again).
    #[error("Login required: {0}")]
    LoginRequired(String),

    /// The source answered but its output could not be understood.
    #[error("Could not parse usage: {0}")]
    ParseFailed(String),

    /// The probe did not finish in time.
    #[error("Timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    /// Network or HTTP failure.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The signed-in account is not the expected one.
    #[error("Signed in as {found}, expected {expected}")]
    AccountMismatch {
        /// Account the caller asked for.
        expected: String,
        /// Account(s) actually found.
        found: String,
    },

    /// Anything else.
    #[error("{0}")]
    Unexpected(String),
}

impl ProbeError {
    /// Process exit code for this failure at the CLI boundary.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotInstalled(_) => 2,
            Self::ParseFailed(_) => 3,
            Self::TimedOut(_) => 4,
            _ => 1,
        }
    }

    /// Returns true for failures that may clear up on their own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TimedOut(_) | Self::NetworkError(_))
    }

    /// Short stable identifier for JSON output and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotInstalled(_) => "not_installed",
            Self::LoginRequired(_) => "login_required",
            Self::ParseFailed(_) => "parse_failed",
            Self::TimedOut(_) => "timed_out",
            Self::NetworkError(_) => "network_error",
            Self::AccountMismatch { .. } => "account_mismatch",
            Self::Unexpected(_) => "unexpected",
        }
    }
}

// ============================================================================
// HTTP Error
// ============================================================================

/// HTTP-specific error type.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Request error.
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    /// The request exceeded the client timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Server rejected the credentials.
    #[error("Unauthorized (HTTP {0})")]
    Unauthorized(u16),

    /// Any other non-success status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// Status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// Response body did not decode.
    #[error("Invalid response body: {0}")]
    Decode(String),

    /// Domain not allowed.
    #[error("Domain not allowed: {0}")]
    DomainNotAllowed(String),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<HttpError> for ProbeError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Timeout(after) => ProbeError::TimedOut(after),
            HttpError::Unauthorized(code) => {
                ProbeError::LoginRequired(format!("session rejected (HTTP {code})"))
            }
            HttpError::Decode(detail) => ProbeError::ParseFailed(detail),
            other => ProbeError::NetworkError(other.to_string()),
        }
    }
}

// ============================================================================
// Keychain Error
// ============================================================================

/// Error type for keychain operations.
#[derive(Debug, Error)]
pub enum KeychainError {
    /// Credential not found.
    #[error("Credential not found for {service}/{account}")]
    NotFound {
        /// Service name.
        service: String,
        /// Account name.
        account: String,
    },

    /// Access denied.
    #[error("Access denied to keychain")]
    AccessDenied,

    /// Platform error.
    #[error("Platform error: {0}")]
    Platform(String),

    /// Generic error.
    #[error("Keychain error: {0}")]
    Other(String),
}

impl From<keyring::Error> for KeychainError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::NoEntry => KeychainError::NotFound {
                service: String::new(),
                account: String::new(),
            },
            keyring::Error::PlatformFailure(e) => KeychainError::Platform(e.to_string()),
            keyring::Error::NoStorageAccess(_) => KeychainError::AccessDenied,
            _ => KeychainError::Other(err.to_string()),
        }
    }
}

impl From<KeychainError> for ProbeError {
    fn from(err: KeychainError) -> Self {
        ProbeError::Unexpected(err.to_string())
    }
}

// ============================================================================
// Process Error
// ============================================================================

/// Error type for one-shot process execution.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Command not found.
    #[error("Command not found: {0}")]
    NotFound(String),

    /// Command timed out.
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    /// Non-zero exit code.
    #[error("Command exited with code {code}: {stderr}")]
    NonZeroExit {
        /// Exit code from the process.
        code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProcessError> for ProbeError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::NotFound(binary) => ProbeError::NotInstalled(binary),
            ProcessError::Timeout(after) => ProbeError::TimedOut(after),
            other => ProbeError::Unexpected(other.to_string()),
        }
    }
}

// ============================================================================
// PTY Error
// ============================================================================

/// Error type for pseudo-terminal sessions.
#[derive(Debug, Error)]
pub enum PtyError {
    /// Binary could not be resolved on the search path.
    #[error("Command not found: {0}")]
    BinaryNotFound(String),

    /// The session did not capture its markers in time.
    #[error("Session timed out after {0:?}")]
    TimedOut(Duration),

    /// The CLI asked the user to sign in.
    #[error("Login required: {0}")]
    LoginRequired(String),

    /// The caller dropped the session.
    #[error("Session cancelled")]
    Cancelled,

    /// Failed to open the pty or spawn the child.
    #[error("Failed to spawn: {0}")]
    SpawnFailed(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PtyError> for ProbeError {
    fn from(err: PtyError) -> Self {
        match err {
            PtyError::BinaryNotFound(binary) => ProbeError::NotInstalled(binary),
            PtyError::TimedOut(after) => ProbeError::TimedOut(after),
            PtyError::LoginRequired(detail) => ProbeError::LoginRequired(detail),
            other => ProbeError::Unexpected(other.to_string()),
        }
    }
}

// ============================================================================
// Browser Error
// ============================================================================

/// Error type for browser cookie database access.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// Cookie database not found.
    #[error("Cookie database not found for {browser}: {path}")]
    DatabaseNotFound {
        /// Browser name.
        browser: String,
        /// Expected database path.
        path: String,
    },

    /// Failed to read cookies.
    #[error("Failed to read cookies: {0}")]
    ReadFailed(String),

    /// No cookies found for domain.
    #[error("No cookies found for domain: {0}")]
    NoCookiesFound(String),

    /// Cookie decryption failed.
    #[error("Cookie decryption failed: {0}")]
    DecryptionFailed(String),

    /// Browser not supported on this platform.
    #[error("{0} cookies are not supported on this platform")]
    Unsupported(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for BrowserError {
    fn from(err: rusqlite::Error) -> Self {
        BrowserError::ReadFailed(err.to_string())
    }
}

// ============================================================================
// Cookie Import Error
// ============================================================================

/// Error type for account-keyed cookie resolution.
#[derive(Debug, Error)]
pub enum CookieImportError {
    /// No source produced cookies for the domain.
    #[error("No browser session found for {domain}")]
    NoSession {
        /// Cookie domain.
        domain: String,
    },

    /// Sessions were found, but none signed in as the expected account.
    #[error("No session for {expected}; found {}", found.join(", "))]
    NoMatchingAccount {
        /// Account the caller asked for.
        expected: String,
        /// Accounts the candidate sessions signed in as.
        found: Vec<String>,
    },

    /// The identity check itself failed for a reason other than a mismatch.
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// Session store IO failure.
    #[error("Session store error: {0}")]
    Store(String),
}

impl From<CookieImportError> for ProbeError {
    fn from(err: CookieImportError) -> Self {
        match err {
            CookieImportError::NoSession { domain } => {
                ProbeError::LoginRequired(format!("sign in to {domain} in Safari or Chrome"))
            }
            CookieImportError::NoMatchingAccount { expected, found } => {
                ProbeError::AccountMismatch {
                    expected,
                    found: found.join(", "),
                }
            }
            CookieImportError::Probe(inner) => inner,
            CookieImportError::Store(detail) => ProbeError::Unexpected(detail),
        }
    }
}

// ============================================================================
// Status Error
// ============================================================================

/// Error type for status page operations.
#[derive(Debug, Error)]
pub enum StatusError {
    /// HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    /// Invalid status page response.
    #[error("Invalid status response: {0}")]
    InvalidResponse(String),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ProbeError::NotInstalled("codex".into()).exit_code(), 2);
        assert_eq!(ProbeError::ParseFailed("x".into()).exit_code(), 3);
        assert_eq!(ProbeError::TimedOut(Duration::from_secs(5)).exit_code(), 4);
        assert_eq!(ProbeError::LoginRequired("x".into()).exit_code(), 1);
        assert_eq!(ProbeError::NetworkError("x".into()).exit_code(), 1);
        assert_eq!(
            ProbeError::AccountMismatch {
                expected: "a@x.com".into(),
                found: "b@x.com".into()
            }
            .exit_code(),
            1
        );
    }

    #[test]
    fn test_pty_error_mapping() {
        let err: ProbeError = PtyError::BinaryNotFound("claude".into()).into();
        assert_eq!(err, ProbeError::NotInstalled("claude".into()));

        let err: ProbeError = PtyError::TimedOut(Duration::from_secs(20)).into();
        assert_eq!(err.exit_code(), 4);

        let err: ProbeError = PtyError::LoginRequired("run /login".into()).into();
        assert_eq!(err.kind(), "login_required");
    }

    #[test]
    fn test_no_matching_account_is_distinct() {
        let err: ProbeError = CookieImportError::NoMatchingAccount {
            expected: "a@x.com".into(),
            found: vec!["b@x.com".into(), "c@x.com".into()],
        }
        .into();
        assert_eq!(
            err,
            ProbeError::AccountMismatch {
                expected: "a@x.com".into(),
                found: "b@x.com, c@x.com".into()
            }
        );
        assert_eq!(err.to_string(), "Signed in as b@x.com, c@x.com, expected a@x.com");
    }

    #[test]
    fn test_transient() {
        assert!(ProbeError::NetworkError("reset".into()).is_transient());
        assert!(!ProbeError::ParseFailed("drift".into()).is_transient());
    }
}
