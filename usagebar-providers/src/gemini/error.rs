//! Gemini-specific errors.

use thiserror::Error;
use usagebar_fetch::{HttpError, ProbeError};

/// Gemini-specific errors.
#[derive(Debug, Error)]
pub enum GeminiError {
    /// No credentials file or empty token.
    #[error("Not logged in to Gemini CLI")]
    NotLoggedIn,

    /// `settings.json` selects an auth type without a quota endpoint.
    #[error("Unsupported auth type: {0}")]
    UnsupportedAuthType(String),

    /// The token expired and cannot be refreshed.
    #[error("Token expired: {0}")]
    TokenExpired(String),

    /// Credentials file could not be parsed.
    #[error("Credentials parse error: {0}")]
    CredentialsParse(String),

    /// The quota response held no usable buckets.
    #[error("No quota data available")]
    NoData,

    /// HTTP failure.
    #[error(transparent)]
    Http(#[from] HttpError),
}

impl From<GeminiError> for ProbeError {
    fn from(err: GeminiError) -> Self {
        match err {
            GeminiError::NotLoggedIn => {
                ProbeError::LoginRequired("run `gemini` and sign in with Google".to_string())
            }
            GeminiError::TokenExpired(detail) => ProbeError::LoginRequired(detail),
            GeminiError::CredentialsParse(detail) => ProbeError::ParseFailed(detail),
            GeminiError::NoData => ProbeError::ParseFailed("quota response has no buckets".to_string()),
            GeminiError::Http(inner) => inner.into(),
            GeminiError::UnsupportedAuthType(detail) => ProbeError::Unexpected(detail),
        }
    }
}
