//! Vertex AI-specific errors.

use thiserror::Error;
use usagebar_fetch::{HttpError, ProbeError};

/// Vertex AI-specific errors.
#[derive(Debug, Error)]
pub enum VertexError {
    /// No usable application default credentials.
    #[error("Not logged in: run `gcloud auth application-default login`")]
    NotLoggedIn,

    /// No project could be resolved.
    #[error("No project configured: set `quota_project_id` in ADC or run `gcloud config set project <project>`")]
    NoProject,

    /// Credentials could not be parsed.
    #[error("Credentials parse error: {0}")]
    CredentialsParse(String),

    /// Monitoring returned no usage/limit pairs.
    #[error("No Vertex AI quota series for project {0}")]
    NoQuotaData(String),

    /// Query URL could not be built.
    #[error("Invalid monitoring query: {0}")]
    InvalidQuery(String),

    /// HTTP failure.
    #[error(transparent)]
    Http(#[from] HttpError),
}

impl From<VertexError> for ProbeError {
    fn from(err: VertexError) -> Self {
        match err {
            VertexError::NotLoggedIn => ProbeError::LoginRequired(err.to_string()),
            VertexError::NoProject => ProbeError::Unexpected(err.to_string()),
            VertexError::CredentialsParse(detail) => ProbeError::ParseFailed(detail),
            VertexError::NoQuotaData(_) => ProbeError::ParseFailed(err.to_string()),
            VertexError::InvalidQuery(detail) => ProbeError::Unexpected(detail),
            VertexError::Http(inner) => inner.into(),
        }
    }
}
