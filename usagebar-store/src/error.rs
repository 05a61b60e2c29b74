//! Store error types.

use thiserror::Error;

/// Errors that can occur in the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A background task was cancelled or panicked.
    #[error("Background task failed: {0}")]
    Task(String),

    /// Token-cost scanning is not available for this provider.
    #[error("Token cost is not tracked for {0}")]
    CostUnsupported(String),
}

impl StoreError {
    /// Returns true if this is a transient error that might succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Task(_))
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Task(err.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient() {
        let io = StoreError::Io(std::io::Error::other("disk"));
        assert!(io.is_transient());
        assert!(!StoreError::Config("bad".into()).is_transient());
        assert!(!StoreError::CostUnsupported("gemini".into()).is_transient());
    }
}
