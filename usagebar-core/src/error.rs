//! Core error types for `usagebar`.

use thiserror::Error;

use crate::models::ProviderKind;

/// Core error type for model construction and validation.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Unknown provider name.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Identity attached to the wrong provider's snapshot.
    #[error("Identity for {identity} cannot be attached to a {snapshot} snapshot")]
    IdentityMismatch {
        /// Provider that owns the snapshot.
        snapshot: ProviderKind,
        /// Provider named by the identity.
        identity: ProviderKind,
    },

    /// Invalid data from a source.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
