//! Gemini provider.
//!
//! Quota comes from the Cloud Code Private API using the OAuth session the
//! Gemini CLI stores under `~/.gemini/`. Pro models map to the primary
//! window and Flash models to the secondary one.

pub mod error;
pub mod fetcher;
pub mod probe;

pub use error::GeminiError;
pub use fetcher::fetch;
pub use probe::{GeminiAuthType, GeminiCredentials, GeminiQuota, quota_from_response};
