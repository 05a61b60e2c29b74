//! Vertex AI provider.
//!
//! Reads Application Default Credentials, refreshes the access token and
//! asks Cloud Monitoring for quota usage and limit series.
//!
//! Run `gcloud auth application-default login` to create credentials.

pub mod credentials;
pub mod error;
pub mod fetcher;
pub mod monitoring;

pub use credentials::{AdcCredentials, resolve_project};
pub use error::VertexError;
pub use fetcher::fetch;
pub use monitoring::{QuotaPeak, peak_usage};
