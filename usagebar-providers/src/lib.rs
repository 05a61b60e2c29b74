// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # usagebar Providers
//!
//! Per-provider usage probes behind one contract:
//! [`Provider::fetch`] takes a [`ProbeContext`](usagebar_fetch::ProbeContext)
//! and returns a [`ProviderFetch`] or a
//! [`ProbeError`](usagebar_fetch::ProbeError).
//!
//! | Provider | RPC | PTY | Web cookies | OAuth quota |
//! |----------|-----|-----|-------------|-------------|
//! | Codex (OpenAI) | ✅ | ✅ | dashboard | ❌ |
//! | Claude (Anthropic) | ❌ | ✅ | ✅ | ❌ |
//! | Gemini (Google) | ❌ | ❌ | ❌ | ✅ |
//! | Vertex AI (GCP) | ❌ | ❌ | ❌ | ✅ |
//!
//! ## Usage
//!
//! ```ignore
//! use usagebar_fetch::ProbeContext;
//! use usagebar_providers::Provider;
//!
//! let ctx = ProbeContext::builder().build()?;
//! let fetch = Provider::Claude.fetch(&ctx).await?;
//! println!("{:.0}% used", fetch.snapshot.max_usage_percent());
//! ```

pub mod google_oauth;
pub mod provider;

// Provider modules (alphabetical)
pub mod claude;
pub mod codex;
pub mod gemini;
pub mod vertexai;

pub use provider::{Provider, ProviderFetch, StatusSource};
