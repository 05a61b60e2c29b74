// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `usagebar` Core
//!
//! Core models and text normalization shared by every `usagebar` crate.
//!
//! ## Key Types
//!
//! ### Usage Types
//! - [`UsageSnapshot`] - Normalized per-provider result with up to three windows
//! - [`RateWindow`] - One usage window (session, weekly, model-specific)
//! - [`ProviderCostSnapshot`] - Spend-based quota
//! - [`CreditsSnapshot`] - Prepaid balance with recent events
//!
//! ### Identity
//! - [`ProviderKind`] - Closed set of monitored providers
//! - [`ProviderIdentitySnapshot`] - Account identity, siloed per provider
//!
//! ### Cost Tracking
//! - [`CostUsageTokenSnapshot`] - Token cost derived from local logs
//! - [`DailyEntry`] - One day of token usage
//!
//! ### Status
//! - [`ProviderStatus`] - Provider service health
//! - [`FetchSource`] - How a snapshot was obtained
//!
//! ## Text Normalization
//!
//! The [`text`] module holds the parsing helpers used by every scraper:
//! ANSI stripping, locale-tolerant number parsing, percent extraction
//! and reset-time resolution.

pub mod error;
pub mod models;
pub mod text;

pub use error::CoreError;

pub use models::{
    // Identity
    LoginMethod,
    ProviderIdentitySnapshot,
    ProviderKind,
    // Usage types
    ProviderCostSnapshot,
    RateWindow,
    UsageSnapshot,
    WindowReset,
    // Credits
    CreditEvent,
    CreditsSnapshot,
    // Cost tracking
    CostUsageTokenSnapshot,
    DailyEntry,
    ModelBreakdown,
    // Status & Fetch
    FetchSource,
    OpenAIDashboardSnapshot,
    ProviderStatus,
    StatusIndicator,
};
