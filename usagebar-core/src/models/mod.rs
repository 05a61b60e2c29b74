//! Domain models for usagebar.
//!
//! ## Submodules
//!
//! - [`provider`] - Provider kinds and identity
//! - [`usage`] - Rate windows and the normalized usage snapshot
//! - [`credits`] - Prepaid credit balance
//! - [`cost`] - Token cost derived from local logs
//! - [`status`] - Service status, fetch source and web dashboard data

mod cost;
mod credits;
mod provider;
mod status;
mod usage;

pub use cost::{CostUsageTokenSnapshot, DailyEntry, ModelBreakdown};
pub use credits::{CreditEvent, CreditsSnapshot};
pub use provider::{LoginMethod, ProviderIdentitySnapshot, ProviderKind};
pub use status::{FetchSource, OpenAIDashboardSnapshot, ProviderStatus, StatusIndicator};
pub use usage::{ProviderCostSnapshot, RateWindow, UsageSnapshot, WindowReset};
