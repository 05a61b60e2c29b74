// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # usagebar store
//!
//! State management for usagebar.
//!
//! This crate provides:
//!
//! - **UsageStore**: per-provider usage state behind a `watch` version counter
//! - **RefreshScheduler**: cadence timer, single in-flight refresh, hourly cost task
//! - **ConsecutiveFailureGate**: hides a single failure after good data
//! - **cost**: incremental token-cost scanner over local session logs
//! - **Settings**: user preferences with persistence
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use usagebar_store::{ProviderProbe, RefreshScheduler, Settings, UsageStore};
//!
//! let settings = Settings::load_default().await;
//! let store = Arc::new(UsageStore::new(&settings.enabled_providers, settings.refresh_timeout()));
//! let probe = Arc::new(ProviderProbe::new(Arc::new(ctx)));
//!
//! let scheduler = RefreshScheduler::new(Arc::clone(&store), probe);
//! scheduler.set_cadence(settings.refresh_cadence);
//! scheduler.refresh_now();
//!
//! let mut rx = store.subscribe();
//! while rx.changed().await.is_ok() {
//!     println!("Usage updated!");
//! }
//! ```

pub mod cost;
pub mod error;
pub mod failure_gate;
pub mod persistence;
pub mod scheduler;
pub mod settings;
pub mod usage_store;

pub use cost::{CostRoots, CostScanner, CostUsageCache, ProviderFilter};
pub use error::StoreError;
pub use failure_gate::ConsecutiveFailureGate;
pub use persistence::{
    default_cache_dir, default_config_dir, default_cost_cache_path, default_settings_path, load_json,
    load_json_or_default, save_json,
};
pub use scheduler::RefreshScheduler;
pub use settings::{RefreshCadence, Settings};
pub use usage_store::{
    DepletionEvent, DepletionKind, ProviderEntry, ProviderPhase, ProviderProbe, UsageProbe, UsageStore,
};
