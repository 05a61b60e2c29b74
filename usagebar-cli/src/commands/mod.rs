//! CLI command implementations.

pub mod cost;
pub mod usage;
