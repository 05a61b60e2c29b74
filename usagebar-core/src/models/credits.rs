//! Prepaid credit balance (Codex).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One credit usage or purchase event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditEvent {
    /// Day of the event.
    pub date: NaiveDate,
    /// Service label (e.g. "CLI", "Cloud tasks").
    pub service: String,
    /// Credits consumed (positive) or granted (negative).
    pub amount: f64,
}

/// Remaining prepaid credits with recent events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditsSnapshot {
    /// Remaining balance.
    pub remaining: f64,
    /// Recent credit events, newest first.
    #[serde(default)]
    pub events: Vec<CreditEvent>,
    /// When the balance was read.
    pub updated_at: DateTime<Utc>,
}

impl CreditsSnapshot {
    /// Creates a snapshot with no events.
    pub fn new(remaining: f64) -> Self {
        Self {
            remaining,
            events: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Merges a fresh reading over a previous one.
    ///
    /// The fresh balance always wins. Events from `previous` are kept when
    /// the fresh reading carried none.
    pub fn merged_over(mut self, previous: Option<&CreditsSnapshot>) -> Self {
        if let Some(previous) = previous.filter(|_| self.events.is_empty()) {
            self.events.clone_from(&previous.events);
        }
        self
    }
}
