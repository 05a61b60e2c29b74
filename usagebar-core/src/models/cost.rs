//! Cost tracking types.
//!
//! - [`CostUsageTokenSnapshot`] - Rolling token cost derived from local logs
//! - [`DailyEntry`] - Per-day usage
//! - [`ModelBreakdown`] - Per-model cost on one day

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Daily Entry
// ============================================================================

/// One day of token usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyEntry {
    /// Date as written by the report ("YYYY-MM-DD").
    pub date: String,
    /// Input tokens.
    pub input_tokens: u64,
    /// Output tokens.
    pub output_tokens: u64,
    /// Cache read tokens.
    pub cache_read_tokens: u64,
    /// Cache creation tokens.
    pub cache_creation_tokens: u64,
    /// Total tokens, when the source reports one.
    pub total_tokens: Option<u64>,
    /// Cost in USD. `None` means unknown, not zero.
    pub cost_usd: Option<f64>,
    /// Models seen on this day.
    #[serde(default)]
    pub models_used: Vec<String>,
    /// Per-model breakdown.
    #[serde(default)]
    pub model_breakdowns: Vec<ModelBreakdown>,
}

impl DailyEntry {
    /// Creates an empty entry for a date.
    pub fn new(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            total_tokens: None,
            cost_usd: None,
            models_used: Vec::new(),
            model_breakdowns: Vec::new(),
        }
    }

    /// Reported total, or the sum of the components.
    pub fn tokens(&self) -> u64 {
        self.total_tokens.unwrap_or(
            self.input_tokens
                + self.output_tokens
                + self.cache_read_tokens
                + self.cache_creation_tokens,
        )
    }

    /// Parsed calendar date, if the raw string is well formed.
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d").ok()
    }

    /// Total order used to pick the "session" day.
    ///
    /// Greater means more recent: date, then cost, then tokens, then the raw
    /// date string. Unparseable dates sort below every parseable one.
    pub fn session_order(&self, other: &Self) -> Ordering {
        self.parsed_date()
            .cmp(&other.parsed_date())
            .then_with(|| {
                self.cost_usd
                    .unwrap_or(0.0)
                    .total_cmp(&other.cost_usd.unwrap_or(0.0))
            })
            .then_with(|| self.tokens().cmp(&other.tokens()))
            .then_with(|| self.date.cmp(&other.date))
    }
}

/// Cost of one model on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBreakdown {
    /// Model identifier.
    pub model_name: String,
    /// Cost in USD.
    pub cost_usd: Option<f64>,
    /// Tokens attributed to the model.
    pub total_tokens: u64,
}

// ============================================================================
// Cost Usage Snapshot
// ============================================================================

/// Rolling token-cost summary built from local usage logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostUsageTokenSnapshot {
    /// Tokens on the most recent day.
    pub session_tokens: Option<u64>,
    /// Cost on the most recent day.
    pub session_cost_usd: Option<f64>,
    /// Tokens over the trailing 30 days.
    pub last_30_days_tokens: Option<u64>,
    /// Cost over the trailing 30 days.
    pub last_30_days_cost_usd: Option<f64>,
    /// Daily entries, oldest first.
    #[serde(default)]
    pub daily: Vec<DailyEntry>,
    /// When the scan ran.
    pub updated_at: DateTime<Utc>,
}

impl CostUsageTokenSnapshot {
    /// Builds a snapshot from daily entries and optional authoritative totals.
    ///
    /// Summary totals win over sums of the daily entries. Returns `None` when
    /// there is neither a day with data nor a summary.
    pub fn from_daily(
        mut daily: Vec<DailyEntry>,
        summary_tokens: Option<u64>,
        summary_cost_usd: Option<f64>,
    ) -> Option<Self> {
        if daily.is_empty() && summary_tokens.is_none() && summary_cost_usd.is_none() {
            return None;
        }

        let session = daily.iter().max_by(|a, b| a.session_order(b));
        let session_tokens = session.map(DailyEntry::tokens);
        let session_cost_usd = session.and_then(|d| d.cost_usd);

        let summed_cost: Option<f64> = daily
            .iter()
            .filter_map(|d| d.cost_usd)
            .fold(None, |acc, c| Some(acc.unwrap_or(0.0) + c));
        let summed_tokens: u64 = daily.iter().map(DailyEntry::tokens).sum();

        daily.sort_by(|a, b| a.date.cmp(&b.date));

        Some(Self {
            session_tokens,
            session_cost_usd,
            last_30_days_tokens: summary_tokens.or((summed_tokens > 0).then_some(summed_tokens)),
            last_30_days_cost_usd: summary_cost_usd.or(summed_cost),
            daily,
            updated_at: Utc::now(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(date: &str, cost: Option<f64>, tokens: u64) -> DailyEntry {
        DailyEntry {
            total_tokens: Some(tokens),
            cost_usd: cost,
            ..DailyEntry::new(date)
        }
    }

    #[test]
    fn test_session_picks_latest_date() {
        let snapshot = CostUsageTokenSnapshot::from_daily(
            vec![
                entry("2025-01-04", Some(9.0), 900),
                entry("2025-01-05", Some(1.0), 100),
            ],
            None,
            None,
        )
        .unwrap();
        assert_eq!(snapshot.session_tokens, Some(100));
        assert!((snapshot.session_cost_usd.unwrap() - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_session_equal_dates_prefers_higher_cost() {
        let snapshot = CostUsageTokenSnapshot::from_daily(
            vec![
                entry("2025-01-05", Some(1.0), 5000),
                entry("2025-01-05", Some(3.0), 100),
            ],
            None,
            None,
        )
        .unwrap();
        assert!((snapshot.session_cost_usd.unwrap() - 3.0).abs() < 0.001);
    }

    #[test]
    fn test_session_equal_cost_prefers_more_tokens() {
        let snapshot = CostUsageTokenSnapshot::from_daily(
            vec![
                entry("2025-01-05", Some(2.0), 100),
                entry("2025-01-05", Some(2.0), 700),
            ],
            None,
            None,
        )
        .unwrap();
        assert_eq!(snapshot.session_tokens, Some(700));
    }

    #[test]
    fn test_session_full_tie_uses_raw_date_string() {
        let a = entry("2025-01-05", Some(2.0), 100);
        let b = entry(" 2025-01-05", Some(2.0), 100);
        // Same parsed date, cost, and tokens; "2025..." > " 2025..." as strings.
        assert_eq!(a.session_order(&b), Ordering::Greater);

        let snapshot = CostUsageTokenSnapshot::from_daily(vec![b, a], None, None).unwrap();
        assert_eq!(snapshot.session_tokens, Some(100));
    }

    #[test]
    fn test_summary_totals_preferred() {
        let snapshot = CostUsageTokenSnapshot::from_daily(
            vec![entry("2025-01-05", Some(2.0), 100)],
            Some(12_345),
            Some(42.0),
        )
        .unwrap();
        assert_eq!(snapshot.last_30_days_tokens, Some(12_345));
        assert!((snapshot.last_30_days_cost_usd.unwrap() - 42.0).abs() < 0.001);
    }

    #[test]
    fn test_totals_summed_without_summary() {
        let snapshot = CostUsageTokenSnapshot::from_daily(
            vec![
                entry("2025-01-04", Some(1.5), 100),
                entry("2025-01-05", None, 50),
            ],
            None,
            None,
        )
        .unwrap();
        assert_eq!(snapshot.last_30_days_tokens, Some(150));
        assert!((snapshot.last_30_days_cost_usd.unwrap() - 1.5).abs() < 0.001);
        assert_eq!(snapshot.daily[0].date, "2025-01-04");
    }

    #[test]
    fn test_unknown_cost_stays_unknown() {
        let snapshot =
            CostUsageTokenSnapshot::from_daily(vec![entry("2025-01-05", None, 10)], None, None)
                .unwrap();
        assert!(snapshot.last_30_days_cost_usd.is_none());
        assert!(snapshot.session_cost_usd.is_none());
    }

    #[test]
    fn test_empty_is_none() {
        assert!(CostUsageTokenSnapshot::from_daily(Vec::new(), None, None).is_none());
    }
}
