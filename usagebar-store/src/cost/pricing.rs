//! Built-in per-model token prices.
//!
//! Prices are USD per one million tokens. Model ids are normalized before
//! lookup: a Vertex `@version` suffix and a trailing `-YYYYMMDD` date stamp
//! are dropped, then the longest known prefix wins.

use serde::{Deserialize, Serialize};

/// Price of one model, USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    /// Uncached input.
    pub input: f64,
    /// Output, including reasoning.
    pub output: f64,
    /// Cache reads.
    pub cache_read: f64,
    /// Cache writes.
    pub cache_write: f64,
}

impl ModelPrice {
    const fn new(input: f64, output: f64, cache_read: f64, cache_write: f64) -> Self {
        Self {
            input,
            output,
            cache_read,
            cache_write,
        }
    }
}

/// Token counts priced together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenCounts {
    /// Uncached input tokens.
    pub input: u64,
    /// Output tokens.
    pub output: u64,
    /// Cache read tokens.
    pub cache_read: u64,
    /// Cache creation tokens.
    pub cache_write: u64,
}

impl TokenCounts {
    /// Sum of every class.
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_read + self.cache_write
    }

    /// Adds `other` into `self`.
    pub fn add(&mut self, other: &TokenCounts) {
        self.input += other.input;
        self.output += other.output;
        self.cache_read += other.cache_read;
        self.cache_write += other.cache_write;
    }
}

const PRICES: &[(&str, ModelPrice)] = &[
    // OpenAI
    ("gpt-5-codex", ModelPrice::new(1.25, 10.0, 0.125, 0.0)),
    ("gpt-5-mini", ModelPrice::new(0.25, 2.0, 0.025, 0.0)),
    ("gpt-5-nano", ModelPrice::new(0.05, 0.4, 0.005, 0.0)),
    ("gpt-5", ModelPrice::new(1.25, 10.0, 0.125, 0.0)),
    ("codex-mini", ModelPrice::new(1.5, 6.0, 0.375, 0.0)),
    ("gpt-4.1-mini", ModelPrice::new(0.4, 1.6, 0.1, 0.0)),
    ("gpt-4.1", ModelPrice::new(2.0, 8.0, 0.5, 0.0)),
    ("o4-mini", ModelPrice::new(1.1, 4.4, 0.275, 0.0)),
    ("o3", ModelPrice::new(2.0, 8.0, 0.5, 0.0)),
    // Anthropic
    ("claude-opus-4-5", ModelPrice::new(5.0, 25.0, 0.5, 6.25)),
    ("claude-opus-4", ModelPrice::new(15.0, 75.0, 1.5, 18.75)),
    ("claude-sonnet-4", ModelPrice::new(3.0, 15.0, 0.3, 3.75)),
    ("claude-3-7-sonnet", ModelPrice::new(3.0, 15.0, 0.3, 3.75)),
    ("claude-3-5-sonnet", ModelPrice::new(3.0, 15.0, 0.3, 3.75)),
    ("claude-haiku-4-5", ModelPrice::new(1.0, 5.0, 0.1, 1.25)),
    ("claude-3-5-haiku", ModelPrice::new(0.8, 4.0, 0.08, 1.0)),
    ("claude-3-opus", ModelPrice::new(15.0, 75.0, 1.5, 18.75)),
];

/// Normalizes a model id for price lookup.
pub fn normalize_model(model: &str) -> String {
    let mut id = model.trim().to_ascii_lowercase();
    if let Some(at) = id.find('@') {
        id.truncate(at);
    }
    if let Some((head, tail)) = id.rsplit_once('-') {
        if tail.len() == 8 && tail.bytes().all(|b| b.is_ascii_digit()) {
            id = head.to_string();
        }
    }
    id
}

/// Price for a model id, or `None` if unknown.
pub fn price_for(model: &str) -> Option<ModelPrice> {
    let id = normalize_model(model);
    PRICES
        .iter()
        .filter(|(prefix, _)| id.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, price)| *price)
}

/// Cost in USD of `tokens` on `model`, or `None` if the model is unknown.
pub fn cost_usd(model: &str, tokens: &TokenCounts) -> Option<f64> {
    let price = price_for(model)?;
    #[allow(clippy::cast_precision_loss)]
    let cost = (tokens.input as f64 * price.input
        + tokens.output as f64 * price.output
        + tokens.cache_read as f64 * price.cache_read
        + tokens.cache_write as f64 * price.cache_write)
        / 1_000_000.0;
    Some(cost)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_model() {
        assert_eq!(normalize_model("claude-sonnet-4-20250514"), "claude-sonnet-4");
        assert_eq!(normalize_model("claude-opus-4-1@20250805"), "claude-opus-4-1");
        assert_eq!(normalize_model("GPT-5-Codex"), "gpt-5-codex");
        assert_eq!(normalize_model("gpt-4.1"), "gpt-4.1");
    }

    #[test]
    fn test_longest_prefix_wins() {
        assert_eq!(price_for("gpt-5-mini-2025-08-07").unwrap().input, 0.25);
        assert_eq!(price_for("claude-opus-4-5-20251101").unwrap().input, 5.0);
        assert_eq!(price_for("claude-opus-4-1-20250805").unwrap().input, 15.0);
        assert!(price_for("llama-3").is_none());
    }

    #[test]
    fn test_cost() {
        let tokens = TokenCounts {
            input: 1_000_000,
            output: 100_000,
            cache_read: 2_000_000,
            cache_write: 0,
        };
        let cost = cost_usd("claude-sonnet-4-20250514", &tokens).unwrap();
        assert!((cost - (3.0 + 1.5 + 0.6)).abs() < 1e-9);
        assert!(cost_usd("mystery", &tokens).is_none());
    }
}
