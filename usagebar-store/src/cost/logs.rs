//! JSONL session log parsing.
//!
//! Codex writes `token_count` events whose `total_token_usage` grows over a
//! session, so usage is the delta between consecutive totals. Claude writes
//! one `assistant` line per response with `message.usage`; the same response
//! may be logged in several files and carries a `message.id:requestId` key
//! for deduplication.

use chrono::{DateTime, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use super::pricing::TokenCounts;

// ============================================================================
// Parsed Rows
// ============================================================================

/// One usage record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRow {
    /// Local calendar day, `YYYY-MM-DD`.
    pub date: String,
    /// Model id, when the log names one.
    #[serde(default)]
    pub model: Option<String>,
    /// Token counts.
    pub tokens: TokenCounts,
    /// Deduplication key.
    #[serde(default)]
    pub dedup_key: Option<String>,
}

/// An explicit totals line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    /// Day the totals cover; `None` for a report-wide summary.
    #[serde(default)]
    pub date: Option<String>,
    /// Reported tokens.
    #[serde(default)]
    pub total_tokens: Option<u64>,
    /// Reported cost.
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
}

/// Everything parsed from one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedFile {
    /// Usage rows in file order.
    #[serde(default)]
    pub rows: Vec<UsageRow>,
    /// Summary lines in file order.
    #[serde(default)]
    pub summaries: Vec<SummaryRow>,
}

fn local_date<Tz: TimeZone>(timestamp: Option<&str>, tz: &Tz) -> Option<String> {
    let parsed = DateTime::parse_from_rfc3339(timestamp?).ok()?;
    let date: NaiveDate = parsed.with_timezone(tz).date_naive();
    Some(date.format("%Y-%m-%d").to_string())
}

fn u64_at(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

// ============================================================================
// Codex
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CodexTotals {
    input: u64,
    cached: u64,
    output: u64,
}

impl CodexTotals {
    fn from_value(value: &Value) -> Self {
        Self {
            input: u64_at(value, "input_tokens"),
            cached: u64_at(value, "cached_input_tokens"),
            output: u64_at(value, "output_tokens"),
        }
    }

    fn saturating_sub(self, other: Self) -> Self {
        Self {
            input: self.input.saturating_sub(other.input),
            cached: self.cached.saturating_sub(other.cached),
            output: self.output.saturating_sub(other.output),
        }
    }

    fn is_zero(self) -> bool {
        self.input == 0 && self.cached == 0 && self.output == 0
    }

    /// Codex counts cached input inside `input_tokens`.
    fn to_counts(self) -> TokenCounts {
        TokenCounts {
            input: self.input.saturating_sub(self.cached),
            output: self.output,
            cache_read: self.cached.min(self.input),
            cache_write: 0,
        }
    }
}

/// Parses a Codex session log.
pub fn parse_codex<Tz: TimeZone>(content: &str, tz: &Tz) -> ParsedFile {
    let mut parsed = ParsedFile::default();
    let mut model: Option<String> = None;
    let mut previous: Option<CodexTotals> = None;

    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            trace!("Skipping malformed Codex line");
            continue;
        };
        let payload = value.get("payload");
        match value.get("type").and_then(Value::as_str) {
            Some("turn_context") => {
                if let Some(m) = payload.and_then(|p| p.get("model")).and_then(Value::as_str) {
                    model = Some(m.to_string());
                }
            }
            Some("event_msg") => {
                let Some(payload) = payload else { continue };
                if payload.get("type").and_then(Value::as_str) != Some("token_count") {
                    continue;
                }
                let Some(info) = payload.get("info").filter(|i| !i.is_null()) else {
                    continue;
                };
                let delta = if let Some(total) = info.get("total_token_usage") {
                    let total = CodexTotals::from_value(total);
                    let delta = total.saturating_sub(previous.unwrap_or_default());
                    previous = Some(total);
                    delta
                } else if let Some(last) = info.get("last_token_usage") {
                    CodexTotals::from_value(last)
                } else {
                    continue;
                };
                if delta.is_zero() {
                    continue;
                }
                let Some(date) = local_date(value.get("timestamp").and_then(Value::as_str), tz) else {
                    continue;
                };
                let row_model = info
                    .get("model")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .or_else(|| model.clone());
                parsed.rows.push(UsageRow {
                    date,
                    model: row_model,
                    tokens: delta.to_counts(),
                    dedup_key: None,
                });
            }
            _ => {}
        }
    }
    parsed
}

// ============================================================================
// Claude
// ============================================================================

fn summary_row<Tz: TimeZone>(value: &Value, tz: &Tz) -> Option<SummaryRow> {
    let total_tokens = value.get("totalTokens").and_then(Value::as_u64);
    let total_cost_usd = value.get("totalCostUSD").and_then(Value::as_f64);
    if total_tokens.is_none() && total_cost_usd.is_none() {
        return None;
    }
    Some(SummaryRow {
        date: local_date(value.get("timestamp").and_then(Value::as_str), tz),
        total_tokens,
        total_cost_usd,
    })
}

/// Parses a Claude project log.
pub fn parse_claude<Tz: TimeZone>(content: &str, tz: &Tz) -> ParsedFile {
    let mut parsed = ParsedFile::default();

    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            trace!("Skipping malformed Claude line");
            continue;
        };
        match value.get("type").and_then(Value::as_str) {
            Some("summary") => {
                if let Some(summary) = summary_row(&value, tz) {
                    parsed.summaries.push(summary);
                }
            }
            Some("assistant") => {
                let Some(message) = value.get("message") else { continue };
                let Some(usage) = message.get("usage") else { continue };
                let tokens = TokenCounts {
                    input: u64_at(usage, "input_tokens"),
                    output: u64_at(usage, "output_tokens"),
                    cache_read: u64_at(usage, "cache_read_input_tokens"),
                    cache_write: u64_at(usage, "cache_creation_input_tokens"),
                };
                let Some(date) = local_date(value.get("timestamp").and_then(Value::as_str), tz) else {
                    continue;
                };
                let message_id = message.get("id").and_then(Value::as_str);
                let request_id = value.get("requestId").and_then(Value::as_str);
                let dedup_key = match (message_id, request_id) {
                    (Some(m), Some(r)) => Some(format!("{m}:{r}")),
                    _ => None,
                };
                parsed.rows.push(UsageRow {
                    date,
                    model: message.get("model").and_then(Value::as_str).map(String::from),
                    tokens,
                    dedup_key,
                });
            }
            _ => {}
        }
    }
    parsed
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    const CODEX_LOG: &str = r#"
{"type":"session_meta","timestamp":"2025-01-05T10:00:00Z","payload":{"id":"s1"}}
{"type":"turn_context","timestamp":"2025-01-05T10:00:01Z","payload":{"model":"gpt-5-codex"}}
{"type":"event_msg","timestamp":"2025-01-05T10:00:02Z","payload":{"type":"token_count","info":null}}
{"type":"event_msg","timestamp":"2025-01-05T10:00:03Z","payload":{"type":"token_count","info":{"total_token_usage":{"input_tokens":1000,"cached_input_tokens":400,"output_tokens":100,"total_tokens":1100}}}}
{"type":"event_msg","timestamp":"2025-01-05T10:05:00Z","payload":{"type":"token_count","info":{"total_token_usage":{"input_tokens":1500,"cached_input_tokens":600,"output_tokens":150,"total_tokens":1650}}}}
{"type":"event_msg","timestamp":"2025-01-05T10:06:00Z","payload":{"type":"token_count","info":{"total_token_usage":{"input_tokens":1500,"cached_input_tokens":600,"output_tokens":150,"total_tokens":1650}}}}
{"type":"event_msg","timestamp":"2025-01-05T10:06:00Z","payload":{"type":"agent_message","message":"done"}}
not json
"#;

    #[test]
    fn test_codex_deltas() {
        let parsed = parse_codex(CODEX_LOG, &Utc);
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(
            parsed.rows[0].tokens,
            TokenCounts { input: 600, output: 100, cache_read: 400, cache_write: 0 }
        );
        assert_eq!(
            parsed.rows[1].tokens,
            TokenCounts { input: 300, output: 50, cache_read: 200, cache_write: 0 }
        );
        assert_eq!(parsed.rows[1].model.as_deref(), Some("gpt-5-codex"));
        assert_eq!(parsed.rows[1].date, "2025-01-05");
    }

    #[test]
    fn test_codex_last_usage_fallback() {
        let log = r#"{"type":"event_msg","timestamp":"2025-01-06T01:00:00Z","payload":{"type":"token_count","info":{"last_token_usage":{"input_tokens":50,"output_tokens":5}}}}"#;
        let parsed = parse_codex(log, &Utc);
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].tokens.input, 50);
        assert!(parsed.rows[0].model.is_none());
    }

    #[test]
    fn test_claude_rows_and_summaries() {
        let log = r#"
{"type":"user","timestamp":"2025-01-05T09:00:00Z","message":{"role":"user","content":"hi"}}
{"type":"assistant","timestamp":"2025-01-05T09:00:05Z","requestId":"req_1","message":{"id":"msg_1","model":"claude-sonnet-4-20250514","usage":{"input_tokens":10,"output_tokens":20,"cache_creation_input_tokens":30,"cache_read_input_tokens":40}}}
{"type":"assistant","timestamp":"2025-01-05T09:01:00Z","message":{"model":"claude-sonnet-4-20250514","content":[]}}
{"type":"summary","summary":"Refactor","leafUuid":"abc"}
{"type":"summary","timestamp":"2025-01-04T23:00:00Z","totalCostUSD":1.25,"totalTokens":5000}
{"type":"summary","totalCostUSD":9.5}
"#;
        let parsed = parse_claude(log, &Utc);
        assert_eq!(parsed.rows.len(), 1);
        let row = &parsed.rows[0];
        assert_eq!(row.dedup_key.as_deref(), Some("msg_1:req_1"));
        assert_eq!(
            row.tokens,
            TokenCounts { input: 10, output: 20, cache_read: 40, cache_write: 30 }
        );
        assert_eq!(
            parsed.summaries,
            vec![
                SummaryRow {
                    date: Some("2025-01-04".into()),
                    total_tokens: Some(5000),
                    total_cost_usd: Some(1.25),
                },
                SummaryRow { date: None, total_tokens: None, total_cost_usd: Some(9.5) },
            ]
        );
    }

    #[test]
    fn test_local_date_uses_timezone() {
        let tz = chrono::FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(local_date(Some("2025-01-05T23:30:00Z"), &tz).as_deref(), Some("2025-01-06"));
        assert_eq!(local_date(Some("garbage"), &tz), None);
    }
}
