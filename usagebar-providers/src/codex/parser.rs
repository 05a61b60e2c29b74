//! Codex output parsers.
//!
//! Two sources produce the same snapshot: the app-server's rate limits and
//! the `/status` screen of the interactive CLI. The screen looks like:
//!
//! ```text
//! │  5h limit:     [██████████░░░░░░░░░░] 72% left (resets 19:32)          │
//! │  Weekly limit: [████░░░░░░░░░░░░░░░░] 21% left (resets 09:15 on 12 Jan) │
//! │  Credits:      112.45 credits                                           │
//! ```

use std::sync::LazyLock;

use chrono::{DateTime, Local, Utc};
use regex::Regex;
use tracing::debug;
use usagebar_core::text::{first_number, parse_localized_number, parse_reset_date, percent_from_line, reset_string, strip_ansi};
use usagebar_core::{CreditsSnapshot, RateWindow};

use super::error::CodexError;
use super::rpc::{CreditsInfo, RateLimitWindow, RateLimits};

/// Session window length.
pub const SESSION_WINDOW_MINUTES: u32 = 300;

/// Weekly window length.
pub const WEEKLY_WINDOW_MINUTES: u32 = 10_080;

static CREDITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)credits\s*:\s*\$?\s*([\d.,]+)").expect("Invalid regex"));

// ============================================================================
// Parsed Status
// ============================================================================

/// Usage read from one source, before identity is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct CodexUsage {
    /// Session window.
    pub primary: Option<RateWindow>,
    /// Weekly window.
    pub secondary: Option<RateWindow>,
    /// Credit balance.
    pub credits: Option<CreditsSnapshot>,
}

// ============================================================================
// /status Screen
// ============================================================================

/// Parses the `/status` screen.
///
/// Fails with [`CodexError::Parse`] when neither limit line is present,
/// and never invents a value for a missing window.
pub fn parse_status_output(raw: &str, now: &DateTime<Local>) -> Result<CodexUsage, CodexError> {
    let text = strip_ansi(raw);
    let mut primary = None;
    let mut secondary = None;
    let mut credits = None;

    for line in text.lines() {
        let lower = line.to_lowercase();
        if lower.contains("5h limit") {
            primary = parse_limit_line(line, SESSION_WINDOW_MINUTES, now);
        } else if lower.contains("weekly limit") {
            secondary = parse_limit_line(line, WEEKLY_WINDOW_MINUTES, now);
        } else if lower.contains("credits:") {
            credits = first_number(&CREDITS_RE, line).map(CreditsSnapshot::new);
        }
    }

    if primary.is_none() && secondary.is_none() {
        let lower = text.to_lowercase();
        let reason = if lower.contains("data not available") {
            "Codex has no limit data yet; send a message first"
        } else {
            "no `5h limit` or `Weekly limit` line in /status output"
        };
        return Err(CodexError::Parse(reason.to_string()));
    }

    debug!(
        has_primary = primary.is_some(),
        has_secondary = secondary.is_some(),
        has_credits = credits.is_some(),
        "Parsed /status"
    );
    Ok(CodexUsage {
        primary,
        secondary,
        credits,
    })
}

fn parse_limit_line(line: &str, window_minutes: u32, now: &DateTime<Local>) -> Option<RateWindow> {
    let remaining = percent_from_line(line)?;
    let window = RateWindow::from_remaining(f64::from(remaining)).with_window_minutes(window_minutes);
    let Some(reset) = reset_string(line) else {
        return Some(window);
    };
    let reset = reset.trim_end_matches(['│', '|', ' ']).trim_end_matches(')').trim().to_string();
    Some(match parse_reset_date(&reset, now) {
        Some(at) => window.with_resets_at(at.with_timezone(&Utc)),
        None => window.with_reset_description(reset),
    })
}

// ============================================================================
// App-Server Rate Limits
// ============================================================================

/// Converts app-server rate limits.
///
/// A response with neither window is format drift, not "0% used".
pub fn usage_from_rate_limits(limits: &RateLimits) -> Result<CodexUsage, CodexError> {
    let primary = limits.primary.as_ref().map(window_from_rpc);
    let secondary = limits.secondary.as_ref().map(window_from_rpc);
    if primary.is_none() && secondary.is_none() {
        return Err(CodexError::Parse(
            "app-server reported no rate limit windows".to_string(),
        ));
    }
    Ok(CodexUsage {
        primary,
        secondary,
        credits: limits.credits.as_ref().and_then(credits_from_rpc),
    })
}

fn window_from_rpc(window: &RateLimitWindow) -> RateWindow {
    let mut result = RateWindow::new(window.used_percent);
    if let Some(minutes) = window.window_duration_mins {
        result = result.with_window_minutes(minutes);
    }
    if let Some(at) = window.resets_at.and_then(|secs| DateTime::from_timestamp(secs, 0)) {
        result = result.with_resets_at(at);
    }
    result
}

fn credits_from_rpc(info: &CreditsInfo) -> Option<CreditsSnapshot> {
    if info.unlimited == Some(true) || info.has_credits == Some(false) {
        return None;
    }
    let balance = parse_localized_number(info.balance.as_deref()?.trim())?;
    Some(CreditsSnapshot::new(balance))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap()
    }

    const STATUS: &str = "\x1b[2m╭───────────────────────────────────────────╮\x1b[0m
│  >_ OpenAI Codex (v0.46.0)                                │
│  Account:      dev@example.com (Pro)                      │
│  5h limit:     [██████████░░░░░░░░░░] 72% left (resets 19:32)          │
│  Weekly limit: [████░░░░░░░░░░░░░░░░] 21% left (resets 09:15 on 12 Jan) │
│  Credits:      1,112.45 credits                           │
╰───────────────────────────────────────────╯";

    #[test]
    fn test_parse_status_full() {
        let usage = parse_status_output(STATUS, &now()).unwrap();

        let primary = usage.primary.unwrap();
        assert!((primary.used_percent() - 28.0).abs() < f64::EPSILON);
        assert_eq!(primary.window_minutes, Some(300));
        let expected = Local.with_ymd_and_hms(2025, 1, 10, 19, 32, 0).unwrap();
        assert_eq!(primary.resets_at(), Some(expected.with_timezone(&Utc)));

        let secondary = usage.secondary.unwrap();
        assert!((secondary.remaining_percent() - 21.0).abs() < f64::EPSILON);
        let expected = Local.with_ymd_and_hms(2025, 1, 12, 9, 15, 0).unwrap();
        assert_eq!(secondary.resets_at(), Some(expected.with_timezone(&Utc)));

        assert!((usage.credits.unwrap().remaining - 1112.45).abs() < 1e-9);
    }

    #[test]
    fn test_parse_status_missing_weekly_is_absent() {
        let usage = parse_status_output("5h limit: 0% left", &now()).unwrap();
        assert!(usage.primary.unwrap().is_exhausted());
        assert!(usage.secondary.is_none());
        assert!(usage.credits.is_none());
    }

    #[test]
    fn test_parse_status_without_limits_fails() {
        let err = parse_status_output("Limits: data not available yet", &now()).unwrap_err();
        assert!(matches!(err, CodexError::Parse(ref m) if m.contains("no limit data")));

        let err = parse_status_output("Welcome to Codex", &now()).unwrap_err();
        assert!(matches!(err, CodexError::Parse(_)));
    }

    #[test]
    fn test_rate_limits_conversion() {
        let limits: RateLimits = serde_json::from_str(
            r#"{"primary":{"usedPercent":105,"windowDurationMins":300,"resetsAt":1735000000},
                "credits":{"hasCredits":true,"unlimited":false,"balance":"12.5"}}"#,
        )
        .unwrap();
        let usage = usage_from_rate_limits(&limits).unwrap();
        let primary = usage.primary.unwrap();
        assert!((primary.used_percent() - 100.0).abs() < f64::EPSILON);
        assert!((primary.remaining_percent()).abs() < f64::EPSILON);
        assert_eq!(primary.resets_at().unwrap().timestamp(), 1_735_000_000);
        assert!(usage.secondary.is_none());
        assert!((usage.credits.unwrap().remaining - 12.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rate_limits_empty_is_parse_failure() {
        let err = usage_from_rate_limits(&RateLimits::default()).unwrap_err();
        assert!(matches!(err, CodexError::Parse(_)));
    }

    #[test]
    fn test_unlimited_credits_omitted() {
        let info = CreditsInfo {
            has_credits: Some(true),
            unlimited: Some(true),
            balance: Some("0".into()),
        };
        assert!(credits_from_rpc(&info).is_none());
    }
}
