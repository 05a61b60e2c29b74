//! Claude `/usage` screen parser.
//!
//! The screen has one section per limit:
//!
//! ```text
//! Current session
//! ███████▌                                  15% used
//! Resets 2pm (America/Los_Angeles)
//!
//! Current week (all models)
//! ██████████████▌                           29% used
//! Resets Jan 5 at 12am (America/Los_Angeles)
//!
//! Current week (Opus)
//!                                           0% used
//! ```
//!
//! Each header anchors a bounded search for its percent line. A session or
//! weekly header that no longer matches falls back to percent line order.
//! Missing session or weekly data is an error, never a default.

use chrono::{DateTime, Local, Utc};
use serde_json::Value;
use tracing::{debug, warn};
use usagebar_core::RateWindow;
use usagebar_core::text::{parse_reset_date, percent_from_line, reset_string, strip_ansi};

use super::error::ClaudeError;

/// Lines searched below a header.
const SECTION_WINDOW: usize = 12;

/// Session window length.
pub const SESSION_WINDOW_MINUTES: u32 = 300;

/// Weekly window length.
pub const WEEKLY_WINDOW_MINUTES: u32 = 10_080;

const SESSION_HEADER: &str = "current session";
const WEEKLY_HEADER: &str = "current week (all models)";
const MODEL_HEADERS: &[&str] = &["current week (opus", "current week (sonnet"];

/// Parsed `/usage` windows.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaudeUsage {
    /// Session window.
    pub primary: RateWindow,
    /// Weekly window across models.
    pub secondary: RateWindow,
    /// Model-specific weekly window.
    pub tertiary: Option<RateWindow>,
}

// ============================================================================
// Parsing
// ============================================================================

/// Parses the `/usage` screen.
pub fn parse_usage_output(raw: &str, now: &DateTime<Local>) -> Result<ClaudeUsage, ClaudeError> {
    let text = strip_ansi(raw);
    if let Some(err) = error_from_blob(&text) {
        return Err(err);
    }

    let lines: Vec<String> = text.lines().map(clean_line).collect();
    let lowered: Vec<String> = lines.iter().map(|l| l.to_lowercase()).collect();

    let headers = [
        find_header(&lowered, |l| l.contains(SESSION_HEADER)),
        find_header(&lowered, |l| l.contains(WEEKLY_HEADER)),
        find_header(&lowered, |l| MODEL_HEADERS.iter().any(|h| l.contains(h))),
    ];
    let mut slots = headers.map(|header| header.and_then(|idx| section_percent(&lines, &lowered, idx)));

    // The model window is optional, so it is only filled by position when
    // the screen carries no headers at all.
    let positional = if headers.iter().all(Option::is_none) { 3 } else { 2 };
    fill_by_position(&lines, &mut slots, positional);

    let [primary, secondary, tertiary] = slots.map(|slot| slot.and_then(|(idx, end)| window_at(&lines, idx, end, now)));

    let Some(primary) = primary else {
        return Err(ClaudeError::Parse(
            "no percentage under `Current session` in /usage output".to_string(),
        ));
    };
    let Some(secondary) = secondary else {
        return Err(ClaudeError::Parse(
            "no percentage under `Current week (all models)` in /usage output".to_string(),
        ));
    };

    Ok(ClaudeUsage {
        primary: primary.with_window_minutes(SESSION_WINDOW_MINUTES),
        secondary: secondary.with_window_minutes(WEEKLY_WINDOW_MINUTES),
        tertiary: tertiary.map(|w| w.with_window_minutes(WEEKLY_WINDOW_MINUTES)),
    })
}

fn clean_line(line: &str) -> String {
    line.trim().trim_matches(['│', '|']).trim().to_string()
}

fn find_header(lowered: &[String], matches: impl Fn(&str) -> bool) -> Option<usize> {
    lowered.iter().position(|l| matches(l.as_str()))
}

fn is_header(lowered: &str) -> bool {
    lowered.starts_with("current session") || lowered.starts_with("current week")
}

/// Searches the header line and up to [`SECTION_WINDOW`] lines below it,
/// stopping at the next header. Returns the percent line and the section end.
fn section_percent(lines: &[String], lowered: &[String], header: usize) -> Option<(usize, usize)> {
    let mut end = (header + 1 + SECTION_WINDOW).min(lines.len());
    if let Some(next) = (header + 1..end).find(|&i| is_header(&lowered[i])) {
        end = next;
    }
    let percent_idx = (header..end).find(|&i| percent_from_line(&lines[i]).is_some())?;
    Some((percent_idx, end))
}

/// Fills the first `count` empty slots from percent lines in screen order.
///
/// A filled slot takes a line below every earlier slot and above every later
/// one, so a matched section's percent is never reused.
fn fill_by_position(lines: &[String], slots: &mut [Option<(usize, usize)>; 3], count: usize) {
    let percents: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| percent_from_line(line).is_some())
        .map(|(idx, _)| idx)
        .collect();

    for slot in 0..count.min(slots.len()) {
        if slots[slot].is_some() {
            continue;
        }
        let after = slots[..slot].iter().flatten().map(|(idx, _)| *idx).max();
        let before = slots[slot + 1..].iter().flatten().map(|(idx, _)| *idx).min();
        let Some(idx) = percents
            .iter()
            .copied()
            .find(|&i| after.is_none_or(|a| i > a) && before.is_none_or(|b| i < b))
        else {
            continue;
        };
        let end = percents
            .iter()
            .copied()
            .find(|&i| i > idx)
            .unwrap_or(lines.len())
            .min(idx + 1 + SECTION_WINDOW);
        debug!(slot, line = idx, "Window taken from percent line order");
        slots[slot] = Some((idx, end));
    }
}

/// Builds the window for the percent on `lines[idx]`, reading a reset line
/// from `idx..end`.
fn window_at(lines: &[String], idx: usize, end: usize, now: &DateTime<Local>) -> Option<RateWindow> {
    let remaining = percent_from_line(&lines[idx])?;
    let window = RateWindow::from_remaining(f64::from(remaining));
    let end = end.max(idx + 1).min(lines.len());
    let reset = lines[idx..end]
        .iter()
        .find_map(|line| reset_string(line));
    Some(match reset {
        Some(text) => match parse_reset_date(&text, now) {
            Some(at) => window.with_resets_at(at.with_timezone(&Utc)),
            None => window.with_reset_description(text),
        },
        None => window,
    })
}

// ============================================================================
// Error Blobs
// ============================================================================

/// Decodes an embedded API error such as
/// `API Error: 401 {"type":"error","error":{"type":"authentication_error",...}}`.
fn error_from_blob(text: &str) -> Option<ClaudeError> {
    let value = text
        .match_indices('{')
        .filter_map(|(idx, _)| {
            serde_json::Deserializer::from_str(&text[idx..])
                .into_iter::<Value>()
                .next()
                .and_then(Result::ok)
        })
        .find(|v| v.get("error").is_some() || v.get("error_code").is_some())?;

    let expired = find_str(&value, "error_code") == Some("token_expired");
    let auth = find_str(&value, "type") == Some("authentication_error");
    let message = find_str(&value, "message").unwrap_or("unknown error").to_string();

    if expired || auth {
        warn!(message = %message, "Claude session rejected");
        return Some(ClaudeError::LoginRequired(format!(
            "{message}; run `claude` and use /login to re-authenticate"
        )));
    }
    Some(ClaudeError::Api(message))
}

/// Depth-first search for a string field. The nested `error` object wins
/// over the envelope, so `{"type":"error","error":{"type":"x"}}` yields `x`.
fn find_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    let Value::Object(map) = value else {
        return None;
    };
    map.values()
        .find_map(|child| find_str(child, key))
        .or_else(|| map.get(key).and_then(Value::as_str))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 1, 3, 10, 0, 0).unwrap()
    }

    const USAGE: &str = "\x1b[1m Settings: Status  Config  Usage \x1b[0m

 Current session
 \x1b[34m███████▌\x1b[0m                                  15% used
 Resets 2pm (America/Los_Angeles)

 Current week (all models)
 ██████████████▌                           29% used
 Resets Jan 5 at 12am (America/Los_Angeles)

 Current week (Opus)
                                           0% used
";

    #[test]
    fn test_parse_full_screen() {
        let usage = parse_usage_output(USAGE, &now()).unwrap();

        assert!((usage.primary.used_percent() - 15.0).abs() < f64::EPSILON);
        assert_eq!(usage.primary.window_minutes, Some(300));
        let expected = Local.with_ymd_and_hms(2025, 1, 3, 14, 0, 0).unwrap();
        assert_eq!(usage.primary.resets_at(), Some(expected.with_timezone(&Utc)));

        assert!((usage.secondary.used_percent() - 29.0).abs() < f64::EPSILON);
        let expected = Local.with_ymd_and_hms(2025, 1, 5, 0, 0, 0).unwrap();
        assert_eq!(usage.secondary.resets_at(), Some(expected.with_timezone(&Utc)));

        let tertiary = usage.tertiary.unwrap();
        assert!(tertiary.used_percent().abs() < f64::EPSILON);
        assert!(tertiary.resets_at().is_none());
    }

    #[test]
    fn test_missing_weekly_is_parse_failure() {
        let err = parse_usage_output("Current session\n 15% used\n", &now()).unwrap_err();
        assert!(matches!(err, ClaudeError::Parse(ref m) if m.contains("Current week")));
    }

    #[test]
    fn test_missing_session_is_parse_failure() {
        let err = parse_usage_output("Current week (all models)\n 29% used\n", &now()).unwrap_err();
        assert!(matches!(err, ClaudeError::Parse(ref m) if m.contains("Current session")));
    }

    #[test]
    fn test_percent_does_not_leak_across_sections() {
        let text = "Current session\n(no data)\nCurrent week (all models)\n 29% used\n";
        assert!(matches!(parse_usage_output(text, &now()), Err(ClaudeError::Parse(_))));
    }

    #[test]
    fn test_header_search_is_bounded() {
        let mut text = String::from("Current session\n");
        for _ in 0..SECTION_WINDOW {
            text.push_str("...\n");
        }
        text.push_str("15% used\n");
        let lines: Vec<String> = text.lines().map(clean_line).collect();
        let lowered: Vec<String> = lines.iter().map(|l| l.to_lowercase()).collect();
        assert_eq!(section_percent(&lines, &lowered, 0), None);
    }

    #[test]
    fn test_drifted_weekly_header_uses_next_percent() {
        let text = "Current session\n 15% used\n Resets 2pm\n\nCurrent week (all)\n 29% used\n Resets Jan 5 at 12am (America/Los_Angeles)\n";
        let usage = parse_usage_output(text, &now()).unwrap();
        assert!((usage.primary.used_percent() - 15.0).abs() < f64::EPSILON);
        assert!((usage.secondary.used_percent() - 29.0).abs() < f64::EPSILON);
        let expected = Local.with_ymd_and_hms(2025, 1, 5, 0, 0, 0).unwrap();
        assert_eq!(usage.secondary.resets_at(), Some(expected.with_timezone(&Utc)));
        assert!(usage.tertiary.is_none());
    }

    #[test]
    fn test_drifted_session_header_stays_above_weekly() {
        let text = "Session (5h)\n 40% used\nCurrent week (all models)\n 29% used\nExtra usage\n 5% used\n";
        let usage = parse_usage_output(text, &now()).unwrap();
        assert!((usage.primary.used_percent() - 40.0).abs() < f64::EPSILON);
        assert!((usage.secondary.used_percent() - 29.0).abs() < f64::EPSILON);
        assert!(usage.tertiary.is_none());
    }

    #[test]
    fn test_fallback_without_headers() {
        let text = "Usage\n10% used\nResets 3pm\n20% used\n30% left\n40% used\n";
        let usage = parse_usage_output(text, &now()).unwrap();
        assert!((usage.primary.used_percent() - 10.0).abs() < f64::EPSILON);
        assert!((usage.secondary.used_percent() - 20.0).abs() < f64::EPSILON);
        assert!((usage.tertiary.unwrap().used_percent() - 70.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_token_expired_is_login_required() {
        let text = r#"API Error: 401 {"type":"error","error":{"type":"invalid_request_error","message":"OAuth token has expired","details":{"error_code":"token_expired"}}}"#;
        let err = parse_usage_output(text, &now()).unwrap_err();
        assert!(matches!(err, ClaudeError::LoginRequired(ref m) if m.contains("/login")));
    }

    #[test]
    fn test_authentication_error_is_login_required() {
        let text = r#"⎿ API Error: {"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
        let err = parse_usage_output(text, &now()).unwrap_err();
        assert!(matches!(err, ClaudeError::LoginRequired(_)));
    }

    #[test]
    fn test_other_api_error() {
        let text = r#"API Error: 529 {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let err = parse_usage_output(text, &now()).unwrap_err();
        assert!(matches!(err, ClaudeError::Api(ref m) if m == "Overloaded"));
    }
}
