//! Text normalization helpers shared by every scraper.
//!
//! Upstream CLIs and dashboards change their wording, colors and number
//! formatting without notice. These helpers are deliberately tolerant:
//!
//! - [`strip_ansi`] - remove terminal escape sequences
//! - [`first_number`] - extract a number with locale-ambiguous separators
//! - [`percent_from_line`] - read `NN% used` / `NN% left`
//! - [`reset_string`] - keep the free text after a "resets" marker
//! - [`parse_reset_date`] - resolve a reset description into an absolute time

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use regex::Regex;

// ============================================================================
// ANSI
// ============================================================================

/// CSI sequences, OSC sequences, and any stray ESC byte.
static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B(?:\[[0-?]*[ -/]*[@-~]|\][^\x07\x1B]*(?:\x07|\x1B\\)?)?")
        .expect("Invalid regex")
});

/// Removes ANSI escape sequences in a single regex pass.
///
/// Every ESC byte is consumed, with or without a well-formed sequence after
/// it, so the output never contains ESC and a second pass is a no-op.
pub fn strip_ansi(text: &str) -> String {
    ANSI_RE.replace_all(text, "").into_owned()
}

// ============================================================================
// Numbers
// ============================================================================

static COMMA_GROUPING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}(,\d{3})+$").expect("Invalid regex"));

static DOT_GROUPING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}(\.\d{3})+$").expect("Invalid regex"));

/// Extracts the first capture group of `pattern` from `text` as a number.
///
/// Separator policy:
/// - both `,` and `.` present: the later one is the decimal point, the
///   earlier one a thousands separator;
/// - one kind present and the digits have the grouping shape
///   (`1,234,567` or `1.234.567`): the separator is stripped;
/// - otherwise the single separator is the decimal point.
///
/// Falls back to the whole match when the pattern has no capture group.
pub fn first_number(pattern: &Regex, text: &str) -> Option<f64> {
    let caps = pattern.captures(text)?;
    let raw = caps.get(1).or_else(|| caps.get(0))?.as_str();
    parse_localized_number(raw)
}

/// Parses a number string using the separator policy of [`first_number`].
pub fn parse_localized_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '+' && *c != '$')
        .collect();
    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.as_str()),
    };
    if digits.is_empty() {
        return None;
    }

    let last_comma = digits.rfind(',');
    let last_dot = digits.rfind('.');

    let normalized = match (last_comma, last_dot) {
        (Some(comma), Some(dot)) => {
            if comma > dot {
                digits.replace('.', "").replace(',', ".")
            } else {
                digits.replace(',', "")
            }
        }
        (Some(_), None) => {
            if COMMA_GROUPING_RE.is_match(digits) {
                digits.replace(',', "")
            } else {
                digits.replace(',', ".")
            }
        }
        (None, Some(_)) => {
            if DOT_GROUPING_RE.is_match(digits) {
                digits.replace('.', "")
            } else {
                digits.to_string()
            }
        }
        (None, None) => digits.to_string(),
    };

    let value: f64 = normalized.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value } else { value })
}

// ============================================================================
// Percent Lines
// ============================================================================

/// `72% left`, `28 % used`, `45\u{202F}% remaining`. `\s` is Unicode-aware.
static PERCENT_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{1,3}(?:[.,]\d+)?)\s*%\s*(used|left|remaining)").expect("Invalid regex")
});

/// Reads a percent-remaining value from a line.
///
/// `NN% left` returns `NN`; `NN% used` returns `100 - NN`.
pub fn percent_from_line(line: &str) -> Option<i32> {
    let caps = PERCENT_LINE_RE.captures(line)?;
    let value = parse_localized_number(caps.get(1)?.as_str())?.clamp(0.0, 100.0);
    let kind = caps.get(2)?.as_str().to_ascii_lowercase();
    let remaining = if kind == "used" { 100.0 - value } else { value };
    #[allow(clippy::cast_possible_truncation)]
    let percent = remaining.round() as i32;
    Some(percent)
}

// ============================================================================
// Reset Descriptions
// ============================================================================

static RESET_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bresets?\b[:\s]*(.*)$").expect("Invalid regex"));

/// Returns the free text after a `reset`/`resets` marker, trimmed.
pub fn reset_string(line: &str) -> Option<String> {
    let caps = RESET_MARKER_RE.captures(line)?;
    let rest = caps
        .get(1)?
        .as_str()
        .trim()
        .trim_end_matches(')')
        .trim_start_matches('(')
        .trim();
    // A dangling "(" from a parenthetical such as "(resets 14:00)".
    let rest = if rest.matches('(').count() > rest.matches(')').count() {
        format!("{rest})")
    } else {
        rest.to_string()
    };
    if rest.is_empty() { None } else { Some(rest) }
}

static TRAILING_PAREN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([^)]*\)\s*$").expect("Invalid regex"));

static RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^in\s+(?:(?P<d>\d+)\s*d(?:ays?)?)?\s*(?:(?P<h>\d+)\s*h(?:(?:ou)?rs?)?)?\s*(?:(?P<m>\d+)\s*m(?:in(?:ute)?s?)?)?$",
    )
    .expect("Invalid regex")
});

/// `jan 5 3pm`, `january 5 3:30pm`, `jan 5`.
static MONTH_DAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<mon>[a-z]{3})[a-z]*\.?\s+(?P<day>\d{1,2})(?:st|nd|rd|th)?(?:\s+(?P<time>.+))?$")
        .expect("Invalid regex")
});

/// `19:32 on 12 jan`, `3pm on jan 12`.
static TIME_ON_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<time>.+?)\s+on\s+(?P<date>.+)$").expect("Invalid regex")
});

static DAY_MONTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<day>\d{1,2})(?:st|nd|rd|th)?\s+(?P<mon>[a-z]{3})[a-z]*\.?$")
        .expect("Invalid regex")
});

static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<h>\d{1,2})(?::(?P<m>\d{2}))?\s*(?P<ampm>am|pm|a\.m\.|p\.m\.)?$")
        .expect("Invalid regex")
});

/// Resolves a reset description into an absolute time in `now`'s timezone.
///
/// Accepted shapes (case-insensitive, optional leading "resets"/"at"/"on",
/// optional trailing parenthetical timezone which is ignored):
///
/// - RFC 3339 timestamps
/// - relative: `in 2h 30m`, `in 3 days`
/// - date and time: `Jan 5 at 3pm`, `Jan 5, 3:30pm`, `19:32 on 12 Jan`
/// - date only: `Jan 5` (midnight)
/// - time only: `3pm`, `3:30pm`, `15:30`
///
/// A time-only value is anchored to `now`'s date; if that moment is already
/// in the past it rolls forward one day. A month/day without a year takes
/// `now`'s year, or the next year when that date is more than a day past.
pub fn parse_reset_date<Tz: TimeZone>(text: &str, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let tz = now.timezone();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text.trim()) {
        return Some(parsed.with_timezone(&tz));
    }

    let cleaned = normalize_reset_text(text);
    if cleaned.is_empty() {
        return None;
    }

    if let Some(caps) = RELATIVE_RE.captures(&cleaned) {
        let part = |name: &str| -> i64 {
            caps.name(name)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0)
        };
        let total = Duration::days(part("d")) + Duration::hours(part("h")) + Duration::minutes(part("m"));
        if total > Duration::zero() {
            return Some(now.clone() + total);
        }
        return None;
    }

    if let Some(caps) = TIME_ON_DATE_RE.captures(&cleaned) {
        let time = parse_time(&caps["time"])?;
        let date = parse_month_day(&caps["date"], now)?;
        return localize(&tz, date.and_time(time));
    }

    if let Some(caps) = MONTH_DAY_RE.captures(&cleaned) {
        let month = month_number(&caps["mon"])?;
        let day: u32 = caps["day"].parse().ok()?;
        let date = resolve_year(month, day, now)?;
        let time = match caps.name("time") {
            Some(t) => parse_time(t.as_str())?,
            None => NaiveTime::MIN,
        };
        return localize(&tz, date.and_time(time));
    }

    let time = parse_time(&cleaned)?;
    let anchored = localize(&tz, now.date_naive().and_time(time))?;
    if anchored < *now {
        localize(&tz, (now.date_naive() + Duration::days(1)).and_time(time))
    } else {
        Some(anchored)
    }
}

fn normalize_reset_text(text: &str) -> String {
    let lowered = text.trim().to_lowercase();
    let without_tz = TRAILING_PAREN_RE.replace(&lowered, "");
    let mut cleaned = without_tz.replace(',', " ");
    for prefix in ["resets", "reset", "at", "on"] {
        if let Some(rest) = cleaned.trim_start().strip_prefix(prefix) {
            if rest.starts_with(char::is_whitespace) || rest.starts_with(':') {
                cleaned = rest.trim_start_matches(':').to_string();
            }
        }
    }
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.replace(" at ", " ")
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    let caps = TIME_RE.captures(text.trim())?;
    let mut hour: u32 = caps["h"].parse().ok()?;
    let minute: u32 = match caps.name("m") {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    match caps.name("ampm").map(|m| m.as_str().replace('.', "")) {
        Some(marker) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            hour %= 12;
            if marker == "pm" {
                hour += 12;
            }
        }
        // A bare "3" is too ambiguous; 24h values need minutes.
        None if caps.name("m").is_none() => return None,
        None => {}
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn parse_month_day<Tz: TimeZone>(text: &str, now: &DateTime<Tz>) -> Option<NaiveDate> {
    if let Some(caps) = DAY_MONTH_RE.captures(text) {
        return resolve_year(month_number(&caps["mon"])?, caps["day"].parse().ok()?, now);
    }
    let caps = MONTH_DAY_RE.captures(text)?;
    if caps.name("time").is_some() {
        return None;
    }
    resolve_year(month_number(&caps["mon"])?, caps["day"].parse().ok()?, now)
}

fn resolve_year<Tz: TimeZone>(month: u32, day: u32, now: &DateTime<Tz>) -> Option<NaiveDate> {
    let today = now.date_naive();
    let candidate = NaiveDate::from_ymd_opt(today.year(), month, day)?;
    if candidate < today - Duration::days(1) {
        NaiveDate::from_ymd_opt(today.year() + 1, month, day)
    } else {
        Some(candidate)
    }
}

fn month_number(abbrev: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let prefix = abbrev.get(..3)?;
    MONTHS
        .iter()
        .position(|m| *m == prefix)
        .and_then(|i| u32::try_from(i + 1).ok())
}

fn localize<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&naive).earliest()
}

// ============================================================================
// Tests
// ============================================================================
