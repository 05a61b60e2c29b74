//! OpenAI web dashboard enrichment.
//!
//! Reads the Codex usage the ChatGPT web app shows, using browser cookies
//! that are signed in as the expected account. The flow:
//!
//! 1. Resolve cookies for `chatgpt.com` (override, stored session, browsers)
//! 2. `GET /api/auth/session` to learn the signed-in email and access token
//! 3. `GET /backend-api/wham/usage` with the token
//!
//! A session signed in as another account is never used; the probe fails
//! with [`ProbeError::AccountMismatch`] and leaves stored cookies alone.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, instrument};
use usagebar_core::{OpenAIDashboardSnapshot, RateWindow, text::parse_localized_number};
use usagebar_fetch::host::web_session::resolve_account_cookies;
use usagebar_fetch::{HttpClient, ProbeContext, ProbeError, RequestAuth, SecretSpec};

/// Cookie domain.
pub const CHATGPT_DOMAIN: &str = "chatgpt.com";

/// Environment override holding a raw `Cookie:` header.
pub const OPENAI_COOKIE_ENV: &str = "OPENAI_COOKIE";

const SESSION_URL: &str = "https://chatgpt.com/api/auth/session";
const USAGE_URL: &str = "https://chatgpt.com/backend-api/wham/usage";

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthSession {
    #[serde(default)]
    user: Option<SessionUser>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionUser {
    #[serde(default)]
    email: Option<String>,
}

/// Signed-in user behind a cookie header.
#[derive(Clone, PartialEq, Eq)]
struct SignedInUser {
    email: String,
    access_token: String,
}

impl std::fmt::Debug for SignedInUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedInUser")
            .field("email", &self.email)
            .field("access_token", &format_args!("<{} bytes>", self.access_token.len()))
            .finish()
    }
}

/// `wham/usage` response.
#[derive(Debug, Default, Deserialize)]
pub struct WhamUsage {
    /// Rate limit windows.
    #[serde(default)]
    pub rate_limit: Option<WhamRateLimit>,
    /// Credit balance.
    #[serde(default)]
    pub credits: Option<WhamCredits>,
}

/// Rate limit block.
#[derive(Debug, Default, Deserialize)]
pub struct WhamRateLimit {
    /// Session window.
    #[serde(default)]
    pub primary_window: Option<WhamWindow>,
    /// Weekly window.
    #[serde(default)]
    pub secondary_window: Option<WhamWindow>,
}

/// One window.
#[derive(Debug, Deserialize)]
pub struct WhamWindow {
    /// Percent used.
    pub used_percent: f64,
    /// Window length in seconds.
    #[serde(default)]
    pub limit_window_seconds: Option<u64>,
    /// Reset time, epoch seconds.
    #[serde(default)]
    pub reset_at: Option<i64>,
}

/// Credits block. The balance arrives as a number or a string.
#[derive(Debug, Default, Deserialize)]
pub struct WhamCredits {
    /// Remaining balance.
    #[serde(default)]
    pub balance: Option<serde_json::Value>,
}

// ============================================================================
// Conversion
// ============================================================================

fn signed_in_user(session: AuthSession) -> Result<SignedInUser, ProbeError> {
    let email = session
        .user
        .and_then(|u| u.email)
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());
    let token = session.access_token.filter(|t| !t.is_empty());
    match (email, token) {
        (Some(email), Some(access_token)) => Ok(SignedInUser { email, access_token }),
        _ => Err(ProbeError::LoginRequired(
            "chatgpt.com session is not signed in".to_string(),
        )),
    }
}

fn window_from_wham(window: &WhamWindow) -> RateWindow {
    let mut result = RateWindow::new(window.used_percent);
    if let Some(minutes) = window
        .limit_window_seconds
        .and_then(|secs| u32::try_from(secs / 60).ok())
    {
        result = result.with_window_minutes(minutes);
    }
    if let Some(at) = window.reset_at.and_then(|secs| DateTime::from_timestamp(secs, 0)) {
        result = result.with_resets_at(at);
    }
    result
}

fn balance_from_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => parse_localized_number(s.trim()),
        _ => None,
    }
}

/// Builds the dashboard snapshot for `email`.
///
/// Fails with [`ProbeError::ParseFailed`] when the page carried no windows.
pub fn dashboard_from_usage(email: String, usage: &WhamUsage) -> Result<OpenAIDashboardSnapshot, ProbeError> {
    let (primary, secondary) = match &usage.rate_limit {
        Some(limits) => (
            limits.primary_window.as_ref().map(window_from_wham),
            limits.secondary_window.as_ref().map(window_from_wham),
        ),
        None => (None, None),
    };
    let credits_remaining = usage
        .credits
        .as_ref()
        .and_then(|c| c.balance.as_ref())
        .and_then(balance_from_value);

    if primary.is_none() && secondary.is_none() && credits_remaining.is_none() {
        return Err(ProbeError::ParseFailed(
            "OpenAI dashboard returned no usage data".to_string(),
        ));
    }

    Ok(OpenAIDashboardSnapshot {
        signed_in_email: email,
        primary,
        secondary,
        credits_remaining,
        updated_at: Utc::now(),
    })
}

// ============================================================================
// Fetching
// ============================================================================

async fn fetch_signed_in_user(http: &HttpClient, cookie_header: String) -> Result<SignedInUser, ProbeError> {
    let session: AuthSession = http
        .get_json(SESSION_URL, &RequestAuth::Cookies(cookie_header))
        .await?;
    signed_in_user(session)
}

/// Reads the dashboard signed in as `expected`.
///
/// With no expected account, the first signed-in session is used.
#[instrument(skip(ctx))]
pub async fn fetch_dashboard(ctx: &ProbeContext, expected: Option<&str>) -> Result<OpenAIDashboardSnapshot, ProbeError> {
    let session = ctx.web_sessions.with_account(expected).await;
    let override_secret = ctx
        .credentials
        .resolve(&SecretSpec::new(OPENAI_COOKIE_ENV, "codex", "chatgpt-cookie"))
        .await;

    let http = &ctx.http;
    let identified: Mutex<Vec<SignedInUser>> = Mutex::new(Vec::new());
    let identified_ref = &identified;
    let resolution = resolve_account_cookies(&session, CHATGPT_DOMAIN, override_secret, &ctx.browser, |header| async move {
        fetch_signed_in_user(http, header).await.map(|user| {
            let email = user.email.clone();
            identified_ref.lock().unwrap_or_else(PoisonError::into_inner).push(user);
            email
        })
    })
    .await?;
    debug!(origin = ?resolution.origin, email = %resolution.signed_in_email, "Resolved chatgpt.com session");

    let user = identified
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
        .into_iter()
        .rev()
        .find(|u| u.email == resolution.signed_in_email)
        .ok_or_else(|| ProbeError::Unexpected("resolved chatgpt.com session has no access token".to_string()))?;

    let usage: WhamUsage = http
        .get_json(USAGE_URL, &RequestAuth::Bearer(user.access_token))
        .await?;
    let dashboard = dashboard_from_usage(user.email, &usage)?;
    info!(email = %dashboard.signed_in_email, "Read OpenAI dashboard");
    Ok(dashboard)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_in_user() {
        let session: AuthSession = serde_json::from_str(
            r#"{"user":{"email":" dev@example.com "},"accessToken":"tok","expires":"2030-01-01"}"#,
        )
        .unwrap();
        let user = signed_in_user(session).unwrap();
        assert_eq!(user.email, "dev@example.com");
        assert!(!format!("{user:?}").contains("tok\""));
    }

    #[test]
    fn test_signed_out_session() {
        let session: AuthSession = serde_json::from_str("{}").unwrap();
        assert!(matches!(signed_in_user(session), Err(ProbeError::LoginRequired(_))));
    }

    #[test]
    fn test_dashboard_from_usage() {
        let usage: WhamUsage = serde_json::from_str(
            r#"{
                "plan_type": "pro",
                "rate_limit": {
                    "primary_window": {"used_percent": 12.5, "limit_window_seconds": 18000, "reset_at": 1735000000},
                    "secondary_window": {"used_percent": 40, "limit_window_seconds": 604800}
                },
                "credits": {"has_credits": true, "balance": "1,250.5"}
            }"#,
        )
        .unwrap();

        let dashboard = dashboard_from_usage("dev@example.com".into(), &usage).unwrap();
        let primary = dashboard.primary.unwrap();
        assert!((primary.used_percent() - 12.5).abs() < f64::EPSILON);
        assert_eq!(primary.window_minutes, Some(300));
        assert_eq!(primary.resets_at().unwrap().timestamp(), 1_735_000_000);
        assert_eq!(dashboard.secondary.unwrap().window_minutes, Some(10_080));
        assert_eq!(dashboard.credits_remaining, Some(1250.5));
    }

    #[test]
    fn test_numeric_balance() {
        let usage: WhamUsage = serde_json::from_str(r#"{"credits":{"balance":7}}"#).unwrap();
        let dashboard = dashboard_from_usage("a@x.com".into(), &usage).unwrap();
        assert_eq!(dashboard.credits_remaining, Some(7.0));
        assert!(dashboard.primary.is_none());
    }

    #[test]
    fn test_empty_usage_is_parse_failure() {
        let err = dashboard_from_usage("a@x.com".into(), &WhamUsage::default()).unwrap_err();
        assert_eq!(err.kind(), "parse_failed");
    }
}
