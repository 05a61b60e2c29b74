//! claude.ai web usage with browser cookies.
//!
//! `/api/account` names the signed-in user, `/api/organizations` lists the
//! orgs and `/api/organizations/{uuid}/usage` returns utilization per
//! window. Cookies are only accepted when they are signed in as the
//! account the CLI uses.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, instrument};
use usagebar_core::{LoginMethod, ProviderIdentitySnapshot, ProviderKind, RateWindow};
use usagebar_fetch::host::web_session::resolve_account_cookies;
use usagebar_fetch::{HttpClient, ProbeContext, ProbeError, RequestAuth, SecretSpec};

use super::error::ClaudeError;
use super::parser::{ClaudeUsage, SESSION_WINDOW_MINUTES, WEEKLY_WINDOW_MINUTES};

/// Cookie domain.
pub const CLAUDE_DOMAIN: &str = "claude.ai";

/// Environment override holding a raw `Cookie:` header.
pub const CLAUDE_COOKIE_ENV: &str = "CLAUDE_COOKIE";

const API_BASE: &str = "https://claude.ai/api";

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct Account {
    #[serde(alias = "email", default)]
    email_address: Option<String>,
}

/// An organization the user belongs to.
#[derive(Debug, Clone, Deserialize)]
pub struct Organization {
    /// Organization id.
    pub uuid: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Capability flags such as `chat` or `claude_max`.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// `/usage` response.
#[derive(Debug, Default, Deserialize)]
pub struct WebUsage {
    /// Session window.
    #[serde(default)]
    pub five_hour: Option<WebWindow>,
    /// Weekly window.
    #[serde(default)]
    pub seven_day: Option<WebWindow>,
    /// Weekly Opus window.
    #[serde(default)]
    pub seven_day_opus: Option<WebWindow>,
    /// Weekly Sonnet window.
    #[serde(default)]
    pub seven_day_sonnet: Option<WebWindow>,
}

/// One window.
#[derive(Debug, Deserialize)]
pub struct WebWindow {
    /// Percent used.
    pub utilization: f64,
    /// Reset time.
    #[serde(default)]
    pub resets_at: Option<DateTime<Utc>>,
}

/// Usage and identity read from claude.ai.
#[derive(Debug, Clone)]
pub struct ClaudeWebResult {
    /// Windows.
    pub usage: ClaudeUsage,
    /// Signed-in identity.
    pub identity: ProviderIdentitySnapshot,
}

// ============================================================================
// Conversion
// ============================================================================

fn window_from_web(window: &WebWindow, minutes: u32) -> RateWindow {
    let result = RateWindow::new(window.utilization).with_window_minutes(minutes);
    match window.resets_at {
        Some(at) => result.with_resets_at(at),
        None => result,
    }
}

/// Converts the usage response. Session and weekly windows are required.
pub fn usage_from_web(usage: &WebUsage) -> Result<ClaudeUsage, ClaudeError> {
    let primary = usage
        .five_hour
        .as_ref()
        .map(|w| window_from_web(w, SESSION_WINDOW_MINUTES))
        .ok_or_else(|| ClaudeError::Parse("claude.ai usage has no five_hour window".to_string()))?;
    let secondary = usage
        .seven_day
        .as_ref()
        .map(|w| window_from_web(w, WEEKLY_WINDOW_MINUTES))
        .ok_or_else(|| ClaudeError::Parse("claude.ai usage has no seven_day window".to_string()))?;
    let tertiary = usage
        .seven_day_opus
        .as_ref()
        .or(usage.seven_day_sonnet.as_ref())
        .map(|w| window_from_web(w, WEEKLY_WINDOW_MINUTES));

    Ok(ClaudeUsage {
        primary,
        secondary,
        tertiary,
    })
}

/// Picks the chat organization, or the first one.
pub fn pick_organization(orgs: &[Organization]) -> Option<&Organization> {
    orgs.iter()
        .find(|o| o.capabilities.iter().any(|c| c == "chat"))
        .or_else(|| orgs.first())
}

fn plan_from_capabilities(capabilities: &[String]) -> Option<String> {
    let has = |cap: &str| capabilities.iter().any(|c| c == cap);
    if has("claude_max") {
        Some("Max".to_string())
    } else if has("claude_pro") {
        Some("Pro".to_string())
    } else if has("raven") {
        Some("Team".to_string())
    } else {
        None
    }
}

// ============================================================================
// Fetching
// ============================================================================

async fn fetch_account_email(http: &HttpClient, cookie_header: String) -> Result<String, ProbeError> {
    let account: Account = http
        .get_json(&format!("{API_BASE}/account"), &RequestAuth::Cookies(cookie_header))
        .await?;
    account
        .email_address
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ProbeError::LoginRequired("claude.ai session is not signed in".to_string()))
}

/// Reads usage from claude.ai, signed in as `expected_email` when given.
#[instrument(skip(ctx))]
pub async fn fetch_web(ctx: &ProbeContext, expected_email: Option<&str>) -> Result<ClaudeWebResult, ClaudeError> {
    let session = ctx.web_sessions.with_account(expected_email).await;
    let override_secret = ctx
        .credentials
        .resolve(&SecretSpec::new(CLAUDE_COOKIE_ENV, "claude", "claude-ai-cookie"))
        .await;

    let http = &ctx.http;
    let resolution = resolve_account_cookies(&session, CLAUDE_DOMAIN, override_secret, &ctx.browser, |header| async move {
        fetch_account_email(http, header).await
    })
    .await
    .map_err(ProbeError::from)?;
    debug!(origin = ?resolution.origin, "Resolved claude.ai session");

    let auth = RequestAuth::Cookies(resolution.header);
    let orgs: Vec<Organization> = http
        .get_json(&format!("{API_BASE}/organizations"), &auth)
        .await
        .map_err(ProbeError::from)?;
    let org = pick_organization(&orgs)
        .ok_or_else(|| ClaudeError::Parse("claude.ai account has no organizations".to_string()))?;

    let usage: WebUsage = http
        .get_json(&format!("{API_BASE}/organizations/{}/usage", org.uuid), &auth)
        .await
        .map_err(ProbeError::from)?;

    let mut identity = ProviderIdentitySnapshot::new(ProviderKind::Claude)
        .with_email(resolution.signed_in_email)
        .with_login_method(LoginMethod::BrowserCookies);
    identity.account_organization.clone_from(&org.name);
    identity.plan_name = plan_from_capabilities(&org.capabilities);

    Ok(ClaudeWebResult {
        usage: usage_from_web(&usage)?,
        identity,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_from_web() {
        let usage: WebUsage = serde_json::from_str(
            r#"{
                "five_hour": {"utilization": 31.0, "resets_at": "2025-01-03T15:00:00.123+00:00"},
                "seven_day": {"utilization": 12.5, "resets_at": null},
                "seven_day_opus": {"utilization": 3.0}
            }"#,
        )
        .unwrap();
        let usage = usage_from_web(&usage).unwrap();
        assert!((usage.primary.used_percent() - 31.0).abs() < f64::EPSILON);
        assert_eq!(usage.primary.window_minutes, Some(300));
        assert!(usage.primary.resets_at().is_some());
        assert!(usage.secondary.resets_at().is_none());
        assert!((usage.tertiary.unwrap().used_percent() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_weekly_window() {
        let usage: WebUsage = serde_json::from_str(r#"{"five_hour": {"utilization": 1}}"#).unwrap();
        assert!(matches!(usage_from_web(&usage), Err(ClaudeError::Parse(_))));
    }

    #[test]
    fn test_pick_organization() {
        let orgs: Vec<Organization> = serde_json::from_str(
            r#"[{"uuid":"api","name":"API","capabilities":["api"]},
                {"uuid":"chat","name":"Personal","capabilities":["chat","claude_max"]}]"#,
        )
        .unwrap();
        let org = pick_organization(&orgs).unwrap();
        assert_eq!(org.uuid, "chat");
        assert_eq!(plan_from_capabilities(&org.capabilities).as_deref(), Some("Max"));
        assert!(pick_organization(&[]).is_none());
    }
}
