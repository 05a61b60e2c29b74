//! Gemini local credentials and quota probe.
//!
//! Reads OAuth credentials written by the Gemini CLI, refreshes an expired
//! access token and asks the Cloud Code Private API for per-model quota
//! buckets.
//!
//! ## Config Files
//!
//! - `~/.gemini/oauth_creds.json` - OAuth credentials (access/refresh tokens)
//! - `~/.gemini/settings.json` - Auth type settings
//!
//! ## Auth Types
//!
//! - `oauth-personal` - Personal OAuth (supported)
//! - `api-key` - API key (no quota endpoint)
//! - `vertex-ai` - Vertex AI (use the Vertex AI provider)

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use usagebar_core::{LoginMethod, ProviderIdentitySnapshot, ProviderKind, RateWindow};
use usagebar_fetch::{ProbeContext, RequestAuth};

use super::error::GeminiError;
use crate::google_oauth::refresh_access_token;

/// Gemini CLI config directory under home.
const GEMINI_DIR: &str = ".gemini";

/// Cloud Code Private API endpoint for quota retrieval.
const QUOTA_ENDPOINT: &str = "https://cloudcode-pa.googleapis.com/v1internal:retrieveUserQuota";

/// Daily quota window.
const QUOTA_WINDOW_MINUTES: u32 = 1440;

// ============================================================================
// Auth Types
// ============================================================================

/// Gemini authentication type (from settings.json).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeminiAuthType {
    /// Personal OAuth.
    OAuthPersonal,
    /// API key.
    ApiKey,
    /// Vertex AI.
    VertexAI,
    /// Unknown or not set.
    Unknown,
}

impl GeminiAuthType {
    /// Parses `security.auth.selectedType` from settings content.
    pub fn from_settings_str(content: &str) -> Self {
        let Ok(json) = serde_json::from_str::<serde_json::Value>(content) else {
            warn!("Failed to parse Gemini settings.json");
            return Self::Unknown;
        };

        let selected = json
            .pointer("/security/auth/selectedType")
            .and_then(|t| t.as_str());

        match selected {
            Some("oauth-personal") => Self::OAuthPersonal,
            Some("api-key" | "gemini-api-key") => Self::ApiKey,
            Some("vertex-ai") => Self::VertexAI,
            other => {
                debug!(auth_type = ?other, "Unknown auth type in settings");
                Self::Unknown
            }
        }
    }

    /// Reads the auth type from `settings.json` in `dir`.
    pub fn from_dir(dir: &Path) -> Self {
        match std::fs::read_to_string(dir.join("settings.json")) {
            Ok(content) => Self::from_settings_str(&content),
            Err(_) => Self::Unknown,
        }
    }

    /// Returns true if quota can be fetched with this auth type.
    pub fn is_supported(self) -> bool {
        matches!(self, Self::OAuthPersonal | Self::Unknown)
    }
}

// ============================================================================
// OAuth Credentials
// ============================================================================

/// OAuth credentials from `oauth_creds.json`.
#[derive(Debug, Deserialize)]
pub struct GeminiCredentials {
    /// Access token for API calls.
    pub access_token: Option<String>,
    /// Refresh token.
    pub refresh_token: Option<String>,
    /// Token expiry as Unix milliseconds.
    pub expiry_date: Option<i64>,
    /// OpenID token carrying the account email.
    pub id_token: Option<String>,
    /// OAuth client ID, when stored alongside the tokens.
    pub client_id: Option<String>,
    /// OAuth client secret, when stored alongside the tokens.
    pub client_secret: Option<String>,
}

impl GeminiCredentials {
    /// Loads `oauth_creds.json` from `dir`.
    pub fn load(dir: &Path) -> Result<Self, GeminiError> {
        let path = dir.join("oauth_creds.json");
        debug!(path = %path.display(), "Loading Gemini credentials");
        let content = std::fs::read_to_string(&path).map_err(|_| GeminiError::NotLoggedIn)?;
        serde_json::from_str(&content).map_err(|e| GeminiError::CredentialsParse(e.to_string()))
    }

    /// Returns true when the access token expired before `now`.
    ///
    /// A missing expiry counts as expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date
            .is_none_or(|expiry_ms| expiry_ms < now.timestamp_millis())
    }

    fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_ref().is_some_and(|t| !t.is_empty())
    }

    /// Email claim of the ID token.
    pub fn email(&self) -> Option<String> {
        let token = self.id_token.as_deref()?;
        let payload = token.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
        claims
            .get("email")
            .and_then(|e| e.as_str())
            .filter(|e| !e.is_empty())
            .map(ToString::to_string)
    }
}

// ============================================================================
// Quota Response
// ============================================================================

/// Response from `retrieveUserQuota`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaResponse {
    /// Quota buckets, one per model and token type.
    #[serde(default)]
    pub buckets: Vec<QuotaBucket>,
}

/// One quota bucket.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaBucket {
    /// Model identifier such as `gemini-2.5-pro`.
    #[serde(default)]
    pub model_id: Option<String>,
    /// Fraction of the quota left, 0.0 to 1.0.
    #[serde(default)]
    pub remaining_fraction: Option<f64>,
    /// Reset time.
    #[serde(default)]
    pub reset_time: Option<DateTime<Utc>>,
}

/// Pro and Flash windows.
#[derive(Debug, Clone)]
pub struct GeminiQuota {
    /// Lowest remaining Pro bucket.
    pub primary: Option<RateWindow>,
    /// Lowest remaining Flash bucket.
    pub secondary: Option<RateWindow>,
}

fn tightest<'a>(buckets: &'a [QuotaBucket], family: &str) -> Option<(&'a QuotaBucket, f64)> {
    buckets
        .iter()
        .filter_map(|b| {
            let model = b.model_id.as_deref()?.to_lowercase();
            let fraction = b.remaining_fraction?;
            model.contains(family).then_some((b, fraction))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

fn bucket_window(bucket: &QuotaBucket, fraction: f64, label: &str) -> RateWindow {
    let mut window = RateWindow::from_remaining(fraction.clamp(0.0, 1.0) * 100.0)
        .with_window_minutes(QUOTA_WINDOW_MINUTES);
    if let Some(at) = bucket.reset_time {
        window = window.with_resets_at(at);
    }
    match bucket.model_id.as_deref() {
        Some(model) => window.with_reset_description(format!("{label} ({model})")),
        None => window,
    }
}

/// Picks the tightest Pro bucket as primary and the tightest Flash bucket
/// as secondary.
pub fn quota_from_response(response: &QuotaResponse) -> Result<GeminiQuota, GeminiError> {
    let primary = tightest(&response.buckets, "pro").map(|(b, f)| bucket_window(b, f, "Pro"));
    let secondary = tightest(&response.buckets, "flash").map(|(b, f)| bucket_window(b, f, "Flash"));

    if primary.is_none() && secondary.is_none() {
        return Err(GeminiError::NoData);
    }
    Ok(GeminiQuota { primary, secondary })
}

// ============================================================================
// Probe
// ============================================================================

/// Quota and identity read from the API.
#[derive(Debug, Clone)]
pub struct GeminiResult {
    /// Windows.
    pub quota: GeminiQuota,
    /// Signed-in account.
    pub identity: ProviderIdentitySnapshot,
}

/// Gemini CLI config directory.
pub fn gemini_dir(ctx: &ProbeContext) -> Option<PathBuf> {
    ctx.home_dir().map(|home| home.join(GEMINI_DIR))
}

async fn valid_token(ctx: &ProbeContext, creds: &GeminiCredentials) -> Result<String, GeminiError> {
    let token = creds
        .access_token
        .as_ref()
        .filter(|t| !t.is_empty())
        .ok_or(GeminiError::NotLoggedIn)?;

    if !creds.is_expired_at(Utc::now()) {
        return Ok(token.clone());
    }
    if !creds.has_refresh_token() {
        warn!("Gemini token expired but no refresh token available");
        return Err(GeminiError::TokenExpired("no refresh token available".to_string()));
    }

    let (Some(client_id), Some(client_secret), Some(refresh_token)) = (
        creds.client_id.as_deref(),
        creds.client_secret.as_deref(),
        creds.refresh_token.as_deref(),
    ) else {
        return Err(GeminiError::TokenExpired(
            "run `gemini` once to refresh the session".to_string(),
        ));
    };

    info!("Gemini access token expired, refreshing");
    Ok(refresh_access_token(&ctx.http, client_id, client_secret, refresh_token).await?)
}

/// Fetches quota through the Cloud Code Private API.
#[instrument(skip(ctx))]
pub async fn fetch_quota(ctx: &ProbeContext) -> Result<GeminiResult, GeminiError> {
    let dir = gemini_dir(ctx).ok_or(GeminiError::NotLoggedIn)?;

    let auth_type = GeminiAuthType::from_dir(&dir);
    debug!(auth_type = ?auth_type, "Detected Gemini auth type");
    if !auth_type.is_supported() {
        return Err(GeminiError::UnsupportedAuthType(format!(
            "{auth_type:?} auth has no quota endpoint"
        )));
    }

    let creds = GeminiCredentials::load(&dir)?;
    let token = valid_token(ctx, &creds).await?;

    let response: QuotaResponse = ctx
        .http
        .post_json(QUOTA_ENDPOINT, &RequestAuth::Bearer(token), &serde_json::json!({}))
        .await?;
    debug!(buckets = response.buckets.len(), "Gemini quota received");

    let mut identity =
        ProviderIdentitySnapshot::new(ProviderKind::Gemini).with_login_method(LoginMethod::OAuth);
    if let Some(email) = creds.email() {
        identity = identity.with_email(email);
    }

    Ok(GeminiResult {
        quota: quota_from_response(&response)?,
        identity,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_auth_type_from_settings() {
        let oauth = r#"{"security":{"auth":{"selectedType":"oauth-personal"}}}"#;
        assert_eq!(GeminiAuthType::from_settings_str(oauth), GeminiAuthType::OAuthPersonal);
        let vertex = r#"{"security":{"auth":{"selectedType":"vertex-ai"}}}"#;
        assert!(!GeminiAuthType::from_settings_str(vertex).is_supported());
        assert!(GeminiAuthType::from_settings_str("{}").is_supported());
    }

    #[test]
    fn test_credentials_expired() {
        let now = Utc::now();
        let creds = |expiry: Option<i64>| GeminiCredentials {
            access_token: Some("token".to_string()),
            refresh_token: None,
            expiry_date: expiry,
            id_token: None,
            client_id: None,
            client_secret: None,
        };
        assert!(creds(Some((now - Duration::hours(1)).timestamp_millis())).is_expired_at(now));
        assert!(!creds(Some((now + Duration::hours(1)).timestamp_millis())).is_expired_at(now));
        assert!(creds(None).is_expired_at(now));
    }

    #[test]
    fn test_email_from_id_token() {
        let payload = URL_SAFE_NO_PAD.encode(r#"{"email":"dev@example.com"}"#);
        let creds: GeminiCredentials =
            serde_json::from_str(&format!(r#"{{"id_token":"h.{payload}.s"}}"#)).unwrap();
        assert_eq!(creds.email().as_deref(), Some("dev@example.com"));
    }

    #[test]
    fn test_tightest_bucket_per_family() {
        let response: QuotaResponse = serde_json::from_str(
            r#"{"buckets":[
                {"modelId":"gemini-2.5-pro","remainingFraction":0.8,"resetTime":"2025-01-02T00:00:00Z"},
                {"modelId":"gemini-2.5-pro","remainingFraction":0.25},
                {"modelId":"gemini-2.5-flash","remainingFraction":0.9},
                {"modelId":"gemini-2.0-flash-lite"}
            ]}"#,
        )
        .unwrap();
        let quota = quota_from_response(&response).unwrap();
        let primary = quota.primary.unwrap();
        assert!((primary.used_percent() - 75.0).abs() < 1e-9);
        assert!(primary.resets_at().is_none());
        assert!((quota.secondary.unwrap().used_percent() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_buckets() {
        let response: QuotaResponse = serde_json::from_str(r#"{"buckets":[]}"#).unwrap();
        assert!(matches!(quota_from_response(&response), Err(GeminiError::NoData)));
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(GeminiCredentials::load(dir.path()), Err(GeminiError::NotLoggedIn)));
        std::fs::write(dir.path().join("oauth_creds.json"), r#"{"access_token":"a","expiry_date":1}"#).unwrap();
        let creds = GeminiCredentials::load(dir.path()).unwrap();
        assert_eq!(creds.access_token.as_deref(), Some("a"));
    }
}
