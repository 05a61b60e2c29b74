//! Codex account data from `auth.json`.
//!
//! The CLI stores its login in `$CODEX_HOME/auth.json` (default
//! `~/.codex/auth.json`):
//!
//! ```json
//! {
//!   "OPENAI_API_KEY": null,
//!   "tokens": { "id_token": "eyJ...", "access_token": "...", "refresh_token": "..." }
//! }
//! ```
//!
//! The ID token is a JWT whose payload carries `email` and, under
//! `https://api.openai.com/auth`, the `chatgpt_plan_type`. The signature is
//! not checked; the payload is only used for display.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use tracing::{debug, instrument};
use usagebar_core::{LoginMethod, ProviderIdentitySnapshot, ProviderKind};
use usagebar_fetch::ProbeContext;

use super::error::CodexError;

/// Environment override for the Codex home directory.
pub const CODEX_HOME_ENV: &str = "CODEX_HOME";

// ============================================================================
// File Format
// ============================================================================

#[derive(Debug, Deserialize)]
struct AuthFile {
    #[serde(rename = "OPENAI_API_KEY", default)]
    api_key: Option<String>,
    #[serde(default)]
    tokens: Option<AuthTokens>,
}

#[derive(Debug, Deserialize)]
struct AuthTokens {
    #[serde(alias = "idToken", default)]
    id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwtPayload {
    #[serde(default)]
    email: Option<String>,
    #[serde(rename = "https://api.openai.com/auth", default)]
    openai_auth: Option<OpenAiAuthClaims>,
}

#[derive(Debug, Deserialize)]
struct OpenAiAuthClaims {
    #[serde(default)]
    chatgpt_plan_type: Option<String>,
}

// ============================================================================
// Account Info
// ============================================================================

/// Account details read from disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountInfo {
    /// Account email.
    pub email: Option<String>,
    /// ChatGPT plan.
    pub plan: Option<String>,
    /// True when the CLI uses an API key rather than a ChatGPT login.
    pub uses_api_key: bool,
}

impl AccountInfo {
    /// Converts into a Codex identity.
    pub fn to_identity(&self) -> ProviderIdentitySnapshot {
        let mut identity = ProviderIdentitySnapshot::new(ProviderKind::Codex).with_login_method(
            if self.uses_api_key {
                LoginMethod::ApiKey
            } else {
                LoginMethod::Cli
            },
        );
        identity.account_email.clone_from(&self.email);
        identity.plan_name.clone_from(&self.plan);
        identity
    }
}

/// The Codex home directory.
pub fn codex_home(ctx: &ProbeContext) -> Option<PathBuf> {
    ctx.dir_from_env(CODEX_HOME_ENV, ".codex")
}

/// Reads account info from `<codex_home>/auth.json`.
#[instrument(skip(path), fields(path = %path.display()))]
pub fn read_account_info(path: &Path) -> Result<AccountInfo, CodexError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CodexError::InvalidAuth(format!("{}: {e}", path.display())))?;
    parse_auth_file(&content)
}

fn parse_auth_file(content: &str) -> Result<AccountInfo, CodexError> {
    let auth: AuthFile =
        serde_json::from_str(content).map_err(|e| CodexError::InvalidAuth(e.to_string()))?;

    let uses_api_key = auth.api_key.as_deref().is_some_and(|k| !k.trim().is_empty());
    let payload = auth
        .tokens
        .and_then(|t| t.id_token)
        .map(|token| decode_jwt_payload(&token))
        .transpose()?;

    let (email, plan) = match payload {
        Some(payload) => (
            payload.email,
            payload.openai_auth.and_then(|a| a.chatgpt_plan_type),
        ),
        None => (None, None),
    };
    debug!(has_email = email.is_some(), uses_api_key, "Read Codex auth file");

    Ok(AccountInfo {
        email,
        plan,
        uses_api_key,
    })
}

/// Reads account info for `ctx`, or `None` when there is no usable file.
pub fn try_read_account_info(ctx: &ProbeContext) -> Option<AccountInfo> {
    let path = codex_home(ctx)?.join("auth.json");
    match read_account_info(&path) {
        Ok(info) => Some(info),
        Err(e) => {
            debug!(error = %e, "No Codex account info");
            None
        }
    }
}

fn decode_jwt_payload(token: &str) -> Result<JwtPayload, CodexError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(CodexError::InvalidAuth("malformed ID token".to_string())),
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| CodexError::InvalidAuth(format!("ID token payload: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| CodexError::InvalidAuth(format!("ID token payload: {e}")))
}

// ============================================================================
// Tests
// ============================================================================
