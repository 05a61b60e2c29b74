//! Claude account identity from `.claude.json`.
//!
//! The CLI keeps its state in `~/.claude.json`, or in
//! `$CLAUDE_CONFIG_DIR/.claude.json` when the config dir is overridden. A
//! signed-in account looks like:
//!
//! ```json
//! { "oauthAccount": { "emailAddress": "dev@example.com", "organizationName": "Acme" } }
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;
use usagebar_core::{LoginMethod, ProviderIdentitySnapshot, ProviderKind};
use usagebar_fetch::ProbeContext;

use super::error::ClaudeError;

/// Environment override for the Claude config directory.
pub const CLAUDE_CONFIG_DIR_ENV: &str = "CLAUDE_CONFIG_DIR";

const CONFIG_FILE: &str = ".claude.json";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaudeConfig {
    #[serde(default)]
    oauth_account: Option<OAuthAccount>,
    #[serde(default)]
    primary_api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OAuthAccount {
    #[serde(default)]
    email_address: Option<String>,
    #[serde(default)]
    organization_name: Option<String>,
}

/// The Claude config directory: `$CLAUDE_CONFIG_DIR` or `~/.claude`.
pub fn config_dir(ctx: &ProbeContext) -> Option<PathBuf> {
    ctx.dir_from_env(CLAUDE_CONFIG_DIR_ENV, ".claude")
}

/// Location of `.claude.json`.
pub fn config_path(ctx: &ProbeContext) -> Option<PathBuf> {
    match ctx.env_var(CLAUDE_CONFIG_DIR_ENV) {
        Some(dir) => Some(PathBuf::from(dir).join(CONFIG_FILE)),
        None => ctx.home_dir().map(|home| home.join(CONFIG_FILE)),
    }
}

/// Reads the identity from a config file.
pub fn read_identity(path: &Path) -> Result<ProviderIdentitySnapshot, ClaudeError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| ClaudeError::InvalidConfig(format!("{}: {e}", path.display())))?;
    let config: ClaudeConfig =
        serde_json::from_str(&content).map_err(|e| ClaudeError::InvalidConfig(e.to_string()))?;

    let mut identity = ProviderIdentitySnapshot::new(ProviderKind::Claude);
    if let Some(account) = config.oauth_account {
        identity.account_email = account.email_address.filter(|e| !e.is_empty());
        identity.account_organization = account.organization_name.filter(|o| !o.is_empty());
        identity.login_method = Some(LoginMethod::OAuth);
    } else if config.primary_api_key.is_some() {
        identity.login_method = Some(LoginMethod::ApiKey);
    }
    Ok(identity)
}

/// Reads the identity for `ctx`, or `None` when unavailable.
pub fn try_read_identity(ctx: &ProbeContext) -> Option<ProviderIdentitySnapshot> {
    let path = config_path(ctx)?;
    match read_identity(&path) {
        Ok(identity) if !identity.is_empty() => Some(identity),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "No Claude identity");
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_oauth_account() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"{"numStartups":3,"oauthAccount":{"accountUuid":"x","emailAddress":"dev@example.com","organizationName":"Acme"}}"#,
        )
        .unwrap();

        let identity = read_identity(&path).unwrap();
        assert_eq!(identity.provider_id, ProviderKind::Claude);
        assert_eq!(identity.account_email.as_deref(), Some("dev@example.com"));
        assert_eq!(identity.account_organization.as_deref(), Some("Acme"));
        assert_eq!(identity.login_method, Some(LoginMethod::OAuth));
    }

    #[test]
    fn test_api_key_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{"primaryApiKey":"sk-ant-x"}"#).unwrap();
        let identity = read_identity(&path).unwrap();
        assert_eq!(identity.login_method, Some(LoginMethod::ApiKey));
        assert!(identity.account_email.is_none());
    }

    #[test]
    fn test_missing_file() {
        let err = read_identity(Path::new("/nonexistent/.claude.json")).unwrap_err();
        assert!(matches!(err, ClaudeError::InvalidConfig(_)));
    }
}
