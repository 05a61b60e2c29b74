//! Application default credentials and project resolution.
//!
//! ## Credential Sources
//!
//! 1. `GOOGLE_APPLICATION_CREDENTIALS` - path to a credentials file
//! 2. `<gcloud config>/application_default_credentials.json`
//!
//! ## Project Sources
//!
//! 1. `quota_project_id` in the credentials file
//! 2. `GOOGLE_CLOUD_PROJECT` / `CLOUDSDK_CORE_PROJECT`
//! 3. `project` in the active gcloud configuration

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, instrument};
use usagebar_fetch::ProbeContext;

use super::error::VertexError;
use crate::google_oauth::refresh_access_token;

/// Overrides the credentials file.
pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Overrides the gcloud config directory.
pub const GCLOUD_CONFIG_ENV: &str = "CLOUDSDK_CONFIG";

const PROJECT_ENVS: &[&str] = &["GOOGLE_CLOUD_PROJECT", "CLOUDSDK_CORE_PROJECT"];

const ADC_FILE: &str = "application_default_credentials.json";

// ============================================================================
// Credentials
// ============================================================================

/// OAuth credentials loaded from an ADC file.
#[derive(Debug, Deserialize)]
pub struct AdcCredentials {
    /// OAuth client ID.
    pub client_id: Option<String>,
    /// OAuth client secret.
    pub client_secret: Option<String>,
    /// Refresh token.
    pub refresh_token: Option<String>,
    /// Credential type, usually `authorized_user`.
    #[serde(rename = "type")]
    pub credential_type: Option<String>,
    /// Quota project ID.
    pub quota_project_id: Option<String>,
}

impl AdcCredentials {
    /// Parses an ADC file.
    pub fn load(path: &Path) -> Result<Self, VertexError> {
        debug!(path = %path.display(), "Loading application default credentials");
        let content = std::fs::read_to_string(path).map_err(|_| VertexError::NotLoggedIn)?;
        serde_json::from_str(&content).map_err(|e| VertexError::CredentialsParse(e.to_string()))
    }

    /// Returns true if the refresh flow has every field it needs.
    pub fn has_oauth(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some() && self.refresh_token.is_some()
    }
}

/// gcloud config directory.
pub fn gcloud_dir(ctx: &ProbeContext) -> Option<PathBuf> {
    ctx.dir_from_env(GCLOUD_CONFIG_ENV, ".config/gcloud")
}

/// Candidate credential files in priority order.
pub fn credential_paths(ctx: &ProbeContext) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(path) = ctx.env_var(CREDENTIALS_ENV) {
        paths.push(PathBuf::from(path));
    }
    if let Some(dir) = gcloud_dir(ctx) {
        paths.push(dir.join(ADC_FILE));
    }
    paths
}

/// Loads the first existing credentials file.
pub fn load_credentials(ctx: &ProbeContext) -> Result<AdcCredentials, VertexError> {
    let path = credential_paths(ctx)
        .into_iter()
        .find(|p| p.exists())
        .ok_or(VertexError::NotLoggedIn)?;
    AdcCredentials::load(&path)
}

/// Exchanges the ADC refresh token for an access token.
#[instrument(skip_all)]
pub async fn access_token(ctx: &ProbeContext, creds: &AdcCredentials) -> Result<String, VertexError> {
    let (Some(client_id), Some(client_secret), Some(refresh_token)) = (
        creds.client_id.as_deref(),
        creds.client_secret.as_deref(),
        creds.refresh_token.as_deref(),
    ) else {
        return Err(VertexError::NotLoggedIn);
    };
    Ok(refresh_access_token(&ctx.http, client_id, client_secret, refresh_token).await?)
}

// ============================================================================
// Project
// ============================================================================

/// Reads `project` from the `[core]` section of a gcloud configuration.
pub fn project_from_gcloud_config(content: &str) -> Option<String> {
    let mut in_core = false;
    for line in content.lines().map(str::trim) {
        if line.starts_with('[') {
            in_core = line == "[core]";
            continue;
        }
        if !in_core {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.trim() == "project" {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn active_gcloud_project(dir: &Path) -> Option<String> {
    let active = std::fs::read_to_string(dir.join("active_config"))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "default".to_string());
    let content = std::fs::read_to_string(dir.join("configurations").join(format!("config_{active}"))).ok()?;
    project_from_gcloud_config(&content)
}

/// Resolves the project to query.
pub fn resolve_project(ctx: &ProbeContext, creds: &AdcCredentials) -> Result<String, VertexError> {
    if let Some(project) = creds.quota_project_id.as_deref().filter(|p| !p.is_empty()) {
        return Ok(project.to_string());
    }
    if let Some(project) = PROJECT_ENVS.iter().find_map(|key| ctx.env_var(key)) {
        return Ok(project);
    }
    gcloud_dir(ctx)
        .and_then(|dir| active_gcloud_project(&dir))
        .ok_or(VertexError::NoProject)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ctx(home: &Path, env: &[(&str, &str)]) -> ProbeContext {
        let env: HashMap<String, String> = env.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        ProbeContext::builder().home(home).env(env).build().unwrap()
    }

    #[test]
    fn test_parse_credentials() {
        let json = r#"{
            "client_id": "123.apps.googleusercontent.com",
            "client_secret": "secret",
            "refresh_token": "1//refresh",
            "type": "authorized_user",
            "quota_project_id": "my-project"
        }"#;
        let creds: AdcCredentials = serde_json::from_str(json).unwrap();
        assert!(creds.has_oauth());
        assert_eq!(creds.credential_type.as_deref(), Some("authorized_user"));
    }

    #[test]
    fn test_gcloud_config_project() {
        let content = "[compute]\nproject = wrong\n\n[core]\naccount = dev@example.com\nproject = my-proj\n";
        assert_eq!(project_from_gcloud_config(content).as_deref(), Some("my-proj"));
        assert_eq!(project_from_gcloud_config("[core]\naccount = a\n"), None);
    }

    #[test]
    fn test_project_resolution_order() {
        let home = tempfile::tempdir().unwrap();
        let configs = home.path().join(".config/gcloud/configurations");
        std::fs::create_dir_all(&configs).unwrap();
        std::fs::write(configs.join("config_default"), "[core]\nproject = from-gcloud\n").unwrap();

        let creds: AdcCredentials = serde_json::from_str(r#"{"quota_project_id": "from-adc"}"#).unwrap();
        let bare: AdcCredentials = serde_json::from_str("{}").unwrap();

        let plain = ctx(home.path(), &[]);
        assert_eq!(resolve_project(&plain, &creds).unwrap(), "from-adc");
        assert_eq!(resolve_project(&plain, &bare).unwrap(), "from-gcloud");

        let with_env = ctx(home.path(), &[("GOOGLE_CLOUD_PROJECT", "from-env")]);
        assert_eq!(resolve_project(&with_env, &bare).unwrap(), "from-env");
    }

    #[test]
    fn test_env_credentials_path_first() {
        let home = tempfile::tempdir().unwrap();
        let custom = ctx(home.path(), &[(CREDENTIALS_ENV, "/tmp/custom.json")]);
        let paths = credential_paths(&custom);
        assert_eq!(paths[0], PathBuf::from("/tmp/custom.json"));
        assert!(paths[1].ends_with(ADC_FILE));
        let plain = ctx(home.path(), &[]);
        assert!(matches!(load_credentials(&plain), Err(VertexError::NotLoggedIn)));
    }
}
