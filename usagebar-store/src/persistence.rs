//! File persistence helpers.
//!
//! JSON files are written through a temp file plus rename and are only
//! readable by the owner on Unix.

use std::path::{Path, PathBuf};

use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::error::StoreError;

/// Application directory name under the platform config and cache dirs.
const APP_DIR: &str = "usagebar";

// ============================================================================
// Default Paths
// ============================================================================

/// Returns the default configuration directory, e.g. `~/.config/usagebar`.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|c| c.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the default cache directory, e.g. `~/.cache/usagebar`.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|c| c.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the default settings file path.
pub fn default_settings_path() -> PathBuf {
    default_config_dir().join("settings.json")
}

/// Returns the default token-cost cache path.
pub fn default_cost_cache_path() -> PathBuf {
    default_cache_dir().join("cost-usage.json")
}

// ============================================================================
// Security: File Permissions
// ============================================================================

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    debug!(path = %path.display(), mode = %format!("{mode:o}"), "Set restrictive permissions");
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), StoreError> {
    Ok(())
}

// ============================================================================
// File Operations
// ============================================================================

/// Writes `contents` atomically with 0600 permissions.
///
/// A missing parent directory is created with 0700 permissions.
pub fn write_secure(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            debug!(path = %parent.display(), "Creating secure directory");
            std::fs::create_dir_all(parent)?;
            set_mode(parent, 0o700)?;
        }
    }

    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    std::fs::write(&temp_path, contents)?;
    set_mode(&temp_path, 0o600)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// Saves data as pretty JSON, blocking.
pub fn save_json_blocking<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<(), StoreError> {
    debug!(path = %path.display(), "Saving JSON file");
    let json = serde_json::to_vec_pretty(data)?;
    write_secure(path, &json)
}

/// Loads JSON, blocking.
pub fn load_json_blocking<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    debug!(path = %path.display(), "Loading JSON file");
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Saves data as pretty JSON.
pub async fn save_json<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(data)?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_secure(&path, &json)).await?
}

/// Loads data from a JSON file.
pub async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    debug!(path = %path.display(), "Loading JSON file");
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Loads data from a JSON file, returning the default if missing or invalid.
pub async fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match load_json(path).await {
        Ok(data) => data,
        Err(e) => {
            if !matches!(e, StoreError::Io(_)) {
                warn!(path = %path.display(), error = %e, "Failed to load, using defaults");
            }
            T::default()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
