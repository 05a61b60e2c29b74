//! Binary resolution over an explicit search path.
//!
//! GUI launches and cron-style schedulers often start with a bare `PATH`,
//! so CLIs installed through npm, bun, volta or Homebrew would not be
//! found. [`PathResolver`] builds the search path explicitly from the
//! ambient `PATH` followed by the well-known install directories, and
//! hands the same `PATH` to every spawned child.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, trace};

/// Install directories relative to the home directory.
const HOME_BIN_DIRS: &[&str] = &[".local/bin", ".bun/bin", ".npm-global/bin", ".cargo/bin", ".volta/bin"];

/// System-wide install directories.
const SYSTEM_BIN_DIRS: &[&str] = &[
    "/opt/homebrew/bin",
    "/usr/local/bin",
    "/usr/bin",
    "/bin",
    "/usr/sbin",
    "/sbin",
];

/// Resolves binaries and remembers the answers.
///
/// Owned by the probe context; call [`PathResolver::reset`] after the user
/// installs a CLI.
#[derive(Debug)]
pub struct PathResolver {
    dirs: Vec<PathBuf>,
    cache: Mutex<HashMap<String, Option<PathBuf>>>,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PathResolver {
    /// Builds the search path from the ambient `PATH` and the home directory.
    pub fn new() -> Self {
        let ambient = std::env::var_os("PATH").unwrap_or_default();
        Self::with_dirs(default_search_dirs(&ambient, dirs::home_dir().as_deref()))
    }

    /// Uses exactly `dirs`, in order.
    pub fn with_dirs(dirs: Vec<PathBuf>) -> Self {
        let mut unique: Vec<PathBuf> = Vec::with_capacity(dirs.len());
        for dir in dirs {
            if !dir.as_os_str().is_empty() && !unique.contains(&dir) {
                unique.push(dir);
            }
        }
        Self {
            dirs: unique,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The directories searched, in order.
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// The search path as a `PATH` value for child processes.
    pub fn search_path(&self) -> OsString {
        std::env::join_paths(&self.dirs).unwrap_or_default()
    }

    /// Resolves `binary` to an executable path.
    pub fn resolve(&self, binary: &str) -> Option<PathBuf> {
        if let Some(cached) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(binary)
        {
            trace!(binary, "Path cache hit");
            return cached.clone();
        }

        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let found = which::which_in(binary, Some(self.search_path()), cwd).ok();
        debug!(binary, path = ?found, "Resolved binary");

        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(binary.to_string(), found.clone());
        found
    }

    /// Forgets every cached resolution.
    pub fn reset(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn default_search_dirs(ambient: &std::ffi::OsStr, home: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = std::env::split_paths(ambient).collect();

    if let Some(home) = home {
        dirs.extend(HOME_BIN_DIRS.iter().map(|rel| home.join(rel)));
        dirs.extend(nvm_bin_dirs(home));
    }
    dirs.extend(SYSTEM_BIN_DIRS.iter().map(PathBuf::from));
    dirs
}

/// `~/.nvm/versions/node/*/bin`, newest name first.
fn nvm_bin_dirs(home: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(home.join(".nvm/versions/node")) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path().join("bin"))
        .filter(|bin| bin.is_dir())
        .collect();
    dirs.sort();
    dirs.reverse();
    dirs
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn make_executable(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::write(path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_default_dirs_order_and_extras() {
        let home = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(home.path().join(".nvm/versions/node/v20.1.0/bin")).unwrap();

        let ambient = std::env::join_paths(["/custom/bin"]).unwrap();
        let dirs = default_search_dirs(&ambient, Some(home.path()));

        assert_eq!(dirs[0], PathBuf::from("/custom/bin"));
        assert!(dirs.contains(&home.path().join(".bun/bin")));
        assert!(dirs.contains(&home.path().join(".nvm/versions/node/v20.1.0/bin")));
        assert_eq!(dirs.last(), Some(&PathBuf::from("/sbin")));
    }

    #[test]
    fn test_with_dirs_dedupes() {
        let resolver = PathResolver::with_dirs(vec![
            PathBuf::from("/a"),
            PathBuf::from("/b"),
            PathBuf::from("/a"),
            PathBuf::new(),
        ]);
        assert_eq!(resolver.dirs(), &[PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PathResolver::with_dirs(vec![dir.path().to_path_buf()]);

        assert_eq!(resolver.resolve("codex"), None);

        let binary = dir.path().join("codex");
        make_executable(&binary);
        // Cached miss until reset.
        assert_eq!(resolver.resolve("codex"), None);

        resolver.reset();
        assert_eq!(resolver.resolve("codex"), Some(binary));
    }
}
