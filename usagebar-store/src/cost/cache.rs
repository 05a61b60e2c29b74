//! Per-file parse cache for the cost scanner.
//!
//! A file is re-read only when its mtime or size changed since the cached
//! parse. The cache is stored as JSON next to the other cache files.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::logs::ParsedFile;
use crate::error::StoreError;
use crate::persistence::{load_json_blocking, save_json_blocking};

/// Bumped when the parsed row layout changes.
const CACHE_VERSION: u32 = 1;

/// One cached file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedFile {
    /// Modification time in milliseconds since the epoch.
    pub mtime_ms: i64,
    /// Size in bytes.
    pub size: u64,
    /// Parsed content.
    pub parsed: ParsedFile,
}

/// Parsed log files keyed by path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostUsageCache {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    files: HashMap<String, CachedFile>,
}

impl Default for CostUsageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CostUsageCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            version: CACHE_VERSION,
            files: HashMap::new(),
        }
    }

    /// Loads the cache, or starts empty when it is missing, corrupt or stale.
    pub fn load(path: &Path) -> Self {
        match load_json_blocking::<Self>(path) {
            Ok(cache) if cache.version == CACHE_VERSION => cache,
            Ok(cache) => {
                debug!(found = cache.version, "Discarding cost cache with old layout");
                Self::new()
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No usable cost cache");
                Self::new()
            }
        }
    }

    /// Saves the cache.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        save_json_blocking(path, self)
    }

    /// Cached parse for `path` when it is still current.
    pub fn lookup(&self, path: &str, mtime_ms: i64, size: u64) -> Option<&ParsedFile> {
        self.files
            .get(path)
            .filter(|f| f.mtime_ms == mtime_ms && f.size == size)
            .map(|f| &f.parsed)
    }

    /// Stores a parse.
    pub fn insert(&mut self, path: String, mtime_ms: i64, size: u64, parsed: ParsedFile) {
        self.files.insert(path, CachedFile { mtime_ms, size, parsed });
    }

    /// Parse for `path` regardless of freshness.
    pub fn get(&self, path: &str) -> Option<&ParsedFile> {
        self.files.get(path).map(|f| &f.parsed)
    }

    /// Drops files under `root` that are not in `keep`.
    pub fn prune(&mut self, root: &str, keep: &HashSet<String>) {
        self.files.retain(|path, _| !path.starts_with(root) || keep.contains(path));
    }

    /// Number of cached files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_requires_matching_stat() {
        let mut cache = CostUsageCache::new();
        cache.insert("/logs/a.jsonl".into(), 10, 100, ParsedFile::default());
        assert!(cache.lookup("/logs/a.jsonl", 10, 100).is_some());
        assert!(cache.lookup("/logs/a.jsonl", 11, 100).is_none());
        assert!(cache.lookup("/logs/a.jsonl", 10, 101).is_none());
        assert!(cache.get("/logs/a.jsonl").is_some());
    }

    #[test]
    fn test_prune_only_touches_root() {
        let mut cache = CostUsageCache::new();
        cache.insert("/codex/a.jsonl".into(), 1, 1, ParsedFile::default());
        cache.insert("/codex/b.jsonl".into(), 1, 1, ParsedFile::default());
        cache.insert("/claude/c.jsonl".into(), 1, 1, ParsedFile::default());
        let keep: HashSet<String> = ["/codex/a.jsonl".to_string()].into_iter().collect();
        cache.prune("/codex", &keep);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("/claude/c.jsonl").is_some());
    }

    #[test]
    fn test_persist_and_version_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cost-usage.json");
        let mut cache = CostUsageCache::new();
        cache.insert("/x.jsonl".into(), 5, 6, ParsedFile::default());
        cache.save(&path).unwrap();
        assert_eq!(CostUsageCache::load(&path), cache);

        std::fs::write(&path, r#"{"version":0,"files":{}}"#).unwrap();
        assert!(CostUsageCache::load(&path).is_empty());
        assert!(CostUsageCache::load(&dir.path().join("missing.json")).is_empty());
    }
}
