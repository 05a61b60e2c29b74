//! Secure credential storage using the system keychain.
//!
//! - macOS: Keychain Services
//! - Windows: Credential Manager
//! - Linux: Secret Service (GNOME Keyring, KDE Wallet)
//!
//! ## Caching
//!
//! Keychain reads can prompt the user. [`KeychainCache`] remembers every
//! lookup, misses included, for as long as the instance lives. It is an
//! ordinary value owned by the probe context, so tests and long-running
//! processes can build a fresh one or [`KeychainCache::clear`] it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use keyring::Entry;
use tracing::{debug, trace, warn};

use crate::error::KeychainError;

/// Service name prefix for credentials stored by usagebar.
const SERVICE_PREFIX: &str = "usagebar";

// ============================================================================
// Keychain API Trait
// ============================================================================

/// API for secure credential storage.
#[async_trait]
pub trait KeychainApi: Send + Sync {
    /// Reads a credential. `Ok(None)` means no entry.
    async fn get(&self, service: &str, account: &str) -> Result<Option<String>, KeychainError>;

    /// Stores a credential.
    async fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), KeychainError>;

    /// Deletes a credential. Deleting a missing entry succeeds.
    async fn delete(&self, service: &str, account: &str) -> Result<(), KeychainError>;
}

// ============================================================================
// System Keychain
// ============================================================================

/// Keychain backed by the `keyring` crate.
#[derive(Debug, Clone)]
pub struct SystemKeychain {
    prefix: Option<&'static str>,
}

impl Default for SystemKeychain {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemKeychain {
    /// Keychain for usagebar's own entries (`usagebar:<service>`).
    pub fn new() -> Self {
        Self {
            prefix: Some(SERVICE_PREFIX),
        }
    }

    /// Keychain addressing entries owned by other applications verbatim
    /// (e.g. "Chrome Safe Storage").
    pub fn external() -> Self {
        Self { prefix: None }
    }

    fn full_service(&self, service: &str) -> String {
        match self.prefix {
            Some(prefix) => format!("{prefix}:{service}"),
            None => service.to_string(),
        }
    }

    fn entry(&self, service: &str, account: &str) -> Result<Entry, KeychainError> {
        Entry::new(&self.full_service(service), account)
            .map_err(|e| KeychainError::Platform(e.to_string()))
    }
}

#[async_trait]
impl KeychainApi for SystemKeychain {
    async fn get(&self, service: &str, account: &str) -> Result<Option<String>, KeychainError> {
        debug!(service = %service, account = %account, "Getting credential from keychain");

        match self.entry(service, account)?.get_password() {
            Ok(secret) if !secret.is_empty() => Ok(Some(secret)),
            Ok(_) | Err(keyring::Error::NoEntry) => {
                debug!(service = %service, account = %account, "Credential not found");
                Ok(None)
            }
            Err(e) => {
                warn!(service = %service, account = %account, error = %e, "Failed to get credential");
                Err(e.into())
            }
        }
    }

    async fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), KeychainError> {
        debug!(service = %service, account = %account, "Setting credential in keychain");
        self.entry(service, account)?
            .set_password(secret)
            .map_err(|e| {
                warn!(service = %service, account = %account, error = %e, "Failed to set credential");
                KeychainError::from(e)
            })
    }

    async fn delete(&self, service: &str, account: &str) -> Result<(), KeychainError> {
        match self.entry(service, account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => {
                warn!(service = %service, account = %account, error = %e, "Failed to delete credential");
                Err(e.into())
            }
        }
    }
}

// ============================================================================
// In-Memory Keychain
// ============================================================================

/// Keychain held in memory, for tests and headless runs.
#[derive(Debug, Default)]
pub struct MemoryKeychain {
    entries: Mutex<HashMap<(String, String), String>>,
}

impl MemoryKeychain {
    /// Creates an empty keychain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a keychain seeded with one entry.
    pub fn with_entry(self, service: &str, account: &str, secret: &str) -> Self {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((service.to_string(), account.to_string()), secret.to_string());
        self
    }
}

#[async_trait]
impl KeychainApi for MemoryKeychain {
    async fn get(&self, service: &str, account: &str) -> Result<Option<String>, KeychainError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .get(&(service.to_string(), account.to_string()))
            .cloned())
    }

    async fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), KeychainError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((service.to_string(), account.to_string()), secret.to_string());
        Ok(())
    }

    async fn delete(&self, service: &str, account: &str) -> Result<(), KeychainError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(service.to_string(), account.to_string()));
        Ok(())
    }
}

// ============================================================================
// Keychain Cache
// ============================================================================

/// Caching front for a keychain.
///
/// Lookups (including "not found") are remembered until [`clear`] or
/// [`invalidate`] is called. Errors are not cached.
///
/// [`clear`]: KeychainCache::clear
/// [`invalidate`]: KeychainCache::invalidate
#[derive(Clone)]
pub struct KeychainCache {
    backend: Arc<dyn KeychainApi>,
    entries: Arc<Mutex<HashMap<String, Option<String>>>>,
}

impl std::fmt::Debug for KeychainCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeychainCache").finish_non_exhaustive()
    }
}

impl KeychainCache {
    /// Wraps a keychain backend.
    pub fn new(backend: Arc<dyn KeychainApi>) -> Self {
        Self {
            backend,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn key(service: &str, account: &str) -> String {
        format!("{service}:{account}")
    }

    /// Reads a credential, consulting the cache first.
    pub async fn get(&self, service: &str, account: &str) -> Result<Option<String>, KeychainError> {
        let key = Self::key(service, account);
        if let Some(cached) = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            trace!(service = %service, account = %account, hit = true, "Keychain cache lookup");
            return Ok(cached.clone());
        }

        trace!(service = %service, account = %account, hit = false, "Keychain cache miss");
        let value = self.backend.get(service, account).await?;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value.clone());
        Ok(value)
    }

    /// Stores a credential and refreshes the cached value.
    pub async fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), KeychainError> {
        self.backend.set(service, account, secret).await?;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Self::key(service, account), Some(secret.to_string()));
        Ok(())
    }

    /// Forgets one cached entry.
    pub fn invalidate(&self, service: &str, account: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&Self::key(service, account));
        debug!(service = %service, account = %account, "Invalidated keychain cache entry");
    }

    /// Forgets every cached entry.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!("Cleared keychain cache");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingKeychain {
        inner: MemoryKeychain,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl KeychainApi for CountingKeychain {
        async fn get(&self, service: &str, account: &str) -> Result<Option<String>, KeychainError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get(service, account).await
        }
        async fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), KeychainError> {
            self.inner.set(service, account, secret).await
        }
        async fn delete(&self, service: &str, account: &str) -> Result<(), KeychainError> {
            self.inner.delete(service, account).await
        }
    }

    #[test]
    fn test_full_service_name() {
        assert_eq!(SystemKeychain::new().full_service("claude"), "usagebar:claude");
        assert_eq!(
            SystemKeychain::external().full_service("Chrome Safe Storage"),
            "Chrome Safe Storage"
        );
    }

    #[tokio::test]
    async fn test_cache_remembers_misses() {
        let backend = Arc::new(CountingKeychain {
            inner: MemoryKeychain::new(),
            reads: AtomicUsize::new(0),
        });
        let cache = KeychainCache::new(backend.clone());

        assert_eq!(cache.get("openai", "cookie").await.unwrap(), None);
        assert_eq!(cache.get("openai", "cookie").await.unwrap(), None);
        assert_eq!(backend.reads.load(Ordering::SeqCst), 1);

        cache.clear();
        assert_eq!(cache.get("openai", "cookie").await.unwrap(), None);
        assert_eq!(backend.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_instances_are_isolated() {
        let first = KeychainCache::new(Arc::new(MemoryKeychain::new().with_entry("a", "b", "one")));
        let second = KeychainCache::new(Arc::new(MemoryKeychain::new()));

        assert_eq!(first.get("a", "b").await.unwrap().as_deref(), Some("one"));
        assert_eq!(second.get("a", "b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_updates_cache() {
        let cache = KeychainCache::new(Arc::new(MemoryKeychain::new()));
        assert_eq!(cache.get("claude", "cookie").await.unwrap(), None);
        cache.set("claude", "cookie", "sessionKey=abc").await.unwrap();
        assert_eq!(
            cache.get("claude", "cookie").await.unwrap().as_deref(),
            Some("sessionKey=abc")
        );
    }
}
