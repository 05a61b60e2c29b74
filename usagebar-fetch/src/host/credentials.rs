//! Secret resolution with a fixed lookup order.
//!
//! Every secret is looked up the same way, and the order never varies:
//!
//! 1. An explicit environment variable override
//! 2. The OS credential store (through [`KeychainCache`])
//!
//! Cookie-based providers continue with a browser import when both are
//! empty; see [`crate::host::web_session`].

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::host::keychain::KeychainCache;

// ============================================================================
// Secret Spec
// ============================================================================

/// Where to look for one secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretSpec {
    /// Environment variable that overrides everything else.
    pub env_var: &'static str,
    /// Keychain service name.
    pub service: &'static str,
    /// Keychain account name.
    pub account: String,
}

impl SecretSpec {
    /// Creates a spec.
    pub fn new(env_var: &'static str, service: &'static str, account: impl Into<String>) -> Self {
        Self {
            env_var,
            service,
            account: account.into(),
        }
    }
}

/// Where a resolved secret came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretOrigin {
    /// Environment variable.
    Environment,
    /// OS credential store.
    Keychain,
    /// Imported from a browser.
    Browser,
    /// A session saved by an earlier import.
    Stored,
}

/// A secret together with its origin.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedSecret {
    /// The secret value.
    pub value: String,
    /// Where it was found.
    pub origin: SecretOrigin,
}

impl std::fmt::Debug for ResolvedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecret")
            .field("value", &format_args!("<{} bytes>", self.value.len()))
            .field("origin", &self.origin)
            .finish()
    }
}

// ============================================================================
// Credential Resolver
// ============================================================================

/// Resolves secrets in the fixed env → keychain order.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    keychain: KeychainCache,
    env: EnvSource,
}

/// Environment lookup, replaceable with a fixed map in tests.
#[derive(Debug, Clone, Default)]
enum EnvSource {
    #[default]
    Process,
    Fixed(HashMap<String, String>),
}

impl EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        let value = match self {
            Self::Process => std::env::var(key).ok(),
            Self::Fixed(map) => map.get(key).cloned(),
        }?;
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

impl CredentialResolver {
    /// Creates a resolver reading the process environment.
    pub fn new(keychain: KeychainCache) -> Self {
        Self {
            keychain,
            env: EnvSource::Process,
        }
    }

    /// Creates a resolver with a fixed environment.
    pub fn with_env(keychain: KeychainCache, env: HashMap<String, String>) -> Self {
        Self {
            keychain,
            env: EnvSource::Fixed(env),
        }
    }

    /// Returns the keychain this resolver reads.
    pub fn keychain(&self) -> &KeychainCache {
        &self.keychain
    }

    /// Resolves a secret, or `None` when neither source has it.
    ///
    /// Keychain failures are logged and treated as "not found" so a locked
    /// keychain never hides a working browser session.
    pub async fn resolve(&self, spec: &SecretSpec) -> Option<ResolvedSecret> {
        if let Some(value) = self.env.get(spec.env_var) {
            debug!(env_var = spec.env_var, "Secret resolved from environment");
            return Some(ResolvedSecret {
                value,
                origin: SecretOrigin::Environment,
            });
        }

        match self.keychain.get(spec.service, &spec.account).await {
            Ok(Some(value)) => {
                debug!(service = spec.service, account = %spec.account, "Secret resolved from keychain");
                Some(ResolvedSecret {
                    value,
                    origin: SecretOrigin::Keychain,
                })
            }
            Ok(None) => None,
            Err(e) => {
                warn!(service = spec.service, error = %e, "Keychain lookup failed");
                None
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::keychain::MemoryKeychain;
    use std::sync::Arc;

    fn spec() -> SecretSpec {
        SecretSpec::new("OPENAI_COOKIE", "openai", "a@x.com")
    }

    #[tokio::test]
    async fn test_env_wins_over_keychain() {
        let keychain = KeychainCache::new(Arc::new(
            MemoryKeychain::new().with_entry("openai", "a@x.com", "from-keychain"),
        ));
        let env = HashMap::from([("OPENAI_COOKIE".to_string(), "from-env".to_string())]);
        let resolver = CredentialResolver::with_env(keychain, env);

        let secret = resolver.resolve(&spec()).await.unwrap();
        assert_eq!(secret.value, "from-env");
        assert_eq!(secret.origin, SecretOrigin::Environment);
    }

    #[tokio::test]
    async fn test_keychain_used_when_env_blank() {
        let keychain = KeychainCache::new(Arc::new(
            MemoryKeychain::new().with_entry("openai", "a@x.com", "from-keychain"),
        ));
        let env = HashMap::from([("OPENAI_COOKIE".to_string(), "   ".to_string())]);
        let resolver = CredentialResolver::with_env(keychain, env);

        let secret = resolver.resolve(&spec()).await.unwrap();
        assert_eq!(secret.value, "from-keychain");
        assert_eq!(secret.origin, SecretOrigin::Keychain);
    }

    #[tokio::test]
    async fn test_nothing_found() {
        let keychain = KeychainCache::new(Arc::new(MemoryKeychain::new()));
        let resolver = CredentialResolver::with_env(keychain, HashMap::new());
        assert!(resolver.resolve(&spec()).await.is_none());
    }

    #[test]
    fn test_debug_hides_value() {
        let secret = ResolvedSecret {
            value: "sessionKey=secret".to_string(),
            origin: SecretOrigin::Browser,
        };
        assert!(!format!("{secret:?}").contains("secret\""));
        assert!(!format!("{secret:?}").contains("sessionKey"));
    }
}
