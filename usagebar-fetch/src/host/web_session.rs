//! Account-keyed browser sessions for cookie-authenticated probes.
//!
//! Sessions live under `<cache>/web-sessions/<sanitized-email>/<domain>.json`,
//! one directory per target account, so two accounts never share cookies.
//! [`WebSessionStore::with_account`] hands out a per-account async lock:
//! work for one email is serialized while different emails proceed
//! concurrently.
//!
//! [`resolve_account_cookies`] finds cookies signed in as the target
//! account, in order: explicit override (env or keychain), the stored
//! session, then each browser. A candidate signed in as someone else is
//! recorded and skipped; stored cookies are never deleted because of it.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, instrument, trace, warn};

use crate::error::{CookieImportError, ProbeError};
use crate::host::browser::{cookie_header, BrowserCookieImporter, Cookie};
use crate::host::credentials::{ResolvedSecret, SecretOrigin};

/// Directory name used when no target account is given.
const ANY_ACCOUNT_DIR: &str = "_default";

// ============================================================================
// Stored Session
// ============================================================================

/// On-disk form of a saved session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    saved_at: DateTime<Utc>,
    signed_in_email: Option<String>,
    cookies: Vec<Cookie>,
}

// ============================================================================
// Web Session Store
// ============================================================================

/// Per-account session storage.
#[derive(Debug)]
pub struct WebSessionStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl WebSessionStore {
    /// Creates a store rooted at `root` (the `web-sessions` directory).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Store under the platform cache directory.
    pub fn default_location() -> Self {
        let base = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join("usagebar").join("web-sessions"))
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory name for an account: lowercase, with anything outside
    /// `[a-z0-9@._-]` replaced by `_`.
    pub fn sanitize_email(email: &str) -> String {
        email
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    fn account_dir(&self, email: Option<&str>) -> PathBuf {
        match email {
            Some(email) => self.root.join(Self::sanitize_email(email)),
            None => self.root.join(ANY_ACCOUNT_DIR),
        }
    }

    /// Path of the session file for `email` and `domain`.
    pub fn session_path(&self, email: Option<&str>, domain: &str) -> PathBuf {
        self.account_dir(email).join(format!("{}.json", domain.trim_start_matches('.')))
    }

    /// Locks the account and returns a handle to its sessions.
    pub async fn with_account(&self, email: Option<&str>) -> AccountSession<'_> {
        let key = email.map_or_else(|| ANY_ACCOUNT_DIR.to_string(), Self::sanitize_email);
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key).or_default())
        };
        let guard = lock.lock_owned().await;
        AccountSession {
            store: self,
            email: email.map(|e| e.trim().to_string()),
            _guard: guard,
        }
    }
}

/// Exclusive access to one account's sessions.
#[derive(Debug)]
pub struct AccountSession<'a> {
    store: &'a WebSessionStore,
    email: Option<String>,
    _guard: OwnedMutexGuard<()>,
}

impl AccountSession<'_> {
    /// The target account, if any.
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    fn path(&self, domain: &str) -> PathBuf {
        self.store.session_path(self.email.as_deref(), domain)
    }

    /// Loads the stored cookies for `domain`.
    pub async fn load(&self, domain: &str) -> Result<Option<Vec<Cookie>>, CookieImportError> {
        let path = self.path(domain);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CookieImportError::Store(e.to_string())),
        };

        match serde_json::from_str::<StoredSession>(&content) {
            Ok(session) => {
                let cookies: Vec<Cookie> = session.cookies.into_iter().filter(|c| !c.is_expired()).collect();
                Ok((!cookies.is_empty()).then_some(cookies))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable session file");
                Ok(None)
            }
        }
    }

    /// Saves cookies for `domain` with owner-only permissions.
    pub async fn save(
        &self,
        domain: &str,
        signed_in_email: Option<&str>,
        cookies: &[Cookie],
    ) -> Result<(), CookieImportError> {
        let path = self.path(domain);
        let session = StoredSession {
            saved_at: Utc::now(),
            signed_in_email: signed_in_email.map(str::to_string),
            cookies: cookies.to_vec(),
        };
        let json = serde_json::to_string_pretty(&session).map_err(|e| CookieImportError::Store(e.to_string()))?;
        write_private(&path, json.as_bytes())
            .await
            .map_err(|e| CookieImportError::Store(e.to_string()))?;
        debug!(path = %path.display(), count = cookies.len(), "Saved web session");
        Ok(())
    }

    /// Removes the stored session for `domain`.
    pub async fn clear(&self, domain: &str) -> Result<(), CookieImportError> {
        match tokio::fs::remove_file(self.path(domain)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CookieImportError::Store(e.to_string())),
        }
    }
}

async fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
        set_mode(parent, 0o700).await?;
    }
    let temp = path.with_extension("json.tmp");
    tokio::fs::write(&temp, bytes).await?;
    set_mode(&temp, 0o600).await?;
    tokio::fs::rename(&temp, path).await
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

// ============================================================================
// Account Cookie Resolution
// ============================================================================

/// Cookies that are signed in as the target account.
#[derive(Debug, Clone)]
pub struct CookieResolution {
    /// `Cookie:` header value.
    pub header: String,
    /// Account the cookies are signed in as.
    pub signed_in_email: String,
    /// Where the cookies came from.
    pub origin: SecretOrigin,
}

fn emails_match(expected: &str, found: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(found.trim())
}

/// Finds cookies for `domain` signed in as the session's account.
///
/// `identify` turns a cookie header into the signed-in email. A
/// `LoginRequired` answer marks the candidate stale and moves on; any
/// other error ends the search. With no target account, the first
/// candidate that identifies wins.
#[instrument(skip_all, fields(domain = %domain, account = ?session.email()))]
pub async fn resolve_account_cookies<F, Fut>(
    session: &AccountSession<'_>,
    domain: &str,
    override_secret: Option<ResolvedSecret>,
    importer: &BrowserCookieImporter,
    identify: F,
) -> Result<CookieResolution, CookieImportError>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<String, ProbeError>>,
{
    let mut found: Vec<String> = Vec::new();
    let expected = session.email();

    if let Some(secret) = override_secret {
        let candidate = check_candidate(&identify, expected, secret.value, secret.origin, &mut found).await?;
        if let Some(resolution) = candidate {
            return Ok(resolution);
        }
    }

    if let Some(cookies) = session.load(domain).await? {
        let candidate =
            check_candidate(&identify, expected, cookie_header(&cookies), SecretOrigin::Stored, &mut found).await?;
        if let Some(resolution) = candidate {
            return Ok(resolution);
        }
    }

    for (browser, cookies) in importer.candidates(domain).await {
        debug!(browser = %browser, count = cookies.len(), "Checking browser session");
        let candidate =
            check_candidate(&identify, expected, cookie_header(&cookies), SecretOrigin::Browser, &mut found).await?;
        if let Some(resolution) = candidate {
            if let Err(e) = session
                .save(domain, Some(&resolution.signed_in_email), &cookies)
                .await
            {
                warn!(error = %e, "Failed to save web session");
            }
            return Ok(resolution);
        }
    }

    match expected {
        Some(expected) if !found.is_empty() => Err(CookieImportError::NoMatchingAccount {
            expected: expected.to_string(),
            found,
        }),
        _ => Err(CookieImportError::NoSession {
            domain: domain.to_string(),
        }),
    }
}

/// Identifies one candidate. Accounts that do not match are added to `found`.
async fn check_candidate<F, Fut>(
    identify: &F,
    expected: Option<&str>,
    header: String,
    origin: SecretOrigin,
    found: &mut Vec<String>,
) -> Result<Option<CookieResolution>, CookieImportError>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<String, ProbeError>>,
{
    match identify(header.clone()).await {
        Ok(email) => {
            if expected.is_none_or(|expected| emails_match(expected, &email)) {
                return Ok(Some(CookieResolution {
                    header,
                    signed_in_email: email,
                    origin,
                }));
            }
            debug!(origin = ?origin, found = %email, "Session belongs to another account");
            if !found.iter().any(|f| emails_match(f, &email)) {
                found.push(email);
            }
            Ok(None)
        }
        Err(ProbeError::LoginRequired(reason)) => {
            trace!(origin = ?origin, reason = %reason, "Session rejected");
            Ok(None)
        }
        Err(e) => Err(CookieImportError::Probe(e)),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::keychain::{KeychainCache, MemoryKeychain};
    use std::time::Duration;

    fn cookie(value: &str) -> Cookie {
        Cookie {
            name: "__Secure-next-auth.session-token".to_string(),
            value: value.to_string(),
            domain: ".chatgpt.com".to_string(),
            path: "/".to_string(),
            expires: None,
            secure: true,
            http_only: true,
        }
    }

    fn no_browsers(dir: &Path) -> BrowserCookieImporter {
        BrowserCookieImporter::new(KeychainCache::new(Arc::new(MemoryKeychain::new())))
            .with_store_path(crate::host::browser::Browser::Safari, dir.join("none-safari"))
            .with_store_path(crate::host::browser::Browser::Chrome, dir.join("none-chrome"))
    }

    /// Maps a cookie header to an email the way a server would.
    async fn identify(header: String) -> Result<String, ProbeError> {
        if header.contains("token-a") {
            Ok("a@example.com".to_string())
        } else if header.contains("token-b") {
            Ok("B@Example.com".to_string())
        } else if header.contains("network") {
            Err(ProbeError::NetworkError("reset".to_string()))
        } else {
            Err(ProbeError::LoginRequired("expired".to_string()))
        }
    }

    #[test]
    fn test_sanitize_email() {
        assert_eq!(WebSessionStore::sanitize_email(" Foo+Bar@Example.com "), "foo_bar@example.com");
        assert_eq!(WebSessionStore::sanitize_email("../../etc"), ".._.._etc");
    }

    #[tokio::test]
    async fn test_save_and_load_isolated_per_account() {
        let dir = tempfile::tempdir().unwrap();
        let store = WebSessionStore::new(dir.path());

        {
            let a = store.with_account(Some("a@example.com")).await;
            a.save("chatgpt.com", Some("a@example.com"), &[cookie("token-a")]).await.unwrap();
        }

        let a = store.with_account(Some("A@example.com")).await;
        assert_eq!(a.load("chatgpt.com").await.unwrap().unwrap()[0].value, "token-a");
        drop(a);

        let b = store.with_account(Some("b@example.com")).await;
        assert!(b.load("chatgpt.com").await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_saved_session_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = WebSessionStore::new(dir.path());
        let a = store.with_account(Some("a@example.com")).await;
        a.save("claude.ai", None, &[cookie("token-a")]).await.unwrap();

        let path = store.session_path(Some("a@example.com"), "claude.ai");
        let mode = std::fs::metadata(path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[tokio::test]
    async fn test_same_account_is_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(WebSessionStore::new(dir.path()));

        let held = store.with_account(Some("a@example.com")).await;
        let other = tokio::time::timeout(Duration::from_millis(50), store.with_account(Some("b@example.com"))).await;
        assert!(other.is_ok(), "different accounts must not block each other");

        let same = tokio::time::timeout(Duration::from_millis(50), store.with_account(Some("a@example.com"))).await;
        assert!(same.is_err(), "same account must wait for the holder");
        drop(held);
    }

    #[tokio::test]
    async fn test_resolve_prefers_override() {
        let dir = tempfile::tempdir().unwrap();
        let store = WebSessionStore::new(dir.path().join("sessions"));
        let session = store.with_account(Some("a@example.com")).await;
        let secret = ResolvedSecret {
            value: "__Secure-next-auth.session-token=token-a".to_string(),
            origin: SecretOrigin::Environment,
        };

        let resolved = resolve_account_cookies(&session, "chatgpt.com", Some(secret), &no_browsers(dir.path()), identify)
            .await
            .unwrap();
        assert_eq!(resolved.signed_in_email, "a@example.com");
        assert_eq!(resolved.origin, SecretOrigin::Environment);
    }

    #[tokio::test]
    async fn test_resolve_mismatch_keeps_stored_cookies() {
        let dir = tempfile::tempdir().unwrap();
        let store = WebSessionStore::new(dir.path().join("sessions"));
        let session = store.with_account(Some("a@example.com")).await;
        session.save("chatgpt.com", Some("b@example.com"), &[cookie("token-b")]).await.unwrap();

        let err = resolve_account_cookies(&session, "chatgpt.com", None, &no_browsers(dir.path()), identify)
            .await
            .unwrap_err();
        match err {
            CookieImportError::NoMatchingAccount { expected, found } => {
                assert_eq!(expected, "a@example.com");
                assert_eq!(found, vec!["B@Example.com".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(session.load("chatgpt.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_resolve_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = WebSessionStore::new(dir.path().join("sessions"));
        let session = store.with_account(Some("a@example.com")).await;
        session.save("chatgpt.com", None, &[cookie("stale")]).await.unwrap();

        let err = resolve_account_cookies(&session, "chatgpt.com", None, &no_browsers(dir.path()), identify)
            .await
            .unwrap_err();
        assert!(matches!(err, CookieImportError::NoSession { .. }));
    }

    #[tokio::test]
    async fn test_resolve_network_error_stops() {
        let dir = tempfile::tempdir().unwrap();
        let store = WebSessionStore::new(dir.path().join("sessions"));
        let session = store.with_account(None).await;
        let secret = ResolvedSecret {
            value: "network".to_string(),
            origin: SecretOrigin::Keychain,
        };
        let err = resolve_account_cookies(&session, "chatgpt.com", Some(secret), &no_browsers(dir.path()), identify)
            .await
            .unwrap_err();
        assert!(matches!(err, CookieImportError::Probe(ProbeError::NetworkError(_))));
    }

    #[tokio::test]
    async fn test_resolve_any_account() {
        let dir = tempfile::tempdir().unwrap();
        let store = WebSessionStore::new(dir.path().join("sessions"));
        let session = store.with_account(None).await;
        session.save("chatgpt.com", None, &[cookie("token-b")]).await.unwrap();

        let resolved = resolve_account_cookies(&session, "chatgpt.com", None, &no_browsers(dir.path()), identify)
            .await
            .unwrap();
        assert_eq!(resolved.signed_in_email, "B@Example.com");
        assert_eq!(resolved.origin, SecretOrigin::Stored);
    }
}
