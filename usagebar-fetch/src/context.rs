//! Probe context providing access to host services.
//!
//! The context is passed to every provider probe and bundles the services
//! a probe may need: binary resolution, keychain, HTTP, PTY, browser
//! cookies, web sessions and status pages. Each service is an ordinary
//! value, so tests build a context from fakes and a long-running process
//! can rebuild one to drop every cache.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::HttpError;
use crate::host::{
    browser::BrowserCookieImporter,
    credentials::CredentialResolver,
    http::HttpClient,
    keychain::{KeychainApi, KeychainCache, SystemKeychain},
    path::PathResolver,
    process::ProcessRunner,
    pty::PtyRunner,
    status::StatusPoller,
    web_session::WebSessionStore,
};

// ============================================================================
// Probe Settings
// ============================================================================

/// Settings for probe operations.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Timeout for a single CLI or API probe.
    pub probe_timeout: Duration,
    /// Whether web enrichment (OpenAI dashboard) runs.
    pub web_enabled: bool,
    /// Timeout for web requests.
    pub web_timeout: Duration,
    /// Account the web session must be signed in as.
    pub expected_web_account: Option<String>,
    /// Whether Codex credits are fetched.
    pub include_credits: bool,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(20),
            web_enabled: false,
            web_timeout: Duration::from_secs(60),
            expected_web_account: None,
            include_credits: true,
        }
    }
}

impl ProbeSettings {
    /// Enables web enrichment.
    pub fn with_web(mut self, timeout: Duration) -> Self {
        self.web_enabled = true;
        self.web_timeout = timeout;
        self
    }

    /// Sets the expected web account. Blank values clear it.
    pub fn with_expected_account(mut self, email: Option<String>) -> Self {
        self.expected_web_account = email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());
        self
    }
}

// ============================================================================
// Probe Context
// ============================================================================

/// Context provided to provider probes.
pub struct ProbeContext {
    /// Binary search path.
    pub resolver: Arc<PathResolver>,
    /// Keychain for usagebar's own entries.
    pub keychain: KeychainCache,
    /// Env-then-keychain secret lookup.
    pub credentials: CredentialResolver,
    /// HTTP client.
    pub http: HttpClient,
    /// One-shot process runner.
    pub process: ProcessRunner,
    /// Pseudo-terminal runner.
    pub pty: PtyRunner,
    /// Browser cookie importer.
    pub browser: BrowserCookieImporter,
    /// Per-email web session store.
    pub web_sessions: Arc<WebSessionStore>,
    /// Status page poller.
    pub status: StatusPoller,
    /// Probe settings.
    pub settings: ProbeSettings,
    home: Option<PathBuf>,
    env: Option<HashMap<String, String>>,
}

impl ProbeContext {
    /// Creates a builder for customizing the context.
    pub fn builder() -> ProbeContextBuilder {
        ProbeContextBuilder::new()
    }

    /// Creates a context with system services and `settings`.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built.
    pub fn with_settings(settings: ProbeSettings) -> Result<Self, HttpError> {
        ProbeContextBuilder::new().settings(settings).build()
    }

    /// Reads an environment variable, honoring a fixed test environment.
    /// Blank values read as unset.
    pub fn env_var(&self, key: &str) -> Option<String> {
        let value = match &self.env {
            Some(map) => map.get(key).cloned(),
            None => std::env::var(key).ok(),
        }?;
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    /// The user's home directory.
    pub fn home_dir(&self) -> Option<PathBuf> {
        self.home.clone().or_else(dirs::home_dir)
    }

    /// Resolves a directory from `env_key`, falling back to `default` under home.
    pub fn dir_from_env(&self, env_key: &str, default: &str) -> Option<PathBuf> {
        self.env_var(env_key)
            .map(PathBuf::from)
            .or_else(|| self.home_dir().map(|home| home.join(default)))
    }

    /// Returns the probe timeout.
    pub fn timeout(&self) -> Duration {
        self.settings.probe_timeout
    }
}

impl std::fmt::Debug for ProbeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeContext")
            .field("settings", &self.settings)
            .field("home", &self.home)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Probe Context Builder
// ============================================================================

/// Builder for constructing a [`ProbeContext`].
#[derive(Default)]
pub struct ProbeContextBuilder {
    resolver: Option<Arc<PathResolver>>,
    keychain: Option<Arc<dyn KeychainApi>>,
    browser_keychain: Option<Arc<dyn KeychainApi>>,
    http: Option<HttpClient>,
    browser: Option<BrowserCookieImporter>,
    web_sessions: Option<Arc<WebSessionStore>>,
    home: Option<PathBuf>,
    env: Option<HashMap<String, String>>,
    settings: ProbeSettings,
}

impl ProbeContextBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the binary resolver.
    pub fn resolver(mut self, resolver: Arc<PathResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Sets the keychain backend.
    pub fn keychain(mut self, keychain: Arc<dyn KeychainApi>) -> Self {
        self.keychain = Some(keychain);
        self
    }

    /// Sets the keychain used for browser cookie decryption keys.
    pub fn browser_keychain(mut self, keychain: Arc<dyn KeychainApi>) -> Self {
        self.browser_keychain = Some(keychain);
        self
    }

    /// Sets the HTTP client.
    pub fn http(mut self, http: HttpClient) -> Self {
        self.http = Some(http);
        self
    }

    /// Sets the browser cookie importer.
    pub fn browser(mut self, browser: BrowserCookieImporter) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Sets the web session store.
    pub fn web_sessions(mut self, store: Arc<WebSessionStore>) -> Self {
        self.web_sessions = Some(store);
        self
    }

    /// Overrides the home directory.
    pub fn home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Replaces the process environment with a fixed map.
    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Sets the probe settings.
    pub fn settings(mut self, settings: ProbeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the probe timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.settings.probe_timeout = timeout;
        self
    }

    /// Builds the context.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built.
    pub fn build(self) -> Result<ProbeContext, HttpError> {
        let settings = self.settings;
        let resolver = self.resolver.unwrap_or_else(|| Arc::new(PathResolver::new()));
        let keychain = KeychainCache::new(self.keychain.unwrap_or_else(|| Arc::new(SystemKeychain::new())));
        let credentials = match &self.env {
            Some(env) => CredentialResolver::with_env(keychain.clone(), env.clone()),
            None => CredentialResolver::new(keychain.clone()),
        };
        let http = match self.http {
            Some(http) => http,
            None => HttpClient::with_timeout(settings.web_timeout)?,
        };
        let browser = self.browser.unwrap_or_else(|| {
            let backend = self
                .browser_keychain
                .unwrap_or_else(|| Arc::new(SystemKeychain::external()));
            BrowserCookieImporter::new(KeychainCache::new(backend))
        });

        Ok(ProbeContext {
            process: ProcessRunner::new(Arc::clone(&resolver)).with_timeout(settings.probe_timeout),
            pty: PtyRunner::new(Arc::clone(&resolver)),
            status: StatusPoller::new(http.clone()),
            web_sessions: self
                .web_sessions
                .unwrap_or_else(|| Arc::new(WebSessionStore::default_location())),
            resolver,
            keychain,
            credentials,
            http,
            browser,
            settings,
            home: self.home,
            env: self.env,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
