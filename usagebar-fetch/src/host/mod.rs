//! Host services for usagebar probes.
//!
//! - [`path`] - Binary resolution over an explicit search path
//! - [`process`] - One-shot subprocess execution
//! - [`pty`] - Pseudo-terminal conversations with interactive CLIs
//! - [`http`] - HTTP client with tracing and domain allowlist
//! - [`keychain`] - Secure credential storage with an injectable cache
//! - [`credentials`] - Env-then-keychain secret resolution
//! - [`browser`] - Browser cookie import
//! - [`web_session`] - Per-email cookie sessions
//! - [`status`] - Status page polling

pub mod browser;
pub mod credentials;
pub mod http;
pub mod keychain;
pub mod path;
pub mod process;
pub mod pty;
pub mod status;
pub mod web_session;

pub use browser::{Browser, BrowserCookieImporter, Cookie, cookie_header};
pub use credentials::{CredentialResolver, ResolvedSecret, SecretOrigin, SecretSpec};
pub use http::{HttpClient, RequestAuth};
pub use keychain::{KeychainApi, KeychainCache, MemoryKeychain, SystemKeychain};
pub use path::PathResolver;
pub use process::{ProcessOutput, ProcessRunner};
pub use pty::{PtyCapture, PtyRunner, PtyScript};
pub use status::StatusPoller;
pub use web_session::{AccountSession, CookieResolution, WebSessionStore, resolve_account_cookies};
