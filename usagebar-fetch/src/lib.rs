// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # usagebar Fetch
//!
//! Host services and probe plumbing for usagebar.
//!
//! ## Host Services
//!
//! The [`host`] module wraps every system interaction a probe makes:
//!
//! - [`host::path`] - Binary resolution (`PATH` plus well-known install dirs)
//! - [`host::pty`] - Pseudo-terminal state machine and runner
//! - [`host::process`] - One-shot subprocess execution
//! - [`host::http`] - HTTP client with tracing and domain allowlist
//! - [`host::keychain`] - Keychain access behind [`KeychainCache`]
//! - [`host::credentials`] - Env-then-keychain secret resolution
//! - [`host::browser`] - Safari and Chrome cookie import
//! - [`host::web_session`] - Per-email cookie sessions
//! - [`host::status`] - statuspage.io and Google Cloud status
//!
//! ## Probing
//!
//! - [`context::ProbeContext`] - The services handed to each probe
//! - [`strategy::run_ordered`] - Ordered strategy execution with fallback
//! - [`error::ProbeError`] - The failure taxonomy and its exit codes

pub mod context;
pub mod error;
pub mod host;
pub mod strategy;

// Errors
pub use error::{
    BrowserError, CookieImportError, HttpError, KeychainError, ProbeError, ProcessError,
    PtyError, StatusError,
};

// Host APIs
pub use host::{
    browser::{Browser, BrowserCookieImporter, Cookie},
    credentials::{CredentialResolver, ResolvedSecret, SecretOrigin, SecretSpec},
    http::{HttpClient, RequestAuth},
    keychain::{KeychainApi, KeychainCache, MemoryKeychain, SystemKeychain},
    path::PathResolver,
    process::{ProcessOutput, ProcessRunner},
    pty::{PtyCapture, PtyRunner, PtyScript},
    status::StatusPoller,
    web_session::{CookieResolution, WebSessionStore},
};

// Probing
pub use context::{ProbeContext, ProbeContextBuilder, ProbeSettings};
pub use strategy::{FetchAttempt, FetchOutcome, StrategyKind, run_ordered};
