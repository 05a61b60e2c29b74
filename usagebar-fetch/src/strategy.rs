//! Strategy kinds and ordered execution.
//!
//! A provider lists the [`StrategyKind`]s it supports in priority order.
//! [`run_ordered`] tries them one after another, recording every attempt,
//! and only moves on when the caller's fallback predicate accepts the
//! failure. Any other failure is final: a parse error from the primary
//! source must not be papered over by a weaker one.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use usagebar_core::FetchSource;

use crate::error::ProbeError;

// ============================================================================
// Strategy Kind
// ============================================================================

/// The closed set of ways usage can be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// JSON-RPC against a CLI's app server.
    Rpc,
    /// Screen scrape of an interactive CLI in a pseudo-terminal.
    PtyScrape,
    /// Web API authenticated with browser cookies.
    WebCookie,
    /// Cloud quota API authenticated with OAuth.
    OAuthQuota,
}

impl StrategyKind {
    /// Returns the display name for this kind.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Rpc => "RPC",
            Self::PtyScrape => "PTY",
            Self::WebCookie => "Web Cookies",
            Self::OAuthQuota => "OAuth",
        }
    }

    /// The source recorded on snapshots fetched this way.
    pub fn fetch_source(&self) -> FetchSource {
        match self {
            Self::Rpc => FetchSource::Rpc,
            Self::PtyScrape => FetchSource::Pty,
            Self::WebCookie => FetchSource::Web,
            Self::OAuthQuota => FetchSource::OAuth,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

// ============================================================================
// Fetch Attempt
// ============================================================================

/// Record of a single attempt.
#[derive(Debug, Clone)]
pub struct FetchAttempt {
    /// The strategy tried.
    pub kind: StrategyKind,
    /// Error message if the attempt failed.
    pub error: Option<String>,
    /// How long the attempt took.
    pub duration: Duration,
}

impl FetchAttempt {
    /// Returns true if the attempt succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

// ============================================================================
// Fetch Outcome
// ============================================================================

/// Result of an ordered run.
#[derive(Debug)]
pub struct FetchOutcome<T, E> {
    /// The value, or the error that ended the run.
    pub result: Result<T, E>,
    /// The strategy that produced `result`.
    pub kind: Option<StrategyKind>,
    /// Every attempt made, in order.
    pub attempts: Vec<FetchAttempt>,
    /// Total duration.
    pub duration: Duration,
}

impl<T, E> FetchOutcome<T, E> {
    /// Returns true if the run succeeded.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Number of attempts made.
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }
}

/// Tries `kinds` in order.
///
/// After a failure, the next kind runs only if `should_fallback` returns
/// true for the error. The last error is returned when every kind fails.
pub async fn run_ordered<T, E, F, Fut, P>(
    kinds: &[StrategyKind],
    should_fallback: P,
    mut run: F,
) -> FetchOutcome<T, E>
where
    E: fmt::Display + From<ProbeError>,
    F: FnMut(StrategyKind) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let start = Instant::now();
    let mut attempts = Vec::with_capacity(kinds.len());

    for (index, kind) in kinds.iter().copied().enumerate() {
        debug!(strategy = %kind, "Trying strategy");
        let attempt_start = Instant::now();
        let result = run(kind).await;
        let duration = attempt_start.elapsed();

        match result {
            Ok(value) => {
                info!(strategy = %kind, duration = ?duration, "Strategy succeeded");
                attempts.push(FetchAttempt {
                    kind,
                    error: None,
                    duration,
                });
                return FetchOutcome {
                    result: Ok(value),
                    kind: Some(kind),
                    attempts,
                    duration: start.elapsed(),
                };
            }
            Err(e) => {
                attempts.push(FetchAttempt {
                    kind,
                    error: Some(e.to_string()),
                    duration,
                });
                let has_next = index + 1 < kinds.len();
                if has_next && should_fallback(&e) {
                    warn!(strategy = %kind, error = %e, "Strategy failed, falling back");
                    continue;
                }
                return FetchOutcome {
                    result: Err(e),
                    kind: Some(kind),
                    attempts,
                    duration: start.elapsed(),
                };
            }
        }
    }

    FetchOutcome {
        result: Err(E::from(ProbeError::Unexpected("no strategies available".to_string()))),
        kind: None,
        attempts,
        duration: start.elapsed(),
    }
}

// ============================================================================
// Tests
// ============================================================================
