//! Pseudo-terminal runner for interactive CLIs.
//!
//! Some CLIs only report usage inside their TUI. The runner spawns them in
//! a pseudo-terminal, answers start-up prompts, types a slash command and
//! captures the screen once the expected output appears.
//!
//! The pieces:
//!
//! - [`session`]: the conversation as a pure state machine
//! - [`terminal`]: the byte source, real ([`NativeTerminal`]) or canned
//!   ([`ScriptedTerminal`])
//! - [`drive`]: the blocking loop that feeds one into the other
//! - [`PtyRunner`]: the async entry point, which drives on a blocking thread
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use usagebar_fetch::host::path::PathResolver;
//! use usagebar_fetch::host::pty::{PtyRunner, PtyScript};
//!
//! # async fn example() -> Result<(), usagebar_fetch::PtyError> {
//! let runner = PtyRunner::new(Arc::new(PathResolver::new()));
//! let script = PtyScript::new("codex", "/status").completion_marker("Weekly limit");
//! let capture = runner.run(script).await?;
//! println!("{}", capture.output);
//! # Ok(())
//! # }
//! ```

pub mod session;
pub mod terminal;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

pub use session::{PromptHandler, PtyAction, PtyEvent, PtyOutcome, PtyPhase, PtyScript, PtySession};
pub use terminal::{NativeTerminal, ScriptedTerminal, TerminalChunk, TerminalSource};

use crate::error::PtyError;
use crate::host::path::PathResolver;

/// Default terminal width in columns.
const DEFAULT_COLS: u16 = 160;

/// Default terminal height in rows.
const DEFAULT_ROWS: u16 = 50;

/// Polling interval for terminal output.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

// ============================================================================
// Capture
// ============================================================================

/// Output of a finished PTY conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyCapture {
    /// Raw screen output, ANSI included.
    pub output: String,
    /// Whether completion markers were seen (false if the child exited first).
    pub markers_found: bool,
}

// ============================================================================
// Driver
// ============================================================================

/// Feeds terminal events into `session` until it finishes.
///
/// `cancel` is checked between events; when set, the child is terminated
/// and [`PtyError::Cancelled`] is returned.
pub fn drive(
    session: &mut PtySession,
    terminal: &mut dyn TerminalSource,
    poll: Duration,
    cancel: &AtomicBool,
) -> Result<PtyOutcome, PtyError> {
    let mut queue = VecDeque::from([PtyEvent::Spawned]);

    loop {
        if cancel.load(Ordering::SeqCst) {
            debug!("PTY session cancelled");
            terminal.terminate();
            return Err(PtyError::Cancelled);
        }

        let event = match queue.pop_front() {
            Some(event) => event,
            None => match terminal.poll(poll) {
                TerminalChunk::Data(text) => PtyEvent::Output(text),
                TerminalChunk::Idle => PtyEvent::Tick,
                TerminalChunk::Closed => PtyEvent::Exited,
            },
        };

        for action in session.handle(event, Instant::now()) {
            match action {
                PtyAction::Write(keys) => {
                    if let Err(e) = terminal.write_all(keys.as_bytes()) {
                        warn!(error = %e, "Failed to write to PTY");
                    }
                }
                PtyAction::Terminate => terminal.terminate(),
                PtyAction::Finish(outcome) => return Ok(outcome),
            }
        }
    }
}

/// Runs `script` against `terminal` and converts the outcome.
pub fn run_script(
    script: PtyScript,
    terminal: &mut dyn TerminalSource,
    poll: Duration,
    cancel: &AtomicBool,
) -> Result<PtyCapture, PtyError> {
    let timeout = script.timeout;
    let mut session = PtySession::new(script);
    let outcome = drive(&mut session, terminal, poll, cancel);
    terminal.terminate();

    match outcome? {
        PtyOutcome::Captured => Ok(PtyCapture {
            output: session.into_output(),
            markers_found: true,
        }),
        PtyOutcome::Exited => Ok(PtyCapture {
            output: session.into_output(),
            markers_found: false,
        }),
        PtyOutcome::TimedOut => Err(PtyError::TimedOut(timeout)),
        PtyOutcome::LoginRequired(marker) => Err(PtyError::LoginRequired(marker)),
    }
}

// ============================================================================
// PTY Runner
// ============================================================================

/// Sets the flag when dropped, so an abandoned future stops the child.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Async entry point for PTY conversations.
#[derive(Debug, Clone)]
pub struct PtyRunner {
    resolver: Arc<PathResolver>,
    cols: u16,
    rows: u16,
    poll: Duration,
}

impl PtyRunner {
    /// Creates a runner resolving binaries through `resolver`.
    pub fn new(resolver: Arc<PathResolver>) -> Self {
        Self {
            resolver,
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            poll: POLL_INTERVAL,
        }
    }

    /// Sets the terminal size.
    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    /// Returns true if `binary` resolves.
    pub fn is_available(&self, binary: &str) -> bool {
        self.resolver.resolve(binary).is_some()
    }

    /// Spawns the script's binary and drives the conversation.
    ///
    /// Dropping the returned future terminates the child.
    #[instrument(skip(self, script), fields(binary = %script.binary, command = %script.command))]
    pub async fn run(&self, script: PtyScript) -> Result<PtyCapture, PtyError> {
        let path = self.resolver.resolve(&script.binary).ok_or_else(|| {
            warn!(binary = %script.binary, "Binary not found");
            PtyError::BinaryNotFound(script.binary.clone())
        })?;

        let search_path = self.resolver.search_path();
        let (cols, rows, poll) = (self.cols, self.rows, self.poll);
        let cancel = Arc::new(AtomicBool::new(false));
        let guard = CancelOnDrop(Arc::clone(&cancel));

        let result = tokio::task::spawn_blocking(move || {
            let mut terminal = NativeTerminal::spawn(&path, &script, &search_path, cols, rows)?;
            run_script(script, &mut terminal, poll, &cancel)
        })
        .await
        .map_err(|e| PtyError::SpawnFailed(format!("PTY task failed: {e}")))?;

        drop(guard);
        if let Ok(capture) = &result {
            debug!(output_len = capture.output.len(), markers = capture.markers_found, "PTY capture finished");
        }
        result
    }
}

// ============================================================================
// Tests
// ============================================================================
