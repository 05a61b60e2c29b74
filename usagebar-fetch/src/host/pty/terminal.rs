//! Byte sources the PTY driver reads from and writes to.
//!
//! [`NativeTerminal`] runs a real child in a pseudo-terminal;
//! [`ScriptedTerminal`] replays canned output for tests.

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, trace, warn};

use super::session::PtyScript;
use crate::error::PtyError;

/// Buffer size for reading from the PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Time a child gets between SIGTERM and SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_millis(500);

// ============================================================================
// Terminal Source
// ============================================================================

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalChunk {
    /// Decoded output.
    Data(String),
    /// Nothing arrived within the poll timeout.
    Idle,
    /// The stream is closed.
    Closed,
}

/// A bidirectional terminal stream.
pub trait TerminalSource: Send {
    /// Writes keystrokes.
    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()>;

    /// Waits up to `timeout` for output.
    fn poll(&mut self, timeout: Duration) -> TerminalChunk;

    /// Stops the child and releases the terminal. Idempotent.
    fn terminate(&mut self);
}

// ============================================================================
// UTF-8 Decoding
// ============================================================================

/// Decodes UTF-8 across read boundaries.
///
/// A multi-byte character split between two reads is held back until the
/// rest arrives. Invalid bytes decode lossily.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    /// Feeds bytes and returns everything decodable so far.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_string();
                self.pending.clear();
                text
            }
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                let text = String::from_utf8_lossy(&self.pending[..valid]).into_owned();
                self.pending.drain(..valid);
                text
            }
            Err(_) => {
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                text
            }
        }
    }
}

// ============================================================================
// Native Terminal
// ============================================================================

enum ReaderMessage {
    Data(Vec<u8>),
    Closed,
}

/// A child process running in a real pseudo-terminal.
pub struct NativeTerminal {
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    _master: Box<dyn MasterPty + Send>,
    rx: mpsc::Receiver<ReaderMessage>,
    decoder: Utf8Carry,
    closed: bool,
    terminated: bool,
}

impl std::fmt::Debug for NativeTerminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeTerminal")
            .field("pid", &self.child.process_id())
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}

impl NativeTerminal {
    /// Spawns `binary` with the script's arguments and environment.
    pub fn spawn(
        binary: &Path,
        script: &PtyScript,
        search_path: &OsStr,
        cols: u16,
        rows: u16,
    ) -> Result<Self, PtyError> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(binary);
        cmd.args(&script.args);
        cmd.env("PATH", search_path);
        cmd.env("TERM", "xterm-256color");
        for (key, value) in &script.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &script.working_dir {
            cmd.cwd(dir);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;
        // The master sees EOF only once every slave handle is gone.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to get PTY reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to get PTY writer: {e}")))?;

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || read_loop(reader, &tx));

        debug!(pid = ?child.process_id(), binary = %binary.display(), "Spawned PTY child");

        Ok(Self {
            child,
            writer,
            _master: pair.master,
            rx,
            decoder: Utf8Carry::default(),
            closed: false,
            terminated: false,
        })
    }

    fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }
}

fn read_loop(mut reader: Box<dyn Read + Send>, tx: &mpsc::Sender<ReaderMessage>) {
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buffer) {
            // Linux reports EIO on the master once the child is gone.
            Ok(0) | Err(_) => {
                let _ = tx.send(ReaderMessage::Closed);
                break;
            }
            Ok(n) => {
                if tx.send(ReaderMessage::Data(buffer[..n].to_vec())).is_err() {
                    break;
                }
            }
        }
    }
}

impl TerminalSource for NativeTerminal {
    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()
    }

    fn poll(&mut self, timeout: Duration) -> TerminalChunk {
        if self.closed {
            return TerminalChunk::Closed;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(ReaderMessage::Data(bytes)) => TerminalChunk::Data(self.decoder.decode(&bytes)),
            Ok(ReaderMessage::Closed) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                self.closed = true;
                TerminalChunk::Closed
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if !self.has_exited() {
                    return TerminalChunk::Idle;
                }
                // Child is gone; hand over whatever the reader still holds.
                let mut tail = Vec::new();
                while let Ok(ReaderMessage::Data(bytes)) = self.rx.try_recv() {
                    tail.extend_from_slice(&bytes);
                }
                self.closed = true;
                if tail.is_empty() {
                    TerminalChunk::Closed
                } else {
                    TerminalChunk::Data(self.decoder.decode(&tail))
                }
            }
        }
    }

    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        if !self.has_exited() && !signal_and_wait(self.child.as_mut(), TERMINATE_GRACE) {
            warn!(pid = ?self.child.process_id(), "Child ignored SIGTERM, killing");
            kill_hard(self.child.as_mut());
        }

        match self.child.wait() {
            Ok(status) => trace!(status = ?status, "Reaped PTY child"),
            Err(e) => warn!(error = %e, "Failed to reap PTY child"),
        }
    }
}

impl Drop for NativeTerminal {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Sends SIGTERM and waits up to `grace` for the child to exit.
#[cfg(unix)]
fn signal_and_wait(child: &mut (dyn Child + Send + Sync), grace: Duration) -> bool {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.process_id().and_then(|pid| i32::try_from(pid).ok()) else {
        return false;
    };
    if let Err(e) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
        trace!(pid, error = %e, "SIGTERM failed");
        return false;
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if matches!(child.try_wait(), Ok(Some(_))) {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    false
}

#[cfg(not(unix))]
fn signal_and_wait(_child: &mut (dyn Child + Send + Sync), _grace: Duration) -> bool {
    false
}

#[cfg(unix)]
fn kill_hard(child: &mut (dyn Child + Send + Sync)) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    match child.process_id().and_then(|pid| i32::try_from(pid).ok()) {
        Some(pid) => {
            let _ = signal::kill(Pid::from_raw(pid), Signal::SIGKILL);
        }
        None => {
            let _ = child.kill();
        }
    }
}

#[cfg(not(unix))]
fn kill_hard(child: &mut (dyn Child + Send + Sync)) {
    let _ = child.kill();
}

// ============================================================================
// Scripted Terminal
// ============================================================================

/// A canned terminal for tests.
///
/// Output queued with [`emit`](Self::emit) is returned by successive polls.
/// [`on_write`](Self::on_write) queues a reply the first time a write
/// contains the trigger.
#[derive(Debug, Default)]
pub struct ScriptedTerminal {
    pending: VecDeque<String>,
    replies: Vec<(String, String, bool)>,
    written: Vec<String>,
    close_when_idle: bool,
    terminated: bool,
}

impl ScriptedTerminal {
    /// Creates an empty terminal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues output.
    pub fn emit(mut self, text: impl Into<String>) -> Self {
        self.pending.push_back(text.into());
        self
    }

    /// Queues `reply` when a write contains `trigger`.
    pub fn on_write(mut self, trigger: impl Into<String>, reply: impl Into<String>) -> Self {
        self.replies.push((trigger.into(), reply.into(), false));
        self
    }

    /// Reports the stream closed once the queue is empty.
    pub fn close_when_idle(mut self) -> Self {
        self.close_when_idle = true;
        self
    }

    /// Everything written so far.
    pub fn written(&self) -> &[String] {
        &self.written
    }

    /// Returns true once [`TerminalSource::terminate`] was called.
    pub fn was_terminated(&self) -> bool {
        self.terminated
    }
}

impl TerminalSource for ScriptedTerminal {
    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        let text = String::from_utf8_lossy(data).into_owned();
        for (trigger, reply, fired) in &mut self.replies {
            if !*fired && text.contains(trigger.as_str()) {
                *fired = true;
                self.pending.push_back(reply.clone());
            }
        }
        self.written.push(text);
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> TerminalChunk {
        if let Some(text) = self.pending.pop_front() {
            return TerminalChunk::Data(text);
        }
        if self.terminated || self.close_when_idle {
            return TerminalChunk::Closed;
        }
        thread::sleep(timeout.min(Duration::from_millis(1)));
        TerminalChunk::Idle
    }

    fn terminate(&mut self) {
        self.terminated = true;
    }
}

// ============================================================================
// Tests
// ============================================================================
