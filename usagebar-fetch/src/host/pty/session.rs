//! The PTY conversation as a pure state machine.
//!
//! [`PtySession::handle`] takes one [`PtyEvent`] and the current instant
//! and returns the [`PtyAction`]s to perform. It never touches a terminal
//! or a clock, so every transition can be exercised with synthetic
//! instants.
//!
//! ```text
//! Idle → Spawned → AwaitingBoot → CommandSent → AwaitingMarker → Captured → Closed
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, trace};
use usagebar_core::text::strip_ansi;

/// Default overall timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Default wait for a boot marker before typing anyway.
const DEFAULT_BOOT_TIMEOUT: Duration = Duration::from_secs(4);

/// Default Enter re-send interval.
const DEFAULT_ENTER_INTERVAL: Duration = Duration::from_millis(800);

/// Default interval between command re-sends.
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(4);

/// Default number of command re-sends.
const DEFAULT_COMMAND_RETRIES: u32 = 2;

/// Default read-on after markers appear.
const DEFAULT_SETTLE: Duration = Duration::from_millis(400);

// ============================================================================
// Script
// ============================================================================

/// Keystrokes sent when a prompt appears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptHandler {
    /// Text that identifies the prompt.
    pub needle: String,
    /// Keystrokes to answer with.
    pub response: String,
}

/// What to run and how to talk to it.
#[derive(Debug, Clone)]
pub struct PtyScript {
    /// Binary name, resolved through the path resolver.
    pub binary: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Extra environment.
    pub env: Vec<(String, String)>,
    /// Working directory.
    pub working_dir: Option<PathBuf>,
    /// Prompt handlers, answered once each.
    pub prompts: Vec<PromptHandler>,
    /// Text that means the CLI wants the user to sign in.
    pub login_markers: Vec<String>,
    /// Text that means the CLI is ready for input.
    pub boot_markers: Vec<String>,
    /// Longest wait for a boot marker before typing anyway.
    pub boot_timeout: Duration,
    /// The command to type (Enter is appended).
    pub command: String,
    /// Text that means the command's output is on screen.
    pub completion_markers: Vec<String>,
    /// Overall deadline.
    pub timeout: Duration,
    /// Enter re-send interval while waiting for markers.
    pub enter_interval: Duration,
    /// How many times the command may be re-sent.
    pub command_retries: u32,
    /// Interval between command re-sends.
    pub retry_interval: Duration,
    /// How long to keep reading after markers appear.
    pub settle: Duration,
}

impl PtyScript {
    /// Creates a script that types `command` into `binary`.
    pub fn new(binary: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
            prompts: Vec::new(),
            login_markers: Vec::new(),
            boot_markers: Vec::new(),
            boot_timeout: DEFAULT_BOOT_TIMEOUT,
            command: command.into(),
            completion_markers: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            enter_interval: DEFAULT_ENTER_INTERVAL,
            command_retries: DEFAULT_COMMAND_RETRIES,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            settle: DEFAULT_SETTLE,
        }
    }

    /// Adds arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the working directory.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Answers `needle` with `response`.
    pub fn prompt(mut self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.prompts.push(PromptHandler {
            needle: needle.into(),
            response: response.into(),
        });
        self
    }

    /// Aborts with "login required" when `marker` appears.
    pub fn login_marker(mut self, marker: impl Into<String>) -> Self {
        self.login_markers.push(marker.into());
        self
    }

    /// Types the command once `marker` appears.
    pub fn boot_marker(mut self, marker: impl Into<String>) -> Self {
        self.boot_markers.push(marker.into());
        self
    }

    /// Captures once `marker` appears after the command.
    pub fn completion_marker(mut self, marker: impl Into<String>) -> Self {
        self.completion_markers.push(marker.into());
        self
    }

    /// Sets the overall deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the boot marker wait.
    pub fn boot_timeout(mut self, timeout: Duration) -> Self {
        self.boot_timeout = timeout;
        self
    }

    /// Sets the Enter re-send interval.
    pub fn enter_interval(mut self, interval: Duration) -> Self {
        self.enter_interval = interval;
        self
    }

    /// Sets the command re-send budget.
    pub fn command_retries(mut self, retries: u32, interval: Duration) -> Self {
        self.command_retries = retries;
        self.retry_interval = interval;
        self
    }

    /// Sets the settle duration.
    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

// ============================================================================
// Events, Actions, Outcomes
// ============================================================================

/// Conversation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtyPhase {
    /// Nothing has happened yet.
    Idle,
    /// The child is running.
    Spawned,
    /// Waiting for the CLI to become ready.
    AwaitingBoot,
    /// The command was typed; no output since.
    CommandSent,
    /// Output is arriving; waiting for completion markers.
    AwaitingMarker,
    /// Markers seen; reading on for the settle interval.
    Captured,
    /// Finished.
    Closed,
}

/// Something that happened to the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    /// The child was spawned.
    Spawned,
    /// Output was appended.
    Output(String),
    /// Time passed without output.
    Tick,
    /// The output stream closed.
    Exited,
}

/// How the conversation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyOutcome {
    /// Completion markers were seen.
    Captured,
    /// The overall deadline passed.
    TimedOut,
    /// A login marker was seen.
    LoginRequired(String),
    /// The child exited before any completion marker.
    Exited,
}

/// Something the driver must do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyAction {
    /// Write keystrokes.
    Write(String),
    /// Stop the child.
    Terminate,
    /// Stop driving.
    Finish(PtyOutcome),
}

// ============================================================================
// Session
// ============================================================================

/// State of one PTY conversation.
#[derive(Debug)]
pub struct PtySession {
    script: PtyScript,
    phase: PtyPhase,
    buffer: String,
    started_at: Option<Instant>,
    command_offset: usize,
    command_sent_at: Option<Instant>,
    commands_sent: u32,
    last_enter_at: Option<Instant>,
    captured_at: Option<Instant>,
    answered: Vec<bool>,
}

impl PtySession {
    /// Creates an idle session.
    pub fn new(script: PtyScript) -> Self {
        let answered = vec![false; script.prompts.len()];
        Self {
            script,
            phase: PtyPhase::Idle,
            buffer: String::new(),
            started_at: None,
            command_offset: 0,
            command_sent_at: None,
            commands_sent: 0,
            last_enter_at: None,
            captured_at: None,
            answered,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> PtyPhase {
        self.phase
    }

    /// Raw captured output, ANSI included.
    pub fn output(&self) -> &str {
        &self.buffer
    }

    /// Consumes the session, returning the raw output.
    pub fn into_output(self) -> String {
        self.buffer
    }

    /// The script being run.
    pub fn script(&self) -> &PtyScript {
        &self.script
    }

    /// Advances the conversation by one event.
    pub fn handle(&mut self, event: PtyEvent, now: Instant) -> Vec<PtyAction> {
        let mut actions = Vec::new();
        if self.phase == PtyPhase::Closed {
            return actions;
        }

        let exited = match event {
            PtyEvent::Spawned => {
                if self.phase == PtyPhase::Idle {
                    self.phase = PtyPhase::Spawned;
                    self.started_at = Some(now);
                }
                false
            }
            PtyEvent::Output(text) => {
                trace!(len = text.len(), "PTY output");
                self.buffer.push_str(&text);
                false
            }
            PtyEvent::Tick => false,
            PtyEvent::Exited => true,
        };

        let started_at = *self.started_at.get_or_insert(now);
        if self.phase == PtyPhase::Idle {
            self.phase = PtyPhase::Spawned;
        }

        let screen = strip_ansi(&self.buffer);

        if let Some(marker) = self
            .script
            .login_markers
            .iter()
            .find(|marker| screen.contains(marker.as_str()))
        {
            debug!(marker = %marker, "Login marker seen");
            let marker = marker.clone();
            return self.finish(actions, PtyOutcome::LoginRequired(marker));
        }

        for (handler, answered) in self.script.prompts.iter().zip(self.answered.iter_mut()) {
            if !*answered && screen.contains(handler.needle.as_str()) {
                debug!(needle = %handler.needle, "Answering prompt");
                *answered = true;
                actions.push(PtyAction::Write(handler.response.clone()));
            }
        }

        if self.phase == PtyPhase::Spawned {
            self.phase = PtyPhase::AwaitingBoot;
        }

        if self.phase == PtyPhase::AwaitingBoot {
            let booted = self
                .script
                .boot_markers
                .iter()
                .any(|marker| screen.contains(marker.as_str()));
            let boot_waited = now.saturating_duration_since(started_at) >= self.script.boot_timeout;
            let ready = if self.script.boot_markers.is_empty() {
                !self.buffer.is_empty() || boot_waited
            } else {
                booted || boot_waited
            };
            if ready && !exited {
                debug!(command = %self.script.command, "Sending command");
                self.command_offset = self.buffer.len();
                self.send_command(&mut actions, now);
                self.phase = PtyPhase::CommandSent;
            }
        }

        if matches!(self.phase, PtyPhase::CommandSent | PtyPhase::AwaitingMarker) {
            if self.buffer.len() > self.command_offset {
                self.phase = PtyPhase::AwaitingMarker;
            }
            if self.markers_found() {
                debug!("Completion markers seen");
                self.phase = PtyPhase::Captured;
                self.captured_at = Some(now);
            } else if !exited {
                self.nudge(&mut actions, now);
            }
        }

        if self.phase == PtyPhase::Captured {
            let settled = self
                .captured_at
                .is_some_and(|at| now.saturating_duration_since(at) >= self.script.settle);
            if settled || exited {
                return self.finish(actions, PtyOutcome::Captured);
            }
        } else if exited {
            debug!(phase = ?self.phase, "Child exited before markers");
            return self.finish(actions, PtyOutcome::Exited);
        }

        if self.phase != PtyPhase::Captured
            && now.saturating_duration_since(started_at) >= self.script.timeout
        {
            debug!(phase = ?self.phase, "PTY session timed out");
            return self.finish(actions, PtyOutcome::TimedOut);
        }

        actions
    }

    /// Returns true when a completion marker follows the command.
    pub fn markers_found(&self) -> bool {
        if self.command_sent_at.is_none() {
            return false;
        }
        let tail = strip_ansi(self.buffer.get(self.command_offset..).unwrap_or_default());
        self.script
            .completion_markers
            .iter()
            .any(|marker| tail.contains(marker.as_str()))
    }

    fn send_command(&mut self, actions: &mut Vec<PtyAction>, now: Instant) {
        actions.push(PtyAction::Write(format!("{}\r", self.script.command)));
        self.commands_sent += 1;
        self.command_sent_at = Some(now);
        self.last_enter_at = Some(now);
    }

    /// Re-sends the command or an Enter while waiting for markers.
    fn nudge(&mut self, actions: &mut Vec<PtyAction>, now: Instant) {
        let since_command = self
            .command_sent_at
            .map_or(Duration::ZERO, |at| now.saturating_duration_since(at));
        let since_enter = self
            .last_enter_at
            .map_or(Duration::ZERO, |at| now.saturating_duration_since(at));

        if since_command >= self.script.retry_interval
            && self.commands_sent <= self.script.command_retries
        {
            debug!(attempt = self.commands_sent + 1, "Re-sending command");
            self.send_command(actions, now);
        } else if since_enter >= self.script.enter_interval {
            trace!("Re-sending Enter");
            actions.push(PtyAction::Write("\r".to_string()));
            self.last_enter_at = Some(now);
        }
    }

    fn finish(&mut self, mut actions: Vec<PtyAction>, outcome: PtyOutcome) -> Vec<PtyAction> {
        self.phase = PtyPhase::Closed;
        actions.push(PtyAction::Terminate);
        actions.push(PtyAction::Finish(outcome));
        actions
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn script() -> PtyScript {
        PtyScript::new("claude", "/usage")
            .prompt("Do you trust the files in this folder?", "\r")
            .login_marker("Please run /login")
            .boot_marker("? for shortcuts")
            .completion_marker("Current week")
            .timeout(Duration::from_secs(20))
            .boot_timeout(Duration::from_secs(4))
            .enter_interval(Duration::from_secs(1))
            .command_retries(1, Duration::from_secs(5))
            .settle(Duration::from_millis(300))
    }

    fn at(base: Instant, millis: u64) -> Instant {
        base + Duration::from_millis(millis)
    }

    fn writes(actions: &[PtyAction]) -> Vec<String> {
        actions
            .iter()
            .filter_map(|a| match a {
                PtyAction::Write(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    fn outcome(actions: &[PtyAction]) -> Option<PtyOutcome> {
        actions.iter().find_map(|a| match a {
            PtyAction::Finish(o) => Some(o.clone()),
            _ => None,
        })
    }

    #[test]
    fn test_happy_path() {
        let t0 = Instant::now();
        let mut session = PtySession::new(script());

        assert!(session.handle(PtyEvent::Spawned, t0).is_empty());
        assert_eq!(session.phase(), PtyPhase::AwaitingBoot);

        let actions = session.handle(PtyEvent::Output("\x1b[2m? for shortcuts\x1b[0m".into()), at(t0, 100));
        assert_eq!(writes(&actions), vec!["/usage\r".to_string()]);
        assert_eq!(session.phase(), PtyPhase::CommandSent);

        session.handle(PtyEvent::Output("Current session\n 3% used\n".into()), at(t0, 200));
        assert_eq!(session.phase(), PtyPhase::AwaitingMarker);

        session.handle(PtyEvent::Output("Current week (all models)\n 9% used\n".into()), at(t0, 300));
        assert_eq!(session.phase(), PtyPhase::Captured);

        // Still settling.
        assert!(outcome(&session.handle(PtyEvent::Tick, at(t0, 400))).is_none());

        let actions = session.handle(PtyEvent::Tick, at(t0, 650));
        assert_eq!(actions.first(), Some(&PtyAction::Terminate));
        assert_eq!(outcome(&actions), Some(PtyOutcome::Captured));
        assert_eq!(session.phase(), PtyPhase::Closed);
        assert!(session.output().contains("\x1b[2m"));
    }

    #[test]
    fn test_markers_before_command_do_not_count() {
        let t0 = Instant::now();
        let mut session = PtySession::new(script().boot_marker("ready"));
        session.handle(PtyEvent::Spawned, t0);
        // Old screen content mentioning the marker, then boot.
        session.handle(PtyEvent::Output("Current week\nready\n".into()), at(t0, 50));
        assert_eq!(session.phase(), PtyPhase::CommandSent);
        assert!(!session.markers_found());
    }

    #[test]
    fn test_prompt_answered_once() {
        let t0 = Instant::now();
        let mut session = PtySession::new(script());
        session.handle(PtyEvent::Spawned, t0);

        let actions = session.handle(
            PtyEvent::Output("Do you trust the files in this folder?".into()),
            at(t0, 10),
        );
        assert_eq!(writes(&actions), vec!["\r".to_string()]);

        let actions = session.handle(
            PtyEvent::Output("Do you trust the files in this folder?".into()),
            at(t0, 20),
        );
        assert!(writes(&actions).is_empty());
    }

    #[test]
    fn test_login_marker_aborts() {
        let t0 = Instant::now();
        let mut session = PtySession::new(script());
        session.handle(PtyEvent::Spawned, t0);
        let actions = session.handle(PtyEvent::Output("Please run /login to continue".into()), at(t0, 10));
        assert_eq!(
            outcome(&actions),
            Some(PtyOutcome::LoginRequired("Please run /login".to_string()))
        );
        assert!(session.handle(PtyEvent::Tick, at(t0, 20)).is_empty());
    }

    #[test]
    fn test_boot_timeout_types_anyway() {
        let t0 = Instant::now();
        let mut session = PtySession::new(script());
        session.handle(PtyEvent::Spawned, t0);
        assert!(writes(&session.handle(PtyEvent::Tick, at(t0, 3_999))).is_empty());
        assert_eq!(
            writes(&session.handle(PtyEvent::Tick, at(t0, 4_000))),
            vec!["/usage\r".to_string()]
        );
    }

    #[test]
    fn test_enter_and_command_resend() {
        let t0 = Instant::now();
        let mut session = PtySession::new(script());
        session.handle(PtyEvent::Spawned, t0);
        session.handle(PtyEvent::Output("? for shortcuts".into()), t0);

        assert!(writes(&session.handle(PtyEvent::Tick, at(t0, 500))).is_empty());
        assert_eq!(writes(&session.handle(PtyEvent::Tick, at(t0, 1_000))), vec!["\r".to_string()]);
        assert_eq!(writes(&session.handle(PtyEvent::Tick, at(t0, 2_000))), vec!["\r".to_string()]);

        // One retry allowed.
        assert_eq!(
            writes(&session.handle(PtyEvent::Tick, at(t0, 5_000))),
            vec!["/usage\r".to_string()]
        );
        // Budget spent: only Enter from now on.
        assert_eq!(writes(&session.handle(PtyEvent::Tick, at(t0, 10_000))), vec!["\r".to_string()]);
    }

    #[test]
    fn test_timeout() {
        let t0 = Instant::now();
        let mut session = PtySession::new(script());
        session.handle(PtyEvent::Spawned, t0);
        session.handle(PtyEvent::Output("? for shortcuts".into()), t0);
        let actions = session.handle(PtyEvent::Tick, at(t0, 20_000));
        assert_eq!(outcome(&actions), Some(PtyOutcome::TimedOut));
        assert!(actions.contains(&PtyAction::Terminate));
    }

    #[test]
    fn test_settle_wins_over_timeout() {
        let t0 = Instant::now();
        let mut session = PtySession::new(script());
        session.handle(PtyEvent::Spawned, t0);
        session.handle(PtyEvent::Output("? for shortcuts".into()), t0);
        session.handle(PtyEvent::Output("Current week".into()), at(t0, 19_900));
        let actions = session.handle(PtyEvent::Tick, at(t0, 20_200));
        assert_eq!(outcome(&actions), Some(PtyOutcome::Captured));
    }

    #[test]
    fn test_exit_before_markers() {
        let t0 = Instant::now();
        let mut session = PtySession::new(script());
        session.handle(PtyEvent::Spawned, t0);
        let actions = session.handle(PtyEvent::Exited, at(t0, 10));
        assert_eq!(outcome(&actions), Some(PtyOutcome::Exited));
    }

    #[test]
    fn test_exit_while_settling_is_captured() {
        let t0 = Instant::now();
        let mut session = PtySession::new(script());
        session.handle(PtyEvent::Spawned, t0);
        session.handle(PtyEvent::Output("? for shortcuts".into()), t0);
        session.handle(PtyEvent::Output("Current week".into()), at(t0, 10));
        let actions = session.handle(PtyEvent::Exited, at(t0, 20));
        assert_eq!(outcome(&actions), Some(PtyOutcome::Captured));
    }
}
