//! PTY fallback for Codex.
//!
//! Runs the interactive CLI, types `/status` and parses the box it draws.
//! Only used when the app-server is unavailable.

use std::time::Duration;

use chrono::Local;
use tracing::{debug, instrument};
use usagebar_fetch::{ProbeContext, PtyCapture, PtyScript};

use super::CODEX_BINARY;
use super::error::CodexError;
use super::parser::{CodexUsage, parse_status_output};

/// Boot wait before typing regardless of markers.
const BOOT_TIMEOUT: Duration = Duration::from_secs(6);

/// Builds the `/status` conversation.
pub fn status_script(timeout: Duration) -> PtyScript {
    PtyScript::new(CODEX_BINARY, "/status")
        .args(["-s", "read-only", "-a", "untrusted"])
        .prompt("allow Codex to work in this folder", "\r")
        .prompt("Update available", "\x1b")
        .login_marker("Sign in with ChatGPT")
        .login_marker("Provide your own API key")
        .boot_marker("To get started")
        .boot_marker("context left")
        .completion_marker("Weekly limit")
        .completion_marker("5h limit")
        .timeout(timeout)
        .boot_timeout(BOOT_TIMEOUT)
        .enter_interval(Duration::from_millis(1500))
        .command_retries(2, Duration::from_secs(4))
        .settle(Duration::from_millis(600))
}

/// Turns a finished capture into usage.
pub fn interpret_capture(capture: &PtyCapture) -> Result<CodexUsage, CodexError> {
    if !capture.markers_found {
        debug!(output_len = capture.output.len(), "Codex exited before /status finished");
    }
    parse_status_output(&capture.output, &Local::now())
}

/// Reads usage through the interactive CLI.
#[instrument(skip(ctx))]
pub async fn fetch_pty(ctx: &ProbeContext) -> Result<CodexUsage, CodexError> {
    let capture = ctx.pty.run(status_script(ctx.timeout())).await?;
    interpret_capture(&capture)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use usagebar_fetch::ProbeError;
    use usagebar_fetch::host::pty::{ScriptedTerminal, run_script};

    fn run(mut terminal: ScriptedTerminal) -> (Result<PtyCapture, usagebar_fetch::PtyError>, ScriptedTerminal) {
        let cancel = AtomicBool::new(false);
        let script = status_script(Duration::from_secs(5)).settle(Duration::ZERO);
        let result = run_script(script, &mut terminal, Duration::from_millis(1), &cancel);
        (result, terminal)
    }

    #[test]
    fn test_status_conversation() {
        let terminal = ScriptedTerminal::new()
            .emit("Do you want to allow Codex to work in this folder?\n")
            .emit("To get started, describe a task\n")
            .on_write(
                "/status",
                "│ 5h limit: [███░░] 60% left (resets 23:59) │\n│ Weekly limit: [█░░░] 10% left │\n",
            )
            .close_when_idle();

        let (result, terminal) = run(terminal);
        let capture = result.unwrap();
        assert!(capture.markers_found);
        assert_eq!(terminal.written().first().map(String::as_str), Some("\r"));
        assert!(terminal.written().iter().any(|w| w == "/status\r"));
        assert!(terminal.was_terminated());

        let usage = interpret_capture(&capture).unwrap();
        assert!((usage.primary.unwrap().used_percent() - 40.0).abs() < f64::EPSILON);
        assert!((usage.secondary.unwrap().used_percent() - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_login_screen() {
        let terminal = ScriptedTerminal::new()
            .emit("Welcome to Codex\n  1. Sign in with ChatGPT\n  2. Provide your own API key\n");
        let (result, _) = run(terminal);
        let err = CodexError::from(result.unwrap_err());
        assert!(matches!(ProbeError::from(err), ProbeError::LoginRequired(_)));
    }

    #[test]
    fn test_exit_without_limits_is_parse_failure() {
        let terminal = ScriptedTerminal::new()
            .emit("To get started\n")
            .on_write("/status", "Limits: data not available yet\n")
            .close_when_idle();
        let (result, _) = run(terminal);
        let capture = result.unwrap();
        let err = interpret_capture(&capture).unwrap_err();
        assert!(matches!(err, CodexError::Parse(_)));
    }
}
