//! PTY probe for Claude: types `/usage` into the interactive CLI.

use std::time::Duration;

use chrono::Local;
use tracing::{debug, instrument};
use usagebar_fetch::{ProbeContext, PtyCapture, PtyScript};

use super::CLAUDE_BINARY;
use super::error::ClaudeError;
use super::parser::{ClaudeUsage, parse_usage_output};

/// Builds the `/usage` conversation.
pub fn usage_script(timeout: Duration) -> PtyScript {
    PtyScript::new(CLAUDE_BINARY, "/usage")
        .prompt("Do you trust the files in this folder?", "\r")
        .prompt("Choose the text style", "\r")
        .prompt("Help improve Claude", "\x1b")
        .login_marker("Please run /login")
        .login_marker("Select login method")
        .login_marker("Invalid API key")
        .boot_marker("? for shortcuts")
        .boot_marker("Try \"")
        .completion_marker("Current week")
        .completion_marker("API Error")
        .timeout(timeout)
        .boot_timeout(Duration::from_secs(5))
        .enter_interval(Duration::from_secs(1))
        .command_retries(2, Duration::from_secs(5))
        .settle(Duration::from_millis(800))
}

/// Turns a finished capture into usage.
pub fn interpret_capture(capture: &PtyCapture) -> Result<ClaudeUsage, ClaudeError> {
    if !capture.markers_found {
        debug!(output_len = capture.output.len(), "Claude exited before /usage finished");
    }
    parse_usage_output(&capture.output, &Local::now())
}

/// Reads usage through the interactive CLI.
#[instrument(skip(ctx))]
pub async fn fetch_pty(ctx: &ProbeContext) -> Result<ClaudeUsage, ClaudeError> {
    let capture = ctx.pty.run(usage_script(ctx.timeout())).await?;
    interpret_capture(&capture)
}

// ============================================================================
// Tests
// ============================================================================
