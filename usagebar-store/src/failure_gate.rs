//! Flap suppression for refresh failures.

/// Decides whether a refresh failure is shown to the user.
///
/// A single failure after good data is treated as a blip and hidden; the
/// cached data stays on screen. A second consecutive failure is shown.
/// Without cached data every failure is shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsecutiveFailureGate {
    streak: u32,
}

impl ConsecutiveFailureGate {
    /// Creates a gate with no failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a success.
    pub fn record_success(&mut self) {
        self.streak = 0;
    }

    /// Records a failure and returns true if it should surface.
    pub fn record_failure(&mut self, had_prior_data: bool) -> bool {
        self.streak = self.streak.saturating_add(1);
        !had_prior_data || self.streak > 1
    }

    /// Current run of consecutive failures.
    pub fn streak(&self) -> u32 {
        self.streak
    }
}

// ============================================================================
// Tests
// ============================================================================
