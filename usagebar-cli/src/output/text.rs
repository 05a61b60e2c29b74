//! Text output formatting with progress bars and colors.

use chrono::{DateTime, Duration, Local, Utc};
use usagebar_core::{CostUsageTokenSnapshot, ProviderKind, ProviderStatus, RateWindow, StatusIndicator};
use usagebar_store::ProviderEntry;

// ============================================================================
// ANSI Colors
// ============================================================================

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const BLUE: &str = "\x1b[34m";
const CYAN: &str = "\x1b[36m";

// Progress bar characters
const BAR_FULL: char = '█';
const BAR_EMPTY: char = '░';

/// Labels for the primary, secondary and tertiary windows.
fn window_labels(provider: ProviderKind) -> [&'static str; 3] {
    match provider {
        ProviderKind::Codex => ["5h limit", "Weekly", "Extra"],
        ProviderKind::Claude => ["Session", "Weekly", "Opus"],
        ProviderKind::Gemini => ["Pro", "Flash", "Other"],
        ProviderKind::VertexAI => ["Quota", "Secondary", "Other"],
    }
}

/// Text formatter with optional colors.
pub struct TextFormatter {
    use_colors: bool,
    bar_width: usize,
}

impl TextFormatter {
    /// Creates a new text formatter.
    pub fn new(use_colors: bool) -> Self {
        Self {
            use_colors,
            bar_width: 10,
        }
    }

    /// Formats one provider's store entry.
    pub fn format_report(&self, provider: ProviderKind, entry: &ProviderEntry, show_credits: bool) -> String {
        let mut lines = Vec::new();

        // Header: "Codex 0.41.0 (codex-cli)"
        let mut header = self.bold(provider.display_name());
        if let Some(version) = &entry.version {
            header.push(' ');
            header.push_str(version);
        }
        if entry.snapshot.is_some() {
            header.push_str(&format!(" ({})", entry.source.as_str()));
        }
        lines.push(header);

        if let Some(status) = &entry.status {
            lines.push(self.format_status(status));
        }

        if let Some(error) = &entry.error {
            lines.push(self.format_error(&error.to_string()));
        }

        if let Some(snapshot) = &entry.snapshot {
            let [first, second, third] = window_labels(provider);
            for (window, label) in [
                (&snapshot.primary, first),
                (&snapshot.secondary, second),
                (&snapshot.tertiary, third),
            ] {
                if let Some(window) = window {
                    lines.push(self.format_window(window, label));
                }
            }

            if let Some(cost) = &snapshot.provider_cost {
                let period = cost.period.as_deref().unwrap_or("Spend");
                lines.push(format!(
                    "{:<9} {:.2} / {:.2} {}",
                    format!("{period}:"),
                    cost.used,
                    cost.limit,
                    cost.currency_code
                ));
            }
        }

        if show_credits {
            if let Some(credits) = &entry.credits {
                lines.push(format!("Credits:  {}", self.green(&format!("{:.2} left", credits.remaining))));
            }
        }

        if let Some(dashboard) = &entry.dashboard {
            lines.push(format!("Web:      {}", self.cyan(&dashboard.signed_in_email)));
            if let Some(window) = &dashboard.primary {
                lines.push(self.format_window(window, "Web 5h"));
            }
            if let Some(window) = &dashboard.secondary {
                lines.push(self.format_window(window, "Web week"));
            }
        }
        if let Some(error) = &entry.dashboard_error {
            lines.push(format!("Web:      {}", self.yellow(&error.to_string())));
        }

        if let Some(identity) = entry.snapshot.as_ref().and_then(|s| s.identity()) {
            if let Some(email) = &identity.account_email {
                lines.push(format!("Account:  {}", self.cyan(email)));
            }
            if let Some(org) = &identity.account_organization {
                lines.push(format!("Org:      {org}"));
            }
            if let Some(plan) = &identity.plan_name {
                lines.push(format!("Plan:     {}", self.blue(plan)));
            }
            if let Some(method) = &identity.login_method {
                lines.push(format!("Login:    {}", method.label()));
            }
        }

        lines.join("\n")
    }

    /// Formats a usage window with progress bar.
    fn format_window(&self, window: &RateWindow, label: &str) -> String {
        let remaining = window.remaining_percent();
        let bar = self.progress_bar(remaining);
        let pct_str = self.color_for_percent(remaining, &format!("{remaining:.0}% left"));

        let mut result = format!("{:<9} {} {}", format!("{label}:"), bar, pct_str);

        if let Some(resets_at) = window.resets_at() {
            let reset_str = Self::format_reset_time(resets_at, Utc::now());
            result.push_str(&format!("\n          Resets {}", self.dim(&reset_str)));
        } else if let Some(desc) = window.reset_description() {
            result.push_str(&format!("\n          {}", self.dim(desc)));
        }

        result
    }

    /// Formats a progress bar.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn progress_bar(&self, percent_remaining: f64) -> String {
        let filled = ((percent_remaining.clamp(0.0, 100.0) / 100.0) * self.bar_width as f64).round() as usize;
        let empty = self.bar_width.saturating_sub(filled);

        let bar = format!(
            "{}{}",
            BAR_FULL.to_string().repeat(filled),
            BAR_EMPTY.to_string().repeat(empty)
        );

        self.color_for_percent(percent_remaining, &bar)
    }

    /// Formats reset time as countdown within a day, absolute beyond.
    fn format_reset_time(resets_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
        if resets_at <= now {
            return "now".to_string();
        }

        let diff = resets_at - now;
        if diff < Duration::hours(1) {
            let mins = diff.num_minutes().max(1);
            format!("in {} minute{}", mins, if mins == 1 { "" } else { "s" })
        } else if diff < Duration::hours(24) {
            let hours = diff.num_hours();
            let mins = diff.num_minutes() % 60;
            if mins > 0 {
                format!("in {hours}h {mins}m")
            } else {
                format!("in {} hour{}", hours, if hours == 1 { "" } else { "s" })
            }
        } else {
            let local_reset = resets_at.with_timezone(&Local);
            local_reset.format("%a %b %-d at %l:%M %p").to_string().replace("  ", " ")
        }
    }

    fn format_status(&self, status: &ProviderStatus) -> String {
        let label = match status.indicator {
            StatusIndicator::None => self.green(status.indicator.label()),
            StatusIndicator::Minor | StatusIndicator::Maintenance => self.yellow(status.indicator.label()),
            StatusIndicator::Major | StatusIndicator::Critical => self.red(status.indicator.label()),
            StatusIndicator::Unknown => self.dim(status.indicator.label()),
        };
        if status.description.is_empty() {
            format!("Status:   {label}")
        } else {
            format!("Status:   {label} {}", self.dim(&format!("({})", status.description)))
        }
    }

    /// Formats a token cost report.
    pub fn format_cost(&self, provider: ProviderKind, cost: Option<&CostUsageTokenSnapshot>) -> String {
        let mut lines = Vec::new();

        lines.push(format!("{} Token Cost", self.bold(provider.display_name())));
        lines.push("─".repeat(40));

        let Some(cost) = cost else {
            lines.push(self.dim("No usage in the last 30 days"));
            return lines.join("\n");
        };

        lines.push(format!(
            "Today:        {} tokens, {}",
            cost.session_tokens.map_or_else(|| "−".to_string(), format_number),
            self.format_usd(cost.session_cost_usd)
        ));
        lines.push(format!(
            "Last 30 days: {} tokens, {}",
            cost.last_30_days_tokens.map_or_else(|| "−".to_string(), format_number),
            self.format_usd(cost.last_30_days_cost_usd)
        ));

        if !cost.daily.is_empty() {
            lines.push(String::new());
            lines.push(self.dim("Daily breakdown:"));
            for day in cost.daily.iter().rev() {
                lines.push(format!(
                    "  {} - {} tokens ({})",
                    day.date,
                    format_number(day.tokens()),
                    self.format_usd(day.cost_usd)
                ));
            }
        }

        lines.join("\n")
    }

    /// Formats an error message.
    pub fn format_error(&self, error: &str) -> String {
        format!("{}    {}", self.red("Error:"), error)
    }

    // ========================================================================
    // Color/style helpers
    // ========================================================================

    fn format_usd(&self, cost: Option<f64>) -> String {
        cost.map_or_else(|| self.dim("cost unknown"), |c| self.green(&format!("${c:.2}")))
    }

    fn color_for_percent(&self, percent: f64, text: &str) -> String {
        if percent < 20.0 {
            self.red(text)
        } else if percent < 50.0 {
            self.yellow(text)
        } else {
            self.green(text)
        }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.use_colors {
            format!("{code}{text}{RESET}")
        } else {
            text.to_string()
        }
    }

    fn bold(&self, text: &str) -> String {
        self.paint(BOLD, text)
    }

    fn dim(&self, text: &str) -> String {
        self.paint(DIM, text)
    }

    fn green(&self, text: &str) -> String {
        self.paint(GREEN, text)
    }

    fn yellow(&self, text: &str) -> String {
        self.paint(YELLOW, text)
    }

    fn red(&self, text: &str) -> String {
        self.paint(RED, text)
    }

    fn blue(&self, text: &str) -> String {
        self.paint(BLUE, text)
    }

    fn cyan(&self, text: &str) -> String {
        self.paint(CYAN, text)
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_number(n: u64) -> String {
    let n = n as f64;
    if n >= 1_000_000.0 {
        format!("{:.1}M", n / 1_000_000.0)
    } else if n >= 1_000.0 {
        format!("{:.1}K", n / 1_000.0)
    } else {
        format!("{n:.0}")
    }
}

// ============================================================================
// Tests
// ============================================================================
