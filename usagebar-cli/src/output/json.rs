//! JSON output formatting.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use usagebar_core::{
    CostUsageTokenSnapshot, CreditsSnapshot, DailyEntry, OpenAIDashboardSnapshot, ProviderKind,
    ProviderStatus, RateWindow,
};

use crate::commands::usage::ProviderReport;

// ============================================================================
// Output Types
// ============================================================================

/// JSON output for a single provider.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderOutput {
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<WindowOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<WindowOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tertiary: Option<WindowOutput>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_datetime_opt")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_organization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits: Option<CreditsOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_dashboard: Option<DashboardOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_dashboard_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Status-page state.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusOutput {
    pub indicator: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_datetime_opt")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A single usage window.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowOutput {
    pub used_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_datetime_opt")]
    pub resets_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_description: Option<String>,
}

/// Codex credits.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditsOutput {
    pub remaining: f64,
    #[serde(serialize_with = "serialize_datetime")]
    pub updated_at: DateTime<Utc>,
}

/// OpenAI dashboard enrichment.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardOutput {
    pub signed_in_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<WindowOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<WindowOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits_remaining: Option<f64>,
    #[serde(serialize_with = "serialize_datetime")]
    pub updated_at: DateTime<Utc>,
}

/// Token cost report output.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostOutput {
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_30_days_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_30_days_cost_usd: Option<f64>,
    pub daily: Vec<DailyCostOutput>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_datetime_opt")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Daily cost entry.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCostOutput {
    pub date: String,
    pub tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    pub models: Vec<ModelCostOutput>,
}

/// Per-model share of a day.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCostOutput {
    pub model: String,
    pub tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

// ============================================================================
// Serialization helpers
// ============================================================================

fn serialize_datetime<S>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.serialize_str(&dt.to_rfc3339())
}

#[allow(clippy::ref_option)]
fn serialize_datetime_opt<S>(dt: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match dt {
        Some(dt) => s.serialize_str(&dt.to_rfc3339()),
        None => s.serialize_none(),
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<&RateWindow> for WindowOutput {
    fn from(window: &RateWindow) -> Self {
        Self {
            used_percent: window.used_percent(),
            window_minutes: window.window_minutes,
            resets_at: window.resets_at(),
            reset_description: window.reset_description().map(str::to_string),
        }
    }
}

impl From<&ProviderStatus> for StatusOutput {
    fn from(status: &ProviderStatus) -> Self {
        Self {
            indicator: status.indicator.as_str().to_string(),
            description: status.description.clone(),
            updated_at: status.updated_at,
            url: status.url.clone(),
        }
    }
}

impl From<&CreditsSnapshot> for CreditsOutput {
    fn from(credits: &CreditsSnapshot) -> Self {
        Self {
            remaining: credits.remaining,
            updated_at: credits.updated_at,
        }
    }
}

impl From<&OpenAIDashboardSnapshot> for DashboardOutput {
    fn from(dashboard: &OpenAIDashboardSnapshot) -> Self {
        Self {
            signed_in_email: dashboard.signed_in_email.clone(),
            primary: dashboard.primary.as_ref().map(WindowOutput::from),
            secondary: dashboard.secondary.as_ref().map(WindowOutput::from),
            credits_remaining: dashboard.credits_remaining,
            updated_at: dashboard.updated_at,
        }
    }
}

impl From<&DailyEntry> for DailyCostOutput {
    fn from(day: &DailyEntry) -> Self {
        Self {
            date: day.date.clone(),
            tokens: day.tokens(),
            cost_usd: day.cost_usd,
            models: day
                .model_breakdowns
                .iter()
                .map(|m| ModelCostOutput {
                    model: m.model_name.clone(),
                    tokens: m.total_tokens,
                    cost_usd: m.cost_usd,
                })
                .collect(),
        }
    }
}

// ============================================================================
// JSON Formatter
// ============================================================================

/// JSON formatter.
pub struct JsonFormatter {
    pretty: bool,
}

impl JsonFormatter {
    /// Creates a new JSON formatter.
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    /// Formats any serializable value.
    pub fn format<T: Serialize>(&self, data: &T) -> Result<String> {
        let json = if self.pretty {
            serde_json::to_string_pretty(data)?
        } else {
            serde_json::to_string(data)?
        };
        Ok(json)
    }

    /// Formats usage reports. One report prints as an object, several as an
    /// array.
    pub fn format_reports(&self, reports: &[ProviderReport], show_credits: bool) -> Result<String> {
        let outputs: Vec<ProviderOutput> = reports
            .iter()
            .map(|r| Self::report_to_output(r, show_credits))
            .collect();

        match outputs.as_slice() {
            [single] => self.format(single),
            _ => self.format(&outputs),
        }
    }

    /// Formats token cost reports, in the same object-or-array shape.
    pub fn format_costs(
        &self,
        results: &[(ProviderKind, Result<Option<CostUsageTokenSnapshot>, String>)],
    ) -> Result<String> {
        let outputs: Vec<CostOutput> = results
            .iter()
            .map(|(provider, result)| Self::cost_to_output(*provider, result))
            .collect();

        match outputs.as_slice() {
            [single] => self.format(single),
            _ => self.format(&outputs),
        }
    }

    fn report_to_output(report: &ProviderReport, show_credits: bool) -> ProviderOutput {
        let entry = &report.entry;
        let snapshot = entry.snapshot.as_ref();
        let identity = snapshot.and_then(|s| s.identity());

        ProviderOutput {
            provider: report.provider.cli_name().to_string(),
            version: entry.version.clone(),
            source: entry.source.as_str().to_string(),
            status: entry.status.as_ref().map(StatusOutput::from),
            primary: snapshot.and_then(|s| s.primary.as_ref()).map(WindowOutput::from),
            secondary: snapshot.and_then(|s| s.secondary.as_ref()).map(WindowOutput::from),
            tertiary: snapshot.and_then(|s| s.tertiary.as_ref()).map(WindowOutput::from),
            updated_at: snapshot.map(|s| s.updated_at),
            account_email: identity.and_then(|i| i.account_email.clone()),
            account_organization: identity.and_then(|i| i.account_organization.clone()),
            login_method: identity
                .and_then(|i| i.login_method.as_ref())
                .map(|m| m.label().to_string()),
            credits: entry
                .credits
                .as_ref()
                .filter(|_| show_credits)
                .map(CreditsOutput::from),
            openai_dashboard: entry.dashboard.as_ref().map(DashboardOutput::from),
            openai_dashboard_error: entry.dashboard_error.as_ref().map(ToString::to_string),
            error: entry.error.as_ref().map(ToString::to_string),
        }
    }

    fn cost_to_output(
        provider: ProviderKind,
        result: &Result<Option<CostUsageTokenSnapshot>, String>,
    ) -> CostOutput {
        let mut output = CostOutput {
            provider: provider.cli_name().to_string(),
            session_tokens: None,
            session_cost_usd: None,
            last_30_days_tokens: None,
            last_30_days_cost_usd: None,
            daily: Vec::new(),
            updated_at: None,
            error: None,
        };

        match result {
            Ok(Some(snapshot)) => {
                output.session_tokens = snapshot.session_tokens;
                output.session_cost_usd = snapshot.session_cost_usd;
                output.last_30_days_tokens = snapshot.last_30_days_tokens;
                output.last_30_days_cost_usd = snapshot.last_30_days_cost_usd;
                output.daily = snapshot.daily.iter().map(DailyCostOutput::from).collect();
                output.updated_at = Some(snapshot.updated_at);
            }
            Ok(None) => {}
            Err(e) => output.error = Some(e.clone()),
        }
        output
    }
}
