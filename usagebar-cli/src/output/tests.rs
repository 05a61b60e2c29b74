//! CLI output formatting tests.
//!
//! Reports are built through a real `UsageStore` so the formatters see the
//! same entries the commands do.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::Value;
use usagebar_core::{
    CostUsageTokenSnapshot, CreditsSnapshot, DailyEntry, FetchSource, LoginMethod, OpenAIDashboardSnapshot,
    ProviderIdentitySnapshot, ProviderKind, ProviderStatus, RateWindow, StatusIndicator, UsageSnapshot,
};
use usagebar_fetch::ProbeError;
use usagebar_providers::ProviderFetch;
use usagebar_store::UsageStore;

use super::{JsonFormatter, TextFormatter};
use crate::commands::usage::ProviderReport;

fn codex_fetch() -> ProviderFetch {
    let identity = ProviderIdentitySnapshot::new(ProviderKind::Codex)
        .with_email("dev@example.com")
        .with_login_method(LoginMethod::Cli);
    let mut snapshot = UsageSnapshot::new(ProviderKind::Codex).with_identity(identity).unwrap();
    snapshot.primary = Some(
        RateWindow::new(25.0)
            .with_window_minutes(300)
            .with_resets_at(Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap()),
    );
    snapshot.secondary = Some(RateWindow::new(60.0).with_reset_description("Resets Jan 3"));

    ProviderFetch {
        snapshot,
        credits: Some(CreditsSnapshot::new(42.5)),
        dashboard: None,
        source: FetchSource::Rpc,
        version: Some("0.41.0".into()),
        attempts: Vec::new(),
    }
}

async fn report(provider: ProviderKind, result: Result<ProviderFetch, ProbeError>) -> ProviderReport {
    let store = UsageStore::new(&[provider], Duration::from_secs(5)).with_notifications(false);
    store.apply(provider, result).await;
    ProviderReport {
        provider,
        entry: store.entry(provider).await.unwrap(),
    }
}

// ============================================================================
// JSON
// ============================================================================

#[tokio::test]
async fn test_json_single_provider_is_object() {
    let reports = vec![report(ProviderKind::Codex, Ok(codex_fetch())).await];
    let json = JsonFormatter::new(false).format_reports(&reports, true).unwrap();
    let value: Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value["provider"], "codex");
    assert_eq!(value["version"], "0.41.0");
    assert_eq!(value["source"], "codex-cli");
    assert_eq!(value["accountEmail"], "dev@example.com");
    assert_eq!(value["primary"]["usedPercent"], 25.0);
    assert_eq!(value["primary"]["windowMinutes"], 300);
    assert_eq!(value["primary"]["resetsAt"], "2030-01-01T12:00:00+00:00");
    assert_eq!(value["secondary"]["resetDescription"], "Resets Jan 3");
    assert_eq!(value["credits"]["remaining"], 42.5);
    assert!(value.get("error").is_none());
    assert!(value.get("openaiDashboard").is_none());
}

#[tokio::test]
async fn test_json_several_providers_is_array() {
    let reports = vec![
        report(ProviderKind::Codex, Ok(codex_fetch())).await,
        report(ProviderKind::Claude, Err(ProbeError::NotInstalled("claude".into()))).await,
    ];
    let json = JsonFormatter::new(true).format_reports(&reports, true).unwrap();
    let value: Value = serde_json::from_str(&json).unwrap();

    let items = value.as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[1]["provider"], "claude");
    assert_eq!(items[1]["error"], "claude is not installed");
    assert!(items[1].get("primary").is_none());
}

#[tokio::test]
async fn test_json_omits_credits_when_disabled() {
    let reports = vec![report(ProviderKind::Codex, Ok(codex_fetch())).await];
    let json = JsonFormatter::new(false).format_reports(&reports, false).unwrap();
    let value: Value = serde_json::from_str(&json).unwrap();
    assert!(value.get("credits").is_none());
}

#[tokio::test]
async fn test_json_dashboard_and_status() {
    let mut fetch = codex_fetch();
    fetch.dashboard = Some(Ok(OpenAIDashboardSnapshot {
        signed_in_email: "dev@example.com".into(),
        primary: Some(RateWindow::new(30.0)),
        secondary: None,
        credits_remaining: Some(12.0),
        updated_at: Utc::now(),
    }));
    let mut report = report(ProviderKind::Codex, Ok(fetch)).await;
    let mut status = ProviderStatus::new(StatusIndicator::Minor, "Elevated errors");
    status.url = Some("https://status.openai.com".into());
    report.entry.status = Some(status);

    let json = JsonFormatter::new(false).format_reports(&[report], true).unwrap();
    let value: Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value["openaiDashboard"]["signedInEmail"], "dev@example.com");
    assert_eq!(value["openaiDashboard"]["creditsRemaining"], 12.0);
    assert_eq!(value["status"]["indicator"], "minor");
    assert_eq!(value["status"]["description"], "Elevated errors");
    assert_eq!(value["status"]["url"], "https://status.openai.com");
}

#[test]
fn test_json_cost_report() {
    let mut day = DailyEntry::new("2025-06-01");
    day.input_tokens = 1_000;
    day.output_tokens = 500;
    day.cost_usd = Some(0.25);
    let snapshot = CostUsageTokenSnapshot::from_daily(vec![day], None, None);

    let results = vec![
        (ProviderKind::Codex, Ok(snapshot)),
        (ProviderKind::Claude, Err("disk on fire".to_string())),
    ];
    let json = JsonFormatter::new(false).format_costs(&results).unwrap();
    let value: Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value[0]["provider"], "codex");
    assert_eq!(value[0]["last30DaysTokens"], 1_500);
    assert_eq!(value[0]["sessionCostUsd"], 0.25);
    assert_eq!(value[0]["daily"][0]["date"], "2025-06-01");
    assert_eq!(value[1]["error"], "disk on fire");
}

// ============================================================================
// Text
// ============================================================================

#[tokio::test]
async fn test_text_report_uses_provider_labels() {
    let report = report(ProviderKind::Codex, Ok(codex_fetch())).await;
    let output = TextFormatter::new(false).format_report(report.provider, &report.entry, true);

    assert!(output.starts_with("Codex 0.41.0 (codex-cli)"));
    assert!(output.contains("5h limit:"));
    assert!(output.contains("75% left"));
    assert!(output.contains("Weekly:"));
    assert!(output.contains("Resets Jan 3"));
    assert!(output.contains("Credits:  42.50 left"));
    assert!(output.contains("Account:  dev@example.com"));
}

#[tokio::test]
async fn test_text_report_error() {
    let report = report(ProviderKind::Gemini, Err(ProbeError::TimedOut(Duration::from_secs(20)))).await;
    let output = TextFormatter::new(false).format_report(report.provider, &report.entry, true);

    assert!(output.starts_with("Gemini"));
    assert!(output.contains("Error:"));
    assert!(output.contains("Timed out after 20s"));
}

#[test]
fn test_text_cost_without_data() {
    let output = TextFormatter::new(false).format_cost(ProviderKind::Claude, None);
    assert!(output.contains("Claude Token Cost"));
    assert!(output.contains("No usage in the last 30 days"));
}
