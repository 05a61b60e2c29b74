//! Status page polling for provider health.
//!
//! OpenAI and Anthropic publish statuspage.io pages; Google Cloud publishes
//! an incidents feed that is filtered by product name.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use usagebar_core::{ProviderStatus, StatusIndicator};

use super::http::{HttpClient, RequestAuth};
use crate::error::StatusError;

/// Google Cloud incidents feed.
pub const GOOGLE_CLOUD_INCIDENTS_URL: &str = "https://status.cloud.google.com/incidents.json";

// ============================================================================
// Statuspage.io Response Types
// ============================================================================

/// Response from the statuspage.io `/api/v2/status.json` endpoint.
#[derive(Debug, Deserialize)]
struct StatuspageStatus {
    status: StatuspageIndicator,
    page: StatuspagePage,
}

#[derive(Debug, Deserialize)]
struct StatuspageIndicator {
    indicator: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct StatuspagePage {
    url: String,
    updated_at: Option<String>,
}

/// One entry of the Google Cloud incidents feed.
#[derive(Debug, Deserialize)]
struct GoogleIncident {
    #[serde(default)]
    end: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    external_desc: Option<String>,
    #[serde(default)]
    modified: Option<String>,
    #[serde(default)]
    affected_products: Vec<GoogleProduct>,
}

#[derive(Debug, Deserialize)]
struct GoogleProduct {
    title: String,
}

// ============================================================================
// Status Poller
// ============================================================================

/// Polls provider status pages.
#[derive(Debug, Clone)]
pub struct StatusPoller {
    client: HttpClient,
}

impl StatusPoller {
    /// Creates a poller using `client`.
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    /// Fetches a statuspage.io-compatible endpoint, e.g.
    /// `https://status.openai.com/api/v2/status.json`.
    #[instrument(skip(self), fields(url = %status_url))]
    pub async fn fetch_statuspage(&self, status_url: &str) -> Result<ProviderStatus, StatusError> {
        let data: StatuspageStatus = self
            .client
            .get_json(status_url, &RequestAuth::None)
            .await
            .inspect_err(|e| warn!(error = %e, "Failed to fetch status"))?;

        let mut status = ProviderStatus::new(
            StatusIndicator::from_statuspage(&data.status.indicator),
            data.status.description,
        );
        status.updated_at = data.page.updated_at.as_deref().and_then(parse_timestamp);
        status.url = Some(data.page.url);

        debug!(indicator = ?status.indicator, "Status fetched");
        Ok(status)
    }

    /// Summarizes open Google Cloud incidents affecting `product`.
    #[instrument(skip(self), fields(product = %product))]
    pub async fn fetch_google_cloud(&self, product: &str) -> Result<ProviderStatus, StatusError> {
        let incidents: Vec<GoogleIncident> = self
            .client
            .get_json(GOOGLE_CLOUD_INCIDENTS_URL, &RequestAuth::None)
            .await
            .inspect_err(|e| warn!(error = %e, "Failed to fetch Google Cloud incidents"))?;
        Ok(summarize_google_incidents(&incidents, product))
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn google_severity(severity: Option<&str>) -> StatusIndicator {
    match severity {
        Some("high") => StatusIndicator::Major,
        Some("medium" | "low") => StatusIndicator::Minor,
        _ => StatusIndicator::Unknown,
    }
}

fn summarize_google_incidents(incidents: &[GoogleIncident], product: &str) -> ProviderStatus {
    let needle = product.to_lowercase();
    let open: Vec<&GoogleIncident> = incidents
        .iter()
        .filter(|incident| incident.end.is_none())
        .filter(|incident| {
            incident
                .affected_products
                .iter()
                .any(|p| p.title.to_lowercase().contains(&needle))
        })
        .collect();

    let mut status = match open.iter().map(|i| google_severity(i.severity.as_deref())).max_by_key(|s| rank(*s)) {
        None => ProviderStatus::new(StatusIndicator::None, "All Systems Operational"),
        Some(indicator) => {
            let description = open
                .first()
                .and_then(|i| i.external_desc.clone())
                .unwrap_or_else(|| format!("{} active incident(s)", open.len()));
            ProviderStatus::new(indicator, description.trim().to_string())
        }
    };
    status.updated_at = open.first().and_then(|i| i.modified.as_deref()).and_then(parse_timestamp);
    status.url = Some("https://status.cloud.google.com".to_string());
    status
}

fn rank(indicator: StatusIndicator) -> u8 {
    match indicator {
        StatusIndicator::None => 0,
        StatusIndicator::Unknown => 1,
        StatusIndicator::Maintenance => 2,
        StatusIndicator::Minor => 3,
        StatusIndicator::Major => 4,
        StatusIndicator::Critical => 5,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statuspage_payload_decodes() {
        let raw = r#"{
            "page": {"id": "x", "name": "OpenAI", "url": "https://status.openai.com",
                     "updated_at": "2025-01-05T10:00:00.000Z"},
            "status": {"indicator": "minor", "description": "Partially Degraded Service"}
        }"#;
        let data: StatuspageStatus = serde_json::from_str(raw).unwrap();
        assert_eq!(data.status.indicator, "minor");
        assert!(parse_timestamp(data.page.updated_at.as_deref().unwrap()).is_some());
    }

    #[test]
    fn test_google_incidents_filtered_by_product() {
        let raw = r#"[
            {"end": null, "severity": "medium", "external_desc": "Vertex AI Gemini API errors ",
             "modified": "2025-01-05T10:00:00+00:00",
             "affected_products": [{"title": "Vertex Gemini API", "id": "a"}]},
            {"end": null, "severity": "high", "external_desc": "Cloud SQL outage",
             "affected_products": [{"title": "Cloud SQL", "id": "b"}]},
            {"end": "2025-01-01T00:00:00+00:00", "severity": "high",
             "affected_products": [{"title": "Vertex Gemini API", "id": "a"}]}
        ]"#;
        let incidents: Vec<GoogleIncident> = serde_json::from_str(raw).unwrap();

        let status = summarize_google_incidents(&incidents, "gemini");
        assert_eq!(status.indicator, StatusIndicator::Minor);
        assert_eq!(status.description, "Vertex AI Gemini API errors");
        assert!(status.updated_at.is_some());

        let status = summarize_google_incidents(&incidents, "bigquery");
        assert!(status.is_operational());
    }
}
