//! Cloud Monitoring quota queries.
//!
//! Quota usage and limits are exported as two metric families. Each usage
//! series is paired with the limit series for the same quota metric, limit
//! name and location; the highest usage percentage across pairs becomes the
//! primary window.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;
use usagebar_core::RateWindow;
use usagebar_fetch::{HttpClient, RequestAuth};

use super::error::VertexError;

const MONITORING_BASE: &str = "https://monitoring.googleapis.com/v3";

/// Quota usage metric.
pub const USAGE_METRIC: &str = "serviceruntime.googleapis.com/quota/allocation/usage";

/// Quota limit metric.
pub const LIMIT_METRIC: &str = "serviceruntime.googleapis.com/quota/limit";

const SERVICE: &str = "aiplatform.googleapis.com";

/// How far back to look for points.
const LOOKBACK_HOURS: i64 = 24;

/// Page cap per query.
const MAX_PAGES: usize = 10;

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    time_series: Vec<TimeSeries>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// One monitoring time series.
#[derive(Debug, Deserialize)]
pub struct TimeSeries {
    /// Metric labels.
    #[serde(default)]
    pub metric: Labelled,
    /// Monitored resource labels.
    #[serde(default)]
    pub resource: Labelled,
    /// Points, newest first.
    #[serde(default)]
    pub points: Vec<Point>,
}

/// Metric or resource descriptor.
#[derive(Debug, Default, Deserialize)]
pub struct Labelled {
    /// Label map.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// One data point.
#[derive(Debug, Deserialize)]
pub struct Point {
    /// Typed value.
    pub value: TypedValue,
}

/// Monitoring typed value. Integers arrive as strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedValue {
    /// `int64Value`.
    #[serde(default)]
    pub int64_value: Option<String>,
    /// `doubleValue`.
    #[serde(default)]
    pub double_value: Option<f64>,
}

impl TypedValue {
    fn as_f64(&self) -> Option<f64> {
        self.double_value
            .or_else(|| self.int64_value.as_deref().and_then(|v| v.parse().ok()))
    }
}

// ============================================================================
// Pairing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QuotaKey {
    quota_metric: String,
    limit_name: Option<String>,
    location: String,
}

impl QuotaKey {
    fn of(series: &TimeSeries) -> Option<Self> {
        let quota_metric = series.metric.labels.get("quota_metric")?.clone();
        Some(Self {
            quota_metric,
            limit_name: series.metric.labels.get("limit_name").cloned(),
            location: series
                .resource
                .labels
                .get("location")
                .cloned()
                .unwrap_or_else(|| "global".to_string()),
        })
    }

    /// A usage series without `limit_name` matches every limit of its metric.
    fn matches(&self, limit: &QuotaKey) -> bool {
        self.quota_metric == limit.quota_metric
            && self.location == limit.location
            && self.limit_name.as_ref().is_none_or(|name| Some(name) == limit.limit_name.as_ref())
    }
}

fn latest(series: &TimeSeries) -> Option<f64> {
    series.points.first().and_then(|p| p.value.as_f64())
}

/// The busiest usage/limit pair.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaPeak {
    /// Usage as a percentage of the limit.
    pub percent: f64,
    /// Quota metric name.
    pub quota_metric: String,
    /// Location of the series.
    pub location: String,
}

impl QuotaPeak {
    /// Converts to a rate window labelled with the quota metric.
    pub fn to_window(&self) -> RateWindow {
        RateWindow::new(self.percent).with_reset_description(format!("{} ({})", self.quota_metric, self.location))
    }
}

/// Pairs usage with limit series and returns the highest percentage.
///
/// Limits of zero or less are skipped.
pub fn peak_usage(usage: &[TimeSeries], limits: &[TimeSeries]) -> Option<QuotaPeak> {
    let limits: Vec<(QuotaKey, f64)> = limits
        .iter()
        .filter_map(|s| Some((QuotaKey::of(s)?, latest(s)?)))
        .filter(|(_, limit)| *limit > 0.0)
        .collect();

    usage
        .iter()
        .filter_map(|s| Some((QuotaKey::of(s)?, latest(s)?)))
        .flat_map(|(key, used)| {
            limits
                .iter()
                .filter(move |(limit_key, _)| key.matches(limit_key))
                .map(move |(limit_key, limit)| QuotaPeak {
                    percent: used / limit * 100.0,
                    quota_metric: limit_key.quota_metric.clone(),
                    location: limit_key.location.clone(),
                })
        })
        .max_by(|a, b| a.percent.total_cmp(&b.percent))
}

// ============================================================================
// Queries
// ============================================================================

fn query_url(project: &str, metric: &str, now: DateTime<Utc>, page_token: Option<&str>) -> Result<Url, VertexError> {
    let filter = format!(
        "metric.type=\"{metric}\" AND resource.type=\"consumer_quota\" AND resource.label.service=\"{SERVICE}\""
    );
    let start = (now - Duration::hours(LOOKBACK_HOURS)).to_rfc3339();
    let end = now.to_rfc3339();
    let mut url = Url::parse_with_params(
        &format!("{MONITORING_BASE}/projects/{project}/timeSeries"),
        &[
            ("filter", filter.as_str()),
            ("interval.startTime", start.as_str()),
            ("interval.endTime", end.as_str()),
        ],
    )
    .map_err(|e| VertexError::InvalidQuery(e.to_string()))?;
    if let Some(token) = page_token {
        url.query_pairs_mut().append_pair("pageToken", token);
    }
    Ok(url)
}

fn project_header(project: &str) -> Result<HeaderMap, VertexError> {
    let mut headers = HeaderMap::new();
    let value = HeaderValue::from_str(project).map_err(|e| VertexError::InvalidQuery(e.to_string()))?;
    headers.insert(HeaderName::from_static("x-goog-user-project"), value);
    Ok(headers)
}

/// Lists every series of `metric` for the project.
#[instrument(skip(http, token))]
pub async fn list_series(
    http: &HttpClient,
    token: &str,
    project: &str,
    metric: &str,
) -> Result<Vec<TimeSeries>, VertexError> {
    let auth = RequestAuth::Bearer(token.to_string());
    let now = Utc::now();
    let mut series = Vec::new();
    let mut page_token: Option<String> = None;

    for _ in 0..MAX_PAGES {
        let url = query_url(project, metric, now, page_token.as_deref())?;
        let page: ListResponse = http
            .get_json_with_headers(url.as_str(), &auth, project_header(project)?)
            .await?;
        series.extend(page.time_series);
        page_token = page.next_page_token.filter(|t| !t.is_empty());
        if page_token.is_none() {
            break;
        }
    }

    debug!(count = series.len(), "Listed time series");
    Ok(series)
}

/// Queries usage and limits and returns the busiest pair.
pub async fn fetch_peak(http: &HttpClient, token: &str, project: &str) -> Result<QuotaPeak, VertexError> {
    let usage = list_series(http, token, project, USAGE_METRIC).await?;
    let limits = list_series(http, token, project, LIMIT_METRIC).await?;
    peak_usage(&usage, &limits).ok_or_else(|| VertexError::NoQuotaData(project.to_string()))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn series(json: &str) -> Vec<TimeSeries> {
        serde_json::from_str::<ListResponse>(json).unwrap().time_series
    }

    const USAGE: &str = r#"{"timeSeries":[
        {"metric":{"labels":{"quota_metric":"aiplatform.googleapis.com/online_prediction_requests"}},
         "resource":{"labels":{"location":"us-central1"}},
         "points":[{"value":{"int64Value":"30"}},{"value":{"int64Value":"5"}}]},
        {"metric":{"labels":{"quota_metric":"aiplatform.googleapis.com/generate_content_tokens"}},
         "resource":{"labels":{"location":"europe-west4"}},
         "points":[{"value":{"doubleValue":900.0}}]}
    ]}"#;

    const LIMITS: &str = r#"{"timeSeries":[
        {"metric":{"labels":{"quota_metric":"aiplatform.googleapis.com/online_prediction_requests","limit_name":"PerMinute"}},
         "resource":{"labels":{"location":"us-central1"}},
         "points":[{"value":{"int64Value":"60"}}]},
        {"metric":{"labels":{"quota_metric":"aiplatform.googleapis.com/generate_content_tokens","limit_name":"PerMinute"}},
         "resource":{"labels":{"location":"us-central1"}},
         "points":[{"value":{"int64Value":"1000"}}]}
    ]}"#;

    #[test]
    fn test_pairs_by_metric_and_location() {
        let peak = peak_usage(&series(USAGE), &series(LIMITS)).unwrap();
        // The token series is in another location and has no limit to pair with.
        assert!((peak.percent - 50.0).abs() < 1e-9);
        assert_eq!(peak.location, "us-central1");
        assert!(peak.quota_metric.ends_with("online_prediction_requests"));
    }

    #[test]
    fn test_no_pairs() {
        assert!(peak_usage(&series(USAGE), &[]).is_none());
        let zero_limit = r#"{"timeSeries":[{"metric":{"labels":{"quota_metric":"aiplatform.googleapis.com/online_prediction_requests"}},
            "resource":{"labels":{"location":"us-central1"}},"points":[{"value":{"int64Value":"0"}}]}]}"#;
        assert!(peak_usage(&series(USAGE), &series(zero_limit)).is_none());
    }

    #[test]
    fn test_query_url() {
        let now = DateTime::parse_from_rfc3339("2025-01-02T00:00:00Z").unwrap().with_timezone(&Utc);
        let url = query_url("my-proj", USAGE_METRIC, now, Some("next")).unwrap();
        assert_eq!(url.path(), "/v3/projects/my-proj/timeSeries");
        let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert!(pairs["filter"].contains(USAGE_METRIC));
        assert_eq!(pairs["pageToken"], "next");
        assert!(pairs["interval.startTime"].starts_with("2025-01-01T00:00:00"));
    }
}
