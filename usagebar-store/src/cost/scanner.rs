//! Scans local logs into a rolling 30-day cost snapshot.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Days, Local, NaiveDate};
use tracing::{debug, instrument, warn};
use usagebar_core::{CostUsageTokenSnapshot, DailyEntry, ModelBreakdown};

use super::logs::{ParsedFile, SummaryRow, parse_claude, parse_codex};
use super::pricing::{self, TokenCounts};
use super::{CostRoots, LogFamily, ProviderFilter};
use crate::error::StoreError;
use crate::persistence::default_cost_cache_path;

/// Days in the rolling window, today included.
pub const WINDOW_DAYS: u64 = 30;

/// Name used for rows whose log did not name a model.
const UNKNOWN_MODEL: &str = "unknown";

// ============================================================================
// Aggregation
// ============================================================================

fn in_window(date: &str, since: NaiveDate, until: NaiveDate) -> bool {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok_and(|d| d >= since && d <= until)
}

/// Builds a snapshot from parsed files.
///
/// Rows sharing a dedup key count once across all files. A dated summary
/// line replaces the summed totals for its day. An undated summary is the
/// report-wide total only when its file is the sole source for the window;
/// otherwise the summed daily values are used. Days that sum to zero are
/// omitted.
pub fn aggregate<'a>(
    files: impl IntoIterator<Item = &'a ParsedFile>,
    filter: ProviderFilter,
    since: NaiveDate,
    until: NaiveDate,
) -> Option<CostUsageTokenSnapshot> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut days: BTreeMap<&str, BTreeMap<&str, TokenCounts>> = BTreeMap::new();
    let mut day_summaries: HashMap<&str, &SummaryRow> = HashMap::new();
    let mut report: Option<&SummaryRow> = None;
    let mut sources = 0usize;

    for file in files {
        let mut contributed = false;
        for row in &file.rows {
            if !filter.accepts(row.model.as_deref()) || !in_window(&row.date, since, until) {
                continue;
            }
            contributed = true;
            if let Some(key) = row.dedup_key.as_deref() {
                if !seen.insert(key) {
                    continue;
                }
            }
            let model = row.model.as_deref().unwrap_or(UNKNOWN_MODEL);
            days.entry(row.date.as_str())
                .or_default()
                .entry(model)
                .or_default()
                .add(&row.tokens);
        }
        for summary in &file.summaries {
            match summary.date.as_deref() {
                Some(date) if in_window(date, since, until) => {
                    day_summaries.insert(date, summary);
                    days.entry(date).or_default();
                    contributed = true;
                }
                Some(_) => {}
                None => {
                    report = Some(summary);
                    contributed = true;
                }
            }
        }
        if contributed {
            sources += 1;
        }
    }

    if report.is_some() && sources > 1 {
        debug!(sources, "Ignoring report-wide summary shared with other logs");
        report = None;
    }

    let daily: Vec<DailyEntry> = days
        .into_iter()
        .filter_map(|(date, models)| day_entry(date, &models, day_summaries.get(date).copied()))
        .collect();

    CostUsageTokenSnapshot::from_daily(
        daily,
        report.and_then(|r| r.total_tokens),
        report.and_then(|r| r.total_cost_usd),
    )
}

fn day_entry(date: &str, models: &BTreeMap<&str, TokenCounts>, summary: Option<&SummaryRow>) -> Option<DailyEntry> {
    let mut entry = DailyEntry::new(date);
    let mut cost: Option<f64> = None;

    for (model, counts) in models {
        entry.input_tokens += counts.input;
        entry.output_tokens += counts.output;
        entry.cache_read_tokens += counts.cache_read;
        entry.cache_creation_tokens += counts.cache_write;

        let model_cost = pricing::cost_usd(model, counts);
        if let Some(c) = model_cost {
            cost = Some(cost.unwrap_or(0.0) + c);
        }
        entry.models_used.push((*model).to_string());
        entry.model_breakdowns.push(ModelBreakdown {
            model_name: (*model).to_string(),
            cost_usd: model_cost,
            total_tokens: counts.total(),
        });
    }
    entry.cost_usd = cost;

    if let Some(summary) = summary {
        if summary.total_tokens.is_some() {
            entry.total_tokens = summary.total_tokens;
        }
        if summary.total_cost_usd.is_some() {
            entry.cost_usd = summary.total_cost_usd;
        }
    }

    let no_cost = entry.cost_usd.is_none_or(|c| c.abs() < f64::EPSILON);
    if entry.tokens() == 0 && no_cost {
        return None;
    }
    Some(entry)
}

// ============================================================================
// File Discovery
// ============================================================================

struct LogFile {
    path: String,
    mtime_ms: i64,
    size: u64,
}

/// Lists `*.jsonl` files under `root` modified on or after `since`.
fn list_logs(root: &Path, since: NaiveDate) -> Result<Vec<LogFile>, StoreError> {
    let pattern = format!("{}/**/*.jsonl", glob::Pattern::escape(&root.to_string_lossy()));
    let paths = glob::glob(&pattern).map_err(|e| StoreError::Config(format!("bad log pattern: {e}")))?;

    let mut files = Vec::new();
    for entry in paths {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                debug!(error = %e, "Skipping unreadable log entry");
                continue;
            }
        };
        let Ok(meta) = std::fs::metadata(&path) else { continue };
        let Ok(modified) = meta.modified() else { continue };
        let modified: DateTime<Local> = modified.into();
        if modified.date_naive() < since {
            continue;
        }
        files.push(LogFile {
            path: path.to_string_lossy().into_owned(),
            mtime_ms: modified.timestamp_millis(),
            size: meta.len(),
        });
    }
    Ok(files)
}

// ============================================================================
// Scanner
// ============================================================================

#[derive(Default)]
struct ScannerState {
    cache: Option<super::CostUsageCache>,
    recent: HashMap<ProviderFilter, (Instant, Option<CostUsageTokenSnapshot>)>,
}

/// Incremental, throttled cost scanner.
///
/// `scan` does blocking filesystem work; async callers run it through
/// `spawn_blocking`.
pub struct CostScanner {
    roots: CostRoots,
    cache_path: Option<PathBuf>,
    min_interval: Duration,
    state: Mutex<ScannerState>,
}

impl CostScanner {
    /// Default minimum time between two non-forced scans of one filter.
    pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(60);

    /// Creates a scanner persisting its cache at the default location.
    pub fn new(roots: CostRoots) -> Self {
        Self {
            roots,
            cache_path: Some(default_cost_cache_path()),
            min_interval: Self::DEFAULT_MIN_INTERVAL,
            state: Mutex::new(ScannerState::default()),
        }
    }

    /// Sets the cache file; `None` keeps the cache in memory only.
    pub fn with_cache_path(mut self, path: Option<PathBuf>) -> Self {
        self.cache_path = path;
        self
    }

    /// Sets the throttle interval.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Scans the window ending at `today` for `filter`.
    ///
    /// Within the throttle interval the previous result is returned unless
    /// `force` is set. `force` also re-reads every file.
    #[instrument(skip(self), fields(filter = ?filter))]
    pub fn scan(
        &self,
        filter: ProviderFilter,
        today: NaiveDate,
        force: bool,
    ) -> Result<Option<CostUsageTokenSnapshot>, StoreError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if !force {
            if let Some((at, snapshot)) = state.recent.get(&filter) {
                if at.elapsed() < self.min_interval {
                    debug!("Returning throttled cost snapshot");
                    return Ok(snapshot.clone());
                }
            }
        }

        let since = today
            .checked_sub_days(Days::new(WINDOW_DAYS - 1))
            .unwrap_or(today);
        let cache_path = self.cache_path.clone();
        let cache = state
            .cache
            .get_or_insert_with(|| cache_path.as_deref().map(super::CostUsageCache::load).unwrap_or_default());

        let mut current: Vec<String> = Vec::new();
        let mut parsed_count = 0usize;
        for root in self.roots.for_family(filter.family()) {
            let files = list_logs(root, since)?;
            let keep: HashSet<String> = files.iter().map(|f| f.path.clone()).collect();
            for file in files {
                let fresh = !force && cache.lookup(&file.path, file.mtime_ms, file.size).is_some();
                if !fresh {
                    let content = match std::fs::read_to_string(&file.path) {
                        Ok(content) => content,
                        Err(e) => {
                            warn!(path = %file.path, error = %e, "Failed to read log file");
                            continue;
                        }
                    };
                    let parsed = match filter.family() {
                        LogFamily::Codex => parse_codex(&content, &Local),
                        LogFamily::Claude => parse_claude(&content, &Local),
                    };
                    cache.insert(file.path.clone(), file.mtime_ms, file.size, parsed);
                    parsed_count += 1;
                }
                current.push(file.path);
            }
            cache.prune(&root.to_string_lossy(), &keep);
        }

        let snapshot = aggregate(current.iter().filter_map(|p| cache.get(p)), filter, since, today);
        debug!(
            files = current.len(),
            parsed = parsed_count,
            days = snapshot.as_ref().map_or(0, |s| s.daily.len()),
            "Cost scan complete"
        );

        if parsed_count > 0 {
            if let Some(path) = &self.cache_path {
                if let Err(e) = cache.save(path) {
                    warn!(path = %path.display(), error = %e, "Failed to persist cost cache");
                }
            }
        }

        state.recent.insert(filter, (Instant::now(), snapshot.clone()));
        Ok(snapshot)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::logs::UsageRow;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn row(day: &str, model: &str, input: u64, key: Option<&str>) -> UsageRow {
        UsageRow {
            date: day.to_string(),
            model: Some(model.to_string()),
            tokens: TokenCounts {
                input,
                output: 0,
                cache_read: 0,
                cache_write: 0,
            },
            dedup_key: key.map(String::from),
        }
    }

    fn file(rows: Vec<UsageRow>, summaries: Vec<SummaryRow>) -> ParsedFile {
        ParsedFile { rows, summaries }
    }

    #[test]
    fn test_dedup_across_files() {
        let a = file(vec![row("2025-01-05", "claude-sonnet-4-20250514", 1_000_000, Some("m1:r1"))], vec![]);
        let b = file(
            vec![
                row("2025-01-05", "claude-sonnet-4-20250514", 1_000_000, Some("m1:r1")),
                row("2025-01-05", "claude-sonnet-4-20250514", 1_000_000, Some("m2:r2")),
            ],
            vec![],
        );
        let snap = aggregate([&a, &b], ProviderFilter::Claude, date("2024-12-07"), date("2025-01-05")).unwrap();
        assert_eq!(snap.daily.len(), 1);
        assert_eq!(snap.daily[0].input_tokens, 2_000_000);
        assert!((snap.session_cost_usd.unwrap() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_vertex_rows_excluded() {
        let f = file(
            vec![
                row("2025-01-05", "claude-sonnet-4@20250514", 100, None),
                row("2025-01-05", "claude-sonnet-4-20250514", 50, None),
            ],
            vec![],
        );
        let all = aggregate([&f], ProviderFilter::Claude, date("2025-01-01"), date("2025-01-05")).unwrap();
        let direct =
            aggregate([&f], ProviderFilter::ClaudeExcludingVertex, date("2025-01-01"), date("2025-01-05")).unwrap();
        assert_eq!(all.session_tokens, Some(150));
        assert_eq!(direct.session_tokens, Some(50));
    }

    #[test]
    fn test_window_and_zero_days() {
        let f = file(
            vec![
                row("2024-12-01", "gpt-5", 100, None),
                row("2025-01-04", "gpt-5", 0, None),
                row("2025-01-05", "gpt-5", 10, None),
            ],
            vec![],
        );
        let snap = aggregate([&f], ProviderFilter::Codex, date("2024-12-07"), date("2025-01-05")).unwrap();
        let dates: Vec<&str> = snap.daily.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(dates, vec!["2025-01-05"]);
        assert_eq!(snap.last_30_days_tokens, Some(10));

        let empty = file(vec![row("2025-01-05", "gpt-5", 0, None)], vec![]);
        assert!(aggregate([&empty], ProviderFilter::Codex, date("2024-12-07"), date("2025-01-05")).is_none());
    }

    #[test]
    fn test_summaries_override() {
        let f = file(
            vec![row("2025-01-05", "claude-sonnet-4", 1000, None)],
            vec![
                SummaryRow {
                    date: Some("2025-01-05".into()),
                    total_tokens: Some(5000),
                    total_cost_usd: Some(2.5),
                },
                SummaryRow {
                    date: None,
                    total_tokens: Some(90_000),
                    total_cost_usd: Some(40.0),
                },
            ],
        );
        let snap = aggregate([&f], ProviderFilter::Claude, date("2024-12-07"), date("2025-01-05")).unwrap();
        assert_eq!(snap.session_tokens, Some(5000));
        assert_eq!(snap.session_cost_usd, Some(2.5));
        assert_eq!(snap.last_30_days_tokens, Some(90_000));
        assert_eq!(snap.last_30_days_cost_usd, Some(40.0));
    }

    #[test]
    fn test_undated_summary_ignored_across_files() {
        let report_only = file(
            vec![],
            vec![SummaryRow {
                date: None,
                total_tokens: Some(10),
                total_cost_usd: Some(1.0),
            }],
        );
        let rows = file(vec![row("2025-01-05", "claude-sonnet-4-20250514", 5_000_000, None)], vec![]);

        for files in [[&report_only, &rows], [&rows, &report_only]] {
            let snap = aggregate(files, ProviderFilter::Claude, date("2024-12-07"), date("2025-01-05")).unwrap();
            assert_eq!(snap.session_tokens, Some(5_000_000));
            assert_eq!(snap.last_30_days_tokens, Some(5_000_000));
            assert!((snap.last_30_days_cost_usd.unwrap() - 15.0).abs() < 1e-9);
            assert!(snap.last_30_days_tokens >= snap.session_tokens);
        }
    }

    #[test]
    fn test_unknown_model_has_no_cost() {
        let f = file(vec![row("2025-01-05", "mystery-model", 10, None)], vec![]);
        let snap = aggregate([&f], ProviderFilter::Codex, date("2025-01-01"), date("2025-01-05")).unwrap();
        assert_eq!(snap.daily[0].cost_usd, None);
        assert_eq!(snap.daily[0].model_breakdowns[0].model_name, "mystery-model");
    }

    fn codex_line(total_input: u64) -> String {
        format!(
            r#"{{"type":"event_msg","timestamp":"{}","payload":{{"type":"token_count","info":{{"total_token_usage":{{"input_tokens":{total_input},"cached_input_tokens":0,"output_tokens":0}}}}}}}}"#,
            Local::now().to_rfc3339()
        )
    }

    #[test]
    fn test_scanner_throttle_and_force() {
        let home = tempfile::tempdir().unwrap();
        let sessions = home.path().join("sessions").join("2025").join("01");
        std::fs::create_dir_all(&sessions).unwrap();
        let log = sessions.join("rollout.jsonl");
        std::fs::write(&log, format!("{}\n", codex_line(100))).unwrap();

        let cache_path = home.path().join("cache").join("cost-usage.json");
        let scanner = CostScanner::new(CostRoots {
            codex: vec![home.path().join("sessions")],
            claude: vec![],
        })
        .with_cache_path(Some(cache_path.clone()))
        .with_min_interval(Duration::from_secs(3600));
        let today = Local::now().date_naive();

        let first = scanner.scan(ProviderFilter::Codex, today, false).unwrap().unwrap();
        assert_eq!(first.session_tokens, Some(100));
        assert!(cache_path.exists());

        std::fs::write(&log, format!("{}\n{}\n", codex_line(100), codex_line(250))).unwrap();
        let throttled = scanner.scan(ProviderFilter::Codex, today, false).unwrap().unwrap();
        assert_eq!(throttled.session_tokens, Some(100));

        let forced = scanner.scan(ProviderFilter::Codex, today, true).unwrap().unwrap();
        assert_eq!(forced.session_tokens, Some(250));
    }

    #[test]
    fn test_scanner_missing_root() {
        let scanner = CostScanner::new(CostRoots {
            codex: vec![PathBuf::from("/nonexistent/usagebar/sessions")],
            claude: vec![],
        })
        .with_cache_path(None);
        let result = scanner.scan(ProviderFilter::Codex, date("2025-01-05"), true).unwrap();
        assert!(result.is_none());
    }
}
