//! Test outcomes, run summaries and report sinks

use chrono::{DateTime, Local, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::error::HarnessResult;

pub const DEFAULT_CATEGORY: &str = "Uncategorized";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Inconclusive,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passed => "Passed",
            TestStatus::Failed => "Failed",
            TestStatus::Skipped => "Skipped",
            TestStatus::Inconclusive => "Inconclusive",
        }
    }

    fn icon(&self) -> &'static str {
        match self {
            TestStatus::Passed => "✓",
            TestStatus::Failed => "✗",
            TestStatus::Skipped => "⚠",
            TestStatus::Inconclusive => "?",
        }
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a per-test report entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Pass,
    Fail,
    Warning,
    Skip,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Pass => "pass",
            LogLevel::Fail => "fail",
            LogLevel::Warning => "warning",
            LogLevel::Skip => "skip",
        }
    }
}

/// Outcome of one test case execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub name: String,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub category: String,
    pub error: Option<String>,
    pub artifact: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Result of running all tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub inconclusive: usize,
    /// Sum of the per-test durations
    pub duration_ms: u64,
    /// Wall clock from aggregator creation to summary
    pub wall_clock_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<TestOutcome>,
}

impl RunSummary {
    pub fn from_outcomes(
        outcomes: Vec<TestOutcome>,
        started_at: DateTime<Utc>,
        wall_clock_ms: u64,
    ) -> Self {
        let count = |status: TestStatus| outcomes.iter().filter(|o| o.status == status).count();
        Self {
            total: outcomes.len(),
            passed: count(TestStatus::Passed),
            failed: count(TestStatus::Failed),
            skipped: count(TestStatus::Skipped),
            inconclusive: count(TestStatus::Inconclusive),
            duration_ms: outcomes.iter().map(|o| o.duration_ms).sum(),
            wall_clock_ms,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        }
    }

    pub fn count(&self, status: TestStatus) -> usize {
        match status {
            TestStatus::Passed => self.passed,
            TestStatus::Failed => self.failed,
            TestStatus::Skipped => self.skipped,
            TestStatus::Inconclusive => self.inconclusive,
        }
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }

    /// Write the summary to `<dir>/test-results.json`
    pub fn write_json(&self, dir: &Path) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(dir)?;

        let path = dir.join("test-results.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

/// Write-only destination for report entries.
///
/// Sinks are a side channel: the aggregator logs and ignores their failures.
pub trait ReportSink: Send {
    fn start_test(&mut self, name: &str, category: &str) -> HarnessResult<()>;

    fn entry(&mut self, test: &str, level: LogLevel, message: &str) -> HarnessResult<()>;

    fn end_test(&mut self, outcome: &TestOutcome) -> HarnessResult<()>;

    /// Persist everything, returning the artifact location
    fn flush(&mut self, summary: &RunSummary) -> HarnessResult<PathBuf>;
}

struct Started {
    category: String,
    at: DateTime<Utc>,
    clock: Instant,
}

#[derive(Default)]
struct AggregatorState {
    started: HashMap<String, Started>,
    outcomes: Vec<TestOutcome>,
}

/// Collects exactly one outcome per test case, in recording order
pub struct ResultAggregator {
    state: Mutex<AggregatorState>,
    sink: Mutex<Option<Box<dyn ReportSink>>>,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AggregatorState::default()),
            sink: Mutex::new(None),
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    pub fn with_sink(sink: Box<dyn ReportSink>) -> Self {
        let aggregator = Self::new();
        *aggregator.sink.lock() = Some(sink);
        aggregator
    }

    fn to_sink(&self, what: &str, f: impl FnOnce(&mut dyn ReportSink) -> HarnessResult<()>) {
        if let Some(sink) = self.sink.lock().as_deref_mut() {
            if let Err(e) = f(sink) {
                warn!("Report sink failed to record {}: {}", what, e);
            }
        }
    }

    pub fn record_start(&self, name: &str, category: &str) {
        let category = if category.is_empty() { DEFAULT_CATEGORY } else { category };
        self.state.lock().started.insert(
            name.to_string(),
            Started {
                category: category.to_string(),
                at: Utc::now(),
                clock: Instant::now(),
            },
        );
        self.to_sink("test start", |sink| sink.start_test(name, category));
    }

    /// Attach an entry to a running test's report section
    pub fn log(&self, name: &str, level: LogLevel, message: &str) {
        self.to_sink("entry", |sink| sink.entry(name, level, message));
    }

    /// Record the terminal state of a test case. A second outcome for the
    /// same name is ignored.
    pub fn record_outcome(
        &self,
        name: &str,
        status: TestStatus,
        duration_ms: u64,
        error: Option<String>,
        artifact: Option<PathBuf>,
    ) {
        let outcome = {
            let mut state = self.state.lock();
            if state.outcomes.iter().any(|o| o.name == name) {
                warn!("Outcome for '{}' already recorded, ignoring {}", name, status);
                return;
            }

            let now = Utc::now();
            let (category, started_at) = match state.started.remove(name) {
                Some(started) => (started.category, started.at),
                None => {
                    warn!("Outcome for '{}' recorded without a start", name);
                    (DEFAULT_CATEGORY.to_string(), now)
                }
            };

            let outcome = TestOutcome {
                name: name.to_string(),
                status,
                duration_ms,
                category,
                error,
                artifact,
                started_at,
                finished_at: now,
            };
            state.outcomes.push(outcome.clone());
            outcome
        };

        match outcome.status {
            TestStatus::Passed => info!("✓ {} ({} ms)", outcome.name, outcome.duration_ms),
            TestStatus::Failed => error!(
                "✗ {} - {}",
                outcome.name,
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
            _ => info!(
                "{} {} - {}",
                outcome.status.icon(),
                outcome.name,
                outcome.error.as_deref().unwrap_or("no reason provided")
            ),
        }

        self.to_sink("outcome", |sink| sink.end_test(&outcome));
    }

    /// Elapsed milliseconds since `name` was started, if it was
    pub fn elapsed_ms(&self, name: &str) -> Option<u64> {
        self.state
            .lock()
            .started
            .get(name)
            .map(|s| s.clock.elapsed().as_millis() as u64)
    }

    pub fn recorded(&self) -> usize {
        self.state.lock().outcomes.len()
    }

    /// Build the run summary and flush the sink
    pub fn summarize(self) -> (RunSummary, Option<PathBuf>) {
        let state = self.state.into_inner();
        for name in state.started.keys() {
            warn!("Test '{}' started but never recorded an outcome", name);
        }

        let summary = RunSummary::from_outcomes(
            state.outcomes,
            self.started_at,
            self.clock.elapsed().as_millis() as u64,
        );

        info!(
            "Test Results: {} passed, {} failed, {} skipped, {} inconclusive ({} ms)",
            summary.passed, summary.failed, summary.skipped, summary.inconclusive, summary.wall_clock_ms
        );

        let artifact = match self.sink.into_inner() {
            Some(mut sink) => match sink.flush(&summary) {
                Ok(path) => {
                    info!("Report location: {}", path.display());
                    Some(path)
                }
                Err(e) => {
                    warn!("Report could not be written: {}", e);
                    None
                }
            },
            None => None,
        };

        (summary, artifact)
    }
}

struct HtmlSection {
    name: String,
    category: String,
    entries: Vec<(DateTime<Local>, LogLevel, String)>,
    status: Option<TestStatus>,
}

/// Writes `TestReport_<timestamp>.html` into the output directory
pub struct HtmlReportSink {
    output_dir: PathBuf,
    title: String,
    system_info: Vec<(String, String)>,
    sections: Vec<HtmlSection>,
}

impl HtmlReportSink {
    pub fn new(output_dir: impl Into<PathBuf>, title: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            title: title.into(),
            system_info: Vec::new(),
            sections: Vec::new(),
        }
    }

    pub fn with_system_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.system_info.push((key.into(), value.into()));
        self
    }

    fn section(&mut self, name: &str) -> &mut HtmlSection {
        let index = match self.sections.iter().rposition(|s| s.name == name) {
            Some(index) => index,
            None => {
                self.sections.push(HtmlSection {
                    name: name.to_string(),
                    category: DEFAULT_CATEGORY.to_string(),
                    entries: Vec::new(),
                    status: None,
                });
                self.sections.len() - 1
            }
        };
        &mut self.sections[index]
    }

    fn render(&self, summary: &RunSummary) -> String {
        let mut html = String::new();
        let _ = write!(
            html,
            "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title>\
             <style>body{{font-family:sans-serif;margin:20px}}table{{border-collapse:collapse;width:100%}}\
             td,th{{padding:8px;text-align:left;border-bottom:1px solid #ddd}}\
             .pass,.Passed{{color:green}}.fail,.Failed{{color:red}}.skip,.Skipped,.warning{{color:orange}}\
             .Inconclusive{{color:gray}}</style></head><body>\n<h1>{title}</h1>\n",
            title = escape(&self.title)
        );

        if !self.system_info.is_empty() {
            html.push_str("<h2>System</h2>\n<table>\n");
            for (key, value) in &self.system_info {
                let _ = writeln!(html, "<tr><th>{}</th><td>{}</td></tr>", escape(key), escape(value));
            }
            html.push_str("</table>\n");
        }

        let _ = writeln!(
            html,
            "<h2>Summary</h2>\n<p>Start: {} &middot; End: {} &middot; Duration: {} ms</p>\n\
             <p>Total: {} &middot; Passed: {} &middot; Failed: {} &middot; Skipped: {} &middot; Inconclusive: {}</p>",
            summary.started_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            summary.finished_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            summary.wall_clock_ms,
            summary.total,
            summary.passed,
            summary.failed,
            summary.skipped,
            summary.inconclusive,
        );
        html.push_str(
            "<table>\n<thead><tr><th>Test Name</th><th>Status</th><th>Duration</th><th>Category</th></tr></thead>\n<tbody>\n",
        );
        for outcome in &summary.outcomes {
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td class=\"{}\">{} {}</td><td>{} ms</td><td>{}</td></tr>",
                escape(&outcome.name),
                outcome.status,
                outcome.status.icon(),
                outcome.status,
                outcome.duration_ms,
                escape(&outcome.category),
            );
        }
        html.push_str("</tbody></table>\n<h2>Tests</h2>\n");

        for section in &self.sections {
            let status = section.status.map(|s| s.as_str()).unwrap_or("Unknown");
            let _ = writeln!(
                html,
                "<section><h3 class=\"{status}\">{} <small>[{}] {status}</small></h3>\n<ul>",
                escape(&section.name),
                escape(&section.category),
            );
            for (at, level, message) in &section.entries {
                let _ = writeln!(
                    html,
                    "<li class=\"{}\">{} <b>{}</b> {}</li>",
                    level.as_str(),
                    at.format("%H:%M:%S"),
                    level.as_str(),
                    escape(message)
                );
            }
            html.push_str("</ul></section>\n");
        }

        html.push_str("</body></html>\n");
        html
    }
}

impl ReportSink for HtmlReportSink {
    fn start_test(&mut self, name: &str, category: &str) -> HarnessResult<()> {
        self.sections.push(HtmlSection {
            name: name.to_string(),
            category: category.to_string(),
            entries: vec![(Local::now(), LogLevel::Info, format!("Test started at: {}", Local::now().format("%H:%M:%S")))],
            status: None,
        });
        Ok(())
    }

    fn entry(&mut self, test: &str, level: LogLevel, message: &str) -> HarnessResult<()> {
        self.section(test).entries.push((Local::now(), level, message.to_string()));
        Ok(())
    }

    fn end_test(&mut self, outcome: &TestOutcome) -> HarnessResult<()> {
        let level = match outcome.status {
            TestStatus::Passed => LogLevel::Pass,
            TestStatus::Failed => LogLevel::Fail,
            TestStatus::Skipped | TestStatus::Inconclusive => LogLevel::Skip,
        };
        let mut message = format!("Test {} in {}ms", outcome.status.as_str().to_uppercase(), outcome.duration_ms);
        if let Some(error) = &outcome.error {
            let _ = write!(message, ": {}", error);
        }

        let section = self.section(&outcome.name);
        section.category = outcome.category.clone();
        section.status = Some(outcome.status);
        section.entries.push((Local::now(), level, message));
        if let Some(artifact) = &outcome.artifact {
            section
                .entries
                .push((Local::now(), LogLevel::Info, format!("Screenshot: {}", artifact.display())));
        }
        Ok(())
    }

    fn flush(&mut self, summary: &RunSummary) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self
            .output_dir
            .join(format!("TestReport_{}.html", Local::now().format("%Y%m%d_%H%M%S")));
        std::fs::write(&path, self.render(summary))?;
        Ok(path)
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn aggregate(statuses: &[TestStatus]) -> RunSummary {
        let aggregator = ResultAggregator::new();
        for (i, status) in statuses.iter().enumerate() {
            let name = format!("test-{}", i);
            aggregator.record_start(&name, "Navigation");
            aggregator.record_outcome(&name, *status, 10 + i as u64, None, None);
        }
        aggregator.summarize().0
    }

    #[test_case(&[] ; "empty run")]
    #[test_case(&[TestStatus::Passed, TestStatus::Passed] ; "all passed")]
    #[test_case(&[TestStatus::Passed, TestStatus::Failed, TestStatus::Skipped, TestStatus::Inconclusive, TestStatus::Failed] ; "mixed")]
    fn test_summary_partitions_total(statuses: &[TestStatus]) {
        let summary = aggregate(statuses);

        assert_eq!(summary.total, statuses.len());
        assert_eq!(
            summary.passed + summary.failed + summary.skipped + summary.inconclusive,
            summary.total
        );
        for status in [TestStatus::Passed, TestStatus::Failed, TestStatus::Skipped, TestStatus::Inconclusive] {
            assert_eq!(summary.count(status), statuses.iter().filter(|s| **s == status).count());
        }
        assert_eq!(summary.duration_ms, summary.outcomes.iter().map(|o| o.duration_ms).sum::<u64>());
        assert_eq!(summary.success(), !statuses.contains(&TestStatus::Failed));
    }

    #[test]
    fn test_outcomes_keep_recording_order() {
        let aggregator = ResultAggregator::new();
        aggregator.record_start("first", "A");
        aggregator.record_start("second", "B");
        aggregator.record_outcome("second", TestStatus::Passed, 1, None, None);
        aggregator.record_outcome("first", TestStatus::Failed, 2, Some("boom".to_string()), None);

        let (summary, artifact) = aggregator.summarize();
        let names: Vec<_> = summary.outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, ["second", "first"]);
        assert_eq!(summary.outcomes[1].category, "A");
        assert_eq!(summary.outcomes[1].error.as_deref(), Some("boom"));
        assert!(artifact.is_none());
    }

    #[test]
    fn test_outcome_recorded_once() {
        let aggregator = ResultAggregator::new();
        aggregator.record_start("only", "");
        aggregator.record_outcome("only", TestStatus::Failed, 5, Some("real failure".to_string()), None);
        aggregator.record_outcome("only", TestStatus::Passed, 6, None, None);

        let (summary, _) = aggregator.summarize();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.outcomes[0].status, TestStatus::Failed);
        assert_eq!(summary.outcomes[0].category, DEFAULT_CATEGORY);
    }

    #[test]
    fn test_outcome_without_start_is_uncategorized() {
        let aggregator = ResultAggregator::new();
        aggregator.record_outcome("setup-crash", TestStatus::Failed, 0, Some("no browser".to_string()), None);
        let (summary, _) = aggregator.summarize();
        assert_eq!(summary.outcomes[0].category, DEFAULT_CATEGORY);
        assert_eq!(summary.failed, 1);
    }

    struct BrokenSink;

    impl ReportSink for BrokenSink {
        fn start_test(&mut self, _: &str, _: &str) -> HarnessResult<()> {
            Err(std::io::Error::other("disk full").into())
        }
        fn entry(&mut self, _: &str, _: LogLevel, _: &str) -> HarnessResult<()> {
            Err(std::io::Error::other("disk full").into())
        }
        fn end_test(&mut self, _: &TestOutcome) -> HarnessResult<()> {
            Err(std::io::Error::other("disk full").into())
        }
        fn flush(&mut self, _: &RunSummary) -> HarnessResult<PathBuf> {
            Err(std::io::Error::other("disk full").into())
        }
    }

    #[test]
    fn test_sink_failures_do_not_affect_outcomes() {
        let aggregator = ResultAggregator::with_sink(Box::new(BrokenSink));
        aggregator.record_start("a", "Search");
        aggregator.log("a", LogLevel::Info, "searching");
        aggregator.record_outcome("a", TestStatus::Failed, 3, Some("no results".to_string()), None);

        let (summary, artifact) = aggregator.summarize();
        assert_eq!(summary.failed, 1);
        assert!(!summary.success());
        assert!(artifact.is_none());
    }

    #[test]
    fn test_html_report_written() {
        let dir = tempfile::tempdir().unwrap();
        let sink = HtmlReportSink::new(dir.path(), "EHU <Report>").with_system_info("Browser", "Chromium");
        let aggregator = ResultAggregator::with_sink(Box::new(sink));

        aggregator.record_start("About page", "Navigation");
        aggregator.log("About page", LogLevel::Pass, "Clicked About link");
        aggregator.record_outcome("About page", TestStatus::Passed, 12, None, None);

        let (_, artifact) = aggregator.summarize();
        let path = artifact.expect("report path");
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("TestReport_"));

        let html = std::fs::read_to_string(path).unwrap();
        assert!(html.contains("EHU &lt;Report&gt;"));
        assert!(html.contains("Clicked About link"));
        assert!(html.contains("Test PASSED in 12ms"));
        assert!(html.contains("Chromium"));
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let summary = aggregate(&[TestStatus::Passed, TestStatus::Skipped]);
        let path = summary.write_json(dir.path()).unwrap();

        let parsed: RunSummary = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed.total, 2);
        assert_eq!(parsed.skipped, 1);
    }
}
