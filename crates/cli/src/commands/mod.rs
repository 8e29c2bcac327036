//! CLI Commands

pub mod api;
pub mod web;

use anyhow::Context;
use std::process::ExitCode;
use tracing::{info, warn};

use webtests_e2e::report::HtmlReportSink;
use webtests_e2e::{HarnessConfig, ResultAggregator, RunReport};

use crate::output::{self, OutputFormat};

/// Flags shared by every suite
#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Number of test cases run concurrently
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Directory for the HTML report, JSON summary and screenshots
    #[arg(short, long)]
    pub output: Option<std::path::PathBuf>,

    /// Skip the HTML report
    #[arg(long)]
    pub no_html: bool,
}

impl RunArgs {
    /// Fold the flags into the loaded configuration
    pub fn apply(&self, config: &mut HarnessConfig) {
        if let Some(workers) = self.workers {
            config.run.workers = workers;
        }
        if let Some(output) = &self.output {
            config.browser.screenshot_dir = output.join("screenshots");
            config.report.output_dir = output.clone();
        }
        if self.no_html {
            config.report.html = false;
        }
    }
}

/// Aggregator with the HTML sink attached when enabled
pub fn aggregator(config: &HarnessConfig, suite: &str, extra: &[(&str, String)]) -> ResultAggregator {
    if !config.report.html {
        return ResultAggregator::new();
    }

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let mut sink = HtmlReportSink::new(&config.report.output_dir, &config.report.title)
        .with_system_info("Suite", suite)
        .with_system_info("Host", host)
        .with_system_info("OS", std::env::consts::OS)
        .with_system_info("Runner", format!("webtests {}", env!("CARGO_PKG_VERSION")));
    for (key, value) in extra {
        sink = sink.with_system_info(*key, value.clone());
    }
    ResultAggregator::with_sink(Box::new(sink))
}

/// Persist the JSON summary, print the results and pick the exit status
pub fn conclude(report: &RunReport, config: &HarnessConfig, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let json = report
        .summary
        .write_json(&config.report.output_dir)
        .context("writing the run summary")?;
    info!("Summary written to {}", json.display());

    output::print_report(report, format);
    if let Some(path) = &report.report_path {
        output::print_info(&format!("HTML report: {}", path.display()));
    }

    if report.success() {
        output::print_success("All tests passed");
        Ok(ExitCode::SUCCESS)
    } else {
        warn!("{} test(s) failed", report.summary.failed);
        output::print_error(&format!("{} test(s) failed", report.summary.failed));
        Ok(ExitCode::from(1))
    }
}
