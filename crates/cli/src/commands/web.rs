//! Website scenarios against a Playwright-driven browser

use anyhow::Context;
use clap::Args;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

use webtests_e2e::browser::BrowserEngine;
use webtests_e2e::config::BrowserKind;
use webtests_e2e::playwright::PlaywrightEngine;
use webtests_e2e::scenario::Scenario;
use webtests_e2e::{BrowserSession, BrowserSessionManager, HarnessConfig, TestCase, TestRunner};

use super::RunArgs;
use crate::output::OutputFormat;

#[derive(Args, Debug)]
pub struct WebArgs {
    /// Directory of scenario YAML files
    #[arg(long, default_value = "scenarios")]
    pub scenarios: PathBuf,

    /// Only run scenarios carrying this tag
    #[arg(long)]
    pub tag: Option<String>,

    /// Browser to launch
    #[arg(long)]
    pub browser: Option<BrowserKind>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Override the page every session starts on
    #[arg(long)]
    pub base_url: Option<String>,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Load, filter and expand scenarios into test cases
pub fn load_cases(
    dir: &std::path::Path,
    tag: Option<&str>,
    config: &HarnessConfig,
) -> anyhow::Result<Vec<TestCase<BrowserSession>>> {
    let scenarios = Scenario::load_all(dir)
        .with_context(|| format!("loading scenarios from {}", dir.display()))?;

    let mut cases = Vec::new();
    for scenario in scenarios {
        if let Some(tag) = tag {
            if !scenario.has_tag(tag) {
                continue;
            }
        }
        cases.extend(scenario.into_cases(&config.browser)?);
    }
    Ok(cases)
}

pub async fn execute(args: WebArgs, mut config: HarnessConfig, format: OutputFormat) -> anyhow::Result<ExitCode> {
    args.run.apply(&mut config);
    if let Some(browser) = args.browser {
        config.browser.browser = browser;
    }
    if args.headed {
        config.browser.headless = false;
    }
    if let Some(base_url) = args.base_url {
        config.browser.entry_url = Some(base_url);
    }

    let cases = load_cases(&args.scenarios, args.tag.as_deref(), &config)?;
    if cases.is_empty() {
        anyhow::bail!("no scenarios matched in {}", args.scenarios.display());
    }
    info!("Loaded {} test case(s)", cases.len());

    let engine: Arc<dyn BrowserEngine> = Arc::new(
        PlaywrightEngine::launch(&config.browser)
            .await
            .context("launching the browser")?,
    );

    let extra = [
        ("Browser", config.browser.browser.as_str().to_string()),
        ("Headless", config.browser.headless.to_string()),
        (
            "Base URL",
            config.browser.entry_url.clone().unwrap_or_default(),
        ),
    ];
    let aggregator = super::aggregator(&config, "Website", &extra);
    let manager = BrowserSessionManager::new(engine.clone(), config.browser.clone());
    let runner = TestRunner::new(manager, config.run.clone()).with_aggregator(aggregator);

    runner.run(cases).await;
    let report = runner.finish().await;

    if let Err(e) = engine.close().await {
        warn!("Closing the browser failed: {}", e);
    }

    super::conclude(&report, &config, format)
}
