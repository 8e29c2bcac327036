//! Books API suite against a live endpoint

use anyhow::{bail, Context};
use clap::Args;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

use webtests_e2e::cleanup::ApiResourceDeleter;
use webtests_e2e::{ApiSessionManager, CredentialCache, HarnessConfig, RunReport, TestRunner};

use super::RunArgs;
use crate::books;
use crate::output::OutputFormat;

#[derive(Args, Debug)]
pub struct ApiArgs {
    /// Books API base URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// OAuth token endpoint
    #[arg(long)]
    pub token_url: Option<String>,

    /// Only run cases whose name contains this text
    #[arg(long)]
    pub filter: Option<String>,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Run the Books suite with a shared credential cache and deleter
pub async fn run_suite(config: &HarnessConfig, filter: Option<&str>) -> anyhow::Result<RunReport> {
    let settings = config.api.clone();
    let credentials = Arc::new(CredentialCache::new(settings.clone()).context("building the token client")?);
    let deleter = Arc::new(ApiResourceDeleter::new(credentials.clone(), settings.clone()));

    let extra = [
        ("Base URL", settings.base_url.clone()),
        ("Token URL", settings.token_url.clone()),
    ];
    let aggregator = super::aggregator(config, "Books API", &extra);
    let manager = ApiSessionManager::new(credentials, settings);
    let runner = TestRunner::new(manager, config.run.clone())
        .with_deleter(deleter)
        .with_aggregator(aggregator);

    let mut cases = books::suite();
    if let Some(filter) = filter {
        cases.retain(|c| c.name.contains(filter));
    }
    info!("Running {} Books API case(s) against {}", cases.len(), config.api.base_url);

    runner.run(cases).await;
    Ok(runner.finish().await)
}

pub async fn execute(args: ApiArgs, mut config: HarnessConfig, format: OutputFormat) -> anyhow::Result<ExitCode> {
    args.run.apply(&mut config);
    if let Some(base_url) = args.base_url {
        config.api.base_url = base_url;
    }
    if let Some(token_url) = args.token_url {
        config.api.token_url = token_url;
    }
    if config.api.client_id.is_empty() || config.api.client_secret.is_empty() {
        bail!("client credentials missing: set [api] client_id/client_secret or WEBTESTS_CLIENT_ID/WEBTESTS_CLIENT_SECRET");
    }

    let report = run_suite(&config, args.filter.as_deref()).await?;
    super::conclude(&report, &config, format)
}
