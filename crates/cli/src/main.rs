//! WebTests CLI - Main Entry Point
//!
//! Exit status: 0 when nothing failed, 1 when a test failed, 2 when the
//! harness itself could not run.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use webtests_cli::commands::{api, web};
use webtests_cli::output::{self, OutputFormat};
use webtests_e2e::HarnessConfig;

/// WebTests - browser and API test runner
#[derive(Parser)]
#[command(name = "webtests")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "webtests.toml", global = true, env = "WEBTESTS_CONFIG")]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run website scenarios in a browser
    Web(web::WebArgs),

    /// Run the Books API suite
    Api(api::ApiArgs),

    /// Print the effective configuration
    Config,
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = HarnessConfig::load(&cli.config)?;

    match cli.command {
        Commands::Web(args) => web::execute(args, config, cli.format).await,
        Commands::Api(args) => api::execute(args, config, cli.format).await,
        Commands::Config => {
            let mut shown = config;
            if !shown.api.client_secret.is_empty() {
                shown.api.client_secret = "********".to_string();
            }
            println!("{}", toml::to_string_pretty(&shown)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::from(2)
        }
    }
}
