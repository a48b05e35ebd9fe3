use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use event_aggregator::{overrides, AggregatorConfig, Pipeline};
use tracing::info;

/// Fetch today's and tomorrow's events from every configured source
#[derive(Parser, Debug)]
#[command(name = "event-aggregator", version, about)]
struct Cli {
    /// Reference date (YYYY-MM-DD) to use as "today" instead of the current date
    #[arg(long, env = "EVENTS_DATE")]
    date: Option<String>,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the JSON output path
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Apply the special-events schema before running
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    info!("Starting event aggregator");

    let mut config = match cli.config.as_deref() {
        Some(path) => {
            dotenv::dotenv().ok();
            AggregatorConfig::load(Some(path))
        }
        None => AggregatorConfig::from_env(),
    }
    .context("failed to load configuration")?;

    if let Some(output) = cli.output {
        config.output_path = output;
    }

    if cli.migrate && !overrides::migrate(&config.overrides).await.context("failed to apply migrations")? {
        info!("No override database configured; skipping migrations");
    }

    let result = Pipeline::from_config(config)
        .run(cli.date.as_deref())
        .await
        .context("event aggregation failed")?;

    info!(
        today = %result.window.today(),
        today_events = result.today_events.len(),
        tomorrow_events = result.tomorrow_events.len(),
        failed_sources = result.failed_sources.len(),
        "Run complete"
    );
    Ok(())
}
