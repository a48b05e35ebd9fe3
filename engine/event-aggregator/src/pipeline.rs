//! One end-to-end run: resolve the window, aggregate, publish, notify

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::aggregator::Aggregator;
use crate::config::AggregatorConfig;
use crate::error::{AggregatorError, PublishError};
use crate::http::RetryPolicy;
use crate::models::AggregateResult;
use crate::overrides::OverrideStore;
use crate::sources::{EventSource, LeagueTeamSource, VenueTicketSource};
use crate::window::FetchWindow;

/// Downstream consumer of a successful aggregation (renderer, uploader, ...)
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, result: &AggregateResult) -> Result<(), PublishError>;
}

/// Operator notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Called when some, but not all, sources failed
    async fn partial_failure(&self, result: &AggregateResult);

    /// Called when nothing could be published
    async fn total_failure(&self, error: &AggregatorError);
}

/// Writes the aggregate result as pretty-printed JSON
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl EventSink for JsonFileSink {
    async fn publish(&self, result: &AggregateResult) -> Result<(), PublishError> {
        let body = serde_json::to_vec_pretty(result)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, body).await?;
        info!(path = %self.path.display(), events = result.event_count(), "Wrote aggregate result");
        Ok(())
    }
}

/// Reports failures through `tracing`
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn partial_failure(&self, result: &AggregateResult) {
        let failed: Vec<&str> = result.failed_sources.iter().map(|s| s.as_str()).collect();
        warn!(failed = ?failed, published = result.event_count(), "Published partial results");
    }

    async fn total_failure(&self, error: &AggregatorError) {
        error!(error = %error, "Aggregation produced nothing to publish");
    }
}

/// Build the aggregator with every source enabled by `config`
pub fn build_aggregator(config: &AggregatorConfig) -> Result<Aggregator, AggregatorError> {
    let retry = RetryPolicy::from(&config.retry);
    let sources: Vec<Arc<dyn EventSource>> = vec![
        Arc::new(VenueTicketSource::from_config(&config.venue_source, retry.clone())?),
        Arc::new(LeagueTeamSource::from_config(&config.league_source, retry)?),
    ];

    let aggregator = Aggregator::new(sources)?;
    Ok(match OverrideStore::from_config(&config.overrides)? {
        Some(store) => aggregator.with_overrides(store, config.overrides.required),
        None => {
            info!("No override database configured; special events disabled");
            aggregator
        }
    })
}

pub struct Pipeline {
    config: AggregatorConfig,
    sink: Box<dyn EventSink>,
    notifier: Box<dyn Notifier>,
}

impl Pipeline {
    pub fn new(config: AggregatorConfig, sink: Box<dyn EventSink>, notifier: Box<dyn Notifier>) -> Self {
        Self { config, sink, notifier }
    }

    /// Pipeline writing JSON to the configured output path and logging failures
    pub fn from_config(config: AggregatorConfig) -> Self {
        let sink = JsonFileSink::new(config.output_path.clone());
        Self::new(config, Box::new(sink), Box::new(LogNotifier))
    }

    /// Run against the sources described by the configuration
    pub async fn run(&self, reference_date: Option<&str>) -> Result<AggregateResult, AggregatorError> {
        let window = FetchWindow::resolve(reference_date, self.config.tz()?)?;
        let aggregator = build_aggregator(&self.config)?;
        self.run_window(&aggregator, &window).await
    }

    /// Aggregate `window` with `aggregator`, then publish and notify
    pub async fn run_window(
        &self,
        aggregator: &Aggregator,
        window: &FetchWindow,
    ) -> Result<AggregateResult, AggregatorError> {
        info!(today = %window.today(), tomorrow = %window.tomorrow(), "Starting pipeline run");
        let deadline = Instant::now() + self.config.deadline();

        let result = match aggregator.aggregate(window, deadline).await {
            Ok(result) => result,
            Err(e) => {
                self.notifier.total_failure(&e).await;
                return Err(e);
            }
        };

        self.sink.publish(&result).await?;
        if result.is_partial() {
            self.notifier.partial_failure(&result).await;
        }
        Ok(result)
    }
}

/// Resolve, aggregate, publish to the configured JSON file and log failures
pub async fn run(
    config: AggregatorConfig,
    reference_date: Option<&str>,
) -> Result<AggregateResult, AggregatorError> {
    Pipeline::from_config(config).run(reference_date).await
}
