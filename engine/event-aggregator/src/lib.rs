//! Event Aggregator
//!
//! Collects upcoming sporting and entertainment events for "today" and
//! "tomorrow" from several independent upstream providers, merges them with
//! manually curated special events and hands a deduplicated, time-ordered
//! result to a downstream sink. Individual provider failures degrade the
//! result instead of aborting the run.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod http;
pub mod models;
pub mod overrides;
pub mod pipeline;
pub mod rate_limit;
pub mod sources;
pub mod window;

pub use aggregator::Aggregator;
pub use config::AggregatorConfig;
pub use error::{AggregatorError, ConfigError, SourceError, WindowError};
pub use models::*;
pub use pipeline::{EventSink, JsonFileSink, LogNotifier, Notifier, Pipeline};
pub use sources::EventSource;
pub use window::{Bucket, FetchWindow};
