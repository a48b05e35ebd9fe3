//! Error types for the event aggregation pipeline

use chrono::NaiveDate;
use thiserror::Error;

use crate::models::SourceId;

/// Errors raised while resolving the fetch window
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("invalid date format: {input:?} (expected YYYY-MM-DD)")]
    InvalidDateFormat { input: String },

    #[error("date {date} has no following calendar day")]
    OutOfRange { date: NaiveDate },
}

/// Hard failure of a single source: no usable data was produced
#[derive(Error, Debug)]
pub enum SourceError {
    /// Network/transport level failure (connect, timeout, TLS, ...)
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success HTTP status that survived the retry budget
    #[error("upstream returned status {status}")]
    Status { status: u16 },

    #[error("authentication rejected with status {status}")]
    Auth { status: u16 },

    /// Response body did not match the expected top-level schema
    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("override store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("pagination error: {0}")]
    Pagination(String),

    #[error("deadline exceeded before source completed")]
    DeadlineExceeded,

    #[error("source task aborted: {0}")]
    TaskAborted(String),

    /// Every request issued by a multi-request source failed
    #[error("all {attempted} requests failed, last error: {last}")]
    AllRequestsFailed { attempted: usize, last: Box<SourceError> },
}

impl SourceError {
    /// Whether a single retry is worth attempting (timeouts, connect errors, 5xx)
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Transport(e) => e.is_timeout() || e.is_connect(),
            SourceError::Status { status } => *status >= 500,
            _ => false,
        }
    }
}

/// A hard failure tagged with the source that produced it
#[derive(Error, Debug)]
#[error("{source_id}: {error}")]
pub struct SourceFailure {
    pub source_id: SourceId,
    pub error: SourceError,
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("secret not found in environment variable {var}")]
    MissingSecret { var: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("invalid database url: {0}")]
    Database(#[from] sqlx::Error),
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Errors returned by the aggregator and the pipeline runner
#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error(transparent)]
    Window(#[from] WindowError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no sources configured")]
    NoSources,

    /// Every configured source failed; nothing can be published
    #[error("all {} sources failed: {}", .failures.len(), summarize(.failures))]
    TotalFailure { failures: Vec<SourceFailure> },

    #[error("failed to publish aggregate result: {0}")]
    Publish(#[from] PublishError),
}

/// Errors from handing results to the downstream sink
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn summarize(failures: &[SourceFailure]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transience() {
        assert!(SourceError::Status { status: 503 }.is_transient());
        assert!(SourceError::Status { status: 500 }.is_transient());
        assert!(!SourceError::Status { status: 404 }.is_transient());
        assert!(!SourceError::Auth { status: 401 }.is_transient());
        assert!(!SourceError::Parse("bad".into()).is_transient());
        assert!(!SourceError::DeadlineExceeded.is_transient());
    }

    #[test]
    fn test_total_failure_message_names_sources() {
        let err = AggregatorError::TotalFailure {
            failures: vec![
                SourceFailure {
                    source_id: SourceId::new("venue-tickets"),
                    error: SourceError::Status { status: 502 },
                },
                SourceFailure {
                    source_id: SourceId::new("league-teams"),
                    error: SourceError::DeadlineExceeded,
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("all 2 sources failed"));
        assert!(msg.contains("venue-tickets: upstream returned status 502"));
        assert!(msg.contains("league-teams: deadline exceeded"));
    }
}
