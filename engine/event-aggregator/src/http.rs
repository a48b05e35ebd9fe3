//! JSON GET with a bounded retry on transient failures

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::SourceError;

/// Retry policy applied to every upstream request
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub max_retries: u32,
    /// Fixed delay between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 1, backoff: Duration::from_millis(500) }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self { max_retries: config.max_retries, backoff: Duration::from_millis(config.backoff_ms) }
    }
}

/// Build the per-source HTTP client with a bounded per-call timeout
pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("event-aggregator/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// GET `url` and decode the body as `T`, retrying transient failures per `policy`.
///
/// `query` is sent as URL parameters and never logged, so it may carry API keys.
pub async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    query: &[(&str, String)],
    policy: &RetryPolicy,
) -> Result<T, SourceError> {
    let mut attempt = 0;
    loop {
        match get_once(client, url, query).await {
            Ok(body) => return Ok(body),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                warn!(url, attempt, error = %e, "Transient upstream failure, retrying in {:?}", policy.backoff);
                sleep(policy.backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn get_once<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    query: &[(&str, String)],
) -> Result<T, SourceError> {
    debug!(url, "Sending upstream request");

    let response = client.get(url).query(query).send().await?;
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(SourceError::Auth { status: status.as_u16() });
    }
    if !status.is_success() {
        return Err(SourceError::Status { status: status.as_u16() });
    }

    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| SourceError::Parse(e.to_string()))
}
