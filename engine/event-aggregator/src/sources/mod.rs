//! Upstream event sources
//!
//! Every provider implements [`EventSource`]. Sources absorb malformed
//! individual records as [`SkippedItem`] diagnostics and only return a hard
//! failure when no usable data could be produced at all.

pub mod league;
pub mod venue;

use async_trait::async_trait;
use tracing::warn;

use crate::error::SourceError;
use crate::models::{FetchOutcome, SkipReason, SkippedItem, SourceBatch, SourceId};
use crate::window::FetchWindow;

pub use league::LeagueTeamSource;
pub use venue::VenueTicketSource;

/// Capability shared by all upstream providers
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Stable identifier used in diagnostics and `failed_sources`
    fn id(&self) -> SourceId;

    /// Fetch the events of `window`.
    ///
    /// Cancellation is by drop: the aggregator stops polling this future when
    /// its deadline expires.
    async fn fetch_events(&self, window: &FetchWindow) -> FetchOutcome;
}

/// Combine the results of the individual requests of one source.
///
/// A failed request becomes a `RequestFailed` diagnostic; the source only
/// hard-fails when every request failed.
pub(crate) fn combine_requests(
    source: &SourceId,
    results: Vec<(String, Result<SourceBatch, SourceError>)>,
) -> FetchOutcome {
    let attempted = results.len();
    let mut batch = SourceBatch::default();
    let mut failures = Vec::new();

    for (label, result) in results {
        match result {
            Ok(part) => batch.extend(part),
            Err(e) => {
                warn!(source = %source, request = %label, error = %e, "Upstream request failed");
                failures.push((label, e));
            }
        }
    }

    if attempted > 0 && failures.len() == attempted {
        let last = failures.pop().map(|(_, e)| e).unwrap_or(SourceError::DeadlineExceeded);
        return Err(SourceError::AllRequestsFailed { attempted, last: Box::new(last) });
    }

    for (label, e) in failures {
        batch.skipped.push(SkippedItem::new(
            source.clone(),
            label,
            SkipReason::RequestFailed { detail: e.to_string() },
        ));
    }
    Ok(batch)
}

/// Record a skipped upstream record and log it
pub(crate) fn skip(batch: &mut SourceBatch, source: &SourceId, record: &str, reason: SkipReason) {
    warn!(source = %source, record, reason = %reason, "Skipping upstream record");
    batch.skipped.push(SkippedItem::new(source.clone(), record, reason));
}

/// Trimmed value, or `None` when absent or blank
pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
