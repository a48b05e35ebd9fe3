//! Concurrent fan-out over all sources and deterministic merge of their results
//!
//! Each source (and the override store) runs in its own tokio task against
//! the same window and deadline. Failures are isolated: a source that errors,
//! panics or misses the deadline is recorded in `failed_sources` while its
//! siblings keep running. Only when every counted source fails does
//! aggregation return an error.
//!
//! Outcomes are merged in configuration order after all tasks have joined, so
//! completion order never leaks into the result.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{AggregatorError, SourceError, SourceFailure};
use crate::models::{AggregateResult, Event, SkipReason, SkippedItem, SourceBatch, SourceId};
use crate::overrides::{OverrideStore, Overrides};
use crate::sources::EventSource;
use crate::window::{Bucket, FetchWindow};

/// Runs every configured source and merges their events into today/tomorrow buckets
pub struct Aggregator {
    sources: Vec<Arc<dyn EventSource>>,
    overrides: Option<Arc<OverrideStore>>,
    overrides_required: bool,
}

impl Aggregator {
    pub fn new(sources: Vec<Arc<dyn EventSource>>) -> Result<Self, AggregatorError> {
        if sources.is_empty() {
            return Err(AggregatorError::NoSources);
        }
        Ok(Self { sources, overrides: None, overrides_required: false })
    }

    /// Attach the override store. When `required`, its failure counts towards total failure.
    pub fn with_overrides(mut self, store: OverrideStore, required: bool) -> Self {
        self.overrides = Some(Arc::new(store));
        self.overrides_required = required;
        self
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Fetch from every source concurrently and merge the results.
    ///
    /// Work still in flight at `deadline` is dropped and its source reported as failed.
    #[instrument(skip(self, window), fields(today = %window.today(), tomorrow = %window.tomorrow()))]
    pub async fn aggregate(
        &self,
        window: &FetchWindow,
        deadline: Instant,
    ) -> Result<AggregateResult, AggregatorError> {
        let window = *window;
        info!(sources = self.sources.len(), overrides = self.overrides.is_some(), "Starting aggregation");

        let source_tasks: Vec<JoinHandle<Result<SourceBatch, SourceError>>> = self
            .sources
            .iter()
            .map(|source| {
                let source = Arc::clone(source);
                tokio::spawn(async move {
                    timeout_at(deadline, source.fetch_events(&window))
                        .await
                        .unwrap_or(Err(SourceError::DeadlineExceeded))
                })
            })
            .collect();

        let override_task: Option<JoinHandle<Result<Overrides, SourceError>>> =
            self.overrides.as_ref().map(|store| {
                let store = Arc::clone(store);
                tokio::spawn(async move {
                    timeout_at(deadline, store.load_overrides(&window))
                        .await
                        .unwrap_or(Err(SourceError::DeadlineExceeded))
                })
            });

        // Dropping `aggregate` before the join must cancel every in-flight fetch
        let _abort_guard = AbortOnDrop(
            source_tasks
                .iter()
                .map(JoinHandle::abort_handle)
                .chain(override_task.as_ref().map(JoinHandle::abort_handle))
                .collect(),
        );

        let outcomes = join_all(source_tasks).await;
        let override_outcome = match override_task {
            Some(task) => Some(task.await.unwrap_or_else(|e| Err(SourceError::TaskAborted(e.to_string())))),
            None => None,
        };

        let mut merge = Merge::new(window);
        let mut failures = Vec::new();

        for (source, joined) in self.sources.iter().zip(outcomes) {
            let source_id = source.id();
            match joined.unwrap_or_else(|e| Err(SourceError::TaskAborted(e.to_string()))) {
                Ok(batch) => {
                    info!(
                        source = %source_id,
                        events = batch.events.len(),
                        skipped = batch.skipped.len(),
                        "Source completed"
                    );
                    merge.add_batch(batch);
                }
                Err(error) => {
                    error!(source = %source_id, error = %error, "Source failed");
                    failures.push(SourceFailure { source_id, error });
                }
            }
        }
        let mut counted_failures = failures.len();
        let mut counted_sources = self.sources.len();

        if let (Some(store), Some(outcome)) = (self.overrides.as_ref(), override_outcome) {
            if self.overrides_required {
                counted_sources += 1;
            }
            match outcome {
                Ok(overrides) => merge.apply_overrides(overrides),
                Err(error) => {
                    error!(source = %store.id(), error = %error, "Override store failed");
                    if self.overrides_required {
                        counted_failures += 1;
                    }
                    failures.push(SourceFailure { source_id: store.id(), error });
                }
            }
        }

        if counted_failures == counted_sources {
            error!(failed = counted_failures, "Every source failed");
            return Err(AggregatorError::TotalFailure { failures });
        }

        let failed_sources: BTreeSet<_> = failures.into_iter().map(|f| f.source_id).collect();
        let result = merge.finish(failed_sources);

        if result.is_partial() {
            warn!(failed = ?result.failed_sources, "Aggregation completed with failed sources");
        }
        info!(
            today = result.today_events.len(),
            tomorrow = result.tomorrow_events.len(),
            skipped = result.skipped.len(),
            "Aggregation complete"
        );
        Ok(result)
    }
}

/// Aborts the spawned fetch tasks when dropped; a no-op for tasks that already finished
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Single-owner accumulator for the two buckets
struct Merge {
    window: FetchWindow,
    today: Vec<Event>,
    tomorrow: Vec<Event>,
    skipped: Vec<SkippedItem>,
}

impl Merge {
    fn new(window: FetchWindow) -> Self {
        Self { window, today: Vec::new(), tomorrow: Vec::new(), skipped: Vec::new() }
    }

    fn add_batch(&mut self, batch: SourceBatch) {
        self.skipped.extend(batch.skipped);
        for event in batch.events {
            self.place(event);
        }
    }

    /// Put an event in its bucket, dropping anything that must not be published
    fn place(&mut self, mut event: Event) {
        if event.time_unconfirmed {
            self.drop_event(&event, SkipReason::UnconfirmedTime);
            return;
        }
        if event.name.trim().is_empty() || event.venue.trim().is_empty() {
            let field = if event.name.trim().is_empty() { "name" } else { "venue" };
            self.drop_event(&event, SkipReason::MissingField { field });
            return;
        }

        event.start_time = event.start_time.with_timezone(&self.window.timezone());
        match self.window.classify(&event.start_time) {
            Some(Bucket::Today) => self.today.push(event),
            Some(Bucket::Tomorrow) => self.tomorrow.push(event),
            None => {
                debug!(event = %event.name, start = %event.start_time, "Event outside window");
                self.drop_event(&event, SkipReason::OutsideWindow);
            }
        }
    }

    fn drop_event(&mut self, event: &Event, reason: SkipReason) {
        self.skipped.push(SkippedItem::new(event.source.clone(), event.name.clone(), reason));
    }

    /// Suppressions apply to fetched events only; additions are placed afterwards
    fn apply_overrides(&mut self, overrides: Overrides) {
        self.skipped.extend(overrides.skipped);

        if !overrides.suppressions.is_empty() {
            let before = self.today.len() + self.tomorrow.len();
            self.today.retain(|e| !overrides.suppressions.contains(&e.key()));
            self.tomorrow.retain(|e| !overrides.suppressions.contains(&e.key()));
            let removed = before - (self.today.len() + self.tomorrow.len());
            info!(removed, "Applied override suppressions");
        }

        for event in overrides.additions {
            self.place(event);
        }
    }

    fn finish(self, failed_sources: BTreeSet<SourceId>) -> AggregateResult {
        AggregateResult {
            window: self.window,
            today_events: dedupe_and_sort(self.today),
            tomorrow_events: dedupe_and_sort(self.tomorrow),
            failed_sources,
            all_failed: false,
            skipped: self.skipped,
        }
    }
}

/// Keep the first event per key, then order by start time and name
pub fn dedupe_and_sort(events: Vec<Event>) -> Vec<Event> {
    let mut seen = HashSet::new();
    let mut events: Vec<Event> = events.into_iter().filter(|e| seen.insert(e.key())).collect();
    events.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.name.cmp(&b.name)));
    events
}
