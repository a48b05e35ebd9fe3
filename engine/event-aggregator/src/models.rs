use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::window::FetchWindow;

/// Identifier of the provider that produced an event
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One occurrence of a sporting/entertainment event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub name: String,
    pub venue: String,
    /// Start instant, expressed in the fixed civil timezone
    pub start_time: DateTime<Tz>,
    pub source: SourceId,
    /// Set when the upstream could not confirm a start time; such events are never published
    pub time_unconfirmed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opponent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl Event {
    /// Create a confirmed-time event, converting the start instant into `tz`
    pub fn new<Z: TimeZone>(
        name: impl Into<String>,
        venue: impl Into<String>,
        start_time: DateTime<Z>,
        tz: Tz,
        source: SourceId,
    ) -> Self {
        Self {
            name: name.into(),
            venue: venue.into(),
            start_time: start_time.with_timezone(&tz),
            source,
            time_unconfirmed: false,
            opponent: None,
            category: None,
        }
    }

    pub fn with_opponent(mut self, opponent: Option<String>) -> Self {
        self.opponent = opponent;
        self
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }

    /// Dedupe/suppression key: name, venue and start time truncated to the minute
    pub fn key(&self) -> EventKey {
        EventKey::new(&self.name, &self.venue, &self.start_time)
    }
}

/// Identity of an event for deduplication and override suppression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub name: String,
    pub venue: String,
    /// Minutes since the Unix epoch
    pub start_minute: i64,
}

impl EventKey {
    pub fn new<Z: TimeZone>(name: &str, venue: &str, start_time: &DateTime<Z>) -> Self {
        Self {
            name: name.to_string(),
            venue: venue.to_string(),
            start_minute: start_time.timestamp().div_euclid(60),
        }
    }
}

/// Why an individual upstream record was dropped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Start time flagged TBD/TBA by the upstream
    UnconfirmedTime,
    /// Event has no associated ticketed session
    NoSessions,
    NoCompetitions,
    TooFewCompetitors { found: usize },
    MissingField { field: &'static str },
    MalformedTime { value: String },
    MalformedRecord { detail: String },
    Cancelled,
    AwayGame,
    /// Upstream returned an empty "next events" collection
    EmptyFeed,
    /// One request of a multi-request source failed after retries
    RequestFailed { detail: String },
    OutsideWindow,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnconfirmedTime => write!(f, "start time not confirmed"),
            SkipReason::NoSessions => write!(f, "no ticketed sessions"),
            SkipReason::NoCompetitions => write!(f, "no linked competitions"),
            SkipReason::TooFewCompetitors { found } => {
                write!(f, "expected two competitors, found {found}")
            }
            SkipReason::MissingField { field } => write!(f, "missing field `{field}`"),
            SkipReason::MalformedTime { value } => write!(f, "unparseable start time {value:?}"),
            SkipReason::MalformedRecord { detail } => write!(f, "malformed record: {detail}"),
            SkipReason::Cancelled => write!(f, "event cancelled upstream"),
            SkipReason::AwayGame => write!(f, "away game"),
            SkipReason::EmptyFeed => write!(f, "no upcoming events"),
            SkipReason::RequestFailed { detail } => write!(f, "request failed: {detail}"),
            SkipReason::OutsideWindow => write!(f, "outside today/tomorrow window"),
        }
    }
}

/// Diagnostic for a dropped upstream record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedItem {
    pub source: SourceId,
    /// Upstream record id or a label such as the venue/feed id
    pub record: String,
    pub reason: SkipReason,
}

impl SkippedItem {
    pub fn new(source: SourceId, record: impl Into<String>, reason: SkipReason) -> Self {
        Self { source, record: record.into(), reason }
    }
}

/// Successful result of one source fetch
#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    pub events: Vec<Event>,
    pub skipped: Vec<SkippedItem>,
}

impl SourceBatch {
    pub fn extend(&mut self, other: SourceBatch) {
        self.events.extend(other.events);
        self.skipped.extend(other.skipped);
    }
}

/// Per-source result: events plus diagnostics, or a hard failure
pub type FetchOutcome = Result<SourceBatch, SourceError>;

/// Merged, date-partitioned output of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct AggregateResult {
    pub window: FetchWindow,
    pub today_events: Vec<Event>,
    pub tomorrow_events: Vec<Event>,
    pub failed_sources: BTreeSet<SourceId>,
    pub all_failed: bool,
    pub skipped: Vec<SkippedItem>,
}

impl AggregateResult {
    pub fn is_partial(&self) -> bool {
        !self.failed_sources.is_empty()
    }

    pub fn event_count(&self) -> usize {
        self.today_events.len() + self.tomorrow_events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use chrono_tz::America::Los_Angeles;

    #[test]
    fn test_event_normalized_to_civil_zone() {
        let start = Utc.with_ymd_and_hms(2026, 3, 15, 2, 0, 0).unwrap();
        let event = Event::new("Kraken vs Oilers", "Climate Pledge Arena", start, Los_Angeles, SourceId::new("a"));

        assert_eq!(event.start_time.timezone(), Los_Angeles);
        assert_eq!(event.start_time.date_naive().to_string(), "2026-03-14");
        assert!(!event.time_unconfirmed);
    }

    #[test]
    fn test_key_truncates_to_minute() {
        let a = Los_Angeles.with_ymd_and_hms(2026, 3, 14, 19, 0, 5).unwrap();
        let b = Los_Angeles.with_ymd_and_hms(2026, 3, 14, 19, 0, 59).unwrap();
        let c = Los_Angeles.with_ymd_and_hms(2026, 3, 14, 19, 1, 0).unwrap();

        let ka = EventKey::new("Game", "Arena", &a);
        assert_eq!(ka, EventKey::new("Game", "Arena", &b));
        assert_ne!(ka, EventKey::new("Game", "Arena", &c));
    }

    #[test]
    fn test_key_is_zone_independent() {
        let local = Los_Angeles.with_ymd_and_hms(2026, 3, 14, 19, 0, 0).unwrap();
        let utc = local.with_timezone(&Utc);
        assert_eq!(EventKey::new("Game", "Arena", &local), EventKey::new("Game", "Arena", &utc));
    }

    #[test]
    fn test_skip_reason_display() {
        assert_eq!(
            SkipReason::TooFewCompetitors { found: 1 }.to_string(),
            "expected two competitors, found 1"
        );
        assert_eq!(SkipReason::MissingField { field: "name" }.to_string(), "missing field `name`");
    }
}
