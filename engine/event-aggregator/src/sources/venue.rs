//! Ticketed-venue provider, queried once per configured venue

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::{combine_requests, non_empty, skip, EventSource};
use crate::config::{VenueConfig, VenueSourceConfig};
use crate::error::{ConfigError, SourceError};
use crate::http::{build_client, get_json, RetryPolicy};
use crate::models::{Event, FetchOutcome, SkipReason, SourceBatch, SourceId};
use crate::rate_limit::RequestGate;
use crate::window::FetchWindow;

pub const SOURCE_ID: &str = "venue-tickets";

/// Largest page the discovery API serves; two days at one venue never exceed it
const PAGE_SIZE: u32 = 200;

/// Ticketing "discovery" API client, one request per venue
pub struct VenueTicketSource {
    id: SourceId,
    client: Client,
    base_url: String,
    api_key: String,
    venues: Vec<VenueConfig>,
    gate: RequestGate,
    retry: RetryPolicy,
}

impl VenueTicketSource {
    /// Create a source around an injected HTTP client
    pub fn new(
        config: &VenueSourceConfig,
        api_key: impl Into<String>,
        client: Client,
        retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::invalid("venue source API key is empty"));
        }
        if config.venues.is_empty() {
            return Err(ConfigError::invalid("venue source needs at least one venue"));
        }

        Ok(Self {
            id: SourceId::new(SOURCE_ID),
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key,
            venues: config.venues.clone(),
            gate: RequestGate::new(config.max_concurrent, config.min_interval()),
            retry,
        })
    }

    /// Create a source with its own client, reading the API key from the environment
    pub fn from_config(config: &VenueSourceConfig, retry: RetryPolicy) -> Result<Self, ConfigError> {
        let client = build_client(config.timeout())?;
        Self::new(config, config.api_key()?, client, retry)
    }

    async fn fetch_venue(
        &self,
        venue: &VenueConfig,
        window: &FetchWindow,
    ) -> Result<SourceBatch, SourceError> {
        let _permit = self.gate.acquire().await?;

        let (start, end) = window.utc_bounds();
        let query = [
            ("venueId", venue.id.clone()),
            ("startDateTime", start.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("endDateTime", end.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("size", PAGE_SIZE.to_string()),
            ("sort", "date,asc".to_string()),
            ("apikey", self.api_key.clone()),
        ];
        let url = format!("{}/events.json", self.base_url);

        let response: DiscoveryResponse = get_json(&self.client, &url, &query, &self.retry).await?;
        let batch = self.convert(venue, response, window);

        info!(
            source = %self.id,
            venue = %venue.id,
            events = batch.events.len(),
            skipped = batch.skipped.len(),
            "Fetched venue events"
        );
        Ok(batch)
    }

    /// Turn one venue response into events, skipping malformed records individually
    fn convert(
        &self,
        venue: &VenueConfig,
        response: DiscoveryResponse,
        window: &FetchWindow,
    ) -> SourceBatch {
        let mut batch = SourceBatch::default();
        let raw_events = response.embedded.map(|e| e.events).unwrap_or_default();

        for (index, raw) in raw_events.into_iter().enumerate() {
            let fallback_label = format!("{}#{}", venue.id, index);
            let record: DiscoveryEvent = match serde_json::from_value(raw) {
                Ok(record) => record,
                Err(e) => {
                    let reason = SkipReason::MalformedRecord { detail: e.to_string() };
                    skip(&mut batch, &self.id, &fallback_label, reason);
                    continue;
                }
            };

            let label = record.id.clone().unwrap_or(fallback_label);
            match self.build_event(venue, record, window) {
                Ok(event) => batch.events.push(event),
                Err(reason) => skip(&mut batch, &self.id, &label, reason),
            }
        }
        batch
    }

    fn build_event(
        &self,
        venue: &VenueConfig,
        record: DiscoveryEvent,
        window: &FetchWindow,
    ) -> Result<Event, SkipReason> {
        let name = non_empty(record.name.as_deref()).ok_or(SkipReason::MissingField { field: "name" })?;

        let dates = record.dates.ok_or(SkipReason::NoSessions)?;
        let start = dates.start.ok_or(SkipReason::NoSessions)?;

        if dates.status.and_then(|s| s.code).is_some_and(|code| code.eq_ignore_ascii_case("cancelled")) {
            return Err(SkipReason::Cancelled);
        }
        if start.is_unconfirmed() {
            return Err(SkipReason::UnconfirmedTime);
        }

        let raw_time = start.date_time.as_deref().ok_or(SkipReason::UnconfirmedTime)?;
        let start_time = DateTime::parse_from_rfc3339(raw_time)
            .map_err(|_| SkipReason::MalformedTime { value: raw_time.to_string() })?;

        let embedded = record.embedded.unwrap_or_default();
        let venue_name = embedded
            .venues
            .iter()
            .find_map(|v| non_empty(v.name.as_deref()))
            .or_else(|| non_empty(Some(venue.name.as_str())))
            .ok_or(SkipReason::MissingField { field: "venue" })?;

        let competitors: Vec<&str> =
            embedded.attractions.iter().filter_map(|a| non_empty(a.name.as_deref())).collect();
        let opponent = resolve_opponent(&competitors, venue.home_team.as_deref());

        let category = record
            .classifications
            .iter()
            .find_map(|c| c.genre.as_ref().and_then(|g| non_empty(g.name.as_deref())))
            .map(str::to_string);

        Ok(Event::new(name, venue_name, start_time, window.timezone(), self.id.clone())
            .with_opponent(opponent)
            .with_category(category))
    }
}

#[async_trait]
impl EventSource for VenueTicketSource {
    fn id(&self) -> SourceId {
        self.id.clone()
    }

    async fn fetch_events(&self, window: &FetchWindow) -> FetchOutcome {
        let requests = self.venues.iter().map(|venue| async move {
            (venue.id.clone(), self.fetch_venue(venue, window).await)
        });
        let results = join_all(requests).await;
        combine_requests(&self.id, results)
    }
}

/// The competitor whose name differs from the home franchise.
///
/// Returns `None` when there is no home franchise configured, fewer than two
/// competitors, or no single distinct counterparty.
pub fn resolve_opponent(competitors: &[&str], home_team: Option<&str>) -> Option<String> {
    let home = home_team?.trim();
    if competitors.len() < 2 {
        return None;
    }

    let others: Vec<&str> =
        competitors.iter().map(|name| name.trim()).filter(|name| !name.eq_ignore_ascii_case(home)).collect();
    match others.as_slice() {
        [opponent] => Some(opponent.to_string()),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct DiscoveryResponse {
    #[serde(rename = "_embedded", default)]
    embedded: Option<DiscoveryEmbedded>,
}

#[derive(Debug, Deserialize)]
struct DiscoveryEmbedded {
    #[serde(default)]
    events: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct DiscoveryEvent {
    id: Option<String>,
    name: Option<String>,
    dates: Option<EventDates>,
    #[serde(default)]
    classifications: Vec<Classification>,
    #[serde(rename = "_embedded")]
    embedded: Option<EventEmbedded>,
}

#[derive(Debug, Deserialize)]
struct EventDates {
    start: Option<EventStart>,
    status: Option<EventStatus>,
}

#[derive(Debug, Deserialize)]
struct EventStart {
    #[serde(rename = "dateTime")]
    date_time: Option<String>,
    #[serde(rename = "dateTBD", default)]
    date_tbd: bool,
    #[serde(rename = "dateTBA", default)]
    date_tba: bool,
    #[serde(rename = "timeTBA", default)]
    time_tba: bool,
    #[serde(rename = "noSpecificTime", default)]
    no_specific_time: bool,
}

impl EventStart {
    fn is_unconfirmed(&self) -> bool {
        self.date_tbd || self.date_tba || self.time_tba || self.no_specific_time
    }
}

#[derive(Debug, Deserialize)]
struct EventStatus {
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Classification {
    genre: Option<NamedItem>,
}

#[derive(Debug, Default, Deserialize)]
struct EventEmbedded {
    #[serde(default)]
    venues: Vec<NamedItem>,
    #[serde(default)]
    attractions: Vec<NamedItem>,
}

#[derive(Debug, Deserialize)]
struct NamedItem {
    name: Option<String>,
}
