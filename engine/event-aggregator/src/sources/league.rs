//! Sports-league provider, queried once per configured team feed

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::{combine_requests, non_empty, skip, EventSource};
use crate::config::LeagueSourceConfig;
use crate::error::{ConfigError, SourceError};
use crate::http::{build_client, get_json, RetryPolicy};
use crate::models::{Event, FetchOutcome, SkipReason, SourceBatch, SourceId};
use crate::window::FetchWindow;

pub const SOURCE_ID: &str = "league-teams";

/// League schedule API client, one request per team feed.
///
/// Feeds are few and the upstream is not rate sensitive, so all feeds are
/// requested at once without a gate.
pub struct LeagueTeamSource {
    id: SourceId,
    client: Client,
    base_url: String,
    api_key: Option<String>,
    team_feeds: Vec<String>,
    league: String,
    retry: RetryPolicy,
}

impl LeagueTeamSource {
    pub fn new(
        config: &LeagueSourceConfig,
        api_key: Option<String>,
        client: Client,
        retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        let team_feeds: Vec<String> = config
            .team_feeds
            .iter()
            .map(|feed| feed.trim().trim_matches('/').to_string())
            .filter(|feed| !feed.is_empty())
            .collect();
        if team_feeds.is_empty() {
            return Err(ConfigError::invalid("league source needs at least one team feed"));
        }

        Ok(Self {
            id: SourceId::new(SOURCE_ID),
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key,
            team_feeds,
            league: config.league.clone(),
            retry,
        })
    }

    pub fn from_config(config: &LeagueSourceConfig, retry: RetryPolicy) -> Result<Self, ConfigError> {
        let client = build_client(config.timeout())?;
        Self::new(config, config.api_key()?, client, retry)
    }

    async fn fetch_feed(&self, feed: &str, window: &FetchWindow) -> Result<SourceBatch, SourceError> {
        let url = format!("{}/{}/schedule", self.base_url, feed);
        let query: Vec<(&str, String)> =
            self.api_key.iter().map(|key| ("apikey", key.clone())).collect();

        let response: ScheduleResponse = get_json(&self.client, &url, &query, &self.retry).await?;
        let batch = self.convert(feed, response, window);

        info!(
            source = %self.id,
            feed,
            events = batch.events.len(),
            skipped = batch.skipped.len(),
            "Fetched team feed"
        );
        Ok(batch)
    }

    fn convert(&self, feed: &str, response: ScheduleResponse, window: &FetchWindow) -> SourceBatch {
        let mut batch = SourceBatch::default();

        if response.events.is_empty() {
            skip(&mut batch, &self.id, feed, SkipReason::EmptyFeed);
            return batch;
        }

        let team = response.team.unwrap_or_default();
        for (index, raw) in response.events.into_iter().enumerate() {
            let fallback_label = format!("{feed}#{index}");
            let record: ScheduleEvent = match serde_json::from_value(raw) {
                Ok(record) => record,
                Err(e) => {
                    let reason = SkipReason::MalformedRecord { detail: e.to_string() };
                    skip(&mut batch, &self.id, &fallback_label, reason);
                    continue;
                }
            };

            let label = record.id.clone().unwrap_or(fallback_label);
            match self.build_event(&team, record, window) {
                Ok(event) => batch.events.push(event),
                Err(reason) => skip(&mut batch, &self.id, &label, reason),
            }
        }
        batch
    }

    fn build_event(
        &self,
        team: &TeamInfo,
        record: ScheduleEvent,
        window: &FetchWindow,
    ) -> Result<Event, SkipReason> {
        // Length checks before any positional access
        let competition = record.competitions.first().ok_or(SkipReason::NoCompetitions)?;
        if competition.competitors.len() < 2 {
            return Err(SkipReason::TooFewCompetitors { found: competition.competitors.len() });
        }

        let home = competition
            .competitor("home")
            .ok_or(SkipReason::MissingField { field: "competitors.homeAway" })?;
        let away = competition
            .competitor("away")
            .ok_or(SkipReason::MissingField { field: "competitors.homeAway" })?;

        if !team.is_empty() && !team.matches(&home.team) {
            return Err(SkipReason::AwayGame);
        }
        if !record.time_valid {
            return Err(SkipReason::UnconfirmedTime);
        }

        let raw_time = record.date.as_deref().ok_or(SkipReason::UnconfirmedTime)?;
        let start_time = parse_start_time(raw_time)
            .ok_or_else(|| SkipReason::MalformedTime { value: raw_time.to_string() })?;

        let home_name = home.team.display_name().ok_or(SkipReason::MissingField { field: "team.displayName" })?;
        let away_name = away.team.display_name().ok_or(SkipReason::MissingField { field: "team.displayName" })?;

        let venue = competition
            .venue
            .as_ref()
            .and_then(|v| non_empty(v.full_name.as_deref()))
            .ok_or(SkipReason::MissingField { field: "venue" })?;
        let name = non_empty(record.name.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{away_name} at {home_name}"));

        let category = non_empty(Some(self.league.as_str())).map(str::to_string);
        Ok(Event::new(name, venue, start_time, window.timezone(), self.id.clone())
            .with_opponent(Some(away_name.to_string()))
            .with_category(category))
    }
}

#[async_trait]
impl EventSource for LeagueTeamSource {
    fn id(&self) -> SourceId {
        self.id.clone()
    }

    async fn fetch_events(&self, window: &FetchWindow) -> FetchOutcome {
        let requests = self.team_feeds.iter().map(|feed| async move {
            (feed.clone(), self.fetch_feed(feed, window).await)
        });
        let results = join_all(requests).await;
        combine_requests(&self.id, results)
    }
}

/// League feeds use RFC 3339 or a minute-precision `2026-03-15T02:10Z` form
fn parse_start_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%MZ").ok().map(|naive| naive.and_utc())
}

#[derive(Debug, Deserialize)]
struct ScheduleResponse {
    #[serde(default)]
    team: Option<TeamInfo>,
    #[serde(default, alias = "nextEvent")]
    events: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ScheduleEvent {
    id: Option<String>,
    name: Option<String>,
    date: Option<String>,
    #[serde(rename = "timeValid", default = "default_true")]
    time_valid: bool,
    #[serde(default)]
    competitions: Vec<Competition>,
}

#[derive(Debug, Deserialize)]
struct Competition {
    venue: Option<VenueInfo>,
    #[serde(default)]
    competitors: Vec<Competitor>,
}

impl Competition {
    fn competitor(&self, side: &str) -> Option<&Competitor> {
        self.competitors
            .iter()
            .find(|c| c.home_away.as_deref().is_some_and(|s| s.eq_ignore_ascii_case(side)))
    }
}

#[derive(Debug, Deserialize)]
struct Competitor {
    #[serde(rename = "homeAway")]
    home_away: Option<String>,
    #[serde(default)]
    team: TeamInfo,
}

#[derive(Debug, Default, Deserialize)]
struct TeamInfo {
    id: Option<String>,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

impl TeamInfo {
    fn display_name(&self) -> Option<&str> {
        non_empty(self.display_name.as_deref())
    }

    fn is_empty(&self) -> bool {
        self.id.is_none() && self.display_name().is_none()
    }

    /// Match by id when both sides carry one, otherwise by display name
    fn matches(&self, other: &TeamInfo) -> bool {
        match (self.id.as_deref(), other.id.as_deref()) {
            (Some(a), Some(b)) => a == b,
            _ => match (self.display_name(), other.display_name()) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => false,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct VenueInfo {
    #[serde(rename = "fullName")]
    full_name: Option<String>,
}

fn default_true() -> bool {
    true
}
