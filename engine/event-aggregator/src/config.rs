use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "event-aggregator";

/// Prefix for environment overrides, e.g. `EVENTS__DEADLINE_SECS=45`
pub const ENV_PREFIX: &str = "EVENTS";

/// Configuration for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// IANA name of the civil timezone used to classify events
    pub timezone: String,

    /// Ticketed-venue provider configuration
    pub venue_source: VenueSourceConfig,

    /// Sports-league provider configuration
    pub league_source: LeagueSourceConfig,

    /// Special-events override store configuration
    pub overrides: OverrideStoreConfig,

    /// Retry configuration shared by all HTTP sources
    pub retry: RetryConfig,

    /// Deadline for the whole aggregation, in seconds
    pub deadline_secs: u64,

    /// Where the JSON sink writes the aggregate result
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueSourceConfig {
    pub api_base_url: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    pub venues: Vec<VenueConfig>,

    /// Maximum simultaneous venue queries
    pub max_concurrent: usize,

    /// Minimum spacing between venue query starts, in milliseconds
    pub min_interval_ms: u64,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VenueConfig {
    /// Upstream venue identifier
    pub id: String,

    /// Display name used when the upstream omits the venue name
    pub name: String,

    /// Home franchise, used to pick the opponent out of the event's competitors
    #[serde(default)]
    pub home_team: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeagueSourceConfig {
    pub api_base_url: String,

    /// Environment variable holding the API key, if the upstream requires one
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Team feed identifiers, one upstream request each
    pub team_feeds: Vec<String>,

    /// Category label attached to every event from this source
    pub league: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideStoreConfig {
    /// PostgreSQL URL; the override store is disabled when unset
    #[serde(default)]
    pub database_url: Option<String>,

    pub max_connections: u32,

    /// Rows per page
    pub page_size: u32,

    /// Whether a store failure counts towards total failure
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Fixed backoff between attempts, in milliseconds
    pub backoff_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            timezone: "America/Los_Angeles".to_string(),
            venue_source: VenueSourceConfig {
                api_base_url: "https://app.ticketmaster.com/discovery/v2".to_string(),
                api_key_env: "TICKETING_API_KEY".to_string(),
                venues: Vec::new(),
                max_concurrent: 2,
                min_interval_ms: 250,
                timeout_secs: 10,
            },
            league_source: LeagueSourceConfig {
                api_base_url: "https://site.api.espn.com/apis/site/v2/sports".to_string(),
                api_key_env: None,
                team_feeds: Vec::new(),
                league: "Sports".to_string(),
                timeout_secs: 10,
            },
            overrides: OverrideStoreConfig {
                database_url: None,
                max_connections: 2,
                page_size: 100,
                required: false,
            },
            retry: RetryConfig { max_retries: 1, backoff_ms: 500 },
            deadline_secs: 60,
            output_path: PathBuf::from("events.json"),
        }
    }
}

impl AggregatorConfig {
    /// Load configuration from defaults, `event-aggregator.toml` (if present) and the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let path = std::env::var("EVENTS_CONFIG").ok().map(PathBuf::from);
        Self::load(path.as_deref())
    }

    /// Load configuration, layering an explicit file (required) or the default file (optional)
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: Self = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("league_source.team_feeds"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no pipeline run could succeed with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tz()?;

        if self.venue_source.venues.is_empty() {
            return Err(ConfigError::invalid("venue_source.venues must not be empty"));
        }
        if let Some(venue) =
            self.venue_source.venues.iter().find(|v| v.id.trim().is_empty() || v.name.trim().is_empty())
        {
            return Err(ConfigError::invalid(format!(
                "venue entries need a non-empty id and name (got id={:?})",
                venue.id
            )));
        }
        if self.venue_source.max_concurrent == 0 {
            return Err(ConfigError::invalid("venue_source.max_concurrent must be greater than 0"));
        }
        if self.league_source.team_feeds.iter().all(|feed| feed.trim().is_empty()) {
            return Err(ConfigError::invalid("league_source.team_feeds must not be empty"));
        }
        if self.overrides.page_size == 0 {
            return Err(ConfigError::invalid("overrides.page_size must be greater than 0"));
        }
        if self.deadline_secs == 0 {
            return Err(ConfigError::invalid("deadline_secs must be greater than 0"));
        }
        Ok(())
    }

    /// The civil timezone used for classification
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::invalid(format!("unknown timezone {:?}", self.timezone)))
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

impl VenueSourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn api_key(&self) -> Result<String, ConfigError> {
        resolve_secret(&self.api_key_env)
    }
}

impl LeagueSourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn api_key(&self) -> Result<Option<String>, ConfigError> {
        self.api_key_env.as_deref().map(resolve_secret).transpose()
    }
}

/// Read a secret from the named environment variable
pub fn resolve_secret(var: &str) -> Result<String, ConfigError> {
    std::env::var(var)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingSecret { var: var.to_string() })
}
