use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_API_PREFIX: &str = "/api";
pub const LATEST_RECORD_PATH: &str = "/latest-eeg-record/";
pub const ALL_RECORDS_PATH: &str = "/all-eeg-records/";
pub const DEFAULT_STREAM_PATH: &str = "/ws/eeg/";

/// Reconnect / retry schedule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
    /// Fraction of each delay that may be randomly shaved off, in `[0, 1)`
    pub jitter: f64,
}

impl BackoffConfig {
    /// Check that successive delays strictly grow until they reach the cap
    ///
    /// The smallest possible step between two delays is `factor * (1 - jitter)`,
    /// so that product must exceed 1.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base.is_zero() || self.cap < self.base {
            return Err(ConfigError::InvalidValue(
                "backoff cap must be at least the (non-zero) base delay".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(ConfigError::InvalidValue(
                "backoff jitter must be within [0, 1)".to_string(),
            ));
        }
        if !(self.factor * (1.0 - self.jitter) > 1.0) {
            return Err(ConfigError::InvalidValue(format!(
                "backoff factor {} with jitter {} does not grow delays (factor * (1 - jitter) must exceed 1)",
                self.factor, self.jitter
            )));
        }
        Ok(())
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            factor: 2.0,
            cap: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

/// How much history the reconciler keeps in memory
///
/// Either bound may be disabled; eviction applies whichever are set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetentionConfig {
    pub max_records: Option<usize>,
    /// Measured against the newest retained record's timestamp
    pub max_age: Option<Duration>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_records: Some(10_000),
            max_age: Some(Duration::from_secs(3600)),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    /// Backend origin, e.g. `http://localhost:8000`
    pub base_url: String,
    /// Prefix shared by the snapshot endpoints
    pub api_prefix: String,
    pub latest_path: String,
    pub all_path: String,
    pub stream_path: String,
    /// Deadline applied to each snapshot fetch
    pub fetch_timeout: Duration,
    pub backoff: BackoffConfig,
    pub retention: RetentionConfig,
    /// Only admit records from this session
    pub session: Option<String>,
    /// Seed the timeline from the full history on start
    pub seed_history: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            latest_path: LATEST_RECORD_PATH.to_string(),
            all_path: ALL_RECORDS_PATH.to_string(),
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            fetch_timeout: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
            retention: RetentionConfig::default(),
            session: None,
            seed_history: true,
        }
    }
}

impl FeedConfig {
    /// Create a default configuration pointed at `base_url`
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables (and `.env` if present)
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            base_url: lookup("EEG_FEED_BASE_URL").unwrap_or(defaults.base_url),
            api_prefix: lookup("EEG_FEED_API_PREFIX").unwrap_or(defaults.api_prefix),
            latest_path: defaults.latest_path,
            all_path: defaults.all_path,
            stream_path: lookup("EEG_FEED_STREAM_PATH").unwrap_or(defaults.stream_path),
            fetch_timeout: parse_var(&lookup, "EEG_FEED_FETCH_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.fetch_timeout),
            backoff: BackoffConfig {
                base: parse_var(&lookup, "EEG_FEED_BACKOFF_BASE_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.backoff.base),
                cap: parse_var(&lookup, "EEG_FEED_BACKOFF_CAP_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.backoff.cap),
                ..defaults.backoff
            },
            retention: RetentionConfig {
                max_records: parse_limit(&lookup, "EEG_FEED_MAX_RECORDS")?
                    .unwrap_or(defaults.retention.max_records),
                max_age: parse_limit(&lookup, "EEG_FEED_MAX_AGE_SECS")?
                    .map(|secs| secs.map(Duration::from_secs))
                    .unwrap_or(defaults.retention.max_age),
            },
            session: lookup("EEG_FEED_SESSION").filter(|s| !s.trim().is_empty()),
            seed_history: lookup("EEG_FEED_SEED_HISTORY")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(defaults.seed_history),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the client cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue(format!(
                "base URL must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "fetch timeout must be greater than zero".to_string(),
            ));
        }
        self.backoff.validate()?;
        if self.retention.max_records.is_none() && self.retention.max_age.is_none() {
            return Err(ConfigError::InvalidValue(
                "retention needs a record limit, an age limit, or both".to_string(),
            ));
        }
        if self.retention.max_records == Some(0) {
            return Err(ConfigError::InvalidValue(
                "retention record limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn latest_url(&self) -> String {
        self.join(&[&self.api_prefix, &self.latest_path])
    }

    pub fn all_url(&self) -> String {
        self.join(&[&self.api_prefix, &self.all_path])
    }

    /// WebSocket URL of the push channel
    pub fn stream_url(&self) -> String {
        let url = self.join(&[&self.stream_path]);
        if let Some(rest) = url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            url
        }
    }

    fn join(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.trim_end_matches('/').to_string();
        for segment in segments {
            let segment = segment.trim_matches('/');
            if !segment.is_empty() {
                url.push('/');
                url.push_str(segment);
            }
        }
        // Backend routes are registered with a trailing slash
        url.push('/');
        url
    }
}

fn parse_var<F>(lookup: &F, key: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(format!("{} must be an integer, got '{}'", key, raw))),
        None => Ok(None),
    }
}

/// Like `parse_var`, but `0` or `none` disables the limit
fn parse_limit<F, T>(lookup: &F, key: &str) -> Result<Option<Option<T>>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed == "0" || trimmed.eq_ignore_ascii_case("none") {
                return Ok(Some(None));
            }
            trimmed.parse().map(|v| Some(Some(v))).map_err(|_| {
                ConfigError::InvalidValue(format!("{} must be an integer, got '{}'", key, raw))
            })
        }
        None => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
