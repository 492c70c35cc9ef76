//! Configuration structures for kscrape.
//!
//! Configuration is loaded from an optional TOML file and overridden via CLI
//! flags. The validated result is turned into an immutable [`ScrapeRequest`].

use crate::filter::RecordFilter;
use crate::time::parse_time;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Kafka configuration
    #[serde(default)]
    pub kafka: KafkaConfig,

    /// What to scrape
    #[serde(default)]
    pub scrape: ScrapeConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Kafka consumer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    #[serde(default)]
    pub bootstrap_servers: Vec<String>,

    /// Consumer group ID (required by librdkafka, offsets are never committed)
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Timeout for metadata and offset lookups in milliseconds
    #[serde(default = "default_metadata_timeout_ms")]
    pub metadata_timeout_ms: u64,

    /// Bounded wait of a single poll in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Upper bound on records returned by a single poll
    #[serde(default = "default_max_poll_records")]
    pub max_poll_records: usize,

    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,

    /// Security configuration
    #[serde(default)]
    pub security: KafkaSecurityConfig,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: Vec::new(),
            consumer_group: default_consumer_group(),
            metadata_timeout_ms: default_metadata_timeout_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            max_poll_records: default_max_poll_records(),
            session_timeout_ms: default_session_timeout_ms(),
            security: KafkaSecurityConfig::default(),
        }
    }
}

impl KafkaConfig {
    /// Timeout applied to metadata requests.
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    /// Bounded wait of one poll.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// Kafka security configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KafkaSecurityConfig {
    /// Security protocol (PLAINTEXT, SSL, SASL_SSL, SASL_PLAINTEXT)
    pub protocol: Option<String>,

    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512)
    pub sasl_mechanism: Option<String>,

    /// SASL username
    pub sasl_username: Option<String>,

    /// SASL password
    pub sasl_password: Option<String>,

    /// SSL CA certificate location
    pub ssl_ca_location: Option<PathBuf>,

    /// SSL client certificate location
    pub ssl_cert_location: Option<PathBuf>,

    /// SSL client key location
    pub ssl_key_location: Option<PathBuf>,
}

/// Scrape parameters as written by the user.
///
/// Times and the filter stay unparsed here; [`Config::to_request`] turns
/// them into typed values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ScrapeConfig {
    /// Topic to scrape
    #[serde(default)]
    pub topic: String,

    /// Window start (ISO-8601 or relative such as "5 m ago")
    pub start: Option<String>,

    /// Window end (ISO-8601 or relative)
    pub end: Option<String>,

    /// Regular expression matched against whole key or value
    pub filter: Option<String>,

    /// Print a progress dot every n records without a match (0 disables)
    #[serde(default)]
    pub progress: u64,

    /// Stop after this many matches
    pub count: Option<u64>,
}

/// Monitoring configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// JSON lines
    Json,
}

/// A validated scrape request. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    /// Broker endpoints, in the order given
    pub brokers: Vec<String>,
    /// Topic to scan
    pub topic: String,
    /// Exclusive window start
    pub window_start: DateTime<Utc>,
    /// Exclusive window end
    pub window_end: DateTime<Utc>,
    /// Optional key/value filter
    pub filter: Option<RecordFilter>,
    /// Records without a match per progress marker, 0 disables markers
    pub progress_interval: u64,
    /// Cap on emitted matches
    pub max_matches: Option<u64>,
}

impl ScrapeRequest {
    /// Window start in epoch milliseconds.
    pub fn start_millis(&self) -> i64 {
        self.window_start.timestamp_millis()
    }

    /// Window end in epoch milliseconds.
    pub fn end_millis(&self) -> i64 {
        self.window_end.timestamp_millis()
    }
}

// Default value functions
fn default_consumer_group() -> String {
    "kscrape".to_string()
}
fn default_metadata_timeout_ms() -> u64 {
    10_000
}
fn default_poll_timeout_ms() -> u64 {
    1_000
}
fn default_max_poll_records() -> usize {
    500
}
fn default_session_timeout_ms() -> u32 {
    30_000
}

/// Window used when no start is given: one minute before now.
const DEFAULT_START_OFFSET_SECS: i64 = 60;
/// Window used when no end is given: one minute after now.
const DEFAULT_END_OFFSET_SECS: i64 = 60;

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.kafka.bootstrap_servers.is_empty() {
            return Err(crate::Error::Config(
                "At least one bootstrap server required".into(),
            ));
        }

        if self.scrape.topic.is_empty() {
            return Err(crate::Error::Config("Kafka topic is required".into()));
        }

        if self.kafka.consumer_group.is_empty() {
            return Err(crate::Error::Config("Consumer group is required".into()));
        }

        if self.kafka.metadata_timeout_ms == 0 || self.kafka.poll_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "Metadata and poll timeouts must be positive".into(),
            ));
        }

        if self.kafka.max_poll_records == 0 {
            return Err(crate::Error::Config(
                "max_poll_records must be positive".into(),
            ));
        }

        if self.scrape.count == Some(0) {
            return Err(crate::Error::Config("Count must be positive".into()));
        }

        Ok(())
    }

    /// Validate and convert into a [`ScrapeRequest`], resolving relative
    /// times against `now`.
    pub fn to_request(&self, now: DateTime<Utc>) -> crate::Result<ScrapeRequest> {
        self.validate()?;

        let window_start = match self.scrape.start.as_deref() {
            Some(input) => parse_time(input, now)?,
            None => now - ChronoDuration::seconds(DEFAULT_START_OFFSET_SECS),
        };
        let window_end = match self.scrape.end.as_deref() {
            Some(input) => parse_time(input, now)?,
            None => now + ChronoDuration::seconds(DEFAULT_END_OFFSET_SECS),
        };

        if window_start > window_end {
            tracing::warn!(
                start = %window_start,
                end = %window_end,
                "Window start is after window end, nothing will match"
            );
        }

        let filter = self
            .scrape
            .filter
            .as_deref()
            .map(RecordFilter::new)
            .transpose()?;

        Ok(ScrapeRequest {
            brokers: self.kafka.bootstrap_servers.clone(),
            topic: self.scrape.topic.clone(),
            window_start,
            window_end,
            filter,
            progress_interval: self.scrape.progress,
            max_matches: self.scrape.count,
        })
    }
}
