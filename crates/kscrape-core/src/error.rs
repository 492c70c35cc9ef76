//! Error types for kscrape core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.

use thiserror::Error;

/// Result type alias for kscrape operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for kscrape.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka-related error
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Kafka-specific errors.
#[derive(Error, Debug)]
pub enum KafkaError {
    /// Requested topic is not part of the broker's topic listing
    #[error("Topic '{topic}' not found, available topics: [{}]", .available.join(", "))]
    TopicNotFound {
        topic: String,
        available: Vec<String>,
    },

    /// Broker could not be reached or a metadata call timed out
    #[error("Broker unavailable at {brokers} during {operation}: {message}")]
    BrokerUnavailable {
        brokers: String,
        operation: String,
        message: String,
    },

    /// Mid-scan poll failure
    #[error("Poll failed: {0}")]
    Poll(String),

    /// Partition assignment error
    #[error("Partition assignment error: {0}")]
    PartitionAssignment(String),

    /// Seek to a start offset failed
    #[error("Seek to offset {offset} on {partition} failed: {message}")]
    Seek {
        partition: String,
        offset: i64,
        message: String,
    },

    /// Consumer closed
    #[error("Consumer closed")]
    ConsumerClosed,
}

impl Error {
    /// Whether the error is a usage problem rather than an infrastructure one.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Kafka(KafkaError::TopicNotFound { .. })
        )
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::Config(format!("invalid filter pattern: {err}"))
    }
}
