//! Kafka access for the scraper.
//!
//! The resolver and scanner talk to the broker only through [`BrokerClient`],
//! so the rdkafka-backed [`RdKafkaClient`] can be swapped for an in-memory
//! broker in tests.

mod consumer;

pub use consumer::{KafkaConsumerBuilder, RdKafkaClient};

use crate::Result;
use async_trait::async_trait;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// A single partition of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId {
    /// Topic name
    pub topic: String,
    /// Partition number
    pub partition: i32,
}

impl PartitionId {
    /// Create a partition id.
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// A consumed Kafka record.
#[derive(Debug, Clone)]
pub struct KafkaRecord {
    /// Topic name
    pub topic: String,

    /// Partition number
    pub partition: i32,

    /// Offset within the partition
    pub offset: i64,

    /// Record timestamp (milliseconds since epoch)
    pub timestamp: i64,

    /// Record key (optional)
    pub key: Option<Vec<u8>>,

    /// Record value (optional)
    pub value: Option<Vec<u8>>,
}

impl KafkaRecord {
    /// Partition this record was read from.
    pub fn partition_id(&self) -> PartitionId {
        PartitionId::new(self.topic.clone(), self.partition)
    }

    /// Record key decoded as UTF-8, invalid sequences replaced.
    pub fn key_text(&self) -> Option<Cow<'_, str>> {
        self.key.as_deref().map(String::from_utf8_lossy)
    }

    /// Record value decoded as UTF-8, invalid sequences replaced.
    pub fn value_text(&self) -> Option<Cow<'_, str>> {
        self.value.as_deref().map(String::from_utf8_lossy)
    }
}

/// The broker operations the scraper needs.
///
/// Metadata calls must fail with `KafkaError::BrokerUnavailable` when the
/// broker cannot answer; `poll` must return an empty batch on timeout and
/// `KafkaError::Poll` on a hard failure.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Broker endpoints this client talks to, for error messages.
    fn brokers(&self) -> String;

    /// All topics with their partition numbers.
    async fn list_topics(&self, timeout: Duration) -> Result<HashMap<String, Vec<i32>>>;

    /// Partitions of a single topic.
    async fn partitions_for(&self, topic: &str) -> Result<Vec<PartitionId>>;

    /// Offset one past the last record, per partition.
    async fn end_offsets(&self, partitions: &[PartitionId]) -> Result<HashMap<PartitionId, i64>>;

    /// Offset of the earliest record with timestamp >= `timestamp_ms`.
    ///
    /// `None` means the partition has no such record. Partitions the broker
    /// did not answer for are absent from the map.
    async fn offsets_for_time(
        &self,
        partitions: &[PartitionId],
        timestamp_ms: i64,
    ) -> Result<HashMap<PartitionId, Option<i64>>>;

    /// Manually assign partitions, bypassing group management.
    async fn assign(&mut self, partitions: &[PartitionId]) -> Result<()>;

    /// Position an assigned partition at `offset`.
    async fn seek(&mut self, partition: &PartitionId, offset: i64) -> Result<()>;

    /// Fetch the next batch, waiting at most `timeout`.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<KafkaRecord>>;

    /// Release the connection.
    async fn close(&mut self) -> Result<()>;
}
