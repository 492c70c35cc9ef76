//! Window resolution: wall-clock window to per-partition offset ranges.
//!
//! The offset bounds only limit how much is read. Which records match is
//! decided later by timestamp, so ranges err on the side of reading one
//! record too many.

use crate::config::ScrapeRequest;
use crate::kafka::{BrokerClient, PartitionId};
use crate::{Error, KafkaError, Result};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info};

/// Inclusive offset range to read from one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionRange {
    /// First offset to read
    pub start_offset: i64,
    /// Last offset to read; `start_offset - 1` for an empty range
    pub end_offset: i64,
}

impl PartitionRange {
    /// Whether the range holds no offsets at all.
    pub fn is_empty(&self) -> bool {
        self.end_offset < self.start_offset
    }

    /// Number of offsets covered.
    pub fn len(&self) -> u64 {
        (self.end_offset - self.start_offset + 1).max(0) as u64
    }
}

/// Resolved ranges, ordered by partition.
pub type OffsetMap = BTreeMap<PartitionId, PartitionRange>;

/// Answer of a time-to-offset lookup for a single partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeLookup {
    /// Earliest record at or after the timestamp
    Found(i64),
    /// The partition holds no record at or after the timestamp
    NoRecord,
    /// The broker left the partition out of its answer
    Unanswered,
}

impl TimeLookup {
    fn from_answer(answer: &HashMap<PartitionId, Option<i64>>, partition: &PartitionId) -> Self {
        match answer.get(partition) {
            Some(Some(offset)) => TimeLookup::Found(*offset),
            Some(None) => TimeLookup::NoRecord,
            None => TimeLookup::Unanswered,
        }
    }
}

/// Compute the range of one partition from its end-of-log offset and the
/// lookups at window start and window end.
pub fn compute_range(last_offset: i64, start: TimeLookup, end: TimeLookup) -> PartitionRange {
    let start_offset = match start {
        TimeLookup::Found(offset) => offset,
        // Window starts after all data
        TimeLookup::NoRecord => last_offset,
        TimeLookup::Unanswered => 0,
    };

    let end_offset = match end {
        TimeLookup::Found(offset) => offset,
        TimeLookup::NoRecord | TimeLookup::Unanswered => last_offset - 1,
    };

    // An inverted window must collapse to an empty range, never below it.
    PartitionRange {
        start_offset,
        end_offset: end_offset.max(start_offset - 1),
    }
}

/// Translates a scrape window into offset ranges.
pub struct WindowResolver<'a, C: BrokerClient + ?Sized> {
    client: &'a C,
    metadata_timeout: Duration,
}

impl<'a, C: BrokerClient + ?Sized> WindowResolver<'a, C> {
    /// Create a resolver using `client` for all broker queries.
    pub fn new(client: &'a C, metadata_timeout: Duration) -> Self {
        Self {
            client,
            metadata_timeout,
        }
    }

    /// Resolve the request's window into one range per partition.
    pub async fn resolve(&self, request: &ScrapeRequest) -> Result<OffsetMap> {
        self.ensure_topic_exists(&request.topic).await?;

        let partitions = self.client.partitions_for(&request.topic).await?;
        let last_offsets = self.client.end_offsets(&partitions).await?;
        let start_offsets = self
            .client
            .offsets_for_time(&partitions, request.start_millis())
            .await?;
        let end_offsets = self
            .client
            .offsets_for_time(&partitions, request.end_millis())
            .await?;

        let mut ranges = OffsetMap::new();
        for partition in partitions {
            let last_offset = *last_offsets.get(&partition).ok_or_else(|| {
                Error::Kafka(KafkaError::BrokerUnavailable {
                    brokers: self.client.brokers(),
                    operation: "fetch end offsets".into(),
                    message: format!("no end offset returned for {partition}"),
                })
            })?;

            let start = TimeLookup::from_answer(&start_offsets, &partition);
            let end = TimeLookup::from_answer(&end_offsets, &partition);
            let range = compute_range(last_offset, start, end);

            debug!(
                partition = %partition,
                last_offset = last_offset,
                start_lookup = ?start,
                end_lookup = ?end,
                start_offset = range.start_offset,
                end_offset = range.end_offset,
                "Partition range resolved"
            );
            ranges.insert(partition, range);
        }

        info!(
            topic = %request.topic,
            partitions = ranges.len(),
            records_to_scan = ranges.values().map(PartitionRange::len).sum::<u64>(),
            "Window resolved"
        );

        Ok(ranges)
    }

    async fn ensure_topic_exists(&self, topic: &str) -> Result<()> {
        let topics = self.client.list_topics(self.metadata_timeout).await?;
        if topics.contains_key(topic) {
            return Ok(());
        }

        let mut available: Vec<String> = topics.into_keys().collect();
        available.sort();
        Err(Error::Kafka(KafkaError::TopicNotFound {
            topic: topic.to_string(),
            available,
        }))
    }
}
