//! In-memory broker shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use kscrape_core::config::{KafkaConfig, ScrapeRequest};
use kscrape_core::filter::RecordFilter;
use kscrape_core::kafka::{BrokerClient, KafkaRecord, PartitionId};
use kscrape_core::{Error, KafkaError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A stored record; its offset is its index in the partition.
#[derive(Debug, Clone)]
pub struct Stored {
    pub timestamp: i64,
    pub key: Option<String>,
    pub value: Option<String>,
}

/// Counters observable after the broker has been moved into an engine.
#[derive(Debug, Default)]
pub struct BrokerStats {
    pub closed: AtomicBool,
    pub polls: AtomicUsize,
    pub seeks: AtomicUsize,
}

/// Broker that serves records from memory.
pub struct InMemoryBroker {
    topics: BTreeMap<String, Vec<Vec<Stored>>>,
    positions: HashMap<PartitionId, i64>,
    batch_size: usize,
    reverse_batches: bool,
    listing_fails: bool,
    unanswered_lookups: bool,
    fail_poll_at: Option<usize>,
    stalled: bool,
    stats: Arc<BrokerStats>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            topics: BTreeMap::new(),
            positions: HashMap::new(),
            batch_size: 100,
            reverse_batches: false,
            listing_fails: false,
            unanswered_lookups: false,
            fail_poll_at: None,
            stalled: false,
            stats: Arc::new(BrokerStats::default()),
        }
    }

    /// Add a topic; each inner vector is one partition.
    pub fn with_topic(mut self, name: &str, partitions: Vec<Vec<Stored>>) -> Self {
        self.topics.insert(name.to_string(), partitions);
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Deliver every batch in descending offset order.
    pub fn reverse_batches(mut self) -> Self {
        self.reverse_batches = true;
        self
    }

    /// Topic listing fails as if the broker were unreachable.
    pub fn listing_fails(mut self) -> Self {
        self.listing_fails = true;
        self
    }

    /// Time lookups come back without any partition in them.
    pub fn unanswered_lookups(mut self) -> Self {
        self.unanswered_lookups = true;
        self
    }

    /// The n-th poll (0-based) fails.
    pub fn fail_poll_at(mut self, poll: usize) -> Self {
        self.fail_poll_at = Some(poll);
        self
    }

    /// Polls never return records, they only wait out the timeout.
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    pub fn stats(&self) -> Arc<BrokerStats> {
        Arc::clone(&self.stats)
    }

    fn partition(&self, id: &PartitionId) -> Option<&Vec<Stored>> {
        self.topics
            .get(&id.topic)
            .and_then(|parts| parts.get(id.partition as usize))
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    fn brokers(&self) -> String {
        "memory:9092".to_string()
    }

    async fn list_topics(&self, _timeout: Duration) -> Result<HashMap<String, Vec<i32>>> {
        if self.listing_fails {
            return Err(Error::Kafka(KafkaError::BrokerUnavailable {
                brokers: self.brokers(),
                operation: "list topics".into(),
                message: "Local: Timed out".into(),
            }));
        }
        Ok(self
            .topics
            .iter()
            .map(|(name, parts)| (name.clone(), (0..parts.len() as i32).collect()))
            .collect())
    }

    async fn partitions_for(&self, topic: &str) -> Result<Vec<PartitionId>> {
        let parts = self.topics.get(topic).ok_or_else(|| {
            Error::Kafka(KafkaError::TopicNotFound {
                topic: topic.to_string(),
                available: Vec::new(),
            })
        })?;
        Ok((0..parts.len() as i32)
            .map(|p| PartitionId::new(topic, p))
            .collect())
    }

    async fn end_offsets(&self, partitions: &[PartitionId]) -> Result<HashMap<PartitionId, i64>> {
        Ok(partitions
            .iter()
            .filter_map(|id| self.partition(id).map(|p| (id.clone(), p.len() as i64)))
            .collect())
    }

    async fn offsets_for_time(
        &self,
        partitions: &[PartitionId],
        timestamp_ms: i64,
    ) -> Result<HashMap<PartitionId, Option<i64>>> {
        if self.unanswered_lookups {
            return Ok(HashMap::new());
        }
        Ok(partitions
            .iter()
            .filter_map(|id| {
                self.partition(id).map(|records| {
                    let offset = records
                        .iter()
                        .position(|r| r.timestamp >= timestamp_ms)
                        .map(|o| o as i64);
                    (id.clone(), offset)
                })
            })
            .collect())
    }

    async fn assign(&mut self, partitions: &[PartitionId]) -> Result<()> {
        self.positions = partitions.iter().map(|p| (p.clone(), 0)).collect();
        Ok(())
    }

    async fn seek(&mut self, partition: &PartitionId, offset: i64) -> Result<()> {
        self.stats.seeks.fetch_add(1, Ordering::SeqCst);
        match self.positions.get_mut(partition) {
            Some(position) => {
                *position = offset;
                Ok(())
            }
            None => Err(Error::Kafka(KafkaError::Seek {
                partition: partition.to_string(),
                offset,
                message: "partition not assigned".into(),
            })),
        }
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<KafkaRecord>> {
        let poll = self.stats.polls.fetch_add(1, Ordering::SeqCst);
        if self.fail_poll_at == Some(poll) {
            return Err(Error::Kafka(KafkaError::Poll(
                "Broker: Not leader for partition".into(),
            )));
        }
        if self.stalled {
            tokio::time::sleep(timeout).await;
            return Ok(Vec::new());
        }

        let mut ids: Vec<PartitionId> = self.positions.keys().cloned().collect();
        ids.sort();

        let mut batch = Vec::new();
        for id in ids {
            let Some(records) = self.partition(&id) else {
                continue;
            };
            let position = self.positions[&id];
            let available: Vec<KafkaRecord> = records
                .iter()
                .enumerate()
                .skip(position.max(0) as usize)
                .take(self.batch_size - batch.len())
                .map(|(offset, r)| KafkaRecord {
                    topic: id.topic.clone(),
                    partition: id.partition,
                    offset: offset as i64,
                    timestamp: r.timestamp,
                    key: r.key.clone().map(String::into_bytes),
                    value: r.value.clone().map(String::into_bytes),
                })
                .collect();
            if let Some(last) = available.last() {
                self.positions.insert(id.clone(), last.offset + 1);
            }
            batch.extend(available);
            if batch.len() >= self.batch_size {
                break;
            }
        }

        if self.reverse_batches {
            batch.reverse();
        }
        if batch.is_empty() {
            tokio::task::yield_now().await;
        }
        Ok(batch)
    }

    async fn close(&mut self) -> Result<()> {
        self.stats.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Records with the given timestamps and keys/values `k<offset>`/`v<offset>`.
pub fn records(timestamps: &[i64]) -> Vec<Stored> {
    timestamps
        .iter()
        .enumerate()
        .map(|(offset, ts)| Stored {
            timestamp: *ts,
            key: Some(format!("k{offset}")),
            value: Some(format!("v{offset}")),
        })
        .collect()
}

/// Request for topic `t` with an exclusive window in epoch milliseconds.
pub fn request(topic: &str, start_ms: i64, end_ms: i64) -> ScrapeRequest {
    ScrapeRequest {
        brokers: vec!["memory:9092".into()],
        topic: topic.to_string(),
        window_start: chrono::DateTime::from_timestamp_millis(start_ms).unwrap(),
        window_end: chrono::DateTime::from_timestamp_millis(end_ms).unwrap(),
        filter: None,
        progress_interval: 0,
        max_matches: None,
    }
}

pub fn with_filter(mut request: ScrapeRequest, pattern: &str) -> ScrapeRequest {
    request.filter = Some(RecordFilter::new(pattern).unwrap());
    request
}

/// Kafka settings with a short poll wait for tests.
pub fn kafka_config() -> KafkaConfig {
    KafkaConfig {
        poll_timeout_ms: 20,
        ..KafkaConfig::default()
    }
}

/// Output lines that are record matches (drops dots and the summary).
pub fn match_lines(output: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(output)
        .lines()
        .filter(|l| !l.starts_with("Received ") && !l.chars().all(|c| c == '.'))
        .map(str::to_string)
        .collect()
}
