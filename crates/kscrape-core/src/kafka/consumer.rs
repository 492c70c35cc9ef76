//! librdkafka-backed broker client.
//!
//! Partitions are assigned manually and positioned explicitly; the consumer
//! never joins group management and never commits offsets, so a scrape
//! leaves no trace on the cluster.

use super::{BrokerClient, KafkaRecord, PartitionId};
use crate::config::KafkaConfig;
use crate::{Error, KafkaError, Result};
use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Builder for creating a Kafka consumer.
pub struct KafkaConsumerBuilder {
    config: KafkaConfig,
}

impl KafkaConsumerBuilder {
    /// Create a new consumer builder.
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }

    /// Override the bootstrap servers from the configuration.
    pub fn bootstrap_servers(mut self, servers: &[String]) -> Self {
        self.config.bootstrap_servers = servers.to_vec();
        self
    }

    /// Build the consumer.
    pub fn build(self) -> Result<RdKafkaClient> {
        let brokers = self.config.bootstrap_servers.join(",");
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &brokers)
            .set("group.id", &self.config.consumer_group)
            // Read-only scan: nothing is ever committed back
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            // Only hit when a seek target was truncated by retention
            .set("auto.offset.reset", "earliest")
            .set(
                "session.timeout.ms",
                self.config.session_timeout_ms.to_string(),
            );

        // Security configuration
        let security = &self.config.security;
        if let Some(ref protocol) = security.protocol {
            client_config.set("security.protocol", protocol);
        }
        if let Some(ref mechanism) = security.sasl_mechanism {
            client_config.set("sasl.mechanism", mechanism);
        }
        if let Some(ref username) = security.sasl_username {
            client_config.set("sasl.username", username);
        }
        if let Some(ref password) = security.sasl_password {
            client_config.set("sasl.password", password);
        }
        if let Some(ref path) = security.ssl_ca_location {
            client_config.set("ssl.ca.location", path.to_string_lossy().as_ref());
        }
        if let Some(ref path) = security.ssl_cert_location {
            client_config.set("ssl.certificate.location", path.to_string_lossy().as_ref());
        }
        if let Some(ref path) = security.ssl_key_location {
            client_config.set("ssl.key.location", path.to_string_lossy().as_ref());
        }

        let consumer: StreamConsumer = client_config.create().map_err(|e| {
            Error::Kafka(KafkaError::BrokerUnavailable {
                brokers: brokers.clone(),
                operation: "create consumer".into(),
                message: e.to_string(),
            })
        })?;

        info!(
            servers = %brokers,
            group = %self.config.consumer_group,
            "Kafka consumer created"
        );

        Ok(RdKafkaClient {
            consumer,
            brokers,
            metadata_timeout: self.config.metadata_timeout(),
            max_poll_records: self.config.max_poll_records,
            assignment: TopicPartitionList::new(),
            closed: false,
        })
    }
}

/// [`BrokerClient`] on top of an rdkafka [`StreamConsumer`].
pub struct RdKafkaClient {
    consumer: StreamConsumer,
    brokers: String,
    metadata_timeout: Duration,
    max_poll_records: usize,
    /// Partitions and start positions handed to librdkafka
    assignment: TopicPartitionList,
    closed: bool,
}

impl RdKafkaClient {
    fn unavailable(&self, operation: &str, err: impl ToString) -> Error {
        Error::Kafka(KafkaError::BrokerUnavailable {
            brokers: self.brokers.clone(),
            operation: operation.to_string(),
            message: err.to_string(),
        })
    }

    /// Convert a borrowed message to an owned record.
    fn convert_message(msg: &BorrowedMessage) -> KafkaRecord {
        KafkaRecord {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            timestamp: msg.timestamp().to_millis().unwrap_or(0),
            key: msg.key().map(|k| k.to_vec()),
            value: msg.payload().map(|v| v.to_vec()),
        }
    }
}

#[async_trait]
impl BrokerClient for RdKafkaClient {
    fn brokers(&self) -> String {
        self.brokers.clone()
    }

    async fn list_topics(&self, timeout: Duration) -> Result<HashMap<String, Vec<i32>>> {
        let metadata = self
            .consumer
            .fetch_metadata(None, timeout)
            .map_err(|e| self.unavailable("list topics", e))?;

        Ok(metadata
            .topics()
            .iter()
            .map(|t| {
                let partitions = t.partitions().iter().map(|p| p.id()).collect();
                (t.name().to_string(), partitions)
            })
            .collect())
    }

    async fn partitions_for(&self, topic: &str) -> Result<Vec<PartitionId>> {
        let metadata = self
            .consumer
            .fetch_metadata(Some(topic), self.metadata_timeout)
            .map_err(|e| self.unavailable("fetch partitions", e))?;

        let topic_metadata = metadata
            .topics()
            .iter()
            .find(|t| t.name() == topic && t.error().is_none())
            .ok_or_else(|| {
                Error::Kafka(KafkaError::TopicNotFound {
                    topic: topic.to_string(),
                    available: Vec::new(),
                })
            })?;

        let mut partitions: Vec<PartitionId> = topic_metadata
            .partitions()
            .iter()
            .map(|p| PartitionId::new(topic, p.id()))
            .collect();
        partitions.sort();
        Ok(partitions)
    }

    async fn end_offsets(&self, partitions: &[PartitionId]) -> Result<HashMap<PartitionId, i64>> {
        let mut offsets = HashMap::with_capacity(partitions.len());
        for partition in partitions {
            let (_low, high) = self
                .consumer
                .fetch_watermarks(&partition.topic, partition.partition, self.metadata_timeout)
                .map_err(|e| self.unavailable("fetch end offsets", e))?;
            offsets.insert(partition.clone(), high);
        }
        Ok(offsets)
    }

    async fn offsets_for_time(
        &self,
        partitions: &[PartitionId],
        timestamp_ms: i64,
    ) -> Result<HashMap<PartitionId, Option<i64>>> {
        let mut tpl = TopicPartitionList::new();
        for partition in partitions {
            // The offset slot carries the timestamp for this request
            tpl.add_partition_offset(
                &partition.topic,
                partition.partition,
                Offset::Offset(timestamp_ms),
            )
            .map_err(|e| self.unavailable("offsets for time", e))?;
        }

        let answer = self
            .consumer
            .offsets_for_times(tpl, self.metadata_timeout)
            .map_err(|e| self.unavailable("offsets for time", e))?;

        let mut offsets = HashMap::with_capacity(partitions.len());
        for elem in answer.elements() {
            let partition = PartitionId::new(elem.topic(), elem.partition());
            if let Err(e) = elem.error() {
                warn!(partition = %partition, error = %e, "No time lookup answer for partition");
                continue;
            }
            let offset = match elem.offset() {
                Offset::Offset(offset) => Some(offset),
                _ => None,
            };
            offsets.insert(partition, offset);
        }
        Ok(offsets)
    }

    async fn assign(&mut self, partitions: &[PartitionId]) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        for partition in partitions {
            tpl.add_partition_offset(&partition.topic, partition.partition, Offset::Beginning)
                .map_err(|e| Error::Kafka(KafkaError::PartitionAssignment(e.to_string())))?;
        }

        self.consumer
            .assign(&tpl)
            .map_err(|e| Error::Kafka(KafkaError::PartitionAssignment(e.to_string())))?;
        self.assignment = tpl;

        debug!(partitions = partitions.len(), "Partitions assigned");
        Ok(())
    }

    async fn seek(&mut self, partition: &PartitionId, offset: i64) -> Result<()> {
        let seek_error = |message: String| {
            Error::Kafka(KafkaError::Seek {
                partition: partition.to_string(),
                offset,
                message,
            })
        };

        // Re-assigning with an explicit offset positions the fetcher even
        // before the partition has been polled once.
        self.assignment
            .set_partition_offset(&partition.topic, partition.partition, Offset::Offset(offset))
            .map_err(|e| seek_error(e.to_string()))?;
        self.consumer
            .assign(&self.assignment)
            .map_err(|e| seek_error(e.to_string()))?;

        debug!(partition = %partition, offset = offset, "Partition positioned");
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<KafkaRecord>> {
        use futures::StreamExt;

        if self.closed {
            return Err(Error::Kafka(KafkaError::ConsumerClosed));
        }

        let mut batch = Vec::with_capacity(self.max_poll_records);
        let deadline = tokio::time::Instant::now() + timeout;
        let stream = self.consumer.stream();
        tokio::pin!(stream);

        while batch.len() < self.max_poll_records {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }

            match tokio::time::timeout(remaining, stream.next()).await {
                Ok(Some(Ok(msg))) => {
                    batch.push(Self::convert_message(&msg));
                }
                Ok(Some(Err(e))) => {
                    return Err(Error::Kafka(KafkaError::Poll(e.to_string())));
                }
                Ok(None) => {
                    if batch.is_empty() {
                        return Err(Error::Kafka(KafkaError::ConsumerClosed));
                    }
                    break;
                }
                // Timeout
                Err(_) => break,
            }
        }

        Ok(batch)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.consumer
            .unassign()
            .map_err(|e| Error::Kafka(KafkaError::PartitionAssignment(e.to_string())))?;

        info!(servers = %self.brokers, "Kafka consumer closed");
        Ok(())
    }
}
