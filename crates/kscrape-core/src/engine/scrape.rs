//! Scrape engine.
//!
//! Runs the two phases of a scrape against a single broker connection:
//! - resolve the window into per-partition offset ranges
//! - scan those ranges until done, capped, or shut down
//!
//! The connection is closed on every path, including a failed resolve.

use crate::config::{KafkaConfig, ScrapeRequest};
use crate::kafka::{BrokerClient, KafkaConsumerBuilder, RdKafkaClient};
use crate::offsets::WindowResolver;
use crate::scanner::{ScanSummary, Scanner};
use crate::Result;
use std::io::Write;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Main scrape engine.
pub struct ScrapeEngine<C: BrokerClient> {
    request: ScrapeRequest,
    client: C,
    metadata_timeout: Duration,
    poll_timeout: Duration,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ScrapeEngine<RdKafkaClient> {
    /// Create an engine backed by a librdkafka consumer.
    pub fn new(request: ScrapeRequest, kafka: &KafkaConfig) -> Result<Self> {
        let client = KafkaConsumerBuilder::new(kafka.clone())
            .bootstrap_servers(&request.brokers)
            .build()?;
        Ok(Self::with_client(request, client, kafka))
    }
}

impl<C: BrokerClient> ScrapeEngine<C> {
    /// Create an engine on top of an existing broker client.
    pub fn with_client(request: ScrapeRequest, client: C, kafka: &KafkaConfig) -> Self {
        // Subscribed up front so a signal sent before `run` is not lost
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        Self {
            request,
            client,
            metadata_timeout: kafka.metadata_timeout(),
            poll_timeout: kafka.poll_timeout(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Sender that stops a running scan at its next poll.
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// The request this engine serves.
    pub fn request(&self) -> &ScrapeRequest {
        &self.request
    }

    /// Resolve the window and scan it, writing matches to `out`.
    pub async fn run<W: Write + Send>(self, out: W) -> Result<ScanSummary> {
        let Self {
            request,
            mut client,
            metadata_timeout,
            poll_timeout,
            shutdown_tx,
            shutdown_rx,
        } = self;

        info!(
            topic = %request.topic,
            brokers = %client.brokers(),
            start = %request.window_start,
            end = %request.window_end,
            filter = ?request.filter.as_ref().map(|f| f.pattern()),
            progress = request.progress_interval,
            count = ?request.max_matches,
            "Starting scrape"
        );

        let resolved = WindowResolver::new(&client, metadata_timeout)
            .resolve(&request)
            .await;
        let ranges = match resolved {
            Ok(ranges) => ranges,
            Err(e) => {
                if let Err(close_err) = client.close().await {
                    warn!(error = %close_err, "Failed to close Kafka consumer");
                }
                return Err(e);
            }
        };

        let summary = Scanner::new(client, out, poll_timeout, shutdown_rx)
            .scan(&ranges, &request)
            .await;

        // Keep our own sender alive for the whole scan; dropping the last
        // sender counts as a shutdown.
        drop(shutdown_tx);
        summary
    }
}
