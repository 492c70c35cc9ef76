//! Bounded scan over resolved offset ranges.
//!
//! The scanner seeks every partition to its start offset and polls until
//! each partition's cursor has reached its end offset, the match cap is hit,
//! or shutdown is signalled. Matches go to the output writer, one per line;
//! progress dots accumulate on their own line in between.

use crate::config::ScrapeRequest;
use crate::kafka::{BrokerClient, KafkaRecord, PartitionId};
use crate::offsets::OffsetMap;
use crate::Result;
use chrono::{DateTime, SecondsFormat};
use std::collections::HashMap;
use std::io::{self, Write};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Marker printed for every full progress interval without a match.
const PROGRESS_MARKER: &str = ".";

/// Why the scan loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every partition reached its end offset
    Completed,
    /// The configured match cap was reached
    MatchLimit,
    /// Shutdown was signalled
    Cancelled,
}

/// Outcome of a finished scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    /// Records written to the output
    pub matches: u64,
    /// Records of the target topic seen while polling
    pub records_polled: u64,
    /// Why the scan stopped
    pub stop_reason: StopReason,
}

/// Mutable state of a single scan.
#[derive(Debug)]
pub struct ScanState {
    /// Highest offset seen per partition, starting just below the range
    cursor: HashMap<PartitionId, i64>,
    match_count: u64,
    no_match_streak: u64,
    records_polled: u64,
    /// A progress line has been started but not terminated
    line_open: bool,
}

impl ScanState {
    /// Fresh state for `ranges`. Each cursor starts at `start_offset - 1`,
    /// so empty ranges are done before anything is polled.
    pub fn new(ranges: &OffsetMap) -> Self {
        let cursor = ranges
            .iter()
            .map(|(partition, range)| (partition.clone(), range.start_offset - 1))
            .collect();

        Self {
            cursor,
            match_count: 0,
            no_match_streak: 0,
            records_polled: 0,
            line_open: false,
        }
    }

    /// Highest offset seen on `partition`.
    pub fn cursor(&self, partition: &PartitionId) -> Option<i64> {
        self.cursor.get(partition).copied()
    }

    /// Records emitted so far.
    pub fn match_count(&self) -> u64 {
        self.match_count
    }

    /// Records since the last match not yet turned into progress markers.
    pub fn no_match_streak(&self) -> u64 {
        self.no_match_streak
    }

    /// Advance the cursor of `partition`. Never moves backwards.
    pub fn observe(&mut self, partition: &PartitionId, offset: i64) {
        if let Some(cursor) = self.cursor.get_mut(partition) {
            *cursor = (*cursor).max(offset);
        }
    }

    /// Whether every partition has reached its end offset.
    pub fn is_done(&self, ranges: &OffsetMap) -> bool {
        ranges.iter().all(|(partition, range)| {
            self.cursor
                .get(partition)
                .is_some_and(|cursor| *cursor >= range.end_offset)
        })
    }

    /// Whether `max_matches` records have been emitted.
    pub fn limit_reached(&self, max_matches: Option<u64>) -> bool {
        max_matches.is_some_and(|max| self.match_count >= max)
    }

    /// Classify and emit one polled batch, then print progress markers.
    pub fn process_batch<W: Write>(
        &mut self,
        batch: &[KafkaRecord],
        request: &ScrapeRequest,
        out: &mut W,
    ) -> io::Result<()> {
        for record in batch.iter().filter(|r| r.topic == request.topic) {
            self.records_polled += 1;
            self.observe(&record.partition_id(), record.offset);

            if self.limit_reached(request.max_matches) {
                continue;
            }

            if is_match(record, request) {
                self.end_progress_line(out)?;
                writeln!(out, "{}", format_record(record))?;
                self.match_count += 1;
                self.no_match_streak = 0;
            } else {
                self.no_match_streak += 1;
            }
        }

        if request.progress_interval > 0 {
            while self.no_match_streak >= request.progress_interval {
                write!(out, "{PROGRESS_MARKER}")?;
                self.line_open = true;
                self.no_match_streak -= request.progress_interval;
            }
        }

        out.flush()
    }

    /// Terminate an open progress line and print the summary line.
    pub fn finish<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        self.end_progress_line(out)?;
        writeln!(out, "Received {} records", self.match_count)?;
        out.flush()
    }

    fn end_progress_line<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        if self.line_open {
            writeln!(out)?;
            self.line_open = false;
        }
        Ok(())
    }
}

/// Strictly between window start and window end.
pub fn in_window(record: &KafkaRecord, request: &ScrapeRequest) -> bool {
    request.start_millis() < record.timestamp && record.timestamp < request.end_millis()
}

/// No filter, or the filter matches the key or the value.
pub fn matches_filter(record: &KafkaRecord, request: &ScrapeRequest) -> bool {
    match &request.filter {
        None => true,
        Some(filter) => {
            filter.matches_record(record.key_text().as_deref(), record.value_text().as_deref())
        }
    }
}

/// A record that is emitted.
pub fn is_match(record: &KafkaRecord, request: &ScrapeRequest) -> bool {
    in_window(record, request) && matches_filter(record, request)
}

/// Render a match as `<timestamp> <key> <value>`.
pub fn format_record(record: &KafkaRecord) -> String {
    let timestamp = DateTime::from_timestamp_millis(record.timestamp)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        .unwrap_or_else(|| record.timestamp.to_string());
    let key = record.key_text();
    let value = record.value_text();

    format!(
        "{} {} {}",
        timestamp,
        key.as_deref().unwrap_or("null"),
        value.as_deref().unwrap_or("null")
    )
}

/// Drives the poll loop for one scan. Owns the broker connection and
/// closes it when the scan ends, whatever the reason.
pub struct Scanner<C: BrokerClient, W: Write> {
    client: C,
    out: W,
    poll_timeout: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl<C: BrokerClient, W: Write + Send> Scanner<C, W> {
    /// Create a scanner. A message on `shutdown`, or the sender going
    /// away, stops the scan at the next poll.
    pub fn new(
        client: C,
        out: W,
        poll_timeout: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            client,
            out,
            poll_timeout,
            shutdown,
        }
    }

    /// Scan `ranges` and write matches.
    ///
    /// The summary line is printed and the client closed on every exit
    /// path; a broker failure is returned after that.
    pub async fn scan(mut self, ranges: &OffsetMap, request: &ScrapeRequest) -> Result<ScanSummary> {
        let mut state = ScanState::new(ranges);
        let outcome = self.run(&mut state, ranges, request).await;

        let finished = state.finish(&mut self.out);
        if let Err(e) = self.client.close().await {
            warn!(error = %e, "Failed to close Kafka consumer");
        }

        let stop_reason = outcome?;
        finished?;

        let summary = ScanSummary {
            matches: state.match_count,
            records_polled: state.records_polled,
            stop_reason,
        };
        info!(
            matches = summary.matches,
            records_polled = summary.records_polled,
            stop_reason = ?summary.stop_reason,
            "Scan finished"
        );
        Ok(summary)
    }

    async fn run(
        &mut self,
        state: &mut ScanState,
        ranges: &OffsetMap,
        request: &ScrapeRequest,
    ) -> Result<StopReason> {
        self.seek_to_start(ranges).await?;

        loop {
            if state.is_done(ranges) {
                return Ok(StopReason::Completed);
            }

            let batch = tokio::select! {
                biased;
                _ = self.shutdown.recv() => {
                    info!("Shutdown signalled, stopping scan");
                    return Ok(StopReason::Cancelled);
                }
                batch = self.client.poll(self.poll_timeout) => batch?,
            };

            debug!(records = batch.len(), "Polled batch");
            state.process_batch(&batch, request, &mut self.out)?;

            if state.limit_reached(request.max_matches) {
                return Ok(StopReason::MatchLimit);
            }
        }
    }

    async fn seek_to_start(&mut self, ranges: &OffsetMap) -> Result<()> {
        let partitions: Vec<PartitionId> = ranges.keys().cloned().collect();
        self.client.assign(&partitions).await?;

        for (partition, range) in ranges {
            self.client.seek(partition, range.start_offset).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::RecordFilter;
    use crate::offsets::PartitionRange;
    use chrono::Utc;

    fn request(start_ms: i64, end_ms: i64) -> ScrapeRequest {
        ScrapeRequest {
            brokers: vec!["localhost:9092".into()],
            topic: "t".into(),
            window_start: DateTime::from_timestamp_millis(start_ms).unwrap(),
            window_end: DateTime::from_timestamp_millis(end_ms).unwrap(),
            filter: None,
            progress_interval: 0,
            max_matches: None,
        }
    }

    fn record(partition: i32, offset: i64, timestamp: i64) -> KafkaRecord {
        KafkaRecord {
            topic: "t".into(),
            partition,
            offset,
            timestamp,
            key: Some(format!("k{offset}").into_bytes()),
            value: Some(format!("v{offset}").into_bytes()),
        }
    }

    fn ranges(entries: &[(i32, i64, i64)]) -> OffsetMap {
        entries
            .iter()
            .map(|&(p, start_offset, end_offset)| {
                (
                    PartitionId::new("t", p),
                    PartitionRange {
                        start_offset,
                        end_offset,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_boundaries_are_exclusive() {
        let request = request(100, 200);
        assert!(!in_window(&record(0, 0, 100), &request));
        assert!(in_window(&record(0, 1, 101), &request));
        assert!(in_window(&record(0, 2, 199), &request));
        assert!(!in_window(&record(0, 3, 200), &request));
    }

    #[test]
    fn test_filter_with_null_key() {
        let mut request = request(0, 1000);
        request.filter = Some(RecordFilter::new("v.*").unwrap());

        let mut keyless = record(0, 1, 10);
        keyless.key = None;
        assert!(matches_filter(&keyless, &request));

        keyless.value = None;
        assert!(!matches_filter(&keyless, &request));

        // Key matches even though the value does not
        request.filter = Some(RecordFilter::new("k7").unwrap());
        assert!(matches_filter(&record(0, 7, 10), &request));
    }

    #[test]
    fn test_cursor_is_monotonic() {
        let ranges = ranges(&[(0, 0, 10)]);
        let mut state = ScanState::new(&ranges);
        let partition = PartitionId::new("t", 0);
        assert_eq!(state.cursor(&partition), Some(-1));

        state.observe(&partition, 5);
        state.observe(&partition, 3);
        assert_eq!(state.cursor(&partition), Some(5));

        state.observe(&PartitionId::new("other", 0), 99);
        assert_eq!(state.cursor(&PartitionId::new("other", 0)), None);
    }

    #[test]
    fn test_out_of_order_batch_does_not_regress() {
        let ranges = ranges(&[(0, 0, 4)]);
        let mut state = ScanState::new(&ranges);
        let batch = vec![record(0, 4, 10), record(0, 2, 10), record(0, 3, 10)];

        let mut out = Vec::new();
        state
            .process_batch(&batch, &request(0, 1000), &mut out)
            .unwrap();
        assert_eq!(state.cursor(&PartitionId::new("t", 0)), Some(4));
        assert!(state.is_done(&ranges));
    }

    #[test]
    fn test_empty_range_is_done_immediately() {
        let ranges = ranges(&[(0, 5, 4), (1, 0, -1)]);
        assert!(ScanState::new(&ranges).is_done(&ranges));
    }

    #[test]
    fn test_done_requires_every_partition() {
        let ranges = ranges(&[(0, 0, 1), (1, 0, 1)]);
        let mut state = ScanState::new(&ranges);
        state.observe(&PartitionId::new("t", 0), 1);
        assert!(!state.is_done(&ranges));
        state.observe(&PartitionId::new("t", 1), 2);
        assert!(state.is_done(&ranges));
    }

    #[test]
    fn test_progress_markers() {
        let ranges = ranges(&[(0, 0, 100)]);
        let mut state = ScanState::new(&ranges);
        let mut request = request(1000, 2000);
        request.progress_interval = 3;

        // Seven records outside the window
        let batch: Vec<_> = (0..7).map(|o| record(0, o, 10)).collect();
        let mut out = Vec::new();
        state.process_batch(&batch, &request, &mut out).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "..");
        assert_eq!(state.no_match_streak(), 1);
    }

    #[test]
    fn test_match_terminates_progress_line() {
        let ranges = ranges(&[(0, 0, 100)]);
        let mut state = ScanState::new(&ranges);
        let mut request = request(50, 2000);
        request.progress_interval = 2;

        let mut out = Vec::new();
        state
            .process_batch(&[record(0, 0, 10), record(0, 1, 20)], &request, &mut out)
            .unwrap();
        state
            .process_batch(&[record(0, 2, 100)], &request, &mut out)
            .unwrap();
        state.finish(&mut out).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            ".\n1970-01-01T00:00:00.100Z k2 v2\nReceived 1 records\n"
        );
        assert_eq!(state.no_match_streak(), 0);
    }

    #[test]
    fn test_finish_closes_open_line() {
        let ranges = ranges(&[(0, 0, 100)]);
        let mut state = ScanState::new(&ranges);
        let mut request = request(1000, 2000);
        request.progress_interval = 1;

        let mut out = Vec::new();
        state
            .process_batch(&[record(0, 0, 10)], &request, &mut out)
            .unwrap();
        state.finish(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), ".\nReceived 0 records\n");
    }

    #[test]
    fn test_match_limit_stops_emitting() {
        let ranges = ranges(&[(0, 0, 100)]);
        let mut state = ScanState::new(&ranges);
        let mut request = request(0, 1000);
        request.max_matches = Some(2);

        let batch: Vec<_> = (0..5).map(|o| record(0, o, 10 + o)).collect();
        let mut out = Vec::new();
        state.process_batch(&batch, &request, &mut out).unwrap();

        assert_eq!(state.match_count(), 2);
        assert!(state.limit_reached(request.max_matches));
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 2);
        assert_eq!(state.cursor(&PartitionId::new("t", 0)), Some(4));
    }

    #[test]
    fn test_other_topics_are_ignored() {
        let ranges = ranges(&[(0, 0, 100)]);
        let mut state = ScanState::new(&ranges);
        let mut foreign = record(0, 50, 10);
        foreign.topic = "u".into();

        let mut out = Vec::new();
        state
            .process_batch(&[foreign], &request(0, 1000), &mut out)
            .unwrap();
        assert_eq!(state.match_count(), 0);
        assert_eq!(state.cursor(&PartitionId::new("t", 0)), Some(-1));
    }

    #[test]
    fn test_format_record() {
        let mut rec = record(0, 3, 1_546_430_400_150);
        assert_eq!(format_record(&rec), "2019-01-02T12:00:00.150Z k3 v3");

        rec.key = None;
        rec.value = None;
        rec.timestamp = Utc::now().timestamp_millis() / 1000 * 1000;
        assert!(format_record(&rec).ends_with("Z null null"));
    }
}
