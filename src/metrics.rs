//! Metric records and their collection during a load test.
//!
//! Every HTTP call a virtual user makes produces exactly one [`MetricRecord`]. Records are
//! pushed onto a bounded [`flume`](https://docs.rs/flume) channel shared by all users and
//! drained by a single [`aggregator_main`] task, which appends them to a
//! [`MetricsAggregator`]. When the load test ends the collected records are reduced into
//! [`AggregateStatistics`](../stats/struct.AggregateStatistics.html) and returned to the
//! caller inside [`LoadTestMetrics`].

use chrono::{DateTime, Local, Utc};
use num_format::{Locale, ToFormattedString};
use std::fmt;
use std::time::Duration;

use crate::stats::AggregateStatistics;
use crate::util;

/// One timed observation of one HTTP call.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricRecord {
    /// When the call returned, or failed.
    pub timestamp: DateTime<Utc>,
    /// Scenario category the call is tagged with, ie `movies`.
    pub scenario: String,
    /// Path template of the call, ie `/movies/:id`, never the literal URL.
    pub endpoint: String,
    /// HTTP verb, ie `GET`.
    pub method: String,
    /// Response status code, `0` if the server was never reached.
    pub status_code: u16,
    /// Time from sending the request until the response body was read.
    pub duration: Duration,
    /// The call completed and returned a status code the endpoint expects.
    pub success: bool,
    /// Transport error message, empty if the call completed.
    pub error: String,
}
impl MetricRecord {
    /// Duration in fractional milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1_000.0
    }

    /// The key a record is grouped under in per-endpoint statistics, ie `GET /movies/:id`.
    pub fn endpoint_key(&self) -> String {
        format!("{} {}", self.method, self.endpoint)
    }
}

/// Append-only collection of every record received during a load test.
///
/// Records are kept in arrival order, which is a valid interleaving of the per-user
/// sequences but not reproducible from one run to the next.
#[derive(Clone, Debug, Default)]
pub struct MetricsAggregator {
    records: Vec<MetricRecord>,
}
impl MetricsAggregator {
    pub fn new() -> Self {
        MetricsAggregator::default()
    }

    /// Append one record.
    pub fn add(&mut self, record: MetricRecord) {
        self.records.push(record);
    }

    /// All records collected so far.
    pub fn snapshot(&self) -> &[MetricRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consume the aggregator, returning its records.
    pub fn into_records(self) -> Vec<MetricRecord> {
        self.records
    }
}

/// Drain the metrics channel until every sender is gone.
///
/// Runs as its own task for the whole load test. Returns once all virtual users and the
/// scheduler have dropped their senders, so no record is lost.
pub(crate) async fn aggregator_main(receiver: flume::Receiver<MetricRecord>) -> MetricsAggregator {
    let mut aggregator = MetricsAggregator::new();
    while let Ok(record) = receiver.recv_async().await {
        trace!(
            "received {} {} {} in {:?}",
            record.method,
            record.endpoint,
            record.status_code,
            record.duration
        );
        aggregator.add(record);
    }
    debug!("metrics channel closed after {} records", aggregator.len());
    aggregator
}

/// Hand one record to the aggregator, waiting for room if the channel is full.
///
/// Only fails once the aggregator is gone, which happens after the load test ended.
pub(crate) async fn emit(sender: &flume::Sender<MetricRecord>, record: MetricRecord) {
    if let Err(e) = sender.send_async(record).await {
        debug!("failed to send metric record to aggregator: {}", e);
    }
}

/// The result of a completed load test.
#[derive(Clone, Debug, Default)]
pub struct LoadTestMetrics {
    /// When the first virtual user was launched.
    pub started: Option<DateTime<Local>>,
    /// How many seconds the load test ran, ramp-up included.
    pub duration: usize,
    /// How many virtual users were launched.
    pub users: usize,
    /// Every record collected, in arrival order.
    pub records: Vec<MetricRecord>,
    /// Statistics reduced from `records`.
    pub statistics: AggregateStatistics,
}
impl LoadTestMetrics {
    /// Reduce a finished run's records into metrics.
    pub(crate) fn from_records(
        started: Option<DateTime<Local>>,
        duration: usize,
        users: usize,
        records: Vec<MetricRecord>,
    ) -> Self {
        let statistics = AggregateStatistics::reduce(&records);
        LoadTestMetrics {
            started,
            duration,
            users,
            records,
            statistics,
        }
    }
}

impl fmt::Display for LoadTestMetrics {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            fmt,
            "\n === PERFORMANCE TEST SUMMARY ===\n ------------------------------------------------------------------------------"
        )?;
        if let Some(started) = self.started {
            writeln!(fmt, " Started:  {}", started.format("%Y-%m-%d %H:%M:%S"))?;
        }
        writeln!(
            fmt,
            " Duration: {}",
            util::format_timespan(self.duration as u64)
        )?;
        writeln!(
            fmt,
            " Users:    {}",
            self.users.to_formatted_string(&Locale::en)
        )?;
        write!(fmt, "{}", self.statistics)
    }
}
