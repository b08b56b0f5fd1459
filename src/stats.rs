//! Reduce collected metric records into aggregate statistics.
//!
//! [`AggregateStatistics::reduce`] is a pure function of the multiset of records it is
//! given: the order records arrived in never changes the result. Durations are sorted
//! once per grouping and every order statistic (min, median, percentiles, max) is read
//! from that sorted array. Sums are taken over integer [`Duration`]s, so means are exact
//! regardless of input order.
//!
//! Percentiles use the nearest-rank method. The median is the middle value of an odd
//! sample, and the average of the two middle values of an even sample.

use chrono::{DateTime, TimeZone, Utc};
use itertools::Itertools;
use num_format::{Locale, ToFormattedString};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use strum_macros::Display;

use crate::metrics::MetricRecord;
use crate::util;

/// How many endpoints the summary lists.
const TOP_ENDPOINTS: usize = 10;
/// How many distinct errors the summary lists.
const TOP_ERRORS: usize = 5;

/// Statistics over every record of a load test.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GlobalStatistics {
    pub total_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    /// Percentage of calls that succeeded.
    pub success_rate: f64,
    /// Percentage of calls that failed.
    pub failure_rate: f64,
    /// Calls per second of wall-clock time between the first and last record.
    pub throughput: f64,
    /// Response times, in milliseconds.
    pub min_duration: f64,
    pub max_duration: f64,
    pub mean_duration: f64,
    pub median_duration: f64,
    pub p95_duration: f64,
    pub p99_duration: f64,
}

/// Statistics restricted to one scenario category.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ScenarioStatistics {
    pub count: usize,
    pub success_rate: f64,
    pub mean_duration: f64,
    pub min_duration: f64,
    pub max_duration: f64,
}

/// Statistics restricted to one endpoint, keyed as `METHOD /path/:template`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EndpointStatistics {
    pub count: usize,
    pub success_rate: f64,
    pub mean_duration: f64,
    pub p95_duration: f64,
}

/// Everything the reporting side needs to know about a load test.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AggregateStatistics {
    pub global: GlobalStatistics,
    pub by_scenario: BTreeMap<String, ScenarioStatistics>,
    /// Keyed as `METHOD /path/:template`, so `GET /interactions` and `POST /interactions`
    /// are reported separately rather than merged under the bare path.
    pub by_endpoint: BTreeMap<String, EndpointStatistics>,
    /// Transport error message to occurrence count.
    pub errors: BTreeMap<String, usize>,
}

/// Overall assessment printed at the end of the summary.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Verdict {
    #[strum(serialize = "excellent performance, all metrics within target")]
    Excellent,
    #[strum(serialize = "good performance, some room for improvement")]
    Good,
    #[strum(serialize = "performance needs attention, check errors and response times")]
    NeedsAttention,
}

/// Requests, latency and errors within one fixed window of wall-clock time.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeBucket {
    /// Start of the window.
    pub start: DateTime<Utc>,
    pub requests: usize,
    pub requests_per_second: f64,
    /// Mean response time in milliseconds, 0 for an empty window.
    pub mean_duration: f64,
    /// Percentage of calls in the window that failed.
    pub error_rate: f64,
}

/// Value at 1-based rank `ceil(p/100 * n)`, clamped to `[1, n]`, of an ascending slice.
///
/// Returns zero for an empty slice.
pub fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let n = sorted.len();
    let rank = (p * n as f64 / 100.0).ceil();
    let rank = if rank < 1.0 { 1 } else { (rank as usize).min(n) };
    sorted[rank - 1]
}

/// Median of an ascending slice, averaging the two middle values when the length is even.
///
/// Returns zero for an empty slice.
pub fn median(sorted: &[Duration]) -> Duration {
    let n = sorted.len();
    match n {
        0 => Duration::ZERO,
        n if n % 2 == 1 => sorted[n / 2],
        n => (sorted[n / 2 - 1] + sorted[n / 2]) / 2,
    }
}

fn as_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1_000.0
}

fn rate(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn mean_ms(sorted: &[Duration]) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    as_ms(sorted.iter().sum::<Duration>()) / sorted.len() as f64
}

fn sorted_durations<'a, I>(records: I) -> Vec<Duration>
where
    I: Iterator<Item = &'a MetricRecord>,
{
    let mut durations: Vec<Duration> = records.map(|r| r.duration).collect();
    durations.sort_unstable();
    durations
}

impl AggregateStatistics {
    /// Reduce a collection of records to aggregate statistics.
    ///
    /// An empty collection yields all-zero statistics.
    pub fn reduce(records: &[MetricRecord]) -> AggregateStatistics {
        if records.is_empty() {
            return AggregateStatistics::default();
        }

        let durations = sorted_durations(records.iter());
        let total_count = records.len();
        let success_count = records.iter().filter(|r| r.success).count();
        let failure_count = total_count - success_count;

        // Non-empty, so min and max exist.
        let (first, last) = records
            .iter()
            .map(|r| r.timestamp)
            .minmax()
            .into_option()
            .unwrap_or((records[0].timestamp, records[0].timestamp));
        let span = (last - first)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let throughput = total_count as f64 / span.max(1.0);

        let global = GlobalStatistics {
            total_count,
            success_count,
            failure_count,
            success_rate: rate(success_count, total_count),
            failure_rate: rate(failure_count, total_count),
            throughput,
            min_duration: as_ms(durations[0]),
            max_duration: as_ms(durations[total_count - 1]),
            mean_duration: mean_ms(&durations),
            median_duration: as_ms(median(&durations)),
            p95_duration: as_ms(percentile(&durations, 95.0)),
            p99_duration: as_ms(percentile(&durations, 99.0)),
        };

        let mut by_scenario = BTreeMap::new();
        for (scenario, group) in &records.iter().into_group_map_by(|r| r.scenario.clone()) {
            let durations = sorted_durations(group.iter().copied());
            let successes = group.iter().filter(|r| r.success).count();
            by_scenario.insert(
                scenario.clone(),
                ScenarioStatistics {
                    count: group.len(),
                    success_rate: rate(successes, group.len()),
                    mean_duration: mean_ms(&durations),
                    min_duration: as_ms(durations[0]),
                    max_duration: as_ms(durations[durations.len() - 1]),
                },
            );
        }

        let mut by_endpoint = BTreeMap::new();
        for (endpoint, group) in &records.iter().into_group_map_by(|r| r.endpoint_key()) {
            let durations = sorted_durations(group.iter().copied());
            let successes = group.iter().filter(|r| r.success).count();
            by_endpoint.insert(
                endpoint.clone(),
                EndpointStatistics {
                    count: group.len(),
                    success_rate: rate(successes, group.len()),
                    mean_duration: mean_ms(&durations),
                    p95_duration: as_ms(percentile(&durations, 95.0)),
                },
            );
        }

        // Application failures carry no error message and are left out.
        let mut errors = BTreeMap::new();
        for record in records.iter().filter(|r| !r.success && !r.error.is_empty()) {
            *errors.entry(record.error.clone()).or_insert(0) += 1;
        }

        AggregateStatistics {
            global,
            by_scenario,
            by_endpoint,
            errors,
        }
    }

    /// Overall assessment of the run.
    pub fn verdict(&self) -> Verdict {
        let global = &self.global;
        if global.success_rate >= 99.0 && global.p95_duration < 200.0 {
            Verdict::Excellent
        } else if global.success_rate >= 95.0 && global.p95_duration < 500.0 {
            Verdict::Good
        } else {
            Verdict::NeedsAttention
        }
    }

    /// The busiest endpoints, most calls first, ties broken by name.
    pub fn top_endpoints(&self, limit: usize) -> Vec<(&String, &EndpointStatistics)> {
        self.by_endpoint
            .iter()
            .sorted_by(|a, b| b.1.count.cmp(&a.1.count).then_with(|| a.0.cmp(b.0)))
            .take(limit)
            .collect()
    }

    /// The most frequent errors, most occurrences first, ties broken by message.
    pub fn top_errors(&self, limit: usize) -> Vec<(&String, usize)> {
        self.errors
            .iter()
            .sorted_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)))
            .take(limit)
            .map(|(message, count)| (message, *count))
            .collect()
    }

    fn fmt_global(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let global = &self.global;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>13} | {:>13} | {:>9} | {:>9}",
            "Requests", "# total", "# fails", "success", "req/s"
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>13} | {:>13} | {:>8.2}% | {:>9.2}",
            "Aggregated",
            global.total_count.to_formatted_string(&Locale::en),
            global.failure_count.to_formatted_string(&Locale::en),
            global.success_rate,
            global.throughput,
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<11} | {:>9} | {:>9} | {:>9} | {:>9} | {:>9} | {:>9}",
            "Time (ms)", "min", "max", "mean", "median", "p95", "p99"
        )?;
        writeln!(
            fmt,
            " {:<11} | {:>9.2} | {:>9.2} | {:>9.2} | {:>9.2} | {:>9.2} | {:>9.2}",
            "Aggregated",
            global.min_duration,
            global.max_duration,
            global.mean_duration,
            global.median_duration,
            global.p95_duration,
            global.p99_duration,
        )
    }

    fn fmt_scenarios(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        if self.by_scenario.is_empty() {
            return Ok(());
        }
        writeln!(
            fmt,
            "\n === PER SCENARIO METRICS ===\n ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<18} | {:>11} | {:>9} | {:>9} | {:>9} | {:>9}",
            "Name", "# reqs", "success", "avg (ms)", "min (ms)", "max (ms)"
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        for (name, scenario) in &self.by_scenario {
            writeln!(
                fmt,
                " {:<18} | {:>11} | {:>8.2}% | {:>9.2} | {:>9.2} | {:>9.2}",
                util::truncate_string(name, 18),
                scenario.count.to_formatted_string(&Locale::en),
                scenario.success_rate,
                scenario.mean_duration,
                scenario.min_duration,
                scenario.max_duration,
            )?;
        }
        Ok(())
    }

    fn fmt_endpoints(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        if self.by_endpoint.is_empty() {
            return Ok(());
        }
        writeln!(
            fmt,
            "\n === TOP ENDPOINTS BY VOLUME ===\n ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<34} | {:>9} | {:>8} | {:>8} | {:>8}",
            "Name", "# reqs", "success", "avg (ms)", "p95 (ms)"
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        for (name, endpoint) in self.top_endpoints(TOP_ENDPOINTS) {
            writeln!(
                fmt,
                " {:<34} | {:>9} | {:>7.1}% | {:>8.2} | {:>8.2}",
                util::truncate_string(name, 34),
                endpoint.count.to_formatted_string(&Locale::en),
                endpoint.success_rate,
                endpoint.mean_duration,
                endpoint.p95_duration,
            )?;
        }
        Ok(())
    }

    fn fmt_errors(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        if self.errors.is_empty() {
            return Ok(());
        }
        writeln!(
            fmt,
            "\n === TOP ERRORS ===\n ------------------------------------------------------------------------------"
        )?;
        writeln!(fmt, " {:<11} | Error", "# count")?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        for (message, count) in self.top_errors(TOP_ERRORS) {
            writeln!(
                fmt,
                " {:<11} | {}",
                count.to_formatted_string(&Locale::en),
                util::truncate_string(message, 62),
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for AggregateStatistics {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.fmt_global(fmt)?;
        self.fmt_scenarios(fmt)?;
        self.fmt_endpoints(fmt)?;
        self.fmt_errors(fmt)?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(fmt, " Verdict: {}", self.verdict())
    }
}

/// Group records into fixed windows of wall-clock time.
///
/// Windows are aligned to multiples of `bucket` since the Unix epoch and run from the
/// window holding the earliest record to the window holding the latest one, with empty
/// windows in between reported as zero. A `bucket` under one second is treated as one
/// second.
pub fn time_series(records: &[MetricRecord], bucket: Duration) -> Vec<TimeBucket> {
    let bucket_ms = (bucket.as_millis() as i64).max(1_000);
    let window = |record: &&MetricRecord| {
        record.timestamp.timestamp_millis().div_euclid(bucket_ms)
    };

    let grouped = records.iter().into_group_map_by(window);
    let (first, last) = match grouped.keys().copied().minmax().into_option() {
        Some(bounds) => bounds,
        None => return Vec::new(),
    };

    let seconds = bucket_ms as f64 / 1_000.0;
    (first..=last)
        .filter_map(|key| {
            let start = Utc.timestamp_millis_opt(key * bucket_ms).single()?;
            Some(match grouped.get(&key) {
                Some(group) => {
                    let durations = sorted_durations(group.iter().copied());
                    let failures = group.iter().filter(|r| !r.success).count();
                    TimeBucket {
                        start,
                        requests: group.len(),
                        requests_per_second: group.len() as f64 / seconds,
                        mean_duration: mean_ms(&durations),
                        error_rate: rate(failures, group.len()),
                    }
                }
                None => TimeBucket {
                    start,
                    requests: 0,
                    requests_per_second: 0.0,
                    mean_duration: 0.0,
                    error_rate: 0.0,
                },
            })
        })
        .collect()
}
