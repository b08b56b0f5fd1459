//! # Marquee
//!
//! Marquee drives synthetic load against the movie recommendation REST API, measuring
//! latency and error behavior under concurrent traffic.
//!
//! A load test brings up a configurable number of virtual users, spread evenly over a
//! ramp-up window. Each virtual user registers its own account, records a few warm-up
//! views, then loops picking weighted random actions from one scenario category until
//! the test duration expires. Every HTTP call produces one
//! [`MetricRecord`](./metrics/struct.MetricRecord.html), which is funneled through a
//! bounded channel to a single aggregator. When the load test ends the records are
//! written to a CSV file and reduced into
//! [`AggregateStatistics`](./stats/struct.AggregateStatistics.html).
//!
//! Marquee uses [`reqwest`](https://docs.rs/reqwest/) for HTTP and
//! [`tokio`](https://docs.rs/tokio/) to run virtual users concurrently.
//!
//! ## Running a load test
//!
//! The `marquee` binary runs a load test configured from the command line and the
//! environment:
//!
//! ```bash
//! API_URL=http://localhost:3000 marquee --users 50 --ramp-up 30s --run-time 5m -s movies
//! ```
//!
//! The same load test can be started from Rust, optionally with a customized API table
//! or action weights:
//!
//! ```rust,no_run
//! use marquee::scenario::{Category, WeightTable};
//! use marquee::{LoadTest, MarqueeError};
//!
//! fn main() -> Result<(), MarqueeError> {
//!     let metrics = LoadTest::initialize()?
//!         .set_weights(WeightTable::default().set_category_weight(Category::Movies, 3))
//!         .execute()?;
//!     println!("{} requests", metrics.statistics.global.total_count);
//!     Ok(())
//! }
//! ```
//!
//! ## Load test phases
//!
//! 1. **Setup**: configuration is resolved and validated, the host is checked for
//!    reachability, and the results file is created. Any failure here stops the load
//!    test before a single virtual user starts.
//! 2. **Starting**: one virtual user is launched every `ramp-up / users` seconds.
//! 3. **Running**: all users are running; progress is logged every few seconds.
//! 4. **Stopping**: every user is told to exit, and the scheduler waits for them. A
//!    user in the middle of an HTTP call finishes that call first, so stopping can take
//!    up to the configured HTTP timeout.
//! 5. **Shutdown**: records are written and the summary is printed.
//!
//! Pressing ctrl-c once skips ahead to the stopping phase; pressing it again exits
//! immediately.
//!
//! ## License
//!
//! Copyright 2020-21 Jeremy Andrews
//!
//! Licensed under the Apache License, Version 2.0 (the "License");
//! you may not use this file except in compliance with the License.
//! You may obtain a copy of the License at
//!
//! <http://www.apache.org/licenses/LICENSE-2.0>
//!
//! Unless required by applicable law or agreed to in writing, software
//! distributed under the License is distributed on an "AS IS" BASIS,
//! WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//! See the License for the specific language governing permissions and
//! limitations under the License.

#[macro_use]
extern crate log;

pub mod api;
pub mod client;
pub mod config;
pub mod logger;
pub mod metrics;
pub mod scenario;
pub mod stats;
pub mod user;
pub mod util;

use chrono::prelude::*;
use gumdrop::Options;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use std::{fmt, io};
use tokio::runtime::Runtime;
use tokio::time::Instant;

use crate::api::ApiTable;
use crate::client::ApiClient;
use crate::config::LoadTestConfiguration;
use crate::metrics::LoadTestMetrics;
use crate::scenario::WeightTable;
use crate::user::{Session, UserCommand, UserSettings};

/// Set by the ctrl-c handler, ending the load test early.
pub(crate) static CANCELED: AtomicBool = AtomicBool::new(false);

/// Never sleep longer than this while waiting, so cancellation is noticed quickly.
const MAXIMUM_WAIT: Duration = Duration::from_millis(500);

/// An enumeration of all errors a [`LoadTest`](./struct.LoadTest.html) can return.
///
/// Failed HTTP calls made by virtual users are not errors: they are recorded as
/// [`MetricRecord`](./metrics/struct.MetricRecord.html)s and measured.
#[derive(Debug)]
pub enum MarqueeError {
    /// Wraps a [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html).
    Io(io::Error),
    /// Wraps a [`reqwest::Error`](https://docs.rs/reqwest/*/reqwest/struct.Error.html).
    Reqwest(reqwest::Error),
    /// Wraps a ['tokio::task::JoinError'](https://tokio-rs.github.io/tokio/doc/tokio/task/struct.JoinError.html).
    TokioJoin(tokio::task::JoinError),
    /// Wraps a [`csv::Error`](https://docs.rs/csv/*/csv/struct.Error.html).
    Csv(csv::Error),
    /// Failed to parse a hostname.
    InvalidHost {
        /// The invalid hostname that caused this error.
        host: String,
        /// An optional explanation of the error.
        detail: String,
        /// Wraps a [`url::ParseError`](https://docs.rs/url/*/url/enum.ParseError.html).
        parse_error: url::ParseError,
    },
    /// Invalid option or value specified, may only be invalid in context.
    InvalidOption {
        /// The invalid option that caused this error, may be only invalid in context.
        option: String,
        /// The invalid value that caused this error, may be only invalid in context.
        value: String,
        /// An optional explanation of the error.
        detail: String,
    },
    /// The host didn't answer before the load test started.
    Unreachable {
        /// The URL that was checked.
        host: String,
        /// The transport error.
        detail: String,
    },
    /// A request record file couldn't be read back.
    InvalidRecord {
        /// 1-based line of the offending row.
        line: u64,
        /// What was wrong with it.
        detail: String,
    },
}
/// Implement a helper to provide a text description of all possible types of errors.
impl MarqueeError {
    fn describe(&self) -> &str {
        match *self {
            MarqueeError::Io(_) => "io::Error",
            MarqueeError::Reqwest(_) => "reqwest::Error",
            MarqueeError::TokioJoin(_) => "tokio::task::JoinError",
            MarqueeError::Csv(_) => "csv::Error",
            MarqueeError::InvalidHost { .. } => "failed to parse hostname",
            MarqueeError::InvalidOption { .. } => "invalid option or value specified",
            MarqueeError::Unreachable { .. } => "host is unreachable",
            MarqueeError::InvalidRecord { .. } => "invalid request record",
        }
    }
}

/// Implement format trait to allow displaying errors.
impl fmt::Display for MarqueeError {
    // Implement display of error with `{}` marker.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            MarqueeError::Io(ref source) => {
                write!(f, "MarqueeError: {} ({})", self.describe(), source)
            }
            MarqueeError::Reqwest(ref source) => {
                write!(f, "MarqueeError: {} ({})", self.describe(), source)
            }
            MarqueeError::TokioJoin(ref source) => {
                write!(f, "MarqueeError: {} ({})", self.describe(), source)
            }
            MarqueeError::Csv(ref source) => {
                write!(f, "MarqueeError: {} ({})", self.describe(), source)
            }
            MarqueeError::InvalidHost {
                ref parse_error, ..
            } => write!(f, "MarqueeError: {} ({})", self.describe(), parse_error),
            MarqueeError::InvalidOption { ref detail, .. } => {
                write!(f, "MarqueeError: {} ({})", self.describe(), detail)
            }
            MarqueeError::Unreachable {
                ref host,
                ref detail,
            } => write!(f, "MarqueeError: {} ({}: {})", self.describe(), host, detail),
            MarqueeError::InvalidRecord {
                line, ref detail, ..
            } => write!(
                f,
                "MarqueeError: {} (line {}: {})",
                self.describe(),
                line,
                detail
            ),
        }
    }
}

// Define the lower level source of this error, if any.
impl std::error::Error for MarqueeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            MarqueeError::Io(ref source) => Some(source),
            MarqueeError::Reqwest(ref source) => Some(source),
            MarqueeError::TokioJoin(ref source) => Some(source),
            MarqueeError::Csv(ref source) => Some(source),
            MarqueeError::InvalidHost {
                ref parse_error, ..
            } => Some(parse_error),
            _ => None,
        }
    }
}

/// Auto-convert Reqwest errors.
impl From<reqwest::Error> for MarqueeError {
    fn from(err: reqwest::Error) -> MarqueeError {
        MarqueeError::Reqwest(err)
    }
}

/// Auto-convert IO errors.
impl From<io::Error> for MarqueeError {
    fn from(err: io::Error) -> MarqueeError {
        MarqueeError::Io(err)
    }
}

/// Auto-convert TokioJoin errors.
impl From<tokio::task::JoinError> for MarqueeError {
    fn from(err: tokio::task::JoinError) -> MarqueeError {
        MarqueeError::TokioJoin(err)
    }
}

/// Auto-convert CSV errors.
impl From<csv::Error> for MarqueeError {
    fn from(err: csv::Error) -> MarqueeError {
        MarqueeError::Csv(err)
    }
}

/// Everything the ramp scheduler needs to run one load test.
///
/// Built from a [`LoadTestConfiguration`] by [`LoadTest::execute`], or directly by
/// callers that manage their own configuration.
#[derive(Clone, Debug)]
pub struct RampPlan {
    /// Base URL every endpoint path is appended to, ie `http://localhost:3000/api`.
    pub base_url: String,
    /// How many virtual users to launch.
    pub users: usize,
    /// Window over which users are launched.
    pub ramp_up: Duration,
    /// How long to run once every user has launched.
    pub run_time: Duration,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    /// How often to log progress while running.
    pub progress_interval: Duration,
    /// How many records may wait for the aggregator before users block.
    pub channel_capacity: usize,
    /// Behavior shared by every virtual user.
    pub settings: UserSettings,
    /// The endpoints being load tested.
    pub api: Arc<ApiTable>,
}
impl RampPlan {
    /// Delay between two user launches.
    pub fn stagger(&self) -> Duration {
        if self.users == 0 {
            Duration::ZERO
        } else {
            self.ramp_up / self.users as u32
        }
    }
}

/// Global internal state for the load test.
pub struct LoadTest {
    /// Configuration object holding options set when launching the load test.
    configuration: LoadTestConfiguration,
    /// How each endpoint is called.
    api: ApiTable,
    /// How likely each action is.
    weights: WeightTable,
}
impl LoadTest {
    /// Load configuration from the command line and initialize a [`LoadTest`].
    ///
    /// # Example
    /// ```rust,no_run
    /// use marquee::LoadTest;
    ///
    /// let load_test = LoadTest::initialize();
    /// ```
    pub fn initialize() -> Result<LoadTest, MarqueeError> {
        Ok(LoadTest::initialize_with_config(
            LoadTestConfiguration::parse_args_default_or_exit(),
        ))
    }

    /// Initialize a [`LoadTest`] with an already loaded configuration.
    ///
    /// This is generally used by tests.
    ///
    /// # Example
    /// ```rust
    /// use marquee::LoadTest;
    /// use marquee::config::LoadTestConfiguration;
    /// use gumdrop::Options;
    ///
    /// let configuration = LoadTestConfiguration::parse_args_default(&["--users", "5"]).unwrap();
    /// let load_test = LoadTest::initialize_with_config(configuration);
    /// ```
    pub fn initialize_with_config(configuration: LoadTestConfiguration) -> LoadTest {
        LoadTest {
            configuration,
            api: ApiTable::default(),
            weights: WeightTable::default(),
        }
    }

    /// Replace the table describing how each endpoint is called.
    pub fn set_api(mut self, api: ApiTable) -> Self {
        self.api = api;
        self
    }

    /// Replace the action weights.
    pub fn set_weights(mut self, weights: WeightTable) -> Self {
        self.weights = weights;
        self
    }

    // Build the explicit run parameters from the resolved configuration.
    fn plan(&self) -> Result<RampPlan, MarqueeError> {
        let configuration = &self.configuration;
        let seconds = |timespan: &str| Duration::from_secs(util::parse_timespan(timespan) as u64);
        let millis = |value: Option<usize>, default: usize| {
            Duration::from_millis(value.unwrap_or(default) as u64)
        };
        Ok(RampPlan {
            base_url: util::join_base_url(&configuration.host, &configuration.base_path),
            users: configuration.users.unwrap_or(config::DEFAULT_USERS),
            ramp_up: seconds(&configuration.ramp_up),
            run_time: seconds(&configuration.run_time),
            timeout: seconds(&configuration.timeout),
            progress_interval: seconds(&configuration.progress_interval),
            channel_capacity: configuration
                .channel_capacity
                .unwrap_or(config::DEFAULT_CHANNEL_CAPACITY),
            settings: UserSettings {
                category: configuration.category()?,
                iteration_delay: millis(
                    configuration.iteration_delay,
                    config::DEFAULT_ITERATION_DELAY,
                ),
                user_stagger: millis(configuration.user_stagger, config::DEFAULT_USER_STAGGER),
                warmup: configuration.warmup.unwrap_or(config::DEFAULT_WARMUP),
                weights: Arc::new(self.weights.clone()),
            },
            api: Arc::new(self.api.clone()),
        })
    }

    /// Execute the load test.
    ///
    /// Resolves and validates configuration, checks the host, runs the load test to
    /// completion, writes every request record to the results file and prints a summary.
    pub fn execute(mut self) -> Result<LoadTestMetrics, MarqueeError> {
        // If version flag is set, display package name and version and exit.
        if self.configuration.version {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            std::process::exit(0);
        }

        self.configuration.configure();
        self.configuration.validate()?;
        let plan = self.plan()?;

        info!("=== MOVIE RECOMMENDATION API LOAD TEST ===");
        info!("API URL:        {}", plan.base_url);
        info!("Users:          {}", plan.users);
        info!("Test duration:  {:?}", plan.run_time);
        info!("Ramp-up:        {:?}", plan.ramp_up);
        info!("Scenario:       {}", plan.settings.category);

        let rt = Runtime::new()?;
        let metrics = rt.block_on(async {
            if self.configuration.no_preflight {
                debug!("skipping preflight check");
            } else {
                client::preflight(&plan.base_url, plan.timeout).await?;
            }
            let (path, file) =
                logger::create_output(&self.configuration.results_dir, &self.configuration.output)?;

            util::setup_ctrlc_handler();
            let metrics = run_attack(&plan).await?;

            logger::write_records_to(file, &metrics.records)?;
            info!(
                "wrote {} request records to {}",
                metrics.records.len(),
                path.display()
            );
            Ok::<LoadTestMetrics, MarqueeError>(metrics)
        })?;

        if !self.configuration.no_summary {
            println!("{}", metrics);
        }
        Ok(metrics)
    }
}

// Sleep until `deadline`, waking at least every half second. Returns true if canceled.
async fn wait_until(deadline: Instant) -> bool {
    loop {
        if util::canceled() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep_until(deadline.min(now + MAXIMUM_WAIT)).await;
    }
}

/// Run the ramp scheduler: launch virtual users, let them run, stop them, and reduce
/// everything they recorded.
///
/// One user is launched every [`RampPlan::stagger`], sleeping before each launch. Once
/// all users are running the scheduler waits out [`RampPlan::run_time`], then tells every
/// user to exit and waits for all of them. There is no additional timeout: a user stuck
/// in an HTTP call holds up the return for at most [`RampPlan::timeout`].
///
/// With no users this returns empty metrics immediately.
pub async fn run_attack(plan: &RampPlan) -> Result<LoadTestMetrics, MarqueeError> {
    if plan.users == 0 {
        info!("no users to launch");
        return Ok(LoadTestMetrics::default());
    }

    // Build every client first so a setup failure happens before any user launches.
    let clients = (0..plan.users)
        .map(|_| ApiClient::new(&plan.base_url, plan.timeout, plan.api.clone()))
        .collect::<Result<Vec<ApiClient>, MarqueeError>>()?;

    let (metrics_tx, metrics_rx) = flume::bounded(plan.channel_capacity.max(1));
    let aggregator = tokio::spawn(metrics::aggregator_main(metrics_rx));
    let settings = Arc::new(plan.settings.clone());
    let stagger = plan.stagger();

    debug!("starting: launching {} users", plan.users);
    let started = Local::now();
    let started_timer = std::time::Instant::now();
    let ramp_started = Instant::now();
    let mut user_channels = Vec::with_capacity(plan.users);
    let mut users = Vec::with_capacity(plan.users);
    for (index, client) in clients.into_iter().enumerate() {
        // Launches are scheduled from the start of the ramp, so they don't drift.
        if wait_until(ramp_started + stagger * (index as u32 + 1)).await {
            info!("canceled after launching {} users", users.len());
            break;
        }

        // Create a per-user channel allowing the scheduler to control the user.
        let (parent_sender, user_receiver) = flume::unbounded();
        user_channels.push(parent_sender);
        users.push(tokio::spawn(user::user_main(
            Session::new(index),
            client,
            settings.clone(),
            metrics_tx.clone(),
            user_receiver,
        )));

        let launched = index + 1;
        if launched % 10 == 0 || launched == plan.users {
            info!("started {}/{} users", launched, plan.users);
        }
    }
    // Only users hold senders now, so the aggregator finishes when the last one exits.
    drop(metrics_tx);
    info!("launched {} users...", users.len());

    debug!("running for {} seconds", plan.run_time.as_secs());
    let run_started = Instant::now();
    let deadline = run_started + plan.run_time;
    let progress_interval = plan.progress_interval.max(Duration::from_secs(1));
    let mut next_progress = run_started + progress_interval;
    loop {
        if wait_until(deadline.min(next_progress)).await {
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let elapsed = now - run_started;
        info!(
            "progress: {:.0}% ({} elapsed, {} remaining)",
            elapsed.as_secs_f64() * 100.0 / plan.run_time.as_secs_f64(),
            util::format_timespan(elapsed.as_secs()),
            util::format_timespan((deadline - now).as_secs())
        );
        next_progress += progress_interval;
    }

    info!(
        "stopping after {} seconds...",
        started_timer.elapsed().as_secs()
    );
    for (index, send_to_user) in user_channels.iter().enumerate() {
        match send_to_user.send(UserCommand::Exit) {
            Ok(_) => {
                debug!("telling user {} to exit", index);
            }
            Err(e) => {
                // The user already stopped, ie because registration failed.
                debug!("failed to tell user {} to exit: {}", index, e);
            }
        }
    }
    info!("waiting for users to exit");

    let launched = users.len();
    let mut registered = 0;
    for result in futures::future::join_all(users).await {
        match result {
            Ok(summary) if summary.registered => registered += 1,
            Ok(_) => (),
            Err(e) => warn!("user task failed: {}", e),
        }
    }
    debug!("all users exited, {} of {} registered", registered, launched);

    let aggregator = aggregator.await?;
    debug!("shutdown: {} records collected", aggregator.len());

    Ok(LoadTestMetrics::from_records(
        Some(started),
        started_timer.elapsed().as_secs() as usize,
        launched,
        aggregator.into_records(),
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::scenario::Category;

    fn plan(users: usize, ramp_up: u64) -> RampPlan {
        RampPlan {
            base_url: "http://127.0.0.1:1".to_string(),
            users,
            ramp_up: Duration::from_secs(ramp_up),
            run_time: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
            progress_interval: Duration::from_secs(5),
            channel_capacity: 10,
            settings: UserSettings {
                category: Category::All,
                iteration_delay: Duration::from_millis(100),
                user_stagger: Duration::from_millis(5),
                warmup: 0,
                weights: Arc::new(WeightTable::default()),
            },
            api: Arc::new(ApiTable::default()),
        }
    }

    #[test]
    fn stagger() {
        assert_eq!(plan(0, 10).stagger(), Duration::ZERO);
        assert_eq!(plan(4, 10).stagger(), Duration::from_millis(2_500));
        assert_eq!(plan(10, 0).stagger(), Duration::ZERO);
    }

    #[tokio::test]
    async fn no_users_returns_immediately() {
        let started = std::time::Instant::now();
        let metrics = run_attack(&plan(0, 60)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(metrics.records.is_empty());
        assert_eq!(metrics.users, 0);
        assert_eq!(metrics.statistics.global.total_count, 0);
        assert_eq!(metrics.statistics.global.success_count, 0);
        assert_eq!(metrics.statistics.global.failure_count, 0);
    }

    #[test]
    fn errors_display() {
        let error = MarqueeError::InvalidRecord {
            line: 3,
            detail: "expected 8 fields, found 2".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "MarqueeError: invalid request record (line 3: expected 8 fields, found 2)"
        );
        let error = MarqueeError::from(io::Error::new(io::ErrorKind::Other, "disk full"));
        assert_eq!(error.to_string(), "MarqueeError: io::Error (disk full)");
        assert!(std::error::Error::source(&error).is_some());
    }
}
