//! Functions and structures related to configuring a load test.
//!
//! A load test is configured at run time by the options and flags defined by the
//! [`LoadTestConfiguration`] structure. Every value is resolved with the same precedence:
//! a command line option wins, then an environment variable, then a built-in default.
//!
//! | option | environment | default |
//! |---|---|---|
//! | `--host` | `API_URL` | `http://localhost:3000` |
//! | `--base-path` | `API_BASE_PATH` | `/api` |
//! | `--users` | `CONCURRENT_USERS` | `10` |
//! | `--run-time` | `TEST_DURATION` | `60s` |
//! | `--ramp-up` | `RAMP_UP_DURATION` | `10s` |
//! | `--scenario` | `SCENARIO` | `all` |
//! | `--output` | `CSV_OUTPUT` | `performance_test.csv` |
//! | `--results-dir` | `RESULTS_DIR` | `./results` |
//! | `--timeout` | `HTTP_TIMEOUT` | `30s` |

use gumdrop::Options;
use simplelog::*;
use std::path::PathBuf;
use std::str::FromStr;

use crate::scenario::Category;
use crate::util;
use crate::MarqueeError;

pub(crate) const DEFAULT_HOST: &str = "http://localhost:3000";
pub(crate) const DEFAULT_BASE_PATH: &str = "/api";
pub(crate) const DEFAULT_USERS: usize = 10;
pub(crate) const DEFAULT_RUN_TIME: &str = "60s";
pub(crate) const DEFAULT_RAMP_UP: &str = "10s";
pub(crate) const DEFAULT_SCENARIO: &str = "all";
pub(crate) const DEFAULT_OUTPUT: &str = "performance_test.csv";
pub(crate) const DEFAULT_RESULTS_DIR: &str = "./results";
pub(crate) const DEFAULT_TIMEOUT: &str = "30s";
pub(crate) const DEFAULT_ITERATION_DELAY: usize = 100;
pub(crate) const DEFAULT_USER_STAGGER: usize = 5;
pub(crate) const DEFAULT_WARMUP: usize = 5;
pub(crate) const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;
pub(crate) const DEFAULT_PROGRESS_INTERVAL: &str = "5s";

/// Runtime options available when launching a load test.
///
/// Help for all of these options is generated by passing `-h` to the binary.
#[derive(Options, Debug, Clone, Default)]
#[options(
    help = r#"Marquee generates synthetic load against the movie recommendation REST API and
reports latency and error statistics.

The following runtime options are available when launching a load test:"#
)]
pub struct LoadTestConfiguration {
    /// Displays this help
    #[options(short = "h")]
    pub help: bool,
    /// Prints version information
    #[options(short = "V")]
    pub version: bool,

    /// Defines host to load test (ie http://localhost:3000)
    #[options(short = "H")]
    pub host: String,
    /// Sets API path prefix (default: /api)
    #[options(no_short, meta = "PATH")]
    pub base_path: String,
    /// Sets concurrent users (default: 10)
    #[options(short = "u")]
    pub users: Option<usize>,
    /// Starts users over (30s, 20m, 3h, 1h30m, etc)
    #[options(short = "r", meta = "TIME")]
    pub ramp_up: String,
    /// Stops load test after (30s, 20m, 3h, 1h30m, etc)
    #[options(short = "t", meta = "TIME")]
    pub run_time: String,
    /// Sets scenario (auth, movies, interactions, recommendations, all)
    #[options(short = "s", meta = "SCENARIO")]
    pub scenario: String,
    /// Sets per-request timeout (default: 30s)
    // Add a blank line and then an 'Output:' header after this option
    #[options(
        no_short,
        meta = "TIME",
        help = "Sets per-request timeout (default: 30s)\n\nOutput:"
    )]
    pub timeout: String,

    /// Sets request record file name
    #[options(short = "o", meta = "NAME")]
    pub output: String,
    /// Sets directory request records are written to
    #[options(no_short, meta = "DIR")]
    pub results_dir: String,
    /// How often to print progress while running
    #[options(no_short, meta = "TIME")]
    pub progress_interval: String,
    /// Doesn't display a summary at end of load test
    #[options(no_short)]
    pub no_summary: bool,
    /// Enables log file and sets name
    #[options(short = "G", meta = "NAME")]
    pub log_file: String,
    /// Increases log file level (-g, -gg, etc)
    #[options(short = "g", count)]
    pub log_level: u8,
    /// Decreases verbosity (-q, -qq, etc)
    #[options(count, short = "q", help = "Decreases verbosity (-q, -qq, etc)")]
    pub quiet: u8,
    /// Increases verbosity (-v, -vv, etc)
    #[options(
        count,
        short = "v",
        // Add a blank line and then an 'Advanced:' header after this option
        help = "Increases verbosity (-v, -vv, etc)\n\nAdvanced:"
    )]
    pub verbose: u8,

    /// Sets milliseconds each user sleeps between actions (default: 100)
    #[options(no_short, meta = "MS")]
    pub iteration_delay: Option<usize>,
    /// Adds milliseconds of sleep per user number (default: 5)
    #[options(no_short, meta = "MS")]
    pub user_stagger: Option<usize>,
    /// Sets how many views each user records after registering (default: 5)
    #[options(no_short, meta = "COUNT")]
    pub warmup: Option<usize>,
    /// Sets how many request records may be queued (default: 10000)
    #[options(no_short, meta = "COUNT")]
    pub channel_capacity: Option<usize>,
    /// Doesn't check the host is reachable before starting
    #[options(no_short)]
    pub no_preflight: bool,
}

/// Used internally to configure [`LoadTestConfiguration`] values based on precedence rules.
#[derive(Debug, Clone)]
pub(crate) struct ConfigValue<'a, T> {
    /// The optional value to set.
    pub(crate) value: Option<T>,
    /// Filter using this value if true.
    pub(crate) filter: bool,
    /// An optional INFO level log message.
    pub(crate) message: &'a str,
}

pub(crate) trait Configure<T> {
    /// Set [`ConfigValue`] with supported type.
    fn get_value(&self, values: Vec<ConfigValue<T>>) -> Option<T>;
}

impl<T: std::fmt::Display> Configure<T> for LoadTestConfiguration {
    /// Return the first unfiltered value, logging it if a message is set.
    fn get_value(&self, values: Vec<ConfigValue<T>>) -> Option<T> {
        for value in values {
            if let Some(v) = value.value {
                if value.filter {
                    continue;
                } else {
                    if !value.message.is_empty() {
                        info!("{} = {}", value.message, v)
                    }
                    return Some(v);
                }
            }
        }
        None
    }
}

impl LoadTestConfiguration {
    /// Implement precedence rules for all [`LoadTestConfiguration`] values, reading
    /// environment variables from the process environment.
    pub(crate) fn configure(&mut self) {
        self.configure_with_env(|name| std::env::var(name).ok());
    }

    /// Implement precedence rules, looking environment variables up with `env`.
    pub(crate) fn configure_with_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Initialize the logger first so configuration messages are visible.
        self.initialize_logger();

        self.host = self.string_value(&self.host, env("API_URL"), DEFAULT_HOST, "host");
        self.base_path = self.string_value(
            &self.base_path,
            env("API_BASE_PATH"),
            DEFAULT_BASE_PATH,
            "base_path",
        );

        // Configure `users`. An unparseable environment value is ignored.
        let env_users = env("CONCURRENT_USERS").and_then(|users| match users.parse() {
            Ok(users) => Some(users),
            Err(e) => {
                warn!("ignoring CONCURRENT_USERS={}: {}", users, e);
                None
            }
        });
        self.users = self.get_value(vec![
            // Use --users if set.
            ConfigValue {
                value: self.users,
                filter: false,
                message: "users",
            },
            // Otherwise use CONCURRENT_USERS if set.
            ConfigValue {
                value: env_users,
                filter: false,
                message: "users",
            },
            // Otherwise use the default.
            ConfigValue {
                value: Some(DEFAULT_USERS),
                filter: false,
                message: "users",
            },
        ]);

        self.run_time =
            self.string_value(&self.run_time, env("TEST_DURATION"), DEFAULT_RUN_TIME, "run_time");
        self.ramp_up = self.string_value(
            &self.ramp_up,
            env("RAMP_UP_DURATION"),
            DEFAULT_RAMP_UP,
            "ramp_up",
        );
        self.scenario =
            self.string_value(&self.scenario, env("SCENARIO"), DEFAULT_SCENARIO, "scenario");
        self.output = self.string_value(&self.output, env("CSV_OUTPUT"), DEFAULT_OUTPUT, "output");
        self.results_dir = self.string_value(
            &self.results_dir,
            env("RESULTS_DIR"),
            DEFAULT_RESULTS_DIR,
            "results_dir",
        );
        self.timeout =
            self.string_value(&self.timeout, env("HTTP_TIMEOUT"), DEFAULT_TIMEOUT, "timeout");
        self.progress_interval = self.string_value(
            &self.progress_interval,
            None,
            DEFAULT_PROGRESS_INTERVAL,
            "",
        );

        self.iteration_delay = self.iteration_delay.or(Some(DEFAULT_ITERATION_DELAY));
        self.user_stagger = self.user_stagger.or(Some(DEFAULT_USER_STAGGER));
        self.warmup = self.warmup.or(Some(DEFAULT_WARMUP));
        self.channel_capacity = self.channel_capacity.or(Some(DEFAULT_CHANNEL_CAPACITY));
    }

    // Resolve one string option: command line, then environment, then default.
    fn string_value(
        &self,
        option: &str,
        env: Option<String>,
        default: &str,
        message: &str,
    ) -> String {
        self.get_value(vec![
            ConfigValue {
                value: Some(option.to_string()),
                filter: option.is_empty(),
                message,
            },
            ConfigValue {
                filter: env.as_ref().map_or(true, |e| e.is_empty()),
                value: env,
                message,
            },
            ConfigValue {
                value: Some(default.to_string()),
                filter: false,
                message,
            },
        ])
        .unwrap_or_default()
    }

    /// The configured scenario category.
    pub fn category(&self) -> Result<Category, MarqueeError> {
        Category::from_str(&self.scenario.to_lowercase()).map_err(|_| {
            MarqueeError::InvalidOption {
                option: "`configuration.scenario`".to_string(),
                value: self.scenario.clone(),
                detail: "`configuration.scenario` must be one of auth, movies, interactions, recommendations or all.".to_string(),
            }
        })
    }

    /// Validate configured [`LoadTestConfiguration`] values.
    pub(crate) fn validate(&self) -> Result<(), MarqueeError> {
        // Can't set both --verbose and --quiet.
        if self.verbose > 0 && self.quiet > 0 {
            return Err(MarqueeError::InvalidOption {
                option: "`configuration.verbose`".to_string(),
                value: self.verbose.to_string(),
                detail: "`configuration.verbose` can not be set with `configuration.quiet`."
                    .to_string(),
            });
        }

        util::is_valid_host(&self.host)?;

        self.category()?;

        // Timespans only fall back to 0 when they can't be parsed.
        if !self.ramp_up.is_empty()
            && util::parse_timespan(&self.ramp_up) == 0
            && !self.ramp_up.starts_with('0')
        {
            return Err(MarqueeError::InvalidOption {
                option: "`configuration.ramp_up`".to_string(),
                value: self.ramp_up.clone(),
                detail: "`configuration.ramp_up` must be a timespan such as 30s or 1m30s."
                    .to_string(),
            });
        }
        if util::parse_timespan(&self.run_time) == 0 {
            return Err(MarqueeError::InvalidOption {
                option: "`configuration.run_time`".to_string(),
                value: self.run_time.clone(),
                detail: "`configuration.run_time` must be at least 1 second.".to_string(),
            });
        }
        if util::parse_timespan(&self.timeout) == 0 {
            return Err(MarqueeError::InvalidOption {
                option: "`configuration.timeout`".to_string(),
                value: self.timeout.clone(),
                detail: "`configuration.timeout` must be greater than 0.".to_string(),
            });
        }
        if util::parse_timespan(&self.progress_interval) == 0 {
            return Err(MarqueeError::InvalidOption {
                option: "`configuration.progress_interval`".to_string(),
                value: self.progress_interval.clone(),
                detail: "`configuration.progress_interval` must be at least 1 second."
                    .to_string(),
            });
        }
        if self.channel_capacity == Some(0) {
            return Err(MarqueeError::InvalidOption {
                option: "`configuration.channel_capacity`".to_string(),
                value: "0".to_string(),
                detail: "`configuration.channel_capacity` must be set to at least 1.".to_string(),
            });
        }
        if self.output.is_empty() {
            return Err(MarqueeError::InvalidOption {
                option: "`configuration.output`".to_string(),
                value: String::new(),
                detail: "`configuration.output` must name a file.".to_string(),
            });
        }

        if self.users == Some(0) {
            warn!("no users configured, the load test will not generate any load");
        }

        Ok(())
    }

    /// Optionally initialize the logger which writes to standard out and/or to
    /// a configurable log file.
    pub(crate) fn initialize_logger(&self) {
        // Configure debug output level.
        let debug_level = match self.verbose {
            0 => match self.quiet {
                0 => LevelFilter::Info,
                _ => LevelFilter::Warn,
            },
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Configure log file level.
        let log_level = match self.log_level {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        let log_file: Option<PathBuf> = if !self.log_file.is_empty() {
            Some(PathBuf::from(&self.log_file))
        } else {
            None
        };

        let mut loggers: Vec<Box<dyn SharedLogger>> =
            vec![SimpleLogger::new(debug_level, Config::default())];
        if let Some(log_to_file) = log_file.as_ref() {
            match std::fs::File::create(log_to_file) {
                Ok(file) => loggers.push(WriteLogger::new(log_level, Config::default(), file)),
                Err(e) => eprintln!(
                    "failed to create log file {}: {}",
                    log_to_file.display(),
                    e
                ),
            }
        }
        let with_file = loggers.len() > 1;

        match CombinedLogger::init(loggers) {
            Ok(_) => (),
            Err(e) => {
                info!("failed to initialize CombinedLogger: {}", e);
            }
        }
        if let (true, Some(log_to_file)) = (with_file, log_file) {
            info!("Writing to log file: {}", log_to_file.display());
        }

        info!("Output verbosity level: {}", debug_level);
        info!("Logfile verbosity level: {}", log_level);
    }
}
