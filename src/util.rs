//! Utility functions used by the load test engine.

use lazy_static::lazy_static;
use regex::Regex;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use url::Url;

use crate::{MarqueeError, CANCELED};

lazy_static! {
    static ref TIMESPAN: Regex =
        Regex::new(r"((?P<hours>\d+?)h)?((?P<minutes>\d+?)m)?((?P<seconds>\d+?)s)?")
            .expect("timespan regex is valid");
}

/// Parse a string representing a time span and return the number of seconds.
///
/// Can be specified as an integer, indicating seconds. Or can use integers
/// together with one or more of "h", "m", and "s", in that order, indicating
/// "hours", "minutes", and "seconds".
///
/// Valid formats include: 20, 20s, 3m, 2h, 1h20m, 3h30m10s, etc.
///
/// # Example
/// ```rust
/// use marquee::util;
///
/// // 1 hour 2 minutes and 3 seconds is 3,723 seconds.
/// assert_eq!(util::parse_timespan("1h2m3s"), 3_723);
///
/// // 45 seconds is 45 seconds.
/// assert_eq!(util::parse_timespan("45"), 45);
///
/// // Invalid value is 0 seconds.
/// assert_eq!(util::parse_timespan("foo"), 0);
/// ```
pub fn parse_timespan(time_str: &str) -> usize {
    if let Ok(t) = usize::from_str(time_str) {
        trace!("{} is integer: {} seconds", time_str, t);
        return t;
    }

    let captures = match TIMESPAN.captures(time_str) {
        Some(captures) => captures,
        None => return 0,
    };
    let extract = |name: &str| -> usize {
        captures
            .name(name)
            .and_then(|m| usize::from_str(m.as_str()).ok())
            .unwrap_or(0)
    };
    let hours = extract("hours");
    let minutes = extract("minutes");
    let seconds = extract("seconds");
    let total = hours
        .saturating_mul(60 * 60)
        .saturating_add(minutes.saturating_mul(60))
        .saturating_add(seconds);
    trace!(
        "{} hours {} minutes {} seconds: {} seconds",
        hours,
        minutes,
        seconds,
        total
    );
    total
}

/// Truncate strings when they're too long to display.
///
/// If a string is longer than the specified max length, this function removes extra
/// the characters and replaces the last two with a double-period ellipsis.
///
/// # Example
/// ```rust
/// use marquee::util;
///
/// // All but 7 characters are truncated, with ".." appended.
/// assert_eq!(util::truncate_string("this is a long string", 9), "this is..");
///
/// // All characters are returned as the string is less than 15 characters long.
/// assert_eq!(util::truncate_string("shorter string", 15), "shorter string");
/// ```
pub fn truncate_string(str_to_truncate: &str, max_length: usize) -> String {
    if max_length >= 2 && str_to_truncate.char_indices().count() > max_length {
        match str_to_truncate.char_indices().nth(max_length - 2) {
            None => str_to_truncate.to_string(),
            Some((idx, _)) => format!("{}..", &str_to_truncate[..idx]),
        }
    } else {
        str_to_truncate.to_string()
    }
}

/// Render a number of seconds as `1h2m3s`, dropping empty leading units.
///
/// # Example
/// ```rust
/// use marquee::util;
///
/// assert_eq!(util::format_timespan(3_723), "1h2m3s");
/// assert_eq!(util::format_timespan(65), "1m5s");
/// assert_eq!(util::format_timespan(0), "0s");
/// ```
pub fn format_timespan(seconds: u64) -> String {
    let hours = seconds / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let seconds = seconds % 60;
    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Returns `Ok(true)` if the host parses as a URL, otherwise an `InvalidHost` error.
pub fn is_valid_host(host: &str) -> Result<bool, MarqueeError> {
    Url::parse(host).map_err(|parse_error| MarqueeError::InvalidHost {
        host: host.to_string(),
        detail: "Invalid host.".to_string(),
        parse_error,
    })?;
    Ok(true)
}

/// Join a host and an API base path into one base URL without doubled or missing slashes.
///
/// # Example
/// ```rust
/// use marquee::util;
///
/// assert_eq!(util::join_base_url("http://localhost:3000/", "/api"), "http://localhost:3000/api");
/// assert_eq!(util::join_base_url("http://localhost:3000", ""), "http://localhost:3000");
/// ```
pub fn join_base_url(host: &str, base_path: &str) -> String {
    let host = host.trim_end_matches('/');
    let base_path = base_path.trim_matches('/');
    if base_path.is_empty() {
        host.to_string()
    } else {
        format!("{}/{}", host, base_path)
    }
}

// Shutdown cleanly on the first ctrl-c. Exit abruptly on the second ctrl-c.
pub(crate) fn setup_ctrlc_handler() {
    match ctrlc::set_handler(move || {
        if CANCELED.load(Ordering::SeqCst) {
            warn!("caught another ctrl-c, exiting immediately...");
            std::process::exit(1);
        } else {
            warn!("caught ctrl-c, stopping...");
            CANCELED.store(true, Ordering::SeqCst);
        }
    }) {
        Ok(_) => (),
        Err(e) => {
            // The handler can only be installed once per process, which happens when
            // several load tests run in one test binary.
            CANCELED.store(false, Ordering::SeqCst);
            info!("reset ctrl-c handler: {}", e);
        }
    }
}

/// Returns true once ctrl-c has been caught.
pub(crate) fn canceled() -> bool {
    CANCELED.load(Ordering::SeqCst)
}
