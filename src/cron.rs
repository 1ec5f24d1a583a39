//! Crontab-style start time resolution.
//!
//! A five-field vixie expression is parsed by the `cron` crate (a seconds
//! field is prefixed so the minute grid lines up), then matched minute by
//! minute against the local wall clock inside a bounded window around now.
//! Walking minutes rather than asking for the next fire time is what allows
//! the window to reach into the past.

use std::str::FromStr;

use chrono::{Local, TimeZone};
use cron::Schedule;
use thiserror::Error;

/// Default number of seconds searched into the future.
pub const DEFAULT_FORWARD_RANGE: u32 = 60 * 60 * 24;

/// Errors resolving a crontab expression to a start time.
#[derive(Debug, Error)]
pub enum CronError {
    /// The expression is not a valid five-field crontab line.
    #[error("invalid crontab expression: {0}")]
    InvalidExpression(String),

    /// No matching minute inside the search window.
    #[error("no matching time found")]
    NotFound,
}

/// Find the first minute in `[now - backward, now + forward]` that matches
/// `expression`, returned as seconds since the epoch (second field zero).
pub fn next_match(
    expression: &str,
    now: i64,
    backward: u32,
    forward: u32,
) -> Result<i64, CronError> {
    let schedule = parse(expression)?;

    let begin = now - i64::from(backward);
    let end = now + i64::from(forward);

    let mut head = begin;
    while head <= end {
        let minute = head - head.rem_euclid(60);
        if let Some(local) = Local.timestamp_opt(minute, 0).single() {
            if schedule.includes(local) {
                return Ok(minute);
            }
        }
        head += 60;
    }

    Err(CronError::NotFound)
}

/// Parse a five-field crontab expression.
fn parse(expression: &str) -> Result<Schedule, CronError> {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() != 5 {
        return Err(CronError::InvalidExpression(expression.to_string()));
    }
    Schedule::from_str(&format!("0 {trimmed}"))
        .map_err(|_| CronError::InvalidExpression(expression.to_string()))
}
