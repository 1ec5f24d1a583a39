//! Sub-command implementations.
//!
//! One module per sub-command, each exposing a `run` function that takes
//! the invocation [`Ctx`] plus its parsed flags. All failures funnel into
//! [`CommandError`], which knows the process exit code each kind maps to.

pub mod activate;
pub mod add;
pub mod autoextend;
pub mod crontab;
pub mod lock;
pub mod reset;
pub mod schedule;
pub mod set;
pub mod terminate;
pub mod unlock;
pub mod unoccupied;

use std::io::{self, BufRead};

use chrono::Utc;
use thiserror::Error;

use crate::activation::ActivationError;
use crate::config::{ConfigError, Ctx};
use crate::cron::CronError;
use crate::entry::{CodecError, ScheduleLine, MAX_SCHEDULE_LINE_LEN};
use crate::registry::lock::DEFAULT_TIMEOUT_SECS;
use crate::registry::{LockError, StoreError};

/// Exit status for wrong usage.
pub const EXIT_MISUSE: u8 = 2;

/// Exit status for a lock timeout or an empty search result.
pub const EXIT_UNAVAILABLE: u8 = 3;

/// Anything a sub-command can fail with.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The schedule would have ended before it was even stored.
    #[error("past schedule (end {end}, now {now})")]
    PastSchedule { end: i64, now: i64 },

    /// Another process group already occupies part of the window.
    #[error("double booking")]
    Conflict,

    /// The caller's process group has no schedule.
    #[error("no schedule for process group {0}")]
    NoEntry(libc::pid_t),

    /// No unoccupied window inside the search range.
    #[error("no unoccupied window found")]
    NoWindow,

    /// The requested duration does not fit the found window.
    #[error("duration exceeds the unoccupied window")]
    DurationTooLong,

    /// `lock` gave up waiting.
    #[error("timed out waiting for the registry lock")]
    Timeout,

    /// A mutating command could not take the lock in time.
    #[error("could not take the registry lock: timed out")]
    LockBusy,

    #[error(transparent)]
    Cron(#[from] CronError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A process or signal syscall failed.
    #[error("{call}: {source}")]
    Os {
        call: &'static str,
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CommandError {
    /// The process exit status this failure maps to.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Codec(_)
            | Self::Config(_)
            | Self::PastSchedule { .. }
            | Self::NoEntry(_)
            | Self::DurationTooLong
            | Self::Cron(CronError::InvalidExpression(_)) => EXIT_MISUSE,
            Self::Timeout | Self::NoWindow | Self::Cron(CronError::NotFound) => EXIT_UNAVAILABLE,
            _ => 1,
        }
    }
}

impl From<ActivationError> for CommandError {
    fn from(err: ActivationError) -> Self {
        match err {
            ActivationError::NoEntry(pgid) => Self::NoEntry(pgid),
            ActivationError::Lock(LockError::Timeout) => Self::LockBusy,
            ActivationError::Lock(inner) => Self::Lock(inner),
            ActivationError::Store(inner) => Self::Store(inner),
            ActivationError::Os { call, source } => Self::Os { call, source },
            ActivationError::Io(inner) => Self::Io(inner),
        }
    }
}

/// Current wall clock, whole seconds since the epoch.
pub(crate) fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Take the registry lock for a mutating command.
///
/// Only the `lock` sub-command reports a timeout distinctly; everywhere
/// else running out of patience is an ordinary failure.
pub(crate) fn acquire_registry_lock(ctx: &Ctx) -> Result<(), CommandError> {
    crate::registry::lock::acquire(ctx, DEFAULT_TIMEOUT_SECS).map_err(|err| match err {
        LockError::Timeout => CommandError::LockBusy,
        other => CommandError::Lock(other),
    })
}

/// Read the first stdin line as a schedule.
pub(crate) fn read_schedule_line(input: &mut impl BufRead) -> Result<ScheduleLine, CommandError> {
    let mut buf = String::new();
    let n = input.read_line(&mut buf)?;
    if n == 0 {
        return Err(CodecError::EmptyInput.into());
    }
    if buf.len() > MAX_SCHEDULE_LINE_LEN {
        return Err(CodecError::Format(buf).into());
    }
    Ok(ScheduleLine::decode(buf.trim_end_matches('\n'))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            CommandError::Codec(CodecError::EmptyInput).exit_code(),
            EXIT_MISUSE
        );
        assert_eq!(
            CommandError::PastSchedule { end: 1, now: 2 }.exit_code(),
            EXIT_MISUSE
        );
        assert_eq!(CommandError::NoEntry(1).exit_code(), EXIT_MISUSE);
        assert_eq!(CommandError::DurationTooLong.exit_code(), EXIT_MISUSE);
        assert_eq!(CommandError::Conflict.exit_code(), 1);
        assert_eq!(CommandError::LockBusy.exit_code(), 1);
        assert_eq!(CommandError::Timeout.exit_code(), EXIT_UNAVAILABLE);
        assert_eq!(CommandError::NoWindow.exit_code(), EXIT_UNAVAILABLE);
        assert_eq!(
            CommandError::Cron(CronError::NotFound).exit_code(),
            EXIT_UNAVAILABLE
        );
        assert_eq!(
            CommandError::Cron(CronError::InvalidExpression("x".into())).exit_code(),
            EXIT_MISUSE
        );
    }

    #[test]
    fn test_read_schedule_line() {
        let mut input = io::Cursor::new(b"100:50:cap\nrest".to_vec());
        let line = read_schedule_line(&mut input).unwrap();
        assert_eq!(line.to_string(), "100:50:cap");

        // The rest of the stream is untouched.
        let mut rest = String::new();
        input.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "rest");
    }

    #[test]
    fn test_read_schedule_line_empty_input() {
        let mut input = io::Cursor::new(Vec::new());
        assert!(matches!(
            read_schedule_line(&mut input),
            Err(CommandError::Codec(CodecError::EmptyInput))
        ));
    }

    #[test]
    fn test_read_schedule_line_oversized() {
        let mut input = io::Cursor::new(format!("0:0:{}\n", "x".repeat(600)).into_bytes());
        assert!(matches!(
            read_schedule_line(&mut input),
            Err(CommandError::Codec(CodecError::Format(_)))
        ));
    }
}
