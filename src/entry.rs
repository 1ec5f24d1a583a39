//! Schedule entries and their line codecs.
//!
//! The registry persists one entry per line in the form
//! `pgid:lock:terminator:start:duration:caption`. Users hand schedules to
//! the CLI in the shorter `start:duration:caption` form. Both codecs are
//! strict: wrong separators, negative times, or out-of-range lock values are
//! rejected rather than guessed at.

use std::fmt;

use thiserror::Error;

/// Maximum caption length in bytes, terminator excluded.
pub const MAX_CAPTION_LEN: usize = 255;

/// Maximum length of a `start:duration:caption` line read from stdin.
pub const MAX_SCHEDULE_LINE_LEN: usize = 512;

/// Errors produced while decoding registry records or schedule lines.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The line does not match the expected colon-separated layout.
    #[error("unknown schedule format: {0:?}")]
    Format(String),

    /// The lock field was something other than 0 or 1.
    #[error("invalid lock value: {0}")]
    InvalidLock(i64),

    /// The pgid field was zero or negative.
    #[error("invalid pgid: {0}")]
    InvalidPgid(i64),

    /// A time field that must be non-negative was negative.
    #[error("negative {field} value: {value}")]
    Negative { field: &'static str, value: i64 },

    /// The caption exceeds [`MAX_CAPTION_LEN`] bytes.
    #[error("caption is too long ({0} bytes)")]
    CaptionTooLong(usize),

    /// The caption contains a reserved character (`:` or a newline).
    #[error("caption contains a reserved character")]
    CaptionSeparator,

    /// Nothing was read from the input.
    #[error("empty schedule input")]
    EmptyInput,
}

/// One registry record, owned by exactly one process group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Process-group id that owns this entry; primary key.
    pub pgid: libc::pid_t,
    /// Whether this pgid currently holds the registry write lock.
    pub lock: bool,
    /// Pid of the forked end-of-window signaller; 0 before activation.
    pub terminator: libc::pid_t,
    /// Window start, seconds since the epoch.
    pub start: i64,
    /// Window length in seconds.
    pub duration: u32,
    /// Human description. Never contains `:` or a newline.
    pub caption: String,
}

impl Entry {
    /// Window end, one second past the last occupied second.
    pub fn end(&self) -> i64 {
        self.start + i64::from(self.duration)
    }

    /// Serialize to the registry line format, trailing newline included.
    pub fn encode(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}\n",
            self.pgid,
            u8::from(self.lock),
            self.terminator,
            self.start,
            self.duration,
            self.caption
        )
    }

    /// Parse one registry line (no trailing newline).
    pub fn decode(line: &str) -> Result<Self, CodecError> {
        let mut fields = line.splitn(6, ':');

        let pgid = int_field(fields.next(), line)?;
        let lock = int_field(fields.next(), line)?;
        let terminator = int_field(fields.next(), line)?;
        let start = int_field(fields.next(), line)?;
        let duration = int_field(fields.next(), line)?;
        let caption = fields
            .next()
            .ok_or_else(|| CodecError::Format(line.to_string()))?;

        if pgid <= 0 || pgid > i64::from(libc::pid_t::MAX) {
            return Err(CodecError::InvalidPgid(pgid));
        }
        if lock != 0 && lock != 1 {
            return Err(CodecError::InvalidLock(lock));
        }
        if terminator < 0 || terminator > i64::from(libc::pid_t::MAX) {
            return Err(CodecError::Negative {
                field: "terminator",
                value: terminator,
            });
        }
        if start < 0 {
            return Err(CodecError::Negative {
                field: "start",
                value: start,
            });
        }
        let duration = duration_field(duration)?;
        let caption = caption_field(caption)?;

        Ok(Self {
            pgid: pgid as libc::pid_t,
            lock: lock == 1,
            terminator: terminator as libc::pid_t,
            start,
            duration,
            caption,
        })
    }
}

/// A user-facing `start:duration:caption` schedule line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleLine {
    pub start: i64,
    pub duration: u32,
    pub caption: String,
}

impl ScheduleLine {
    /// Window end, like [`Entry::end`].
    pub fn end(&self) -> i64 {
        self.start + i64::from(self.duration)
    }

    /// Parse a schedule line (no trailing newline).
    pub fn decode(line: &str) -> Result<Self, CodecError> {
        if line.is_empty() {
            return Err(CodecError::EmptyInput);
        }

        let mut fields = line.splitn(3, ':');
        let start = int_field(fields.next(), line)?;
        let duration = int_field(fields.next(), line)?;
        let caption = fields
            .next()
            .ok_or_else(|| CodecError::Format(line.to_string()))?;

        if start < 0 {
            return Err(CodecError::Negative {
                field: "start",
                value: start,
            });
        }
        let duration = duration_field(duration)?;
        let caption = caption_field(caption)?;

        Ok(Self {
            start,
            duration,
            caption,
        })
    }

    /// Turn this line into a registry entry owned by `pgid`.
    pub fn into_entry(self, pgid: libc::pid_t) -> Entry {
        Entry {
            pgid,
            lock: false,
            terminator: 0,
            start: self.start,
            duration: self.duration,
            caption: self.caption,
        }
    }
}

impl fmt::Display for ScheduleLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.start, self.duration, self.caption)
    }
}

fn int_field(field: Option<&str>, line: &str) -> Result<i64, CodecError> {
    field
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| CodecError::Format(line.to_string()))
}

fn duration_field(value: i64) -> Result<u32, CodecError> {
    if value < 0 {
        return Err(CodecError::Negative {
            field: "duration",
            value,
        });
    }
    u32::try_from(value).map_err(|_| CodecError::Negative {
        field: "duration",
        value,
    })
}

fn caption_field(caption: &str) -> Result<String, CodecError> {
    if caption.contains(':') || caption.contains('\n') {
        return Err(CodecError::CaptionSeparator);
    }
    if caption.len() > MAX_CAPTION_LEN {
        return Err(CodecError::CaptionTooLong(caption.len()));
    }
    Ok(caption.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Entry {
        Entry {
            pgid: 100,
            lock: false,
            terminator: 0,
            start: 1503180600,
            duration: 600,
            caption: "news".to_string(),
        }
    }

    #[test]
    fn test_record_round_trip() {
        let entry = sample();
        let line = entry.encode();
        assert_eq!(line, "100:0:0:1503180600:600:news\n");

        let decoded = Entry::decode(line.trim_end_matches('\n')).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_record_round_trip_with_lock_and_terminator() {
        let entry = Entry {
            pgid: 42,
            lock: true,
            terminator: 4242,
            start: 0,
            duration: 0,
            caption: String::new(),
        };
        let decoded = Entry::decode(entry.encode().trim_end_matches('\n')).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_record_rejects_missing_separator() {
        assert!(Entry::decode("100:0:0:1503180600:600").is_err());
        assert!(Entry::decode("100 0 0 1503180600 600 news").is_err());
        assert!(Entry::decode("").is_err());
    }

    #[test]
    fn test_record_rejects_bad_lock() {
        let err = Entry::decode("100:2:0:10:10:x").unwrap_err();
        assert!(matches!(err, CodecError::InvalidLock(2)));
    }

    #[test]
    fn test_record_rejects_negative_times() {
        assert!(matches!(
            Entry::decode("100:0:0:-5:10:x").unwrap_err(),
            CodecError::Negative { field: "start", .. }
        ));
        assert!(matches!(
            Entry::decode("100:0:0:5:-10:x").unwrap_err(),
            CodecError::Negative {
                field: "duration",
                ..
            }
        ));
    }

    #[test]
    fn test_record_rejects_bad_pgid() {
        assert!(matches!(
            Entry::decode("0:0:0:10:10:x").unwrap_err(),
            CodecError::InvalidPgid(0)
        ));
        assert!(matches!(
            Entry::decode("-7:0:0:10:10:x").unwrap_err(),
            CodecError::InvalidPgid(-7)
        ));
    }

    #[test]
    fn test_record_rejects_caption_with_colon() {
        let err = Entry::decode("100:0:0:10:10:ne:ws").unwrap_err();
        assert!(matches!(err, CodecError::CaptionSeparator));
    }

    #[test]
    fn test_record_rejects_whitespace_padding() {
        // Strict parsing: no trimming anywhere.
        assert!(Entry::decode("100: 0:0:10:10:x").is_err());
        assert!(Entry::decode(" 100:0:0:10:10:x").is_err());
    }

    #[test]
    fn test_schedule_line_round_trip() {
        let line = ScheduleLine::decode("1503180600:600:news").unwrap();
        assert_eq!(line.start, 1503180600);
        assert_eq!(line.duration, 600);
        assert_eq!(line.caption, "news");
        assert_eq!(line.to_string(), "1503180600:600:news");
    }

    #[test]
    fn test_schedule_line_allows_empty_caption() {
        let line = ScheduleLine::decode("0:0:").unwrap();
        assert_eq!(line.caption, "");
    }

    #[test]
    fn test_schedule_line_rejects_negative_start() {
        assert!(matches!(
            ScheduleLine::decode("-1:600:x").unwrap_err(),
            CodecError::Negative { field: "start", .. }
        ));
    }

    #[test]
    fn test_schedule_line_rejects_two_fields() {
        assert!(ScheduleLine::decode("600:news").is_err());
    }

    #[test]
    fn test_schedule_line_rejects_caption_with_colon() {
        assert!(matches!(
            ScheduleLine::decode("0:600:ne:ws").unwrap_err(),
            CodecError::CaptionSeparator
        ));
    }

    #[test]
    fn test_caption_length_cap() {
        let long = "x".repeat(MAX_CAPTION_LEN + 1);
        assert!(matches!(
            ScheduleLine::decode(&format!("0:600:{long}")).unwrap_err(),
            CodecError::CaptionTooLong(_)
        ));

        let ok = "x".repeat(MAX_CAPTION_LEN);
        assert!(ScheduleLine::decode(&format!("0:600:{ok}")).is_ok());
    }

    #[test]
    fn test_into_entry() {
        let entry = ScheduleLine::decode("100:50:cap").unwrap().into_entry(77);
        assert_eq!(entry.pgid, 77);
        assert!(!entry.lock);
        assert_eq!(entry.terminator, 0);
        assert_eq!(entry.end(), 150);
    }
}
