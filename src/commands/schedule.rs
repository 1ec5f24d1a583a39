//! `tm schedule`: print the registry.
//!
//! Three renderings: the default human-readable listing of activated
//! entries, `-r` schedule lines for every entry, and `-a` full raw records
//! for every entry.

use std::io::{self, Write};

use chrono::{Local, TimeZone};
use tracing::warn;

use crate::commands::CommandError;
use crate::config::Ctx;
use crate::entry::Entry;
use crate::registry::store::Store;

pub fn run(ctx: &Ctx, all: bool, raw: bool) -> Result<(), CommandError> {
    let store = Store::new(&ctx.db.shm)?;
    let mut entries = store.load()?;
    entries.sort_by_key(|e| e.start);

    let mut stdout = io::stdout().lock();
    for entry in &entries {
        if all {
            stdout.write_all(entry.encode().as_bytes())?;
        } else if raw {
            writeln!(stdout, "{}:{}:{}", entry.start, entry.duration, entry.caption)?;
        } else {
            // Entries nobody activated are reservations, not commitments;
            // leave them out of the human view.
            if entry.terminator == 0 {
                continue;
            }
            match human_line(entry) {
                Some(line) => writeln!(stdout, "{line}")?,
                None => warn!(start = entry.start, "unrepresentable start time"),
            }
        }
    }
    stdout.flush()?;

    Ok(())
}

/// `MM/DD HH:MM-HH:MM (XhYmZs) caption`, in local time.
fn human_line(entry: &Entry) -> Option<String> {
    let start = Local.timestamp_opt(entry.start, 0).single()?;
    let end = Local.timestamp_opt(entry.end(), 0).single()?;
    Some(format!(
        "{}-{} ({}) {}",
        start.format("%m/%d %H:%M"),
        end.format("%H:%M"),
        human_duration(entry.duration),
        entry.caption
    ))
}

/// Duration with zero components omitted: `1h`, `10m`, `1h2m5s`.
fn human_duration(duration: u32) -> String {
    let hours = duration / 3600;
    let minutes = duration % 3600 / 60;
    let seconds = duration % 60;

    let mut out = String::new();
    if hours != 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes != 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if seconds != 0 {
        out.push_str(&format!("{seconds}s"));
    }
    out
}
