//! `tm unoccupied`: rewrite the stdin schedule into the first free window.
//!
//! The first stdin line is a template: a non-zero duration is kept (and
//! must fit the window); a zero duration takes the whole window. Whatever
//! follows the first line is streamed through untouched, so a pipeline can
//! carry its payload along with the schedule.

use std::io::{self, Write};

use tracing::debug;

use crate::activation::pass_stdin_to_stdout;
use crate::commands::{read_schedule_line, unix_now, CommandError};
use crate::config::{Ctx, DEFAULT_CAPTION};
use crate::interval::unoccupied_windows;
use crate::registry::store::Store;

/// Default search range in seconds.
pub const DEFAULT_RANGE: u32 = 3600;

pub fn run(ctx: &Ctx, begin: Option<i64>, range: u32) -> Result<(), CommandError> {
    let template = read_schedule_line(&mut io::stdin().lock())?;
    let begin = begin.unwrap_or_else(unix_now);
    debug!(begin, range, "searching for an unoccupied window");

    let store = Store::new(&ctx.db.shm)?;
    let entries = store.load()?;
    // Loading already dropped entries for dead process groups; writing the
    // survivors back makes that garbage collection stick.
    store.save(&entries)?;

    let windows = unoccupied_windows(&entries, begin, range, ctx.pgid, DEFAULT_CAPTION);
    let Some(window) = windows.first() else {
        return Err(CommandError::NoWindow);
    };

    let duration = if template.duration != 0 {
        if template.duration > window.duration {
            return Err(CommandError::DurationTooLong);
        }
        template.duration
    } else {
        window.duration
    };

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}:{}:{}", window.start, duration, template.caption)?;
    stdout.flush()?;
    drop(stdout);

    pass_stdin_to_stdout()?;
    Ok(())
}
