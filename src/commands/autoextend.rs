//! `tm autoextend`: keep stretching the current schedule into abutting
//! free space.
//!
//! Forks a background child and returns at once; the child loops forever:
//! take the lock, reload its entry, find the free windows just behind the
//! entry's end, extend the duration across any window that abuts it, save,
//! re-activate (which reschedules the terminator for the new end), and
//! sleep out the interval. The search window starts `interval` seconds in
//! the past so the entry's own end is never missed between iterations.

use std::convert::Infallible;
use std::io;
use std::thread;
use std::time::Duration;

use tracing::{debug, error};

use crate::activation::{self, DEFAULT_SIGNAL};
use crate::commands::{acquire_registry_lock, unix_now, CommandError};
use crate::config::Ctx;
use crate::interval::unoccupied_windows;
use crate::registry::lock;
use crate::registry::store::Store;

/// Default seconds between extension rounds.
pub const DEFAULT_INTERVAL: u32 = 1;

/// Default search range in seconds.
pub const DEFAULT_RANGE: u32 = 3600;

pub fn run(ctx: &Ctx, interval: u32, range: u32) -> Result<(), CommandError> {
    // SAFETY: the process is single-threaded; the child re-enters the
    // ordinary command machinery and never returns.
    match unsafe { libc::fork() } {
        -1 => Err(CommandError::Os {
            call: "fork",
            source: io::Error::last_os_error(),
        }),
        0 => {
            let err = match extension_loop(ctx, interval, range) {
                Ok(never) => match never {},
                Err(err) => err,
            };
            error!("autoextend stopped: {err}");
            // SAFETY: _exit is the only safe way out of a forked child.
            unsafe { libc::_exit(1) }
        }
        child => {
            debug!(child, interval, range, "autoextend child forked");
            Ok(())
        }
    }
}

fn extension_loop(ctx: &Ctx, interval: u32, range: u32) -> Result<Infallible, CommandError> {
    loop {
        acquire_registry_lock(ctx)?;
        if let Err(err) = extend_once(ctx, interval, range) {
            let _ = lock::release(ctx);
            return Err(err);
        }

        // Re-activation cancels the previous terminator, records a new one
        // for the extended end, and releases the lock on its way out.
        if let Err(err) = activation::activate(ctx, DEFAULT_SIGNAL) {
            let _ = lock::release(ctx);
            return Err(err.into());
        }

        thread::sleep(Duration::from_secs(u64::from(interval)));
    }
}

/// One locked extension round.
fn extend_once(ctx: &Ctx, interval: u32, range: u32) -> Result<(), CommandError> {
    let store = Store::new(&ctx.db.shm)?;
    let mut entries = store.load()?;

    let idx = entries
        .iter()
        .position(|e| e.pgid == ctx.pgid)
        .ok_or(CommandError::NoEntry(ctx.pgid))?;

    let begin = unix_now() - i64::from(interval);
    let windows = unoccupied_windows(&entries, begin, range.saturating_add(interval), ctx.pgid, "");

    let entry = &mut entries[idx];
    for window in &windows {
        if entry.end() == window.start {
            debug!(
                pgid = entry.pgid,
                until = window.end(),
                "extending schedule into abutting window"
            );
            entry.duration = (window.end() - entry.start) as u32;
        }
    }

    store.save(&entries)?;
    Ok(())
}
