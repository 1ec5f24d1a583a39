//! `tm add`: read a schedule line from stdin and upsert it.

use std::io;

use tracing::debug;

use crate::commands::{acquire_registry_lock, read_schedule_line, unix_now, CommandError};
use crate::config::{Ctx, MAX_ENTRIES};
use crate::entry::Entry;
use crate::interval::has_conflict;
use crate::registry::lock;
use crate::registry::store::Store;

pub fn run(ctx: &Ctx) -> Result<(), CommandError> {
    let line = read_schedule_line(&mut io::stdin().lock())?;

    let now = unix_now();
    if line.end() < now {
        return Err(CommandError::PastSchedule {
            end: line.end(),
            now,
        });
    }
    debug!(start = line.start, duration = line.duration, "schedule read");

    let candidate = line.into_entry(ctx.pgid);

    acquire_registry_lock(ctx)?;
    let outcome = upsert(ctx, candidate);
    match outcome {
        Ok(()) => {
            lock::release(ctx)?;
            Ok(())
        }
        Err(err) => {
            let _ = lock::release(ctx);
            Err(err)
        }
    }
}

/// Insert the candidate, or overwrite the caller's existing schedule while
/// keeping its lock and terminator fields intact.
fn upsert(ctx: &Ctx, candidate: Entry) -> Result<(), CommandError> {
    let store = Store::new(&ctx.db.shm)?;
    let mut entries = store.load()?;

    if has_conflict(&candidate, &entries) {
        return Err(CommandError::Conflict);
    }

    match entries.iter_mut().find(|e| e.pgid == ctx.pgid) {
        Some(existing) => {
            debug!(pgid = ctx.pgid, "overwriting existing schedule");
            existing.start = candidate.start;
            existing.duration = candidate.duration;
            existing.caption = candidate.caption;
        }
        None => {
            if entries.len() >= MAX_ENTRIES {
                return Err(CommandError::Lock(
                    crate::registry::LockError::RegistryFull(entries.len()),
                ));
            }
            debug!(pgid = ctx.pgid, "creating new schedule");
            entries.push(candidate);
        }
    }

    store.save(&entries)?;
    Ok(())
}
