//! `tm terminate`: end the caller's own process group.

use std::io;

use tracing::debug;

use crate::commands::CommandError;
use crate::config::Ctx;
use crate::registry::store::Store;

pub fn run(ctx: &Ctx) -> Result<(), CommandError> {
    let store = Store::new(&ctx.db.shm)?;
    let entries = store.load()?;

    let entry = entries
        .iter()
        .find(|e| e.pgid == ctx.pgid)
        .ok_or(CommandError::NoEntry(ctx.pgid))?;

    debug!(pgid = entry.pgid, "terminating process group");
    // SAFETY: signalling the caller's own process group.
    if unsafe { libc::killpg(entry.pgid, libc::SIGTERM) } == -1 {
        return Err(CommandError::Os {
            call: "killpg",
            source: io::Error::last_os_error(),
        });
    }

    Ok(())
}
