//! `tm reset`: unlink the shared memory segment and the semaphore.

use tracing::debug;

use crate::commands::CommandError;
use crate::config::Ctx;
use crate::registry::lock;
use crate::registry::store::Store;

pub fn run(ctx: &Ctx) -> Result<(), CommandError> {
    debug!(shm = %ctx.db.shm, sem = %ctx.db.sem, "resetting database");

    Store::new(&ctx.db.shm)?.unlink()?;
    lock::unlink(&ctx.db.sem)?;

    Ok(())
}
