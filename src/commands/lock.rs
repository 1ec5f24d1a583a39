//! `tm lock`: take the registry write lock explicitly.

use crate::commands::CommandError;
use crate::config::Ctx;
use crate::registry::lock::{acquire, LockError};

pub fn run(ctx: &Ctx, timeout_secs: u32) -> Result<(), CommandError> {
    acquire(ctx, timeout_secs).map_err(|err| match err {
        LockError::Timeout => CommandError::Timeout,
        other => CommandError::Lock(other),
    })
}
