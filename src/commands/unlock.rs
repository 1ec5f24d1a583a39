//! `tm unlock`: release the registry write lock.

use crate::commands::CommandError;
use crate::config::Ctx;
use crate::registry::lock::release;

pub fn run(ctx: &Ctx) -> Result<(), CommandError> {
    release(ctx)?;
    Ok(())
}
