//! `tm activate`: block to the window start, pass stdin through, arrange
//! the end-of-window signal.

use crate::activation;
use crate::commands::CommandError;
use crate::config::Ctx;

pub fn run(ctx: &Ctx, signo: i32) -> Result<(), CommandError> {
    activation::activate(ctx, signo)?;
    Ok(())
}
