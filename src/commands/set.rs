//! `tm set`: `add` followed by `activate`; the pipeline is torn down when
//! either step fails so nothing runs outside a booked window.

use crate::commands::{activate, add, terminate, CommandError};
use crate::config::Ctx;

pub fn run(ctx: &Ctx, signo: i32) -> Result<(), CommandError> {
    if let Err(err) = add::run(ctx) {
        let _ = terminate::run(ctx);
        return Err(err);
    }

    if let Err(err) = activate::run(ctx, signo) {
        let _ = terminate::run(ctx);
        return Err(err);
    }

    Ok(())
}
