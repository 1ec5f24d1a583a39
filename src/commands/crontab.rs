//! `tm crontab`: set the stdin schedule's start from a crontab expression.

use std::io::{self, Write};

use tracing::debug;

use crate::activation::pass_stdin_to_stdout;
use crate::commands::{read_schedule_line, unix_now, CommandError};
use crate::cron::next_match;

pub fn run(expression: &str, backward: u32, forward: u32) -> Result<(), CommandError> {
    let template = read_schedule_line(&mut io::stdin().lock())?;

    let start = next_match(expression, unix_now(), backward, forward)?;
    debug!(expression, start, "crontab expression resolved");

    let mut stdout = io::stdout().lock();
    writeln!(
        stdout,
        "{}:{}:{}",
        start, template.duration, template.caption
    )?;
    stdout.flush()?;
    drop(stdout);

    pass_stdin_to_stdout()?;
    Ok(())
}
