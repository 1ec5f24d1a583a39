//! tm - manage start and end times of arbitrary programs.
//!
//! Usage:
//!   echo "1503180600:600:news" | tm set && myprogram
//!
//! A schedule belongs to the caller's process group; run the managed
//! program in the same group as tm. `set` holds the pipeline back until
//! the start time and signals the whole group at the end time.

use clap::{Parser, Subcommand};
use timemanager::commands::{
    self, autoextend::DEFAULT_INTERVAL, unoccupied::DEFAULT_RANGE, CommandError,
};
use timemanager::cron::DEFAULT_FORWARD_RANGE;
use timemanager::registry::DEFAULT_TIMEOUT_SECS;
use timemanager::{Ctx, DEFAULT_SIGNAL};
use tracing::error;

/// tm - manage start and end times of arbitrary programs
#[derive(Parser)]
#[command(name = "tm")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database number; selects one of five independent registries
    #[arg(
        short = 'd',
        long = "database",
        global = true,
        env = "TM_DB_NUM",
        value_name = "N",
        value_parser = clap::value_parser!(u8).range(1..=5)
    )]
    database: Option<u8>,

    /// Verbose diagnostics on stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a schedule line (start:duration:caption) from stdin and store it
    Add,

    /// Block until the stored schedule starts, then pass stdin to stdout;
    /// the process group is signalled at the end time
    Activate {
        /// Signal number sent to the process group at the end time
        #[arg(short = 's', long = "signal", value_name = "SIGNO", default_value_t = DEFAULT_SIGNAL)]
        signal: i32,
    },

    /// Add and activate in one step; failures terminate the process group
    Set {
        /// Signal number sent to the process group at the end time
        #[arg(short = 's', long = "signal", value_name = "SIGNO", default_value_t = DEFAULT_SIGNAL)]
        signal: i32,
    },

    /// Print the stored schedules
    Schedule {
        /// Print full raw records, including schedules not yet activated
        #[arg(short = 'a', long)]
        all: bool,

        /// Print schedule lines instead of the human-readable form
        #[arg(short = 'r', long)]
        raw: bool,
    },

    /// Fit the stdin schedule into the first unoccupied window
    Unoccupied {
        /// Search start (seconds since the epoch; defaults to now)
        #[arg(short = 'b', long, value_name = "TIME")]
        begin: Option<i64>,

        /// Search range in seconds
        #[arg(short = 'r', long, value_name = "SEC", default_value_t = DEFAULT_RANGE)]
        range: u32,
    },

    /// Set the stdin schedule's start to the next match of a crontab
    /// expression
    Crontab {
        /// Five-field crontab expression, e.g. "0 7 20 8 *"
        #[arg(value_name = "EXPRESSION")]
        expression: String,

        /// Seconds to search into the past
        #[arg(short = 'r', long = "backward", value_name = "SEC", default_value_t = 0)]
        backward: u32,

        /// Seconds to search into the future
        #[arg(short = 'R', long = "forward", value_name = "SEC", default_value_t = DEFAULT_FORWARD_RANGE)]
        forward: u32,
    },

    /// Take the registry write lock
    Lock {
        /// Seconds to wait for the lock before giving up
        #[arg(short = 't', long, value_name = "SEC", default_value_t = DEFAULT_TIMEOUT_SECS)]
        timeout: u32,
    },

    /// Release the registry write lock
    Unlock,

    /// Remove the shared memory segment and the semaphore
    Reset,

    /// Send SIGTERM to the caller's process group
    Terminate,

    /// Keep extending the current schedule into abutting free windows
    Autoextend {
        /// Seconds between extension rounds
        #[arg(short = 'i', long, value_name = "SEC", default_value_t = DEFAULT_INTERVAL)]
        interval: u32,

        /// Search range in seconds
        #[arg(short = 'r', long, value_name = "SEC", default_value_t = commands::autoextend::DEFAULT_RANGE)]
        range: u32,
    },
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    let ctx = match Ctx::new(cli.database) {
        Ok(ctx) => ctx,
        Err(err) => {
            error!("{err}");
            return std::process::ExitCode::from(commands::EXIT_MISUSE);
        }
    };

    let result = run(&ctx, cli.command);
    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            std::process::ExitCode::from(err.exit_code())
        }
    }
}

fn run(ctx: &Ctx, command: Commands) -> Result<(), CommandError> {
    match command {
        Commands::Add => commands::add::run(ctx),
        Commands::Activate { signal } => commands::activate::run(ctx, signal),
        Commands::Set { signal } => commands::set::run(ctx, signal),
        Commands::Schedule { all, raw } => commands::schedule::run(ctx, all, raw),
        Commands::Unoccupied { begin, range } => commands::unoccupied::run(ctx, begin, range),
        Commands::Crontab {
            expression,
            backward,
            forward,
        } => commands::crontab::run(&expression, backward, forward),
        Commands::Lock { timeout } => commands::lock::run(ctx, timeout),
        Commands::Unlock => commands::unlock::run(ctx),
        Commands::Reset => commands::reset::run(ctx),
        Commands::Terminate => commands::terminate::run(ctx),
        Commands::Autoextend { interval, range } => commands::autoextend::run(ctx, interval, range),
    }
}
