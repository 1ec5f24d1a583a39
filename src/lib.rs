//! Process-group oriented temporal dispatch for shell pipelines.
//!
//! A pipeline claims a wall-clock window, blocks until it opens, streams
//! data through while it lasts, and gets a terminating signal when it ends.
//! Independent pipelines on the same host coordinate through a registry in
//! named shared memory, guarded by a named semaphore, so they can see each
//! other's bookings, refuse overlaps, and find free windows.

pub mod activation;
pub mod commands;
pub mod config;
pub mod cron;
pub mod entry;
pub mod interval;
pub mod registry;

pub use activation::{ActivationError, DEFAULT_SIGNAL};
pub use commands::CommandError;
pub use config::{Ctx, DbNames};
pub use cron::CronError;
pub use entry::{CodecError, Entry, ScheduleLine};
pub use registry::{LockError, Store, StoreError};
