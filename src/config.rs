//! Registry naming and per-invocation context.
//!
//! Up to five independent registries can coexist on one host; a database
//! index 1..=5 is appended to the shared memory and semaphore names. The
//! index comes from the `-d` flag, falling back to the `TM_DB_NUM`
//! environment variable, else the unsuffixed defaults are used.

use std::io;

use thiserror::Error;

/// Default shared memory object name.
pub const DEFAULT_SHARED_MEMORY_NAME: &str = "/shm_timemanager";

/// Default semaphore name.
pub const DEFAULT_SEMAPHORE_NAME: &str = "/sem_timemanager";

/// Size of the shared memory segment in bytes.
pub const SEGMENT_SIZE: usize = 65536;

/// Maximum number of entries the registry will hold.
pub const MAX_ENTRIES: usize = 1024;

/// Highest valid database index.
pub const MAX_DB_INDEX: u8 = 5;

/// Environment variable supplying the database index.
pub const ENV_DB_INDEX: &str = "TM_DB_NUM";

/// Caption given to stub entries created by `lock` and to unoccupied
/// windows emitted with no caller caption.
pub const DEFAULT_CAPTION: &str = "TimeManager.";

/// Errors resolving the invocation context.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Database index outside 1..=[`MAX_DB_INDEX`].
    #[error("invalid database number: {0} (valid 1-{MAX_DB_INDEX})")]
    InvalidIndex(u8),

    /// The calling process group could not be determined.
    #[error("getpgid: {0}")]
    Pgid(io::Error),
}

/// Names of the two named OS objects backing one registry.
#[derive(Debug, Clone)]
pub struct DbNames {
    /// Shared memory object name.
    pub shm: String,
    /// Semaphore name.
    pub sem: String,
}

impl DbNames {
    /// Resolve names for a database index, or the defaults when absent.
    pub fn resolve(index: Option<u8>) -> Result<Self, ConfigError> {
        match index {
            None => Ok(Self {
                shm: DEFAULT_SHARED_MEMORY_NAME.to_string(),
                sem: DEFAULT_SEMAPHORE_NAME.to_string(),
            }),
            Some(i) if (1..=MAX_DB_INDEX).contains(&i) => Ok(Self {
                shm: format!("{DEFAULT_SHARED_MEMORY_NAME}{i}"),
                sem: format!("{DEFAULT_SEMAPHORE_NAME}{i}"),
            }),
            Some(i) => Err(ConfigError::InvalidIndex(i)),
        }
    }
}

/// Per-invocation context threaded through the command entry points.
#[derive(Debug, Clone)]
pub struct Ctx {
    /// Registry object names for the selected database.
    pub db: DbNames,
    /// The caller's process group id, the scheduling key.
    pub pgid: libc::pid_t,
}

impl Ctx {
    /// Build a context for the selected database and the calling process
    /// group.
    pub fn new(index: Option<u8>) -> Result<Self, ConfigError> {
        let db = DbNames::resolve(index)?;
        // SAFETY: getpgid(0) queries the calling process's own group.
        let pgid = unsafe { libc::getpgid(0) };
        if pgid == -1 {
            return Err(ConfigError::Pgid(io::Error::last_os_error()));
        }
        Ok(Self { db, pgid })
    }
}
