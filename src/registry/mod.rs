//! The shared schedule registry: a named shared memory segment holding one
//! line per entry, guarded by a named binary semaphore.
//!
//! [`store`] owns all access to the segment; [`lock`] owns the semaphore.
//! Reads are deliberately unsynchronised: writers must hold the lock, a
//! torn trailing line fails to decode and is dropped, and read-only
//! commands treat what they see as advisory.

pub mod lock;
pub mod store;

pub use lock::{LockError, DEFAULT_TIMEOUT_SECS};
pub use store::{Store, StoreError};
