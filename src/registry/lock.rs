//! The cross-process registry write lock.
//!
//! Mutual exclusion comes from a named binary semaphore; the `lock` field
//! inside the registry is advisory bookkeeping recorded after the wait
//! succeeds. The wait is bounded by arming SIGALRM with a do-nothing
//! handler so the blocking `sem_wait` returns EINTR at the deadline.
//!
//! Re-acquiring from a process group that already holds the lock is a
//! no-op; that is what lets `activate` run under a lock its caller took.

use std::ffi::CString;
use std::io;
use std::mem;
use std::ptr;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{Ctx, DEFAULT_CAPTION, MAX_ENTRIES};
use crate::entry::Entry;
use crate::registry::store::{Store, StoreError};

/// Default seconds to wait for the semaphore.
pub const DEFAULT_TIMEOUT_SECS: u32 = 5;

/// Errors acquiring or releasing the registry lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// The semaphore was not released within the timeout.
    #[error("timed out waiting for the registry lock")]
    Timeout,

    /// No room to record the lock holder.
    #[error("too many schedules ({0})")]
    RegistryFull(usize),

    /// The semaphore name cannot be handed to the OS.
    #[error("invalid semaphore name: {0:?}")]
    InvalidName(String),

    /// A semaphore or signal syscall failed.
    #[error("{call} {name:?}: {source}")]
    Os {
        call: &'static str,
        name: String,
        source: io::Error,
    },

    /// The registry itself could not be read or written.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Acquire the write lock for the caller's process group.
///
/// Returns immediately when the group already holds the lock. Otherwise
/// waits on the semaphore for at most `timeout_secs`, then records the
/// holder in the registry (creating a stub entry when the group has no
/// schedule yet).
pub fn acquire(ctx: &Ctx, timeout_secs: u32) -> Result<(), LockError> {
    let store = Store::new(&ctx.db.shm)?;

    let entries = store.load()?;
    if entries.iter().any(|e| e.pgid == ctx.pgid && e.lock) {
        debug!(pgid = ctx.pgid, "already holds the registry lock");
        return Ok(());
    }

    let sem = Semaphore::open(&ctx.db.sem, true)?;

    let alarm = match Alarm::arm(&ctx.db.sem, timeout_secs) {
        Ok(alarm) => alarm,
        Err(err) => {
            let _ = sem.close();
            return Err(err);
        }
    };
    // SAFETY: sem is a live semaphore handle until Semaphore::close.
    if unsafe { libc::sem_wait(sem.raw) } == -1 {
        let err = io::Error::last_os_error();
        drop(alarm);
        sem.close()?;
        return Err(if err.raw_os_error() == Some(libc::EINTR) {
            LockError::Timeout
        } else {
            os_err("sem_wait", &ctx.db.sem, err)
        });
    }
    drop(alarm);
    sem.close()?;
    debug!(pgid = ctx.pgid, "registry semaphore taken");

    let mut entries = store.load()?;
    match entries.iter_mut().find(|e| e.pgid == ctx.pgid) {
        Some(e) => e.lock = true,
        None => {
            if entries.len() >= MAX_ENTRIES {
                return Err(LockError::RegistryFull(entries.len()));
            }
            entries.push(Entry {
                pgid: ctx.pgid,
                lock: true,
                terminator: 0,
                start: 0,
                duration: 0,
                caption: DEFAULT_CAPTION.to_string(),
            });
        }
    }
    store.save(&entries)?;

    Ok(())
}

/// Release the write lock for the caller's process group.
///
/// Releasing a lock the group does not hold succeeds without touching the
/// semaphore. When posting the semaphore fails after the `lock` field has
/// been cleared, the field is restored so the registry keeps reflecting the
/// semaphore state.
pub fn release(ctx: &Ctx) -> Result<(), LockError> {
    let store = Store::new(&ctx.db.shm)?;

    let mut entries = store.load()?;
    let held = entries
        .iter_mut()
        .find(|e| e.pgid == ctx.pgid && e.lock);
    let Some(holder) = held else {
        debug!(pgid = ctx.pgid, "no lock to release");
        return Ok(());
    };
    holder.lock = false;
    store.save(&entries)?;

    let sem = match Semaphore::open(&ctx.db.sem, false) {
        Ok(sem) => sem,
        Err(err) => {
            restore_lock_flag(&store, ctx.pgid);
            return Err(err);
        }
    };
    // SAFETY: sem is a live semaphore handle until Semaphore::close.
    if unsafe { libc::sem_post(sem.raw) } == -1 {
        let err = io::Error::last_os_error();
        let _ = sem.close();
        restore_lock_flag(&store, ctx.pgid);
        return Err(os_err("sem_post", &ctx.db.sem, err));
    }
    sem.close()?;
    debug!(pgid = ctx.pgid, "registry semaphore released");

    Ok(())
}

/// Remove the named semaphore. Missing objects are not an error.
pub fn unlink(sem_name: &str) -> Result<(), LockError> {
    let cname = sem_cname(sem_name)?;
    // SAFETY: the name is a valid NUL-terminated string.
    if unsafe { libc::sem_unlink(cname.as_ptr()) } == -1 {
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ENOENT) | Some(libc::EINVAL) => {}
            _ => return Err(os_err("sem_unlink", sem_name, err)),
        }
    }
    Ok(())
}

/// Put the `lock` field back after a failed semaphore post, best effort.
fn restore_lock_flag(store: &Store, pgid: libc::pid_t) {
    let restore = || -> Result<(), StoreError> {
        let mut entries = store.load()?;
        if let Some(e) = entries.iter_mut().find(|e| e.pgid == pgid && !e.lock) {
            e.lock = true;
            store.save(&entries)?;
        }
        Ok(())
    };
    if let Err(err) = restore() {
        warn!(pgid, "could not restore lock flag: {err}");
    }
}

/// Owned handle on an open named semaphore.
struct Semaphore {
    raw: *mut libc::sem_t,
    name: String,
}

impl Semaphore {
    /// Open the named semaphore, optionally creating it with value 1.
    fn open(name: &str, create: bool) -> Result<Self, LockError> {
        let cname = sem_cname(name)?;
        let oflag = if create { libc::O_CREAT } else { 0 };
        // SAFETY: the name is a valid NUL-terminated string; mode and
        // initial value are only read when O_CREAT takes effect.
        let raw = unsafe {
            libc::sem_open(
                cname.as_ptr(),
                oflag,
                (libc::S_IRUSR | libc::S_IWUSR) as libc::c_uint,
                1 as libc::c_uint,
            )
        };
        if raw == libc::SEM_FAILED {
            return Err(os_err("sem_open", name, io::Error::last_os_error()));
        }
        Ok(Self {
            raw,
            name: name.to_string(),
        })
    }

    /// Close the descriptor; the named object persists.
    fn close(self) -> Result<(), LockError> {
        // SAFETY: raw came from sem_open and is closed exactly once.
        if unsafe { libc::sem_close(self.raw) } == -1 {
            return Err(os_err("sem_close", &self.name, io::Error::last_os_error()));
        }
        Ok(())
    }
}

fn sem_cname(name: &str) -> Result<CString, LockError> {
    CString::new(name).map_err(|_| LockError::InvalidName(name.to_string()))
}

fn os_err(call: &'static str, name: &str, source: io::Error) -> LockError {
    LockError::Os {
        call,
        name: name.to_string(),
        source,
    }
}

/// An armed SIGALRM with a do-nothing handler; disarmed and restored on
/// drop. The handler exists only so a pending alarm interrupts `sem_wait`
/// instead of killing the process.
struct Alarm {
    previous: libc::sigaction,
}

extern "C" fn sigalrm_noop(_sig: libc::c_int) {}

impl Alarm {
    fn arm(sem_name: &str, secs: u32) -> Result<Self, LockError> {
        // SAFETY: installing a handler for SIGALRM; the struct is fully
        // initialised before use. SA_RESTART is deliberately absent so the
        // wait returns EINTR.
        let previous = unsafe {
            let mut action: libc::sigaction = mem::zeroed();
            action.sa_sigaction = sigalrm_noop as usize;
            libc::sigemptyset(&mut action.sa_mask);
            let mut previous: libc::sigaction = mem::zeroed();
            if libc::sigaction(libc::SIGALRM, &action, &mut previous) != 0 {
                return Err(os_err("sigaction", sem_name, io::Error::last_os_error()));
            }
            libc::alarm(secs);
            previous
        };
        Ok(Self { previous })
    }
}

impl Drop for Alarm {
    fn drop(&mut self) {
        // SAFETY: cancels the pending alarm and restores the saved action.
        unsafe {
            libc::alarm(0);
            libc::sigaction(libc::SIGALRM, &self.previous, ptr::null_mut());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbNames;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn test_ctx() -> Ctx {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tag = format!("tm_lock_test_{}_{}", std::process::id(), n);
        Ctx {
            db: DbNames {
                shm: format!("/shm_{tag}"),
                sem: format!("/sem_{tag}"),
            },
            // SAFETY: getpgid(0) queries the calling process's own group.
            pgid: unsafe { libc::getpgid(0) },
        }
    }

    fn cleanup(ctx: &Ctx) {
        Store::new(&ctx.db.shm).unwrap().unlink().unwrap();
        unlink(&ctx.db.sem).unwrap();
    }

    #[test]
    fn test_acquire_records_holder() {
        let ctx = test_ctx();
        acquire(&ctx, 2).unwrap();

        let entries = Store::new(&ctx.db.shm).unwrap().load().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].pgid, ctx.pgid);
        assert!(entries[0].lock);
        assert_eq!(entries[0].caption, DEFAULT_CAPTION);

        release(&ctx).unwrap();
        cleanup(&ctx);
    }

    #[test]
    fn test_reacquire_while_held_is_noop() {
        let ctx = test_ctx();
        acquire(&ctx, 2).unwrap();
        // A second acquire must not wait on the (now zero) semaphore.
        acquire(&ctx, 1).unwrap();

        release(&ctx).unwrap();
        cleanup(&ctx);
    }

    #[test]
    fn test_release_without_lock_is_noop() {
        let ctx = test_ctx();
        release(&ctx).unwrap();

        // And a full cycle still works afterwards.
        acquire(&ctx, 2).unwrap();
        release(&ctx).unwrap();
        acquire(&ctx, 2).unwrap();
        release(&ctx).unwrap();
        cleanup(&ctx);
    }

    #[test]
    fn test_release_clears_lock_field() {
        let ctx = test_ctx();
        acquire(&ctx, 2).unwrap();
        release(&ctx).unwrap();

        let entries = Store::new(&ctx.db.shm).unwrap().load().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].lock);
        cleanup(&ctx);
    }

    // The timeout path needs a single-threaded process (SIGALRM is
    // process-directed); it is exercised end to end in tests/pipeline.rs.
}
