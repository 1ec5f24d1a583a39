//! Binding a schedule to wall-clock time.
//!
//! Activation forks a terminator child whose sole job is to outlive its
//! parent, sleep until the window ends, and signal its own process group.
//! The parent records the child's pid in the registry, releases the lock,
//! blocks until the window starts, and then streams stdin to stdout so a
//! pipeline built around `tm` only flows while the window is open.
//!
//! A second activation finds the recorded terminator pid and cancels it
//! before forking a new one; that is how a changed duration reschedules the
//! end-of-window signal.

use std::io::{self, Read, Write};
use std::mem;
use std::ptr;
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::debug;

use crate::config::{Ctx, DbNames};
use crate::entry::Entry;
use crate::registry::lock::{self, DEFAULT_TIMEOUT_SECS};
use crate::registry::store::{Store, StoreError};
use crate::registry::LockError;

/// Signal delivered at window end when none is chosen.
pub const DEFAULT_SIGNAL: i32 = libc::SIGTERM;

/// Errors during activation.
#[derive(Debug, Error)]
pub enum ActivationError {
    /// The caller's process group has no schedule to activate.
    #[error("no schedule for process group {0}")]
    NoEntry(libc::pid_t),

    /// A process or signal syscall failed.
    #[error("{call}: {source}")]
    Os {
        call: &'static str,
        source: io::Error,
    },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// What the termination handler needs to release the lock: captured before
/// the handlers are installed, because a handler cannot be handed arguments.
struct HandlerSnapshot {
    shm: String,
    sem: String,
    pgid: libc::pid_t,
}

static HANDLER_SNAPSHOT: OnceLock<HandlerSnapshot> = OnceLock::new();

/// Handler for SIGTERM/SIGINT/SIGQUIT while an activation is pending: give
/// the lock back if we hold it, then exit 128+signum like a default-killed
/// process would.
extern "C" fn termination_handler(sig: libc::c_int) {
    if let Some(snap) = HANDLER_SNAPSHOT.get() {
        let ctx = Ctx {
            db: DbNames {
                shm: snap.shm.clone(),
                sem: snap.sem.clone(),
            },
            pgid: snap.pgid,
        };
        let _ = lock::release(&ctx);
    }
    // SAFETY: _exit is async-signal-safe.
    unsafe { libc::_exit(128 + sig) }
}

/// Activate the caller's schedule.
///
/// Requires an entry for the caller's process group (normally created by
/// `add`). Blocks until the window starts, then forwards stdin to stdout
/// until EOF; `signo` reaches the whole process group at window end.
pub fn activate(ctx: &Ctx, signo: i32) -> Result<(), ActivationError> {
    let _ = HANDLER_SNAPSHOT.set(HandlerSnapshot {
        shm: ctx.db.shm.clone(),
        sem: ctx.db.sem.clone(),
        pgid: ctx.pgid,
    });
    install_termination_handlers()?;
    ignore_child_exits()?;

    lock::acquire(ctx, DEFAULT_TIMEOUT_SECS)?;

    let store = match Store::new(&ctx.db.shm) {
        Ok(store) => store,
        Err(err) => {
            let _ = lock::release(ctx);
            return Err(err.into());
        }
    };
    let (mut entries, idx) = match find_own_entry(ctx, &store) {
        Ok(found) => found,
        Err(err) => {
            let _ = lock::release(ctx);
            return Err(err);
        }
    };

    let start = entries[idx].start;
    let end = entries[idx].end();

    // SAFETY: the process is single-threaded; the child touches only its
    // own copies of `end` and `signo` before exiting.
    match unsafe { libc::fork() } {
        -1 => {
            let err = os_err("fork");
            let _ = lock::release(ctx);
            Err(err)
        }
        0 => run_terminator(end, signo),
        child => {
            debug!(child, start, end, "terminator forked");
            entries[idx].terminator = child;
            if let Err(err) = store.save(&entries) {
                let _ = lock::release(ctx);
                return Err(err.into());
            }
            lock::release(ctx)?;

            sleep_until(start);
            pass_stdin_to_stdout()?;
            Ok(())
        }
    }
}

/// The terminator child: detach from the pipeline, wait out the window,
/// signal the group. Reaped by init, never by the parent.
fn run_terminator(end: i64, signo: i32) -> ! {
    // SAFETY: the child owns its copies of the descriptors.
    unsafe {
        libc::close(libc::STDIN_FILENO);
        libc::close(libc::STDOUT_FILENO);
    }
    if reset_termination_handlers().is_err() {
        // SAFETY: _exit is the only safe way out of a forked child.
        unsafe { libc::_exit(1) }
    }

    sleep_until(end);

    // SAFETY: signalling our own process group.
    let pgid = unsafe { libc::getpgid(0) };
    if pgid == -1 || unsafe { libc::killpg(pgid, signo) } == -1 {
        unsafe { libc::_exit(1) }
    }
    unsafe { libc::_exit(0) }
}

/// Locate the caller's entry and cancel any previously forked terminator.
fn find_own_entry(ctx: &Ctx, store: &Store) -> Result<(Vec<Entry>, usize), ActivationError> {
    let entries = store.load()?;
    let idx = entries
        .iter()
        .position(|e| e.pgid == ctx.pgid)
        .ok_or(ActivationError::NoEntry(ctx.pgid))?;

    let previous = entries[idx].terminator;
    if previous != 0 {
        debug!(previous, "cancelling earlier terminator");
        // SAFETY: pid recorded by an earlier activation of this group. A
        // terminator that already fired is simply gone.
        if unsafe { libc::kill(previous, libc::SIGTERM) } == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(ActivationError::Os {
                    call: "kill",
                    source: err,
                });
            }
        }
    }

    Ok((entries, idx))
}

/// Block until the wall clock reaches `target` (seconds since the epoch).
///
/// Re-checks after every sleep so the wait never ends early; a target
/// already in the past returns at once.
pub fn sleep_until(target: i64) {
    let target = if target < 0 {
        UNIX_EPOCH
    } else {
        UNIX_EPOCH + Duration::from_secs(target as u64)
    };
    loop {
        match target.duration_since(SystemTime::now()) {
            Ok(remaining) if !remaining.is_zero() => thread::sleep(remaining),
            _ => return,
        }
    }
}

/// Copy stdin to stdout until EOF, flushing per chunk so downstream
/// pipeline stages see data as it arrives.
///
/// A broken pipe ends the copy without error: during a window the group's
/// end-of-window signal may tear the pipeline down while we are still
/// forwarding.
pub fn pass_stdin_to_stdout() -> io::Result<()> {
    let mut stdin = io::stdin().lock();
    let mut stdout = io::stdout().lock();
    let mut buf = [0u8; 8192];
    loop {
        let n = match stdin.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        match stdout.write_all(&buf[..n]).and_then(|()| stdout.flush()) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

/// Route SIGTERM/SIGINT/SIGQUIT through [`termination_handler`] so a kill
/// while waiting for the window start does not leak the lock.
fn install_termination_handlers() -> Result<(), ActivationError> {
    for sig in [libc::SIGTERM, libc::SIGINT, libc::SIGQUIT] {
        set_handler(sig, termination_handler as usize)?;
    }
    Ok(())
}

/// Put SIGTERM/SIGINT/SIGQUIT back to their defaults (used by the child).
fn reset_termination_handlers() -> Result<(), ActivationError> {
    for sig in [libc::SIGTERM, libc::SIGINT, libc::SIGQUIT] {
        set_handler(sig, libc::SIG_DFL)?;
    }
    Ok(())
}

/// Let init reap the terminator: ignore SIGCHLD with SA_NOCLDWAIT.
fn ignore_child_exits() -> Result<(), ActivationError> {
    // SAFETY: the struct is fully initialised before sigaction reads it.
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = libc::SIG_IGN;
        action.sa_flags = libc::SA_NOCLDWAIT;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(libc::SIGCHLD, &action, ptr::null_mut()) != 0 {
            return Err(os_err("sigaction"));
        }
    }
    Ok(())
}

fn set_handler(sig: libc::c_int, handler: usize) -> Result<(), ActivationError> {
    // SAFETY: the struct is fully initialised before sigaction reads it.
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = handler;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(sig, &action, ptr::null_mut()) != 0 {
            return Err(os_err("sigaction"));
        }
    }
    Ok(())
}

fn os_err(call: &'static str) -> ActivationError {
    ActivationError::Os {
        call,
        source: io::Error::last_os_error(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_sleep_until_past_target_returns_immediately() {
        let begin = Instant::now();
        sleep_until(0);
        sleep_until(-5);
        assert!(begin.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_sleep_until_waits_for_future_target() {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let begin = Instant::now();
        sleep_until(now + 1);
        // The target is at most one second away but never undershot by a
        // whole second.
        assert!(begin.elapsed() <= Duration::from_secs(2));
    }
}
