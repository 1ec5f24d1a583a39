//! Shared memory persistence for the registry.
//!
//! The segment is a fixed 64 KiB of newline-separated records followed by
//! zero bytes. Loading copies the text out, decodes line by line, and drops
//! entries whose owning process group no longer exists, so a dead pipeline's
//! reservation disappears on the next read and the next save makes the
//! erasure persistent.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::FromRawFd;

use memmap2::MmapMut;
use thiserror::Error;
use tracing::debug;

use crate::config::{MAX_ENTRIES, SEGMENT_SIZE};
use crate::entry::Entry;

/// Errors touching the shared memory segment.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object name cannot be handed to the OS.
    #[error("invalid shared memory name: {0:?}")]
    InvalidName(String),

    /// A syscall against the segment failed.
    #[error("{call} {name:?}: {source}")]
    Os {
        call: &'static str,
        name: String,
        source: io::Error,
    },

    /// The encoded registry does not fit in the segment.
    #[error("registry does not fit in the segment ({len} of {capacity} bytes)")]
    SegmentOverflow { len: usize, capacity: usize },
}

/// Handle on one named registry segment.
#[derive(Debug, Clone)]
pub struct Store {
    name: String,
    cname: CString,
}

impl Store {
    /// Create a handle for the named segment. No OS object is touched yet.
    pub fn new(name: &str) -> Result<Self, StoreError> {
        let cname =
            CString::new(name).map_err(|_| StoreError::InvalidName(name.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            cname,
        })
    }

    /// The object name this handle refers to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Load all live entries.
    ///
    /// Creates the segment if it does not exist. Lines that fail to decode
    /// are skipped (a torn concurrent write leaves at most one such line),
    /// as are entries whose owning process group is gone. Loading stops at
    /// [`MAX_ENTRIES`].
    pub fn load(&self) -> Result<Vec<Entry>, StoreError> {
        let map = self.map()?;
        let text = String::from_utf8_lossy(segment_text(&map)).into_owned();
        drop(map);

        let mut entries = Vec::new();
        for line in text.split('\n') {
            if line.is_empty() {
                continue;
            }
            let entry = match Entry::decode(line) {
                Ok(entry) => entry,
                Err(err) => {
                    debug!("skipping malformed registry line: {err}");
                    continue;
                }
            };
            if !process_group_alive(entry.pgid) {
                debug!(pgid = entry.pgid, "dropping entry for dead process group");
                continue;
            }
            entries.push(entry);
            if entries.len() == MAX_ENTRIES {
                break;
            }
        }

        Ok(entries)
    }

    /// Overwrite the segment with the given entries.
    pub fn save(&self, entries: &[Entry]) -> Result<(), StoreError> {
        let mut text = String::new();
        for entry in entries {
            text.push_str(&entry.encode());
        }
        // Leave at least one zero byte so the text stays terminated.
        if text.len() >= SEGMENT_SIZE {
            return Err(StoreError::SegmentOverflow {
                len: text.len(),
                capacity: SEGMENT_SIZE,
            });
        }

        let mut map = self.map()?;
        map.fill(0);
        map[..text.len()].copy_from_slice(text.as_bytes());
        debug!(entries = entries.len(), bytes = text.len(), "saved registry");
        Ok(())
    }

    /// Remove the shared memory object. Missing objects are not an error.
    pub fn unlink(&self) -> Result<(), StoreError> {
        // SAFETY: the name is a valid NUL-terminated string.
        if unsafe { libc::shm_unlink(self.cname.as_ptr()) } == -1 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ENOENT) | Some(libc::EINVAL) => {}
                _ => {
                    return Err(self.os_err("shm_unlink", err));
                }
            }
        }
        Ok(())
    }

    /// Open-or-create the segment, size it, and map it read-write.
    fn map(&self) -> Result<MmapMut, StoreError> {
        // SAFETY: the name is a valid NUL-terminated string.
        let fd = unsafe {
            libc::shm_open(
                self.cname.as_ptr(),
                libc::O_RDWR | libc::O_CREAT,
                libc::S_IRUSR | libc::S_IWUSR,
            )
        };
        if fd == -1 {
            return Err(self.os_err("shm_open", io::Error::last_os_error()));
        }
        // SAFETY: fd was just returned by shm_open and is owned here.
        let file = unsafe { File::from_raw_fd(fd) };

        let len = file
            .metadata()
            .map_err(|e| self.os_err("fstat", e))?
            .len();
        if len == 0 {
            file.set_len(SEGMENT_SIZE as u64)
                .map_err(|e| self.os_err("ftruncate", e))?;
        }

        // SAFETY: the mapping is shared across processes on purpose; all
        // readers tolerate torn lines and all writers hold the semaphore.
        let map = unsafe {
            memmap2::MmapOptions::new()
                .len(SEGMENT_SIZE)
                .map_mut(&file)
                .map_err(|e| self.os_err("mmap", e))?
        };
        // The descriptor can go away; the mapping stays valid.
        drop(file);
        Ok(map)
    }

    fn os_err(&self, call: &'static str, source: io::Error) -> StoreError {
        StoreError::Os {
            call,
            name: self.name.clone(),
            source,
        }
    }

    #[cfg(test)]
    fn write_raw(&self, bytes: &[u8]) {
        let mut map = self.map().unwrap();
        map.fill(0);
        map[..bytes.len()].copy_from_slice(bytes);
    }
}

/// The textual region of the segment: everything before the first zero byte.
fn segment_text(map: &MmapMut) -> &[u8] {
    let end = map.iter().position(|&b| b == 0).unwrap_or(map.len());
    &map[..end]
}

/// Probe a process group with a null signal.
fn process_group_alive(pgid: libc::pid_t) -> bool {
    // SAFETY: signal 0 performs the permission and existence checks without
    // delivering anything.
    unsafe { libc::killpg(pgid, 0) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    /// Each test gets its own segment so they can run in parallel.
    fn test_store() -> Store {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        Store::new(&format!("/shm_tm_store_test_{}_{}", std::process::id(), n)).unwrap()
    }

    fn own_entry(start: i64, duration: u32, caption: &str) -> Entry {
        Entry {
            // SAFETY: getpgid(0) queries the calling process's own group.
            pgid: unsafe { libc::getpgid(0) },
            lock: false,
            terminator: 0,
            start,
            duration,
            caption: caption.to_string(),
        }
    }

    #[test]
    fn test_load_empty_segment() {
        let store = test_store();
        assert!(store.load().unwrap().is_empty());
        store.unlink().unwrap();
    }

    #[test]
    fn test_save_load_round_trip() {
        let store = test_store();
        let entries = vec![own_entry(1000, 600, "first"), own_entry(2000, 300, "")];
        store.save(&entries).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, entries);
        store.unlink().unwrap();
    }

    #[test]
    fn test_save_shrinks_registry() {
        let store = test_store();
        store
            .save(&[own_entry(1000, 600, "a"), own_entry(2000, 600, "b")])
            .unwrap();
        store.save(&[own_entry(3000, 600, "c")]).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].caption, "c");
        store.unlink().unwrap();
    }

    #[test]
    fn test_dead_process_group_dropped() {
        let store = test_store();
        let mut dead = own_entry(1000, 600, "dead");
        // A pid far above any real pid_max; the probe reports no such
        // process and the entry must vanish.
        dead.pgid = 1_999_999_999;
        store.save(&[dead, own_entry(5000, 600, "live")]).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].caption, "live");
        store.unlink().unwrap();
    }

    #[test]
    fn test_malformed_line_skipped() {
        let store = test_store();
        let good = own_entry(1000, 600, "good");
        let mut raw = Vec::new();
        raw.extend_from_slice(b"not a record\n");
        raw.extend_from_slice(good.encode().as_bytes());
        raw.extend_from_slice(b"123:9:9:torn");
        store.write_raw(&raw);

        let loaded = store.load().unwrap();
        assert_eq!(loaded, vec![good]);
        store.unlink().unwrap();
    }

    #[test]
    fn test_save_rejects_overflow() {
        let store = test_store();
        let caption = "x".repeat(250);
        let entries: Vec<Entry> = (0..300)
            .map(|i| own_entry(i64::from(i) * 1000, 600, &caption))
            .collect();
        assert!(matches!(
            store.save(&entries),
            Err(StoreError::SegmentOverflow { .. })
        ));
        store.unlink().unwrap();
    }

    #[test]
    fn test_unlink_missing_is_ok() {
        let store = Store::new("/shm_tm_store_test_never_created").unwrap();
        store.unlink().unwrap();
        store.unlink().unwrap();
    }
}
