//! Interval arithmetic over schedule entries.
//!
//! Two pure functions: the overlap test used to reject double bookings, and
//! the gap enumeration behind `unoccupied` and `autoextend`. Both operate on
//! plain slices; all I/O stays with the callers.

use crate::entry::Entry;

/// True iff `candidate` overlaps any entry owned by a different process
/// group. Entries with the candidate's own pgid are skipped, since adding a
/// schedule overwrites the caller's previous one.
pub fn has_conflict(candidate: &Entry, existing: &[Entry]) -> bool {
    existing.iter().any(|e| {
        e.pgid != candidate.pgid && e.start < candidate.end() && e.end() > candidate.start
    })
}

/// Enumerate the maximal unoccupied windows inside `[begin, begin + range)`.
///
/// The returned entries are ordered by start, owned by `pgid`, unlocked,
/// unactivated, and carry `caption`. Zero-length windows are never emitted,
/// and the union of the result with the clipped occupied intervals covers
/// the whole range.
pub fn unoccupied_windows(
    existing: &[Entry],
    begin: i64,
    range: u32,
    pgid: libc::pid_t,
    caption: &str,
) -> Vec<Entry> {
    let mut sorted: Vec<&Entry> = existing.iter().collect();
    sorted.sort_by_key(|e| e.start);

    let range_end = begin + i64::from(range);
    let mut head = begin;
    let mut windows = Vec::new();

    let gap = |start: i64, end: i64| Entry {
        pgid,
        lock: false,
        terminator: 0,
        start,
        duration: (end - start) as u32,
        caption: caption.to_string(),
    };

    for e in sorted {
        if head > range_end {
            return windows;
        }
        if e.start > head {
            let end = e.start.min(range_end);
            if end > head {
                windows.push(gap(head, end));
            }
        }
        head = head.max(e.end());
    }

    if head < range_end {
        windows.push(gap(head, range_end));
    }

    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pgid: libc::pid_t, start: i64, duration: u32) -> Entry {
        Entry {
            pgid,
            lock: false,
            terminator: 0,
            start,
            duration,
            caption: "x".to_string(),
        }
    }

    #[test]
    fn test_conflict_detects_overlap() {
        let existing = vec![entry(100, 1000, 600)];
        assert!(has_conflict(&entry(200, 1200, 600), &existing));
        assert!(has_conflict(&entry(200, 500, 600), &existing));
        assert!(has_conflict(&entry(200, 1100, 100), &existing));
    }

    #[test]
    fn test_conflict_ignores_touching_windows() {
        // Half-open windows: [1000,1600) and [1600,2200) do not overlap.
        let existing = vec![entry(100, 1000, 600)];
        assert!(!has_conflict(&entry(200, 1600, 600), &existing));
        assert!(!has_conflict(&entry(200, 400, 600), &existing));
    }

    #[test]
    fn test_conflict_ignores_same_pgid() {
        let existing = vec![entry(100, 1000, 600)];
        assert!(!has_conflict(&entry(100, 1200, 600), &existing));
    }

    #[test]
    fn test_windows_empty_registry_is_one_gap() {
        let windows = unoccupied_windows(&[], 500, 2000, 7, "c");
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].start, 500);
        assert_eq!(windows[0].duration, 2000);
        assert_eq!(windows[0].pgid, 7);
        assert_eq!(windows[0].caption, "c");
        assert!(!windows[0].lock);
        assert_eq!(windows[0].terminator, 0);
    }

    #[test]
    fn test_windows_gap_before_and_after_entry() {
        let existing = vec![entry(100, 1000, 600)];
        let windows = unoccupied_windows(&existing, 500, 2000, 7, "c");
        assert_eq!(windows.len(), 2);
        assert_eq!((windows[0].start, windows[0].end()), (500, 1000));
        assert_eq!((windows[1].start, windows[1].end()), (1600, 2500));
    }

    #[test]
    fn test_windows_entry_straddles_begin() {
        let existing = vec![entry(100, 400, 300)];
        let windows = unoccupied_windows(&existing, 500, 1000, 7, "c");
        assert_eq!(windows.len(), 1);
        assert_eq!((windows[0].start, windows[0].end()), (700, 1500));
    }

    #[test]
    fn test_windows_entry_clipped_at_range_end() {
        let existing = vec![entry(100, 1400, 600)];
        let windows = unoccupied_windows(&existing, 500, 1000, 7, "c");
        assert_eq!(windows.len(), 1);
        assert_eq!((windows[0].start, windows[0].end()), (500, 1400));
    }

    #[test]
    fn test_windows_fully_booked_range() {
        let existing = vec![entry(100, 0, 5000)];
        assert!(unoccupied_windows(&existing, 500, 1000, 7, "c").is_empty());
    }

    #[test]
    fn test_windows_skip_zero_length_gaps() {
        // Adjacent entries leave no space between them.
        let existing = vec![entry(100, 500, 500), entry(200, 1000, 500)];
        let windows = unoccupied_windows(&existing, 500, 2000, 7, "c");
        assert_eq!(windows.len(), 1);
        assert_eq!((windows[0].start, windows[0].end()), (1500, 2500));
    }

    #[test]
    fn test_windows_unsorted_input() {
        let existing = vec![entry(200, 2000, 200), entry(100, 1000, 200)];
        let windows = unoccupied_windows(&existing, 900, 1500, 7, "c");
        assert_eq!(windows.len(), 3);
        assert_eq!((windows[0].start, windows[0].end()), (900, 1000));
        assert_eq!((windows[1].start, windows[1].end()), (1200, 2000));
        assert_eq!((windows[2].start, windows[2].end()), (2200, 2400));
    }

    #[test]
    fn test_windows_cover_range_exactly() {
        // Union of gaps plus clipped occupied intervals equals the range.
        let existing = vec![entry(100, 1000, 200), entry(200, 1500, 300)];
        let begin = 800;
        let range = 1500;
        let windows = unoccupied_windows(&existing, begin, range, 7, "c");

        let mut covered: i64 = windows.iter().map(|w| i64::from(w.duration)).sum();
        for e in &existing {
            let start = e.start.max(begin);
            let end = e.end().min(begin + i64::from(range));
            if end > start {
                covered += end - start;
            }
        }
        assert_eq!(covered, i64::from(range));

        // And no gap overlaps an existing entry.
        for w in &windows {
            assert!(!has_conflict(w, &existing));
        }
    }
}
