//! FD table (C3): per-process map from open descriptor to last-known path
//! (§3 `FDTable`, §4.3).
//!
//! Disabled entirely while the ptrace tracer drives a tracee — the tracer
//! cannot see the tracee's libc calls, so it always falls back to
//! `/proc/<pid>/fd/N` via [`crate::path_resolver::TraceeContext`] instead.

use std::sync::RwLock;

use crate::path_resolver::proc_fd;

/// Slots above this index are never cached; callers read
/// `/proc/self/fd/N` directly (§3 `FDTable`).
pub const MAX_FD: usize = 1024;

/// Lock-free-in-spirit (single `RwLock` over a fixed array, never resized)
/// per-process FD table.
pub struct FdTable {
    slots: RwLock<Vec<Option<String>>>,
    enabled: std::sync::atomic::AtomicBool,
}

impl FdTable {
    pub fn new() -> Self {
        FdTable {
            slots: RwLock::new(vec![None; MAX_FD]),
            enabled: std::sync::atomic::AtomicBool::new(true),
        }
    }

    /// Disables the table (used while the ptrace tracer owns a tracee,
    /// §4.3 "Disabled entirely while...").
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, std::sync::atomic::Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Records that `fd` now refers to `path`.
    pub fn record(&self, fd: i32, path: String) {
        if !self.is_enabled() || fd < 0 || fd as usize >= MAX_FD {
            return;
        }
        if let Ok(mut slots) = self.slots.write() {
            slots[fd as usize] = Some(path);
        }
    }

    /// Invalidates `fd`'s entry — called on `close`, `dup`, `dup2`, `dup3`,
    /// `fcntl(F_DUPFD*)`, `pipe`, `socket`, and any internal open that
    /// would reuse the descriptor (§4.3).
    pub fn invalidate(&self, fd: i32) {
        if fd < 0 || fd as usize >= MAX_FD {
            return;
        }
        if let Ok(mut slots) = self.slots.write() {
            slots[fd as usize] = None;
        }
    }

    /// Returns the cached path for `fd`, falling back to
    /// `/proc/<pid>/fd/N` for descriptors outside the cached range or with
    /// no cached entry (§4.3 `get(fd)`).
    pub fn get(&self, fd: i32, pid: libc::pid_t) -> Option<String> {
        if fd == libc::AT_FDCWD {
            return None;
        }
        if self.is_enabled() && (fd as usize) < MAX_FD {
            if let Ok(slots) = self.slots.read() {
                if let Some(path) = &slots[fd as usize] {
                    return Some(path.clone());
                }
            }
        }
        proc_fd(pid, fd)
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_get_returns_cached_path() {
        let table = FdTable::new();
        table.record(3, "/tmp/x".to_string());
        assert_eq!(table.get(3, std::process::id() as i32), Some("/tmp/x".to_string()));
    }

    #[test]
    fn invalidate_clears_the_slot() {
        let table = FdTable::new();
        table.record(4, "/tmp/y".to_string());
        table.invalidate(4);
        // Falls through to /proc lookup, which will not match our fake path.
        assert_ne!(table.get(4, std::process::id() as i32), Some("/tmp/y".to_string()));
    }

    #[test]
    fn disabled_table_never_reports_cached_entries() {
        let table = FdTable::new();
        table.record(5, "/tmp/z".to_string());
        table.set_enabled(false);
        assert_ne!(table.get(5, std::process::id() as i32), Some("/tmp/z".to_string()));
    }

    #[test]
    fn out_of_range_fd_is_ignored_on_record() {
        let table = FdTable::new();
        table.record(i32::MAX, "/tmp/oob".to_string());
        // Should not panic; get() falls through to /proc lookup and finds nothing.
        assert_eq!(table.get(i32::MAX, std::process::id() as i32), None);
    }
}
