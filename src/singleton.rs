//! The per-process singleton (§9 "Global state"): manifest + caches + FD
//! table, modeled as a lazily-initialized once-cell holding a struct of
//! independently-locked submaps, exactly as the design notes suggest.
//!
//! It survives `execve` by virtue of the pre-load library being re-loaded
//! into the new process image (§9); `fork` duplicates it for free via the
//! kernel's copy-on-write page tables (§9 "Fork/clone duplication").

use once_cell::sync::OnceCell;

use crate::event_cache::EventCache;
use crate::fd_table::FdTable;
use crate::manifest::AccessManifest;
use crate::policy::FirstWriteTracker;
use crate::static_link::StaticallyLinkedCache;

/// Holds everything C1-C4 need, one instance per process.
pub struct Observer {
    pub manifest: AccessManifest,
    pub fd_table: FdTable,
    pub event_cache: EventCache,
    pub first_write: FirstWriteTracker,
    pub static_link_cache: StaticallyLinkedCache,
    pub is_root: bool,
}

static OBSERVER: OnceCell<Observer> = OnceCell::new();

/// Returns the process-wide [`Observer`], initializing it on first call via
/// `init`. Subsequent calls (and calls from other threads, which share the
/// same address space) see the same instance (§5 "Shared resources").
pub fn get_or_init(init: impl FnOnce() -> Observer) -> &'static Observer {
    OBSERVER.get_or_init(init)
}

/// Returns the already-initialized [`Observer`], or `None` before the
/// first hook has run. Hooks invoked before bootstrap (rare, but possible
/// for libc calls made from within the dynamic loader itself) must
/// tolerate this and simply forward to the real symbol unreported.
pub fn get() -> Option<&'static Observer> {
    OBSERVER.get()
}
