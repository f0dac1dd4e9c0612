//! Event cache (C4): deduplicates redundant reports per
//! `(event-class, path)` within the process lifetime (§3 `PathCache`,
//! §4.4).
//!
//! Guarded by a 1 ms best-effort `try_lock`; on contention the report is
//! never suppressed, trading a few duplicate reports for never blocking
//! the syscall path (§5 "Suspension points").

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use crate::report::EventClass;

const TRY_LOCK_BUDGET: Duration = Duration::from_millis(1);

/// Per-process singleton cache. Not cleared across `execve` (§9 Open
/// Questions: preserved intentionally, even though it can suppress a
/// legitimate first-access report for a newly exec'd binary).
pub struct EventCache {
    seen: Mutex<HashMap<EventClass, HashSet<String>>>,
}

impl EventCache {
    pub fn new() -> Self {
        EventCache {
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts `(class, path)`. Returns `true` if this is a repeat (the
    /// caller should suppress the report), `false` on first observation.
    ///
    /// A `try_lock` timeout (simulated here by a short spin since
    /// `std::sync::Mutex` has no native timed lock) counts as contention:
    /// the event is treated as novel so the report is never suppressed.
    pub fn check_and_insert(&self, class: EventClass, path: &str) -> bool {
        let deadline = std::time::Instant::now() + TRY_LOCK_BUDGET;
        loop {
            match self.seen.try_lock() {
                Ok(mut guard) => {
                    let set = guard.entry(class).or_default();
                    return !set.insert(path.to_string());
                }
                Err(_) => {
                    if std::time::Instant::now() >= deadline {
                        return false;
                    }
                    std::thread::yield_now();
                }
            }
        }
    }
}

impl Default for EventCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::OpCode;

    #[test]
    fn first_observation_is_not_a_repeat() {
        let cache = EventCache::new();
        let hit = cache.check_and_insert(EventClass::Stat, "/etc/hosts");
        assert!(!hit);
    }

    #[test]
    fn second_observation_of_same_class_and_path_is_a_repeat() {
        let cache = EventCache::new();
        cache.check_and_insert(EventClass::Stat, "/etc/hosts");
        let hit = cache.check_and_insert(EventClass::Stat, "/etc/hosts");
        assert!(hit);
    }

    #[test]
    fn different_paths_are_independent() {
        let cache = EventCache::new();
        cache.check_and_insert(EventClass::Stat, "/etc/hosts");
        let hit = cache.check_and_insert(EventClass::Stat, "/etc/passwd");
        assert!(!hit);
    }

    #[test]
    fn write_and_stat_families_coalesce_distinct_ops() {
        let cache = EventCache::new();
        assert_eq!(OpCode::Write.cache_class(), Some(EventClass::Write));
        assert_eq!(OpCode::SetMode.cache_class(), Some(EventClass::Write));
        assert_eq!(OpCode::Access.cache_class(), Some(EventClass::Stat));

        cache.check_and_insert(EventClass::Write, "/out/f");
        let hit = cache.check_and_insert(EventClass::Write, "/out/f");
        assert!(hit, "write and setmode share the WRITE class key");
    }

    #[test]
    fn fork_exec_exit_bypass_the_cache() {
        assert_eq!(OpCode::Fork.cache_class(), None);
        assert_eq!(OpCode::Exec.cache_class(), None);
        assert_eq!(OpCode::Exit.cache_class(), None);
        assert_eq!(OpCode::RenameSource.cache_class(), None);
    }
}
