//! Static-linking detector (C8): a stat-keyed cache of
//! `is_statically_linked(path)` computed by invoking `objdump` (§4.8).
//!
//! Statically-linked children can't have the observer library force-loaded
//! into them, so they must fall back to the ptrace path (§4.9).

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;

use crate::error::ObserverError;
use crate::manifest::AccessManifest;

/// Ordered `(mtime_sec + ':' + path) -> bool` cache (§3
/// `StaticallyLinkedCache`). Unbounded: entries invalidate themselves by
/// construction whenever a binary's mtime changes, since the key changes
/// with it.
pub struct StaticallyLinkedCache {
    entries: Mutex<HashMap<String, bool>>,
    objdump_path: String,
}

fn cache_key(mtime_sec: i64, path: &str) -> String {
    format!("{}:{}", mtime_sec, path)
}

fn mtime_seconds(path: &Path) -> Option<i64> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path).ok().map(|m| m.mtime())
}

impl StaticallyLinkedCache {
    pub fn new() -> Self {
        StaticallyLinkedCache {
            entries: Mutex::new(HashMap::new()),
            objdump_path: "/usr/bin/objdump".to_string(),
        }
    }

    pub fn with_objdump_path(objdump_path: impl Into<String>) -> Self {
        StaticallyLinkedCache {
            entries: Mutex::new(HashMap::new()),
            objdump_path: objdump_path.into(),
        }
    }

    /// Determines whether `path` names a statically-linked executable
    /// (§4.8 steps 1-4). Forced names always win regardless of the cache.
    pub fn is_statically_linked(&self, manifest: &AccessManifest, path: &Path) -> Result<bool, ObserverError> {
        if let Some(basename) = path.file_name().and_then(|b| b.to_str()) {
            if manifest.should_force_ptrace(basename) {
                return Ok(true);
            }
        }

        let path_str = path.to_string_lossy().into_owned();
        if let Some(mtime) = mtime_seconds(path) {
            let key = cache_key(mtime, &path_str);
            if let Some(cached) = self.entries.lock().unwrap().get(&key) {
                return Ok(*cached);
            }
            let decision = self.probe_with_objdump(path)?;
            self.entries.lock().unwrap().insert(key, decision);
            return Ok(decision);
        }

        // No mtime (path vanished between exec and probe) — conservatively
        // probe without caching.
        self.probe_with_objdump(path)
    }

    /// Runs `objdump -p <path>` and classifies the binary by the presence
    /// of a `NEEDED libc.so.*` entry under a `Program Header:` section
    /// (§4.8 step 3). Any other combination is treated as statically
    /// linked.
    fn probe_with_objdump(&self, path: &Path) -> Result<bool, ObserverError> {
        let output = Command::new(&self.objdump_path)
            .arg("-p")
            .arg(path)
            .output()
            .map_err(|e| ObserverError::StaticLinkProbe(path.to_path_buf(), e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(!classify_dynamically_linked(&stdout))
    }
}

impl Default for StaticallyLinkedCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Pure classification logic factored out for testing without shelling
/// out to a real `objdump` (§4.8 step 3).
fn classify_dynamically_linked(objdump_output: &str) -> bool {
    objdump_output.contains("Program Header:") && objdump_output.contains("NEEDED               libc.so.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_binary_output_is_classified_dynamic() {
        let sample = "\nProgram Header:\n  DYNAMIC\nDynamic Section:\n  NEEDED               libc.so.6\n";
        assert!(classify_dynamically_linked(sample));
    }

    #[test]
    fn static_binary_output_has_no_program_header() {
        let sample = "\nprivate flags = 0:\n\nno symbols\n";
        assert!(!classify_dynamically_linked(sample));
    }

    #[test]
    fn program_header_without_libc_needed_is_static() {
        let sample = "\nProgram Header:\n  LOAD off\nDynamic Section:\n  NEEDED               libm.so.6\n";
        assert!(!classify_dynamically_linked(sample));
    }

    #[test]
    fn cache_key_changes_with_mtime() {
        assert_ne!(cache_key(1, "/bin/x"), cache_key(2, "/bin/x"));
    }
}
