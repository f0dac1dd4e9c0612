//! Access-policy engine (C5): given an event and a normalized path,
//! computes `(report?, allow?, requested-access)` (§4.5).
//!
//! Denial here is always advisory (§4.5 "Denial is advisory", §7
//! "Observable"): the syscall is never blocked by this crate, only
//! annotated for the supervisor to act on.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::manifest::{AccessManifest, ScopePolicy};
use crate::report::{AccessReport, OpCode, RequestedAccess, Status};

/// Tracks, per process, which paths have already had a first write
/// observed — backs the one-shot `first-allow-write-check` report
/// (§4.5 step 4, GLOSSARY).
pub struct FirstWriteTracker {
    seen: Mutex<HashSet<String>>,
}

impl FirstWriteTracker {
    pub fn new() -> Self {
        FirstWriteTracker {
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Returns `true` the first time `path` is passed in for this process.
    fn first_time(&self, path: &str) -> bool {
        self.seen.lock().unwrap().insert(path.to_string())
    }
}

impl Default for FirstWriteTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// The decision produced for a single event (§4.5). `should_report` folds
/// the scope's `reportExplicitly` bit together with the manifest-wide
/// "report file accesses only" flag (§4.5 step 3).
pub struct Decision {
    pub allowed: bool,
    pub should_report: bool,
    pub requested_access: RequestedAccess,
}

/// Computes whether `requested` is satisfied by `policy` (§4.5 step 2).
fn fold_allow(policy: &ScopePolicy, requested: RequestedAccess) -> bool {
    let mut ok = true;
    if requested.contains(RequestedAccess::READ) {
        ok &= policy.allow_read;
    }
    if requested.contains(RequestedAccess::WRITE) {
        ok &= policy.allow_write;
    }
    if requested.contains(RequestedAccess::PROBE) {
        ok &= policy.allow_probe;
    }
    ok
}

/// Evaluates policy for `(event, path, requested)` against `manifest`
/// (§4.5 steps 1-3). Callers that observe a non-regular-file descriptor
/// (pipes, sockets, devices) should skip calling this entirely — step 5
/// ("short-circuits: no report") is enforced by the caller never invoking
/// the engine for those, matching how the interposer already special-cases
/// `S_IFMT` before reaching policy.
pub fn evaluate(manifest: &AccessManifest, path: &str, requested: RequestedAccess) -> Decision {
    let policy = manifest.lookup(path);
    let allowed = fold_allow(&policy, requested);
    let should_report = policy.report_explicitly || !manifest.report_file_accesses_only();
    Decision {
        allowed,
        should_report,
        requested_access: requested,
    }
}

/// Builds the primary [`AccessReport`] for `operation` on `path`, folding
/// in the policy [`Decision`] (§4.5, §3 `AccessReport`).
pub fn build_report(
    manifest: &AccessManifest,
    operation: OpCode,
    path: String,
    pid: libc::pid_t,
    decision: &Decision,
    is_directory: bool,
) -> AccessReport {
    let mut report = AccessReport::new(operation, pid, manifest.pid_of_root_process, manifest.pip_id, path);
    report.requested_access = decision.requested_access;
    report.status = if decision.allowed { Status::Allowed } else { Status::Denied };
    report.report_explicitly = decision.should_report;
    report.should_report = decision.should_report;
    report.is_directory = is_directory;
    report
}

/// Emits the one-shot `first-allow-write-check` report the first time
/// `path` is written by this process (§4.5 step 4). `path_existed` should
/// be the result of a `stat` performed *before* the write syscall runs.
pub fn first_allow_write_check(
    tracker: &FirstWriteTracker,
    manifest: &AccessManifest,
    path: &str,
    pid: libc::pid_t,
    path_existed: bool,
) -> Option<AccessReport> {
    if !tracker.first_time(path) {
        return None;
    }
    let mut report = AccessReport::new(
        OpCode::FirstAllowWriteCheck,
        pid,
        manifest.pid_of_root_process,
        manifest.pip_id,
        path.to_string(),
    );
    report.status = if !path_existed { Status::Allowed } else { Status::Denied };
    report.requested_access = RequestedAccess::WRITE;
    Some(report)
}

/// `true` when `mode` (from `stat`/`lstat`) names something other than a
/// regular file or directory — sockets, pipes, character/block devices —
/// which the engine never reports (§4.5 step 5, §1 Non-goals).
pub fn is_non_file_descriptor(mode: libc::mode_t) -> bool {
    let file_type = mode & libc::S_IFMT;
    !matches!(file_type, libc::S_IFREG | libc::S_IFDIR | libc::S_IFLNK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ManifestFlags, ManifestWire};
    use std::fs;

    fn manifest_with(scopes: Vec<(&str, ScopePolicy)>, flags: ManifestFlags) -> AccessManifest {
        let wire = ManifestWire {
            pip_id: 1,
            pid_of_root_process: 1,
            report_pipe_path: "/tmp/p".into(),
            preload_library_path: "/tmp/l.so".into(),
            flags,
            scopes: scopes.into_iter().map(|(p, s)| (p.to_string(), s)).collect(),
            forced_ptrace_names: vec![],
            ptrace_mq_name: None,
        };
        let bytes = bincode::serialize(&wire).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.bin");
        fs::write(&path, &bytes).unwrap();
        // Leak the tempdir so the file outlives this helper; acceptable in tests.
        std::mem::forget(dir);
        AccessManifest::load(&path).unwrap()
    }

    #[test]
    fn denies_write_outside_writeable_mount() {
        let manifest = manifest_with(
            vec![(
                "/src",
                ScopePolicy {
                    allow_read: true,
                    allow_write: false,
                    allow_probe: true,
                    report_explicitly: true,
                    is_writeable_mount: false,
                },
            )],
            ManifestFlags::empty(),
        );
        let decision = evaluate(&manifest, "/src/main.rs", RequestedAccess::WRITE);
        assert!(!decision.allowed);
    }

    #[test]
    fn allows_write_inside_writeable_mount() {
        let manifest = manifest_with(
            vec![(
                "/out",
                ScopePolicy {
                    allow_read: true,
                    allow_write: true,
                    allow_probe: true,
                    report_explicitly: true,
                    is_writeable_mount: true,
                },
            )],
            ManifestFlags::empty(),
        );
        let decision = evaluate(&manifest, "/out/a.o", RequestedAccess::WRITE);
        assert!(decision.allowed);
    }

    #[test]
    fn report_file_accesses_only_suppresses_non_explicit_scopes() {
        let manifest = manifest_with(
            vec![(
                "/src",
                ScopePolicy {
                    allow_read: true,
                    allow_write: false,
                    allow_probe: true,
                    report_explicitly: false,
                    is_writeable_mount: false,
                },
            )],
            ManifestFlags::REPORT_FILE_ACCESSES_ONLY,
        );
        let decision = evaluate(&manifest, "/src/main.rs", RequestedAccess::READ);
        assert!(!decision.should_report);
    }

    #[test]
    fn first_write_check_fires_once_per_path() {
        let manifest = manifest_with(vec![], ManifestFlags::empty());
        let tracker = FirstWriteTracker::new();
        let first = first_allow_write_check(&tracker, &manifest, "/out/a", 10, false);
        assert!(first.is_some());
        assert_eq!(first.unwrap().status, Status::Allowed);

        let second = first_allow_write_check(&tracker, &manifest, "/out/a", 10, false);
        assert!(second.is_none());
    }

    #[test]
    fn first_write_check_denied_status_when_path_already_existed() {
        let manifest = manifest_with(vec![], ManifestFlags::empty());
        let tracker = FirstWriteTracker::new();
        let report = first_allow_write_check(&tracker, &manifest, "/out/b", 10, true).unwrap();
        assert_eq!(report.status, Status::Denied);
    }

    #[test]
    fn non_file_descriptor_detection() {
        assert!(is_non_file_descriptor(libc::S_IFSOCK));
        assert!(is_non_file_descriptor(libc::S_IFIFO));
        assert!(is_non_file_descriptor(libc::S_IFCHR));
        assert!(!is_non_file_descriptor(libc::S_IFREG));
        assert!(!is_non_file_descriptor(libc::S_IFDIR));
    }
}
