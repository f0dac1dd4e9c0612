//! Libc interposer (C7): ~150 function shims that normalize inputs,
//! consult C5+C6, then forward to the real libc symbol (§4.7).
//!
//! Every shim follows the same five steps from §4.7: locate the real
//! symbol (lazy `dlsym`, [`real_symbols`]), marshal inputs (C2/C3), consult
//! policy and the cache (C4/C5), emit (C6), then call through and return
//! the real result with `errno` preserved. The family modules below group
//! shims by reporting semantics, mirroring the table in §4.7 — each shim
//! is hand-written against the shared [`crate::real_symbol`] macro (one
//! `dlsym` cache per symbol) and the helpers in this module ([`report_event`]
//! and friends), rather than generated.

pub mod access;
pub mod dir_mutate;
pub mod exec;
pub mod open;
pub mod perm_time;
pub mod process;
pub mod readlink;
pub mod real_symbols;
pub mod stat_family;
pub mod write_content;

use libc::{c_int, pid_t};

use crate::bootstrap::observer;
use crate::path_resolver::{self, Normalized, SelfProcessContext};
use crate::policy::{self, Decision};
use crate::report::{OpCode, RequestedAccess};
use crate::singleton::Observer;

/// The current process's pid, as the manifest and every report need it.
pub fn current_pid() -> pid_t {
    std::process::id() as pid_t
}

/// Normalizes `path` (absolute or relative to `pid`'s cwd) and reports each
/// traversed symlink through the event cache, deduplicated exactly like
/// any other report (§4.2 step 3, §8 property 2).
pub fn resolve_and_report_symlinks(observer: &Observer, path: &str, no_follow: bool) -> Option<Normalized> {
    let ctx = SelfProcessContext;
    let normalized = path_resolver::normalize(&ctx, path, no_follow, current_pid())?;
    for link in &normalized.traversed_symlinks {
        emit_simple(observer, OpCode::Readlink, link.link_path.clone(), RequestedAccess::PROBE);
    }
    Some(normalized)
}

/// Same as [`resolve_and_report_symlinks`] but relative to `dirfd`
/// (§4.2 `normalize_at`).
pub fn resolve_at_and_report_symlinks(
    observer: &Observer,
    dirfd: c_int,
    path: &str,
    no_follow: bool,
) -> Option<Normalized> {
    let ctx = SelfProcessContext;
    let normalized = path_resolver::normalize_at(&ctx, dirfd, path, no_follow, current_pid())?;
    for link in &normalized.traversed_symlinks {
        emit_simple(observer, OpCode::Readlink, link.link_path.clone(), RequestedAccess::PROBE);
    }
    Some(normalized)
}

/// Runs the full report pipeline for a single-path event against an
/// explicit `pid`: cache check (C4), policy (C5), and transport (C6). This
/// is the common path every family handler below funnels through —
/// `fork`/`exec`/`exit` included, since nothing in §4.7's hook-family table
/// exempts them from the policy step, only from the cache (their `OpCode`s
/// already return `None` from [`OpCode::cache_class`]).
fn report_event_for_pid(observer: &Observer, operation: OpCode, path: String, requested: RequestedAccess, is_directory: bool, pid: pid_t) {
    if let Some(class) = operation.cache_class() {
        if observer.event_cache.check_and_insert(class, &path) {
            return; // duplicate within this process lifetime (§4.4)
        }
    }
    let decision: Decision = policy::evaluate(&observer.manifest, &path, requested);
    if !decision.should_report {
        return;
    }
    let report = policy::build_report(&observer.manifest, operation, path, pid, &decision, is_directory);
    crate::transport::emit_or_log(&observer.manifest.report_pipe_path, &report);
}

/// [`report_event_for_pid`] for the common case of reporting on behalf of
/// the calling process itself.
pub fn report_event(observer: &Observer, operation: OpCode, path: String, requested: RequestedAccess, is_directory: bool) {
    report_event_for_pid(observer, operation, path, requested, is_directory, current_pid());
}

/// Convenience for reports that never need `is_directory` set (readlink,
/// access, stat of a path we haven't stat'd yet).
pub fn emit_simple(observer: &Observer, operation: OpCode, path: String, requested: RequestedAccess) {
    report_event(observer, operation, path, requested, false);
}

/// Emits a write event plus its one-shot first-allow-write-check sibling
/// (§4.5 step 4, §4.7 "open-for-write").
pub fn report_write_with_first_check(observer: &Observer, operation: OpCode, path: String, path_existed: bool) {
    report_event(observer, operation, path.clone(), RequestedAccess::WRITE, false);
    if let Some(first_check) = policy::first_allow_write_check(&observer.first_write, &observer.manifest, &path, current_pid(), path_existed) {
        crate::transport::emit_or_log(&observer.manifest.report_pipe_path, &first_check);
    }
}

/// `stat`s `path` with the real (un-hooked) libc call, used to decide
/// is-directory / did-it-already-exist without re-entering a shim.
pub fn real_stat_exists_and_is_dir(path: &str) -> (bool, bool) {
    let c_path = match std::ffi::CString::new(path) {
        Ok(p) => p,
        Err(_) => return (false, false),
    };
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    // SAFETY: c_path is NUL-terminated; st is a valid out-param buffer.
    let rc = unsafe { libc::stat(c_path.as_ptr(), &mut st) };
    if rc != 0 {
        return (false, false);
    }
    (true, (st.st_mode & libc::S_IFMT) == libc::S_IFDIR)
}

/// Reports a `fork`-family event for `(parent_pid, child_pid)`, subject to
/// the same policy check as every other event (§4.5; a manifest-wide
/// `REPORT_FILE_ACCESSES_ONLY` flag can suppress it). Per invariant 4 (§3)
/// this must be emitted before any report carrying `pid == child_pid`;
/// callers emit it on the parent's thread before the real `fork`/`clone`
/// returns to the child, matching the ordering guarantee in §5.
pub fn report_fork(observer: &Observer, child_pid: pid_t) {
    report_event_for_pid(observer, OpCode::Fork, String::new(), RequestedAccess::empty(), false, child_pid);
}

/// Reports the two-part `exec` event: basename first, then the fully
/// resolved path, both carrying the same pid (§3 invariant 5, §8 property
/// 5), each going through the same policy check as any other path-carrying
/// event.
pub fn report_exec_pair(observer: &Observer, resolved_path: &str) {
    let basename = std::path::Path::new(resolved_path)
        .file_name()
        .map(|b| b.to_string_lossy().into_owned())
        .unwrap_or_else(|| resolved_path.to_string());
    let pid = current_pid();

    report_event_for_pid(observer, OpCode::Exec, basename, RequestedAccess::READ | RequestedAccess::PROBE, false, pid);
    report_event_for_pid(observer, OpCode::Exec, resolved_path.to_string(), RequestedAccess::READ | RequestedAccess::PROBE, false, pid);
}

/// Reports the `exit` event for the calling process, including the exit
/// `status` as the report's `error` field (mirroring the ptrace path,
/// which can only ever observe `error = 0` for events other than the
/// return-value-captured ones, §4.9). Subject to the same policy check as
/// every other event.
pub fn report_exit(observer: &Observer, status: c_int) {
    let pid = current_pid();
    let decision: Decision = policy::evaluate(&observer.manifest, "", RequestedAccess::empty());
    if !decision.should_report {
        return;
    }
    let mut report = policy::build_report(&observer.manifest, OpCode::Exit, String::new(), pid, &decision, false);
    report.error = status;
    crate::transport::emit_or_log(&observer.manifest.report_pipe_path, &report);
}

/// Convenience used by every shim to get the bootstrapped [`Observer`],
/// initializing it if this is the very first hook to fire in this process
/// (§4.10).
pub fn obs() -> &'static Observer {
    observer()
}
