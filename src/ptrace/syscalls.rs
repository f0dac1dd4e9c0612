//! Per-syscall argument marshalling for the tracer (§4.9 "Argument
//! marshalling"), mirroring the interposer's own family logic in
//! [`crate::interpose`] but reading arguments from registers instead of C
//! call parameters, and resolving paths against the tracee's own
//! `/proc/<pid>` rather than the daemon's.

use nix::unistd::Pid;

use crate::path_resolver::{self, TraceeContext};
use crate::policy;
use crate::ptrace::registers::SyscallRegisters;
use crate::ptrace::tracer::TraceeState;
use crate::report::{AccessReport, OpCode, RequestedAccess};

// x86_64 syscall numbers this table understands; must stay a subset of
// `crate::ptrace::seccomp::TRACED_SYSCALLS`.
const SYS_STAT: u64 = 4;
const SYS_FSTAT: u64 = 5;
const SYS_LSTAT: u64 = 6;
const SYS_ACCESS: u64 = 21;
const SYS_RENAME: u64 = 82;
const SYS_MKDIR: u64 = 83;
const SYS_RMDIR: u64 = 84;
const SYS_UNLINK: u64 = 87;
const SYS_READLINK: u64 = 89;
const SYS_CHMOD: u64 = 90;
const SYS_OPEN: u64 = 2;
const SYS_OPENAT: u64 = 257;
const SYS_MKDIRAT: u64 = 258;
const SYS_UNLINKAT: u64 = 263;
const SYS_RENAMEAT: u64 = 264;
const SYS_READLINKAT: u64 = 267;
const SYS_FACCESSAT: u64 = 269;
const SYS_EXECVE: u64 = 59;

/// `true` for the handful of syscalls whose report needs the real return
/// value (§4.9 "Return-value capture"): `mkdir`, `rmdir`, `mkdirat`. The
/// caller must resume with one more `PTRACE_SYSCALL` + `waitpid` before
/// calling [`handle`] for these.
pub fn wants_return_value(syscall_nr: u64) -> bool {
    matches!(syscall_nr, SYS_MKDIR | SYS_RMDIR | SYS_MKDIRAT)
}

fn read_path_arg(pid: Pid, regs: &SyscallRegisters, index: usize) -> Option<String> {
    crate::ptrace::registers::read_c_string(pid, regs.arg(index))
}

fn resolve(state: &TraceeState, pid: Pid, path: &str, no_follow: bool) -> String {
    path_resolver::normalize(&TraceeContext, path, no_follow, pid.as_raw())
        .map(|n| n.path)
        .unwrap_or_else(|| path.to_string())
}

fn resolve_at(state: &TraceeState, pid: Pid, dirfd: i32, path: &str, no_follow: bool) -> String {
    let _ = state;
    path_resolver::normalize_at(&TraceeContext, dirfd, path, no_follow, pid.as_raw())
        .map(|n| n.path)
        .unwrap_or_else(|| path.to_string())
}

fn emit(state: &TraceeState, pid: Pid, operation: OpCode, path: String, requested: RequestedAccess, error: i32) {
    if let Some(class) = operation.cache_class() {
        if state.event_cache.check_and_insert(class, &path) {
            return;
        }
    }
    let decision = policy::evaluate(&state.manifest, &path, requested);
    if !decision.should_report {
        return;
    }
    let mut report: AccessReport = policy::build_report(&state.manifest, operation, path, pid.as_raw(), &decision, false);
    report.error = error;
    crate::transport::emit_or_log(&state.manifest.report_pipe_path, &report);
}

/// Decodes and reports the syscall named by `regs.orig_rax`. `retval` is
/// `Some` only for the syscalls [`wants_return_value`] flags; every other
/// syscall is reported with `error = 0` (§4.9 "Return-value capture").
pub fn handle(state: &TraceeState, pid: Pid, regs: &SyscallRegisters, retval: Option<i64>) {
    let error = retval.map(|v| if v < 0 { -v as i32 } else { 0 }).unwrap_or(0);

    match regs.orig_rax {
        SYS_OPEN => {
            if let Some(path) = read_path_arg(pid, regs, 0) {
                let flags = regs.arg(1) as i32;
                let resolved = resolve(state, pid, &path, flags & libc::O_NOFOLLOW != 0);
                let access = if flags & libc::O_ACCMODE == libc::O_WRONLY || flags & libc::O_ACCMODE == libc::O_RDWR {
                    RequestedAccess::WRITE
                } else {
                    RequestedAccess::READ
                };
                emit(state, pid, OpCode::Open, resolved, access, error);
            }
        }
        SYS_OPENAT => {
            if let Some(path) = read_path_arg(pid, regs, 1) {
                let dirfd = regs.arg(0) as i32;
                let flags = regs.arg(2) as i32;
                let resolved = resolve_at(state, pid, dirfd, &path, flags & libc::O_NOFOLLOW != 0);
                let access = if flags & libc::O_ACCMODE == libc::O_WRONLY || flags & libc::O_ACCMODE == libc::O_RDWR {
                    RequestedAccess::WRITE
                } else {
                    RequestedAccess::READ
                };
                emit(state, pid, OpCode::Open, resolved, access, error);
            }
        }
        SYS_STAT | SYS_LSTAT => {
            if let Some(path) = read_path_arg(pid, regs, 0) {
                let no_follow = regs.orig_rax == SYS_LSTAT;
                let resolved = resolve(state, pid, &path, no_follow);
                emit(state, pid, OpCode::Stat, resolved, RequestedAccess::PROBE, error);
            }
        }
        SYS_FSTAT => {
            let fd = regs.arg(0) as i32;
            if let Some(path) = path_resolver::proc_fd(pid.as_raw(), fd) {
                emit(state, pid, OpCode::Stat, path, RequestedAccess::PROBE, error);
            }
        }
        SYS_ACCESS => {
            if let Some(path) = read_path_arg(pid, regs, 0) {
                let resolved = resolve(state, pid, &path, false);
                emit(state, pid, OpCode::Access, resolved, RequestedAccess::PROBE, error);
            }
        }
        SYS_FACCESSAT => {
            if let Some(path) = read_path_arg(pid, regs, 1) {
                let dirfd = regs.arg(0) as i32;
                let resolved = resolve_at(state, pid, dirfd, &path, false);
                emit(state, pid, OpCode::Access, resolved, RequestedAccess::PROBE, error);
            }
        }
        SYS_UNLINK => {
            if let Some(path) = read_path_arg(pid, regs, 0) {
                let resolved = resolve(state, pid, &path, true);
                emit(state, pid, OpCode::Unlink, resolved, RequestedAccess::WRITE, error);
            }
        }
        SYS_UNLINKAT => {
            if let Some(path) = read_path_arg(pid, regs, 1) {
                let dirfd = regs.arg(0) as i32;
                let resolved = resolve_at(state, pid, dirfd, &path, true);
                emit(state, pid, OpCode::Unlink, resolved, RequestedAccess::WRITE, error);
            }
        }
        SYS_MKDIR => {
            if let Some(path) = read_path_arg(pid, regs, 0) {
                let resolved = resolve(state, pid, &path, false);
                emit(state, pid, OpCode::Create, resolved, RequestedAccess::WRITE, error);
            }
        }
        SYS_MKDIRAT => {
            if let Some(path) = read_path_arg(pid, regs, 1) {
                let dirfd = regs.arg(0) as i32;
                let resolved = resolve_at(state, pid, dirfd, &path, false);
                emit(state, pid, OpCode::Create, resolved, RequestedAccess::WRITE, error);
            }
        }
        SYS_RMDIR => {
            if let Some(path) = read_path_arg(pid, regs, 0) {
                let resolved = resolve(state, pid, &path, false);
                emit(state, pid, OpCode::Unlink, resolved, RequestedAccess::WRITE, error);
            }
        }
        SYS_RENAME => {
            if let (Some(old), Some(new)) = (read_path_arg(pid, regs, 0), read_path_arg(pid, regs, 1)) {
                let old_resolved = resolve(state, pid, &old, true);
                let new_resolved = resolve(state, pid, &new, true);
                emit(state, pid, OpCode::RenameSource, old_resolved, RequestedAccess::WRITE, error);
                emit(state, pid, OpCode::RenameDest, new_resolved, RequestedAccess::WRITE, error);
            }
        }
        SYS_RENAMEAT => {
            if let (Some(old), Some(new)) = (read_path_arg(pid, regs, 1), read_path_arg(pid, regs, 3)) {
                let old_dirfd = regs.arg(0) as i32;
                let new_dirfd = regs.arg(2) as i32;
                let old_resolved = resolve_at(state, pid, old_dirfd, &old, true);
                let new_resolved = resolve_at(state, pid, new_dirfd, &new, true);
                emit(state, pid, OpCode::RenameSource, old_resolved, RequestedAccess::WRITE, error);
                emit(state, pid, OpCode::RenameDest, new_resolved, RequestedAccess::WRITE, error);
            }
        }
        SYS_CHMOD => {
            if let Some(path) = read_path_arg(pid, regs, 0) {
                let resolved = resolve(state, pid, &path, false);
                emit(state, pid, OpCode::SetMode, resolved, RequestedAccess::WRITE, error);
            }
        }
        SYS_READLINK => {
            if let Some(path) = read_path_arg(pid, regs, 0) {
                let resolved = resolve(state, pid, &path, true);
                emit(state, pid, OpCode::Readlink, resolved, RequestedAccess::PROBE, error);
            }
        }
        SYS_READLINKAT => {
            if let Some(path) = read_path_arg(pid, regs, 1) {
                let dirfd = regs.arg(0) as i32;
                let resolved = resolve_at(state, pid, dirfd, &path, true);
                emit(state, pid, OpCode::Readlink, resolved, RequestedAccess::PROBE, error);
            }
        }
        SYS_EXECVE => {
            if let Some(path) = read_path_arg(pid, regs, 0) {
                let resolved = resolve(state, pid, &path, false);
                let basename = std::path::Path::new(&resolved)
                    .file_name()
                    .map(|b| b.to_string_lossy().into_owned())
                    .unwrap_or_else(|| resolved.clone());
                emit(state, pid, OpCode::Exec, basename, RequestedAccess::READ | RequestedAccess::PROBE, error);
                emit(state, pid, OpCode::Exec, resolved, RequestedAccess::READ | RequestedAccess::PROBE, error);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_directory_creation_syscalls_need_return_value() {
        assert!(wants_return_value(SYS_MKDIR));
        assert!(wants_return_value(SYS_MKDIRAT));
        assert!(wants_return_value(SYS_RMDIR));
        assert!(!wants_return_value(SYS_OPEN));
        assert!(!wants_return_value(SYS_STAT));
    }
}
