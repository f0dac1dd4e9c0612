//! The seize/cont loop driving a single tracee tree (§4.9 steps 1-3, event
//! table). One [`run`] call owns exactly one thread, matching the
//! single-threaded-per-tracee-tree constraint in §5 "Suspension points":
//! only the thread that performed `PTRACE_SEIZE` may issue further
//! `ptrace()` calls for that tree.

use std::collections::HashSet;

use nix::sys::ptrace::{self, Options};
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::manifest::AccessManifest;
use crate::policy;
use crate::ptrace::mqueue_proto::ExitNotification;
use crate::ptrace::{registers, syscalls};
use crate::report::{OpCode, RequestedAccess};

/// Per-tracee-tree state: the manifest this tree reports against, plus the
/// event cache every syscall handler consults (§4.4, reused unmodified by
/// the ptrace path).
pub struct TraceeState {
    pub manifest: AccessManifest,
    pub event_cache: crate::event_cache::EventCache,
}

/// Fork/exit carry no path, but still go through policy (§4.5; nothing in
/// §4.7's hook-family table exempts them) so a manifest-wide
/// `REPORT_FILE_ACCESSES_ONLY` flag can suppress them the same way it
/// suppresses a non-explicit scope's file accesses.
fn report_fork(state: &TraceeState, child_pid: Pid) {
    let decision = policy::evaluate(&state.manifest, "", RequestedAccess::empty());
    if !decision.should_report {
        return;
    }
    let report = policy::build_report(&state.manifest, OpCode::Fork, String::new(), child_pid.as_raw(), &decision, false);
    crate::transport::emit_or_log(&state.manifest.report_pipe_path, &report);
}

fn report_exit(state: &TraceeState, pid: Pid) {
    let decision = policy::evaluate(&state.manifest, "", RequestedAccess::empty());
    if !decision.should_report {
        return;
    }
    let report = policy::build_report(&state.manifest, OpCode::Exit, String::new(), pid.as_raw(), &decision, false);
    crate::transport::emit_or_log(&state.manifest.report_pipe_path, &report);
}

const SEIZE_OPTIONS: Options = Options::PTRACE_O_TRACESYSGOOD
    .union(Options::PTRACE_O_TRACESECCOMP)
    .union(Options::PTRACE_O_TRACECLONE)
    .union(Options::PTRACE_O_TRACEFORK)
    .union(Options::PTRACE_O_TRACEVFORK)
    .union(Options::PTRACE_O_TRACEEXIT);

/// Runs the full tracer loop for the tree rooted at `root_pid` until every
/// tracee has exited, then notifies the daemon's mqueue listener with an
/// `exitNotification` (§4.9 event table).
pub fn run(root_pid: Pid, manifest: AccessManifest, mq_name: &str) -> Result<(), crate::error::ObserverError> {
    let state = TraceeState { manifest, event_cache: crate::event_cache::EventCache::new() };
    let mut tracees: HashSet<Pid> = HashSet::new();
    tracees.insert(root_pid);

    ptrace::seize(root_pid, SEIZE_OPTIONS).map_err(|e| crate::error::ObserverError::Ptrace("PTRACE_SEIZE", e))?;
    ptrace::interrupt(root_pid).map_err(|e| crate::error::ObserverError::Ptrace("PTRACE_INTERRUPT", e))?;
    ptrace::syscall(root_pid, None).map_err(|e| crate::error::ObserverError::Ptrace("PTRACE_SYSCALL", e))?;

    while !tracees.is_empty() {
        let status = match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::__WALL)) {
            Ok(status) => status,
            Err(_) => break,
        };

        match status {
            WaitStatus::PtraceEvent(pid, _, event) if event == libc::PTRACE_EVENT_CLONE || event == libc::PTRACE_EVENT_FORK || event == libc::PTRACE_EVENT_VFORK => {
                if let Ok(child_raw) = ptrace::getevent(pid) {
                    let child = Pid::from_raw(child_raw as i32);
                    tracees.insert(child);
                    report_fork(&state, child);
                    let _ = ptrace::syscall(child, None);
                }
                let _ = ptrace::syscall(pid, None);
            }
            WaitStatus::PtraceEvent(pid, _, event) if event == libc::PTRACE_EVENT_EXIT => {
                report_exit(&state, pid);
                tracees.remove(&pid);
                let _ = ptrace::syscall(pid, None);
                if tracees.is_empty() {
                    notify_daemon_of_exit(mq_name, root_pid);
                }
            }
            WaitStatus::PtraceEvent(pid, _, event) if event == libc::PTRACE_EVENT_SECCOMP => {
                if let Ok(regs) = registers::read(pid) {
                    if syscalls::wants_return_value(regs.orig_rax) {
                        let _ = ptrace::syscall(pid, None);
                        match waitpid(pid, None) {
                            Ok(WaitStatus::PtraceSyscall(_)) | Ok(WaitStatus::Stopped(_, _)) => {
                                if let Ok(exit_regs) = registers::read(pid) {
                                    syscalls::handle(&state, pid, &regs, Some(exit_regs.rax as i64));
                                }
                            }
                            _ => syscalls::handle(&state, pid, &regs, None),
                        }
                    } else {
                        syscalls::handle(&state, pid, &regs, None);
                    }
                }
                let _ = ptrace::syscall(pid, None);
            }
            WaitStatus::Stopped(pid, signal) if signal != Signal::SIGTRAP => {
                let _ = ptrace::syscall(pid, Some(signal));
            }
            WaitStatus::Stopped(pid, _) | WaitStatus::PtraceSyscall(pid) => {
                let _ = ptrace::syscall(pid, None);
            }
            WaitStatus::Exited(pid, _) | WaitStatus::Signaled(pid, _, _) => {
                tracees.remove(&pid);
                if tracees.is_empty() {
                    notify_daemon_of_exit(mq_name, root_pid);
                }
            }
            _ => {}
        }
    }

    Ok(())
}

fn notify_daemon_of_exit(mq_name: &str, root_pid: Pid) {
    let notification = ExitNotification { pid: root_pid.as_raw() };
    crate::ptrace::daemon::send_message(mq_name, &notification.encode());
}
