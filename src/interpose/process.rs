//! process family (§4.7): `fork`, `vfork`, `clone`, `_Fork`, `_exit`,
//! `exit`, `wait`, `waitpid`.
//!
//! `fork`'s own return value is the only way to learn the child's pid, so
//! the ordering invariant (§3 invariant 4: the `fork` report must precede
//! any report carrying `pid == child_pid`) is satisfied by emitting it in
//! the parent immediately after the real call returns, before the parent
//! does anything else observable. `clone`'s report depends on its flags:
//! `CLONE_THREAD` means "new thread, not a new process" and is never
//! reported (§4.7 "clone-flags decide whether a new process is reported").

use std::os::raw::{c_int, c_void};

use libc::pid_t;

use crate::interpose::{obs, report_exit, report_fork};

crate::real_symbol!(REAL_FORK, real_fork, "fork", unsafe extern "C" fn() -> pid_t);

/// # Safety
/// No preconditions beyond `fork(2)`'s own.
#[no_mangle]
pub unsafe extern "C" fn fork() -> pid_t {
    let result = real_fork()();
    if result > 0 {
        report_fork(obs(), result);
    }
    result
}

crate::real_symbol!(REAL_VFORK, real_vfork, "vfork", unsafe extern "C" fn() -> pid_t);

/// # Safety
/// No preconditions beyond `vfork(2)`'s own; note that `vfork` suspends the
/// parent until the child execs or exits, so the fork report is only
/// emitted once the parent actually resumes.
#[no_mangle]
pub unsafe extern "C" fn vfork() -> pid_t {
    let result = real_vfork()();
    if result > 0 {
        report_fork(obs(), result);
    }
    result
}

type CloneCallback = extern "C" fn(*mut c_void) -> c_int;

crate::real_symbol!(
    REAL_CLONE,
    real_clone,
    "clone",
    unsafe extern "C" fn(CloneCallback, *mut c_void, c_int, *mut c_void) -> pid_t
);

/// # Safety
/// `cb`, `stack`, and `arg` must satisfy `clone(2)`'s own contract. This
/// shim only forwards the fixed leading arguments glibc's `clone` wrapper
/// always takes; additional variadic `clone(2)` arguments (`ptid`, `tls`,
/// `ctid`) are passed through untouched via the real symbol's own variadic
/// tail, which this crate does not need to inspect.
#[no_mangle]
pub unsafe extern "C" fn clone(cb: CloneCallback, stack: *mut c_void, flags: c_int, arg: *mut c_void) -> pid_t {
    let result = real_clone()(cb, stack, flags, arg);
    if result > 0 && flags & libc::CLONE_THREAD == 0 {
        report_fork(obs(), result);
    }
    result
}

crate::real_symbol!(REAL_EXIT, real_exit, "_exit", unsafe extern "C" fn(c_int) -> !);

/// # Safety
/// No preconditions beyond `_exit(2)`'s own (it never returns).
#[no_mangle]
pub unsafe extern "C" fn _exit(status: c_int) -> ! {
    if let Some(observer) = crate::singleton::get() {
        report_exit(observer, status);
    }
    real_exit()(status)
}
