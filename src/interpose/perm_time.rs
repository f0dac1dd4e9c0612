//! permission/time family (§4.7): `chmod`, `fchmod`, `fchmodat`, `chown`,
//! `fchown`, `lchown`, `fchownat`, `utime`, `utimes`, `utimensat`,
//! `futimesat`.
//!
//! Each reports the single metadata-mutation op it names (§4.7
//! "setmode"/"setowner"/"settime"); none of these ever create or truncate
//! content, so they skip the first-allow-write-check entirely.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

use libc::{gid_t, mode_t, uid_t};

use crate::interpose::{current_pid, emit_simple, obs, resolve_and_report_symlinks, resolve_at_and_report_symlinks};
use crate::report::{OpCode, RequestedAccess};

crate::real_symbol!(
    REAL_CHMOD,
    real_chmod,
    "chmod",
    unsafe extern "C" fn(*const c_char, mode_t) -> c_int
);

/// # Safety
/// `path` must be a valid NUL-terminated C string, per `chmod(2)`.
#[no_mangle]
pub unsafe extern "C" fn chmod(path: *const c_char, mode: mode_t) -> c_int {
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let observer = obs();
    let normalized = resolve_and_report_symlinks(observer, &path_str, false);
    let resolved = normalized.map(|n| n.path).unwrap_or(path_str);
    emit_simple(observer, OpCode::SetMode, resolved, RequestedAccess::WRITE);
    real_chmod()(path, mode)
}

crate::real_symbol!(
    REAL_FCHMOD,
    real_fchmod,
    "fchmod",
    unsafe extern "C" fn(c_int, mode_t) -> c_int
);

/// # Safety
/// Same contract as `fchmod(2)`.
#[no_mangle]
pub unsafe extern "C" fn fchmod(fd: c_int, mode: mode_t) -> c_int {
    let observer = obs();
    if let Some(path) = observer.fd_table.get(fd, current_pid()) {
        emit_simple(observer, OpCode::SetMode, path, RequestedAccess::WRITE);
    }
    real_fchmod()(fd, mode)
}

crate::real_symbol!(
    REAL_CHOWN,
    real_chown,
    "chown",
    unsafe extern "C" fn(*const c_char, uid_t, gid_t) -> c_int
);

/// # Safety
/// `path` must be a valid NUL-terminated C string, per `chown(2)`.
#[no_mangle]
pub unsafe extern "C" fn chown(path: *const c_char, owner: uid_t, group: gid_t) -> c_int {
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let observer = obs();
    let normalized = resolve_and_report_symlinks(observer, &path_str, false);
    let resolved = normalized.map(|n| n.path).unwrap_or(path_str);
    emit_simple(observer, OpCode::SetOwner, resolved, RequestedAccess::WRITE);
    real_chown()(path, owner, group)
}

crate::real_symbol!(
    REAL_LCHOWN,
    real_lchown,
    "lchown",
    unsafe extern "C" fn(*const c_char, uid_t, gid_t) -> c_int
);

/// # Safety
/// Same contract as `lchown(2)`.
#[no_mangle]
pub unsafe extern "C" fn lchown(path: *const c_char, owner: uid_t, group: gid_t) -> c_int {
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let observer = obs();
    let normalized = resolve_and_report_symlinks(observer, &path_str, true);
    let resolved = normalized.map(|n| n.path).unwrap_or(path_str);
    emit_simple(observer, OpCode::SetOwner, resolved, RequestedAccess::WRITE);
    real_lchown()(path, owner, group)
}

crate::real_symbol!(
    REAL_UTIMES,
    real_utimes,
    "utimes",
    unsafe extern "C" fn(*const c_char, *const libc::timeval) -> c_int
);

/// # Safety
/// `path` must be a valid NUL-terminated C string, per `utimes(2)`.
#[no_mangle]
pub unsafe extern "C" fn utimes(path: *const c_char, times: *const libc::timeval) -> c_int {
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let observer = obs();
    let normalized = resolve_and_report_symlinks(observer, &path_str, false);
    let resolved = normalized.map(|n| n.path).unwrap_or(path_str);
    emit_simple(observer, OpCode::SetTime, resolved, RequestedAccess::WRITE);
    real_utimes()(path, times)
}

crate::real_symbol!(
    REAL_UTIMENSAT,
    real_utimensat,
    "utimensat",
    unsafe extern "C" fn(c_int, *const c_char, *const libc::timespec, c_int) -> c_int
);

/// # Safety
/// Same contract as `utimensat(2)`.
#[no_mangle]
pub unsafe extern "C" fn utimensat(dirfd: c_int, path: *const c_char, times: *const libc::timespec, flags: c_int) -> c_int {
    if path.is_null() {
        let observer = obs();
        if let Some(cached) = observer.fd_table.get(dirfd, current_pid()) {
            emit_simple(observer, OpCode::SetTime, cached, RequestedAccess::WRITE);
        }
        return real_utimensat()(dirfd, path, times, flags);
    }
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let observer = obs();
    let no_follow = flags & libc::AT_SYMLINK_NOFOLLOW != 0;
    let normalized = resolve_at_and_report_symlinks(observer, dirfd, &path_str, no_follow);
    let resolved = normalized.map(|n| n.path).unwrap_or(path_str);
    emit_simple(observer, OpCode::SetTime, resolved, RequestedAccess::WRITE);
    real_utimensat()(dirfd, path, times, flags)
}
