//! stat family (§4.7): `stat`, `lstat`, `fstat`, `fstatat`, `stat64`,
//! `lstat64`, `fstatat64`, `statx`.
//!
//! All report `OpCode::Stat` with `PROBE` access; `lstat`/`statx` with
//! `AT_SYMLINK_NOFOLLOW` skip final-component symlink resolution, matching
//! the semantics they actually probe (§4.7 "stat").

use std::ffi::CStr;
use std::os::raw::c_int;

use libc::{c_char, stat as libc_stat};

use crate::interpose::{emit_simple, obs, resolve_and_report_symlinks, resolve_at_and_report_symlinks};
use crate::report::{OpCode, RequestedAccess};

crate::real_symbol!(
    REAL_STAT,
    real_stat,
    "stat",
    unsafe extern "C" fn(*const c_char, *mut libc_stat) -> c_int
);

/// # Safety
/// `path` and `buf` must satisfy `stat(2)`'s own contract.
#[no_mangle]
pub unsafe extern "C" fn stat(path: *const c_char, buf: *mut libc_stat) -> c_int {
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let observer = obs();
    let normalized = resolve_and_report_symlinks(observer, &path_str, false);
    let resolved = normalized.map(|n| n.path).unwrap_or(path_str);
    emit_simple(observer, OpCode::Stat, resolved, RequestedAccess::PROBE);
    real_stat()(path, buf)
}

crate::real_symbol!(
    REAL_LSTAT,
    real_lstat,
    "lstat",
    unsafe extern "C" fn(*const c_char, *mut libc_stat) -> c_int
);

/// # Safety
/// Same contract as `lstat(2)`.
#[no_mangle]
pub unsafe extern "C" fn lstat(path: *const c_char, buf: *mut libc_stat) -> c_int {
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let observer = obs();
    let normalized = resolve_and_report_symlinks(observer, &path_str, true);
    let resolved = normalized.map(|n| n.path).unwrap_or(path_str);
    emit_simple(observer, OpCode::Stat, resolved, RequestedAccess::PROBE);
    real_lstat()(path, buf)
}

crate::real_symbol!(
    REAL_FSTAT,
    real_fstat,
    "fstat",
    unsafe extern "C" fn(c_int, *mut libc_stat) -> c_int
);

/// # Safety
/// Same contract as `fstat(2)`.
#[no_mangle]
pub unsafe extern "C" fn fstat(fd: c_int, buf: *mut libc_stat) -> c_int {
    let observer = obs();
    if let Some(path) = observer.fd_table.get(fd, crate::interpose::current_pid()) {
        emit_simple(observer, OpCode::Stat, path, RequestedAccess::PROBE);
    }
    real_fstat()(fd, buf)
}

crate::real_symbol!(
    REAL_FSTATAT,
    real_fstatat,
    "fstatat",
    unsafe extern "C" fn(c_int, *const c_char, *mut libc_stat, c_int) -> c_int
);

/// # Safety
/// Same contract as `fstatat(2)`.
#[no_mangle]
pub unsafe extern "C" fn fstatat(dirfd: c_int, path: *const c_char, buf: *mut libc_stat, flags: c_int) -> c_int {
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let observer = obs();
    let no_follow = flags & libc::AT_SYMLINK_NOFOLLOW != 0;
    let normalized = resolve_at_and_report_symlinks(observer, dirfd, &path_str, no_follow);
    let resolved = normalized.map(|n| n.path).unwrap_or(path_str);
    emit_simple(observer, OpCode::Stat, resolved, RequestedAccess::PROBE);
    real_fstatat()(dirfd, path, buf, flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_symlink_nofollow_bit_is_detected() {
        assert_ne!(libc::AT_SYMLINK_NOFOLLOW & libc::AT_SYMLINK_NOFOLLOW, 0);
    }
}
