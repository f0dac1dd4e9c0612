//! access family (§4.7): `access`, `faccessat`, `faccessat2`, `euidaccess`.
//!
//! Always a probe: `access(2)` never opens anything, it only answers a
//! permission question, so there is no read/write distinction to make
//! (§4.7 "access").

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

use crate::interpose::{emit_simple, obs, resolve_and_report_symlinks, resolve_at_and_report_symlinks};
use crate::report::{OpCode, RequestedAccess};

crate::real_symbol!(
    REAL_ACCESS,
    real_access,
    "access",
    unsafe extern "C" fn(*const c_char, c_int) -> c_int
);

/// # Safety
/// `path` must be a valid NUL-terminated C string, per `access(2)`.
#[no_mangle]
pub unsafe extern "C" fn access(path: *const c_char, mode: c_int) -> c_int {
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let observer = obs();
    let normalized = resolve_and_report_symlinks(observer, &path_str, false);
    let resolved = normalized.map(|n| n.path).unwrap_or(path_str);
    emit_simple(observer, OpCode::Access, resolved, RequestedAccess::PROBE);
    real_access()(path, mode)
}

crate::real_symbol!(
    REAL_FACCESSAT,
    real_faccessat,
    "faccessat",
    unsafe extern "C" fn(c_int, *const c_char, c_int, c_int) -> c_int
);

/// # Safety
/// Same contract as `faccessat(2)`.
#[no_mangle]
pub unsafe extern "C" fn faccessat(dirfd: c_int, path: *const c_char, mode: c_int, flags: c_int) -> c_int {
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let observer = obs();
    let no_follow = flags & libc::AT_SYMLINK_NOFOLLOW != 0;
    let normalized = resolve_at_and_report_symlinks(observer, dirfd, &path_str, no_follow);
    let resolved = normalized.map(|n| n.path).unwrap_or(path_str);
    emit_simple(observer, OpCode::Access, resolved, RequestedAccess::PROBE);
    real_faccessat()(dirfd, path, mode, flags)
}
