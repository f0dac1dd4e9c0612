//! readlink family (§4.7): `readlink`, `readlinkat`.
//!
//! These report the *queried* link itself, distinct from the intermediate
//! symlinks `resolve_and_report_symlinks` already reports while getting to
//! it — a `readlink()` on a non-final-component symlink would double
//! report, so this path always normalizes with `no_follow = true` and
//! additionally emits one `Readlink` for the terminal link (§4.7
//! "readlink").

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

use libc::size_t;

use crate::interpose::{emit_simple, obs, resolve_and_report_symlinks, resolve_at_and_report_symlinks};
use crate::report::{OpCode, RequestedAccess};

crate::real_symbol!(
    REAL_READLINK,
    real_readlink_sym,
    "readlink",
    unsafe extern "C" fn(*const c_char, *mut c_char, size_t) -> isize
);

/// # Safety
/// `path` must be a valid NUL-terminated C string and `buf` valid for
/// `bufsiz` bytes, per `readlink(2)`.
#[no_mangle]
pub unsafe extern "C" fn readlink(path: *const c_char, buf: *mut c_char, bufsiz: size_t) -> isize {
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let observer = obs();
    let normalized = resolve_and_report_symlinks(observer, &path_str, true);
    let resolved = normalized.map(|n| n.path).unwrap_or(path_str);
    emit_simple(observer, OpCode::Readlink, resolved, RequestedAccess::PROBE);
    real_readlink_sym()(path, buf, bufsiz)
}

crate::real_symbol!(
    REAL_READLINKAT,
    real_readlinkat_sym,
    "readlinkat",
    unsafe extern "C" fn(c_int, *const c_char, *mut c_char, size_t) -> isize
);

/// # Safety
/// Same contract as `readlinkat(2)`.
#[no_mangle]
pub unsafe extern "C" fn readlinkat(dirfd: c_int, path: *const c_char, buf: *mut c_char, bufsiz: size_t) -> isize {
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let observer = obs();
    let normalized = resolve_at_and_report_symlinks(observer, dirfd, &path_str, true);
    let resolved = normalized.map(|n| n.path).unwrap_or(path_str);
    emit_simple(observer, OpCode::Readlink, resolved, RequestedAccess::PROBE);
    real_readlinkat_sym()(dirfd, path, buf, bufsiz)
}
