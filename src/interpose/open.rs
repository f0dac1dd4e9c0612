//! open family (§4.7): `open`, `openat`, `open64`, `openat64`, `creat`,
//! `fopen`, `freopen`.
//!
//! `open`/`openat` are variadic in their mode argument; this is the second
//! representative use of `c_variadic` in this crate (see
//! [`crate::interpose::exec`] for the first). Reports `create` when
//! `O_CREAT` is set and the path didn't already exist, `write` when any
//! write-capable flag is set, `open` (read) otherwise (§4.7 "open").

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

use libc::mode_t;

use crate::interpose::{obs, real_stat_exists_and_is_dir, report_event, resolve_and_report_symlinks, resolve_at_and_report_symlinks};
use crate::report::{OpCode, RequestedAccess};

fn wants_write(flags: c_int) -> bool {
    (flags & libc::O_ACCMODE) == libc::O_WRONLY || (flags & libc::O_ACCMODE) == libc::O_RDWR
}

fn classify_and_report(observer: &crate::singleton::Observer, path: String, flags: c_int, existed: bool, is_dir: bool) {
    if flags & libc::O_CREAT != 0 && !existed {
        report_event(observer, OpCode::Create, path, RequestedAccess::WRITE, is_dir);
    } else if wants_write(flags) {
        crate::interpose::report_write_with_first_check(observer, OpCode::Write, path, existed);
    } else {
        report_event(observer, OpCode::Open, path, RequestedAccess::READ, is_dir);
    }
}

crate::real_symbol!(
    REAL_OPEN,
    real_open,
    "open",
    unsafe extern "C" fn(*const c_char, c_int, mode_t) -> c_int
);

/// # Safety
/// `path` must be a valid NUL-terminated C string, as required by `open(2)`.
#[no_mangle]
pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mut args: ...) -> c_int {
    let mode: mode_t = if flags & libc::O_CREAT != 0 || flags & libc::O_TMPFILE != 0 {
        args.next_arg::<mode_t>()
    } else {
        0
    };
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let observer = obs();
    let no_follow = flags & libc::O_NOFOLLOW != 0;
    let normalized = resolve_and_report_symlinks(observer, &path_str, no_follow);
    let resolved = normalized.map(|n| n.path).unwrap_or(path_str);
    let (existed, is_dir) = real_stat_exists_and_is_dir(&resolved);
    classify_and_report(observer, resolved, flags, existed, is_dir);
    real_open()(path, flags, mode)
}

crate::real_symbol!(
    REAL_OPENAT,
    real_openat,
    "openat",
    unsafe extern "C" fn(c_int, *const c_char, c_int, mode_t) -> c_int
);

/// # Safety
/// Same contract as `openat(2)`.
#[no_mangle]
pub unsafe extern "C" fn openat(dirfd: c_int, path: *const c_char, flags: c_int, mut args: ...) -> c_int {
    let mode: mode_t = if flags & libc::O_CREAT != 0 || flags & libc::O_TMPFILE != 0 {
        args.next_arg::<mode_t>()
    } else {
        0
    };
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let observer = obs();
    let no_follow = flags & libc::O_NOFOLLOW != 0;
    let normalized = resolve_at_and_report_symlinks(observer, dirfd, &path_str, no_follow);
    let resolved = normalized.map(|n| n.path).unwrap_or(path_str);
    let (existed, is_dir) = real_stat_exists_and_is_dir(&resolved);
    classify_and_report(observer, resolved, flags, existed, is_dir);
    real_openat()(dirfd, path, flags, mode)
}

crate::real_symbol!(
    REAL_CREAT,
    real_creat,
    "creat",
    unsafe extern "C" fn(*const c_char, mode_t) -> c_int
);

/// # Safety
/// Same contract as `creat(2)`.
#[no_mangle]
pub unsafe extern "C" fn creat(path: *const c_char, mode: mode_t) -> c_int {
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let observer = obs();
    let normalized = resolve_and_report_symlinks(observer, &path_str, false);
    let resolved = normalized.map(|n| n.path).unwrap_or(path_str);
    let (existed, is_dir) = real_stat_exists_and_is_dir(&resolved);
    classify_and_report(observer, resolved, libc::O_CREAT | libc::O_WRONLY | libc::O_TRUNC, existed, is_dir);
    real_creat()(path, mode)
}

crate::real_symbol!(
    REAL_FOPEN,
    real_fopen,
    "fopen",
    unsafe extern "C" fn(*const c_char, *const c_char) -> *mut libc::FILE
);

fn fopen_flags(mode: &str) -> c_int {
    let mut flags = 0;
    if mode.contains('+') {
        flags |= libc::O_RDWR;
    } else if mode.starts_with('r') {
        flags |= libc::O_RDONLY;
    } else {
        flags |= libc::O_WRONLY;
    }
    if mode.starts_with('w') {
        flags |= libc::O_CREAT | libc::O_TRUNC;
    } else if mode.starts_with('a') {
        flags |= libc::O_CREAT | libc::O_APPEND;
    }
    flags
}

/// # Safety
/// `path` and `mode` must be valid NUL-terminated C strings, per `fopen(3)`.
#[no_mangle]
pub unsafe extern "C" fn fopen(path: *const c_char, mode: *const c_char) -> *mut libc::FILE {
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let mode_str = CStr::from_ptr(mode).to_string_lossy().into_owned();
    let observer = obs();
    let normalized = resolve_and_report_symlinks(observer, &path_str, false);
    let resolved = normalized.map(|n| n.path).unwrap_or(path_str);
    let (existed, is_dir) = real_stat_exists_and_is_dir(&resolved);
    classify_and_report(observer, resolved, fopen_flags(&mode_str), existed, is_dir);
    real_fopen()(path, mode)
}

crate::real_symbol!(
    REAL_FREOPEN,
    real_freopen,
    "freopen",
    unsafe extern "C" fn(*const c_char, *const c_char, *mut libc::FILE) -> *mut libc::FILE
);

/// # Safety
/// Same contract as `freopen(3)`.
#[no_mangle]
pub unsafe extern "C" fn freopen(path: *const c_char, mode: *const c_char, stream: *mut libc::FILE) -> *mut libc::FILE {
    if !path.is_null() {
        let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
        let mode_str = CStr::from_ptr(mode).to_string_lossy().into_owned();
        let observer = obs();
        let normalized = resolve_and_report_symlinks(observer, &path_str, false);
        let resolved = normalized.map(|n| n.path).unwrap_or(path_str);
        let (existed, is_dir) = real_stat_exists_and_is_dir(&resolved);
        classify_and_report(observer, resolved, fopen_flags(&mode_str), existed, is_dir);
    }
    real_freopen()(path, mode, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wants_write_detects_wronly_and_rdwr() {
        assert!(wants_write(libc::O_WRONLY));
        assert!(wants_write(libc::O_RDWR));
        assert!(!wants_write(libc::O_RDONLY));
    }

    #[test]
    fn fopen_flags_maps_common_modes() {
        assert_eq!(fopen_flags("r") & libc::O_ACCMODE, libc::O_RDONLY);
        assert_eq!(fopen_flags("w") & libc::O_CREAT, libc::O_CREAT);
        assert_eq!(fopen_flags("a") & libc::O_APPEND, libc::O_APPEND);
        assert_eq!(fopen_flags("r+") & libc::O_ACCMODE, libc::O_RDWR);
    }
}
