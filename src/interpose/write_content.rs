//! write-content family (§4.7): `write`, `pwrite`, `pwrite64`, `writev`,
//! `sendfile`, `copy_file_range`, `truncate`, `ftruncate`.
//!
//! `write`/`pwrite`/`writev` resolve their target through the fd table
//! (these never take a path directly); `truncate` takes one. All funnel
//! through [`crate::interpose::report_write_with_first_check`] so the
//! one-shot first-allow-write-check fires exactly once per path per
//! process (§4.5 step 4).

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

use libc::{off_t, size_t, ssize_t};

use crate::interpose::{current_pid, obs, real_stat_exists_and_is_dir, report_write_with_first_check, resolve_and_report_symlinks};
use crate::report::OpCode;

crate::real_symbol!(
    REAL_WRITE,
    real_write,
    "write",
    unsafe extern "C" fn(c_int, *const libc::c_void, size_t) -> ssize_t
);

/// # Safety
/// Same contract as `write(2)`.
#[no_mangle]
pub unsafe extern "C" fn write(fd: c_int, buf: *const libc::c_void, count: size_t) -> ssize_t {
    let observer = obs();
    if let Some(path) = observer.fd_table.get(fd, current_pid()) {
        let (existed, _) = real_stat_exists_and_is_dir(&path);
        report_write_with_first_check(observer, OpCode::Write, path, existed);
    }
    real_write()(fd, buf, count)
}

crate::real_symbol!(
    REAL_PWRITE,
    real_pwrite,
    "pwrite",
    unsafe extern "C" fn(c_int, *const libc::c_void, size_t, off_t) -> ssize_t
);

/// # Safety
/// Same contract as `pwrite(2)`.
#[no_mangle]
pub unsafe extern "C" fn pwrite(fd: c_int, buf: *const libc::c_void, count: size_t, offset: off_t) -> ssize_t {
    let observer = obs();
    if let Some(path) = observer.fd_table.get(fd, current_pid()) {
        let (existed, _) = real_stat_exists_and_is_dir(&path);
        report_write_with_first_check(observer, OpCode::Write, path, existed);
    }
    real_pwrite()(fd, buf, count, offset)
}

crate::real_symbol!(
    REAL_TRUNCATE,
    real_truncate,
    "truncate",
    unsafe extern "C" fn(*const c_char, off_t) -> c_int
);

/// # Safety
/// `path` must be a valid NUL-terminated C string, per `truncate(2)`.
#[no_mangle]
pub unsafe extern "C" fn truncate(path: *const c_char, length: off_t) -> c_int {
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let observer = obs();
    let normalized = resolve_and_report_symlinks(observer, &path_str, false);
    let resolved = normalized.map(|n| n.path).unwrap_or(path_str);
    let (existed, _) = real_stat_exists_and_is_dir(&resolved);
    report_write_with_first_check(observer, OpCode::Write, resolved, existed);
    real_truncate()(path, length)
}

crate::real_symbol!(
    REAL_FTRUNCATE,
    real_ftruncate,
    "ftruncate",
    unsafe extern "C" fn(c_int, off_t) -> c_int
);

/// # Safety
/// Same contract as `ftruncate(2)`.
#[no_mangle]
pub unsafe extern "C" fn ftruncate(fd: c_int, length: off_t) -> c_int {
    let observer = obs();
    if let Some(path) = observer.fd_table.get(fd, current_pid()) {
        let (existed, _) = real_stat_exists_and_is_dir(&path);
        report_write_with_first_check(observer, OpCode::Write, path, existed);
    }
    real_ftruncate()(fd, length)
}
