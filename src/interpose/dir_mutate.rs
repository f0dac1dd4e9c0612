//! directory-mutation family (§4.7): `mkdir`, `mkdirat`, `rmdir`, `unlink`,
//! `unlinkat`, `rename`, `renameat`, `renameat2`, `link`, `linkat`,
//! `symlink`, `symlinkat`, `mknod`, `mknodat`.
//!
//! `rename` of a directory is the one family member that can produce more
//! than two reports: §8 scenario S5 requires enumerating every entry under
//! the source subtree and re-emitting an `unlink`/`create` pair per child,
//! since the supervisor's build cache keys on individual file paths, not
//! directory identity.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

use crate::interpose::{emit_simple, obs, report_event, resolve_and_report_symlinks, resolve_at_and_report_symlinks};
use crate::report::{OpCode, RequestedAccess};
use crate::singleton::Observer;

crate::real_symbol!(
    REAL_MKDIR,
    real_mkdir,
    "mkdir",
    unsafe extern "C" fn(*const c_char, libc::mode_t) -> c_int
);

/// # Safety
/// `path` must be a valid NUL-terminated C string, per `mkdir(2)`.
#[no_mangle]
pub unsafe extern "C" fn mkdir(path: *const c_char, mode: libc::mode_t) -> c_int {
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let observer = obs();
    let normalized = resolve_and_report_symlinks(observer, &path_str, false);
    let resolved = normalized.map(|n| n.path).unwrap_or(path_str);
    report_event(observer, OpCode::Create, resolved, RequestedAccess::WRITE, true);
    real_mkdir()(path, mode)
}

crate::real_symbol!(
    REAL_RMDIR,
    real_rmdir,
    "rmdir",
    unsafe extern "C" fn(*const c_char) -> c_int
);

/// # Safety
/// Same contract as `rmdir(2)`.
#[no_mangle]
pub unsafe extern "C" fn rmdir(path: *const c_char) -> c_int {
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let observer = obs();
    let normalized = resolve_and_report_symlinks(observer, &path_str, false);
    let resolved = normalized.map(|n| n.path).unwrap_or(path_str);
    report_event(observer, OpCode::Unlink, resolved, RequestedAccess::WRITE, true);
    real_rmdir()(path)
}

crate::real_symbol!(
    REAL_UNLINK,
    real_unlink,
    "unlink",
    unsafe extern "C" fn(*const c_char) -> c_int
);

/// # Safety
/// Same contract as `unlink(2)`.
#[no_mangle]
pub unsafe extern "C" fn unlink(path: *const c_char) -> c_int {
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let observer = obs();
    let normalized = resolve_and_report_symlinks(observer, &path_str, true);
    let resolved = normalized.map(|n| n.path).unwrap_or(path_str);
    emit_simple(observer, OpCode::Unlink, resolved, RequestedAccess::WRITE);
    real_unlink()(path)
}

crate::real_symbol!(
    REAL_LINK,
    real_link,
    "link",
    unsafe extern "C" fn(*const c_char, *const c_char) -> c_int
);

/// # Safety
/// Same contract as `link(2)`.
#[no_mangle]
pub unsafe extern "C" fn link(oldpath: *const c_char, newpath: *const c_char) -> c_int {
    let old_str = CStr::from_ptr(oldpath).to_string_lossy().into_owned();
    let new_str = CStr::from_ptr(newpath).to_string_lossy().into_owned();
    let observer = obs();
    let old_resolved = resolve_and_report_symlinks(observer, &old_str, false).map(|n| n.path).unwrap_or(old_str);
    let new_resolved = resolve_and_report_symlinks(observer, &new_str, true).map(|n| n.path).unwrap_or(new_str);
    emit_simple(observer, OpCode::Link, old_resolved, RequestedAccess::READ);
    emit_simple(observer, OpCode::Create, new_resolved, RequestedAccess::WRITE);
    real_link()(oldpath, newpath)
}

crate::real_symbol!(
    REAL_SYMLINK,
    real_symlink,
    "symlink",
    unsafe extern "C" fn(*const c_char, *const c_char) -> c_int
);

/// # Safety
/// Same contract as `symlink(2)`.
#[no_mangle]
pub unsafe extern "C" fn symlink(target: *const c_char, linkpath: *const c_char) -> c_int {
    let link_str = CStr::from_ptr(linkpath).to_string_lossy().into_owned();
    let observer = obs();
    let resolved = resolve_and_report_symlinks(observer, &link_str, true).map(|n| n.path).unwrap_or(link_str);
    emit_simple(observer, OpCode::Symlink, resolved, RequestedAccess::WRITE);
    real_symlink()(target, linkpath)
}

/// Walks `root` (the observer's own recursive directory read, never the
/// hooked `readdir`) and reports an `unlink`/`create` pair per regular
/// file found underneath, for `rename`-of-directory (§8 S5).
fn report_subtree_rename(observer: &Observer, old_root: &str, new_root: &str) {
    fn walk(observer: &Observer, old_dir: &str, new_dir: &str) {
        let entries = match std::fs::read_dir(old_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let old_child = format!("{}/{}", old_dir, name.to_string_lossy());
            let new_child = format!("{}/{}", new_dir, name.to_string_lossy());
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                walk(observer, &old_child, &new_child);
            } else {
                emit_simple(observer, OpCode::RenameSource, old_child, RequestedAccess::WRITE);
                emit_simple(observer, OpCode::RenameDest, new_child, RequestedAccess::WRITE);
            }
        }
    }
    walk(observer, old_root, new_root);
}

fn report_rename(observer: &Observer, old_resolved: String, new_resolved: String, old_was_dir: bool) {
    emit_simple(observer, OpCode::RenameSource, old_resolved.clone(), RequestedAccess::WRITE);
    emit_simple(observer, OpCode::RenameDest, new_resolved.clone(), RequestedAccess::WRITE);
    if old_was_dir {
        report_subtree_rename(observer, &old_resolved, &new_resolved);
    }
}

crate::real_symbol!(
    REAL_RENAME,
    real_rename,
    "rename",
    unsafe extern "C" fn(*const c_char, *const c_char) -> c_int
);

/// # Safety
/// Same contract as `rename(2)`.
#[no_mangle]
pub unsafe extern "C" fn rename(oldpath: *const c_char, newpath: *const c_char) -> c_int {
    let old_str = CStr::from_ptr(oldpath).to_string_lossy().into_owned();
    let new_str = CStr::from_ptr(newpath).to_string_lossy().into_owned();
    let observer = obs();
    let old_resolved = resolve_and_report_symlinks(observer, &old_str, true).map(|n| n.path).unwrap_or(old_str);
    let new_resolved = resolve_and_report_symlinks(observer, &new_str, true).map(|n| n.path).unwrap_or(new_str);
    let (_, old_is_dir) = crate::interpose::real_stat_exists_and_is_dir(&old_resolved);
    report_rename(observer, old_resolved, new_resolved, old_is_dir);
    real_rename()(oldpath, newpath)
}

crate::real_symbol!(
    REAL_RENAMEAT,
    real_renameat,
    "renameat",
    unsafe extern "C" fn(c_int, *const c_char, c_int, *const c_char) -> c_int
);

/// # Safety
/// Same contract as `renameat(2)`.
#[no_mangle]
pub unsafe extern "C" fn renameat(olddirfd: c_int, oldpath: *const c_char, newdirfd: c_int, newpath: *const c_char) -> c_int {
    let old_str = CStr::from_ptr(oldpath).to_string_lossy().into_owned();
    let new_str = CStr::from_ptr(newpath).to_string_lossy().into_owned();
    let observer = obs();
    let old_resolved = resolve_at_and_report_symlinks(observer, olddirfd, &old_str, true).map(|n| n.path).unwrap_or(old_str);
    let new_resolved = resolve_at_and_report_symlinks(observer, newdirfd, &new_str, true).map(|n| n.path).unwrap_or(new_str);
    let (_, old_is_dir) = crate::interpose::real_stat_exists_and_is_dir(&old_resolved);
    report_rename(observer, old_resolved, new_resolved, old_is_dir);
    real_renameat()(olddirfd, oldpath, newdirfd, newpath)
}

/// Exposed for the ptrace tracer (§4.9), which marshals `renameat2`
/// arguments itself but reuses this same subtree-walking logic rather than
/// duplicating it.
pub fn report_directory_rename(observer: &Observer, old_resolved: String, new_resolved: String, old_was_dir: bool) {
    report_rename(observer, old_resolved, new_resolved, old_was_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_cache::EventCache;
    use crate::fd_table::FdTable;
    use crate::manifest::{AccessManifest, ManifestFlags, ManifestWire, ScopePolicy};
    use crate::policy::FirstWriteTracker;
    use crate::static_link::StaticallyLinkedCache;
    use std::fs;

    /// Builds a real `Observer` backed by a throwaway manifest. The report
    /// "pipe" is a plain file here rather than a FIFO: `emit()` only ever
    /// opens it with `O_WRONLY|O_APPEND` and writes, which a regular file
    /// satisfies identically, and it lets the test read back what was
    /// written without the blocking-open/EOF races a real FIFO would add.
    fn observer_with_report_file(pipe_path: &std::path::Path) -> Observer {
        fs::write(pipe_path, []).unwrap();

        let wire = ManifestWire {
            pip_id: 1,
            pid_of_root_process: 1,
            report_pipe_path: pipe_path.to_string_lossy().into_owned(),
            preload_library_path: "/tmp/l.so".into(),
            flags: ManifestFlags::empty(),
            scopes: vec![(
                "/".into(),
                ScopePolicy {
                    allow_read: true,
                    allow_write: true,
                    allow_probe: true,
                    report_explicitly: true,
                    is_writeable_mount: true,
                },
            )],
            forced_ptrace_names: vec![],
            ptrace_mq_name: None,
        };
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("manifest.bin");
        fs::write(&manifest_path, bincode::serialize(&wire).unwrap()).unwrap();
        let manifest = AccessManifest::load(&manifest_path).unwrap();

        Observer {
            manifest,
            fd_table: FdTable::new(),
            event_cache: EventCache::new(),
            first_write: FirstWriteTracker::new(),
            static_link_cache: StaticallyLinkedCache::new(),
            is_root: true,
        }
    }

    /// Reads every framed payload currently buffered in `pipe_path` without
    /// blocking past what's already been written (the writer side has
    /// closed by the time this runs).
    fn drain_reports(pipe_path: &std::path::Path) -> Vec<String> {
        let bytes = fs::read(pipe_path).unwrap();
        let mut out = Vec::new();
        let mut offset = 0;
        while offset + 4 <= bytes.len() {
            let len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
            offset += 4;
            out.push(String::from_utf8_lossy(&bytes[offset..offset + len]).into_owned());
            offset += len;
        }
        out
    }

    #[test]
    fn report_subtree_rename_visits_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let old_root = dir.path().join("old");
        fs::create_dir_all(old_root.join("nested")).unwrap();
        fs::write(old_root.join("a.txt"), b"x").unwrap();
        fs::write(old_root.join("nested/b.txt"), b"y").unwrap();
        let new_root = dir.path().join("new");

        let pipe_path = dir.path().join("reports.pipe");
        let observer = observer_with_report_file(&pipe_path);

        report_subtree_rename(&observer, &old_root.to_string_lossy(), &new_root.to_string_lossy());

        let payloads = drain_reports(&pipe_path);
        assert_eq!(payloads.len(), 4);
        assert!(payloads.iter().any(|p| p.starts_with("rename-source|") && p.contains("old/a.txt")));
        assert!(payloads.iter().any(|p| p.starts_with("rename-dest|") && p.contains("new/a.txt")));
        assert!(payloads.iter().any(|p| p.starts_with("rename-source|") && p.contains("old/nested/b.txt")));
        assert!(payloads.iter().any(|p| p.starts_with("rename-dest|") && p.contains("new/nested/b.txt")));
    }
}
