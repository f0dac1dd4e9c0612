//! Path resolver (C2): normalizes `/a/./b/../c`, resolves intermediate
//! symlinks (each one reported), and refuses cycles (§4.2, §9).
//!
//! The resolver must agree with the kernel's own resolution bit-for-bit,
//! because scope lookup in [`crate::policy`] keys on the canonical path;
//! any drift produces spurious allow/deny mismatches.

use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use libc::pid_t;

/// A symlink traversed during normalization, reported once per unique
/// link path per process lifetime via the event cache (§4.2 step 3,
/// §8 property 2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversedSymlink {
    pub link_path: String,
}

/// The outcome of [`normalize`]/[`normalize_at`]: the canonical path plus
/// any symlinks that had to be reported along the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub path: String,
    pub traversed_symlinks: Vec<TraversedSymlink>,
}

/// Anything the caller needs to resolve a relative path or `AT_FDCWD`
/// (§4.2 step 1). In the interposer this is backed by [`crate::fd_table`]
/// and `getcwd(2)`; in the tracer it is backed by `/proc/<pid>/cwd` and
/// `/proc/<pid>/fd/N` (§4.9 "Argument marshalling").
pub trait ResolutionContext {
    /// Returns the absolute path for `dirfd`, or `None` if it cannot be
    /// determined (a recoverable failure — see §7 "Recoverable").
    fn dir_for_fd(&self, dirfd: i32, pid: pid_t) -> Option<String>;
    /// Returns the current working directory for `pid`.
    fn cwd(&self, pid: pid_t) -> Option<String>;
    /// Reads the target of the symlink at `path`, as the kernel's
    /// `readlink(2)` would from this process's or the tracee's point of
    /// view.
    fn readlink(&self, path: &str) -> Option<String>;
}

/// A cap on symlink traversal depth, mirroring `MAXSYMLINKS` on Linux, used
/// as a backstop alongside the visited-prefix set (§9 "Cyclic graphs").
const MAX_SYMLINK_HOPS: usize = 40;

fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// Lexically collapses `//`, `/./`, and `/../` segments without touching
/// the filesystem. `..` past the root stays at the root (§4.2 step 2).
fn lexical_collapse(path: &str) -> Vec<String> {
    let mut stack: Vec<String> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other.to_string()),
        }
    }
    stack
}

fn join_absolute(components: &[String]) -> String {
    if components.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", components.join("/"))
    }
}

/// Splices a symlink target into `components` at `index` (the component
/// that was a symlink). Absolute targets replace from the root; relative
/// targets replace just that component (§4.2 step 3).
fn splice_target(components: &[String], index: usize, target: &str) -> Vec<String> {
    if is_absolute(target) {
        let mut spliced = lexical_collapse(target);
        spliced.extend_from_slice(&components[index + 1..]);
        spliced
    } else {
        let mut prefix = components[..index].to_vec();
        prefix.extend(lexical_collapse(target));
        prefix.extend_from_slice(&components[index + 1..]);
        prefix
    }
}

/// Core algorithm shared by `normalize` and `normalize_at` once the input
/// has been made absolute (§4.2 steps 2-4).
fn walk(ctx: &dyn ResolutionContext, start: &str, follow_final: bool) -> Normalized {
    let mut components = lexical_collapse(start);
    let mut traversed = Vec::new();
    let mut visited = std::collections::HashSet::new();
    let mut hops = 0usize;

    'outer: loop {
        for i in 0..components.len() {
            let is_final = i == components.len() - 1;
            if is_final && !follow_final {
                continue;
            }
            let prefix = join_absolute(&components[..=i]);
            if let Some(target) = ctx.readlink(&prefix) {
                if !visited.insert(prefix.clone()) {
                    // Cycle: stop here without error (§9 "Cyclic graphs").
                    break 'outer;
                }
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    break 'outer;
                }
                traversed.push(TraversedSymlink { link_path: prefix });
                components = splice_target(&components, i, &target);
                continue 'outer;
            }
        }
        break;
    }

    Normalized {
        path: join_absolute(&components),
        traversed_symlinks: traversed,
    }
}

/// Normalizes `path`, resolving it relative to `pid`'s cwd if it isn't
/// already absolute (§4.2 contract).
///
/// Returns `None` on the normalization-failure cases from §3 invariant 7:
/// zero-length, null, or (after making absolute) still not absolute.
pub fn normalize(ctx: &dyn ResolutionContext, path: &str, no_follow: bool, pid: pid_t) -> Option<Normalized> {
    if path.is_empty() {
        return None;
    }
    let absolute = if is_absolute(path) {
        path.to_string()
    } else {
        let cwd = ctx.cwd(pid)?;
        format!("{}/{}", cwd.trim_end_matches('/'), path)
    };
    if !is_absolute(&absolute) {
        return None;
    }
    Some(walk(ctx, &absolute, !no_follow))
}

/// `*at`-family variant: resolves `path` relative to `dirfd` (or `pid`'s
/// cwd when `dirfd == AT_FDCWD`) before normalizing (§4.2 step 1).
pub fn normalize_at(
    ctx: &dyn ResolutionContext,
    dirfd: i32,
    path: &str,
    no_follow: bool,
    pid: pid_t,
) -> Option<Normalized> {
    if path.is_empty() {
        return None;
    }
    if is_absolute(path) {
        return Some(walk(ctx, path, !no_follow));
    }
    let base = if dirfd == libc::AT_FDCWD {
        ctx.cwd(pid)?
    } else {
        ctx.dir_for_fd(dirfd, pid)?
    };
    let absolute = format!("{}/{}", base.trim_end_matches('/'), path);
    Some(walk(ctx, &absolute, !no_follow))
}

/// Reads `/proc/<pid>/cwd` as an absolute path, used by the default
/// in-process [`ResolutionContext`] implementations.
pub fn proc_cwd(pid: pid_t) -> Option<String> {
    let link = format!("/proc/{}/cwd", pid);
    std::fs::read_link(&link)
        .ok()
        .map(|p: PathBuf| String::from_utf8_lossy(p.as_os_str().as_bytes()).into_owned())
}

/// Reads `/proc/<pid>/fd/<fd>` as an absolute path.
pub fn proc_fd(pid: pid_t, fd: i32) -> Option<String> {
    let link = format!("/proc/{}/fd/{}", pid, fd);
    std::fs::read_link(&link)
        .ok()
        .map(|p: PathBuf| String::from_utf8_lossy(p.as_os_str().as_bytes()).into_owned())
}

/// Calls the real `readlink(2)` (not the hooked one) for use by
/// [`ResolutionContext`] implementations that operate in-process.
pub fn real_readlink(path: &str) -> Option<String> {
    let c_path = std::ffi::CString::new(path).ok()?;
    let mut buf = vec![0u8; libc::PATH_MAX as usize];
    // SAFETY: buf is valid for buf.len() bytes; c_path is NUL-terminated.
    let n = unsafe { libc::readlink(c_path.as_ptr(), buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if n < 0 {
        return None;
    }
    buf.truncate(n as usize);
    Some(String::from_utf8_lossy(&buf).into_owned())
}

/// The default [`ResolutionContext`] for in-process (interposer) use: cwd
/// and fd lookups go through `/proc/self`, backed by [`crate::fd_table`]
/// first when available.
pub struct SelfProcessContext;

impl ResolutionContext for SelfProcessContext {
    fn dir_for_fd(&self, dirfd: i32, pid: pid_t) -> Option<String> {
        proc_fd(pid, dirfd)
    }

    fn cwd(&self, pid: pid_t) -> Option<String> {
        proc_cwd(pid)
    }

    fn readlink(&self, path: &str) -> Option<String> {
        real_readlink(path)
    }
}

/// The [`ResolutionContext`] used by the ptrace tracer: every lookup is
/// keyed by the tracee's own `pid`, never the daemon's (§4.9).
pub struct TraceeContext;

impl ResolutionContext for TraceeContext {
    fn dir_for_fd(&self, dirfd: i32, pid: pid_t) -> Option<String> {
        proc_fd(pid, dirfd)
    }

    fn cwd(&self, pid: pid_t) -> Option<String> {
        proc_cwd(pid)
    }

    fn readlink(&self, path: &str) -> Option<String> {
        real_readlink(path)
    }
}

/// `Path::is_absolute` equivalent exposed for callers outside this module
/// that need the same notion of "absolute" used by the resolver.
pub fn path_is_absolute(path: &Path) -> bool {
    path.is_absolute()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeFs {
        cwd: String,
        symlinks: RefCell<HashMap<String, String>>,
    }

    impl ResolutionContext for FakeFs {
        fn dir_for_fd(&self, _dirfd: i32, _pid: pid_t) -> Option<String> {
            Some("/work".to_string())
        }
        fn cwd(&self, _pid: pid_t) -> Option<String> {
            Some(self.cwd.clone())
        }
        fn readlink(&self, path: &str) -> Option<String> {
            self.symlinks.borrow().get(path).cloned()
        }
    }

    fn fs_with(symlinks: &[(&str, &str)]) -> FakeFs {
        FakeFs {
            cwd: "/work".to_string(),
            symlinks: RefCell::new(symlinks.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
        }
    }

    #[test]
    fn collapses_dot_and_dotdot_lexically() {
        let fs = fs_with(&[]);
        let result = normalize(&fs, "/a/./b/../c", false, 1).unwrap();
        assert_eq!(result.path, "/a/c");
        assert!(result.traversed_symlinks.is_empty());
    }

    #[test]
    fn dotdot_past_root_stays_at_root() {
        let fs = fs_with(&[]);
        let result = normalize(&fs, "/../../etc", false, 1).unwrap();
        assert_eq!(result.path, "/etc");
    }

    #[test]
    fn relative_path_resolved_against_cwd() {
        let fs = fs_with(&[]);
        let result = normalize(&fs, "sub/file.txt", false, 1).unwrap();
        assert_eq!(result.path, "/work/sub/file.txt");
    }

    #[test]
    fn empty_path_fails_normalization() {
        let fs = fs_with(&[]);
        assert!(normalize(&fs, "", false, 1).is_none());
    }

    #[test]
    fn resolves_intermediate_symlink_and_reports_it() {
        let fs = fs_with(&[("/a/b", "/real")]);
        let result = normalize(&fs, "/a/b/c", false, 1).unwrap();
        assert_eq!(result.path, "/real/c");
        assert_eq!(result.traversed_symlinks.len(), 1);
        assert_eq!(result.traversed_symlinks[0].link_path, "/a/b");
    }

    #[test]
    fn no_follow_skips_final_component_symlink() {
        let fs = fs_with(&[("/a/b", "/real")]);
        let result = normalize(&fs, "/a/b", true, 1).unwrap();
        assert_eq!(result.path, "/a/b");
        assert!(result.traversed_symlinks.is_empty());
    }

    #[test]
    fn symlink_loop_terminates_without_error() {
        let fs = fs_with(&[("/a", "/b"), ("/b", "/a")]);
        let result = normalize(&fs, "/a/x", false, 1).unwrap();
        // Must terminate; exact path is whichever side the cycle broke on.
        assert!(result.path == "/a/x" || result.path == "/b/x");
    }

    #[test]
    fn idempotent_across_equivalent_inputs() {
        let fs = fs_with(&[]);
        let p1 = normalize(&fs, "/a/./b/c", false, 1).unwrap();
        let p2 = normalize(&fs, "/a/b/./c", false, 1).unwrap();
        assert_eq!(p1.path, p2.path);
    }
}
