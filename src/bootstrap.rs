//! Bootstrap + env propagation (C10): initializes the singleton on first
//! hook invocation and keeps the pre-load/manifest/ptrace environment
//! variables correct across `execve` (§4.10).

use std::ffi::CString;

use crate::error::ObserverError;
use crate::logging::fatal_line;
use crate::manifest::{
    AccessManifest, DETOURS_PATH_ENV, FAM_PATH_ENV, LD_PRELOAD_ENV, PTRACE_FORCED_ENV, PTRACE_MQ_NAME_ENV,
    ROOT_PID_ENV,
};
use crate::singleton::{self, Observer};

/// Logs one line to stderr and terminates the process per §7's Fatal
/// rows. Never returns. Fatal-ptrace errors use `-1`; every other fatal
/// case uses `1` (§7 "Fatal configuration").
pub fn die_fatal(err: &ObserverError) -> ! {
    fatal_line(&err.to_string());
    let code = if err.is_fatal_ptrace() { 255 } else { 1 };
    // SAFETY: _exit is always safe to call; it never returns.
    unsafe { libc::_exit(code) }
}

/// Reads `BXL_ROOT_PID`: `-1` means inherit whatever the parent decided,
/// `1` means "I am root", any positive value is the actual root pid
/// (§6 env var table).
fn read_root_pid() -> Option<i32> {
    std::env::var(ROOT_PID_ENV).ok()?.parse::<i32>().ok()
}

/// Runs once per process, the first time any hook fires (§4.10).
///
/// 1. Reads the root-pid env var.
/// 2. Parses the manifest (fatal on failure).
/// 3. Returns the constructed [`Observer`] for the singleton to own.
fn bootstrap() -> Observer {
    let root_pid_env = read_root_pid();
    let is_root = root_pid_env == Some(1);

    let manifest = match AccessManifest::load_from_env() {
        Ok(m) => m,
        Err(e) => die_fatal(&e),
    };

    Observer {
        manifest,
        fd_table: crate::fd_table::FdTable::new(),
        event_cache: crate::event_cache::EventCache::new(),
        first_write: crate::policy::FirstWriteTracker::new(),
        static_link_cache: crate::static_link::StaticallyLinkedCache::new(),
        is_root,
    }
}

/// Returns the process-wide [`Observer`], bootstrapping it if this is the
/// first call. Safe to call from any hook.
pub fn observer() -> &'static Observer {
    singleton::get_or_init(bootstrap)
}

/// Appends `value` to `LD_PRELOAD` rather than replacing it, so other
/// pre-loads installed by the surrounding environment survive (§4.10).
fn append_preload(current: Option<String>, value: &str) -> String {
    match current {
        Some(existing) if !existing.is_empty() => format!("{}:{}", existing, value),
        _ => value.to_string(),
    }
}

/// Builds the environment a child should inherit across an `exec*` call
/// (§4.10 "On every exec* shim call").
///
/// When child monitoring is disabled, the pre-load/manifest/ptrace
/// variables are stripped so the child runs unobserved. Otherwise they are
/// force-added (preload appended, not replaced).
pub fn prepare_child_environment(observer: &Observer, mut env: Vec<(String, String)>) -> Vec<(String, String)> {
    let monitor_children = observer.manifest.is_monitoring_children();

    env.retain(|(k, _)| {
        !matches!(
            k.as_str(),
            FAM_PATH_ENV | DETOURS_PATH_ENV | ROOT_PID_ENV | PTRACE_MQ_NAME_ENV | PTRACE_FORCED_ENV
        )
    });

    if !monitor_children {
        let detours = std::env::var(DETOURS_PATH_ENV).unwrap_or_default();
        for (k, v) in env.iter_mut() {
            if k == LD_PRELOAD_ENV {
                let filtered: Vec<&str> = v.split(':').filter(|p| *p != detours).collect();
                *v = filtered.join(":");
            }
        }
        env.retain(|(k, v)| k != LD_PRELOAD_ENV || !v.is_empty());
        return env;
    }

    let current_preload = env
        .iter()
        .find(|(k, _)| k == LD_PRELOAD_ENV)
        .map(|(_, v)| v.clone())
        .or_else(|| std::env::var(LD_PRELOAD_ENV).ok());
    let detours = observer.manifest.preload_library_path.to_string_lossy().into_owned();
    let new_preload = append_preload(current_preload, &detours);

    env.retain(|(k, _)| k != LD_PRELOAD_ENV);
    env.push((LD_PRELOAD_ENV.to_string(), new_preload));
    env.push((FAM_PATH_ENV.to_string(), fam_path_env_value()));
    if let Some(mq) = &observer.manifest.ptrace_mq_name {
        env.push((PTRACE_MQ_NAME_ENV.to_string(), mq.clone()));
    }
    let forced: Vec<&str> = observer.manifest.forced_ptrace_names().collect();
    if !forced.is_empty() {
        env.push((PTRACE_FORCED_ENV.to_string(), forced.join(";")));
    }
    env.push((ROOT_PID_ENV.to_string(), "-1".to_string()));

    env
}

fn fam_path_env_value() -> String {
    std::env::var(FAM_PATH_ENV).unwrap_or_default()
}

/// Converts a `Vec<(String, String)>` environment into the NUL-terminated
/// `KEY=VALUE\0` `CString`s `execve(2)` expects.
pub fn to_envp(env: &[(String, String)]) -> Vec<CString> {
    env.iter()
        .filter_map(|(k, v)| CString::new(format!("{}={}", k, v)).ok())
        .collect()
}

/// Installs the process-exit flush handled by `atexit(3)` (§4.10 step 3):
/// on exit, and only for the root pip, a `process-tree-completed` report
/// is emitted so the supervisor can tell the whole tree finished.
pub fn install_atexit_handler() {
    extern "C" fn on_exit() {
        if let Some(observer) = singleton::get() {
            if observer.is_root {
                let report = crate::report::AccessReport::new(
                    crate::report::OpCode::ProcessTreeCompleted,
                    std::process::id() as libc::pid_t,
                    observer.manifest.pid_of_root_process,
                    observer.manifest.pip_id,
                    String::new(),
                );
                crate::transport::emit_or_log(&observer.manifest.report_pipe_path, &report);
            }
        }
    }
    // SAFETY: on_exit has the `extern "C" fn()` signature atexit requires.
    unsafe {
        libc::atexit(on_exit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_preload_appends_rather_than_replaces() {
        let combined = append_preload(Some("/a/lib.so".into()), "/b/lib.so");
        assert_eq!(combined, "/a/lib.so:/b/lib.so");
    }

    #[test]
    fn append_preload_with_no_prior_value() {
        let combined = append_preload(None, "/b/lib.so");
        assert_eq!(combined, "/b/lib.so");
    }

    #[test]
    fn to_envp_formats_key_value_pairs() {
        let env = vec![("A".to_string(), "1".to_string()), ("B".to_string(), "two".to_string())];
        let envp = to_envp(&env);
        assert_eq!(envp[0].to_str().unwrap(), "A=1");
        assert_eq!(envp[1].to_str().unwrap(), "B=two");
    }
}
