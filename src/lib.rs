//! `fam-observer`: an `LD_PRELOAD` file-access interposer with a ptrace
//! fallback for statically-linked binaries, reporting every observed
//! filesystem access to a build-system supervisor over a pipe (§1-§2).
//!
//! The cdylib half (every module except [`ptrace`] and [`bin`]) is loaded
//! into a traced process via `LD_PRELOAD`; [`ptrace`] backs the separate
//! `fam-tracerd` binary that handles processes with no dynamic libc to
//! hook. Both halves share the manifest, policy, report and transport
//! layers so a single event reaches the supervisor in the same wire format
//! regardless of which path produced it (§4.6).
#![feature(c_variadic)]

pub mod bootstrap;
pub mod error;
pub mod event_cache;
pub mod fd_table;
pub mod interpose;
pub mod logging;
pub mod manifest;
pub mod path_resolver;
pub mod policy;
pub mod ptrace;
pub mod report;
pub mod singleton;
pub mod static_link;
pub mod transport;

/// Runs once when the pre-load library is mapped into a process (§4.10
/// "On load"). Bootstrapping the singleton here rather than lazily on
/// first hook means the very first libc call a traced process makes is
/// already observed, and the `atexit` handler is registered before any
/// application code can call `atexit` itself and run after ours.
///
/// This constructor runs in every binary that links this crate, including
/// `fam-tracerd` and test binaries, so it only acts when the manifest env
/// var is actually present — anything else is not an interposed process
/// and has nothing for this constructor to do.
#[ctor::ctor]
fn on_load() {
    if std::env::var(manifest::FAM_PATH_ENV).is_err() {
        return;
    }
    let _ = bootstrap::observer();
    bootstrap::install_atexit_handler();
}
