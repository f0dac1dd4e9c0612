//! Logging & diagnostics (C11, ambient): structured, leveled logging for
//! both the interposer and the tracer daemon.
//!
//! The interposer installs its logger lazily on first hook (§4.10
//! bootstrap) and only ever writes pre-formatted lines straight to a
//! resolved stderr fd, so a log call from inside a libc shim can never
//! itself re-enter libc in a way that loops back into the shim. The
//! tracer daemon, a normal non-interposed binary, uses full `env_logger`
//! formatting instead (§4.13).

use std::io::Write;
use std::sync::Once;

static INIT_INTERPOSER_LOG: Once = Once::new();

/// Minimal reentrancy-safe logger used inside the interposer. It does not
/// go through the `log` facade's global logger (installing one there would
/// itself call into allocator/locking paths we'd rather keep off the hot
/// shim path); it writes directly to fd 2.
pub fn interposer_log(level: &str, message: &str) {
    INIT_INTERPOSER_LOG.call_once(|| {
        // Nothing to initialize today; reserved for future log-level gating
        // read from the manifest.
    });
    let line = format!("[fam-observer][{}] {}\n", level, message);
    // SAFETY: fd 2 is stderr, already open for the process lifetime; a
    // short write to it cannot recurse into an interposed symbol.
    let _ = unsafe {
        libc::write(2, line.as_ptr() as *const libc::c_void, line.len())
    };
}

/// One-shot fatal line required by §7 "Fatal configuration" /
/// "Fatal ptrace" before the process calls `_exit`.
pub fn fatal_line(message: &str) {
    interposer_log("fatal", message);
}

/// Initializes the `log`/`env_logger` facade for the tracer daemon binary,
/// which runs outside the interposer's reentrancy constraints and can use
/// normal buffered, timestamped output (§4.11, §4.13).
pub fn init_daemon_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                buf.timestamp_millis(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init();
}
