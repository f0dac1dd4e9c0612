//! `fam-tracerd`: the ptrace fallback daemon (C13). Listens on a POSIX
//! message queue for statically-linked tracees announcing themselves, and
//! runs one tracer per tracee tree (§4.9).

use clap::Parser;

/// Tracer daemon for statically-linked processes the in-process interposer
/// cannot hook.
#[derive(Parser, Debug)]
#[command(name = "fam-tracerd", version)]
struct Args {
    /// Name of the POSIX message queue tracees announce themselves on.
    #[arg(long)]
    mq_name: String,

    /// Fallback manifest path used when a `start` message omits one.
    #[arg(long, default_value = "")]
    manifest_path: String,

    /// Minimum log level (`error`, `warn`, `info`, `debug`, `trace`).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();
    std::env::set_var("RUST_LOG", &args.log_level);
    fam_observer::logging::init_daemon_logging();

    log::info!("fam-tracerd listening on mqueue {:?}", args.mq_name);
    if let Err(err) = fam_observer::ptrace::daemon::listen(&args.mq_name, &args.manifest_path) {
        log::error!("fam-tracerd exiting: {err}");
        std::process::exit(1);
    }
}
