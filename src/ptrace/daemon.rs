//! The two halves of the mqueue handoff (§4.9 "Trigger"): [`notify_start`]
//! runs inside the about-to-exec tracee and hands itself off to the tracer;
//! [`listen`] runs in `fam-tracerd` and spawns one [`super::tracer::run`]
//! thread per incoming tracee.

use std::thread;
use std::time::Duration;

use nix::mqueue::{self, MQ_OFlag, MqAttr, MqdT};
use nix::sys::stat::Mode;
use nix::unistd::Pid;

use crate::error::ObserverError;
use crate::manifest::AccessManifest;
use crate::ptrace::mqueue_proto::{Message, StartMessage};
use crate::singleton::Observer;

const MAX_MESSAGE_LEN: i64 = 512;

fn open_for_send(name: &str) -> Result<MqdT, ObserverError> {
    mqueue::mq_open(name, MQ_OFlag::O_WRONLY, Mode::empty(), None).map_err(ObserverError::MessageQueue)
}

fn open_for_receive(name: &str) -> Result<MqdT, ObserverError> {
    let attr = MqAttr::new(0, 10, MAX_MESSAGE_LEN, 0);
    mqueue::mq_open(
        name,
        MQ_OFlag::O_RDONLY | MQ_OFlag::O_CREAT,
        Mode::from_bits_truncate(0o600),
        Some(&attr),
    )
    .map_err(ObserverError::MessageQueue)
}

/// Best-effort send: a missing or full queue degrades to "no ptrace fallback
/// for this process", never to a crash (§4.9, same tolerance as the report
/// pipe in [`crate::transport::emit_or_log`]).
pub fn send_message(mq_name: &str, payload: &str) {
    let Ok(mqd) = open_for_send(mq_name) else { return };
    let _ = mqueue::mq_send(&mqd, payload.as_bytes(), 0);
}

/// Called from the freshly-exec'd statically-linked tracee (§4.9 "Trigger"):
/// announces itself to the daemon, installs the seccomp trace filter, then
/// sleeps long enough for `PTRACE_SEIZE` to land before the real program
/// runs.
pub fn notify_start(observer: &Observer, pid: libc::pid_t, resolved_exe_path: &str) {
    let Some(mq_name) = observer.manifest.ptrace_mq_name.as_deref() else {
        return;
    };

    let start = StartMessage {
        pid,
        ppid: unsafe { libc::getppid() },
        exe_path: resolved_exe_path.to_string(),
        manifest_path: std::env::var(crate::manifest::FAM_PATH_ENV).unwrap_or_default(),
    };
    send_message(mq_name, &start.encode());

    unsafe {
        if let Err(err) = crate::ptrace::seccomp::install_trace_filter() {
            crate::logging::interposer_log("warn", &format!("seccomp trace filter failed: {err}"));
        }
    }

    thread::sleep(Duration::from_secs(2));
}

/// The daemon's main loop: blocks on `mq_receive`, and for every `start`
/// message spawns a dedicated tracer thread (§4.9 steps 1-3). `exitNotification`
/// messages are logged and otherwise ignored here — the thread that placed
/// them already tore down its own tracee table.
pub fn listen(mq_name: &str, manifest_path_fallback: &str) -> Result<(), ObserverError> {
    let mqd = open_for_receive(mq_name)?;
    let mut buffer = vec![0u8; MAX_MESSAGE_LEN as usize];

    loop {
        let mut priority = 0u32;
        let received = match mqueue::mq_receive(&mqd, &mut buffer, &mut priority) {
            Ok(n) => n,
            Err(err) => {
                log::error!("mq_receive failed: {err}");
                continue;
            }
        };
        let text = String::from_utf8_lossy(&buffer[..received]).into_owned();

        match Message::parse(&text) {
            Some(Message::Start(start)) => {
                let manifest_path = if start.manifest_path.is_empty() {
                    manifest_path_fallback.to_string()
                } else {
                    start.manifest_path.clone()
                };
                let mq_name = mq_name.to_string();
                thread::spawn(move || spawn_tracer(start, &manifest_path, &mq_name));
            }
            Some(Message::Exit(exit)) => {
                log::debug!("tracee tree for pid {} reported fully exited", exit.pid);
            }
            None => {
                log::warn!("unrecognized ptrace mqueue message: {text:?}");
            }
        }
    }
}

fn spawn_tracer(start: StartMessage, manifest_path: &str, mq_name: &str) {
    let manifest = match AccessManifest::load(std::path::Path::new(manifest_path)) {
        Ok(manifest) => manifest,
        Err(err) => {
            log::error!("failed to load manifest for ptrace tracee {}: {err}", start.pid);
            return;
        }
    };

    if let Err(err) = super::tracer::run(Pid::from_raw(start.pid), manifest, mq_name) {
        log::error!("tracer for pid {} exited with error: {err}", start.pid);
    }
}
