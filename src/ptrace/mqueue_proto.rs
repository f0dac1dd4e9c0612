//! Wire format for the POSIX message queue handoff between a
//! statically-linked tracee and the tracer daemon (§4.9 "Trigger").
//!
//! Both message kinds are pipe-delimited ASCII, matching the report
//! transport's own framing convention (§4.6) rather than introducing a
//! second serialization scheme for what is, in the end, a handful of
//! fields.

use libc::pid_t;

/// `start|pid|ppid|exePath|manifestPath`, sent by the tracee right before
/// it installs its seccomp trace filter and sleeps (§4.9 "Trigger").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartMessage {
    pub pid: pid_t,
    pub ppid: pid_t,
    pub exe_path: String,
    pub manifest_path: String,
}

impl StartMessage {
    pub fn encode(&self) -> String {
        format!("start|{}|{}|{}|{}", self.pid, self.ppid, self.exe_path, self.manifest_path)
    }

    pub fn parse(text: &str) -> Option<Self> {
        let mut fields = text.splitn(5, '|');
        if fields.next()? != "start" {
            return None;
        }
        let pid = fields.next()?.parse().ok()?;
        let ppid = fields.next()?.parse().ok()?;
        let exe_path = fields.next()?.to_string();
        let manifest_path = fields.next()?.to_string();
        Some(StartMessage { pid, ppid, exe_path, manifest_path })
    }
}

/// `exitNotification|pid`, sent by the tracer (not the tracee) once its
/// entire tracee table has drained (§4.9 "PTRACE_EVENT_EXIT" row).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitNotification {
    pub pid: pid_t,
}

impl ExitNotification {
    pub fn encode(&self) -> String {
        format!("exitNotification|{}", self.pid)
    }

    pub fn parse(text: &str) -> Option<Self> {
        let mut fields = text.splitn(2, '|');
        if fields.next()? != "exitNotification" {
            return None;
        }
        let pid = fields.next()?.parse().ok()?;
        Some(ExitNotification { pid })
    }
}

/// Either message kind, as read off the queue by the daemon's listener
/// loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Start(StartMessage),
    Exit(ExitNotification),
}

impl Message {
    pub fn parse(text: &str) -> Option<Self> {
        StartMessage::parse(text)
            .map(Message::Start)
            .or_else(|| ExitNotification::parse(text).map(Message::Exit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_message_round_trips() {
        let msg = StartMessage {
            pid: 123,
            ppid: 100,
            exe_path: "/usr/bin/static_tool".into(),
            manifest_path: "/tmp/manifest.bin".into(),
        };
        let encoded = msg.encode();
        assert_eq!(Message::parse(&encoded), Some(Message::Start(msg)));
    }

    #[test]
    fn exit_notification_round_trips() {
        let msg = ExitNotification { pid: 456 };
        let encoded = msg.encode();
        assert_eq!(Message::parse(&encoded), Some(Message::Exit(msg)));
    }

    #[test]
    fn garbage_input_parses_to_none() {
        assert_eq!(Message::parse("not-a-known-message"), None);
    }
}
