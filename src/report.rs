//! `AccessReport` — the value type written to the report pipe (§3, §4.6).
//!
//! Reports are always built on the stack and handed straight to
//! [`crate::transport`]; nothing here owns a heap allocation that outlives a
//! single call.

use std::fmt;

use libc::pid_t;

/// Every event kind the observer can report. Named after the operation the
/// interposer or tracer observed, not the raw syscall, since several
/// syscalls in a hook family collapse to the same `OpCode` (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Exec,
    Open,
    Read,
    Write,
    Create,
    Stat,
    Access,
    Unlink,
    RenameSource,
    RenameDest,
    Link,
    Symlink,
    Readlink,
    SetMode,
    SetOwner,
    SetTime,
    SetAcl,
    SetFlags,
    SetExtAttr,
    DeleteExtAttr,
    GetExtAttr,
    ListExtAttr,
    Fork,
    Exit,
    Debug,
    FirstAllowWriteCheck,
    StaticallyLinkedProcess,
    ProcessTreeCompleted,
}

impl OpCode {
    /// The coalesced cache class for this op (§4.4). `None` means the op
    /// bypasses the cache unconditionally.
    pub fn cache_class(self) -> Option<EventClass> {
        use OpCode::*;
        match self {
            SetExtAttr | DeleteExtAttr | SetFlags | SetOwner | SetMode | Write | SetTime
            | SetAcl => Some(EventClass::Write),
            GetExtAttr | ListExtAttr | Access | Stat => Some(EventClass::Stat),
            Fork | Exit | Exec | RenameSource | RenameDest | Link => None,
            other => Some(EventClass::Standalone(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        use OpCode::*;
        match self {
            Exec => "exec",
            Open => "open",
            Read => "read",
            Write => "write",
            Create => "create",
            Stat => "stat",
            Access => "access",
            Unlink => "unlink",
            RenameSource => "rename-source",
            RenameDest => "rename-dest",
            Link => "link",
            Symlink => "symlink",
            Readlink => "readlink",
            SetMode => "setmode",
            SetOwner => "setowner",
            SetTime => "settime",
            SetAcl => "setacl",
            SetFlags => "setflags",
            SetExtAttr => "setextattr",
            DeleteExtAttr => "deleteextattr",
            GetExtAttr => "getextattr",
            ListExtAttr => "listextattr",
            Fork => "fork",
            Exit => "exit",
            Debug => "debug",
            FirstAllowWriteCheck => "first-allow-write-check",
            StaticallyLinkedProcess => "statically-linked-process",
            ProcessTreeCompleted => "process-tree-completed",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The coalescing key used by the event cache (§4.4). Two reports with the
/// same `(EventClass, path)` within a process lifetime collapse to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    Write,
    Stat,
    Standalone(OpCode),
}

/// Allow/deny outcome of the policy engine (§4.5). Denial is advisory: the
/// syscall still runs, it is only annotated here for the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Allowed,
    Denied,
}

bitflags::bitflags! {
    /// Requested-access bits, folded against a [`crate::policy::ScopePolicy`]
    /// to decide [`Status`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RequestedAccess: u8 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
        const PROBE = 1 << 2;
    }
}

/// A single access report (§3). Stack-allocated, serialized immediately by
/// [`crate::transport`], then discarded.
#[derive(Debug, Clone)]
pub struct AccessReport {
    pub operation: OpCode,
    pub pid: pid_t,
    pub root_pid: pid_t,
    pub pip_id: u64,
    pub requested_access: RequestedAccess,
    pub status: Status,
    pub report_explicitly: bool,
    /// `0` when unknown (§4.9 "Return-value capture" — only a handful of
    /// ptrace handlers ever fill this in).
    pub error: i32,
    pub is_directory: bool,
    pub path: String,
    pub should_report: bool,
}

impl AccessReport {
    pub fn new(operation: OpCode, pid: pid_t, root_pid: pid_t, pip_id: u64, path: String) -> Self {
        AccessReport {
            operation,
            pid,
            root_pid,
            pip_id,
            requested_access: RequestedAccess::empty(),
            status: Status::Allowed,
            report_explicitly: false,
            error: 0,
            is_directory: false,
            path,
            should_report: true,
        }
    }

    pub fn debug(pid: pid_t, root_pid: pid_t, pip_id: u64, message: impl Into<String>) -> Self {
        AccessReport {
            operation: OpCode::Debug,
            pid,
            root_pid,
            pip_id,
            requested_access: RequestedAccess::empty(),
            status: Status::Allowed,
            report_explicitly: true,
            error: 0,
            is_directory: false,
            path: message.into(),
            should_report: true,
        }
    }
}

/// One or two reports produced by a single interposed call (§3). `rename`
/// is the canonical two-report case: `unlink@src` + `create@dest`.
pub enum AccessReportGroup {
    One(AccessReport),
    Two(AccessReport, AccessReport),
    Many(Vec<AccessReport>),
}

impl AccessReportGroup {
    pub fn reports(self) -> Vec<AccessReport> {
        match self {
            AccessReportGroup::One(r) => vec![r],
            AccessReportGroup::Two(a, b) => vec![a, b],
            AccessReportGroup::Many(v) => v,
        }
    }
}

impl From<AccessReport> for AccessReportGroup {
    fn from(r: AccessReport) -> Self {
        AccessReportGroup::One(r)
    }
}
