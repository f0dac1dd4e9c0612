//! The ptrace fallback path for statically-linked binaries (§4.9): a seccomp
//! trace filter plus a seize/cont tracer, used only when interposition
//! cannot hook libc symbols because there is no dynamic libc to hook.

pub mod daemon;
pub mod mqueue_proto;
pub mod registers;
pub mod seccomp;
pub mod syscalls;
pub mod tracer;
