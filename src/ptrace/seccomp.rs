//! Seccomp trace filter (§4.9 "Trigger"): a BPF program that returns
//! `SECCOMP_RET_TRACE` for filesystem-touching syscalls and
//! `SECCOMP_RET_ALLOW` for everything else, installed in the
//! statically-linked tracee just before it sleeps waiting for the tracer
//! to attach.
//!
//! Unlike a sandboxing filter (compare the allow-list pattern this is
//! adapted from), nothing here is ever denied: the filter only decides
//! which syscalls produce a `PTRACE_EVENT_SECCOMP` stop the tracer can
//! decode arguments from. x86_64-only, matching [`crate::ptrace::registers`].

use std::io;
use std::mem;

#[repr(C)]
struct SockFilter {
    code: u16,
    jt: u8,
    jf: u8,
    k: u32,
}

#[repr(C)]
struct SockFprog {
    len: u16,
    filter: *const SockFilter,
}

const BPF_LD: u16 = 0x00;
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;
const BPF_JMP: u16 = 0x05;
const BPF_JEQ: u16 = 0x10;
const BPF_K: u16 = 0x00;
const BPF_RET: u16 = 0x06;

const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;
const SECCOMP_RET_TRACE: u32 = 0x7ff0_0000;
const SECCOMP_DATA_NR_OFFSET: u32 = 0;

/// x86_64 syscall numbers for every filesystem-touching entry point this
/// crate interposes in-process (§4.9 "a seccomp filter listing ~50
/// filesystem syscalls").
const TRACED_SYSCALLS: &[u32] = &[
    2,   // open
    4,   // stat
    5,   // fstat
    6,   // lstat
    21,  // access
    40,  // sendfile
    59,  // execve
    76,  // truncate
    77,  // ftruncate
    79,  // getcwd
    80,  // chdir
    82,  // rename
    83,  // mkdir
    84,  // rmdir
    85,  // creat
    86,  // link
    87,  // unlink
    88,  // symlink
    89,  // readlink
    90,  // chmod
    91,  // fchmod
    92,  // chown
    93,  // fchown
    94,  // lchown
    132, // utime
    133, // mknod
    257, // openat
    258, // mkdirat
    259, // mknodat
    260, // fchownat
    261, // futimesat
    262, // newfstatat
    263, // unlinkat
    264, // renameat
    265, // linkat
    266, // symlinkat
    267, // readlinkat
    268, // fchmodat
    269, // faccessat
    280, // utimensat
    285, // fallocate
    316, // renameat2
    326, // copy_file_range
    327, // preadv2
    328, // pwritev2
    332, // statx
    439, // faccessat2
];

/// Installs the trace filter in the **current** process. Must be called
/// after the static-link detection decides ptrace fallback is needed and
/// before the process execs the real target (§4.9 "Trigger").
///
/// # Safety
/// Calls `prctl`/`seccomp` directly; safe to call from ordinary process
/// context (unlike the sandbox profile this pattern is adapted from, this
/// filter does not need to run strictly between `fork` and `exec`).
pub unsafe fn install_trace_filter() -> io::Result<()> {
    const PR_SET_NO_NEW_PRIVS: libc::c_int = 38;
    if libc::prctl(PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) != 0 {
        return Err(io::Error::last_os_error());
    }

    let n = TRACED_SYSCALLS.len();
    let mut prog: Vec<SockFilter> = Vec::with_capacity(n + 2);

    prog.push(SockFilter {
        code: BPF_LD | BPF_W | BPF_ABS,
        jt: 0,
        jf: 0,
        k: SECCOMP_DATA_NR_OFFSET,
    });

    for (i, &nr) in TRACED_SYSCALLS.iter().enumerate() {
        let steps_to_trace = (n - i) as u8;
        prog.push(SockFilter {
            code: BPF_JMP | BPF_JEQ | BPF_K,
            jt: steps_to_trace,
            jf: 0,
            k: nr,
        });
    }

    prog.push(SockFilter {
        code: BPF_RET | BPF_K,
        jt: 0,
        jf: 0,
        k: SECCOMP_RET_ALLOW,
    });
    prog.push(SockFilter {
        code: BPF_RET | BPF_K,
        jt: 0,
        jf: 0,
        k: SECCOMP_RET_TRACE,
    });

    let fprog = SockFprog {
        len: prog.len() as u16,
        filter: prog.as_ptr(),
    };

    const SYS_SECCOMP: libc::c_long = 317;
    const SECCOMP_SET_MODE_FILTER: libc::c_ulong = 1;

    let ret = libc::syscall(
        SYS_SECCOMP,
        SECCOMP_SET_MODE_FILTER,
        0u64,
        &fprog as *const SockFprog as *const libc::c_void,
    );

    mem::forget(prog);

    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traced_syscalls_cover_both_open_families() {
        assert!(TRACED_SYSCALLS.contains(&2)); // open
        assert!(TRACED_SYSCALLS.contains(&257)); // openat
    }

    #[test]
    fn traced_syscalls_has_no_duplicates() {
        let mut sorted = TRACED_SYSCALLS.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), TRACED_SYSCALLS.len());
    }
}
