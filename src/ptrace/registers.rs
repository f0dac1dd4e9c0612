//! x86_64 register access for a seized tracee (§4.9 "Argument marshalling").
//!
//! Only x86_64 is supported: the syscall ABI the manifest and policy engine
//! agree on is fixed, and a statically-linked tracee is already a narrow
//! enough case that multi-arch register layouts are not worth the
//! complexity the teacher's own `x86`/`x64` union carried for full
//! record/replay.

use nix::sys::ptrace;
use nix::unistd::Pid;

/// The six integer argument registers in System V AMD64 calling-convention
/// order, plus the syscall number and return value (§4.9).
#[derive(Debug, Clone, Copy)]
pub struct SyscallRegisters {
    pub orig_rax: u64,
    pub rax: u64,
    pub args: [u64; 6],
}

impl SyscallRegisters {
    pub fn arg(&self, index: usize) -> u64 {
        self.args[index]
    }
}

/// Reads the tracee's current registers via `PTRACE_GETREGS` (§4.9 step
/// "daemon reads ORIG_RAX and argument registers").
pub fn read(pid: Pid) -> Result<SyscallRegisters, crate::error::ObserverError> {
    let regs = ptrace::getregs(pid).map_err(|e| crate::error::ObserverError::Ptrace("PTRACE_GETREGS", e))?;
    Ok(SyscallRegisters {
        orig_rax: regs.orig_rax,
        rax: regs.rax,
        args: [regs.rdi, regs.rsi, regs.rdx, regs.r10, regs.r8, regs.r9],
    })
}

/// Reads a NUL-terminated string out of the tracee's address space one word
/// at a time via `PTRACE_PEEKTEXT`, bounded by `PATH_MAX` (§4.9 "String
/// arguments are copied byte-wise with PTRACE_PEEKTEXT").
pub fn read_c_string(pid: Pid, addr: u64) -> Option<String> {
    if addr == 0 {
        return None;
    }
    let mut bytes = Vec::new();
    let mut cursor = addr;
    loop {
        let word = ptrace::read(pid, cursor as ptrace::AddressType).ok()? as u64;
        for byte in word.to_ne_bytes() {
            if byte == 0 {
                return Some(String::from_utf8_lossy(&bytes).into_owned());
            }
            bytes.push(byte);
            if bytes.len() > libc::PATH_MAX as usize {
                return Some(String::from_utf8_lossy(&bytes).into_owned());
            }
        }
        cursor += 8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_indexes_into_the_six_registers() {
        let regs = SyscallRegisters {
            orig_rax: 2,
            rax: 0,
            args: [10, 20, 30, 40, 50, 60],
        };
        assert_eq!(regs.arg(0), 10);
        assert_eq!(regs.arg(3), 40);
    }
}
