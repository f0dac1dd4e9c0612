//! Report transport (C6): frames an [`AccessReport`] and writes it to the
//! FIFO named in the manifest, in one `write()` syscall so the kernel's
//! `PIPE_BUF` atomicity guarantee covers the whole record (§4.6, §5).

use std::io::Write;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

use crate::error::ObserverError;
use crate::report::AccessReport;

/// Linux's `PIPE_BUF`. A single frame (length prefix + payload) must never
/// exceed this or atomicity is no longer guaranteed end-to-end.
pub const PIPE_BUF: usize = libc::PIPE_BUF as usize;

/// RAII wrapper around a raw fd, closed on drop. Named after the teacher's
/// own convention for fd ownership (`ScopedFd`), used here for the report
/// pipe's write end.
pub struct ScopedFd(RawFd);

impl ScopedFd {
    pub fn open_append(path: &Path) -> Result<Self, ObserverError> {
        let c_path = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
            .map_err(|_| ObserverError::PipeOpen(path.to_path_buf(), std::io::Error::from(std::io::ErrorKind::InvalidInput)))?;
        // SAFETY: c_path is a valid NUL-terminated string for the lifetime of
        // this call; the returned fd is owned exclusively by this ScopedFd.
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_WRONLY | libc::O_APPEND) };
        if fd < 0 {
            return Err(ObserverError::PipeOpen(
                path.to_path_buf(),
                std::io::Error::last_os_error(),
            ));
        }
        Ok(ScopedFd(fd))
    }

    fn write_all(&self, buf: &[u8]) -> std::io::Result<()> {
        let mut written = 0usize;
        while written < buf.len() {
            // SAFETY: self.0 is a valid, open fd for the duration of this call.
            let n = unsafe {
                libc::write(
                    self.0,
                    buf[written..].as_ptr() as *const libc::c_void,
                    buf.len() - written,
                )
            };
            if n < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            written += n as usize;
        }
        Ok(())
    }
}

impl AsRawFd for ScopedFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Drop for ScopedFd {
    fn drop(&mut self) {
        if self.0 >= 0 {
            // SAFETY: self.0 is owned exclusively by this ScopedFd.
            unsafe {
                libc::close(self.0);
            }
        }
    }
}

/// Replaces `|`, `\n`, `\r` inside a path field with `!`, `.`, `.`
/// respectively, so the pipe-delimited record stays parseable (§4.6).
fn escape_path_field(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '|' => out.push('!'),
            '\n' => out.push('.'),
            '\r' => out.push('.'),
            other => out.push(other),
        }
    }
    out
}

/// Serializes one report into the pipe-delimited ASCII record described in
/// §4.6, without the length prefix.
pub fn serialize_payload(report: &AccessReport) -> String {
    format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}\n",
        report.operation.as_str(),
        report.pid,
        report.root_pid,
        report.requested_access.bits(),
        match report.status {
            crate::report::Status::Allowed => "allowed",
            crate::report::Status::Denied => "denied",
        },
        report.report_explicitly as u8,
        report.error,
        report.pip_id,
        report.is_directory as u8,
        escape_path_field(&report.path),
    )
}

/// Frames `payload` as `[u32 little-endian length][payload bytes]`.
pub fn frame(payload: &str) -> Vec<u8> {
    let bytes = payload.as_bytes();
    let mut framed = Vec::with_capacity(4 + bytes.len());
    framed.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    framed.extend_from_slice(bytes);
    framed
}

/// Writes one report to `pipe_path`. Debug reports are truncated to fit
/// `PIPE_BUF`; any other report that would overflow it is a fatal
/// configuration error (§4.6, §7).
pub fn emit(pipe_path: &Path, report: &AccessReport) -> Result<(), ObserverError> {
    let mut payload = serialize_payload(report);
    let mut framed = frame(&payload);

    if framed.len() > PIPE_BUF {
        if report.operation == crate::report::OpCode::Debug {
            let budget = PIPE_BUF.saturating_sub(5); // 4-byte length prefix + trailing '\n'
            payload.truncate(payload.char_indices().take_while(|(i, _)| *i < budget).count());
            if !payload.ends_with('\n') {
                payload.push('\n');
            }
            framed = frame(&payload);
        } else {
            return Err(ObserverError::ReportTooLarge(report.operation, framed.len()));
        }
    }

    let fd = ScopedFd::open_append(pipe_path)?;
    fd.write_all(&framed).map_err(ObserverError::PipeWrite)?;
    // The fd is reused by the OS once dropped; callers must not leave a
    // stale entry for it in the FD table (§4.6 "Atomicity").
    Ok(())
}

/// Convenience used by the daemon binary, which logs with full formatting
/// rather than going through the interposer's reentrancy-safe path.
pub fn emit_or_log(pipe_path: &Path, report: &AccessReport) {
    if let Err(e) = emit(pipe_path, report) {
        log::warn!("failed to emit {} report for {}: {}", report.operation, report.path, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{AccessReport, OpCode};

    #[test]
    fn frame_includes_le_length_prefix() {
        let framed = frame("abc\n");
        assert_eq!(&framed[0..4], &4u32.to_le_bytes());
        assert_eq!(&framed[4..], b"abc\n");
    }

    #[test]
    fn payload_ends_in_newline_and_has_ten_fields() {
        let report = AccessReport::new(OpCode::Stat, 10, 1, 99, "/etc/hosts".into());
        let payload = serialize_payload(&report);
        assert!(payload.ends_with('\n'));
        assert_eq!(payload.trim_end().split('|').count(), 10);
    }

    #[test]
    fn escapes_forbidden_characters_in_path() {
        let report = AccessReport::new(OpCode::Stat, 1, 1, 1, "/a|b\nc\rd".into());
        let payload = serialize_payload(&report);
        let path_field = payload.trim_end().split('|').last().unwrap();
        assert_eq!(path_field, "/a!b.c.d");
    }

    #[test]
    fn oversized_non_debug_report_is_rejected_before_write() {
        let huge_path = "a".repeat(PIPE_BUF * 2);
        let report = AccessReport::new(OpCode::Stat, 1, 1, 1, huge_path);
        // The pipe named here is never opened: emit() must fail the size
        // check before it touches the filesystem at all.
        let result = emit(Path::new("/nonexistent/does-not-exist.pipe"), &report);
        match result {
            Err(ObserverError::ReportTooLarge(op, len)) => {
                assert_eq!(op, OpCode::Stat);
                assert!(len > PIPE_BUF);
            }
            other => panic!("expected ReportTooLarge, got {:?}", other),
        }
    }
}
