//! Typed error taxonomy for the observer.
//!
//! The rows mirror the error-handling table in the design: fatal
//! configuration errors abort the process, recoverable ones suppress a
//! single report, and everything else is local to the caller.

use std::path::PathBuf;

use thiserror::Error;

/// All non-fatal-by-construction code paths in this crate return
/// `Result<T, ObserverError>`. Only `bootstrap` and the daemon's `main`
/// decide whether a given variant is fatal.
#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("missing environment variable {0}")]
    MissingEnvVar(&'static str),

    #[error("failed to read manifest at {path}: {source}")]
    ManifestIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode manifest at {path}: {source}")]
    ManifestDecode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    #[error("report record for {0:?} exceeds PIPE_BUF ({1} bytes)")]
    ReportTooLarge(crate::report::OpCode, usize),

    #[error("report pipe {0} could not be opened: {1}")]
    PipeOpen(PathBuf, std::io::Error),

    #[error("report pipe write failed: {0}")]
    PipeWrite(std::io::Error),

    #[error("ptrace operation {0} failed: {1}")]
    Ptrace(&'static str, nix::Error),

    #[error("posix message queue operation failed: {0}")]
    MessageQueue(nix::Error),

    #[error("path normalization failed for input of length {0}")]
    NormalizationFailed(usize),

    #[error("objdump probe of {0} failed: {1}")]
    StaticLinkProbe(PathBuf, std::io::Error),
}

impl ObserverError {
    /// Whether `self` belongs to the "Fatal configuration" row: the caller
    /// must log one line to stderr and `_exit(1)` rather than continue.
    pub fn is_fatal_configuration(&self) -> bool {
        matches!(
            self,
            ObserverError::MissingEnvVar(_)
                | ObserverError::ManifestIo { .. }
                | ObserverError::ManifestDecode { .. }
                | ObserverError::ReportTooLarge(..)
        )
    }

    /// Whether `self` belongs to the "Fatal ptrace" row: only the tracer
    /// process (never a traced child) should act on this.
    pub fn is_fatal_ptrace(&self) -> bool {
        matches!(self, ObserverError::Ptrace(_, _))
    }
}

/// A three-way outcome used by normalization and policy routines, matching
/// the "no unwinding" design constraint: recoverable cases never reach the
/// pipe, fatal cases go straight to the process terminator.
pub enum Outcome<T> {
    Ok(T),
    Suppress,
    Fatal(ObserverError),
}

impl<T> Outcome<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Outcome::Ok(v) => Some(v),
            Outcome::Suppress => None,
            Outcome::Fatal(e) => {
                crate::bootstrap::die_fatal(&e);
            }
        }
    }
}
