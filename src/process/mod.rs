//! Process introspection for memory observation.
//!
//! This module provides:
//! - `ProcessInfoProvider`: the capability to read RSS and children of a PID
//! - `procfs`: the Linux implementation reading `/proc`
//! - `tree`: best-effort breadth-first RSS walk over a process tree
//! - `subprocess`: a child process handle that records resource usage on exit

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub mod procfs;
pub mod subprocess;
pub mod tree;

pub use procfs::ProcfsProvider;
pub use subprocess::{ExitInfo, ObservedProcess, Subprocess};
pub use tree::{memory_usage_for_pid_and_children, SampleError, TreeUsage};

/// Source of per-process memory and parentage information.
///
/// Implementations are read-only gateways to the operating system. Both
/// operations are racy with respect to the live process table: a process may
/// exit between two calls, and children created concurrently may be missed.
pub trait ProcessInfoProvider: Send + Sync {
    /// Resident set size of `pid` in bytes.
    fn rss(&self, pid: u32) -> Result<u64, ProcessInfoError>;

    /// Immediate children of `pid` at the time of the call.
    fn children(&self, pid: u32) -> Result<Vec<u32>, ProcessInfoError>;
}

/// Errors reported by a [`ProcessInfoProvider`].
#[derive(Debug, Error)]
pub enum ProcessInfoError {
    #[error("process {pid} not found")]
    NotFound { pid: u32 },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
}

impl ProcessInfoError {
    /// True when the process vanished before or during the read.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProcessInfoError::NotFound { .. })
    }

    /// Classifies an I/O error for `pid`, mapping a vanished process to `NotFound`.
    pub fn from_io(pid: u32, path: PathBuf, err: io::Error) -> Self {
        if is_vanished(&err) {
            ProcessInfoError::NotFound { pid }
        } else {
            ProcessInfoError::Io { path, source: err }
        }
    }
}

/// Procfs reports a process that exited mid-read as ENOENT or ESRCH.
fn is_vanished(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound || err.raw_os_error() == Some(libc::ESRCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_classification() {
        let err = ProcessInfoError::from_io(
            42,
            PathBuf::from("/proc/42/statm"),
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert!(err.is_not_found());

        let err = ProcessInfoError::from_io(
            42,
            PathBuf::from("/proc/42/statm"),
            io::Error::from_raw_os_error(libc::ESRCH),
        );
        assert!(err.is_not_found());

        let err = ProcessInfoError::from_io(
            42,
            PathBuf::from("/proc/42/statm"),
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("/proc/42/statm"));
    }
}
