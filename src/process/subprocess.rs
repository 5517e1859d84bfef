//! Child process handle with post-exit resource accounting.
//!
//! `Subprocess` wraps a `std::process::Command`, starts it on request and
//! reaps it with `wait4(2)` so that the kernel's peak RSS figure for the
//! child is captured along with its exit status.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::debug;

use crate::size::Size;

/// `ru_maxrss` is reported in bytes on macOS and in kilobytes elsewhere.
#[cfg(target_os = "macos")]
const MAXRSS_UNIT: u64 = 1;
#[cfg(not(target_os = "macos"))]
const MAXRSS_UNIT: u64 = 1024;

/// The view of a process that observers need.
pub trait ObservedProcess: Send + Sync {
    /// OS process ID, or `None` if the process has not been started.
    fn pid(&self) -> Option<u32>;

    /// Exit information, available once the process has been waited on.
    fn exit_info(&self) -> Option<ExitInfo>;
}

/// Exit status and kernel resource accounting of a reaped process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub status: ExitStatus,
    pub max_rss: Size,
}

impl ExitInfo {
    /// Shell-style exit code: signals map to `128 + signo`.
    pub fn code(&self) -> i32 {
        self.status
            .code()
            .or_else(|| self.status.signal().map(|sig| 128 + sig))
            .unwrap_or(1)
    }
}

/// A command that is started once and waited on once.
pub struct Subprocess {
    command: Mutex<Command>,
    child: Mutex<Option<Child>>,
    wait_lock: Mutex<()>,
    pid: OnceLock<u32>,
    exit: OnceLock<ExitInfo>,
}

impl Subprocess {
    pub fn new(command: Command) -> Self {
        Self {
            command: Mutex::new(command),
            child: Mutex::new(None),
            wait_lock: Mutex::new(()),
            pid: OnceLock::new(),
            exit: OnceLock::new(),
        }
    }

    /// Spawns the command. Calling it again returns the PID of the first spawn.
    pub fn start(&self) -> io::Result<u32> {
        let mut command = self.command.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pid) = self.pid.get() {
            return Ok(*pid);
        }

        let child = command.spawn()?;
        let pid = child.id();
        debug!("Started {:?} as pid {}", command.get_program(), pid);

        *self.child.lock().unwrap_or_else(PoisonError::into_inner) = Some(child);
        let _ = self.pid.set(pid);
        Ok(pid)
    }

    /// Blocks until the process exits and reaps it.
    ///
    /// Repeated calls return the recorded exit information.
    pub fn wait(&self) -> io::Result<ExitInfo> {
        let _guard = self.wait_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(info) = self.exit.get() {
            return Ok(*info);
        }

        let pid = *self
            .pid
            .get()
            .ok_or_else(|| io::Error::other("process has not been started"))?;

        let info = wait4(pid)?;
        debug!(
            "Process {} exited with {} (max RSS {} bytes)",
            pid,
            info.status,
            info.max_rss.bytes()
        );

        // Reaped already; dropping the handle only releases its stdio pipes
        self.child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let _ = self.exit.set(info);
        Ok(info)
    }

    /// Waits on Tokio's blocking pool.
    pub async fn wait_async(self: Arc<Self>) -> io::Result<ExitInfo> {
        tokio::task::spawn_blocking(move || self.wait())
            .await
            .map_err(io::Error::other)?
    }
}

impl ObservedProcess for Subprocess {
    fn pid(&self) -> Option<u32> {
        self.pid.get().copied()
    }

    fn exit_info(&self) -> Option<ExitInfo> {
        self.exit.get().copied()
    }
}

fn wait4(pid: u32) -> io::Result<ExitInfo> {
    let pid = libc::pid_t::try_from(pid).map_err(io::Error::other)?;
    let mut status: libc::c_int = 0;
    loop {
        // SAFETY: rusage is plain old data and is fully written by wait4 on success
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        // SAFETY: both out-pointers refer to live stack values
        let ret = unsafe { libc::wait4(pid, &mut status, 0, &mut usage) };
        if ret == pid {
            let max_rss = u64::try_from(usage.ru_maxrss).unwrap_or(0);
            return Ok(ExitInfo {
                status: ExitStatus::from_raw(status),
                max_rss: Size::from_bytes(max_rss.saturating_mul(MAXRSS_UNIT)),
            });
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
