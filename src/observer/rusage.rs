//! Single-shot observer based on the kernel's post-exit accounting.
//!
//! Used where the process tree cannot be sampled while it runs. The peak is
//! the `ru_maxrss` figure recorded when the process was reaped, so reading
//! it requires the caller to have waited on the process first.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::{Observer, ObserverError, Usage};
use crate::process::ObservedProcess;

pub struct RusageObserver {
    process: Arc<dyn ObservedProcess>,
    pid: u32,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl RusageObserver {
    /// Creates an observer for `process`, which must already be running.
    pub fn new(process: Arc<dyn ObservedProcess>) -> Result<Self, ObserverError> {
        let pid = process.pid().ok_or(ObserverError::ProcessNotStarted)?;
        Ok(Self {
            process,
            pid,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Observer for RusageObserver {
    fn start(&self) {
        if !self.started.swap(true, Ordering::SeqCst) {
            debug!("Observing pid {} through post-exit accounting", self.pid);
        }
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Stopped observing pid {}", self.pid);
        }
    }

    async fn max_memory_usage(&self) -> Result<Usage, ObserverError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(ObserverError::NotStarted);
        }
        self.stop();

        let exit = self
            .process
            .exit_info()
            .ok_or(ObserverError::ProcessNotStopped)?;
        Ok(Usage {
            peak: exit.max_rss,
            samples: 1,
            ..Usage::default()
        })
    }

    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }
}
