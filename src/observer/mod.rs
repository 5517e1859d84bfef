//! Peak memory observers for a running process and its descendants.
//!
//! Every observer follows the same lifecycle: construct it for an already
//! started process, call [`Observer::start`], wait for the process through
//! your own handle, then read [`Observer::max_memory_usage`]. Reading the
//! result stops the observer; `start` and `stop` may be called any number of
//! times.
//!
//! - [`SamplingObserver`] polls the process tree in the background (Linux).
//! - [`RusageObserver`] reads the kernel's peak RSS once after exit.
//! - [`NoOpObserver`] reports zero and is used when observation is disabled.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ObserverConfig;
use crate::process::{ObservedProcess, SampleError};
use crate::size::Size;

pub mod noop;
pub mod rusage;
pub mod sampling;

pub use noop::NoOpObserver;
pub use rusage::RusageObserver;
pub use sampling::SamplingObserver;

/// Peak memory usage of an observed process tree.
#[derive(Debug, Default)]
pub struct Usage {
    /// Highest resident memory seen.
    pub peak: Size,
    /// Number of samples that contributed to `peak`.
    pub samples: u64,
    /// Non-fatal failures from individual samples. A non-empty list means
    /// `peak` is a best-effort figure that may be slightly low.
    pub sample_errors: Vec<SampleError>,
    /// Sample errors beyond the retained ones, counted but not kept.
    pub suppressed_errors: u64,
}

impl Usage {
    pub fn zero() -> Self {
        Self::default()
    }

    /// True when every sample was read without errors.
    pub fn is_clean(&self) -> bool {
        self.sample_errors.is_empty() && self.suppressed_errors == 0
    }
}

/// Construction and usage errors of an observer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObserverError {
    #[error("sampling interval must be positive")]
    InvalidSamplingInterval,

    #[error("process has not been started")]
    ProcessNotStarted,

    #[error("no Tokio runtime available to run the sampler")]
    NoRuntime,

    #[error("observer not started")]
    NotStarted,

    #[error("process has not stopped yet")]
    ProcessNotStopped,
}

/// Common interface of all observers.
#[async_trait]
pub trait Observer: Send + Sync {
    /// Begins observation. Repeated calls have no further effect.
    fn start(&self);

    /// Ends observation. Safe to call repeatedly and before `start`.
    fn stop(&self);

    /// Stops the observer and returns the peak memory usage.
    ///
    /// Fails with [`ObserverError::NotStarted`] if `start` was never called.
    async fn max_memory_usage(&self) -> Result<Usage, ObserverError>;

    /// PID of the observed process, if any.
    fn pid(&self) -> Option<u32>;
}

/// Builds the observer best suited to the host platform.
///
/// A disabled configuration yields a [`NoOpObserver`]. On Linux the process
/// tree is sampled continuously; elsewhere the kernel's post-exit accounting
/// is used.
pub fn new_observer(
    config: &ObserverConfig,
    cancel: &CancellationToken,
    process: Arc<dyn ObservedProcess>,
) -> Result<Box<dyn Observer>, ObserverError> {
    if !config.enabled {
        debug!("Memory observation disabled, using no-op observer");
        return Ok(Box::new(NoOpObserver::new()));
    }

    #[cfg(target_os = "linux")]
    {
        let provider = Arc::new(crate::process::ProcfsProvider::default());
        let observer =
            SamplingObserver::new(cancel, process, provider, config.sampling_interval)?;
        Ok(Box::new(observer))
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = cancel;
        Ok(Box::new(RusageObserver::new(process)?))
    }
}
