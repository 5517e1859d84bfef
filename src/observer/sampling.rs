//! Continuous sampling observer.
//!
//! Two background tasks cooperate: a ticker fires every sampling interval
//! and pushes into a channel of capacity one, and a sampler drains that
//! channel and walks the process tree. A tick that arrives while a sample is
//! still pending is dropped, so slow samples never build up a backlog.
//!
//! Shutdown uses two tokens. `cancel` is a child of the caller's token and
//! interrupts the tasks and any in-flight tree walk. `stopped` is set only by
//! [`SamplingObserver::stop`]; a walk that reports cancellation while
//! `stopped` is set raced with our own shutdown, so its errors are dropped
//! and its partial total is kept. A walk cancelled from upstream keeps its
//! errors too.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use super::{Observer, ObserverError, Usage};
use crate::process::{
    memory_usage_for_pid_and_children, ObservedProcess, ProcessInfoProvider, SampleError,
    TreeUsage,
};
use crate::size::Size;

/// Upper bound on retained sample errors; further ones are only counted.
pub const MAX_RECORDED_ERRORS: usize = 64;

/// Longest tick period; keeps deadline arithmetic away from overflow.
const MAX_TICK_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Default)]
struct SampleState {
    max_rss: u64,
    samples: u64,
    errors: Vec<SampleError>,
    suppressed_errors: u64,
}

impl SampleState {
    fn record(&mut self, usage: TreeUsage) {
        self.max_rss = self.max_rss.max(usage.rss_bytes);
        self.samples += 1;
        for err in usage.errors {
            if self.errors.len() < MAX_RECORDED_ERRORS {
                self.errors.push(err);
            } else {
                self.suppressed_errors += 1;
            }
        }
    }
}

/// State shared with the sampler task.
#[derive(Clone)]
struct Sampler {
    pid: u32,
    provider: Arc<dyn ProcessInfoProvider>,
    cancel: CancellationToken,
    stopped: CancellationToken,
    state: Arc<Mutex<SampleState>>,
}

impl Sampler {
    #[instrument(level = "trace", skip(self), fields(pid = self.pid))]
    async fn sample(&self) {
        let cancel = self.cancel.clone();
        let provider = Arc::clone(&self.provider);
        let pid = self.pid;

        let mut usage = match tokio::task::spawn_blocking(move || {
            memory_usage_for_pid_and_children(&cancel, provider.as_ref(), pid)
        })
        .await
        {
            Ok(usage) => usage,
            Err(e) => {
                warn!("Memory sample for pid {} failed: {}", pid, e);
                TreeUsage {
                    errors: vec![SampleError::Task(e.to_string())],
                    ..TreeUsage::default()
                }
            }
        };

        if usage.is_cancelled() && self.stopped.is_cancelled() {
            // Errors from our own shutdown are noise; the partial total still counts
            trace!("Sample interrupted by stop, keeping {} bytes", usage.rss_bytes);
            usage.errors.clear();
        }

        trace!(
            "Sampled {} processes: {} bytes, {} errors",
            usage.visited,
            usage.rss_bytes,
            usage.errors.len()
        );
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(usage);
    }

    async fn run(self, mut ticks: mpsc::Receiver<()>, finished: CancellationToken) {
        // Fires even if a sample panics, so readers never wait forever
        let _finished = finished.drop_guard();
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                tick = ticks.recv() => match tick {
                    Some(()) => self.sample().await,
                    None => break,
                },
            }
        }
        debug!("Sampler for pid {} finished", self.pid);
    }
}

async fn run_ticker(cancel: CancellationToken, ticks: mpsc::Sender<()>, period: Duration) {
    let period = period.min(MAX_TICK_PERIOD);
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                // A full channel means a sample is already pending
                if let Err(mpsc::error::TrySendError::Closed(())) = ticks.try_send(()) {
                    break;
                }
            }
        }
    }
}

/// Observer that samples the RSS of a process tree at a fixed interval.
pub struct SamplingObserver {
    sampler: Sampler,
    interval: Duration,
    runtime: Handle,
    finished: CancellationToken,
    started: AtomicBool,
    stopping: AtomicBool,
}

impl SamplingObserver {
    /// Creates an observer for `process`, which must already be running.
    ///
    /// `parent` cancels sampling from upstream. Must be called from within a
    /// Tokio runtime; the runtime is captured for the background tasks.
    pub fn new(
        parent: &CancellationToken,
        process: Arc<dyn ObservedProcess>,
        provider: Arc<dyn ProcessInfoProvider>,
        interval: Duration,
    ) -> Result<Self, ObserverError> {
        if interval.is_zero() {
            return Err(ObserverError::InvalidSamplingInterval);
        }
        let pid = process.pid().ok_or(ObserverError::ProcessNotStarted)?;
        let runtime = Handle::try_current().map_err(|_| ObserverError::NoRuntime)?;

        Ok(Self {
            sampler: Sampler {
                pid,
                provider,
                cancel: parent.child_token(),
                stopped: CancellationToken::new(),
                state: Arc::new(Mutex::new(SampleState::default())),
            },
            interval,
            runtime,
            finished: CancellationToken::new(),
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
        })
    }

    /// True once the sampler task has exited.
    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }
}

#[async_trait]
impl Observer for SamplingObserver {
    fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(
            "Starting memory sampling of pid {} every {:?}",
            self.sampler.pid, self.interval
        );

        let (tx, rx) = mpsc::channel(1);
        // Initial sample before the first interval elapses
        let _ = tx.try_send(());

        self.runtime
            .spawn(run_ticker(self.sampler.cancel.clone(), tx, self.interval));
        self.runtime
            .spawn(self.sampler.clone().run(rx, self.finished.clone()));
    }

    fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Stopping memory sampling of pid {}", self.sampler.pid);
        // Mark the stop before cancelling so in-flight samples can tell the two apart
        self.sampler.stopped.cancel();
        self.sampler.cancel.cancel();
    }

    /// Sample errors are handed out by the first call only.
    async fn max_memory_usage(&self) -> Result<Usage, ObserverError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(ObserverError::NotStarted);
        }
        self.stop();
        self.finished.cancelled().await;

        let mut state = self
            .sampler
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(Usage {
            peak: Size::from_bytes(state.max_rss),
            samples: state.samples,
            sample_errors: std::mem::take(&mut state.errors),
            suppressed_errors: std::mem::take(&mut state.suppressed_errors),
        })
    }

    fn pid(&self) -> Option<u32> {
        Some(self.sampler.pid)
    }
}

impl Drop for SamplingObserver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_keeps_maximum() {
        let mut state = SampleState::default();
        for rss in [10, 50, 20] {
            state.record(TreeUsage {
                rss_bytes: rss,
                visited: 1,
                errors: Vec::new(),
            });
        }
        assert_eq!(state.max_rss, 50);
        assert_eq!(state.samples, 3);
    }

    #[test]
    fn test_record_caps_errors() {
        let mut state = SampleState::default();
        for _ in 0..MAX_RECORDED_ERRORS + 5 {
            state.record(TreeUsage {
                rss_bytes: 1,
                visited: 1,
                errors: vec![SampleError::Cancelled],
            });
        }
        assert_eq!(state.errors.len(), MAX_RECORDED_ERRORS);
        assert_eq!(state.suppressed_errors, 5);
    }
}
