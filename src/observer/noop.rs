//! Observer used when memory observation is disabled.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{Observer, ObserverError, Usage};

/// Always reports zero bytes once started.
#[derive(Debug, Default)]
pub struct NoOpObserver {
    started: AtomicBool,
    stopped: AtomicBool,
}

impl NoOpObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Observer for NoOpObserver {
    fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    async fn max_memory_usage(&self) -> Result<Usage, ObserverError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(ObserverError::NotStarted);
        }
        self.stop();
        Ok(Usage::zero())
    }

    fn pid(&self) -> Option<u32> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_not_started() {
        let observer = NoOpObserver::new();
        observer.stop();
        assert_eq!(
            observer.max_memory_usage().await.unwrap_err(),
            ObserverError::NotStarted
        );
    }

    #[tokio::test]
    async fn test_reports_zero() {
        let observer = NoOpObserver::new();
        observer.start();
        observer.start();

        let usage = observer.max_memory_usage().await.unwrap();
        assert_eq!(usage.peak.bytes(), 0);
        assert!(usage.is_clean());

        observer.stop();
        observer.stop();
        assert_eq!(observer.max_memory_usage().await.unwrap().peak.bytes(), 0);
    }
}
