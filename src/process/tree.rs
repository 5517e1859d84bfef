//! Best-effort resident memory accounting for a process tree.
//!
//! The walk is breadth-first over a live process table, so it can miss
//! children spawned mid-walk and will see processes disappear. Vanished
//! processes are skipped silently; every other failure is recorded and the
//! walk carries on with whatever it can still read.

use std::collections::{HashSet, VecDeque};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::{ProcessInfoError, ProcessInfoProvider};

/// A non-fatal failure encountered while taking one memory sample.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error(transparent)]
    Process(#[from] ProcessInfoError),

    #[error("sampling cancelled")]
    Cancelled,

    #[error("sampling task failed: {0}")]
    Task(String),
}

impl SampleError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SampleError::Cancelled)
    }
}

/// Result of one tree walk.
#[derive(Debug, Default)]
pub struct TreeUsage {
    /// Sum of the RSS of every process that could be read.
    pub rss_bytes: u64,
    /// Number of processes whose RSS was read successfully.
    pub visited: usize,
    pub errors: Vec<SampleError>,
}

impl TreeUsage {
    pub fn is_cancelled(&self) -> bool {
        self.errors.iter().any(SampleError::is_cancelled)
    }
}

/// Sums the RSS of `root` and all of its descendants.
///
/// Cancellation is checked before every process is visited; a cancelled walk
/// returns the partial total together with [`SampleError::Cancelled`].
pub fn memory_usage_for_pid_and_children<P>(
    cancel: &CancellationToken,
    provider: &P,
    root: u32,
) -> TreeUsage
where
    P: ProcessInfoProvider + ?Sized,
{
    let mut usage = TreeUsage::default();
    let mut frontier = VecDeque::from([root]);
    let mut seen = HashSet::from([root]);

    while let Some(pid) = frontier.pop_front() {
        if cancel.is_cancelled() {
            usage.errors.push(SampleError::Cancelled);
            break;
        }

        match provider.rss(pid) {
            Ok(rss) => {
                usage.rss_bytes = usage.rss_bytes.saturating_add(rss);
                usage.visited += 1;
            }
            Err(e) if e.is_not_found() => continue,
            Err(e) => usage.errors.push(e.into()),
        }

        match provider.children(pid) {
            Ok(children) => {
                // PID reuse can make a process appear as its own descendant
                frontier.extend(children.into_iter().filter(|child| seen.insert(*child)));
            }
            Err(e) if e.is_not_found() => continue,
            Err(e) => usage.errors.push(e.into()),
        }
    }

    usage
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory process table.
    #[derive(Default)]
    struct FakeProcs {
        rss: HashMap<u32, u64>,
        children: HashMap<u32, Vec<u32>>,
        rss_denied: HashSet<u32>,
        children_gone: HashSet<u32>,
        rss_calls: AtomicUsize,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl FakeProcs {
        fn with(mut self, pid: u32, rss: u64, children: &[u32]) -> Self {
            self.rss.insert(pid, rss);
            self.children.insert(pid, children.to_vec());
            self
        }
    }

    impl ProcessInfoProvider for FakeProcs {
        fn rss(&self, pid: u32) -> Result<u64, ProcessInfoError> {
            let calls = self.rss_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((limit, token)) = &self.cancel_after {
                if calls >= *limit {
                    token.cancel();
                }
            }
            if self.rss_denied.contains(&pid) {
                return Err(ProcessInfoError::Io {
                    path: PathBuf::from(format!("/proc/{}/statm", pid)),
                    source: io::Error::from(io::ErrorKind::PermissionDenied),
                });
            }
            self.rss
                .get(&pid)
                .copied()
                .ok_or(ProcessInfoError::NotFound { pid })
        }

        fn children(&self, pid: u32) -> Result<Vec<u32>, ProcessInfoError> {
            if self.children_gone.contains(&pid) {
                return Err(ProcessInfoError::NotFound { pid });
            }
            self.children
                .get(&pid)
                .cloned()
                .ok_or(ProcessInfoError::NotFound { pid })
        }
    }

    #[test]
    fn test_sums_whole_tree() {
        let procs = FakeProcs::default()
            .with(1, 100, &[2, 3])
            .with(2, 20, &[4])
            .with(3, 30, &[])
            .with(4, 4, &[]);

        let usage = memory_usage_for_pid_and_children(&CancellationToken::new(), &procs, 1);
        assert_eq!(usage.rss_bytes, 154);
        assert_eq!(usage.visited, 4);
        assert!(usage.errors.is_empty());
    }

    #[test]
    fn test_vanished_processes_are_skipped() {
        // 3 is listed as a child but already gone; 2's children lookup races with its exit
        let mut procs = FakeProcs::default().with(1, 100, &[2, 3]).with(2, 20, &[]);
        procs.children_gone.insert(2);

        let usage = memory_usage_for_pid_and_children(&CancellationToken::new(), &procs, 1);
        assert_eq!(usage.rss_bytes, 120);
        assert_eq!(usage.visited, 2);
        assert!(usage.errors.is_empty());
    }

    #[test]
    fn test_missing_root_yields_zero() {
        let procs = FakeProcs::default();
        let usage = memory_usage_for_pid_and_children(&CancellationToken::new(), &procs, 99);
        assert_eq!(usage.rss_bytes, 0);
        assert_eq!(usage.visited, 0);
        assert!(usage.errors.is_empty());
    }

    #[test]
    fn test_other_errors_are_recorded_and_walk_continues() {
        let mut procs = FakeProcs::default()
            .with(1, 100, &[2])
            .with(2, 0, &[3])
            .with(3, 7, &[]);
        procs.rss_denied.insert(2);

        let usage = memory_usage_for_pid_and_children(&CancellationToken::new(), &procs, 1);
        // 2 is unreadable but its child 3 is still reached
        assert_eq!(usage.rss_bytes, 107);
        assert_eq!(usage.visited, 2);
        assert_eq!(usage.errors.len(), 1);
        assert!(matches!(
            usage.errors[0],
            SampleError::Process(ProcessInfoError::Io { .. })
        ));
    }

    #[test]
    fn test_cycles_are_not_revisited() {
        let procs = FakeProcs::default().with(1, 10, &[2]).with(2, 5, &[1, 2]);

        let usage = memory_usage_for_pid_and_children(&CancellationToken::new(), &procs, 1);
        assert_eq!(usage.rss_bytes, 15);
        assert_eq!(usage.visited, 2);
    }

    #[test]
    fn test_cancelled_before_start() {
        let procs = FakeProcs::default().with(1, 10, &[]);
        let token = CancellationToken::new();
        token.cancel();

        let usage = memory_usage_for_pid_and_children(&token, &procs, 1);
        assert_eq!(usage.rss_bytes, 0);
        assert!(usage.is_cancelled());
    }

    #[test]
    fn test_cancelled_mid_walk_returns_partial_total() {
        let token = CancellationToken::new();
        let mut procs = FakeProcs::default()
            .with(1, 100, &[2, 3])
            .with(2, 20, &[])
            .with(3, 30, &[]);
        procs.cancel_after = Some((2, token.clone()));

        let usage = memory_usage_for_pid_and_children(&token, &procs, 1);
        assert_eq!(usage.rss_bytes, 120);
        assert_eq!(usage.visited, 2);
        assert!(usage.is_cancelled());
        assert_eq!(procs.rss_calls.load(Ordering::SeqCst), 2);
    }
}
