//! Linux procfs implementation of [`ProcessInfoProvider`].
//!
//! RSS is read from `/proc/<pid>/statm` and children from
//! `/proc/<pid>/task/<tid>/children`. Kernels built without
//! `CONFIG_PROC_CHILDREN` lack the `children` files, in which case the
//! provider falls back to scanning `/proc/<n>/stat` for matching parent PIDs.

use once_cell::sync::Lazy;
use std::fs;
use std::path::PathBuf;
use tracing::trace;

use super::{ProcessInfoError, ProcessInfoProvider};

pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Get the system page size (usually 4096, but can vary).
fn get_page_size() -> u64 {
    #[cfg(unix)]
    {
        // SAFETY: sysconf is safe to call with _SC_PAGESIZE
        // Returns -1 on error - handled by the > 0 check
        unsafe {
            let size = libc::sysconf(libc::_SC_PAGESIZE);
            if size > 0 {
                return size as u64;
            }
        }
    }
    4096
}

/// System page size in bytes (statm reports pages).
pub static PAGE_SIZE: Lazy<u64> = Lazy::new(get_page_size);

/// Reads process information from a procfs mount.
#[derive(Debug, Clone)]
pub struct ProcfsProvider {
    root: PathBuf,
    page_size: u64,
}

impl Default for ProcfsProvider {
    fn default() -> Self {
        Self::new(DEFAULT_PROC_ROOT)
    }
}

impl ProcfsProvider {
    /// Creates a provider reading from `root` instead of `/proc`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: *PAGE_SIZE,
        }
    }

    /// Overrides the page size used to convert statm pages to bytes.
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    fn pid_dir(&self, pid: u32) -> PathBuf {
        self.root.join(pid.to_string())
    }

    fn read(&self, pid: u32, path: PathBuf) -> Result<String, ProcessInfoError> {
        fs::read_to_string(&path).map_err(|e| ProcessInfoError::from_io(pid, path, e))
    }

    /// Collects children from every thread's `children` file.
    /// Returns `None` when no thread exposes such a file.
    fn children_from_task_files(&self, pid: u32) -> Result<Option<Vec<u32>>, ProcessInfoError> {
        let task_dir = self.pid_dir(pid).join("task");
        let entries =
            fs::read_dir(&task_dir).map_err(|e| ProcessInfoError::from_io(pid, task_dir, e))?;

        let mut children = Vec::new();
        let mut found_any = false;
        for entry in entries.flatten() {
            let path = entry.path().join("children");
            match fs::read_to_string(&path) {
                Ok(content) => {
                    found_any = true;
                    children.extend(parse_children(&content));
                }
                // Thread exited, or the kernel has no children files
                Err(e) if super::is_vanished(&e) => continue,
                Err(e) => return Err(ProcessInfoError::from_io(pid, path, e)),
            }
        }

        Ok(found_any.then_some(children))
    }

    /// Slow path: scans every process's stat file for a matching parent PID.
    fn children_from_stat_scan(&self, pid: u32) -> Result<Vec<u32>, ProcessInfoError> {
        if !self.pid_dir(pid).exists() {
            return Err(ProcessInfoError::NotFound { pid });
        }

        let entries = fs::read_dir(&self.root).map_err(|source| ProcessInfoError::Io {
            path: self.root.clone(),
            source,
        })?;

        let mut children = Vec::new();
        for entry in entries.flatten() {
            let candidate = match entry.file_name().to_str().and_then(parse_pid) {
                Some(v) => v,
                None => continue,
            };
            // Processes exiting during the scan are simply not children any more
            let content = match fs::read_to_string(entry.path().join("stat")) {
                Ok(c) => c,
                Err(_) => continue,
            };
            if parse_stat_ppid(&content) == Some(pid) {
                children.push(candidate);
            }
        }
        Ok(children)
    }
}

impl ProcessInfoProvider for ProcfsProvider {
    fn rss(&self, pid: u32) -> Result<u64, ProcessInfoError> {
        let path = self.pid_dir(pid).join("statm");
        let content = self.read(pid, path.clone())?;
        let pages = parse_statm_resident(&content).ok_or_else(|| ProcessInfoError::Parse {
            path,
            reason: "missing resident field".to_string(),
        })?;
        Ok(pages.saturating_mul(self.page_size))
    }

    fn children(&self, pid: u32) -> Result<Vec<u32>, ProcessInfoError> {
        if let Some(children) = self.children_from_task_files(pid)? {
            return Ok(children);
        }
        trace!("No task children files for pid {}, scanning stat files", pid);
        self.children_from_stat_scan(pid)
    }
}

/// Parses a directory name consisting only of ASCII digits.
fn parse_pid(name: &str) -> Option<u32> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// Resident page count: the second field of `/proc/<pid>/statm`.
pub fn parse_statm_resident(content: &str) -> Option<u64> {
    content.split_whitespace().nth(1)?.parse().ok()
}

/// Parent PID from `/proc/<pid>/stat`.
///
/// The comm field may itself contain spaces and parentheses, so fields are
/// counted from the last `)`: state comes first, then the parent PID.
pub fn parse_stat_ppid(content: &str) -> Option<u32> {
    let rest = &content[content.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    fields.next()?;
    fields.next()?.parse().ok()
}

/// Space separated PID list from a `children` file.
pub fn parse_children(content: &str) -> Vec<u32> {
    content
        .split_whitespace()
        .filter_map(|s| s.parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    // -------------------------------------------------------------------------
    // Tests for the parsers
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_statm_resident() {
        assert_eq!(parse_statm_resident("6094 1208 915 226 0 416 0\n"), Some(1208));
        assert_eq!(parse_statm_resident("6094"), None);
        assert_eq!(parse_statm_resident(""), None);
        assert_eq!(parse_statm_resident("6094 abc 915"), None);
    }

    #[test]
    fn test_parse_stat_ppid() {
        let stat = "1234 (test_process) S 1 1234 1234 0 -1 4194304 100 0 0 0 1000 500";
        assert_eq!(parse_stat_ppid(stat), Some(1));

        // comm containing spaces and parentheses
        let stat = "77 (weird ) name) R 55 77 77 0 -1 4194304";
        assert_eq!(parse_stat_ppid(stat), Some(55));

        assert_eq!(parse_stat_ppid("garbage"), None);
        assert_eq!(parse_stat_ppid("1 (x) S"), None);
    }

    #[test]
    fn test_parse_children() {
        assert_eq!(parse_children("101 102 "), vec![101, 102]);
        assert_eq!(parse_children(""), Vec::<u32>::new());
        assert_eq!(parse_children("5 x 6"), vec![5, 6]);
    }

    // -------------------------------------------------------------------------
    // Tests against a fake procfs tree
    // -------------------------------------------------------------------------

    #[test]
    fn test_rss_reads_statm() {
        let dir = tempdir().expect("Failed to create temp dir");
        write(dir.path(), "100/statm", "5000 250 100 10 0 200 0\n");

        let provider = ProcfsProvider::new(dir.path()).with_page_size(4096);
        assert_eq!(provider.rss(100).unwrap(), 250 * 4096);
    }

    #[test]
    fn test_rss_missing_process_is_not_found() {
        let dir = tempdir().expect("Failed to create temp dir");
        let provider = ProcfsProvider::new(dir.path());

        let err = provider.rss(4242).unwrap_err();
        assert!(err.is_not_found(), "unexpected error: {}", err);
    }

    #[test]
    fn test_rss_malformed_statm_is_parse_error() {
        let dir = tempdir().expect("Failed to create temp dir");
        write(dir.path(), "100/statm", "5000\n");

        let provider = ProcfsProvider::new(dir.path());
        let err = provider.rss(100).unwrap_err();
        assert!(matches!(err, ProcessInfoError::Parse { .. }));
    }

    #[test]
    fn test_children_from_task_files() {
        let dir = tempdir().expect("Failed to create temp dir");
        write(dir.path(), "100/task/100/children", "101 102 ");
        write(dir.path(), "100/task/103/children", "104 ");

        let provider = ProcfsProvider::new(dir.path());
        let mut children = provider.children(100).unwrap();
        children.sort_unstable();
        assert_eq!(children, vec![101, 102, 104]);
    }

    #[test]
    fn test_children_falls_back_to_stat_scan() {
        let dir = tempdir().expect("Failed to create temp dir");
        // Thread directory without a children file
        fs::create_dir_all(dir.path().join("100/task/100")).unwrap();
        write(dir.path(), "100/stat", "100 (parent) S 1 100 100 0 -1 0");
        write(dir.path(), "101/stat", "101 (child a) S 100 100 100 0 -1 0");
        write(dir.path(), "102/stat", "102 (other) S 1 102 102 0 -1 0");
        write(dir.path(), "103/stat", "103 (child b) R 100 100 100 0 -1 0");
        fs::create_dir_all(dir.path().join("self")).unwrap();

        let provider = ProcfsProvider::new(dir.path());
        let mut children = provider.children(100).unwrap();
        children.sort_unstable();
        assert_eq!(children, vec![101, 103]);
    }

    #[test]
    fn test_children_missing_process_is_not_found() {
        let dir = tempdir().expect("Failed to create temp dir");
        let provider = ProcfsProvider::new(dir.path());

        let err = provider.children(4242).unwrap_err();
        assert!(err.is_not_found(), "unexpected error: {}", err);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_real_procfs_self() {
        let provider = ProcfsProvider::default();
        let pid = std::process::id();
        assert!(provider.rss(pid).unwrap() > 0);
        assert!(provider.children(pid).is_ok());
    }
}
