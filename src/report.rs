//! Final memory report printed by memcmd.

use chrono::{DateTime, Utc};
use memcmd::{Size, Usage};
use serde::Serialize;
use std::time::Duration;

/// Machine readable summary of one observed run.
#[derive(Debug, Serialize)]
pub struct Report {
    pub command: String,
    pub pid: Option<u32>,
    pub peak_rss_bytes: u64,
    pub samples: u64,
    pub sample_errors: Vec<String>,
    pub suppressed_errors: u64,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl Report {
    pub fn new(
        command: &[String],
        pid: Option<u32>,
        usage: &Usage,
        exit_code: i32,
        duration: Duration,
    ) -> Self {
        Self {
            command: command.join(" "),
            pid,
            peak_rss_bytes: usage.peak.bytes(),
            samples: usage.samples,
            sample_errors: usage.sample_errors.iter().map(|e| e.to_string()).collect(),
            suppressed_errors: usage.suppressed_errors,
            exit_code,
            duration_ms: duration.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }

    /// Human readable lines.
    pub fn to_text(&self) -> String {
        let mut out = format!(
            "memcmd: peak memory usage {} bytes ({:.1} MiB)",
            self.peak_rss_bytes,
            Size::from_bytes(self.peak_rss_bytes).as_mib_f64()
        );
        let error_count = self.sample_errors.len() as u64 + self.suppressed_errors;
        if error_count > 0 {
            out.push_str(&format!(
                "\nmemcmd: best-effort measurement, {} sample errors (first: {})",
                error_count,
                self.sample_errors.first().map(String::as_str).unwrap_or("n/a")
            ));
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
