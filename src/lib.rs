//! memcmd - peak memory observation for a process and its descendants.
//!
//! This library measures the highest resident memory footprint reached by a
//! child process together with every process it spawns, while the child
//! runs. It never touches the child's execution or exit status.
//!
//! # Features
//!
//! - **Process tree sampling**: Best-effort breadth-first RSS walk on Linux
//! - **Post-exit accounting**: Kernel `ru_maxrss` where sampling is unavailable
//! - **Safe shutdown**: Idempotent start/stop with prompt cancellation
//! - **Byte sizes**: Overflow-checked parsing of values such as `"3 MiB"`
//!
//! # Usage
//!
//! ```no_run
//! use std::process::Command;
//! use std::sync::Arc;
//! use memcmd::{new_observer, ObserverConfig, Subprocess};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let process = Arc::new(Subprocess::new(Command::new("make")));
//! process.start()?;
//!
//! let config = ObserverConfig::from_env()?;
//! let observer = new_observer(&config, &CancellationToken::new(), process.clone())?;
//! observer.start();
//!
//! let exit = process.clone().wait_async().await?;
//! let usage = observer.max_memory_usage().await?;
//! println!("exit {} peak {} bytes", exit.code(), usage.peak.bytes());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod observer;
pub mod process;
pub mod size;

// Re-export main types for convenience
pub use config::{ConfigError, ObserverConfig};
pub use observer::{
    new_observer, NoOpObserver, Observer, ObserverError, RusageObserver, SamplingObserver, Usage,
};
pub use process::{
    memory_usage_for_pid_and_children, ExitInfo, ObservedProcess, ProcessInfoError,
    ProcessInfoProvider, ProcfsProvider, SampleError, Subprocess, TreeUsage,
};
pub use size::{Size, SizeError};
