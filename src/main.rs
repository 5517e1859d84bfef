//! memcmd - run a command and report its peak memory usage.
//!
//! The command runs with inherited stdio while an observer tracks the
//! resident memory of its whole process tree. The peak is printed to stderr
//! once the command exits, and memcmd exits with the command's exit code.

use anyhow::Context;
use clap::Parser;
use std::process::Command;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};

use memcmd::{new_observer, ObservedProcess, Subprocess};

mod cli;
mod report;

use cli::{render_config, resolve_config, Args, LogLevel, ReportFormat};
use report::Report;

/// Setup logging based on CLI args. Logs go to stderr so the child's
/// stdout stays untouched.
fn setup_logging(args: &Args) -> anyhow::Result<()> {
    let log_level = match args.log_level {
        LogLevel::Off => return Ok(()),
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    info!("Logging initialized with level: {:?}", args.log_level);
    Ok(())
}

/// Logs interrupts without acting on them; the terminal delivers the signal
/// to the child, whose exit ends the run.
async fn log_interrupts(cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            res = tokio::signal::ctrl_c() => match res {
                Ok(()) => info!("Interrupt received, waiting for command to exit"),
                Err(e) => {
                    warn!("Unable to listen for interrupts: {}", e);
                    break;
                }
            },
        }
    }
}

async fn run(args: Args) -> anyhow::Result<i32> {
    let config = resolve_config(&args)?;

    if args.show_config {
        println!("{}", render_config(&config, args.config_format)?);
        return Ok(0);
    }

    let (program, program_args) = args
        .command
        .split_first()
        .context("no command given")?;
    let mut command = Command::new(program);
    command.args(program_args);

    let process = Arc::new(Subprocess::new(command));
    let started_at = Instant::now();
    let pid = process
        .start()
        .with_context(|| format!("failed to start {:?}", program))?;
    debug!("Started {:?} as pid {}", program, pid);

    let cancel = CancellationToken::new();
    let observed: Arc<dyn ObservedProcess> = process.clone();
    let observer = new_observer(&config, &cancel, observed)?;
    observer.start();

    let interrupts = tokio::spawn(log_interrupts(cancel.clone()));

    let exit = process
        .clone()
        .wait_async()
        .await
        .with_context(|| format!("failed to wait for pid {}", pid))?;
    let duration = started_at.elapsed();

    let usage = observer.max_memory_usage().await?;
    cancel.cancel();
    let _ = interrupts.await;

    for err in &usage.sample_errors {
        debug!("Sample error: {}", err);
    }

    let report = Report::new(&args.command, observer.pid(), &usage, exit.code(), duration);
    match args.format {
        ReportFormat::Text => eprintln!("{}", report.to_text()),
        ReportFormat::Json => eprintln!("{}", report.to_json()?),
    }

    Ok(exit.code())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = setup_logging(&args) {
        eprintln!("memcmd: {:#}", e);
    }

    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("memcmd: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}
