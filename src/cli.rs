//! CLI arguments for memcmd.
//!
//! This module defines the command-line interface using the clap library and
//! merges it with the configuration file and environment.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use memcmd::config::{load_config, parse_sampling_interval, validate_config};
use memcmd::ObserverConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Log level options for CLI parsing
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Format of the final memory report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "memcmd",
    about = "Run a command and report the peak memory used by it and its children",
    long_about = "Run a command and report the peak memory used by it and its children.\n\n\
                  The command runs unchanged with inherited stdio. While it runs, memcmd samples \
                  the resident memory of the whole process tree and prints the peak to stderr \
                  once the command exits. memcmd exits with the command's exit code.",
    version
)]
pub struct Args {
    /// Sampling interval, e.g. 1ms, 500us, 2s
    #[arg(long, value_parser = parse_interval_arg)]
    pub sampling_interval: Option<Duration>,

    /// Run the command without observing its memory
    #[arg(long)]
    pub no_observe: bool,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print the effective config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Log level
    #[arg(long, value_enum, default_value = "warn")]
    pub log_level: LogLevel,

    /// Report format
    #[arg(long, value_enum, default_value = "text")]
    pub format: ReportFormat,

    /// Command to run, followed by its arguments
    #[arg(
        required_unless_present = "show_config",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
}

fn parse_interval_arg(value: &str) -> Result<Duration, String> {
    parse_sampling_interval(value).map_err(|e| e.to_string())
}

/// Resolves configuration from CLI args, environment, config file and defaults.
/// This enforces precedence: CLI > environment > config file > default.
pub fn resolve_config(args: &Args) -> anyhow::Result<ObserverConfig> {
    let mut config = if args.no_config {
        ObserverConfig::default()
    } else {
        load_config(args.config.as_deref())?
    };

    config
        .apply_env()
        .context("invalid sampling interval in environment")?;

    if let Some(interval) = args.sampling_interval {
        config.sampling_interval = interval;
    }
    if args.no_observe {
        config.enabled = false;
    }

    validate_config(&config)?;
    Ok(config)
}

/// Renders configuration in the requested format
pub fn render_config(config: &ObserverConfig, format: ConfigFormat) -> anyhow::Result<String> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };
    Ok(output)
}
