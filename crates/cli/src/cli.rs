//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// framesched - vsync-driven frame scheduler on a simulated display
#[derive(Parser, Debug)]
#[command(
    name = "framesched",
    author,
    version,
    about = "Vsync-driven frame scheduling core of a display compositor",
    long_about = "Runs the frame scheduler against a simulated display.\n\n\
                  A synthetic hardware vsync source feeds the vsync model, \n\
                  simulated producers queue frames and move their surfaces, \n\
                  and every refresh commits, latches and composes."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "FRAMESCHED_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "FRAMESCHED_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduler on a simulated display
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON); built-in defaults if absent
    #[arg(short, long, env = "FRAMESCHED_CONFIG")]
    pub config: Option<PathBuf>,

    /// Run duration in seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "10", env = "FRAMESCHED_DURATION")]
    pub duration: u64,

    /// Number of simulated producer surfaces
    #[arg(long, default_value = "3", env = "FRAMESCHED_PRODUCERS")]
    pub producers: usize,

    /// Frames per second queued by each producer
    #[arg(long, default_value = "60", env = "FRAMESCHED_PRODUCER_FPS")]
    pub producer_fps: f64,

    /// Hardware vsync jitter in microseconds (uniform, +/-)
    #[arg(long, default_value = "50", env = "FRAMESCHED_JITTER_US")]
    pub jitter_us: u64,

    /// Seed for the simulated hardware and producers
    #[arg(long, default_value = "1", env = "FRAMESCHED_SEED")]
    pub seed: u64,

    /// Override the primary display refresh rate
    #[arg(long, env = "FRAMESCHED_REFRESH_HZ")]
    pub refresh_hz: Option<f64>,

    /// Publish vsync every N+1 refreshes once running (overrides configuration)
    #[arg(long, env = "FRAMESCHED_REFRESH_SKIP")]
    pub refresh_skip: Option<u32>,

    /// Metrics server port (overrides configuration; 0 = disabled)
    #[arg(long, env = "FRAMESCHED_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "framesched.toml", env = "FRAMESCHED_CONFIG")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "framesched.toml", env = "FRAMESCHED_CONFIG")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show vsync model tuning
    #[arg(long)]
    pub vsync: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}
