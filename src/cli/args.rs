use crate::services::LogFormat;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "multiproc")]
#[command(about = "Producer/consumer worker pool demos")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Explicit log level (TRACE, DEBUG, INFO, WARNING, ERROR, CRITICAL)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log line format
    #[arg(long, value_enum, global = true, default_value = "shortest")]
    pub log_format: LogFormat,

    /// Print the run summary as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Square numbers with a single-stage worker pool
    FnPool {
        /// Number of worker threads (0 runs in the foreground, default: CPU count)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Number of tasks to submit
        #[arg(short = 'n', long, default_value = "20")]
        count: usize,

        /// Discard the outputs instead of collecting them
        #[arg(long)]
        no_output: bool,

        /// Log failed tasks and keep going
        #[arg(long)]
        ignore_errors: bool,

        /// Make every N-th task fail
        #[arg(long)]
        fail_every: Option<usize>,

        /// Simulated work per task in milliseconds
        #[arg(long, default_value = "50")]
        delay_ms: u64,

        /// Rate smoothing for the progress bar (0 = average since start, 1 = latest rate)
        #[arg(long, default_value = "0.0")]
        smoothing: f64,
    },

    /// Square numbers in producers and sum them in consumers
    ProducerConsumer {
        /// Number of producer threads (0 together with --consumers 0 runs in the foreground)
        #[arg(short, long, default_value = "3")]
        producers: usize,

        /// Number of consumer threads
        #[arg(short = 'm', long, default_value = "2")]
        consumers: usize,

        /// Number of tasks to submit
        #[arg(short = 'n', long, default_value = "20")]
        count: usize,

        /// Simulated work per task in milliseconds
        #[arg(long, default_value = "50")]
        delay_ms: u64,
    },
}
