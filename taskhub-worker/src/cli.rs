use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "taskhub-worker",
    version,
    about = "Run and inspect a TaskHub background job queue"
)]
pub struct Cli {
    /// Path to configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, env = "TASKHUB_CONFIG_PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the dispatcher and process jobs until interrupted
    Run,
    /// Persist a job so the next `run` picks it up
    Submit {
        /// Job type, used to select the handler
        #[arg(long = "type", value_name = "TYPE")]
        job_type: String,

        /// JSON payload handed to the handler
        #[arg(long, default_value = "{}")]
        payload: String,

        /// Higher values run first
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i32,

        /// Override the configured retry ceiling for this job
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// Print counts of persisted jobs by status
    Stats,
    /// List jobs that exhausted their retries
    DeadLetters,
}
