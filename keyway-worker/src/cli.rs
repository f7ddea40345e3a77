use clap::Parser;

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "keyway-worker", version, about = "Run the Keyway background job queue")]
pub struct CliArgs {
    /// Path to configuration file (.toml, .yaml/.yml or .json).
    #[arg(short = 'c', long = "config", env = "KEYWAY_CONFIG_PATH")]
    pub config_path: Option<String>,

    /// Job type to register a processor for. Repeatable; extends the configured list.
    #[arg(short = 't', long = "job-type")]
    pub job_types: Vec<String>,

    /// Number of demo jobs to enqueue at startup, spread across job types.
    #[arg(long, default_value_t = 0)]
    pub submit: usize,

    /// Seconds between queue statistics log lines. Zero disables them.
    #[arg(long, default_value_t = 30)]
    pub stats_interval_secs: u64,
}
