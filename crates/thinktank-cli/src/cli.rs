//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "thinktank")]
#[command(version)]
#[command(about = "Fan a prompt out to several LLM models, optionally synthesizing the results")]
pub struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a prompt against one or more models.
    Run(RunArgs),
    /// List the models known to the registry.
    Models(ModelsArgs),
}

#[derive(clap::Args)]
pub struct RunArgs {
    /// Path to the instructions file (the base prompt).
    #[arg(long)]
    pub instructions: PathBuf,

    /// Comma-separated model aliases to fan out to.
    #[arg(long, value_delimiter = ',')]
    pub models: Vec<String>,

    /// Optional model alias to synthesize the per-model outputs with.
    #[arg(long)]
    pub synthesis_model: Option<String>,

    /// Directory to write model outputs into.
    #[arg(long)]
    pub output_dir: PathBuf,

    /// Per-run deadline, e.g. "5m", "30s", "2h". No deadline if omitted.
    #[arg(long)]
    pub timeout: Option<String>,

    /// Maximum concurrent model calls. 0 means unbounded.
    #[arg(long, default_value_t = 0)]
    pub max_concurrent: usize,

    /// Requests-per-minute ceiling applied to every model unless the
    /// registry overrides it for that model. 0 means unlimited.
    #[arg(long, default_value_t = 0)]
    pub rpm: u32,

    /// Exit 0 even when some (but not all) models failed.
    #[arg(long)]
    pub partial_success_tolerant: bool,

    /// Octal directory permission mask applied to the output directory (unix only).
    #[arg(long)]
    pub dir_perm: Option<String>,

    /// Octal file permission mask applied to each output file (unix only).
    #[arg(long)]
    pub file_perm: Option<String>,

    /// Path to a JSONL audit log. No audit trail is written if omitted.
    #[arg(long)]
    pub audit_log: Option<PathBuf>,

    /// Path to a registry config file, overriding the platform default location.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Additional files or directories to include as context after the instructions.
    pub paths: Vec<PathBuf>,
}

#[derive(clap::Args)]
pub struct ModelsArgs {
    /// Path to a registry config file, overriding the platform default location.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Parse an octal permission string like "0755" or "755" into a mode bitmask.
pub fn parse_octal_mode(value: &str) -> Result<u32, String> {
    let trimmed = value.trim_start_matches("0o").trim_start_matches('0');
    let trimmed = if trimmed.is_empty() { "0" } else { trimmed };
    u32::from_str_radix(trimmed, 8).map_err(|_| format!("'{value}' is not a valid octal permission mask"))
}
