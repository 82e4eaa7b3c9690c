use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Commands;

/// File-backed field task CLI.
/// Storage defaults to ~/.fieldtask/tasks.json, overridable via config or --db.
#[derive(Parser)]
#[command(name = "ft", version, about = "Field work order task CLI")]
pub struct Cli {
    /// Path to the JSON database file.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Settings file (TOML). Defaults to ./fieldtask.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}
