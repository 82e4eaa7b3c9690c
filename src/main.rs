use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;

use fieldtask::cli::Cli;
use fieldtask::cmd::*;
use fieldtask::config::Settings;
use fieldtask::store::JsonStore;
use fieldtask::telemetry::TelemetryBuilder;
use fieldtask::MutationError;

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            let not_found = e
                .downcast_ref::<MutationError>()
                .is_some_and(MutationError::is_not_found);
            ExitCode::from(if not_found { 2 } else { 1 })
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Completions need neither settings nor a database.
    if let Commands::Completions { shell } = cli.command {
        cmd_completions(shell);
        return Ok(());
    }

    let settings = Settings::new(cli.config.as_deref()).context("Failed to load settings")?;
    TelemetryBuilder::new()
        .with_log_level(settings.telemetry.log_level.clone())
        .with_json(settings.telemetry.json)
        .init()?;

    let db_path = cli.db.unwrap_or_else(|| settings.store.path.clone());
    debug!(path = %db_path.display(), "Opening task database");
    let store = Arc::new(
        JsonStore::open(&db_path)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?,
    );

    match cli.command {
        Commands::Patch { task, org, project, actor_id, actor_name, actor_email, json, file } => {
            let patch = read_patch(json, file)?;
            let options = settings.mutation_options();
            cmd_patch(
                store, options, task, org, project, actor_id, actor_name, actor_email, patch,
            )
            .await
        }

        Commands::List { org, project, status, priority, limit } => {
            cmd_list(&store, org, project, status, priority, limit).await
        }

        Commands::Show { task, org, project } => cmd_show(&store, task, org, project).await,

        Commands::History { task, org, project } => cmd_history(&store, task, org, project).await,

        Commands::Stations { operator, region } => cmd_stations(&store, operator, region).await,

        Commands::Outbox { limit } => cmd_outbox(&store, limit).await,

        Commands::Completions { .. } => unreachable!("completions handled above"),
    }
}
