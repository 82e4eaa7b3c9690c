//! Command implementations for the CLI interface.
//!
//! `patch` goes through the mutation engine; the other subcommands are
//! read-only views over the JSON store.

use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Subcommand;
use clap_complete::{generate, Shell};
use serde_json::Value;
use tracing::warn;

use crate::db::*;
use crate::error::MutationError;
use crate::fields::Priority;
use crate::location::RegistryScope;
use crate::mutation::{MutationOptions, MutationOutcome, TaskMutator};
use crate::normalize::normalize_status;
use crate::patch::TaskPatch;
use crate::store::JsonStore;
use crate::task::{Actor, Task};

#[derive(Subcommand)]
pub enum Commands {
    /// Apply a partial update (JSON object) to a task.
    Patch {
        /// Task ID or code.
        task: String,
        #[arg(long)]
        org: String,
        #[arg(long)]
        project: String,
        /// ID of the user making the change.
        #[arg(long)]
        actor_id: String,
        #[arg(long)]
        actor_name: Option<String>,
        #[arg(long)]
        actor_email: Option<String>,
        /// Patch document inline. Reads stdin when neither --json nor --file is given.
        #[arg(long, conflicts_with = "file")]
        json: Option<String>,
        /// Read the patch document from a file ("-" for stdin).
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// List tasks of a project.
    List {
        #[arg(long)]
        org: String,
        #[arg(long)]
        project: String,
        /// Filter by status (aliases accepted, e.g. "in progress").
        #[arg(long)]
        status: Option<String>,
        /// Filter by priority: urgent | high | medium | low.
        #[arg(long, value_enum)]
        priority: Option<Priority>,
        /// Limit number of rows printed.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show a single task by ID or code.
    Show {
        task: String,
        #[arg(long)]
        org: String,
        #[arg(long)]
        project: String,
    },

    /// Print a task's event log.
    History {
        task: String,
        #[arg(long)]
        org: String,
        #[arg(long)]
        project: String,
    },

    /// List geo-registry stations.
    Stations {
        #[arg(long)]
        operator: Option<String>,
        #[arg(long)]
        region: Option<String>,
    },

    /// Show queued notifications, newest last.
    Outbox {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Read the patch document from an inline string, a file, or stdin.
pub fn read_patch(json: Option<String>, file: Option<PathBuf>) -> Result<TaskPatch> {
    let text = match (json, file) {
        (Some(inline), _) => inline,
        (None, Some(path)) if path.as_os_str() != "-" => fs::read_to_string(&path)
            .with_context(|| format!("Failed to read patch file {}", path.display()))?,
        (None, _) => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read patch from stdin")?;
            buf
        }
    };
    let patch = serde_json::from_str(&text).context("Patch must be a JSON object")?;
    Ok(patch)
}

#[allow(clippy::too_many_arguments)]
pub async fn cmd_patch(
    store: Arc<JsonStore>,
    options: MutationOptions,
    task: String,
    org: String,
    project: String,
    actor_id: String,
    actor_name: Option<String>,
    actor_email: Option<String>,
    patch: TaskPatch,
) -> Result<()> {
    let actor = Actor {
        id: actor_id,
        name: actor_name.unwrap_or_default(),
        email: actor_email,
    };
    let mutator = TaskMutator::with_json_store(store).with_options(options);
    let mut outcome = mutator.apply(&org, &project, &task, &actor, &patch).await?;

    if let Some(pending) = outcome.pending_notifications.take() {
        match pending.await {
            Ok(report) => outcome.notification_report = Some(report),
            Err(e) => warn!(
                task_id = %outcome.task.id,
                error = %e,
                "Notification delivery task did not finish"
            ),
        }
    }
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &MutationOutcome) {
    let task = &outcome.task;
    if outcome.changes.is_empty() {
        println!("No changes to {}.", task.code);
        return;
    }
    println!("Updated {} ({} field(s)):", task.code, outcome.changes.len());
    for (field, change) in outcome.changes.iter() {
        println!("  {:<18} {} -> {}", field, render(&change.from), render(&change.to));
    }
    if outcome.transition.auto_assigned {
        println!("Status moved to {} on assignment.", task.status);
    } else if outcome.transition.auto_unassigned {
        println!("Status moved back to {} after unassignment.", task.status);
    }
    let failures = outcome
        .sync_report
        .failures()
        .chain(outcome.notification_report.iter().flat_map(|r| r.failures()));
    for failure in failures {
        eprintln!(
            "warning: {} failed: {}",
            failure.operation,
            failure.error.as_deref().unwrap_or("unknown error")
        );
    }
}

/// Compact one-line rendering of a stored value.
fn render(value: &Value) -> String {
    match value {
        Value::Null => "-".into(),
        Value::String(s) => s.clone(),
        other => truncate(&other.to_string(), 60),
    }
}

pub async fn cmd_list(
    store: &JsonStore,
    org: String,
    project: String,
    status: Option<String>,
    priority: Option<Priority>,
    limit: Option<usize>,
) -> Result<()> {
    let db = store.snapshot().await;
    let status = status.as_deref().and_then(normalize_status);
    let mut tasks: Vec<&Task> = db
        .tasks
        .iter()
        .filter(|t| t.org_id == org && t.project_id == project)
        .filter(|t| status.as_ref().map_or(true, |s| &t.status == s))
        .filter(|t| priority.map_or(true, |p| t.priority == Some(p)))
        .collect();
    tasks.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    if let Some(n) = limit {
        tasks.truncate(n);
    }
    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    print_table(&tasks);
    Ok(())
}

fn find_task(
    db: &Database,
    org: &str,
    project: &str,
    task_ref: &str,
) -> Result<Task, MutationError> {
    db.resolve_task(org, project, task_ref)
        .cloned()
        .ok_or_else(|| MutationError::TaskNotFound {
            project_id: project.to_string(),
            task_ref: task_ref.to_string(),
        })
}

pub async fn cmd_show(store: &JsonStore, task: String, org: String, project: String) -> Result<()> {
    let db = store.snapshot().await;
    let t = find_task(&db, &org, &project, &task)?;
    let or_dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".into());
    let money = |v: Option<f64>| v.map(|n| format!("{n:.2}")).unwrap_or_else(|| "-".into());

    println!("ID:           {}", t.id);
    println!("Code:         {}", t.code);
    println!("Name:         {}", t.task_name);
    println!("Status:       {}", format_status(&t.status));
    println!("Priority:     {}", format_priority(t.priority));
    println!(
        "Due:          {}",
        match t.due_date {
            Some(d) => format!(
                "{} ({})",
                d.with_timezone(&Local).date_naive(),
                format_due_relative(Some(d))
            ),
            None => "-".into(),
        }
    );
    println!("Initiator:    {} <{}>", or_dash(&t.initiator_name), or_dash(&t.initiator_email));
    println!(
        "Executor:     {}",
        match &t.executor_id {
            Some(id) => format!(
                "{} [{}] <{}>",
                or_dash(&t.executor_name),
                id,
                or_dash(&t.executor_email)
            ),
            None => "-".into(),
        }
    );
    println!("Site:         {}", or_dash(&t.bs_number));
    println!("Address:      {}", or_dash(&t.bs_address));
    match (t.bs_latitude, t.bs_longitude) {
        (Some(lat), Some(lon)) => println!("Map point:    {lat} {lon}"),
        _ => println!("Map point:    -"),
    }
    for site in &t.bs_location {
        println!("  - {:<10} {:<22} {}", site.name, site.coordinates, site.address);
    }
    println!("Total cost:   {}", money(t.total_cost));
    println!("Contractor:   {}", money(t.contractor_payment));
    if !t.work_items.is_empty() {
        println!("Work items:");
        for item in &t.work_items {
            println!("  - {} {} {}", item.work_type, item.quantity, item.unit);
        }
    }
    println!(
        "Related:      {}",
        if t.related_tasks.is_empty() { "-".into() } else { t.related_tasks.join(",") }
    );
    println!("Created UTC:  {}", t.created_at.to_rfc3339());
    println!("Updated UTC:  {}", t.updated_at.to_rfc3339());
    println!("Description:\n{}\n", or_dash(&t.description));
    Ok(())
}

pub async fn cmd_history(
    store: &JsonStore,
    task: String,
    org: String,
    project: String,
) -> Result<()> {
    let db = store.snapshot().await;
    let t = find_task(&db, &org, &project, &task)?;
    if t.events.is_empty() {
        println!("No history for {}.", t.code);
        return Ok(());
    }
    for event in &t.events {
        let action = serde_json::to_value(event.action)?;
        println!(
            "{}  {:<24} {} ({})",
            event.date.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            render(&action),
            event.author,
            event.author_id
        );
        if let Some(Value::Object(details)) = &event.details {
            for (key, value) in details {
                match (value.get("from"), value.get("to")) {
                    (Some(from), Some(to)) => {
                        println!("    {:<18} {} -> {}", key, render(from), render(to))
                    }
                    _ => println!("    {:<18} {}", key, render(value)),
                }
            }
        }
    }
    Ok(())
}

pub async fn cmd_stations(
    store: &JsonStore,
    operator: Option<String>,
    region: Option<String>,
) -> Result<()> {
    let db = store.snapshot().await;
    let wanted = |filter: &Option<String>, actual: &Option<String>| {
        filter
            .as_deref()
            .map_or(true, |f| actual.as_deref() == Some(f.trim().to_lowercase().as_str()))
    };
    let stations: Vec<_> = db
        .stations
        .iter()
        .filter(|s| wanted(&operator, &s.scope.operator) && wanted(&region, &s.scope.region))
        .collect();
    if stations.is_empty() {
        println!("No stations.");
        return Ok(());
    }
    println!(
        "{:<10} {:<8} {:<12} {:<22} {}",
        "Site", "Operator", "Region", "Coordinates", "Address"
    );
    for s in stations {
        let RegistryScope { operator, region } = &s.scope;
        println!(
            "{:<10} {:<8} {:<12} {:<22} {}",
            truncate(&s.bs_number, 10),
            operator.as_deref().unwrap_or("-"),
            truncate(region.as_deref().unwrap_or("-"), 12),
            truncate(&s.coordinates, 22),
            s.address
        );
    }
    Ok(())
}

pub async fn cmd_outbox(store: &JsonStore, limit: Option<usize>) -> Result<()> {
    let db = store.snapshot().await;
    let skip = limit.map_or(0, |n| db.outbox.len().saturating_sub(n));
    if db.outbox.is_empty() {
        println!("Outbox is empty.");
        return Ok(());
    }
    for entry in db.outbox.iter().skip(skip) {
        let to: Vec<&str> = entry.recipients.iter().map(|r| r.key()).collect();
        println!(
            "{}  {:<15} {:<12} to [{}] by {}",
            entry.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            entry.kind,
            entry.task_code,
            to.join(", "),
            entry.triggered_by
        );
    }
    Ok(())
}

pub fn cmd_completions(shell: Shell) {
    use clap::CommandFactory;
    use crate::cli::Cli;

    let mut app = Cli::command();
    let app_name = app.get_name().to_string();
    generate(shell, &mut app, app_name, &mut std::io::stdout());
}
