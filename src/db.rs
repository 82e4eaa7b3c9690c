//! Database document and display helpers for field tasks.
//!
//! This module provides the `Database` struct that holds every collection the
//! JSON store persists (organisations, projects, tasks, registry stations, the
//! operator site collection and the notification outbox), along with the
//! formatting utilities the CLI uses to print them.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::fields::*;
use crate::location::{RegistryScope, Station};
use crate::patch::TaskUpdate;
use crate::task::{Location, Organization, Project, Recipient, Task};

/// One entry of the operator/region-level coordinate collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorSite {
    #[serde(flatten)]
    pub scope: RegistryScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bs_number: Option<String>,
    pub location: Location,
    pub task_id: String,
    pub task_code: String,
    pub updated_at: DateTime<Utc>,
}

/// A notification waiting to be picked up by a delivery worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    /// `assigned`, `unassigned` or `status_changed`.
    pub kind: String,
    pub recipients: Vec<Recipient>,
    pub org_id: String,
    pub project_id: String,
    pub task_id: String,
    pub task_code: String,
    pub triggered_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// In-memory image of the JSON database file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    #[serde(default)]
    pub organizations: Vec<Organization>,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub stations: Vec<Station>,
    #[serde(default)]
    pub operator_sites: Vec<OperatorSite>,
    #[serde(default)]
    pub outbox: Vec<OutboxEntry>,
}

impl Database {
    /// Load the database from a JSON file. A missing file is an empty database.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Database::default());
        }
        let mut buf = String::new();
        File::open(path)?.read_to_string(&mut buf)?;
        Ok(serde_json::from_str(&buf)?)
    }

    /// Save database to JSON file using atomic write (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(self)?;
        let mut f = File::create(&tmp)?;
        f.write_all(data.as_bytes())?;
        f.flush()?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    pub fn organization(&self, org_id: &str) -> Option<&Organization> {
        self.organizations.iter().find(|o| o.id == org_id)
    }

    pub fn project(&self, org_id: &str, project_id: &str) -> Option<&Project> {
        self.projects
            .iter()
            .find(|p| p.org_id == org_id && p.id == project_id)
    }

    /// Get a task by internal ID.
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Get a mutable reference to a task by internal ID.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Resolve a task reference (internal ID, or code case-insensitively) within
    /// an organisation and project.
    pub fn resolve_task(&self, org_id: &str, project_id: &str, task_ref: &str) -> Option<&Task> {
        let scoped = || {
            self.tasks
                .iter()
                .filter(move |t| t.org_id == org_id && t.project_id == project_id)
        };
        let task_ref = task_ref.trim();
        scoped()
            .find(|t| t.id == task_ref)
            .or_else(|| scoped().find(|t| t.matches_ref(task_ref)))
    }

    /// Apply an update to one task document and return the updated task.
    ///
    /// The task is rebuilt from its document form with the update applied, so
    /// the stored record is only replaced once the whole update is valid.
    pub fn apply_update(
        &mut self,
        task_id: &str,
        update: &TaskUpdate,
        now: DateTime<Utc>,
    ) -> Result<Task, StoreError> {
        let task = self
            .get_mut(task_id)
            .ok_or_else(|| StoreError::MissingTask(task_id.to_string()))?;
        let mut doc: Map<String, Value> = match serde_json::to_value(&*task)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (field, value) in &update.set {
            doc.insert(field.clone(), value.clone());
        }
        for field in &update.unset {
            doc.remove(field);
        }
        if !update.push_events.is_empty() {
            let events = doc
                .entry("events")
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(list) = events {
                for event in &update.push_events {
                    list.push(serde_json::to_value(event)?);
                }
            }
        }
        doc.insert("updatedAt".to_string(), serde_json::to_value(now)?);

        let updated: Task = serde_json::from_value(Value::Object(doc))?;
        *task = updated.clone();
        Ok(updated)
    }
}

/// Format a task status for display.
pub fn format_status(s: &Status) -> &str {
    s.label()
}

/// Format a priority level for display.
pub fn format_priority(p: Option<Priority>) -> &'static str {
    match p {
        Some(Priority::Urgent) => "Urgent",
        Some(Priority::High) => "High",
        Some(Priority::Medium) => "Medium",
        Some(Priority::Low) => "Low",
        None => "-",
    }
}

/// Format a due date relative to today ("today", "tomorrow", "in 3d", "2d late").
pub fn format_due_relative(due: Option<DateTime<Utc>>) -> String {
    let Some(due) = due else {
        return "-".into();
    };
    let today = Local::now().date_naive();
    let delta = due.with_timezone(&Local).date_naive() - today;
    match delta.num_days() {
        0 => "today".into(),
        1 => "tomorrow".into(),
        n if n > 1 => format!("in {n}d"),
        n => format!("{}d late", -n),
    }
}

/// Print tasks in a formatted table.
pub fn print_table(tasks: &[&Task]) {
    println!(
        "{:<12} {:<9} {:<8} {:<10} {:<10} {:<16} {}",
        "Code", "Status", "Pri", "Due", "Site", "Executor", "Name"
    );
    for t in tasks {
        let executor = t
            .executor_name
            .clone()
            .or_else(|| t.executor_id.clone())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<12} {:<9} {:<8} {:<10} {:<10} {:<16} {}",
            truncate(&t.code, 12),
            truncate(format_status(&t.status), 9),
            format_priority(t.priority),
            format_due_relative(t.due_date),
            truncate(t.bs_number.as_deref().unwrap_or("-"), 10),
            truncate(&executor, 16),
            t.task_name
        );
    }
}

/// Truncate a string to a maximum width, adding ellipsis if needed.
pub fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out = String::new();
        for (i, ch) in s.chars().enumerate() {
            if i + 1 >= width {
                out.push('…');
                break;
            }
            out.push(ch);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{EventAction, TaskEvent};
    use serde_json::json;

    fn db_with_task() -> Database {
        let mut db = Database::default();
        let mut t = Task::new("t1", "bs-7", "o1", "p1", "Battery swap");
        t.executor_id = Some("u1".into());
        t.executor_name = Some("Ivan".into());
        db.tasks.push(t);
        db.tasks.push(Task::new("t2", "BS-7", "o1", "p2", "Other project"));
        db
    }

    #[test]
    fn test_resolve_task_is_scoped_and_case_insensitive() {
        let db = db_with_task();
        assert_eq!(db.resolve_task("o1", "p1", "bs-7").map(|t| t.id.as_str()), Some("t1"));
        assert_eq!(db.resolve_task("o1", "p2", "BS-7").map(|t| t.id.as_str()), Some("t2"));
        assert_eq!(db.resolve_task("o1", "p1", "t1").map(|t| t.id.as_str()), Some("t1"));
        assert!(db.resolve_task("o2", "p1", "t1").is_none());
    }

    #[test]
    fn test_apply_update_sets_unsets_and_pushes() {
        let mut db = db_with_task();
        let mut update = TaskUpdate::default();
        update.set("status", json!("Assigned"));
        update.unset("executorId");
        update.unset("executorName");
        update.push_events.push(TaskEvent {
            action: EventAction::Updated,
            author: "A".into(),
            author_id: "a".into(),
            date: Utc::now(),
            details: None,
        });
        let now = Utc::now();
        let t = db.apply_update("t1", &update, now).unwrap();
        assert_eq!(t.status, Status::Assigned);
        assert_eq!(t.executor_id, None);
        assert_eq!(t.executor_name, None);
        assert_eq!(t.events.len(), 1);
        assert_eq!(t.updated_at, now);
        assert_eq!(db.get("t1").unwrap(), &t);
    }

    #[test]
    fn test_apply_update_rejects_invalid_document_without_touching_task() {
        let mut db = db_with_task();
        let before = db.get("t1").cloned().unwrap();
        let mut update = TaskUpdate::default();
        update.set("bsLocation", json!("not a list"));
        assert!(db.apply_update("t1", &update, Utc::now()).is_err());
        assert_eq!(db.get("t1").unwrap(), &before);
        assert!(matches!(
            db.apply_update("missing", &TaskUpdate::default(), Utc::now()),
            Err(StoreError::MissingTask(_))
        ));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tasks.json");
        let db = db_with_task();
        db.save(&path).unwrap();
        let loaded = Database::load(&path).unwrap();
        assert_eq!(loaded.tasks, db.tasks);
        assert!(Database::load(&dir.path().join("absent.json")).unwrap().tasks.is_empty());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a long site name", 6), "a lon…");
    }
}
