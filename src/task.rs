//! Task data structure and related functionality.
//!
//! This module defines the `Task` aggregate (a field work order against one or more
//! base-station sites), the records embedded in it, and the organisation/project
//! documents a task is scoped by.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fields::*;

/// A field work order with its workflow, assignment, site and audit data.
///
/// Field names serialize in camelCase because the stored document, the patch
/// input and the diff map in the event log all share the same keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    /// Human-facing code, unique within org + project. Stored uppercase.
    pub code: String,
    pub org_id: String,
    pub project_id: String,
    pub task_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator_email: Option<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bs_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bs_address: Option<String>,
    #[serde(default)]
    pub bs_location: Vec<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bs_latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bs_longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contractor_payment: Option<f64>,
    #[serde(default)]
    pub work_items: Vec<WorkItem>,
    #[serde(default)]
    pub related_tasks: Vec<String>,
    #[serde(default)]
    pub events: Vec<TaskEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A new task in `To do` with no optional data. Used by seeding and tests;
    /// the creation workflow itself lives outside this crate.
    pub fn new(id: &str, code: &str, org_id: &str, project_id: &str, task_name: &str) -> Self {
        let now = Utc::now();
        Task {
            id: id.to_string(),
            code: code.trim().to_uppercase(),
            org_id: org_id.to_string(),
            project_id: project_id.to_string(),
            task_name: task_name.to_string(),
            description: None,
            initiator_name: None,
            initiator_email: None,
            status: Status::ToDo,
            priority: None,
            due_date: None,
            executor_id: None,
            executor_name: None,
            executor_email: None,
            bs_number: None,
            bs_address: None,
            bs_location: Vec::new(),
            bs_latitude: None,
            bs_longitude: None,
            total_cost: None,
            contractor_payment: None,
            work_items: Vec::new(),
            related_tasks: Vec::new(),
            events: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether an executor is currently assigned.
    pub fn has_executor(&self) -> bool {
        self.executor_id.as_deref().is_some_and(|id| !id.trim().is_empty())
    }

    /// The executor as a notification recipient, if any.
    pub fn executor(&self) -> Option<Recipient> {
        if !self.has_executor() {
            return None;
        }
        Some(Recipient {
            user_id: self.executor_id.clone(),
            name: self.executor_name.clone(),
            email: self.executor_email.clone(),
        })
    }

    /// The initiator as a notification recipient, if an email is known.
    pub fn initiator(&self) -> Option<Recipient> {
        let email = self.initiator_email.clone().filter(|e| !e.trim().is_empty())?;
        Some(Recipient {
            user_id: None,
            name: self.initiator_name.clone(),
            email: Some(email),
        })
    }

    /// Whether `task_ref` names this task, either by internal id or by code.
    pub fn matches_ref(&self, task_ref: &str) -> bool {
        let task_ref = task_ref.trim();
        self.id == task_ref || self.code == task_ref.to_uppercase()
    }
}

/// One physical site a task is performed at.
///
/// Coordinates are kept as the free-text `"<lat> <lon>"` pair the field teams
/// enter; numeric values are derived on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub name: String,
    pub coordinates: String,
    #[serde(default)]
    pub address: String,
}

/// A line of work to perform, e.g. "Cable install, 12 m".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub work_type: String,
    pub quantity: f64,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// The kind of an audit log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// Generic field update; details carry the full diff map.
    Updated,
    /// Status was promoted to `Assigned` because an executor was attached.
    StatusChangedAssigned,
}

/// An entry in a task's append-only history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub action: EventAction,
    pub author: String,
    pub author_id: String,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// The user a mutation is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Actor {
    /// Name written into event log entries. Falls back to email, then id.
    pub fn display_name(&self) -> String {
        if !self.name.trim().is_empty() {
            return self.name.trim().to_string();
        }
        self.email
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or(&self.id)
            .to_string()
    }
}

/// Someone a notification is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Recipient {
    /// Stable key used to compare recipients and to name fan-out operations.
    pub fn key(&self) -> &str {
        self.user_id
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    pub name: String,
}

/// A project groups tasks for one mobile operator in one region. The
/// operator/region pair scopes the geo-coordinate registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub org_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_ref_by_id_or_code() {
        let t = Task::new("64f0a1", "bs-0042", "org1", "p1", "Replace RRU");
        assert_eq!(t.code, "BS-0042");
        assert!(t.matches_ref("64f0a1"));
        assert!(t.matches_ref(" bs-0042 "));
        assert!(!t.matches_ref("BS-0043"));
    }

    #[test]
    fn test_task_document_uses_camel_case_and_skips_empty_options() {
        let t = Task::new("1", "T1", "o", "p", "Survey");
        let doc = serde_json::to_value(&t).unwrap();
        assert_eq!(doc["taskName"], "Survey");
        assert_eq!(doc["status"], "To do");
        assert!(doc.get("executorId").is_none());
        assert_eq!(doc["bsLocation"], serde_json::json!([]));
    }

    #[test]
    fn test_actor_display_name_fallbacks() {
        let a = Actor { id: "u1".into(), name: "  ".into(), email: Some("a@b.c".into()) };
        assert_eq!(a.display_name(), "a@b.c");
        let b = Actor { id: "u1".into(), name: String::new(), email: None };
        assert_eq!(b.display_name(), "u1");
    }
}
