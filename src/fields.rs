//! Enumerations and field types for field work orders.
//!
//! This module defines the workflow vocabulary used by tasks: the status values a
//! work order moves through and the priority levels a dispatcher can attach to it.

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Workflow status of a task.
///
/// The eight statuses the platform knows about are variants. Any other label
/// is kept verbatim in `Other` so that clients introducing a new status do not
/// have their writes rejected or silently rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    #[default]
    ToDo,
    Assigned,
    AtWork,
    Done,
    Pending,
    Issues,
    Fixed,
    Agreed,
    Other(String),
}

impl Status {
    /// All statuses with a fixed meaning, in workflow order.
    pub const KNOWN: [Status; 8] = [
        Status::ToDo,
        Status::Assigned,
        Status::AtWork,
        Status::Done,
        Status::Pending,
        Status::Issues,
        Status::Fixed,
        Status::Agreed,
    ];

    /// The stored label of this status.
    pub fn label(&self) -> &str {
        match self {
            Status::ToDo => "To do",
            Status::Assigned => "Assigned",
            Status::AtWork => "At work",
            Status::Done => "Done",
            Status::Pending => "Pending",
            Status::Issues => "Issues",
            Status::Fixed => "Fixed",
            Status::Agreed => "Agreed",
            Status::Other(s) => s,
        }
    }

    /// Map an exact stored label back to a status. Unknown labels become `Other`.
    pub fn from_label(label: &str) -> Status {
        Status::KNOWN
            .iter()
            .find(|s| s.label() == label)
            .cloned()
            .unwrap_or_else(|| Status::Other(label.to_string()))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<String> for Status {
    fn from(s: String) -> Self {
        Status::from_label(&s)
    }
}

impl From<Status> for String {
    fn from(s: Status) -> Self {
        match s {
            Status::Other(label) => label,
            known => known.label().to_string(),
        }
    }
}

/// Priority classification of a work order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    High,
    Medium,
    Low,
}

impl Priority {
    /// Parse a lowercase priority keyword.
    pub fn from_keyword(s: &str) -> Option<Priority> {
        match s {
            "urgent" => Some(Priority::Urgent),
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_as_label() {
        let json = serde_json::to_string(&Status::AtWork).unwrap();
        assert_eq!(json, "\"At work\"");
        let back: Status = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Status::AtWork);
    }

    #[test]
    fn test_unknown_status_is_preserved() {
        let s: Status = serde_json::from_str("\"Waiting for permit\"").unwrap();
        assert_eq!(s, Status::Other("Waiting for permit".into()));
        assert!(!Status::KNOWN.contains(&s));
        assert_eq!(serde_json::to_string(&s).unwrap(), "\"Waiting for permit\"");
    }

    #[test]
    fn test_priority_keywords() {
        assert_eq!(Priority::from_keyword("high"), Some(Priority::High));
        assert_eq!(Priority::from_keyword("HIGH"), None);
        assert_eq!(serde_json::to_string(&Priority::Urgent).unwrap(), "\"urgent\"");
    }
}
