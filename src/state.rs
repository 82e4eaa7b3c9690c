//! Status and assignment transitions.
//!
//! Status normally changes only when a caller sets it. The one implicit rule
//! couples it to assignment: attaching an executor to a `To do` task promotes it
//! to `Assigned`, and detaching the executor from an `Assigned` task demotes it
//! back to `To do`. An explicit status in the same request always wins.

use crate::fields::Status;
use crate::patch::Patch;

/// How a request affects the executor of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorChange {
    /// The executor field was not supplied, or re-supplied unchanged.
    Unchanged,
    /// No executor before, one now.
    Gained,
    /// A different executor replaces the previous one.
    Replaced,
    /// The caller cleared the executor of a task that had one.
    Removed,
}

impl ExecutorChange {
    /// Classify the executor patch against the stored executor id.
    ///
    /// An empty id counts as an explicit clear. Clearing a task that has no
    /// executor is not a change.
    pub fn classify(previous: Option<&str>, patch: &Patch<String>) -> ExecutorChange {
        let previous = previous.map(str::trim).filter(|id| !id.is_empty());
        let next = match patch {
            Patch::Keep => return ExecutorChange::Unchanged,
            Patch::Clear => None,
            Patch::Set(id) => Some(id.trim()).filter(|id| !id.is_empty()),
        };
        match (previous, next) {
            (None, None) => ExecutorChange::Unchanged,
            (None, Some(_)) => ExecutorChange::Gained,
            (Some(_), None) => ExecutorChange::Removed,
            (Some(prev), Some(next)) if prev == next => ExecutorChange::Unchanged,
            (Some(_), Some(_)) => ExecutorChange::Replaced,
        }
    }

    /// Whether a (new) executor is being attached.
    pub fn assigns(self) -> bool {
        matches!(self, ExecutorChange::Gained | ExecutorChange::Replaced)
    }

    /// Whether the previous executor is losing the task.
    pub fn unassigns(self) -> bool {
        matches!(self, ExecutorChange::Removed | ExecutorChange::Replaced)
    }
}

/// The status outcome of one request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transition {
    /// Status to store, or `None` when it stays as it is.
    pub status: Option<Status>,
    /// `To do -> Assigned` fired because an executor was attached.
    pub auto_assigned: bool,
    /// `Assigned -> To do` fired because the executor was removed.
    pub auto_unassigned: bool,
}

/// Derive the status transition for a request.
///
/// `explicit` is the normalized status the caller supplied, if any. Supplying
/// a status suppresses both implicit rules even when it equals the current one.
pub fn derive_transition(
    current: &Status,
    explicit: Option<&Status>,
    executor: ExecutorChange,
) -> Transition {
    if let Some(requested) = explicit {
        return Transition {
            status: (requested != current).then(|| requested.clone()),
            ..Transition::default()
        };
    }
    match executor {
        ExecutorChange::Gained if *current == Status::ToDo => Transition {
            status: Some(Status::Assigned),
            auto_assigned: true,
            auto_unassigned: false,
        },
        ExecutorChange::Removed if *current == Status::Assigned => Transition {
            status: Some(Status::ToDo),
            auto_assigned: false,
            auto_unassigned: true,
        },
        _ => Transition::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(id: &str) -> Patch<String> {
        Patch::Set(id.to_string())
    }

    #[test]
    fn test_classify_executor_patch() {
        assert_eq!(ExecutorChange::classify(None, &Patch::Keep), ExecutorChange::Unchanged);
        assert_eq!(ExecutorChange::classify(None, &set("u1")), ExecutorChange::Gained);
        assert_eq!(ExecutorChange::classify(Some(""), &set("u1")), ExecutorChange::Gained);
        assert_eq!(ExecutorChange::classify(Some("u1"), &set("u1")), ExecutorChange::Unchanged);
        assert_eq!(ExecutorChange::classify(Some("u1"), &set("u2")), ExecutorChange::Replaced);
        assert_eq!(ExecutorChange::classify(Some("u1"), &Patch::Clear), ExecutorChange::Removed);
        assert_eq!(ExecutorChange::classify(Some("u1"), &set("  ")), ExecutorChange::Removed);
        assert_eq!(ExecutorChange::classify(None, &Patch::Clear), ExecutorChange::Unchanged);
    }

    #[test]
    fn test_gaining_executor_promotes_to_assigned() {
        let t = derive_transition(&Status::ToDo, None, ExecutorChange::Gained);
        assert_eq!(t.status, Some(Status::Assigned));
        assert!(t.auto_assigned);
    }

    #[test]
    fn test_gaining_executor_leaves_other_statuses_alone() {
        let t = derive_transition(&Status::Issues, None, ExecutorChange::Gained);
        assert_eq!(t, Transition::default());
    }

    #[test]
    fn test_explicit_status_wins_over_assignment() {
        let t = derive_transition(&Status::ToDo, Some(&Status::AtWork), ExecutorChange::Gained);
        assert_eq!(t.status, Some(Status::AtWork));
        assert!(!t.auto_assigned);
    }

    #[test]
    fn test_explicit_same_status_still_suppresses_promotion() {
        let t = derive_transition(&Status::ToDo, Some(&Status::ToDo), ExecutorChange::Gained);
        assert_eq!(t, Transition::default());
    }

    #[test]
    fn test_removing_executor_demotes_assigned() {
        let t = derive_transition(&Status::Assigned, None, ExecutorChange::Removed);
        assert_eq!(t.status, Some(Status::ToDo));
        assert!(t.auto_unassigned);

        let t = derive_transition(&Status::Assigned, Some(&Status::Done), ExecutorChange::Removed);
        assert_eq!(t.status, Some(Status::Done));
        assert!(!t.auto_unassigned);

        let t = derive_transition(&Status::AtWork, None, ExecutorChange::Removed);
        assert_eq!(t.status, None);
    }

    #[test]
    fn test_replacing_executor_has_no_implicit_transition() {
        let t = derive_transition(&Status::Assigned, None, ExecutorChange::Replaced);
        assert_eq!(t, Transition::default());
    }
}
