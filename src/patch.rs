//! Patch input and the store-level update it is turned into.
//!
//! Provides:
//! - `Patch<T>` - three-way field update (keep, clear, set)
//! - `TaskPatch` - the caller's partial update for a task
//! - `TaskUpdate` - the `$set` / `$unset` / `$push` document handed to the store

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::TaskEvent;

/// Three-way patch for a single field.
///
/// A JSON key that is absent deserializes to `Keep` (via `#[serde(default)]`),
/// an explicit `null` to `Clear`, anything else to `Set`. The distinction
/// matters for the executor: leaving it out changes nothing, while `null`
/// unassigns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Patch<T> {
    #[default]
    Keep,
    Clear,
    Set(T),
}

impl<T> Patch<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }

    /// Borrow the value of a `Set`.
    pub fn as_set(&self) -> Option<&T> {
        match self {
            Patch::Set(v) => Some(v),
            _ => None,
        }
    }
}

impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Patch::Keep | Patch::Clear => serializer.serialize_none(),
            Patch::Set(v) => v.serialize(serializer),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Absent keys never reach here; `#[serde(default)]` yields `Keep`.
        let opt: Option<T> = Option::deserialize(deserializer)?;
        match opt {
            None => Ok(Patch::Clear),
            Some(v) => Ok(Patch::Set(v)),
        }
    }
}

/// Turn a raw JSON field into a patch: `null` clears, a value `convert`
/// accepts sets, anything else leaves the field alone.
fn patch_from<T>(raw: Value, convert: impl FnOnce(Value) -> Option<T>) -> Patch<T> {
    match raw {
        Value::Null => Patch::Clear,
        other => convert(other).map_or(Patch::Keep, Patch::Set),
    }
}

/// Text or a bare number (site numbers and ids are often sent as numbers).
fn text_or_number(raw: Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn loose_text<'de, D>(deserializer: D) -> Result<Patch<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(patch_from(Value::deserialize(deserializer)?, text_or_number))
}

fn strict_text<'de, D>(deserializer: D) -> Result<Patch<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(patch_from(Value::deserialize(deserializer)?, |raw| match raw {
        Value::String(s) => Some(s),
        _ => None,
    }))
}

/// A list of ids; entries that are neither text nor numbers are skipped.
fn id_list<'de, D>(deserializer: D) -> Result<Patch<Vec<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(patch_from(Value::deserialize(deserializer)?, |raw| match raw {
        Value::Array(items) => Some(items.into_iter().filter_map(text_or_number).collect()),
        _ => None,
    }))
}

/// A caller's partial update of a task.
///
/// Input is accepted field by field: a value of the wrong JSON type is treated
/// as if the key were absent, so one malformed field never fails the whole
/// request. Fields whose format varies between clients (numbers sent as
/// strings, dates in several shapes, free-form lists) are kept as raw JSON for
/// the normalizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default, deserialize_with = "loose_text", skip_serializing_if = "Patch::is_keep")]
    pub task_name: Patch<String>,
    #[serde(default, deserialize_with = "loose_text", skip_serializing_if = "Patch::is_keep")]
    pub description: Patch<String>,
    #[serde(default, deserialize_with = "loose_text", skip_serializing_if = "Patch::is_keep")]
    pub initiator_name: Patch<String>,
    #[serde(default, deserialize_with = "strict_text", skip_serializing_if = "Patch::is_keep")]
    pub initiator_email: Patch<String>,
    #[serde(default, deserialize_with = "strict_text", skip_serializing_if = "Patch::is_keep")]
    pub status: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub priority: Patch<Value>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub due_date: Patch<Value>,
    #[serde(default, deserialize_with = "loose_text", skip_serializing_if = "Patch::is_keep")]
    pub executor_id: Patch<String>,
    #[serde(default, deserialize_with = "loose_text", skip_serializing_if = "Patch::is_keep")]
    pub executor_name: Patch<String>,
    #[serde(default, deserialize_with = "strict_text", skip_serializing_if = "Patch::is_keep")]
    pub executor_email: Patch<String>,
    #[serde(default, deserialize_with = "loose_text", skip_serializing_if = "Patch::is_keep")]
    pub bs_number: Patch<String>,
    #[serde(default, deserialize_with = "loose_text", skip_serializing_if = "Patch::is_keep")]
    pub bs_address: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub bs_location: Patch<Value>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub bs_latitude: Patch<Value>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub bs_longitude: Patch<Value>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub total_cost: Patch<Value>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub contractor_payment: Patch<Value>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub work_items: Patch<Value>,
    #[serde(default, deserialize_with = "id_list", skip_serializing_if = "Patch::is_keep")]
    pub related_tasks: Patch<Vec<String>>,
}

/// The atomic update applied to one stored task document.
///
/// Mirrors a document store's find-and-update: keys in `set` are overwritten,
/// keys in `unset` are removed from the document, and `push_events` is appended
/// to the event log in the same write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub set: BTreeMap<String, Value>,
    pub unset: Vec<String>,
    pub push_events: Vec<TaskEvent>,
}

impl TaskUpdate {
    /// Set `field` to `value`, cancelling an earlier unset of the same field.
    pub fn set(&mut self, field: &str, value: Value) {
        self.unset.retain(|f| f != field);
        self.set.insert(field.to_string(), value);
    }

    /// Remove `field` from the document, cancelling an earlier set.
    pub fn unset(&mut self, field: &str) {
        self.set.remove(field);
        if !self.unset.iter().any(|f| f == field) {
            self.unset.push(field.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty() && self.push_events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_null_and_value_are_distinct() {
        let p: TaskPatch = serde_json::from_value(json!({
            "executorId": null,
            "status": "Done",
        }))
        .unwrap();
        assert_eq!(p.executor_id, Patch::Clear);
        assert_eq!(p.status, Patch::Set("Done".to_string()));
        assert!(p.bs_number.is_keep());
    }

    #[test]
    fn test_loose_fields_keep_raw_json() {
        let p: TaskPatch = serde_json::from_value(json!({
            "totalCost": "12.50",
            "workItems": "not a list",
        }))
        .unwrap();
        assert_eq!(p.total_cost, Patch::Set(json!("12.50")));
        assert_eq!(p.work_items, Patch::Set(json!("not a list")));
    }

    #[test]
    fn test_wrong_types_drop_only_that_field() {
        let p: TaskPatch = serde_json::from_value(json!({
            "bsNumber": 1234,
            "status": 5,
            "executorId": 42,
            "executorEmail": ["x"],
            "relatedTasks": ["b", null, 7, { "id": "c" }],
            "description": "x",
        }))
        .unwrap();
        assert_eq!(p.bs_number, Patch::Set("1234".to_string()));
        assert_eq!(p.executor_id, Patch::Set("42".to_string()));
        assert!(p.status.is_keep());
        assert!(p.executor_email.is_keep());
        assert_eq!(p.related_tasks, Patch::Set(vec!["b".to_string(), "7".to_string()]));
        assert_eq!(p.description, Patch::Set("x".to_string()));

        let p: TaskPatch =
            serde_json::from_value(json!({ "relatedTasks": "b", "taskName": null })).unwrap();
        assert!(p.related_tasks.is_keep());
        assert_eq!(p.task_name, Patch::Clear);
    }

    #[test]
    fn test_update_set_and_unset_cancel_each_other() {
        let mut u = TaskUpdate::default();
        u.set("executorId", json!("u1"));
        u.unset("executorId");
        assert!(u.set.is_empty());
        assert_eq!(u.unset, vec!["executorId".to_string()]);
        u.set("executorId", json!("u2"));
        assert!(u.unset.is_empty());
        assert_eq!(u.set.get("executorId"), Some(&json!("u2")));
    }
}
