//! Change detection between stored and candidate field values.
//!
//! Values are compared in their JSON document form so that one rule set covers
//! every field. Equality is type-aware: numbers are compared at six decimal
//! places regardless of whether they arrived as strings, timestamps by instant,
//! and site lists after trimming and address canonicalisation. Cosmetic
//! differences therefore never reach the event log.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::normalize::canonical_address;

/// Decimal places kept when comparing numeric values.
const NUMERIC_PRECISION: f64 = 1_000_000.0;

/// Whether `candidate` would leave `previous` unchanged.
pub fn is_same_value(previous: &Value, candidate: &Value) -> bool {
    if previous.is_null() && candidate.is_null() {
        return true;
    }
    if is_location_list(previous) && is_location_list(candidate) {
        return normalized_locations(previous) == normalized_locations(candidate);
    }
    if let (Some(a), Some(b)) = (numeric(previous), numeric(candidate)) {
        return round_numeric(a) == round_numeric(b);
    }
    match (previous, candidate) {
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| is_same_value(x, y))
        }
        (Value::Object(a), Value::Object(b)) => same_object(a, b),
        _ => match (instant(previous), instant(candidate)) {
            (Some(a), Some(b)) => a == b,
            _ => previous == candidate,
        },
    }
}

// A key holding null and a missing key are the same thing in a stored document.
fn same_object(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    a.keys().chain(b.keys()).all(|k| {
        let x = a.get(k).unwrap_or(&Value::Null);
        let y = b.get(k).unwrap_or(&Value::Null);
        is_same_value(x, y)
    })
}

fn numeric(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            s.parse::<f64>().ok()?
        }
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn round_numeric(n: f64) -> f64 {
    (n * NUMERIC_PRECISION).round() / NUMERIC_PRECISION
}

fn instant(v: &Value) -> Option<DateTime<Utc>> {
    let s = v.as_str()?;
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// An array whose every element is an object carrying a `coordinates` key.
fn is_location_list(v: &Value) -> bool {
    match v {
        Value::Array(items) if !items.is_empty() => items
            .iter()
            .all(|item| item.as_object().is_some_and(|o| o.contains_key("coordinates"))),
        _ => false,
    }
}

fn normalized_locations(v: &Value) -> Vec<(String, String, String)> {
    let text = |o: &Map<String, Value>, key: &str| -> String {
        match o.get(key) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    };
    v.as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
        .map(|o| {
            let name = text(o, "name");
            let coordinates = text(o, "coordinates");
            let address = canonical_address(Some(&text(o, "address")), None, None);
            (name, coordinates, address)
        })
        .collect()
}

/// A single field transition recorded in the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub from: Value,
    pub to: Value,
}

/// The sparse set of field changes produced by one mutation request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: BTreeMap<String, Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `field` moving from `from` to `to`. Returns `false` without
    /// recording anything when the two values are the same.
    pub fn mark_change(&mut self, field: &str, from: Value, to: Value) -> bool {
        if is_same_value(&from, &to) {
            return false;
        }
        self.changes.insert(field.to_string(), Change { from, to });
        true
    }

    pub fn contains(&self, field: &str) -> bool {
        self.changes.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Change)> {
        self.changes.iter()
    }

    /// The diff map as stored in an `updated` event: `{field: {from, to}}`.
    pub fn to_details(&self) -> Value {
        let map: Map<String, Value> = self
            .changes
            .iter()
            .map(|(field, c)| (field.clone(), json!({ "from": c.from, "to": c.to })))
            .collect();
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_representation_does_not_matter() {
        assert!(is_same_value(&json!("37.500000"), &json!(37.5)));
        assert!(is_same_value(&json!(37.5), &json!("37.500000")));
        assert!(is_same_value(&json!(55.1234564), &json!(55.1234561)));
        assert!(!is_same_value(&json!(55.123456), &json!(55.123457)));
        assert!(!is_same_value(&json!(""), &json!(0)));
    }

    #[test]
    fn test_nulls_and_exact_values() {
        assert!(is_same_value(&Value::Null, &Value::Null));
        assert!(!is_same_value(&Value::Null, &json!("x")));
        assert!(!is_same_value(&json!("To do"), &json!("Assigned")));
        assert!(is_same_value(&json!(true), &json!(true)));
    }

    #[test]
    fn test_timestamps_compare_by_instant() {
        assert!(is_same_value(
            &json!("2024-05-01T10:00:00Z"),
            &json!("2024-05-01T13:00:00+03:00")
        ));
        assert!(!is_same_value(
            &json!("2024-05-01T10:00:00Z"),
            &json!("2024-05-01T10:00:01Z")
        ));
    }

    #[test]
    fn test_location_lists_ignore_cosmetic_whitespace() {
        let stored = json!([
            { "name": "1234", "coordinates": "55.7 37.6", "address": "Moscow,  Tverskaya 1" }
        ]);
        let candidate = json!([
            { "name": " 1234 ", "coordinates": "55.7 37.6 ", "address": "Moscow, Tverskaya 1," }
        ]);
        assert!(is_same_value(&stored, &candidate));

        let moved = json!([
            { "name": "1234", "coordinates": "55.8 37.6", "address": "Moscow, Tverskaya 1" }
        ]);
        assert!(!is_same_value(&stored, &moved));
    }

    #[test]
    fn test_structural_comparison_treats_missing_as_null() {
        let a = json!([{ "workType": "Install", "quantity": 12, "unit": "m" }]);
        let b = json!([{ "workType": "Install", "quantity": 12.0, "unit": "m", "note": null }]);
        assert!(is_same_value(&a, &b));
        let c = json!([{ "workType": "Install", "quantity": 13, "unit": "m" }]);
        assert!(!is_same_value(&a, &c));
    }

    #[test]
    fn test_mark_change_skips_no_ops() {
        let mut changes = ChangeSet::new();
        assert!(!changes.mark_change("totalCost", json!(100), json!("100.000")));
        assert!(changes.is_empty());
        assert!(changes.mark_change("totalCost", json!(100), json!(120)));
        assert_eq!(changes.len(), 1);
        assert_eq!(
            changes.to_details(),
            json!({ "totalCost": { "from": 100, "to": 120 } })
        );
    }
}
