//! Per-field parsing and validation of patch input.
//!
//! Every normalizer is fail-soft: input that cannot be understood means "field
//! not supplied" (`None` or `Patch::Keep`), never an error. Only an explicit
//! empty value clears an optional field.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::fields::{Priority, Status};
use crate::patch::Patch;
use crate::task::{Location, WorkItem};

/// Accepted spellings of the known statuses, keyed by the uppercased input with
/// inner whitespace collapsed.
const STATUS_ALIASES: &[(&str, &str)] = &[
    ("TO DO", "To do"),
    ("TODO", "To do"),
    ("TO-DO", "To do"),
    ("ASSIGNED", "Assigned"),
    ("AT WORK", "At work"),
    ("AT-WORK", "At work"),
    ("IN PROGRESS", "At work"),
    ("IN-PROGRESS", "At work"),
    ("INPROGRESS", "At work"),
    ("DONE", "Done"),
    ("COMPLETED", "Done"),
    ("PENDING", "Pending"),
    ("ISSUES", "Issues"),
    ("FIXED", "Fixed"),
    ("AGREED", "Agreed"),
];

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Map a status as typed by a user onto the stored vocabulary.
///
/// Known aliases resolve case-insensitively. Anything else that is not blank
/// passes through verbatim as `Status::Other`.
pub fn normalize_status(raw: &str) -> Option<Status> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let key = collapse_whitespace(trimmed).to_uppercase();
    let status = STATUS_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, label)| Status::from_label(label))
        .unwrap_or_else(|| Status::Other(trimmed.to_string()));
    Some(status)
}

pub fn normalize_priority(raw: &Value) -> Option<Priority> {
    Priority::from_keyword(&raw.as_str()?.trim().to_lowercase())
}

/// Trimmed text; a blank value clears the field.
pub fn normalize_text(input: &Patch<String>) -> Patch<String> {
    match input {
        Patch::Keep => Patch::Keep,
        Patch::Clear => Patch::Clear,
        Patch::Set(s) if s.trim().is_empty() => Patch::Clear,
        Patch::Set(s) => Patch::Set(s.trim().to_string()),
    }
}

/// A finite number, given either as a JSON number or as numeric text.
pub fn parse_number(raw: &Value) -> Option<f64> {
    let n = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Numeric fields: blank clears, non-finite or non-numeric input is dropped.
pub fn normalize_number(input: &Patch<Value>) -> Patch<f64> {
    match input {
        Patch::Keep => Patch::Keep,
        Patch::Clear | Patch::Set(Value::Null) => Patch::Clear,
        Patch::Set(Value::String(s)) if s.trim().is_empty() => Patch::Clear,
        Patch::Set(v) => parse_number(v).map_or(Patch::Keep, Patch::Set),
    }
}

/// Parse an instant from RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS` (taken as
/// UTC), a bare `YYYY-MM-DD` (midnight UTC) or epoch milliseconds.
pub fn parse_instant(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
                return Some(Utc.from_utc_datetime(&naive));
            }
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
            Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
        }
        Value::Number(n) => DateTime::from_timestamp_millis(n.as_i64()?),
        _ => None,
    }
}

/// Dates: blank clears, unparseable input is dropped. Never defaults to now.
pub fn normalize_date(input: &Patch<Value>) -> Patch<DateTime<Utc>> {
    match input {
        Patch::Keep => Patch::Keep,
        Patch::Clear | Patch::Set(Value::Null) => Patch::Clear,
        Patch::Set(Value::String(s)) if s.trim().is_empty() => Patch::Clear,
        Patch::Set(v) => parse_instant(v).map_or(Patch::Keep, Patch::Set),
    }
}

fn text_of(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Keep the work items that have a type, a unit and a finite quantity.
/// Returns `None` when the input is not a list at all.
pub fn normalize_work_items(raw: &Value) -> Option<Vec<WorkItem>> {
    let items = raw.as_array()?;
    let accepted = items
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let work_type = text_of(obj.get("workType"));
            let unit = text_of(obj.get("unit"));
            if work_type.is_empty() || unit.is_empty() {
                return None;
            }
            let quantity = parse_number(obj.get("quantity")?)?;
            let note = Some(text_of(obj.get("note"))).filter(|n| !n.is_empty());
            Some(WorkItem { work_type, quantity, unit, note })
        })
        .collect();
    Some(accepted)
}

/// Canonical form of a site address.
///
/// Uses the first non-blank of the entry's own address, the task-level base
/// address and the site name; collapses whitespace and drops trailing or
/// doubled separators.
pub fn canonical_address(raw: Option<&str>, base: Option<&str>, name: Option<&str>) -> String {
    let chosen = [raw, base, name]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or("");
    let mut out = collapse_whitespace(chosen).replace(" ,", ",");
    while out.contains(",,") {
        out = out.replace(",,", ",");
    }
    out.trim_end_matches([',', ';', ' ']).to_string()
}

/// Sanitize a caller-supplied site list. Returns `None` when the input is not
/// a list. Entries without both a name and coordinates are dropped.
pub fn normalize_locations(raw: &Value, base_address: Option<&str>) -> Option<Vec<Location>> {
    let entries = raw.as_array()?;
    let sites = entries
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|obj| {
            let name = text_of(obj.get("name"));
            let coordinates = text_of(obj.get("coordinates"));
            if name.is_empty() && coordinates.is_empty() {
                return None;
            }
            let own = text_of(obj.get("address"));
            let address = canonical_address(Some(&own), base_address, Some(&name));
            Some(Location { name, coordinates, address })
        })
        .collect();
    Some(sites)
}

/// Parse a `"<lat> <lon>"` pair. A comma between the two is also accepted.
pub fn parse_coordinates(text: &str) -> Option<(f64, f64)> {
    let parts: Vec<&str> = text
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .filter(|p| !p.is_empty())
        .collect();
    let [lat, lon] = parts.as_slice() else {
        return None;
    };
    let lat = lat.parse::<f64>().ok().filter(|v| v.is_finite())?;
    let lon = lon.parse::<f64>().ok().filter(|v| v.is_finite())?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }
    Some((lat, lon))
}

/// Format a coordinate pair the way field teams type it, with no trailing zeros.
pub fn format_coordinates(lat: f64, lon: f64) -> String {
    format!("{lat} {lon}")
}

/// Site codes are compared without whitespace and in uppercase.
pub fn normalize_site_number(raw: &str) -> String {
    raw.split_whitespace().collect::<String>().to_uppercase()
}

/// Trim, drop blanks and `own_id`, and deduplicate while keeping order.
pub fn normalize_related(ids: &[String], own_id: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty() && id != own_id)
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_aliases() {
        assert_eq!(normalize_status("todo"), Some(Status::ToDo));
        assert_eq!(normalize_status("TO-DO"), Some(Status::ToDo));
        assert_eq!(normalize_status(" to   do "), Some(Status::ToDo));
        assert_eq!(normalize_status("In Progress"), Some(Status::AtWork));
        assert_eq!(normalize_status("at work"), Some(Status::AtWork));
        assert_eq!(normalize_status("done"), Some(Status::Done));
        assert_eq!(normalize_status("   "), None);
    }

    #[test]
    fn test_unknown_status_passes_through() {
        assert_eq!(
            normalize_status(" Awaiting permit "),
            Some(Status::Other("Awaiting permit".into()))
        );
    }

    #[test]
    fn test_priority_is_lowercased_and_checked() {
        assert_eq!(normalize_priority(&json!("HIGH")), Some(Priority::High));
        assert_eq!(normalize_priority(&json!("critical")), None);
        assert_eq!(normalize_priority(&json!(3)), None);
    }

    #[test]
    fn test_numbers_clear_drop_or_accept() {
        assert_eq!(normalize_number(&Patch::Set(json!(""))), Patch::Clear);
        assert_eq!(normalize_number(&Patch::Clear), Patch::Clear);
        assert_eq!(normalize_number(&Patch::Set(json!("12.5"))), Patch::Set(12.5));
        assert_eq!(normalize_number(&Patch::Set(json!(7))), Patch::Set(7.0));
        assert_eq!(normalize_number(&Patch::Set(json!("NaN"))), Patch::Keep);
        assert_eq!(normalize_number(&Patch::Set(json!("inf"))), Patch::Keep);
        assert_eq!(normalize_number(&Patch::Set(json!("abc"))), Patch::Keep);
        assert_eq!(normalize_number(&Patch::Keep), Patch::Keep);
    }

    #[test]
    fn test_dates_never_default_to_now() {
        assert_eq!(normalize_date(&Patch::Set(json!("tomorrow"))), Patch::Keep);
        assert_eq!(normalize_date(&Patch::Set(json!(""))), Patch::Clear);
        let Patch::Set(d) = normalize_date(&Patch::Set(json!("2024-06-30"))) else {
            panic!("expected a date");
        };
        assert_eq!(d.to_rfc3339(), "2024-06-30T00:00:00+00:00");
        let Patch::Set(d) = normalize_date(&Patch::Set(json!("2024-06-30T08:15:00+03:00"))) else {
            panic!("expected a date");
        };
        assert_eq!(d.to_rfc3339(), "2024-06-30T05:15:00+00:00");
    }

    #[test]
    fn test_work_items_partial_acceptance() {
        let raw = json!([
            { "workType": "Install", "unit": "m", "quantity": "12" },
            { "workType": "", "unit": "m", "quantity": 5 },
            { "workType": "Survey", "unit": "pcs", "quantity": "many" },
            "garbage",
        ]);
        let items = normalize_work_items(&raw).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].work_type, "Install");
        assert_eq!(items[0].quantity, 12.0);
        assert_eq!(items[0].note, None);
        assert_eq!(normalize_work_items(&json!({ "workType": "x" })), None);
    }

    #[test]
    fn test_locations_get_canonical_addresses() {
        let raw = json!([
            { "name": "1234", "coordinates": " 55.75 37.61 ", "address": "" },
            { "name": "1235", "coordinates": "55.76 37.62", "address": "Tverskaya  st, 5,," },
            { "name": "", "coordinates": "" },
        ]);
        let sites = normalize_locations(&raw, Some("Moscow region")).unwrap();
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].coordinates, "55.75 37.61");
        assert_eq!(sites[0].address, "Moscow region");
        assert_eq!(sites[1].address, "Tverskaya st, 5");
        assert_eq!(normalize_locations(&json!("1234"), None), None);
    }

    #[test]
    fn test_coordinate_pairs() {
        assert_eq!(parse_coordinates("55.75 37.61"), Some((55.75, 37.61)));
        assert_eq!(parse_coordinates("55.75, 37.61"), Some((55.75, 37.61)));
        assert_eq!(parse_coordinates("55.75"), None);
        assert_eq!(parse_coordinates("95 37"), None);
        assert_eq!(parse_coordinates("north east"), None);
        assert_eq!(format_coordinates(55.0, 37.0), "55 37");
    }

    #[test]
    fn test_related_ids_are_deduplicated() {
        let ids: Vec<String> = ["b", " c ", "b", "a", ""].iter().map(|s| s.to_string()).collect();
        assert_eq!(normalize_related(&ids, "a"), vec!["b".to_string(), "c".to_string()]);
    }
}
