//! Pure merge planning. No I/O; the reconciler applies the plans.

use chrono::DateTime;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tidemark_storage::record_key;
use tracing::warn;

/// Fields read as a record's last-modified time, in order of preference.
const TIMESTAMP_FIELDS: [&str; 2] = ["updatedAt", "updated_at"];

/// Last-modified time of a record in epoch milliseconds.
///
/// Accepts RFC 3339 strings and numeric epoch milliseconds (as a number
/// or a numeric string).
pub fn record_timestamp(record: &Value) -> Option<i64> {
    TIMESTAMP_FIELDS
        .iter()
        .find_map(|field| record.get(*field))
        .and_then(parse_timestamp)
}

fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp_millis())
            .ok()
            .or_else(|| s.parse::<i64>().ok()),
        _ => None,
    }
}

/// Whether `server` should overwrite `local`.
///
/// Strictly newer wins. A server record without a timestamp never
/// overwrites; a local record without one always yields.
pub fn server_wins(local: &Value, server: &Value) -> bool {
    match (record_timestamp(local), record_timestamp(server)) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(l), Some(s)) => s > l,
    }
}

/// Local changes needed to bring a collection in line with the server.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LwwPlan {
    /// Server records to write (new or strictly newer), keyed.
    pub upserts: Vec<(String, Value)>,
    /// Local ids the server no longer lists.
    pub deletions: Vec<String>,
    /// Server records whose local copy was kept.
    pub kept: usize,
}

/// Plans a last-writer-wins pass. The server list defines membership;
/// record content is chosen by timestamp.
pub fn plan_lww(local: &[Value], server: &[Value]) -> LwwPlan {
    let local_by_id: HashMap<String, &Value> = local
        .iter()
        .filter_map(|r| record_key(r).map(|k| (k, r)))
        .collect();

    let mut plan = LwwPlan::default();
    let mut server_ids = HashSet::new();
    for record in server {
        let Some(key) = record_key(record) else {
            warn!("ignoring server record without an id");
            continue;
        };
        if !server_ids.insert(key.clone()) {
            continue;
        }
        match local_by_id.get(&key) {
            Some(existing) if !server_wins(existing, record) => plan.kept += 1,
            _ => plan.upserts.push((key, record.clone())),
        }
    }

    let mut deletions: Vec<String> = local_by_id
        .into_keys()
        .filter(|id| !server_ids.contains(id))
        .collect();
    deletions.sort();
    plan.deletions = deletions;
    plan
}

/// Overlays server fields onto the local record. Local-only fields survive.
///
/// Anything that is not an object on the server side replaces the local
/// value outright.
pub fn shallow_merge(local: Option<&Value>, server: &Value) -> Value {
    match (local, server) {
        (Some(Value::Object(local)), Value::Object(server)) => {
            let mut merged: Map<String, Value> = local.clone();
            for (field, value) in server {
                merged.insert(field.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => server.clone(),
    }
}
