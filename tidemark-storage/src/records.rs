//! Record payloads and primary-key extraction.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A payload that can live in a collection.
///
/// The store never looks past [`Record::key`]; every other field is the
/// caller's business.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Primary key of this record, if it has a usable one.
    fn key(&self) -> Option<String>;
}

impl Record for Value {
    fn key(&self) -> Option<String> {
        record_key(self)
    }
}

/// Reads the `id` field of a JSON record.
///
/// Strings must be non-empty; integer ids (some server collections use
/// them) are rendered in decimal.
pub fn record_key(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}
