//! Thin typed view over an opaque ledger object.
//!
//! Objects cross the wire as JSON and the orchestration only ever needs a
//! handful of fields per scenario, so the wrapper exposes accessors instead
//! of a struct per kind. Reference fields ("customer", "payment_intent",
//! "invoice") may arrive either as a bare id or expanded into a full object;
//! `ref_id` handles both shapes.

use serde_json::Value;

#[derive(Debug, Clone)]
pub struct LedgerObject(pub Value);

impl LedgerObject {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn id(&self) -> Option<&str> {
        self.str_field("id")
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        let s = self.0.get(key)?.as_str()?.trim();
        if s.is_empty() {
            None
        } else {
            Some(s)
        }
    }

    pub fn int_field(&self, key: &str) -> Option<i64> {
        self.0.get(key)?.as_i64()
    }

    /// Follow a path of object keys.
    pub fn path(&self, segments: &[&str]) -> Option<&Value> {
        let mut current = &self.0;
        for segment in segments {
            current = current.get(segment)?;
        }
        Some(current)
    }

    pub fn path_str(&self, segments: &[&str]) -> Option<&str> {
        let s = self.path(segments)?.as_str()?.trim();
        if s.is_empty() {
            None
        } else {
            Some(s)
        }
    }

    pub fn path_int(&self, segments: &[&str]) -> Option<i64> {
        self.path(segments)?.as_i64()
    }

    /// A reference field: either a bare id string or an expanded object.
    pub fn ref_id(&self, key: &str) -> Option<&str> {
        match self.0.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim()),
            Value::Object(obj) => {
                let s = obj.get("id")?.as_str()?.trim();
                if s.is_empty() {
                    None
                } else {
                    Some(s)
                }
            }
            _ => None,
        }
    }

    /// The object's metadata map, `Null` when absent.
    pub fn metadata(&self) -> Value {
        self.0.get("metadata").cloned().unwrap_or(Value::Null)
    }

    /// An expanded sub-object, if present and actually expanded.
    pub fn expanded(&self, key: &str) -> Option<LedgerObject> {
        match self.0.get(key) {
            Some(Value::Object(_)) => Some(LedgerObject(self.0.get(key)?.clone())),
            _ => None,
        }
    }

    /// Items of a list field shaped `{"data": [...]}`.
    pub fn list_data(&self, key: &str) -> Vec<LedgerObject> {
        self.path(&[key, "data"])
            .and_then(Value::as_array)
            .map(|items| items.iter().cloned().map(LedgerObject).collect())
            .unwrap_or_default()
    }
}
