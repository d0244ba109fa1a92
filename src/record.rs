//! Core data types shared by every pipeline stage.
//!
//! A `Record` is one row of the source table as an ordered JSON object; a
//! `SchemaMap` names which of its fields make up the address, and in what order.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::PipelineError;

// ─────────────────────────────────────────────────────────────────────────────
// Record
// ─────────────────────────────────────────────────────────────────────────────

/// One source row: field name to scalar value (string, number or null).
///
/// Serializes as a flat JSON object with fields in source column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Renders a non-null scalar as text. Null and missing fields yield `None`.
    pub fn text(&self, field: &str) -> Option<String> {
        match self.0.get(field)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            other => Some(other.to_string()),
        }
    }

    /// The opaque source identifier, as text.
    pub fn source_id(&self, id_field: &str) -> Option<String> {
        self.text(id_field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (K, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Byte length of the compact JSON array encoding of `records`.
///
/// This is the size a transport sees for a message body carrying these rows.
pub fn serialized_size(records: &[Record]) -> Result<usize, PipelineError> {
    serde_json::to_vec(records)
        .map(|bytes| bytes.len())
        .map_err(|e| PipelineError::Internal(format!("Failed to serialize records: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// SchemaMap
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered mapping from canonical address component to source field name.
///
/// Order determines concatenation order when building the free-text address,
/// so this is a list of pairs rather than a hash map. It deserializes from a
/// JSON object and keeps the document's key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaMap {
    entries: Vec<(String, String)>,
}

impl SchemaMap {
    pub fn new<C, F>(entries: impl IntoIterator<Item = (C, F)>) -> Self
    where
        C: Into<String>,
        F: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(c, f)| (c.into(), f.into()))
                .collect(),
        }
    }

    /// Iterates `(canonical_component, source_field)` in concatenation order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(c, f)| (c.as_str(), f.as_str()))
    }

    pub fn field_for(&self, component: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(c, _)| c == component)
            .map(|(_, f)| f.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for SchemaMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter().map(|(c, f)| (c, f)))
    }
}

impl<'de> Deserialize<'de> for SchemaMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SchemaMapVisitor;

        impl<'de> Visitor<'de> for SchemaMapVisitor {
            type Value = SchemaMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping address components to field names")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<SchemaMap, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((component, field)) = access.next_entry::<String, String>()? {
                    entries.push((component, field));
                }
                Ok(SchemaMap { entries })
            }
        }

        deserializer.deserialize_map(SchemaMapVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_map_keeps_document_order() {
        let map: SchemaMap = serde_json::from_str(
            r#"{"zip_code": "zip", "address_line1": "address1", "city": "city"}"#,
        )
        .unwrap();

        let order: Vec<&str> = map.iter().map(|(c, _)| c).collect();
        assert_eq!(order, vec!["zip_code", "address_line1", "city"]);
        assert_eq!(map.field_for("address_line1"), Some("address1"));
        assert_eq!(map.field_for("country"), None);
    }

    #[test]
    fn schema_map_serializes_in_order() {
        let map = SchemaMap::new([("b", "x"), ("a", "y")]);
        assert_eq!(serde_json::to_string(&map).unwrap(), r#"{"b":"x","a":"y"}"#);
    }

    #[test]
    fn record_text_skips_null_and_renders_numbers() {
        let record: Record = [
            ("source_id", json!("abc")),
            ("zip_code", json!(94105)),
            ("address2", Value::Null),
        ]
        .into_iter()
        .collect();

        assert_eq!(record.source_id("source_id").as_deref(), Some("abc"));
        assert_eq!(record.text("zip_code").as_deref(), Some("94105"));
        assert_eq!(record.text("address2"), None);
        assert_eq!(record.text("missing"), None);
    }

    #[test]
    fn record_serializes_in_column_order() {
        let record: Record = [("z", json!(1)), ("a", json!("x"))].into_iter().collect();
        assert_eq!(serde_json::to_string(&record).unwrap(), r#"{"z":1,"a":"x"}"#);
    }

    #[test]
    fn serialized_size_matches_json_length() {
        let record: Record = [("source_id", json!("a"))].into_iter().collect();
        // [{"source_id":"a"}]
        assert_eq!(serialized_size(&[record]).unwrap(), 19);
        assert_eq!(serialized_size(&[]).unwrap(), 2);
    }
}
