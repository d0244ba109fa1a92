//! Projection of a structured record into one free-text address line.

use crate::record::{Record, SchemaMap};

/// Placeholder some upstream exports write for missing values.
const NAN_TOKEN: &str = "nan";

/// Concatenates the mapped fields in schema order, each followed by one space.
///
/// Null and missing fields are skipped. The result keeps its trailing space;
/// use [`address_text`] for the string sent to a service.
pub fn concat_fields(record: &Record, schema_map: &SchemaMap) -> String {
    let mut joined = String::new();
    for (_, field) in schema_map.iter() {
        if let Some(value) = record.text(field) {
            joined.push_str(&value);
            joined.push(' ');
        }
    }
    joined
}

/// The lookup text for a record: mapped fields joined by single spaces, with
/// whole `nan` tokens dropped and surrounding whitespace trimmed.
pub fn address_text(record: &Record, schema_map: &SchemaMap) -> String {
    concat_fields(record, schema_map)
        .split_whitespace()
        .filter(|token| !token.eq_ignore_ascii_case(NAN_TOKEN))
        .collect::<Vec<_>>()
        .join(" ")
}
