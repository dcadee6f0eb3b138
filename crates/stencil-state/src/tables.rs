//! redb table definitions for the Stencil object store.
//!
//! Keys are `&str`, values are `&[u8]` (JSON-serialized `DynamicObject`).

use redb::TableDefinition;

/// Every stored object keyed by `{kind}/{namespace}/{name}`.
pub const OBJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("objects");

/// Build the table key for an object.
pub fn object_key(kind: &str, namespace: &str, name: &str) -> String {
    format!("{kind}/{namespace}/{name}")
}

/// Key prefix covering every object of a kind, optionally within one namespace.
pub fn kind_prefix(kind: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("{kind}/{ns}/"),
        None => format!("{kind}/"),
    }
}
