//! Typed value tree that path expressions are evaluated against.
//!
//! A `Document` is built from an object's wire JSON. Fields that carry
//! byte strings on the wire (base64 text) are decoded into `Bytes` so that
//! extraction can tell a byte string apart from an ordinary string.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use stencil_state::DynamicObject;

use crate::jsonpath::PathError;

#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Document>),
    Map(BTreeMap<String, Document>),
}

/// Top-level fields holding `key -> base64 bytes` maps, per kind.
fn byte_fields(kind: &str) -> &'static [&'static str] {
    match kind {
        "Secret" => &["data"],
        "ConfigMap" => &["binaryData"],
        _ => &[],
    }
}

impl Document {
    pub fn type_name(&self) -> &'static str {
        match self {
            Document::Null => "null",
            Document::Bool(_) => "bool",
            Document::Int(_) => "int",
            Document::Float(_) => "float",
            Document::String(_) => "string",
            Document::Bytes(_) => "bytes",
            Document::List(_) => "list",
            Document::Map(_) => "map",
        }
    }

    /// Build the document for a stored object from its wire form.
    pub fn from_object(obj: &DynamicObject) -> Result<Self, PathError> {
        let wire = obj
            .to_wire()
            .map_err(|e| PathError::Document(e.to_string()))?;
        let mut doc = Document::from(wire);

        if let Document::Map(fields) = &mut doc {
            for field in byte_fields(&obj.kind) {
                let Some(Document::Map(entries)) = fields.get_mut(*field) else {
                    continue;
                };
                for (key, value) in entries.iter_mut() {
                    if let Document::String(encoded) = value {
                        let bytes = STANDARD.decode(encoded.as_bytes()).map_err(|e| {
                            PathError::Document(format!("{field}[{key}] is not base64: {e}"))
                        })?;
                        *value = Document::Bytes(bytes);
                    }
                }
            }
        }
        Ok(doc)
    }
}

impl From<Value> for Document {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Document::Null,
            Value::Bool(b) => Document::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Document::Int(i),
                None => Document::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Document::String(s),
            Value::Array(items) => Document::List(items.into_iter().map(Document::from).collect()),
            Value::Object(map) => {
                Document::Map(map.into_iter().map(|(k, v)| (k, Document::from(v))).collect())
            }
        }
    }
}
