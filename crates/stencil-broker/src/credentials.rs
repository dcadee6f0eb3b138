//! Annotation-driven credential extraction.
//!
//! An annotation `stencil.dev/expose-<key>: <path>` on an allow-listed
//! object contributes `<key>` to the bind credentials, with the value the
//! path selects from the object's wire form. The `base64-expose-` variant
//! emits the value base64-encoded.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use stencil_state::DynamicObject;
use thiserror::Error;
use tracing::debug;

use crate::annotations::{BASE64_EXPOSE_PREFIX, EXPOSE_PREFIX};
use crate::document::Document;
use crate::jsonpath::{PathError, PathExpression};

/// Kinds whose annotations may contribute credentials.
pub const CREDENTIAL_KINDS: &[&str] = &["Secret", "ConfigMap", "Service", "Route"];

pub type Credentials = BTreeMap<String, String>;

#[derive(Debug, Error, PartialEq)]
pub enum CredentialError {
    #[error("annotation {annotation:?} on {object} names an empty credential key")]
    EmptyKey { annotation: String, object: String },

    #[error("credential key {key:?} exposed more than once (again by {object})")]
    DuplicateKey { key: String, object: String },

    #[error("cannot read {object}: {source}")]
    Document {
        object: String,
        #[source]
        source: PathError,
    },

    #[error("annotation {annotation:?} on {object}: {source}")]
    Path {
        annotation: String,
        object: String,
        #[source]
        source: PathError,
    },
}

pub fn is_credential_kind(kind: &str) -> bool {
    CREDENTIAL_KINDS.contains(&kind)
}

enum Encoding {
    Plain,
    Base64,
}

/// Evaluate every expose annotation on `obj` and add the results to
/// `credentials`. A key that is already present is an error.
pub fn extract_into(obj: &DynamicObject, credentials: &mut Credentials) -> Result<(), CredentialError> {
    let object = format!("{} {}/{}", obj.kind, obj.metadata.namespace, obj.metadata.name);

    // BTreeMap iteration is sorted, so the first failure is deterministic.
    let exposed: Vec<_> = obj
        .metadata
        .annotations
        .iter()
        .filter_map(|(annotation, expr)| {
            if let Some(key) = annotation.strip_prefix(BASE64_EXPOSE_PREFIX) {
                Some((annotation, key, Encoding::Base64, expr))
            } else {
                annotation
                    .strip_prefix(EXPOSE_PREFIX)
                    .map(|key| (annotation, key, Encoding::Plain, expr))
            }
        })
        .collect();
    if exposed.is_empty() {
        return Ok(());
    }

    let document = Document::from_object(obj).map_err(|source| CredentialError::Document {
        object: object.clone(),
        source,
    })?;

    for (annotation, key, encoding, expr) in exposed {
        if key.is_empty() {
            return Err(CredentialError::EmptyKey {
                annotation: annotation.clone(),
                object,
            });
        }
        if credentials.contains_key(key) {
            return Err(CredentialError::DuplicateKey {
                key: key.to_string(),
                object,
            });
        }

        let value = PathExpression::parse(expr)
            .and_then(|path| path.evaluate(&document))
            .map_err(|source| CredentialError::Path {
                annotation: annotation.clone(),
                object: object.clone(),
                source,
            })?;

        let rendered = match encoding {
            Encoding::Plain => value.into_text(),
            Encoding::Base64 => STANDARD.encode(value.into_bytes()),
        };
        debug!(%object, %key, "exposed credential");
        credentials.insert(key.to_string(), rendered);
    }
    Ok(())
}
