//! Error taxonomy for broker operations.
//!
//! Callers only need the variant, never the underlying store text. The
//! "already done" and "already gone" outcomes are not errors; they are
//! carried in the operation responses.

use stencil_state::StateError;
use thiserror::Error;

use crate::credentials::CredentialError;

pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Malformed or missing request fields. Raised before any store access.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{user} is not allowed to {verb} {kind} {namespace}/{name}: {reason}")]
    Forbidden {
        user: String,
        verb: String,
        kind: String,
        namespace: String,
        name: String,
        reason: String,
    },

    /// A record that must exist for this call is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Existing state differs from what this call asked for.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The compare-and-swap budget ran out; the whole call may be retried.
    #[error("gave up updating {key} after {attempts} conflicting attempts")]
    Concurrency { key: String, attempts: u32 },

    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Stored objects disagree with each other (e.g. a recorded object was
    /// replaced under the same name).
    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    #[error("store error: {0}")]
    Store(#[from] StateError),
}

impl BrokerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        BrokerError::Validation(msg.into())
    }
}
