//! The broker engine: one module per OSB operation.
//!
//! Every operation is composed of individually idempotent steps against the
//! `ResourceStore`, each preceded by an authorization check for the calling
//! user. The cluster-scoped `BrokerTemplateInstance` named after the OSB
//! instance id is the idempotency anchor; all writes to it go through
//! `cas_update`.
//!
//! Naming: for instance id `i`, the anchor is `BrokerTemplateInstance //i`,
//! and the parameter `Secret` and `TemplateInstance` are both `<ns>/i`.

mod bind;
mod deprovision;
mod last_operation;
mod provision;
mod unbind;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use stencil_core::{BrokerConfig, UserInfo};
use stencil_state::{Resource, ResourceStore, TypedStore};
use tracing::debug;

use crate::authz::{AuthorizationGate, ResourceAttributes, Verb, authorize};
use crate::catalog::CatalogProjector;
use crate::credentials::Credentials;
use crate::error::{BrokerError, BrokerResult};
use crate::retry::RetryPolicy;

// ── Wire-level request/response types ──────────────────────────────

/// The asynchronous operation a caller polls with `last_operation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Provisioning,
    Deprovisioning,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Provisioning => "provisioning",
            Operation::Deprovisioning => "deprovisioning",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioning" => Ok(Operation::Provisioning),
            "deprovisioning" => Ok(Operation::Deprovisioning),
            other => Err(BrokerError::validation(format!("unknown operation {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub service_id: String,
    pub plan_id: String,
    /// Target namespace for the instance's objects.
    pub namespace: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionResponse {
    /// True when this call performed work the caller must poll for.
    pub async_op: bool,
    pub operation: Option<Operation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeprovisionResponse {
    /// Nothing to delete.
    Gone,
    Accepted { operation: Operation },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindRequest {
    pub service_id: String,
    pub plan_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindResponse {
    /// False when the binding already existed.
    pub created: bool,
    pub credentials: Credentials,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnbindResponse {
    Ok,
    Gone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationState::InProgress)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastOperationResponse {
    pub state: OperationState,
    pub description: Option<String>,
}

impl LastOperationResponse {
    fn state(state: OperationState) -> Self {
        Self {
            state,
            description: None,
        }
    }
}

// ── Engine ─────────────────────────────────────────────────────────

/// Implements the OSB operations over a store and an authorization gate.
#[derive(Clone)]
pub struct BrokerEngine {
    store: Arc<dyn ResourceStore>,
    gate: Arc<dyn AuthorizationGate>,
    catalog: CatalogProjector,
    retry: RetryPolicy,
}

impl fmt::Debug for BrokerEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerEngine")
            .field("gate", &self.gate)
            .field("catalog", &self.catalog)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl BrokerEngine {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        gate: Arc<dyn AuthorizationGate>,
        template_namespaces: Vec<String>,
        retry: RetryPolicy,
    ) -> Self {
        let catalog = CatalogProjector::new(store.clone(), template_namespaces);
        Self {
            store,
            gate,
            catalog,
            retry,
        }
    }

    pub fn from_config(
        config: &BrokerConfig,
        store: Arc<dyn ResourceStore>,
        gate: Arc<dyn AuthorizationGate>,
    ) -> Self {
        Self::new(
            store,
            gate,
            config.broker.template_namespaces.clone(),
            RetryPolicy::new(config.broker.retry_attempts),
        )
    }

    pub fn catalog(&self) -> &CatalogProjector {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    fn authorize(
        &self,
        actor: &UserInfo,
        verb: Verb,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> BrokerResult<()> {
        authorize(
            self.gate.as_ref(),
            actor,
            &ResourceAttributes::new(verb, kind, namespace, name),
        )
    }
}

// ── Shared step helpers ────────────────────────────────────────────

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9.]*[a-z0-9])?$").expect("valid regex"));

/// Instance ids and namespaces become object names, so they must be valid
/// DNS-1123 subdomains.
fn validate_name(what: &str, value: &str) -> BrokerResult<()> {
    if value.is_empty() {
        return Err(BrokerError::validation(format!("{what} is required")));
    }
    if value.len() > 253 || !NAME_RE.is_match(value) {
        return Err(BrokerError::validation(format!(
            "{what} {value:?} is not a valid lowercase DNS name"
        )));
    }
    Ok(())
}

fn require(what: &str, value: &str) -> BrokerResult<()> {
    if value.trim().is_empty() {
        return Err(BrokerError::validation(format!("{what} is required")));
    }
    Ok(())
}

fn require_actor(actor: &UserInfo) -> BrokerResult<()> {
    if actor.is_anonymous() {
        return Err(BrokerError::validation(
            "an originating identity is required for this operation",
        ));
    }
    Ok(())
}

/// Outcome of a create-or-reuse step.
enum Ensured<T> {
    Created(T),
    Existing(T),
}

/// Create `desired`; if the name is taken, run `authorize_get` and return
/// the stored object. The caller compares it to what it wanted.
fn create_or_get<T, F>(
    store: &dyn ResourceStore,
    desired: &T,
    authorize_get: F,
) -> BrokerResult<Ensured<T>>
where
    T: Resource,
    F: FnOnce() -> BrokerResult<()>,
{
    let meta = desired.metadata();
    match store.create_typed(desired) {
        Ok(created) => {
            debug!(kind = T::KIND, namespace = %meta.namespace, name = %meta.name, "created");
            Ok(Ensured::Created(created))
        }
        Err(e) if e.is_already_exists() => {
            authorize_get()?;
            let existing = store.get_typed::<T>(&meta.namespace, &meta.name)?.ok_or_else(|| {
                BrokerError::Inconsistent(format!(
                    "{} {}/{} reported as existing but could not be read",
                    T::KIND,
                    meta.namespace,
                    meta.name
                ))
            })?;
            debug!(kind = T::KIND, namespace = %meta.namespace, name = %meta.name, "already exists, reusing");
            Ok(Ensured::Existing(existing))
        }
        Err(e) => Err(e.into()),
    }
}
