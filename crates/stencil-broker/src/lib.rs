//! stencil-broker: the Open Service Broker reconciliation engine.
//!
//! Turns OSB `provision`/`bind`/`unbind`/`deprovision`/`last_operation`
//! calls into idempotent, authorization-checked writes against a
//! `ResourceStore`, and extracts bind-time credentials from annotated
//! objects with path expressions.
//!
//! # Components
//!
//! - **`engine`** - `BrokerEngine`, one module per OSB operation
//! - **`retry`** - bounded compare-and-swap update helper
//! - **`authz`** - `AuthorizationGate` and the rule-based gate
//! - **`document`** / **`jsonpath`** - path expressions over a typed value tree
//! - **`credentials`** - annotation-driven credential extraction
//! - **`catalog`** - OSB catalog projection from templates
//! - **`controller`** - instantiates templates and reports readiness
//! - **`poll`** - deadline-bounded `last_operation` polling

pub mod annotations;
pub mod authz;
pub mod catalog;
pub mod controller;
pub mod credentials;
pub mod document;
pub mod engine;
pub mod error;
pub mod jsonpath;
pub mod poll;
pub mod retry;

pub use authz::{AllowAll, AuthorizationGate, DenyAll, PolicyDecision, ResourceAttributes, RuleGate, Verb};
pub use catalog::{CatalogProjector, Plan, Service};
pub use controller::TemplateInstanceController;
pub use credentials::{CredentialError, Credentials};
pub use engine::{
    BindRequest, BindResponse, BrokerEngine, DeprovisionResponse, LastOperationResponse,
    Operation, OperationState, ProvisionRequest, ProvisionResponse, UnbindResponse,
};
pub use error::{BrokerError, BrokerResult};
pub use poll::{PollOutcome, poll_last_operation};
pub use retry::{RetryPolicy, Updated, cas_update};
