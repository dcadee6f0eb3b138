//! stencil-state: versioned object store for the Stencil broker.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for the broker's records and for every object a template
//! instantiation produces.
//!
//! # Architecture
//!
//! Objects are stored as their JSON wire form in a single redb table keyed
//! `{kind}/{namespace}/{name}` (cluster-scoped kinds use an empty namespace).
//! Every object carries a store-assigned `uid` and a `resourceVersion`
//! token: `update` is a compare-and-swap on that token, `create` refuses
//! duplicates, and `delete` honours a uid precondition and cascades to
//! objects that list the deleted uid as an owner.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across threads and async tasks.

pub mod error;
pub mod resource;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use resource::{DynamicObject, Resource, ResourceStore, TypedStore};
pub use store::StateStore;
pub use types::*;
