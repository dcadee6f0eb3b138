//! The store interface and the generic object form it deals in.
//!
//! `ResourceStore` is object-safe and speaks `DynamicObject` (kind +
//! metadata + the remaining wire fields). `TypedStore` layers typed
//! get/create/update/delete over it for every `Resource`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{StateError, StateResult};
use crate::types::{ObjectMeta, Preconditions};

/// A typed object kind that can be stored.
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync {
    const KIND: &'static str;
    const NAMESPACED: bool;

    fn metadata(&self) -> &ObjectMeta;
    fn metadata_mut(&mut self) -> &mut ObjectMeta;
}

/// Any stored object in its wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicObject {
    pub kind: String,
    pub metadata: ObjectMeta,
    /// Every other top-level wire field (`spec`, `data`, `status`, ...).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl DynamicObject {
    pub fn new(kind: &str, metadata: ObjectMeta) -> Self {
        Self {
            kind: kind.to_string(),
            metadata,
            fields: Map::new(),
        }
    }

    /// Build from a raw manifest such as a template object.
    pub fn from_manifest(manifest: Value) -> StateResult<Self> {
        let obj: DynamicObject = serde_json::from_value(manifest)
            .map_err(|e| StateError::Invalid(format!("manifest: {e}")))?;
        if obj.kind.is_empty() || obj.metadata.name.is_empty() {
            return Err(StateError::Invalid(
                "manifest requires kind and metadata.name".to_string(),
            ));
        }
        Ok(obj)
    }

    pub fn from_resource<T: Resource>(resource: &T) -> StateResult<Self> {
        let mut value =
            serde_json::to_value(resource).map_err(|e| StateError::Serialize(e.to_string()))?;
        if let Value::Object(map) = &mut value {
            map.insert("kind".to_string(), Value::String(T::KIND.to_string()));
        }
        serde_json::from_value(value).map_err(|e| StateError::Serialize(e.to_string()))
    }

    pub fn into_resource<T: Resource>(self) -> StateResult<T> {
        if self.kind != T::KIND {
            return Err(StateError::Deserialize(format!(
                "expected kind {}, found {}",
                T::KIND,
                self.kind
            )));
        }
        let mut map = self.fields;
        let metadata =
            serde_json::to_value(self.metadata).map_err(|e| StateError::Serialize(e.to_string()))?;
        map.insert("metadata".to_string(), metadata);
        serde_json::from_value(Value::Object(map))
            .map_err(|e| StateError::Deserialize(e.to_string()))
    }

    /// The full wire representation, including `kind` and `metadata`.
    pub fn to_wire(&self) -> StateResult<Value> {
        serde_json::to_value(self).map_err(|e| StateError::Serialize(e.to_string()))
    }
}

/// Keyed object storage with optimistic concurrency.
pub trait ResourceStore: Send + Sync {
    /// Fetch an object; `None` when absent.
    fn get(&self, kind: &str, namespace: &str, name: &str) -> StateResult<Option<DynamicObject>>;

    /// List objects of a kind, optionally restricted to one namespace.
    fn list(&self, kind: &str, namespace: Option<&str>) -> StateResult<Vec<DynamicObject>>;

    /// Store a new object. Fails with `AlreadyExists` if the key is taken.
    fn create(&self, obj: DynamicObject) -> StateResult<DynamicObject>;

    /// Replace an object if its `resource_version` is current.
    /// Fails with `Conflict` when stale and `NotFound` when absent.
    fn update(&self, obj: DynamicObject) -> StateResult<DynamicObject>;

    /// Delete an object and its dependents. Returns false if it was absent.
    fn delete(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
        preconditions: &Preconditions,
    ) -> StateResult<bool>;
}

/// Typed convenience layer over any `ResourceStore`.
pub trait TypedStore: ResourceStore {
    fn get_typed<T: Resource>(&self, namespace: &str, name: &str) -> StateResult<Option<T>> {
        self.get(T::KIND, namespace, name)?
            .map(DynamicObject::into_resource)
            .transpose()
    }

    fn list_typed<T: Resource>(&self, namespace: Option<&str>) -> StateResult<Vec<T>> {
        self.list(T::KIND, namespace)?
            .into_iter()
            .map(DynamicObject::into_resource)
            .collect()
    }

    fn create_typed<T: Resource>(&self, resource: &T) -> StateResult<T> {
        self.create(DynamicObject::from_resource(resource)?)?
            .into_resource()
    }

    fn update_typed<T: Resource>(&self, resource: &T) -> StateResult<T> {
        self.update(DynamicObject::from_resource(resource)?)?
            .into_resource()
    }

    fn delete_typed<T: Resource>(
        &self,
        namespace: &str,
        name: &str,
        preconditions: &Preconditions,
    ) -> StateResult<bool> {
        self.delete(T::KIND, namespace, name, preconditions)
    }
}

impl<S: ResourceStore + ?Sized> TypedStore for S {}
