//! StateStore: redb-backed object persistence for Stencil.
//!
//! Implements `ResourceStore` over a single table of JSON-serialized
//! objects. Every mutating call runs in one redb write transaction; redb
//! serializes write transactions, so the resource-version check in
//! `update` and the uid check in `delete` cannot race with another writer.
//! The store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::resource::{DynamicObject, ResourceStore};
use crate::tables::*;
use crate::types::{Preconditions, epoch_secs};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe object store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

fn encode(obj: &DynamicObject) -> StateResult<Vec<u8>> {
    serde_json::to_vec(obj).map_err(map_err!(Serialize))
}

fn decode(bytes: &[u8]) -> StateResult<DynamicObject> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Keys of every object owned (transitively) by `root_uid`.
fn dependents_of(all: &[(String, DynamicObject)], root_uid: &str) -> Vec<String> {
    let mut doomed: HashSet<&str> = HashSet::from([root_uid]);
    let mut removed: Vec<String> = Vec::new();
    loop {
        let next: Vec<&(String, DynamicObject)> = all
            .iter()
            .filter(|(key, obj)| {
                !removed.contains(key)
                    && obj
                        .metadata
                        .owner_references
                        .iter()
                        .any(|o| doomed.contains(o.uid.as_str()))
            })
            .collect();
        if next.is_empty() {
            return removed;
        }
        for (key, obj) in next {
            doomed.insert(obj.metadata.uid.as_str());
            removed.push(key.clone());
        }
    }
}

impl ResourceStore for StateStore {
    fn get(&self, kind: &str, namespace: &str, name: &str) -> StateResult<Option<DynamicObject>> {
        let key = object_key(kind, namespace, name);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn list(&self, kind: &str, namespace: Option<&str>) -> StateResult<Vec<DynamicObject>> {
        let prefix = kind_prefix(kind, namespace);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                results.push(decode(value.value())?);
            }
        }
        Ok(results)
    }

    fn create(&self, mut obj: DynamicObject) -> StateResult<DynamicObject> {
        if obj.kind.is_empty() || obj.metadata.name.is_empty() {
            return Err(StateError::Invalid(
                "kind and metadata.name are required".to_string(),
            ));
        }
        let key = object_key(&obj.kind, &obj.metadata.namespace, &obj.metadata.name);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(key));
            }
            // An owner deleted before this commit would never cascade to us.
            for owner in &obj.metadata.owner_references {
                let mut present = false;
                for scope in [obj.metadata.namespace.as_str(), ""] {
                    let owner_key = object_key(&owner.kind, scope, &owner.name);
                    if let Some(guard) = table.get(owner_key.as_str()).map_err(map_err!(Read))? {
                        present = decode(guard.value())?.metadata.uid == owner.uid;
                        break;
                    }
                }
                if !present {
                    return Err(StateError::NotFound(format!(
                        "{key}: owner {} {} ({}) does not exist",
                        owner.kind, owner.name, owner.uid
                    )));
                }
            }
            obj.metadata.uid = uuid::Uuid::new_v4().to_string();
            obj.metadata.resource_version = 1;
            obj.metadata.creation_timestamp = epoch_secs();
            let value = encode(&obj)?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, uid = %obj.metadata.uid, "object created");
        Ok(obj)
    }

    fn update(&self, mut obj: DynamicObject) -> StateResult<DynamicObject> {
        let key = object_key(&obj.kind, &obj.metadata.namespace, &obj.metadata.name);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
            let current = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => decode(guard.value())?,
                None => return Err(StateError::NotFound(key)),
            };
            if current.metadata.resource_version != obj.metadata.resource_version {
                return Err(StateError::Conflict(format!(
                    "{key}: resource version {} is stale (current {})",
                    obj.metadata.resource_version, current.metadata.resource_version
                )));
            }
            if !obj.metadata.uid.is_empty() && obj.metadata.uid != current.metadata.uid {
                return Err(StateError::Conflict(format!("{key}: uid changed")));
            }
            obj.metadata.uid = current.metadata.uid;
            obj.metadata.creation_timestamp = current.metadata.creation_timestamp;
            obj.metadata.resource_version = current.metadata.resource_version + 1;
            let value = encode(&obj)?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, version = obj.metadata.resource_version, "object updated");
        Ok(obj)
    }

    fn delete(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
        preconditions: &Preconditions,
    ) -> StateResult<bool> {
        let key = object_key(kind, namespace, name);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let dependents;
        {
            let mut table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
            let current = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => decode(guard.value())?,
                None => return Ok(false),
            };
            if let Some(uid) = &preconditions.uid {
                if *uid != current.metadata.uid {
                    return Err(StateError::PreconditionFailed(format!(
                        "{key}: expected uid {uid}, found {}",
                        current.metadata.uid
                    )));
                }
            }
            table.remove(key.as_str()).map_err(map_err!(Write))?;

            let mut all = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (k, value) = entry.map_err(map_err!(Read))?;
                all.push((k.value().to_string(), decode(value.value())?));
            }
            let doomed = dependents_of(&all, &current.metadata.uid);
            for dependent in &doomed {
                table.remove(dependent.as_str()).map_err(map_err!(Write))?;
                debug!(key = %dependent, owner = %current.metadata.uid, "dependent deleted");
            }
            dependents = doomed.len();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, dependents, "object deleted");
        Ok(true)
    }
}
