//! Bounded compare-and-swap updates.
//!
//! `cas_update` re-reads an object, applies a mutation and writes it back
//! with the version token it read. A stale token makes the store reject
//! the write; the loop then starts over from a fresh read. The attempt
//! budget is fixed, and running out of it is reported as
//! `BrokerError::Concurrency`, never as a silently dropped change.

use stencil_state::{Resource, ResourceStore, TypedStore};
use tracing::{debug, warn};

use crate::error::{BrokerError, BrokerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }
}

/// Result of a `cas_update`.
#[derive(Debug, Clone)]
pub struct Updated<T> {
    /// The object as stored after the call.
    pub object: T,
    /// Whether a write happened.
    pub changed: bool,
}

/// Read-modify-write `namespace/name` under optimistic concurrency.
///
/// `mutate` returns `Ok(false)` when the object already has the desired
/// state; nothing is written in that case. Errors from `mutate` abort the
/// loop unchanged.
pub fn cas_update<T, F>(
    store: &dyn ResourceStore,
    policy: RetryPolicy,
    namespace: &str,
    name: &str,
    mut mutate: F,
) -> BrokerResult<Updated<T>>
where
    T: Resource,
    F: FnMut(&mut T) -> BrokerResult<bool>,
{
    let key = format!("{}/{}/{}", T::KIND, namespace, name);
    for attempt in 1..=policy.max_attempts {
        let mut object: T = store
            .get_typed(namespace, name)?
            .ok_or_else(|| BrokerError::NotFound(key.clone()))?;

        if !mutate(&mut object)? {
            return Ok(Updated {
                object,
                changed: false,
            });
        }

        match store.update_typed(&object) {
            Ok(stored) => {
                debug!(%key, attempt, "compare-and-swap update applied");
                return Ok(Updated {
                    object: stored,
                    changed: true,
                });
            }
            Err(e) if e.is_conflict() => {
                warn!(%key, attempt, max = policy.max_attempts, "update conflict, retrying");
            }
            Err(e) if e.is_not_found() => return Err(BrokerError::NotFound(key)),
            Err(e) => return Err(e.into()),
        }
    }
    Err(BrokerError::Concurrency {
        key,
        attempts: policy.max_attempts,
    })
}
