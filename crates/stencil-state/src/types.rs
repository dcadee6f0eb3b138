//! Domain types for the Stencil object store.
//!
//! These types represent the broker's own records (`BrokerTemplateInstance`,
//! `TemplateInstance`, parameter `Secret`s) and the catalog `Template`s.
//! All types serialize to the camelCase JSON wire form that credential path
//! expressions are evaluated against.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use stencil_core::UserInfo;

use crate::resource::Resource;

// ── Metadata ───────────────────────────────────────────────────────

/// Metadata shared by every stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    /// Empty for cluster-scoped kinds.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Assigned by the store on create.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    /// Version token; 0 until the object has been stored.
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    /// Unix timestamp (seconds), assigned by the store on create.
    #[serde(default)]
    pub creation_timestamp: u64,
}

impl ObjectMeta {
    pub fn named(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.owner_references.iter().any(|o| o.uid == uid)
    }
}

/// Link from a dependent object to the object that owns it.
///
/// Deleting the owner deletes the dependent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: String,
}

impl OwnerReference {
    pub fn to<T: Resource>(owner: &T) -> Self {
        Self {
            kind: T::KIND.to_string(),
            name: owner.metadata().name.clone(),
            uid: owner.metadata().uid.clone(),
        }
    }
}

/// Reference to a (possibly not yet created) object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReference {
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub name: String,
    /// Known once the referenced object exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl ObjectReference {
    pub fn new(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            uid: None,
        }
    }

    pub fn to<T: Resource>(obj: &T) -> Self {
        let meta = obj.metadata();
        Self {
            kind: T::KIND.to_string(),
            namespace: meta.namespace.clone(),
            name: meta.name.clone(),
            uid: Some(meta.uid.clone()).filter(|u| !u.is_empty()),
        }
    }

    /// Same kind, namespace and name, ignoring the uid.
    pub fn same_target(&self, other: &ObjectReference) -> bool {
        self.kind == other.kind && self.namespace == other.namespace && self.name == other.name
    }
}

/// Precondition checked by the store before a delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preconditions {
    pub uid: Option<String>,
}

impl Preconditions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn uid(uid: impl Into<String>) -> Self {
        Self {
            uid: Some(uid.into()),
        }
    }
}

// ── Broker instance record ─────────────────────────────────────────

/// Cluster-scoped record linking an OSB instance id to its namespaced
/// objects. The single idempotency anchor per instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerTemplateInstance {
    pub metadata: ObjectMeta,
    pub spec: BrokerTemplateInstanceSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerTemplateInstanceSpec {
    pub template_instance: ObjectReference,
    pub secret: ObjectReference,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binding_ids: Vec<String>,
}

// ── Template instance ──────────────────────────────────────────────

/// A template instantiated with a parameter secret on behalf of a requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateInstance {
    pub metadata: ObjectMeta,
    pub spec: TemplateInstanceSpec,
    #[serde(default)]
    pub status: TemplateInstanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateInstanceSpec {
    /// The template by value, frozen at provision time.
    pub template: Template,
    /// Name of the parameter secret in the same namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<UserInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalObjectReference {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateInstanceStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<TemplateInstanceCondition>,
    /// Objects produced by instantiation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<TemplateInstanceObject>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    Ready,
    InstantiateFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInstanceCondition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub last_transition_time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateInstanceObject {
    #[serde(rename = "ref")]
    pub object_ref: ObjectReference,
}

impl TemplateInstance {
    pub fn condition(&self, condition_type: ConditionType) -> Option<&TemplateInstanceCondition> {
        self.status
            .conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    pub fn has_condition(&self, condition_type: ConditionType) -> bool {
        self.condition(condition_type)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Set (or replace) a condition. The transition time only moves when
    /// the status changes.
    pub fn set_condition(
        &mut self,
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) {
        let now = epoch_secs();
        match self
            .status
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition_type)
        {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = now;
                }
                existing.status = status;
                existing.reason = reason.to_string();
                existing.message = message.to_string();
            }
            None => self.status.conditions.push(TemplateInstanceCondition {
                condition_type,
                status,
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: now,
            }),
        }
    }
}

// ── Template ───────────────────────────────────────────────────────

/// A catalog template: a parameterized list of object manifests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Raw object manifests; strings may contain `${PARAM}` references.
    #[serde(default)]
    pub objects: Vec<serde_json::Value>,
    #[serde(default)]
    pub parameters: Vec<TemplateParameter>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateParameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Default value.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default)]
    pub required: bool,
}

// ── Secret ─────────────────────────────────────────────────────────

/// Opaque key to byte-string map. `data` is base64 on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub metadata: ObjectMeta,
    #[serde(default, with = "bytes_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Secret {
    pub fn from_strings(namespace: &str, name: &str, values: &BTreeMap<String, String>) -> Self {
        Self {
            metadata: ObjectMeta::named(namespace, name),
            data: values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone().into_bytes()))
                .collect(),
        }
    }

    /// Value of a key as UTF-8 text, if present and valid.
    pub fn string(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .and_then(|v| std::str::from_utf8(v).ok())
    }
}

/// Serde adapter for `BTreeMap<String, Vec<u8>>` as a map of base64 strings.
pub mod bytes_map {
    use std::collections::BTreeMap;

    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(map.iter().map(|(k, v)| (k, STANDARD.encode(v))))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
        let encoded = BTreeMap::<String, String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|(k, v)| {
                STANDARD
                    .decode(v.as_bytes())
                    .map(|bytes| (k.clone(), bytes))
                    .map_err(|e| D::Error::custom(format!("data[{k}]: {e}")))
            })
            .collect()
    }
}

// ── Resource impls ─────────────────────────────────────────────────

macro_rules! impl_resource {
    ($ty:ty, $kind:literal, $namespaced:literal) => {
        impl Resource for $ty {
            const KIND: &'static str = $kind;
            const NAMESPACED: bool = $namespaced;

            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

impl_resource!(BrokerTemplateInstance, "BrokerTemplateInstance", false);
impl_resource!(TemplateInstance, "TemplateInstance", true);
impl_resource!(Template, "Template", true);
impl_resource!(Secret, "Secret", true);

/// Current Unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_data_is_base64_on_the_wire() {
        let mut secret = Secret::from_strings(
            "ns",
            "params",
            &BTreeMap::from([("user".to_string(), "admin".to_string())]),
        );
        secret.data.insert("raw".to_string(), vec![0xff, 0x00]);

        let wire = serde_json::to_value(&secret).unwrap();
        assert_eq!(wire["data"]["user"], "YWRtaW4=");
        assert_eq!(wire["data"]["raw"], "/wA=");

        let back: Secret = serde_json::from_value(wire).unwrap();
        assert_eq!(back, secret);
        assert_eq!(back.string("user"), Some("admin"));
        assert_eq!(back.string("raw"), None);
    }

    #[test]
    fn secret_rejects_invalid_base64() {
        let wire = serde_json::json!({
            "metadata": {"name": "s", "namespace": "ns"},
            "data": {"k": "%%%"}
        });
        assert!(serde_json::from_value::<Secret>(wire).is_err());
    }

    #[test]
    fn metadata_uses_camel_case() {
        let mut meta = ObjectMeta::named("ns", "obj");
        meta.resource_version = 3;
        meta.owner_references.push(OwnerReference {
            kind: "TemplateInstance".to_string(),
            name: "ti".to_string(),
            uid: "u1".to_string(),
        });
        let wire = serde_json::to_value(&meta).unwrap();
        assert_eq!(wire["resourceVersion"], 3);
        assert_eq!(wire["ownerReferences"][0]["uid"], "u1");
        assert!(meta.is_owned_by("u1"));
        assert!(!meta.is_owned_by("u2"));
    }

    #[test]
    fn set_condition_replaces_in_place() {
        let mut ti = TemplateInstance {
            metadata: ObjectMeta::named("ns", "i1"),
            spec: TemplateInstanceSpec {
                template: Template {
                    metadata: ObjectMeta::named("stencil", "t"),
                    message: String::new(),
                    objects: vec![],
                    parameters: vec![],
                },
                secret: None,
                requester: None,
            },
            status: TemplateInstanceStatus::default(),
        };
        assert!(!ti.has_condition(ConditionType::Ready));

        ti.set_condition(ConditionType::Ready, ConditionStatus::False, "Pending", "");
        ti.set_condition(ConditionType::Ready, ConditionStatus::True, "Created", "done");

        assert_eq!(ti.status.conditions.len(), 1);
        assert!(ti.has_condition(ConditionType::Ready));
        assert_eq!(ti.condition(ConditionType::Ready).unwrap().message, "done");
    }

    #[test]
    fn reference_target_ignores_uid() {
        let mut a = ObjectReference::new("Secret", "ns", "x");
        let b = ObjectReference::new("Secret", "ns", "x");
        a.uid = Some("u1".to_string());
        assert!(a.same_target(&b));
        assert!(!a.same_target(&ObjectReference::new("Secret", "other", "x")));
    }
}
