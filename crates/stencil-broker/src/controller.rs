//! Template instance controller.
//!
//! Instantiates pending `TemplateInstance`s: resolves parameters from the
//! instance's secret, substitutes `${NAME}` references in the template's
//! object manifests, creates the objects on behalf of the stored requester
//! and reports the outcome as a `Ready` or `InstantiateFailure` condition.
//! Produced objects are owned by the instance, so deleting the instance
//! removes them.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::{Captures, Regex};
use serde_json::Value;
use stencil_core::{BrokerConfig, UserInfo};
use stencil_state::{
    ConditionStatus, ConditionType, DynamicObject, ObjectReference, OwnerReference, ResourceStore,
    Secret, StateError, TemplateInstance, TemplateInstanceObject, TypedStore,
};
use tracing::{debug, error, info, warn};

use crate::annotations::INSTANCE_LABEL;
use crate::authz::{AuthorizationGate, ResourceAttributes, Verb, authorize};
use crate::error::{BrokerError, BrokerResult};
use crate::retry::{RetryPolicy, cas_update};

static PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("valid regex"));

/// Why an instantiation failed; becomes the `InstantiateFailure` message.
#[derive(Debug)]
struct Failure {
    reason: &'static str,
    message: String,
}

impl Failure {
    fn new(reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

enum Outcome {
    Ready(Vec<TemplateInstanceObject>),
    Failed(Failure),
}

#[derive(Clone)]
pub struct TemplateInstanceController {
    store: Arc<dyn ResourceStore>,
    gate: Arc<dyn AuthorizationGate>,
    retry: RetryPolicy,
    interval: Duration,
}

impl TemplateInstanceController {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        gate: Arc<dyn AuthorizationGate>,
        retry: RetryPolicy,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            gate,
            retry,
            interval,
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
            RetryPolicy::new(config.broker.retry_attempts),
            Duration::from_secs(config.controller.interval_secs),
        )
    }

    /// Process every instance that has no terminal condition yet. Returns
    /// how many reached one.
    pub fn reconcile_once(&self) -> BrokerResult<usize> {
        let pending: Vec<TemplateInstance> = self
            .store
            .list_typed::<TemplateInstance>(None)?
            .into_iter()
            .filter(|ti| {
                !ti.has_condition(ConditionType::Ready)
                    && !ti.has_condition(ConditionType::InstantiateFailure)
            })
            .collect();

        let mut settled = 0;
        for instance in &pending {
            let (ns, name) = (&instance.metadata.namespace, &instance.metadata.name);
            match self.reconcile(instance) {
                Ok(()) => settled += 1,
                // A missing owner makes the store refuse our children.
                Err(BrokerError::NotFound(_)) | Err(BrokerError::Store(StateError::NotFound(_))) => {
                    debug!(namespace = %ns, name = %name, "instance deleted while reconciling");
                }
                Err(e) => warn!(namespace = %ns, name = %name, error = %e, "reconcile failed, will retry"),
            }
        }
        Ok(settled)
    }

    fn reconcile(&self, instance: &TemplateInstance) -> BrokerResult<()> {
        let meta = &instance.metadata;
        let outcome = match self.instantiate(instance)? {
            Ok(objects) => Outcome::Ready(objects),
            Err(failure) => Outcome::Failed(failure),
        };

        cas_update::<TemplateInstance, _>(
            self.store.as_ref(),
            self.retry,
            &meta.namespace,
            &meta.name,
            |current| {
                if current.metadata.uid != meta.uid
                    || current.has_condition(ConditionType::Ready)
                    || current.has_condition(ConditionType::InstantiateFailure)
                {
                    return Ok(false);
                }
                match &outcome {
                    Outcome::Ready(objects) => {
                        current.status.objects = objects.clone();
                        current.set_condition(ConditionType::Ready, ConditionStatus::True, "Created", "");
                    }
                    Outcome::Failed(failure) => {
                        current.set_condition(
                            ConditionType::InstantiateFailure,
                            ConditionStatus::True,
                            failure.reason,
                            &failure.message,
                        );
                    }
                }
                Ok(true)
            },
        )?;

        match &outcome {
            Outcome::Ready(objects) => {
                info!(namespace = %meta.namespace, name = %meta.name, objects = objects.len(), "instantiated")
            }
            Outcome::Failed(failure) => {
                warn!(namespace = %meta.namespace, name = %meta.name, reason = failure.reason, message = %failure.message, "instantiation failed")
            }
        }
        Ok(())
    }

    /// Create the template's objects. The outer error is a store failure
    /// worth retrying; the inner one is a permanent instantiation failure.
    fn instantiate(
        &self,
        instance: &TemplateInstance,
    ) -> BrokerResult<Result<Vec<TemplateInstanceObject>, Failure>> {
        let meta = &instance.metadata;
        let Some(requester) = &instance.spec.requester else {
            return Ok(Err(Failure::new("MissingRequester", "instance has no requester")));
        };

        let values = match self.resolve_parameters(instance)? {
            Ok(values) => values,
            Err(failure) => return Ok(Err(failure)),
        };

        let mut produced = Vec::new();
        for (index, manifest) in instance.spec.template.objects.iter().enumerate() {
            let mut obj = match DynamicObject::from_manifest(substitute(manifest.clone(), &values)) {
                Ok(obj) => obj,
                Err(e) => {
                    return Ok(Err(Failure::new("InvalidObject", format!("object {index}: {e}"))));
                }
            };
            obj.metadata.namespace = meta.namespace.clone();
            obj.metadata.uid.clear();
            obj.metadata.resource_version = 0;
            obj.metadata.owner_references = vec![OwnerReference::to(instance)];
            obj.metadata
                .labels
                .insert(INSTANCE_LABEL.to_string(), meta.name.clone());

            match self.create_as(requester, obj)? {
                Ok(created) => produced.push(TemplateInstanceObject {
                    object_ref: ObjectReference {
                        kind: created.kind.clone(),
                        namespace: created.metadata.namespace.clone(),
                        name: created.metadata.name.clone(),
                        uid: Some(created.metadata.uid.clone()),
                    },
                }),
                Err(failure) => return Ok(Err(failure)),
            }
        }
        Ok(Ok(produced))
    }

    /// Create `obj` after authorizing the requester. An existing object that
    /// this instance already owns is reused.
    fn create_as(
        &self,
        requester: &UserInfo,
        obj: DynamicObject,
    ) -> BrokerResult<Result<DynamicObject, Failure>> {
        let attrs = ResourceAttributes::new(
            Verb::Create,
            &obj.kind,
            &obj.metadata.namespace,
            &obj.metadata.name,
        );
        if let Err(e) = authorize(self.gate.as_ref(), requester, &attrs) {
            return Ok(Err(Failure::new("Forbidden", e.to_string())));
        }

        let owner_uid = obj
            .metadata
            .owner_references
            .first()
            .map(|o| o.uid.clone())
            .unwrap_or_default();
        let (kind, ns, name) = (obj.kind.clone(), obj.metadata.namespace.clone(), obj.metadata.name.clone());
        match self.store.create(obj) {
            Ok(created) => {
                debug!(%kind, namespace = %ns, %name, "created object");
                Ok(Ok(created))
            }
            Err(e) if e.is_already_exists() => match self.store.get(&kind, &ns, &name)? {
                Some(existing) if existing.metadata.is_owned_by(&owner_uid) => Ok(Ok(existing)),
                _ => Ok(Err(Failure::new(
                    "AlreadyExists",
                    format!("{kind} {ns}/{name} already exists"),
                ))),
            },
            Err(e) => Err(e.into()),
        }
    }

    fn resolve_parameters(
        &self,
        instance: &TemplateInstance,
    ) -> BrokerResult<Result<BTreeMap<String, String>, Failure>> {
        let secret = match &instance.spec.secret {
            Some(reference) => {
                match self
                    .store
                    .get_typed::<Secret>(&instance.metadata.namespace, &reference.name)?
                {
                    Some(secret) => Some(secret),
                    None => {
                        return Ok(Err(Failure::new(
                            "MissingParameters",
                            format!("parameter secret {} not found", reference.name),
                        )));
                    }
                }
            }
            None => None,
        };

        let mut values = BTreeMap::new();
        for param in &instance.spec.template.parameters {
            let supplied = match &secret {
                Some(secret) if secret.data.contains_key(&param.name) => match secret.string(&param.name) {
                    Some(v) => Some(v.to_string()),
                    None => {
                        return Ok(Err(Failure::new(
                            "InvalidParameter",
                            format!("parameter {} is not valid UTF-8", param.name),
                        )));
                    }
                },
                _ => None,
            };
            let value = supplied.unwrap_or_else(|| param.value.clone());
            if value.is_empty() && param.required {
                return Ok(Err(Failure::new(
                    "MissingParameter",
                    format!("required parameter {} has no value", param.name),
                )));
            }
            values.insert(param.name.clone(), value);
        }
        Ok(Ok(values))
    }

    /// Reconcile on every tick until `shutdown` changes.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "template instance controller started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    match self.reconcile_once() {
                        Ok(0) => {}
                        Ok(settled) => debug!(settled, "controller pass complete"),
                        Err(e) => error!(error = %e, "controller pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("template instance controller shutting down");
                    break;
                }
            }
        }
    }
}

/// Replace `${NAME}` in every string of a manifest. Unknown names are left
/// as they are.
fn substitute(value: Value, params: &BTreeMap<String, String>) -> Value {
    match value {
        Value::String(s) => Value::String(
            PARAM_RE
                .replace_all(&s, |caps: &Captures| {
                    params
                        .get(&caps[1])
                        .cloned()
                        .unwrap_or_else(|| caps[0].to_string())
                })
                .into_owned(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| substitute(v, params)).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, substitute(v, params)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stencil_state::{
        LocalObjectReference, ObjectMeta, StateStore, Template, TemplateInstanceSpec,
        TemplateInstanceStatus, TemplateParameter,
    };

    use crate::authz::{AllowAll, DenyAll};

    fn setup(gate: Arc<dyn AuthorizationGate>, objects: Vec<Value>) -> (Arc<StateStore>, TemplateInstanceController) {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        store
            .create_typed(&Secret::from_strings(
                "ns",
                "i1",
                &BTreeMap::from([("USER".to_string(), "admin".to_string())]),
            ))
            .unwrap();
        store
            .create_typed(&TemplateInstance {
                metadata: ObjectMeta::named("ns", "i1"),
                spec: TemplateInstanceSpec {
                    template: Template {
                        metadata: ObjectMeta::named("stencil", "db"),
                        message: String::new(),
                        objects,
                        parameters: vec![
                            TemplateParameter {
                                name: "USER".to_string(),
                                required: true,
                                ..Default::default()
                            },
                            TemplateParameter {
                                name: "PORT".to_string(),
                                value: "5432".to_string(),
                                ..Default::default()
                            },
                        ],
                    },
                    secret: Some(LocalObjectReference {
                        name: "i1".to_string(),
                    }),
                    requester: Some(UserInfo::new("alice")),
                },
                status: TemplateInstanceStatus::default(),
            })
            .unwrap();
        let controller = TemplateInstanceController::new(
            store.clone(),
            gate,
            RetryPolicy::default(),
            Duration::from_millis(10),
        );
        (store, controller)
    }

    fn service_manifest() -> Value {
        json!({
            "kind": "Service",
            "metadata": {"name": "db-${USER}"},
            "spec": {"port": "${PORT}", "note": "${UNKNOWN}"}
        })
    }

    #[test]
    fn substitutes_known_parameters_only() {
        let params = BTreeMap::from([("A".to_string(), "1".to_string())]);
        let out = substitute(json!({"x": ["${A}-${B}", 3]}), &params);
        assert_eq!(out, json!({"x": ["1-${B}", 3]}));
    }

    #[test]
    fn instantiates_objects_and_sets_ready() {
        let (store, controller) = setup(Arc::new(AllowAll), vec![service_manifest()]);
        assert_eq!(controller.reconcile_once().unwrap(), 1);

        let ti: TemplateInstance = store.get_typed("ns", "i1").unwrap().unwrap();
        assert!(ti.has_condition(ConditionType::Ready));
        assert_eq!(ti.status.objects.len(), 1);

        let svc = store.get("Service", "ns", "db-admin").unwrap().unwrap();
        assert_eq!(svc.fields["spec"]["port"], "5432");
        assert_eq!(svc.fields["spec"]["note"], "${UNKNOWN}");
        assert!(svc.metadata.is_owned_by(&ti.metadata.uid));
        assert_eq!(svc.metadata.labels[INSTANCE_LABEL], "i1");
        assert_eq!(ti.status.objects[0].object_ref.uid.as_deref(), Some(svc.metadata.uid.as_str()));

        // Settled instances are not revisited.
        assert_eq!(controller.reconcile_once().unwrap(), 0);
    }

    #[test]
    fn denied_requester_fails_instantiation() {
        let (store, controller) = setup(Arc::new(DenyAll), vec![service_manifest()]);
        controller.reconcile_once().unwrap();

        let ti: TemplateInstance = store.get_typed("ns", "i1").unwrap().unwrap();
        let failure = ti.condition(ConditionType::InstantiateFailure).unwrap();
        assert_eq!(failure.status, ConditionStatus::True);
        assert_eq!(failure.reason, "Forbidden");
        assert!(store.get("Service", "ns", "db-admin").unwrap().is_none());
    }

    #[test]
    fn name_clash_with_foreign_object_fails() {
        let (store, controller) = setup(Arc::new(AllowAll), vec![service_manifest()]);
        store
            .create(DynamicObject::new("Service", ObjectMeta::named("ns", "db-admin")))
            .unwrap();
        controller.reconcile_once().unwrap();

        let ti: TemplateInstance = store.get_typed("ns", "i1").unwrap().unwrap();
        assert_eq!(
            ti.condition(ConditionType::InstantiateFailure).unwrap().reason,
            "AlreadyExists"
        );
    }

    #[test]
    fn invalid_manifest_fails() {
        let (store, controller) = setup(Arc::new(AllowAll), vec![json!({"kind": "Service"})]);
        controller.reconcile_once().unwrap();
        let ti: TemplateInstance = store.get_typed("ns", "i1").unwrap().unwrap();
        assert!(ti.has_condition(ConditionType::InstantiateFailure));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (store, controller) = setup(Arc::new(AllowAll), vec![service_manifest()]);
        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(async move { controller.run(rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let ti: TemplateInstance = store.get_typed("ns", "i1").unwrap().unwrap();
        assert!(ti.has_condition(ConditionType::Ready));
    }
}
