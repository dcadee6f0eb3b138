use stencil_core::UserInfo;
use stencil_state::{
    BrokerTemplateInstance, BrokerTemplateInstanceSpec, LocalObjectReference, ObjectMeta,
    ObjectReference, OwnerReference, Resource, Secret, Template, TemplateInstance,
    TemplateInstanceSpec, TemplateInstanceStatus,
};
use tracing::{info, warn};

use super::{
    BrokerEngine, Ensured, Operation, ProvisionRequest, ProvisionResponse, create_or_get, require,
    require_actor, validate_name,
};
use crate::authz::Verb;
use crate::error::{BrokerError, BrokerResult};
use crate::retry::cas_update;

impl BrokerEngine {
    /// Create the anchor record, the parameter secret and the template
    /// instance for `instance_id`, then link their uids into the anchor.
    ///
    /// Safe to repeat: each step reuses an existing object whose content
    /// matches and fails with `Conflict` when it does not. The response is
    /// asynchronous iff this call wrote anything.
    pub fn provision(
        &self,
        actor: &UserInfo,
        instance_id: &str,
        request: &ProvisionRequest,
    ) -> BrokerResult<ProvisionResponse> {
        validate_name("instance id", instance_id)?;
        require("service_id", &request.service_id)?;
        require("plan_id", &request.plan_id)?;
        validate_name("namespace", &request.namespace)?;
        require_actor(actor)?;

        let template = self.resolve_plan(&request.service_id, &request.plan_id)?;
        let namespace = request.namespace.as_str();
        let mut wrote = false;

        // Step 1: the anchor record.
        self.authorize(actor, Verb::Create, TemplateInstance::KIND, namespace, instance_id)?;
        let desired_anchor = BrokerTemplateInstance {
            metadata: ObjectMeta::named("", instance_id),
            spec: BrokerTemplateInstanceSpec {
                template_instance: ObjectReference::new(TemplateInstance::KIND, namespace, instance_id),
                secret: ObjectReference::new(Secret::KIND, namespace, instance_id),
                binding_ids: Vec::new(),
            },
        };
        let anchor = match create_or_get(self.store.as_ref(), &desired_anchor, || Ok(()))? {
            Ensured::Created(anchor) => {
                wrote = true;
                anchor
            }
            Ensured::Existing(anchor) => {
                if !anchor.spec.template_instance.same_target(&desired_anchor.spec.template_instance)
                    || !anchor.spec.secret.same_target(&desired_anchor.spec.secret)
                {
                    return Err(BrokerError::Conflict(format!(
                        "instance {instance_id} already exists with different parameters"
                    )));
                }
                anchor
            }
        };

        // Step 2: the parameter secret, owned by the anchor.
        self.authorize(actor, Verb::Create, Secret::KIND, namespace, instance_id)?;
        let mut desired_secret = Secret::from_strings(namespace, instance_id, &request.parameters);
        desired_secret
            .metadata
            .owner_references
            .push(OwnerReference::to(&anchor));
        let secret = match create_or_get(self.store.as_ref(), &desired_secret, || {
            self.authorize(actor, Verb::Get, Secret::KIND, namespace, instance_id)
        })? {
            Ensured::Created(secret) => {
                wrote = true;
                secret
            }
            Ensured::Existing(secret) => {
                if secret.data != desired_secret.data {
                    return Err(BrokerError::Conflict(format!(
                        "parameters of instance {instance_id} differ from the existing ones"
                    )));
                }
                secret
            }
        };

        // Step 3: the template instance.
        self.authorize(actor, Verb::Create, TemplateInstance::KIND, namespace, instance_id)?;
        let mut desired_instance = TemplateInstance {
            metadata: ObjectMeta::named(namespace, instance_id),
            spec: TemplateInstanceSpec {
                template,
                secret: Some(LocalObjectReference {
                    name: secret.metadata.name.clone(),
                }),
                requester: Some(actor.clone()),
            },
            status: TemplateInstanceStatus::default(),
        };
        desired_instance
            .metadata
            .owner_references
            .push(OwnerReference::to(&anchor));
        let instance = match create_or_get(self.store.as_ref(), &desired_instance, || {
            self.authorize(actor, Verb::Get, TemplateInstance::KIND, namespace, instance_id)
        })? {
            Ensured::Created(instance) => {
                wrote = true;
                instance
            }
            Ensured::Existing(instance) => {
                if instance.spec != desired_instance.spec {
                    return Err(BrokerError::Conflict(format!(
                        "instance {instance_id} was provisioned with a different template or requester"
                    )));
                }
                instance
            }
        };

        // Step 4: record the child uids in the anchor.
        let secret_uid = secret.metadata.uid;
        let instance_uid = instance.metadata.uid;
        let linked = cas_update::<BrokerTemplateInstance, _>(
            self.store.as_ref(),
            self.retry,
            "",
            instance_id,
            |anchor| {
                let spec = &mut anchor.spec;
                if !spec.template_instance.same_target(&desired_anchor.spec.template_instance)
                    || !spec.secret.same_target(&desired_anchor.spec.secret)
                {
                    return Err(BrokerError::Conflict(format!(
                        "instance {instance_id} was replaced during provisioning"
                    )));
                }
                let mut changed = false;
                if spec.secret.uid.as_deref() != Some(secret_uid.as_str()) {
                    spec.secret.uid = Some(secret_uid.clone());
                    changed = true;
                }
                if spec.template_instance.uid.as_deref() != Some(instance_uid.as_str()) {
                    spec.template_instance.uid = Some(instance_uid.clone());
                    changed = true;
                }
                Ok(changed)
            },
        )?;
        wrote |= linked.changed;

        if wrote {
            info!(instance = instance_id, %namespace, user = %actor.username, "provisioning started");
            Ok(ProvisionResponse {
                async_op: true,
                operation: Some(Operation::Provisioning),
            })
        } else {
            info!(instance = instance_id, %namespace, "already provisioned");
            Ok(ProvisionResponse {
                async_op: false,
                operation: None,
            })
        }
    }

    fn resolve_plan(&self, service_id: &str, plan_id: &str) -> BrokerResult<Template> {
        let template = self
            .catalog
            .find_template(service_id)?
            .ok_or_else(|| BrokerError::validation(format!("unknown service_id {service_id:?}")))?;
        if plan_id != template.metadata.uid {
            warn!(%service_id, %plan_id, "plan does not belong to service");
            return Err(BrokerError::validation(format!(
                "plan_id {plan_id:?} is not a plan of service {service_id:?}"
            )));
        }
        Ok(template)
    }
}
