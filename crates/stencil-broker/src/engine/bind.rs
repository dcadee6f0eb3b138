use stencil_core::UserInfo;
use stencil_state::{BrokerTemplateInstance, Resource, TemplateInstance, TypedStore};
use tracing::{debug, info};

use super::{BindRequest, BindResponse, BrokerEngine, require, require_actor, validate_name};
use crate::authz::Verb;
use crate::catalog::is_bindable;
use crate::credentials::{Credentials, extract_into, is_credential_kind};
use crate::error::{BrokerError, BrokerResult};
use crate::retry::cas_update;

impl BrokerEngine {
    /// Gather credentials from the instance's produced objects and record
    /// `binding_id` on the anchor. `created` is false when the binding was
    /// already recorded.
    pub fn bind(
        &self,
        actor: &UserInfo,
        instance_id: &str,
        binding_id: &str,
        request: &BindRequest,
    ) -> BrokerResult<BindResponse> {
        validate_name("instance id", instance_id)?;
        require("binding id", binding_id)?;
        require("service_id", &request.service_id)?;
        require("plan_id", &request.plan_id)?;
        require_actor(actor)?;

        let (instance_ns, instance_name, instance) = self.load_instance(actor, instance_id)?;

        let template = &instance.spec.template;
        if request.service_id != template.metadata.uid {
            return Err(BrokerError::validation(format!(
                "service_id {:?} does not match instance {instance_id}",
                request.service_id
            )));
        }
        if !is_bindable(template) {
            return Err(BrokerError::validation(format!(
                "service of instance {instance_id} is not bindable"
            )));
        }

        let mut credentials = Credentials::new();
        for produced in &instance.status.objects {
            let reference = &produced.object_ref;
            if !is_credential_kind(&reference.kind) {
                continue;
            }
            self.authorize(actor, Verb::Get, &reference.kind, &reference.namespace, &reference.name)?;
            let obj = self
                .store
                .get(&reference.kind, &reference.namespace, &reference.name)?
                .ok_or_else(|| {
                    BrokerError::Inconsistent(format!(
                        "{} {}/{} recorded by the instance is missing",
                        reference.kind, reference.namespace, reference.name
                    ))
                })?;
            if let Some(uid) = &reference.uid
                && &obj.metadata.uid != uid
            {
                return Err(BrokerError::Inconsistent(format!(
                    "{} {}/{} was recreated after instantiation",
                    reference.kind, reference.namespace, reference.name
                )));
            }
            extract_into(&obj, &mut credentials)?;
        }

        self.authorize(actor, Verb::Update, TemplateInstance::KIND, &instance_ns, &instance_name)?;

        let updated = cas_update::<BrokerTemplateInstance, _>(
            self.store.as_ref(),
            self.retry,
            "",
            instance_id,
            |anchor| {
                if anchor.spec.binding_ids.iter().any(|b| b == binding_id) {
                    return Ok(false);
                }
                anchor.spec.binding_ids.push(binding_id.to_string());
                Ok(true)
            },
        )?;

        if updated.changed {
            info!(instance = instance_id, binding = binding_id, keys = credentials.len(), "bound");
        } else {
            debug!(instance = instance_id, binding = binding_id, "binding already recorded");
        }
        Ok(BindResponse {
            created: updated.changed,
            credentials,
        })
    }

    /// Load the anchor and its template instance for bind/unbind, checking
    /// that the instance is the one the anchor recorded.
    pub(super) fn load_instance(
        &self,
        actor: &UserInfo,
        instance_id: &str,
    ) -> BrokerResult<(String, String, TemplateInstance)> {
        let anchor = self
            .store
            .get_typed::<BrokerTemplateInstance>("", instance_id)?
            .ok_or_else(|| BrokerError::NotFound(format!("instance {instance_id}")))?;

        let reference = anchor.spec.template_instance;
        self.authorize(actor, Verb::Get, TemplateInstance::KIND, &reference.namespace, &reference.name)?;
        let instance = self
            .store
            .get_typed::<TemplateInstance>(&reference.namespace, &reference.name)?
            .ok_or_else(|| {
                BrokerError::NotFound(format!(
                    "{} {}/{}",
                    TemplateInstance::KIND,
                    reference.namespace,
                    reference.name
                ))
            })?;
        if let Some(uid) = &reference.uid
            && &instance.metadata.uid != uid
        {
            return Err(BrokerError::Inconsistent(format!(
                "template instance {}/{} does not belong to instance {instance_id}",
                reference.namespace, reference.name
            )));
        }
        Ok((reference.namespace, reference.name, instance))
    }
}
