use stencil_core::UserInfo;
use stencil_state::{BrokerTemplateInstance, Resource, TemplateInstance};
use tracing::{debug, info};

use super::{BrokerEngine, UnbindResponse, require, require_actor, validate_name};
use crate::authz::Verb;
use crate::catalog::is_bindable;
use crate::error::{BrokerError, BrokerResult};
use crate::retry::cas_update;

impl BrokerEngine {
    /// Remove `binding_id` from the anchor. `Gone` when it was not recorded.
    pub fn unbind(
        &self,
        actor: &UserInfo,
        instance_id: &str,
        binding_id: &str,
    ) -> BrokerResult<UnbindResponse> {
        validate_name("instance id", instance_id)?;
        require("binding id", binding_id)?;
        require_actor(actor)?;

        let (instance_ns, instance_name, instance) = self.load_instance(actor, instance_id)?;
        if !is_bindable(&instance.spec.template) {
            return Err(BrokerError::validation(format!(
                "service of instance {instance_id} is not bindable"
            )));
        }

        let updated = cas_update::<BrokerTemplateInstance, _>(
            self.store.as_ref(),
            self.retry,
            "",
            instance_id,
            |anchor| {
                let before = anchor.spec.binding_ids.len();
                anchor.spec.binding_ids.retain(|b| b != binding_id);
                if anchor.spec.binding_ids.len() == before {
                    return Ok(false);
                }
                self.authorize(actor, Verb::Update, TemplateInstance::KIND, &instance_ns, &instance_name)?;
                Ok(true)
            },
        )?;

        if updated.changed {
            info!(instance = instance_id, binding = binding_id, "unbound");
            Ok(UnbindResponse::Ok)
        } else {
            debug!(instance = instance_id, binding = binding_id, "binding already gone");
            Ok(UnbindResponse::Gone)
        }
    }
}
