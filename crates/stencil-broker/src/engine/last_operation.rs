use stencil_core::UserInfo;
use stencil_state::{BrokerTemplateInstance, ConditionType, Resource, TemplateInstance, TypedStore};

use super::{BrokerEngine, LastOperationResponse, Operation, OperationState, validate_name};
use crate::authz::Verb;
use crate::error::{BrokerError, BrokerResult};

impl BrokerEngine {
    /// Report progress of the operation started by provision or deprovision.
    /// Read-only; deprovisioning never reports `Failed`.
    pub fn last_operation(
        &self,
        actor: &UserInfo,
        instance_id: &str,
        operation: Operation,
    ) -> BrokerResult<LastOperationResponse> {
        validate_name("instance id", instance_id)?;

        match operation {
            Operation::Provisioning => self.provision_progress(actor, instance_id),
            Operation::Deprovisioning => {
                let Some(anchor) = self
                    .store
                    .get_typed::<BrokerTemplateInstance>("", instance_id)?
                else {
                    return Ok(LastOperationResponse::state(OperationState::Succeeded));
                };
                let reference = &anchor.spec.template_instance;
                self.authorize(actor, Verb::Get, TemplateInstance::KIND, &reference.namespace, &reference.name)?;
                Ok(LastOperationResponse::state(OperationState::InProgress))
            }
        }
    }

    fn provision_progress(&self, actor: &UserInfo, instance_id: &str) -> BrokerResult<LastOperationResponse> {
        let anchor = self
            .store
            .get_typed::<BrokerTemplateInstance>("", instance_id)?
            .ok_or_else(|| BrokerError::NotFound(format!("instance {instance_id}")))?;

        let reference = &anchor.spec.template_instance;
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

        if instance.has_condition(ConditionType::Ready) {
            return Ok(LastOperationResponse::state(OperationState::Succeeded));
        }
        if instance.has_condition(ConditionType::InstantiateFailure) {
            let message = instance
                .condition(ConditionType::InstantiateFailure)
                .map(|c| c.message.clone())
                .filter(|m| !m.is_empty());
            return Ok(LastOperationResponse {
                state: OperationState::Failed,
                description: message,
            });
        }
        Ok(LastOperationResponse::state(OperationState::InProgress))
    }
}
