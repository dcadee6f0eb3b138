use stencil_core::UserInfo;
use stencil_state::{
    BrokerTemplateInstance, ObjectReference, Preconditions, Resource, Secret, StateError,
    TemplateInstance, TypedStore,
};
use tracing::{debug, info, warn};

use super::{BrokerEngine, DeprovisionResponse, Operation, require_actor, validate_name};
use crate::authz::Verb;
use crate::error::{BrokerError, BrokerResult};

impl BrokerEngine {
    /// Delete the template instance, then the parameter secret, then the
    /// anchor record. An absent anchor means there is nothing left to do.
    ///
    /// Children go first so that an interrupted call leaves the anchor in
    /// place and a retry picks up where it stopped.
    pub fn deprovision(&self, actor: &UserInfo, instance_id: &str) -> BrokerResult<DeprovisionResponse> {
        validate_name("instance id", instance_id)?;
        require_actor(actor)?;

        let Some(anchor) = self
            .store
            .get_typed::<BrokerTemplateInstance>("", instance_id)?
        else {
            debug!(instance = instance_id, "deprovision: instance already gone");
            return Ok(DeprovisionResponse::Gone);
        };

        let instance_ref = &anchor.spec.template_instance;
        self.authorize(actor, Verb::Get, TemplateInstance::KIND, &instance_ref.namespace, &instance_ref.name)?;
        self.authorize(actor, Verb::Delete, TemplateInstance::KIND, &instance_ref.namespace, &instance_ref.name)?;
        self.delete_child(instance_ref)?;

        let secret_ref = &anchor.spec.secret;
        self.authorize(actor, Verb::Delete, Secret::KIND, &secret_ref.namespace, &secret_ref.name)?;
        self.delete_child(secret_ref)?;

        match self.store.delete_typed::<BrokerTemplateInstance>(
            "",
            instance_id,
            &Preconditions::uid(anchor.metadata.uid.clone()),
        ) {
            Ok(_) => {}
            Err(StateError::PreconditionFailed(msg)) => {
                return Err(BrokerError::Conflict(format!(
                    "instance {instance_id} was replaced during deprovisioning: {msg}"
                )));
            }
            Err(e) => return Err(e.into()),
        }

        info!(instance = instance_id, user = %actor.username, "deprovisioning started");
        Ok(DeprovisionResponse::Accepted {
            operation: Operation::Deprovisioning,
        })
    }

    /// Delete a recorded child, guarded by its recorded uid. A child that is
    /// already gone counts as deleted. A child replaced by an unrelated
    /// object of the same name is a conflict, and the anchor stays.
    fn delete_child(&self, reference: &ObjectReference) -> BrokerResult<()> {
        let preconditions = match &reference.uid {
            Some(uid) => Preconditions::uid(uid.clone()),
            None => Preconditions::none(),
        };
        match self
            .store
            .delete(&reference.kind, &reference.namespace, &reference.name, &preconditions)
        {
            Ok(true) => {
                debug!(kind = %reference.kind, namespace = %reference.namespace, name = %reference.name, "deleted");
                Ok(())
            }
            Ok(false) => {
                debug!(kind = %reference.kind, namespace = %reference.namespace, name = %reference.name, "already deleted");
                Ok(())
            }
            Err(StateError::PreconditionFailed(msg)) => {
                warn!(kind = %reference.kind, namespace = %reference.namespace, name = %reference.name, %msg, "object was replaced, keeping the instance record");
                Err(BrokerError::Conflict(format!(
                    "{} {}/{} is no longer the recorded object: {msg}",
                    reference.kind, reference.namespace, reference.name
                )))
            }
            Err(e) => Err(e.into()),
        }
    }
}
