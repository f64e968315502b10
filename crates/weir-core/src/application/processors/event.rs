use crate::application::processor::{ElementProcessor, StepServices, TerminateOutcome};
use crate::domain::context::ElementContext;
use crate::domain::graph::{ElementType, ExecutableNode};
use crate::error::ProcessingError;
use tracing::debug;

/// Start, end, throw, catch, and boundary events
///
/// Throw-side events pass straight through. Catch events open an event
/// subscription and wait; the triggering command arrives later as a
/// completion. A boundary event's activation IS its trigger: by the time
/// the activate command is processed, the external event already occurred,
/// so an interrupting boundary records the interruption on its scope and
/// tears down the activity it is attached to.
pub struct EventProcessor;

impl ElementProcessor for EventProcessor {
    fn on_activate(
        &self,
        node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        match node.element_type {
            ElementType::IntermediateCatchEvent => {
                services.open_subscription(context);
                Ok(())
            }
            ElementType::BoundaryEvent => {
                if node.interrupting {
                    services
                        .state
                        .set_interrupted(context.flow_scope_key, &context.element_id);
                }
                if let Some(attached_to) = &node.attached_to {
                    self.terminate_attached_activity(attached_to, context, services);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn is_wait_state(&self, node: &ExecutableNode) -> bool {
        node.element_type == ElementType::IntermediateCatchEvent
    }

    fn on_complete(
        &self,
        node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        if node.element_type == ElementType::IntermediateCatchEvent {
            services.close_subscription(context);
        }
        Ok(())
    }

    fn on_terminate(
        &self,
        node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<TerminateOutcome, ProcessingError> {
        if node.element_type == ElementType::IntermediateCatchEvent {
            services.close_subscription(context);
        }
        Ok(TerminateOutcome::Done)
    }
}

impl EventProcessor {
    fn terminate_attached_activity(
        &self,
        attached_to: &str,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) {
        let attached = services
            .state
            .active_siblings(context.flow_scope_key)
            .into_iter()
            .find(|sibling| sibling.element_id == attached_to);
        match attached {
            Some(instance) => {
                let attached_context = services.context_for_instance(&instance, &context.tenant_id);
                services.terminate_element(&attached_context);
            }
            None => {
                // the activity finished before the boundary trigger landed
                debug!(element = attached_to, "attached activity no longer active");
            }
        }
    }
}
