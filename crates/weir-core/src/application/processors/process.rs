use crate::application::processor::{
    ContainerProcessor, ElementProcessor, StepServices, TerminateOutcome,
};
use crate::domain::context::{ElementContext, ElementIntent};
use crate::domain::graph::ExecutableNode;
use crate::error::{Failure, FailureKind, ProcessingError};

/// The process root
///
/// Owns the top-level scope of a process instance: it activates the none
/// start event, completes itself once the last execution path inside it
/// finishes, and, when it was created by a call activity, reports its
/// completion or termination back to the calling element in the parent
/// process instance.
pub struct ProcessProcessor;

impl ElementProcessor for ProcessProcessor {
    fn on_activate(
        &self,
        node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        // the start payload becomes the instance's root variable document
        if !context.variables.is_empty() {
            services.merge_scope_variables(
                context.element_instance_key,
                &context.variables,
                context,
            )?;
        }
        let graph = services.graph;
        let start = graph.start_event_of(&node.id).ok_or_else(|| {
            Failure::new(
                FailureKind::Configuration,
                format!("process '{}' has no none start event", node.id),
            )
        })?;
        services.activate_child(context, start);
        Ok(())
    }

    fn is_wait_state(&self, _node: &ExecutableNode) -> bool {
        true
    }

    fn finalize_completion(
        &self,
        node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        // snapshot the result document before the instance is removed
        let result_variables = services.state.variables(context.element_instance_key);
        services.transition_to_completed(node, context, &[])?;

        if context.parent_element_instance_key.is_set() {
            let mut completed = context.with_intent(ElementIntent::ElementCompleted);
            completed.variables = result_variables;
            services
                .with_container(node, &completed, |container, parent_node, parent_context, services| {
                    let satisfies = container.before_execution_path_completed(
                        parent_node,
                        parent_context,
                        &completed,
                        services,
                    )?;
                    container.after_execution_path_completed(
                        parent_node,
                        parent_context,
                        &completed,
                        satisfies,
                        services,
                    );
                    Ok::<(), ProcessingError>(())
                })?
                .transpose()?;
        }
        Ok(())
    }

    fn on_terminate(
        &self,
        _node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<TerminateOutcome, ProcessingError> {
        if services.terminate_child_instances(context) {
            Ok(TerminateOutcome::Done)
        } else {
            Ok(TerminateOutcome::Pending)
        }
    }
}

impl ContainerProcessor for ProcessProcessor {
    fn after_execution_path_completed(
        &self,
        _node: &ExecutableNode,
        scope_context: &ElementContext,
        _child_context: &ElementContext,
        _satisfies_completion_condition: bool,
        services: &mut StepServices<'_>,
    ) {
        let no_active_children = services
            .state
            .element_instance(scope_context.element_instance_key)
            .map(|instance| instance.active_children == 0)
            .unwrap_or(false);
        if no_active_children {
            services.complete_element(scope_context);
        }
    }

    fn on_child_terminated(
        &self,
        _node: &ExecutableNode,
        scope_context: &ElementContext,
        _child_context: &ElementContext,
        services: &mut StepServices<'_>,
    ) {
        services.handle_scope_after_child_terminated(scope_context);
    }
}
