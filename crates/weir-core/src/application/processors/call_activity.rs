use crate::application::processor::{
    ContainerProcessor, ElementProcessor, StepServices, TerminateOutcome,
};
use crate::domain::context::{ElementContextBuilder, ElementIntent};
use crate::domain::context::ElementContext;
use crate::domain::graph::{ElementType, ExecutableNode};
use crate::error::{Failure, FailureKind, ProcessingError};

/// Call activities
///
/// Creates a child process instance of the called process and waits for it.
/// The called process has no flow scope of its own; it carries parent
/// pointers instead, and its root processor reports completion and
/// termination back through this container's hooks.
pub struct CallActivityProcessor;

impl ElementProcessor for CallActivityProcessor {
    fn on_activate(
        &self,
        node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        services.apply_input_mappings(node, context)?;

        let process_id_value = node.called_process_id.clone().ok_or_else(|| {
            Failure::new(
                FailureKind::Configuration,
                format!("call activity '{}' has no called process id", node.id),
            )
        })?;
        let scope = services
            .state
            .effective_variables(context.element_instance_key);
        let process_id = services.resolve_string(&process_id_value, &scope)?;

        let called_graph = services.graphs.graph_by_process_id(&process_id).ok_or_else(|| {
            Failure::new(
                FailureKind::CalledElement,
                format!(
                    "call activity '{}' references process '{process_id}', but no such process is deployed",
                    node.id
                ),
            )
        })?;

        let start_payload = if node.input_mappings.is_empty() {
            // without explicit mappings the child sees the caller's variables
            scope
        } else {
            services.state.variables(context.element_instance_key)
        };

        let command = ElementContextBuilder::new(
            called_graph.process_id.clone(),
            ElementType::Process,
            ElementIntent::ActivateElement,
        )
        .process_definition_key(called_graph.definition_key)
        .parent_process_instance_key(context.process_instance_key)
        .parent_element_instance_key(context.element_instance_key)
        .tenant_id(context.tenant_id.clone())
        .variables(start_payload)
        .build();
        services.output.push_command(command);
        Ok(())
    }

    fn is_wait_state(&self, _node: &ExecutableNode) -> bool {
        true
    }

    fn on_complete(
        &self,
        node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        services.apply_output_mappings(node, context)
    }

    fn on_terminate(
        &self,
        _node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<TerminateOutcome, ProcessingError> {
        match services
            .state
            .called_child_instance(context.element_instance_key)
        {
            Some(child) => {
                let child_context = services.context_for_instance(&child, &context.tenant_id);
                services.terminate_element(&child_context);
                Ok(TerminateOutcome::Pending)
            }
            None => Ok(TerminateOutcome::Done),
        }
    }
}

impl ContainerProcessor for CallActivityProcessor {
    fn before_execution_path_completed(
        &self,
        _node: &ExecutableNode,
        scope_context: &ElementContext,
        child_context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<bool, ProcessingError> {
        // the called process's result document becomes visible to the call
        // activity before it completes
        if !child_context.variables.is_empty() {
            services.merge_scope_variables(
                scope_context.element_instance_key,
                &child_context.variables,
                scope_context,
            )?;
        }
        Ok(false)
    }

    fn after_execution_path_completed(
        &self,
        _node: &ExecutableNode,
        scope_context: &ElementContext,
        _child_context: &ElementContext,
        _satisfies_completion_condition: bool,
        services: &mut StepServices<'_>,
    ) {
        services.complete_element(scope_context);
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
