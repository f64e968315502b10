use crate::application::processor::{
    ContainerProcessor, ElementProcessor, StepServices, TerminateOutcome,
};
use crate::domain::context::ElementContext;
use crate::domain::graph::ExecutableNode;
use crate::error::{Failure, FailureKind, ProcessingError};

/// Embedded and event sub-processes
///
/// A nested scope that starts at its none start event and completes when
/// the last execution path inside it finishes. Terminating it tears down
/// its children first; the final step runs once the last child reports
/// back. Event sub-processes reuse the same machinery: by the time their
/// activate command is processed, the triggering event has already recorded
/// any interruption on the shared scope.
pub struct EmbeddedSubProcessProcessor;

impl ElementProcessor for EmbeddedSubProcessProcessor {
    fn on_activate(
        &self,
        node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        services.apply_input_mappings(node, context)?;
        let graph = services.graph;
        let start = graph.start_event_of(&node.id).ok_or_else(|| {
            Failure::new(
                FailureKind::Configuration,
                format!("sub-process '{}' has no none start event", node.id),
            )
        })?;
        services.activate_child(context, start);
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
        if services.terminate_child_instances(context) {
            Ok(TerminateOutcome::Done)
        } else {
            Ok(TerminateOutcome::Pending)
        }
    }
}

impl ContainerProcessor for EmbeddedSubProcessProcessor {
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

/// Ad-hoc sub-processes
///
/// No sequence flows lead into its activities; every entry-point child is
/// activated when the scope activates, and the scope completes when all of
/// them have finished.
pub struct AdHocSubProcessProcessor;

impl ElementProcessor for AdHocSubProcessProcessor {
    fn on_activate(
        &self,
        node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        services.apply_input_mappings(node, context)?;
        let graph = services.graph;
        let mut activated = 0;
        for child_id in &node.children {
            let child = graph.require_element(child_id)?;
            if child.incoming.is_empty() {
                services.activate_child(context, child);
                activated += 1;
            }
        }
        if activated == 0 {
            return Err(Failure::new(
                FailureKind::Configuration,
                format!("ad-hoc sub-process '{}' has no activities to activate", node.id),
            )
            .into());
        }
        Ok(())
    }

    fn is_wait_state(&self, _node: &ExecutableNode) -> bool {
        true
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

impl ContainerProcessor for AdHocSubProcessProcessor {
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
