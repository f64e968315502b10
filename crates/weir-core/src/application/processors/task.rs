use crate::application::processor::{ElementProcessor, StepServices, TerminateOutcome};
use crate::domain::context::ElementContext;
use crate::domain::graph::ExecutableNode;
use crate::error::ProcessingError;

/// Tasks executed by external job workers
///
/// Activation applies input mappings and hands a job to a worker; the
/// element then rests in `Activated` until the job's completion command
/// arrives, carrying the worker's result variables as its payload.
pub struct JobWorkerTaskProcessor;

impl ElementProcessor for JobWorkerTaskProcessor {
    fn on_activate(
        &self,
        node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        services.apply_input_mappings(node, context)?;
        services.create_task_job(node, context)
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
        if !context.variables.is_empty() {
            services.merge_scope_variables(
                context.element_instance_key,
                &context.variables,
                context,
            )?;
        }
        if node.output_mappings.is_empty() {
            // without explicit mappings the job result is visible to the
            // surrounding scope as-is
            if !context.variables.is_empty() && context.flow_scope_key.is_set() {
                services.merge_scope_variables(
                    context.flow_scope_key,
                    &context.variables,
                    context,
                )?;
            }
            Ok(())
        } else {
            services.apply_output_mappings(node, context)
        }
    }

    fn on_terminate(
        &self,
        _node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<TerminateOutcome, ProcessingError> {
        services.cancel_job(context);
        Ok(TerminateOutcome::Done)
    }
}

/// Tasks with no worker behind them
///
/// Undefined and manual tasks only exist in the model; the engine passes
/// straight through them, still honoring listeners and mappings.
pub struct PassThroughTaskProcessor;

impl ElementProcessor for PassThroughTaskProcessor {
    fn on_activate(
        &self,
        node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        services.apply_input_mappings(node, context)
    }

    fn on_complete(
        &self,
        node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        services.apply_output_mappings(node, context)
    }
}
