use crate::application::processor::{
    ContainerProcessor, ElementProcessor, StepServices, TerminateOutcome,
};
use crate::domain::context::{ElementContext, ElementIntent};
use crate::domain::graph::{ExecutableNode, MultiInstanceProperties};
use crate::domain::instance::Lifecycle;
use crate::error::{Failure, FailureKind, ProcessingError};
use crate::types::{Key, Variables};
use serde_json::Value;

/// Multi-instance bodies
///
/// On activation the input collection is evaluated and one inner instance
/// is spawned per item, each carrying its item as the activation payload;
/// `on_child_activating` binds it into the child's own scope. After each
/// child completes, the completion condition decides whether the remaining
/// children are cut short.
pub struct MultiInstanceBodyProcessor;

impl ElementProcessor for MultiInstanceBodyProcessor {
    fn on_activate(
        &self,
        node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        let properties = Self::properties(node)?;
        let scope = services
            .state
            .effective_variables(context.element_instance_key);
        let collection = services
            .evaluator
            .evaluate(&properties.input_collection, &scope)?;
        let items = match collection {
            Value::Array(items) => items,
            other => {
                return Err(Failure::expression(format!(
                    "input collection '{}' of '{}' must evaluate to an array, got {other}",
                    properties.input_collection, node.id
                ))
                .into())
            }
        };

        if items.is_empty() {
            // nothing to iterate: the body completes as soon as it is active
            services.complete_element(context);
            return Ok(());
        }

        let graph = services.graph;
        let inner = graph.require_element(&properties.inner_element)?;
        for (index, item) in items.into_iter().enumerate() {
            let mut iteration = Variables::new();
            iteration.set(properties.input_element.clone(), item);
            iteration.set("loopCounter", Value::from(index as u64 + 1));

            let mut activate = context.copy(Key::UNSET, iteration, ElementIntent::ActivateElement);
            activate.flow_scope_key = context.element_instance_key;
            activate.element_id = inner.id.clone();
            activate.element_type = inner.element_type;
            services.output.push_command(activate);
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

impl ContainerProcessor for MultiInstanceBodyProcessor {
    fn on_child_activating(
        &self,
        _node: &ExecutableNode,
        _scope_context: &ElementContext,
        child_context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        // bind the iteration variables locally to the child instance
        if !child_context.variables.is_empty() {
            services.merge_scope_variables(
                child_context.element_instance_key,
                &child_context.variables,
                child_context,
            )?;
        }
        Ok(())
    }

    fn before_execution_path_completed(
        &self,
        node: &ExecutableNode,
        scope_context: &ElementContext,
        _child_context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<bool, ProcessingError> {
        let properties = Self::properties(node)?;
        match &properties.completion_condition {
            Some(condition) => {
                let scope = services
                    .state
                    .effective_variables(scope_context.element_instance_key);
                Ok(services.evaluator.evaluate_bool(condition, &scope)?)
            }
            None => Ok(false),
        }
    }

    fn after_execution_path_completed(
        &self,
        _node: &ExecutableNode,
        scope_context: &ElementContext,
        _child_context: &ElementContext,
        satisfies_completion_condition: bool,
        services: &mut StepServices<'_>,
    ) {
        if satisfies_completion_condition {
            services
                .state
                .set_completion_condition_met(scope_context.element_instance_key);
            if services.terminate_child_instances(scope_context) {
                services.complete_element(scope_context);
            }
            return;
        }
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
        // siblings cut short by a satisfied completion condition fold into
        // the body's own completion instead of a teardown
        if let Some(body) = services
            .state
            .element_instance(scope_context.element_instance_key)
        {
            if body.completion_condition_met
                && body.state != Lifecycle::Terminating
                && body.active_children == 0
            {
                services.complete_element(scope_context);
                return;
            }
        }
        services.handle_scope_after_child_terminated(scope_context);
    }
}

impl MultiInstanceBodyProcessor {
    fn properties(node: &ExecutableNode) -> Result<&MultiInstanceProperties, Failure> {
        node.multi_instance.as_ref().ok_or_else(|| {
            Failure::new(
                FailureKind::Configuration,
                format!("element '{}' has no multi-instance configuration", node.id),
            )
        })
    }
}
