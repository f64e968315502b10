//! Shared transition behavior
//!
//! The lifecycle mechanics every processor needs: moving an instance
//! between states, handing tokens to sequence flows, spawning and tearing
//! down children, and routing path-completion and termination back to the
//! enclosing container's hooks. Implemented as inherent methods on
//! [`StepServices`] so processors get them wherever they already hold the
//! services handle.

use crate::application::output::{FollowUpRecord, JobKind, JobSpec};
use crate::application::processor::{ContainerProcessor, StepServices};
use crate::domain::context::{ElementContext, ElementIntent};
use crate::domain::graph::{
    ElementType, ExecutableNode, ExpressionValue, JobWorkerProperties, ListenerPhase, SequenceFlow,
};
use crate::domain::incident::Incident;
use crate::domain::instance::{ElementInstance, Lifecycle};
use crate::error::{EngineError, Failure, FailureKind, ProcessingError};
use crate::types::{Key, Variables};
use serde_json::Value;
use tracing::debug;

impl<'a> StepServices<'a> {
    /// Move a command context into `Activating`.
    ///
    /// When the instance already exists the activate command is being
    /// replayed after incident resolution; no state changes, the context
    /// just catches up. Otherwise the instance is created, counted on its
    /// parent, and for joining gateways the taken-flow records that
    /// justified the activation are consumed.
    ///
    /// Returns the transitioned context and whether the instance is new.
    pub fn transition_to_activating(
        &mut self,
        node: &ExecutableNode,
        context: &ElementContext,
    ) -> (ElementContext, bool) {
        if context.element_instance_key.is_set() {
            if let Some(existing) = self.state.element_instance(context.element_instance_key) {
                debug!(key = %existing.key, element = %context.element_id, "re-entering activation");
                let mut caught_up = context.copy(
                    existing.key,
                    context.variables.clone(),
                    ElementIntent::ElementActivating,
                );
                caught_up.process_instance_key = existing.process_instance_key;
                return (caught_up, false);
            }
        }

        let key = if context.element_instance_key.is_set() {
            context.element_instance_key
        } else {
            self.keys.next_key()
        };
        let process_instance_key = if node.element_type == ElementType::Process {
            // a process instance is identified by its root element instance
            key
        } else {
            context.process_instance_key
        };

        let mut instance = ElementInstance::new(
            key,
            &context.element_id,
            context.element_type,
            context.flow_scope_key,
            process_instance_key,
            context.process_definition_key,
        );
        instance.parent_element_instance_key = context.parent_element_instance_key;
        self.state.create_instance(instance);

        if context.flow_scope_key.is_set() {
            self.state.increment_active_children(context.flow_scope_key);
        }
        if node.element_type.is_joining_gateway() {
            self.state
                .consume_taken_sequence_flows(context.flow_scope_key, &node.id);
        }

        self.output
            .push_event(key, ElementIntent::ElementActivating, &context.element_id);

        let mut transitioned = context.copy(
            key,
            context.variables.clone(),
            ElementIntent::ElementActivating,
        );
        transitioned.process_instance_key = process_instance_key;
        (transitioned, true)
    }

    /// Mark the element fully `Activated` and reset the listener cursor for
    /// the next phase.
    pub fn transition_to_activated(&mut self, context: &ElementContext) -> ElementContext {
        let key = context.element_instance_key;
        self.state.set_state(key, Lifecycle::Activated);
        self.state.reset_listener_cursor(key);
        self.output
            .push_event(key, ElementIntent::ElementActivated, &context.element_id);
        context.with_intent(ElementIntent::ElementActivated)
    }

    /// Move an element into `Completing`. An instance already in
    /// `Completing` is an incident-resolution replay and transitions only
    /// the context.
    pub fn transition_to_completing(&mut self, context: &ElementContext) -> ElementContext {
        let key = context.element_instance_key;
        if let Some(instance) = self.state.element_instance(key) {
            if instance.state == Lifecycle::Completing {
                debug!(key = %key, element = %context.element_id, "re-entering completion");
                return context.with_intent(ElementIntent::ElementCompleting);
            }
        }
        self.state.set_state(key, Lifecycle::Completing);
        self.state.reset_listener_cursor(key);
        self.output
            .push_event(key, ElementIntent::ElementCompleting, &context.element_id);
        context.with_intent(ElementIntent::ElementCompleting)
    }

    /// Finish completion: remove the instance, hand the token to the given
    /// flows, and when this was the last element of an execution path, run
    /// the container's path-completed hooks around the removal.
    pub fn transition_to_completed(
        &mut self,
        node: &ExecutableNode,
        context: &ElementContext,
        flows: &[&SequenceFlow],
    ) -> Result<(), ProcessingError> {
        // a completing process root is reported to its call activity by the
        // process processor, not by the generic path bookkeeping
        let end_of_path = flows.is_empty() && node.element_type != ElementType::Process;

        let satisfies_completion_condition = if end_of_path {
            self.with_container(node, context, |processor, scope_node, scope_context, services| {
                processor.before_execution_path_completed(scope_node, scope_context, context, services)
            })?
            .transpose()?
            .unwrap_or(false)
        } else {
            false
        };

        let key = context.element_instance_key;

        // an interrupting event's path continues past it; once the event
        // itself completes, the scope stops holding its siblings back
        if context.flow_scope_key.is_set() {
            if let Some(scope) = self.state.element_instance(context.flow_scope_key) {
                if scope.interrupted_by.as_deref() == Some(context.element_id.as_str()) {
                    self.state.clear_interrupted(scope.key);
                }
            }
        }

        self.output
            .push_event(key, ElementIntent::ElementCompleted, &context.element_id);
        self.state.remove_instance(key);
        if context.flow_scope_key.is_set() {
            self.state.decrement_active_children(context.flow_scope_key);
        }

        let completed = context.with_intent(ElementIntent::ElementCompleted);
        for flow in flows {
            self.take_sequence_flow(&completed, flow)?;
        }

        if end_of_path {
            self.with_container(node, &completed, |processor, scope_node, scope_context, services| {
                processor.after_execution_path_completed(
                    scope_node,
                    scope_context,
                    &completed,
                    satisfies_completion_condition,
                    services,
                );
            })?;
        }
        Ok(())
    }

    /// Move an element into `Terminating`
    pub fn transition_to_terminating(&mut self, context: &ElementContext) -> ElementContext {
        let key = context.element_instance_key;
        self.state.set_state(key, Lifecycle::Terminating);
        self.output
            .push_event(key, ElementIntent::ElementTerminating, &context.element_id);
        context.with_intent(ElementIntent::ElementTerminating)
    }

    /// Finish termination: remove the instance and notify the enclosing
    /// container
    pub fn transition_to_terminated(
        &mut self,
        node: &ExecutableNode,
        context: &ElementContext,
    ) -> Result<(), ProcessingError> {
        let key = context.element_instance_key;
        self.output
            .push_event(key, ElementIntent::ElementTerminated, &context.element_id);
        self.state.remove_instance(key);
        if context.flow_scope_key.is_set() {
            self.state.decrement_active_children(context.flow_scope_key);
        }

        let terminated = context.with_intent(ElementIntent::ElementTerminated);
        self.with_container(node, &terminated, |processor, scope_node, scope_context, services| {
            processor.on_child_terminated(scope_node, scope_context, &terminated, services);
        })?;
        Ok(())
    }

    /// Put a token on a sequence flow and request activation of its target
    /// in the same flow scope
    pub fn take_sequence_flow(
        &mut self,
        context: &ElementContext,
        flow: &SequenceFlow,
    ) -> Result<(), ProcessingError> {
        let graph = self.graph;
        let target = graph.require_element(&flow.target)?;

        let flow_key = self.keys.next_key();
        self.output
            .push_event(flow_key, ElementIntent::SequenceFlowTaken, &flow.id);
        self.state
            .record_taken_sequence_flow(context.flow_scope_key, &target.id, &flow.id);

        let mut activate = context.copy(Key::UNSET, Variables::new(), ElementIntent::ActivateElement);
        activate.element_id = target.id.clone();
        activate.element_type = target.element_type;
        self.output.push_command(activate);
        Ok(())
    }

    /// Request activation of a direct child of the given container context
    pub fn activate_child(&mut self, scope_context: &ElementContext, child: &ExecutableNode) {
        let mut activate =
            scope_context.copy(Key::UNSET, Variables::new(), ElementIntent::ActivateElement);
        activate.flow_scope_key = scope_context.element_instance_key;
        activate.element_id = child.id.clone();
        activate.element_type = child.element_type;
        self.output.push_command(activate);
    }

    /// Request completion of the given element in a later cycle
    pub fn complete_element(&mut self, context: &ElementContext) {
        self.output.push_command(context.copy(
            context.element_instance_key,
            Variables::new(),
            ElementIntent::CompleteElement,
        ));
    }

    /// Request termination of the given element in a later cycle
    pub fn terminate_element(&mut self, context: &ElementContext) {
        self.output.push_command(context.copy(
            context.element_instance_key,
            Variables::new(),
            ElementIntent::TerminateElement,
        ));
    }

    /// Request the final termination step of a container whose children are
    /// done
    pub fn continue_terminating(&mut self, context: &ElementContext) {
        self.output.push_command(context.copy(
            context.element_instance_key,
            Variables::new(),
            ElementIntent::ContinueTerminating,
        ));
    }

    /// Terminate all active children of a scope. Returns `true` when there
    /// was nothing to terminate.
    pub fn terminate_child_instances(&mut self, scope_context: &ElementContext) -> bool {
        let children = self
            .state
            .active_siblings(scope_context.element_instance_key);
        if children.is_empty() {
            return true;
        }
        for child in children {
            let child_context = self.context_for_instance(&child, &scope_context.tenant_id);
            self.terminate_element(&child_context);
        }
        false
    }

    /// Default container reaction to a terminated child: once no active
    /// children remain, either finish the container's own pending
    /// termination or activate a recorded interrupting path.
    pub fn handle_scope_after_child_terminated(&mut self, scope_context: &ElementContext) {
        let Some(scope) = self
            .state
            .element_instance(scope_context.element_instance_key)
        else {
            return;
        };
        if scope.active_children > 0 {
            return;
        }
        if scope.state == Lifecycle::Terminating {
            self.continue_terminating(scope_context);
            return;
        }
        if let Some(interrupting_id) = scope.interrupted_by.clone() {
            self.state.clear_interrupted(scope.key);
            let graph = self.graph;
            if let Ok(interrupting) = graph.require_element(&interrupting_id) {
                debug!(scope = %scope.element_id, element = %interrupting_id, "activating interrupting path");
                self.activate_child(scope_context, interrupting);
            }
        }
    }

    /// Rebuild a context from a persisted instance, e.g. to address a
    /// sibling or a parent
    pub fn context_for_instance(
        &self,
        instance: &ElementInstance,
        tenant_id: &str,
    ) -> ElementContext {
        ElementContext::for_instance(instance, tenant_id)
    }

    /// Resolve the container responsible for a child and run `f` against
    /// it. The container is the flow scope when there is one, or the
    /// calling activity in the parent process instance for a called
    /// process root. Returns `None` when the child has neither.
    pub fn with_container<R, F>(
        &mut self,
        child_node: &ExecutableNode,
        child_context: &ElementContext,
        f: F,
    ) -> Result<Option<R>, EngineError>
    where
        F: FnOnce(&dyn ContainerProcessor, &ExecutableNode, &ElementContext, &mut StepServices<'a>) -> R,
    {
        let registry = self.registry;
        let graph = self.graph;

        if let Some(scope_id) = &child_node.flow_scope {
            if !child_context.flow_scope_key.is_set() {
                return Ok(None);
            }
            let Some(scope_instance) = self.state.element_instance(child_context.flow_scope_key)
            else {
                return Ok(None);
            };
            let scope_node = graph.require_element(scope_id)?;
            let processor = registry.get_container_processor(scope_node.element_type)?;
            let scope_context = self.context_for_instance(&scope_instance, &child_context.tenant_id);
            return Ok(Some(f(processor, scope_node, &scope_context, self)));
        }

        if child_context.parent_element_instance_key.is_set() {
            // no flow scope: a called process reporting back to the call
            // activity that created it
            let Some(parent_instance) = self
                .state
                .element_instance(child_context.parent_element_instance_key)
            else {
                return Ok(None);
            };
            let parent_graph = self
                .graphs
                .graph_by_key(parent_instance.process_definition_key)
                .ok_or(EngineError::ProcessDefinitionNotFound(
                    parent_instance.process_definition_key,
                ))?;
            let parent_node = parent_graph.require_element(&parent_instance.element_id)?;
            let processor = registry.get_container_processor(parent_node.element_type)?;
            let parent_context =
                self.context_for_instance(&parent_instance, &child_context.tenant_id);
            return Ok(Some(f(processor, parent_node, &parent_context, self)));
        }

        Ok(None)
    }

    /// Create the job backing one execution listener and suspend the chain
    /// until its completion command arrives
    pub fn create_listener_job(
        &mut self,
        node: &ExecutableNode,
        context: &ElementContext,
        phase: ListenerPhase,
        index: u32,
    ) -> Result<(), ProcessingError> {
        let listener = node.listeners(phase).get(index as usize).ok_or_else(|| {
            Failure::new(
                FailureKind::Configuration,
                format!(
                    "element '{}' has no {phase:?}-phase listener at index {index}",
                    node.id
                ),
            )
        })?;
        let job = listener.job.clone();
        self.create_job(
            context,
            &job,
            JobKind::ExecutionListener,
            Some((phase, index)),
        )
    }

    /// Create the job backing a wait-state task
    pub fn create_task_job(
        &mut self,
        node: &ExecutableNode,
        context: &ElementContext,
    ) -> Result<(), ProcessingError> {
        let job = node.job.clone().ok_or_else(|| {
            Failure::new(
                FailureKind::Configuration,
                format!("element '{}' has no job-worker configuration", node.id),
            )
        })?;
        self.create_job(context, &job, JobKind::Task, None)
    }

    fn create_job(
        &mut self,
        context: &ElementContext,
        job: &JobWorkerProperties,
        kind: JobKind,
        listener: Option<(ListenerPhase, u32)>,
    ) -> Result<(), ProcessingError> {
        let scope = self
            .state
            .effective_variables(context.element_instance_key);
        let job_type = self.resolve_string(&job.job_type, &scope)?;
        let retries = self.resolve_retries(&job.retries, &scope)?;
        self.output.push(FollowUpRecord::CreateJob(JobSpec {
            element_instance_key: context.element_instance_key,
            process_instance_key: context.process_instance_key,
            element_id: context.element_id.clone(),
            job_type,
            retries,
            kind,
            listener,
        }));
        Ok(())
    }

    /// Withdraw the pending job of an element
    pub fn cancel_job(&mut self, context: &ElementContext) {
        self.output.push(FollowUpRecord::CancelJob {
            element_instance_key: context.element_instance_key,
        });
    }

    /// Record that a wait state opened an event subscription
    pub fn open_subscription(&mut self, context: &ElementContext) {
        self.output.push(FollowUpRecord::SubscriptionOpened {
            element_instance_key: context.element_instance_key,
            element_id: context.element_id.clone(),
        });
    }

    /// Record that a wait state stopped waiting
    pub fn close_subscription(&mut self, context: &ElementContext) {
        self.output.push(FollowUpRecord::SubscriptionClosed {
            element_instance_key: context.element_instance_key,
        });
    }

    /// Raise an incident anchored at the given in-flight command context
    pub fn raise_incident(&mut self, kind: FailureKind, message: String, command: ElementContext) {
        let key = self.keys.next_key();
        self.output.push(FollowUpRecord::IncidentRaised {
            key,
            element_instance_key: command.element_instance_key,
            kind,
            message: message.clone(),
        });
        self.state
            .create_incident(Incident::new(key, kind, message, command));
    }

    /// Resolve all incidents attached to an element, e.g. when it is
    /// terminated out from under them
    pub fn resolve_incidents_for(&mut self, element_instance_key: Key) {
        for key in self.state.incidents_for_element(element_instance_key) {
            self.state.delete_incident(key);
            self.output.push(FollowUpRecord::IncidentResolved { key });
        }
    }

    /// Merge variables into a scope, downgrading an oversized record to a
    /// recoverable failure unless the scope is a root, which has no
    /// containing scope to carry the incident.
    pub fn merge_scope_variables(
        &mut self,
        scope_key: Key,
        variables: &Variables,
        context: &ElementContext,
    ) -> Result<(), ProcessingError> {
        match self.state.merge_variables(scope_key, variables) {
            Ok(()) => Ok(()),
            Err(exceeded) if context.is_root() => Err(EngineError::RootRecordTooLarge {
                size: exceeded.size,
                limit: exceeded.limit,
            }
            .into()),
            Err(exceeded) => Err(Failure::new(
                FailureKind::RecordTooLarge,
                format!(
                    "variable record of {} bytes exceeds the limit of {} bytes",
                    exceeded.size, exceeded.limit
                ),
            )
            .into()),
        }
    }

    /// Evaluate the node's input mappings against the element's effective
    /// variables and write the results into its own scope
    pub fn apply_input_mappings(
        &mut self,
        node: &ExecutableNode,
        context: &ElementContext,
    ) -> Result<(), ProcessingError> {
        if node.input_mappings.is_empty() {
            return Ok(());
        }
        let scope = self
            .state
            .effective_variables(context.element_instance_key);
        let mut mapped = Variables::new();
        for mapping in &node.input_mappings {
            let value = self.evaluator.evaluate(&mapping.source, &scope)?;
            mapped.set(mapping.target.clone(), value);
        }
        self.merge_scope_variables(context.element_instance_key, &mapped, context)
    }

    /// Evaluate the node's output mappings against the element's effective
    /// variables and write the results into its flow scope
    pub fn apply_output_mappings(
        &mut self,
        node: &ExecutableNode,
        context: &ElementContext,
    ) -> Result<(), ProcessingError> {
        if node.output_mappings.is_empty() {
            return Ok(());
        }
        let scope = self
            .state
            .effective_variables(context.element_instance_key);
        let mut mapped = Variables::new();
        for mapping in &node.output_mappings {
            let value = self.evaluator.evaluate(&mapping.source, &scope)?;
            mapped.set(mapping.target.clone(), value);
        }
        let target = if context.flow_scope_key.is_set() {
            context.flow_scope_key
        } else {
            context.element_instance_key
        };
        self.merge_scope_variables(target, &mapped, context)
    }

    /// Evaluate an expression-or-literal to a string
    pub fn resolve_string(
        &self,
        value: &ExpressionValue,
        scope: &Variables,
    ) -> Result<String, ProcessingError> {
        match value {
            ExpressionValue::Static(literal) => Ok(literal.clone()),
            ExpressionValue::Expression(expression) => {
                match self.evaluator.evaluate(expression, scope)? {
                    Value::String(result) => Ok(result),
                    other => Err(Failure::expression(format!(
                        "expression '{expression}' must evaluate to a string, got {other}"
                    ))
                    .into()),
                }
            }
        }
    }

    fn resolve_retries(
        &self,
        value: &ExpressionValue,
        scope: &Variables,
    ) -> Result<u32, ProcessingError> {
        let failure = |detail: String| {
            ProcessingError::from(Failure::new(
                FailureKind::Configuration,
                format!("job retries must be a non-negative number: {detail}"),
            ))
        };
        match value {
            ExpressionValue::Static(literal) => literal
                .trim()
                .parse::<u32>()
                .map_err(|err| failure(format!("'{literal}' ({err})"))),
            ExpressionValue::Expression(expression) => {
                match self.evaluator.evaluate(expression, scope)? {
                    Value::Number(number) => number
                        .as_u64()
                        .and_then(|n| u32::try_from(n).ok())
                        .ok_or_else(|| failure(format!("'{number}'"))),
                    other => Err(failure(format!("'{other}'"))),
                }
            }
        }
    }
}
