//! The stream processor
//!
//! Single entry point of the engine: it applies one lifecycle command at a
//! time, in log order. Each application builds a context, resolves the
//! compiled node, asks the transition guard, dispatches to the registered
//! processor, and drives the execution-listener chain. Failures become
//! incidents; guard violations become rejections; divergence between the
//! log, the graph, and the registry is fatal and propagates.
//!
//! A listener chain never blocks: the driver emits a job for the next
//! listener and returns, and the chain resumes when the corresponding
//! `CompleteExecutionListener` command is applied, possibly after a
//! restart. The continuation is the persisted cursor, not a call stack.

use crate::application::expression::ExpressionEvaluator;
use crate::application::guard::TransitionGuard;
use crate::application::output::{FollowUpRecord, OutputLog};
use crate::application::processor::{ElementProcessor, StepServices, TerminateOutcome};
use crate::application::registry::ProcessorRegistry;
use crate::domain::context::{ElementContext, ElementContextBuilder, ElementIntent};
use crate::domain::graph::{ElementType, ExecutableNode, ListenerPhase};
use crate::domain::instance::{ElementInstance, Lifecycle};
use crate::domain::state::{ProcessGraphProvider, RuntimeStateStore};
use crate::error::{EngineError, ProcessingError};
use crate::types::{Key, KeyGenerator, Variables};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// Applies lifecycle commands to the element state machines of a partition
pub struct StreamProcessor {
    registry: ProcessorRegistry,
    guard: TransitionGuard,
    evaluator: Box<dyn ExpressionEvaluator>,
    state: Box<dyn RuntimeStateStore>,
    graphs: Arc<dyn ProcessGraphProvider>,
    keys: KeyGenerator,
    output: OutputLog,
    pending: VecDeque<ElementContext>,
    scanned: usize,
}

impl StreamProcessor {
    /// Create a processor over the given state backend and deployments
    pub fn new(
        state: Box<dyn RuntimeStateStore>,
        graphs: Arc<dyn ProcessGraphProvider>,
        evaluator: Box<dyn ExpressionEvaluator>,
    ) -> Self {
        Self {
            registry: ProcessorRegistry::standard(),
            guard: TransitionGuard::new(),
            evaluator,
            state,
            graphs,
            keys: KeyGenerator::default(),
            output: OutputLog::new(),
            pending: VecDeque::new(),
            scanned: 0,
        }
    }

    /// The runtime state, for inspection
    pub fn state(&self) -> &dyn RuntimeStateStore {
        self.state.as_ref()
    }

    /// Mutable runtime state, for collaborators outside this crate that own
    /// state primitives of their own (event triggering, migration tooling)
    pub fn state_mut(&mut self) -> &mut dyn RuntimeStateStore {
        self.state.as_mut()
    }

    /// The follow-up records produced so far
    pub fn output(&self) -> &OutputLog {
        &self.output
    }

    /// Drain the follow-up records produced so far
    pub fn take_records(&mut self) -> Vec<FollowUpRecord> {
        self.scanned = 0;
        self.output.drain()
    }

    /// Enqueue an externally originated command
    pub fn submit(&mut self, command: ElementContext) {
        self.pending.push_back(command);
    }

    /// Build a command addressed to a live element instance, e.g. a job
    /// completion or a termination request
    pub fn command_for_instance(&self, key: Key, intent: ElementIntent) -> Option<ElementContext> {
        let instance = self.state.element_instance(key)?;
        let mut command = ElementContext::for_instance(&instance, "<default>");
        command.intent = intent;
        Some(command)
    }

    /// Enqueue the activation of a new instance of a deployed process
    pub fn activate_process_instance(
        &mut self,
        process_id: &str,
        variables: Variables,
    ) -> Result<(), EngineError> {
        let graph = self
            .graphs
            .graph_by_process_id(process_id)
            .ok_or_else(|| EngineError::ProcessNotFoundById(process_id.to_string()))?;
        let command = ElementContextBuilder::new(
            graph.process_id.clone(),
            ElementType::Process,
            ElementIntent::ActivateElement,
        )
        .process_definition_key(graph.definition_key)
        .variables(variables)
        .build();
        self.pending.push_back(command);
        Ok(())
    }

    /// Enqueue the resolution of an incident; processing it replays the
    /// incident's original command
    pub fn submit_incident_resolution(&mut self, incident_key: Key) {
        let command = ElementContextBuilder::new(
            String::new(),
            ElementType::Process,
            ElementIntent::ResolveIncident,
        )
        .element_instance_key(incident_key)
        .build();
        self.pending.push_back(command);
    }

    /// Apply one command and queue the follow-up commands it produced
    pub fn process(&mut self, command: ElementContext) -> Result<(), EngineError> {
        self.process_command(command)?;
        self.collect_new_commands();
        Ok(())
    }

    /// Apply queued commands until none remain
    ///
    /// In production the surrounding engine feeds commands back through its
    /// replicated log; this loop stands in for that feedback path.
    pub fn pump(&mut self) -> Result<(), EngineError> {
        while let Some(command) = self.pending.pop_front() {
            self.process_command(command)?;
            self.collect_new_commands();
        }
        Ok(())
    }

    /// Apply one command and run the resulting cascade to quiescence
    pub fn process_to_quiescence(&mut self, command: ElementContext) -> Result<(), EngineError> {
        self.process(command)?;
        self.pump()
    }

    fn collect_new_commands(&mut self) {
        while self.scanned < self.output.records().len() {
            if let FollowUpRecord::Command { context } = &self.output.records()[self.scanned] {
                self.pending.push_back(context.clone());
            }
            self.scanned += 1;
        }
    }

    fn process_command(&mut self, command: ElementContext) -> Result<(), EngineError> {
        debug!(
            intent = ?command.intent,
            element = %command.element_id,
            key = %command.element_instance_key,
            "processing command"
        );

        if command.intent == ElementIntent::ResolveIncident {
            return self.resolve_incident(&command);
        }

        let graph = self
            .graphs
            .graph_by_key(command.process_definition_key)
            .ok_or(EngineError::ProcessDefinitionNotFound(
                command.process_definition_key,
            ))?;
        let node = graph.require_element(&command.element_id)?;
        if node.element_type != command.element_type {
            return Err(EngineError::ProcessorMismatch {
                element_id: command.element_id.clone(),
                expected: command.element_type,
                actual: node.element_type,
            });
        }

        if let Err(rejection) = self
            .guard
            .is_valid_transition(&command, node, &graph, self.state.as_ref())
        {
            debug!(reason = %rejection.reason, "command rejected");
            self.output.push(FollowUpRecord::CommandRejected {
                key: rejection.key,
                intent: rejection.intent,
                reason: rejection.reason,
            });
            return Ok(());
        }

        let processor = self.registry.get_processor(node.element_type)?;
        let mut services = StepServices {
            state: self.state.as_mut(),
            graphs: self.graphs.as_ref(),
            graph: graph.as_ref(),
            registry: &self.registry,
            evaluator: self.evaluator.as_ref(),
            output: &mut self.output,
            keys: &mut self.keys,
        };

        match command.intent {
            ElementIntent::ActivateElement => {
                Self::handle_activate(processor, node, &command, &mut services)
            }
            ElementIntent::CompleteElement => {
                Self::handle_complete(processor, node, &command, &mut services)
            }
            ElementIntent::TerminateElement => {
                Self::handle_terminate(processor, node, &command, &mut services)
            }
            ElementIntent::ContinueTerminating => {
                Self::handle_continue_terminating(processor, node, &command, &mut services)
            }
            ElementIntent::CompleteExecutionListener => {
                Self::handle_listener_completed(processor, node, &command, &mut services)
            }
            other => Err(EngineError::UnsupportedIntent(other)),
        }
    }

    fn handle_activate(
        processor: &dyn ElementProcessor,
        node: &ExecutableNode,
        command: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), EngineError> {
        let (context, _is_new) = services.transition_to_activating(node, command);
        let result = Self::activate_body(processor, node, &context, services);
        // anchor a failure at the in-flight context, not the raw command
        let replay = context.copy(
            context.element_instance_key,
            command.variables.clone(),
            ElementIntent::ActivateElement,
        );
        Self::finish(result, services, replay)
    }

    fn activate_body(
        processor: &dyn ElementProcessor,
        node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        services
            .with_container(node, context, |container, scope_node, scope_context, services| {
                container.on_child_activating(scope_node, scope_context, context, services)
            })?
            .transpose()?;

        processor.on_activate(node, context, services)?;
        Self::run_listener_chain(processor, node, context, ListenerPhase::Start, services)
    }

    fn handle_complete(
        processor: &dyn ElementProcessor,
        node: &ExecutableNode,
        command: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), EngineError> {
        let context = services.transition_to_completing(command);
        let result = Self::complete_body(processor, node, &context, services);
        Self::finish(result, services, command.clone())
    }

    fn complete_body(
        processor: &dyn ElementProcessor,
        node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        services
            .with_container(node, context, |container, scope_node, scope_context, services| {
                container.on_child_completing(scope_node, scope_context, context, services)
            })?
            .transpose()?;

        processor.on_complete(node, context, services)?;
        Self::run_listener_chain(processor, node, context, ListenerPhase::End, services)
    }

    fn handle_terminate(
        processor: &dyn ElementProcessor,
        node: &ExecutableNode,
        command: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), EngineError> {
        // termination runs no listener chain: it is not interruptible
        let context = services.transition_to_terminating(command);
        services.resolve_incidents_for(context.element_instance_key);

        let result = match processor.on_terminate(node, &context, services) {
            Ok(TerminateOutcome::Done) => processor.finalize_termination(node, &context, services),
            Ok(TerminateOutcome::Pending) => Ok(()),
            Err(error) => Err(error),
        };
        Self::finish(result, services, command.clone())
    }

    fn handle_continue_terminating(
        processor: &dyn ElementProcessor,
        node: &ExecutableNode,
        command: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), EngineError> {
        let context = command.with_intent(ElementIntent::ElementTerminating);
        let result = processor.finalize_termination(node, &context, services);
        Self::finish(result, services, command.clone())
    }

    fn handle_listener_completed(
        processor: &dyn ElementProcessor,
        node: &ExecutableNode,
        command: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), EngineError> {
        let Some(instance) = services.state.element_instance(command.element_instance_key) else {
            // guarded, but the guard ran against an earlier read
            return Ok(());
        };
        let phase = match instance.state {
            Lifecycle::Activating => ListenerPhase::Start,
            _ => ListenerPhase::End,
        };
        let context = command.with_intent(match phase {
            ListenerPhase::Start => ElementIntent::ElementActivating,
            ListenerPhase::End => ElementIntent::ElementCompleting,
        });

        let result =
            Self::listener_completed_body(processor, node, &context, command, phase, &instance, services);
        Self::finish(result, services, command.clone())
    }

    fn listener_completed_body(
        processor: &dyn ElementProcessor,
        node: &ExecutableNode,
        context: &ElementContext,
        command: &ElementContext,
        phase: ListenerPhase,
        instance: &ElementInstance,
        services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        // merge the listener job's result variables into the configured
        // scope before the chain advances
        if !command.variables.is_empty() {
            let local = node
                .listeners(phase)
                .get(instance.listener_cursor as usize)
                .map(|listener| listener.local)
                .unwrap_or(false);
            let target_scope = if local || context.is_root() {
                context.element_instance_key
            } else {
                context.flow_scope_key
            };
            services.merge_scope_variables(target_scope, &command.variables, context)?;
        }

        services
            .state
            .advance_listener_cursor(context.element_instance_key);
        Self::run_listener_chain(processor, node, context, phase, services)
    }

    /// Emit a job for the next listener of the phase, or invoke the phase's
    /// finalizer once the chain is exhausted
    fn run_listener_chain(
        processor: &dyn ElementProcessor,
        node: &ExecutableNode,
        context: &ElementContext,
        phase: ListenerPhase,
        services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        let cursor = services
            .state
            .element_instance(context.element_instance_key)
            .map(|instance| instance.listener_cursor)
            .unwrap_or(0);

        if (cursor as usize) < node.listeners(phase).len() {
            services.create_listener_job(node, context, phase, cursor)?;
            // suspended: the chain resumes on the job's completion command
            return Ok(());
        }

        match phase {
            ListenerPhase::Start => processor.finalize_activation(node, context, services),
            ListenerPhase::End => processor.finalize_completion(node, context, services),
        }
    }

    fn resolve_incident(&mut self, command: &ElementContext) -> Result<(), EngineError> {
        let incident_key = command.element_instance_key;
        let incident = self
            .state
            .delete_incident(incident_key)
            .ok_or(EngineError::IncidentNotFound(incident_key))?;
        debug!(incident = %incident_key, element = %incident.command.element_id, "resolving incident");
        self.output
            .push(FollowUpRecord::IncidentResolved { key: incident_key });
        // replaying the original command re-enters the failed transition
        self.output.push_command(incident.command);
        Ok(())
    }

    fn finish(
        result: Result<(), ProcessingError>,
        services: &mut StepServices<'_>,
        replay_command: ElementContext,
    ) -> Result<(), EngineError> {
        match result {
            Ok(()) => Ok(()),
            Err(ProcessingError::Failure(failure)) => {
                warn!(
                    element = %replay_command.element_id,
                    key = %replay_command.element_instance_key,
                    failure = %failure,
                    "processing failed, raising incident"
                );
                services.raise_incident(failure.kind, failure.message, replay_command);
                Ok(())
            }
            Err(ProcessingError::Fatal(error)) => Err(error),
        }
    }
}
