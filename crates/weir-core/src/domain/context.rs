use crate::domain::graph::ElementType;
use crate::domain::instance::{ElementInstance, Lifecycle};
use crate::types::{Key, Variables};
use serde::{Deserialize, Serialize};

/// Intents carried by lifecycle commands and the events they produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementIntent {
    /// Command: activate an element
    ActivateElement,
    /// Command: complete an active element
    CompleteElement,
    /// Command: terminate an element
    TerminateElement,
    /// Command: finish terminating a container whose children are done
    ContinueTerminating,
    /// Command: a listener job finished, advance the listener chain
    CompleteExecutionListener,
    /// Command: delete an incident and replay its original command
    ResolveIncident,
    /// Event: activation began
    ElementActivating,
    /// Event: activation finished
    ElementActivated,
    /// Event: completion began
    ElementCompleting,
    /// Event: completion finished, instance removed
    ElementCompleted,
    /// Event: termination began
    ElementTerminating,
    /// Event: termination finished, instance removed
    ElementTerminated,
    /// Event: a sequence flow was taken
    SequenceFlowTaken,
}

impl ElementIntent {
    /// Whether this intent requests work, as opposed to recording it
    pub fn is_command(self) -> bool {
        matches!(
            self,
            ElementIntent::ActivateElement
                | ElementIntent::CompleteElement
                | ElementIntent::TerminateElement
                | ElementIntent::ContinueTerminating
                | ElementIntent::CompleteExecutionListener
                | ElementIntent::ResolveIncident
        )
    }

    /// The event intent recording entry into a lifecycle state
    pub fn for_state(state: Lifecycle) -> Self {
        match state {
            Lifecycle::Activating => ElementIntent::ElementActivating,
            Lifecycle::Activated => ElementIntent::ElementActivated,
            Lifecycle::Completing => ElementIntent::ElementCompleting,
            Lifecycle::Completed => ElementIntent::ElementCompleted,
            Lifecycle::Terminating => ElementIntent::ElementTerminating,
            Lifecycle::Terminated => ElementIntent::ElementTerminated,
        }
    }
}

/// Everything needed to process one lifecycle step of one element
///
/// A context is built fresh per command and never persisted. All fields
/// except the intent and the variable payload stay fixed across a single
/// processing step; moving to the next step produces a new context through
/// [`ElementContext::copy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementContext {
    /// Key of the element instance this step concerns
    pub element_instance_key: Key,
    /// Key of the enclosing container instance; unset for a process root
    pub flow_scope_key: Key,
    /// Key of the owning process instance
    pub process_instance_key: Key,
    /// Process instance that called this one, if any
    pub parent_process_instance_key: Key,
    /// Element instance of the calling activity, if any
    pub parent_element_instance_key: Key,
    /// Definition version being executed
    pub process_definition_key: Key,
    /// Tenant owning the process definition
    pub tenant_id: String,
    /// Id of the element in the compiled graph
    pub element_id: String,
    /// Type tag, cross-checked against the compiled node on dispatch
    pub element_type: ElementType,
    /// The step's intent
    pub intent: ElementIntent,
    /// Variable payload riding on the command (job results, start payloads)
    pub variables: Variables,
    /// For event-based gateways: id of the flow chosen by the trigger
    pub triggered_flow_id: Option<String>,
    /// For listener completions: index of the listener whose job finished
    pub listener_index: Option<u32>,
}

impl ElementContext {
    /// Derive the context for a dependent follow-up step. Identifiers are
    /// carried over; only the key, payload, and intent change.
    pub fn copy(&self, key: Key, variables: Variables, intent: ElementIntent) -> Self {
        Self {
            element_instance_key: key,
            variables,
            intent,
            ..self.clone()
        }
    }

    /// Same context with a different intent
    pub fn with_intent(&self, intent: ElementIntent) -> Self {
        self.copy(self.element_instance_key, self.variables.clone(), intent)
    }

    /// Whether this element has no enclosing flow scope
    pub fn is_root(&self) -> bool {
        !self.flow_scope_key.is_set()
    }

    /// Rebuild a context from a persisted instance; the intent mirrors the
    /// instance's current state
    pub fn for_instance(instance: &ElementInstance, tenant_id: &str) -> Self {
        Self {
            element_instance_key: instance.key,
            flow_scope_key: instance.flow_scope_key,
            process_instance_key: instance.process_instance_key,
            parent_process_instance_key: Key::UNSET,
            parent_element_instance_key: instance.parent_element_instance_key,
            process_definition_key: instance.process_definition_key,
            tenant_id: tenant_id.to_string(),
            element_id: instance.element_id.clone(),
            element_type: instance.element_type,
            intent: ElementIntent::for_state(instance.state),
            variables: Variables::new(),
            triggered_flow_id: None,
            listener_index: None,
        }
    }
}

/// Builder for element contexts
///
/// Commands arrive from the log with only a subset of fields populated;
/// the builder keeps the call sites readable.
#[derive(Debug, Clone)]
pub struct ElementContextBuilder {
    context: ElementContext,
}

impl ElementContextBuilder {
    /// Start building a context for the given element and intent
    pub fn new(element_id: impl Into<String>, element_type: ElementType, intent: ElementIntent) -> Self {
        Self {
            context: ElementContext {
                element_instance_key: Key::UNSET,
                flow_scope_key: Key::UNSET,
                process_instance_key: Key::UNSET,
                parent_process_instance_key: Key::UNSET,
                parent_element_instance_key: Key::UNSET,
                process_definition_key: Key::UNSET,
                tenant_id: "<default>".to_string(),
                element_id: element_id.into(),
                element_type,
                intent,
                variables: Variables::new(),
                triggered_flow_id: None,
                listener_index: None,
            },
        }
    }

    /// Set the element instance key
    pub fn element_instance_key(mut self, key: Key) -> Self {
        self.context.element_instance_key = key;
        self
    }

    /// Set the flow scope key
    pub fn flow_scope_key(mut self, key: Key) -> Self {
        self.context.flow_scope_key = key;
        self
    }

    /// Set the process instance key
    pub fn process_instance_key(mut self, key: Key) -> Self {
        self.context.process_instance_key = key;
        self
    }

    /// Set the process definition key
    pub fn process_definition_key(mut self, key: Key) -> Self {
        self.context.process_definition_key = key;
        self
    }

    /// Set the calling process instance key
    pub fn parent_process_instance_key(mut self, key: Key) -> Self {
        self.context.parent_process_instance_key = key;
        self
    }

    /// Set the calling element instance key
    pub fn parent_element_instance_key(mut self, key: Key) -> Self {
        self.context.parent_element_instance_key = key;
        self
    }

    /// Set the tenant id
    pub fn tenant_id(mut self, tenant: impl Into<String>) -> Self {
        self.context.tenant_id = tenant.into();
        self
    }

    /// Set the variable payload
    pub fn variables(mut self, variables: Variables) -> Self {
        self.context.variables = variables;
        self
    }

    /// Set the completed listener index
    pub fn listener_index(mut self, index: u32) -> Self {
        self.context.listener_index = Some(index);
        self
    }

    /// Finish building
    pub fn build(self) -> ElementContext {
        self.context
    }
}
