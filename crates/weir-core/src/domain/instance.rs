use crate::domain::graph::ElementType;
use crate::types::Key;
use serde::{Deserialize, Serialize};

/// Lifecycle state of an element instance
///
/// States only move forward: `Activating → Activated → Completing →
/// Completed`, or sideways into `Terminating → Terminated` from any
/// non-terminal state. `Completed` and `Terminated` are transient; applying
/// them removes the instance from the state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Activation requested, start listeners may still be running
    Activating,
    /// Fully active; wait states rest here
    Activated,
    /// Completion requested, end listeners may still be running
    Completing,
    /// Completed; the instance is removed when this is applied
    Completed,
    /// Termination requested, children may still be winding down
    Terminating,
    /// Terminated; the instance is removed when this is applied
    Terminated,
}

impl Lifecycle {
    /// Whether the transition from `self` to `target` is legal
    pub fn can_transition_to(self, target: Lifecycle) -> bool {
        match (self, target) {
            (Lifecycle::Activating, Lifecycle::Activated) => true,
            (Lifecycle::Activated, Lifecycle::Completing) => true,
            (Lifecycle::Completing, Lifecycle::Completed) => true,
            (Lifecycle::Activating, Lifecycle::Terminating)
            | (Lifecycle::Activated, Lifecycle::Terminating)
            | (Lifecycle::Completing, Lifecycle::Terminating) => true,
            (Lifecycle::Terminating, Lifecycle::Terminated) => true,
            _ => false,
        }
    }

    /// Whether the instance still participates in its scope. Terminating
    /// instances are past the point of being counted as active work.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Lifecycle::Activating | Lifecycle::Activated | Lifecycle::Completing
        )
    }
}

/// The persisted runtime record of one activated node occurrence
///
/// Created when activation is applied, removed when the terminal state is
/// applied. Everything the guard and the processors need to arbitrate
/// concurrent command sources lives here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementInstance {
    /// Key of this instance
    pub key: Key,
    /// Id of the compiled element this instance executes
    pub element_id: String,
    /// Type tag of the compiled element
    pub element_type: ElementType,
    /// Key of the enclosing container instance; unset for a process root
    pub flow_scope_key: Key,
    /// Key of the process instance this element belongs to
    pub process_instance_key: Key,
    /// Definition version the instance was created from
    pub process_definition_key: Key,
    /// For a called process: element instance of the calling activity
    pub parent_element_instance_key: Key,
    /// Current lifecycle state
    pub state: Lifecycle,
    /// Id of the element that interrupted this scope, if any
    pub interrupted_by: Option<String>,
    /// Index of the next execution listener to invoke in the current phase
    pub listener_cursor: u32,
    /// Number of children counted as active work
    pub active_children: u32,
    /// Set once a multi-instance completion condition has been satisfied,
    /// so sibling terminations fold into completion instead of teardown
    pub completion_condition_met: bool,
}

impl ElementInstance {
    /// Create a fresh instance in `Activating`
    pub fn new(
        key: Key,
        element_id: impl Into<String>,
        element_type: ElementType,
        flow_scope_key: Key,
        process_instance_key: Key,
        process_definition_key: Key,
    ) -> Self {
        Self {
            key,
            element_id: element_id.into(),
            element_type,
            flow_scope_key,
            process_instance_key,
            process_definition_key,
            parent_element_instance_key: Key::UNSET,
            state: Lifecycle::Activating,
            interrupted_by: None,
            listener_cursor: 0,
            active_children: 0,
            completion_condition_met: false,
        }
    }

    /// Whether this scope is interrupted by an element other than `element_id`
    pub fn is_interrupted_by_other(&self, element_id: &str) -> bool {
        match &self.interrupted_by {
            Some(interrupting) => interrupting != element_id,
            None => false,
        }
    }
}
