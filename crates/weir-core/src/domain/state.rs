//! The narrow seam between the engine and its state backend
//!
//! The engine is the single writer of runtime state within a partition, so
//! every method takes `&self`/`&mut self` synchronously; backends built on a
//! replicated log implement these primitives against their own storage.

use crate::domain::context::ElementContext;
use crate::domain::graph::ProcessGraph;
use crate::domain::incident::Incident;
use crate::domain::instance::{ElementInstance, Lifecycle};
use crate::types::{Key, Variables};
use std::sync::Arc;

/// Raised by [`RuntimeStateStore::merge_variables`] when a variable document
/// would exceed the backend's record size limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSizeExceeded {
    /// Serialized size the merge would have produced
    pub size: usize,
    /// The backend's limit
    pub limit: usize,
}

/// Read and mutation primitives over per-instance runtime state
pub trait RuntimeStateStore {
    /// Fetch an element instance by key
    fn element_instance(&self, key: Key) -> Option<ElementInstance>;

    /// Fetch the enclosing container instance of the given context
    fn flow_scope_instance(&self, context: &ElementContext) -> Option<ElementInstance> {
        if context.flow_scope_key.is_set() {
            self.element_instance(context.flow_scope_key)
        } else {
            None
        }
    }

    /// Number of distinct incoming sequence flows taken toward an element
    /// within a scope
    fn taken_sequence_flows(&self, scope_key: Key, element_id: &str) -> u32;

    /// All instances whose flow scope is `scope_key` and whose state is
    /// still active
    fn active_siblings(&self, scope_key: Key) -> Vec<ElementInstance>;

    /// The process instance created by a call activity, if it still exists
    fn called_child_instance(&self, parent_element_instance_key: Key) -> Option<ElementInstance>;

    /// The variable document owned by a scope
    fn variables(&self, scope_key: Key) -> Variables;

    /// The document visible to expressions in a scope: ancestors first, the
    /// scope's own variables shadowing them.
    fn effective_variables(&self, scope_key: Key) -> Variables {
        let mut chain = Vec::new();
        let mut current = Some(scope_key);
        while let Some(key) = current {
            chain.push(key);
            current = self
                .element_instance(key)
                .filter(|instance| instance.flow_scope_key.is_set())
                .map(|instance| instance.flow_scope_key);
        }
        let mut merged = Variables::new();
        for key in chain.into_iter().rev() {
            merged.merge(&self.variables(key));
        }
        merged
    }

    /// Persist a freshly activating instance
    fn create_instance(&mut self, instance: ElementInstance);

    /// Move an instance to a new lifecycle state
    fn set_state(&mut self, key: Key, state: Lifecycle);

    /// Drop an instance and its variable document
    fn remove_instance(&mut self, key: Key);

    /// Record that `by_element` interrupted the scope
    fn set_interrupted(&mut self, scope_key: Key, by_element: &str);

    /// Clear the scope's interruption marker
    fn clear_interrupted(&mut self, scope_key: Key);

    /// Advance the listener cursor, returning the new value
    fn advance_listener_cursor(&mut self, key: Key) -> u32;

    /// Reset the listener cursor at a phase boundary
    fn reset_listener_cursor(&mut self, key: Key);

    /// Count a new active child on the scope
    fn increment_active_children(&mut self, scope_key: Key);

    /// Remove an active child from the scope, returning how many remain
    fn decrement_active_children(&mut self, scope_key: Key) -> u32;

    /// Record a sequence flow taken toward `target_element_id`
    fn record_taken_sequence_flow(&mut self, scope_key: Key, target_element_id: &str, flow_id: &str);

    /// Consume the taken-flow records of an element once it activates
    fn consume_taken_sequence_flows(&mut self, scope_key: Key, target_element_id: &str);

    /// Mark a multi-instance body's completion condition as satisfied
    fn set_completion_condition_met(&mut self, key: Key);

    /// Shallow-merge variables into a scope's document
    fn merge_variables(
        &mut self,
        scope_key: Key,
        variables: &Variables,
    ) -> Result<(), RecordSizeExceeded>;

    /// Persist a raised incident
    fn create_incident(&mut self, incident: Incident);

    /// Remove an incident, returning it for replay
    fn delete_incident(&mut self, key: Key) -> Option<Incident>;

    /// Keys of all incidents attached to an element instance
    fn incidents_for_element(&self, element_instance_key: Key) -> Vec<Key>;
}

/// Read-only access to deployed process graphs
///
/// Graphs are produced by deployment compilation (outside this crate),
/// loaded once per definition version, and shared via `Arc`.
pub trait ProcessGraphProvider {
    /// Fetch a definition version by key
    fn graph_by_key(&self, definition_key: Key) -> Option<Arc<ProcessGraph>>;

    /// Fetch the latest version of a process by its modeled id
    fn graph_by_process_id(&self, process_id: &str) -> Option<Arc<ProcessGraph>>;
}

/// In-memory implementations for tests
#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use std::collections::{HashMap, HashSet};

    /// A plain in-memory state store
    ///
    /// Backs the unit and integration tests of this crate. No interior
    /// locking: the engine is the single writer, and tests drive it from
    /// one thread.
    #[derive(Debug, Default)]
    pub struct InMemoryState {
        instances: HashMap<Key, ElementInstance>,
        variables: HashMap<Key, Variables>,
        taken_flows: HashMap<(Key, String), HashSet<String>>,
        incidents: HashMap<Key, Incident>,
        /// Maximum serialized size of one scope's variable document
        pub record_size_limit: Option<usize>,
    }

    impl InMemoryState {
        /// Create an empty store without a record size limit
        pub fn new() -> Self {
            Self::default()
        }

        /// Create an empty store that rejects variable documents larger
        /// than `limit` bytes
        pub fn with_record_size_limit(limit: usize) -> Self {
            Self {
                record_size_limit: Some(limit),
                ..Self::default()
            }
        }

        /// Number of live element instances
        pub fn instance_count(&self) -> usize {
            self.instances.len()
        }

        /// Number of open incidents
        pub fn incident_count(&self) -> usize {
            self.incidents.len()
        }

        fn update<F: FnOnce(&mut ElementInstance)>(&mut self, key: Key, f: F) {
            if let Some(instance) = self.instances.get_mut(&key) {
                f(instance);
            }
        }
    }

    impl RuntimeStateStore for InMemoryState {
        fn element_instance(&self, key: Key) -> Option<ElementInstance> {
            self.instances.get(&key).cloned()
        }

        fn taken_sequence_flows(&self, scope_key: Key, element_id: &str) -> u32 {
            self.taken_flows
                .get(&(scope_key, element_id.to_string()))
                .map(|flows| flows.len() as u32)
                .unwrap_or(0)
        }

        fn active_siblings(&self, scope_key: Key) -> Vec<ElementInstance> {
            let mut siblings: Vec<_> = self
                .instances
                .values()
                .filter(|instance| instance.flow_scope_key == scope_key && instance.state.is_active())
                .cloned()
                .collect();
            siblings.sort_by_key(|instance| instance.key);
            siblings
        }

        fn called_child_instance(&self, parent_element_instance_key: Key) -> Option<ElementInstance> {
            self.instances
                .values()
                .find(|instance| {
                    instance.parent_element_instance_key == parent_element_instance_key
                        && !instance.flow_scope_key.is_set()
                })
                .cloned()
        }

        fn variables(&self, scope_key: Key) -> Variables {
            self.variables.get(&scope_key).cloned().unwrap_or_default()
        }

        fn create_instance(&mut self, instance: ElementInstance) {
            self.variables.entry(instance.key).or_default();
            self.instances.insert(instance.key, instance);
        }

        fn set_state(&mut self, key: Key, state: Lifecycle) {
            self.update(key, |instance| instance.state = state);
        }

        fn remove_instance(&mut self, key: Key) {
            self.instances.remove(&key);
            self.variables.remove(&key);
        }

        fn set_interrupted(&mut self, scope_key: Key, by_element: &str) {
            let by_element = by_element.to_string();
            self.update(scope_key, |instance| instance.interrupted_by = Some(by_element));
        }

        fn clear_interrupted(&mut self, scope_key: Key) {
            self.update(scope_key, |instance| instance.interrupted_by = None);
        }

        fn advance_listener_cursor(&mut self, key: Key) -> u32 {
            let mut cursor = 0;
            self.update(key, |instance| {
                instance.listener_cursor += 1;
                cursor = instance.listener_cursor;
            });
            cursor
        }

        fn reset_listener_cursor(&mut self, key: Key) {
            self.update(key, |instance| instance.listener_cursor = 0);
        }

        fn increment_active_children(&mut self, scope_key: Key) {
            self.update(scope_key, |instance| instance.active_children += 1);
        }

        fn decrement_active_children(&mut self, scope_key: Key) -> u32 {
            let mut remaining = 0;
            self.update(scope_key, |instance| {
                instance.active_children = instance.active_children.saturating_sub(1);
                remaining = instance.active_children;
            });
            remaining
        }

        fn record_taken_sequence_flow(
            &mut self,
            scope_key: Key,
            target_element_id: &str,
            flow_id: &str,
        ) {
            self.taken_flows
                .entry((scope_key, target_element_id.to_string()))
                .or_default()
                .insert(flow_id.to_string());
        }

        fn consume_taken_sequence_flows(&mut self, scope_key: Key, target_element_id: &str) {
            self.taken_flows
                .remove(&(scope_key, target_element_id.to_string()));
        }

        fn set_completion_condition_met(&mut self, key: Key) {
            self.update(key, |instance| instance.completion_condition_met = true);
        }

        fn merge_variables(
            &mut self,
            scope_key: Key,
            variables: &Variables,
        ) -> Result<(), RecordSizeExceeded> {
            let mut merged = self.variables.get(&scope_key).cloned().unwrap_or_default();
            merged.merge(variables);
            if let Some(limit) = self.record_size_limit {
                let size = merged.approximate_size();
                if size > limit {
                    return Err(RecordSizeExceeded { size, limit });
                }
            }
            self.variables.insert(scope_key, merged);
            Ok(())
        }

        fn create_incident(&mut self, incident: Incident) {
            self.incidents.insert(incident.key, incident);
        }

        fn delete_incident(&mut self, key: Key) -> Option<Incident> {
            self.incidents.remove(&key)
        }

        fn incidents_for_element(&self, element_instance_key: Key) -> Vec<Key> {
            let mut keys: Vec<_> = self
                .incidents
                .values()
                .filter(|incident| incident.element_instance_key == element_instance_key)
                .map(|incident| incident.key)
                .collect();
            keys.sort();
            keys
        }
    }

    /// A fixed set of deployed graphs
    #[derive(Debug, Default)]
    pub struct InMemoryGraphs {
        by_key: HashMap<Key, Arc<ProcessGraph>>,
        by_process_id: HashMap<String, Key>,
    }

    impl InMemoryGraphs {
        /// Create an empty deployment set
        pub fn new() -> Self {
            Self::default()
        }

        /// Deploy a graph; later versions of the same process id shadow
        /// earlier ones for id-based lookup.
        pub fn deploy(&mut self, graph: ProcessGraph) -> Arc<ProcessGraph> {
            let shared = Arc::new(graph);
            self.by_process_id
                .insert(shared.process_id.clone(), shared.definition_key);
            self.by_key.insert(shared.definition_key, shared.clone());
            shared
        }
    }

    impl ProcessGraphProvider for InMemoryGraphs {
        fn graph_by_key(&self, definition_key: Key) -> Option<Arc<ProcessGraph>> {
            self.by_key.get(&definition_key).cloned()
        }

        fn graph_by_process_id(&self, process_id: &str) -> Option<Arc<ProcessGraph>> {
            let key = self.by_process_id.get(process_id)?;
            self.by_key.get(key).cloned()
        }
    }
}
