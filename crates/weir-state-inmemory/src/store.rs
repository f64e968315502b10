//! Per-partition in-memory runtime state

use std::collections::{HashMap, HashSet};
use tracing::trace;
use weir_core::{
    ElementInstance, Incident, Key, Lifecycle, RecordSizeExceeded, RuntimeStateStore, Variables,
};

/// Tunables of the in-memory store
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Maximum serialized size of one scope's variable document. `None`
    /// disables the check.
    pub record_size_limit: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            // mirrors the default record ceiling of log-backed deployments
            record_size_limit: Some(4 * 1024 * 1024),
        }
    }
}

/// In-memory implementation of the engine's runtime-state seam
///
/// One instance per partition. The engine is the partition's single writer,
/// so the store needs no interior locking; wrap it in the synchronization
/// of your choice if a read path outside the engine needs access.
#[derive(Debug, Default)]
pub struct InMemoryRuntimeState {
    instances: HashMap<Key, ElementInstance>,
    variables: HashMap<Key, Variables>,
    taken_flows: HashMap<(Key, String), HashSet<String>>,
    incidents: HashMap<Key, Incident>,
    config: StoreConfig,
}

impl InMemoryRuntimeState {
    /// Create a store with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with the given configuration
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            config,
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

impl RuntimeStateStore for InMemoryRuntimeState {
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
        trace!(key = %instance.key, element = %instance.element_id, "creating element instance");
        self.variables.entry(instance.key).or_default();
        self.instances.insert(instance.key, instance);
    }

    fn set_state(&mut self, key: Key, state: Lifecycle) {
        self.update(key, |instance| instance.state = state);
    }

    fn remove_instance(&mut self, key: Key) {
        trace!(key = %key, "removing element instance");
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

    fn record_taken_sequence_flow(&mut self, scope_key: Key, target_element_id: &str, flow_id: &str) {
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
        if let Some(limit) = self.config.record_size_limit {
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
