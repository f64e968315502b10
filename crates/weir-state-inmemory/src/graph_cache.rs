//! Shared cache of deployed process graphs

use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use weir_core::{Key, ProcessGraph, ProcessGraphProvider};

/// Raised when a deployment cannot be accepted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeploymentError {
    /// A graph with this definition key is already cached
    #[error("process definition {0} is already deployed")]
    DuplicateDefinitionKey(Key),
}

/// A process-graph cache shared read-only across partitions
///
/// Graphs are loaded once per definition version and never mutated; the
/// cache hands out `Arc` clones. Lookup by process id returns the latest
/// deployed version, matching what instance-creation commands expect.
#[derive(Debug, Default)]
pub struct SharedGraphCache {
    by_key: DashMap<Key, Arc<ProcessGraph>>,
    latest_by_process_id: DashMap<String, Key>,
}

impl SharedGraphCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a compiled graph to the cache
    pub fn deploy(&self, graph: ProcessGraph) -> Result<Arc<ProcessGraph>, DeploymentError> {
        let shared = Arc::new(graph);
        if self.by_key.contains_key(&shared.definition_key) {
            return Err(DeploymentError::DuplicateDefinitionKey(shared.definition_key));
        }
        debug!(
            process_id = %shared.process_id,
            definition_key = %shared.definition_key,
            "caching deployed process graph"
        );
        self.latest_by_process_id
            .insert(shared.process_id.clone(), shared.definition_key);
        self.by_key.insert(shared.definition_key, shared.clone());
        Ok(shared)
    }

    /// Number of cached definition versions
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

impl ProcessGraphProvider for SharedGraphCache {
    fn graph_by_key(&self, definition_key: Key) -> Option<Arc<ProcessGraph>> {
        self.by_key
            .get(&definition_key)
            .map(|entry| entry.value().clone())
    }

    fn graph_by_process_id(&self, process_id: &str) -> Option<Arc<ProcessGraph>> {
        let key = *self.latest_by_process_id.get(process_id)?;
        self.by_key.get(&key).map(|entry| entry.value().clone())
    }
}
