//!
//! Weir Core - the element lifecycle engine of the Weir workflow platform
//!
//! This crate interprets compiled workflow graphs one lifecycle command at a
//! time: a strictly single-writer state machine per partition that dispatches
//! each command to a per-element-type processor, guards every transition
//! against racing command sources, chains execution-listener jobs, and turns
//! processing failures into operator-resolvable incidents.
//!
//! Log replication, graph compilation, and durable storage live behind the
//! narrow seams in [`domain::state`]; everything here runs synchronously
//! within one command application.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - compiled graph, runtime records, and state seams
pub mod domain;

/// Application services - guard, registry, behavior, stream processor
pub mod application;

/// Core value types
pub mod types;

/// Error types
pub mod error;

// Re-export key types
pub use error::{EngineError, Failure, FailureKind, ProcessingError, Rejection};
pub use types::{Key, KeyGenerator, Variables};

// Domain model
pub use domain::context::{ElementContext, ElementContextBuilder, ElementIntent};
pub use domain::graph::{
    ElementType, ExecutableNode, ExecutionListener, ExpressionValue, JobWorkerProperties,
    ListenerPhase, MultiInstanceProperties, ProcessGraph, SequenceFlow, VariableMapping,
};
pub use domain::incident::Incident;
pub use domain::instance::{ElementInstance, Lifecycle};
pub use domain::state::{ProcessGraphProvider, RecordSizeExceeded, RuntimeStateStore};

// Application surface
pub use application::expression::{ExpressionEvaluator, JmespathEvaluator};
pub use application::guard::TransitionGuard;
pub use application::output::{FollowUpRecord, JobKind, JobSpec, OutputLog};
pub use application::processor::{ContainerProcessor, ElementProcessor, StepServices, TerminateOutcome};
pub use application::registry::ProcessorRegistry;
pub use application::stream_processor::StreamProcessor;
