use crate::domain::context::ElementIntent;
use crate::domain::graph::ElementType;
use crate::types::Key;
use thiserror::Error;

/// Fatal engine error
///
/// These indicate that the compiled graph, the processor registry, or the
/// command log have diverged. They are not converted into incidents; they
/// propagate out of the engine and are expected to halt processing of the
/// owning partition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// No processor is registered for an element type
    #[error("no processor registered for element type {0:?}")]
    UnmappedElementType(ElementType),

    /// A container accessor was used for a type without container semantics
    #[error("element type {0:?} does not support container semantics")]
    NotAContainer(ElementType),

    /// A command referenced a process definition that is not deployed
    #[error("expected to find process definition {0}, but none found")]
    ProcessDefinitionNotFound(Key),

    /// A command referenced a process id that is not deployed
    #[error("expected to find a deployed process with id '{0}', but none found")]
    ProcessNotFoundById(String),

    /// A command referenced an element that is not part of its definition
    #[error("expected to find element '{element_id}' in process definition {definition_key}, but none found")]
    ElementNotFound {
        /// Id of the missing element
        element_id: String,
        /// Process definition the command referenced
        definition_key: Key,
    },

    /// The element type on the command does not match the compiled node
    #[error("command for element '{element_id}' expected type {expected:?} but the compiled node is {actual:?}")]
    ProcessorMismatch {
        /// Id of the element
        element_id: String,
        /// Element type carried on the command
        expected: ElementType,
        /// Element type of the compiled node
        actual: ElementType,
    },

    /// A command carried an intent the engine cannot dispatch
    #[error("intent {0:?} cannot be processed as a lifecycle command")]
    UnsupportedIntent(ElementIntent),

    /// A root-scope record exceeded the configured size limit. There is no
    /// containing scope to carry an incident, so this is not recoverable.
    #[error("record of {size} bytes exceeds the limit of {limit} bytes on a root scope")]
    RootRecordTooLarge {
        /// Observed serialized size
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// An incident-resolution command referenced an unknown incident
    #[error("expected to find incident {0}, but none found")]
    IncidentNotFound(Key),
}

/// Classification of a recoverable processing failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// An expression could not be compiled or evaluated
    Expression,
    /// A variable record exceeded the configured size limit
    RecordTooLarge,
    /// A called process could not be resolved
    CalledElement,
    /// The element's configuration is incomplete or contradictory
    Configuration,
}

/// A recoverable failure raised by processor logic
///
/// Failures are caught at the stream processor boundary and converted into
/// incidents anchored at the in-flight context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Failure classification
    pub kind: FailureKind,
    /// Human-readable description, surfaced on the incident
    pub message: String,
}

impl Failure {
    /// Create a new failure
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for an expression evaluation failure
    pub fn expression(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Expression, message)
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Error channel of processor hooks and transition helpers
///
/// Recoverable failures become incidents at the stream processor boundary;
/// fatal errors pass through it untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingError {
    /// Recoverable; converted into an incident
    Failure(Failure),
    /// Not recoverable at this layer; halts the partition
    Fatal(EngineError),
}

impl From<Failure> for ProcessingError {
    fn from(failure: Failure) -> Self {
        ProcessingError::Failure(failure)
    }
}

impl From<EngineError> for ProcessingError {
    fn from(error: EngineError) -> Self {
        ProcessingError::Fatal(error)
    }
}

impl std::fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingError::Failure(failure) => write!(f, "{failure}"),
            ProcessingError::Fatal(error) => write!(f, "{error}"),
        }
    }
}

/// A command rejected by the transition guard
///
/// Rejections are surfaced to the command's originator; no state is mutated
/// and no incident is raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Intent of the rejected command
    pub intent: ElementIntent,
    /// Key the command was addressed to
    pub key: Key,
    /// Why the command is not applicable
    pub reason: String,
}

impl Rejection {
    /// Create a new rejection
    pub fn new(intent: ElementIntent, key: Key, reason: impl Into<String>) -> Self {
        Self {
            intent,
            key,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rejected {:?} for key {}: {}", self.intent, self.key, self.reason)
    }
}
