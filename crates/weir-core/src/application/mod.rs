//! Application services - guard, registry, transition behavior, and the
//! stream processor that drives them

/// Shared transition helpers available to processors
pub mod behavior;

/// Expression evaluation seam
pub mod expression;

/// The transition guard
pub mod guard;

/// The output log of follow-up records
pub mod output;

/// Processor capability traits
pub mod processor;

/// Concrete element processors
pub mod processors;

/// The processor registry
pub mod registry;

/// The stream processor
pub mod stream_processor;
