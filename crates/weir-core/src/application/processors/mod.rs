//! Concrete element processors
//!
//! One implementation per behavioral family; the registry maps each element
//! type onto the family that executes it.

/// Call activities
pub mod call_activity;

/// Start, end, throw, catch, and boundary events
pub mod event;

/// Exclusive, parallel, inclusive, and event-based gateways
pub mod gateway;

/// Multi-instance bodies
pub mod multi_instance;

/// The process root
pub mod process;

/// Embedded, event, and ad-hoc sub-processes
pub mod subprocess;

/// Job-backed and pass-through tasks
pub mod task;
