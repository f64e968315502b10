//! In-memory state backend for the Weir engine
//!
//! This crate provides in-memory implementations of the runtime-state and
//! graph-provider seams defined in weir-core. It is primarily useful for
//! development, testing, and single-node deployments where persistence is
//! not required.
//!
//! The [`SharedGraphCache`] is safe to share between partitions: compiled
//! graphs are immutable and handed out as `Arc`s. Each
//! [`InMemoryRuntimeState`] belongs to exactly one partition and relies on
//! the engine's single-writer discipline instead of interior locking.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod graph_cache;
pub mod store;

pub use graph_cache::{DeploymentError, SharedGraphCache};
pub use store::{InMemoryRuntimeState, StoreConfig};
