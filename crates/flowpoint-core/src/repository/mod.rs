//! Checkpoint store trait definition (port) and the in-memory implementation.
//!
//! The infrastructure layer (flowpoint-infra) provides the SQLite-backed
//! store. The core crate never depends on any specific storage technology.

pub mod checkpoint;
pub mod memory;
