//! Shared domain types for the flowpoint checkpoint engine.
//!
//! This crate contains the data model every other crate speaks: flow and
//! session identifiers, the checkpoint, the `WaitingFor` conditions, the
//! `IoRequest` suspend reasons, continuations, inbound/outbound events,
//! context properties, engine configuration and the shared error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror, base64.

pub mod checkpoint;
pub mod config;
pub mod context;
pub mod continuation;
pub mod error;
pub mod event;
pub mod ids;
pub mod payload;
pub mod request;
pub mod waiting;
