//! Checkpoint/suspension engine for flowpoint.
//!
//! This crate holds the engine logic and the "ports" (traits) its
//! collaborators implement: the checkpoint store, the execution host and the
//! outbound sink. It depends only on `flowpoint-types` -- never on
//! `flowpoint-infra` or any database/IO crate.

pub mod context_mapper;
pub mod handler;
pub mod host;
pub mod pool;
pub mod redelivery;
pub mod repository;
pub mod resolver;
pub mod runner;
pub mod sink;
