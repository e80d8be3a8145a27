//! Infrastructure layer for flowpoint.
//!
//! Contains implementations of the ports defined in `flowpoint-core`: the
//! SQLite checkpoint store, plus the TOML engine configuration loader.

pub mod config;
pub mod sqlite;
