//! Infrastructure layer for stepflow.
//!
//! Contains implementations of the ports defined in `stepflow-core`: the
//! SQLite workflow store, the `config.toml` loader, and data directory
//! resolution.

pub mod config;
pub mod filesystem;
pub mod sqlite;
