//! Repository trait definitions (ports) and the in-memory implementation.
//!
//! The SQLite implementation lives in `stepflow-infra`; the core crate never
//! depends on a specific storage technology.

pub mod memory;
pub mod workflow;
