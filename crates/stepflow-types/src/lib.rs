//! Shared domain types for stepflow.
//!
//! This crate contains the types passed between the engine, its storage
//! adapters, and the CLI: workflow records, step specifications and
//! executions, the shared context, partial updates, and engine configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod workflow;
