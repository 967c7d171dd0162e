//! Workflow engine and collaborator trait definitions for stepflow.
//!
//! This crate defines the "ports" the engine consumes (workflow store,
//! capability executor, agent-state accessor) and the engine itself. It
//! depends only on `stepflow-types` -- never on `stepflow-infra` or any
//! database crate.

pub mod capability;
pub mod event;
pub mod repository;
pub mod workflow;
