//! Workflow engine: condition evaluation, dependency checks, input
//! resolution, step execution, record keeping, and orchestration.
//!
//! - `condition` -- `exists(..)` / `equals(..)` predicates over the context
//! - `dependency` -- prerequisite checks against the execution log
//! - `input` -- `context.<key>` reference resolution for step inputs
//! - `definition` -- YAML/JSON parsing and structural validation
//! - `record` -- re-read-then-patch writes into the persisted record
//! - `step_runner` -- one step, with timeout and retry-with-backoff
//! - `orchestrator` -- the `WorkflowEngine` state machine

pub mod condition;
pub mod definition;
pub mod dependency;
pub mod input;
pub mod orchestrator;
pub mod record;
pub mod step_runner;

#[cfg(test)]
pub(crate) mod test_support;

pub use orchestrator::{EngineError, WorkflowEngine};
