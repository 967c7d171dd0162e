//! Collaborators the engine calls out to while running a step.
//!
//! - [`executor`]: the `CapabilityExecutor` trait that performs step work.
//! - [`registry`]: a name-keyed registry of async handlers, with builtins.
//! - [`agent`]: the `AgentStateProvider` trait consulted before each attempt.

pub mod agent;
pub mod executor;
pub mod registry;

pub use agent::{AgentStateError, AgentStateProvider, StaticAgentStates};
pub use executor::{CapabilityError, CapabilityExecutor, CapabilityOutput, ExecutionContext};
pub use registry::CapabilityRegistry;
