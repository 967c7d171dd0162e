//! Capability executor trait.
//!
//! A capability is a named unit of work (an HTTP call, a model prompt, a
//! shell command). The engine resolves a step's input, then hands it to the
//! executor along with an `ExecutionContext` describing who is asking.

use std::future::Future;

use serde_json::Value;
use stepflow_types::workflow::StepUsage;

/// Call-site information passed to every capability invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Agent the step is assigned to.
    pub agent_id: String,
    /// Logical ID of the workflow the step belongs to.
    pub workflow_id: String,
    /// Deadline the engine enforces around the call, in milliseconds.
    pub timeout_ms: u64,
}

/// Result of a successful capability call.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityOutput {
    pub value: Value,
    pub usage: Option<StepUsage>,
}

impl CapabilityOutput {
    pub fn new(value: Value) -> Self {
        Self { value, usage: None }
    }

    pub fn with_usage(mut self, usage: StepUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

impl From<Value> for CapabilityOutput {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

/// Performs the work behind a named capability.
///
/// Implementations must be `Send + Sync` so the engine can share them across
/// concurrently running workflows.
pub trait CapabilityExecutor: Send + Sync {
    fn execute(
        &self,
        capability: &str,
        input: Value,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = Result<CapabilityOutput, CapabilityError>> + Send;
}

/// Errors a capability call can produce.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    #[error("capability '{capability}' failed: {message}")]
    Failed { capability: String, message: String },

    #[error("invalid capability input: {0}")]
    InvalidInput(String),
}
