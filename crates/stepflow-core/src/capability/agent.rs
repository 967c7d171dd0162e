//! Agent-state accessor.
//!
//! Before every step attempt the engine asks the provider for the assigned
//! agent's state. A lookup error fails that attempt; the state value itself
//! is opaque to the engine.

use std::collections::HashMap;
use std::future::Future;

use serde_json::{Value, json};

/// Read-only view of agent availability.
pub trait AgentStateProvider: Send + Sync {
    fn get_agent_state(
        &self,
        agent_id: &str,
    ) -> impl Future<Output = Result<Value, AgentStateError>> + Send;
}

/// Fixed agent table, for embedded use and tests.
///
/// Unknown agents resolve to `{"status": "available"}` unless the provider
/// was built with [`StaticAgentStates::strict`].
#[derive(Debug, Clone, Default)]
pub struct StaticAgentStates {
    states: HashMap<String, Value>,
    strict: bool,
}

impl StaticAgentStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider that reports `NotFound` for agents it has no entry for.
    pub fn strict() -> Self {
        Self {
            states: HashMap::new(),
            strict: true,
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>, state: Value) -> Self {
        self.states.insert(agent_id.into(), state);
        self
    }
}

impl AgentStateProvider for StaticAgentStates {
    async fn get_agent_state(&self, agent_id: &str) -> Result<Value, AgentStateError> {
        match self.states.get(agent_id) {
            Some(state) => {
                if state.get("status").and_then(Value::as_str) == Some("unavailable") {
                    let reason = state
                        .get("reason")
                        .and_then(Value::as_str)
                        .unwrap_or("marked unavailable")
                        .to_string();
                    return Err(AgentStateError::Unavailable {
                        agent_id: agent_id.to_string(),
                        reason,
                    });
                }
                Ok(state.clone())
            }
            None if self.strict => Err(AgentStateError::NotFound(agent_id.to_string())),
            None => Ok(json!({ "status": "available" })),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentStateError {
    #[error("agent not found: {0}")]
    NotFound(String),

    #[error("agent '{agent_id}' unavailable: {reason}")]
    Unavailable { agent_id: String, reason: String },
}
