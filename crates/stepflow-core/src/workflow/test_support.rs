//! Shared fixtures for engine tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use stepflow_types::config::EngineConfig;
use stepflow_types::workflow::{StepSpec, WorkflowDefinition};

use crate::capability::agent::StaticAgentStates;
use crate::capability::executor::{
    CapabilityError, CapabilityExecutor, CapabilityOutput, ExecutionContext,
};
use crate::event::EventBus;
use crate::repository::memory::InMemoryWorkflowStore;

use super::orchestrator::WorkflowEngine;

/// Capability executor that echoes its input and fails on request.
///
/// Every call is recorded. `fail_times(cap, n)` makes the next `n` calls to
/// `cap` fail; `always_fail(cap)` makes every call fail.
#[derive(Default)]
pub(crate) struct ScriptedExecutor {
    calls: Mutex<Vec<(String, Value, ExecutionContext)>>,
    failures: Mutex<HashMap<String, u32>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl ScriptedExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_times(self, capability: &str, times: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(capability.to_string(), times);
        self
    }

    pub(crate) fn always_fail(self, capability: &str) -> Self {
        self.fail_times(capability, u32::MAX)
    }

    pub(crate) fn with_delay(self, capability: &str, delay: Duration) -> Self {
        self.delays
            .lock()
            .unwrap()
            .insert(capability.to_string(), delay);
        self
    }

    pub(crate) fn call_count(&self, capability: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(cap, _, _)| cap == capability)
            .count()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn calls(&self) -> Vec<(String, Value, ExecutionContext)> {
        self.calls.lock().unwrap().clone()
    }
}

impl CapabilityExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        capability: &str,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<CapabilityOutput, CapabilityError> {
        self.calls
            .lock()
            .unwrap()
            .push((capability.to_string(), input.clone(), ctx.clone()));

        let delay = self.delays.lock().unwrap().get(capability).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let should_fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(capability) {
                Some(remaining) if *remaining > 0 => {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    true
                }
                _ => false,
            }
        };

        if should_fail {
            return Err(CapabilityError::Failed {
                capability: capability.to_string(),
                message: "scripted failure".to_string(),
            });
        }
        Ok(CapabilityOutput::new(input))
    }
}

pub(crate) type TestEngine = WorkflowEngine<InMemoryWorkflowStore, ScriptedExecutor, StaticAgentStates>;

/// Engine config with no retry backoff.
pub(crate) fn test_config() -> EngineConfig {
    EngineConfig {
        step_retry_backoff_ms: 0,
        ..EngineConfig::default()
    }
}

pub(crate) fn engine_with(executor: ScriptedExecutor, agents: StaticAgentStates) -> TestEngine {
    WorkflowEngine::new(
        Arc::new(InMemoryWorkflowStore::new()),
        Arc::new(executor),
        Arc::new(agents),
        test_config(),
        EventBus::new(256),
    )
}

pub(crate) fn engine(executor: ScriptedExecutor) -> TestEngine {
    engine_with(executor, StaticAgentStates::new())
}

/// A step bound to a capability named after the step itself.
pub(crate) fn step(id: &str) -> StepSpec {
    let mut step = StepSpec::new(id, "agent-1");
    step.capability = Some(id.to_string());
    step
}

pub(crate) fn definition(steps: Vec<StepSpec>) -> WorkflowDefinition {
    WorkflowDefinition {
        name: "test-flow".to_string(),
        version: "1.0.0".to_string(),
        steps,
    }
}
