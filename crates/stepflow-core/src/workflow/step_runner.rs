//! Step runner: executes a single workflow step.
//!
//! For each attempt the runner re-reads the workflow, resolves the step's
//! input from the live context, records the attempt as `in_progress`, checks
//! the assigned agent, and invokes the capability under a deadline. Failed
//! attempts are recorded and retried after a constant backoff until the
//! step's retry budget is spent.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{Value, json};
use stepflow_types::config::EngineConfig;
use stepflow_types::event::WorkflowEvent;
use stepflow_types::workflow::{StepErrorInfo, StepExecution, StepSpec, StepStatus};

use crate::capability::agent::{AgentStateError, AgentStateProvider};
use crate::capability::executor::{
    CapabilityError, CapabilityExecutor, CapabilityOutput, ExecutionContext,
};
use crate::event::EventBus;
use crate::repository::workflow::WorkflowStore;

use super::input::resolve_input;
use super::record::{RecordError, RecordWriter};

// ---------------------------------------------------------------------------
// StepOutcome / StepError
// ---------------------------------------------------------------------------

/// Result of a step that eventually succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub output: Value,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

/// Failure of a step attempt.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("agent '{agent_id}' unavailable")]
    AgentUnavailable {
        agent_id: String,
        #[source]
        source: AgentStateError,
    },

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("step timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Persisting step state failed. Never retried.
    #[error("failed to persist step state: {0}")]
    Record(#[from] RecordError),
}

/// Render `err` and its source chain, outermost first.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str("\ncaused by: ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Runs steps against a capability executor, persisting every attempt.
pub struct StepRunner<S, C, A>
where
    S: WorkflowStore,
    C: CapabilityExecutor,
    A: AgentStateProvider,
{
    records: RecordWriter<S>,
    executor: Arc<C>,
    agents: Arc<A>,
    config: EngineConfig,
    events: EventBus,
}

impl<S, C, A> StepRunner<S, C, A>
where
    S: WorkflowStore,
    C: CapabilityExecutor,
    A: AgentStateProvider,
{
    pub fn new(
        records: RecordWriter<S>,
        executor: Arc<C>,
        agents: Arc<A>,
        config: EngineConfig,
        events: EventBus,
    ) -> Self {
        Self {
            records,
            executor,
            agents,
            config,
            events,
        }
    }

    pub fn executor(&self) -> &Arc<C> {
        &self.executor
    }

    /// Deadline for one attempt of `step`, in milliseconds.
    pub fn timeout_ms(&self, step: &StepSpec) -> u64 {
        step.timeout_secs
            .unwrap_or(self.config.default_step_timeout_secs)
            .saturating_mul(1000)
    }

    /// Run `step` of workflow `logical_id` with retries.
    ///
    /// Makes `1 + step.max_retries` attempts at most. Returns the last
    /// attempt's error once the budget is spent. Record errors abort at once.
    pub async fn run_step(&self, logical_id: &str, step: &StepSpec) -> Result<StepOutcome, StepError> {
        let max_retries = step.max_retries.unwrap_or(0);
        let timeout_ms = self.timeout_ms(step);
        let mut attempt: u32 = 0;

        loop {
            let workflow = self.records.load(logical_id).await?;
            let input = resolve_input(step.input.as_ref(), &workflow.context);

            let mut entry = StepExecution {
                started_at: Some(Utc::now()),
                input: Some(input.clone()),
                ..StepExecution::new(&step.id, StepStatus::InProgress)
            };
            self.records.record_step(logical_id, entry.clone()).await?;
            self.events.publish(WorkflowEvent::StepStarted {
                logical_id: logical_id.to_string(),
                step_id: step.id.clone(),
                attempt,
            });
            tracing::debug!(workflow = logical_id, step_id = %step.id, attempt, "step attempt started");

            let started = Instant::now();
            let result = self.attempt(logical_id, step, input, timeout_ms).await;
            let duration_ms = started.elapsed().as_millis() as u64;
            entry.completed_at = Some(Utc::now());
            entry.duration_ms = Some(duration_ms);

            match result {
                Ok(output) => {
                    self.records
                        .set_context_value(logical_id, &step.id, output.value.clone())
                        .await?;

                    entry.status = StepStatus::Completed;
                    entry.output = Some(output.value.clone());
                    entry.usage = output.usage;
                    self.records.record_step(logical_id, entry).await?;

                    self.events.publish(WorkflowEvent::StepCompleted {
                        logical_id: logical_id.to_string(),
                        step_id: step.id.clone(),
                        duration_ms,
                    });
                    tracing::info!(
                        workflow = logical_id,
                        step_id = %step.id,
                        attempt,
                        duration_ms,
                        "step completed"
                    );
                    return Ok(StepOutcome {
                        output: output.value,
                        attempts: attempt + 1,
                    });
                }
                Err(e) => {
                    let will_retry = attempt < max_retries;
                    entry.status = StepStatus::Failed;
                    entry.error = Some(StepErrorInfo {
                        message: e.to_string(),
                        stack: Some(error_chain(&e)),
                        retry_count: attempt,
                    });
                    self.records.record_step(logical_id, entry).await?;

                    self.events.publish(WorkflowEvent::StepFailed {
                        logical_id: logical_id.to_string(),
                        step_id: step.id.clone(),
                        error: e.to_string(),
                        will_retry,
                    });
                    tracing::warn!(
                        workflow = logical_id,
                        step_id = %step.id,
                        attempt,
                        max_retries,
                        error = %e,
                        "step attempt failed"
                    );

                    if !will_retry {
                        return Err(e);
                    }
                    let backoff = self.config.step_retry_backoff();
                    if !backoff.is_zero() {
                        tokio::time::sleep(backoff).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// One attempt: agent check, then the capability call under a deadline.
    async fn attempt(
        &self,
        logical_id: &str,
        step: &StepSpec,
        input: Value,
        timeout_ms: u64,
    ) -> Result<CapabilityOutput, StepError> {
        self.agents
            .get_agent_state(&step.agent_id)
            .await
            .map_err(|source| StepError::AgentUnavailable {
                agent_id: step.agent_id.clone(),
                source,
            })?;

        let Some(capability) = step.capability.as_deref() else {
            return Ok(CapabilityOutput::new(json!({
                "message": "step executed without capability",
                "step_id": step.id,
            })));
        };

        let ctx = ExecutionContext {
            agent_id: step.agent_id.clone(),
            workflow_id: logical_id.to_string(),
            timeout_ms,
        };
        match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.executor.execute(capability, input, &ctx),
        )
        .await
        {
            Ok(result) => Ok(result?),
            Err(_) => Err(StepError::Timeout { timeout_ms }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
