//! Workflow orchestrator: drives a workflow's step list to completion.
//!
//! The `WorkflowEngine` owns the workflow state machine:
//!
//! ```text
//! pending | failed -> in_progress -> completed | failed
//! in_progress -> in_progress (whole-workflow retry, claim kept)
//! pending | in_progress | failed -> cancelled
//! ```
//!
//! # Execution flow
//!
//! 1. Load the record by logical ID. `completed`/`cancelled` return as-is.
//! 2. Claim the workflow with a conditional `{pending, failed} -> in_progress`
//!    transition. Losing the claim means another loop is active.
//! 3. Walk the steps in definition order. Before each step the record is
//!    re-read: a `cancelled` status stops the walk, an already completed step
//!    is passed over, unmet prerequisites defer the step, a false condition
//!    records it `skipped`. Everything else goes to the `StepRunner`.
//! 4. On success transition `in_progress -> completed`. On an unrecovered
//!    step failure log the error; while the retry budget allows, bump the
//!    retry counter in the same conditional write that keeps the workflow
//!    `in_progress` and go again from step 3, otherwise settle on `failed`.
//!
//! At most one loop drives a workflow at a time. Every entry point takes the
//! claim through a conditional transition, and a running loop never releases
//! it until it settles.

use std::sync::Arc;

use stepflow_types::config::EngineConfig;
use stepflow_types::error::RepositoryError;
use stepflow_types::event::WorkflowEvent;
use stepflow_types::workflow::{
    ErrorLogEntry, NewWorkflow, StepExecution, StepStatus, Workflow, WorkflowFilter,
    WorkflowPatch, WorkflowStatus,
};
use tracing::{debug, info, warn};

use crate::capability::agent::AgentStateProvider;
use crate::capability::executor::CapabilityExecutor;
use crate::event::EventBus;
use crate::repository::workflow::WorkflowStore;

use super::condition::evaluate_condition;
use super::definition::{DefinitionError, validate_definition};
use super::dependency::unmet_dependencies;
use super::record::{RecordError, RecordWriter};
use super::step_runner::{StepError, StepRunner};

/// Result of trying to take ownership of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    Claimed,
    /// The workflow reached a final status first.
    Settled(WorkflowStatus),
}

/// How a single pass over the step list ended.
#[derive(Debug)]
enum PassOutcome {
    Completed,
    Cancelled,
    Failed { step_id: String, error: String },
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Sequential workflow engine.
///
/// Generic over the store, the capability executor and the agent-state
/// provider. `Send + Sync`; share it behind an `Arc` to run distinct
/// workflows concurrently.
pub struct WorkflowEngine<S, C, A>
where
    S: WorkflowStore,
    C: CapabilityExecutor,
    A: AgentStateProvider,
{
    records: RecordWriter<S>,
    runner: StepRunner<S, C, A>,
    config: EngineConfig,
    events: EventBus,
}

impl<S, C, A> WorkflowEngine<S, C, A>
where
    S: WorkflowStore,
    C: CapabilityExecutor,
    A: AgentStateProvider,
{
    pub fn new(
        store: Arc<S>,
        executor: Arc<C>,
        agents: Arc<A>,
        config: EngineConfig,
        events: EventBus,
    ) -> Self {
        let records = RecordWriter::new(store);
        let runner = StepRunner::new(
            records.clone(),
            executor,
            agents,
            config.clone(),
            events.clone(),
        );
        Self {
            records,
            runner,
            config,
            events,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        self.records.store()
    }

    /// Event bus the engine publishes lifecycle events on.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Creation and queries
    // -----------------------------------------------------------------------

    /// Validate and persist a new `pending` workflow.
    pub async fn create_workflow(&self, new: NewWorkflow) -> Result<Workflow, EngineError> {
        validate_definition(&new.definition)?;

        let logical_id = new.logical_id;
        if !self
            .store()
            .find(&WorkflowFilter::by_logical_id(&logical_id))
            .await?
            .is_empty()
        {
            return Err(EngineError::DuplicateWorkflow(logical_id));
        }

        let name = new.name.unwrap_or_else(|| new.definition.name.clone());
        let max_retries = new.max_retries.unwrap_or(self.config.default_max_retries);
        let workflow = Workflow::new(
            logical_id.clone(),
            name,
            new.definition,
            new.initial_context,
            max_retries,
        );

        let created = self.store().create(&workflow).await.map_err(|e| match e {
            RepositoryError::Conflict(_) => EngineError::DuplicateWorkflow(logical_id.clone()),
            other => EngineError::Repository(other),
        })?;

        info!(
            workflow = %created.logical_id,
            steps = created.definition.steps.len(),
            max_retries,
            "workflow created"
        );
        Ok(created)
    }

    pub async fn get_workflow(&self, logical_id: &str) -> Result<Workflow, EngineError> {
        Ok(self.records.load(logical_id).await?)
    }

    pub async fn list_workflows(
        &self,
        filter: &WorkflowFilter,
    ) -> Result<Vec<Workflow>, EngineError> {
        Ok(self.store().find(filter).await?)
    }

    /// Workflows left `in_progress`, e.g. by a process that crashed mid-run.
    pub async fn list_interrupted(&self) -> Result<Vec<Workflow>, EngineError> {
        self.list_workflows(&WorkflowFilter::by_status(WorkflowStatus::InProgress))
            .await
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run the workflow to a resting status and return it.
    ///
    /// Step failures are reported through the returned status, not as `Err`.
    pub async fn execute_workflow(&self, logical_id: &str) -> Result<WorkflowStatus, EngineError> {
        let workflow = self.records.load(logical_id).await?;
        if workflow.status.is_final() {
            debug!(workflow = logical_id, status = %workflow.status, "nothing to execute");
            return Ok(workflow.status);
        }

        match self.claim(&workflow).await? {
            Claim::Claimed => self.drive(logical_id).await,
            Claim::Settled(status) => Ok(status),
        }
    }

    /// `{pending, failed} -> in_progress`.
    ///
    /// Losing the transition to a concurrent completion or cancellation
    /// yields `Claim::Settled`; losing it to another active loop is
    /// `EngineError::AlreadyRunning`.
    async fn claim(&self, workflow: &Workflow) -> Result<Claim, EngineError> {
        let claimed = self
            .store()
            .transition_status(
                &workflow.id,
                &[WorkflowStatus::Pending, WorkflowStatus::Failed],
                WorkflowStatus::InProgress,
            )
            .await?;
        if claimed.is_some() {
            return Ok(Claim::Claimed);
        }

        let latest = self.records.load(&workflow.logical_id).await?;
        if latest.status.is_final() {
            return Ok(Claim::Settled(latest.status));
        }
        Err(EngineError::AlreadyRunning {
            logical_id: workflow.logical_id.clone(),
            status: latest.status,
        })
    }

    /// The claimed loop: passes over the step list until a resting status.
    async fn drive(&self, logical_id: &str) -> Result<WorkflowStatus, EngineError> {
        loop {
            let workflow = self.records.load(logical_id).await?;
            self.events.publish(WorkflowEvent::WorkflowStarted {
                logical_id: logical_id.to_string(),
                retry_attempt: workflow.retry_attempts,
            });
            info!(
                workflow = logical_id,
                retry_attempt = workflow.retry_attempts,
                "workflow started"
            );

            match self.run_pass(&workflow).await? {
                PassOutcome::Completed => return self.finish_completed(&workflow).await,
                PassOutcome::Cancelled => {
                    info!(workflow = logical_id, "workflow cancelled, stopping");
                    self.events.publish(WorkflowEvent::WorkflowCancelled {
                        logical_id: logical_id.to_string(),
                    });
                    return Ok(WorkflowStatus::Cancelled);
                }
                PassOutcome::Failed { step_id, error } => {
                    if let Some(status) = self.settle_failure(logical_id, &step_id, &error).await? {
                        return Ok(status);
                    }
                }
            }
        }
    }

    /// One pass over the step list in definition order.
    async fn run_pass(&self, workflow: &Workflow) -> Result<PassOutcome, EngineError> {
        let logical_id = workflow.logical_id.as_str();
        let mut deferred = Vec::new();

        for (index, step) in workflow.definition.steps.iter().enumerate() {
            let current = self.records.load(logical_id).await?;
            if current.status == WorkflowStatus::Cancelled {
                return Ok(PassOutcome::Cancelled);
            }

            if current.step_status(&step.id) == Some(StepStatus::Completed) {
                debug!(workflow = logical_id, step_id = %step.id, "step already completed");
                continue;
            }

            let unmet = unmet_dependencies(step, &current.execution_log);
            if !unmet.is_empty() {
                debug!(
                    workflow = logical_id,
                    step_id = %step.id,
                    waiting_on = ?unmet,
                    "step deferred, prerequisites not completed"
                );
                self.events.publish(WorkflowEvent::StepDeferred {
                    logical_id: logical_id.to_string(),
                    step_id: step.id.clone(),
                    waiting_on: unmet.iter().map(|d| d.to_string()).collect(),
                });
                deferred.push(step.id.as_str());
                continue;
            }

            if let Some(condition) = step.condition.as_deref() {
                if !evaluate_condition(condition, &current.context) {
                    self.records
                        .record_step(logical_id, StepExecution::skipped(&step.id))
                        .await?;
                    self.events.publish(WorkflowEvent::StepSkipped {
                        logical_id: logical_id.to_string(),
                        step_id: step.id.clone(),
                    });
                    info!(workflow = logical_id, step_id = %step.id, condition, "step skipped");
                    continue;
                }
            }

            self.records.set_current_step(logical_id, index).await?;
            match self.runner.run_step(logical_id, step).await {
                Ok(_) => {}
                Err(StepError::Record(e)) => return Err(e.into()),
                Err(e) => {
                    return Ok(PassOutcome::Failed {
                        step_id: step.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if !deferred.is_empty() {
            warn!(
                workflow = logical_id,
                steps = ?deferred,
                "workflow finishing with steps that never became eligible"
            );
        }
        Ok(PassOutcome::Completed)
    }

    async fn finish_completed(&self, workflow: &Workflow) -> Result<WorkflowStatus, EngineError> {
        let logical_id = workflow.logical_id.as_str();
        let done = self
            .store()
            .transition_status(
                &workflow.id,
                &[WorkflowStatus::InProgress],
                WorkflowStatus::Completed,
            )
            .await?;
        if done.is_none() {
            // Cancelled while the last step ran.
            return self.current_status(logical_id).await;
        }

        self.records
            .set_current_step(logical_id, workflow.definition.steps.len())
            .await?;
        self.events.publish(WorkflowEvent::WorkflowCompleted {
            logical_id: logical_id.to_string(),
        });
        info!(workflow = logical_id, "workflow completed");
        Ok(WorkflowStatus::Completed)
    }

    /// Handle an unrecovered step failure while holding the claim.
    ///
    /// Logs the error, then either bumps the retry counter with a conditional
    /// `in_progress -> in_progress` write (returns `None`: run another pass)
    /// or settles on `failed`. A workflow cancelled meanwhile returns its
    /// current status.
    async fn settle_failure(
        &self,
        logical_id: &str,
        step_id: &str,
        error: &str,
    ) -> Result<Option<WorkflowStatus>, EngineError> {
        self.records
            .append_error(logical_id, ErrorLogEntry::now(step_id, error))
            .await?;

        let workflow = self.records.load(logical_id).await?;
        let retry = workflow.retry_attempts < workflow.max_retries;
        let next = workflow.retry_attempts + 1;
        let (to, patch) = if retry {
            (
                WorkflowStatus::InProgress,
                WorkflowPatch::default().with_retry_attempts(next),
            )
        } else {
            (WorkflowStatus::Failed, WorkflowPatch::default())
        };

        let settled = self
            .store()
            .transition_status_with(&workflow.id, &[WorkflowStatus::InProgress], to, &patch)
            .await?;
        if settled.is_none() {
            // Cancelled while the failing step ran.
            return self.current_status(logical_id).await.map(Some);
        }

        self.events.publish(WorkflowEvent::WorkflowFailed {
            logical_id: logical_id.to_string(),
            step_id: step_id.to_string(),
            error: error.to_string(),
        });

        if !retry {
            warn!(
                workflow = logical_id,
                step_id,
                error,
                retry_attempts = workflow.retry_attempts,
                max_retries = workflow.max_retries,
                "workflow failed, retries exhausted"
            );
            return Ok(Some(WorkflowStatus::Failed));
        }

        self.events.publish(WorkflowEvent::WorkflowRetryScheduled {
            logical_id: logical_id.to_string(),
            retry_attempt: next,
            max_retries: workflow.max_retries,
        });
        info!(
            workflow = logical_id,
            step_id,
            error,
            retry_attempt = next,
            max_retries = workflow.max_retries,
            "workflow failed, retrying"
        );
        Ok(None)
    }

    async fn current_status(&self, logical_id: &str) -> Result<WorkflowStatus, EngineError> {
        Ok(self.records.load(logical_id).await?.status)
    }

    // -----------------------------------------------------------------------
    // Retry, recovery and cancellation
    // -----------------------------------------------------------------------

    /// Manually retry a `failed` (or never started `pending`) workflow.
    ///
    /// Claims the workflow and bumps its retry counter in one conditional
    /// write, then runs it. This is an operator action: the counter is bumped
    /// even when it already reached `max_retries`, and automatic retries after
    /// it are still bounded by `max_retries`.
    ///
    /// A workflow that is `in_progress` is rejected with `AlreadyRunning`,
    /// since its loop may still be live. See [`Self::recover_workflow`].
    pub async fn retry_workflow(&self, logical_id: &str) -> Result<WorkflowStatus, EngineError> {
        let workflow = self.records.load(logical_id).await?;
        if !matches!(workflow.status, WorkflowStatus::Failed | WorkflowStatus::Pending) {
            return Err(retry_rejected(logical_id, workflow.status));
        }

        let patch = WorkflowPatch::default().with_retry_attempts(workflow.retry_attempts + 1);
        let claimed = self
            .store()
            .transition_status_with(
                &workflow.id,
                &[WorkflowStatus::Failed, WorkflowStatus::Pending],
                WorkflowStatus::InProgress,
                &patch,
            )
            .await?;
        let Some(previous) = claimed else {
            let status = self.current_status(logical_id).await?;
            return Err(retry_rejected(logical_id, status));
        };

        self.announce_retry(&previous, "manual workflow retry");
        self.drive(logical_id).await
    }

    /// Resume a workflow left `in_progress` by a process that died mid-run.
    ///
    /// The store cannot tell a dead loop from a live one, so the caller
    /// asserts that no loop for `logical_id` is running (for example after a
    /// restart, for workflows reported by [`Self::list_interrupted`]). Calling
    /// this while a loop is live runs steps twice.
    ///
    /// Takes over the claim and bumps the retry counter in one conditional
    /// write. Any status other than `in_progress` is `InvalidTransition`.
    pub async fn recover_workflow(&self, logical_id: &str) -> Result<WorkflowStatus, EngineError> {
        let workflow = self.records.load(logical_id).await?;
        let patch = WorkflowPatch::default().with_retry_attempts(workflow.retry_attempts + 1);
        let taken = self
            .store()
            .transition_status_with(
                &workflow.id,
                &[WorkflowStatus::InProgress],
                WorkflowStatus::InProgress,
                &patch,
            )
            .await?;
        let Some(previous) = taken else {
            return Err(EngineError::InvalidTransition {
                logical_id: logical_id.to_string(),
                status: self.current_status(logical_id).await?,
            });
        };

        self.announce_retry(&previous, "recovering interrupted workflow");
        self.drive(logical_id).await
    }

    fn announce_retry(&self, previous: &Workflow, message: &'static str) {
        let next = previous.retry_attempts + 1;
        self.events.publish(WorkflowEvent::WorkflowRetryScheduled {
            logical_id: previous.logical_id.clone(),
            retry_attempt: next,
            max_retries: previous.max_retries,
        });
        info!(
            workflow = %previous.logical_id,
            from = %previous.status,
            retry_attempt = next,
            "{}",
            message
        );
    }

    /// Mark a workflow `cancelled`.
    ///
    /// Cooperative: an in-flight step finishes, and the running loop stops at
    /// the next step boundary. Cancelling a `completed` workflow is a no-op
    /// that returns `completed`.
    pub async fn cancel_workflow(&self, logical_id: &str) -> Result<WorkflowStatus, EngineError> {
        let workflow = self.records.load(logical_id).await?;
        if workflow.status.is_final() {
            return Ok(workflow.status);
        }

        let previous = self
            .store()
            .transition_status(
                &workflow.id,
                &[
                    WorkflowStatus::Pending,
                    WorkflowStatus::InProgress,
                    WorkflowStatus::Failed,
                ],
                WorkflowStatus::Cancelled,
            )
            .await?;
        match previous {
            Some(previous) => {
                self.events.publish(WorkflowEvent::WorkflowCancelled {
                    logical_id: logical_id.to_string(),
                });
                info!(workflow = logical_id, from = %previous.status, "workflow cancelled");
                Ok(WorkflowStatus::Cancelled)
            }
            None => self.current_status(logical_id).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("workflow '{0}' already exists")]
    DuplicateWorkflow(String),

    #[error("workflow '{logical_id}' is already being executed (status: {status})")]
    AlreadyRunning {
        logical_id: String,
        status: WorkflowStatus,
    },

    #[error("workflow '{logical_id}' does not allow this transition from status {status}")]
    InvalidTransition {
        logical_id: String,
        status: WorkflowStatus,
    },

    #[error("invalid workflow definition: {0}")]
    Definition(#[from] DefinitionError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Why a manual retry could not claim the workflow.
fn retry_rejected(logical_id: &str, status: WorkflowStatus) -> EngineError {
    let logical_id = logical_id.to_string();
    match status {
        WorkflowStatus::InProgress => EngineError::AlreadyRunning { logical_id, status },
        status => EngineError::InvalidTransition { logical_id, status },
    }
}

impl From<RecordError> for EngineError {
    fn from(e: RecordError) -> Self {
        match e {
            RecordError::WorkflowNotFound(id) => EngineError::WorkflowNotFound(id),
            RecordError::Repository(e) => EngineError::Repository(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
