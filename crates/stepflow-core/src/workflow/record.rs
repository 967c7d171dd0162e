//! Execution record writer.
//!
//! Wraps a `WorkflowStore` with the per-step and per-workflow writes the
//! engine makes while a workflow runs. Every write re-reads the latest record
//! by logical ID first, so it merges into whatever another writer persisted
//! in the meantime instead of overwriting it with a stale copy.

use std::sync::Arc;

use serde_json::Value;
use stepflow_types::error::RepositoryError;
use stepflow_types::workflow::{
    ErrorLogEntry, SharedContext, StepExecution, Workflow, WorkflowFilter, WorkflowPatch,
};

use crate::repository::workflow::WorkflowStore;

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// Replace the entry with the same `step_id`, or append if there is none.
pub fn merge_execution(log: &mut Vec<StepExecution>, entry: StepExecution) {
    match log.iter_mut().find(|e| e.step_id == entry.step_id) {
        Some(slot) => *slot = entry,
        None => log.push(entry),
    }
}

// ---------------------------------------------------------------------------
// RecordWriter
// ---------------------------------------------------------------------------

/// Persists execution state into workflow records.
///
/// Generic over `S: WorkflowStore` so it works with any storage backend
/// (SQLite, in-memory). Cheap to clone: the store is shared behind an `Arc`.
pub struct RecordWriter<S: WorkflowStore> {
    store: Arc<S>,
}

impl<S: WorkflowStore> Clone for RecordWriter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: WorkflowStore> RecordWriter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Load the latest record for `logical_id`.
    pub async fn load(&self, logical_id: &str) -> Result<Workflow, RecordError> {
        self.store
            .find(&WorkflowFilter::by_logical_id(logical_id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RecordError::WorkflowNotFound(logical_id.to_string()))
    }

    // -----------------------------------------------------------------------
    // Logs
    // -----------------------------------------------------------------------

    /// Merge `entry` into the execution log, keyed by step ID.
    pub async fn record_step(
        &self,
        logical_id: &str,
        entry: StepExecution,
    ) -> Result<(), RecordError> {
        let workflow = self.load(logical_id).await?;
        let step_id = entry.step_id.clone();
        let status = entry.status;

        let mut log = workflow.execution_log;
        merge_execution(&mut log, entry);
        self.store
            .update(&workflow.id, &WorkflowPatch::execution_log(log))
            .await?;

        tracing::debug!(workflow = logical_id, step_id, %status, "recorded step");
        Ok(())
    }

    /// Append an entry to the error log.
    pub async fn append_error(
        &self,
        logical_id: &str,
        entry: ErrorLogEntry,
    ) -> Result<(), RecordError> {
        let workflow = self.load(logical_id).await?;
        let mut log = workflow.error_log;
        log.push(entry);
        self.store
            .update(&workflow.id, &WorkflowPatch::error_log(log))
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Context
    // -----------------------------------------------------------------------

    /// Set a single context key on the latest context, last writer wins.
    ///
    /// Returns the context as persisted.
    pub async fn set_context_value(
        &self,
        logical_id: &str,
        key: &str,
        value: Value,
    ) -> Result<SharedContext, RecordError> {
        let workflow = self.load(logical_id).await?;
        let mut context = workflow.context;
        context.set(key, value);
        self.store
            .update(&workflow.id, &WorkflowPatch::context(context.clone()))
            .await?;
        Ok(context)
    }

    // -----------------------------------------------------------------------
    // Workflow-level fields
    // -----------------------------------------------------------------------

    pub async fn set_current_step(&self, logical_id: &str, index: usize) -> Result<(), RecordError> {
        self.patch(logical_id, WorkflowPatch::current_step_index(index))
            .await
    }

    async fn patch(&self, logical_id: &str, patch: WorkflowPatch) -> Result<(), RecordError> {
        let workflow = self.load(logical_id).await?;
        self.store.update(&workflow.id, &patch).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryWorkflowStore;
    use serde_json::json;
    use stepflow_types::workflow::{StepSpec, StepStatus, WorkflowDefinition, WorkflowStatus};

    async fn writer_with(logical_id: &str) -> RecordWriter<InMemoryWorkflowStore> {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let def = WorkflowDefinition {
            name: "flow".to_string(),
            version: "1.0.0".to_string(),
            steps: vec![StepSpec::new("a", "bot"), StepSpec::new("b", "bot")],
        };
        store
            .create(&Workflow::new(logical_id, "flow", def, SharedContext::new(), 0))
            .await
            .unwrap();
        RecordWriter::new(store)
    }

    #[test]
    fn test_merge_execution_replaces_slot() {
        let mut log = vec![
            StepExecution::new("a", StepStatus::InProgress),
            StepExecution::new("b", StepStatus::Completed),
        ];
        merge_execution(&mut log, StepExecution::new("a", StepStatus::Failed));
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].status, StepStatus::Failed);

        merge_execution(&mut log, StepExecution::new("c", StepStatus::Skipped));
        assert_eq!(log.len(), 3);
    }

    #[tokio::test]
    async fn test_record_step_keeps_one_entry_per_step() {
        let writer = writer_with("wf").await;
        writer
            .record_step("wf", StepExecution::new("a", StepStatus::InProgress))
            .await
            .unwrap();
        writer
            .record_step("wf", StepExecution::new("a", StepStatus::Completed))
            .await
            .unwrap();

        let wf = writer.load("wf").await.unwrap();
        assert_eq!(wf.execution_log.len(), 1);
        assert_eq!(wf.step_status("a"), Some(StepStatus::Completed));
    }

    #[tokio::test]
    async fn test_append_error_accumulates() {
        let writer = writer_with("wf").await;
        writer
            .append_error("wf", ErrorLogEntry::now("a", "first"))
            .await
            .unwrap();
        writer
            .append_error("wf", ErrorLogEntry::now("a", "second"))
            .await
            .unwrap();
        let wf = writer.load("wf").await.unwrap();
        let errors: Vec<_> = wf.error_log.iter().map(|e| e.error.as_str()).collect();
        assert_eq!(errors, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_set_context_value_merges_into_latest() {
        let writer = writer_with("wf").await;
        writer
            .set_context_value("wf", "a", json!("first"))
            .await
            .unwrap();
        let ctx = writer
            .set_context_value("wf", "b", json!(2))
            .await
            .unwrap();
        assert_eq!(ctx.get("a"), Some(&json!("first")));
        assert_eq!(writer.load("wf").await.unwrap().context, ctx);
    }

    #[tokio::test]
    async fn test_set_current_step_leaves_status_alone() {
        let writer = writer_with("wf").await;
        writer.set_current_step("wf", 1).await.unwrap();

        let wf = writer.load("wf").await.unwrap();
        assert_eq!(wf.current_step_index, 1);
        assert_eq!(wf.status, WorkflowStatus::Pending);
        assert_eq!(wf.retry_attempts, 0);
    }

    #[tokio::test]
    async fn test_missing_workflow() {
        let writer = writer_with("wf").await;
        let err = writer.load("other").await.unwrap_err();
        assert!(matches!(err, RecordError::WorkflowNotFound(id) if id == "other"));
    }
}
