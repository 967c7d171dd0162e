//! In-memory workflow store.
//!
//! Backs embedded use of the engine and the engine's own tests. Every
//! operation holds the map lock for its whole duration, so
//! `transition_status` is atomic.

use std::collections::HashMap;

use stepflow_types::error::RepositoryError;
use stepflow_types::workflow::{Workflow, WorkflowFilter, WorkflowPatch, WorkflowStatus};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::workflow::WorkflowStore;

/// `WorkflowStore` kept in a process-local map keyed by storage ID.
#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    workflows: RwLock<HashMap<Uuid, Workflow>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored workflows.
    pub async fn len(&self) -> usize {
        self.workflows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workflows.read().await.is_empty()
    }
}

impl WorkflowStore for InMemoryWorkflowStore {
    async fn find(&self, filter: &WorkflowFilter) -> Result<Vec<Workflow>, RepositoryError> {
        let store = self.workflows.read().await;
        let mut found: Vec<Workflow> = store
            .values()
            .filter(|wf| filter.matches(wf))
            .cloned()
            .collect();
        found.sort_by_key(|wf| wf.created_at);
        Ok(found)
    }

    async fn create(&self, workflow: &Workflow) -> Result<Workflow, RepositoryError> {
        let mut store = self.workflows.write().await;
        if store
            .values()
            .any(|existing| existing.logical_id == workflow.logical_id)
        {
            return Err(RepositoryError::Conflict(format!(
                "logical_id '{}' already exists",
                workflow.logical_id
            )));
        }
        store.insert(workflow.id, workflow.clone());
        Ok(workflow.clone())
    }

    async fn update(&self, id: &Uuid, patch: &WorkflowPatch) -> Result<(), RepositoryError> {
        let mut store = self.workflows.write().await;
        let workflow = store.get_mut(id).ok_or(RepositoryError::NotFound)?;
        patch.apply_to(workflow);
        Ok(())
    }

    async fn transition_status_with(
        &self,
        id: &Uuid,
        from: &[WorkflowStatus],
        to: WorkflowStatus,
        patch: &WorkflowPatch,
    ) -> Result<Option<Workflow>, RepositoryError> {
        let mut store = self.workflows.write().await;
        let workflow = store.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if !from.contains(&workflow.status) {
            return Ok(None);
        }
        let previous = workflow.clone();
        let patch = WorkflowPatch {
            status: Some(to),
            ..patch.clone()
        };
        patch.apply_to(workflow);
        Ok(Some(previous))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepflow_types::workflow::{SharedContext, StepSpec, WorkflowDefinition};

    fn sample(logical_id: &str) -> Workflow {
        let mut ctx = SharedContext::new();
        ctx.set("region", json!("eu"));
        Workflow::new(
            logical_id,
            "sample",
            WorkflowDefinition {
                name: "sample".to_string(),
                version: "1.0.0".to_string(),
                steps: vec![StepSpec::new("only", "agent-1")],
            },
            ctx,
            1,
        )
    }

    #[tokio::test]
    async fn test_create_and_find_by_logical_id() {
        let store = InMemoryWorkflowStore::new();
        store.create(&sample("a")).await.unwrap();
        store.create(&sample("b")).await.unwrap();

        let found = store.find(&WorkflowFilter::by_logical_id("b")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].logical_id, "b");
        assert_eq!(store.find(&WorkflowFilter::all()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_logical_id() {
        let store = InMemoryWorkflowStore::new();
        store.create(&sample("dup")).await.unwrap();
        let err = store.create(&sample("dup")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_applies_patch() {
        let store = InMemoryWorkflowStore::new();
        let wf = store.create(&sample("p")).await.unwrap();
        store
            .update(&wf.id, &WorkflowPatch::status(WorkflowStatus::Failed).with_retry_attempts(1))
            .await
            .unwrap();
        let loaded = &store.find(&WorkflowFilter::by_logical_id("p")).await.unwrap()[0];
        assert_eq!(loaded.status, WorkflowStatus::Failed);
        assert_eq!(loaded.retry_attempts, 1);
        assert_eq!(loaded.context.get("region"), Some(&json!("eu")));
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = InMemoryWorkflowStore::new();
        let err = store
            .update(&Uuid::now_v7(), &WorkflowPatch::status(WorkflowStatus::Failed))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_transition_status_is_conditional() {
        let store = InMemoryWorkflowStore::new();
        let wf = store.create(&sample("cas")).await.unwrap();
        let claimable = [WorkflowStatus::Pending, WorkflowStatus::Failed];

        let first = store
            .transition_status(&wf.id, &claimable, WorkflowStatus::InProgress)
            .await
            .unwrap();
        assert_eq!(first.map(|p| p.status), Some(WorkflowStatus::Pending));

        let second = store
            .transition_status(&wf.id, &claimable, WorkflowStatus::InProgress)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_transition_with_patch_writes_both_or_neither() {
        let store = InMemoryWorkflowStore::new();
        let wf = store.create(&sample("bump")).await.unwrap();
        let bump = WorkflowPatch::default().with_retry_attempts(1);

        let missed = store
            .transition_status_with(
                &wf.id,
                &[WorkflowStatus::InProgress],
                WorkflowStatus::InProgress,
                &bump,
            )
            .await
            .unwrap();
        assert!(missed.is_none());
        let loaded = &store.find(&WorkflowFilter::by_logical_id("bump")).await.unwrap()[0];
        assert_eq!(loaded.retry_attempts, 0);

        let taken = store
            .transition_status_with(
                &wf.id,
                &[WorkflowStatus::Pending],
                WorkflowStatus::InProgress,
                &bump,
            )
            .await
            .unwrap();
        assert_eq!(taken.map(|p| p.retry_attempts), Some(0));
        let loaded = &store.find(&WorkflowFilter::by_logical_id("bump")).await.unwrap()[0];
        assert_eq!(loaded.status, WorkflowStatus::InProgress);
        assert_eq!(loaded.retry_attempts, 1);
    }
}
