//! Workflow store trait definition.
//!
//! Defines the persistence interface the engine consumes. The engine only
//! ever looks workflows up by logical ID (through `find`) and addresses the
//! storage ID solely when applying updates.

use std::future::Future;

use stepflow_types::error::RepositoryError;
use stepflow_types::workflow::{Workflow, WorkflowFilter, WorkflowPatch, WorkflowStatus};
use uuid::Uuid;

/// Storage interface for workflow records.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowStore: Send + Sync {
    /// Return every workflow matching `filter`, oldest first.
    fn find(
        &self,
        filter: &WorkflowFilter,
    ) -> impl Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    /// Insert a new workflow record.
    ///
    /// Fails with `RepositoryError::Conflict` if the logical ID is taken.
    fn create(
        &self,
        workflow: &Workflow,
    ) -> impl Future<Output = Result<Workflow, RepositoryError>> + Send;

    /// Apply a partial update to the record with storage ID `id`.
    ///
    /// Fails with `RepositoryError::NotFound` if no such record exists.
    fn update(
        &self,
        id: &Uuid,
        patch: &WorkflowPatch,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Atomically set `status = to` where the current status is one of `from`.
    ///
    /// Returns the record as it was before the update when the condition
    /// matched, and `None` when it did not (nothing is written).
    fn transition_status(
        &self,
        id: &Uuid,
        from: &[WorkflowStatus],
        to: WorkflowStatus,
    ) -> impl Future<Output = Result<Option<Workflow>, RepositoryError>> + Send {
        async move {
            let patch = WorkflowPatch::default();
            self.transition_status_with(id, from, to, &patch).await
        }
    }

    /// `transition_status` that also applies `patch` in the same atomic
    /// write. `patch.status` is ignored; the new status is always `to`.
    fn transition_status_with(
        &self,
        id: &Uuid,
        from: &[WorkflowStatus],
        to: WorkflowStatus,
        patch: &WorkflowPatch,
    ) -> impl Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;
}
