//! SQLite workflow store implementation.
//!
//! Implements `WorkflowStore` from `stepflow-core` using sqlx with split
//! read/write pools. The definition, context, execution log and error log are
//! stored as JSON text columns; status is stored in its snake_case form.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use stepflow_core::repository::workflow::WorkflowStore;
use stepflow_types::error::RepositoryError;
use stepflow_types::workflow::{Workflow, WorkflowFilter, WorkflowPatch, WorkflowStatus};
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `WorkflowStore`.
pub struct SqliteWorkflowStore {
    pool: DatabasePool,
}

impl SqliteWorkflowStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct WorkflowRow {
    id: String,
    logical_id: String,
    name: String,
    status: String,
    definition: String,
    current_step_index: i64,
    context: String,
    execution_log: String,
    error_log: String,
    retry_attempts: i64,
    max_retries: i64,
    created_at: String,
    updated_at: String,
}

impl WorkflowRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            logical_id: row.try_get("logical_id")?,
            name: row.try_get("name")?,
            status: row.try_get("status")?,
            definition: row.try_get("definition")?,
            current_step_index: row.try_get("current_step_index")?,
            context: row.try_get("context")?,
            execution_log: row.try_get("execution_log")?,
            error_log: row.try_get("error_log")?,
            retry_attempts: row.try_get("retry_attempts")?,
            max_retries: row.try_get("max_retries")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_workflow(self) -> Result<Workflow, RepositoryError> {
        let status: WorkflowStatus = self
            .status
            .parse()
            .map_err(RepositoryError::Query)?;

        Ok(Workflow {
            id: parse_uuid(&self.id)?,
            logical_id: self.logical_id,
            name: self.name,
            status,
            definition: parse_json(&self.definition, "definition")?,
            current_step_index: to_usize(self.current_step_index, "current_step_index")?,
            context: parse_json(&self.context, "context")?,
            execution_log: parse_json(&self.execution_log, "execution_log")?,
            error_log: parse_json(&self.error_log, "error_log")?,
            retry_attempts: to_u32(self.retry_attempts, "retry_attempts")?,
            max_retries: to_u32(self.max_retries, "max_retries")?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_json<T: serde::de::DeserializeOwned>(s: &str, column: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid {column} JSON: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T, column: &str) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|e| RepositoryError::Query(format!("serialize {column}: {e}")))
}

fn to_u32(value: i64, column: &str) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| RepositoryError::Query(format!("{column} out of range: {value}")))
}

fn to_usize(value: i64, column: &str) -> Result<usize, RepositoryError> {
    usize::try_from(value)
        .map_err(|_| RepositoryError::Query(format!("{column} out of range: {value}")))
}

// ---------------------------------------------------------------------------
// WorkflowStore impl
// ---------------------------------------------------------------------------

impl WorkflowStore for SqliteWorkflowStore {
    async fn find(&self, filter: &WorkflowFilter) -> Result<Vec<Workflow>, RepositoryError> {
        let status = filter.status.map(|s| s.as_str());
        let rows = sqlx::query(
            "SELECT * FROM workflows
             WHERE (?1 IS NULL OR logical_id = ?1)
               AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at ASC, id ASC",
        )
        .bind(filter.logical_id.as_deref())
        .bind(status)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut workflows = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = WorkflowRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            workflows.push(r.into_workflow()?);
        }
        Ok(workflows)
    }

    async fn create(&self, workflow: &Workflow) -> Result<Workflow, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO workflows (id, logical_id, name, status, definition, current_step_index, context, execution_log, error_log, retry_attempts, max_retries, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.logical_id)
        .bind(&workflow.name)
        .bind(workflow.status.as_str())
        .bind(to_json(&workflow.definition, "definition")?)
        .bind(workflow.current_step_index as i64)
        .bind(to_json(&workflow.context, "context")?)
        .bind(to_json(&workflow.execution_log, "execution_log")?)
        .bind(to_json(&workflow.error_log, "error_log")?)
        .bind(i64::from(workflow.retry_attempts))
        .bind(i64::from(workflow.max_retries))
        .bind(format_datetime(&workflow.created_at))
        .bind(format_datetime(&workflow.updated_at))
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(workflow.clone()),
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("UNIQUE") => {
                Err(RepositoryError::Conflict(format!(
                    "logical_id '{}' already exists",
                    workflow.logical_id
                )))
            }
            Err(e) => Err(RepositoryError::Query(e.to_string())),
        }
    }

    async fn update(&self, id: &Uuid, patch: &WorkflowPatch) -> Result<(), RepositoryError> {
        let rows = execute_patch(&self.pool.writer, id, patch).await?;
        if rows == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn transition_status_with(
        &self,
        id: &Uuid,
        from: &[WorkflowStatus],
        to: WorkflowStatus,
        patch: &WorkflowPatch,
    ) -> Result<Option<Workflow>, RepositoryError> {
        // Read-check-write on the single writer connection, inside one
        // transaction, so no other write can interleave.
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let row = sqlx::query("SELECT * FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let Some(row) = row else {
            return Err(RepositoryError::NotFound);
        };
        let previous = WorkflowRow::from_row(&row)
            .map_err(|e| RepositoryError::Query(e.to_string()))?
            .into_workflow()?;

        if !from.contains(&previous.status) {
            // Dropping the transaction rolls it back.
            return Ok(None);
        }

        let patch = WorkflowPatch {
            status: Some(to),
            ..patch.clone()
        };
        execute_patch(&mut *tx, id, &patch).await?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tracing::debug!(
            workflow = %previous.logical_id,
            from = %previous.status,
            to = %to,
            "status transition"
        );
        Ok(Some(previous))
    }
}

/// Run the COALESCE update for `patch` and return the affected row count.
///
/// `current_step_index` is clamped to the number of steps in the stored
/// definition.
async fn execute_patch<'e, E>(
    executor: E,
    id: &Uuid,
    patch: &WorkflowPatch,
) -> Result<u64, RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let context = patch
        .context
        .as_ref()
        .map(|c| to_json(c, "context"))
        .transpose()?;
    let execution_log = patch
        .execution_log
        .as_ref()
        .map(|l| to_json(l, "execution_log"))
        .transpose()?;
    let error_log = patch
        .error_log
        .as_ref()
        .map(|l| to_json(l, "error_log"))
        .transpose()?;

    let result = sqlx::query(
        "UPDATE workflows SET
            status = COALESCE(?, status),
            current_step_index = MIN(
                COALESCE(?, current_step_index),
                json_array_length(definition, '$.steps')
            ),
            context = COALESCE(?, context),
            execution_log = COALESCE(?, execution_log),
            error_log = COALESCE(?, error_log),
            retry_attempts = COALESCE(?, retry_attempts),
            updated_at = ?
         WHERE id = ?",
    )
    .bind(patch.status.map(|s| s.as_str()))
    .bind(patch.current_step_index.map(|i| i as i64))
    .bind(context)
    .bind(execution_log)
    .bind(error_log)
    .bind(patch.retry_attempts.map(i64::from))
    .bind(format_datetime(&Utc::now()))
    .bind(id.to_string())
    .execute(executor)
    .await
    .map_err(|e| RepositoryError::Query(e.to_string()))?;

    Ok(result.rows_affected())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepflow_types::workflow::{
        ErrorLogEntry, SharedContext, StepExecution, StepSpec, StepStatus, WorkflowDefinition,
    };

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    fn sample(logical_id: &str) -> Workflow {
        let mut fetch = StepSpec::new("fetch", "crawler");
        fetch.capability = Some("http.get".to_string());
        fetch.input = Some([("url".to_string(), json!("context.target"))].into_iter().collect());
        let mut publish = StepSpec::new("publish", "publisher");
        publish.depends_on = vec!["fetch".to_string()];
        publish.condition = Some("exists(fetch)".to_string());

        let mut context = SharedContext::new();
        context.set("target", json!("https://example.com"));
        Workflow::new(
            logical_id,
            "Nightly report",
            WorkflowDefinition {
                name: "nightly-report".to_string(),
                version: "1.0.0".to_string(),
                steps: vec![fetch, publish],
            },
            context,
            2,
        )
    }

    #[tokio::test]
    async fn test_create_and_find_roundtrip() {
        let store = SqliteWorkflowStore::new(test_pool().await);
        let wf = sample("nightly-1");
        store.create(&wf).await.unwrap();

        let found = store
            .find(&WorkflowFilter::by_logical_id("nightly-1"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        let loaded = &found[0];
        assert_eq!(loaded.id, wf.id);
        assert_eq!(loaded.status, WorkflowStatus::Pending);
        assert_eq!(loaded.definition, wf.definition);
        assert_eq!(loaded.context, wf.context);
        assert_eq!(loaded.max_retries, 2);
    }

    #[tokio::test]
    async fn test_create_duplicate_logical_id_conflicts() {
        let store = SqliteWorkflowStore::new(test_pool().await);
        store.create(&sample("dup")).await.unwrap();
        let err = store.create(&sample("dup")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_find_filters_and_orders() {
        let store = SqliteWorkflowStore::new(test_pool().await);
        let first = store.create(&sample("a")).await.unwrap();
        store.create(&sample("b")).await.unwrap();
        store
            .update(&first.id, &WorkflowPatch::status(WorkflowStatus::Failed))
            .await
            .unwrap();

        let all = store.find(&WorkflowFilter::all()).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|w| w.logical_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let failed = store
            .find(&WorkflowFilter::by_status(WorkflowStatus::Failed))
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].logical_id, "a");

        assert!(store
            .find(&WorkflowFilter::by_logical_id("missing"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_partial_update_leaves_other_columns() {
        let store = SqliteWorkflowStore::new(test_pool().await);
        let wf = store.create(&sample("p")).await.unwrap();

        let mut entry = StepExecution::new("fetch", StepStatus::Completed);
        entry.output = Some(json!({"status": 200}));
        store
            .update(&wf.id, &WorkflowPatch::execution_log(vec![entry.clone()]))
            .await
            .unwrap();
        store
            .update(
                &wf.id,
                &WorkflowPatch::error_log(vec![ErrorLogEntry::now("publish", "boom")])
                    .with_retry_attempts(1),
            )
            .await
            .unwrap();

        let loaded = &store.find(&WorkflowFilter::by_logical_id("p")).await.unwrap()[0];
        assert_eq!(loaded.execution_log, vec![entry]);
        assert_eq!(loaded.error_log.len(), 1);
        assert_eq!(loaded.retry_attempts, 1);
        assert_eq!(loaded.status, WorkflowStatus::Pending);
        assert_eq!(loaded.context, wf.context);
        assert!(loaded.updated_at >= wf.updated_at);
    }

    #[tokio::test]
    async fn test_update_clamps_step_index() {
        let store = SqliteWorkflowStore::new(test_pool().await);
        let wf = store.create(&sample("idx")).await.unwrap();
        store
            .update(&wf.id, &WorkflowPatch::current_step_index(1))
            .await
            .unwrap();
        let loaded = &store.find(&WorkflowFilter::by_logical_id("idx")).await.unwrap()[0];
        assert_eq!(loaded.current_step_index, 1);

        store
            .update(&wf.id, &WorkflowPatch::current_step_index(50))
            .await
            .unwrap();
        let loaded = &store.find(&WorkflowFilter::by_logical_id("idx")).await.unwrap()[0];
        assert_eq!(loaded.current_step_index, 2);
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = SqliteWorkflowStore::new(test_pool().await);
        let err = store
            .update(&Uuid::now_v7(), &WorkflowPatch::status(WorkflowStatus::Failed))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_transition_status_compare_and_swap() {
        let store = SqliteWorkflowStore::new(test_pool().await);
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

        let loaded = &store.find(&WorkflowFilter::by_logical_id("cas")).await.unwrap()[0];
        assert_eq!(loaded.status, WorkflowStatus::InProgress);

        let err = store
            .transition_status(&Uuid::now_v7(), &claimable, WorkflowStatus::InProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let store = std::sync::Arc::new(SqliteWorkflowStore::new(test_pool().await));
        let wf = store.create(&sample("race")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = std::sync::Arc::clone(&store);
            let id = wf.id;
            handles.push(tokio::spawn(async move {
                store
                    .transition_status(&id, &[WorkflowStatus::Pending], WorkflowStatus::InProgress)
                    .await
                    .unwrap()
                    .is_some()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_transition_with_patch_is_one_write() {
        let store = SqliteWorkflowStore::new(test_pool().await);
        let wf = store.create(&sample("retry")).await.unwrap();
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
        let loaded = &store.find(&WorkflowFilter::by_logical_id("retry")).await.unwrap()[0];
        assert_eq!(loaded.retry_attempts, 0);
        assert_eq!(loaded.status, WorkflowStatus::Pending);

        let taken = store
            .transition_status_with(
                &wf.id,
                &[WorkflowStatus::Pending, WorkflowStatus::Failed],
                WorkflowStatus::InProgress,
                &bump,
            )
            .await
            .unwrap();
        assert_eq!(taken.map(|p| p.retry_attempts), Some(0));
        let loaded = &store.find(&WorkflowFilter::by_logical_id("retry")).await.unwrap()[0];
        assert_eq!(loaded.status, WorkflowStatus::InProgress);
        assert_eq!(loaded.retry_attempts, 1);
        assert_eq!(loaded.context.get("target"), Some(&json!("https://example.com")));
    }
}
