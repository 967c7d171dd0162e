//! Application state wiring the engine to its concrete adapters.
//!
//! The engine is generic over its store, capability executor and agent-state
//! provider; `AppState` pins it to SQLite, the builtin capability registry
//! and static agent states.

use std::path::PathBuf;
use std::sync::Arc;

use stepflow_core::capability::{CapabilityRegistry, StaticAgentStates};
use stepflow_core::event::EventBus;
use stepflow_core::event::bus::DEFAULT_EVENT_CAPACITY;
use stepflow_core::workflow::WorkflowEngine;
use stepflow_infra::config::load_engine_config;
use stepflow_infra::filesystem::{ensure_data_dir, resolve_data_dir};
use stepflow_infra::sqlite::pool::{DatabasePool, database_url};
use stepflow_infra::sqlite::workflow::SqliteWorkflowStore;

/// Engine pinned to the infra implementations.
pub type ConcreteEngine = WorkflowEngine<SqliteWorkflowStore, CapabilityRegistry, StaticAgentStates>;

/// Shared state for CLI command handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConcreteEngine>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Resolve the data directory, load config, open the database and build
    /// the engine.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        ensure_data_dir(&data_dir).await?;

        let config = load_engine_config(&data_dir).await;
        let pool = DatabasePool::new(&database_url(&data_dir)).await?;

        let engine = WorkflowEngine::new(
            Arc::new(SqliteWorkflowStore::new(pool)),
            Arc::new(CapabilityRegistry::with_builtins()),
            Arc::new(StaticAgentStates::new()),
            config,
            EventBus::new(DEFAULT_EVENT_CAPACITY),
        );

        tracing::debug!(data_dir = %data_dir.display(), "application state ready");

        Ok(Self {
            engine: Arc::new(engine),
            data_dir,
        })
    }
}
