//! Workflow domain types for stepflow.
//!
//! A `Workflow` is the persisted unit of orchestration: an ordered list of
//! `StepSpec`s plus the mutable execution state (status, shared context,
//! execution log, error log, retry counter). `WorkflowPatch` and
//! `WorkflowFilter` describe partial updates and lookups against a store.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Definition
// ---------------------------------------------------------------------------

/// The immutable definition of a workflow: a name, a version, and an ordered
/// step list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Human-readable definition name.
    pub name: String,
    /// Definition version string (e.g. "1.0.0").
    #[serde(default = "default_version")]
    pub version: String,
    /// Steps in execution order.
    pub steps: Vec<StepSpec>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// A single step in a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Step ID, unique within the workflow.
    pub id: String,
    /// Agent responsible for running this step.
    #[serde(alias = "agent")]
    pub agent_id: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Step IDs that must be `completed` before this step runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Per-step timeout in seconds (engine default when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Number of retries after the first failed attempt (default 0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Capability to invoke. Steps without one succeed trivially.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    /// Input mapping. String values of the form `context.<key>` are
    /// references into the shared context; everything else is a literal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<BTreeMap<String, Value>>,
    /// Optional gate, e.g. `exists(report)` or `equals(flag, "yes")`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl StepSpec {
    /// Create a step with only the required fields set.
    pub fn new(id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            description: String::new(),
            depends_on: Vec::new(),
            timeout_secs: None,
            max_retries: None,
            capability: None,
            input: None,
            condition: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Overall status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Stable string form, as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::InProgress => "in_progress",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses after which the engine takes no further action.
    pub fn is_final(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Cancelled)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WorkflowStatus::Pending),
            "in_progress" => Ok(WorkflowStatus::InProgress),
            "completed" => Ok(WorkflowStatus::Completed),
            "failed" => Ok(WorkflowStatus::Failed),
            "cancelled" => Ok(WorkflowStatus::Cancelled),
            other => Err(format!("invalid workflow status: '{other}'")),
        }
    }
}

/// Status of a single step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Shared context
// ---------------------------------------------------------------------------

/// Workflow-scoped key/value store read and written by steps.
///
/// Values are tagged JSON values. Writes are last-writer-wins per key; a key
/// counts as defined when it is present and not `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SharedContext(BTreeMap<String, Value>);

impl SharedContext {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Look up the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Whether `key` holds a non-null value.
    pub fn is_defined(&self, key: &str) -> bool {
        matches!(self.0.get(key), Some(v) if !v.is_null())
    }

    /// Store `value` under `key`, returning the value it replaced.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    /// Merge `other` into `self`; keys in `other` win.
    pub fn merge(&mut self, other: SharedContext) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// The context as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect())
    }
}

impl From<BTreeMap<String, Value>> for SharedContext {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for SharedContext {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Execution records
// ---------------------------------------------------------------------------

/// Optional resource figures reported by a capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

/// Error captured from a failed step attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepErrorInfo {
    pub message: String,
    /// Source chain of the error, outermost first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Attempt number (0-based) at the time of failure.
    pub retry_count: u32,
}

/// Runtime record for one step, keyed by `step_id`.
///
/// The execution log holds a single slot per step; every attempt overwrites
/// the previous record for that step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<StepUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepErrorInfo>,
}

impl StepExecution {
    /// A bare record with only the step ID and status set.
    pub fn new(step_id: impl Into<String>, status: StepStatus) -> Self {
        Self {
            step_id: step_id.into(),
            status,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            input: None,
            output: None,
            usage: None,
            error: None,
        }
    }

    /// A `skipped` record stamped with the current time.
    pub fn skipped(step_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            started_at: Some(now),
            completed_at: Some(now),
            duration_ms: Some(0),
            ..Self::new(step_id, StepStatus::Skipped)
        }
    }
}

/// One entry in a workflow's error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub step_id: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorLogEntry {
    pub fn now(step_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow record
// ---------------------------------------------------------------------------

/// A persisted workflow and its execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Storage-internal ID (UUIDv7). The engine addresses workflows by
    /// `logical_id`; this is only used for updates.
    pub id: Uuid,
    /// Caller-chosen identifier, unique and immutable.
    pub logical_id: String,
    /// Display name.
    pub name: String,
    pub status: WorkflowStatus,
    pub definition: WorkflowDefinition,
    /// Index of the step currently (or last) being run, in `[0, steps.len()]`.
    pub current_step_index: usize,
    pub context: SharedContext,
    pub execution_log: Vec<StepExecution>,
    pub error_log: Vec<ErrorLogEntry>,
    pub retry_attempts: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// A fresh `pending` workflow with empty logs.
    pub fn new(
        logical_id: impl Into<String>,
        name: impl Into<String>,
        definition: WorkflowDefinition,
        context: SharedContext,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            logical_id: logical_id.into(),
            name: name.into(),
            status: WorkflowStatus::Pending,
            definition,
            current_step_index: 0,
            context,
            execution_log: Vec::new(),
            error_log: Vec::new(),
            retry_attempts: 0,
            max_retries,
            created_at: now,
            updated_at: now,
        }
    }

    /// The execution log entry for `step_id`, if the step was ever attempted.
    pub fn step_execution(&self, step_id: &str) -> Option<&StepExecution> {
        self.execution_log.iter().find(|e| e.step_id == step_id)
    }

    /// Status of `step_id` in the execution log.
    pub fn step_status(&self, step_id: &str) -> Option<StepStatus> {
        self.step_execution(step_id).map(|e| e.status)
    }
}

/// Caller-supplied fields for creating a workflow.
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub logical_id: String,
    /// Display name; the definition name is used when absent.
    pub name: Option<String>,
    pub definition: WorkflowDefinition,
    pub initial_context: SharedContext,
    /// Whole-workflow retry budget; the engine default is used when absent.
    pub max_retries: Option<u32>,
}

// ---------------------------------------------------------------------------
// Partial updates and filters
// ---------------------------------------------------------------------------

/// A partial update to a workflow record. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowPatch {
    pub status: Option<WorkflowStatus>,
    pub current_step_index: Option<usize>,
    pub context: Option<SharedContext>,
    pub execution_log: Option<Vec<StepExecution>>,
    pub error_log: Option<Vec<ErrorLogEntry>>,
    pub retry_attempts: Option<u32>,
}

impl WorkflowPatch {
    pub fn status(status: WorkflowStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn current_step_index(index: usize) -> Self {
        Self {
            current_step_index: Some(index),
            ..Self::default()
        }
    }

    pub fn context(context: SharedContext) -> Self {
        Self {
            context: Some(context),
            ..Self::default()
        }
    }

    pub fn execution_log(log: Vec<StepExecution>) -> Self {
        Self {
            execution_log: Some(log),
            ..Self::default()
        }
    }

    pub fn error_log(log: Vec<ErrorLogEntry>) -> Self {
        Self {
            error_log: Some(log),
            ..Self::default()
        }
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the patch to an in-memory record and bump `updated_at`.
    ///
    /// `current_step_index` is clamped to `[0, steps.len()]`.
    pub fn apply_to(&self, workflow: &mut Workflow) {
        if let Some(status) = self.status {
            workflow.status = status;
        }
        if let Some(index) = self.current_step_index {
            workflow.current_step_index = index.min(workflow.definition.steps.len());
        }
        if let Some(context) = &self.context {
            workflow.context = context.clone();
        }
        if let Some(log) = &self.execution_log {
            workflow.execution_log = log.clone();
        }
        if let Some(log) = &self.error_log {
            workflow.error_log = log.clone();
        }
        if let Some(attempts) = self.retry_attempts {
            workflow.retry_attempts = attempts;
        }
        workflow.updated_at = Utc::now();
    }
}

/// Lookup predicate for `WorkflowStore::find`. Empty filter matches all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowFilter {
    pub logical_id: Option<String>,
    pub status: Option<WorkflowStatus>,
}

impl WorkflowFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_logical_id(logical_id: impl Into<String>) -> Self {
        Self {
            logical_id: Some(logical_id.into()),
            status: None,
        }
    }

    pub fn by_status(status: WorkflowStatus) -> Self {
        Self {
            logical_id: None,
            status: Some(status),
        }
    }

    /// Whether `workflow` satisfies every set field.
    pub fn matches(&self, workflow: &Workflow) -> bool {
        self.logical_id
            .as_deref()
            .is_none_or(|id| workflow.logical_id == id)
            && self.status.is_none_or(|s| workflow.status == s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
