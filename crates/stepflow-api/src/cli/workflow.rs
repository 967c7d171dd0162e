//! Workflow command handlers.
//!
//! Commands:
//! - `stepflow create <file>` -- parse, validate and persist a workflow
//! - `stepflow run <id>` -- execute a workflow, streaming step progress
//! - `stepflow retry <id>` -- run a failed or pending workflow again
//! - `stepflow recover <id>` -- resume a workflow whose process died mid-run
//! - `stepflow cancel <id>` -- cooperatively cancel a workflow
//! - `stepflow show <id>` -- workflow record with steps and context
//! - `stepflow list [--status]` -- list workflows
//! - `stepflow logs <id>` -- execution log and error log
//! - `stepflow interrupted` -- workflows left in progress

use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;

use stepflow_core::workflow::EngineError;
use stepflow_core::workflow::definition::load_definition_file;
use stepflow_types::event::WorkflowEvent;
use stepflow_types::workflow::{
    NewWorkflow, SharedContext, StepStatus, Workflow, WorkflowFilter, WorkflowStatus,
};

use crate::state::AppState;

/// Arguments of `stepflow create`.
pub struct CreateArgs {
    pub file: PathBuf,
    pub id: Option<String>,
    pub name: Option<String>,
    pub context: Option<String>,
    pub max_retries: Option<u32>,
    pub run: bool,
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

pub async fn create_workflow(
    state: &AppState,
    args: CreateArgs,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let definition = load_definition_file(&args.file)
        .with_context(|| format!("Failed to load workflow file: {}", args.file.display()))?;

    let initial_context = match args.context.as_deref() {
        Some(raw) => parse_context_arg(raw)?,
        None => SharedContext::new(),
    };

    let logical_id = args
        .id
        .unwrap_or_else(|| generate_logical_id(&definition.name));

    let workflow = state
        .engine
        .create_workflow(NewWorkflow {
            logical_id,
            name: args.name,
            definition,
            initial_context,
            max_retries: args.max_retries,
        })
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create workflow: {e}"))?;

    if args.run {
        return execute_with_progress(
            state,
            &workflow.logical_id,
            json,
            quiet,
            state.engine.execute_workflow(&workflow.logical_id),
        )
        .await;
    }

    if json {
        let out = serde_json::json!({
            "id": workflow.logical_id,
            "name": workflow.name,
            "status": workflow.status,
            "steps": workflow.definition.steps.len(),
            "max_retries": workflow.max_retries,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if !quiet {
        println!();
        println!(
            "  {} Created workflow '{}'",
            style("*").green().bold(),
            style(&workflow.name).cyan()
        );
        println!("  ID: {}", workflow.logical_id);
        println!("  Steps: {}", workflow.definition.steps.len());
        println!("  Max retries: {}", workflow.max_retries);
        println!();
        println!(
            "  Run it with: {}",
            style(format!("stepflow run {}", workflow.logical_id)).dim()
        );
        println!();
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Run / Retry / Recover
// ---------------------------------------------------------------------------

pub async fn run_workflow(state: &AppState, id: &str, json: bool, quiet: bool) -> Result<()> {
    execute_with_progress(state, id, json, quiet, state.engine.execute_workflow(id)).await
}

pub async fn retry_workflow(state: &AppState, id: &str, json: bool, quiet: bool) -> Result<()> {
    execute_with_progress(state, id, json, quiet, state.engine.retry_workflow(id)).await
}

pub async fn recover_workflow(state: &AppState, id: &str, json: bool, quiet: bool) -> Result<()> {
    execute_with_progress(state, id, json, quiet, state.engine.recover_workflow(id)).await
}

/// Drive `run` to completion while printing events for `id` as they arrive.
async fn execute_with_progress<F>(
    state: &AppState,
    id: &str,
    json: bool,
    quiet: bool,
    run: F,
) -> Result<()>
where
    F: Future<Output = Result<WorkflowStatus, EngineError>>,
{
    let show_progress = !json && !quiet;
    let mut events = state.engine.events().subscribe_workflow(id);

    if show_progress {
        println!();
    }

    tokio::pin!(run);
    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            Some(event) = events.recv() => {
                if show_progress {
                    print_event(&event);
                }
            }
        }
    };

    // Events published right before the run returned are still buffered.
    for event in events.drain() {
        if show_progress {
            print_event(&event);
        }
    }

    let status = match result {
        Ok(status) => status,
        Err(EngineError::AlreadyRunning { logical_id, status }) => {
            bail!(
                "Workflow '{logical_id}' is already {status}. If its process died, resume it with: stepflow recover {logical_id}"
            );
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to execute workflow: {e}")),
    };

    let workflow = state
        .engine
        .get_workflow(id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load workflow: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow_summary_json(&workflow))?);
    } else if !quiet {
        println!();
        println!(
            "  {} Workflow '{}' finished: {}",
            status_marker(status),
            style(&workflow.logical_id).cyan(),
            style_status(status)
        );
        if status == WorkflowStatus::Failed {
            if let Some(last) = workflow.error_log.last() {
                println!(
                    "  Last error ({}): {}",
                    last.step_id,
                    style(first_line(&last.error)).red()
                );
            }
        }
        println!();
    }

    if status == WorkflowStatus::Failed {
        bail!("workflow '{id}' failed");
    }
    Ok(())
}

fn print_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::WorkflowStarted { retry_attempt, .. } => {
            if *retry_attempt == 0 {
                println!("  {} Started", style(">").blue().bold());
            } else {
                println!(
                    "  {} Started (retry {})",
                    style(">").blue().bold(),
                    retry_attempt
                );
            }
        }
        WorkflowEvent::StepStarted {
            step_id, attempt, ..
        } => {
            if *attempt > 0 {
                println!("    {} {} (attempt {})", style("~").dim(), step_id, attempt + 1);
            }
        }
        WorkflowEvent::StepCompleted {
            step_id,
            duration_ms,
            ..
        } => {
            println!(
                "    {} {} {}",
                style("+").green().bold(),
                step_id,
                style(format!("{duration_ms}ms")).dim()
            );
        }
        WorkflowEvent::StepFailed {
            step_id,
            error,
            will_retry,
            ..
        } => {
            let suffix = if *will_retry { " (retrying)" } else { "" };
            println!(
                "    {} {}: {}{}",
                style("x").red().bold(),
                step_id,
                style(first_line(error)).red(),
                suffix
            );
        }
        WorkflowEvent::StepSkipped { step_id, .. } => {
            println!("    {} {} (condition false)", style("-").yellow(), step_id);
        }
        WorkflowEvent::StepDeferred {
            step_id,
            waiting_on,
            ..
        } => {
            println!(
                "    {} {} waiting on {}",
                style("?").yellow(),
                step_id,
                waiting_on.join(", ")
            );
        }
        WorkflowEvent::WorkflowRetryScheduled {
            retry_attempt,
            max_retries,
            ..
        } => {
            println!(
                "  {} Retry {}/{} scheduled",
                style("!").yellow().bold(),
                retry_attempt,
                max_retries
            );
        }
        WorkflowEvent::WorkflowCancelled { .. } => {
            println!("  {} Cancelled", style("!").yellow().bold());
        }
        WorkflowEvent::WorkflowCompleted { .. } | WorkflowEvent::WorkflowFailed { .. } => {}
    }
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

pub async fn cancel_workflow(state: &AppState, id: &str, json: bool) -> Result<()> {
    let status = state
        .engine
        .cancel_workflow(id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to cancel workflow: {e}"))?;

    if json {
        let out = serde_json::json!({ "id": id, "status": status });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    match status {
        WorkflowStatus::Cancelled => println!(
            "  {} Workflow '{}' cancelled",
            style("*").green().bold(),
            style(id).cyan()
        ),
        other => println!(
            "  Workflow '{}' is {} and was not cancelled.",
            style(id).cyan(),
            style_status(other)
        ),
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Show
// ---------------------------------------------------------------------------

pub async fn show_workflow(state: &AppState, id: &str, json: bool) -> Result<()> {
    let workflow = state
        .engine
        .get_workflow(id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get workflow: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
        return Ok(());
    }

    let total = workflow.definition.steps.len();

    println!();
    println!(
        "  {} {}",
        style("Workflow:").bold(),
        style(&workflow.logical_id).cyan()
    );
    println!("  Name: {}", workflow.name);
    println!("  Status: {}", style_status(workflow.status));
    println!("  Progress: {}/{} steps", workflow.current_step_index, total);
    println!(
        "  Retries: {}/{}",
        workflow.retry_attempts, workflow.max_retries
    );
    println!(
        "  Created: {}",
        workflow.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "  Updated: {}",
        workflow.updated_at.format("%Y-%m-%d %H:%M:%S")
    );

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#"),
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Agent"),
            Cell::new("Capability"),
            Cell::new("Depends On"),
            Cell::new("Status"),
        ]);

    for (i, step) in workflow.definition.steps.iter().enumerate() {
        let status_cell = match workflow.step_status(&step.id) {
            Some(status) => format_step_status(status),
            None => Cell::new("-"),
        };
        let depends = if step.depends_on.is_empty() {
            "-".to_string()
        } else {
            step.depends_on.join(", ")
        };

        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(&step.id),
            Cell::new(&step.agent_id),
            Cell::new(step.capability.as_deref().unwrap_or("-")),
            Cell::new(depends),
            status_cell,
        ]);
    }

    println!();
    println!("{table}");

    if !workflow.context.is_empty() {
        println!();
        println!("  {}", style("Context:").bold());
        for (key, value) in workflow.context.iter() {
            println!("    {} = {}", style(key).cyan(), truncate(&value.to_string(), 80));
        }
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub async fn list_workflows(state: &AppState, status: Option<&str>, json: bool) -> Result<()> {
    let filter = match status {
        Some(raw) => {
            let status: WorkflowStatus = raw.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            WorkflowFilter::by_status(status)
        }
        None => WorkflowFilter::all(),
    };

    let workflows = state
        .engine
        .list_workflows(&filter)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list workflows: {e}"))?;

    print_workflow_table(
        &workflows,
        json,
        "No workflows found.",
        Some("stepflow create <file.yaml>"),
    )
}

pub async fn list_interrupted(state: &AppState, json: bool) -> Result<()> {
    let workflows = state
        .engine
        .list_interrupted()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list interrupted workflows: {e}"))?;

    print_workflow_table(&workflows, json, "No interrupted workflows.", None)?;

    if !json && !workflows.is_empty() {
        println!(
            "  Resume one with: {}",
            style("stepflow recover <id>").dim()
        );
        println!();
    }
    Ok(())
}

fn print_workflow_table(
    workflows: &[Workflow],
    json: bool,
    empty_message: &str,
    hint: Option<&str>,
) -> Result<()> {
    if json {
        let out: Vec<_> = workflows.iter().map(workflow_summary_json).collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if workflows.is_empty() {
        println!();
        println!("  {empty_message}");
        if let Some(hint) = hint {
            println!("  Create one with: {}", style(hint).dim());
        }
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Status"),
            Cell::new("Progress"),
            Cell::new("Retries"),
            Cell::new("Updated"),
        ]);

    for wf in workflows {
        table.add_row(vec![
            Cell::new(&wf.logical_id),
            Cell::new(&wf.name),
            format_status(wf.status),
            Cell::new(format!(
                "{}/{}",
                wf.current_step_index,
                wf.definition.steps.len()
            )),
            Cell::new(format!("{}/{}", wf.retry_attempts, wf.max_retries)),
            Cell::new(wf.updated_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

pub async fn show_logs(state: &AppState, id: &str, json: bool) -> Result<()> {
    let workflow = state
        .engine
        .get_workflow(id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get workflow: {e}"))?;

    if json {
        let out = serde_json::json!({
            "id": workflow.logical_id,
            "execution_log": workflow.execution_log,
            "error_log": workflow.error_log,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if workflow.execution_log.is_empty() && workflow.error_log.is_empty() {
        println!();
        println!("  Workflow '{id}' has not run yet.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Started"),
            Cell::new("Duration"),
            Cell::new("Output / Error"),
        ]);

    for exec in &workflow.execution_log {
        let started = exec
            .started_at
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let duration = exec
            .duration_ms
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| "-".to_string());
        let detail = match (&exec.error, &exec.output) {
            (Some(err), _) => truncate(first_line(&err.message), 60),
            (None, Some(output)) => truncate(&output.to_string(), 60),
            (None, None) => "-".to_string(),
        };

        table.add_row(vec![
            Cell::new(&exec.step_id),
            format_step_status(exec.status),
            Cell::new(started),
            Cell::new(duration),
            Cell::new(detail),
        ]);
    }

    println!();
    println!("  Steps for workflow '{}'", style(id).cyan());
    println!();
    println!("{table}");

    if !workflow.error_log.is_empty() {
        println!();
        println!("  {}", style("Errors:").bold().red());
        for entry in &workflow.error_log {
            println!(
                "    [{}] {}: {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                style(&entry.step_id).cyan(),
                first_line(&entry.error)
            );
        }
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse `--context` into a shared context. Only JSON objects are accepted.
fn parse_context_arg(raw: &str) -> Result<SharedContext> {
    let value: Value = serde_json::from_str(raw).with_context(|| "Invalid --context JSON")?;
    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => bail!("--context must be a JSON object, got: {other}"),
    }
}

/// `<slugified-name>-<uuid v7 prefix>`, e.g. `order-intake-0192a4f3`.
fn generate_logical_id(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    let id = uuid::Uuid::now_v7().simple().to_string();
    let suffix = &id[id.len() - 8..];
    if slug.is_empty() {
        format!("workflow-{suffix}")
    } else {
        format!("{slug}-{suffix}")
    }
}

fn workflow_summary_json(wf: &Workflow) -> Value {
    serde_json::json!({
        "id": wf.logical_id,
        "name": wf.name,
        "status": wf.status,
        "current_step_index": wf.current_step_index,
        "steps": wf.definition.steps.len(),
        "retry_attempts": wf.retry_attempts,
        "max_retries": wf.max_retries,
        "created_at": wf.created_at.to_rfc3339(),
        "updated_at": wf.updated_at.to_rfc3339(),
    })
}

fn format_status(status: WorkflowStatus) -> Cell {
    match status {
        WorkflowStatus::Pending => Cell::new("pending").fg(Color::Yellow),
        WorkflowStatus::InProgress => Cell::new("in_progress").fg(Color::Blue),
        WorkflowStatus::Completed => Cell::new("completed").fg(Color::Green),
        WorkflowStatus::Failed => Cell::new("failed").fg(Color::Red),
        WorkflowStatus::Cancelled => Cell::new("cancelled").fg(Color::DarkYellow),
    }
}

fn format_step_status(status: StepStatus) -> Cell {
    match status {
        StepStatus::Pending => Cell::new("pending").fg(Color::Yellow),
        StepStatus::InProgress => Cell::new("in_progress").fg(Color::Blue),
        StepStatus::Completed => Cell::new("completed").fg(Color::Green),
        StepStatus::Failed => Cell::new("failed").fg(Color::Red),
        StepStatus::Skipped => Cell::new("skipped").fg(Color::DarkGrey),
    }
}

fn style_status(status: WorkflowStatus) -> console::StyledObject<&'static str> {
    let text = status.as_str();
    match status {
        WorkflowStatus::Pending => style(text).yellow(),
        WorkflowStatus::InProgress => style(text).blue(),
        WorkflowStatus::Completed => style(text).green(),
        WorkflowStatus::Failed => style(text).red(),
        WorkflowStatus::Cancelled => style(text).yellow().dim(),
    }
}

fn status_marker(status: WorkflowStatus) -> console::StyledObject<&'static str> {
    match status {
        WorkflowStatus::Completed => style("*").green().bold(),
        WorkflowStatus::Failed => style("x").red().bold(),
        _ => style("!").yellow().bold(),
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
