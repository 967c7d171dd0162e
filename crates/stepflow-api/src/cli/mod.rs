//! CLI command definitions for the `stepflow` binary.
//!
//! Uses clap derive macros for argument parsing. Workflows are addressed by
//! their logical ID everywhere.

pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run sequential, dependency-aware workflows.
#[derive(Parser)]
#[command(name = "stepflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "STEPFLOW_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a workflow from a YAML or JSON definition file.
    Create {
        /// Path to the definition file (.yaml, .yml or .json).
        file: PathBuf,

        /// Logical ID for the workflow (generated when omitted).
        #[arg(long)]
        id: Option<String>,

        /// Display name (defaults to the definition name).
        #[arg(long)]
        name: Option<String>,

        /// Initial shared context as a JSON object.
        #[arg(long)]
        context: Option<String>,

        /// Whole-workflow retry budget (defaults to the configured value).
        #[arg(long)]
        max_retries: Option<u32>,

        /// Execute the workflow right after creating it.
        #[arg(long)]
        run: bool,
    },

    /// Execute a pending or failed workflow.
    #[command(alias = "exec")]
    Run {
        /// Logical ID of the workflow.
        id: String,
    },

    /// Execute a failed or pending workflow again, counting a retry.
    Retry {
        /// Logical ID of the workflow.
        id: String,
    },

    /// Resume a workflow left in progress by a process that died.
    ///
    /// Only use this when no other stepflow process is running the workflow.
    Recover {
        /// Logical ID of the workflow.
        id: String,
    },

    /// Cancel a workflow. A running step finishes before the cancel is seen.
    Cancel {
        /// Logical ID of the workflow.
        id: String,
    },

    /// Show a workflow record with its steps and context.
    Show {
        /// Logical ID of the workflow.
        id: String,
    },

    /// List workflows.
    #[command(alias = "ls")]
    List {
        /// Filter by status (pending, in_progress, completed, failed, cancelled).
        #[arg(long)]
        status: Option<String>,
    },

    /// Show the step execution log and error log of a workflow.
    Logs {
        /// Logical ID of the workflow.
        id: String,
    },

    /// List workflows left in progress by an interrupted process.
    Interrupted,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
