//! Prerequisite checks against a workflow's execution log.
//!
//! A step is eligible once every step it depends on has a log entry whose
//! status is exactly `completed`. `failed`, `skipped` and missing entries all
//! block.

use stepflow_types::workflow::{StepExecution, StepSpec, StepStatus};

/// Prerequisites of `step` that have not completed, in declaration order.
pub fn unmet_dependencies<'a>(step: &'a StepSpec, log: &[StepExecution]) -> Vec<&'a str> {
    step.depends_on
        .iter()
        .filter(|dep| {
            !log.iter()
                .any(|entry| entry.step_id == **dep && entry.status == StepStatus::Completed)
        })
        .map(String::as_str)
        .collect()
}

/// Whether every prerequisite of `step` has completed.
pub fn dependencies_met(step: &StepSpec, log: &[StepExecution]) -> bool {
    unmet_dependencies(step, log).is_empty()
}
