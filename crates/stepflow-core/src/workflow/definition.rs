//! Workflow definition parsing and validation.
//!
//! Definitions are YAML or JSON documents deserialized into
//! `WorkflowDefinition`. Every parse path runs `validate_definition`, so a
//! returned definition is structurally valid.

use std::collections::HashSet;
use std::path::Path;

use stepflow_types::workflow::WorkflowDefinition;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unknown dependency: {0}")]
    UnknownDependency(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
pub fn parse_definition_yaml(yaml: &str) -> Result<WorkflowDefinition, DefinitionError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Parse a JSON string into a validated `WorkflowDefinition`.
pub fn parse_definition_json(json: &str) -> Result<WorkflowDefinition, DefinitionError> {
    let def: WorkflowDefinition =
        serde_json::from_str(json).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Load a definition file, choosing the format by extension.
///
/// `.json` is parsed as JSON; `.yaml`, `.yml` and anything else as YAML.
pub fn load_definition_file(path: &Path) -> Result<WorkflowDefinition, DefinitionError> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => parse_definition_json(&content),
        _ => parse_definition_yaml(&content),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Name is non-empty
/// - At least one step exists
/// - Step IDs are non-empty and unique
/// - `depends_on` references point to existing step IDs other than the step
///   itself
/// - Step timeouts are > 0 if set
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), DefinitionError> {
    if def.name.trim().is_empty() {
        return Err(DefinitionError::Validation(
            "workflow name must not be empty".to_string(),
        ));
    }

    if def.steps.is_empty() {
        return Err(DefinitionError::Validation(
            "workflow must have at least one step".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    for step in &def.steps {
        if step.id.trim().is_empty() {
            return Err(DefinitionError::Validation(
                "step ID must not be empty".to_string(),
            ));
        }
        if !seen_ids.insert(step.id.as_str()) {
            return Err(DefinitionError::Validation(format!(
                "duplicate step ID: '{}'",
                step.id
            )));
        }
    }

    for step in &def.steps {
        for dep in &step.depends_on {
            if dep == &step.id {
                return Err(DefinitionError::Validation(format!(
                    "step '{}' depends on itself",
                    step.id
                )));
            }
            if !seen_ids.contains(dep.as_str()) {
                return Err(DefinitionError::UnknownDependency(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dep
                )));
            }
        }

        if step.timeout_secs == Some(0) {
            return Err(DefinitionError::Validation(format!(
                "step '{}' timeout must be > 0",
                step.id
            )));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use stepflow_types::workflow::StepSpec;

    fn definition(steps: Vec<StepSpec>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "nightly-report".to_string(),
            version: "1.0.0".to_string(),
            steps,
        }
    }

    fn step(id: &str, deps: &[&str]) -> StepSpec {
        let mut s = StepSpec::new(id, "agent");
        s.depends_on = deps.iter().map(|d| d.to_string()).collect();
        s
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
name: nightly-report
steps:
  - id: fetch
    agent: crawler
    capability: echo
    input:
      url: context.target
  - id: publish
    agent_id: publisher
    depends_on: [fetch]
    condition: exists(fetch)
    max_retries: 2
    timeout_secs: 5
"#;
        let def = parse_definition_yaml(yaml).unwrap();
        assert_eq!(def.version, "1.0.0");
        assert_eq!(def.steps.len(), 2);
        assert_eq!(def.steps[0].agent_id, "crawler");
        assert_eq!(def.steps[1].depends_on, vec!["fetch"]);
        assert_eq!(def.steps[1].max_retries, Some(2));
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{"name": "x", "steps": [{"id": "a", "agent_id": "bot"}]}"#;
        let def = parse_definition_json(json).unwrap();
        assert_eq!(def.steps[0].id, "a");
    }

    #[test]
    fn test_parse_error() {
        let err = parse_definition_yaml("name: [unclosed").unwrap_err();
        assert!(matches!(err, DefinitionError::Parse(_)));
    }

    #[test]
    fn test_validation_rejects_empty_name() {
        let mut def = definition(vec![step("a", &[])]);
        def.name = "  ".to_string();
        assert!(matches!(
            validate_definition(&def),
            Err(DefinitionError::Validation(_))
        ));
    }

    #[test]
    fn test_validation_rejects_empty_workflow() {
        assert!(matches!(
            validate_definition(&definition(vec![])),
            Err(DefinitionError::Validation(_))
        ));
    }

    #[test]
    fn test_validation_rejects_duplicate_step_ids() {
        let err = validate_definition(&definition(vec![step("a", &[]), step("a", &[])]))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate step ID"));
    }

    #[test]
    fn test_validation_rejects_unknown_dependency() {
        let err = validate_definition(&definition(vec![step("a", &["ghost"])])).unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownDependency(_)));
    }

    #[test]
    fn test_validation_rejects_self_dependency() {
        let err = validate_definition(&definition(vec![step("a", &["a"])])).unwrap_err();
        assert!(err.to_string().contains("depends on itself"));
    }

    #[test]
    fn test_validation_allows_forward_reference() {
        // Order is not validated; a forward reference simply defers.
        let def = definition(vec![step("a", &["b"]), step("b", &[])]);
        assert!(validate_definition(&def).is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let mut s = step("a", &[]);
        s.timeout_secs = Some(0);
        assert!(validate_definition(&definition(vec![s])).is_err());
    }

    #[test]
    fn test_load_definition_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("flow.yaml");
        std::fs::write(&yaml_path, "name: y\nsteps:\n  - id: a\n    agent: bot\n").unwrap();
        assert_eq!(load_definition_file(&yaml_path).unwrap().name, "y");

        let json_path = dir.path().join("flow.json");
        std::fs::write(
            &json_path,
            r#"{"name": "j", "steps": [{"id": "a", "agent": "bot"}]}"#,
        )
        .unwrap();
        assert_eq!(load_definition_file(&json_path).unwrap().name, "j");

        let missing = load_definition_file(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(missing, DefinitionError::Io(_)));
    }
}
