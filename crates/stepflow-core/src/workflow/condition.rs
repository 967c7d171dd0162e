//! Step condition evaluator.
//!
//! Two predicate forms are understood:
//!
//! - `exists(key)` -- the context holds a non-null value at `key`
//! - `equals(key, literal)` -- the value at `key` has the string form
//!   `literal` (surrounding quotes on the literal are stripped)
//!
//! Text that matches neither form evaluates to `true`, so an unknown gate
//! never blocks a step. A recognized form that cannot be evaluated evaluates
//! to `false`.

use serde_json::Value;
use stepflow_types::workflow::SharedContext;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Parsed form
// ---------------------------------------------------------------------------

/// A parsed step condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Exists(String),
    Equals { key: String, literal: String },
    /// Text that is not a recognized predicate.
    Unrecognized,
}

/// Parse condition text.
///
/// Returns an error only when the text names a known predicate but its
/// arguments are malformed (e.g. `exists()` or `equals(flag)`).
pub fn parse_condition(text: &str) -> Result<Condition, ConditionError> {
    let trimmed = text.trim();
    let Some((function, args)) = split_call(trimmed) else {
        return Ok(Condition::Unrecognized);
    };

    match function {
        "exists" => {
            let key = args.trim();
            if key.is_empty() || key.contains(',') {
                return Err(malformed(function, args));
            }
            Ok(Condition::Exists(key.to_string()))
        }
        "equals" => {
            let Some((key, literal)) = args.split_once(',') else {
                return Err(malformed(function, args));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(malformed(function, args));
            }
            Ok(Condition::Equals {
                key: key.to_string(),
                literal: strip_quotes(literal.trim()).to_string(),
            })
        }
        _ => Ok(Condition::Unrecognized),
    }
}

/// `name(args)` -> `(name, args)`.
fn split_call(text: &str) -> Option<(&str, &str)> {
    let open = text.find('(')?;
    let inner = text.strip_suffix(')')?;
    let function = text[..open].trim();
    if function.is_empty() || !function.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((function, &inner[open + 1..]))
}

fn strip_quotes(literal: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = literal
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    literal
}

fn malformed(function: &str, args: &str) -> ConditionError {
    ConditionError::MalformedArguments {
        function: function.to_string(),
        args: args.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

impl Condition {
    /// Evaluate against `context`.
    pub fn evaluate(&self, context: &SharedContext) -> Result<bool, ConditionError> {
        match self {
            Condition::Exists(key) => Ok(context.is_defined(key)),
            Condition::Equals { key, literal } => match context.get(key) {
                None | Some(Value::Null) => Ok(false),
                Some(Value::String(s)) => Ok(s == literal),
                Some(v @ (Value::Number(_) | Value::Bool(_))) => Ok(v.to_string() == *literal),
                Some(other) => Err(ConditionError::NotComparable {
                    key: key.clone(),
                    kind: value_kind(other),
                }),
            },
            Condition::Unrecognized => Ok(true),
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Decide whether a step gated by `text` should run.
///
/// Unrecognized text yields `true`; evaluation errors yield `false` and are
/// logged at `warn`.
pub fn evaluate_condition(text: &str, context: &SharedContext) -> bool {
    let result = parse_condition(text).and_then(|condition| {
        if condition == Condition::Unrecognized {
            debug!(condition = text, "unrecognized condition, treating as true");
        }
        condition.evaluate(context)
    });

    match result {
        Ok(passed) => passed,
        Err(e) => {
            warn!(condition = text, error = %e, "condition evaluation failed, treating as false");
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionError {
    #[error("malformed arguments to {function}(): '{args}'")]
    MalformedArguments { function: String, args: String },

    #[error("context key '{key}' holds a {kind}, which cannot be compared")]
    NotComparable { key: String, kind: &'static str },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
