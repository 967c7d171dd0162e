//! Name-keyed registry of async capability handlers.
//!
//! `CapabilityRegistry` is the stock `CapabilityExecutor`: handlers are
//! registered under a capability name and looked up on every call. A small
//! set of builtins (`echo`, `noop`, `sleep`, `fail`) is available for
//! wiring tests and demo workflows without external services.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use tracing::debug;

use super::executor::{CapabilityError, CapabilityExecutor, CapabilityOutput, ExecutionContext};

/// Type-erased async capability handler.
pub type CapabilityHandler = Arc<
    dyn Fn(Value, ExecutionContext) -> BoxFuture<'static, Result<CapabilityOutput, CapabilityError>>
        + Send
        + Sync,
>;

/// Names of the builtin capabilities.
pub const BUILTIN_CAPABILITIES: &[&str] = &["echo", "noop", "sleep", "fail"];

/// Concurrent map of capability name to handler.
#[derive(Default)]
pub struct CapabilityRegistry {
    handlers: DashMap<String, CapabilityHandler>,
}

impl CapabilityRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the builtin capabilities.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_builtins();
        registry
    }

    /// Register `handler` under `name`, replacing any existing handler.
    pub fn register<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<CapabilityOutput, CapabilityError>>
            + Send
            + 'static,
    {
        let handler: CapabilityHandler = Arc::new(move |input, ctx| Box::pin(handler(input, ctx)));
        self.handlers.insert(name.into(), handler);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered capability names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Register `echo`, `noop`, `sleep` and `fail`.
    pub fn register_builtins(&self) {
        self.register("echo", |input, _ctx| async move { Ok(CapabilityOutput::new(input)) });

        self.register("noop", |_input, _ctx| async move {
            Ok(CapabilityOutput::new(Value::Null))
        });

        self.register("sleep", |input, _ctx| async move {
            let Some(ms) = input.get("ms").and_then(Value::as_u64) else {
                return Err(CapabilityError::InvalidInput(
                    "sleep requires integer 'ms'".to_string(),
                ));
            };
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(CapabilityOutput::new(json!({ "slept_ms": ms })))
        });

        self.register("fail", |input, _ctx| async move {
            let message = input
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("forced failure")
                .to_string();
            Err(CapabilityError::Failed {
                capability: "fail".to_string(),
                message,
            })
        });
    }
}

impl CapabilityExecutor for CapabilityRegistry {
    async fn execute(
        &self,
        capability: &str,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<CapabilityOutput, CapabilityError> {
        // Clone the handler out so no map guard is held across the await.
        let handler = self
            .handlers
            .get(capability)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CapabilityError::UnknownCapability(capability.to_string()))?;

        debug!(
            capability,
            agent_id = %ctx.agent_id,
            workflow_id = %ctx.workflow_id,
            "invoking capability"
        );
        handler(input, ctx.clone()).await
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            agent_id: "agent-1".to_string(),
            workflow_id: "wf-1".to_string(),
            timeout_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn test_echo_returns_input() {
        let registry = CapabilityRegistry::with_builtins();
        let out = registry
            .execute("echo", json!({"text": "hi"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out.value, json!({"text": "hi"}));
    }

    #[tokio::test]
    async fn test_noop_returns_null() {
        let registry = CapabilityRegistry::with_builtins();
        let out = registry.execute("noop", json!({}), &ctx()).await.unwrap();
        assert_eq!(out.value, Value::Null);
    }

    #[tokio::test]
    async fn test_sleep_requires_ms() {
        let registry = CapabilityRegistry::with_builtins();
        let out = registry
            .execute("sleep", json!({"ms": 1}), &ctx())
            .await
            .unwrap();
        assert_eq!(out.value, json!({"slept_ms": 1}));

        let err = registry.execute("sleep", json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_fail_uses_message() {
        let registry = CapabilityRegistry::with_builtins();
        let err = registry
            .execute("fail", json!({"message": "boom"}), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "capability 'fail' failed: boom");

        let err = registry.execute("fail", json!({}), &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("forced failure"));
    }

    #[tokio::test]
    async fn test_unknown_capability() {
        let registry = CapabilityRegistry::new();
        let err = registry
            .execute("http.get", json!({}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::UnknownCapability(name) if name == "http.get"));
    }

    #[tokio::test]
    async fn test_custom_handler_sees_context() {
        let registry = CapabilityRegistry::new();
        registry.register("whoami", |_input, ctx| async move {
            Ok(CapabilityOutput::new(json!(ctx.agent_id)))
        });
        assert!(registry.contains("whoami"));
        let out = registry.execute("whoami", Value::Null, &ctx()).await.unwrap();
        assert_eq!(out.value, json!("agent-1"));
    }

    #[test]
    fn test_builtin_names() {
        let registry = CapabilityRegistry::with_builtins();
        let names = registry.names();
        for builtin in BUILTIN_CAPABILITIES {
            assert!(names.iter().any(|n| n == builtin));
        }
    }
}
