//! `Execute`: dispatches one tool call the investigation agent's [`Chat`]
//! loop requested (§8 scenario 4: `list_nodes`, then `converge_shard`,
//! then `resolve_incident`).
//!
//! Tools are registered into a process-wide table, the same
//! lazily-initialised-`RwLock`-map shape as
//! [`hostctl_engine::registry`] — `hostctl-incidents` registers
//! `resolve_incident`/`escalate_incident` and any domain tools
//! (`list_nodes`, `converge_shard`, …) during `hostctl-cli`'s bootstrap,
//! keeping this crate ignorant of incident-specific semantics.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Activity, ActivityError, Heartbeat};

/// A registered tool handler: JSON arguments in, JSON-serializable
/// result out.
pub type ToolFn = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

static TOOLS: Lazy<RwLock<HashMap<String, ToolFn>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a tool handler under `name`, replacing any prior
/// registration (relied on by tests that swap in a fake).
pub fn register_tool(name: impl Into<String>, handler: ToolFn) {
    TOOLS.write().insert(name.into(), handler);
}

/// Names of every currently-registered tool.
pub fn registered_tools() -> Vec<String> {
    TOOLS.read().keys().cloned().collect()
}

/// Typed input for [`Execute`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteInput {
    /// Tool name, matching a [`crate::llm::ToolSpec::name`] the model was
    /// offered.
    pub tool_name: String,
    /// Tool arguments, as the model produced them.
    pub arguments: Value,
}

/// Runs a registered tool. An unknown tool name is non-retryable — no
/// amount of retrying registers it. A tool's own failure is retryable by
/// default since most tool failures here are RPC calls to node agents
/// or the core DB; a tool author who needs non-retryable semantics for a
/// specific failure should encode that in the tool body by returning an
/// `Err` that the caller inspects out-of-band, since `ToolFn` itself is
/// not error-classified.
pub struct Execute;

#[async_trait]
impl Activity for Execute {
    type Input = ExecuteInput;
    type Output = Value;

    fn name(&self) -> &'static str {
        "Execute"
    }

    async fn run(
        &self,
        input: Self::Input,
        _idempotency_key: &str,
        _heartbeat: &mut Heartbeat,
    ) -> Result<Self::Output, ActivityError> {
        let handler = {
            let tools = TOOLS.read();
            tools
                .get(&input.tool_name)
                .cloned()
                .ok_or_else(|| ActivityError::NonRetryable(anyhow::anyhow!("unknown tool: {}", input.tool_name)))?
        };

        handler(input.arguments).await.map_err(ActivityError::Retryable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unregistered_tool_is_non_retryable() {
        let activity = Execute;
        let mut hb = Heartbeat::new(Arc::new(hostctl_engine::NullHeartbeatSink));
        let err = activity
            .run(
                ExecuteInput { tool_name: "no_such_tool_xyz".into(), arguments: Value::Null },
                "key-1",
                &mut hb,
            )
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn registered_tool_runs_and_returns_its_value() {
        register_tool("echo_tool", Arc::new(|args| Box::pin(async move { Ok(args) })));

        let activity = Execute;
        let mut hb = Heartbeat::new(Arc::new(hostctl_engine::NullHeartbeatSink));
        let output = activity
            .run(
                ExecuteInput { tool_name: "echo_tool".into(), arguments: serde_json::json!({"a": 1}) },
                "key-1",
                &mut hb,
            )
            .await
            .unwrap();

        assert_eq!(output, serde_json::json!({"a": 1}));
        assert!(registered_tools().contains(&"echo_tool".to_string()));
    }
}
