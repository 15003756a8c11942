//! `NodeAgentCall`: dynamic dispatch to node agents (§6, §9).
//!
//! The node-agent RPC is "one bidirectional contract per capability"
//! (tenant/webroot lifecycle, runtime config, database/valkey/S3 CRUD,
//! cron/daemon management, SSH keys, certificate install, ACME
//! challenge placement, replication, dump/import) exposed behind a
//! single polymorphic [`NodeAgent`] trait so activities accept a trait
//! object rather than a concrete transport. Per-capability methods are
//! default-implemented on top of one `call`, matching "variants per
//! transport (in-process for unit tests, RPC for production)" from §9.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use hostctl_types::EntityId;

use crate::{Activity, ActivityError, Heartbeat};

/// Error surface for a node-agent RPC call.
#[derive(Debug, Error)]
pub enum NodeAgentError {
    /// Malformed arguments; retrying won't help.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Anything else — network failure, node-side 5xx, timeout.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<NodeAgentError> for ActivityError {
    fn from(err: NodeAgentError) -> Self {
        match err {
            NodeAgentError::InvalidArgument(msg) => {
                ActivityError::NonRetryable(anyhow::anyhow!("invalid argument: {msg}"))
            }
            NodeAgentError::Other(e) => ActivityError::Retryable(e),
        }
    }
}

/// The node-agent RPC surface. One method per capability named in §6,
/// each a thin wrapper over [`NodeAgent::call`] so a real transport only
/// has to implement `call`.
#[async_trait]
pub trait NodeAgent: Send + Sync {
    /// Issue a raw RPC: `method` names the capability, `params` carries
    /// its arguments, the response is the capability's raw JSON result.
    async fn call(&self, node_id: EntityId, method: &str, params: Value) -> Result<Value, NodeAgentError>;

    /// Write arbitrary file content at `path` with the given octal mode.
    async fn write_file(&self, node_id: EntityId, path: &str, content: &[u8], mode: u32) -> Result<(), NodeAgentError> {
        self.call(
            node_id,
            "write_file",
            serde_json::json!({ "path": path, "content_b64": base64_encode(content), "mode": mode }),
        )
        .await
        .map(|_| ())
    }

    /// Remove a file, idempotently (missing file is success).
    async fn delete_file(&self, node_id: EntityId, path: &str) -> Result<(), NodeAgentError> {
        self.call(node_id, "delete_file", serde_json::json!({ "path": path })).await.map(|_| ())
    }

    /// Place an ACME HTTP-01 challenge response file.
    async fn place_http01_challenge(
        &self,
        node_id: EntityId,
        token: &str,
        key_authorization: &str,
    ) -> Result<(), NodeAgentError> {
        self.call(
            node_id,
            "place_http01_challenge",
            serde_json::json!({ "token": token, "key_authorization": key_authorization }),
        )
        .await
        .map(|_| ())
    }

    /// Remove a previously-placed ACME HTTP-01 challenge response file.
    async fn cleanup_http01_challenge(&self, node_id: EntityId, token: &str) -> Result<(), NodeAgentError> {
        self.call(node_id, "cleanup_http01_challenge", serde_json::json!({ "token": token })).await.map(|_| ())
    }

    /// Install a certificate + key bundle at its well-known path.
    async fn install_certificate(&self, node_id: EntityId, cert_pem: &str, key_pem: &str) -> Result<(), NodeAgentError> {
        self.call(
            node_id,
            "install_certificate",
            serde_json::json!({ "cert_pem": cert_pem, "key_pem": key_pem }),
        )
        .await
        .map(|_| ())
    }

    /// Reload nginx after a config change.
    async fn reload_nginx(&self, node_id: EntityId) -> Result<(), NodeAgentError> {
        self.call(node_id, "reload_nginx", Value::Null).await.map(|_| ())
    }

    /// Replace the SSH `authorized_keys` file for `uid`.
    async fn write_authorized_keys(&self, node_id: EntityId, uid: &str, keys: &[String]) -> Result<(), NodeAgentError> {
        self.call(node_id, "write_authorized_keys", serde_json::json!({ "uid": uid, "keys": keys })).await.map(|_| ())
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = *chunk.get(1).unwrap_or(&0) as u32;
        let b2 = *chunk.get(2).unwrap_or(&0) as u32;
        let n = (b0 << 16) | (b1 << 8) | b2;
        let _ = write!(out, "{}", ALPHABET[((n >> 18) & 0x3f) as usize] as char);
        let _ = write!(out, "{}", ALPHABET[((n >> 12) & 0x3f) as usize] as char);
        out.push(if chunk.len() > 1 { ALPHABET[((n >> 6) & 0x3f) as usize] as char } else { '=' });
        out.push(if chunk.len() > 2 { ALPHABET[(n & 0x3f) as usize] as char } else { '=' });
    }
    out
}

/// Typed input for the generic [`NodeAgentCall`] activity, used by
/// resource workflows for capabilities that don't need a dedicated
/// typed wrapper (database/valkey/S3 CRUD, cron, daemon control,
/// replication, dump/import).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAgentCallInput {
    /// Target node.
    pub node_id: EntityId,
    /// RPC method name.
    pub method: String,
    /// RPC arguments.
    pub params: Value,
}

/// Generic node-agent RPC dispatch activity.
pub struct NodeAgentCall {
    agent: std::sync::Arc<dyn NodeAgent>,
}

impl NodeAgentCall {
    /// Build the activity.
    pub fn new(agent: std::sync::Arc<dyn NodeAgent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Activity for NodeAgentCall {
    type Input = NodeAgentCallInput;
    type Output = Value;

    fn name(&self) -> &'static str {
        "NodeAgentCall"
    }

    async fn run(
        &self,
        input: Self::Input,
        _idempotency_key: &str,
        _heartbeat: &mut Heartbeat,
    ) -> Result<Self::Output, ActivityError> {
        self.agent.call(input.node_id, &input.method, input.params).await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeAgent {
        calls: Mutex<Vec<(EntityId, String, Value)>>,
    }

    #[async_trait]
    impl NodeAgent for FakeAgent {
        async fn call(&self, node_id: EntityId, method: &str, params: Value) -> Result<Value, NodeAgentError> {
            if method == "boom" {
                return Err(NodeAgentError::InvalidArgument("nope".into()));
            }
            self.calls.lock().unwrap().push((node_id, method.to_string(), params));
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn default_methods_dispatch_through_call() {
        let agent = FakeAgent::default();
        let node_id = EntityId::new();
        agent.reload_nginx(node_id).await.unwrap();
        agent.place_http01_challenge(node_id, "tok", "tok.thumb").await.unwrap();

        let calls = agent.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, "reload_nginx");
        assert_eq!(calls[1].1, "place_http01_challenge");
    }

    #[tokio::test]
    async fn invalid_argument_maps_to_non_retryable() {
        let agent = FakeAgent::default();
        let err = agent.call(EntityId::new(), "boom", Value::Null).await.unwrap_err();
        let activity_err: ActivityError = err.into();
        assert!(!activity_err.is_retryable());
    }

    #[test]
    fn base64_round_trips_via_known_vector() {
        assert_eq!(base64_encode(b"man"), "bWFu");
        assert_eq!(base64_encode(b"ma"), "bWE=");
    }
}
