//! Runtime registry of activity handlers, keyed by name.
//!
//! The design follows a minimal-overhead approach using a global,
//! lazily-initialised map guarded by an `RwLock`: activity crates register
//! their handlers during process startup (`hostctl-cli`'s bootstrap), and
//! the engine's worker pool looks them up by name when executing a queued
//! task. The registry is intentionally opaque outside this crate — the
//! only public surface is [`register_activity`] and [`dispatch`].

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde_json::Value;

use crate::DispatchError;

/// A heartbeat sink an activity uses to report liveness mid-execution.
///
/// Passed by the worker pool so a long-running activity (e.g. waiting on
/// an ACME challenge to propagate) can emit a monotonic "turn N/M" token
/// the engine uses to detect a stalled activity versus one still making
/// progress.
#[async_trait::async_trait]
pub trait HeartbeatSink: Send + Sync {
    /// Record progress. `turn` must be strictly increasing across calls
    /// from the same activity invocation.
    async fn heartbeat(&self, turn: u32, of: Option<u32>, detail: Option<&str>);
}

/// A no-op heartbeat sink, for activities that don't report progress.
pub struct NullHeartbeatSink;

#[async_trait::async_trait]
impl HeartbeatSink for NullHeartbeatSink {
    async fn heartbeat(&self, _turn: u32, _of: Option<u32>, _detail: Option<&str>) {}
}

/// Type-erased activity handler: takes a JSON input and an idempotency
/// key, returns a JSON output or a classified [`DispatchError`].
///
/// Activity crates implement the typed `Activity` trait and adapt it to
/// this erased form when registering, so the dispatch table doesn't need
/// to be generic over each activity's Input/Output types.
pub type ActivityFn = Arc<
    dyn Fn(Value, String, Arc<dyn HeartbeatSink>) -> BoxFuture<'static, Result<Value, DispatchError>>
        + Send
        + Sync,
>;

static REGISTRY: Lazy<RwLock<HashMap<String, ActivityFn>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Register an activity handler under `name`.
///
/// Re-registering the same name replaces the previous handler; this is
/// relied on by tests that swap in a fake node-agent/PowerDNS/ACME
/// activity implementation.
pub fn register_activity(name: impl Into<String>, handler: ActivityFn) {
    REGISTRY.write().insert(name.into(), handler);
}

/// Returns the names of every currently-registered activity, for
/// diagnostics and for the worker pool to validate a workflow only
/// references activities that are actually registered.
pub fn registered_activities() -> Vec<String> {
    REGISTRY.read().keys().cloned().collect()
}

/// Dispatch to the activity registered under `name`.
pub async fn dispatch(
    name: &str,
    input: Value,
    idempotency_key: String,
    heartbeat: Arc<dyn HeartbeatSink>,
) -> Result<Value, DispatchError> {
    let handler = {
        let registry = REGISTRY.read();
        registry
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownActivity(name.to_string()))?
    };

    handler(input, idempotency_key, heartbeat).await
}
