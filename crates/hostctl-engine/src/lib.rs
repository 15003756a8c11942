//! Durable workflow engine: activity dispatch, retry/circuit-breaker
//! policy, workflow-ID uniqueness, and the worker pool that drives
//! queued tasks to completion.
//!
//! A workflow is a plain async function replayed from its persisted step
//! history (see [`hostctl_store_core::StorageBackend::history`]) rather
//! than kept alive as a long-running process: on restart, [`engine::Workflow
//! Executor`] folds the history forward and resumes at the first step not
//! yet committed. Activities are dispatched through the process-global
//! registry in [`registry`], keyed by name, so an activity crate never
//! needs to be a compile-time dependency of this one.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod dispatch;
pub mod engine;
pub mod registry;
pub mod retry;
pub mod worker;

pub use dispatch::{ConvergeCoalescer, WorkflowLock};
pub use engine::{ReplayError, WorkflowExecutor};
pub use registry::{
    dispatch as dispatch_activity, register_activity, registered_activities, ActivityFn,
    HeartbeatSink, NullHeartbeatSink,
};
pub use retry::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy};
pub use worker::{WorkerPool, WorkerPoolConfig};

use thiserror::Error;

/// The result of attempting to dispatch an activity, classified by
/// whether the caller should retry.
///
/// Activity authors return their own richer error type (see
/// `hostctl-activities::ActivityError`) which is converted down to this
/// shape at the registry boundary — the engine only needs to know
/// whether to schedule another attempt, not the domain-specific reason.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No activity is registered under the requested name. Never
    /// retryable: retrying would hit the same unregistered name again.
    #[error("no activity registered under name {0:?}")]
    UnknownActivity(String),

    /// The activity failed in a way that may succeed on a later attempt
    /// (a transient network error, a node agent temporarily unreachable).
    #[error("activity failed (retryable): {0}")]
    Retryable(#[source] anyhow::Error),

    /// The activity failed in a way that will not succeed on retry (bad
    /// input, a permanently rejected capability token).
    #[error("activity failed (non-retryable): {0}")]
    NonRetryable(#[source] anyhow::Error),

    /// The circuit breaker guarding this activity's dependency is open;
    /// the call was rejected before reaching the handler.
    #[error("circuit breaker open for activity {0:?}")]
    CircuitOpen(String),
}

impl DispatchError {
    /// Whether the engine should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Retryable(_) | DispatchError::CircuitOpen(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_activity_is_not_retryable() {
        assert!(!DispatchError::UnknownActivity("X".into()).is_retryable());
    }

    #[test]
    fn retryable_variant_is_retryable() {
        assert!(DispatchError::Retryable(anyhow::anyhow!("timeout")).is_retryable());
    }

    #[test]
    fn non_retryable_variant_is_not_retryable() {
        assert!(!DispatchError::NonRetryable(anyhow::anyhow!("bad input")).is_retryable());
    }

    #[test]
    fn circuit_open_is_retryable_later() {
        assert!(DispatchError::CircuitOpen("Foo".into()).is_retryable());
    }
}
