#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **hostctl-convergence** – Web-shard and LB-shard convergence, and the
//! retroactive pass of DNS override arbitration (§4.4, §4.5).
//!
//! Convergence is "reassert desired state, idempotently, against
//! whatever a node or the LB map currently holds" rather than
//! "apply one more delta" — every run here reads the core DB's current
//! truth and pushes the full shape, which is what lets a converge run
//! started after a crash, a missed event, or a manual nudge repair
//! drift without needing to replay history. Each converge is itself a
//! durable workflow (`converge:<shard_id>`), reusing
//! `hostctl_workflows::resource`'s step/phase-gate primitives so a
//! crash mid-fan-out resumes rather than restarts.

use thiserror::Error;

pub mod dns_retro;
pub mod lb_shard;
pub mod web_shard;

/// Errors a convergence run may return.
#[derive(Debug, Error)]
pub enum ConvergenceError {
    /// Underlying workflow step/replay failure.
    #[error(transparent)]
    Workflow(#[from] hostctl_workflows::WorkflowError),
    /// A core-DB read or write failed.
    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),
    /// A precondition the converge run depends on doesn't hold (e.g. a
    /// tenant has an env var but no provisioned DEK).
    #[error("precondition failed: {0}")]
    Precondition(String),
}
