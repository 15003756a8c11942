#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **hostctl-workflows** – Resource lifecycle and certificate workflows.
//!
//! A workflow is an async function driven by a `hostctl_engine::WorkflowExecutor`,
//! running under the workflow-ID uniqueness namespaces `resource:<kind>:<id>`
//! and `cert:<id>`. Each call to `executor.step(...)` dispatches one
//! activity and commits its result, so a crash mid-workflow resumes
//! exactly where it left off rather than re-running completed side
//! effects.
//!
//! [`resource::run_resource_workflow`] implements the canonical
//! Create/Update/Delete shape (§4.2) generically, parameterized by an
//! ordered list of side-effect steps, for resource kinds that don't need
//! bespoke orchestration; [`kinds`] builds that side-effect list per
//! kind (tenant, FQDN, database, database user, valkey instance/user, S3
//! bucket/key, cron job, daemon, SSH key, zone record, email account/
//! alias/forward/autoreply, backup). [`webroot`] implements the one kind
//! the specification calls out with custom shard-assignment and
//! certificate-spawning logic. [`certificate`] implements the ACME
//! HTTP-01 state machine (§4.3) and the daily renewal selection.
//!
//! [`ResourceWorkflow`] generalizes a phase-driven session model
//! (`Initializing -> ... -> Completed/Failed`) into an open-ended `run`
//! rather than a fixed phase sequence.

use thiserror::Error;

pub mod certificate;
pub mod kinds;
pub mod resource;
pub mod webroot;

/// Failure surface common to every workflow in this crate.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The workflow engine failed to replay or commit a step.
    #[error("workflow replay error: {0}")]
    Replay(#[from] hostctl_engine::ReplayError),

    /// An activity dispatch returned a non-retryable error, or retries
    /// were exhausted — the workflow cannot make further progress.
    #[error("activity dispatch failed: {0}")]
    Dispatch(#[from] hostctl_engine::DispatchError),

    /// A core-DB read/write outside the activity layer failed (workflow
    /// code does direct reads for branching decisions; writes always go
    /// through an activity so they're replay-safe).
    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),

    /// The workflow's own precondition failed (e.g. a resource row was
    /// deleted between load and execution).
    #[error("workflow precondition failed: {0}")]
    Precondition(String),
}

/// A resource lifecycle workflow: loads context, phase-gates through
/// `provisioning`, runs its side-effect activities, and phase-gates to
/// `active` or `failed`.
///
/// Implementations are driven by a [`hostctl_engine::WorkflowExecutor`]
/// resumed against workflow-ID `resource:<kind>:<id>` so at most one
/// instance is ever in flight for a given resource (enforced by
/// `hostctl_engine::WorkflowLock` at the dispatch layer, not by this
/// trait).
#[async_trait::async_trait]
pub trait ResourceWorkflow: Send + Sync {
    /// Resource kind this workflow manages, used to build its
    /// workflow-ID namespace and its core-DB table name.
    fn kind(&self) -> &'static str;

    /// Run the workflow to completion (or return the first
    /// non-recoverable error).
    async fn run(&self, executor: &mut hostctl_engine::WorkflowExecutor) -> Result<(), WorkflowError>;
}
