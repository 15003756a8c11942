#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **hostctl-incidents** – Incident dedupe/auto-resolve, the escalation
//! cron pass, and the autonomous investigation agent (§4.6).
//!
//! An incident is opened once per `dedupe_key`, closed automatically
//! when its resource recovers, escalated by a periodic threshold sweep
//! if nobody (agent or human) touches it in time, and in between can be
//! claimed by the investigation agent: a tool-calling `Chat`/`Execute`
//! loop, durable under the `incident:<id>` workflow-ID namespace so a
//! crash mid-investigation resumes its message history rather than
//! starting the conversation over.

use thiserror::Error;

pub mod escalation;
pub mod investigate;
pub mod lifecycle;
pub mod queue;

/// Errors this crate's drivers may return.
#[derive(Debug, Error)]
pub enum IncidentError {
    /// Underlying workflow step/replay failure.
    #[error(transparent)]
    Workflow(#[from] hostctl_workflows::WorkflowError),
    /// A core-DB read or write failed.
    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),
}
