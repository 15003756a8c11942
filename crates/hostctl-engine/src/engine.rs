//! Replay-based workflow execution.
//!
//! A workflow is an async function that calls [`WorkflowExecutor::step`]
//! at every point it would otherwise perform a side effect (dispatching
//! an activity, branching on its result). On first execution each call
//! commits a new [`WorkflowStepHeader`] to the store; on a resumed
//! execution (after a process restart, or a worker picking the task back
//! up after a crash) the same call sequence replays the already-committed
//! steps from [`hostctl_store_core::StorageBackend::history`] instead of
//! re-dispatching the activity, so an at-most-once activity is never
//! invoked twice for the same step.

use std::sync::Arc;

use hostctl_store_core::{
    create_step_header, StepPayload, StorageBackend, WorkflowStepHeader,
};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Failure modes encountered while replaying or advancing a workflow.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The underlying storage backend returned an error.
    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),

    /// A step was replayed but its payload bytes could not be
    /// deserialized as the type the caller expected — the workflow's
    /// code changed incompatibly since the step was recorded.
    #[error("step {step_kind:?} payload did not match the expected type: {source}")]
    PayloadMismatch {
        /// The recorded step's `kind` tag.
        step_kind: String,
        /// The deserialization failure.
        #[source]
        source: anyhow::Error,
    },

    /// The step log for this workflow-ID had no payload bytes stored for
    /// a step whose header was present — a storage-layer invariant
    /// violation (header and payload are meant to be committed
    /// atomically).
    #[error("step {0} has a header but no payload bytes")]
    MissingPayload(hostctl_store_core::StepId),
}

/// Drives one workflow's execution against a [`StorageBackend`], folding
/// its persisted history forward and committing new steps as the
/// workflow function makes progress.
pub struct WorkflowExecutor {
    store: Arc<dyn StorageBackend>,
    workflow_id: String,
    history: Vec<WorkflowStepHeader>,
    cursor: usize,
}

impl WorkflowExecutor {
    /// Load the persisted history for `workflow_id` and prepare to
    /// replay it from the start.
    pub async fn resume(
        store: Arc<dyn StorageBackend>,
        workflow_id: impl Into<String>,
    ) -> Result<Self, ReplayError> {
        let workflow_id = workflow_id.into();
        let history = store
            .history(&workflow_id)
            .await
            .map_err(ReplayError::Storage)?;
        Ok(Self { store, workflow_id, history, cursor: 0 })
    }

    /// The workflow-ID this executor is driving.
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Number of steps already committed for this workflow, before this
    /// execution runs any new ones.
    pub fn replayed_step_count(&self) -> usize {
        self.history.len()
    }

    /// Advance past one logical step of the workflow.
    ///
    /// If a step of this `kind` was already committed at the current
    /// cursor position, its stored payload is deserialized and returned
    /// without calling `produce` — this is the replay path, and `produce`
    /// (which would re-dispatch an activity) is never invoked. Otherwise
    /// `produce` runs, its result is committed as a new step, and is
    /// returned.
    pub async fn step<T, F, Fut>(&mut self, kind: &str, produce: F) -> Result<T, ReplayError>
    where
        T: StepPayload + DeserializeOwned + 'static,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        if let Some(header) = self.history.get(self.cursor).cloned() {
            self.cursor += 1;
            let bytes = self
                .store
                .payload_bytes(&header.digest)
                .await
                .map_err(ReplayError::Storage)?
                .ok_or(ReplayError::MissingPayload(header.id))?;
            return rmp_serde::from_slice(&bytes).map_err(|e| ReplayError::PayloadMismatch {
                step_kind: header.kind,
                source: e.into(),
            });
        }

        let value = produce().await.map_err(ReplayError::Storage)?;
        let parent = self.history.last().cloned();
        let parents: Vec<WorkflowStepHeader> = parent.into_iter().collect();
        let header = create_step_header(&parents, self.workflow_id.clone(), kind.to_string(), &value)
            .map_err(|e| ReplayError::Storage(e.into()))?;
        let payload_bytes = rmp_serde::to_vec(&value).map_err(|e| ReplayError::Storage(e.into()))?;

        self.store
            .commit(&header, &payload_bytes)
            .await
            .map_err(ReplayError::Storage)?;

        self.history.push(header);
        self.cursor += 1;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostctl_store_memory::MemoryBackend;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn fresh_workflow_runs_every_step() {
        let store: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let mut exec = WorkflowExecutor::resume(store, "resource:webroot:1").await.unwrap();

        let a: u32 = exec.step("create_dir", || async { Ok(1u32) }).await.unwrap();
        let b: u32 = exec.step("write_file", || async { Ok(2u32) }).await.unwrap();

        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(exec.replayed_step_count(), 0);
    }

    #[tokio::test]
    async fn resumed_workflow_replays_without_recalling_producer() {
        let store: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());

        let mut exec = WorkflowExecutor::resume(Arc::clone(&store), "resource:webroot:1")
            .await
            .unwrap();
        let _: u32 = exec.step("create_dir", || async { Ok(1u32) }).await.unwrap();
        let _: u32 = exec.step("write_file", || async { Ok(2u32) }).await.unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let mut resumed = WorkflowExecutor::resume(Arc::clone(&store), "resource:webroot:1")
            .await
            .unwrap();
        assert_eq!(resumed.replayed_step_count(), 2);

        let calls_clone = Arc::clone(&calls);
        let a: u32 = resumed
            .step("create_dir", || async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(99u32)
            })
            .await
            .unwrap();
        assert_eq!(a, 1); // replayed value, not the producer's 99
        assert_eq!(calls.load(Ordering::SeqCst), 0); // producer never ran

        let b: u32 = resumed.step("write_file", || async { Ok(2u32) }).await.unwrap();
        assert_eq!(b, 2);

        // a genuinely new third step still runs its producer
        let c: u32 = resumed.step("set_permissions", || async { Ok(3u32) }).await.unwrap();
        assert_eq!(c, 3);
    }
}
