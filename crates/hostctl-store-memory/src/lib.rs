#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **hostctl-store-memory** – In-memory workflow-history storage driver for
//! hostctl.
//!
//! This crate provides a fast, non-persistent storage backend suitable for
//! testing, development, and scenarios where workflow-history persistence
//! is not required. All data is stored in memory and lost when the process
//! terminates — never use it for a production worker pool, since a replay
//! after a process restart has nothing to replay from.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use hostctl_store_core::{
    StorageBackend, WorkflowStepHeader, StepId, CausalDigest,
};

/// Default buffer size for the live step broadcast channel.
const DEFAULT_BUFFER: usize = 1024;

//─────────────────────────────
//  In-memory storage backend
//─────────────────────────────

/// An in-memory, non-persistent workflow-step store.
///
/// This implementation stores all steps in memory using `HashMap`
/// collections. It provides excellent performance for read and write
/// operations but offers no persistence guarantees. All data is lost when
/// the process terminates.
///
/// The storage backend also provides a live step stream via broadcast
/// channels, allowing subscribers to observe committed steps in real time —
/// useful for a dashboard tailing an in-flight workflow during tests.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    headers: Arc<RwLock<HashMap<StepId, WorkflowStepHeader>>>,
    payloads: Arc<RwLock<HashMap<CausalDigest, Vec<u8>>>>,
    broadcast_tx: broadcast::Sender<WorkflowStepHeader>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates a new, empty memory storage backend.
    ///
    /// The backend starts with empty storage and a broadcast channel with
    /// the default buffer size for the live step stream.
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER)
    }

    /// Creates a new memory backend with a custom broadcast buffer size.
    ///
    /// The buffer size determines how many steps can be queued for slow
    /// subscribers before older steps are dropped from the live stream.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(buffer_size);
        Self {
            headers: Arc::new(RwLock::new(HashMap::new())),
            payloads: Arc::new(RwLock::new(HashMap::new())),
            broadcast_tx,
        }
    }

    /// Subscribe to the live step stream.
    ///
    /// Returns a receiver that will receive copies of all step headers as
    /// they are committed to storage. Subscribers that fall behind may miss
    /// steps if the broadcast buffer overflows.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowStepHeader> {
        self.broadcast_tx.subscribe()
    }

    /// Get the current number of stored steps.
    pub async fn step_count(&self) -> usize {
        self.headers.read().await.len()
    }

    /// Get the current number of unique payloads stored.
    ///
    /// This may be less than the step count due to payload deduplication
    /// when multiple steps share the same content hash.
    pub async fn payload_count(&self) -> usize {
        self.payloads.read().await.len()
    }

    /// Clear all stored steps and payloads.
    ///
    /// This operation is useful for testing and development scenarios
    /// where you need to reset the storage state.
    pub async fn clear(&self) {
        self.headers.write().await.clear();
        self.payloads.write().await.clear();
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn commit(&self, header: &WorkflowStepHeader, payload: &[u8]) -> Result<()> {
        // Store payload, deduplicated by digest: identical steps on a retry
        // (e.g. replay re-deriving a step already committed) share storage.
        self.payloads
            .write()
            .await
            .entry(header.digest)
            .or_insert_with(|| payload.to_vec());

        self.headers
            .write()
            .await
            .insert(header.id, header.clone());

        let _ = self.broadcast_tx.send(header.clone());

        Ok(())
    }

    async fn header(&self, id: &StepId) -> Result<Option<WorkflowStepHeader>> {
        Ok(self.headers.read().await.get(id).cloned())
    }

    async fn payload_bytes(&self, digest: &CausalDigest) -> Result<Option<Vec<u8>>> {
        Ok(self.payloads.read().await.get(digest).cloned())
    }

    async fn history(&self, workflow_id: &str) -> Result<Vec<WorkflowStepHeader>> {
        let headers = self.headers.read().await;
        let mut steps: Vec<WorkflowStepHeader> = headers
            .values()
            .filter(|h| h.workflow_id == workflow_id)
            .cloned()
            .collect();
        steps.sort_by_key(|h| h.timestamp);
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use hostctl_store_core::{create_step_header, prelude::*};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct TestStep {
        message: String,
        value: i32,
    }

    #[tokio::test]
    async fn test_basic_storage_operations() {
        let backend = MemoryBackend::new();

        let step = TestStep {
            message: "test".to_string(),
            value: 42,
        };

        let header = create_step_header(
            &[],
            "resource:webroot:00000000-0000-0000-0000-000000000000".to_string(),
            "activity.UpdateResourceStatus".to_string(),
            &step,
        ).unwrap();

        let payload_bytes = rmp_serde::to_vec_named(&step).unwrap();

        backend.commit(&header, &payload_bytes).await.unwrap();

        let retrieved_header = backend.header(&header.id).await.unwrap().unwrap();
        assert_eq!(retrieved_header, header);

        let payload_bytes = backend
            .payload_bytes(&header.digest)
            .await
            .unwrap()
            .unwrap();
        let retrieved_step: TestStep = rmp_serde::from_slice(&payload_bytes).unwrap();
        assert_eq!(retrieved_step, step);
    }

    #[tokio::test]
    async fn test_missing_steps() {
        let backend = MemoryBackend::new();

        let result = backend.header(&uuid::Uuid::new_v4()).await.unwrap();
        assert!(result.is_none());

        let result = backend
            .payload_bytes(&[0u8; 32])
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_payload_deduplication() {
        let backend = MemoryBackend::new();

        let step = TestStep {
            message: "duplicate".to_string(),
            value: 123,
        };

        let header1 = create_step_header(
            &[],
            "converge:shard-1".to_string(),
            "activity.GetShardDesiredState".to_string(),
            &step,
        ).unwrap();

        let header2 = create_step_header(
            &[],
            "converge:shard-1".to_string(),
            "activity.GetShardDesiredState".to_string(),
            &step,
        ).unwrap();

        // Same payload, same digest
        assert_eq!(header1.digest, header2.digest);

        let payload_bytes = rmp_serde::to_vec_named(&step).unwrap();

        backend.commit(&header1, &payload_bytes).await.unwrap();
        backend.commit(&header2, &payload_bytes).await.unwrap();

        assert_eq!(backend.step_count().await, 2);
        assert_eq!(backend.payload_count().await, 1);
    }

    #[tokio::test]
    async fn test_live_step_stream() {
        let backend = MemoryBackend::new();
        let mut rx = backend.subscribe();

        let step = TestStep {
            message: "live".to_string(),
            value: 999,
        };

        let header = create_step_header(
            &[],
            "incident:00000000-0000-0000-0000-000000000000".to_string(),
            "tool.resolve_incident".to_string(),
            &step,
        ).unwrap();

        let payload_bytes = rmp_serde::to_vec_named(&step).unwrap();

        backend.commit(&header, &payload_bytes).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received, header);
    }

    #[tokio::test]
    async fn test_clear_storage() {
        let backend = MemoryBackend::new();

        let step = TestStep {
            message: "to_be_cleared".to_string(),
            value: 1,
        };

        let header = create_step_header(
            &[],
            "cron:escalation_sweep".to_string(),
            "activity.EscalateOverdueIncidents".to_string(),
            &step,
        ).unwrap();

        let payload_bytes = rmp_serde::to_vec_named(&step).unwrap();

        backend.commit(&header, &payload_bytes).await.unwrap();
        assert_eq!(backend.step_count().await, 1);
        assert_eq!(backend.payload_count().await, 1);

        backend.clear().await;
        assert_eq!(backend.step_count().await, 0);
        assert_eq!(backend.payload_count().await, 0);

        let result = backend.header(&header.id).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_history_returns_ordered_steps_for_one_workflow() {
        let backend = MemoryBackend::new();
        let workflow_id = "resource:fqdn:00000000-0000-0000-0000-000000000001".to_string();

        let mut prev: Vec<WorkflowStepHeader> = vec![];
        for i in 0..3 {
            let step = TestStep { message: format!("step-{i}"), value: i };
            let header = create_step_header(&prev, workflow_id.clone(), format!("activity.Step{i}"), &step).unwrap();
            let payload_bytes = rmp_serde::to_vec_named(&step).unwrap();
            backend.commit(&header, &payload_bytes).await.unwrap();
            prev = vec![header];
        }

        // An unrelated workflow's step must not show up in this history.
        let other_step = TestStep { message: "other".into(), value: 99 };
        let other_header = create_step_header(&[], "resource:fqdn:00000000-0000-0000-0000-000000000002".to_string(), "activity.Unrelated".to_string(), &other_step).unwrap();
        backend.commit(&other_header, &rmp_serde::to_vec_named(&other_step).unwrap()).await.unwrap();

        let history = backend.history(&workflow_id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].kind, "activity.Step0");
        assert_eq!(history[2].kind, "activity.Step2");
    }
}
