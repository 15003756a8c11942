#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **hostctl-store-core** – Core durable-workflow-history abstractions.
//!
//! A durable workflow's code is re-executed on failure from a persisted
//! history: every suspension point (activity call, timer, signal wait,
//! child-workflow call) is appended as a step to an append-only log keyed
//! by workflow id, and replay re-derives the workflow's in-memory state by
//! folding that log forward. This crate defines the step header, the
//! write-ahead-log contract a durable backend must satisfy to guarantee
//! that folding survives a crash mid-append, and the causal-hash chaining
//! used to detect a corrupted or truncated log.
//!
//! Storage drivers (in-memory, Postgres) implement these traits in separate
//! crates that depend on this core abstraction.

use std::vec::Vec;
use core::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use uuid::Uuid;

//─────────────────────────────
//  Core type aliases
//─────────────────────────────

/// Unique identifier for a committed workflow step (UUID v4).
pub type StepId = Uuid;

/// Blake3 digest representing the causal hash chain of a step.
pub type CausalDigest = [u8; 32];

/// Unique identifier for a WAL transaction (UUID v4).
pub type TransactionId = Uuid;

/// Sequence number for WAL entries to ensure ordering.
pub type SequenceNumber = u64;

//─────────────────────────────
//  Step payload trait
//─────────────────────────────

/// Marker trait implemented by all serializable step payloads (an
/// activity's typed input/output, a timer fire, a signal body, …).
///
/// This trait is automatically implemented for any type that satisfies the
/// required bounds. It serves as a type-safe marker to ensure only
/// appropriate types can be used as step payloads.
pub trait StepPayload: Serialize + for<'de> Deserialize<'de> + Send + Sync {}

impl<T> StepPayload for T where T: Serialize + for<'de> Deserialize<'de> + Send + Sync {}

//─────────────────────────────
//  Step header
//─────────────────────────────

/// Minimal header stored inline with every workflow-history step.
///
/// The header contains all the metadata needed to identify, order, and
/// verify a step without needing to deserialize its payload. This supports
/// efficient queries (e.g. "give me every step for workflow X in order")
/// without paying the deserialization cost for steps a replay doesn't need.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStepHeader {
    /// Step identifier (UUID v4).
    pub id: StepId,
    /// Parent step IDs this step causally depends on (usually the single
    /// preceding step in the same workflow; empty only for the first step).
    pub parents: SmallVec<[StepId; 4]>,
    /// Wall-clock timestamp when the step was committed.
    pub timestamp: DateTime<Utc>,
    /// Blake3 digest of the step payload and its causal parent digests.
    pub digest: CausalDigest,
    /// The durable workflow this step belongs to, e.g.
    /// `resource:webroot:<id>` or `converge:<shard_id>` (§4.7 naming).
    pub workflow_id: String,
    /// Application-defined step kind, e.g. `activity.AutoCreateDNSRecords`
    /// or `timer.fired` or `signal.admin_message`.
    pub kind: String,
}

//─────────────────────────────
//  Write-Ahead Logging (WAL) support
//─────────────────────────────

/// Represents a single entry in the write-ahead log.
///
/// WAL entries track all operations that modify the workflow-history state,
/// enabling crash recovery and providing durability guarantees: a step is
/// only considered committed once its `CommitTransaction` entry is durable.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WalEntry {
    /// Unique identifier for this WAL entry.
    pub id: Uuid,
    /// Transaction this entry belongs to.
    pub transaction_id: TransactionId,
    /// Sequence number for ordering within the transaction.
    pub sequence: SequenceNumber,
    /// Timestamp when this entry was created.
    pub timestamp: DateTime<Utc>,
    /// The operation being logged.
    pub operation: WalOperation,
    /// Current state of this entry.
    pub state: WalEntryState,
}

/// Types of operations that can be logged in the WAL.
///
/// Each operation type corresponds to a specific workflow-history
/// modification and includes all necessary information for recovery.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum WalOperation {
    /// Begin a new transaction.
    BeginTransaction {
        /// Transaction identifier.
        transaction_id: TransactionId,
    },
    /// Commit a workflow step (header + payload).
    CommitStep {
        /// Step header to be committed.
        header: WorkflowStepHeader,
        /// Serialized payload bytes.
        payload: Vec<u8>,
    },
    /// Commit a transaction (make all changes durable).
    CommitTransaction {
        /// Transaction identifier.
        transaction_id: TransactionId,
    },
    /// Rollback a transaction (discard all changes).
    RollbackTransaction {
        /// Transaction identifier.
        transaction_id: TransactionId,
    },
    /// Mark a WAL entry as checkpointed (can be safely removed).
    Checkpoint {
        /// Sequence number up to which entries are checkpointed.
        sequence: SequenceNumber,
    },
}

/// State of a WAL entry during processing.
///
/// This tracks the lifecycle of each entry and enables proper recovery
/// behavior during crash scenarios.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum WalEntryState {
    /// Entry is pending (not yet committed).
    Pending,
    /// Entry has been committed to storage.
    Committed,
    /// Entry has been rolled back.
    RolledBack,
    /// Entry has been checkpointed and can be removed.
    Checkpointed,
}

/// Result of a WAL recovery operation.
///
/// Contains information about what was recovered and what actions were
/// taken during the recovery process, run once at worker-pool startup
/// before any workflow is allowed to resume.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WalRecoveryResult {
    /// Number of entries that were recovered.
    pub entries_recovered: usize,
    /// Number of transactions that were rolled back.
    pub transactions_rolled_back: usize,
    /// Number of transactions that were committed.
    pub transactions_committed: usize,
    /// Number of entries that were checkpointed.
    pub entries_checkpointed: usize,
    /// Any errors encountered during recovery.
    pub recovery_errors: Vec<String>,
}

/// Abstraction over a write-ahead log for workflow-history backends.
///
/// This trait provides durability guarantees by ensuring all operations are
/// logged before being applied to the main storage. In case of crashes, the
/// WAL can be replayed to restore the workflow history to a consistent
/// state — the precondition for deterministic replay (§9).
#[async_trait]
pub trait WriteAheadLog: Send + Sync {
    /// Begin a new transaction and return its identifier.
    async fn begin_transaction(&self) -> anyhow::Result<TransactionId>;

    /// Write an entry to the WAL for the given transaction.
    ///
    /// The entry is logged but not yet committed; it only takes effect when
    /// the transaction is committed.
    async fn write_entry(
        &self,
        transaction_id: TransactionId,
        operation: WalOperation,
    ) -> anyhow::Result<()>;

    /// Commit a transaction, making all logged operations durable.
    async fn commit_transaction(&self, transaction_id: TransactionId) -> anyhow::Result<()>;

    /// Rollback a transaction, discarding all logged operations.
    async fn rollback_transaction(&self, transaction_id: TransactionId) -> anyhow::Result<()>;

    /// Recover from a previous crash by replaying the WAL: committed but
    /// not-yet-applied operations are applied, uncommitted transactions are
    /// rolled back.
    async fn recover(&self) -> anyhow::Result<WalRecoveryResult>;

    /// Create a checkpoint up to the given sequence number; entries below it
    /// are durably applied and may be pruned from the WAL.
    async fn checkpoint(&self, sequence: SequenceNumber) -> anyhow::Result<()>;

    /// Get the current WAL sequence number.
    async fn current_sequence(&self) -> anyhow::Result<SequenceNumber>;
}

//─────────────────────────────
//  Causal hashing utilities
//─────────────────────────────

/// Compute the Blake3 causal hash for a step payload.
///
/// The hash includes both the payload bytes and all parent step digests,
/// providing a cryptographic guarantee of the step's position in the causal
/// chain. Parent digests are sorted to ensure deterministic hashing
/// regardless of input order.
pub fn causal_hash(payload_bytes: &[u8], parent_digests: &[CausalDigest]) -> CausalDigest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(payload_bytes);

    let mut sorted_parents = parent_digests.to_vec();
    sorted_parents.sort_unstable();

    for parent_digest in sorted_parents {
        hasher.update(&parent_digest);
    }

    hasher.finalize().into()
}

/// Build a [`WorkflowStepHeader`] from a payload and parent steps.
///
/// This function handles serialization of the payload, computation of the
/// causal hash, and generation of a unique step ID. It ensures every step
/// has proper causal ordering and integrity verification.
pub fn create_step_header<P: StepPayload>(
    parents: &[WorkflowStepHeader],
    workflow_id: String,
    kind: String,
    payload: &P,
) -> Result<WorkflowStepHeader, rmp_serde::encode::Error> {
    let parent_ids: SmallVec<[StepId; 4]> = parents.iter().map(|h| h.id).collect();
    let parent_digests: Vec<CausalDigest> = parents.iter().map(|h| h.digest).collect();

    let payload_bytes = rmp_serde::to_vec_named(payload)?;
    let digest = causal_hash(&payload_bytes, &parent_digests);

    Ok(WorkflowStepHeader {
        id: Uuid::new_v4(),
        parents: parent_ids,
        timestamp: Utc::now(),
        digest,
        workflow_id,
        kind,
    })
}

/// Deserialize a payload from raw bytes.
///
/// Convenience wrapper for deserializing payloads retrieved from storage
/// backends via [`StorageBackend::payload_bytes`].
pub fn deserialize_payload<P: StepPayload>(bytes: &[u8]) -> Result<P, rmp_serde::decode::Error> {
    rmp_serde::from_slice(bytes)
}

//─────────────────────────────
//  Storage backend traits
//─────────────────────────────

/// Abstraction over an append-only workflow-step sink.
///
/// Storage backends implement this trait to provide step persistence. The
/// trait is designed to be simple and efficient, requiring only the ability
/// to store step headers and their associated payload bytes, plus the
/// ordered read-back a replay needs.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Persist a [`WorkflowStepHeader`] together with its serialized payload
    /// bytes.
    ///
    /// This operation should be atomic — either both the header and payload
    /// are stored successfully, or neither is stored. Implementations may
    /// batch writes for performance but must maintain step ordering within a
    /// workflow.
    async fn commit(&self, header: &WorkflowStepHeader, payload: &[u8]) -> anyhow::Result<()>;

    /// Fetch a [`WorkflowStepHeader`] by identifier.
    async fn header(&self, id: &StepId) -> anyhow::Result<Option<WorkflowStepHeader>>;

    /// Get the raw payload bytes for a given digest. Callers must
    /// deserialize the bytes themselves using the appropriate type.
    async fn payload_bytes(&self, digest: &CausalDigest) -> anyhow::Result<Option<Vec<u8>>>;

    /// Fetch every committed step for a workflow, in commit order — the
    /// sequence a replay folds over to reconstruct in-memory state.
    async fn history(&self, workflow_id: &str) -> anyhow::Result<Vec<WorkflowStepHeader>>;
}

/// Enhanced storage backend with write-ahead-logging support.
///
/// This trait extends the basic storage backend with WAL capabilities,
/// providing durability guarantees and crash recovery.
#[async_trait]
pub trait WalStorageBackend: StorageBackend + WriteAheadLog {
    /// Commit a step within a WAL transaction.
    ///
    /// The operation is logged but not immediately applied to storage; the
    /// actual storage commitment happens when the transaction is committed.
    async fn commit_with_wal(
        &self,
        transaction_id: TransactionId,
        header: &WorkflowStepHeader,
        payload: &[u8],
    ) -> anyhow::Result<()> {
        self.write_entry(
            transaction_id,
            WalOperation::CommitStep {
                header: header.clone(),
                payload: payload.to_vec(),
            },
        )
        .await
    }
}

impl<T> WalStorageBackend for T where T: StorageBackend + WriteAheadLog {}

//─────────────────────────────
//  Error types
//─────────────────────────────

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Step serialization failed.
    #[error("failed to serialize step: {0}")]
    SerializationFailed(String),
    /// Step deserialization failed.
    #[error("failed to deserialize step: {0}")]
    DeserializationFailed(String),
    /// Storage backend operation failed.
    #[error("storage operation failed: {0}")]
    BackendError(String),
    /// Step not found.
    #[error("step not found: {0}")]
    StepNotFound(String),
    /// Invalid causal hash.
    #[error("invalid causal hash: expected {expected}, got {actual}")]
    InvalidCausalHash {
        /// Expected hash.
        expected: String,
        /// Actual hash.
        actual: String,
    },
    /// WAL operation failed.
    #[error("WAL operation failed: {0}")]
    WalOperationFailed(String),
    /// Transaction not found.
    #[error("transaction not found: {0}")]
    TransactionNotFound(TransactionId),
    /// Transaction already committed.
    #[error("transaction already committed: {0}")]
    TransactionAlreadyCommitted(TransactionId),
    /// Transaction already rolled back.
    #[error("transaction already rolled back: {0}")]
    TransactionAlreadyRolledBack(TransactionId),
    /// Recovery failed.
    #[error("WAL recovery failed: {0}")]
    RecoveryFailed(String),
}

//─────────────────────────────
//  Convenience re-exports
//─────────────────────────────

/// Convenient prelude for importing the most common types.
pub mod prelude {
    pub use super::{
        CausalDigest, StepId, StepPayload, WorkflowStepHeader,
        StorageBackend, StorageError,
        causal_hash, create_step_header, deserialize_payload,
        TransactionId, SequenceNumber, WalEntry, WalOperation, WalEntryState,
        WalRecoveryResult, WriteAheadLog, WalStorageBackend,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct TestPayload {
        message: String,
        value: i32,
    }

    #[test]
    fn test_causal_hash_deterministic() {
        let payload = b"test_payload";
        let parent1 = [1u8; 32];
        let parent2 = [2u8; 32];

        let hash1 = causal_hash(payload, &[parent1, parent2]);
        let hash2 = causal_hash(payload, &[parent2, parent1]); // Different order

        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_create_step_header() {
        let payload = TestPayload {
            message: "test".to_string(),
            value: 42,
        };

        let header = create_step_header(
            &[],
            "resource:webroot:00000000-0000-0000-0000-000000000000".to_string(),
            "activity.UpdateResourceStatus".to_string(),
            &payload,
        ).unwrap();

        assert_eq!(header.kind, "activity.UpdateResourceStatus");
        assert_eq!(header.parents.len(), 0);
        assert!(header.workflow_id.starts_with("resource:webroot:"));
    }

    #[test]
    fn test_causal_hash_with_parents() {
        let payload = b"child_step";
        let parent1 = [1u8; 32];
        let parent2 = [2u8; 32];

        let hash_with_parents = causal_hash(payload, &[parent1, parent2]);
        let hash_without_parents = causal_hash(payload, &[]);

        assert_ne!(hash_with_parents, hash_without_parents);
    }

    #[test]
    fn test_step_header_serialization() {
        let header = WorkflowStepHeader {
            id: Uuid::new_v4(),
            parents: SmallVec::new(),
            timestamp: Utc::now(),
            digest: [0u8; 32],
            workflow_id: "converge:shard-1".to_string(),
            kind: "activity.GetShardDesiredState".to_string(),
        };

        let serialized = serde_json::to_string(&header).unwrap();
        let deserialized: WorkflowStepHeader = serde_json::from_str(&serialized).unwrap();

        assert_eq!(header, deserialized);
    }
}
