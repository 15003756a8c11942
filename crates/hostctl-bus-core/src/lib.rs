#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **hostctl-bus-core** – Core event bus abstraction for hostctl.
//!
//! This crate provides the fundamental event bus traits and types used
//! throughout the orchestration core. It sits at the deterministic layer
//! and provides lightweight, in-memory event broadcasting with no
//! persistence or I/O concerns of its own.
//!
//! The bus carries the domain events resource workflows, convergence
//! workflows, and the incident subsystem emit after a successful state
//! transition — distinct from the durable workflow-history log kept by
//! `hostctl-store-core`, which persists every suspension point regardless
//! of whether anything else is listening.

use std::sync::Arc;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use hostctl_types::{EntityId, IncidentSeverity, ResourceStatus};

//─────────────────────────────
//  Domain events
//─────────────────────────────

/// Typed domain event broadcast after a workflow's state transition commits.
///
/// Each variant mirrors one notification named across §4 of the
/// specification: resource lifecycle changes, shard convergence triggers
/// and completions, and incident lifecycle changes. Consumers include the
/// convergence dispatcher (listens for resource events to decide whether a
/// shard needs to converge) and any admin-facing notification layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[non_exhaustive]
pub enum DomainEvent {
    /// A resource row's lifecycle status changed.
    ResourceStatusChanged {
        /// Resource kind, e.g. `webroot`, `certificate`.
        kind: String,
        /// Resource id.
        id: EntityId,
        /// New status.
        status: ResourceStatus,
        /// Optional status message (set on `Failed`).
        status_message: Option<String>,
    },
    /// A resource workflow requested a shard converge because its side
    /// effects are visible to the shard.
    ShardConvergeRequested {
        /// The shard to converge.
        shard_id: EntityId,
    },
    /// A shard converge workflow completed (successfully or not).
    ShardConvergeCompleted {
        /// The shard that finished converging.
        shard_id: EntityId,
        /// Whether the converge completed without error.
        success: bool,
    },
    /// A DNS zone_records row changed managed-by arbitration state.
    DnsRecordMaterialized {
        /// Owning zone.
        zone_id: EntityId,
        /// Record type, e.g. `A`.
        record_type: String,
        /// Record owner name.
        name: String,
        /// Whether the row now active in PowerDNS is auto or custom.
        managed_by: hostctl_types::ManagedBy,
    },
    /// An incident was raised, and did not already exist under its
    /// dedupe_key.
    IncidentRaised {
        /// The incident id.
        incident_id: EntityId,
        /// Severity at creation time.
        severity: IncidentSeverity,
    },
    /// An incident transitioned to a terminal or escalated status.
    IncidentStatusChanged {
        /// The incident id.
        incident_id: EntityId,
        /// New status.
        status: hostctl_types::IncidentStatus,
    },
    /// A worker-pool task was dropped: its circuit was open, its retries
    /// were exhausted, or its last error was non-retryable.
    TaskAbandoned {
        /// The workflow this task belonged to.
        workflow_id: String,
        /// The activity name that was dispatched.
        activity_name: String,
        /// The task-queue the task ran on.
        queue: String,
        /// The last error observed, or the circuit-open reason.
        error: String,
    },
}

//─────────────────────────────
//  Event bus trait
//─────────────────────────────

/// Core event bus abstraction for publishing and subscribing to domain events.
///
/// The bus provides a simple publish-subscribe mechanism that allows
/// different components to communicate asynchronously while maintaining
/// loose coupling. All implementations must be thread-safe and support
/// multiple subscribers.
pub trait EventBus: Send + Sync {
    /// Publish an event to all subscribers.
    ///
    /// This operation should complete quickly and not block the caller.
    /// If subscribers are slow or unavailable, the bus may drop events
    /// to maintain system responsiveness.
    fn publish(&self, event: &DomainEvent) -> Result<()>;

    /// Subscribe to the live event stream.
    ///
    /// Returns a receiver that will receive copies of all events published
    /// after the subscription was created. Subscribers that fall behind
    /// may miss events if the bus buffer overflows.
    fn subscribe(&self) -> broadcast::Receiver<DomainEvent>;
}

//─────────────────────────────
//  In-memory bus implementation
//─────────────────────────────

/// Simple in-memory, broadcast-only event bus using Tokio channels.
///
/// This implementation uses a ring buffer to store recent events and
/// broadcasts them to all active subscribers. It provides good performance
/// for scenarios where events don't need persistence, and is sufficient
/// both for unit tests and for a single-process deployment.
#[derive(Debug, Clone)]
pub struct InMemoryBus {
    tx: Arc<broadcast::Sender<DomainEvent>>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl InMemoryBus {
    /// Create a new in-memory bus with the specified ring buffer capacity.
    ///
    /// The capacity determines how many events can be buffered for slow
    /// subscribers before older events are dropped.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx: Arc::new(tx) }
    }

    /// Get the current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventBus for InMemoryBus {
    fn publish(&self, event: &DomainEvent) -> Result<()> {
        // Ignore lagging receiver errors - subscribers must handle missed events.
        let _ = self.tx.send(event.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }
}

//─────────────────────────────
//  Error types
//─────────────────────────────

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Event could not be published.
    #[error("failed to publish event: {0}")]
    PublishFailed(String),
    /// Subscription failed.
    #[error("failed to create subscription: {0}")]
    SubscriptionFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostctl_types::EntityId;
    use tokio::sync::broadcast::error::RecvError;

    #[tokio::test]
    async fn test_in_memory_bus_basic_flow() {
        let bus = InMemoryBus::new(16);
        let mut rx = bus.subscribe();

        let event = DomainEvent::ResourceStatusChanged {
            kind: "webroot".into(),
            id: EntityId::new(),
            status: ResourceStatus::Active,
            status_message: None,
        };

        bus.publish(&event).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = InMemoryBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        let event = DomainEvent::ShardConvergeRequested {
            shard_id: EntityId::new(),
        };

        bus.publish(&event).unwrap();

        assert_eq!(rx1.recv().await.unwrap(), event);
        assert_eq!(rx2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_buffer_overflow() {
        let bus = InMemoryBus::new(2); // Very small buffer
        let mut rx = bus.subscribe();

        for _ in 0..5 {
            let event = DomainEvent::ShardConvergeCompleted {
                shard_id: EntityId::new(),
                success: true,
            };
            bus.publish(&event).unwrap();
        }

        match rx.recv().await {
            Ok(_) => {
                while rx.recv().await.is_ok() {
                    // Keep draining.
                }
            }
            Err(RecvError::Lagged(_)) => {
                // Expected - some events were dropped.
            }
            Err(e) => panic!("Unexpected error: {}", e),
        }
    }
}
