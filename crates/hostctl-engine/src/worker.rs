//! Worker pool: pulls queued activity tasks, dispatches them through
//! [`crate::registry`], and applies retry/circuit-breaker policy per
//! task-queue (see [`hostctl_types::Locality::queue_name`]).

use std::sync::Arc;

use dashmap::DashMap;
use hostctl_bus_core::{DomainEvent, EventBus};
use hostctl_types::EntityId;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::registry::{self, HeartbeatSink, NullHeartbeatSink};
use crate::retry::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
use crate::DispatchError;

/// One unit of dispatchable work: an activity invocation bound to a
/// task-queue (locality) and an idempotency key.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    /// The activity name registered in [`crate::registry`].
    pub activity_name: String,
    /// JSON-encoded activity input.
    pub input: Value,
    /// Idempotency key, stable across retries of the same logical step.
    pub idempotency_key: String,
    /// Task-queue this task is dispatched on.
    pub queue: String,
    /// The workflow this task belongs to, for logging/tracing.
    pub workflow_id: String,
}

/// Configuration for a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers draining the task queue.
    pub concurrency: usize,
    /// Retry policy applied to every dispatched task.
    pub retry_policy: RetryPolicy,
    /// Circuit-breaker config; one breaker is instantiated per distinct
    /// task-queue name the pool observes.
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            retry_policy: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Drives queued [`TaskDefinition`]s to completion across a fixed number
/// of concurrent workers.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    sender: mpsc::UnboundedSender<TaskDefinition>,
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    worker_id: EntityId,
}

impl WorkerPool {
    /// Spawn `config.concurrency` worker tasks draining a shared queue.
    /// `bus` receives a [`DomainEvent::TaskAbandoned`] whenever a task is
    /// dropped: circuit open, retries exhausted, or a non-retryable error.
    pub fn spawn(config: WorkerPoolConfig, bus: Arc<dyn EventBus>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let breakers: Arc<DashMap<String, Arc<CircuitBreaker>>> = Arc::new(DashMap::new());
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let worker_id = EntityId::new();

        for worker_index in 0..config.concurrency.max(1) {
            let receiver = Arc::clone(&receiver);
            let breakers = Arc::clone(&breakers);
            let bus = Arc::clone(&bus);
            let retry_policy = config.retry_policy;
            let breaker_config = config.circuit_breaker;

            tokio::spawn(async move {
                loop {
                    let task = {
                        let mut guard = receiver.lock().await;
                        guard.recv().await
                    };
                    let Some(task) = task else { break };
                    debug!(worker_index, queue = %task.queue, activity = %task.activity_name, "dispatching task");
                    run_with_policy(task, retry_policy, breaker_config, &breakers, bus.as_ref()).await;
                }
            });
        }

        Self { config, sender, breakers, worker_id }
    }

    /// Enqueue a task for execution. Returns an error only if every
    /// worker has shut down.
    pub fn submit(&self, task: TaskDefinition) -> Result<(), TaskDefinition> {
        self.sender.send(task.clone()).map_err(|_| task)
    }

    /// This pool's identity, for logs distinguishing multiple pools in
    /// one process (e.g. one per node-agent shard).
    pub fn worker_id(&self) -> EntityId {
        self.worker_id
    }

    /// Current circuit state for a queue, for diagnostics.
    pub fn circuit_state(&self, queue: &str) -> Option<crate::retry::CircuitState> {
        self.breakers.get(queue).map(|b| b.state())
    }

    /// The pool's configuration.
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }
}

async fn run_with_policy(
    task: TaskDefinition,
    retry_policy: RetryPolicy,
    breaker_config: CircuitBreakerConfig,
    breakers: &DashMap<String, Arc<CircuitBreaker>>,
    bus: &dyn EventBus,
) {
    let breaker = breakers
        .entry(task.queue.clone())
        .or_insert_with(|| Arc::new(CircuitBreaker::new(breaker_config)))
        .clone();

    let heartbeat: Arc<dyn HeartbeatSink> = Arc::new(NullHeartbeatSink);
    let mut attempt = 1u32;

    loop {
        if !breaker.allow_request() {
            warn!(queue = %task.queue, activity = %task.activity_name, "circuit open, dropping task");
            abandon(bus, &task, "circuit open".to_string());
            return;
        }

        let result = registry::dispatch(
            &task.activity_name,
            task.input.clone(),
            task.idempotency_key.clone(),
            Arc::clone(&heartbeat),
        )
        .await;

        match result {
            Ok(_) => {
                breaker.record_success();
                return;
            }
            Err(err) => {
                breaker.record_failure();
                let retryable = err.is_retryable();
                warn!(
                    queue = %task.queue,
                    activity = %task.activity_name,
                    attempt,
                    retryable,
                    error = %err,
                    "activity dispatch failed"
                );

                if !retryable || !retry_policy.has_attempts_remaining(attempt) {
                    abandon(bus, &task, err.to_string());
                    return;
                }

                sleep(retry_policy.delay_for(attempt)).await;
                attempt += 1;
            }
        }
    }
}

fn abandon(bus: &dyn EventBus, task: &TaskDefinition, error: String) {
    let _ = bus.publish(&DomainEvent::TaskAbandoned {
        workflow_id: task.workflow_id.clone(),
        activity_name: task.activity_name.clone(),
        queue: task.queue.clone(),
        error,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::register_activity;
    use hostctl_bus_core::InMemoryBus;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn task_succeeding_on_first_try_runs_once() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        register_activity(
            "WorkerTestEcho",
            Arc::new(|input, _key, _hb| {
                CALLS.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move { Ok(input) })
            }),
        );

        let bus = Arc::new(InMemoryBus::new(16));
        let pool = WorkerPool::spawn(
            WorkerPoolConfig { concurrency: 1, retry_policy: RetryPolicy::none(), circuit_breaker: CircuitBreakerConfig::default() },
            bus,
        );

        pool.submit(TaskDefinition {
            activity_name: "WorkerTestEcho".into(),
            input: serde_json::json!({}),
            idempotency_key: "k1".into(),
            queue: "core".into(),
            workflow_id: "resource:webroot:1".into(),
        })
        .unwrap();

        sleep(Duration::from_millis(50)).await;
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_activity_retries_up_to_policy() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        register_activity(
            "WorkerTestFailTwice",
            Arc::new(|_input, _key, _hb| {
                Box::pin(async move {
                    let n = CALLS.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(DispatchError::Retryable(anyhow::anyhow!("transient")))
                    } else {
                        Ok(serde_json::json!({"ok": true}))
                    }
                })
            }),
        );

        let bus = Arc::new(InMemoryBus::new(16));
        let pool = WorkerPool::spawn(
            WorkerPoolConfig {
                concurrency: 1,
                retry_policy: RetryPolicy {
                    max_attempts: 5,
                    base_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(5),
                    jitter_fraction: 0.0,
                },
                circuit_breaker: CircuitBreakerConfig::default(),
            },
            bus,
        );

        pool.submit(TaskDefinition {
            activity_name: "WorkerTestFailTwice".into(),
            input: serde_json::json!({}),
            idempotency_key: "k2".into(),
            queue: "core".into(),
            workflow_id: "resource:webroot:2".into(),
        })
        .unwrap();

        sleep(Duration::from_millis(100)).await;
        assert_eq!(CALLS.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_failure_publishes_task_abandoned() {
        register_activity(
            "WorkerTestNonRetryable",
            Arc::new(|_input, _key, _hb| {
                Box::pin(async move { Err(DispatchError::NonRetryable(anyhow::anyhow!("bad input"))) })
            }),
        );

        let bus = Arc::new(InMemoryBus::new(16));
        let mut rx = bus.subscribe();
        let pool = WorkerPool::spawn(
            WorkerPoolConfig { concurrency: 1, retry_policy: RetryPolicy::none(), circuit_breaker: CircuitBreakerConfig::default() },
            bus,
        );

        pool.submit(TaskDefinition {
            activity_name: "WorkerTestNonRetryable".into(),
            input: serde_json::json!({}),
            idempotency_key: "k3".into(),
            queue: "core".into(),
            workflow_id: "resource:webroot:3".into(),
        })
        .unwrap();

        let event = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await.unwrap().unwrap();
        match event {
            DomainEvent::TaskAbandoned { workflow_id, activity_name, .. } => {
                assert_eq!(workflow_id, "resource:webroot:3");
                assert_eq!(activity_name, "WorkerTestNonRetryable");
            }
            other => panic!("expected TaskAbandoned, got {other:?}"),
        }
    }
}
