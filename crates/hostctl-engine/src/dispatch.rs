//! Workflow-ID uniqueness: at most one in-flight execution per
//! workflow-ID (`resource:<kind>:<id>`, `converge:<shard_id>`,
//! `incident:<id>`, `cron:<name>`, per [`hostctl_types`]'s naming
//! helpers).
//!
//! A second attempt to start a workflow already running under the same
//! ID is rejected rather than queued — the caller (typically a
//! convergence trigger firing on every node heartbeat, or a duplicate
//! resource-create request) is expected to treat this as "already in
//! progress" and move on.

use dashmap::DashSet;
use std::future::Future;
use std::sync::Arc;

/// Tracks which workflow-IDs currently have a guard held.
///
/// Cloning shares the underlying set — the worker pool holds one
/// instance and clones it into each worker task.
#[derive(Clone, Default)]
pub struct WorkflowLock {
    inflight: Arc<DashSet<String>>,
}

/// Held while a workflow executes; releases its workflow-ID on drop so a
/// panicking or early-returning task can't leave the ID stuck locked
/// forever.
pub struct WorkflowGuard {
    lock: WorkflowLock,
    workflow_id: String,
}

impl Drop for WorkflowGuard {
    fn drop(&mut self) {
        self.lock.inflight.remove(&self.workflow_id);
    }
}

impl WorkflowLock {
    /// Build an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to acquire the guard for `workflow_id`. Returns `None` if
    /// another execution already holds it.
    pub fn try_acquire(&self, workflow_id: impl Into<String>) -> Option<WorkflowGuard> {
        let workflow_id = workflow_id.into();
        if self.inflight.insert(workflow_id.clone()) {
            Some(WorkflowGuard { lock: self.clone(), workflow_id })
        } else {
            None
        }
    }

    /// Whether `workflow_id` currently has a guard held, for diagnostics.
    pub fn is_inflight(&self, workflow_id: &str) -> bool {
        self.inflight.contains(workflow_id)
    }
}

/// Coalesces a burst of converge triggers for the same workflow-ID into
/// at most one queued rerun behind whatever's already in flight.
///
/// `WorkflowLock` alone rejects a second start outright; a heartbeat
/// storm firing five triggers for one shard within a few milliseconds
/// would otherwise drop the last four on the floor even though the
/// shard's desired state changed after the in-flight run started
/// reading it. `ConvergeCoalescer` keeps one pending-rerun flag per
/// workflow-ID instead: triggers that arrive while a run is in flight
/// set the flag (idempotently) rather than queuing a task, and the
/// in-flight run checks the flag after finishing and reruns once more
/// if it was set, before releasing the lock. So a burst of N triggers
/// produces at most two executions: the one running and the one
/// queued.
#[derive(Clone, Default)]
pub struct ConvergeCoalescer {
    lock: WorkflowLock,
    pending: Arc<DashSet<String>>,
}

impl ConvergeCoalescer {
    /// Build an empty coalescer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire a converge run for `workflow_id`. Runs `task` immediately if
    /// no run for this ID is in flight; otherwise marks one rerun as
    /// pending and returns without spawning anything.
    pub fn fire<F, Fut>(&self, workflow_id: impl Into<String>, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let workflow_id = workflow_id.into();
        let Some(guard) = self.lock.try_acquire(workflow_id.clone()) else {
            self.pending.insert(workflow_id);
            return;
        };
        let pending = self.pending.clone();
        tokio::spawn(async move {
            let _guard = guard;
            loop {
                task().await;
                if !pending.remove(&workflow_id).is_some() {
                    break;
                }
            }
        });
    }

    /// Whether a rerun is currently queued behind an in-flight run for
    /// `workflow_id`, for diagnostics and tests.
    pub fn has_pending_rerun(&self, workflow_id: &str) -> bool {
        self.pending.contains(workflow_id)
    }

    /// Whether a run for `workflow_id` is currently executing.
    pub fn is_running(&self, workflow_id: &str) -> bool {
        self.lock.is_inflight(workflow_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_of_same_id_is_rejected() {
        let lock = WorkflowLock::new();
        let guard = lock.try_acquire("converge:shard-1").unwrap();
        assert!(lock.try_acquire("converge:shard-1").is_none());
        drop(guard);
        assert!(lock.try_acquire("converge:shard-1").is_some());
    }

    #[test]
    fn distinct_ids_do_not_contend() {
        let lock = WorkflowLock::new();
        let _a = lock.try_acquire("resource:webroot:1").unwrap();
        let _b = lock.try_acquire("resource:webroot:2").unwrap();
        assert!(lock.is_inflight("resource:webroot:1"));
        assert!(lock.is_inflight("resource:webroot:2"));
    }

    #[test]
    fn guard_drop_releases_id() {
        let lock = WorkflowLock::new();
        {
            let _guard = lock.try_acquire("cron:escalation").unwrap();
            assert!(lock.is_inflight("cron:escalation"));
        }
        assert!(!lock.is_inflight("cron:escalation"));
    }

    #[tokio::test]
    async fn burst_of_triggers_coalesces_to_at_most_one_rerun() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::sync::Notify;
        use tokio::time::Duration;

        let coalescer = ConvergeCoalescer::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let first_run_started = Arc::new(Notify::new());
        let release_first_run = Arc::new(Notify::new());

        let runs_for_task = runs.clone();
        let started = first_run_started.clone();
        let release = release_first_run.clone();
        coalescer.fire("converge:shard-1", move || {
            let runs = runs_for_task.clone();
            let started = started.clone();
            let release = release.clone();
            async move {
                let n = runs.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    started.notify_one();
                    release.notified().await;
                }
            }
        });

        first_run_started.notified().await;
        // Five more triggers arrive while the first run is still in
        // flight, all for the same shard within the same instant.
        for _ in 0..5 {
            coalescer.fire("converge:shard-1", || async {});
        }
        assert!(coalescer.has_pending_rerun("converge:shard-1"));

        release_first_run.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(!coalescer.is_running("converge:shard-1"));
        assert!(!coalescer.has_pending_rerun("converge:shard-1"));
    }
}
