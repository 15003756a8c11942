//! The canonical Create/Update/Delete shape (§4.2), generalized so
//! resource kinds that don't need bespoke fan-out logic (tenant, FQDN,
//! database, database user, valkey instance/user, S3 bucket/key, cron
//! job, daemon, SSH key, zone, zone record, email account/alias/
//! forward/autoreply, backup) share one driver rather than near-
//! identical hand-written workflows.
//!
//! Webroot and certificate have their own modules ([`crate::webroot`],
//! [`crate::certificate`]) because each needs bespoke shard-assignment
//! or state-machine logic this generic driver doesn't cover.

use std::sync::Arc;

use hostctl_bus_core::{DomainEvent, EventBus};
use hostctl_engine::{DispatchError, NullHeartbeatSink, WorkflowExecutor};
use hostctl_types::{EntityId, Incident, ResourceStatus};
use serde_json::Value;

use crate::WorkflowError;

/// One activity dispatch in a resource workflow's ordered side-effect
/// list.
pub struct ActivityStep {
    /// Step kind tag, used as the workflow-history step key — must be
    /// stable across code versions for replay to line up.
    pub step_kind: &'static str,
    /// Registered activity name to dispatch.
    pub activity_name: &'static str,
    /// JSON input for the activity.
    pub input: Value,
}

/// Describes one resource workflow run: its table, target row, and the
/// ordered activities that realize the side effects a create/update/
/// delete needs.
pub struct ResourceWorkflowSpec {
    /// Core-DB table for this resource kind (`UpdateResourceStatus`'s
    /// `table` argument).
    pub table: &'static str,
    /// Target row id.
    pub resource_id: EntityId,
    /// Side-effect activities, in dependency order. For a delete
    /// workflow these should already be in reverse (downstream-first)
    /// order — this module does not reorder them.
    pub side_effects: Vec<ActivityStep>,
    /// Shards whose converge workflow should be triggered because this
    /// workflow's side effects are visible to them.
    pub converge_shards: Vec<EntityId>,
    /// The final status to phase-gate to on success (`Active` for
    /// create/update, `Deleted` for delete).
    pub final_status: ResourceStatus,
}

/// Classifies a [`WorkflowError`] as retryable, by recovering the
/// original [`DispatchError`] where one is wrapped — shared by every
/// workflow and converge driver that dispatches activities through
/// [`dispatch_step`].
pub fn dispatch_retryable(err: &WorkflowError) -> bool {
    match err {
        WorkflowError::Replay(hostctl_engine::ReplayError::Storage(e)) => {
            e.downcast_ref::<DispatchError>().map(DispatchError::is_retryable).unwrap_or(true)
        }
        WorkflowError::Dispatch(d) => d.is_retryable(),
        _ => true,
    }
}

/// Dispatches one [`ActivityStep`] through [`WorkflowExecutor::step`],
/// so a replayed run skips it once committed.
pub async fn dispatch_step(
    executor: &mut WorkflowExecutor,
    step: &ActivityStep,
) -> Result<Value, WorkflowError> {
    let idempotency_key = format!("{}:{}", executor.workflow_id(), step.step_kind);
    let activity_name = step.activity_name;
    let input = step.input.clone();

    executor
        .step(step.step_kind, move || async move {
            hostctl_engine::dispatch_activity(activity_name, input, idempotency_key, Arc::new(NullHeartbeatSink))
                .await
                .map_err(anyhow::Error::from)
        })
        .await
        .map_err(WorkflowError::from)
}

/// Dispatches an `UpdateResourceStatus` step, phase-gating `table`/`id`
/// to `status`.
pub async fn set_status(
    executor: &mut WorkflowExecutor,
    step_kind: &'static str,
    table: &'static str,
    id: EntityId,
    status: ResourceStatus,
    message: Option<String>,
) -> Result<(), WorkflowError> {
    let input = serde_json::json!({ "table": table, "id": id, "status": status, "status_message": message });
    dispatch_step(
        executor,
        &ActivityStep { step_kind, activity_name: "UpdateResourceStatus", input },
    )
    .await?;
    Ok(())
}

/// Opens `incident` through the `CreateOrDedupeIncident`/
/// `InsertIncidentEvent` activities (the same two `CoreDb` operations
/// `hostctl-incidents::lifecycle::raise_incident` drives directly for
/// callers outside a workflow), so the open-and-log pair stays
/// replay-safe under this module's `executor.step` commit log. On a
/// genuine create, also publishes `DomainEvent::IncidentRaised`; a
/// dedupe onto an already-open incident raises nothing further.
pub async fn raise_incident(
    executor: &mut WorkflowExecutor,
    bus: &dyn EventBus,
    create_step_kind: &'static str,
    event_step_kind: &'static str,
    incident: &Incident,
) -> Result<EntityId, WorkflowError> {
    let output = dispatch_step(
        executor,
        &ActivityStep {
            step_kind: create_step_kind,
            activity_name: "CreateOrDedupeIncident",
            input: serde_json::json!({ "incident": incident }),
        },
    )
    .await?;

    let incident_id: EntityId = serde_json::from_value(output["incident_id"].clone())
        .map_err(|e| WorkflowError::Precondition(format!("malformed CreateOrDedupeIncident output: {e}")))?;
    let created = output["created"].as_bool().unwrap_or(false);

    if created {
        dispatch_step(
            executor,
            &ActivityStep {
                step_kind: event_step_kind,
                activity_name: "InsertIncidentEvent",
                input: serde_json::json!({ "event": hostctl_types::IncidentEvent {
                    id: EntityId::new(),
                    incident_id,
                    actor: "system".to_string(),
                    action: hostctl_types::IncidentAction::Created,
                    detail: incident.title.clone(),
                    metadata: serde_json::json!({}),
                    created_at: chrono::Utc::now(),
                } }),
            },
        )
        .await?;

        let _ = bus.publish(&DomainEvent::IncidentRaised { incident_id, severity: incident.severity });
    }

    Ok(incident_id)
}

/// Builds the `resource.provision_failed` incident a non-retryable
/// workflow failure raises (§7): one per `(table, resource_id)`, deduped
/// so repeated failed attempts against the same row don't pile up
/// separate incidents.
pub fn provision_failed_incident(table: &str, resource_id: EntityId, detail: &str) -> Incident {
    let now = chrono::Utc::now();
    Incident {
        id: EntityId::new(),
        dedupe_key: format!("resource.provision_failed:{table}:{}", resource_id.0),
        incident_type: "resource.provision_failed".to_string(),
        severity: hostctl_types::IncidentSeverity::Critical,
        status: hostctl_types::IncidentStatus::Open,
        title: format!("{table} {} failed to provision", resource_id.0),
        detail: detail.to_string(),
        resource_type: Some(table.to_string()),
        resource_id: Some(resource_id),
        assigned_to: None,
        resolution: None,
        detected_at: now,
        escalated_at: None,
        updated_at: now,
    }
}

/// Runs the canonical 5-step Create/Update shape (load context is the
/// caller's responsibility — it happens before this function is called,
/// since it's a plain read used to build `spec`, not a replay-sensitive
/// side effect): phase-gate to `provisioning`, run side effects in
/// order, trigger converge for touched shards, phase-gate to
/// `final_status`.
///
/// On a non-retryable activity failure, phase-gates the resource to
/// `Failed` with the error's message and returns `Ok(())` — the
/// workflow is done, just unsuccessfully. On a retryable failure,
/// propagates the error so the caller's retry loop re-runs the whole
/// function (replay makes the already-committed steps free).
pub async fn run_resource_workflow(
    executor: &mut WorkflowExecutor,
    spec: ResourceWorkflowSpec,
    bus: &dyn EventBus,
) -> Result<(), WorkflowError> {
    set_status(executor, "phase_provisioning", spec.table, spec.resource_id, ResourceStatus::Provisioning, None)
        .await?;

    for step in &spec.side_effects {
        if let Err(err) = dispatch_step(executor, step).await {
            if dispatch_retryable(&err) {
                return Err(err);
            }
            set_status(
                executor,
                "phase_failed",
                spec.table,
                spec.resource_id,
                ResourceStatus::Failed,
                Some(err.to_string()),
            )
            .await?;
            raise_incident(
                executor,
                bus,
                "raise_provision_failed_incident",
                "record_provision_failed_incident_event",
                &provision_failed_incident(spec.table, spec.resource_id, &err.to_string()),
            )
            .await?;
            return Ok(());
        }
    }

    for shard_id in &spec.converge_shards {
        let _ = bus.publish(&DomainEvent::ShardConvergeRequested { shard_id: *shard_id });
    }

    set_status(executor, "phase_final", spec.table, spec.resource_id, spec.final_status, None).await?;
    let _ = bus.publish(&DomainEvent::ResourceStatusChanged {
        kind: spec.table.to_string(),
        id: spec.resource_id,
        status: spec.final_status,
        status_message: None,
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostctl_bus_core::InMemoryBus;
    use hostctl_store_core::StorageBackend;
    use hostctl_store_memory::MemoryBackend;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn non_retryable_activity_failure_phase_gates_to_failed_without_propagating() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        hostctl_engine::register_activity(
            "TestAlwaysFails",
            Arc::new(|_input, _key, _hb| {
                CALLS.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Err(DispatchError::NonRetryable(anyhow::anyhow!("boom"))) })
            }),
        );
        hostctl_engine::register_activity(
            "TestUpdateStatusNoop",
            Arc::new(|input, _key, _hb| Box::pin(async move { Ok(input) })),
        );

        let store: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let mut executor = WorkflowExecutor::resume(store, "resource:test:1").await.unwrap();
        let bus = InMemoryBus::default();

        // Route UpdateResourceStatus calls through the noop so this test
        // doesn't need a real CoreDb.
        hostctl_engine::register_activity(
            "UpdateResourceStatus",
            Arc::new(|input, _key, _hb| Box::pin(async move { Ok(input) })),
        );
        hostctl_engine::register_activity(
            "CreateOrDedupeIncident",
            Arc::new(|_input, _key, _hb| {
                Box::pin(async move { Ok(serde_json::json!({ "incident_id": EntityId::new(), "created": true })) })
            }),
        );
        hostctl_engine::register_activity(
            "InsertIncidentEvent",
            Arc::new(|_input, _key, _hb| Box::pin(async move { Ok(Value::Null) })),
        );

        let spec = ResourceWorkflowSpec {
            table: "test_table",
            resource_id: EntityId::new(),
            side_effects: vec![ActivityStep {
                step_kind: "do_the_thing",
                activity_name: "TestAlwaysFails",
                input: Value::Null,
            }],
            converge_shards: vec![],
            final_status: ResourceStatus::Active,
        };

        let mut rx = bus.subscribe();
        let result = run_resource_workflow(&mut executor, spec, &bus).await;
        assert!(result.is_ok());
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);

        let raised = rx.try_recv().expect("a non-retryable failure should raise an incident");
        assert!(matches!(raised, DomainEvent::IncidentRaised { .. }));
    }
}
