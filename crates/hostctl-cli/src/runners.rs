//! Adapts each top-level workflow (resource lifecycle, shard converge,
//! incident escalation/investigation) into an engine activity so the
//! [`hostctl_engine::worker::WorkerPool`] can dispatch, retry, and
//! circuit-break whole workflow runs the same way it does individual
//! activities (§4.7's task-queue model covers both).
//!
//! Each closure resumes its own [`WorkflowExecutor`] against a
//! workflow id derived from its input, since [`hostctl_engine::worker::
//! TaskDefinition::workflow_id`] is carried for logging only and isn't
//! threaded into the dispatched activity.

use std::sync::Arc;

use hostctl_bus_core::{DomainEvent, EventBus, InMemoryBus};
use hostctl_types::{EntityId, Incident, IncidentSeverity, IncidentStatus};
use hostctl_convergence::dns_retro::RetroactiveAutoRecords;
use hostctl_convergence::lb_shard::LbShardConverge;
use hostctl_convergence::web_shard::{EnvVarCodec, WebShardConverge};
use hostctl_engine::{DispatchError, WorkerPool, WorkflowExecutor};
use hostctl_incidents::escalation::EscalationPass;
use hostctl_incidents::investigate::InvestigateIncident;
use hostctl_store_core::StorageBackend;
use hostctl_store_postgres::CoreDb;
use hostctl_workflows::certificate::CertificateWorkflow;
use hostctl_workflows::webroot::{CreateWebroot, DeleteWebroot};
use serde_json::{json, Value};

use crate::tools::tool_catalog;

fn entity_id(input: &Value, key: &str) -> Result<EntityId, DispatchError> {
    let raw = input
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| DispatchError::NonRetryable(anyhow::anyhow!("missing {key}")))?;
    raw.parse::<uuid::Uuid>()
        .map(EntityId)
        .map_err(|e| DispatchError::NonRetryable(anyhow::anyhow!("{key} is not a uuid: {e}")))
}

/// Register every top-level workflow as a named activity, ready for
/// [`WorkerPool::submit`].
pub fn register_runners(store: Arc<dyn StorageBackend>, core_db: Arc<CoreDb>, bus: Arc<InMemoryBus>, env_codec: Arc<dyn EnvVarCodec>, lb_map_files: Arc<hostctl_activities::lb::LbMapFiles>, webhook_url: String) {
    {
        let store = store.clone();
        let core_db = core_db.clone();
        let bus = bus.clone();
        hostctl_engine::register_activity(
            "RunCreateWebroot",
            Arc::new(move |input, _key, _hb| {
                let store = store.clone();
                let core_db = core_db.clone();
                let bus = bus.clone();
                Box::pin(async move {
                    let webroot_id = entity_id(&input, "webroot_id")?;
                    let mut executor = WorkflowExecutor::resume(store, format!("resource:webroot:{}", webroot_id.0))
                        .await
                        .map_err(|e| DispatchError::Retryable(e.into()))?;
                    CreateWebroot::new(core_db)
                        .run(&mut executor, webroot_id, bus.as_ref())
                        .await
                        .map_err(|e| DispatchError::Retryable(e.into()))?;
                    Ok(Value::Null)
                })
            }),
        );
    }

    {
        let store = store.clone();
        let core_db = core_db.clone();
        hostctl_engine::register_activity(
            "RunDeleteWebroot",
            Arc::new(move |input, _key, _hb| {
                let store = store.clone();
                let core_db = core_db.clone();
                Box::pin(async move {
                    let webroot_id = entity_id(&input, "webroot_id")?;
                    let mut executor = WorkflowExecutor::resume(store, format!("resource:webroot:{}", webroot_id.0))
                        .await
                        .map_err(|e| DispatchError::Retryable(e.into()))?;
                    DeleteWebroot::new(core_db)
                        .run(&mut executor, webroot_id)
                        .await
                        .map_err(|e| DispatchError::Retryable(e.into()))?;
                    Ok(Value::Null)
                })
            }),
        );
    }

    {
        let store = store.clone();
        let core_db = core_db.clone();
        let bus = bus.clone();
        hostctl_engine::register_activity(
            "RunCertificateWorkflow",
            Arc::new(move |input, _key, _hb| {
                let store = store.clone();
                let core_db = core_db.clone();
                let bus = bus.clone();
                Box::pin(async move {
                    let fqdn_id = entity_id(&input, "fqdn_id")?;
                    let certificate_id = entity_id(&input, "certificate_id")?;
                    let mut executor = WorkflowExecutor::resume(store, format!("resource:certificate:{}", certificate_id.0))
                        .await
                        .map_err(|e| DispatchError::Retryable(e.into()))?;
                    CertificateWorkflow::new(core_db)
                        .run(&mut executor, fqdn_id, certificate_id, bus.as_ref())
                        .await
                        .map_err(|e| DispatchError::Retryable(e.into()))?;
                    Ok(Value::Null)
                })
            }),
        );
    }

    {
        let store = store.clone();
        let core_db = core_db.clone();
        let bus = bus.clone();
        let env_codec = env_codec.clone();
        hostctl_engine::register_activity(
            "RunWebShardConverge",
            Arc::new(move |input, _key, _hb| {
                let store = store.clone();
                let core_db = core_db.clone();
                let bus = bus.clone();
                let env_codec = env_codec.clone();
                Box::pin(async move {
                    let shard_id = entity_id(&input, "shard_id")?;
                    let mut executor = WorkflowExecutor::resume(store, format!("converge:{}:web", shard_id.0))
                        .await
                        .map_err(|e| DispatchError::Retryable(e.into()))?;
                    let success = WebShardConverge::new(core_db, env_codec).run(&mut executor, shard_id, bus.as_ref()).await.is_ok();
                    let _ = bus.publish(&DomainEvent::ShardConvergeCompleted { shard_id, success });
                    if !success {
                        return Err(DispatchError::Retryable(anyhow::anyhow!("web shard converge failed")));
                    }
                    Ok(Value::Null)
                })
            }),
        );
    }

    {
        let store = store.clone();
        let core_db = core_db.clone();
        let bus = bus.clone();
        hostctl_engine::register_activity(
            "RunLbShardConverge",
            Arc::new(move |input, _key, _hb| {
                let store = store.clone();
                let core_db = core_db.clone();
                let bus = bus.clone();
                let lb_map_files = lb_map_files.clone();
                Box::pin(async move {
                    let shard_id = entity_id(&input, "shard_id")?;
                    let mut executor = WorkflowExecutor::resume(store, format!("converge:{}:lb", shard_id.0))
                        .await
                        .map_err(|e| DispatchError::Retryable(e.into()))?;
                    let success = LbShardConverge::new(core_db, lb_map_files).run(&mut executor, shard_id).await.is_ok();
                    let _ = bus.publish(&DomainEvent::ShardConvergeCompleted { shard_id, success });
                    if !success {
                        return Err(DispatchError::Retryable(anyhow::anyhow!("lb shard converge failed")));
                    }
                    Ok(Value::Null)
                })
            }),
        );
    }

    {
        let store = store.clone();
        let core_db = core_db.clone();
        hostctl_engine::register_activity(
            "RunRetroactiveAutoRecords",
            Arc::new(move |input, _key, _hb| {
                let store = store.clone();
                let core_db = core_db.clone();
                Box::pin(async move {
                    let zone_id = entity_id(&input, "zone_id")?;
                    let mut executor = WorkflowExecutor::resume(store, format!("converge:zone:{}", zone_id.0))
                        .await
                        .map_err(|e| DispatchError::Retryable(e.into()))?;
                    RetroactiveAutoRecords::new(core_db)
                        .run(&mut executor, zone_id)
                        .await
                        .map_err(|e| DispatchError::Retryable(e.into()))?;
                    Ok(Value::Null)
                })
            }),
        );
    }

    {
        let store = store.clone();
        let core_db = core_db.clone();
        hostctl_engine::register_activity(
            "RunEscalationPass",
            Arc::new(move |input, _key, _hb| {
                let store = store.clone();
                let core_db = core_db.clone();
                let webhook_url = webhook_url.clone();
                Box::pin(async move {
                    let tick = input.get("tick").and_then(|v| v.as_u64()).unwrap_or(0);
                    let mut executor = WorkflowExecutor::resume(store, format!("cron:incident-escalation:{tick}"))
                        .await
                        .map_err(|e| DispatchError::Retryable(e.into()))?;
                    let report = EscalationPass::new(core_db, webhook_url)
                        .run(&mut executor)
                        .await
                        .map_err(|e| DispatchError::Retryable(e.into()))?;
                    Ok(json!({ "escalated": report.escalated }))
                })
            }),
        );
    }

    {
        let store = store.clone();
        let core_db = core_db.clone();
        let bus = bus.clone();
        hostctl_engine::register_activity(
            "RunInvestigateIncident",
            Arc::new(move |input, _key, _hb| {
                let store = store.clone();
                let core_db = core_db.clone();
                let bus = bus.clone();
                Box::pin(async move {
                    let incident_id = entity_id(&input, "incident_id")?;
                    let mut executor = WorkflowExecutor::resume(store, format!("incident:{}", incident_id.0))
                        .await
                        .map_err(|e| DispatchError::Retryable(e.into()))?;
                    let catalog = tool_catalog();
                    InvestigateIncident::new(core_db)
                        .run(&mut executor, incident_id, &catalog, bus.as_ref())
                        .await
                        .map_err(|e| DispatchError::Retryable(e.into()))?;
                    Ok(Value::Null)
                })
            }),
        );
    }

    {
        let store = store.clone();
        let core_db = core_db.clone();
        let bus = bus.clone();
        hostctl_engine::register_activity(
            "RunGenericResourceWorkflow",
            Arc::new(move |input, _key, _hb| {
                let store = store.clone();
                let core_db = core_db.clone();
                let bus = bus.clone();
                Box::pin(async move {
                    let resource_id = entity_id(&input, "resource_id")?;
                    let kind_raw = input
                        .get("kind")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| DispatchError::NonRetryable(anyhow::anyhow!("missing kind")))?;
                    let kind = hostctl_workflows::kinds::GenericResourceKind::parse(kind_raw)
                        .ok_or_else(|| DispatchError::NonRetryable(anyhow::anyhow!("unknown resource kind {kind_raw}")))?;
                    let action = match input.get("action").and_then(|v| v.as_str()).unwrap_or("create") {
                        "create" => hostctl_workflows::kinds::ResourceAction::Create,
                        "update" => hostctl_workflows::kinds::ResourceAction::Update,
                        "delete" => hostctl_workflows::kinds::ResourceAction::Delete,
                        other => return Err(DispatchError::NonRetryable(anyhow::anyhow!("unknown resource action {other}"))),
                    };

                    let mut executor = WorkflowExecutor::resume(store, format!("resource:{}:{}", kind.tag(), resource_id.0))
                        .await
                        .map_err(|e| DispatchError::Retryable(e.into()))?;
                    let spec = hostctl_workflows::kinds::build_spec(&core_db, kind, action, resource_id)
                        .await
                        .map_err(|e| DispatchError::Retryable(e.into()))?;
                    hostctl_workflows::resource::run_resource_workflow(&mut executor, spec, bus.as_ref())
                        .await
                        .map_err(|e| DispatchError::Retryable(e.into()))?;
                    Ok(Value::Null)
                })
            }),
        );
    }

    {
        let store = store.clone();
        let core_db = core_db.clone();
        hostctl_engine::register_activity(
            "RunZoneCreate",
            Arc::new(move |input, _key, _hb| {
                let store = store.clone();
                let core_db = core_db.clone();
                Box::pin(async move {
                    let zone_id = entity_id(&input, "zone_id")?;
                    let mut executor = WorkflowExecutor::resume(store, format!("resource:zone:{}", zone_id.0))
                        .await
                        .map_err(|e| DispatchError::Retryable(e.into()))?;
                    hostctl_workflows::kinds::run_zone_create_workflow(&mut executor, &core_db, zone_id)
                        .await
                        .map_err(|e| DispatchError::Retryable(e.into()))?;
                    Ok(Value::Null)
                })
            }),
        );
    }
}

/// Subscribes to the bus and submits a converge task per shard whenever
/// a resource workflow requests one — the bridge between "something
/// changed" (published inline by `run_resource_workflow`) and "a
/// workflow reacted" (dispatched through the worker pool's retry/
/// circuit-breaker policy) that keeps shard state eventually consistent.
pub fn spawn_converge_bridge(bus: Arc<InMemoryBus>, pool: Arc<WorkerPool>) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(DomainEvent::ShardConvergeRequested { shard_id }) => {
                    for (activity_name, suffix) in [("RunWebShardConverge", "web"), ("RunLbShardConverge", "lb")] {
                        let _ = pool.submit(hostctl_engine::worker::TaskDefinition {
                            activity_name: activity_name.to_string(),
                            input: json!({ "shard_id": shard_id.0 }),
                            idempotency_key: format!("converge:{}:{suffix}", shard_id.0),
                            queue: format!("shard:{}", shard_id.0),
                            workflow_id: format!("converge:{}:{suffix}", shard_id.0),
                        });
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "converge bridge lagged behind the domain event bus");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Subscribes to the bus and raises a `workflow.task_abandoned` incident
/// whenever the worker pool drops a task (circuit open, retries
/// exhausted, or non-retryable error) — the task-queue equivalent of the
/// resource-workflow incident-raising path, for failures the activity
/// layer itself never got a chance to phase-gate a resource for.
pub fn spawn_task_abandonment_bridge(bus: Arc<InMemoryBus>, core_db: Arc<CoreDb>) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(DomainEvent::TaskAbandoned { workflow_id, activity_name, queue, error }) => {
                    let now = chrono::Utc::now();
                    let incident = Incident {
                        id: EntityId::new(),
                        dedupe_key: format!("workflow.task_abandoned:{workflow_id}:{activity_name}"),
                        incident_type: "workflow.task_abandoned".to_string(),
                        severity: IncidentSeverity::Critical,
                        status: IncidentStatus::Open,
                        title: format!("{activity_name} abandoned on queue {queue}"),
                        detail: format!("workflow {workflow_id} dropped task {activity_name}: {error}"),
                        resource_type: None,
                        resource_id: None,
                        assigned_to: None,
                        resolution: None,
                        detected_at: now,
                        escalated_at: None,
                        updated_at: now,
                    };
                    if let Err(e) = hostctl_incidents::lifecycle::raise_incident(&core_db, bus.as_ref(), &incident).await {
                        tracing::warn!(error = %e, "failed to raise task_abandoned incident");
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "task-abandonment bridge lagged behind the domain event bus");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
