//! Periodic passes (§4.7: `cron:<name>` workflow-id namespace): incident
//! escalation, certificate renewal, backup retention, and the unhealthy-
//! node scan. Each is an ordinary interval loop that submits a task to
//! the shared [`WorkerPool`] — the pool's retry/circuit-breaker policy is
//! what makes a single slow tick harmless, not anything special here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hostctl_bus_core::{EventBus, InMemoryBus};
use hostctl_engine::worker::{TaskDefinition, WorkerPool};
use hostctl_incidents::lifecycle::raise_incident;
use hostctl_store_postgres::CoreDb;
use hostctl_types::{EntityId, Incident, IncidentSeverity, IncidentStatus};
use hostctl_workflows::certificate::certificates_due_for_renewal;
use serde_json::json;
use tracing::{info, warn};

/// Spawn the escalation-sweep tick loop.
pub fn spawn_escalation_tick(pool: Arc<WorkerPool>, interval: Duration) {
    static TICK: AtomicU64 = AtomicU64::new(0);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let tick = TICK.fetch_add(1, Ordering::SeqCst);
            let _ = pool.submit(TaskDefinition {
                activity_name: "RunEscalationPass".to_string(),
                input: json!({ "tick": tick }),
                idempotency_key: format!("cron:incident-escalation:{tick}"),
                queue: "core".to_string(),
                workflow_id: format!("cron:incident-escalation:{tick}"),
            });
        }
    });
}

/// Spawn the investigation queue-processor poll loop: claims unassigned
/// open incidents and submits one `RunInvestigateIncident` task per
/// claim, letting the per-type concurrency gate in
/// [`hostctl_incidents::queue::QueueProcessor`] throttle how many run at
/// once.
pub fn spawn_investigation_poll(core_db: Arc<CoreDb>, pool: Arc<WorkerPool>, interval: Duration, agent_id: String) {
    use hostctl_incidents::queue::QueueProcessor;

    tokio::spawn(async move {
        let processor = Arc::new(QueueProcessor::new(core_db));
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let claimed = match processor.claim_batch(&agent_id).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    warn!(error = %e, "failed to claim queued incidents");
                    continue;
                }
            };

            for incident in claimed {
                let processor = processor.clone();
                let pool = pool.clone();
                tokio::spawn(async move {
                    let _permit = processor.acquire_slot(&incident.incident_type).await;
                    let _ = pool.submit(TaskDefinition {
                        activity_name: "RunInvestigateIncident".to_string(),
                        input: json!({ "incident_id": incident.id }),
                        idempotency_key: format!("incident:{}", incident.id.0),
                        queue: format!("incident:{}", incident.id.0),
                        workflow_id: format!("incident:{}", incident.id.0),
                    });
                });
            }
        }
    });
}

/// Spawn the daily certificate-renewal scan: finds certs expiring within
/// 30 days and submits one `RunCertificateWorkflow` per cert.
pub fn spawn_certificate_renewal_tick(core_db: Arc<CoreDb>, pool: Arc<WorkerPool>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let due = match certificates_due_for_renewal(&core_db, Utc::now()).await {
                Ok(due) => due,
                Err(e) => {
                    warn!(error = %e, "certificate renewal scan failed");
                    continue;
                }
            };
            info!(count = due.len(), "certificates due for renewal");
            for cert in due {
                let _ = pool.submit(TaskDefinition {
                    activity_name: "RunCertificateWorkflow".to_string(),
                    input: json!({ "fqdn_id": cert.fqdn_id, "certificate_id": cert.id }),
                    idempotency_key: format!("resource:certificate:{}", cert.id.0),
                    queue: "core".to_string(),
                    workflow_id: format!("resource:certificate:{}", cert.id.0),
                });
            }
        }
    });
}

/// Spawn the daily backup-retention sweep: deletes backup rows older
/// than `retention`.
pub fn spawn_backup_retention_tick(core_db: Arc<CoreDb>, interval: Duration, retention: chrono::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match core_db.delete_backups_older_than(Utc::now() - retention).await {
                Ok(removed) => info!(removed, "backup retention sweep complete"),
                Err(e) => warn!(error = %e, "backup retention sweep failed"),
            }
        }
    });
}

/// Spawn the unhealthy-node scan: nodes with no health check since
/// `stale_after` get a `node.unhealthy` incident raised against them,
/// deduplicated the same way every other incident source is.
pub fn spawn_unhealthy_node_scan_tick(core_db: Arc<CoreDb>, bus: Arc<InMemoryBus>, interval: Duration, stale_after: chrono::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let stale = match core_db.stale_nodes(Utc::now() - stale_after).await {
                Ok(nodes) => nodes,
                Err(e) => {
                    warn!(error = %e, "unhealthy node scan failed");
                    continue;
                }
            };

            for node in stale {
                let incident = Incident {
                    id: EntityId::new(),
                    dedupe_key: format!("node:{}/unhealthy", node.id.0),
                    incident_type: "node.unhealthy".to_string(),
                    severity: IncidentSeverity::Warning,
                    status: IncidentStatus::Open,
                    title: format!("node {} missed its health check window", node.hostname),
                    detail: format!(
                        "last_health_at={:?}, stale_after={}s",
                        node.last_health_at,
                        stale_after.num_seconds()
                    ),
                    resource_type: Some("nodes".to_string()),
                    resource_id: Some(node.id),
                    assigned_to: None,
                    resolution: None,
                    detected_at: Utc::now(),
                    escalated_at: None,
                    updated_at: Utc::now(),
                };

                if let Err(e) = raise_incident(&core_db, bus.as_ref(), &incident).await {
                    warn!(error = %e, node_id = %node.id.0, "failed to raise unhealthy-node incident");
                }
            }
        }
    });
}
