//! Incident creation and auto-resolution (§4.6).
//!
//! These are plain `CoreDb`-driven helpers rather than workflow-executor
//! steps: both `create_or_dedupe_incident` and
//! `auto_resolve_by_resource_and_type_prefix` are themselves idempotent
//! at the SQL layer (dedupe_key / resource+type-prefix scoped), so a
//! fresh `EntityId`/timestamp generated on a retried call is harmless —
//! the same reasoning `hostctl-convergence`'s stale-incident trigger
//! already relies on.

use chrono::Utc;
use hostctl_bus_core::{DomainEvent, EventBus};
use hostctl_store_postgres::CoreDb;
use hostctl_types::{EntityId, Incident, IncidentAction, IncidentEvent, IncidentStatus};
use serde_json::json;

use crate::IncidentError;

/// Opens `incident` unless one with the same `dedupe_key` is already
/// non-terminal, in which case its id is returned and no event is
/// recorded. On a genuine create, appends a `created` event and
/// publishes [`DomainEvent::IncidentRaised`].
pub async fn raise_incident(
    core_db: &CoreDb,
    bus: &dyn EventBus,
    incident: &Incident,
) -> Result<EntityId, IncidentError> {
    let (incident_id, created) =
        core_db.create_or_dedupe_incident(incident).await.map_err(|e| IncidentError::Store(e.into()))?;

    if created {
        core_db
            .insert_incident_event(&IncidentEvent {
                id: EntityId::new(),
                incident_id,
                actor: "system".to_string(),
                action: IncidentAction::Created,
                detail: incident.title.clone(),
                metadata: json!({}),
                created_at: Utc::now(),
            })
            .await
            .map_err(|e| IncidentError::Store(e.into()))?;

        let _ = bus.publish(&DomainEvent::IncidentRaised { incident_id, severity: incident.severity });
    }

    Ok(incident_id)
}

/// Closes every open incident matching `(resource_type, resource_id,
/// incident_type LIKE type_prefix%)`, appending a `resolved` event and
/// publishing [`DomainEvent::IncidentStatusChanged`] per id closed.
pub async fn auto_resolve(
    core_db: &CoreDb,
    bus: &dyn EventBus,
    resource_type: &str,
    resource_id: EntityId,
    type_prefix: &str,
    resolution: &str,
) -> Result<Vec<EntityId>, IncidentError> {
    let resolved_ids = core_db
        .auto_resolve_by_resource_and_type_prefix(resource_type, resource_id, type_prefix, resolution)
        .await
        .map_err(|e| IncidentError::Store(e.into()))?;

    for incident_id in &resolved_ids {
        core_db
            .insert_incident_event(&IncidentEvent {
                id: EntityId::new(),
                incident_id: *incident_id,
                actor: "system".to_string(),
                action: IncidentAction::Resolved,
                detail: resolution.to_string(),
                metadata: json!({}),
                created_at: Utc::now(),
            })
            .await
            .map_err(|e| IncidentError::Store(e.into()))?;

        let _ = bus.publish(&DomainEvent::IncidentStatusChanged { incident_id: *incident_id, status: IncidentStatus::Resolved });
    }

    Ok(resolved_ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incident_struct_carries_the_dedupe_key_callers_key_off() {
        let incident = Incident {
            id: EntityId::new(),
            dedupe_key: "db:127/replication_broken".to_string(),
            incident_type: "replication.broken".to_string(),
            severity: hostctl_types::IncidentSeverity::Critical,
            status: IncidentStatus::Open,
            title: "replication broken".to_string(),
            detail: "lag exceeded threshold".to_string(),
            resource_type: Some("nodes".to_string()),
            resource_id: Some(EntityId::new()),
            assigned_to: None,
            resolution: None,
            detected_at: Utc::now(),
            escalated_at: None,
            updated_at: Utc::now(),
        };
        assert_eq!(incident.dedupe_key, "db:127/replication_broken");
    }
}
