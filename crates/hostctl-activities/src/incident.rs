//! CoreDb-backed incident lifecycle activities (§4.6): dedupe-on-create,
//! prefix-scoped auto-resolve, the agent claim gate, status transitions,
//! and timeline events. `hostctl-incidents` drives these through
//! [`crate::resource::dispatch_step`] the same way resource workflows
//! drive `UpdateResourceStatus`.

use std::sync::Arc;

use async_trait::async_trait;
use hostctl_store_postgres::CoreDb;
use hostctl_types::{EntityId, Incident, IncidentEvent, IncidentStatus};
use serde::{Deserialize, Serialize};

use crate::{Activity, ActivityError, Heartbeat};

/// Typed input for [`CreateOrDedupeIncident`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrDedupeIncidentInput {
    /// The incident to open.
    pub incident: Incident,
}

/// Typed output for [`CreateOrDedupeIncident`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrDedupeIncidentOutput {
    /// The id that's now open under this dedupe_key — the new incident's
    /// id, or an already-open one's.
    pub incident_id: EntityId,
    /// Whether this call actually inserted a new row.
    pub created: bool,
}

/// Opens an incident unless one with the same `dedupe_key` is already
/// non-terminal.
pub struct CreateOrDedupeIncident {
    core_db: Arc<CoreDb>,
}

impl CreateOrDedupeIncident {
    /// Build the activity.
    pub fn new(core_db: Arc<CoreDb>) -> Self {
        Self { core_db }
    }
}

#[async_trait]
impl Activity for CreateOrDedupeIncident {
    type Input = CreateOrDedupeIncidentInput;
    type Output = CreateOrDedupeIncidentOutput;

    fn name(&self) -> &'static str {
        "CreateOrDedupeIncident"
    }

    async fn run(
        &self,
        input: Self::Input,
        _idempotency_key: &str,
        _heartbeat: &mut Heartbeat,
    ) -> Result<Self::Output, ActivityError> {
        let (incident_id, created) = self
            .core_db
            .create_or_dedupe_incident(&input.incident)
            .await
            .map_err(|e| ActivityError::Retryable(e.into()))?;
        Ok(CreateOrDedupeIncidentOutput { incident_id, created })
    }
}

/// Typed input for [`AutoResolveIncidents`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoResolveIncidentsInput {
    /// Resource kind, e.g. `"nodes"`.
    pub resource_type: String,
    /// Resource id whose incidents should close.
    pub resource_id: EntityId,
    /// Incident-type prefix to match (delimiter-inclusive, e.g.
    /// `"replication."`).
    pub type_prefix: String,
    /// Resolution text recorded on every closed incident.
    pub resolution: String,
}

/// Closes every open incident matching `(resource_type, resource_id,
/// incident_type LIKE type_prefix%)` in one UPDATE, when the resource
/// transitions back to healthy.
pub struct AutoResolveIncidents {
    core_db: Arc<CoreDb>,
}

impl AutoResolveIncidents {
    /// Build the activity.
    pub fn new(core_db: Arc<CoreDb>) -> Self {
        Self { core_db }
    }
}

#[async_trait]
impl Activity for AutoResolveIncidents {
    type Input = AutoResolveIncidentsInput;
    type Output = Vec<EntityId>;

    fn name(&self) -> &'static str {
        "AutoResolveIncidents"
    }

    async fn run(
        &self,
        input: Self::Input,
        _idempotency_key: &str,
        _heartbeat: &mut Heartbeat,
    ) -> Result<Self::Output, ActivityError> {
        self.core_db
            .auto_resolve_by_resource_and_type_prefix(
                &input.resource_type,
                input.resource_id,
                &input.type_prefix,
                &input.resolution,
            )
            .await
            .map_err(|e| ActivityError::Retryable(e.into()))
    }
}

/// Typed input for [`SetIncidentStatus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetIncidentStatusInput {
    /// Incident to transition.
    pub incident_id: EntityId,
    /// New status.
    pub status: IncidentStatus,
    /// Resolution text, set when transitioning to `resolved`.
    pub resolution: Option<String>,
}

/// Transitions an incident's lifecycle status.
pub struct SetIncidentStatus {
    core_db: Arc<CoreDb>,
}

impl SetIncidentStatus {
    /// Build the activity.
    pub fn new(core_db: Arc<CoreDb>) -> Self {
        Self { core_db }
    }
}

#[async_trait]
impl Activity for SetIncidentStatus {
    type Input = SetIncidentStatusInput;
    type Output = ();

    fn name(&self) -> &'static str {
        "SetIncidentStatus"
    }

    async fn run(
        &self,
        input: Self::Input,
        _idempotency_key: &str,
        _heartbeat: &mut Heartbeat,
    ) -> Result<(), ActivityError> {
        self.core_db
            .set_incident_status(input.incident_id, input.status, input.resolution.as_deref())
            .await
            .map_err(|e| ActivityError::Retryable(e.into()))
    }
}

/// Typed input for [`InsertIncidentEvent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertIncidentEventInput {
    /// The event to append.
    pub event: IncidentEvent,
}

/// Appends one event to an incident's timeline.
pub struct InsertIncidentEvent {
    core_db: Arc<CoreDb>,
}

impl InsertIncidentEvent {
    /// Build the activity.
    pub fn new(core_db: Arc<CoreDb>) -> Self {
        Self { core_db }
    }
}

#[async_trait]
impl Activity for InsertIncidentEvent {
    type Input = InsertIncidentEventInput;
    type Output = ();

    fn name(&self) -> &'static str {
        "InsertIncidentEvent"
    }

    async fn run(
        &self,
        input: Self::Input,
        _idempotency_key: &str,
        _heartbeat: &mut Heartbeat,
    ) -> Result<(), ActivityError> {
        self.core_db.insert_incident_event(&input.event).await.map_err(|e| ActivityError::Retryable(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_or_dedupe_input_round_trips_through_json() {
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
            detected_at: chrono::Utc::now(),
            escalated_at: None,
            updated_at: chrono::Utc::now(),
        };
        let input = CreateOrDedupeIncidentInput { incident };
        let json = serde_json::to_value(&input).unwrap();
        let back: CreateOrDedupeIncidentInput = serde_json::from_value(json).unwrap();
        assert_eq!(back.incident.dedupe_key, "db:127/replication_broken");
    }
}
