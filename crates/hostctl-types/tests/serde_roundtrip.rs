use hostctl_types::{EntityId, Incident, IncidentSeverity, IncidentStatus, ResourceStatus, ShardRole};
use chrono::Utc;

#[test]
fn incident_round_trips_through_json() {
    let original = Incident {
        id: EntityId::new(),
        dedupe_key: "db:127/replication_broken".into(),
        incident_type: "replication.lag".into(),
        severity: IncidentSeverity::Critical,
        status: IncidentStatus::Open,
        title: "replication broken".into(),
        detail: "connection refused".into(),
        resource_type: Some("database".into()),
        resource_id: Some(EntityId::new()),
        assigned_to: None,
        resolution: None,
        detected_at: Utc::now(),
        escalated_at: None,
        updated_at: Utc::now(),
    };

    let json = serde_json::to_string(&original).expect("serialization failed");
    let decoded: Incident = serde_json::from_str(&json).expect("deserialization failed");

    assert_eq!(original, decoded);
}

#[test]
fn shard_role_strings_match_core_db_enum() {
    assert_eq!(ShardRole::Web.as_str(), "web");
    assert_eq!(ShardRole::Lb.as_str(), "lb");
}

#[test]
fn resource_status_enum_round_trips() {
    for status in [
        ResourceStatus::Pending,
        ResourceStatus::Provisioning,
        ResourceStatus::Active,
        ResourceStatus::Suspended,
        ResourceStatus::Updating,
        ResourceStatus::Deleting,
        ResourceStatus::Deleted,
        ResourceStatus::Failed,
    ] {
        let json = serde_json::to_string(&status).unwrap();
        let back: ResourceStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }
}
