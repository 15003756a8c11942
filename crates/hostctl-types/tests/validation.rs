use hostctl_types::{
    incident_workflow_id, converge_workflow_id, resource_workflow_id, EntityId, Fqdn, Incident,
    IncidentSeverity, IncidentStatus, Tenant, ResourceStatus, MAX_FQDN_LEN,
};
use chrono::Utc;

fn sample_tenant(uid: i64) -> Tenant {
    Tenant {
        id: EntityId::new(),
        brand_id: EntityId::new(),
        cluster_id: EntityId::new(),
        shard_id: None,
        uid,
        status: ResourceStatus::Pending,
        suspend_reason: None,
    }
}

#[test]
fn tenant_validation_rejects_negative_uid() {
    assert!(sample_tenant(1000).validate().is_ok());
    assert!(sample_tenant(-1).validate().is_err());
}

#[test]
fn fqdn_validation_boundary() {
    let mut f = Fqdn {
        id: EntityId::new(),
        fqdn: "a".repeat(MAX_FQDN_LEN),
        webroot_id: EntityId::new(),
        ssl_enabled: true,
        status: ResourceStatus::Pending,
    };
    assert!(f.validate().is_ok());

    f.fqdn.push('a');
    assert!(f.validate().is_err());

    f.fqdn = String::new();
    assert!(f.validate().is_err());
}

#[test]
fn incident_validation_rejects_oversized_fields() {
    let mut inc = Incident {
        id: EntityId::new(),
        dedupe_key: "k".into(),
        incident_type: "t".into(),
        severity: IncidentSeverity::Warning,
        status: IncidentStatus::Open,
        title: "ok".into(),
        detail: "ok".into(),
        resource_type: None,
        resource_id: None,
        assigned_to: None,
        resolution: None,
        detected_at: Utc::now(),
        escalated_at: None,
        updated_at: Utc::now(),
    };
    assert!(inc.validate().is_ok());

    inc.title = "x".repeat(hostctl_types::MAX_INCIDENT_TITLE_LEN + 1);
    assert!(inc.validate().is_err());
}

#[test]
fn incident_severity_orders_critical_above_info() {
    assert!(IncidentSeverity::Critical > IncidentSeverity::Warning);
    assert!(IncidentSeverity::Warning > IncidentSeverity::Info);
}

#[test]
fn workflow_id_naming_is_stable_across_kinds() {
    let id = EntityId::new();
    assert!(resource_workflow_id("tenant", id).starts_with("resource:tenant:"));
    assert!(converge_workflow_id(id).starts_with("converge:"));
    assert!(incident_workflow_id(id).starts_with("incident:"));
}
