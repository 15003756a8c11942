//! Per-kind spec builders for [`crate::resource::run_resource_workflow`]
//! (§4.2's canonical Create/Update/Delete shape), one per resource kind
//! that doesn't need webroot/certificate's bespoke orchestration: tenant,
//! FQDN, database, database user, valkey instance/user, S3 bucket/key,
//! cron job, daemon, SSH key, zone record, email account/alias/forward/
//! autoreply, backup.
//!
//! Each builder loads the resource's row (a plain read done before the
//! workflow starts, not a replay-sensitive step — the same convention
//! [`crate::webroot::CreateWebroot`] uses) and, from it, the nodes or
//! external system the resource's side effects touch.
//! [`crate::resource::run_resource_workflow`] then drives the phase-
//! gating and incident-raising policy identically for every kind.
//!
//! DNS zones are the one exception: the `zones` table carries no
//! `status` column, so [`run_zone_create_workflow`] drives zone creation
//! directly rather than through the generic phase-gated driver.

use hostctl_engine::WorkflowExecutor;
use hostctl_store_postgres::CoreDb;
use hostctl_types::{EntityId, ResourceStatus};
use serde_json::json;

use crate::resource::{dispatch_step, ActivityStep, ResourceWorkflowSpec};
use crate::WorkflowError;

/// Which action a generic resource workflow is running. Determines the
/// node-agent RPC method prefix and the driver's final status; `Update`
/// re-dispatches the same idempotent-upsert call `Create` does; these
/// node-agent RPCs are defined to converge a node to the row's current
/// shape rather than diff against the row's previous shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceAction {
    /// Provision the resource.
    Create,
    /// Re-apply the resource row's current shape.
    Update,
    /// Tear the resource down.
    Delete,
}

impl ResourceAction {
    fn node_method(self, verb: &str) -> String {
        match self {
            ResourceAction::Create | ResourceAction::Update => format!("create_{verb}"),
            ResourceAction::Delete => format!("delete_{verb}"),
        }
    }

    fn alias_mail_verb(self) -> &'static str {
        if self == ResourceAction::Delete {
            "remove_alias"
        } else {
            "add_alias"
        }
    }

    /// The phase-gated status a successful run ends on.
    pub fn final_status(self) -> ResourceStatus {
        match self {
            ResourceAction::Create | ResourceAction::Update => ResourceStatus::Active,
            ResourceAction::Delete => ResourceStatus::Deleted,
        }
    }
}

/// One generic resource kind, parsed from the runner input's `kind`
/// field. DNS zones aren't included — see [`run_zone_create_workflow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenericResourceKind {
    /// `tenants`.
    Tenant,
    /// `fqdns`.
    Fqdn,
    /// `databases`.
    Database,
    /// `database_users`.
    DatabaseUser,
    /// `valkey_instances`.
    ValkeyInstance,
    /// `valkey_users`.
    ValkeyUser,
    /// `s3_buckets`.
    S3Bucket,
    /// `s3_keys`.
    S3Key,
    /// `cron_jobs`.
    CronJob,
    /// `daemons`.
    Daemon,
    /// `ssh_keys`.
    SshKey,
    /// `zone_records`.
    ZoneRecord,
    /// `email_accounts`.
    EmailAccount,
    /// `email_aliases`.
    EmailAlias,
    /// `email_forwards`.
    EmailForward,
    /// `email_autoreplies`.
    EmailAutoreply,
    /// `backups`.
    Backup,
}

impl GenericResourceKind {
    /// Parse a kind tag, e.g. from a task's JSON input.
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "tenant" => Self::Tenant,
            "fqdn" => Self::Fqdn,
            "database" => Self::Database,
            "database_user" => Self::DatabaseUser,
            "valkey_instance" => Self::ValkeyInstance,
            "valkey_user" => Self::ValkeyUser,
            "s3_bucket" => Self::S3Bucket,
            "s3_key" => Self::S3Key,
            "cron_job" => Self::CronJob,
            "daemon" => Self::Daemon,
            "ssh_key" => Self::SshKey,
            "zone_record" => Self::ZoneRecord,
            "email_account" => Self::EmailAccount,
            "email_alias" => Self::EmailAlias,
            "email_forward" => Self::EmailForward,
            "email_autoreply" => Self::EmailAutoreply,
            "backup" => Self::Backup,
            _ => return None,
        })
    }

    /// The kind's tag, the inverse of [`Self::parse`].
    pub fn tag(self) -> &'static str {
        match self {
            Self::Tenant => "tenant",
            Self::Fqdn => "fqdn",
            Self::Database => "database",
            Self::DatabaseUser => "database_user",
            Self::ValkeyInstance => "valkey_instance",
            Self::ValkeyUser => "valkey_user",
            Self::S3Bucket => "s3_bucket",
            Self::S3Key => "s3_key",
            Self::CronJob => "cron_job",
            Self::Daemon => "daemon",
            Self::SshKey => "ssh_key",
            Self::ZoneRecord => "zone_record",
            Self::EmailAccount => "email_account",
            Self::EmailAlias => "email_alias",
            Self::EmailForward => "email_forward",
            Self::EmailAutoreply => "email_autoreply",
            Self::Backup => "backup",
        }
    }
}

/// Builds the [`ResourceWorkflowSpec`] for `kind`'s `action` against
/// `resource_id`.
pub async fn build_spec(
    core_db: &CoreDb,
    kind: GenericResourceKind,
    action: ResourceAction,
    resource_id: EntityId,
) -> Result<ResourceWorkflowSpec, WorkflowError> {
    match kind {
        GenericResourceKind::Tenant => build_tenant_spec(core_db, action, resource_id).await,
        GenericResourceKind::Fqdn => build_fqdn_spec(core_db, action, resource_id).await,
        GenericResourceKind::Database => build_database_spec(core_db, action, resource_id).await,
        GenericResourceKind::DatabaseUser => build_database_user_spec(core_db, action, resource_id).await,
        GenericResourceKind::ValkeyInstance => build_valkey_instance_spec(core_db, action, resource_id).await,
        GenericResourceKind::ValkeyUser => build_valkey_user_spec(core_db, action, resource_id).await,
        GenericResourceKind::S3Bucket => build_s3_bucket_spec(core_db, action, resource_id).await,
        GenericResourceKind::S3Key => build_s3_key_spec(core_db, action, resource_id).await,
        GenericResourceKind::CronJob => build_cron_job_spec(core_db, action, resource_id).await,
        GenericResourceKind::Daemon => build_daemon_spec(core_db, action, resource_id).await,
        GenericResourceKind::SshKey => build_ssh_key_spec(core_db, action, resource_id).await,
        GenericResourceKind::ZoneRecord => build_zone_record_spec(core_db, action, resource_id).await,
        GenericResourceKind::EmailAccount => build_email_account_spec(core_db, action, resource_id).await,
        GenericResourceKind::EmailAlias => build_email_alias_spec(core_db, action, resource_id).await,
        GenericResourceKind::EmailForward => build_email_forward_spec(core_db, action, resource_id).await,
        GenericResourceKind::EmailAutoreply => build_email_autoreply_spec(core_db, action, resource_id).await,
        GenericResourceKind::Backup => build_backup_spec(core_db, action, resource_id).await,
    }
}

/// One `NodeAgentCall` step per node in `shard_id`, all tagged with the
/// same `step_kind` — matching [`crate::webroot::CreateWebroot`]'s own
/// per-node fan-out, since [`WorkflowExecutor::step`] replays by cursor
/// position rather than by label.
async fn node_steps(
    core_db: &CoreDb,
    shard_id: EntityId,
    step_kind: &'static str,
    method: String,
    params: serde_json::Value,
) -> Result<Vec<ActivityStep>, WorkflowError> {
    let nodes = core_db.nodes_for_shard(shard_id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    Ok(nodes
        .into_iter()
        .map(|node| ActivityStep {
            step_kind,
            activity_name: "NodeAgentCall",
            input: json!({ "node_id": node.id, "method": method, "params": params }),
        })
        .collect())
}

async fn web_shard_for_webroot(core_db: &CoreDb, webroot_id: EntityId) -> Result<EntityId, WorkflowError> {
    let webroot = core_db.get_webroot(webroot_id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    let tenant = core_db.get_tenant(webroot.tenant_id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    tenant.shard_id.ok_or_else(|| WorkflowError::Precondition(format!("tenant {} has no web shard", tenant.id.0)))
}

async fn account_email(core_db: &CoreDb, account_id: EntityId) -> Result<String, WorkflowError> {
    let account = core_db.get_email_account(account_id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    Ok(format!("{}@{}", account.local_part, account.domain))
}

async fn build_tenant_spec(
    core_db: &CoreDb,
    action: ResourceAction,
    tenant_id: EntityId,
) -> Result<ResourceWorkflowSpec, WorkflowError> {
    let tenant = core_db.get_tenant(tenant_id).await.map_err(|e| WorkflowError::Store(e.into()))?;

    // A tenant has no node footprint until its first web-bound resource
    // assigns it a shard, so only delete has anything to tear down.
    let side_effects = match (action, tenant.shard_id) {
        (ResourceAction::Delete, Some(shard_id)) => {
            node_steps(core_db, shard_id, "tenant_on_node", action.node_method("tenant"), json!({ "tenant_id": tenant_id, "uid": tenant.uid })).await?
        }
        _ => Vec::new(),
    };

    Ok(ResourceWorkflowSpec { table: "tenants", resource_id: tenant_id, side_effects, converge_shards: Vec::new(), final_status: action.final_status() })
}

async fn build_fqdn_spec(
    core_db: &CoreDb,
    action: ResourceAction,
    fqdn_id: EntityId,
) -> Result<ResourceWorkflowSpec, WorkflowError> {
    let fqdn = core_db.get_fqdn(fqdn_id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    let webroot = core_db.get_webroot(fqdn.webroot_id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    let tenant = core_db.get_tenant(webroot.tenant_id).await.map_err(|e| WorkflowError::Store(e.into()))?;

    let mut side_effects = Vec::new();
    let mut converge_shards = Vec::new();

    if let Some(shard_id) = tenant.shard_id {
        let shard = core_db.get_shard(shard_id).await.map_err(|e| WorkflowError::Store(e.into()))?;
        let lb_backend = if action == ResourceAction::Delete { String::new() } else { shard.lb_backend.clone().unwrap_or_default() };
        side_effects.push(ActivityStep {
            step_kind: "set_fqdn_lb_map_entry",
            activity_name: "SetLBMapEntry",
            input: json!({ "cluster_id": tenant.cluster_id, "fqdn": fqdn.fqdn, "lb_backend": lb_backend }),
        });
        if action != ResourceAction::Delete && fqdn.ssl_enabled {
            converge_shards.push(shard_id);
        }
    }

    Ok(ResourceWorkflowSpec { table: "fqdns", resource_id: fqdn_id, side_effects, converge_shards, final_status: action.final_status() })
}

async fn build_database_spec(
    core_db: &CoreDb,
    action: ResourceAction,
    database_id: EntityId,
) -> Result<ResourceWorkflowSpec, WorkflowError> {
    let database = core_db.get_database(database_id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    let side_effects = node_steps(
        core_db,
        database.shard_id,
        "database_on_node",
        action.node_method("database"),
        json!({ "database_id": database_id, "name": database.name }),
    )
    .await?;
    Ok(ResourceWorkflowSpec { table: "databases", resource_id: database_id, side_effects, converge_shards: Vec::new(), final_status: action.final_status() })
}

async fn build_database_user_spec(
    core_db: &CoreDb,
    action: ResourceAction,
    id: EntityId,
) -> Result<ResourceWorkflowSpec, WorkflowError> {
    let user = core_db.get_database_user(id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    let database = core_db.get_database(user.database_id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    let side_effects = node_steps(
        core_db,
        database.shard_id,
        "database_user_on_node",
        action.node_method("database_user"),
        json!({ "database_id": user.database_id, "username": user.username }),
    )
    .await?;
    Ok(ResourceWorkflowSpec { table: "database_users", resource_id: id, side_effects, converge_shards: Vec::new(), final_status: action.final_status() })
}

async fn build_valkey_instance_spec(
    core_db: &CoreDb,
    action: ResourceAction,
    id: EntityId,
) -> Result<ResourceWorkflowSpec, WorkflowError> {
    let instance = core_db.get_valkey_instance(id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    let side_effects = node_steps(
        core_db,
        instance.shard_id,
        "valkey_instance_on_node",
        action.node_method("valkey_instance"),
        json!({ "instance_id": id }),
    )
    .await?;
    Ok(ResourceWorkflowSpec { table: "valkey_instances", resource_id: id, side_effects, converge_shards: Vec::new(), final_status: action.final_status() })
}

async fn build_valkey_user_spec(
    core_db: &CoreDb,
    action: ResourceAction,
    id: EntityId,
) -> Result<ResourceWorkflowSpec, WorkflowError> {
    let user = core_db.get_valkey_user(id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    let instance = core_db.get_valkey_instance(user.instance_id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    let side_effects = node_steps(
        core_db,
        instance.shard_id,
        "valkey_user_on_node",
        action.node_method("valkey_user"),
        json!({ "instance_id": user.instance_id, "username": user.username }),
    )
    .await?;
    Ok(ResourceWorkflowSpec { table: "valkey_users", resource_id: id, side_effects, converge_shards: Vec::new(), final_status: action.final_status() })
}

async fn build_s3_bucket_spec(
    core_db: &CoreDb,
    action: ResourceAction,
    id: EntityId,
) -> Result<ResourceWorkflowSpec, WorkflowError> {
    let bucket = core_db.get_s3_bucket(id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    let side_effects = node_steps(
        core_db,
        bucket.shard_id,
        "s3_bucket_on_node",
        action.node_method("s3_bucket"),
        json!({ "bucket_id": id, "name": bucket.name }),
    )
    .await?;
    Ok(ResourceWorkflowSpec { table: "s3_buckets", resource_id: id, side_effects, converge_shards: Vec::new(), final_status: action.final_status() })
}

async fn build_s3_key_spec(
    core_db: &CoreDb,
    action: ResourceAction,
    id: EntityId,
) -> Result<ResourceWorkflowSpec, WorkflowError> {
    let key = core_db.get_s3_key(id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    let bucket = core_db.get_s3_bucket(key.bucket_id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    let side_effects = node_steps(
        core_db,
        bucket.shard_id,
        "s3_key_on_node",
        action.node_method("s3_key"),
        json!({ "bucket_id": key.bucket_id, "access_key_id": key.access_key_id }),
    )
    .await?;
    Ok(ResourceWorkflowSpec { table: "s3_keys", resource_id: id, side_effects, converge_shards: Vec::new(), final_status: action.final_status() })
}

async fn build_cron_job_spec(
    core_db: &CoreDb,
    action: ResourceAction,
    id: EntityId,
) -> Result<ResourceWorkflowSpec, WorkflowError> {
    let cron_job = core_db.get_cron_job(id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    let shard_id = web_shard_for_webroot(core_db, cron_job.webroot_id).await?;
    let side_effects = node_steps(
        core_db,
        shard_id,
        "cron_job_on_node",
        action.node_method("cron_job"),
        json!({ "cron_job_id": id, "webroot_id": cron_job.webroot_id, "schedule": cron_job.schedule, "command": cron_job.command }),
    )
    .await?;
    Ok(ResourceWorkflowSpec { table: "cron_jobs", resource_id: id, side_effects, converge_shards: Vec::new(), final_status: action.final_status() })
}

async fn build_daemon_spec(
    core_db: &CoreDb,
    action: ResourceAction,
    id: EntityId,
) -> Result<ResourceWorkflowSpec, WorkflowError> {
    let daemon = core_db.get_daemon(id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    let shard_id = web_shard_for_webroot(core_db, daemon.webroot_id).await?;
    let side_effects = node_steps(
        core_db,
        shard_id,
        "daemon_on_node",
        action.node_method("daemon"),
        json!({ "daemon_id": id, "webroot_id": daemon.webroot_id, "command": daemon.command, "proxy_port": daemon.proxy_port }),
    )
    .await?;
    Ok(ResourceWorkflowSpec { table: "daemons", resource_id: id, side_effects, converge_shards: Vec::new(), final_status: action.final_status() })
}

async fn build_ssh_key_spec(
    core_db: &CoreDb,
    action: ResourceAction,
    id: EntityId,
) -> Result<ResourceWorkflowSpec, WorkflowError> {
    let ssh_key = core_db.get_ssh_key(id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    let tenant = core_db.get_tenant(ssh_key.tenant_id).await.map_err(|e| WorkflowError::Store(e.into()))?;

    let side_effects = match tenant.shard_id {
        Some(shard_id) => {
            node_steps(core_db, shard_id, "ssh_key_on_node", action.node_method("ssh_key"), json!({ "uid": tenant.uid, "public_key": ssh_key.public_key })).await?
        }
        None => Vec::new(),
    };

    Ok(ResourceWorkflowSpec { table: "ssh_keys", resource_id: id, side_effects, converge_shards: Vec::new(), final_status: action.final_status() })
}

async fn build_zone_record_spec(
    core_db: &CoreDb,
    action: ResourceAction,
    id: EntityId,
) -> Result<ResourceWorkflowSpec, WorkflowError> {
    let record = core_db.get_zone_record(id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    let zone = core_db.get_zone(record.zone_id).await.map_err(|e| WorkflowError::Store(e.into()))?;

    let step = if action == ResourceAction::Delete {
        ActivityStep {
            step_kind: "zone_record_powerdns",
            activity_name: "DeletePowerDnsRecord",
            input: json!({ "zone_name": zone.name, "name": record.name, "record_type": record.record_type, "content": record.content }),
        }
    } else {
        ActivityStep {
            step_kind: "zone_record_powerdns",
            activity_name: "UpsertPowerDnsRecord",
            input: json!({ "zone_name": zone.name, "name": record.name, "record_type": record.record_type, "content": record.content, "ttl": record.ttl, "priority": record.priority }),
        }
    };

    Ok(ResourceWorkflowSpec { table: "zone_records", resource_id: id, side_effects: vec![step], converge_shards: Vec::new(), final_status: action.final_status() })
}

async fn build_email_account_spec(
    core_db: &CoreDb,
    action: ResourceAction,
    id: EntityId,
) -> Result<ResourceWorkflowSpec, WorkflowError> {
    let account = core_db.get_email_account(id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    let address = format!("{}@{}", account.local_part, account.domain);

    // Password provisioning isn't modeled on this row; accounts are
    // created passwordless pending a dedicated credential-rotation
    // activity, matching how the node-agent path leaves node-side
    // secrets out of the resource row too.
    let input = if action == ResourceAction::Delete {
        json!({ "op": "delete_account", "email": address })
    } else {
        json!({ "op": "create_account", "email": address, "password_hash": "" })
    };

    Ok(ResourceWorkflowSpec {
        table: "email_accounts",
        resource_id: id,
        side_effects: vec![ActivityStep { step_kind: "email_account_mail_op", activity_name: "StalwartMailOp", input }],
        converge_shards: Vec::new(),
        final_status: action.final_status(),
    })
}

async fn build_email_alias_spec(
    core_db: &CoreDb,
    action: ResourceAction,
    id: EntityId,
) -> Result<ResourceWorkflowSpec, WorkflowError> {
    let alias = core_db.get_email_alias(id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    let account_email = account_email(core_db, alias.account_id).await?;

    let input = json!({ "op": action.alias_mail_verb(), "account_email": account_email, "alias": alias.address });

    Ok(ResourceWorkflowSpec {
        table: "email_aliases",
        resource_id: id,
        side_effects: vec![ActivityStep { step_kind: "email_alias_mail_op", activity_name: "StalwartMailOp", input }],
        converge_shards: Vec::new(),
        final_status: action.final_status(),
    })
}

async fn build_email_forward_spec(
    core_db: &CoreDb,
    action: ResourceAction,
    id: EntityId,
) -> Result<ResourceWorkflowSpec, WorkflowError> {
    let forward = core_db.get_email_forward(id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    let account_email = account_email(core_db, forward.account_id).await?;

    // Stalwart has no dedicated forward verb; a forward is a sieve
    // script that redirects (optionally keeping a copy in the mailbox).
    let input = if action == ResourceAction::Delete {
        json!({ "op": "delete_sieve", "account_email": account_email })
    } else {
        let script = if forward.keep_copy {
            format!("redirect :copy \"{}\";", forward.destination)
        } else {
            format!("redirect \"{}\";", forward.destination)
        };
        json!({ "op": "deploy_sieve", "account_email": account_email, "script": script })
    };

    Ok(ResourceWorkflowSpec {
        table: "email_forwards",
        resource_id: id,
        side_effects: vec![ActivityStep { step_kind: "email_forward_mail_op", activity_name: "StalwartMailOp", input }],
        converge_shards: Vec::new(),
        final_status: action.final_status(),
    })
}

async fn build_email_autoreply_spec(
    core_db: &CoreDb,
    action: ResourceAction,
    id: EntityId,
) -> Result<ResourceWorkflowSpec, WorkflowError> {
    let autoreply = core_db.get_email_autoreply(id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    let account_email = account_email(core_db, autoreply.account_id).await?;

    let input = if action == ResourceAction::Delete {
        json!({ "op": "clear_vacation", "account_email": account_email })
    } else {
        json!({ "op": "set_vacation", "account_email": account_email, "subject": autoreply.subject, "body": autoreply.body })
    };

    Ok(ResourceWorkflowSpec {
        table: "email_autoreplies",
        resource_id: id,
        side_effects: vec![ActivityStep { step_kind: "email_autoreply_mail_op", activity_name: "StalwartMailOp", input }],
        converge_shards: Vec::new(),
        final_status: action.final_status(),
    })
}

async fn build_backup_spec(
    core_db: &CoreDb,
    action: ResourceAction,
    id: EntityId,
) -> Result<ResourceWorkflowSpec, WorkflowError> {
    let backup = core_db.get_backup(id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    let tenant = core_db.get_tenant(backup.tenant_id).await.map_err(|e| WorkflowError::Store(e.into()))?;

    let side_effects = match tenant.shard_id {
        Some(shard_id) => {
            node_steps(
                core_db,
                shard_id,
                "backup_on_node",
                action.node_method("backup"),
                json!({ "backup_id": id, "resource_kind": backup.resource_kind, "resource_id": backup.resource_id, "location": backup.location }),
            )
            .await?
        }
        None => Vec::new(),
    };

    Ok(ResourceWorkflowSpec { table: "backups", resource_id: id, side_effects, converge_shards: Vec::new(), final_status: action.final_status() })
}

/// Drives a DNS zone's creation: ensures the zone exists in PowerDNS.
/// Zones carry no `status` column (only existing/not-existing), so this
/// doesn't go through [`crate::resource::run_resource_workflow`]'s
/// phase-gating — there's no `provisioning`/`failed` state to gate.
pub async fn run_zone_create_workflow(executor: &mut WorkflowExecutor, core_db: &CoreDb, zone_id: EntityId) -> Result<(), WorkflowError> {
    let zone = core_db.get_zone(zone_id).await.map_err(|e| WorkflowError::Store(e.into()))?;
    dispatch_step(
        executor,
        &ActivityStep {
            step_kind: "create_powerdns_zone",
            activity_name: "CreatePowerDnsZone",
            input: json!({ "zone_name": zone.name }),
        },
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tag_round_trips() {
        for kind in [
            GenericResourceKind::Tenant,
            GenericResourceKind::Fqdn,
            GenericResourceKind::Database,
            GenericResourceKind::DatabaseUser,
            GenericResourceKind::ValkeyInstance,
            GenericResourceKind::ValkeyUser,
            GenericResourceKind::S3Bucket,
            GenericResourceKind::S3Key,
            GenericResourceKind::CronJob,
            GenericResourceKind::Daemon,
            GenericResourceKind::SshKey,
            GenericResourceKind::ZoneRecord,
            GenericResourceKind::EmailAccount,
            GenericResourceKind::EmailAlias,
            GenericResourceKind::EmailForward,
            GenericResourceKind::EmailAutoreply,
            GenericResourceKind::Backup,
        ] {
            assert_eq!(GenericResourceKind::parse(kind.tag()), Some(kind));
        }
        assert_eq!(GenericResourceKind::parse("not_a_kind"), None);
    }

    #[test]
    fn action_node_method_prefixes_create_and_delete_distinctly() {
        assert_eq!(ResourceAction::Create.node_method("database"), "create_database");
        assert_eq!(ResourceAction::Update.node_method("database"), "create_database");
        assert_eq!(ResourceAction::Delete.node_method("database"), "delete_database");
    }

    #[test]
    fn action_alias_mail_verb_distinguishes_delete() {
        assert_eq!(ResourceAction::Create.alias_mail_verb(), "add_alias");
        assert_eq!(ResourceAction::Update.alias_mail_verb(), "add_alias");
        assert_eq!(ResourceAction::Delete.alias_mail_verb(), "remove_alias");
    }
}
