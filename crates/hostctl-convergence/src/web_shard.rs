//! Web-shard convergence.
//!
//! Unlike a resource workflow, a converge run doesn't apply one delta —
//! it reads the shard's full desired state and reasserts it against
//! every node, so a converge started after a crash or a missed event
//! repairs drift rather than compounding it. `converge:<shard_id>`'s
//! workflow-ID uniqueness is what the engine uses to reject a second
//! concurrent converge for the same shard; this module assumes that's
//! already enforced by whatever starts the workflow.

use std::net::Ipv6Addr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use hostctl_bus_core::{DomainEvent, EventBus};
use hostctl_engine::WorkflowExecutor;
use hostctl_store_postgres::CoreDb;
use hostctl_types::{
    CronJob, Daemon, EntityId, Fqdn, Incident, IncidentSeverity, IncidentStatus, Node, ShardStatus, SshKey, Tenant,
    Webroot,
};
use hostctl_workflows::resource::{dispatch_retryable, dispatch_step, ActivityStep};
use hostctl_workflows::WorkflowError;
use serde_json::json;

use crate::ConvergenceError;

/// Unwraps a tenant's wrapped data-encryption key and decrypts env var
/// ciphertext with it. The only crypto this crate performs; modeled as
/// a trait seam the same way `AcmeClient`/`NodeAgent`/`MailClient` vary
/// their concrete transport behind a trait object.
pub trait EnvVarCodec: Send + Sync {
    /// Unwrap a tenant's `encryption_keys.encrypted_dek` bytes into a
    /// usable data-encryption key. Fails if the wrapping key can't
    /// unwrap it (rotated master key, corrupt row).
    fn unwrap_dek(&self, wrapped: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Decrypt one env var's ciphertext under an already-unwrapped DEK.
    fn decrypt(&self, dek: &[u8], ciphertext: &[u8]) -> anyhow::Result<String>;
}

/// One webroot's reassert-ready desired state.
pub struct DesiredWebroot {
    /// The webroot row itself.
    pub webroot: Webroot,
    /// Bound FQDNs.
    pub fqdns: Vec<Fqdn>,
    /// Decrypted env vars, sorted by name.
    pub env: Vec<(String, String)>,
    /// Daemons proxied by nginx.
    pub daemons: Vec<Daemon>,
    /// Cron jobs.
    pub cron_jobs: Vec<CronJob>,
}

/// One tenant's reassert-ready desired state.
pub struct DesiredTenant {
    /// The tenant row itself.
    pub tenant: Tenant,
    /// Owning brand's base hostname, for the `<webroot>.<node>.<base>`
    /// internal service hostname.
    pub brand_base_hostname: String,
    /// Active webroots.
    pub webroots: Vec<DesiredWebroot>,
    /// Active SSH keys.
    pub ssh_keys: Vec<SshKey>,
}

/// The aggregate `GetShardDesiredState(shard_id)` returns.
pub struct ShardDesiredState {
    /// Tenants bound to the shard.
    pub tenants: Vec<DesiredTenant>,
}

/// Gathers a web shard's full desired state in one pass: active
/// tenants, their active webroots (with FQDNs, decrypted env vars,
/// daemons, cron jobs), active SSH keys, and each owning brand's base
/// hostname.
///
/// Env-var decryption is all-or-nothing per batch: an unwrappable DEK,
/// or an env var with no provisioned DEK, returns an error from this
/// function rather than skipping the offending row, so the caller's
/// retry loop re-enters the whole converge rather than reasserting a
/// webroot with missing environment.
pub async fn get_shard_desired_state(
    core_db: &CoreDb,
    shard_id: EntityId,
    env_codec: &dyn EnvVarCodec,
) -> Result<ShardDesiredState, ConvergenceError> {
    let tenants = core_db.tenants_for_shard(shard_id).await.map_err(|e| ConvergenceError::Store(e.into()))?;
    let mut desired_tenants = Vec::with_capacity(tenants.len());

    for tenant in tenants {
        let brand = core_db.get_brand(tenant.brand_id).await.map_err(|e| ConvergenceError::Store(e.into()))?;
        let webroots = core_db.webroots_for_tenant(tenant.id).await.map_err(|e| ConvergenceError::Store(e.into()))?;
        let ssh_keys = core_db.ssh_keys_for_tenant(tenant.id).await.map_err(|e| ConvergenceError::Store(e.into()))?;

        let dek = match core_db.get_encrypted_dek(tenant.id).await.map_err(|e| ConvergenceError::Store(e.into()))? {
            Some(wrapped) => Some(env_codec.unwrap_dek(&wrapped).map_err(|e| {
                ConvergenceError::Precondition(format!("tenant {} DEK unwrap failed: {e}", tenant.id.0))
            })?),
            None => None,
        };

        let mut desired_webroots = Vec::with_capacity(webroots.len());
        for webroot in webroots {
            let fqdns = core_db.fqdns_for_webroot(webroot.id).await.map_err(|e| ConvergenceError::Store(e.into()))?;
            let daemons =
                core_db.daemons_for_webroot(webroot.id).await.map_err(|e| ConvergenceError::Store(e.into()))?;
            let cron_jobs =
                core_db.cron_jobs_for_webroot(webroot.id).await.map_err(|e| ConvergenceError::Store(e.into()))?;
            let raw_env =
                core_db.env_vars_for_webroot(webroot.id).await.map_err(|e| ConvergenceError::Store(e.into()))?;

            let mut env = Vec::with_capacity(raw_env.len());
            for var in raw_env {
                let dek = dek.as_deref().ok_or_else(|| {
                    ConvergenceError::Precondition(format!(
                        "webroot {} has env vars but tenant {} has no provisioned DEK",
                        webroot.id.0, tenant.id.0
                    ))
                })?;
                let value = env_codec.decrypt(dek, &var.encrypted_value).map_err(|e| {
                    ConvergenceError::Precondition(format!("env var {} decrypt failed: {e}", var.name))
                })?;
                env.push((var.name, value));
            }
            env.sort_by(|a, b| a.0.cmp(&b.0));

            desired_webroots.push(DesiredWebroot { webroot, fqdns, env, daemons, cron_jobs });
        }

        desired_tenants.push(DesiredTenant {
            tenant,
            brand_base_hostname: brand.base_hostname,
            webroots: desired_webroots,
            ssh_keys,
        });
    }

    Ok(ShardDesiredState { tenants: desired_tenants })
}

/// Config/unit filenames a node is expected to carry once converged —
/// one nginx vhost per webroot, one supervisor unit per daemon.
fn expected_config_filenames(state: &ShardDesiredState) -> Vec<String> {
    let mut names = Vec::new();
    for tenant in &state.tenants {
        for webroot in &tenant.webroots {
            names.push(format!("{}.conf", webroot.webroot.id.0));
            for daemon in &webroot.daemons {
                names.push(format!("{}.service", daemon.id.0));
            }
        }
    }
    names
}

/// The address a daemon's `proxy_pass` upstream should target: the
/// tenant's ULA address on the owning node, derived by folding the
/// tenant's uid into the low 64 bits of the node's `/64` ULA prefix, or
/// `127.0.0.1` if the node carries no IPv6 address.
fn daemon_upstream_host(node: &Node, tenant_uid: i64) -> String {
    match node.ip6 {
        Some(prefix) => {
            let segments = prefix.segments();
            let ula = Ipv6Addr::new(
                segments[0],
                segments[1],
                segments[2],
                segments[3],
                ((tenant_uid >> 48) & 0xffff) as u16,
                ((tenant_uid >> 32) & 0xffff) as u16,
                ((tenant_uid >> 16) & 0xffff) as u16,
                (tenant_uid & 0xffff) as u16,
            );
            ula.to_string()
        }
        None => "127.0.0.1".to_string(),
    }
}

/// Drives one web shard's converge run to completion.
pub struct WebShardConverge {
    core_db: Arc<CoreDb>,
    env_codec: Arc<dyn EnvVarCodec>,
    /// How long a shard may sit in `converging` before the run raises a
    /// `shard.converge_stale` incident on completion. Default 10 min.
    pub stale_threshold: Duration,
}

impl WebShardConverge {
    /// Build the converge driver.
    pub fn new(core_db: Arc<CoreDb>, env_codec: Arc<dyn EnvVarCodec>) -> Self {
        Self { core_db, env_codec, stale_threshold: Duration::minutes(10) }
    }

    /// Run the full 5-step sequence for `shard_id`.
    pub async fn run(
        &self,
        executor: &mut WorkflowExecutor,
        shard_id: EntityId,
        bus: &dyn EventBus,
    ) -> Result<(), ConvergenceError> {
        let started_at: DateTime<Utc> =
            executor.step("mark_converge_started", || async { Ok(Utc::now()) }).await.map_err(WorkflowError::from)?;

        dispatch_step(
            executor,
            &ActivityStep {
                step_kind: "set_shard_converging",
                activity_name: "SetShardStatus",
                input: json!({ "shard_id": shard_id, "status": ShardStatus::Converging }),
            },
        )
        .await
        .map_err(WorkflowError::from)?;

        let state = get_shard_desired_state(&self.core_db, shard_id, self.env_codec.as_ref()).await?;
        let expected = expected_config_filenames(&state);
        let nodes = self.core_db.nodes_for_shard(shard_id).await.map_err(|e| ConvergenceError::Store(e.into()))?;

        for node in &nodes {
            let step = ActivityStep {
                step_kind: "clean_orphaned_configs",
                activity_name: "NodeAgentCall",
                input: json!({
                    "node_id": node.id,
                    "method": "clean_orphaned_configs",
                    "params": { "expected": expected },
                }),
            };
            if !self.dispatch_or_fail(executor, shard_id, step).await? {
                return Ok(());
            }
        }

        for tenant in &state.tenants {
            for webroot in &tenant.webroots {
                for node in &nodes {
                    let upstreams: Vec<serde_json::Value> = webroot
                        .daemons
                        .iter()
                        .filter_map(|d| {
                            d.proxy_port
                                .map(|port| json!({ "host": daemon_upstream_host(node, tenant.tenant.uid), "port": port }))
                        })
                        .collect();

                    let configure = ActivityStep {
                        step_kind: "reassert_webroot_runtime",
                        activity_name: "NodeAgentCall",
                        input: json!({
                            "node_id": node.id,
                            "method": "configure_webroot",
                            "params": {
                                "webroot_id": webroot.webroot.id,
                                "runtime": webroot.webroot.runtime,
                                "version": webroot.webroot.version,
                                "public_folder": webroot.webroot.public_folder,
                                "service_hostname": webroot.webroot.service_hostname_enabled.then(|| {
                                    format!("{}.{}.{}", webroot.webroot.id.0, node.hostname, tenant.brand_base_hostname)
                                }),
                                "cron_jobs": webroot.cron_jobs,
                            },
                        }),
                    };
                    if !self.dispatch_or_fail(executor, shard_id, configure).await? {
                        return Ok(());
                    }

                    let env_sorted = json!(webroot.env);
                    let write_env = ActivityStep {
                        step_kind: "reassert_env_file",
                        activity_name: "NodeAgentCall",
                        input: json!({
                            "node_id": node.id,
                            "method": "write_env_file",
                            "params": {
                                "webroot_id": webroot.webroot.id,
                                "env_file_name": webroot.webroot.env_file_name,
                                "mode": 0o400,
                                "vars": env_sorted,
                            },
                        }),
                    };
                    if !self.dispatch_or_fail(executor, shard_id, write_env).await? {
                        return Ok(());
                    }

                    let write_nginx = ActivityStep {
                        step_kind: "reassert_nginx_config",
                        activity_name: "NodeAgentCall",
                        input: json!({
                            "node_id": node.id,
                            "method": "write_nginx_config",
                            "params": {
                                "webroot_id": webroot.webroot.id,
                                "fqdns": webroot.fqdns,
                                "upstreams": upstreams,
                            },
                        }),
                    };
                    if !self.dispatch_or_fail(executor, shard_id, write_nginx).await? {
                        return Ok(());
                    }

                    let reload = ActivityStep {
                        step_kind: "reload_nginx",
                        activity_name: "NodeAgentCall",
                        input: json!({ "node_id": node.id, "method": "reload_nginx", "params": null }),
                    };
                    if !self.dispatch_or_fail(executor, shard_id, reload).await? {
                        return Ok(());
                    }
                }
            }
        }

        for tenant in &state.tenants {
            let keys: Vec<String> = tenant.ssh_keys.iter().map(|k| k.public_key.clone()).collect();
            for node in &nodes {
                let step = ActivityStep {
                    step_kind: "fan_out_authorized_keys",
                    activity_name: "NodeAgentCall",
                    input: json!({
                        "node_id": node.id,
                        "method": "write_authorized_keys",
                        "params": { "uid": tenant.tenant.uid.to_string(), "keys": keys },
                    }),
                };
                if !self.dispatch_or_fail(executor, shard_id, step).await? {
                    return Ok(());
                }
            }
        }

        dispatch_step(
            executor,
            &ActivityStep {
                step_kind: "set_shard_active",
                activity_name: "SetShardStatus",
                input: json!({ "shard_id": shard_id, "status": ShardStatus::Active }),
            },
        )
        .await
        .map_err(WorkflowError::from)?;

        let _ = bus.publish(&DomainEvent::ShardConvergeCompleted { shard_id, success: true });
        self.raise_stale_incident_if_overdue(shard_id, started_at, bus).await;

        Ok(())
    }

    /// Dispatches one converge step. A retryable failure propagates; a
    /// non-retryable one phase-gates the shard to `failed` and returns
    /// `Ok(false)` as a signal for the caller to stop early without
    /// propagating — mirrors `hostctl_workflows::resource`'s
    /// non-retryable handling. `Ok(true)` means the caller should keep
    /// going.
    async fn dispatch_or_fail(
        &self,
        executor: &mut WorkflowExecutor,
        shard_id: EntityId,
        step: ActivityStep,
    ) -> Result<bool, ConvergenceError> {
        if let Err(err) = dispatch_step(executor, &step).await {
            if dispatch_retryable(&err) {
                return Err(ConvergenceError::Workflow(err));
            }
            dispatch_step(
                executor,
                &ActivityStep {
                    step_kind: "set_shard_failed",
                    activity_name: "SetShardStatus",
                    input: json!({ "shard_id": shard_id, "status": ShardStatus::Failed }),
                },
            )
            .await
            .map_err(WorkflowError::from)?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn raise_stale_incident_if_overdue(&self, shard_id: EntityId, started_at: DateTime<Utc>, bus: &dyn EventBus) {
        if Utc::now() - started_at <= self.stale_threshold {
            return;
        }
        let incident = Incident {
            id: EntityId::new(),
            dedupe_key: format!("shard.converge_stale:{}", shard_id.0),
            incident_type: "shard.converge_stale".to_string(),
            severity: IncidentSeverity::Warning,
            status: IncidentStatus::Open,
            title: format!("shard {} converge exceeded {} min", shard_id.0, self.stale_threshold.num_minutes()),
            detail: format!("converge started at {started_at} and ran past the configured threshold"),
            resource_type: Some("shards".to_string()),
            resource_id: Some(shard_id),
            assigned_to: None,
            resolution: None,
            detected_at: Utc::now(),
            escalated_at: None,
            updated_at: Utc::now(),
        };
        let _ = hostctl_incidents::lifecycle::raise_incident(&self.core_db, bus, &incident).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_config_filenames_one_per_webroot_and_daemon() {
        let webroot_id = EntityId::new();
        let daemon_id = EntityId::new();
        let state = ShardDesiredState {
            tenants: vec![DesiredTenant {
                tenant: Tenant {
                    id: EntityId::new(),
                    brand_id: EntityId::new(),
                    cluster_id: EntityId::new(),
                    shard_id: None,
                    uid: 5000,
                    status: hostctl_types::ResourceStatus::Active,
                    suspend_reason: None,
                },
                brand_base_hostname: "example-hosting.net".to_string(),
                webroots: vec![DesiredWebroot {
                    webroot: Webroot {
                        id: webroot_id,
                        tenant_id: EntityId::new(),
                        runtime: "php-8.3".to_string(),
                        version: "8.3".to_string(),
                        public_folder: "public".to_string(),
                        env_file_name: ".env".to_string(),
                        service_hostname_enabled: false,
                        status: hostctl_types::ResourceStatus::Active,
                    },
                    fqdns: vec![],
                    env: vec![],
                    daemons: vec![Daemon {
                        id: daemon_id,
                        webroot_id,
                        command: "node worker.js".to_string(),
                        proxy_port: Some(3000),
                        status: hostctl_types::ResourceStatus::Active,
                    }],
                    cron_jobs: vec![],
                }],
                ssh_keys: vec![],
            }],
        };

        let names = expected_config_filenames(&state);
        assert_eq!(names, vec![format!("{}.conf", webroot_id.0), format!("{}.service", daemon_id.0)]);
    }

    #[test]
    fn daemon_upstream_falls_back_to_loopback_without_ipv6() {
        let node = Node {
            id: EntityId::new(),
            cluster_id: EntityId::new(),
            hostname: "web1".to_string(),
            ip: None,
            ip6: None,
            roles: vec![],
            status: hostctl_types::NodeStatus::Healthy,
            last_health_at: None,
        };
        assert_eq!(daemon_upstream_host(&node, 5000), "127.0.0.1");
    }

    #[test]
    fn daemon_upstream_folds_uid_into_node_prefix() {
        let node = Node {
            id: EntityId::new(),
            cluster_id: EntityId::new(),
            hostname: "web1".to_string(),
            ip: None,
            ip6: Some("fd00:1234:5678:9abc::1".parse().unwrap()),
            roles: vec![],
            status: hostctl_types::NodeStatus::Healthy,
            last_health_at: None,
        };
        let addr = daemon_upstream_host(&node, 5000);
        assert!(addr.starts_with("fd00:1234:5678:9abc:"));
    }
}
