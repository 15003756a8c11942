//! End-to-end scenario tests (§8): each one drives the real workflow
//! structs against an ephemeral Postgres-backed `CoreDb`, an in-memory
//! workflow-history store, and in-process fakes standing in for
//! PowerDNS, HAProxy, an ACME directory, node agents, and the LLM
//! provider — the same seam `register_builtin_activities` wires a real
//! deployment's network clients into.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use hostctl_activities::acme::{AcmeClient, AcmeOrder};
use hostctl_activities::dns::{
    AutoCreateDnsRecords, AutoCreateDnsRecordsInput, AutoRecordMirrorInput, DeactivateAutoRecords,
    LbAddress, PowerDnsClient, ReactivateAutoRecords,
};
use hostctl_activities::execute::register_tool;
use hostctl_activities::lb::{HaproxyClient, LbMapFiles};
use hostctl_activities::llm::{ChatMessage, ChatOutput, LlmProvider, Role, ToolCall, ToolSpec};
use hostctl_activities::mail::MailClient;
use hostctl_activities::node_agent::{NodeAgent, NodeAgentError};
use hostctl_activities::webhook::WebhookSender;
use hostctl_activities::{Activity, Heartbeat};
use hostctl_bus_core::InMemoryBus;
use hostctl_convergence::web_shard::{EnvVarCodec, WebShardConverge};
use hostctl_engine::{NullHeartbeatSink, WorkflowExecutor};
use hostctl_incidents::escalation::EscalationPass;
use hostctl_incidents::investigate::{InvestigateIncident, InvestigationOutcome};
use hostctl_incidents::lifecycle::raise_incident;
use hostctl_store_memory::MemoryBackend;
use hostctl_store_postgres::CoreDb;
use hostctl_types::{
    Brand, Cluster, Fqdn, Incident, IncidentSeverity, IncidentStatus, Node, NodeStatus,
    ResourceStatus, Shard, ShardRole, ShardStatus, Tenant, Webroot, Zone, ZoneRecord,
};
use hostctl_workflows::certificate::CertificateWorkflow;
use hostctl_workflows::webroot::CreateWebroot;
use serde_json::{json, Value};
use sqlx::PgPool;

mod fakes {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct FakePowerDns {
        pub records: Mutex<Vec<(String, String, String, String)>>,
        pub deleted: Mutex<Vec<(String, String, String, String)>>,
    }

    impl FakePowerDns {
        /// Current content for `(name, record_type)`, mirroring what a
        /// real PowerDNS query would answer.
        pub async fn answers_for(&self, name: &str, record_type: &str) -> Vec<String> {
            self.records
                .lock()
                .await
                .iter()
                .filter(|(_, n, t, _)| n == name && t == record_type)
                .map(|(_, _, _, content)| content.clone())
                .collect()
        }
    }

    #[async_trait]
    impl PowerDnsClient for FakePowerDns {
        async fn create_zone(&self, _zone_name: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn upsert_record(
            &self,
            zone_name: &str,
            name: &str,
            record_type: &str,
            content: &str,
            _ttl: i32,
            _priority: Option<i32>,
        ) -> anyhow::Result<()> {
            let mut records = self.records.lock().await;
            records.retain(|(z, n, t, c)| !(z == zone_name && n == name && t == record_type && c == content));
            records.push((zone_name.to_string(), name.to_string(), record_type.to_string(), content.to_string()));
            Ok(())
        }

        async fn delete_record(
            &self,
            zone_name: &str,
            name: &str,
            record_type: &str,
            content: &str,
        ) -> anyhow::Result<()> {
            let mut records = self.records.lock().await;
            records.retain(|(z, n, t, c)| !(z == zone_name && n == name && t == record_type && c == content));
            self.deleted.lock().await.push((
                zone_name.to_string(),
                name.to_string(),
                record_type.to_string(),
                content.to_string(),
            ));
            Ok(())
        }
    }

    pub struct FakeHaproxy;

    #[async_trait]
    impl HaproxyClient for FakeHaproxy {
        async fn command(&self, _cluster_id: hostctl_types::EntityId, _command: &str) -> anyhow::Result<String> {
            Ok("OK".to_string())
        }
    }

    pub struct FakeMail;

    #[async_trait]
    impl MailClient for FakeMail {
        async fn create_domain(&self, _domain: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete_domain(&self, _domain: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn create_account(&self, _email: &str, _password_hash: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete_account(&self, _email: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn add_alias(&self, _account_email: &str, _alias: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn remove_alias(&self, _account_email: &str, _alias: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn deploy_sieve(&self, _account_email: &str, _script: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete_sieve(&self, _account_email: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn set_vacation(&self, _account_email: &str, _subject: &str, _body: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn clear_vacation(&self, _account_email: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeWebhook {
        pub posts: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl WebhookSender for FakeWebhook {
        async fn post(&self, url: &str, body: Value) -> anyhow::Result<u16> {
            self.posts.lock().await.push((url.to_string(), body));
            Ok(200)
        }
    }

    #[derive(Default)]
    pub struct FakeNodeAgent {
        pub calls: Mutex<Vec<(hostctl_types::EntityId, String, Value)>>,
    }

    #[async_trait]
    impl NodeAgent for FakeNodeAgent {
        async fn call(
            &self,
            node_id: hostctl_types::EntityId,
            method: &str,
            params: Value,
        ) -> Result<Value, NodeAgentError> {
            self.calls.lock().await.push((node_id, method.to_string(), params));
            Ok(Value::Null)
        }
    }

    /// Leaf cert: a real self-signed EC P-256 certificate whose validity
    /// window brackets the test's run date, so `FinalizeOrder`'s PEM
    /// parse succeeds and `not_after` lands comfortably past the
    /// 85-day floor.
    pub const SELF_SIGNED_LEAF: &str = "-----BEGIN CERTIFICATE-----\n\
MIIBgTCCASegAwIBAgIUaNSdJJHosL3e5dUPYylxGCb1ctowCgYIKoZIzj0EAwIw\n\
FjEUMBIGA1UEAwwLZXhhbXBsZS5jb20wHhcNMjYwNzI5MDMwNzU2WhcNMjYxMDI3\n\
MDMwNzU2WjAWMRQwEgYDVQQDDAtleGFtcGxlLmNvbTBZMBMGByqGSM49AgEGCCqG\n\
SM49AwEHA0IABC7JUDQ284U0Alfr/3d3viqCgIVujImu4uKknTO841Uk2aIjy89R\n\
Zsjnm/Y5l1gZYFkg5bBSb0VcupQrPJ+LhbmjUzBRMB0GA1UdDgQWBBRCbelwwua5\n\
8Yv4xSloGuui4YjfHzAfBgNVHSMEGDAWgBRCbelwwua58Yv4xSloGuui4YjfHzAP\n\
BgNVHRMBAf8EBTADAQH/MAoGCCqGSM49BAMCA0gAMEUCIB08e+EFs4uCrU35NwBZ\n\
hm2SUJr4/vppkAk7cJMVUurQAiEAg9AX7UV6Vp7ePAKq8LEvHm+lFHT+eVnwx4rq\n\
isKgBXc=\n\
-----END CERTIFICATE-----\n";

    /// Either issues `SELF_SIGNED_LEAF` or fails finalization, for the
    /// happy-path and ACME-cleanup-on-failure scenarios respectively.
    pub struct FakeAcme {
        pub fail_finalize: bool,
    }

    #[async_trait]
    impl AcmeClient for FakeAcme {
        async fn register_account(&self, _account_key_pem: &str) -> anyhow::Result<String> {
            Ok("acct-1".to_string())
        }

        async fn create_order(&self, _account_key_pem: &str, dns_name: &str) -> anyhow::Result<AcmeOrder> {
            Ok(AcmeOrder {
                order_url: format!("https://acme.example/order/{dns_name}"),
                challenge_url: format!("https://acme.example/challenge/{dns_name}"),
                token: "token-1".to_string(),
                key_authorization: "token-1.thumbprint".to_string(),
            })
        }

        async fn accept_challenge(&self, _account_key_pem: &str, _challenge_url: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn poll_order_ready(&self, _account_key_pem: &str, _order_url: &str) -> anyhow::Result<bool> {
            Ok(true)
        }

        async fn finalize(&self, _account_key_pem: &str, _order_url: &str, _csr_der: &[u8]) -> anyhow::Result<String> {
            if self.fail_finalize {
                anyhow::bail!("directory rejected the finalize request")
            }
            Ok(SELF_SIGNED_LEAF.to_string())
        }
    }

    /// Returns one scripted turn of tool calls per `complete()` call,
    /// looping on the last entry once the script is exhausted.
    #[derive(Default)]
    pub struct ScriptedLlm {
        pub turns: Vec<Vec<(&'static str, Value)>>,
        pub turn: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn complete(&self, _messages: &[ChatMessage], _tools: &[ToolSpec]) -> anyhow::Result<ChatOutput> {
            let turn = self.turn.fetch_add(1, Ordering::SeqCst).min(self.turns.len() - 1);
            let calls = &self.turns[turn];
            Ok(ChatOutput {
                content: format!("turn {turn}"),
                tool_calls: calls
                    .iter()
                    .enumerate()
                    .map(|(i, (name, arguments))| ToolCall {
                        id: format!("call-{turn}-{i}"),
                        name: name.to_string(),
                        arguments: arguments.clone(),
                    })
                    .collect(),
            })
        }
    }

    pub struct FakeEnvCodec;

    #[async_trait]
    impl EnvVarCodec for FakeEnvCodec {
        async fn unwrap_dek(&self, wrapped: &[u8]) -> anyhow::Result<Vec<u8>> {
            Ok(wrapped.to_vec())
        }
        async fn decrypt(&self, _dek: &[u8], ciphertext: &[u8]) -> anyhow::Result<String> {
            Ok(String::from_utf8_lossy(ciphertext).to_string())
        }
    }
}

use fakes::*;

fn wire_activities(
    core_db: Arc<CoreDb>,
    powerdns: Arc<FakePowerDns>,
    node_agent: Arc<FakeNodeAgent>,
    acme_fails: bool,
    webhook: Arc<FakeWebhook>,
    lb_map_dir: &std::path::Path,
) {
    hostctl_activities::register_builtin_activities(
        core_db,
        powerdns,
        Arc::new(FakeHaproxy),
        Arc::new(LbMapFiles::new(lb_map_dir.to_path_buf())),
        Arc::new(FakeAcme { fail_finalize: acme_fails }),
        node_agent,
        Arc::new(FakeMail),
        webhook,
        Arc::new(ScriptedLlm::default()),
    );
}

async fn insert_web_cluster_fixture(core_db: &CoreDb) -> (hostctl_types::EntityId, hostctl_types::EntityId, hostctl_types::EntityId) {
    let brand = Brand {
        id: hostctl_types::EntityId::new(),
        base_hostname: "example-hosting.net".to_string(),
        spf_policy: "v=spf1 -all".to_string(),
        dkim_selector: "default".to_string(),
        dmarc_policy: "v=DMARC1; p=reject".to_string(),
    };
    core_db.insert_brand(&brand).await.unwrap();

    let cluster = Cluster {
        id: hostctl_types::EntityId::new(),
        region_id: "us-east".to_string(),
        haproxy_container: "haproxy-1".to_string(),
        stalwart_url: "https://mail.internal".to_string(),
        mail_hostname: "mail.example-hosting.net".to_string(),
    };
    core_db.insert_cluster(&cluster).await.unwrap();

    let shard = Shard {
        id: hostctl_types::EntityId::new(),
        cluster_id: cluster.id,
        role: ShardRole::Web,
        lb_backend: Some("shard-backend".to_string()),
        config: json!({}),
        status: ShardStatus::Active,
    };
    core_db.insert_shard(&shard).await.unwrap();

    let node = Node {
        id: hostctl_types::EntityId::new(),
        cluster_id: cluster.id,
        hostname: "web-1.example-hosting.net".to_string(),
        ip: Some(Ipv4Addr::new(10, 0, 0, 10)),
        ip6: None,
        roles: vec![ShardRole::Web],
        status: NodeStatus::Healthy,
        last_health_at: Some(Utc::now()),
    };
    core_db.insert_node(&node).await.unwrap();
    core_db
        .assign_node_to_shard(&hostctl_types::NodeShardAssignment { shard_id: shard.id, node_id: node.id, shard_index: 0 })
        .await
        .unwrap();

    (brand.id, cluster.id, shard.id)
}

async fn insert_tenant_webroot_fqdn(
    core_db: &CoreDb,
    brand_id: hostctl_types::EntityId,
    cluster_id: hostctl_types::EntityId,
    fqdn: &str,
    ssl_enabled: bool,
) -> (hostctl_types::EntityId, hostctl_types::EntityId, hostctl_types::EntityId) {
    let tenant = Tenant {
        id: hostctl_types::EntityId::new(),
        brand_id,
        cluster_id,
        shard_id: None,
        uid: 50_001,
        status: ResourceStatus::Pending,
        suspend_reason: None,
    };
    core_db.insert_tenant(&tenant).await.unwrap();

    let webroot = Webroot {
        id: hostctl_types::EntityId::new(),
        tenant_id: tenant.id,
        runtime: "static".to_string(),
        version: "1".to_string(),
        public_folder: "public".to_string(),
        env_file_name: ".env".to_string(),
        service_hostname_enabled: false,
        status: ResourceStatus::Pending,
    };
    core_db.insert_webroot(&webroot).await.unwrap();

    let fqdn_row = Fqdn {
        id: hostctl_types::EntityId::new(),
        fqdn: fqdn.to_string(),
        webroot_id: webroot.id,
        ssl_enabled,
        status: ResourceStatus::Pending,
    };
    core_db.insert_fqdn(&fqdn_row).await.unwrap();

    (tenant.id, webroot.id, fqdn_row.id)
}

/// Scenario 1: webroot with TLS.
#[sqlx::test(migrations = "../hostctl-store-postgres/migrations")]
async fn webroot_create_with_tls_provisions_lb_and_certificate(pool: PgPool) {
    let core_db = Arc::new(CoreDb::new(pool));
    let (brand_id, cluster_id, shard_id) = insert_web_cluster_fixture(&core_db).await;
    let zone = Zone { id: hostctl_types::EntityId::new(), brand_id, tenant_id: None, name: "example.com".to_string() };
    core_db.insert_zone(&zone).await.unwrap();

    let (tenant_id, webroot_id, fqdn_id) =
        insert_tenant_webroot_fqdn(&core_db, brand_id, cluster_id, "www.example.com", true).await;

    let node_agent = Arc::new(FakeNodeAgent::default());
    let powerdns = Arc::new(FakePowerDns::default());
    let webhook = Arc::new(FakeWebhook::default());
    let lb_dir = tempfile::tempdir().unwrap();
    wire_activities(core_db.clone(), powerdns.clone(), node_agent.clone(), false, webhook, lb_dir.path());

    let store: Arc<dyn hostctl_store_core::StorageBackend> = Arc::new(MemoryBackend::new());
    let bus = InMemoryBus::new(64);

    let mut executor = WorkflowExecutor::resume(store.clone(), format!("resource:webroot:{}", webroot_id.0)).await.unwrap();
    CreateWebroot::new(core_db.clone()).run(&mut executor, webroot_id, &bus).await.unwrap();

    let tenant = core_db.get_tenant(tenant_id).await.unwrap();
    assert_eq!(tenant.status, ResourceStatus::Active);
    assert_eq!(tenant.shard_id, Some(shard_id));

    let lb_map = LbMapFiles::new(lb_dir.path().to_path_buf());
    let entries = lb_map.entries(cluster_id).await.unwrap();
    assert!(entries.iter().any(|(fqdn, backend)| fqdn == "www.example.com" && backend == "shard-backend"));

    // CreateWebroot only raises the certificate workflow request; a real
    // deployment's event loop spawns it, so the test spawns it directly.
    let certificate = hostctl_types::Certificate {
        id: hostctl_types::EntityId::new(),
        fqdn_id,
        cert_type: hostctl_types::CertificateType::LetsEncrypt,
        cert_pem: None,
        key_pem: None,
        chain_pem: None,
        is_active: false,
        expires_at: None,
        status: ResourceStatus::Pending,
    };
    core_db.insert_certificate(&certificate).await.unwrap();

    let mut cert_executor =
        WorkflowExecutor::resume(store, format!("resource:certificate:{}", certificate.id.0)).await.unwrap();
    CertificateWorkflow::new(core_db.clone())
        .run(&mut cert_executor, fqdn_id, certificate.id, &bus)
        .await
        .unwrap();

    let row = sqlx::query("SELECT is_active, status, expires_at FROM certificates WHERE id = $1")
        .bind(certificate.id.0)
        .fetch_one(core_db.pool())
        .await
        .unwrap();
    let is_active: bool = sqlx::Row::get(&row, "is_active");
    let status: String = sqlx::Row::get(&row, "status");
    let expires_at: chrono::DateTime<Utc> = sqlx::Row::get(&row, "expires_at");
    assert!(is_active);
    assert_eq!(status, "active");
    assert!(expires_at > Utc::now() + ChronoDuration::days(85));

    let calls = node_agent.calls.lock().await;
    assert!(calls.iter().any(|(_, method, _)| method == "create_webroot"));
}

/// Scenario 2: a custom DNS record overrides the auto one, and removing
/// the custom record lets auto take over again.
#[sqlx::test(migrations = "../hostctl-store-postgres/migrations")]
async fn custom_dns_record_wins_over_auto_and_auto_resumes_after_deletion(pool: PgPool) {
    let core_db = Arc::new(CoreDb::new(pool));
    let brand = Brand {
        id: hostctl_types::EntityId::new(),
        base_hostname: "example-hosting.net".to_string(),
        spf_policy: "v=spf1 -all".to_string(),
        dkim_selector: "default".to_string(),
        dmarc_policy: "v=DMARC1; p=reject".to_string(),
    };
    core_db.insert_brand(&brand).await.unwrap();
    let zone = Zone { id: hostctl_types::EntityId::new(), brand_id: brand.id, tenant_id: None, name: "example.com".to_string() };
    core_db.insert_zone(&zone).await.unwrap();

    let powerdns = Arc::new(FakePowerDns::default());
    let auto_create = AutoCreateDnsRecords::new(core_db.clone(), powerdns.clone());
    let mut hb = Heartbeat::new(Arc::new(NullHeartbeatSink));

    let fqdn_id = hostctl_types::EntityId::new();
    auto_create
        .run(
            AutoCreateDnsRecordsInput {
                fqdn: "www.example.com".to_string(),
                lb_addresses: vec![LbAddress::V4 { addr: Ipv4Addr::new(10, 0, 0, 1) }],
                source_fqdn_id: fqdn_id,
            },
            "key-auto-1",
            &mut hb,
        )
        .await
        .unwrap();
    assert_eq!(powerdns.answers_for("www.example.com", "A").await, vec!["10.0.0.1".to_string()]);

    let custom = ZoneRecord {
        id: hostctl_types::EntityId::new(),
        zone_id: zone.id,
        record_type: "A".to_string(),
        name: "www.example.com".to_string(),
        content: "10.0.0.2".to_string(),
        ttl: 300,
        priority: None,
        managed_by: hostctl_types::ManagedBy::Custom,
        source_type: None,
        source_fqdn_id: None,
        status: ResourceStatus::Active,
    };
    core_db.insert_zone_record(&custom).await.unwrap();

    let deactivate = DeactivateAutoRecords::new(core_db.clone(), powerdns.clone());
    deactivate
        .run(
            AutoRecordMirrorInput {
                zone_id: zone.id,
                zone_name: zone.name.clone(),
                name: "www.example.com".to_string(),
                record_type: "A".to_string(),
            },
            "key-deactivate-1",
            &mut hb,
        )
        .await
        .unwrap();
    // Custom row never went through AutoCreateDNSRecords's PowerDNS write
    // here; upsert it the way a zone-record create workflow would.
    powerdns.upsert_record(&zone.name, "www.example.com", "A", "10.0.0.2", 300, None).await.unwrap();

    assert_eq!(powerdns.answers_for("www.example.com", "A").await, vec!["10.0.0.2".to_string()]);

    core_db.update_status_with_message("zone_records", custom.id, ResourceStatus::Deleted, None).await.unwrap();
    powerdns.delete_record(&zone.name, "www.example.com", "A", "10.0.0.2").await.unwrap();

    let reactivate = ReactivateAutoRecords::new(core_db.clone(), powerdns.clone());
    reactivate
        .run(
            AutoRecordMirrorInput {
                zone_id: zone.id,
                zone_name: zone.name.clone(),
                name: "www.example.com".to_string(),
                record_type: "A".to_string(),
            },
            "key-reactivate-1",
            &mut hb,
        )
        .await
        .unwrap();

    assert_eq!(powerdns.answers_for("www.example.com", "A").await, vec!["10.0.0.1".to_string()]);
}

/// Scenario 3: a burst of converge triggers for one shard coalesces into
/// at most one running plus one queued rerun.
#[sqlx::test(migrations = "../hostctl-store-postgres/migrations")]
async fn converge_burst_coalesces_to_one_running_and_one_queued(pool: PgPool) {
    let core_db = Arc::new(CoreDb::new(pool));
    let (_, _, shard_id) = insert_web_cluster_fixture(&core_db).await;

    let node_agent = Arc::new(FakeNodeAgent::default());
    let powerdns = Arc::new(FakePowerDns::default());
    let webhook = Arc::new(FakeWebhook::default());
    let lb_dir = tempfile::tempdir().unwrap();
    wire_activities(core_db.clone(), powerdns, node_agent, false, webhook, lb_dir.path());

    let coalescer = hostctl_engine::ConvergeCoalescer::new();
    let bus = Arc::new(InMemoryBus::new(64));
    let runs = Arc::new(AtomicUsize::new(0));

    let fire = |core_db: Arc<CoreDb>, bus: Arc<InMemoryBus>, runs: Arc<AtomicUsize>| {
        coalescer.fire(format!("converge:{}:web", shard_id.0), move || {
            let core_db = core_db.clone();
            let bus = bus.clone();
            let runs = runs.clone();
            async move {
                let mut executor =
                    WorkflowExecutor::resume(Arc::new(MemoryBackend::new()), format!("converge:{}:web", shard_id.0))
                        .await
                        .unwrap();
                let _ = WebShardConverge::new(core_db, Arc::new(FakeEnvCodec))
                    .run(&mut executor, shard_id, bus.as_ref())
                    .await;
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });
    };

    for _ in 0..5 {
        fire(core_db.clone(), bus.clone(), runs.clone());
    }
    tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

    assert!(runs.load(Ordering::SeqCst) <= 2, "at most one running and one queued rerun");

    let shard = core_db.get_shard(shard_id).await.unwrap();
    assert_eq!(shard.status, ShardStatus::Active);
}

/// Scenario 4: duplicate incidents dedupe onto one row, and the
/// investigation agent resolves it after two tool calls.
#[sqlx::test(migrations = "../hostctl-store-postgres/migrations")]
async fn duplicate_incidents_dedupe_and_agent_resolves_after_tool_calls(pool: PgPool) {
    let core_db = Arc::new(CoreDb::new(pool));
    let bus = InMemoryBus::new(64);

    let make_incident = || Incident {
        id: hostctl_types::EntityId::new(),
        dedupe_key: "db:127/replication_broken".to_string(),
        incident_type: "replication.broken".to_string(),
        severity: IncidentSeverity::Critical,
        status: IncidentStatus::Open,
        title: "replication broken".to_string(),
        detail: "lag exceeded threshold".to_string(),
        resource_type: Some("nodes".to_string()),
        resource_id: None,
        assigned_to: None,
        resolution: None,
        detected_at: Utc::now(),
        escalated_at: None,
        updated_at: Utc::now(),
    };

    let first = raise_incident(&core_db, &bus, &make_incident()).await.unwrap();
    let second = raise_incident(&core_db, &bus, &make_incident()).await.unwrap();
    assert_eq!(first, second);

    let timeline = core_db.incident_timeline(first).await.unwrap();
    assert_eq!(timeline.iter().filter(|e| matches!(e.action, hostctl_types::IncidentAction::Created)).count(), 1);

    register_tool("list_nodes", Arc::new(|args| Box::pin(async move { Ok(args) })));
    register_tool("converge_shard", Arc::new(|args| Box::pin(async move { Ok(args) })));
    register_tool("resolve_incident", Arc::new(|args| Box::pin(async move { Ok(args) })));

    let llm = Arc::new(ScriptedLlm {
        turns: vec![
            vec![("list_nodes", json!({ "shard_id": hostctl_types::EntityId::new().0.to_string() }))],
            vec![("converge_shard", json!({ "shard_id": hostctl_types::EntityId::new().0.to_string() }))],
            vec![("resolve_incident", json!({ "resolution": "restarted replication" }))],
        ],
        turn: AtomicUsize::new(0),
    });
    hostctl_activities::register_activity(hostctl_activities::llm::Chat::new(llm));
    hostctl_activities::register_activity(hostctl_activities::incident::SetIncidentStatus::new(core_db.clone()));
    hostctl_activities::register_activity(hostctl_activities::incident::InsertIncidentEvent::new(core_db.clone()));

    let tools = vec![
        ToolSpec { name: "list_nodes".to_string(), description: "list nodes".to_string(), parameters: json!({}) },
        ToolSpec { name: "converge_shard".to_string(), description: "converge".to_string(), parameters: json!({}) },
        ToolSpec {
            name: "resolve_incident".to_string(),
            description: "resolve".to_string(),
            parameters: json!({}),
        },
    ];

    let store: Arc<dyn hostctl_store_core::StorageBackend> = Arc::new(MemoryBackend::new());
    let mut executor = WorkflowExecutor::resume(store, format!("incident:{}", first.0)).await.unwrap();
    let outcome = InvestigateIncident::new(core_db.clone()).run(&mut executor, first, &tools, &bus).await.unwrap();

    let hint = match outcome {
        InvestigationOutcome::Resolved { hint } => hint,
        other => panic!("expected Resolved, got {other:?}"),
    };
    assert_eq!(&hint.tool_steps[..2], &["list_nodes".to_string(), "converge_shard".to_string()]);

    let timeline = core_db.incident_timeline(first).await.unwrap();
    let investigated =
        timeline.iter().filter(|e| matches!(e.action, hostctl_types::IncidentAction::Investigated)).count();
    assert_eq!(investigated, 2);
    assert!(timeline.iter().any(|e| matches!(e.action, hostctl_types::IncidentAction::Resolved)));
}

/// Scenario 5: a critical, unassigned incident past the 15-minute
/// threshold escalates and sends one webhook.
#[sqlx::test(migrations = "../hostctl-store-postgres/migrations")]
async fn overdue_critical_incident_escalates_and_fires_one_webhook(pool: PgPool) {
    let core_db = Arc::new(CoreDb::new(pool));
    let incident = Incident {
        id: hostctl_types::EntityId::new(),
        dedupe_key: "db:9/disk_full".to_string(),
        incident_type: "disk.full".to_string(),
        severity: IncidentSeverity::Critical,
        status: IncidentStatus::Open,
        title: "disk full".to_string(),
        detail: "root volume at 100%".to_string(),
        resource_type: Some("nodes".to_string()),
        resource_id: None,
        assigned_to: None,
        resolution: None,
        detected_at: Utc::now() - ChronoDuration::minutes(16),
        escalated_at: None,
        updated_at: Utc::now() - ChronoDuration::minutes(16),
    };
    core_db.create_or_dedupe_incident(&incident).await.unwrap();
    sqlx::query("UPDATE incidents SET updated_at = $1 WHERE id = $2")
        .bind(Utc::now() - ChronoDuration::minutes(15) - ChronoDuration::seconds(1))
        .bind(incident.id.0)
        .execute(core_db.pool())
        .await
        .unwrap();

    let webhook = Arc::new(FakeWebhook::default());
    let node_agent = Arc::new(FakeNodeAgent::default());
    let powerdns = Arc::new(FakePowerDns::default());
    let lb_dir = tempfile::tempdir().unwrap();
    wire_activities(core_db.clone(), powerdns, node_agent, false, webhook.clone(), lb_dir.path());

    let store: Arc<dyn hostctl_store_core::StorageBackend> = Arc::new(MemoryBackend::new());
    let mut executor = WorkflowExecutor::resume(store, "cron:incident-escalation:test".to_string()).await.unwrap();
    let pass = EscalationPass::new(core_db.clone(), "https://hooks.example/incidents");
    let report = pass.run(&mut executor).await.unwrap();
    assert!(report.escalated.contains(&incident.id));

    let row = sqlx::query("SELECT status, escalated_at FROM incidents WHERE id = $1")
        .bind(incident.id.0)
        .fetch_one(core_db.pool())
        .await
        .unwrap();
    let status: String = sqlx::Row::get(&row, "status");
    let escalated_at: Option<chrono::DateTime<Utc>> = sqlx::Row::get(&row, "escalated_at");
    assert_eq!(status, "escalated");
    assert!(escalated_at.is_some());

    let posts = webhook.posts.lock().await;
    assert_eq!(posts.len(), 1);
    assert!(posts[0].1.to_string().contains("incident.escalated"));
}

/// Scenario 6: a failed ACME finalize cleans up the HTTP-01 challenge
/// on every node, fails the certificate row, and raises an incident.
#[sqlx::test(migrations = "../hostctl-store-postgres/migrations")]
async fn acme_finalize_failure_cleans_up_and_raises_incident(pool: PgPool) {
    let core_db = Arc::new(CoreDb::new(pool));
    let (brand_id, cluster_id, shard_id) = insert_web_cluster_fixture(&core_db).await;
    let (tenant_id, _webroot_id, fqdn_id) =
        insert_tenant_webroot_fqdn(&core_db, brand_id, cluster_id, "secure.example.com", true).await;
    core_db.assign_tenant_shard_if_missing(tenant_id, shard_id).await.unwrap();

    let node_agent = Arc::new(FakeNodeAgent::default());
    let powerdns = Arc::new(FakePowerDns::default());
    let webhook = Arc::new(FakeWebhook::default());
    let lb_dir = tempfile::tempdir().unwrap();
    wire_activities(core_db.clone(), powerdns, node_agent.clone(), true, webhook, lb_dir.path());

    let certificate = hostctl_types::Certificate {
        id: hostctl_types::EntityId::new(),
        fqdn_id,
        cert_type: hostctl_types::CertificateType::LetsEncrypt,
        cert_pem: None,
        key_pem: None,
        chain_pem: None,
        is_active: false,
        expires_at: None,
        status: ResourceStatus::Pending,
    };
    core_db.insert_certificate(&certificate).await.unwrap();

    let store: Arc<dyn hostctl_store_core::StorageBackend> = Arc::new(MemoryBackend::new());
    let bus = InMemoryBus::new(64);
    let mut executor =
        WorkflowExecutor::resume(store, format!("resource:certificate:{}", certificate.id.0)).await.unwrap();
    CertificateWorkflow::new(core_db.clone())
        .run(&mut executor, fqdn_id, certificate.id, &bus)
        .await
        .unwrap();

    let calls = node_agent.calls.lock().await;
    assert!(calls.iter().any(|(_, method, _)| method == "cleanup_http01_challenge"));

    let row = sqlx::query("SELECT status FROM certificates WHERE id = $1")
        .bind(certificate.id.0)
        .fetch_one(core_db.pool())
        .await
        .unwrap();
    let status: String = sqlx::Row::get(&row, "status");
    assert_eq!(status, "failed");

    let incident_row = sqlx::query("SELECT incident_type FROM incidents WHERE dedupe_key = $1")
        .bind(format!("certificate.issuance_failed:{}", certificate.id.0))
        .fetch_one(core_db.pool())
        .await
        .unwrap();
    let incident_type: String = sqlx::Row::get(&incident_row, "incident_type");
    assert_eq!(incident_type, "certificate.issuance_failed");
}
