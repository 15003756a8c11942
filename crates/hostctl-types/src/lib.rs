#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **hostctl-types** – Shared domain primitives for the hostctl orchestration core.
//!
//! The crate is dependency-light and sits at the bottom of the crate graph so
//! that every other crate can depend on it without cycles. It describes the
//! entities of §3 of the control-plane specification (tenants, shards,
//! webroots, certificates, incidents, …) and the identifiers used to name
//! durable workflows and task queues. It makes no assumptions about I/O,
//! storage, or cryptography.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Capability-token primitives shared by `hostctl-auth` and the engine.
pub mod traits;
pub use traits::{Claims, CapabilityToken, TokenValidator, CapabilityError, CapResult};

//─────────────────────────────
//  Security constants
//─────────────────────────────

/// Maximum allowed length for a resource status message.
pub const MAX_STATUS_MESSAGE_LEN: usize = 4096;
/// Maximum allowed length for an FQDN.
pub const MAX_FQDN_LEN: usize = 253;
/// Maximum allowed length for a capability token string.
pub const MAX_CAPABILITY_TOKEN_LEN: usize = 8192;
/// Maximum allowed size for an incident title.
pub const MAX_INCIDENT_TITLE_LEN: usize = 512;
/// Maximum allowed size for incident/activity detail blobs.
pub const MAX_DETAIL_LEN: usize = 65_536;

//─────────────────────────────
//  Identifiers
//─────────────────────────────

/// Unique identifier for any row-backed entity in the core DB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

//─────────────────────────────
//  Resource lifecycle status
//─────────────────────────────

/// Canonical resource lifecycle status, shared by every resource kind in §3.
///
/// Transitions: `Pending -> Provisioning -> Active -> {Suspended, Updating,
/// Deleting, Failed}`. `Deleting` is a soft-delete marker; a hard row delete
/// follows once the delete workflow's side effects are cleaned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Row created by the API, no workflow has started yet.
    Pending,
    /// A create/update workflow is actively driving side effects.
    Provisioning,
    /// Side effects complete and verified; the resource serves traffic.
    Active,
    /// Administratively disabled; side effects remain in place.
    Suspended,
    /// An update workflow is actively driving side effects.
    Updating,
    /// A delete workflow is actively reversing side effects (soft-delete).
    Deleting,
    /// Hard-deleted; rows in this status are not expected to be observed,
    /// they exist only as the terminal value passed to `UpdateResourceStatus`.
    Deleted,
    /// A workflow failed terminally; `status_message` carries detail.
    Failed,
}

impl ResourceStatus {
    /// String form used in core-DB enum columns (§6).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Updating => "updating",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//─────────────────────────────
//  Brand / Tenant / Cluster / Shard / Node
//─────────────────────────────

/// A brand owns tenants and zones and carries the default mail DNS policy
/// (SPF/DKIM/DMARC) new zones inherit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brand {
    /// Primary key.
    pub id: EntityId,
    /// Globally unique base hostname, e.g. `example-hosting.net`.
    pub base_hostname: String,
    /// SPF policy string applied to brand-managed zones.
    pub spf_policy: String,
    /// DKIM selector used for brand-managed mail.
    pub dkim_selector: String,
    /// DMARC policy string applied to brand-managed zones.
    pub dmarc_policy: String,
}

/// A hosting customer; owner of webroots, databases, and the other
/// tenant-scoped resources in §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    /// Primary key.
    pub id: EntityId,
    /// Owning brand.
    pub brand_id: EntityId,
    /// Owning cluster.
    pub cluster_id: EntityId,
    /// Web shard the tenant is bound to; unset until the first web-bound
    /// resource is created, then assigned exactly once.
    pub shard_id: Option<EntityId>,
    /// POSIX uid on cluster nodes; unique within the cluster.
    pub uid: i64,
    /// Lifecycle status.
    pub status: ResourceStatus,
    /// Reason recorded when `status == Suspended`.
    pub suspend_reason: Option<String>,
}

impl Tenant {
    /// Validate cross-field invariants ahead of a DB write.
    pub fn validate(&self) -> Result<(), String> {
        if self.uid < 0 {
            return Err("tenant uid must be non-negative".into());
        }
        Ok(())
    }
}

/// A deployment region's cluster: the HAProxy container, mail hostname, and
/// Stalwart base URL shared by every shard/node inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Primary key.
    pub id: EntityId,
    /// Region identifier; at most one cluster per region per deployment.
    pub region_id: String,
    /// HAProxy runtime-API container reference.
    pub haproxy_container: String,
    /// Stalwart mail backend base URL.
    pub stalwart_url: String,
    /// Cluster-wide mail hostname used in MX/HELO.
    pub mail_hostname: String,
}

/// Role a shard plays within its cluster; determines which convergence
/// workflow and node-agent contracts apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardRole {
    /// Web application nodes (nginx, runtimes, daemons, cron).
    Web,
    /// Relational database nodes.
    Database,
    /// Authoritative DNS (PowerDNS) nodes.
    Dns,
    /// Mail (Stalwart) nodes.
    Email,
    /// Valkey/Redis-compatible cache nodes.
    Valkey,
    /// S3-compatible object storage nodes.
    S3,
    /// Load-balancer nodes (HAProxy).
    Lb,
}

impl ShardRole {
    /// String form used in core-DB enum columns.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Database => "database",
            Self::Dns => "dns",
            Self::Email => "email",
            Self::Valkey => "valkey",
            Self::S3 => "s3",
            Self::Lb => "lb",
        }
    }
}

/// A group of nodes of identical role within a cluster; the convergence unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shard {
    /// Primary key.
    pub id: EntityId,
    /// Owning cluster.
    pub cluster_id: EntityId,
    /// Shard role.
    pub role: ShardRole,
    /// HAProxy backend name; required and unique when `role == Web`.
    pub lb_backend: Option<String>,
    /// Opaque JSON configuration blob (role-specific).
    pub config: serde_json::Value,
    /// Convergence status, distinct from `ResourceStatus`: a shard is always
    /// either idle or mid-converge.
    pub status: ShardStatus,
}

/// Convergence status of a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    /// No converge workflow currently running.
    Active,
    /// A converge workflow holds `converge:<shard_id>`.
    Converging,
    /// Converge workflow failed; see incident log for detail.
    Failed,
}

/// A single node inside a cluster; assigned to shards via a dense
/// `shard_index` within each shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Primary key.
    pub id: EntityId,
    /// Owning cluster.
    pub cluster_id: EntityId,
    /// DNS hostname.
    pub hostname: String,
    /// IPv4 address, if any.
    pub ip: Option<std::net::Ipv4Addr>,
    /// IPv6 address, if any.
    pub ip6: Option<std::net::Ipv6Addr>,
    /// Roles this node serves (a node may belong to more than one shard role
    /// in small deployments).
    pub roles: Vec<ShardRole>,
    /// Whether the node is currently reachable.
    pub status: NodeStatus,
    /// Timestamp of the last successful health probe.
    pub last_health_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Health status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Responding to health probes.
    Healthy,
    /// Missed recent health probes; excluded from new fan-out.
    Unhealthy,
    /// Administratively drained.
    Draining,
}

/// A node's dense position within one shard's convergence fan-out order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeShardAssignment {
    /// The shard.
    pub shard_id: EntityId,
    /// The node.
    pub node_id: EntityId,
    /// Dense index within the shard, starting at 0.
    pub shard_index: i32,
}

//─────────────────────────────
//  Webroot / FQDN / Certificate
//─────────────────────────────

/// A runtime-configured document root: env file, FQDNs, daemons, cron jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webroot {
    /// Primary key.
    pub id: EntityId,
    /// Owning tenant.
    pub tenant_id: EntityId,
    /// Application runtime identifier (e.g. `php-8.3`, `node-20`, `static`).
    pub runtime: String,
    /// Runtime version string.
    pub version: String,
    /// Public document root relative to the tenant home.
    pub public_folder: String,
    /// Filename of the generated env file.
    pub env_file_name: String,
    /// Whether a `<webroot>.<node>.hostctl` internal hostname is exposed.
    pub service_hostname_enabled: bool,
    /// Lifecycle status.
    pub status: ResourceStatus,
}

/// A fully-qualified domain name bound to a webroot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fqdn {
    /// Primary key.
    pub id: EntityId,
    /// Globally unique FQDN string.
    pub fqdn: String,
    /// Owning webroot.
    pub webroot_id: EntityId,
    /// Whether TLS termination is requested for this FQDN.
    pub ssl_enabled: bool,
    /// Lifecycle status.
    pub status: ResourceStatus,
}

impl Fqdn {
    /// Validate the FQDN string length and basic shape.
    pub fn validate(&self) -> Result<(), String> {
        if self.fqdn.is_empty() || self.fqdn.len() > MAX_FQDN_LEN {
            return Err(format!("fqdn length out of bounds: {}", self.fqdn.len()));
        }
        Ok(())
    }
}

/// Certificate type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateType {
    /// Issued via the ACME HTTP-01 workflow.
    LetsEncrypt,
    /// Uploaded by the tenant/admin.
    Custom,
}

/// A certificate for an FQDN. At most one row per FQDN has `is_active = true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    /// Primary key.
    pub id: EntityId,
    /// Owning FQDN.
    pub fqdn_id: EntityId,
    /// Issuance type.
    pub cert_type: CertificateType,
    /// PEM-encoded leaf + intermediate chain.
    pub cert_pem: Option<String>,
    /// PEM-encoded private key.
    pub key_pem: Option<String>,
    /// PEM-encoded full chain (leaf omitted).
    pub chain_pem: Option<String>,
    /// Whether this row is the one currently installed/served.
    pub is_active: bool,
    /// Leaf `NotAfter`, parsed at `StoreCertificate` time.
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Lifecycle status (the ACME state machine of §4.3 drives this).
    pub status: ResourceStatus,
}

//─────────────────────────────
//  Database / Valkey / S3
//─────────────────────────────

/// A tenant-owned relational database instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Database {
    /// Primary key.
    pub id: EntityId,
    /// Owning tenant.
    pub tenant_id: EntityId,
    /// Owning database shard.
    pub shard_id: EntityId,
    /// Schema/database name on the node.
    pub name: String,
    /// Lifecycle status.
    pub status: ResourceStatus,
}

/// A login/user on a `Database`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseUser {
    /// Primary key.
    pub id: EntityId,
    /// Owning database.
    pub database_id: EntityId,
    /// Username.
    pub username: String,
    /// Lifecycle status.
    pub status: ResourceStatus,
}

/// A tenant-owned Valkey/Redis-compatible instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValkeyInstance {
    /// Primary key.
    pub id: EntityId,
    /// Owning tenant.
    pub tenant_id: EntityId,
    /// Owning valkey shard.
    pub shard_id: EntityId,
    /// Lifecycle status.
    pub status: ResourceStatus,
}

/// An ACL user on a `ValkeyInstance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValkeyUser {
    /// Primary key.
    pub id: EntityId,
    /// Owning instance.
    pub instance_id: EntityId,
    /// Username.
    pub username: String,
    /// Lifecycle status.
    pub status: ResourceStatus,
}

/// A tenant-owned S3-compatible bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Bucket {
    /// Primary key.
    pub id: EntityId,
    /// Owning tenant.
    pub tenant_id: EntityId,
    /// Owning S3 shard.
    pub shard_id: EntityId,
    /// Bucket name.
    pub name: String,
    /// Lifecycle status.
    pub status: ResourceStatus,
}

/// An access key on an `S3Bucket`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Key {
    /// Primary key.
    pub id: EntityId,
    /// Owning bucket.
    pub bucket_id: EntityId,
    /// Access key id.
    pub access_key_id: String,
    /// Lifecycle status.
    pub status: ResourceStatus,
}

//─────────────────────────────
//  Cron / Daemon / SSH key
//─────────────────────────────

/// A scheduled command run on behalf of a webroot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJob {
    /// Primary key.
    pub id: EntityId,
    /// Owning webroot.
    pub webroot_id: EntityId,
    /// Cron schedule expression.
    pub schedule: String,
    /// Shell command to execute.
    pub command: String,
    /// Lifecycle status.
    pub status: ResourceStatus,
}

/// A long-running background process managed alongside a webroot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Daemon {
    /// Primary key.
    pub id: EntityId,
    /// Owning webroot.
    pub webroot_id: EntityId,
    /// Shell command to execute.
    pub command: String,
    /// TCP port the daemon listens on, if it is proxied.
    pub proxy_port: Option<u16>,
    /// Lifecycle status.
    pub status: ResourceStatus,
}

/// An SSH public key authorized for a tenant's uid on every node in its
/// web shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshKey {
    /// Primary key.
    pub id: EntityId,
    /// Owning tenant.
    pub tenant_id: EntityId,
    /// OpenSSH public-key line.
    pub public_key: String,
    /// Lifecycle status.
    pub status: ResourceStatus,
}

/// One environment variable belonging to a webroot, stored encrypted
/// under the owning tenant's DEK (`encryption_keys.encrypted_dek`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Primary key.
    pub id: EntityId,
    /// Owning webroot.
    pub webroot_id: EntityId,
    /// Variable name.
    pub name: String,
    /// Ciphertext, opaque to the core DB — only a holder of the
    /// unwrapped tenant DEK can decrypt it.
    pub encrypted_value: Vec<u8>,
}

//─────────────────────────────
//  DNS: Zone / ZoneRecord
//─────────────────────────────

/// A DNS zone; name unique across the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// Primary key.
    pub id: EntityId,
    /// Owning brand.
    pub brand_id: EntityId,
    /// Owning tenant, if this is a tenant-delegated zone.
    pub tenant_id: Option<EntityId>,
    /// Zone apex name, e.g. `example.com`.
    pub name: String,
}

/// Who materialized a DNS record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagedBy {
    /// Materialized by the platform from another resource's state.
    Auto,
    /// Created directly by a tenant or admin.
    Custom,
}

/// A single DNS resource record row. Custom rows always win over auto rows
/// for the same `(name, type)` key (§4.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneRecord {
    /// Primary key.
    pub id: EntityId,
    /// Owning zone.
    pub zone_id: EntityId,
    /// Record type, e.g. `A`, `AAAA`, `MX`, `TXT`, `CNAME`.
    pub record_type: String,
    /// Record owner name (relative or FQDN, zone-dependent convention).
    pub name: String,
    /// Record content/RDATA.
    pub content: String,
    /// Time-to-live in seconds.
    pub ttl: i32,
    /// Priority, meaningful for MX.
    pub priority: Option<i32>,
    /// Auto vs. custom provenance.
    pub managed_by: ManagedBy,
    /// For `auto` rows, the kind of source resource that produced it
    /// (e.g. `fqdn`, `email_account`).
    pub source_type: Option<String>,
    /// For `auto` rows, the FQDN that produced it, if applicable.
    pub source_fqdn_id: Option<EntityId>,
    /// Lifecycle status.
    pub status: ResourceStatus,
}

//─────────────────────────────
//  Email
//─────────────────────────────

/// A mailbox on a brand/zone's mail domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailAccount {
    /// Primary key.
    pub id: EntityId,
    /// Owning tenant.
    pub tenant_id: EntityId,
    /// Local part, e.g. `billing`.
    pub local_part: String,
    /// Domain part, e.g. `example.com`.
    pub domain: String,
    /// Lifecycle status.
    pub status: ResourceStatus,
}

/// An additional address delivered into the same mailbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailAlias {
    /// Primary key.
    pub id: EntityId,
    /// Owning account.
    pub account_id: EntityId,
    /// Alias address.
    pub address: String,
    /// Lifecycle status.
    pub status: ResourceStatus,
}

/// A forward of an account's mail to an external address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailForward {
    /// Primary key.
    pub id: EntityId,
    /// Owning account.
    pub account_id: EntityId,
    /// Destination address.
    pub destination: String,
    /// Whether the original is also kept in the mailbox.
    pub keep_copy: bool,
    /// Lifecycle status.
    pub status: ResourceStatus,
}

/// A vacation/autoreply responder configured on an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailAutoreply {
    /// Primary key.
    pub id: EntityId,
    /// Owning account.
    pub account_id: EntityId,
    /// Subject line of the autoreply.
    pub subject: String,
    /// Body of the autoreply.
    pub body: String,
    /// Lifecycle status.
    pub status: ResourceStatus,
}

//─────────────────────────────
//  Backup
//─────────────────────────────

/// A point-in-time backup of a tenant-owned resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    /// Primary key.
    pub id: EntityId,
    /// Owning tenant.
    pub tenant_id: EntityId,
    /// Kind of resource captured (`database`, `webroot`, `valkey`, …).
    pub resource_kind: String,
    /// The captured resource's id.
    pub resource_id: EntityId,
    /// Opaque storage location (object-store key or node path).
    pub location: String,
    /// Lifecycle status.
    pub status: ResourceStatus,
    /// When this backup was captured, for the retention cron pass.
    pub created_at: chrono::DateTime<chrono::Utc>,
}

//─────────────────────────────
//  Incidents
//─────────────────────────────

/// Incident severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentSeverity {
    /// Lowest urgency; informational only.
    Info,
    /// Non-urgent degradation.
    Warning,
    /// Urgent; escalates fastest.
    Critical,
}

/// Incident lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    /// Raised, unassigned.
    Open,
    /// Claimed by the investigation agent.
    Investigating,
    /// A remediation tool call is in flight.
    Remediating,
    /// Closed by auto-resolve or the agent.
    Resolved,
    /// Escalated to a human via webhook.
    Escalated,
    /// Manually cancelled.
    Cancelled,
}

impl IncidentStatus {
    /// Whether this status is terminal (excluded from dedupe and claiming).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Cancelled)
    }
}

/// A durable record of a detected anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Primary key.
    pub id: EntityId,
    /// Stable key used for deduplication; open at most once.
    pub dedupe_key: String,
    /// Dotted incident type, e.g. `certificate.issuance_failed`.
    pub incident_type: String,
    /// Severity.
    pub severity: IncidentSeverity,
    /// Lifecycle status.
    pub status: IncidentStatus,
    /// Short human-readable title.
    pub title: String,
    /// Free-form detail, often the triggering error message.
    pub detail: String,
    /// Resource kind this incident concerns, if any.
    pub resource_type: Option<String>,
    /// Resource id this incident concerns, if any.
    pub resource_id: Option<EntityId>,
    /// Current assignee (`agent:incident-investigator` or an admin handle).
    pub assigned_to: Option<String>,
    /// Final resolution text, set when `status == Resolved`.
    pub resolution: Option<String>,
    /// When the incident was first raised.
    pub detected_at: chrono::DateTime<chrono::Utc>,
    /// When the incident was escalated, if it was.
    pub escalated_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Last-modified timestamp; drives the escalation cron thresholds.
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Incident {
    /// Validate field lengths ahead of a DB write.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.len() > MAX_INCIDENT_TITLE_LEN {
            return Err("incident title too long".into());
        }
        if self.detail.len() > MAX_DETAIL_LEN {
            return Err("incident detail too long".into());
        }
        Ok(())
    }
}

/// The action an `IncidentEvent` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentAction {
    /// The incident was opened.
    Created,
    /// The agent took an investigation step.
    Investigated,
    /// A comment was appended (agent or admin acknowledgement).
    Commented,
    /// A message arrived from an admin operator mid-investigation.
    AdminMessage,
    /// The incident was resolved.
    Resolved,
    /// The incident was escalated.
    Escalated,
}

/// An append-only event in an incident's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentEvent {
    /// Primary key.
    pub id: EntityId,
    /// Owning incident.
    pub incident_id: EntityId,
    /// Who performed the action (`agent:incident-investigator`, an admin
    /// handle, or a subsystem name for `created`).
    pub actor: String,
    /// What happened.
    pub action: IncidentAction,
    /// Free-form detail text.
    pub detail: String,
    /// Structured metadata (tool name/args/result, escalation channel, …).
    pub metadata: serde_json::Value,
    /// When the event was recorded.
    pub created_at: chrono::DateTime<chrono::Utc>,
}

//─────────────────────────────
//  Encryption
//─────────────────────────────

/// A tenant's data-encryption-key, itself wrapped by the process-wide KEK.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptionKey {
    /// Owning tenant.
    pub tenant_id: EntityId,
    /// DEK ciphertext, wrapped under the process KEK.
    pub encrypted_dek: Vec<u8>,
}

//─────────────────────────────
//  Task queue locality & workflow-ID uniqueness (§4.7)
//─────────────────────────────

/// Where an activity must be dispatched, encoded into a task-queue name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Locality {
    /// Cluster-wide activities: core DB, PowerDNS, webhook, callback, LLM.
    Core,
    /// Cluster-local: LB map edits, ACME HTTP client.
    Cluster(EntityId),
    /// Shard-level pacing (convergence).
    Shard(EntityId),
    /// A specific node: filesystem/process/certificate activities.
    Node(EntityId),
}

impl Locality {
    /// Render the task-queue name this locality dispatches to.
    pub fn queue_name(&self) -> String {
        match self {
            Self::Core => "core".to_string(),
            Self::Cluster(id) => format!("cluster:{id}"),
            Self::Shard(id) => format!("shard:{id}"),
            Self::Node(id) => format!("node:{id}"),
        }
    }
}

/// Build the workflow-ID for a resource create/update/delete workflow:
/// `resource:<kind>:<id>`. At most one such workflow may be in flight.
pub fn resource_workflow_id(kind: &str, id: EntityId) -> String {
    format!("resource:{kind}:{id}")
}

/// Build the workflow-ID for a shard converge workflow: `converge:<shard_id>`.
pub fn converge_workflow_id(shard_id: EntityId) -> String {
    format!("converge:{shard_id}")
}

/// Build the workflow-ID for an incident investigator: `incident:<id>`.
pub fn incident_workflow_id(incident_id: EntityId) -> String {
    format!("incident:{incident_id}")
}

/// Build the workflow-ID for a named periodic job: `cron:<name>`.
pub fn cron_workflow_id(name: &str) -> String {
    format!("cron:{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_status_round_trips_through_json() {
        let s = ResourceStatus::Provisioning;
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "\"provisioning\"");
        let back: ResourceStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn workflow_ids_match_spec_naming() {
        let id = EntityId(Uuid::nil());
        assert_eq!(resource_workflow_id("webroot", id), format!("resource:webroot:{id}"));
        assert_eq!(converge_workflow_id(id), format!("converge:{id}"));
        assert_eq!(incident_workflow_id(id), format!("incident:{id}"));
        assert_eq!(cron_workflow_id("escalation"), "cron:escalation");
    }

    #[test]
    fn locality_queue_names_encode_cluster_role_node() {
        let id = EntityId(Uuid::nil());
        assert_eq!(Locality::Core.queue_name(), "core");
        assert_eq!(Locality::Cluster(id).queue_name(), format!("cluster:{id}"));
        assert_eq!(Locality::Shard(id).queue_name(), format!("shard:{id}"));
        assert_eq!(Locality::Node(id).queue_name(), format!("node:{id}"));
    }

    #[test]
    fn incident_status_terminal_classification() {
        assert!(IncidentStatus::Resolved.is_terminal());
        assert!(IncidentStatus::Cancelled.is_terminal());
        assert!(!IncidentStatus::Open.is_terminal());
        assert!(!IncidentStatus::Escalated.is_terminal());
    }

    #[test]
    fn fqdn_validation_rejects_oversized_names() {
        let f = Fqdn {
            id: EntityId::new(),
            fqdn: "a".repeat(MAX_FQDN_LEN + 1),
            webroot_id: EntityId::new(),
            ssl_enabled: true,
            status: ResourceStatus::Pending,
        };
        assert!(f.validate().is_err());
    }
}
