//! Relational repository layer over the control-plane's core entities (§3).
//!
//! `CoreDb` is the system of record resource workflows, convergence
//! workflows, and the incident subsystem read and write through. PowerDNS
//! keeps its own copy of zone data for query-time serving; this layer is
//! what convergence reconciles PowerDNS against, never the reverse.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use hostctl_types::{
    Backup, Brand, Certificate, Cluster, CronJob, Daemon, Database, DatabaseUser, EmailAccount,
    EmailAlias, EmailAutoreply, EmailForward, EncryptionKey, EntityId, EnvVar, Fqdn, Incident,
    IncidentEvent, IncidentStatus, Node, NodeShardAssignment, ResourceStatus, S3Bucket, S3Key,
    Shard, ShardStatus, SshKey, Tenant, ValkeyInstance, ValkeyUser, Webroot, Zone, ZoneRecord,
};

/// Errors raised by the core-DB repository layer.
#[derive(Debug, thiserror::Error)]
pub enum CoreDbError {
    /// The underlying SQL query failed.
    #[error("database query failed: {0}")]
    Query(#[from] sqlx::Error),
    /// A row existed but failed to decode into its domain type (an
    /// unrecognized status string, for instance).
    #[error("failed to decode row: {0}")]
    Decode(String),
    /// The referenced row does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Entity kind, e.g. `"webroot"`.
        kind: &'static str,
        /// Entity id.
        id: EntityId,
    },
}

type Result<T> = std::result::Result<T, CoreDbError>;

fn parse_status(raw: &str) -> std::result::Result<ResourceStatus, CoreDbError> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|e| CoreDbError::Decode(e.to_string()))
}

/// Render an enum to the exact `snake_case` wire string its
/// `#[serde(rename_all = "snake_case")]` derive produces — `Debug`
/// lowercased would mangle multi-word variants like `LetsEncrypt`.
fn snake<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value).expect("enum serialization is infallible") {
        serde_json::Value::String(s) => s,
        other => unreachable!("expected a string serde representation, got {other:?}"),
    }
}

fn parse_enum<T: for<'de> serde::Deserialize<'de>>(
    raw: String,
) -> std::result::Result<T, CoreDbError> {
    serde_json::from_value(serde_json::Value::String(raw)).map_err(|e| CoreDbError::Decode(e.to_string()))
}

/// Relational repository over the control-plane's core entities.
///
/// Every method here is a thin, single-purpose query: the durability and
/// retry semantics belong to the activities that call through this layer
/// (`hostctl-activities`), not to the repository itself — an activity
/// retries the whole call on transient failure, and at-most-once execution
/// is guaranteed by the caller's idempotency key, not by anything here.
#[derive(Debug, Clone)]
pub struct CoreDb {
    pool: PgPool,
}

impl CoreDb {
    /// Wrap an already-connected, already-migrated pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Borrow the underlying pool, e.g. to share a transaction across two
    /// repository calls from an activity that must commit atomically.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    //── Brand / Cluster ──────────────────────────────────────────────

    /// Insert a brand.
    pub async fn insert_brand(&self, brand: &Brand) -> Result<()> {
        sqlx::query(
            "INSERT INTO brands (id, base_hostname, spf_policy, dkim_selector, dmarc_policy)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(brand.id.0)
        .bind(&brand.base_hostname)
        .bind(&brand.spf_policy)
        .bind(&brand.dkim_selector)
        .bind(&brand.dmarc_policy)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a brand by id — the web-shard converge's source for the
    /// internal `<webroot>.<node>.<base_hostname>` service hostname.
    pub async fn get_brand(&self, id: EntityId) -> Result<Brand> {
        let row = sqlx::query("SELECT id, base_hostname, spf_policy, dkim_selector, dmarc_policy FROM brands WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CoreDbError::NotFound { kind: "brand", id })?;

        Ok(Brand {
            id: EntityId(row.get("id")),
            base_hostname: row.get("base_hostname"),
            spf_policy: row.get("spf_policy"),
            dkim_selector: row.get("dkim_selector"),
            dmarc_policy: row.get("dmarc_policy"),
        })
    }

    /// Insert a cluster.
    pub async fn insert_cluster(&self, cluster: &Cluster) -> Result<()> {
        sqlx::query(
            "INSERT INTO clusters (id, region_id, haproxy_container, stalwart_url, mail_hostname)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(cluster.id.0)
        .bind(&cluster.region_id)
        .bind(&cluster.haproxy_container)
        .bind(&cluster.stalwart_url)
        .bind(&cluster.mail_hostname)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    //── Shard / Node ─────────────────────────────────────────────────

    /// Insert a shard.
    pub async fn insert_shard(&self, shard: &Shard) -> Result<()> {
        sqlx::query(
            "INSERT INTO shards (id, cluster_id, role, lb_backend, config, status)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(shard.id.0)
        .bind(shard.cluster_id.0)
        .bind(shard.role.as_str())
        .bind(&shard.lb_backend)
        .bind(&shard.config)
        .bind(snake(&shard.status))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Find the shard of a given role in a cluster with the fewest assigned
    /// nodes, excluding soft-deleted shards (§9 Open Question resolution:
    /// `status != 'deleted'` is the selection filter; a shard can still
    /// oscillate between two equally-loaded candidates across repeated
    /// assignments, a documented known limitation rather than a bug).
    pub async fn shard_with_fewest_nodes(
        &self,
        cluster_id: EntityId,
        role: &str,
    ) -> Result<Option<EntityId>> {
        let row = sqlx::query(
            r#"
            SELECT s.id
            FROM shards s
            LEFT JOIN node_shard_assignments nsa ON nsa.shard_id = s.id
            WHERE s.cluster_id = $1 AND s.role = $2 AND s.status != 'deleted'
            GROUP BY s.id
            ORDER BY COUNT(nsa.node_id) ASC, s.id ASC
            LIMIT 1
            "#,
        )
        .bind(cluster_id.0)
        .bind(role)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| EntityId(r.get("id"))))
    }

    /// Find the shard of a given role in a cluster with the fewest
    /// tenants already assigned to it — the selector a webroot create
    /// workflow uses to give a tenant its first web shard.
    pub async fn shard_with_fewest_tenants(
        &self,
        cluster_id: EntityId,
        role: &str,
    ) -> Result<Option<EntityId>> {
        let row = sqlx::query(
            r#"
            SELECT s.id
            FROM shards s
            LEFT JOIN tenants t ON t.shard_id = s.id AND t.status != 'deleted'
            WHERE s.cluster_id = $1 AND s.role = $2 AND s.status != 'deleted'
            GROUP BY s.id
            ORDER BY COUNT(t.id) ASC, s.id ASC
            LIMIT 1
            "#,
        )
        .bind(cluster_id.0)
        .bind(role)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| EntityId(r.get("id"))))
    }

    /// Assign a tenant to a shard, if it doesn't already have one.
    pub async fn assign_tenant_shard_if_missing(&self, tenant_id: EntityId, shard_id: EntityId) -> Result<()> {
        sqlx::query("UPDATE tenants SET shard_id = $1 WHERE id = $2 AND shard_id IS NULL")
            .bind(shard_id.0)
            .bind(tenant_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fetch a shard by id.
    pub async fn get_shard(&self, id: EntityId) -> Result<Shard> {
        let row = sqlx::query(
            "SELECT id, cluster_id, role, lb_backend, config, status FROM shards WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(CoreDbError::NotFound { kind: "shard", id })?;

        Ok(Shard {
            id: EntityId(row.get("id")),
            cluster_id: EntityId(row.get("cluster_id")),
            role: serde_json::from_value(serde_json::Value::String(row.get("role")))
                .map_err(|e| CoreDbError::Decode(e.to_string()))?,
            lb_backend: row.get("lb_backend"),
            config: row.get("config"),
            status: serde_json::from_value(serde_json::Value::String(row.get("status")))
                .map_err(|e| CoreDbError::Decode(e.to_string()))?,
        })
    }

    /// Fetch a single node by id, for resolving an RPC target address.
    pub async fn get_node(&self, node_id: EntityId) -> Result<Node> {
        let row = sqlx::query(
            r#"
            SELECT id, cluster_id, hostname, ip, ip6, roles, status, last_health_at
            FROM nodes WHERE id = $1
            "#,
        )
        .bind(node_id.0)
        .fetch_one(&self.pool)
        .await?;

        row_to_node(row)
    }

    /// Fetch every node assigned to a shard, in assignment order —
    /// convergence fans out apply calls to these in parallel.
    pub async fn nodes_for_shard(&self, shard_id: EntityId) -> Result<Vec<Node>> {
        let rows = sqlx::query(
            r#"
            SELECT n.id, n.cluster_id, n.hostname, n.ip, n.ip6, n.roles, n.status, n.last_health_at
            FROM nodes n
            JOIN node_shard_assignments nsa ON nsa.node_id = n.id
            WHERE nsa.shard_id = $1
            ORDER BY nsa.shard_index ASC
            "#,
        )
        .bind(shard_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_node).collect()
    }

    /// Insert a node.
    pub async fn insert_node(&self, node: &Node) -> Result<()> {
        let roles: Vec<String> = node.roles.iter().map(|r| r.as_str().to_string()).collect();
        sqlx::query(
            r#"
            INSERT INTO nodes (id, cluster_id, hostname, ip, ip6, roles, status, last_health_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(node.id.0)
        .bind(node.cluster_id.0)
        .bind(&node.hostname)
        .bind(node.ip.map(|ip| ip.to_string()))
        .bind(node.ip6.map(|ip| ip.to_string()))
        .bind(&roles)
        .bind(snake(&node.status))
        .bind(node.last_health_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Assign a node to a shard at the given index.
    pub async fn assign_node_to_shard(&self, assignment: &NodeShardAssignment) -> Result<()> {
        sqlx::query(
            "INSERT INTO node_shard_assignments (shard_id, node_id, shard_index)
             VALUES ($1, $2, $3)",
        )
        .bind(assignment.shard_id.0)
        .bind(assignment.node_id.0)
        .bind(assignment.shard_index)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// List every node whose last heartbeat is older than `stale_before`,
    /// for the unhealthy-node-scan cron workflow.
    pub async fn stale_nodes(&self, stale_before: DateTime<Utc>) -> Result<Vec<Node>> {
        let rows = sqlx::query(
            r#"
            SELECT id, cluster_id, hostname, ip, ip6, roles, status, last_health_at
            FROM nodes
            WHERE status = 'healthy' AND (last_health_at IS NULL OR last_health_at < $1)
            "#,
        )
        .bind(stale_before)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_node).collect()
    }

    //── Tenant ───────────────────────────────────────────────────────

    /// Insert a tenant.
    pub async fn insert_tenant(&self, tenant: &Tenant) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tenants (id, brand_id, cluster_id, shard_id, uid, status, suspend_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(tenant.id.0)
        .bind(tenant.brand_id.0)
        .bind(tenant.cluster_id.0)
        .bind(tenant.shard_id.map(|s| s.0))
        .bind(tenant.uid)
        .bind(snake(&tenant.status))
        .bind(&tenant.suspend_reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a tenant by id.
    pub async fn get_tenant(&self, id: EntityId) -> Result<Tenant> {
        let row = sqlx::query(
            "SELECT id, brand_id, cluster_id, shard_id, uid, status, suspend_reason
             FROM tenants WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(CoreDbError::NotFound { kind: "tenant", id })?;

        Ok(Tenant {
            id: EntityId(row.get("id")),
            brand_id: EntityId(row.get("brand_id")),
            cluster_id: EntityId(row.get("cluster_id")),
            shard_id: row.get::<Option<Uuid>, _>("shard_id").map(EntityId),
            uid: row.get("uid"),
            status: parse_status(row.get("status"))?,
            suspend_reason: row.get("suspend_reason"),
        })
    }

    //── Generic status update helper ────────────────────────────────

    /// Update the lifecycle status column for a given entity table and row.
    ///
    /// Every hosted-resource table shares the same `status` column
    /// vocabulary (§3), so a single parameterized UPDATE covers webroots,
    /// fqdns, certificates, databases, and the rest, rather than a
    /// hand-written setter per table. `status == Active` clears any
    /// previously recorded `status_message`; `status == Deleted`
    /// hard-deletes the row instead of updating it, per the
    /// `UpdateResourceStatus` activity contract.
    pub async fn update_status(
        &self,
        table: &'static str,
        id: EntityId,
        status: ResourceStatus,
    ) -> Result<()> {
        self.update_status_with_message(table, id, status, None).await
    }

    /// Like [`Self::update_status`] but carrying the optional status
    /// message the `UpdateResourceStatus` activity accepts.
    pub async fn update_status_with_message(
        &self,
        table: &'static str,
        id: EntityId,
        status: ResourceStatus,
        status_message: Option<&str>,
    ) -> Result<()> {
        if status == ResourceStatus::Deleted {
            let sql = format!("DELETE FROM {table} WHERE id = $1");
            let result = sqlx::query(&sql).bind(id.0).execute(&self.pool).await?;
            if result.rows_affected() == 0 {
                return Err(CoreDbError::NotFound { kind: table, id });
            }
            return Ok(());
        }

        let message = if status == ResourceStatus::Active { None } else { status_message };
        let sql = format!("UPDATE {table} SET status = $1, status_message = $2 WHERE id = $3");
        let result = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(message)
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreDbError::NotFound { kind: table, id });
        }
        Ok(())
    }

    //── Webroot / Fqdn / Certificate ────────────────────────────────

    /// Insert a webroot.
    pub async fn insert_webroot(&self, webroot: &Webroot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO webroots
                (id, tenant_id, runtime, version, public_folder, env_file_name,
                 service_hostname_enabled, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(webroot.id.0)
        .bind(webroot.tenant_id.0)
        .bind(&webroot.runtime)
        .bind(&webroot.version)
        .bind(&webroot.public_folder)
        .bind(&webroot.env_file_name)
        .bind(webroot.service_hostname_enabled)
        .bind(webroot.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a webroot by id.
    pub async fn get_webroot(&self, id: EntityId) -> Result<Webroot> {
        let row = sqlx::query(
            "SELECT id, tenant_id, runtime, version, public_folder, env_file_name,
                    service_hostname_enabled, status
             FROM webroots WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(CoreDbError::NotFound { kind: "webroot", id })?;

        Ok(Webroot {
            id: EntityId(row.get("id")),
            tenant_id: EntityId(row.get("tenant_id")),
            runtime: row.get("runtime"),
            version: row.get("version"),
            public_folder: row.get("public_folder"),
            env_file_name: row.get("env_file_name"),
            service_hostname_enabled: row.get("service_hostname_enabled"),
            status: parse_status(row.get("status"))?,
        })
    }

    /// Fetch every FQDN bound to a webroot.
    pub async fn fqdns_for_webroot(&self, webroot_id: EntityId) -> Result<Vec<Fqdn>> {
        let rows = sqlx::query("SELECT id, fqdn, webroot_id, ssl_enabled, status FROM fqdns WHERE webroot_id = $1")
            .bind(webroot_id.0)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Fqdn {
                    id: EntityId(row.get("id")),
                    fqdn: row.get("fqdn"),
                    webroot_id: EntityId(row.get("webroot_id")),
                    ssl_enabled: row.get("ssl_enabled"),
                    status: parse_status(row.get("status"))?,
                })
            })
            .collect()
    }

    /// Fetch every active FQDN that is `suffix` itself or a subdomain of
    /// it — the retroactive DNS arbitration's source population for a
    /// zone created after these FQDNs already existed.
    pub async fn fqdns_matching_suffix(&self, suffix: &str) -> Result<Vec<Fqdn>> {
        let rows = sqlx::query(
            "SELECT id, fqdn, webroot_id, ssl_enabled, status FROM fqdns
             WHERE status != 'deleted' AND (fqdn = $1 OR fqdn LIKE '%.' || $1)",
        )
        .bind(suffix)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Fqdn {
                    id: EntityId(row.get("id")),
                    fqdn: row.get("fqdn"),
                    webroot_id: EntityId(row.get("webroot_id")),
                    ssl_enabled: row.get("ssl_enabled"),
                    status: parse_status(row.get("status"))?,
                })
            })
            .collect()
    }

    /// Fetch every healthy node serving the LB role in a cluster — the
    /// address set `AutoCreateDNSRecords` points a retroactively
    /// materialized FQDN at.
    pub async fn lb_nodes_for_cluster(&self, cluster_id: EntityId) -> Result<Vec<Node>> {
        let rows = sqlx::query(
            r#"
            SELECT n.id, n.cluster_id, n.hostname, n.ip, n.ip6, n.roles, n.status, n.last_health_at
            FROM nodes n
            JOIN node_shard_assignments nsa ON nsa.node_id = n.id
            JOIN shards s ON s.id = nsa.shard_id
            WHERE s.cluster_id = $1 AND s.role = 'lb' AND n.status = 'healthy'
            "#,
        )
        .bind(cluster_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_node).collect()
    }

    /// Fetch an FQDN by id.
    pub async fn get_fqdn(&self, id: EntityId) -> Result<Fqdn> {
        let row = sqlx::query("SELECT id, fqdn, webroot_id, ssl_enabled, status FROM fqdns WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CoreDbError::NotFound { kind: "fqdn", id })?;

        Ok(Fqdn {
            id: EntityId(row.get("id")),
            fqdn: row.get("fqdn"),
            webroot_id: EntityId(row.get("webroot_id")),
            ssl_enabled: row.get("ssl_enabled"),
            status: parse_status(row.get("status"))?,
        })
    }

    /// Insert an FQDN.
    pub async fn insert_fqdn(&self, fqdn: &Fqdn) -> Result<()> {
        sqlx::query(
            "INSERT INTO fqdns (id, fqdn, webroot_id, ssl_enabled, status)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(fqdn.id.0)
        .bind(&fqdn.fqdn)
        .bind(fqdn.webroot_id.0)
        .bind(fqdn.ssl_enabled)
        .bind(fqdn.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a certificate.
    pub async fn insert_certificate(&self, cert: &Certificate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO certificates
                (id, fqdn_id, cert_type, cert_pem, key_pem, chain_pem, is_active, expires_at, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(cert.id.0)
        .bind(cert.fqdn_id.0)
        .bind(snake(&cert.cert_type))
        .bind(&cert.cert_pem)
        .bind(&cert.key_pem)
        .bind(&cert.chain_pem)
        .bind(cert.is_active)
        .bind(cert.expires_at)
        .bind(cert.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Write the issued PEM chain and leaf key onto a certificate row,
    /// leaving `is_active` untouched (activation is a separate step, see
    /// [`Self::activate_certificate`]).
    pub async fn store_certificate_pems(
        &self,
        cert_id: EntityId,
        cert_pem: &str,
        key_pem: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE certificates SET cert_pem = $1, key_pem = $2, expires_at = $3 WHERE id = $4",
        )
        .bind(cert_pem)
        .bind(key_pem)
        .bind(expires_at)
        .bind(cert_id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreDbError::NotFound { kind: "certificates", id: cert_id });
        }
        Ok(())
    }

    /// Mark a certificate as active, deactivating any previously-active
    /// certificate for the same FQDN in the same transaction (§3 invariant:
    /// at most one active certificate per FQDN).
    pub async fn activate_certificate(&self, fqdn_id: EntityId, cert_id: EntityId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE certificates SET is_active = false WHERE fqdn_id = $1")
            .bind(fqdn_id.0)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE certificates SET is_active = true WHERE id = $1")
            .bind(cert_id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// List certificates expiring before `before`, for the renewal cron.
    pub async fn certificates_expiring_before(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<Certificate>> {
        let rows = sqlx::query(
            r#"
            SELECT id, fqdn_id, cert_type, cert_pem, key_pem, chain_pem, is_active, expires_at, status
            FROM certificates
            WHERE is_active = true AND expires_at IS NOT NULL AND expires_at < $1
            "#,
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Certificate {
                    id: EntityId(row.get("id")),
                    fqdn_id: EntityId(row.get("fqdn_id")),
                    cert_type: serde_json::from_value(serde_json::Value::String(
                        row.get::<String, _>("cert_type"),
                    ))
                    .map_err(|e| CoreDbError::Decode(e.to_string()))?,
                    cert_pem: row.get("cert_pem"),
                    key_pem: row.get("key_pem"),
                    chain_pem: row.get("chain_pem"),
                    is_active: row.get("is_active"),
                    expires_at: row.get("expires_at"),
                    status: parse_status(row.get("status"))?,
                })
            })
            .collect()
    }

    //── Database / Valkey / S3 ───────────────────────────────────────

    /// Insert a database.
    pub async fn insert_database(&self, database: &Database) -> Result<()> {
        sqlx::query(
            "INSERT INTO databases (id, tenant_id, shard_id, name, status)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(database.id.0)
        .bind(database.tenant_id.0)
        .bind(database.shard_id.0)
        .bind(&database.name)
        .bind(database.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a database by id.
    pub async fn get_database(&self, id: EntityId) -> Result<Database> {
        let row = sqlx::query("SELECT id, tenant_id, shard_id, name, status FROM databases WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CoreDbError::NotFound { kind: "database", id })?;

        Ok(Database {
            id: EntityId(row.get("id")),
            tenant_id: EntityId(row.get("tenant_id")),
            shard_id: EntityId(row.get("shard_id")),
            name: row.get("name"),
            status: parse_status(row.get("status"))?,
        })
    }

    /// Insert a database user.
    pub async fn insert_database_user(&self, user: &DatabaseUser) -> Result<()> {
        sqlx::query(
            "INSERT INTO database_users (id, database_id, username, status)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(user.id.0)
        .bind(user.database_id.0)
        .bind(&user.username)
        .bind(user.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a database user by id.
    pub async fn get_database_user(&self, id: EntityId) -> Result<DatabaseUser> {
        let row = sqlx::query("SELECT id, database_id, username, status FROM database_users WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CoreDbError::NotFound { kind: "database_user", id })?;

        Ok(DatabaseUser {
            id: EntityId(row.get("id")),
            database_id: EntityId(row.get("database_id")),
            username: row.get("username"),
            status: parse_status(row.get("status"))?,
        })
    }

    /// Insert a Valkey instance.
    pub async fn insert_valkey_instance(&self, instance: &ValkeyInstance) -> Result<()> {
        sqlx::query(
            "INSERT INTO valkey_instances (id, tenant_id, shard_id, status)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(instance.id.0)
        .bind(instance.tenant_id.0)
        .bind(instance.shard_id.0)
        .bind(instance.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a Valkey instance by id.
    pub async fn get_valkey_instance(&self, id: EntityId) -> Result<ValkeyInstance> {
        let row = sqlx::query("SELECT id, tenant_id, shard_id, status FROM valkey_instances WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CoreDbError::NotFound { kind: "valkey_instance", id })?;

        Ok(ValkeyInstance {
            id: EntityId(row.get("id")),
            tenant_id: EntityId(row.get("tenant_id")),
            shard_id: EntityId(row.get("shard_id")),
            status: parse_status(row.get("status"))?,
        })
    }

    /// Insert a Valkey user.
    pub async fn insert_valkey_user(&self, user: &ValkeyUser) -> Result<()> {
        sqlx::query(
            "INSERT INTO valkey_users (id, instance_id, username, status)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(user.id.0)
        .bind(user.instance_id.0)
        .bind(&user.username)
        .bind(user.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a Valkey user by id.
    pub async fn get_valkey_user(&self, id: EntityId) -> Result<ValkeyUser> {
        let row = sqlx::query("SELECT id, instance_id, username, status FROM valkey_users WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CoreDbError::NotFound { kind: "valkey_user", id })?;

        Ok(ValkeyUser {
            id: EntityId(row.get("id")),
            instance_id: EntityId(row.get("instance_id")),
            username: row.get("username"),
            status: parse_status(row.get("status"))?,
        })
    }

    /// Insert an S3 bucket.
    pub async fn insert_s3_bucket(&self, bucket: &S3Bucket) -> Result<()> {
        sqlx::query(
            "INSERT INTO s3_buckets (id, tenant_id, shard_id, name, status)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(bucket.id.0)
        .bind(bucket.tenant_id.0)
        .bind(bucket.shard_id.0)
        .bind(&bucket.name)
        .bind(bucket.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch an S3 bucket by id.
    pub async fn get_s3_bucket(&self, id: EntityId) -> Result<S3Bucket> {
        let row = sqlx::query("SELECT id, tenant_id, shard_id, name, status FROM s3_buckets WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CoreDbError::NotFound { kind: "s3_bucket", id })?;

        Ok(S3Bucket {
            id: EntityId(row.get("id")),
            tenant_id: EntityId(row.get("tenant_id")),
            shard_id: EntityId(row.get("shard_id")),
            name: row.get("name"),
            status: parse_status(row.get("status"))?,
        })
    }

    /// Insert an S3 key.
    pub async fn insert_s3_key(&self, key: &S3Key) -> Result<()> {
        sqlx::query(
            "INSERT INTO s3_keys (id, bucket_id, access_key_id, status)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(key.id.0)
        .bind(key.bucket_id.0)
        .bind(&key.access_key_id)
        .bind(key.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch an S3 key by id.
    pub async fn get_s3_key(&self, id: EntityId) -> Result<S3Key> {
        let row = sqlx::query("SELECT id, bucket_id, access_key_id, status FROM s3_keys WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CoreDbError::NotFound { kind: "s3_key", id })?;

        Ok(S3Key {
            id: EntityId(row.get("id")),
            bucket_id: EntityId(row.get("bucket_id")),
            access_key_id: row.get("access_key_id"),
            status: parse_status(row.get("status"))?,
        })
    }

    //── Cron / Daemon / SSH key ──────────────────────────────────────

    /// Insert a cron job.
    pub async fn insert_cron_job(&self, job: &CronJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO cron_jobs (id, webroot_id, schedule, command, status)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(job.id.0)
        .bind(job.webroot_id.0)
        .bind(&job.schedule)
        .bind(&job.command)
        .bind(job.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a cron job by id.
    pub async fn get_cron_job(&self, id: EntityId) -> Result<CronJob> {
        let row = sqlx::query("SELECT id, webroot_id, schedule, command, status FROM cron_jobs WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CoreDbError::NotFound { kind: "cron_job", id })?;

        Ok(CronJob {
            id: EntityId(row.get("id")),
            webroot_id: EntityId(row.get("webroot_id")),
            schedule: row.get("schedule"),
            command: row.get("command"),
            status: parse_status(row.get("status"))?,
        })
    }

    /// Insert a daemon.
    pub async fn insert_daemon(&self, daemon: &Daemon) -> Result<()> {
        sqlx::query(
            "INSERT INTO daemons (id, webroot_id, command, proxy_port, status)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(daemon.id.0)
        .bind(daemon.webroot_id.0)
        .bind(&daemon.command)
        .bind(daemon.proxy_port.map(|p| p as i32))
        .bind(daemon.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a daemon by id.
    pub async fn get_daemon(&self, id: EntityId) -> Result<Daemon> {
        let row = sqlx::query("SELECT id, webroot_id, command, proxy_port, status FROM daemons WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CoreDbError::NotFound { kind: "daemon", id })?;

        let proxy_port: Option<i32> = row.get("proxy_port");
        Ok(Daemon {
            id: EntityId(row.get("id")),
            webroot_id: EntityId(row.get("webroot_id")),
            command: row.get("command"),
            proxy_port: proxy_port.map(|p| p as u16),
            status: parse_status(row.get("status"))?,
        })
    }

    /// Insert an SSH key.
    pub async fn insert_ssh_key(&self, key: &SshKey) -> Result<()> {
        sqlx::query(
            "INSERT INTO ssh_keys (id, tenant_id, public_key, status)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(key.id.0)
        .bind(key.tenant_id.0)
        .bind(&key.public_key)
        .bind(key.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch an SSH key by id.
    pub async fn get_ssh_key(&self, id: EntityId) -> Result<SshKey> {
        let row = sqlx::query("SELECT id, tenant_id, public_key, status FROM ssh_keys WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CoreDbError::NotFound { kind: "ssh_key", id })?;

        Ok(SshKey {
            id: EntityId(row.get("id")),
            tenant_id: EntityId(row.get("tenant_id")),
            public_key: row.get("public_key"),
            status: parse_status(row.get("status"))?,
        })
    }

    /// Fetch every active tenant assigned to a shard — the web-shard
    /// converge's starting population.
    pub async fn tenants_for_shard(&self, shard_id: EntityId) -> Result<Vec<Tenant>> {
        let rows = sqlx::query(
            "SELECT id, brand_id, cluster_id, shard_id, uid, status, suspend_reason
             FROM tenants WHERE shard_id = $1 AND status != 'deleted'",
        )
        .bind(shard_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Tenant {
                    id: EntityId(row.get("id")),
                    brand_id: EntityId(row.get("brand_id")),
                    cluster_id: EntityId(row.get("cluster_id")),
                    shard_id: row.get::<Option<Uuid>, _>("shard_id").map(EntityId),
                    uid: row.get("uid"),
                    status: parse_status(row.get("status"))?,
                    suspend_reason: row.get("suspend_reason"),
                })
            })
            .collect()
    }

    /// Fetch every active webroot owned by a tenant.
    pub async fn webroots_for_tenant(&self, tenant_id: EntityId) -> Result<Vec<Webroot>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, runtime, version, public_folder, env_file_name,
                    service_hostname_enabled, status
             FROM webroots WHERE tenant_id = $1 AND status != 'deleted'",
        )
        .bind(tenant_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Webroot {
                    id: EntityId(row.get("id")),
                    tenant_id: EntityId(row.get("tenant_id")),
                    runtime: row.get("runtime"),
                    version: row.get("version"),
                    public_folder: row.get("public_folder"),
                    env_file_name: row.get("env_file_name"),
                    service_hostname_enabled: row.get("service_hostname_enabled"),
                    status: parse_status(row.get("status"))?,
                })
            })
            .collect()
    }

    /// Fetch every active cron job for a webroot.
    pub async fn cron_jobs_for_webroot(&self, webroot_id: EntityId) -> Result<Vec<CronJob>> {
        let rows = sqlx::query(
            "SELECT id, webroot_id, schedule, command, status FROM cron_jobs
             WHERE webroot_id = $1 AND status != 'deleted'",
        )
        .bind(webroot_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(CronJob {
                    id: EntityId(row.get("id")),
                    webroot_id: EntityId(row.get("webroot_id")),
                    schedule: row.get("schedule"),
                    command: row.get("command"),
                    status: parse_status(row.get("status"))?,
                })
            })
            .collect()
    }

    /// Fetch every active daemon for a webroot.
    pub async fn daemons_for_webroot(&self, webroot_id: EntityId) -> Result<Vec<Daemon>> {
        let rows = sqlx::query(
            "SELECT id, webroot_id, command, proxy_port, status FROM daemons
             WHERE webroot_id = $1 AND status != 'deleted'",
        )
        .bind(webroot_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let proxy_port: Option<i32> = row.get("proxy_port");
                Ok(Daemon {
                    id: EntityId(row.get("id")),
                    webroot_id: EntityId(row.get("webroot_id")),
                    command: row.get("command"),
                    proxy_port: proxy_port.map(|p| p as u16),
                    status: parse_status(row.get("status"))?,
                })
            })
            .collect()
    }

    /// Fetch every active SSH key for a tenant.
    pub async fn ssh_keys_for_tenant(&self, tenant_id: EntityId) -> Result<Vec<SshKey>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, public_key, status FROM ssh_keys
             WHERE tenant_id = $1 AND status != 'deleted'",
        )
        .bind(tenant_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(SshKey {
                    id: EntityId(row.get("id")),
                    tenant_id: EntityId(row.get("tenant_id")),
                    public_key: row.get("public_key"),
                    status: parse_status(row.get("status"))?,
                })
            })
            .collect()
    }

    /// Insert an env var row.
    pub async fn insert_env_var(&self, env_var: &EnvVar) -> Result<()> {
        sqlx::query(
            "INSERT INTO env_vars (id, webroot_id, name, encrypted_value) VALUES ($1, $2, $3, $4)",
        )
        .bind(env_var.id.0)
        .bind(env_var.webroot_id.0)
        .bind(&env_var.name)
        .bind(&env_var.encrypted_value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch every env var for a webroot, still encrypted.
    pub async fn env_vars_for_webroot(&self, webroot_id: EntityId) -> Result<Vec<EnvVar>> {
        let rows = sqlx::query("SELECT id, webroot_id, name, encrypted_value FROM env_vars WHERE webroot_id = $1")
            .bind(webroot_id.0)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| EnvVar {
                id: EntityId(row.get("id")),
                webroot_id: EntityId(row.get("webroot_id")),
                name: row.get("name"),
                encrypted_value: row.get("encrypted_value"),
            })
            .collect())
    }

    /// Fetch a tenant's wrapped data-encryption key, if one has been
    /// provisioned.
    pub async fn get_encrypted_dek(&self, tenant_id: EntityId) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT encrypted_dek FROM encryption_keys WHERE tenant_id = $1")
            .bind(tenant_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("encrypted_dek")))
    }

    /// Set a shard's convergence status (distinct from
    /// `update_status_with_message`, since `shards` has no
    /// `status_message` column).
    pub async fn set_shard_status(&self, shard_id: EntityId, status: ShardStatus) -> Result<()> {
        let result = sqlx::query("UPDATE shards SET status = $1 WHERE id = $2")
            .bind(snake(&status))
            .bind(shard_id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreDbError::NotFound { kind: "shard", id: shard_id });
        }
        Ok(())
    }

    /// Every `(fqdn, lb_backend)` tuple that should be present in a
    /// cluster's HAProxy map, derived from `fqdns ⋈ webroots ⋈ tenants ⋈
    /// shards` — the LB-shard converge's desired-state query.
    pub async fn active_fqdn_mappings(&self, cluster_id: EntityId) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            r#"
            SELECT f.fqdn, s.lb_backend
            FROM fqdns f
            JOIN webroots w ON w.id = f.webroot_id
            JOIN tenants t ON t.id = w.tenant_id
            JOIN shards s ON s.id = t.shard_id
            WHERE t.cluster_id = $1 AND f.status != 'deleted' AND w.status != 'deleted'
              AND t.status != 'deleted' AND s.lb_backend IS NOT NULL
            "#,
        )
        .bind(cluster_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("fqdn"), row.get::<String, _>("lb_backend")))
            .collect())
    }

    //── DNS: Zone / ZoneRecord ───────────────────────────────────────

    /// Insert a zone.
    pub async fn insert_zone(&self, zone: &Zone) -> Result<()> {
        sqlx::query("INSERT INTO zones (id, brand_id, tenant_id, name) VALUES ($1, $2, $3, $4)")
            .bind(zone.id.0)
            .bind(zone.brand_id.0)
            .bind(zone.tenant_id.map(|t| t.0))
            .bind(&zone.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fetch a zone by id.
    pub async fn get_zone(&self, id: EntityId) -> Result<Zone> {
        let row = sqlx::query("SELECT id, brand_id, tenant_id, name FROM zones WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CoreDbError::NotFound { kind: "zone", id })?;

        Ok(Zone {
            id: EntityId(row.get("id")),
            brand_id: EntityId(row.get("brand_id")),
            tenant_id: row.get::<Option<Uuid>, _>("tenant_id").map(EntityId),
            name: row.get("name"),
        })
    }

    /// Find the platform-owned zone whose apex is the longest suffix of
    /// `fqdn`, i.e. the zone `AutoCreateDNSRecords` should write records
    /// into. Returns `None` if no owned zone is a suffix of `fqdn`.
    pub async fn find_zone_for_fqdn(&self, fqdn: &str) -> Result<Option<Zone>> {
        let row = sqlx::query(
            r#"
            SELECT id, brand_id, tenant_id, name FROM zones
            WHERE $1 = name OR $1 LIKE '%.' || name
            ORDER BY length(name) DESC
            LIMIT 1
            "#,
        )
        .bind(fqdn)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Zone {
            id: EntityId(row.get("id")),
            brand_id: EntityId(row.get("brand_id")),
            tenant_id: row.get::<Option<Uuid>, _>("tenant_id").map(EntityId),
            name: row.get("name"),
        }))
    }

    /// Insert a zone record.
    pub async fn insert_zone_record(&self, record: &ZoneRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO zone_records
                (id, zone_id, record_type, name, content, ttl, priority,
                 managed_by, source_type, source_fqdn_id, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id.0)
        .bind(record.zone_id.0)
        .bind(&record.record_type)
        .bind(&record.name)
        .bind(&record.content)
        .bind(record.ttl)
        .bind(record.priority)
        .bind(snake(&record.managed_by))
        .bind(&record.source_type)
        .bind(record.source_fqdn_id.map(|f| f.0))
        .bind(record.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Find every zone_records row for a given (zone, name, record_type)
    /// triple — the arbitration query for "does a custom override exist"
    /// (§4.5: custom always wins over auto).
    pub async fn zone_records_for_name(
        &self,
        zone_id: EntityId,
        name: &str,
        record_type: &str,
    ) -> Result<Vec<ZoneRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, zone_id, record_type, name, content, ttl, priority,
                   managed_by, source_type, source_fqdn_id, status
            FROM zone_records
            WHERE zone_id = $1 AND name = $2 AND record_type = $3
            "#,
        )
        .bind(zone_id.0)
        .bind(name)
        .bind(record_type)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ZoneRecord {
                    id: EntityId(row.get("id")),
                    zone_id: EntityId(row.get("zone_id")),
                    record_type: row.get("record_type"),
                    name: row.get("name"),
                    content: row.get("content"),
                    ttl: row.get("ttl"),
                    priority: row.get("priority"),
                    managed_by: serde_json::from_value(serde_json::Value::String(
                        row.get::<String, _>("managed_by"),
                    ))
                    .map_err(|e| CoreDbError::Decode(e.to_string()))?,
                    source_type: row.get("source_type"),
                    source_fqdn_id: row.get::<Option<Uuid>, _>("source_fqdn_id").map(EntityId),
                    status: parse_status(row.get("status"))?,
                })
            })
            .collect()
    }

    /// Fetch a zone record by id.
    pub async fn get_zone_record(&self, id: EntityId) -> Result<ZoneRecord> {
        let row = sqlx::query(
            r#"
            SELECT id, zone_id, record_type, name, content, ttl, priority,
                   managed_by, source_type, source_fqdn_id, status
            FROM zone_records WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(CoreDbError::NotFound { kind: "zone_record", id })?;

        Ok(ZoneRecord {
            id: EntityId(row.get("id")),
            zone_id: EntityId(row.get("zone_id")),
            record_type: row.get("record_type"),
            name: row.get("name"),
            content: row.get("content"),
            ttl: row.get("ttl"),
            priority: row.get("priority"),
            managed_by: serde_json::from_value(serde_json::Value::String(row.get::<String, _>("managed_by")))
                .map_err(|e| CoreDbError::Decode(e.to_string()))?,
            source_type: row.get("source_type"),
            source_fqdn_id: row.get::<Option<Uuid>, _>("source_fqdn_id").map(EntityId),
            status: parse_status(row.get("status"))?,
        })
    }

    //── Email ────────────────────────────────────────────────────────

    /// Insert an email account.
    pub async fn insert_email_account(&self, account: &EmailAccount) -> Result<()> {
        sqlx::query(
            "INSERT INTO email_accounts (id, tenant_id, local_part, domain, status)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(account.id.0)
        .bind(account.tenant_id.0)
        .bind(&account.local_part)
        .bind(&account.domain)
        .bind(account.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch an email account by id.
    pub async fn get_email_account(&self, id: EntityId) -> Result<EmailAccount> {
        let row = sqlx::query("SELECT id, tenant_id, local_part, domain, status FROM email_accounts WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CoreDbError::NotFound { kind: "email_account", id })?;

        Ok(EmailAccount {
            id: EntityId(row.get("id")),
            tenant_id: EntityId(row.get("tenant_id")),
            local_part: row.get("local_part"),
            domain: row.get("domain"),
            status: parse_status(row.get("status"))?,
        })
    }

    /// Insert an email alias.
    pub async fn insert_email_alias(&self, alias: &EmailAlias) -> Result<()> {
        sqlx::query(
            "INSERT INTO email_aliases (id, account_id, address, status) VALUES ($1, $2, $3, $4)",
        )
        .bind(alias.id.0)
        .bind(alias.account_id.0)
        .bind(&alias.address)
        .bind(alias.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch an email alias by id.
    pub async fn get_email_alias(&self, id: EntityId) -> Result<EmailAlias> {
        let row = sqlx::query("SELECT id, account_id, address, status FROM email_aliases WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CoreDbError::NotFound { kind: "email_alias", id })?;

        Ok(EmailAlias {
            id: EntityId(row.get("id")),
            account_id: EntityId(row.get("account_id")),
            address: row.get("address"),
            status: parse_status(row.get("status"))?,
        })
    }

    /// Insert an email forward.
    pub async fn insert_email_forward(&self, forward: &EmailForward) -> Result<()> {
        sqlx::query(
            "INSERT INTO email_forwards (id, account_id, destination, keep_copy, status)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(forward.id.0)
        .bind(forward.account_id.0)
        .bind(&forward.destination)
        .bind(forward.keep_copy)
        .bind(forward.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch an email forward by id.
    pub async fn get_email_forward(&self, id: EntityId) -> Result<EmailForward> {
        let row = sqlx::query("SELECT id, account_id, destination, keep_copy, status FROM email_forwards WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CoreDbError::NotFound { kind: "email_forward", id })?;

        Ok(EmailForward {
            id: EntityId(row.get("id")),
            account_id: EntityId(row.get("account_id")),
            destination: row.get("destination"),
            keep_copy: row.get("keep_copy"),
            status: parse_status(row.get("status"))?,
        })
    }

    /// Insert an email autoreply.
    pub async fn insert_email_autoreply(&self, autoreply: &EmailAutoreply) -> Result<()> {
        sqlx::query(
            "INSERT INTO email_autoreplies (id, account_id, subject, body, status)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(autoreply.id.0)
        .bind(autoreply.account_id.0)
        .bind(&autoreply.subject)
        .bind(&autoreply.body)
        .bind(autoreply.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch an email autoreply by id.
    pub async fn get_email_autoreply(&self, id: EntityId) -> Result<EmailAutoreply> {
        let row = sqlx::query("SELECT id, account_id, subject, body, status FROM email_autoreplies WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CoreDbError::NotFound { kind: "email_autoreply", id })?;

        Ok(EmailAutoreply {
            id: EntityId(row.get("id")),
            account_id: EntityId(row.get("account_id")),
            subject: row.get("subject"),
            body: row.get("body"),
            status: parse_status(row.get("status"))?,
        })
    }

    //── Backups / Encryption keys ───────────────────────────────────

    /// Insert a backup record.
    pub async fn insert_backup(&self, backup: &Backup) -> Result<()> {
        sqlx::query(
            "INSERT INTO backups (id, tenant_id, resource_kind, resource_id, location, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(backup.id.0)
        .bind(backup.tenant_id.0)
        .bind(&backup.resource_kind)
        .bind(backup.resource_id.0)
        .bind(&backup.location)
        .bind(backup.status.as_str())
        .bind(backup.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a backup by id.
    pub async fn get_backup(&self, id: EntityId) -> Result<Backup> {
        let row = sqlx::query(
            "SELECT id, tenant_id, resource_kind, resource_id, location, status, created_at
             FROM backups WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(CoreDbError::NotFound { kind: "backup", id })?;

        Ok(Backup {
            id: EntityId(row.get("id")),
            tenant_id: EntityId(row.get("tenant_id")),
            resource_kind: row.get("resource_kind"),
            resource_id: EntityId(row.get("resource_id")),
            location: row.get("location"),
            status: parse_status(row.get("status"))?,
            created_at: row.get("created_at"),
        })
    }

    /// Delete every backup captured before `cutoff`, for the daily
    /// retention cron pass. Returns the count removed.
    pub async fn delete_backups_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM backups WHERE created_at < $1").bind(cutoff).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Upsert a tenant's encrypted data-encryption-key.
    pub async fn upsert_encryption_key(&self, key: &EncryptionKey) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO encryption_keys (tenant_id, encrypted_dek)
            VALUES ($1, $2)
            ON CONFLICT (tenant_id) DO UPDATE SET encrypted_dek = EXCLUDED.encrypted_dek
            "#,
        )
        .bind(key.tenant_id.0)
        .bind(&key.encrypted_dek)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    //── Incidents ────────────────────────────────────────────────────

    /// Fetch a single incident by id.
    pub async fn get_incident(&self, id: EntityId) -> Result<Incident> {
        let row = sqlx::query(
            r#"
            SELECT id, dedupe_key, incident_type, severity, status, title, detail,
                   resource_type, resource_id, assigned_to, resolution,
                   detected_at, escalated_at, updated_at
            FROM incidents WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(CoreDbError::NotFound { kind: "incident", id })?;

        row_to_incident(row)
    }

    /// Create an incident, unless a non-terminal incident with the same
    /// `dedupe_key` already exists — returns the existing incident's id in
    /// that case instead of raising a unique-violation up to the caller
    /// (§4.6 dedupe semantics).
    pub async fn create_or_dedupe_incident(&self, incident: &Incident) -> Result<(EntityId, bool)> {
        let existing = sqlx::query(
            r#"
            SELECT id FROM incidents
            WHERE dedupe_key = $1 AND status NOT IN ('resolved', 'cancelled')
            "#,
        )
        .bind(&incident.dedupe_key)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            return Ok((EntityId(row.get("id")), false));
        }

        sqlx::query(
            r#"
            INSERT INTO incidents
                (id, dedupe_key, incident_type, severity, status, title, detail,
                 resource_type, resource_id, assigned_to, resolution,
                 detected_at, escalated_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(incident.id.0)
        .bind(&incident.dedupe_key)
        .bind(&incident.incident_type)
        .bind(snake(&incident.severity))
        .bind(snake(&incident.status))
        .bind(&incident.title)
        .bind(&incident.detail)
        .bind(&incident.resource_type)
        .bind(incident.resource_id.map(|r| r.0))
        .bind(&incident.assigned_to)
        .bind(&incident.resolution)
        .bind(incident.detected_at)
        .bind(incident.escalated_at)
        .bind(incident.updated_at)
        .execute(&self.pool)
        .await?;

        Ok((incident.id, true))
    }

    /// Auto-resolve every open incident for a resource whose `incident_type`
    /// starts with `type_prefix`, in one `UPDATE … RETURNING` (§9: a literal
    /// SQL `LIKE prefix || '%'` match; callers are responsible for
    /// delimiter-safe prefixes, e.g. `"replication."` not `"replication"`,
    /// so `"replication_lag"` doesn't also match).
    pub async fn auto_resolve_by_resource_and_type_prefix(
        &self,
        resource_type: &str,
        resource_id: EntityId,
        type_prefix: &str,
        resolution: &str,
    ) -> Result<Vec<EntityId>> {
        let like_pattern = format!("{type_prefix}%");
        let rows = sqlx::query(
            r#"
            UPDATE incidents
            SET status = 'resolved', resolution = $1, updated_at = now()
            WHERE resource_type = $2
              AND resource_id = $3
              AND incident_type LIKE $4
              AND status NOT IN ('resolved', 'cancelled')
            RETURNING id
            "#,
        )
        .bind(resolution)
        .bind(resource_type)
        .bind(resource_id.0)
        .bind(like_pattern)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| EntityId(r.get("id"))).collect())
    }

    /// Atomically claim an open incident for the investigation agent: flips
    /// `status` to `investigating` and sets `assigned_to`, but only if the
    /// incident is still `open` — the conditional UPDATE that prevents two
    /// agent runs from double-claiming the same incident.
    pub async fn claim_incident_for_agent(
        &self,
        incident_id: EntityId,
        agent_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE incidents
            SET status = 'investigating', assigned_to = $1, updated_at = now()
            WHERE id = $2 AND status = 'open'
            "#,
        )
        .bind(agent_id)
        .bind(incident_id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// List at most 20 unassigned open incidents, most severe first then
    /// oldest first — the investigation queue processor's work list
    /// (§4.6).
    pub async fn list_unassigned_open_incidents(&self) -> Result<Vec<Incident>> {
        let rows = sqlx::query(
            r#"
            SELECT id, dedupe_key, incident_type, severity, status, title, detail,
                   resource_type, resource_id, assigned_to, resolution,
                   detected_at, escalated_at, updated_at
            FROM incidents
            WHERE status = 'open' AND assigned_to IS NULL
            ORDER BY CASE severity
                WHEN 'critical' THEN 0
                WHEN 'warning' THEN 1
                ELSE 2
            END, detected_at ASC
            LIMIT 20
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_incident).collect()
    }

    /// Most recently resolved incident of `incident_type`, if any — the
    /// source the investigation agent reads a resolution hint from
    /// (§4.6 step 2).
    pub async fn recent_resolved_incident_of_type(&self, incident_type: &str) -> Result<Option<Incident>> {
        let row = sqlx::query(
            r#"
            SELECT id, dedupe_key, incident_type, severity, status, title, detail,
                   resource_type, resource_id, assigned_to, resolution,
                   detected_at, escalated_at, updated_at
            FROM incidents
            WHERE incident_type = $1 AND status = 'resolved'
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(incident_type)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_incident).transpose()
    }

    /// Transition an incident to a terminal or escalated state.
    pub async fn set_incident_status(
        &self,
        incident_id: EntityId,
        status: IncidentStatus,
        resolution: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();
        let escalated_at = matches!(status, IncidentStatus::Escalated).then_some(now);

        sqlx::query(
            r#"
            UPDATE incidents
            SET status = $1,
                resolution = COALESCE($2, resolution),
                escalated_at = COALESCE($3, escalated_at),
                updated_at = $4
            WHERE id = $5
            "#,
        )
        .bind(snake(&status))
        .bind(resolution)
        .bind(escalated_at)
        .bind(now)
        .bind(incident_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// List incidents in `status` that have remained there longer than
    /// `threshold`, ordered oldest first — input to the escalation cron
    /// policy (§4.6: severity-scoped thresholds).
    ///
    /// `unassigned_only` additionally requires `assigned_to IS NULL` —
    /// the `status=open` escalation thresholds are scoped to incidents no
    /// agent has claimed yet (§4.6); an incident already under
    /// investigation escalates on the separate `active_investigation`
    /// threshold instead, regardless of status, so callers pass `false`
    /// for those.
    pub async fn incidents_overdue(
        &self,
        status: IncidentStatus,
        threshold: chrono::Duration,
        unassigned_only: bool,
    ) -> Result<Vec<Incident>> {
        let cutoff = Utc::now() - threshold;
        let sql = if unassigned_only {
            r#"
            SELECT id, dedupe_key, incident_type, severity, status, title, detail,
                   resource_type, resource_id, assigned_to, resolution,
                   detected_at, escalated_at, updated_at
            FROM incidents
            WHERE status = $1 AND updated_at < $2 AND assigned_to IS NULL
            ORDER BY detected_at ASC
            "#
        } else {
            r#"
            SELECT id, dedupe_key, incident_type, severity, status, title, detail,
                   resource_type, resource_id, assigned_to, resolution,
                   detected_at, escalated_at, updated_at
            FROM incidents
            WHERE status = $1 AND updated_at < $2
            ORDER BY detected_at ASC
            "#
        };
        let rows = sqlx::query(sql).bind(snake(&status)).bind(cutoff).fetch_all(&self.pool).await?;

        rows.into_iter().map(row_to_incident).collect()
    }

    /// Append an incident timeline event.
    pub async fn insert_incident_event(&self, event: &IncidentEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO incident_events (id, incident_id, actor, action, detail, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id.0)
        .bind(event.incident_id.0)
        .bind(&event.actor)
        .bind(snake(&event.action))
        .bind(&event.detail)
        .bind(&event.metadata)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch an incident's full timeline, oldest first — the context window
    /// the investigation agent's tool-calling loop is seeded with.
    pub async fn incident_timeline(&self, incident_id: EntityId) -> Result<Vec<IncidentEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, incident_id, actor, action, detail, metadata, created_at
            FROM incident_events
            WHERE incident_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(incident_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(IncidentEvent {
                    id: EntityId(row.get("id")),
                    incident_id: EntityId(row.get("incident_id")),
                    actor: row.get("actor"),
                    action: parse_enum(row.get("action"))?,
                    detail: row.get("detail"),
                    metadata: row.get("metadata"),
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }
}

fn row_to_node(row: sqlx::postgres::PgRow) -> Result<Node> {
    let roles_raw: Vec<String> = row.get("roles");
    let roles = roles_raw
        .iter()
        .map(|r| {
            serde_json::from_value(serde_json::Value::String(r.clone()))
                .map_err(|e| CoreDbError::Decode(e.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;

    let ip: Option<String> = row.get("ip");
    let ip6: Option<String> = row.get("ip6");

    Ok(Node {
        id: EntityId(row.get("id")),
        cluster_id: EntityId(row.get("cluster_id")),
        hostname: row.get("hostname"),
        ip: ip.and_then(|s| s.parse().ok()),
        ip6: ip6.and_then(|s| s.parse().ok()),
        roles,
        status: serde_json::from_value(serde_json::Value::String(row.get("status")))
            .map_err(|e| CoreDbError::Decode(e.to_string()))?,
        last_health_at: row.get("last_health_at"),
    })
}

fn row_to_incident(row: sqlx::postgres::PgRow) -> Result<Incident> {
    Ok(Incident {
        id: EntityId(row.get("id")),
        dedupe_key: row.get("dedupe_key"),
        incident_type: row.get("incident_type"),
        severity: serde_json::from_value(serde_json::Value::String(row.get("severity")))
            .map_err(|e| CoreDbError::Decode(e.to_string()))?,
        status: serde_json::from_value(serde_json::Value::String(row.get("status")))
            .map_err(|e| CoreDbError::Decode(e.to_string()))?,
        title: row.get("title"),
        detail: row.get("detail"),
        resource_type: row.get("resource_type"),
        resource_id: row.get::<Option<Uuid>, _>("resource_id").map(EntityId),
        assigned_to: row.get("assigned_to"),
        resolution: row.get("resolution"),
        detected_at: row.get("detected_at"),
        escalated_at: row.get("escalated_at"),
        updated_at: row.get("updated_at"),
    })
}

