//! DNS activities: `AutoCreateDNSRecords`, `DeactivateAutoRecords`,
//! `ReactivateAutoRecords`, and the ambient PowerDNS write contracts they
//! drive (§4.1, §4.5, §6).
//!
//! `zone_records` in the core DB is the source of truth; PowerDNS keeps a
//! separate cache it serves answers from. Every activity here writes the
//! core DB row first, then mirrors the write to PowerDNS through
//! [`PowerDnsClient`] — a retry re-reads the DB-persisted row rather than
//! re-deriving it, per the workflow engine's replay contract.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use async_trait::async_trait;
use hostctl_store_postgres::CoreDb;
use hostctl_types::{EntityId, ManagedBy, ResourceStatus, ZoneRecord};
use serde::{Deserialize, Serialize};

use crate::{Activity, ActivityError, Heartbeat};

/// The PowerDNS write surface every DNS activity drives. A network
/// implementation talks to PowerDNS's own database or HTTP API; tests use
/// an in-memory double.
#[async_trait]
pub trait PowerDnsClient: Send + Sync {
    /// Create the zone if it doesn't already exist.
    async fn create_zone(&self, zone_name: &str) -> anyhow::Result<()>;

    /// Upsert a resource record, keyed by `(zone, name, type, content)`.
    async fn upsert_record(
        &self,
        zone_name: &str,
        name: &str,
        record_type: &str,
        content: &str,
        ttl: i32,
        priority: Option<i32>,
    ) -> anyhow::Result<()>;

    /// Remove a resource record, keyed by `(zone, name, type, content)`.
    /// Idempotent: removing an already-absent record succeeds.
    async fn delete_record(
        &self,
        zone_name: &str,
        name: &str,
        record_type: &str,
        content: &str,
    ) -> anyhow::Result<()>;
}

/// Typed input for [`AutoCreateDNSRecords`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoCreateDnsRecordsInput {
    /// The FQDN records are being materialized for.
    pub fqdn: String,
    /// Load-balancer addresses to point the FQDN at.
    pub lb_addresses: Vec<LbAddress>,
    /// The FQDN row these auto records are sourced from.
    pub source_fqdn_id: EntityId,
}

/// One load-balancer address, tagged by family so the activity knows
/// whether to write an `A` or `AAAA` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family")]
pub enum LbAddress {
    /// IPv4 address — materializes as an `A` record.
    V4 {
        /// The address.
        addr: Ipv4Addr,
    },
    /// IPv6 address — materializes as an `AAAA` record.
    V6 {
        /// The address.
        addr: Ipv6Addr,
    },
}

const AUTO_RECORD_TTL: i32 = 300;

/// Materializes `A`/`AAAA` auto records for an FQDN, deduplicated by
/// `(zone_id, type, name, content, managed_by = auto)`.
///
/// If a *custom* A/AAAA record already exists for the name, only the
/// `auto` ledger row is written to the core DB — no PowerDNS write — so
/// the custom-wins arbitration rule (§4.5) holds from the moment the auto
/// row is created.
pub struct AutoCreateDnsRecords {
    core_db: Arc<CoreDb>,
    powerdns: Arc<dyn PowerDnsClient>,
}

impl AutoCreateDnsRecords {
    /// Build the activity.
    pub fn new(core_db: Arc<CoreDb>, powerdns: Arc<dyn PowerDnsClient>) -> Self {
        Self { core_db, powerdns }
    }
}

#[async_trait]
impl Activity for AutoCreateDnsRecords {
    type Input = AutoCreateDnsRecordsInput;
    type Output = ();

    fn name(&self) -> &'static str {
        "AutoCreateDNSRecords"
    }

    async fn run(
        &self,
        input: Self::Input,
        _idempotency_key: &str,
        _heartbeat: &mut Heartbeat,
    ) -> Result<(), ActivityError> {
        let zone = self
            .core_db
            .find_zone_for_fqdn(&input.fqdn)
            .await
            .map_err(|e| ActivityError::Retryable(e.into()))?
            .ok_or_else(|| {
                ActivityError::NonRetryable(anyhow::anyhow!(
                    "no platform-owned zone is a suffix of {}",
                    input.fqdn
                ))
            })?;

        for family in ["A", "AAAA"] {
            let existing = self
                .core_db
                .zone_records_for_name(zone.id, &input.fqdn, family)
                .await
                .map_err(|e| ActivityError::Retryable(e.into()))?;

            let custom_exists = existing.iter().any(|r| r.managed_by == ManagedBy::Custom);

            let contents: Vec<String> = input
                .lb_addresses
                .iter()
                .filter_map(|addr| match (family, addr) {
                    ("A", LbAddress::V4 { addr }) => Some(addr.to_string()),
                    ("AAAA", LbAddress::V6 { addr }) => Some(addr.to_string()),
                    _ => None,
                })
                .collect();

            for content in contents {
                let already_recorded = existing.iter().any(|r| {
                    r.managed_by == ManagedBy::Auto && r.record_type == family && r.content == content
                });
                if already_recorded {
                    continue;
                }

                let record = ZoneRecord {
                    id: EntityId::new(),
                    zone_id: zone.id,
                    record_type: family.to_string(),
                    name: input.fqdn.clone(),
                    content: content.clone(),
                    ttl: AUTO_RECORD_TTL,
                    priority: None,
                    managed_by: ManagedBy::Auto,
                    source_type: Some("fqdn".to_string()),
                    source_fqdn_id: Some(input.source_fqdn_id),
                    status: ResourceStatus::Active,
                };
                self.core_db
                    .insert_zone_record(&record)
                    .await
                    .map_err(|e| ActivityError::Retryable(e.into()))?;

                if !custom_exists {
                    self.powerdns
                        .upsert_record(&zone.name, &input.fqdn, family, &content, AUTO_RECORD_TTL, None)
                        .await
                        .map_err(ActivityError::Retryable)?;
                }
            }
        }

        Ok(())
    }
}

/// Typed input shared by [`DeactivateAutoRecords`] and
/// [`ReactivateAutoRecords`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRecordMirrorInput {
    /// Zone the record lives in.
    pub zone_id: EntityId,
    /// Zone apex name, for the PowerDNS call.
    pub zone_name: String,
    /// Record owner name.
    pub name: String,
    /// Record type (`A`, `AAAA`, `MX`, …).
    pub record_type: String,
}

/// When a custom record is created for `(name, type)`, strips the
/// matching `auto` rows from PowerDNS (the core-DB ledger rows are left
/// in place so [`ReactivateAutoRecords`] can restore them later).
pub struct DeactivateAutoRecords {
    core_db: Arc<CoreDb>,
    powerdns: Arc<dyn PowerDnsClient>,
}

impl DeactivateAutoRecords {
    /// Build the activity.
    pub fn new(core_db: Arc<CoreDb>, powerdns: Arc<dyn PowerDnsClient>) -> Self {
        Self { core_db, powerdns }
    }
}

#[async_trait]
impl Activity for DeactivateAutoRecords {
    type Input = AutoRecordMirrorInput;
    type Output = ();

    fn name(&self) -> &'static str {
        "DeactivateAutoRecords"
    }

    async fn run(
        &self,
        input: Self::Input,
        _idempotency_key: &str,
        _heartbeat: &mut Heartbeat,
    ) -> Result<(), ActivityError> {
        let records = self
            .core_db
            .zone_records_for_name(input.zone_id, &input.name, &input.record_type)
            .await
            .map_err(|e| ActivityError::Retryable(e.into()))?;

        for record in records.into_iter().filter(|r| r.managed_by == ManagedBy::Auto) {
            self.powerdns
                .delete_record(&input.zone_name, &record.name, &record.record_type, &record.content)
                .await
                .map_err(ActivityError::Retryable)?;
        }

        Ok(())
    }
}

/// Reverses [`DeactivateAutoRecords`] iff no custom record remains for
/// `(name, type)`.
pub struct ReactivateAutoRecords {
    core_db: Arc<CoreDb>,
    powerdns: Arc<dyn PowerDnsClient>,
}

impl ReactivateAutoRecords {
    /// Build the activity.
    pub fn new(core_db: Arc<CoreDb>, powerdns: Arc<dyn PowerDnsClient>) -> Self {
        Self { core_db, powerdns }
    }
}

#[async_trait]
impl Activity for ReactivateAutoRecords {
    type Input = AutoRecordMirrorInput;
    type Output = ();

    fn name(&self) -> &'static str {
        "ReactivateAutoRecords"
    }

    async fn run(
        &self,
        input: Self::Input,
        _idempotency_key: &str,
        _heartbeat: &mut Heartbeat,
    ) -> Result<(), ActivityError> {
        let records = self
            .core_db
            .zone_records_for_name(input.zone_id, &input.name, &input.record_type)
            .await
            .map_err(|e| ActivityError::Retryable(e.into()))?;

        if records.iter().any(|r| r.managed_by == ManagedBy::Custom) {
            return Ok(());
        }

        for record in records.into_iter().filter(|r| r.managed_by == ManagedBy::Auto) {
            self.powerdns
                .upsert_record(
                    &input.zone_name,
                    &record.name,
                    &record.record_type,
                    &record.content,
                    record.ttl,
                    record.priority,
                )
                .await
                .map_err(ActivityError::Retryable)?;
        }

        Ok(())
    }
}

//─────────────────────────────
//  Ambient PowerDNS activities (§6)
//─────────────────────────────

/// Typed input for [`UpsertPowerDnsRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertPowerDnsRecordInput {
    /// Zone apex name.
    pub zone_name: String,
    /// Record name.
    pub name: String,
    /// Record type.
    pub record_type: String,
    /// Record content.
    pub content: String,
    /// TTL in seconds.
    pub ttl: i32,
    /// Priority (MX only).
    pub priority: Option<i32>,
}

/// Direct PowerDNS upsert, for callers (DNS override workflows, zone
/// record Create/Update) that already hold the target record's full
/// shape and don't need `AutoCreateDNSRecords`'s derivation logic.
pub struct UpsertPowerDnsRecord {
    powerdns: Arc<dyn PowerDnsClient>,
}

impl UpsertPowerDnsRecord {
    /// Build the activity.
    pub fn new(powerdns: Arc<dyn PowerDnsClient>) -> Self {
        Self { powerdns }
    }
}

#[async_trait]
impl Activity for UpsertPowerDnsRecord {
    type Input = UpsertPowerDnsRecordInput;
    type Output = ();

    fn name(&self) -> &'static str {
        "UpsertPowerDnsRecord"
    }

    async fn run(
        &self,
        input: Self::Input,
        _idempotency_key: &str,
        _heartbeat: &mut Heartbeat,
    ) -> Result<(), ActivityError> {
        self.powerdns
            .upsert_record(&input.zone_name, &input.name, &input.record_type, &input.content, input.ttl, input.priority)
            .await
            .map_err(ActivityError::Retryable)
    }
}

/// Typed input for [`DeletePowerDnsRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletePowerDnsRecordInput {
    /// Zone apex name.
    pub zone_name: String,
    /// Record name.
    pub name: String,
    /// Record type.
    pub record_type: String,
    /// Record content.
    pub content: String,
}

/// Direct PowerDNS delete.
pub struct DeletePowerDnsRecord {
    powerdns: Arc<dyn PowerDnsClient>,
}

impl DeletePowerDnsRecord {
    /// Build the activity.
    pub fn new(powerdns: Arc<dyn PowerDnsClient>) -> Self {
        Self { powerdns }
    }
}

#[async_trait]
impl Activity for DeletePowerDnsRecord {
    type Input = DeletePowerDnsRecordInput;
    type Output = ();

    fn name(&self) -> &'static str {
        "DeletePowerDnsRecord"
    }

    async fn run(
        &self,
        input: Self::Input,
        _idempotency_key: &str,
        _heartbeat: &mut Heartbeat,
    ) -> Result<(), ActivityError> {
        self.powerdns
            .delete_record(&input.zone_name, &input.name, &input.record_type, &input.content)
            .await
            .map_err(ActivityError::Retryable)
    }
}

/// Typed input for [`CreatePowerDnsZone`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePowerDnsZoneInput {
    /// Zone apex name.
    pub zone_name: String,
}

/// Creates a zone in PowerDNS, idempotently.
pub struct CreatePowerDnsZone {
    powerdns: Arc<dyn PowerDnsClient>,
}

impl CreatePowerDnsZone {
    /// Build the activity.
    pub fn new(powerdns: Arc<dyn PowerDnsClient>) -> Self {
        Self { powerdns }
    }
}

#[async_trait]
impl Activity for CreatePowerDnsZone {
    type Input = CreatePowerDnsZoneInput;
    type Output = ();

    fn name(&self) -> &'static str {
        "CreatePowerDnsZone"
    }

    async fn run(
        &self,
        input: Self::Input,
        _idempotency_key: &str,
        _heartbeat: &mut Heartbeat,
    ) -> Result<(), ActivityError> {
        self.powerdns.create_zone(&input.zone_name).await.map_err(ActivityError::Retryable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakePowerDns {
        upserts: Mutex<Vec<(String, String, String, String)>>,
        deletes: Mutex<Vec<(String, String, String, String)>>,
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
            self.upserts.lock().await.push((
                zone_name.to_string(),
                name.to_string(),
                record_type.to_string(),
                content.to_string(),
            ));
            Ok(())
        }

        async fn delete_record(
            &self,
            zone_name: &str,
            name: &str,
            record_type: &str,
            content: &str,
        ) -> anyhow::Result<()> {
            self.deletes.lock().await.push((
                zone_name.to_string(),
                name.to_string(),
                record_type.to_string(),
                content.to_string(),
            ));
            Ok(())
        }
    }

    #[tokio::test]
    async fn upsert_and_delete_are_recorded_on_the_fake() {
        let fake = FakePowerDns::default();
        fake.upsert_record("example.com", "www.example.com", "A", "1.2.3.4", 300, None)
            .await
            .unwrap();
        fake.delete_record("example.com", "www.example.com", "A", "1.2.3.4").await.unwrap();

        assert_eq!(fake.upserts.lock().await.len(), 1);
        assert_eq!(fake.deletes.lock().await.len(), 1);
    }
}
