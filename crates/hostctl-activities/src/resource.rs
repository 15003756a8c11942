//! `UpdateResourceStatus`: the single activity every resource workflow
//! phase-gates through.

use std::sync::Arc;

use async_trait::async_trait;
use hostctl_store_postgres::CoreDb;
use hostctl_types::ResourceStatus;
use serde::{Deserialize, Serialize};

use crate::{Activity, ActivityError, Heartbeat};

/// Typed input for [`UpdateResourceStatus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResourceStatusInput {
    /// Table name (`webroots`, `certificates`, …) — validated against the
    /// fixed set of hosted-resource tables `CoreDb::update_status` knows.
    pub table: String,
    /// Row id.
    pub id: hostctl_types::EntityId,
    /// New status.
    pub status: ResourceStatus,
    /// Optional human-readable detail, set on `Failed`.
    pub status_message: Option<String>,
}

const KNOWN_TABLES: &[&str] = &[
    "tenants",
    "webroots",
    "fqdns",
    "certificates",
    "databases",
    "database_users",
    "valkey_instances",
    "valkey_users",
    "s3_buckets",
    "s3_keys",
    "cron_jobs",
    "daemons",
    "ssh_keys",
    "zone_records",
    "email_accounts",
    "email_aliases",
    "email_forwards",
    "email_autoreplies",
    "backups",
];

/// Sets a resource row's lifecycle status.
///
/// `status == Active` clears any prior `status_message`; `status ==
/// Deleted` hard-deletes the row. Idempotent: re-running with the same
/// target status is a no-op UPDATE either way. Fails non-retryable if
/// `table` isn't one of the known hosted-resource tables, since no retry
/// will make an unknown table exist.
pub struct UpdateResourceStatus {
    core_db: Arc<CoreDb>,
}

impl UpdateResourceStatus {
    /// Build the activity against a core DB handle.
    pub fn new(core_db: Arc<CoreDb>) -> Self {
        Self { core_db }
    }
}

#[async_trait]
impl Activity for UpdateResourceStatus {
    type Input = UpdateResourceStatusInput;
    type Output = ();

    fn name(&self) -> &'static str {
        "UpdateResourceStatus"
    }

    async fn run(
        &self,
        input: Self::Input,
        _idempotency_key: &str,
        _heartbeat: &mut Heartbeat,
    ) -> Result<(), ActivityError> {
        let table: &'static str = KNOWN_TABLES
            .iter()
            .find(|&&t| t == input.table)
            .copied()
            .ok_or_else(|| {
                ActivityError::NonRetryable(anyhow::anyhow!("unknown resource table: {}", input.table))
            })?;

        self.core_db
            .update_status_with_message(table, input.id, input.status, input.status_message.as_deref())
            .await
            .map_err(|e| ActivityError::Retryable(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tables_cover_every_resource_kind_with_a_status_column() {
        for table in ["webroots", "certificates", "zone_records", "backups"] {
            assert!(KNOWN_TABLES.contains(&table));
        }
    }

    #[test]
    fn input_round_trips_through_json() {
        let input = UpdateResourceStatusInput {
            table: "webroots".into(),
            id: hostctl_types::EntityId::new(),
            status: ResourceStatus::Active,
            status_message: None,
        };
        let json = serde_json::to_value(&input).unwrap();
        let back: UpdateResourceStatusInput = serde_json::from_value(json).unwrap();
        assert_eq!(back.table, "webroots");
        assert_eq!(back.status, ResourceStatus::Active);
    }
}
