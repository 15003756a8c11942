//! Durable workflow-step log backed by Postgres.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tokio::sync::broadcast;

use hostctl_store_core::{CausalDigest, StepId, StorageBackend, WorkflowStepHeader};

/// Default broadcast channel size for the live step stream.
const DEFAULT_BROADCAST_SIZE: usize = 256;

/// A durable, Postgres-backed workflow-step store.
///
/// Two tables back this implementation: `workflow_steps` (one row per
/// committed step, keyed by step id) and `workflow_payloads` (payload bytes
/// deduplicated by causal digest). A worker pool resuming after a crash
/// calls [`StorageBackend::history`] for every in-flight `workflow_id` to
/// replay it back to its last committed step before accepting new work.
#[derive(Debug)]
pub struct PostgresStepStore {
    pool: PgPool,
    broadcast_tx: broadcast::Sender<WorkflowStepHeader>,
}

impl PostgresStepStore {
    /// Build a step store over an already-connected, already-migrated pool.
    ///
    /// Migrations are applied once by `hostctl_store_postgres::MIGRATOR` at
    /// binary startup, not per-store, since `core_db::CoreDb` shares the
    /// same pool and migration set.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            broadcast_tx: broadcast::channel(DEFAULT_BROADCAST_SIZE).0,
        }
    }

    /// Subscribe to the live step stream.
    ///
    /// Returns a receiver that will receive copies of all step headers as
    /// they are committed to storage. Subscribers that fall behind may miss
    /// steps if the broadcast buffer overflows.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowStepHeader> {
        self.broadcast_tx.subscribe()
    }

    /// Get the total number of steps stored in the database.
    pub async fn step_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM workflow_steps")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }

    /// Get the total number of unique payloads stored.
    pub async fn payload_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM workflow_payloads")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }
}

#[async_trait]
impl StorageBackend for PostgresStepStore {
    async fn commit(&self, header: &WorkflowStepHeader, payload: &[u8]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO workflow_payloads (digest, payload_data) VALUES ($1, $2)
             ON CONFLICT (digest) DO NOTHING",
        )
        .bind(&header.digest[..])
        .bind(payload)
        .execute(&mut *tx)
        .await?;

        let header_bytes = rmp_serde::to_vec_named(header)?;
        let parents: Vec<uuid::Uuid> = header.parents.iter().copied().collect();

        sqlx::query(
            r#"
            INSERT INTO workflow_steps
                (id, workflow_id, parents, step_timestamp, digest, kind, header_data)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                header_data = EXCLUDED.header_data
            "#,
        )
        .bind(header.id)
        .bind(&header.workflow_id)
        .bind(&parents)
        .bind(header.timestamp)
        .bind(&header.digest[..])
        .bind(&header.kind)
        .bind(&header_bytes)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let _ = self.broadcast_tx.send(header.clone());

        Ok(())
    }

    async fn header(&self, id: &StepId) -> Result<Option<WorkflowStepHeader>> {
        let row = sqlx::query("SELECT header_data FROM workflow_steps WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let bytes: Vec<u8> = row.get("header_data");
                let header = rmp_serde::from_slice(&bytes)
                    .map_err(|e| anyhow::anyhow!("failed to deserialize workflow step: {e}"))?;
                Ok(Some(header))
            }
            None => Ok(None),
        }
    }

    async fn payload_bytes(&self, digest: &CausalDigest) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT payload_data FROM workflow_payloads WHERE digest = $1")
            .bind(&digest[..])
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get("payload_data")))
    }

    async fn history(&self, workflow_id: &str) -> Result<Vec<WorkflowStepHeader>> {
        let rows = sqlx::query(
            "SELECT header_data FROM workflow_steps
             WHERE workflow_id = $1
             ORDER BY step_timestamp ASC",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let bytes: Vec<u8> = row.get("header_data");
                rmp_serde::from_slice(&bytes)
                    .map_err(|e| anyhow::anyhow!("failed to deserialize workflow step: {e}"))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    // These tests require a live Postgres instance reachable via
    // `DATABASE_URL` and are gated behind the `postgres-integration-tests`
    // env var so `cargo test` stays hermetic by default; see
    // `hostctl-store-memory` for the equivalent hermetic coverage of the
    // same `StorageBackend` contract.
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct TestStep {
        message: String,
        value: i32,
    }

    async fn connect() -> Option<PgPool> {
        let url = std::env::var("DATABASE_URL").ok()?;
        if std::env::var("POSTGRES_INTEGRATION_TESTS").is_err() {
            return None;
        }
        let pool = PgPool::connect(&url).await.ok()?;
        crate::MIGRATOR.run(&pool).await.ok()?;
        Some(pool)
    }

    #[tokio::test]
    async fn test_basic_storage_roundtrip() {
        let Some(pool) = connect().await else {
            return;
        };
        let backend = PostgresStepStore::new(pool);

        let step = TestStep { message: "test".into(), value: 42 };
        let header = hostctl_store_core::create_step_header(
            &[],
            "resource:webroot:00000000-0000-0000-0000-000000000000".to_string(),
            "activity.UpdateResourceStatus".to_string(),
            &step,
        ).unwrap();
        let payload_bytes = rmp_serde::to_vec_named(&step).unwrap();

        backend.commit(&header, &payload_bytes).await.unwrap();

        let retrieved = backend.header(&header.id).await.unwrap().unwrap();
        assert_eq!(retrieved, header);
    }

    #[tokio::test]
    async fn test_history_ordered_by_commit_time() {
        let Some(pool) = connect().await else {
            return;
        };
        let backend = PostgresStepStore::new(pool);
        let workflow_id = format!("resource:fqdn:{}", uuid::Uuid::new_v4());

        let mut prev = vec![];
        for i in 0..3 {
            let step = TestStep { message: format!("step-{i}"), value: i };
            let header = hostctl_store_core::create_step_header(
                &prev, workflow_id.clone(), format!("activity.Step{i}"), &step,
            ).unwrap();
            backend.commit(&header, &rmp_serde::to_vec_named(&step).unwrap()).await.unwrap();
            prev = vec![header];
        }

        let history = backend.history(&workflow_id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].kind, "activity.Step0");
    }
}
