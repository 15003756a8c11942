#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **hostctl-store-postgres** – Postgres-backed storage driver for hostctl.
//!
//! This crate has two responsibilities that share a connection pool but are
//! otherwise independent:
//!
//! - [`workflow_history::PostgresStepStore`] implements
//!   [`hostctl_store_core::StorageBackend`]: the durable, append-only log of
//!   workflow steps a replay folds over after a crash.
//! - [`core_db::CoreDb`] is the relational repository over the control
//!   plane's entities (§3): tenants, shards, nodes, hosted resources, DNS,
//!   and incidents. Resource workflows and the convergence/incident
//!   subsystems read and write through this layer; it is the system of
//!   record PowerDNS is reconciled against.
//!
//! Both halves embed their schema via `sqlx::migrate!`, applied once at
//! startup by the `hostctl-cli` binary before the worker pool starts.

pub mod core_db;
pub mod workflow_history;

pub use core_db::{CoreDb, CoreDbError};
pub use workflow_history::PostgresStepStore;

/// Embedded migration set shared by both halves of this crate.
///
/// Exposed so `hostctl-cli` can run `MIGRATOR.run(&pool)` once at startup
/// rather than each half applying its own migration pass.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
