//! `SetLBMapEntry`: HAProxy runtime-API map management (§4.1, §6).
//!
//! No example repo carries a HAProxy client, so this is specified fresh
//! from the literal protocol description: the runtime API is a
//! line-oriented command socket (`set map <id> <key> <value>`), not an
//! HTTP endpoint, which is why [`HaproxyClient`] speaks a raw
//! request/response pair rather than `reqwest`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::{Activity, ActivityError, Heartbeat};

/// The HAProxy runtime-API surface `SetLBMapEntry` drives.
#[async_trait]
pub trait HaproxyClient: Send + Sync {
    /// Issue a runtime-API command over the cluster's admin socket and
    /// return its raw text response.
    async fn command(&self, cluster_id: hostctl_types::EntityId, command: &str) -> anyhow::Result<String>;
}

/// Typed input for [`SetLBMapEntry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetLbMapEntryInput {
    /// Cluster whose HAProxy runtime socket to use.
    pub cluster_id: hostctl_types::EntityId,
    /// FQDN key for the map entry. Trailing dots are stripped before the
    /// command is issued, so `example.com.` and `example.com` are the
    /// same map key.
    pub fqdn: String,
    /// Backend name to route `fqdn` to.
    pub lb_backend: String,
}

/// Sets a `fqdn -> backend` entry in the cluster's HAProxy runtime map.
///
/// Issues `set map … fqdn backend`; if the runtime API responds "not
/// found" (the key doesn't exist in the map yet), falls back to `add
/// map … fqdn backend`. The on-disk map file is rewritten under a
/// per-file mutex after a successful runtime-API write so the map
/// survives an HAProxy restart; `new()` callers share one `LbMapFiles`
/// instance per process so the mutex is actually exclusive.
pub struct SetLbMapEntry {
    haproxy: Arc<dyn HaproxyClient>,
    map_files: Arc<LbMapFiles>,
}

impl SetLbMapEntry {
    /// Build the activity.
    pub fn new(haproxy: Arc<dyn HaproxyClient>, map_files: Arc<LbMapFiles>) -> Self {
        Self { haproxy, map_files }
    }
}

const MAP_ID: &str = "fqdn_backend";

#[async_trait]
impl Activity for SetLbMapEntry {
    type Input = SetLbMapEntryInput;
    type Output = ();

    fn name(&self) -> &'static str {
        "SetLBMapEntry"
    }

    async fn run(
        &self,
        input: Self::Input,
        _idempotency_key: &str,
        _heartbeat: &mut Heartbeat,
    ) -> Result<(), ActivityError> {
        let fqdn = input.fqdn.trim_end_matches('.');

        let set_response = self
            .haproxy
            .command(input.cluster_id, &format!("set map {MAP_ID} {fqdn} {}", input.lb_backend))
            .await
            .map_err(ActivityError::Retryable)?;

        if set_response.to_lowercase().contains("not found") {
            self.haproxy
                .command(input.cluster_id, &format!("add map {MAP_ID} {fqdn} {}", input.lb_backend))
                .await
                .map_err(ActivityError::Retryable)?;
        }

        self.map_files
            .persist(input.cluster_id, fqdn, &input.lb_backend)
            .await
            .map_err(ActivityError::Retryable)?;

        Ok(())
    }
}

/// On-disk mirror of each cluster's HAProxy map file, rewritten after
/// every successful runtime-API update under a per-cluster mutex so
/// concurrent `SetLBMapEntry` activities targeting the same cluster
/// don't interleave writes.
pub struct LbMapFiles {
    base_dir: PathBuf,
    locks: dashmap::DashMap<hostctl_types::EntityId, Arc<Mutex<()>>>,
}

impl LbMapFiles {
    /// Build a map-file store rooted at `base_dir`.
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir, locks: dashmap::DashMap::new() }
    }

    async fn persist(&self, cluster_id: hostctl_types::EntityId, fqdn: &str, backend: &str) -> anyhow::Result<()> {
        let lock = self.locks.entry(cluster_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone();
        let _guard = lock.lock().await;

        let mut contents = self.read(cluster_id).await?;
        let entry_prefix = format!("{fqdn} ");
        contents = contents
            .lines()
            .filter(|line| !line.starts_with(&entry_prefix))
            .collect::<Vec<_>>()
            .join("\n");
        if !contents.is_empty() {
            contents.push('\n');
        }
        contents.push_str(&format!("{fqdn} {backend}\n"));

        self.write(cluster_id, &contents).await
    }

    async fn remove(&self, cluster_id: hostctl_types::EntityId, fqdn: &str) -> anyhow::Result<()> {
        let lock = self.locks.entry(cluster_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone();
        let _guard = lock.lock().await;

        let contents = self.read(cluster_id).await?;
        let entry_prefix = format!("{fqdn} ");
        let filtered = contents
            .lines()
            .filter(|line| !line.starts_with(&entry_prefix))
            .collect::<Vec<_>>()
            .join("\n");

        self.write(cluster_id, &filtered).await
    }

    async fn read(&self, cluster_id: hostctl_types::EntityId) -> anyhow::Result<String> {
        let path = self.base_dir.join(format!("{cluster_id}.map"));
        if path.exists() {
            Ok(fs::read_to_string(&path).await?)
        } else {
            Ok(String::new())
        }
    }

    async fn write(&self, cluster_id: hostctl_types::EntityId, contents: &str) -> anyhow::Result<()> {
        let path = self.base_dir.join(format!("{cluster_id}.map"));
        let body = if contents.is_empty() || contents.ends_with('\n') {
            contents.to_string()
        } else {
            format!("{contents}\n")
        };
        let mut file = fs::File::create(&path).await?;
        file.write_all(body.as_bytes()).await?;
        Ok(())
    }

    /// Every `(fqdn, backend)` entry currently on disk for a cluster, for
    /// convergence to diff against the desired set.
    pub async fn entries(&self, cluster_id: hostctl_types::EntityId) -> anyhow::Result<Vec<(String, String)>> {
        let contents = self.read(cluster_id).await?;
        Ok(contents
            .lines()
            .filter_map(|line| line.split_once(' '))
            .map(|(fqdn, backend)| (fqdn.to_string(), backend.to_string()))
            .collect())
    }
}

/// Typed input for [`DeleteLbMapEntry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteLbMapEntryInput {
    /// Cluster whose HAProxy runtime socket to use.
    pub cluster_id: hostctl_types::EntityId,
    /// FQDN key to remove from the map.
    pub fqdn: String,
}

/// Removes a `fqdn -> backend` entry, for convergence tearing down a map
/// entry whose FQDN is no longer part of the desired set.
pub struct DeleteLbMapEntry {
    haproxy: Arc<dyn HaproxyClient>,
    map_files: Arc<LbMapFiles>,
}

impl DeleteLbMapEntry {
    /// Build the activity.
    pub fn new(haproxy: Arc<dyn HaproxyClient>, map_files: Arc<LbMapFiles>) -> Self {
        Self { haproxy, map_files }
    }
}

#[async_trait]
impl Activity for DeleteLbMapEntry {
    type Input = DeleteLbMapEntryInput;
    type Output = ();

    fn name(&self) -> &'static str {
        "DeleteLBMapEntry"
    }

    async fn run(
        &self,
        input: Self::Input,
        _idempotency_key: &str,
        _heartbeat: &mut Heartbeat,
    ) -> Result<(), ActivityError> {
        let fqdn = input.fqdn.trim_end_matches('.');
        self.haproxy
            .command(input.cluster_id, &format!("del map {MAP_ID} {fqdn}"))
            .await
            .map_err(ActivityError::Retryable)?;

        self.map_files.remove(input.cluster_id, fqdn).await.map_err(ActivityError::Retryable)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn map_file_rewrites_existing_entry_instead_of_duplicating() {
        let dir = tempfile::tempdir().unwrap();
        let files = LbMapFiles::new(dir.path().to_path_buf());
        let cluster_id = hostctl_types::EntityId::new();

        files.persist(cluster_id, "example.com", "backend_a").await.unwrap();
        files.persist(cluster_id, "example.com", "backend_b").await.unwrap();

        let contents = fs::read_to_string(dir.path().join(format!("{cluster_id}.map"))).await.unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("backend_b"));
        assert!(!contents.contains("backend_a"));
    }

    #[test]
    fn trailing_dot_fqdn_is_normalized() {
        assert_eq!("example.com.".trim_end_matches('.'), "example.com");
    }
}
