//! LB-shard convergence: diff the
//! desired `(fqdn -> lb_backend)` set against the on-disk HAProxy map
//! file, upserting what's missing and deleting what shouldn't be there.

use std::collections::HashMap;
use std::sync::Arc;

use hostctl_activities::lb::LbMapFiles;
use hostctl_engine::WorkflowExecutor;
use hostctl_store_postgres::CoreDb;
use hostctl_types::EntityId;
use hostctl_workflows::resource::{dispatch_step, ActivityStep};
use hostctl_workflows::WorkflowError;
use serde_json::json;

use crate::ConvergenceError;

/// Drives one LB shard's converge run to completion.
pub struct LbShardConverge {
    core_db: Arc<CoreDb>,
    map_files: Arc<LbMapFiles>,
}

impl LbShardConverge {
    /// Build the converge driver.
    pub fn new(core_db: Arc<CoreDb>, map_files: Arc<LbMapFiles>) -> Self {
        Self { core_db, map_files }
    }

    /// Run `ListActiveFQDNMappings` against the on-disk map, issuing
    /// `SetLBMapEntry`/`DeleteLBMapEntry` for the diff.
    pub async fn run(&self, executor: &mut WorkflowExecutor, shard_id: EntityId) -> Result<(), ConvergenceError> {
        let shard = self.core_db.get_shard(shard_id).await.map_err(|e| ConvergenceError::Store(e.into()))?;
        if shard.lb_backend.is_none() {
            return Err(ConvergenceError::Precondition(format!("shard {} has no lb_backend", shard_id.0)));
        }

        let desired: HashMap<String, String> = self
            .core_db
            .active_fqdn_mappings(shard.cluster_id)
            .await
            .map_err(|e| ConvergenceError::Store(e.into()))?
            .into_iter()
            .collect();

        let on_disk: HashMap<String, String> =
            self.map_files.entries(shard.cluster_id).await.map_err(ConvergenceError::Store)?.into_iter().collect();

        for (fqdn, backend) in &desired {
            if on_disk.get(fqdn) == Some(backend) {
                continue;
            }
            dispatch_step(
                executor,
                &ActivityStep {
                    step_kind: "set_lb_map_entry",
                    activity_name: "SetLBMapEntry",
                    input: json!({ "cluster_id": shard.cluster_id, "fqdn": fqdn, "lb_backend": backend }),
                },
            )
            .await
            .map_err(WorkflowError::from)?;
        }

        for fqdn in on_disk.keys().filter(|f| !desired.contains_key(f.as_str())) {
            dispatch_step(
                executor,
                &ActivityStep {
                    step_kind: "delete_lb_map_entry",
                    activity_name: "DeleteLBMapEntry",
                    input: json!({ "cluster_id": shard.cluster_id, "fqdn": fqdn }),
                },
            )
            .await
            .map_err(WorkflowError::from)?;
        }

        dispatch_step(
            executor,
            &ActivityStep {
                step_kind: "set_lb_shard_active",
                activity_name: "SetShardStatus",
                input: json!({ "shard_id": shard_id, "status": hostctl_types::ShardStatus::Active }),
            },
        )
        .await
        .map_err(WorkflowError::from)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_drops_entries_whose_fqdn_is_no_longer_desired() {
        let desired: HashMap<String, String> =
            [("www.example.com".to_string(), "backend-1".to_string())].into_iter().collect();
        let on_disk: HashMap<String, String> = [
            ("www.example.com".to_string(), "backend-1".to_string()),
            ("old.example.com".to_string(), "backend-1".to_string()),
        ]
        .into_iter()
        .collect();

        let to_delete: Vec<&String> = on_disk.keys().filter(|f| !desired.contains_key(f.as_str())).collect();
        assert_eq!(to_delete, vec![&"old.example.com".to_string()]);
    }
}
