//! `RetroactiveAutoRecords(zone)`: when a zone is created
//! after FQDNs that fall under it already exist, re-derive and
//! re-materialize their auto DNS records under the new zone.
//!
//! Scoped to FQDNs — the FQDN-sourced path is the one
//! `hostctl_activities::dns::AutoCreateDnsRecords` already implements.
//! Email-account auto records (MX/SPF/DKIM/DMARC) have no materializing
//! activity yet in this codebase, so a retroactive pass for them is
//! left unbuilt rather than invented without one to ground it against.

use std::sync::Arc;

use hostctl_activities::dns::LbAddress;
use hostctl_engine::WorkflowExecutor;
use hostctl_store_postgres::CoreDb;
use hostctl_types::EntityId;
use hostctl_workflows::resource::{dispatch_step, ActivityStep};
use hostctl_workflows::WorkflowError;
use serde_json::json;

use crate::ConvergenceError;

/// Re-materializes auto records for every FQDN that falls under a
/// newly created zone.
pub struct RetroactiveAutoRecords {
    core_db: Arc<CoreDb>,
}

impl RetroactiveAutoRecords {
    /// Build the driver against a core-DB handle.
    pub fn new(core_db: Arc<CoreDb>) -> Self {
        Self { core_db }
    }

    /// Run the pass for `zone_id`.
    pub async fn run(&self, executor: &mut WorkflowExecutor, zone_id: EntityId) -> Result<(), ConvergenceError> {
        let zone = self.core_db.get_zone(zone_id).await.map_err(|e| ConvergenceError::Store(e.into()))?;
        let fqdns =
            self.core_db.fqdns_matching_suffix(&zone.name).await.map_err(|e| ConvergenceError::Store(e.into()))?;

        for fqdn in fqdns {
            let webroot =
                self.core_db.get_webroot(fqdn.webroot_id).await.map_err(|e| ConvergenceError::Store(e.into()))?;
            let tenant =
                self.core_db.get_tenant(webroot.tenant_id).await.map_err(|e| ConvergenceError::Store(e.into()))?;
            let lb_nodes = self
                .core_db
                .lb_nodes_for_cluster(tenant.cluster_id)
                .await
                .map_err(|e| ConvergenceError::Store(e.into()))?;

            let lb_addresses: Vec<LbAddress> = lb_nodes
                .iter()
                .flat_map(|n| {
                    let v4 = n.ip.map(|addr| LbAddress::V4 { addr });
                    let v6 = n.ip6.map(|addr| LbAddress::V6 { addr });
                    [v4, v6].into_iter().flatten()
                })
                .collect();

            if lb_addresses.is_empty() {
                continue;
            }

            dispatch_step(
                executor,
                &ActivityStep {
                    step_kind: "retroactive_auto_create_dns_records",
                    activity_name: "AutoCreateDNSRecords",
                    input: json!({
                        "fqdn": fqdn.fqdn,
                        "lb_addresses": lb_addresses,
                        "source_fqdn_id": fqdn.id,
                    }),
                },
            )
            .await
            .map_err(WorkflowError::from)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lb_address_flattening_skips_nodes_with_no_address() {
        let addrs: Vec<LbAddress> = vec![None, Some(LbAddress::V4 { addr: "10.0.0.1".parse().unwrap() })]
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(addrs.len(), 1);
    }
}
