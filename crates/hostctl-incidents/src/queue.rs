//! The investigation queue processor (§4.6 step 1): lists unassigned
//! open incidents, claims them one at a time for a named agent
//! instance, and gates how many investigations of a given
//! `incident_type` may run concurrently.
//!
//! Concurrency is per type rather than global — a flood of
//! `disk.full` incidents on one shard shouldn't starve the one
//! `cert.renewal_failed` incident that just came in. Each type gets its
//! own [`tokio::sync::Semaphore`], created lazily and cached in a
//! [`dashmap::DashMap`] so callers pay no lock contention across
//! unrelated types.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use hostctl_store_postgres::CoreDb;
use hostctl_types::Incident;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::IncidentError;

/// Default number of concurrent investigations allowed per incident
/// type, absent a [`QueueProcessor::with_type_concurrency`] override.
pub const DEFAULT_CONCURRENCY_PER_TYPE: usize = 3;

/// Claims work for the investigation agent and gates per-type
/// concurrency. Stateless across restarts beyond what's in the
/// database — the semaphore map just tracks in-process slots, so a
/// fresh process starts every type back at full concurrency.
pub struct QueueProcessor {
    core_db: Arc<CoreDb>,
    default_concurrency: usize,
    per_type_concurrency: HashMap<String, usize>,
    semaphores: DashMap<String, Arc<Semaphore>>,
}

impl QueueProcessor {
    /// Build a processor with [`DEFAULT_CONCURRENCY_PER_TYPE`] for
    /// every incident type.
    pub fn new(core_db: Arc<CoreDb>) -> Self {
        Self {
            core_db,
            default_concurrency: DEFAULT_CONCURRENCY_PER_TYPE,
            per_type_concurrency: HashMap::new(),
            semaphores: DashMap::new(),
        }
    }

    /// Override the concurrency limit for types with no explicit
    /// override.
    pub fn with_default_concurrency(mut self, n: usize) -> Self {
        self.default_concurrency = n;
        self
    }

    /// Override the concurrency limit for one incident type.
    pub fn with_type_concurrency(mut self, incident_type: impl Into<String>, n: usize) -> Self {
        self.per_type_concurrency.insert(incident_type.into(), n);
        self
    }

    /// Lists unassigned open incidents and claims each for `agent_id`
    /// in turn, skipping any that lost the claim race to another agent
    /// instance (`claim_incident_for_agent` returning `false`). Returns
    /// only the incidents this call actually claimed.
    pub async fn claim_batch(&self, agent_id: &str) -> Result<Vec<Incident>, IncidentError> {
        let candidates =
            self.core_db.list_unassigned_open_incidents().await.map_err(|e| IncidentError::Store(e.into()))?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for incident in candidates {
            let got = self
                .core_db
                .claim_incident_for_agent(incident.id, agent_id)
                .await
                .map_err(|e| IncidentError::Store(e.into()))?;
            if got {
                claimed.push(incident);
            }
        }
        Ok(claimed)
    }

    /// Acquires a concurrency slot for `incident_type`, waiting if the
    /// type is already at its limit. The returned permit's lifetime
    /// bounds how long the slot is held — drop it (end of the
    /// investigation) to free the slot for the next queued incident of
    /// this type.
    pub async fn acquire_slot(&self, incident_type: &str) -> OwnedSemaphorePermit {
        let limit = self.per_type_concurrency.get(incident_type).copied().unwrap_or(self.default_concurrency);
        let semaphore = self
            .semaphores
            .entry(incident_type.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(limit)))
            .clone();

        semaphore.acquire_owned().await.expect("semaphore is never closed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_slot_blocks_past_the_per_type_limit() {
        let semaphore = Arc::new(Semaphore::new(1));
        let _first = semaphore.clone().acquire_owned().await.unwrap();
        assert_eq!(semaphore.available_permits(), 0);
    }

    #[test]
    fn type_override_takes_precedence_over_default() {
        let mut overrides = HashMap::new();
        overrides.insert("disk.full".to_string(), 1usize);
        let limit = overrides.get("disk.full").copied().unwrap_or(DEFAULT_CONCURRENCY_PER_TYPE);
        assert_eq!(limit, 1);
    }
}
