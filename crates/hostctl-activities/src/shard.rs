//! `SetShardStatus`: closes (or opens) a shard's convergence window.

use std::sync::Arc;

use async_trait::async_trait;
use hostctl_store_postgres::CoreDb;
use hostctl_types::{EntityId, ShardStatus};
use serde::{Deserialize, Serialize};

use crate::{Activity, ActivityError, Heartbeat};

/// Typed input for [`SetShardStatus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetShardStatusInput {
    /// Shard to update.
    pub shard_id: EntityId,
    /// New convergence status.
    pub status: ShardStatus,
}

/// Flips a shard's convergence status. `Converging` is set at the start
/// of a converge run (the `WorkflowLock` on `converge:<shard_id>` is
/// what actually prevents a second concurrent converge, not this
/// status); `Active`/`Failed` close it out.
pub struct SetShardStatus {
    core_db: Arc<CoreDb>,
}

impl SetShardStatus {
    /// Build the activity.
    pub fn new(core_db: Arc<CoreDb>) -> Self {
        Self { core_db }
    }
}

#[async_trait]
impl Activity for SetShardStatus {
    type Input = SetShardStatusInput;
    type Output = ();

    fn name(&self) -> &'static str {
        "SetShardStatus"
    }

    async fn run(
        &self,
        input: Self::Input,
        _idempotency_key: &str,
        _heartbeat: &mut Heartbeat,
    ) -> Result<(), ActivityError> {
        self.core_db
            .set_shard_status(input.shard_id, input.status)
            .await
            .map_err(|e| ActivityError::Retryable(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_round_trips_through_json() {
        let input = SetShardStatusInput { shard_id: EntityId::new(), status: ShardStatus::Converging };
        let json = serde_json::to_value(&input).unwrap();
        let back: SetShardStatusInput = serde_json::from_value(json).unwrap();
        assert_eq!(back.status, ShardStatus::Converging);
    }
}
