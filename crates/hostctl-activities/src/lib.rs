#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **hostctl-activities** – The Activity Library.
//!
//! An activity is the unit of at-most-once, idempotent work a workflow
//! dispatches through the engine: update a status row, write a DNS
//! record, place an ACME challenge, call a node agent, run one LLM turn.
//! Every activity in this crate implements the [`Activity`] trait and is
//! adapted to the engine's type-erased [`hostctl_engine::ActivityFn`] form
//! by [`register_builtin_activities`], so `hostctl-engine` never needs a
//! compile-time dependency on any concrete activity.
//!
//! Activities must be idempotent: a create ignores "already exists", a
//! delete ignores "not found", an upsert is keyed by primary key. Errors
//! are classified into [`ActivityError::Retryable`] (network, 5xx,
//! transient DB — the engine schedules another attempt) and
//! [`ActivityError::NonRetryable`] (validation, 4xx, a PEM parse failure —
//! the engine gives up immediately).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

pub mod acme;
pub mod dns;
pub mod execute;
pub mod incident;
pub mod lb;
pub mod llm;
pub mod mail;
pub mod node_agent;
pub mod resource;
pub mod shard;
pub mod webhook;

/// Errors an [`Activity`] may return, classified for the engine's retry
/// policy.
///
/// Mirrors `AgentRuntimeError`'s classification shape: a flat set of
/// named failure kinds at the crate boundary, with the retry/no-retry
/// split folded in up front rather than inferred later from the error's
/// contents.
#[derive(Debug, thiserror::Error)]
pub enum ActivityError {
    /// Transient failure; retrying later may succeed.
    #[error("retryable: {0}")]
    Retryable(#[source] anyhow::Error),

    /// Permanent failure; retrying will not change the outcome.
    #[error("non-retryable: {0}")]
    NonRetryable(#[source] anyhow::Error),
}

impl ActivityError {
    /// Whether the engine should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActivityError::Retryable(_))
    }
}

impl From<ActivityError> for hostctl_engine::DispatchError {
    fn from(err: ActivityError) -> Self {
        match err {
            ActivityError::Retryable(e) => hostctl_engine::DispatchError::Retryable(e),
            ActivityError::NonRetryable(e) => hostctl_engine::DispatchError::NonRetryable(e),
        }
    }
}

/// Progress heartbeat for an activity expected to run longer than ~10s
/// (an LLM chat turn, ACME finalize, a shard converge fan-out).
///
/// `turn` must increase monotonically across calls from the same
/// activity invocation; the engine treats a stalled `turn` (no call for
/// 2x the heartbeat period) as a retryable failure.
pub struct Heartbeat {
    sink: Arc<dyn hostctl_engine::HeartbeatSink>,
    turn: u32,
}

impl Heartbeat {
    /// Wrap an engine-supplied sink for use inside an activity body.
    pub fn new(sink: Arc<dyn hostctl_engine::HeartbeatSink>) -> Self {
        Self { sink, turn: 0 }
    }

    /// Emit the next turn. `of` is the expected total turn count, if
    /// known ahead of time (e.g. shard fan-out size).
    pub async fn tick(&mut self, of: Option<u32>, detail: Option<&str>) {
        self.turn += 1;
        self.sink.heartbeat(self.turn, of, detail).await;
    }
}

/// One unit of idempotent, at-most-once dispatchable work.
///
/// `Input`/`Output` are the typed parameters and result the workflow code
/// works with directly; [`register_builtin_activities`] erases both to
/// JSON so the engine's dispatch table stays untyped.
#[async_trait]
pub trait Activity: Send + Sync {
    /// Typed input parameters.
    type Input: DeserializeOwned + Send + Sync;
    /// Typed result.
    type Output: Serialize + Send + Sync;

    /// The name this activity is registered under (matches the name used
    /// in workflow code and task-queue diagnostics).
    fn name(&self) -> &'static str;

    /// Run the activity. `idempotency_key` is stable across retries of
    /// the same logical step and should be used as the dedupe key for
    /// any "insert if not exists" the activity performs.
    async fn run(
        &self,
        input: Self::Input,
        idempotency_key: &str,
        heartbeat: &mut Heartbeat,
    ) -> Result<Self::Output, ActivityError>;
}

/// Adapt a typed [`Activity`] into the engine's erased
/// [`hostctl_engine::ActivityFn`] and register it under [`Activity::name`].
pub fn register_activity<A>(activity: A)
where
    A: Activity + 'static,
{
    let activity = Arc::new(activity);
    let name = activity.name();

    hostctl_engine::register_activity(
        name,
        Arc::new(move |input, idempotency_key, sink| {
            let activity = Arc::clone(&activity);
            Box::pin(async move {
                let typed_input: A::Input = serde_json::from_value(input)
                    .map_err(|e| hostctl_engine::DispatchError::NonRetryable(e.into()))?;

                let mut heartbeat = Heartbeat::new(sink);
                let output = activity
                    .run(typed_input, &idempotency_key, &mut heartbeat)
                    .await
                    .map_err(hostctl_engine::DispatchError::from)?;

                serde_json::to_value(output)
                    .map_err(|e| hostctl_engine::DispatchError::NonRetryable(e.into()))
            })
        }),
    );
}

/// Register every built-in activity with the engine, for `hostctl-cli`'s
/// bootstrap to call once at startup. Each concrete client
/// (`PowerDnsClient`, `HaproxyClient`, `AcmeClient`, `NodeAgent`,
/// `MailClient`, `WebhookSender`, `LlmProvider`) is supplied by the
/// caller so this crate stays ignorant of which transport (in-process
/// fake vs. real network client) is wired in.
#[allow(clippy::too_many_arguments)]
pub fn register_builtin_activities(
    core_db: Arc<hostctl_store_postgres::CoreDb>,
    powerdns: Arc<dyn dns::PowerDnsClient>,
    haproxy: Arc<dyn lb::HaproxyClient>,
    lb_map_files: Arc<lb::LbMapFiles>,
    acme: Arc<dyn acme::AcmeClient>,
    node_agent: Arc<dyn node_agent::NodeAgent>,
    mail: Arc<dyn mail::MailClient>,
    webhook: Arc<dyn webhook::WebhookSender>,
    llm: Arc<dyn llm::LlmProvider>,
) {
    register_activity(resource::UpdateResourceStatus::new(core_db.clone()));
    register_activity(shard::SetShardStatus::new(core_db.clone()));

    register_activity(dns::AutoCreateDnsRecords::new(core_db.clone(), powerdns.clone()));
    register_activity(dns::DeactivateAutoRecords::new(core_db.clone(), powerdns.clone()));
    register_activity(dns::ReactivateAutoRecords::new(core_db.clone(), powerdns.clone()));
    register_activity(dns::UpsertPowerDnsRecord::new(powerdns.clone()));
    register_activity(dns::DeletePowerDnsRecord::new(powerdns.clone()));
    register_activity(dns::CreatePowerDnsZone::new(powerdns));

    register_activity(lb::SetLbMapEntry::new(haproxy.clone(), lb_map_files.clone()));
    register_activity(lb::DeleteLbMapEntry::new(haproxy, lb_map_files));

    register_activity(acme::CreateOrder::new(acme.clone()));
    register_activity(acme::GetHttp01Challenge);
    register_activity(acme::PlaceHttp01Challenge::new(node_agent.clone()));
    register_activity(acme::AcceptChallenge::new(acme.clone()));
    register_activity(acme::FinalizeOrder::new(acme));
    register_activity(acme::CleanupHttp01Challenge::new(node_agent.clone()));
    register_activity(acme::StoreCertificate::new(core_db.clone()));
    register_activity(acme::InstallCertificate::new(node_agent.clone()));
    register_activity(acme::ActivateCertificate::new(core_db.clone()));

    register_activity(node_agent::NodeAgentCall::new(node_agent));
    register_activity(mail::StalwartMailOp::new(mail));
    register_activity(webhook::Webhook::new(webhook));
    register_activity(llm::Chat::new(llm));
    register_activity(execute::Execute);

    register_activity(incident::CreateOrDedupeIncident::new(core_db.clone()));
    register_activity(incident::AutoResolveIncidents::new(core_db.clone()));
    register_activity(incident::SetIncidentStatus::new(core_db.clone()));
    register_activity(incident::InsertIncidentEvent::new(core_db));
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Activity for Echo {
        type Input = serde_json::Value;
        type Output = serde_json::Value;

        fn name(&self) -> &'static str {
            "TestEcho"
        }

        async fn run(
            &self,
            input: Self::Input,
            _idempotency_key: &str,
            _heartbeat: &mut Heartbeat,
        ) -> Result<Self::Output, ActivityError> {
            Ok(input)
        }
    }

    #[tokio::test]
    async fn registered_activity_round_trips_through_json() {
        register_activity(Echo);

        let result = hostctl_engine::dispatch_activity(
            "TestEcho",
            serde_json::json!({"a": 1}),
            "key-1".into(),
            Arc::new(hostctl_engine::NullHeartbeatSink),
        )
        .await
        .unwrap();

        assert_eq!(result, serde_json::json!({"a": 1}));
    }
}
