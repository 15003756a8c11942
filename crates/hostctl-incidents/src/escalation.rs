//! Escalation threshold sweep (§4.6), driven once per invocation. The
//! caller re-enters [`EscalationPass::run`] every minute under a fresh
//! `cron:incident-escalation:<tick>` workflow id (the engine's
//! reject-duplicate policy on that literal id is what keeps two ticks
//! for the same minute from double-firing), so this pass itself doesn't
//! need to track "have I already run this minute" state.

use std::sync::Arc;

use chrono::Duration;
use hostctl_activities::webhook::slack_incident_payload;
use hostctl_engine::WorkflowExecutor;
use hostctl_store_postgres::CoreDb;
use hostctl_types::{EntityId, Incident, IncidentAction, IncidentEvent, IncidentSeverity, IncidentStatus};
use hostctl_workflows::resource::{dispatch_step, ActivityStep};
use hostctl_workflows::WorkflowError;
use serde_json::json;

use crate::IncidentError;

/// Severity- and status-scoped overdue thresholds.
#[derive(Debug, Clone)]
pub struct EscalationThresholds {
    /// `severity=critical, status=open` threshold.
    pub critical_open: Duration,
    /// `severity=warning, status=open` threshold.
    pub warning_open: Duration,
    /// `status IN (investigating, remediating)` threshold.
    pub active_investigation: Duration,
}

impl Default for EscalationThresholds {
    fn default() -> Self {
        Self {
            critical_open: Duration::minutes(15),
            warning_open: Duration::hours(1),
            active_investigation: Duration::minutes(30),
        }
    }
}

/// Which incidents this pass escalated.
#[derive(Debug, Clone, Default)]
pub struct EscalationReport {
    /// Ids escalated this pass, in the order they were processed.
    pub escalated: Vec<EntityId>,
}

/// Drives one escalation sweep: list overdue incidents per policy,
/// transition each to `escalated`, append the timeline event, and fire
/// the webhook notification.
pub struct EscalationPass {
    core_db: Arc<CoreDb>,
    webhook_url: String,
    thresholds: EscalationThresholds,
}

impl EscalationPass {
    /// Build the pass against a core-DB handle and a fixed webhook
    /// destination.
    pub fn new(core_db: Arc<CoreDb>, webhook_url: impl Into<String>) -> Self {
        Self { core_db, webhook_url: webhook_url.into(), thresholds: EscalationThresholds::default() }
    }

    /// Override the default thresholds.
    pub fn with_thresholds(mut self, thresholds: EscalationThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Run the sweep.
    pub async fn run(&self, executor: &mut WorkflowExecutor) -> Result<EscalationReport, IncidentError> {
        let mut overdue: Vec<Incident> = Vec::new();

        overdue.extend(
            self.core_db
                .incidents_overdue(IncidentStatus::Open, self.thresholds.critical_open, true)
                .await
                .map_err(|e| IncidentError::Store(e.into()))?
                .into_iter()
                .filter(|i| i.severity == IncidentSeverity::Critical),
        );
        overdue.extend(
            self.core_db
                .incidents_overdue(IncidentStatus::Open, self.thresholds.warning_open, true)
                .await
                .map_err(|e| IncidentError::Store(e.into()))?
                .into_iter()
                .filter(|i| i.severity == IncidentSeverity::Warning),
        );
        overdue.extend(
            self.core_db
                .incidents_overdue(IncidentStatus::Investigating, self.thresholds.active_investigation, false)
                .await
                .map_err(|e| IncidentError::Store(e.into()))?,
        );
        overdue.extend(
            self.core_db
                .incidents_overdue(IncidentStatus::Remediating, self.thresholds.active_investigation, false)
                .await
                .map_err(|e| IncidentError::Store(e.into()))?,
        );

        let mut report = EscalationReport::default();

        for incident in overdue {
            dispatch_step(
                executor,
                &ActivityStep {
                    step_kind: "set_incident_escalated",
                    activity_name: "SetIncidentStatus",
                    input: json!({ "incident_id": incident.id, "status": IncidentStatus::Escalated, "resolution": null }),
                },
            )
            .await
            .map_err(WorkflowError::from)?;

            dispatch_step(
                executor,
                &ActivityStep {
                    step_kind: "record_escalated_event",
                    activity_name: "InsertIncidentEvent",
                    input: json!({ "event": IncidentEvent {
                        id: EntityId::new(),
                        incident_id: incident.id,
                        actor: "system".to_string(),
                        action: IncidentAction::Escalated,
                        detail: format!("exceeded escalation threshold while {:?}", incident.status),
                        metadata: json!({}),
                        created_at: chrono::Utc::now(),
                    } }),
                },
            )
            .await
            .map_err(WorkflowError::from)?;

            let severity_str = serde_json::to_value(incident.severity)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| "info".to_string());
            let payload = slack_incident_payload("incident.escalated", &severity_str, &incident.title, &incident.detail);

            dispatch_step(
                executor,
                &ActivityStep {
                    step_kind: "send_escalation_webhook",
                    activity_name: "Webhook",
                    input: json!({ "url": self.webhook_url, "body": payload }),
                },
            )
            .await
            .map_err(WorkflowError::from)?;

            report.escalated.push(incident.id);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds_match_the_literal_policy() {
        let thresholds = EscalationThresholds::default();
        assert_eq!(thresholds.critical_open, Duration::minutes(15));
        assert_eq!(thresholds.warning_open, Duration::hours(1));
        assert_eq!(thresholds.active_investigation, Duration::minutes(30));
    }
}
