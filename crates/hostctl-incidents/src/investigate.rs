//! The investigation agent's per-incident turn loop (§4.6, step 3):
//! seeds `[system, user]` messages from the incident row, optionally
//! injects a resolution hint carried in a recently resolved similar
//! incident's `resolved` event metadata, then alternates `Chat`/
//! `Execute` dispatches until a terminal tool fires or turns run out.
//!
//! Durable under the caller's `incident:<id>` workflow id: every
//! dispatch goes through [`dispatch_step`], so a crash mid-conversation
//! resumes with the same message history rather than re-asking the
//! model turns it already answered.

use std::sync::Arc;

use chrono::Utc;
use hostctl_activities::llm::{is_terminal_tool, ChatInput, ChatMessage, ChatOutput, Role, ToolCall, ToolSpec};
use hostctl_bus_core::{DomainEvent, EventBus};
use hostctl_engine::WorkflowExecutor;
use hostctl_store_postgres::CoreDb;
use hostctl_types::{EntityId, IncidentAction, IncidentEvent, IncidentStatus};
use hostctl_workflows::resource::{dispatch_retryable, dispatch_step, ActivityStep};
use hostctl_workflows::WorkflowError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::IncidentError;

/// Bound on investigation turns absent an explicit override.
pub const DEFAULT_MAX_TURNS: u32 = 20;

const SYSTEM_PROMPT: &str = "You are the incident investigation agent for a multi-tenant web hosting \
control plane. You are given an incident as JSON and a catalog of tools. Investigate the cause, take \
remediating action where safe, and finish by calling resolve_incident with a resolution summary, or \
escalate_incident if the incident needs a human.";

/// A compact summary of how a past incident of the same type was
/// resolved, carried in its `resolved` event's metadata so a future
/// investigation can seed its context with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionHint {
    /// The resolved incident's type.
    pub incident_type: String,
    /// The resolved incident's title.
    pub title: String,
    /// The resolution text the agent (or an operator) recorded.
    pub resolution: String,
    /// The first 10 tool names called while investigating it.
    pub tool_steps: Vec<String>,
}

/// How an investigation run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum InvestigationOutcome {
    /// `resolve_incident` fired; carries the hint recorded for future
    /// similar incidents.
    Resolved {
        /// The hint just recorded.
        hint: ResolutionHint,
    },
    /// `escalate_incident` fired, or the turn budget was exhausted.
    Escalated,
    /// The assistant produced a final answer with no tool calls before
    /// escalating or resolving — left `investigating` for the
    /// escalation sweep to pick up once it goes stale.
    MaxTurns,
}

/// Drives one incident's investigation loop to completion.
pub struct InvestigateIncident {
    core_db: Arc<CoreDb>,
    max_turns: u32,
}

impl InvestigateIncident {
    /// Build the driver against a core-DB handle, with the default
    /// turn budget.
    pub fn new(core_db: Arc<CoreDb>) -> Self {
        Self { core_db, max_turns: DEFAULT_MAX_TURNS }
    }

    /// Override the turn budget.
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Run the loop for `incident_id`. `tools` is the catalog the model
    /// may call this turn, supplied by the caller since this crate
    /// doesn't know the domain tool set (`list_nodes`, `converge_shard`,
    /// …) — only the two terminal tool names.
    pub async fn run(
        &self,
        executor: &mut WorkflowExecutor,
        incident_id: EntityId,
        tools: &[ToolSpec],
        bus: &dyn EventBus,
    ) -> Result<InvestigationOutcome, IncidentError> {
        let incident = self.core_db.get_incident(incident_id).await.map_err(|e| IncidentError::Store(e.into()))?;

        let mut messages = vec![
            ChatMessage { role: Role::System, content: SYSTEM_PROMPT.to_string(), tool_call_id: None },
            ChatMessage {
                role: Role::User,
                content: serde_json::to_string(&incident).map_err(|e| IncidentError::Store(e.into()))?,
                tool_call_id: None,
            },
        ];

        if let Some(hint) = self.find_resolution_hint(&incident.incident_type).await {
            messages.push(ChatMessage {
                role: Role::User,
                content: format!(
                    "A similar incident was previously resolved: {}",
                    serde_json::to_string(&hint).unwrap_or_default()
                ),
                tool_call_id: None,
            });
        }

        let mut last_seen_at = incident.detected_at;
        let mut tool_steps_taken: Vec<String> = Vec::new();

        for turn in 1..=self.max_turns {
            tracing::info!(incident_id = %incident_id.0, turn, max_turns = self.max_turns, "investigation turn");

            let timeline = self.core_db.incident_timeline(incident_id).await.map_err(|e| IncidentError::Store(e.into()))?;
            let admin_messages: Vec<IncidentEvent> = timeline
                .into_iter()
                .filter(|e| e.action == IncidentAction::AdminMessage && e.created_at > last_seen_at)
                .collect();

            for admin_event in &admin_messages {
                messages.push(ChatMessage {
                    role: Role::User,
                    content: format!("Message from admin operator: {}", admin_event.detail),
                    tool_call_id: None,
                });
                last_seen_at = admin_event.created_at;

                dispatch_step(
                    executor,
                    &ActivityStep {
                        step_kind: "acknowledge_admin_message",
                        activity_name: "InsertIncidentEvent",
                        input: json!({ "event": IncidentEvent {
                            id: EntityId::new(), incident_id, actor: "agent:incident-investigator".to_string(),
                            action: IncidentAction::Commented, detail: "acknowledged admin message".to_string(),
                            metadata: json!({}), created_at: Utc::now(),
                        } }),
                    },
                )
                .await
                .map_err(WorkflowError::from)?;
            }

            let chat_output: ChatOutput = self
                .dispatch_typed(
                    executor,
                    "chat_turn",
                    "Chat",
                    serde_json::to_value(ChatInput { messages: messages.clone(), tools: tools.to_vec() })
                        .map_err(|e| IncidentError::Store(e.into()))?,
                )
                .await?;

            messages.push(ChatMessage {
                role: Role::Assistant,
                content: chat_output.content.clone(),
                tool_call_id: None,
            });

            if chat_output.tool_calls.is_empty() {
                dispatch_step(
                    executor,
                    &ActivityStep {
                        step_kind: "record_final_comment",
                        activity_name: "InsertIncidentEvent",
                        input: json!({ "event": IncidentEvent {
                            id: EntityId::new(), incident_id, actor: "agent:incident-investigator".to_string(),
                            action: IncidentAction::Commented, detail: chat_output.content, metadata: json!({}),
                            created_at: Utc::now(),
                        } }),
                    },
                )
                .await
                .map_err(WorkflowError::from)?;
                return Ok(InvestigationOutcome::MaxTurns);
            }

            for call in &chat_output.tool_calls {
                let result = self.dispatch_tool_call(executor, call).await?;
                tool_steps_taken.push(call.name.clone());

                messages.push(ChatMessage {
                    role: Role::Tool,
                    content: result.to_string(),
                    tool_call_id: Some(call.id.clone()),
                });

                dispatch_step(
                    executor,
                    &ActivityStep {
                        step_kind: "record_investigated_event",
                        activity_name: "InsertIncidentEvent",
                        input: json!({ "event": IncidentEvent {
                            id: EntityId::new(), incident_id, actor: "agent:incident-investigator".to_string(),
                            action: IncidentAction::Investigated, detail: format!("called {}", call.name),
                            metadata: json!({ "tool": call.name, "arguments": call.arguments, "result": result }),
                            created_at: Utc::now(),
                        } }),
                    },
                )
                .await
                .map_err(WorkflowError::from)?;

                if is_terminal_tool(&call.name) {
                    return self.finish(executor, incident_id, &incident.incident_type, &incident.title, call, &tool_steps_taken, bus).await;
                }
            }
        }

        dispatch_step(
            executor,
            &ActivityStep {
                step_kind: "record_exhausted_event",
                activity_name: "InsertIncidentEvent",
                input: json!({ "event": IncidentEvent {
                    id: EntityId::new(), incident_id, actor: "agent:incident-investigator".to_string(),
                    action: IncidentAction::Escalated,
                    detail: format!("exhausted {} turns without resolving", self.max_turns),
                    metadata: json!({}), created_at: Utc::now(),
                } }),
            },
        )
        .await
        .map_err(WorkflowError::from)?;

        self.dispatch_typed::<()>(
            executor,
            "set_escalated_on_exhaustion",
            "SetIncidentStatus",
            json!({ "incident_id": incident_id, "status": IncidentStatus::Escalated, "resolution": null }),
        )
        .await?;

        let _ = bus.publish(&DomainEvent::IncidentStatusChanged { incident_id, status: IncidentStatus::Escalated });
        Ok(InvestigationOutcome::MaxTurns)
    }

    async fn finish(
        &self,
        executor: &mut WorkflowExecutor,
        incident_id: EntityId,
        incident_type: &str,
        title: &str,
        terminal_call: &ToolCall,
        tool_steps_taken: &[String],
        bus: &dyn EventBus,
    ) -> Result<InvestigationOutcome, IncidentError> {
        match terminal_call.name.as_str() {
            "resolve_incident" => {
                let resolution = terminal_call
                    .arguments
                    .get("resolution")
                    .and_then(|v| v.as_str())
                    .unwrap_or("resolved")
                    .to_string();

                self.dispatch_typed::<()>(
                    executor,
                    "set_resolved",
                    "SetIncidentStatus",
                    json!({ "incident_id": incident_id, "status": IncidentStatus::Resolved, "resolution": resolution }),
                )
                .await?;

                let hint = ResolutionHint {
                    incident_type: incident_type.to_string(),
                    title: title.to_string(),
                    resolution: resolution.clone(),
                    tool_steps: tool_steps_taken.iter().take(10).cloned().collect(),
                };

                dispatch_step(
                    executor,
                    &ActivityStep {
                        step_kind: "record_resolved_event",
                        activity_name: "InsertIncidentEvent",
                        input: json!({ "event": IncidentEvent {
                            id: EntityId::new(), incident_id, actor: "agent:incident-investigator".to_string(),
                            action: IncidentAction::Resolved, detail: resolution,
                            metadata: serde_json::to_value(&hint).unwrap_or_default(), created_at: Utc::now(),
                        } }),
                    },
                )
                .await
                .map_err(WorkflowError::from)?;

                let _ = bus.publish(&DomainEvent::IncidentStatusChanged { incident_id, status: IncidentStatus::Resolved });
                Ok(InvestigationOutcome::Resolved { hint })
            }
            "escalate_incident" => {
                self.dispatch_typed::<()>(
                    executor,
                    "set_escalated",
                    "SetIncidentStatus",
                    json!({ "incident_id": incident_id, "status": IncidentStatus::Escalated, "resolution": null }),
                )
                .await?;

                dispatch_step(
                    executor,
                    &ActivityStep {
                        step_kind: "record_agent_escalated_event",
                        activity_name: "InsertIncidentEvent",
                        input: json!({ "event": IncidentEvent {
                            id: EntityId::new(), incident_id, actor: "agent:incident-investigator".to_string(),
                            action: IncidentAction::Escalated, detail: "agent escalated".to_string(), metadata: json!({}),
                            created_at: Utc::now(),
                        } }),
                    },
                )
                .await
                .map_err(WorkflowError::from)?;

                let _ = bus.publish(&DomainEvent::IncidentStatusChanged { incident_id, status: IncidentStatus::Escalated });
                Ok(InvestigationOutcome::Escalated)
            }
            other => unreachable!("is_terminal_tool only admits resolve_incident/escalate_incident, got {other}"),
        }
    }

    /// Runs `Execute` for one tool call. A retryable failure propagates
    /// so the caller's outer retry loop re-enters the whole
    /// investigation; a non-retryable one (unknown tool, tool-side
    /// validation) is fed back to the model as `{"error": "..."}`
    /// rather than failing the run, per §4.6's failure semantics.
    async fn dispatch_tool_call(
        &self,
        executor: &mut WorkflowExecutor,
        call: &ToolCall,
    ) -> Result<serde_json::Value, IncidentError> {
        match dispatch_step(
            executor,
            &ActivityStep {
                step_kind: "tool_call",
                activity_name: "Execute",
                input: json!({ "tool_name": call.name, "arguments": call.arguments }),
            },
        )
        .await
        {
            Ok(value) => Ok(value),
            Err(err) => {
                if dispatch_retryable(&err) {
                    Err(IncidentError::Workflow(err))
                } else {
                    Ok(json!({ "error": err.to_string() }))
                }
            }
        }
    }

    async fn find_resolution_hint(&self, incident_type: &str) -> Option<ResolutionHint> {
        let prior = self.core_db.recent_resolved_incident_of_type(incident_type).await.ok().flatten()?;
        let timeline = self.core_db.incident_timeline(prior.id).await.ok()?;
        timeline
            .into_iter()
            .rev()
            .find(|e| e.action == IncidentAction::Resolved)
            .and_then(|e| serde_json::from_value(e.metadata).ok())
    }

    async fn dispatch_typed<T: DeserializeOwned>(
        &self,
        executor: &mut WorkflowExecutor,
        step_kind: &'static str,
        activity_name: &'static str,
        input: serde_json::Value,
    ) -> Result<T, IncidentError> {
        let value = dispatch_step(executor, &ActivityStep { step_kind, activity_name, input })
            .await
            .map_err(WorkflowError::from)?;
        serde_json::from_value(value).map_err(|e| IncidentError::Store(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_hint_keeps_only_the_first_ten_tool_steps() {
        let steps: Vec<String> = (0..15).map(|i| format!("tool_{i}")).collect();
        let hint = ResolutionHint {
            incident_type: "db.replication_broken".to_string(),
            title: "replication broken".to_string(),
            resolution: "restarted replica".to_string(),
            tool_steps: steps.iter().take(10).cloned().collect(),
        };
        assert_eq!(hint.tool_steps.len(), 10);
        assert_eq!(hint.tool_steps[0], "tool_0");
    }
}
