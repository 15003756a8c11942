//! Domain tool registrations for the investigation agent's [`Chat`]/
//! [`Execute`] loop (§8 scenario 4). `resolve_incident`/`escalate_incident`
//! are dispatched through `Execute` like any other tool call before
//! `InvestigateIncident::finish` reads their arguments back out of the
//! call itself, so they're registered here as pass-throughs — the actual
//! state transition happens afterward, not in the handler.

use std::sync::Arc;

use hostctl_activities::execute::register_tool;
use hostctl_activities::llm::ToolSpec;
use hostctl_store_postgres::CoreDb;
use serde_json::{json, Value};

/// Register every tool the investigation agent may be offered, plus the
/// two terminal tools every catalog must include per
/// [`hostctl_activities::llm::TERMINAL_TOOLS`].
pub fn register_tools(core_db: Arc<CoreDb>) {
    register_tool("resolve_incident", Arc::new(|args| Box::pin(async move { Ok(args) })));
    register_tool("escalate_incident", Arc::new(|args| Box::pin(async move { Ok(args) })));

    {
        let core_db = core_db.clone();
        register_tool(
            "list_nodes",
            Arc::new(move |args| {
                let core_db = core_db.clone();
                Box::pin(async move { list_nodes(core_db, args).await })
            }),
        );
    }

    register_tool(
        "converge_shard",
        Arc::new(move |args| Box::pin(async move { converge_shard(args).await })),
    );
}

async fn list_nodes(core_db: Arc<CoreDb>, args: Value) -> anyhow::Result<Value> {
    let shard_id = args
        .get("shard_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("list_nodes requires a shard_id argument"))?;
    let shard_id = hostctl_types::EntityId(shard_id.parse().map_err(|_| anyhow::anyhow!("shard_id must be a uuid"))?);

    let nodes = core_db.nodes_for_shard(shard_id).await?;
    Ok(json!({ "nodes": nodes }))
}

/// `converge_shard` only enqueues the request onto the domain event
/// bus — the caller's `hostctl-cli` event loop (not this tool) is what
/// actually spawns a `WebShardConverge`/`LbShardConverge` workflow, the
/// same split `dns_retro`/`lb_shard` keep between "something happened"
/// and "a workflow reacted to it".
async fn converge_shard(args: Value) -> anyhow::Result<Value> {
    let shard_id = args
        .get("shard_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("converge_shard requires a shard_id argument"))?;
    Ok(json!({ "requested": shard_id }))
}

/// The tool catalog offered to every investigation turn.
pub fn tool_catalog() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "list_nodes".to_string(),
            description: "List the nodes assigned to a shard, with their health status.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "shard_id": { "type": "string", "format": "uuid" } },
                "required": ["shard_id"],
            }),
        },
        ToolSpec {
            name: "converge_shard".to_string(),
            description: "Request a reconciliation pass for a web or load-balancer shard.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "shard_id": { "type": "string", "format": "uuid" } },
                "required": ["shard_id"],
            }),
        },
        ToolSpec {
            name: "resolve_incident".to_string(),
            description: "Mark the incident resolved with a summary of the fix.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "resolution": { "type": "string" } },
                "required": ["resolution"],
            }),
        },
        ToolSpec {
            name: "escalate_incident".to_string(),
            description: "Hand the incident to a human operator.".to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostctl_activities::execute::registered_tools;

    #[test]
    fn catalog_names_match_registered_tools() {
        let catalog_names: Vec<String> = tool_catalog().into_iter().map(|t| t.name).collect();
        for name in &catalog_names {
            assert!(["list_nodes", "converge_shard", "resolve_incident", "escalate_incident"].contains(&name.as_str()));
        }
    }

    #[tokio::test]
    async fn terminal_tools_pass_their_arguments_through_unchanged() {
        register_tool("resolve_incident", Arc::new(|args| Box::pin(async move { Ok(args) })));
        let result = hostctl_activities::execute::Execute;
        use hostctl_activities::{Activity, Heartbeat};
        let mut hb = Heartbeat::new(Arc::new(hostctl_engine::NullHeartbeatSink));
        let out = result
            .run(
                hostctl_activities::execute::ExecuteInput {
                    tool_name: "resolve_incident".to_string(),
                    arguments: json!({ "resolution": "restarted the worker" }),
                },
                "key-1",
                &mut hb,
            )
            .await
            .unwrap();
        assert_eq!(out, json!({ "resolution": "restarted the worker" }));
        assert!(registered_tools().contains(&"resolve_incident".to_string()));
    }
}
