use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, instrument};

use crate::error::{ApiError, ApiResult};

use super::extract::ApiJson;
use super::gateway_config::{load_config, restart_gateway, save_config};
use super::state::AppState;

/// Agent keys the gateway accepts.
const AGENT_KEYS: &[&str] = &[
    "id",
    "name",
    "default",
    "model",
    "workspace",
    "agentDir",
    "tools",
    "subagents",
    "sandbox",
    "containerTag",
    "thinking",
    "reasoningEffort",
    "systemPrompt",
    "maxTurns",
];

const SUBAGENT_KEYS: &[&str] = &["allowAgents"];
const SANDBOX_KEYS: &[&str] = &["mode", "scope"];
const TOOLS_KEYS: &[&str] = &["allow", "deny"];

fn nested_keys(key: &str) -> Option<&'static [&'static str]> {
    match key {
        "subagents" => Some(SUBAGENT_KEYS),
        "sandbox" => Some(SANDBOX_KEYS),
        "tools" => Some(TOOLS_KEYS),
        _ => None,
    }
}

/// Reduce an agent object to the accepted keys, dropping empty values.
pub fn sanitize_agent(agent: &Value) -> Map<String, Value> {
    let mut clean = Map::new();
    let Some(obj) = agent.as_object() else {
        return clean;
    };

    for (key, value) in obj {
        if !AGENT_KEYS.contains(&key.as_str()) {
            continue;
        }
        if value.is_null() || value.as_str() == Some("") {
            continue;
        }
        match (nested_keys(key), value.as_object()) {
            (Some(allowed), Some(inner)) => {
                let nested: Map<String, Value> = inner
                    .iter()
                    .filter(|(k, _)| allowed.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                if !nested.is_empty() {
                    clean.insert(key.clone(), Value::Object(nested));
                }
            }
            _ => {
                clean.insert(key.clone(), value.clone());
            }
        }
    }
    clean
}

/// Merge `clean` over the entry with the same id, or append it.
pub fn upsert_agent(config: &mut Value, clean: Map<String, Value>) -> ApiResult<()> {
    let root = config
        .as_object_mut()
        .ok_or_else(|| ApiError::internal("config is not an object"))?;
    let agents = root
        .entry("agents")
        .or_insert_with(|| json!({ "list": [] }));
    if !agents.is_object() {
        *agents = json!({ "list": [] });
    }
    let list = agents
        .as_object_mut()
        .map(|a| a.entry("list").or_insert_with(|| json!([])))
        .ok_or_else(|| ApiError::internal("agents is not an object"))?;
    if !list.is_array() {
        *list = json!([]);
    }
    let Some(list) = list.as_array_mut() else {
        return Err(ApiError::internal("agents.list is not an array"));
    };

    let id = clean.get("id").cloned();
    match list
        .iter_mut()
        .find(|a| a.get("id").is_some() && a.get("id") == id.as_ref())
    {
        Some(Value::Object(existing)) => {
            for (k, v) in clean {
                existing.insert(k, v);
            }
        }
        Some(other) => *other = Value::Object(clean),
        None => list.push(Value::Object(clean)),
    }
    Ok(())
}

/// Remove agent `id`, re-pointing its bindings to `main`.
pub fn remove_agent(config: &mut Value, id: &str) -> ApiResult<()> {
    if id == "main" {
        return Err(ApiError::bad_request("Cannot delete the main agent"));
    }

    let list = config
        .pointer_mut("/agents/list")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| ApiError::not_found(format!("Agent '{id}' not found")))?;

    let before = list.len();
    list.retain(|agent| agent.get("id").and_then(Value::as_str) != Some(id));
    if list.len() == before {
        return Err(ApiError::not_found(format!("Agent '{id}' not found")));
    }

    if let Some(bindings) = config.pointer_mut("/bindings").and_then(Value::as_array_mut) {
        for binding in bindings.iter_mut() {
            if binding.get("agentId").and_then(Value::as_str) == Some(id) {
                if let Some(obj) = binding.as_object_mut() {
                    obj.insert("agentId".into(), Value::String("main".into()));
                }
            }
        }
    }
    Ok(())
}

/// Display form of an agent's `model` (string, `{primary}` or "default").
pub fn model_label(agent: &Value) -> String {
    match agent.get("model") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Object(m)) => m
            .get("primary")
            .and_then(Value::as_str)
            .unwrap_or("default")
            .to_string(),
        _ => "default".to_string(),
    }
}

/// `agents.list` from the config, or empty.
pub fn agent_list(config: &Value) -> Vec<Value> {
    config
        .pointer("/agents/list")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[instrument(skip(state))]
pub async fn list_agents(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let config = load_config(&state).await?.value;
    let defaults = config
        .pointer("/agents/defaults")
        .cloned()
        .unwrap_or_else(|| json!({}));
    Ok(Json(json!({ "agents": agent_list(&config), "defaults": defaults })))
}

#[derive(Debug, Deserialize)]
pub struct SaveAgentRequest {
    pub agent: Value,
}

#[instrument(skip(state, req))]
pub async fn save_agent(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SaveAgentRequest>,
) -> ApiResult<Json<Value>> {
    let clean = sanitize_agent(&req.agent);
    let id = match clean.get("id").and_then(Value::as_str) {
        Some(id) if !id.trim().is_empty() => id.to_string(),
        _ => return Err(ApiError::bad_request("agent.id is required")),
    };

    let mut config = load_config(&state).await?;
    upsert_agent(&mut config.value, clean)?;
    save_config(&state, &config.raw, &config.value, "agent-save").await?;
    restart_gateway(state.shell()?).await?;

    info!(agent = %id, "agent saved");
    Ok(Json(json!({ "ok": true, "agent": req.agent })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteAgentRequest {
    pub id: String,
}

#[instrument(skip(state))]
pub async fn delete_agent(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<DeleteAgentRequest>,
) -> ApiResult<Json<Value>> {
    let id = req.id.trim();
    if id.is_empty() {
        return Err(ApiError::bad_request("Agent ID is required"));
    }

    let mut config = load_config(&state).await?;
    remove_agent(&mut config.value, id)?;
    save_config(&state, &config.raw, &config.value, "agent-delete").await?;
    restart_gateway(state.shell()?).await?;

    info!(agent = %id, "agent deleted");
    Ok(Json(json!({ "ok": true })))
}

#[instrument(skip(state))]
pub async fn chat_agents(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let config = load_config(&state).await?.value;
    let agents: Vec<Value> = agent_list(&config)
        .iter()
        .map(|agent| {
            let id = agent.get("id").cloned().unwrap_or(Value::Null);
            let name = agent
                .get("name")
                .filter(|n| n.as_str().is_some_and(|s| !s.is_empty()))
                .cloned()
                .unwrap_or_else(|| id.clone());
            json!({ "id": id, "name": name, "model": model_label(agent) })
        })
        .collect();
    Ok(Json(json!({ "agents": agents })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_drops_unknown_and_empty_values() {
        let clean = sanitize_agent(&json!({
            "id": "ops",
            "name": "",
            "model": null,
            "emoji": "🦀",
            "maxTurns": 12,
            "tools": { "allow": ["exec"], "profile": "x" },
            "sandbox": { "network": true },
            "subagents": { "allowAgents": ["main"] },
        }));
        assert_eq!(
            Value::Object(clean),
            json!({
                "id": "ops",
                "maxTurns": 12,
                "tools": { "allow": ["exec"] },
                "subagents": { "allowAgents": ["main"] },
            })
        );
    }

    #[test]
    fn upsert_preserves_unmanaged_keys() {
        let mut config = json!({
            "agents": { "list": [{ "id": "ops", "identity": { "emoji": "x" }, "name": "Old" }] }
        });
        let clean = sanitize_agent(&json!({ "id": "ops", "name": "New" }));
        upsert_agent(&mut config, clean).unwrap();
        assert_eq!(
            config["agents"]["list"][0],
            json!({ "id": "ops", "identity": { "emoji": "x" }, "name": "New" })
        );
    }

    #[test]
    fn upsert_appends_and_creates_list() {
        let mut config = json!({});
        upsert_agent(&mut config, sanitize_agent(&json!({ "id": "research" }))).unwrap();
        upsert_agent(&mut config, sanitize_agent(&json!({ "id": "ops" }))).unwrap();
        assert_eq!(config["agents"]["list"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn remove_repoints_bindings_to_main() {
        let mut config = json!({
            "agents": { "list": [{ "id": "main" }, { "id": "ops" }] },
            "bindings": [
                { "agentId": "ops", "match": { "channel": "telegram" } },
                { "agentId": "main", "match": { "channel": "discord" } },
            ]
        });
        remove_agent(&mut config, "ops").unwrap();
        assert_eq!(config["agents"]["list"].as_array().unwrap().len(), 1);
        assert_eq!(config["bindings"][0]["agentId"], "main");
    }

    #[test]
    fn remove_refuses_main_and_unknown() {
        let mut config = json!({ "agents": { "list": [{ "id": "main" }] } });
        let err = remove_agent(&mut config, "main").unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        let err = remove_agent(&mut config, "ghost").unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::NOT_FOUND);
    }

    #[test]
    fn model_label_handles_shapes() {
        assert_eq!(model_label(&json!({ "model": "openai/gpt-5" })), "openai/gpt-5");
        assert_eq!(
            model_label(&json!({ "model": { "primary": "anthropic/claude-opus-4-5" } })),
            "anthropic/claude-opus-4-5"
        );
        assert_eq!(model_label(&json!({})), "default");
    }
}
