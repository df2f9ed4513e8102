use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, instrument};

use crate::error::{ApiError, ApiResult};

use super::extract::ApiJson;
use super::gateway_config::{load_config, restart_gateway, save_config};
use super::state::AppState;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignBindingRequest {
    pub channel: String,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub peer_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn binding_matches(binding: &Value, channel: &str, account: Option<&str>, peer: Option<&str>) -> bool {
    let m = binding.get("match");
    let ch = m.and_then(|m| m.get("channel")).and_then(Value::as_str);
    let acc = m.and_then(|m| m.get("accountId")).and_then(Value::as_str);
    let pid = m.and_then(|m| m.pointer("/peer/id")).and_then(Value::as_str);
    ch == Some(channel) && acc == account && pid == peer
}

/// Replace the binding for the request's match triple.
///
/// An empty `agentId` only removes the existing binding.
pub fn assign_binding(config: &mut Value, req: &AssignBindingRequest) -> ApiResult<()> {
    let channel = req.channel.trim();
    if channel.is_empty() {
        return Err(ApiError::bad_request("channel is required"));
    }
    let account = non_empty(&req.account_id);
    let peer = non_empty(&req.peer_id);
    let agent = non_empty(&req.agent_id);

    let root = config
        .as_object_mut()
        .ok_or_else(|| ApiError::internal("config is not an object"))?;
    let bindings = root.entry("bindings").or_insert_with(|| json!([]));
    if !bindings.is_array() {
        *bindings = json!([]);
    }
    let Some(list) = bindings.as_array_mut() else {
        return Err(ApiError::internal("bindings is not an array"));
    };

    list.retain(|b| !binding_matches(b, channel, account, peer));

    if let Some(agent) = agent {
        let mut matcher = Map::new();
        matcher.insert("channel".into(), json!(channel));
        if let Some(account) = account {
            matcher.insert("accountId".into(), json!(account));
        }
        if let Some(peer) = peer {
            matcher.insert("peer".into(), json!({ "id": peer, "kind": "channel" }));
        }
        list.push(json!({ "agentId": agent, "match": matcher }));
    }
    Ok(())
}

#[instrument(skip(state))]
pub async fn list_bindings(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let config = load_config(&state).await?.value;
    let bindings = config
        .get("bindings")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    Ok(Json(json!({ "bindings": bindings })))
}

#[instrument(skip(state))]
pub async fn assign(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<AssignBindingRequest>,
) -> ApiResult<Json<Value>> {
    let mut config = load_config(&state).await?;
    assign_binding(&mut config.value, &req)?;
    save_config(&state, &config.raw, &config.value, "binding-assign").await?;
    restart_gateway(state.shell()?).await?;

    info!(channel = %req.channel, agent = ?req.agent_id, "binding updated");
    Ok(Json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(channel: &str, peer: Option<&str>, agent: Option<&str>) -> AssignBindingRequest {
        AssignBindingRequest {
            channel: channel.into(),
            account_id: None,
            peer_id: peer.map(Into::into),
            agent_id: agent.map(Into::into),
        }
    }

    #[test]
    fn assign_replaces_existing_peer_binding() {
        let mut config = json!({
            "bindings": [
                { "agentId": "main", "match": { "channel": "discord", "peer": { "id": "42", "kind": "channel" } } },
                { "agentId": "main", "match": { "channel": "telegram" } },
            ]
        });
        assign_binding(&mut config, &request("discord", Some("42"), Some("ops"))).unwrap();

        let bindings = config["bindings"].as_array().unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[1]["agentId"], "ops");
        assert_eq!(bindings[1]["match"]["peer"]["id"], "42");
        assert_eq!(bindings[0]["match"]["channel"], "telegram");
    }

    #[test]
    fn empty_agent_removes_binding() {
        let mut config = json!({
            "bindings": [{ "agentId": "ops", "match": { "channel": "telegram" } }]
        });
        assign_binding(&mut config, &request("telegram", None, Some(" "))).unwrap();
        assert!(config["bindings"].as_array().unwrap().is_empty());
    }

    #[test]
    fn creates_bindings_array() {
        let mut config = json!({});
        let mut req = request("whatsapp", None, Some("ops"));
        req.account_id = Some("personal".into());
        assign_binding(&mut config, &req).unwrap();
        assert_eq!(
            config["bindings"][0],
            json!({ "agentId": "ops", "match": { "channel": "whatsapp", "accountId": "personal" } })
        );
    }

    #[test]
    fn channel_is_required() {
        let mut config = json!({});
        assert!(assign_binding(&mut config, &request("", None, Some("ops"))).is_err());
    }
}
