use std::time::Duration;

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, instrument};

use crate::cli::openclaw_command_merged;
use crate::error::{ApiError, ApiResult};
use crate::ssh::sanitize_id;

use super::extract::ApiJson;
use super::state::AppState;

/// Agent turns can take a while.
const SEND_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendRequest {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub message: String,
}

pub fn send_command(agent_id: &str, message: &str) -> String {
    openclaw_command_merged(&["send", "--agent", agent_id, message])
}

#[instrument(skip(state, req), fields(agent = %req.agent_id))]
pub async fn send(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ChatSendRequest>,
) -> ApiResult<Json<Value>> {
    let shell = state.shell()?;
    let agent_id = sanitize_id(&req.agent_id);
    if agent_id.is_empty() || req.message.trim().is_empty() {
        return Err(ApiError::bad_request("agentId and message required"));
    }

    let result = shell
        .exec(&send_command(&agent_id, &req.message), SEND_TIMEOUT)
        .await?;
    info!(exit_code = result.exit_code, "chat message sent");

    let response = if result.stdout.is_empty() {
        "(no response)".to_string()
    } else {
        result.stdout
    };
    Ok(Json(json!({ "response": response, "agentId": agent_id })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_is_a_single_quoted_argument() {
        assert_eq!(
            send_command("main", "what's up; rm -rf ~"),
            "openclaw 'send' '--agent' 'main' 'what'\\''s up; rm -rf ~' 2>&1"
        );
    }
}
