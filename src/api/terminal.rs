use std::time::Duration;

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::error::{ApiError, ApiResult};

use super::extract::ApiJson;
use super::state::AppState;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

const BLOCKED_PATTERNS: &[&str] = &["rm -rf /", "mkfs", "dd if=", ":(){:|:&};:"];

/// First blocked pattern `command` contains, if any.
pub fn blocked_pattern(command: &str) -> Option<&'static str> {
    BLOCKED_PATTERNS.iter().copied().find(|p| command.contains(p))
}

#[derive(Debug, Deserialize)]
pub struct TerminalRequest {
    #[serde(default)]
    pub command: String,
    /// Milliseconds.
    pub timeout: Option<u64>,
}

#[instrument(skip(state, req))]
pub async fn run_command(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<TerminalRequest>,
) -> ApiResult<Json<Value>> {
    let shell = state.shell()?;
    let command = req.command.trim();
    if command.is_empty() {
        return Err(ApiError::bad_request("command required"));
    }
    if let Some(pattern) = blocked_pattern(command) {
        warn!(pattern, "blocked terminal command");
        return Err(ApiError::forbidden("Command blocked for safety"));
    }

    let timeout = Duration::from_millis(req.timeout.filter(|t| *t > 0).unwrap_or(DEFAULT_TIMEOUT_MS));
    let result = shell.exec(command, timeout).await?;
    info!(exit_code = result.exit_code, "terminal command finished");
    Ok(Json(json!({
        "stdout": result.stdout,
        "stderr": result.stderr,
        "code": result.exit_code,
    })))
}
