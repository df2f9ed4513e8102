use std::time::Duration;

use axum::{extract::State, Json};
use serde_json::{json, Value};
use tracing::instrument;

use crate::cli::parse_json_output;
use crate::error::ApiResult;
use crate::ssh::{self, DEFAULT_TIMEOUT};

use super::gateway_config::restart_gateway;
use super::state::AppState;

const DOCTOR_TIMEOUT: Duration = Duration::from_secs(60);

/// Status payload from `openclaw gateway status`, or the raw text.
pub fn gateway_status_value(stdout: &str, exit_code: u32) -> Value {
    parse_json_output(stdout)
        .unwrap_or_else(|_| json!({ "raw": stdout, "connected": exit_code == 0 }))
}

/// Channel list from `openclaw channels`, or the raw text as a single entry.
pub fn channels_value(stdout: &str) -> Value {
    parse_json_output(stdout).unwrap_or_else(|_| json!([{ "raw": stdout }]))
}

#[instrument(skip(state))]
pub async fn status(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let shell = state.shell()?;

    let status = shell
        .exec(
            "openclaw gateway status --json 2>/dev/null || openclaw gateway status 2>&1",
            DEFAULT_TIMEOUT,
        )
        .await?;
    let channels = shell
        .exec(
            "openclaw channels status --json 2>/dev/null || openclaw channels list 2>&1",
            DEFAULT_TIMEOUT,
        )
        .await?;

    Ok(Json(json!({
        "status": gateway_status_value(&status.stdout, status.exit_code),
        "channels": channels_value(&channels.stdout),
        "connected": true,
    })))
}

#[instrument(skip(state))]
pub async fn ping(State(state): State<AppState>) -> Json<Value> {
    let connected = match state.shell() {
        Ok(shell) => ssh::test_connection(shell).await,
        Err(_) => false,
    };
    Json(json!({ "configured": state.is_configured(), "connected": connected }))
}

#[instrument(skip(state))]
pub async fn restart(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let output = restart_gateway(state.shell()?).await?;
    Ok(Json(json!({ "ok": true, "output": output })))
}

#[instrument(skip(state))]
pub async fn doctor(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let result = state
        .shell()?
        .exec("openclaw doctor 2>&1", DOCTOR_TIMEOUT)
        .await?;
    Ok(Json(json!({ "output": result.stdout, "exitCode": result.exit_code })))
}
