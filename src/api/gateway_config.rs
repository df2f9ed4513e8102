//! Remote `openclaw.json` handling: raw editor endpoints, snapshots and the
//! read-patch-write helpers used by the other config-backed handlers.

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::error::{ApiError, ApiResult};
use crate::ssh::{self, remote_path, RemoteShell, DEFAULT_TIMEOUT};

use super::extract::ApiJson;
use super::state::AppState;

/// Current remote config text and its parsed form.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub raw: String,
    pub value: Value,
}

/// Parse config text as JSON, falling back to JSON5.
pub fn parse_config_text(raw: &str) -> Option<Value> {
    serde_json::from_str(raw)
        .ok()
        .or_else(|| json5::from_str::<Value>(raw).ok())
}

/// Read and parse the remote config; unparseable content is an error.
pub async fn load_config(state: &AppState) -> ApiResult<RemoteConfig> {
    let shell = state.shell()?;
    let raw = ssh::read_file(shell, &state.paths().config_path()).await?;
    let value = parse_config_text(&raw)
        .ok_or_else(|| ApiError::internal("Failed to parse openclaw.json"))?;
    Ok(RemoteConfig { raw, value })
}

/// Pretty-print `next` and write it over the remote config.
pub async fn save_config(
    state: &AppState,
    previous_raw: &str,
    next: &Value,
    source: &str,
) -> ApiResult<()> {
    let content = serde_json::to_string_pretty(next)?;
    write_config_text(state, Some(previous_raw), &content, source, None).await
}

/// Back up, snapshot and replace the remote config text.
pub async fn write_config_text(
    state: &AppState,
    previous_raw: Option<&str>,
    content: &str,
    source: &str,
    rollback_of: Option<String>,
) -> ApiResult<()> {
    let shell = state.shell()?;
    let path = state.paths().config_path();

    shell
        .exec(
            &format!(
                "cp {} {} 2>/dev/null || true",
                remote_path(&path),
                remote_path(&state.paths().config_backup_path())
            ),
            DEFAULT_TIMEOUT,
        )
        .await?;

    if let Some(previous) = previous_raw {
        if let Err(e) = state.history.add(source, previous, rollback_of) {
            warn!(error = %e, source, "failed to record config snapshot");
        }
    }

    ssh::write_file(shell, &path, content).await?;
    info!(source, bytes = content.len(), "remote config written");
    Ok(())
}

/// `openclaw gateway restart`, returning its combined output.
pub async fn restart_gateway(shell: &dyn RemoteShell) -> ApiResult<String> {
    let result = shell
        .exec("openclaw gateway restart 2>&1", DEFAULT_TIMEOUT)
        .await?;
    if !result.success() {
        warn!(exit_code = result.exit_code, output = %result.stdout, "gateway restart reported failure");
    }
    Ok(result.stdout)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[instrument(skip(state))]
pub async fn get_config(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let shell = state.shell()?;
    let raw = ssh::read_file(shell, &state.paths().config_path()).await?;
    let config = parse_config_text(&raw).unwrap_or(Value::Null);
    Ok(Json(json!({ "config": config, "raw": raw })))
}

#[derive(Debug, Deserialize)]
pub struct ConfigUpdateRequest {
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub raw: Option<Value>,
    #[serde(default)]
    pub restart: Option<bool>,
}

#[instrument(skip(state, req))]
pub async fn update_config(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ConfigUpdateRequest>,
) -> ApiResult<Json<Value>> {
    let shell = state.shell()?;

    let content = match (&req.raw, &req.config) {
        (Some(Value::String(raw)), _) => {
            if parse_config_text(raw).is_none() {
                return Err(ApiError::bad_request("Config is not valid JSON or JSON5"));
            }
            raw.clone()
        }
        (_, Some(config)) => serde_json::to_string_pretty(config)?,
        _ => return Err(ApiError::bad_request("config or raw required")),
    };

    let previous = match ssh::read_file(shell, &state.paths().config_path()).await {
        Ok(previous) => Some(previous),
        Err(e) => {
            warn!(error = %e, "could not read current config before saving");
            None
        }
    };

    write_config_text(&state, previous.as_deref(), &content, "config-editor", None).await?;

    if req.restart != Some(false) {
        restart_gateway(shell).await?;
    }

    Ok(Json(json!({ "ok": true })))
}

#[instrument(skip(state))]
pub async fn list_history(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let snapshots = state.history.list().map_err(ApiError::internal)?;
    Ok(Json(json!({ "snapshots": snapshots })))
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub id: String,
}

#[instrument(skip(state))]
pub async fn rollback(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RollbackRequest>,
) -> ApiResult<Json<Value>> {
    let shell = state.shell()?;

    let (meta, content) = state
        .history
        .read(&req.id)
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("Snapshot '{}' not found", req.id)))?;

    let current = ssh::read_file(shell, &state.paths().config_path()).await.ok();
    write_config_text(
        &state,
        current.as_deref(),
        &content,
        "rollback",
        Some(meta.id.clone()),
    )
    .await?;
    restart_gateway(shell).await?;

    Ok(Json(json!({ "ok": true, "snapshotId": meta.id })))
}
