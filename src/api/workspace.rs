use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument};

use crate::error::{ApiError, ApiResult};
use crate::ssh::{self, remote_path, DEFAULT_TIMEOUT};

use super::agents::agent_list;
use super::extract::{ApiJson, ApiQuery};
use super::gateway_config::load_config;
use super::state::AppState;

/// Reject anything but a plain file name.
pub fn validate_file_name(name: &str) -> ApiResult<&str> {
    let name = name.trim();
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(ApiError::bad_request(format!("Invalid file name: {name}")));
    }
    Ok(name)
}

/// Workspace of `agent` from the config, else the default workspace.
pub fn resolve_workspace(config: Option<&Value>, agent: Option<&str>, default: &str) -> String {
    agent
        .zip(config)
        .and_then(|(id, config)| {
            agent_list(config)
                .into_iter()
                .find(|a| a.get("id").and_then(Value::as_str) == Some(id))
        })
        .and_then(|a| a.get("workspace").and_then(Value::as_str).map(str::to_string))
        .filter(|ws| !ws.is_empty())
        .map(|ws| ws.trim_end_matches('/').to_string())
        .unwrap_or_else(|| default.to_string())
}

/// `stat -c '%s %Y'` output as (size, mtime in ms).
pub fn parse_stat(stdout: &str) -> (u64, u64) {
    let mut parts = stdout.split_whitespace();
    let size = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let mtime: u64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    (size, mtime * 1000)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceFile {
    pub name: String,
    pub path: String,
}

pub fn parse_file_list(stdout: &str, workspace: &str) -> Vec<WorkspaceFile> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| l.ends_with(".md") || l.ends_with(".txt"))
        .filter_map(|l| l.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .map(|name| WorkspaceFile {
            name: name.to_string(),
            path: format!("{workspace}/{name}"),
        })
        .collect()
}

async fn workspace_for(state: &AppState, agent: Option<&str>) -> ApiResult<String> {
    let default = state.paths().workspace_dir();
    let agent = agent.filter(|a| !a.is_empty());
    if agent.is_none() {
        return Ok(default);
    }
    let config = load_config(state).await?.value;
    Ok(resolve_workspace(Some(&config), agent, &default))
}

#[derive(Debug, Deserialize)]
pub struct WorkspaceQuery {
    pub agent: Option<String>,
    pub file: Option<String>,
}

#[instrument(skip(state))]
pub async fn get_workspace(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<WorkspaceQuery>,
) -> ApiResult<Json<Value>> {
    let shell = state.shell()?;
    let workspace = workspace_for(&state, query.agent.as_deref()).await?;

    if let Some(file) = query.file.as_deref().filter(|f| !f.is_empty()) {
        let name = validate_file_name(file)?;
        let path = format!("{workspace}/{name}");
        let content = ssh::read_file(shell, &path).await?;
        let stat = shell
            .exec(
                &format!("stat -c '%s %Y' {} 2>/dev/null || echo \"0 0\"", remote_path(&path)),
                DEFAULT_TIMEOUT,
            )
            .await?;
        let (size, last_modified) = parse_stat(&stat.stdout);
        return Ok(Json(json!({
            "name": name,
            "path": path,
            "content": content,
            "size": size,
            "lastModified": last_modified,
        })));
    }

    let dir = remote_path(&workspace);
    let listing = shell
        .exec(
            &format!("ls -1 {dir}/*.md {dir}/*.txt 2>/dev/null || true"),
            DEFAULT_TIMEOUT,
        )
        .await?;
    Ok(Json(json!({ "files": parse_file_list(&listing.stdout, &workspace) })))
}

#[derive(Debug, Deserialize)]
pub struct SaveWorkspaceFileRequest {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
}

#[instrument(skip(state, req))]
pub async fn save_workspace_file(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SaveWorkspaceFileRequest>,
) -> ApiResult<Json<Value>> {
    let shell = state.shell()?;
    let (Some(file), Some(content)) = (req.file.as_deref().filter(|f| !f.is_empty()), req.content.as_deref())
    else {
        return Err(ApiError::bad_request("file and content required"));
    };
    let name = validate_file_name(file)?;
    let workspace = workspace_for(&state, req.agent.as_deref()).await?;
    let path = format!("{workspace}/{name}");

    ssh::write_file(shell, &path, content).await?;
    info!(path = %path, bytes = content.len(), "workspace file saved");
    Ok(Json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_must_be_single_components() {
        assert_eq!(validate_file_name("SOUL.md").unwrap(), "SOUL.md");
        assert!(validate_file_name("../openclaw.json").is_err());
        assert!(validate_file_name("..").is_err());
        assert!(validate_file_name("memory/today.md").is_err());
        assert!(validate_file_name("  ").is_err());
    }

    #[test]
    fn workspace_prefers_agent_setting() {
        let config = json!({ "agents": { "list": [
            { "id": "ops", "workspace": "/srv/ops-ws/" },
            { "id": "main" }
        ] } });
        let default = "~/.openclaw/workspace";
        assert_eq!(resolve_workspace(Some(&config), Some("ops"), default), "/srv/ops-ws");
        assert_eq!(resolve_workspace(Some(&config), Some("main"), default), default);
        assert_eq!(resolve_workspace(Some(&config), None, default), default);
        assert_eq!(resolve_workspace(None, Some("ops"), default), default);
    }

    #[test]
    fn stat_output_in_millis() {
        assert_eq!(parse_stat("2048 1772546400\n"), (2048, 1_772_546_400_000));
        assert_eq!(parse_stat("0 0"), (0, 0));
        assert_eq!(parse_stat(""), (0, 0));
    }

    #[test]
    fn lists_markdown_and_text() {
        let files = parse_file_list(
            "/root/.openclaw/workspace/AGENTS.md\n/root/.openclaw/workspace/notes.txt\n/root/.openclaw/workspace/run.sh",
            "~/.openclaw/workspace",
        );
        assert_eq!(
            files,
            vec![
                WorkspaceFile { name: "AGENTS.md".into(), path: "~/.openclaw/workspace/AGENTS.md".into() },
                WorkspaceFile { name: "notes.txt".into(), path: "~/.openclaw/workspace/notes.txt".into() },
            ]
        );
    }
}
