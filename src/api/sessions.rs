use std::time::Duration;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use crate::error::{ApiError, ApiResult};
use crate::ssh::{remote_path, sanitize_id};

use super::agents::agent_list;
use super::extract::{ApiJson, ApiQuery};
use super::gateway_config::load_config;
use super::state::AppState;

const LIST_TIMEOUT: Duration = Duration::from_secs(10);
const META_TIMEOUT: Duration = Duration::from_secs(5);
const SEPARATOR: &str = "---SEPARATOR---";

/// One `ls -l` line describing a transcript file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptFile {
    pub id: String,
    pub size: u64,
    pub last_modified: String,
    pub filename: String,
}

/// Parse `ls -l` output into transcript entries, skipping anything without
/// a `.jsonl` name.
pub fn parse_ls_output(stdout: &str) -> Vec<TranscriptFile> {
    stdout
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let full_path = *parts.last()?;
            let filename = full_path.rsplit('/').next().unwrap_or(full_path);
            let id = filename.strip_suffix(".jsonl")?;
            if id.is_empty() {
                return None;
            }
            let size = parts.get(4).and_then(|s| s.parse().ok()).unwrap_or(0);
            let last_modified = parts
                .get(5..8)
                .map(|date| date.join(" "))
                .unwrap_or_default();
            Some(TranscriptFile {
                id: id.to_string(),
                size,
                last_modified,
                filename: filename.to_string(),
            })
        })
        .collect()
}

/// Header line, last role-bearing line and line count of a transcript.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptMeta {
    pub first: Value,
    pub last: Value,
    pub line_count: u64,
}

impl TranscriptMeta {
    pub fn parse(stdout: &str) -> Self {
        let mut parts = stdout.split(SEPARATOR).map(str::trim);
        let parse_json = |s: Option<&str>| {
            s.and_then(|s| serde_json::from_str::<Value>(s).ok())
                .unwrap_or_else(|| json!({}))
        };
        let first = parse_json(parts.next());
        let last = parse_json(parts.next());
        let line_count = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        Self {
            first,
            last,
            line_count,
        }
    }
}

/// Parse JSONL, silently skipping lines that are not JSON.
pub fn parse_jsonl(stdout: &str) -> Vec<Value> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect()
}

pub(crate) fn str_at(value: &Value, pointer: &str) -> Option<String> {
    value.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub started_at: Option<String>,
    pub last_activity: Option<String>,
    pub last_role: Option<String>,
    pub last_model: Option<String>,
    pub message_count: u64,
    pub size: u64,
    pub total_cost: f64,
    pub is_active: bool,
}

impl SessionSummary {
    fn sort_key(&self) -> &str {
        self.last_activity
            .as_deref()
            .or(self.started_at.as_deref())
            .unwrap_or("")
    }
}

/// Newest activity first.
pub fn sort_sessions(sessions: &mut [SessionSummary]) {
    sessions.sort_by(|a, b| b.sort_key().cmp(a.sort_key()));
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsQuery {
    pub active_minutes: Option<u32>,
}

#[instrument(skip(state))]
pub async fn list_sessions(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<SessionsQuery>,
) -> ApiResult<Json<Value>> {
    let shell = state.shell()?;
    let minutes = query.active_minutes.unwrap_or(30);
    let config = load_config(&state).await?.value;

    let mut sessions = Vec::new();
    for agent in agent_list(&config) {
        let agent_id = sanitize_id(agent.get("id").and_then(Value::as_str).unwrap_or_default());
        if agent_id.is_empty() {
            continue;
        }
        let agent_name = agent
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .unwrap_or(agent_id.as_str())
            .to_string();
        let dir = state.paths().sessions_dir(&agent_id);

        let listing = shell
            .exec(
                &format!(
                    "find {} -name \"*.jsonl\" -mmin -{minutes} -exec ls -lt {{}} + 2>/dev/null | head -20",
                    remote_path(&dir)
                ),
                LIST_TIMEOUT,
            )
            .await?;

        for file in parse_ls_output(&listing.stdout) {
            let path = remote_path(&format!("{dir}/{}.jsonl", sanitize_id(&file.id)));
            let meta = shell
                .exec(
                    &format!(
                        "head -1 {path} 2>/dev/null; echo \"{SEPARATOR}\"; tail -5 {path} 2>/dev/null | grep '\"role\"' | tail -1; echo \"{SEPARATOR}\"; wc -l < {path} 2>/dev/null"
                    ),
                    META_TIMEOUT,
                )
                .await?;
            let meta = TranscriptMeta::parse(&meta.stdout);

            let cost = shell
                .exec(
                    &format!(
                        "grep '\"cost\"' {path} 2>/dev/null | jq -s '[.[].message.usage.cost.total // 0] | add' 2>/dev/null"
                    ),
                    META_TIMEOUT,
                )
                .await?;
            let total_cost = cost.stdout.trim().parse::<f64>().unwrap_or(0.0);

            sessions.push(SessionSummary {
                id: file.id,
                agent_id: agent_id.clone(),
                agent_name: agent_name.clone(),
                started_at: str_at(&meta.first, "/timestamp"),
                last_activity: str_at(&meta.last, "/timestamp"),
                last_role: str_at(&meta.last, "/message/role"),
                last_model: str_at(&meta.last, "/message/model"),
                message_count: meta.line_count,
                size: file.size,
                total_cost,
                is_active: file.size > 0,
            });
        }
    }

    sort_sessions(&mut sessions);
    debug!(count = sessions.len(), minutes, "active sessions");
    Ok(Json(json!({ "sessions": sessions })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSessionRequest {
    pub agent_id: String,
    pub session_id: String,
}

#[instrument(skip(state))]
pub async fn delete_session(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<DeleteSessionRequest>,
) -> ApiResult<Json<Value>> {
    let shell = state.shell()?;
    let agent = sanitize_id(&req.agent_id);
    let session = sanitize_id(&req.session_id);
    if agent.is_empty() || session.is_empty() {
        return Err(ApiError::bad_request("agentId and sessionId required"));
    }

    let path = format!("{}/{session}.jsonl", state.paths().sessions_dir(&agent));
    shell
        .exec(
            &format!("rm -f {} 2>/dev/null", remote_path(&path)),
            META_TIMEOUT,
        )
        .await?;

    info!(agent = %agent, session = %session, "session transcript removed");
    Ok(Json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ls_lines() {
        let out = "\
-rw-r--r-- 1 root root 48213 Mar  3 14:02 /root/.openclaw/agents/main/sessions/4f1c-aa.jsonl
-rw-r--r-- 1 root root 0 Mar  3 13:10 /root/.openclaw/agents/main/sessions/empty.jsonl
-rw-r--r-- 1 root root 12 Mar  3 13:10 /root/.openclaw/agents/main/sessions/sessions.json";
        let files = parse_ls_output(out);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].id, "4f1c-aa");
        assert_eq!(files[0].size, 48213);
        assert_eq!(files[0].last_modified, "Mar 3 14:02");
        assert_eq!(files[0].filename, "4f1c-aa.jsonl");
        assert_eq!(files[1].size, 0);
    }

    #[test]
    fn meta_parses_three_sections() {
        let out = "{\"type\":\"session\",\"timestamp\":\"2026-03-03T13:00:00Z\"}\n---SEPARATOR---\n{\"timestamp\":\"2026-03-03T14:02:00Z\",\"message\":{\"role\":\"assistant\",\"model\":\"claude-opus-4-5\"}}\n---SEPARATOR---\n57";
        let meta = TranscriptMeta::parse(out);
        assert_eq!(str_at(&meta.first, "/timestamp").as_deref(), Some("2026-03-03T13:00:00Z"));
        assert_eq!(str_at(&meta.last, "/message/role").as_deref(), Some("assistant"));
        assert_eq!(meta.line_count, 57);
    }

    #[test]
    fn meta_tolerates_missing_sections() {
        let meta = TranscriptMeta::parse("");
        assert_eq!(meta.first, json!({}));
        assert_eq!(meta.line_count, 0);
    }

    #[test]
    fn jsonl_skips_bad_lines() {
        let entries = parse_jsonl("{\"a\":1}\nnot json\n\n{\"b\":2}");
        assert_eq!(entries, vec![json!({"a": 1}), json!({"b": 2})]);
    }

    #[test]
    fn sort_prefers_last_activity() {
        let base = SessionSummary {
            id: String::new(),
            agent_id: "main".into(),
            agent_name: "main".into(),
            started_at: None,
            last_activity: None,
            last_role: None,
            last_model: None,
            message_count: 0,
            size: 0,
            total_cost: 0.0,
            is_active: false,
        };
        let mut sessions = vec![
            SessionSummary { id: "old".into(), last_activity: Some("2026-03-01T00:00:00Z".into()), ..base.clone() },
            SessionSummary { id: "started".into(), started_at: Some("2026-03-02T00:00:00Z".into()), ..base.clone() },
            SessionSummary { id: "none".into(), ..base.clone() },
            SessionSummary { id: "new".into(), last_activity: Some("2026-03-03T00:00:00Z".into()), ..base },
        ];
        sort_sessions(&mut sessions);
        let ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["new", "started", "old", "none"]);
    }
}
