//! Transcript viewer: recent sessions, tail of one session and a polling
//! SSE stream of newly appended lines.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, Sse},
    Json,
};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::error::{ApiError, ApiResult, SshError};
use crate::ssh::{remote_path, sanitize_id, RemoteShell};

use super::extract::ApiQuery;
use super::sessions::{parse_jsonl, parse_ls_output, str_at};
use super::state::AppState;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub agent: Option<String>,
    pub limit: Option<u32>,
    pub session: Option<String>,
}

fn agent_or_main(agent: Option<&str>) -> String {
    match agent.map(sanitize_id) {
        Some(id) if !id.is_empty() => id,
        _ => "main".to_string(),
    }
}

#[instrument(skip(state))]
pub async fn get_logs(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<LogsQuery>,
) -> ApiResult<Json<Value>> {
    let shell = state.shell()?;
    let agent = agent_or_main(query.agent.as_deref());
    let limit = query.limit.unwrap_or(100);
    let session = query.session.as_deref().map(sanitize_id).unwrap_or_default();
    let dir = state.paths().sessions_dir(&agent);

    if !session.is_empty() {
        let path = remote_path(&format!("{dir}/{session}.jsonl"));
        let result = shell
            .exec(
                &format!("tail -n {limit} {path} 2>/dev/null"),
                Duration::from_secs(15),
            )
            .await?;
        return Ok(Json(json!({
            "entries": parse_jsonl(&result.stdout),
            "sessionId": session,
        })));
    }

    let listing = shell
        .exec(
            &format!("ls -lt {}/*.jsonl 2>/dev/null | head -20", remote_path(&dir)),
            Duration::from_secs(10),
        )
        .await?;

    let mut sessions = Vec::new();
    for (idx, file) in parse_ls_output(&listing.stdout).into_iter().enumerate() {
        let mut entry = serde_json::to_value(&file)?;
        if idx < 10 {
            let path = remote_path(&format!("{dir}/{}.jsonl", sanitize_id(&file.id)));
            let last = shell
                .exec(
                    &format!("tail -5 {path} 2>/dev/null | grep '\"role\"' | tail -1"),
                    Duration::from_secs(5),
                )
                .await;
            if let Some(last) = last
                .ok()
                .and_then(|r| serde_json::from_str::<Value>(&r.stdout).ok())
            {
                if let Some(obj) = entry.as_object_mut() {
                    obj.insert("lastRole".into(), json!(str_at(&last, "/message/role")));
                    obj.insert("lastModel".into(), json!(str_at(&last, "/message/model")));
                    obj.insert("lastTimestamp".into(), json!(str_at(&last, "/timestamp")));
                }
            }
        }
        sessions.push(entry);
    }

    Ok(Json(json!({ "sessions": sessions, "agentId": agent })))
}

// ---------------------------------------------------------------------------
// Live stream
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub agent: Option<String>,
    pub session: Option<String>,
}

/// Line count reported by `wc -l`, zero when unreadable.
pub fn parse_line_count(stdout: &str) -> u64 {
    stdout.trim().parse().unwrap_or(0)
}

/// What one poll of a transcript yields, before SSE framing.
#[derive(Debug, Clone, PartialEq)]
enum StreamItem {
    Entry(Value),
    Error(String),
    Heartbeat,
}

impl StreamItem {
    fn into_event(self) -> Event {
        match self {
            StreamItem::Entry(entry) => Event::default().data(entry.to_string()),
            StreamItem::Error(error) => {
                Event::default().data(json!({ "type": "error", "error": error }).to_string())
            }
            StreamItem::Heartbeat => Event::default().comment("heartbeat"),
        }
    }
}

struct Tail {
    shell: Arc<dyn RemoteShell>,
    path: String,
    seen: u64,
    first: bool,
}

impl Tail {
    async fn count(&self) -> Result<u64, SshError> {
        let result = self
            .shell
            .exec(
                &format!("wc -l < {} 2>/dev/null || echo 0", self.path),
                Duration::from_secs(5),
            )
            .await?;
        Ok(parse_line_count(&result.stdout))
    }

    /// One poll: new lines followed by a heartbeat, or a single error item.
    async fn poll(&mut self) -> Vec<StreamItem> {
        match self.poll_lines().await {
            Ok(mut items) => {
                items.push(StreamItem::Heartbeat);
                items
            }
            Err(e) => {
                warn!(error = %e, "log stream poll failed");
                vec![StreamItem::Error(e.to_string())]
            }
        }
    }

    async fn poll_lines(&mut self) -> Result<Vec<StreamItem>, SshError> {
        let current = self.count().await?;
        if current < self.seen {
            // Truncated or rotated: follow the new file from its current end.
            debug!(path = %self.path, before = self.seen, now = current, "transcript shrank");
            self.seen = current;
            return Ok(Vec::new());
        }
        if current == self.seen {
            return Ok(Vec::new());
        }

        let result = self
            .shell
            .exec(
                &format!("tail -n {} {} 2>/dev/null", current - self.seen, self.path),
                Duration::from_secs(10),
            )
            .await?;
        self.seen = current;

        Ok(parse_jsonl(&result.stdout)
            .into_iter()
            .map(StreamItem::Entry)
            .collect())
    }
}

fn tail_stream(tail: Tail) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(tail, |mut tail| async move {
        if !tail.first {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        tail.first = false;
        let items = tail.poll().await;
        Some((items, tail))
    })
    .flat_map(|items| stream::iter(items.into_iter().map(|item| Ok(item.into_event()))))
}

#[instrument(skip(state))]
pub async fn stream_logs(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<StreamQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let shell = state.shared_shell()?;
    let session = query.session.as_deref().map(sanitize_id).unwrap_or_default();
    if session.is_empty() {
        return Err(ApiError::bad_request("session required"));
    }
    let agent = agent_or_main(query.agent.as_deref());
    let path = remote_path(&format!("{}/{session}.jsonl", state.paths().sessions_dir(&agent)));

    let mut tail = Tail {
        shell,
        path,
        seen: 0,
        first: true,
    };
    tail.seen = tail.count().await.unwrap_or(0);
    debug!(agent = %agent, session = %session, lines = tail.seen, "log stream opened");

    Ok(Sse::new(tail_stream(tail)))
}
