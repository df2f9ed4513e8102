use std::sync::OnceLock;
use std::time::Duration;

use axum::{extract::State, Json};
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::instrument;

use crate::error::ApiResult;
use crate::ssh::remote_path;

use super::state::AppState;

const MAX_EVENTS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Message,
    Cron,
    Error,
    Session,
    System,
    Channel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityEvent {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub message: String,
}

fn timestamp_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2})").ok())
        .as_ref()
}

/// Keyword classification; earlier categories win.
pub fn classify(line: &str) -> ActivityKind {
    let lower = line.to_lowercase();
    let any = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    if any(&["error", "fail", "crash", "uncaught"]) {
        ActivityKind::Error
    } else if any(&["cron", "scheduled", "job "]) {
        ActivityKind::Cron
    } else if any(&["session", "agent", "spawn"]) {
        ActivityKind::Session
    } else if any(&["message", "reply", "send", "inbound"]) {
        ActivityKind::Message
    } else if any(&["whatsapp", "telegram", "discord", "connect", "disconnect"]) {
        ActivityKind::Channel
    } else {
        ActivityKind::System
    }
}

/// Turn one log line into an event, or `None` when the remaining message is
/// empty or 500 characters and longer.
pub fn parse_line(line: &str) -> Option<ActivityEvent> {
    let (timestamp, message) = match timestamp_re().and_then(|re| re.captures(line)) {
        Some(caps) => {
            let ts = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let rest = &line[caps.get(0).map(|m| m.end()).unwrap_or(0)..];
            let rest = rest
                .trim_start_matches(|c: char| c.is_whitespace() || c.is_ascii_digit() || matches!(c, '.' | 'Z' | '+' | '-'))
                .trim();
            (ts.to_string(), rest.to_string())
        }
        None => (String::new(), line.to_string()),
    };

    let len = message.chars().count();
    if len == 0 || len >= 500 {
        return None;
    }
    Some(ActivityEvent {
        timestamp,
        kind: classify(line),
        message,
    })
}

/// Last [`MAX_EVENTS`] events of the log tail, newest first.
pub fn parse_activity(stdout: &str) -> Vec<ActivityEvent> {
    let events: Vec<ActivityEvent> = stdout
        .lines()
        .filter(|l| !l.is_empty())
        .filter_map(parse_line)
        .collect();
    let skip = events.len().saturating_sub(MAX_EVENTS);
    events.into_iter().skip(skip).rev().collect()
}

fn activity_command(state: &AppState) -> String {
    let [gateway_log, openclaw_log] = state.paths().gateway_log_candidates();
    [
        "daily=$(ls -1t /tmp/openclaw-*/openclaw-*.log 2>/dev/null | head -1 || true)".to_string(),
        format!("fallback1={}", remote_path(&gateway_log)),
        format!("fallback2={}", remote_path(&openclaw_log)),
        "if [ -n \"$daily\" ]; then target=\"$daily\";".to_string(),
        "elif [ -f \"$fallback1\" ]; then target=\"$fallback1\";".to_string(),
        "elif [ -f \"$fallback2\" ]; then target=\"$fallback2\";".to_string(),
        "else target=\"\"; fi".to_string(),
        "if [ -n \"$target\" ]; then tail -n 200 \"$target\"; fi".to_string(),
    ]
    .join("; ")
}

#[instrument(skip(state))]
pub async fn get_activity(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let result = state
        .shell()?
        .exec(&activity_command(&state), Duration::from_secs(8))
        .await?;
    Ok(Json(json!({ "events": parse_activity(&result.stdout) })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_timestamp_and_zone() {
        let event = parse_line("2026-03-03T14:02:11.512Z [gateway] telegram connected").unwrap();
        assert_eq!(event.timestamp, "2026-03-03T14:02:11");
        assert_eq!(event.message, "[gateway] telegram connected");
        assert_eq!(event.kind, ActivityKind::Channel);
    }

    #[test]
    fn classification_precedence() {
        assert_eq!(classify("cron job failed"), ActivityKind::Error);
        assert_eq!(classify("Scheduled run for agent ops"), ActivityKind::Cron);
        assert_eq!(classify("spawned agent session"), ActivityKind::Session);
        assert_eq!(classify("inbound message"), ActivityKind::Message);
        assert_eq!(classify("discord ready"), ActivityKind::Channel);
        assert_eq!(classify("listening on 18789"), ActivityKind::System);
    }

    #[test]
    fn lines_without_timestamp_are_kept_whole() {
        let event = parse_line("plain line").unwrap();
        assert!(event.timestamp.is_empty());
        assert_eq!(event.message, "plain line");
    }

    #[test]
    fn empty_and_oversized_messages_are_dropped() {
        assert!(parse_line("2026-03-03 14:02:11.123Z ").is_none());
        assert!(parse_line(&"x".repeat(500)).is_none());
    }

    #[test]
    fn keeps_last_fifty_newest_first() {
        let log: String = (0..60).map(|i| format!("line {i}\n")).collect();
        let events = parse_activity(&log);
        assert_eq!(events.len(), 50);
        assert_eq!(events[0].message, "line 59");
        assert_eq!(events[49].message, "line 10");
    }
}
