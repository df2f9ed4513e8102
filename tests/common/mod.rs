//! Scripted in-memory `RemoteShell` and request helpers for router tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use clawdeck::config::{LogFormat, OpenClawPaths, Settings};
use clawdeck::error::SshError;
use clawdeck::ssh::{RemoteShell, SshExecResult};
use clawdeck::{create_router, AppState};

type Reply = Arc<dyn Fn() -> Result<SshExecResult, SshError> + Send + Sync>;

/// A command the fake shell received, with whatever was piped to stdin.
#[derive(Debug, Clone)]
pub struct Call {
    pub command: String,
    pub input: Option<String>,
}

/// Answers commands by substring match; the first matching rule wins and
/// unmatched commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedShell {
    rules: Mutex<Vec<(String, Reply)>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedShell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, needle: &str, stdout: &str) -> &Self {
        self.on_result(needle, stdout, "", 0)
    }

    pub fn on_result(&self, needle: &str, stdout: &str, stderr: &str, exit_code: u32) -> &Self {
        let result = SshExecResult {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code,
        };
        self.rules
            .lock()
            .unwrap()
            .push((needle.to_string(), Arc::new(move || Ok(result.clone()))));
        self
    }

    pub fn on_timeout(&self, needle: &str) -> &Self {
        let command = needle.to_string();
        self.rules.lock().unwrap().push((
            needle.to_string(),
            Arc::new(move || Err(SshError::timeout(5000, &command))),
        ));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose command contains `needle`.
    pub fn calls_matching(&self, needle: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.command.contains(needle))
            .collect()
    }

    fn answer(&self, command: &str, input: Option<&[u8]>) -> Result<SshExecResult, SshError> {
        self.calls.lock().unwrap().push(Call {
            command: command.to_string(),
            input: input.map(|b| String::from_utf8_lossy(b).into_owned()),
        });
        let reply = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone());
        match reply {
            Some(reply) => reply(),
            None => Ok(SshExecResult::default()),
        }
    }
}

#[async_trait]
impl RemoteShell for ScriptedShell {
    async fn exec(&self, command: &str, _timeout: Duration) -> Result<SshExecResult, SshError> {
        self.answer(command, None)
    }

    async fn exec_with_input(
        &self,
        command: &str,
        input: &[u8],
        _timeout: Duration,
    ) -> Result<SshExecResult, SshError> {
        self.answer(command, Some(input))
    }
}

pub const CONFIG_CAT: &str = "cat \"$HOME/.openclaw/openclaw.json\"";
pub const CONFIG_WRITE: &str = "cat > \"$HOME/.openclaw/openclaw.json\"";
pub const CRON_CAT: &str = "cat \"$HOME/.openclaw/cron/jobs.json\"";

pub fn settings(data_dir: &Path) -> Settings {
    Settings {
        bind: ([127, 0, 0, 1], 0).into(),
        ssh: None,
        paths: OpenClawPaths::new("~/.openclaw"),
        data_dir: data_dir.to_path_buf(),
        static_dir: None,
        cors_origins: Vec::new(),
        log_format: LogFormat::Text,
    }
}

pub fn state_with(shell: &Arc<ScriptedShell>, data_dir: &Path) -> AppState {
    AppState::with_shell(settings(data_dir), Some(shell.clone() as Arc<dyn RemoteShell>))
}

pub fn unconfigured_state(data_dir: &Path) -> AppState {
    AppState::with_shell(settings(data_dir), None)
}

pub async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

pub async fn get(state: &AppState, uri: &str) -> (StatusCode, Value) {
    send(create_router(state.clone()), "GET", uri, None).await
}

pub async fn post(state: &AppState, uri: &str, body: Value) -> (StatusCode, Value) {
    send(create_router(state.clone()), "POST", uri, Some(body)).await
}

pub async fn delete(state: &AppState, uri: &str, body: Value) -> (StatusCode, Value) {
    send(create_router(state.clone()), "DELETE", uri, Some(body)).await
}
