use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, instrument, warn};

use crate::error::{ApiError, ApiResult, SshError};
use crate::ssh::{self, sanitize_id, shell_quote, DEFAULT_TIMEOUT};

use super::extract::ApiJson;
use super::state::AppState;

/// `cron/jobs.json`: either a bare array or an object carrying `jobs`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CronFile {
    pub wrapper: Option<Map<String, Value>>,
    pub jobs: Vec<Value>,
}

impl CronFile {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let parsed: Value = serde_json::from_str(raw)?;
        Ok(match parsed {
            Value::Array(jobs) => Self { wrapper: None, jobs },
            Value::Object(mut obj) => {
                let jobs = match obj.remove("jobs") {
                    Some(Value::Array(jobs)) => jobs,
                    _ => Vec::new(),
                };
                Self {
                    wrapper: Some(obj),
                    jobs,
                }
            }
            _ => Self::default(),
        })
    }

    /// Serialize back in the shape it was read in.
    pub fn render(&self) -> Result<String, serde_json::Error> {
        let data = match &self.wrapper {
            Some(wrapper) => {
                let mut obj = wrapper.clone();
                obj.insert("jobs".into(), Value::Array(self.jobs.clone()));
                Value::Object(obj)
            }
            None => Value::Array(self.jobs.clone()),
        };
        serde_json::to_string_pretty(&data)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.jobs
            .iter()
            .position(|j| j.get("id").and_then(Value::as_str) == Some(id))
    }

    /// Flip `enabled` on job `id`; false if the job is unknown.
    pub fn toggle(&mut self, id: &str) -> bool {
        let Some(idx) = self.position(id) else {
            return false;
        };
        let Some(job) = self.jobs[idx].as_object_mut() else {
            return false;
        };
        let enabled = job.get("enabled").and_then(Value::as_bool).unwrap_or(false);
        job.insert("enabled".into(), Value::Bool(!enabled));
        true
    }

    pub fn remove(&mut self, id: &str) {
        self.jobs
            .retain(|j| j.get("id").and_then(Value::as_str) != Some(id));
    }

    /// Shallow-merge `patch` over the job with the same id.
    pub fn update(&mut self, patch: &Value) -> bool {
        let Some(id) = patch.get("id").and_then(Value::as_str) else {
            return false;
        };
        let Some(idx) = self.position(id) else {
            return false;
        };
        match (self.jobs[idx].as_object_mut(), patch.as_object()) {
            (Some(existing), Some(patch)) => {
                for (k, v) in patch {
                    existing.insert(k.clone(), v.clone());
                }
                true
            }
            _ => false,
        }
    }
}

async fn read_cron_file(state: &AppState) -> Result<CronFile, ApiError> {
    let raw = ssh::read_file(state.shell()?, &state.paths().cron_jobs_path()).await?;
    Ok(CronFile::parse(&raw)?)
}

async fn write_cron_file(state: &AppState, file: &CronFile) -> ApiResult<()> {
    let content = file.render()?;
    ssh::write_file(state.shell()?, &state.paths().cron_jobs_path(), &content).await?;
    Ok(())
}

#[instrument(skip(state))]
pub async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let shell = state.shell()?;
    match ssh::read_file(shell, &state.paths().cron_jobs_path()).await {
        Ok(raw) => {
            let file = CronFile::parse(&raw)?;
            Ok(Json(json!({ "jobs": file.jobs })))
        }
        Err(e @ SshError::Read { .. }) if e.to_string().contains("No such file") => {
            Ok(Json(json!({ "jobs": [] })))
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronActionRequest {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub job: Option<Value>,
}

#[instrument(skip(state, req), fields(action = %req.action))]
pub async fn cron_action(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CronActionRequest>,
) -> ApiResult<Json<Value>> {
    let shell = state.shell()?;
    let job_id = req.job_id.as_deref().filter(|s| !s.is_empty());
    let job = req.job.filter(|j| !j.is_null());

    match (req.action.as_str(), job_id, job) {
        ("run", Some(id), _) => {
            let id = sanitize_id(id);
            let result = shell
                .exec(&format!("openclaw cron run --id=\"{id}\" 2>&1"), DEFAULT_TIMEOUT)
                .await?;
            info!(job = %id, exit_code = result.exit_code, "cron job triggered");
            Ok(Json(json!({ "ok": true, "output": result.stdout })))
        }
        ("toggle", Some(id), _) => {
            let mut file = read_cron_file(&state).await?;
            if file.toggle(id) {
                write_cron_file(&state, &file).await?;
            }
            Ok(Json(json!({ "ok": true })))
        }
        ("delete", Some(id), _) => {
            let mut file = read_cron_file(&state).await?;
            file.remove(id);
            write_cron_file(&state, &file).await?;
            Ok(Json(json!({ "ok": true })))
        }
        ("create", _, Some(mut job)) => {
            let payload = serde_json::to_string(&job)?;
            let result = shell
                .exec(
                    &format!("openclaw cron add --json {} 2>&1", shell_quote(&payload)),
                    DEFAULT_TIMEOUT,
                )
                .await?;

            if !result.success() {
                warn!(output = %result.stdout, "cron add failed, writing jobs.json directly");
                let mut file = read_cron_file(&state).await.unwrap_or_default();
                if let Some(obj) = job.as_object_mut() {
                    let has_id = obj
                        .get("id")
                        .and_then(Value::as_str)
                        .is_some_and(|s| !s.is_empty());
                    if !has_id {
                        let id = format!("job_{}", chrono::Utc::now().timestamp_millis());
                        obj.insert("id".into(), Value::String(id));
                    }
                }
                file.jobs.push(job.clone());
                write_cron_file(&state, &file).await?;
            }
            Ok(Json(json!({ "ok": true, "job": job })))
        }
        ("update", _, Some(job)) => {
            let mut file = read_cron_file(&state).await?;
            if file.update(&job) {
                write_cron_file(&state, &file).await?;
            }
            Ok(Json(json!({ "ok": true })))
        }
        _ => Err(ApiError::bad_request("Invalid action")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapper_shape_round_trips() {
        let mut file = CronFile::parse(
            r#"{"version":1,"jobs":[{"id":"daily","enabled":true,"schedule":"0 9 * * *"}]}"#,
        )
        .unwrap();
        assert_eq!(file.jobs.len(), 1);
        file.remove("daily");

        let rendered: Value = serde_json::from_str(&file.render().unwrap()).unwrap();
        assert_eq!(rendered, json!({ "version": 1, "jobs": [] }));
    }

    #[test]
    fn bare_array_stays_an_array() {
        let file = CronFile::parse(r#"[{"id":"a"}]"#).unwrap();
        assert!(file.wrapper.is_none());
        let rendered: Value = serde_json::from_str(&file.render().unwrap()).unwrap();
        assert!(rendered.is_array());
    }

    #[test]
    fn toggle_flips_and_defaults_to_disabled() {
        let mut file = CronFile::parse(r#"[{"id":"a","enabled":true},{"id":"b"}]"#).unwrap();
        assert!(file.toggle("a"));
        assert!(file.toggle("b"));
        assert!(!file.toggle("missing"));
        assert_eq!(file.jobs[0]["enabled"], false);
        assert_eq!(file.jobs[1]["enabled"], true);
    }

    #[test]
    fn update_merges_shallowly() {
        let mut file =
            CronFile::parse(r#"[{"id":"a","name":"old","state":{"runs":3}}]"#).unwrap();
        assert!(file.update(&json!({ "id": "a", "name": "new" })));
        assert_eq!(file.jobs[0], json!({ "id": "a", "name": "new", "state": { "runs": 3 } }));
        assert!(!file.update(&json!({ "id": "zzz" })));
    }

    #[test]
    fn object_without_jobs_is_empty() {
        let file = CronFile::parse(r#"{"version":2}"#).unwrap();
        assert!(file.jobs.is_empty());
        assert!(file.wrapper.is_some());
    }
}
