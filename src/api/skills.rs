//! Skill directories on the gateway host: listing, SKILL.md metadata,
//! git-based install and removal.

use std::sync::OnceLock;
use std::time::Duration;

use axum::{extract::State, Json};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::error::{ApiError, ApiResult};
use crate::ssh::{remote_path, sanitize_id, shell_quote, RemoteShell, DEFAULT_TIMEOUT};

use super::extract::{ApiJson, ApiQuery};
use super::state::AppState;

const SKILLS_MONOREPO: &str = "https://github.com/openclaw/skills.git";
const CLONE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkillEntry {
    pub name: String,
    pub path: String,
    pub source: String,
}

/// `ls -d <dir>/*/` output into skill entries.
pub fn parse_skill_dirs(stdout: &str, source: &str) -> Vec<SkillEntry> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|dir| {
            let name = dir.trim_end_matches('/').rsplit('/').next()?;
            if name.is_empty() {
                return None;
            }
            Some(SkillEntry {
                name: name.to_string(),
                path: dir.to_string(),
                source: source.to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SkillMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Split `---` front matter from the body.
fn split_front_matter(content: &str) -> (Option<&str>, &str) {
    let Some(rest) = content.strip_prefix("---\n") else {
        return (None, content);
    };
    match rest.find("\n---") {
        Some(end) => {
            let body = &rest[end + 4..];
            (Some(&rest[..end]), body)
        }
        None => (None, content),
    }
}

fn front_matter_field(front: &str, key: &str) -> Option<String> {
    front.lines().find_map(|line| {
        let value = line.strip_prefix(key)?.strip_prefix(':')?.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Metadata from SKILL.md front matter, with the first paragraph under the
/// first heading as a fallback description.
pub fn parse_skill_meta(content: &str) -> SkillMeta {
    let (front, body) = split_front_matter(content);
    let mut meta = SkillMeta::default();
    if let Some(front) = front {
        meta.name = front_matter_field(front, "name");
        meta.version = front_matter_field(front, "version");
        meta.description = front_matter_field(front, "description");
    }

    if meta.description.is_none() {
        meta.description = body
            .lines()
            .skip_while(|l| !l.starts_with('#'))
            .skip(1)
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string);
    }
    meta
}

/// Where a skill install pulls from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkillSource {
    /// A directory inside the skills monorepo.
    ClawHub { repo: String, path: String },
    Git { repo: String },
}

fn clawhub_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^https?://clawhub\.ai/([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)/?$").ok())
        .as_ref()
}

fn git_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(https?://|git@)\S+\.git$").ok())
        .as_ref()
}

pub fn parse_skill_url(url: &str) -> Option<SkillSource> {
    let url = url.trim();
    if let Some(caps) = clawhub_re().and_then(|re| re.captures(url)) {
        let (author, skill) = (caps.get(1)?.as_str(), caps.get(2)?.as_str());
        if author.contains("..") || skill.contains("..") {
            return None;
        }
        return Some(SkillSource::ClawHub {
            repo: SKILLS_MONOREPO.to_string(),
            path: format!("skills/{author}/{skill}"),
        });
    }
    if git_re().is_some_and(|re| re.is_match(url)) {
        return Some(SkillSource::Git {
            repo: url.to_string(),
        });
    }
    None
}

/// A removable skill path lives in a `skills` directory and ends in `name`.
pub fn validate_skill_path<'a>(path: &'a str, name: &str) -> ApiResult<&'a str> {
    let path = path.trim().trim_end_matches('/');
    if !path.contains("/skills/") || path.contains("..") {
        return Err(ApiError::bad_request(
            "Invalid path: can only remove from skills directories",
        ));
    }
    if !name.is_empty() && !path.ends_with(&format!("/{name}")) {
        return Err(ApiError::bad_request("Path does not match skill name"));
    }
    Ok(path)
}

async fn is_dir(shell: &dyn RemoteShell, path: &str) -> ApiResult<bool> {
    let out = shell
        .exec(
            &format!("test -d {} && echo 'exists' || echo ''", remote_path(path)),
            DEFAULT_TIMEOUT,
        )
        .await?;
    Ok(out.stdout.trim() == "exists")
}

fn failure_detail(stdout: &str, stderr: &str) -> String {
    if stderr.is_empty() {
        stdout.to_string()
    } else {
        stderr.to_string()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[instrument(skip(state))]
pub async fn list_skills(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let shell = state.shell()?;
    let mut skills = Vec::new();
    for (dir, source) in [
        (state.paths().global_skills_dir(), "global"),
        (state.paths().workspace_skills_dir(), "workspace"),
    ] {
        let out = shell
            .exec(
                &format!("ls -d {}/*/ 2>/dev/null || true", remote_path(&dir)),
                DEFAULT_TIMEOUT,
            )
            .await?;
        skills.extend(parse_skill_dirs(&out.stdout, source));
    }
    Ok(Json(json!({ "skills": skills })))
}

#[derive(Debug, Deserialize)]
pub struct SkillMetaQuery {
    pub path: Option<String>,
}

#[instrument(skip(state))]
pub async fn skill_meta(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<SkillMetaQuery>,
) -> ApiResult<Json<SkillMeta>> {
    let shell = state.shell()?;
    let Some(path) = query.path.as_deref().filter(|p| !p.trim().is_empty()) else {
        return Err(ApiError::bad_request("Path required"));
    };
    let path = validate_skill_path(path, "")?;

    let out = shell
        .exec(
            &format!("cat {} 2>/dev/null || echo ''", remote_path(&format!("{path}/SKILL.md"))),
            DEFAULT_TIMEOUT,
        )
        .await?;
    Ok(Json(parse_skill_meta(&out.stdout)))
}

#[derive(Debug, Deserialize)]
pub struct InstallSkillRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub name: String,
}

#[instrument(skip(state))]
pub async fn install_skill(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<InstallSkillRequest>,
) -> ApiResult<Json<Value>> {
    let shell = state.shell()?;
    let name = req.name.trim();
    if req.url.trim().is_empty() || name.is_empty() {
        return Err(ApiError::bad_request("URL and name required"));
    }
    if sanitize_id(name) != name {
        return Err(ApiError::bad_request(
            "Skill name may only contain letters, digits, '-' and '_'",
        ));
    }
    let source = parse_skill_url(&req.url).ok_or_else(|| {
        ApiError::bad_request(
            "Invalid URL. Use ClawHub (https://clawhub.ai/author/skill) or a git URL ending in .git",
        )
    })?;

    let skills_dir = state.paths().workspace_skills_dir();
    let target = format!("{skills_dir}/{name}");
    if is_dir(shell, &target).await? {
        return Err(ApiError::conflict(format!("Skill \"{name}\" already exists")));
    }

    match &source {
        SkillSource::ClawHub { repo, path } => {
            let tmp = remote_path(&format!(
                "{}/skill-install-{}",
                state.paths().tmp_dir(),
                chrono::Utc::now().timestamp_millis()
            ));
            shell
                .exec(
                    &format!(
                        "mkdir -p {tmp} && cd {tmp} && git init -q && git remote add origin {} && git config core.sparseCheckout true && echo {} > .git/info/sparse-checkout",
                        shell_quote(repo),
                        shell_quote(&format!("{path}/"))
                    ),
                    DEFAULT_TIMEOUT,
                )
                .await?;

            let mut pulled = shell
                .exec(&format!("cd {tmp} && git pull --depth=1 origin main 2>&1"), CLONE_TIMEOUT)
                .await?;
            if !pulled.success() {
                pulled = shell
                    .exec(&format!("cd {tmp} && git pull --depth=1 origin master 2>&1"), CLONE_TIMEOUT)
                    .await?;
            }
            if !pulled.success() {
                shell.exec(&format!("rm -rf {tmp}"), DEFAULT_TIMEOUT).await?;
                return Err(ApiError::internal(format!(
                    "Failed to clone repository: {}",
                    failure_detail(&pulled.stdout, &pulled.stderr)
                )));
            }

            let moved = shell
                .exec(
                    &format!(
                        "mkdir -p {} && mv {tmp}/{} {} && rm -rf {tmp}",
                        remote_path(&skills_dir),
                        shell_quote(path),
                        remote_path(&target)
                    ),
                    DEFAULT_TIMEOUT,
                )
                .await?;
            if !moved.success() {
                shell.exec(&format!("rm -rf {tmp}"), DEFAULT_TIMEOUT).await?;
                return Err(ApiError::internal(format!(
                    "Failed to install skill: {}",
                    failure_detail(&moved.stdout, &moved.stderr)
                )));
            }
        }
        SkillSource::Git { repo } => {
            let cloned = shell
                .exec(
                    &format!(
                        "mkdir -p {} && git clone {} {} 2>&1",
                        remote_path(&skills_dir),
                        shell_quote(repo),
                        remote_path(&target)
                    ),
                    CLONE_TIMEOUT,
                )
                .await?;
            if !cloned.success() {
                return Err(ApiError::internal(format!(
                    "Failed to clone repository: {}",
                    failure_detail(&cloned.stdout, &cloned.stderr)
                )));
            }
        }
    }

    let check = shell
        .exec(
            &format!(
                "test -f {} && echo 'ok' || echo 'missing'",
                remote_path(&format!("{target}/SKILL.md"))
            ),
            DEFAULT_TIMEOUT,
        )
        .await?;
    if check.stdout.trim() != "ok" {
        warn!(skill = %name, "installed repository has no SKILL.md, removing");
        shell
            .exec(&format!("rm -rf {}", remote_path(&target)), DEFAULT_TIMEOUT)
            .await?;
        return Err(ApiError::bad_request(
            "Invalid skill: SKILL.md not found in repository",
        ));
    }

    info!(skill = %name, ?source, "skill installed");
    Ok(Json(json!({
        "success": true,
        "message": format!("Skill \"{name}\" installed successfully"),
        "path": target,
    })))
}

#[derive(Debug, Deserialize)]
pub struct UninstallSkillRequest {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub name: String,
}

#[instrument(skip(state))]
pub async fn uninstall_skill(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<UninstallSkillRequest>,
) -> ApiResult<Json<Value>> {
    let shell = state.shell()?;
    let name = req.name.trim();
    if req.path.trim().is_empty() || name.is_empty() {
        return Err(ApiError::bad_request("Path and name required"));
    }
    let path = validate_skill_path(&req.path, name)?;

    if !is_dir(shell, path).await? {
        return Err(ApiError::not_found(format!("Skill \"{name}\" not found")));
    }

    let result = shell
        .exec(&format!("rm -rf {} 2>&1", remote_path(path)), DEFAULT_TIMEOUT)
        .await?;
    if !result.success() {
        return Err(ApiError::internal(failure_detail(&result.stdout, &result.stderr)));
    }

    info!(skill = %name, "skill removed");
    Ok(Json(json!({
        "success": true,
        "message": format!("Skill \"{name}\" uninstalled successfully"),
    })))
}
