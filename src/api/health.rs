use std::time::{Duration, Instant};

use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::ApiResult;
use crate::ssh::{self, RemoteShell};

use super::cron::CronFile;
use super::state::AppState;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl HealthCheck {
    fn new(name: &str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub checks: Vec<HealthCheck>,
    pub overall: CheckStatus,
    pub timestamp: String,
}

/// Worst status across all checks.
pub fn overall(checks: &[HealthCheck]) -> CheckStatus {
    checks
        .iter()
        .map(|c| c.status)
        .max()
        .unwrap_or(CheckStatus::Ok)
}

/// Percentage inside parentheses, e.g. `1200/3900MB (31%)`.
pub fn parse_percent(detail: &str) -> u32 {
    detail
        .split_once('(')
        .and_then(|(_, rest)| rest.split_once('%'))
        .and_then(|(pct, _)| pct.trim().parse().ok())
        .unwrap_or(0)
}

fn grade(pct: u32, error_above: u32, warn_above: u32) -> CheckStatus {
    if pct > error_above {
        CheckStatus::Error
    } else if pct > warn_above {
        CheckStatus::Warning
    } else {
        CheckStatus::Ok
    }
}

pub fn gateway_check(pgrep_stdout: &str) -> HealthCheck {
    match pgrep_stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some(pid) => HealthCheck::new("Gateway", CheckStatus::Ok, format!("PID {pid}")),
        None => HealthCheck::new("Gateway", CheckStatus::Error, "Not running"),
    }
}

/// `uptime -p` on the first line, `/proc/loadavg` on the second.
pub fn system_check(stdout: &str) -> HealthCheck {
    let mut lines = stdout.lines();
    let uptime = lines.next().filter(|l| !l.is_empty()).unwrap_or("?");
    let load = lines
        .next()
        .and_then(|l| l.split_whitespace().next())
        .unwrap_or("?");
    let status = match load.parse::<f64>() {
        Ok(l) if l > 4.0 => CheckStatus::Warning,
        _ => CheckStatus::Ok,
    };
    HealthCheck::new("System", status, format!("{uptime} · Load: {load}"))
}

pub fn memory_check(stdout: &str) -> HealthCheck {
    HealthCheck::new("Memory", grade(parse_percent(stdout), 90, 75), stdout)
}

pub fn disk_check(stdout: &str) -> HealthCheck {
    HealthCheck::new("Disk", grade(parse_percent(stdout), 90, 80), stdout)
}

pub fn cron_check(file: Option<&CronFile>) -> HealthCheck {
    let Some(file) = file else {
        return HealthCheck::new("Cron Jobs", CheckStatus::Ok, "No cron jobs configured");
    };

    let enabled: Vec<&Value> = file
        .jobs
        .iter()
        .filter(|j| j.get("enabled").and_then(Value::as_bool).unwrap_or(false))
        .collect();
    let failing: Vec<String> = enabled
        .iter()
        .filter(|j| {
            j.pointer("/state/consecutiveErrors")
                .and_then(Value::as_f64)
                .is_some_and(|n| n > 0.0)
        })
        .map(|j| {
            j.get("name")
                .or_else(|| j.get("id"))
                .and_then(Value::as_str)
                .unwrap_or("?")
                .to_string()
        })
        .collect();

    if failing.is_empty() {
        HealthCheck::new(
            "Cron Jobs",
            CheckStatus::Ok,
            format!("{} active, no errors", enabled.len()),
        )
    } else {
        HealthCheck::new(
            "Cron Jobs",
            CheckStatus::Warning,
            format!("{} with errors: {}", failing.len(), failing.join(", ")),
        )
    }
}

pub fn latency_check(result: Result<Duration, String>) -> HealthCheck {
    match result {
        Ok(elapsed) => {
            let ms = elapsed.as_millis();
            let status = if ms > 2000 {
                CheckStatus::Warning
            } else {
                CheckStatus::Ok
            };
            HealthCheck::new("SSH Latency", status, format!("{ms}ms"))
        }
        Err(e) => HealthCheck::new("SSH Latency", CheckStatus::Error, e),
    }
}

async fn run(shell: &dyn RemoteShell, command: &str) -> ApiResult<String> {
    Ok(shell.exec(command, CHECK_TIMEOUT).await?.stdout)
}

#[instrument(skip(state))]
pub async fn get_health(State(state): State<AppState>) -> ApiResult<Json<HealthReport>> {
    let shell = state.shell()?;
    let mut checks = Vec::new();

    let gateway = run(
        shell,
        "pgrep -f openclaw-gateway 2>/dev/null || pgrep -f 'openclaw.*gateway' 2>/dev/null",
    )
    .await?;
    checks.push(gateway_check(&gateway));

    let system = run(shell, "uptime -p 2>/dev/null; cat /proc/loadavg 2>/dev/null").await?;
    checks.push(system_check(&system));

    let memory = run(
        shell,
        "free -m | awk '/Mem:/ {printf \"%d/%dMB (%.0f%%)\", $3, $2, $3/$2*100}'",
    )
    .await?;
    checks.push(memory_check(&memory));

    let disk = run(shell, "df -h / | awk 'NR==2 {printf \"%s/%s (%s)\", $3, $2, $5}'").await?;
    checks.push(disk_check(&disk));

    let cron = ssh::read_file(shell, &state.paths().cron_jobs_path())
        .await
        .ok()
        .and_then(|raw| CronFile::parse(&raw).ok());
    checks.push(cron_check(cron.as_ref()));

    let started = Instant::now();
    let latency = shell
        .exec("echo ok", Duration::from_secs(3))
        .await
        .map(|_| started.elapsed())
        .map_err(|e| e.to_string());
    checks.push(latency_check(latency));

    let overall = overall(&checks);
    debug!(?overall, "health checks complete");
    Ok(Json(HealthReport {
        checks,
        overall,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_takes_worst_status() {
        let ok = HealthCheck::new("a", CheckStatus::Ok, "");
        let warn = HealthCheck::new("b", CheckStatus::Warning, "");
        let err = HealthCheck::new("c", CheckStatus::Error, "");
        assert_eq!(overall(&[]), CheckStatus::Ok);
        assert_eq!(overall(&[ok.clone(), warn.clone()]), CheckStatus::Warning);
        assert_eq!(overall(&[warn, err, ok]), CheckStatus::Error);
    }

    #[test]
    fn memory_and_disk_thresholds() {
        assert_eq!(memory_check("3500/3900MB (91%)").status, CheckStatus::Error);
        assert_eq!(memory_check("3000/3900MB (77%)").status, CheckStatus::Warning);
        assert_eq!(memory_check("1200/3900MB (31%)").status, CheckStatus::Ok);
        assert_eq!(disk_check("30G/38G (79%)").status, CheckStatus::Ok);
        assert_eq!(disk_check("31G/38G (81%)").status, CheckStatus::Warning);
        assert_eq!(disk_check("").status, CheckStatus::Ok);
    }

    #[test]
    fn gateway_pid_from_first_line() {
        let check = gateway_check("812\n913\n");
        assert_eq!(check.status, CheckStatus::Ok);
        assert_eq!(check.detail, "PID 812");
        assert_eq!(gateway_check("").status, CheckStatus::Error);
    }

    #[test]
    fn system_load_warning() {
        let check = system_check("up 3 days, 2 hours\n4.52 3.10 2.00 2/311 9911");
        assert_eq!(check.status, CheckStatus::Warning);
        assert_eq!(check.detail, "up 3 days, 2 hours · Load: 4.52");
        assert_eq!(system_check("").detail, "? · Load: ?");
    }

    #[test]
    fn cron_errors_only_count_enabled_jobs() {
        let file = CronFile::parse(
            r#"{"jobs":[
                {"id":"a","name":"digest","enabled":true,"state":{"consecutiveErrors":2}},
                {"id":"b","enabled":false,"state":{"consecutiveErrors":5}},
                {"id":"c","enabled":true}
            ]}"#,
        )
        .unwrap();
        let check = cron_check(Some(&file));
        assert_eq!(check.status, CheckStatus::Warning);
        assert_eq!(check.detail, "1 with errors: digest");
        assert_eq!(cron_check(None).status, CheckStatus::Ok);
    }

    #[test]
    fn latency_threshold() {
        assert_eq!(latency_check(Ok(Duration::from_millis(120))).detail, "120ms");
        assert_eq!(latency_check(Ok(Duration::from_millis(2500))).status, CheckStatus::Warning);
        assert_eq!(latency_check(Err("timeout".into())).status, CheckStatus::Error);
    }
}
