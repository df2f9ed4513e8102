use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

/// Admin console backend for a remote OpenClaw gateway, reached over SSH.
#[derive(Debug, Clone, Parser)]
#[command(name = "clawdeck", version, about)]
pub struct Cli {
    /// Address the HTTP API listens on
    #[arg(long, env = "CLAWDECK_BIND", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,

    /// Remote host running the gateway (IP, hostname or ~/.ssh/config alias)
    #[arg(long, env = "SSH_HOST")]
    pub ssh_host: Option<String>,

    /// SSH port [default: ssh_config Port, else 22]
    #[arg(long, env = "SSH_PORT")]
    pub ssh_port: Option<u16>,

    /// SSH user [default: ssh_config User, else root]
    #[arg(long, env = "SSH_USER")]
    pub ssh_user: Option<String>,

    /// Private key used for public key authentication
    #[arg(long, env = "SSH_KEY_PATH")]
    pub ssh_key_path: Option<String>,

    /// Password used when no key is available
    #[arg(long, env = "SSH_PASSWORD", hide_env_values = true)]
    pub ssh_password: Option<String>,

    /// Verify the remote host key against ~/.ssh/known_hosts
    #[arg(long, env = "SSH_STRICT_HOST_KEYS")]
    pub strict_host_keys: bool,

    /// OpenClaw home directory on the remote host
    #[arg(long, env = "OPENCLAW_HOME", default_value = "~/.openclaw")]
    pub openclaw_home: String,

    /// Local directory for config snapshots
    #[arg(long, env = "CLAWDECK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Directory with a built frontend to serve at `/`
    #[arg(long, env = "CLAWDECK_STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// Browser origins allowed to call the API cross-origin
    #[arg(long = "cors-origin", env = "CLAWDECK_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Log output format
    #[arg(long, env = "CLAWDECK_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Connection parameters for the remote gateway host.
#[derive(Debug, Clone)]
pub struct SshSettings {
    pub host: String,
    /// Explicit port; unset defers to ssh_config, then 22.
    pub port: Option<u16>,
    /// Explicit user; unset defers to ssh_config, then `root`.
    pub username: Option<String>,
    pub key_path: Option<String>,
    pub password: Option<String>,
    pub connect_timeout: Duration,
    /// Prepended to PATH so npm-global installs of `openclaw` resolve.
    pub path_prefix: String,
    pub strict_host_keys: bool,
}

impl SshSettings {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            username: None,
            key_path: None,
            password: None,
            connect_timeout: Duration::from_secs(10),
            path_prefix: "$HOME/.npm-global/bin".into(),
            strict_host_keys: false,
        }
    }
}

/// Remote OpenClaw layout, every path relative to `home`.
///
/// Paths keep a leading `~` so that [`crate::ssh::remote_path`] can render
/// them as `"$HOME/..."` inside double quotes.
#[derive(Debug, Clone)]
pub struct OpenClawPaths {
    pub home: String,
}

impl OpenClawPaths {
    pub fn new(home: impl Into<String>) -> Self {
        let home: String = home.into();
        Self {
            home: home.trim_end_matches('/').to_string(),
        }
    }

    pub fn config_path(&self) -> String {
        format!("{}/openclaw.json", self.home)
    }

    pub fn config_backup_path(&self) -> String {
        format!("{}/openclaw.json.backup", self.home)
    }

    pub fn cron_jobs_path(&self) -> String {
        format!("{}/cron/jobs.json", self.home)
    }

    pub fn agents_dir(&self) -> String {
        format!("{}/agents", self.home)
    }

    pub fn sessions_dir(&self, agent_id: &str) -> String {
        format!("{}/{agent_id}/sessions", self.agents_dir())
    }

    pub fn workspace_dir(&self) -> String {
        format!("{}/workspace", self.home)
    }

    pub fn global_skills_dir(&self) -> String {
        format!("{}/skills", self.home)
    }

    pub fn workspace_skills_dir(&self) -> String {
        format!("{}/workspace/skills", self.home)
    }

    pub fn tmp_dir(&self) -> String {
        format!("{}/.tmp", self.home)
    }

    pub fn gateway_log_candidates(&self) -> [String; 2] {
        [
            format!("{}/logs/gateway.log", self.home),
            format!("{}/openclaw.log", self.home),
        ]
    }
}

impl Default for OpenClawPaths {
    fn default() -> Self {
        Self::new("~/.openclaw")
    }
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind: SocketAddr,
    pub ssh: Option<SshSettings>,
    pub paths: OpenClawPaths,
    pub data_dir: PathBuf,
    pub static_dir: Option<PathBuf>,
    pub cors_origins: Vec<String>,
    pub log_format: LogFormat,
}

impl Settings {
    pub fn from_cli(cli: Cli) -> Self {
        let ssh = cli
            .ssh_host
            .filter(|h| !h.trim().is_empty())
            .map(|host| SshSettings {
                port: cli.ssh_port,
                username: cli.ssh_user.clone().filter(|u| !u.trim().is_empty()),
                key_path: cli.ssh_key_path.clone().filter(|p| !p.is_empty()),
                password: cli.ssh_password.clone().filter(|p| !p.is_empty()),
                strict_host_keys: cli.strict_host_keys,
                ..SshSettings::new(host.trim())
            });

        let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);

        Self {
            bind: cli.bind,
            ssh,
            paths: OpenClawPaths::new(cli.openclaw_home),
            data_dir,
            static_dir: cli.static_dir,
            cors_origins: cli.cors_origins,
            log_format: cli.log_format,
        }
    }

    pub fn history_dir(&self) -> PathBuf {
        self.data_dir.join("history")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("clawdeck")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Settings {
        let mut argv = vec!["clawdeck"];
        argv.extend_from_slice(args);
        Settings::from_cli(Cli::try_parse_from(argv).unwrap())
    }

    #[test]
    fn missing_host_leaves_ssh_unconfigured() {
        let settings = parse(&["--ssh-host", "  "]);
        assert!(settings.ssh.is_none());
    }

    #[test]
    fn ssh_settings_pick_up_flags() {
        let settings = parse(&[
            "--ssh-host",
            "vps.example.com",
            "--ssh-port",
            "2222",
            "--ssh-user",
            "claw",
            "--ssh-key-path",
            "~/.ssh/id_ed25519",
        ]);
        let ssh = settings.ssh.expect("ssh configured");
        assert_eq!(ssh.host, "vps.example.com");
        assert_eq!(ssh.port, Some(2222));
        assert_eq!(ssh.username.as_deref(), Some("claw"));
        assert_eq!(ssh.key_path.as_deref(), Some("~/.ssh/id_ed25519"));
        assert!(ssh.password.is_none());
        assert_eq!(ssh.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn ssh_port_and_user_default_to_unset() {
        let ssh = parse(&["--ssh-host", "claw", "--ssh-user", ""]).ssh.expect("ssh configured");
        assert_eq!(ssh.port, None);
        assert_eq!(ssh.username, None);
    }

    #[test]
    fn openclaw_paths_derive_from_home() {
        let paths = OpenClawPaths::new("~/.openclaw/");
        assert_eq!(paths.config_path(), "~/.openclaw/openclaw.json");
        assert_eq!(paths.cron_jobs_path(), "~/.openclaw/cron/jobs.json");
        assert_eq!(paths.sessions_dir("main"), "~/.openclaw/agents/main/sessions");
        assert_eq!(paths.workspace_skills_dir(), "~/.openclaw/workspace/skills");
    }

    #[test]
    fn data_dir_override_wins() {
        let settings = parse(&["--data-dir", "/var/lib/clawdeck"]);
        assert_eq!(settings.history_dir(), PathBuf::from("/var/lib/clawdeck/history"));
    }
}
