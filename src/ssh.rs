use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use russh::client;
use russh::keys::key;
use russh::{ChannelMsg, Disconnect};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SshSettings;
use crate::error::SshError;

/// Timeout used when a caller has no more specific budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: u32,
}

impl SshExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One-shot command execution on the gateway host.
///
/// Every call is independent: implementations must not keep connection state
/// between calls.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn exec(&self, command: &str, timeout: Duration) -> Result<SshExecResult, SshError>;

    /// Like [`RemoteShell::exec`], with `input` written to the command's stdin.
    async fn exec_with_input(
        &self,
        command: &str,
        input: &[u8],
        timeout: Duration,
    ) -> Result<SshExecResult, SshError>;
}

// ---------------------------------------------------------------------------
// Client handler
// ---------------------------------------------------------------------------

struct SshHandler {
    host: String,
    port: u16,
    strict: bool,
}

#[async_trait]
impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        if !self.strict {
            return Ok(true);
        }
        match russh::keys::check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(known) => {
                if !known {
                    warn!(host = %self.host, "host key not present in known_hosts");
                }
                Ok(known)
            }
            Err(e) => {
                warn!(host = %self.host, error = %e, "host key verification failed");
                Ok(false)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// russh-backed shell
// ---------------------------------------------------------------------------

/// Opens a fresh SSH connection for every command and closes it afterwards.
pub struct SshShell {
    settings: SshSettings,
}

impl SshShell {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }

    async fn connect(&self) -> Result<client::Handle<SshHandler>, SshError> {
        let ssh_entry = parse_ssh_config(&self.settings.host);
        let target = resolve_target(&self.settings, ssh_entry.as_ref());

        let config = Arc::new(client::Config {
            inactivity_timeout: Some(Duration::from_secs(300)),
            ..<_>::default()
        });
        let handler = SshHandler {
            host: target.host.clone(),
            port: target.port,
            strict: self.settings.strict_host_keys,
        };

        let mut session = tokio::time::timeout(
            self.settings.connect_timeout,
            client::connect(config, (target.host.as_str(), target.port), handler),
        )
        .await
        .map_err(|_| {
            SshError::Connect(format!(
                "timed out after {}ms connecting to {}:{}",
                self.settings.connect_timeout.as_millis(),
                target.host,
                target.port
            ))
        })?
        .map_err(|e| SshError::Connect(e.to_string()))?;

        let username = target.username.as_str();
        let methods = auth_methods(target.key_path.as_deref(), self.settings.password.as_deref());
        let key_attempted = methods.contains(&AuthMethod::Key);

        for method in methods {
            let authenticated = match method {
                AuthMethod::Key => {
                    let Some(key_path) = target.key_path.as_deref() else {
                        continue;
                    };
                    let expanded = shellexpand::tilde(key_path).to_string();
                    match russh::keys::load_secret_key(&expanded, None) {
                        Ok(key_pair) => session
                            .authenticate_publickey(username, Arc::new(key_pair))
                            .await
                            .map_err(|e| SshError::Auth(format!("public key auth failed: {e}")))?,
                        Err(e) => {
                            let err = SshError::Key {
                                path: expanded,
                                reason: e.to_string(),
                            };
                            warn!(error = %err, "could not load SSH key, falling back");
                            false
                        }
                    }
                }
                AuthMethod::Password => {
                    let Some(password) = self.settings.password.as_deref() else {
                        continue;
                    };
                    session
                        .authenticate_password(username, password)
                        .await
                        .map_err(|e| SshError::Auth(format!("password auth failed: {e}")))?
                }
                AuthMethod::Agent => match authenticate_with_agent(&mut session, username).await {
                    Ok(ok) => ok,
                    // With a key already tried, report the rejection rather than the agent
                    Err(e) if key_attempted => {
                        debug!(error = %e, "agent fallback unavailable");
                        false
                    }
                    Err(e) => return Err(e),
                },
            };
            if authenticated {
                debug!(user = %username, method = ?method, "ssh authenticated");
                return Ok(session);
            }
        }

        Err(SshError::Auth("rejected by server".into()))
    }

    async fn run(&self, command: &str, input: Option<&[u8]>) -> Result<SshExecResult, SshError> {
        let session = self.connect().await?;

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| SshError::Channel(format!("failed to open channel: {e}")))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::Channel(format!("failed to exec command: {e}")))?;

        if let Some(input) = input {
            channel
                .data(input)
                .await
                .map_err(|e| SshError::Channel(format!("failed to send stdin: {e}")))?;
            channel
                .eof()
                .await
                .map_err(|e| SshError::Channel(format!("failed to close stdin: {e}")))?;
        }

        let mut stdout_bytes: Vec<u8> = Vec::new();
        let mut stderr_bytes: Vec<u8> = Vec::new();
        let mut exit_code: u32 = 0;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout_bytes.extend_from_slice(data),
                // Extended data stream 1 is stderr
                ChannelMsg::ExtendedData { ref data, ext: 1 } => {
                    stderr_bytes.extend_from_slice(data);
                }
                ChannelMsg::ExitStatus { exit_status } => exit_code = exit_status,
                _ => {}
            }
        }

        let _ = session
            .disconnect(Disconnect::ByApplication, "", "")
            .await;

        Ok(SshExecResult {
            stdout: String::from_utf8_lossy(&stdout_bytes).trim().to_string(),
            stderr: String::from_utf8_lossy(&stderr_bytes).trim().to_string(),
            exit_code,
        })
    }

    async fn run_with_timeout(
        &self,
        command: &str,
        input: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<SshExecResult, SshError> {
        let full_command = format!("PATH={}:$PATH {command}", self.settings.path_prefix);
        let started = Instant::now();

        let result = tokio::time::timeout(timeout, self.run(&full_command, input))
            .await
            .map_err(|_| SshError::timeout(timeout.as_millis(), command))
            .and_then(|r| r);

        match &result {
            Ok(output) => debug!(
                command = %preview(command),
                exit_code = output.exit_code,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "ssh exec"
            ),
            Err(e) => warn!(command = %preview(command), error = %e, "ssh exec failed"),
        }
        result
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn exec(&self, command: &str, timeout: Duration) -> Result<SshExecResult, SshError> {
        self.run_with_timeout(command, None, timeout).await
    }

    async fn exec_with_input(
        &self,
        command: &str,
        input: &[u8],
        timeout: Duration,
    ) -> Result<SshExecResult, SshError> {
        self.run_with_timeout(command, Some(input), timeout).await
    }
}

/// Where and as whom to connect, after ssh_config lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub key_path: Option<String>,
}

/// Explicit settings win over the matching ssh_config entry, which wins over
/// the defaults (port 22, user `root`).
pub fn resolve_target(settings: &SshSettings, entry: Option<&SshConfigEntry>) -> SshTarget {
    let entry = entry.cloned().unwrap_or_default();
    SshTarget {
        host: entry.hostname.unwrap_or_else(|| settings.host.clone()),
        port: settings.port.or(entry.port).unwrap_or(22),
        username: settings
            .username
            .clone()
            .or(entry.user)
            .unwrap_or_else(|| "root".to_string()),
        key_path: settings.key_path.clone().or(entry.identity_file),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Key,
    Password,
    Agent,
}

/// Authentication attempts in order. The agent is the last resort unless a
/// password was configured.
pub fn auth_methods(key_path: Option<&str>, password: Option<&str>) -> Vec<AuthMethod> {
    let mut methods = Vec::with_capacity(3);
    if key_path.is_some() {
        methods.push(AuthMethod::Key);
    }
    match password {
        Some(_) => methods.push(AuthMethod::Password),
        None => methods.push(AuthMethod::Agent),
    }
    methods
}

/// Try all keys offered by the ssh-agent until one succeeds.
async fn authenticate_with_agent(
    session: &mut client::Handle<SshHandler>,
    username: &str,
) -> Result<bool, SshError> {
    let mut agent = russh::keys::agent::client::AgentClient::connect_env()
        .await
        .map_err(|e| SshError::Auth(format!("could not connect to SSH agent: {e}")))?;

    let identities = agent
        .request_identities()
        .await
        .map_err(|e| SshError::Auth(format!("failed to list agent identities: {e}")))?;

    if identities.is_empty() {
        return Err(SshError::Auth("SSH agent has no identities loaded".into()));
    }

    for identity in identities {
        let (returned_agent, auth_result) = session
            .authenticate_future(username, identity, agent)
            .await;
        agent = returned_agent;
        match auth_result {
            Ok(true) => return Ok(true),
            Ok(false) => continue,
            Err(e) => {
                debug!(error = ?e, "agent auth attempt failed");
                continue;
            }
        }
    }

    Ok(false)
}

fn preview(command: &str) -> String {
    command.chars().take(80).collect()
}

// ---------------------------------------------------------------------------
// Remote file helpers
// ---------------------------------------------------------------------------

/// Read a remote file with `cat`.
///
/// Fails only when the command exits non-zero *and* reports something on
/// stderr; stdout is returned trimmed.
pub async fn read_file(shell: &dyn RemoteShell, path: &str) -> Result<String, SshError> {
    let result = shell
        .exec(&format!("cat {}", remote_path(path)), DEFAULT_TIMEOUT)
        .await?;
    if !result.success() && !result.stderr.is_empty() {
        return Err(SshError::Read {
            path: path.to_string(),
            stderr: result.stderr,
        });
    }
    Ok(result.stdout)
}

/// Replace a remote file, streaming `content` over stdin.
pub async fn write_file(shell: &dyn RemoteShell, path: &str, content: &str) -> Result<(), SshError> {
    let mut body = content.to_string();
    if !body.ends_with('\n') {
        body.push('\n');
    }

    let target = remote_path(path);
    let command = match path.rsplit_once('/') {
        Some((dir, _)) if !dir.is_empty() => {
            format!("mkdir -p {} && cat > {target}", remote_path(dir))
        }
        _ => format!("cat > {target}"),
    };

    let result = shell
        .exec_with_input(&command, body.as_bytes(), DEFAULT_TIMEOUT)
        .await?;
    if !result.success() {
        return Err(SshError::Write {
            path: path.to_string(),
            stderr: if result.stderr.is_empty() {
                format!("exit code {}", result.exit_code)
            } else {
                result.stderr
            },
        });
    }
    Ok(())
}

/// Runs `echo ok` to check the host is reachable.
pub async fn test_connection(shell: &dyn RemoteShell) -> bool {
    match shell.exec("echo ok", Duration::from_secs(5)).await {
        Ok(result) => result.success(),
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Quoting
// ---------------------------------------------------------------------------

/// Wrap `value` in single quotes for the remote shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Render a remote path as a double-quoted shell word, mapping a leading
/// `~` to `$HOME` so it still expands inside the quotes.
pub fn remote_path(path: &str) -> String {
    if path == "~" {
        return "\"$HOME\"".to_string();
    }
    match path.strip_prefix("~/") {
        Some(rest) => format!("\"$HOME/{}\"", escape_double_quoted(rest)),
        None => format!("\"{}\"", escape_double_quoted(path)),
    }
}

fn escape_double_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Strip everything outside `[A-Za-z0-9_-]`.
pub fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

// ---------------------------------------------------------------------------
// SSH config parser
// ---------------------------------------------------------------------------

/// Parsed fields from an SSH config Host block.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SshConfigEntry {
    pub hostname: Option<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<String>,
}

/// Look up `host_alias` in `~/.ssh/config`.
fn parse_ssh_config(host_alias: &str) -> Option<SshConfigEntry> {
    let home = dirs::home_dir()?;
    let content = std::fs::read_to_string(home.join(".ssh").join("config")).ok()?;
    parse_ssh_config_str(&content, host_alias)
}

/// Merge every Host block matching `host_alias`, in file order.
///
/// Like OpenSSH, the first value seen for a key wins, so a leading `Host *`
/// block takes precedence over a later, more specific one.
pub fn parse_ssh_config_str(content: &str, host_alias: &str) -> Option<SshConfigEntry> {
    let mut merged = SshConfigEntry::default();
    let mut matched = false;
    let mut in_match = false;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let Some((key, value)) = trimmed.split_once(|c: char| c.is_whitespace() || c == '=') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim().trim_start_matches('=').trim());

        if key.eq_ignore_ascii_case("Host") {
            in_match = host_matches(value, host_alias);
            matched |= in_match;
            continue;
        }
        if !in_match {
            continue;
        }

        if key.eq_ignore_ascii_case("HostName") {
            merged.hostname.get_or_insert_with(|| value.to_string());
        } else if key.eq_ignore_ascii_case("User") {
            merged.user.get_or_insert_with(|| value.to_string());
        } else if key.eq_ignore_ascii_case("Port") {
            if merged.port.is_none() {
                merged.port = value.parse().ok();
            }
        } else if key.eq_ignore_ascii_case("IdentityFile") {
            merged.identity_file.get_or_insert_with(|| value.to_string());
        }
    }

    matched.then_some(merged)
}

/// A `Host` line matches when any pattern matches and no `!pattern` does.
fn host_matches(patterns: &str, host: &str) -> bool {
    let mut positive = false;
    for pattern in patterns.split_whitespace() {
        match pattern.strip_prefix('!') {
            Some(negated) if glob_match(negated, host) => return false,
            Some(_) => {}
            None => positive |= glob_match(pattern, host),
        }
    }
    positive
}

/// ssh_config globbing: `*` is any run of characters, `?` exactly one.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c.eq_ignore_ascii_case(&text[t]) => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, from)) => {
                    p = star + 1;
                    t = from + 1;
                    backtrack = Some((star, from + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("hello"), "'hello'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn remote_path_expands_home_inside_quotes() {
        assert_eq!(remote_path("~/.openclaw/openclaw.json"), "\"$HOME/.openclaw/openclaw.json\"");
        assert_eq!(remote_path("~"), "\"$HOME\"");
        assert_eq!(remote_path("/srv/ws/a b.md"), "\"/srv/ws/a b.md\"");
    }

    #[test]
    fn remote_path_neutralizes_expansion() {
        assert_eq!(remote_path("/tmp/$(reboot)"), "\"/tmp/\\$(reboot)\"");
        assert_eq!(remote_path("~/x`id`\"y"), "\"$HOME/x\\`id\\`\\\"y\"");
    }

    #[test]
    fn sanitize_id_keeps_safe_characters() {
        assert_eq!(sanitize_id("main"), "main");
        assert_eq!(sanitize_id("../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_id("a b;rm -rf"), "abrm-rf");
    }

    #[test]
    fn ssh_config_resolves_alias() {
        let content = "\
# comment
Host vps claw
    HostName 203.0.113.7
    User deploy
    Port 2222
    IdentityFile ~/.ssh/vps_ed25519

Host *
    User fallback
";
        let entry = parse_ssh_config_str(content, "claw").expect("entry");
        assert_eq!(entry.hostname.as_deref(), Some("203.0.113.7"));
        assert_eq!(entry.user.as_deref(), Some("deploy"));
        assert_eq!(entry.port, Some(2222));
        assert_eq!(entry.identity_file.as_deref(), Some("~/.ssh/vps_ed25519"));

        let wildcard = parse_ssh_config_str(content, "other").expect("wildcard");
        assert_eq!(wildcard.user.as_deref(), Some("fallback"));
        assert!(wildcard.hostname.is_none());
    }

    #[test]
    fn ssh_config_accepts_equals_separator() {
        let entry = parse_ssh_config_str("Host=box\nHostName=10.0.0.2\n", "box").expect("entry");
        assert_eq!(entry.hostname.as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn ssh_config_leading_wildcard_wins_per_key() {
        let content = "\
Host *
    User deploy
    ServerAliveInterval 30

Host claw
    HostName 203.0.113.7
    User ignored
    Port 2222
";
        let entry = parse_ssh_config_str(content, "claw").expect("entry");
        assert_eq!(entry.hostname.as_deref(), Some("203.0.113.7"));
        assert_eq!(entry.user.as_deref(), Some("deploy"));
        assert_eq!(entry.port, Some(2222));
    }

    #[test]
    fn ssh_config_host_patterns() {
        let content = "\
Host *.internal !db.internal
    User ops
Host gw-?
    Port 2200
";
        let entry = parse_ssh_config_str(content, "app.internal").expect("entry");
        assert_eq!(entry.user.as_deref(), Some("ops"));
        assert!(parse_ssh_config_str(content, "db.internal").is_none());
        assert_eq!(parse_ssh_config_str(content, "gw-1").expect("entry").port, Some(2200));
        assert!(parse_ssh_config_str(content, "gw-12").is_none());
    }

    #[test]
    fn target_prefers_flags_then_ssh_config_then_defaults() {
        let entry = SshConfigEntry {
            hostname: Some("203.0.113.7".into()),
            user: Some("deploy".into()),
            port: Some(2222),
            identity_file: Some("~/.ssh/vps".into()),
        };

        let target = resolve_target(&SshSettings::new("claw"), Some(&entry));
        assert_eq!(target.host, "203.0.113.7");
        assert_eq!(target.port, 2222);
        assert_eq!(target.username, "deploy");
        assert_eq!(target.key_path.as_deref(), Some("~/.ssh/vps"));

        let mut explicit = SshSettings::new("claw");
        explicit.port = Some(22);
        explicit.username = Some("root".into());
        explicit.key_path = Some("~/.ssh/other".into());
        let target = resolve_target(&explicit, Some(&entry));
        assert_eq!(target.port, 22);
        assert_eq!(target.username, "root");
        assert_eq!(target.key_path.as_deref(), Some("~/.ssh/other"));

        let target = resolve_target(&SshSettings::new("10.0.0.9"), None);
        assert_eq!(target.host, "10.0.0.9");
        assert_eq!(target.port, 22);
        assert_eq!(target.username, "root");
        assert!(target.key_path.is_none());
    }

    #[test]
    fn agent_is_tried_after_a_rejected_key_without_password() {
        use AuthMethod::*;
        assert_eq!(auth_methods(Some("~/.ssh/id"), None), vec![Key, Agent]);
        assert_eq!(auth_methods(Some("~/.ssh/id"), Some("pw")), vec![Key, Password]);
        assert_eq!(auth_methods(None, Some("pw")), vec![Password]);
        assert_eq!(auth_methods(None, None), vec![Agent]);
    }

    #[test]
    fn ssh_config_without_match_is_none() {
        assert!(parse_ssh_config_str("Host a\n  User x\n", "b").is_none());
    }
}
