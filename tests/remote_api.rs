//! Live SSH tests against a real host.
//!
//! Set `CLAWDECK_TEST_HOST` to a host or `~/.ssh/config` alias that accepts
//! key or agent authentication, then run:
//! `cargo test --test remote_api -- --ignored`

use std::time::Duration;

use clawdeck::config::SshSettings;
use clawdeck::ssh::{self, RemoteShell, SshShell, DEFAULT_TIMEOUT};

fn shell() -> SshShell {
    let host = std::env::var("CLAWDECK_TEST_HOST").expect("CLAWDECK_TEST_HOST must be set");
    let mut settings = SshSettings::new(host);
    if let Ok(user) = std::env::var("CLAWDECK_TEST_USER") {
        settings.username = Some(user);
    }
    SshShell::new(settings)
}

#[tokio::test]
#[ignore]
async fn exec_collects_stdout_and_exit_code() {
    let shell = shell();
    let result = shell.exec("echo hello", DEFAULT_TIMEOUT).await.unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "hello");

    let result = shell.exec("exit 42", DEFAULT_TIMEOUT).await.unwrap();
    assert_eq!(result.exit_code, 42);
}

#[tokio::test]
#[ignore]
async fn exec_separates_stderr() {
    let result = shell()
        .exec("echo oops >&2", DEFAULT_TIMEOUT)
        .await
        .unwrap();
    assert!(result.success());
    assert!(result.stderr.contains("oops"));
}

#[tokio::test]
#[ignore]
async fn nested_quotes_survive() {
    let command = format!("printf '%s' {}", ssh::shell_quote("it's \"quoted\""));
    let result = shell().exec(&command, DEFAULT_TIMEOUT).await.unwrap();
    assert_eq!(result.stdout, "it's \"quoted\"");
}

#[tokio::test]
#[ignore]
async fn write_then_read_under_home() {
    let shell = shell();
    let path = "~/.clawdeck-test/roundtrip.txt";
    ssh::write_file(&shell, path, "line one\nit's line two").await.unwrap();
    let read = ssh::read_file(&shell, path).await.unwrap();
    assert_eq!(read, "line one\nit's line two");

    shell
        .exec("rm -rf \"$HOME/.clawdeck-test\"", DEFAULT_TIMEOUT)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore]
async fn reading_a_missing_file_fails() {
    let result = ssh::read_file(&shell(), "/tmp/clawdeck-does-not-exist-12345").await;
    assert!(result.is_err());
}

#[tokio::test]
#[ignore]
async fn slow_commands_time_out() {
    let result = shell().exec("sleep 5", Duration::from_secs(1)).await;
    assert!(matches!(result, Err(clawdeck::error::SshError::Timeout { .. })));
}

#[tokio::test]
#[ignore]
async fn connection_check_succeeds() {
    assert!(ssh::test_connection(&shell()).await);
}

#[tokio::test]
#[ignore]
async fn unreachable_host_is_a_connect_error() {
    let mut settings = SshSettings::new("127.0.0.1");
    settings.port = Some(1);
    settings.connect_timeout = Duration::from_secs(2);
    let result = SshShell::new(settings).exec("echo ok", DEFAULT_TIMEOUT).await;
    assert!(result.is_err());
}
