//! End-to-end runs of the `ibbcheck` binary.

use std::path::Path;
use std::process::{Command, Output};

use ibbcheck_test_utils::config::TestConfigBuilder;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("ibbcheck.toml");
    std::fs::write(&path, content).unwrap();
    path
}

fn ibbcheck(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ibbcheck"))
        .arg("-c")
        .arg(config)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_pair_succeeds_silently() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, &TestConfigBuilder::new().toml());
    let output = ibbcheck(&path, &["pair"]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    assert!(output.stdout.is_empty());
}

#[test]
fn test_pair_json_reports_both_roles() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, &TestConfigBuilder::new().toml());
    let output = ibbcheck(&path, &["pair", "--json", "--sid", "abc123", "--block-size", "5"]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["sender"]["sid"], "abc123");
    assert_eq!(report["receiver"]["sid"], "abc123");
    assert_eq!(report["sender"]["role"], "sender");
    assert_eq!(
        report["receiver"]["received"],
        ibbcheck_core::scenario::SENDER_PAYLOAD
    );
    assert_eq!(
        report["sender"]["received"],
        ibbcheck_core::scenario::RECEIVER_PAYLOAD
    );
}

#[test]
fn test_injected_close_error_fails_with_cause() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, &TestConfigBuilder::new().toml());
    let output = ibbcheck(&path, &["pair", "--inject-close-error", "item-not-found"]);
    assert_eq!(output.status.code(), Some(4));
    let stderr = stderr(&output);
    assert!(
        stderr.lines().any(|l| l.starts_with("ibbcheck: sender: ") && l.contains("item-not-found")),
        "{stderr}"
    );
}

#[test]
fn test_lone_sender_reports_unreachable_peer() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, &TestConfigBuilder::new().toml());
    let output = ibbcheck(&path, &["send", "-j", "tester@localhost/recv", "--sid", "abc123"]);
    assert_eq!(output.status.code(), Some(4), "{}", stderr(&output));
    let stderr = stderr(&output);
    assert!(
        stderr.lines().any(|l| l.starts_with("ibbcheck: sender: ")),
        "{stderr}"
    );
}

#[test]
fn test_lone_receiver_times_out() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, &TestConfigBuilder::new().deadline_secs(1).toml());
    let output = ibbcheck(&path, &["recv", "-j", "tester@localhost/send"]);
    assert_eq!(output.status.code(), Some(5), "{}", stderr(&output));
    let stderr = stderr(&output);
    assert!(
        stderr
            .lines()
            .any(|l| l.starts_with("ibbcheck: receiver: timed out during ")),
        "{stderr}"
    );
}

#[test]
fn test_role_rejects_malformed_peer_jid() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, &TestConfigBuilder::new().toml());
    let output = ibbcheck(&path, &["send", "-j", "tester@localhost/"]);
    assert_eq!(output.status.code(), Some(2), "{}", stderr(&output));
}

#[test]
fn test_invalid_config_exits_before_connecting() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, &TestConfigBuilder::new().password("").toml());
    let output = ibbcheck(&path, &["pair"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("password: must not be empty"));
}

#[test]
fn test_zero_block_size_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, &TestConfigBuilder::new().toml());
    let output = ibbcheck(&path, &["pair", "--block-size", "0"]);
    assert_eq!(output.status.code(), Some(2), "{}", stderr(&output));
}

#[test]
fn test_out_of_range_deadline_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, &TestConfigBuilder::new().toml());
    let output = ibbcheck(&path, &["pair", "--deadline", "18446744073709551615"]);
    assert_eq!(output.status.code(), Some(2), "{}", stderr(&output));
    assert!(stderr(&output).contains("run.deadline_secs: must be at most 86400"));
}

#[test]
fn test_missing_config_file() {
    let dir = TempDir::new().unwrap();
    let output = ibbcheck(&dir.path().join("absent.toml"), &["config"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).starts_with("ibbcheck: config: "));
}

#[test]
fn test_config_show_redacts_password() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, &TestConfigBuilder::new().password("s3cret-pw").toml());
    let output = ibbcheck(&path, &["config", "--show"]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("tester@localhost"));
    assert!(stdout.contains("[REDACTED]"));
    assert!(!stdout.contains("s3cret-pw"));
}
