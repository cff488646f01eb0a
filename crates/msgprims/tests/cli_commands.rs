#![cfg(all(unix, feature = "cli"))]

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/msgcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    loop {
        if UnixStream::connect(path).is_ok() {
            return;
        }
        if start.elapsed() >= timeout {
            panic!("server at {} never came up", path.display());
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn msgprims() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_msgprims"));
    cmd.arg("--log-level").arg("error");
    cmd
}

fn spawn_server(subcommand: &str, sock_path: &Path, extra: &[&str]) -> Child {
    let child = msgprims()
        .arg("--format")
        .arg("json")
        .arg(subcommand)
        .arg(sock_path)
        .args(extra)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("server command should start");
    wait_for_socket(sock_path, Duration::from_secs(3));
    child
}

fn json_lines(stdout: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("each output line should be json"))
        .collect()
}

#[test]
fn send_wait_prints_echoed_reply() {
    let dir = unique_temp_dir("send-wait");
    let sock_path = dir.join("echo.sock");
    let mut echo = spawn_server("echo", &sock_path, &[]);

    let output = msgprims()
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg(&sock_path)
        .arg("--json")
        .arg(r#"{"hello":"world"}"#)
        .arg("--wait")
        .output()
        .expect("send should run");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let records = json_lines(&output.stdout);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["kind"], "reply");
    assert_eq!(records[0]["type"], "Object");
    assert_eq!(records[0]["data"], serde_json::json!({"hello": "world"}));

    let _ = echo.kill();
    let _ = echo.wait();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn request_prints_streamed_packets() {
    let dir = unique_temp_dir("request");
    let sock_path = dir.join("echo.sock");
    let mut echo = spawn_server("echo", &sock_path, &[]);

    let output = msgprims()
        .arg("--format")
        .arg("json")
        .arg("request")
        .arg(&sock_path)
        .arg("--data")
        .arg("stream me")
        .arg("--timeout")
        .arg("2s")
        .output()
        .expect("request should run");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let records = json_lines(&output.stdout);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["kind"], "packet");
    assert_eq!(records[0]["data"], "stream me");

    let _ = echo.kill();
    let _ = echo.wait();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn listen_prints_messages_until_count() {
    let dir = unique_temp_dir("listen");
    let sock_path = dir.join("listen.sock");
    let listener = spawn_server("listen", &sock_path, &["--count", "1"]);

    let status = msgprims()
        .arg("send")
        .arg(&sock_path)
        .arg("--type")
        .arg("Reading")
        .arg("--json")
        .arg("[1,2]")
        .status()
        .expect("send should run");
    assert!(status.success());

    let output = listener.wait_with_output().expect("listen should exit");
    assert!(output.status.success());
    let records = json_lines(&output.stdout);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["kind"], "message");
    assert_eq!(records[0]["type"], "Reading");
    assert_eq!(records[0]["data"], serde_json::json!([1, 2]));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_to_missing_socket_fails() {
    let dir = unique_temp_dir("missing");
    let output = msgprims()
        .arg("send")
        .arg(dir.join("nobody.sock"))
        .arg("--data")
        .arg("hello")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("connect failed"));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn invalid_config_is_usage_error() {
    let dir = unique_temp_dir("config");
    let config = dir.join("peer.json");
    std::fs::write(&config, r#"{"ping_interval": "soon"}"#).expect("config should be writable");

    let output = msgprims()
        .arg("--config")
        .arg(&config)
        .arg("send")
        .arg(dir.join("unused.sock"))
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(64));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn version_reports_package_version() {
    let output = msgprims()
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("msgprims {}", env!("CARGO_PKG_VERSION")));
}
