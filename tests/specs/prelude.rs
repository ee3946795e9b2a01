//! Test helpers for the relay daemon's behavioral specifications.
//!
//! Spawns the real `relayd` binary against an isolated state directory and
//! drives it over a real WebSocket connection, the black-box style
//! `oj-specs` uses for its own daemon lifecycle tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Returns the path to a binary, checking the llvm-cov target directory
/// first (same fallback chain `oj-specs`'s `binary_path` uses), then
/// `assert_cmd`'s own cargo-target resolution.
fn binary_path(name: &str) -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));

    let llvm_cov_path = manifest_dir.join("target/llvm-cov-target/debug").join(name);
    if llvm_cov_path.exists() {
        return llvm_cov_path;
    }

    assert_cmd::cargo::cargo_bin(name)
}

fn relayd_binary() -> PathBuf {
    binary_path("relayd")
}

/// A running `relayd` process isolated to a temp state/logs directory.
/// Killed on drop so a failing assertion never leaves an orphan daemon
/// holding the PID lock for the next test.
pub struct Daemon {
    child: Child,
    state_dir: tempfile::TempDir,
    logs_root: tempfile::TempDir,
    pub host: String,
    pub port: u16,
    pub token: String,
}

impl Daemon {
    /// Start a daemon with one listener pre-seeded at `host:port` with
    /// `token`, so tests can connect deterministically instead of reading
    /// the randomly generated default token back off disk.
    pub fn start(host: &str, port: u16, token: &str) -> Self {
        let state_dir = tempfile::tempdir().expect("tempdir");
        let logs_root = tempfile::tempdir().expect("tempdir");

        let config = json!({
            "listeners": [{ "host": host, "port": port, "token": token }],
        });
        std::fs::write(state_dir.path().join("config.json"), config.to_string()).expect("write config");

        let child = Command::new(relayd_binary())
            .env("RELAY_STATE_DIR", state_dir.path())
            .env("RELAY_LOGS_ROOT", logs_root.path())
            .env("RELAY_WATCHER_POLL_MS", "50")
            .env("RELAY_WATCHER_RESCAN_MS", "200")
            .env("RELAY_WORKGROUP_POLL_MS", "300")
            .env("RELAY_AUTH_TIMEOUT_MS", "2000")
            .env("RUST_LOG", "warn")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .expect("relayd should spawn");

        let daemon = Self { child, state_dir, logs_root, host: host.to_string(), port, token: token.to_string() };
        assert!(
            wait_for(3_000, || std::net::TcpStream::connect((daemon.host.as_str(), daemon.port)).is_ok()),
            "relayd did not start listening in time"
        );
        daemon
    }

    pub fn logs_root(&self) -> &Path {
        self.logs_root.path()
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }

    /// Write one JSONL line to `<logs_root>/<conversation_id>/<file>`,
    /// creating the conversation directory on first use.
    pub fn write_log_line(&self, conversation_id: &str, file: &str, line: &str) {
        let dir = self.logs_root.path().join(conversation_id);
        std::fs::create_dir_all(&dir).expect("create conversation dir");
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(file))
            .expect("open log file");
        writeln!(f, "{line}").expect("append log line");
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A connected WebSocket test client, speaking the daemon's length-free
/// one-JSON-object-per-text-frame protocol.
pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn connect(daemon: &Daemon) -> Self {
        let (stream, _response) =
            tokio_tungstenite::connect_async(daemon.ws_url()).await.expect("websocket connect");
        Self { stream }
    }

    pub async fn send(&mut self, frame: Value) {
        let text = frame.to_string();
        self.stream.send(WsMessage::Text(text.into())).await.expect("send frame");
    }

    /// Receive the next frame, or panic if none arrives within `timeout_ms`.
    pub async fn recv(&mut self, timeout_ms: u64) -> Value {
        self.recv_opt(timeout_ms).await.expect("expected a frame, got none")
    }

    /// Receive the next frame, or `None` if nothing arrives within
    /// `timeout_ms` (used to assert the *absence* of a broadcast).
    pub async fn recv_opt(&mut self, timeout_ms: u64) -> Option<Value> {
        let deadline = tokio::time::Duration::from_millis(timeout_ms);
        loop {
            let next = tokio::time::timeout(deadline, self.stream.next()).await;
            match next {
                Ok(Some(Ok(WsMessage::Text(text)))) => {
                    return Some(serde_json::from_str(&text).expect("frame should be JSON"));
                }
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(_))) | Ok(None) => return None,
                Err(_) => return None,
            }
        }
    }

    /// Receive frames until one matching `predicate` arrives, or panic once
    /// `timeout_ms` has elapsed without a match.
    pub async fn recv_until(&mut self, timeout_ms: u64, predicate: impl Fn(&Value) -> bool) -> Value {
        let start = std::time::Instant::now();
        let total = Duration::from_millis(timeout_ms);
        loop {
            let remaining = total.saturating_sub(start.elapsed());
            assert!(!remaining.is_zero(), "timed out waiting for a matching frame");
            match self.recv_opt(remaining.as_millis() as u64).await {
                Some(frame) if predicate(&frame) => return frame,
                Some(_) => continue,
                None => panic!("connection closed before a matching frame arrived"),
            }
        }
    }

    pub async fn authenticate(&mut self, token: &str) -> Value {
        self.send(json!({"type": "authenticate", "token": token, "requestId": "auth"})).await;
        self.recv_until(2_000, |f| f["requestId"] == "auth").await
    }
}

/// Poll a condition until it returns true or the timeout elapses.
pub fn wait_for<F>(timeout_ms: u64, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

/// One minimal user-text JSONL line in the CLI's on-disk schema, matching
/// the fixtures `relay_adapters::parser`'s own tests parse against.
pub fn user_line(text: &str) -> String {
    json!({"type": "user", "message": {"role": "user", "content": text}}).to_string()
}

/// One assistant turn ending on an explicit marker (`stop_reason`), matching
/// the fixtures `relay_adapters::parser`'s own tests parse against. Used to
/// drive a conversation's derived status to `waiting`/`completed`/`error`.
pub fn assistant_line(content: &str, stop_reason: &str) -> String {
    json!({
        "type": "assistant",
        "message": { "role": "assistant", "content": content, "stop_reason": stop_reason },
    })
    .to_string()
}

/// Encodes a project path the same way the CLI names its on-disk log
/// directories (`/` and `_` collapse to `-`), so the conversation discovered
/// under that directory name carries the id this path is expected to match.
pub fn encode_project_path(path: &Path) -> String {
    path.to_string_lossy().chars().map(|c| if c == '/' || c == '_' { '-' } else { c }).collect()
}

/// Every live tmux session name, independent of the daemon under test —
/// used to assert a session with a given prefix exists without relying on
/// anything the wire protocol chooses to expose.
pub fn tmux_session_names() -> Vec<String> {
    let output = Command::new("tmux").args(["list-sessions", "-F", "#{session_name}"]).output().expect("tmux should be installed");
    if !output.status.success() {
        return Vec::new();
    }
    String::from_utf8_lossy(&output.stdout).lines().map(str::to_string).collect()
}
