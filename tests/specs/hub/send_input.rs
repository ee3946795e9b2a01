//! `send_input` routing spec (`spec.md` §8, scenario 3): input sent for a
//! conversation reaches the tmux pane whose *working directory* encodes to
//! that conversation's id, exactly as `reconcile_with_tmux` matches a live
//! session to a conversation — never a session whose name merely happens to
//! equal the conversation id.

use crate::prelude::*;
use serde_json::json;
use serial_test::serial;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

fn tmux(args: &[&str]) -> std::process::Output {
    Command::new("tmux").args(args).output().expect("tmux should be installed")
}

struct TmuxSession {
    name: String,
}

impl TmuxSession {
    /// Creates a detached, tagged session rooted at `working_dir` — tagging
    /// it directly (rather than going through the daemon's adoption verb)
    /// since this session is created by the test, not spawned by the
    /// daemon.
    fn new(name: &str, working_dir: &Path) -> Self {
        let _ = tmux(&["kill-session", "-t", name]);
        let dir = working_dir.to_string_lossy().to_string();
        let status = tmux(&["new-session", "-d", "-s", name, "-c", &dir, "-x", "200", "-y", "50"]);
        assert!(status.status.success(), "failed to create tmux session {name}: {status:?}");
        let tag = tmux(&["set-environment", "-t", name, "RELAY_TAGGED", "1"]);
        assert!(tag.status.success(), "failed to tag tmux session {name}: {tag:?}");
        Self { name: name.to_string() }
    }

    fn capture(&self) -> String {
        let output = tmux(&["capture-pane", "-p", "-t", &self.name]);
        String::from_utf8_lossy(&output.stdout).to_string()
    }
}

impl Drop for TmuxSession {
    fn drop(&mut self) {
        let _ = tmux(&["kill-session", "-t", &self.name]);
    }
}

#[tokio::test]
#[serial]
async fn send_input_reaches_the_tmux_pane_matching_the_conversations_working_dir() {
    let working_dir = std::env::temp_dir().join("relay-spec-send-input-workdir");
    std::fs::create_dir_all(&working_dir).expect("create working dir");
    let session_name = "relay-spec-send-input";
    let session = TmuxSession::new(session_name, &working_dir);

    // A session name that has nothing in common with the conversation id —
    // if `tmux_session_for` fell back to matching on name or a legacy
    // config default, this test would fail rather than pass by accident.
    let conversation_id = encode_project_path(&working_dir);
    assert_ne!(conversation_id, session_name);

    let daemon = Daemon::start("127.0.0.1", 9887, "t-abc");
    daemon.write_log_line(&conversation_id, "session.jsonl", &user_line("hello"));

    let mut client = WsClient::connect(&daemon).await;
    let _connected = client.recv(2_000).await;
    client.authenticate("t-abc").await;

    // Give the watcher's slow rescan a chance to discover the conversation
    // and reconcile it against the live, tagged tmux session before we try
    // to route input to it.
    client.send(json!({"type": "subscribe", "sessionId": conversation_id, "requestId": "sub"})).await;
    client.recv_until(2_000, |f| f["requestId"] == "sub").await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    client
        .send(json!({
            "type": "send_input",
            "sessionId": conversation_id,
            "input": "echo relay-spec-marker",
            "requestId": "i1",
        }))
        .await;
    let response = client.recv_until(2_000, |f| f["requestId"] == "i1").await;
    assert_eq!(response["type"], "input_sent");
    assert_eq!(response["success"], true);

    let found = wait_for(2_000, || session.capture().contains("relay-spec-marker"));
    assert!(found, "tmux pane did not receive the routed input:\n{}", session.capture());

    let _ = std::fs::remove_dir_all(&working_dir);
}

#[tokio::test]
#[serial]
async fn send_input_fails_when_no_live_session_matches_the_working_dir() {
    let daemon = Daemon::start("127.0.0.1", 9888, "t-abc");
    daemon.write_log_line("-home-u-nowhere", "session.jsonl", &user_line("hello"));

    let mut client = WsClient::connect(&daemon).await;
    let _connected = client.recv(2_000).await;
    client.authenticate("t-abc").await;

    tokio::time::sleep(Duration::from_millis(500)).await;

    client
        .send(json!({
            "type": "send_input",
            "sessionId": "-home-u-nowhere",
            "input": "echo nope",
            "requestId": "i1",
        }))
        .await;
    let response = client.recv_until(2_000, |f| f["requestId"] == "i1").await;
    assert_eq!(response["success"], false);
}
