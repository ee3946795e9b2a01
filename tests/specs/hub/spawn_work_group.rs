//! Work-group spawn/merge spec (`spec.md` §8, scenario 4): a 3-worker group
//! fans out into disjoint git worktrees and tagged tmux sessions, each
//! worker's status tracks its conversation once it has both the CLI's
//! completion marker and a real commit, and merging a fully completed group
//! folds every branch back into the parent checkout and tears the worktrees
//! down.

use crate::prelude::*;
use serde_json::{json, Value};
use serial_test::serial;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

fn git(dir: &Path, args: &[&str]) -> std::process::Output {
    Command::new("git").current_dir(dir).args(args).output().expect("git should be installed")
}

fn init_repo(dir: &Path) {
    assert!(git(dir, &["init", "-q"]).status.success());
    assert!(git(dir, &["config", "user.email", "relay-spec@example.com"]).status.success());
    assert!(git(dir, &["config", "user.name", "relay-spec"]).status.success());
    std::fs::write(dir.join("README.md"), "seed\n").expect("write seed file");
    assert!(git(dir, &["add", "."]).status.success());
    assert!(git(dir, &["commit", "-q", "-m", "seed"]).status.success());
}

/// Mirrors `Worker::branch_name` / `WorkGroup::worktree_path` — the wire
/// protocol never exposes these, so a black-box test has to compute the
/// same deterministic names the daemon does.
fn branch_name(group_slug: &str, task_slug: &str) -> String {
    format!("wg-{group_slug}-{task_slug}")
}

fn worktree_path(parent_dir: &Path, branch: &str) -> PathBuf {
    parent_dir.join(".wg-worktrees").join(branch)
}

/// Commits one real file change on a worker's worktree — the `commits_ahead`
/// gate `reconcile` checks before a worker can become `completed`.
fn commit_in_worktree(worktree: &Path, file_name: &str) {
    std::fs::write(worktree.join(file_name), "done\n").expect("write worker file");
    assert!(git(worktree, &["add", file_name]).status.success());
    assert!(git(worktree, &["commit", "-q", "-m", format!("{file_name} done")]).status.success());
}

async fn get_work_group(client: &mut WsClient, group_id: &str, request_id: &str) -> Value {
    client.send(json!({"type": "get_work_group", "groupId": group_id, "requestId": request_id})).await;
    client.recv_until(2_000, |f| f["requestId"] == request_id).await
}

/// Polls `get_work_group` until every worker reports `status`, or panics
/// once `timeout_ms` has elapsed.
async fn wait_for_worker_status(client: &mut WsClient, group_id: &str, status: &str, timeout_ms: u64) -> Value {
    let deadline = std::time::Instant::now() + Duration::from_millis(timeout_ms);
    let mut request_counter = 0;
    loop {
        request_counter += 1;
        let response = get_work_group(client, group_id, &format!("poll-{request_counter}")).await;
        let workers = response["payload"]["workers"].as_array().cloned().unwrap_or_default();
        if !workers.is_empty() && workers.iter().all(|w| w["status"] == status) {
            return response;
        }
        assert!(std::time::Instant::now() < deadline, "workers never all reached {status}: {response}");
        tokio::time::sleep(Duration::from_millis(150)).await;
    }
}

#[tokio::test]
#[serial]
async fn spawn_group_of_three_tracks_each_worker_to_completion_then_merges() {
    let parent_dir = std::env::temp_dir().join("relay-spec-workgroup-repo");
    let _ = std::fs::remove_dir_all(&parent_dir);
    std::fs::create_dir_all(&parent_dir).expect("create repo dir");
    init_repo(&parent_dir);

    let daemon = Daemon::start("127.0.0.1", 9889, "t-abc");
    let mut client = WsClient::connect(&daemon).await;
    let _connected = client.recv(2_000).await;
    client.authenticate("t-abc").await;

    let group_slug = "scenario-four";
    let tasks = ["alpha", "beta", "gamma"];

    client
        .send(json!({
            "type": "spawn_work_group",
            "name": "Scenario Four",
            "foremanSessionId": "-home-u-proj",
            "foremanTmuxSession": "companion-proj-seed",
            "parentDir": parent_dir.to_string_lossy(),
            "workers": tasks.iter().map(|slug| json!({
                "taskSlug": slug,
                "taskDescription": format!("work on {slug}"),
                "files": [format!("{slug}.txt")],
            })).collect::<Vec<_>>(),
            "requestId": "spawn",
        }))
        .await;
    let response = client.recv_until(3_000, |f| f["requestId"] == "spawn").await;
    assert_eq!(response["type"], "work_group_spawned");
    let group_id = response["payload"]["groupId"].as_str().expect("groupId").to_string();

    // Each worker gets its own worktree and a tagged tmux session rooted
    // there, independently of anything the wire protocol exposes.
    let mut worktrees = Vec::new();
    for slug in tasks {
        let branch = branch_name(group_slug, slug);
        let worktree = worktree_path(&parent_dir, &branch);
        assert!(worktree.is_dir(), "missing worktree for {slug}: {}", worktree.display());
        let sessions = tmux_session_names();
        assert!(
            sessions.iter().any(|s| s.starts_with(&format!("companion-{branch}-"))),
            "no tmux session for branch {branch} among {sessions:?}"
        );
        worktrees.push((slug, worktree));
    }

    let initial = get_work_group(&mut client, &group_id, "check-spawning").await;
    let workers = initial["payload"]["workers"].as_array().cloned().unwrap_or_default();
    assert_eq!(workers.len(), 3);

    // Drive each worker to completion: a conversation discovered under the
    // worktree's encoded path, ending on the CLI's completion marker, plus a
    // real commit on its branch — either one alone leaves the worker short
    // of `completed`.
    for (slug, worktree) in &worktrees {
        let conversation_id = encode_project_path(worktree);
        daemon.write_log_line(&conversation_id, "session.jsonl", &user_line(&format!("do {slug}")));
        daemon.write_log_line(&conversation_id, "session.jsonl", &assistant_line("all done", "session_completed"));
        commit_in_worktree(worktree, &format!("{slug}.txt"));
    }

    let completed_group = wait_for_worker_status(&mut client, &group_id, "completed", 8_000).await;
    let workers = completed_group["payload"]["workers"].as_array().cloned().unwrap_or_default();
    for worker in &workers {
        assert!(!worker["commits"].as_array().unwrap().is_empty());
    }

    client.send(json!({"type": "merge_work_group", "groupId": group_id, "requestId": "merge"})).await;
    let merge_response = client.recv_until(5_000, |f| f["requestId"] == "merge").await;
    assert_eq!(merge_response["type"], "work_group_merged");
    assert_eq!(merge_response["success"], true);
    let merge_commit = merge_response["payload"]["mergeCommit"].as_str().expect("mergeCommit");
    assert!(!merge_commit.is_empty());

    for slug in tasks {
        assert!(parent_dir.join(format!("{slug}.txt")).is_file(), "{slug}.txt missing from merged checkout");
    }

    let final_group = get_work_group(&mut client, &group_id, "check-merged").await;
    assert_eq!(final_group["payload"]["status"], "completed");

    for (_, worktree) in &worktrees {
        assert!(!worktree.exists(), "worktree not cleaned up: {}", worktree.display());
    }

    let _ = std::fs::remove_dir_all(&parent_dir);
}
