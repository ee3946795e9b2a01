//! Escalation deadline spec (`spec.md` §8, scenarios 5/6): acknowledging a
//! session before its push deadline cancels the pending push outright;
//! letting the deadline pass hands the event to the push tier instead.
//! `push_delay_seconds` is turned down first so both outcomes are
//! observable within a real wall-clock wait rather than the crate-internal
//! `FakeClock` unit tests already covering the same engine.

use crate::prelude::*;
use serde_json::json;
use serial_test::serial;
use std::time::Duration;

async fn set_push_delay_seconds(client: &mut WsClient, seconds: u64) {
    client
        .send(json!({"type": "update_escalation_config", "pushDelaySeconds": seconds, "requestId": "cfg"}))
        .await;
    let response = client.recv_until(2_000, |f| f["requestId"] == "cfg").await;
    assert_eq!(response["type"], "escalation_config");
    assert_eq!(response["payload"]["pushDelaySeconds"], seconds);
}

async fn pending_session_ids(client: &mut WsClient, request_id: &str) -> Vec<String> {
    client.send(json!({"type": "get_pending_events", "requestId": request_id})).await;
    let response = client.recv_until(2_000, |f| f["requestId"] == request_id).await;
    response["payload"]["events"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|e| e["sessionId"].as_str().map(str::to_string))
        .collect()
}

#[tokio::test]
#[serial]
async fn acknowledging_before_the_deadline_cancels_the_pending_push() {
    let daemon = Daemon::start("127.0.0.1", 9890, "t-abc");
    let mut client = WsClient::connect(&daemon).await;
    let _connected = client.recv(2_000).await;
    client.authenticate("t-abc").await;
    set_push_delay_seconds(&mut client, 1).await;

    let conversation_id = "-home-u-scenario-five";
    daemon.write_log_line(conversation_id, "session.jsonl", &user_line("go do it"));
    daemon.write_log_line(conversation_id, "session.jsonl", &assistant_line("waiting on you", "waiting_for_input"));

    // Poll asynchronously for the event to appear (the in-app tier is
    // broadcast and recorded as soon as the watcher reports `waiting`).
    let mut found = false;
    for i in 0..20 {
        let ids = pending_session_ids(&mut client, &format!("poll-appear-{i}")).await;
        if ids.iter().any(|id| id == conversation_id) {
            found = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(found, "escalation event for {conversation_id} never became pending");

    client
        .send(json!({"type": "acknowledge_session", "sessionId": conversation_id, "requestId": "ack"}))
        .await;
    let ack_response = client.recv_until(2_000, |f| f["requestId"] == "ack").await;
    assert_eq!(ack_response["type"], "session_acknowledged");

    let ids = pending_session_ids(&mut client, "poll-after-ack").await;
    assert!(!ids.iter().any(|id| id == conversation_id), "ack should remove the pending push immediately");

    // Wait past the (shortened) original deadline; a cancelled push must
    // stay cancelled, not reappear once its deadline would have fired.
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let ids = pending_session_ids(&mut client, "poll-after-deadline").await;
    assert!(!ids.iter().any(|id| id == conversation_id));
}

#[tokio::test]
#[serial]
async fn letting_the_deadline_pass_hands_the_event_to_the_push_tier() {
    let daemon = Daemon::start("127.0.0.1", 9891, "t-abc");
    let mut client = WsClient::connect(&daemon).await;
    let _connected = client.recv(2_000).await;
    client.authenticate("t-abc").await;
    set_push_delay_seconds(&mut client, 1).await;

    let conversation_id = "-home-u-scenario-six";
    daemon.write_log_line(conversation_id, "session.jsonl", &user_line("go do it"));
    daemon.write_log_line(conversation_id, "session.jsonl", &assistant_line("waiting on you", "waiting_for_input"));

    let mut found = false;
    for i in 0..20 {
        let ids = pending_session_ids(&mut client, &format!("poll-appear-{i}")).await;
        if ids.iter().any(|id| id == conversation_id) {
            found = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(found, "escalation event for {conversation_id} never became pending");

    // Never acknowledge. Once the 1-second push deadline elapses, the
    // engine's deadline loop takes the event out of `pending` whether or
    // not an actual device was there to receive the push — it is this
    // removal, not a push receipt, that scenario 6 hinges on.
    let mut cleared = false;
    for _ in 0..30 {
        let ids = pending_session_ids(&mut client, "poll-deadline").await;
        if !ids.iter().any(|id| id == conversation_id) {
            cleared = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(cleared, "pending push was never taken once its deadline elapsed");
}
