//! Subscription scoping spec (`spec.md` §8, scenario 2): a client only sees
//! `conversation_update` broadcasts for the conversation it subscribed to.

use crate::prelude::*;
use serde_json::json;
use serial_test::serial;

#[tokio::test]
#[serial]
async fn subscribed_conversation_broadcasts_update() {
    let daemon = Daemon::start("127.0.0.1", 9882, "t-abc");
    let mut client = WsClient::connect(&daemon).await;
    let _connected = client.recv(2_000).await;
    client.authenticate("t-abc").await;

    client
        .send(json!({"type": "subscribe", "sessionId": "conv-a", "requestId": "s1"}))
        .await;
    let subscribed = client.recv_until(2_000, |f| f["requestId"] == "s1").await;
    assert_eq!(subscribed["success"], true);

    daemon.write_log_line("conv-a", "session.jsonl", &user_line("hello from conv-a"));

    let update = client
        .recv_until(3_000, |f| f["type"] == "conversation_update")
        .await;
    assert_eq!(update["sessionId"], "conv-a");
}

#[tokio::test]
#[serial]
async fn unrelated_conversation_produces_no_broadcast() {
    let daemon = Daemon::start("127.0.0.1", 9883, "t-abc");
    let mut client = WsClient::connect(&daemon).await;
    let _connected = client.recv(2_000).await;
    client.authenticate("t-abc").await;

    client
        .send(json!({"type": "subscribe", "sessionId": "conv-a", "requestId": "s1"}))
        .await;
    client.recv_until(2_000, |f| f["requestId"] == "s1").await;

    daemon.write_log_line("conv-b", "session.jsonl", &user_line("hello from conv-b"));

    let update = client.recv_opt(1_000).await;
    assert!(update.is_none(), "expected no broadcast for an unsubscribed conversation, got {update:?}");
}
