//! Auth handshake spec (`spec.md` §8, scenario 1).

use crate::prelude::*;
use serde_json::json;
use serial_test::serial;

#[tokio::test]
#[serial]
async fn connect_then_authenticate_then_subscribe() {
    let daemon = Daemon::start("127.0.0.1", 9877, "t-abc");
    let mut client = WsClient::connect(&daemon).await;

    let connected = client.recv(2_000).await;
    assert_eq!(connected["type"], "connected");
    assert_eq!(connected["success"], true);
    assert!(connected["payload"]["clientId"].is_string());

    let authed = client.authenticate("t-abc").await;
    assert_eq!(authed["type"], "authenticated");
    assert_eq!(authed["success"], true);
    assert_eq!(authed["requestId"], "auth");
}

#[tokio::test]
#[serial]
async fn wrong_token_fails_authentication() {
    let daemon = Daemon::start("127.0.0.1", 9878, "t-abc");
    let mut client = WsClient::connect(&daemon).await;
    let _connected = client.recv(2_000).await;

    let authed = client.authenticate("wrong-token").await;
    assert_eq!(authed["type"], "authenticated");
    assert_eq!(authed["success"], false);
}

#[tokio::test]
#[serial]
async fn unauthenticated_request_is_rejected() {
    let daemon = Daemon::start("127.0.0.1", 9879, "t-abc");
    let mut client = WsClient::connect(&daemon).await;
    let _connected = client.recv(2_000).await;

    client.send(json!({"type": "subscribe"})).await;
    let response = client.recv(2_000).await;
    assert_eq!(response["type"], "error");
    assert_eq!(response["error"], "Not authenticated");
}

#[tokio::test]
#[serial]
async fn unknown_message_type_after_auth_reports_error() {
    let daemon = Daemon::start("127.0.0.1", 9880, "t-abc");
    let mut client = WsClient::connect(&daemon).await;
    let _connected = client.recv(2_000).await;
    client.authenticate("t-abc").await;

    client.send(json!({"type": "frobnicate", "requestId": "r1"})).await;
    let response = client.recv(2_000).await;
    assert_eq!(response["success"], false);
    assert_eq!(response["error"], "Unknown message type: frobnicate");
}

#[tokio::test]
#[serial]
async fn ping_replies_with_pong_and_version() {
    let daemon = Daemon::start("127.0.0.1", 9881, "t-abc");
    let mut client = WsClient::connect(&daemon).await;
    let _connected = client.recv(2_000).await;
    client.authenticate("t-abc").await;

    client.send(json!({"type": "ping", "requestId": "p1"})).await;
    let response = client.recv(2_000).await;
    assert_eq!(response["type"], "pong");
    assert_eq!(response["requestId"], "p1");
    assert!(response["payload"]["version"].is_string());
}
