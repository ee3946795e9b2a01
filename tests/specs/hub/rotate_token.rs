//! Token rotation spec (`spec.md` §8): rotating a listener's token
//! invalidates every other client authenticated on that listener and the
//! old token is rejected afterwards.

use crate::prelude::*;
use serde_json::json;
use serial_test::serial;

#[tokio::test]
#[serial]
async fn rotate_token_invalidates_other_clients_and_rejects_old_token() {
    let daemon = Daemon::start("127.0.0.1", 9885, "t-abc");

    let mut requester = WsClient::connect(&daemon).await;
    let _connected = requester.recv(2_000).await;
    requester.authenticate("t-abc").await;

    let mut bystander = WsClient::connect(&daemon).await;
    let _connected = bystander.recv(2_000).await;
    bystander.authenticate("t-abc").await;

    requester.send(json!({"type": "rotate_token", "requestId": "rt1"})).await;
    let response = requester.recv_until(2_000, |f| f["requestId"] == "rt1").await;
    assert_eq!(response["type"], "token_rotated");
    assert_eq!(response["success"], true);
    let new_token = response["payload"]["token"].as_str().expect("new token").to_string();
    assert_ne!(new_token, "t-abc");

    let invalidated = bystander.recv_until(2_000, |f| f["type"] == "token_invalidated").await;
    assert_eq!(invalidated["type"], "token_invalidated");

    let mut reconnected = WsClient::connect(&daemon).await;
    let _connected = reconnected.recv(2_000).await;
    let authed = reconnected.authenticate("t-abc").await;
    assert_eq!(authed["success"], false, "old token should no longer authenticate");

    let authed_new = reconnected.authenticate(&new_token).await;
    assert_eq!(authed_new["success"], true, "rotated token should authenticate");
}
