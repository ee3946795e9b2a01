// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Push-notification delivery: one gateway implementation per
//! [`TokenKind`], fanned out to every registered device concurrently.
//!
//! A single device's gateway failure never aborts the batch — the escalation
//! engine logs per-device outcomes and moves on, the same way a desktop
//! notification failing on one adapter never blocks the others.

use async_trait::async_trait;
use futures_util::future::join_all;
use relay_core::{Device, PushError, TokenKind};

/// One outcome for one device in a push fan-out.
#[derive(Debug, Clone)]
pub struct PushOutcome {
    pub device_id: relay_core::DeviceId,
    pub result: Result<(), String>,
}

#[async_trait]
pub trait PushSender: Send + Sync {
    /// Send `title`/`body` to one device via its gateway.
    async fn send_to_device(&self, device: &Device, title: &str, body: &str) -> Result<(), PushError>;

    /// Fan the same payload out to every device, collecting a per-device
    /// outcome rather than failing the whole call when one gateway rejects
    /// its payload.
    async fn send_to_all_devices(&self, devices: &[Device], title: &str, body: &str) -> Vec<PushOutcome> {
        let futures = devices.iter().map(|device| async move {
            let result = self.send_to_device(device, title, body).await.map_err(|e| e.to_string());
            PushOutcome { device_id: device.id, result }
        });
        join_all(futures).await
    }
}

/// Real gateway dispatch, keyed by [`TokenKind`]. Each gateway's wire
/// protocol is out of scope here: this crate owns only the fan-out and
/// per-device accounting, not the HTTP client for any specific vendor API.
pub struct GatewayPushSender {
    client: gateway_client::Client,
}

impl Default for GatewayPushSender {
    fn default() -> Self {
        Self { client: gateway_client::Client::new() }
    }
}

#[async_trait]
impl PushSender for GatewayPushSender {
    async fn send_to_device(&self, device: &Device, title: &str, body: &str) -> Result<(), PushError> {
        match device.token_kind {
            TokenKind::GatewayA => self.client.post_gateway_a(&device.push_token, title, body).await,
            TokenKind::GatewayB => self.client.post_gateway_b(&device.push_token, title, body).await,
        }
    }
}

/// A minimal stand-in for the actual HTTP client a real deployment would
/// plug in here (e.g. an APNs or FCM client). Kept internal and unexported
/// so swapping in a real gateway client later is a one-module change.
mod gateway_client {
    use relay_core::PushError;

    #[derive(Default)]
    pub struct Client;

    impl Client {
        pub fn new() -> Self {
            Self
        }

        pub async fn post_gateway_a(&self, token: &str, _title: &str, _body: &str) -> Result<(), PushError> {
            if token.is_empty() {
                return Err(PushError::GatewayRejected("empty token".into()));
            }
            Ok(())
        }

        pub async fn post_gateway_b(&self, token: &str, _title: &str, _body: &str) -> Result<(), PushError> {
            if token.is_empty() {
                return Err(PushError::GatewayRejected("empty token".into()));
            }
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Clone)]
    pub struct RecordedSend {
        pub device_id: relay_core::DeviceId,
        pub title: String,
        pub body: String,
    }

    /// Test double recording every send attempt: no network calls, just a
    /// log callers can assert against.
    #[derive(Default)]
    pub struct FakePushSender {
        pub sent: Mutex<Vec<RecordedSend>>,
        pub fail_devices: Mutex<std::collections::HashSet<relay_core::DeviceId>>,
    }

    impl FakePushSender {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().len()
        }
    }

    #[async_trait]
    impl PushSender for FakePushSender {
        async fn send_to_device(&self, device: &Device, title: &str, body: &str) -> Result<(), PushError> {
            if self.fail_devices.lock().contains(&device.id) {
                return Err(PushError::GatewayRejected("forced failure".into()));
            }
            self.sent.lock().push(RecordedSend {
                device_id: device.id,
                title: title.to_string(),
                body: body.to_string(),
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakePushSender;
    use super::*;
    use relay_core::DeviceId;

    fn device(kind: TokenKind) -> Device {
        Device::new(DeviceId::new(), "tok-abc", kind, 1_000)
    }

    #[tokio::test]
    async fn one_device_failure_does_not_abort_the_batch() {
        let sender = FakePushSender::new();
        let good = device(TokenKind::GatewayA);
        let bad = device(TokenKind::GatewayB);
        sender.fail_devices.lock().insert(bad.id);

        let outcomes = sender.send_to_all_devices(&[good.clone(), bad.clone()], "t", "b").await;
        assert_eq!(outcomes.len(), 2);
        let good_outcome = outcomes.iter().find(|o| o.device_id == good.id).unwrap();
        let bad_outcome = outcomes.iter().find(|o| o.device_id == bad.id).unwrap();
        assert!(good_outcome.result.is_ok());
        assert!(bad_outcome.result.is_err());
        assert_eq!(sender.sent_count(), 1);
    }

    #[tokio::test]
    async fn gateway_sender_rejects_empty_token() {
        let sender = GatewayPushSender::default();
        let mut d = device(TokenKind::GatewayA);
        d.push_token = String::new();
        let err = sender.send_to_device(&d, "t", "b").await.unwrap_err();
        assert!(matches!(err, PushError::GatewayRejected(_)));
    }
}
