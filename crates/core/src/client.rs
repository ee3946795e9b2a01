// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection client state held by the WebSocket hub. Not persisted.

use crate::ids::{ClientId, ConversationId, DeviceId};

/// One connected WebSocket client.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub listener_port: u16,
    pub authenticated: bool,
    pub subscribed: bool,
    pub subscribed_session: Option<ConversationId>,
    pub device_id: Option<DeviceId>,
}

impl Client {
    pub fn new(listener_port: u16) -> Self {
        Self {
            id: ClientId::new(),
            listener_port,
            authenticated: false,
            subscribed: false,
            subscribed_session: None,
            device_id: None,
        }
    }

    /// Whether this client should receive a broadcast for `session_id`: it
    /// must be subscribed, and either it specified no session filter or its
    /// filter matches.
    pub fn wants_broadcast(&self, session_id: &ConversationId) -> bool {
        self.subscribed
            && self
                .subscribed_session
                .as_ref()
                .map(|s| s == session_id)
                .unwrap_or(true)
    }
}
