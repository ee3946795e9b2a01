// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device registrations for the push sender. Persisted by the notification
//! store across daemon restarts.

use crate::ids::DeviceId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    GatewayA,
    GatewayB,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: DeviceId,
    pub push_token: String,
    pub token_kind: TokenKind,
    pub registered_at: u64,
    pub last_seen: u64,
}

impl Device {
    pub fn new(id: DeviceId, push_token: impl Into<String>, token_kind: TokenKind, now: u64) -> Self {
        Self {
            id,
            push_token: push_token.into(),
            token_kind,
            registered_at: now,
            last_seen: now,
        }
    }

    crate::setters! {
        into { push_token: String }
        set { token_kind: TokenKind, registered_at: u64, last_seen: u64 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sets_registered_and_last_seen_to_same_instant() {
        let d = Device::new(DeviceId::new(), "tok-abc", TokenKind::GatewayA, 1_000);
        assert_eq!(d.registered_at, 1_000);
        assert_eq!(d.last_seen, 1_000);
    }

    #[test]
    fn last_seen_setter_updates_in_place() {
        let d = Device::new(DeviceId::new(), "tok-abc", TokenKind::GatewayA, 1_000).last_seen(2_000);
        assert_eq!(d.last_seen, 2_000);
        assert_eq!(d.registered_at, 1_000);
    }
}
