// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound/outbound WebSocket frame envelopes.
//!
//! Unlike the daemon's historical length-prefixed binary framing, a
//! WebSocket connection already frames messages at the transport level, so
//! one text frame carries exactly one JSON object — no extra length prefix.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A frame received from a client. `frame_type` drives dispatch; `payload`
/// is decoded defensively per message type (see [`crate::request::Request`]).
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
    pub token: Option<String>,
}

/// A frame sent to a client: either a request/response (carries
/// `request_id`) or a broadcast (does not).
#[derive(Debug, Clone, Serialize)]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl OutboundFrame {
    pub fn ok(frame_type: impl Into<String>, request_id: Option<String>, payload: Value) -> Self {
        Self {
            frame_type: frame_type.into(),
            request_id,
            success: Some(true),
            payload: Some(payload),
            error: None,
            session_id: None,
        }
    }

    pub fn ok_no_payload(frame_type: impl Into<String>, request_id: Option<String>) -> Self {
        Self {
            frame_type: frame_type.into(),
            request_id,
            success: Some(true),
            payload: None,
            error: None,
            session_id: None,
        }
    }

    pub fn failure(request_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            frame_type: "response".to_string(),
            request_id,
            success: Some(false),
            payload: None,
            error: Some(error.into()),
            session_id: None,
        }
    }

    /// A connection-level protocol error, sent before authentication or on
    /// malformed JSON. Carries no `requestId`.
    pub fn protocol_error(error: impl Into<String>) -> Self {
        Self {
            frame_type: "error".to_string(),
            request_id: None,
            success: None,
            payload: None,
            error: Some(error.into()),
            session_id: None,
        }
    }

    pub fn broadcast(frame_type: impl Into<String>, session_id: impl Into<String>, payload: Value) -> Self {
        Self {
            frame_type: frame_type.into(),
            request_id: None,
            success: None,
            payload: Some(payload),
            error: None,
            session_id: Some(session_id.into()),
        }
    }

    pub fn broadcast_no_session(frame_type: impl Into<String>, payload: Value) -> Self {
        Self {
            frame_type: frame_type.into(),
            request_id: None,
            success: None,
            payload: Some(payload),
            error: None,
            session_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_frame_decodes_minimal_authenticate() {
        let json = r#"{"type":"authenticate","token":"t-abc","requestId":"a1"}"#;
        let frame: InboundFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.frame_type, "authenticate");
        assert_eq!(frame.token.as_deref(), Some("t-abc"));
        assert_eq!(frame.request_id.as_deref(), Some("a1"));
    }

    #[test]
    fn inbound_frame_defaults_missing_payload_to_null() {
        let json = r#"{"type":"ping"}"#;
        let frame: InboundFrame = serde_json::from_str(json).unwrap();
        assert!(frame.payload.is_null());
    }

    #[test]
    fn outbound_frame_omits_absent_fields() {
        let frame = OutboundFrame::ok_no_payload("authenticated", Some("a1".into()));
        let json = serde_json::to_value(&frame).unwrap();
        assert!(json.get("payload").is_none());
        assert!(json.get("sessionId").is_none());
        assert_eq!(json["success"], true);
    }

    #[test]
    fn protocol_error_has_no_request_id() {
        let frame = OutboundFrame::protocol_error("Invalid JSON message");
        assert!(frame.request_id.is_none());
        assert_eq!(frame.frame_type, "error");
    }
}
