// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier types for conversations, tmux sessions, clients, devices and
//! work groups.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

crate::define_id! {
    /// Opaque identifier for a connected WebSocket client. Not persisted.
    pub struct ClientId("cli-");
}

crate::define_id! {
    /// Client-chosen identifier for a push-notification device registration.
    pub struct DeviceId("dev-");
}

crate::define_id! {
    /// Identifier for a work group (a fan-out of worker CLIs on one plan).
    pub struct WorkGroupId("wkg-");
}

crate::define_id! {
    /// Identifier for a single worker within a work group.
    pub struct WorkerId("wkr-");
}

/// Identifies one conversation: the append-only log of a single coding CLI run.
///
/// Unlike [`ClientId`]/[`DeviceId`], this is not randomly generated. It is
/// derived deterministically from the conversation's project directory (see
/// [`ConversationId::from_project_path`]), so it is a thin string newtype
/// rather than a [`crate::define_id!`] instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Encode a project's absolute path the way the CLI's own log tree does:
    /// replace `/` and `_` with `-`.
    pub fn from_project_path(path: &std::path::Path) -> Self {
        let raw = path.to_string_lossy();
        let encoded: String = raw
            .chars()
            .map(|c| if c == '/' || c == '_' { '-' } else { c })
            .collect();
        Self(encoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl PartialEq<str> for ConversationId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ConversationId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl Borrow<str> for ConversationId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A tmux session name, caller-chosen or generated by
/// [`crate::ids::generate_session_name`]; never random-by-construction, so it
/// is a plain string newtype rather than a [`crate::define_id!`] instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TmuxSessionName(pub String);

impl TmuxSessionName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TmuxSessionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TmuxSessionName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TmuxSessionName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Borrow<str> for TmuxSessionName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Generate a session name as `companion-<basename>-<4 random chars>`.
pub fn generate_session_name(dir: &std::path::Path) -> TmuxSessionName {
    let basename = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "session".to_string());
    let suffix = nanoid::nanoid!(4);
    TmuxSessionName::new(format!("companion-{basename}-{suffix}"))
}
