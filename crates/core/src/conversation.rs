// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The conversation and message domain model.
//!
//! A conversation is the append-only log of one coding CLI run. It is
//! identified by a path-encoded id and accumulates messages as its JSONL
//! files grow.

use crate::ids::ConversationId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;

/// Derived status of a conversation, computed from the tail of its message
/// stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Working,
    Waiting,
    Error,
}

crate::simple_display! {
    SessionStatus {
        Idle => "idle",
        Working => "working",
        Waiting => "waiting",
        Error => "error",
    }
}

/// A typed content block within a message (the CLI's payload is pass-through
/// JSON; we only distinguish the shapes that affect status derivation).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Thinking { thinking: String },
    ToolUse { name: String, input: serde_json::Value },
    ToolResult { content: serde_json::Value, #[serde(default)] is_error: bool },
}

/// The body of a message: either a bare string or a list of typed blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// Token usage folded from `usage-record` messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

impl UsageTotals {
    pub fn add(&mut self, other: &UsageTotals) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
    }
}

/// One tagged message in a conversation's log. Append-only; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Monotonically increasing index within the file it was read from.
    pub index: u64,
    pub timestamp: Option<String>,
    pub role: MessageRole,
    pub content: MessageContent,
    pub parent: Option<u64>,
    pub usage: Option<UsageTotals>,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    ToolResult,
    SystemNotice,
    UsageRecord,
}

impl Message {
    /// A message is a *highlight* if it changes visible state: a user
    /// prompt, assistant text, the start of a tool use, a waiting prompt, or
    /// an error.
    pub fn is_highlight(&self) -> bool {
        match self.role {
            MessageRole::User | MessageRole::SystemNotice => true,
            MessageRole::Assistant => match &self.content {
                MessageContent::Text(_) => true,
                MessageContent::Blocks(blocks) => blocks.iter().any(|b| {
                    matches!(b, ContentBlock::Text { .. } | ContentBlock::ToolUse { .. })
                }),
            },
            MessageRole::ToolResult => self.carries_error(),
            MessageRole::UsageRecord => false,
        }
    }

    pub fn carries_error(&self) -> bool {
        if self.stop_reason.as_deref() == Some("error") {
            return true;
        }
        match &self.content {
            MessageContent::Blocks(blocks) => blocks.iter().any(|b| match b {
                ContentBlock::ToolResult { is_error, .. } => *is_error,
                _ => false,
            }),
            MessageContent::Text(_) => false,
        }
    }
}

/// One project's conversation: a chain of JSONL log files plus derived state.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: ConversationId,
    pub display_name: String,
    pub project_path: PathBuf,
    /// Log files in chain order (the CLI rotates logs; later files reference
    /// earlier ones via a parent pointer).
    pub log_files: Vec<PathBuf>,
    pub status: SessionStatus,
    pub last_activity: SystemTime,
    pub tail: Vec<Message>,
    /// Set once the CLI's terminal "done" signal has been observed on this
    /// conversation. Unlike [`SessionStatus`], which is recomputed from the
    /// tail on every update, this is sticky for the conversation's lifetime —
    /// a work-group worker bound to this conversation is only ever
    /// `completed` after this flips, never merely because the tail went idle.
    pub completed: bool,
}

impl Conversation {
    pub fn new(project_path: PathBuf, first_log: PathBuf) -> Self {
        let id = ConversationId::from_project_path(&project_path);
        let display_name = project_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| id.as_str().to_string());
        Self {
            id,
            display_name,
            project_path,
            log_files: vec![first_log],
            status: SessionStatus::Working,
            last_activity: SystemTime::now(),
            tail: Vec::new(),
            completed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_msg(role: MessageRole, text: &str) -> Message {
        Message {
            index: 0,
            timestamp: None,
            role,
            content: MessageContent::Text(text.to_string()),
            parent: None,
            usage: None,
            stop_reason: None,
        }
    }

    #[test]
    fn user_message_is_always_a_highlight() {
        let msg = text_msg(MessageRole::User, "hello");
        assert!(msg.is_highlight());
    }

    #[test]
    fn usage_record_is_never_a_highlight() {
        let msg = text_msg(MessageRole::UsageRecord, "");
        assert!(!msg.is_highlight());
    }

    #[test]
    fn assistant_text_only_is_a_highlight() {
        let mut msg = text_msg(MessageRole::Assistant, "");
        msg.content = MessageContent::Blocks(vec![ContentBlock::Text { text: "Done!".into() }]);
        assert!(msg.is_highlight());
    }

    #[test]
    fn tool_result_with_error_carries_error() {
        let msg = Message {
            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                content: serde_json::json!("boom"),
                is_error: true,
            }]),
            ..text_msg(MessageRole::ToolResult, "")
        };
        assert!(msg.carries_error());
    }

    #[test]
    fn usage_totals_add_accumulates() {
        let mut total = UsageTotals::default();
        total.add(&UsageTotals { input_tokens: 10, output_tokens: 5, cache_creation_tokens: 0, cache_read_tokens: 2 });
        total.add(&UsageTotals { input_tokens: 1, output_tokens: 1, cache_creation_tokens: 3, cache_read_tokens: 0 });
        assert_eq!(total.input_tokens, 11);
        assert_eq!(total.output_tokens, 6);
        assert_eq!(total.cache_creation_tokens, 3);
        assert_eq!(total.cache_read_tokens, 2);
    }
}
