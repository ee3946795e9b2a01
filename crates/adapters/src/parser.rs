// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Decodes a conversation's JSONL log bytes into typed messages and derives
//! the projections the rest of the daemon needs: highlights, tasks, usage
//! totals, and paginated chain-parsing across a conversation's rotated log
//! files.
//!
//! Parsing is restartable: [`SessionLogParser::tail`] re-reads a file from
//! its last known byte offset, so calling it repeatedly as a file grows
//! yields the same messages (in the same order, with the same indices) as
//! parsing the whole file in one shot. An incomplete trailing line (no `\n`
//! yet) is never consumed — it is re-read in full once the file grows past
//! it.

use relay_core::{ContentBlock, Message, MessageContent, MessageRole, SessionStatus, UsageTotals};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::Path;

/// One line of a conversation's JSONL log, decoded defensively: an unknown
/// shape produces `None` (the caller counts it as skipped) rather than
/// panicking.
fn parse_line(raw: &str, index: u64) -> Option<Message> {
    let value: Value = serde_json::from_str(raw).ok()?;
    message_from_value(&value, index)
}

fn message_from_value(value: &Value, index: u64) -> Option<Message> {
    let envelope_type = value.get("type").and_then(Value::as_str);
    let message_obj = value.get("message");
    let role_str = message_obj
        .and_then(|m| m.get("role"))
        .and_then(Value::as_str)
        .or_else(|| value.get("role").and_then(Value::as_str))
        .or(envelope_type)?;

    let content_value = message_obj
        .and_then(|m| m.get("content"))
        .or_else(|| value.get("content"))
        .cloned()
        .unwrap_or(Value::Null);
    let content = content_from_value(content_value);

    let stop_reason = message_obj
        .and_then(|m| m.get("stop_reason"))
        .or_else(|| value.get("stop_reason"))
        .or_else(|| value.get("stopReason"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let usage = message_obj
        .and_then(|m| m.get("usage"))
        .or_else(|| value.get("usage"))
        .and_then(usage_from_value);

    let timestamp = value.get("timestamp").and_then(Value::as_str).map(str::to_string);

    let has_tool_result =
        matches!(&content, MessageContent::Blocks(blocks) if blocks.iter().any(|b| matches!(b, ContentBlock::ToolResult { .. })));

    let role = match (envelope_type, role_str) {
        (Some("summary"), _) | (Some("system"), _) => MessageRole::SystemNotice,
        (Some("usage"), _) => MessageRole::UsageRecord,
        (_, "user") if has_tool_result => MessageRole::ToolResult,
        (_, "user") => MessageRole::User,
        (_, "assistant") => MessageRole::Assistant,
        (_, "tool_result") => MessageRole::ToolResult,
        (_, "system") | (_, "summary") => MessageRole::SystemNotice,
        _ => return None,
    };

    Some(Message { index, timestamp, role, content, parent: None, usage, stop_reason })
}

fn content_from_value(value: Value) -> MessageContent {
    match value {
        Value::String(s) => MessageContent::Text(s),
        Value::Array(items) => {
            let blocks = items.into_iter().filter_map(block_from_value).collect();
            MessageContent::Blocks(blocks)
        }
        other => MessageContent::Text(other.to_string()),
    }
}

fn block_from_value(value: Value) -> Option<ContentBlock> {
    let block_type = value.get("type").and_then(Value::as_str)?;
    match block_type {
        "text" => Some(ContentBlock::Text {
            text: value.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
        }),
        "thinking" => Some(ContentBlock::Thinking {
            thinking: value.get("thinking").and_then(Value::as_str).unwrap_or_default().to_string(),
        }),
        "tool_use" => Some(ContentBlock::ToolUse {
            name: value.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
            input: value.get("input").cloned().unwrap_or(Value::Null),
        }),
        "tool_result" => Some(ContentBlock::ToolResult {
            content: value.get("content").cloned().unwrap_or(Value::Null),
            is_error: value.get("is_error").and_then(Value::as_bool).unwrap_or(false),
        }),
        // Unknown nested shape: fall back to the most conservative
        // interpretation (render it as inert text) rather than dropping the
        // whole message or panicking.
        _ => Some(ContentBlock::Text { text: value.to_string() }),
    }
}

fn usage_from_value(value: &Value) -> Option<UsageTotals> {
    if value.is_null() {
        return None;
    }
    let get = |keys: &[&str]| -> u64 {
        keys.iter().find_map(|k| value.get(k)).and_then(Value::as_u64).unwrap_or(0)
    };
    Some(UsageTotals {
        input_tokens: get(&["input_tokens", "inputTokens"]),
        output_tokens: get(&["output_tokens", "outputTokens"]),
        cache_creation_tokens: get(&["cache_creation_input_tokens", "cacheCreationTokens"]),
        cache_read_tokens: get(&["cache_read_input_tokens", "cacheReadTokens"]),
    })
}

/// Parse a complete byte buffer, starting line numbering at `start_index`.
/// Returns the decoded messages, the count of lines skipped for being
/// malformed or structurally unrecognized, and the byte offset consumed (the
/// start of any incomplete trailing line, or `data.len()` if the buffer ends
/// cleanly on a newline).
fn parse_bytes(data: &[u8], start_index: u64) -> (Vec<Message>, u64, u64) {
    let mut messages = Vec::new();
    let mut skipped = 0u64;
    let mut index = start_index;
    let mut pos = 0usize;

    while let Some(rel) = data[pos..].iter().position(|&b| b == b'\n') {
        let line_end = pos + rel;
        let line = &data[pos..line_end];
        pos = line_end + 1;

        let text = match std::str::from_utf8(line) {
            Ok(s) => s.trim(),
            Err(_) => {
                skipped += 1;
                continue;
            }
        };
        if text.is_empty() {
            continue;
        }
        match parse_line(text, index) {
            Some(msg) => {
                messages.push(msg);
                index += 1;
            }
            None => skipped += 1,
        }
    }

    (messages, skipped, pos as u64)
}

/// Parse a whole JSONL file from scratch. Used for on-demand projections
/// (`get_full`, `get_highlights`, `chain_parse`) that need the complete
/// history rather than just the tail the watcher caches.
pub fn parse_file(path: &Path) -> io::Result<Vec<Message>> {
    let data = fs::read(path)?;
    let (messages, _skipped, _consumed) = parse_bytes(&data, 0);
    Ok(messages)
}

/// Incremental, restartable parser over one JSONL log file. Holds just
/// enough state (a byte offset and a line-number counter) to resume parsing
/// new bytes appended since the last call.
#[derive(Debug, Default)]
pub struct SessionLogParser {
    last_offset: u64,
    next_index: u64,
    skipped_lines: u64,
}

impl SessionLogParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skipped_lines(&self) -> u64 {
        self.skipped_lines
    }

    /// Re-read `path` from the last known offset and return any newly
    /// completed messages. If the file is shorter than the last known
    /// offset (truncated or rotated out from under us), resets to the
    /// beginning.
    pub fn tail(&mut self, path: &Path) -> io::Result<Vec<Message>> {
        let data = fs::read(path)?;
        if (data.len() as u64) < self.last_offset {
            self.last_offset = 0;
            self.next_index = 0;
        }
        let start = self.last_offset as usize;
        let (messages, skipped, consumed) = parse_bytes(&data[start..], self.next_index);
        self.last_offset += consumed;
        self.next_index += messages.len() as u64;
        self.skipped_lines += skipped;
        Ok(messages)
    }
}

/// The subset of messages visible to a human reading the conversation: user
/// prompts, assistant text, tool-use starts, waiting prompts, and errors.
pub fn highlights(messages: &[Message]) -> Vec<Message> {
    messages.iter().filter(|m| m.is_highlight()).cloned().collect()
}

/// Derive the session status from the tail of a message stream, checked in
/// priority order: waiting, then working, then error, else idle.
///
/// `waiting` requires that the last assistant turn ended on an explicit
/// prompt-for-input marker (`stop_reason == "waiting_for_input"`) and no
/// later user message has arrived; `working` requires an open tool-use with
/// no matching tool-result yet.
pub fn derive_status(messages: &[Message]) -> SessionStatus {
    let mut waiting = false;
    let mut open_tool_use = false;
    let mut last_error = false;

    for msg in messages {
        match msg.role {
            MessageRole::User => {
                waiting = false;
            }
            MessageRole::Assistant => {
                if msg.stop_reason.as_deref() == Some("waiting_for_input") {
                    waiting = true;
                }
                if let MessageContent::Blocks(blocks) = &msg.content {
                    if blocks.iter().any(|b| matches!(b, ContentBlock::ToolUse { .. })) {
                        open_tool_use = true;
                    }
                }
            }
            MessageRole::ToolResult => {
                open_tool_use = false;
            }
            MessageRole::SystemNotice | MessageRole::UsageRecord => {}
        }
        last_error = msg.carries_error();
    }

    if waiting {
        SessionStatus::Waiting
    } else if open_tool_use {
        SessionStatus::Working
    } else if last_error {
        SessionStatus::Error
    } else {
        SessionStatus::Idle
    }
}

/// Fold every message's attached usage record into running totals.
pub fn usage_totals(messages: &[Message]) -> UsageTotals {
    let mut total = UsageTotals::default();
    for msg in messages {
        if let Some(u) = &msg.usage {
            total.add(u);
        }
    }
    total
}

/// One entry extracted from an embedded todo-list tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub text: String,
    pub completed: bool,
}

/// Extract the most recent todo-list snapshot and current-task pointer from
/// a message stream. The CLI re-emits the whole list on every update (a
/// `TodoWrite`-style tool call carrying a `todos` array), so only the last
/// such tool-use is authoritative.
pub fn tasks(messages: &[Message]) -> (Vec<Task>, Option<String>) {
    let mut latest: Option<&Value> = None;
    for msg in messages {
        if let MessageContent::Blocks(blocks) = &msg.content {
            for block in blocks {
                if let ContentBlock::ToolUse { name, input } = block {
                    if name.eq_ignore_ascii_case("TodoWrite") {
                        latest = Some(input);
                    }
                }
            }
        }
    }

    let Some(input) = latest else {
        return (Vec::new(), None);
    };
    let Some(todos) = input.get("todos").and_then(Value::as_array) else {
        return (Vec::new(), None);
    };

    let mut tasks = Vec::new();
    let mut current = None;
    for todo in todos {
        let text = todo.get("content").and_then(Value::as_str).unwrap_or_default().to_string();
        let status = todo.get("status").and_then(Value::as_str).unwrap_or_default();
        if status == "in_progress" && current.is_none() {
            current = Some(text.clone());
        }
        tasks.push(Task { text, completed: status == "completed" });
    }
    (tasks, current)
}

/// Treat an ordered list of rotated log files as one logical concatenation
/// and return the last `limit` highlights skipping `offset` from the end,
/// plus whether more remain further back.
pub fn chain_parse(
    files: &[std::path::PathBuf],
    limit: usize,
    offset: usize,
) -> io::Result<(Vec<Message>, bool)> {
    let mut all = Vec::new();
    for file in files {
        all.extend(parse_file(file)?);
    }
    let all_highlights = highlights(&all);

    let total = all_highlights.len();
    let end = total.saturating_sub(offset);
    let start = end.saturating_sub(limit);
    let has_more = start > 0;
    let page = all_highlights[start..end].to_vec();
    Ok((page, has_more))
}
