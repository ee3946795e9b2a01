// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The escalation configuration, pending-event, and notification-history
//! types shared between the escalation engine and the notification store.

use crate::ids::ConversationId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WaitingForInput,
    ErrorDetected,
    SessionCompleted,
    WorkerWaiting,
    WorkerError,
    WorkGroupReady,
}

/// Quiet-hours window in local time. A window may wrap past midnight;
/// `start == end` means always active.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuietHours {
    pub enabled: bool,
    pub start: (u8, u8),
    pub end: (u8, u8),
}

impl Default for QuietHours {
    fn default() -> Self {
        Self { enabled: false, start: (22, 0), end: (7, 0) }
    }
}

impl QuietHours {
    /// Whether `now` (hour, minute, local time) falls inside the configured
    /// window.
    pub fn contains(&self, now: (u8, u8)) -> bool {
        if !self.enabled {
            return false;
        }
        if self.start == self.end {
            return true;
        }
        let to_minutes = |(h, m): (u8, u8)| h as u32 * 60 + m as u32;
        let (start, end, cur) = (to_minutes(self.start), to_minutes(self.end), to_minutes(now));
        if start < end {
            cur >= start && cur < end
        } else {
            // Window wraps past midnight.
            cur >= start || cur < end
        }
    }
}

/// Per-event-type enable flags plus timing and quiet-hours policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationConfig {
    pub waiting_for_input: bool,
    pub error_detected: bool,
    pub session_completed: bool,
    pub worker_waiting: bool,
    pub worker_error: bool,
    pub work_group_ready: bool,
    pub push_delay_seconds: u64,
    pub rate_limit_seconds: u64,
    pub quiet_hours: QuietHours,
    pub muted_sessions: HashSet<ConversationId>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            waiting_for_input: true,
            error_detected: true,
            session_completed: false,
            worker_waiting: true,
            worker_error: true,
            work_group_ready: true,
            push_delay_seconds: 300,
            rate_limit_seconds: 60,
            quiet_hours: QuietHours::default(),
            muted_sessions: HashSet::new(),
        }
    }
}

impl EscalationConfig {
    pub fn enabled_for(&self, event_type: EventType) -> bool {
        match event_type {
            EventType::WaitingForInput => self.waiting_for_input,
            EventType::ErrorDetected => self.error_detected,
            EventType::SessionCompleted => self.session_completed,
            EventType::WorkerWaiting => self.worker_waiting,
            EventType::WorkerError => self.worker_error,
            EventType::WorkGroupReady => self.work_group_ready,
        }
    }
}

/// An in-memory record tracking a not-yet-acknowledged event for one
/// (session, event-type) pair. At most one per pair at any instant.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub session_id: ConversationId,
    pub session_name: String,
    pub event_type: EventType,
    pub content: String,
    pub first_seen: Instant,
    pub push_deadline: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTier {
    Browser,
    Push,
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationHistoryEntry {
    pub id: u64,
    pub timestamp: u64,
    pub event_type: EventType,
    pub session_id: Option<ConversationId>,
    pub session_name: Option<String>,
    pub preview: String,
    pub tier: NotificationTier,
    pub acknowledged: bool,
}

/// Truncate `text` to at most `max_len` characters, appending an ellipsis on
/// overflow.
pub fn truncate_preview(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_len.saturating_sub(1)).collect();
    format!("{truncated}…")
}
