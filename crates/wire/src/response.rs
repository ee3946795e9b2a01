// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Response and broadcast payload shapes. These are serialized into an
//! [`crate::frame::OutboundFrame`]'s `payload` field; they never travel on
//! their own.

use relay_core::{
    ClientId, ConversationId, Device, Message, MergeStrategy, SessionStatus, WorkGroupId,
    WorkGroupStatus, WorkerId, WorkerQuestion, WorkerStatus,
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
pub struct ConnectedPayload {
    #[serde(rename = "clientId")]
    pub client_id: ClientId,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    #[serde(rename = "sessionId")]
    pub session_id: ConversationId,
    #[serde(rename = "displayName")]
    pub display_name: String,
    pub status: SessionStatus,
    #[serde(rename = "lastActivity")]
    pub last_activity: u64,
    #[serde(rename = "projectPath")]
    pub project_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerSummaryPayload {
    pub sessions: Vec<SessionSummary>,
    #[serde(rename = "totalSessions")]
    pub total_sessions: usize,
    #[serde(rename = "waitingCount")]
    pub waiting_count: usize,
    #[serde(rename = "workingCount")]
    pub working_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HighlightsPayload {
    #[serde(rename = "sessionId")]
    pub session_id: ConversationId,
    pub messages: Vec<Message>,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    #[serde(rename = "sessionId")]
    pub session_id: ConversationId,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskEntry {
    pub text: String,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TasksPayload {
    #[serde(rename = "sessionId")]
    pub session_id: ConversationId,
    pub tasks: Vec<TaskEntry>,
    #[serde(rename = "currentTask")]
    pub current_task: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerView {
    #[serde(rename = "workerId")]
    pub worker_id: WorkerId,
    #[serde(rename = "taskSlug")]
    pub task_slug: String,
    #[serde(rename = "taskDescription")]
    pub task_description: String,
    pub status: WorkerStatus,
    #[serde(rename = "lastActivity")]
    pub last_activity: String,
    #[serde(rename = "lastQuestion")]
    pub last_question: Option<WorkerQuestion>,
    pub commits: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkGroupView {
    #[serde(rename = "groupId")]
    pub group_id: WorkGroupId,
    pub name: String,
    pub status: WorkGroupStatus,
    #[serde(rename = "mergeStrategy")]
    pub merge_strategy: MergeStrategy,
    pub workers: Vec<WorkerView>,
    #[serde(rename = "mergeCommit")]
    pub merge_commit: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkGroupListPayload {
    pub groups: Vec<WorkGroupView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrphanedWorktree {
    pub path: PathBuf,
    pub branch: String,
    #[serde(rename = "repoDir")]
    pub repo_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrphanedWorktreesPayload {
    pub worktrees: Vec<OrphanedWorktree>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DevicesPayload {
    pub devices: Vec<Device>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RotateTokenPayload {
    pub token: String,
}

/// Outbound broadcast messages: no `requestId`, always a `sessionId` where
/// applicable, published to every subscribed client whose filter matches.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Broadcast {
    ConversationUpdate { #[serde(rename = "sessionId")] session_id: ConversationId, tail: Vec<Message> },
    StatusChange { #[serde(rename = "sessionId")] session_id: ConversationId, status: SessionStatus },
    OtherSessionActivity { #[serde(rename = "sessionId")] session_id: ConversationId },
    Compaction { #[serde(rename = "sessionId")] session_id: ConversationId },
    ErrorDetected { #[serde(rename = "sessionId")] session_id: ConversationId, message: String },
    SessionCompleted { #[serde(rename = "sessionId")] session_id: ConversationId },
    WorkGroupUpdate { #[serde(rename = "groupId")] group_id: WorkGroupId, group: WorkGroupView },
    TmuxSessionsChanged,
    SessionMuteChanged { #[serde(rename = "sessionId")] session_id: ConversationId, muted: bool },
    TokenInvalidated,
}
