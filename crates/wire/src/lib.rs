// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket message catalog for the relay daemon's client protocol.
//!
//! WebSocket frames already carry their own transport-level framing, so
//! unlike the daemon's historical length-prefixed socket protocol, one text
//! frame is exactly one JSON object. This crate defines the inbound/outbound
//! envelope ([`frame`]), the closed sum type over every accepted message
//! ([`request::Request`]), and the response/broadcast payload shapes
//! ([`response`]).

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod frame;
mod request;
mod response;

pub use frame::{InboundFrame, OutboundFrame};
pub use request::{
    AuthenticatePayload, BrowseDirectoriesPayload, CreateTmuxSessionPayload,
    CreateWorktreeSessionPayload, DeviceIdPayload, GetHighlightsPayload,
    GetNotificationHistoryPayload, GetTerminalOutputPayload, ListWorktreesPayload, PathPayload,
    RecreateTmuxSessionPayload, RegisterPushPayload, Request, RequestDecodeError,
    RetryWorkerPayload, SendImagePayload, SendInputPayload, SendTerminalKeysPayload,
    SendWithImagesPayload, SendWorkerInputPayload, SessionNamePayload, SessionScopedPayload,
    SetAutoApprovePayload, SetSessionMutedPayload, SpawnWorkGroupPayload, SubscribePayload,
    SwitchSessionPayload, WorkGroupIdPayload, WorkerSpawnSpec,
};
pub use response::{
    Broadcast, ConnectedPayload, DevicesPayload, HighlightsPayload, OrphanedWorktree,
    OrphanedWorktreesPayload, RotateTokenPayload, ServerSummaryPayload, SessionSummary,
    StatusPayload, TaskEntry, TasksPayload, WorkGroupListPayload, WorkGroupView, WorkerView,
};
