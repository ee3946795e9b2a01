// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The WebSocket hub: accepts connections on every configured listener,
//! authenticates clients against that listener's token, dispatches every
//! request type in [`relay_wire::Request`], and fans watcher /
//! work-group / escalation events out to subscribed clients.
//!
//! Each connection is one spawned task split into a read half (decoding
//! frames and dispatching them inline) and a bounded outbound queue drained
//! by the same task's write half. The queue drops the oldest frame on
//! overflow rather than blocking the writer or growing without bound — a
//! slow mobile client should miss a few broadcast ticks, not stall the
//! sessions it's behind on or OOM the daemon.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use relay_adapters::send_input;
use relay_core::{
    Client, ClientId, ConversationId, Device, DeviceId, ErrorTag, EventType, RelayError, ShellError,
    TmuxSessionName, WorkGroupError, WorkGroupId, WorkerId, WorkerStatus,
};
use relay_wire::{
    Broadcast, ConnectedPayload, DevicesPayload, HighlightsPayload, InboundFrame, OrphanedWorktreesPayload,
    OutboundFrame, Request, RequestDecodeError, RotateTokenPayload, ServerSummaryPayload, SessionSummary,
    StatusPayload, TaskEntry, TasksPayload, WorkGroupListPayload, WorkGroupView, WorkerView,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bootstrap::Daemon;
use crate::config::ListenerConfig;
use crate::env;
use crate::workgroup::WorkerSpec;

const OUTBOUND_QUEUE_CAP: usize = 256;
/// Extensions `download_file`/`read_file` will serve. Anything else is
/// `filesystem-denied`, not just skipped, so a client learns why.
const ALLOWED_EXTENSIONS: &[&str] = &["txt", "md", "json", "log", "diff", "patch", "yaml", "yml", "toml"];

/// A bounded, drop-oldest queue of frames waiting to be written to one
/// client's socket.
struct OutboundQueue {
    inner: Mutex<VecDeque<OutboundFrame>>,
    notify: Notify,
}

impl OutboundQueue {
    fn new() -> Self {
        Self { inner: Mutex::new(VecDeque::new()), notify: Notify::new() }
    }

    fn push(&self, frame: OutboundFrame) {
        let mut q = self.inner.lock();
        if q.len() >= OUTBOUND_QUEUE_CAP {
            q.pop_front();
        }
        q.push_back(frame);
        drop(q);
        self.notify.notify_one();
    }

    async fn pop(&self) -> OutboundFrame {
        loop {
            if let Some(frame) = self.inner.lock().pop_front() {
                return frame;
            }
            self.notify.notified().await;
        }
    }
}

struct ClientHandle {
    client: Mutex<Client>,
    queue: Arc<OutboundQueue>,
}

pub struct Hub {
    daemon: Arc<Daemon>,
    clients: RwLock<HashMap<ClientId, Arc<ClientHandle>>>,
    auto_approve: Mutex<HashMap<Option<ConversationId>, bool>>,
    immediate_rx: Mutex<Option<mpsc::UnboundedReceiver<crate::escalation::EscalationEvent>>>,
}

impl Hub {
    pub fn new(daemon: Arc<Daemon>) -> Self {
        let immediate_rx = daemon.take_immediate_rx();
        Self {
            daemon,
            clients: RwLock::new(HashMap::new()),
            auto_approve: Mutex::new(HashMap::new()),
            immediate_rx: Mutex::new(Some(immediate_rx)),
        }
    }

    fn broadcast(&self, session_id: &ConversationId, message: Broadcast) {
        let payload = serde_json::to_value(&message).unwrap_or(Value::Null);
        let frame_type = payload.get("type").and_then(Value::as_str).unwrap_or("broadcast").to_string();
        let frame = OutboundFrame::broadcast(frame_type, session_id.as_str(), payload);
        for handle in self.clients.read().values() {
            let wants = handle.client.lock().wants_broadcast(session_id);
            if wants {
                handle.queue.push(frame.clone());
            }
        }
    }

    fn broadcast_all(&self, message: Broadcast) {
        let payload = serde_json::to_value(&message).unwrap_or(Value::Null);
        let frame_type = payload.get("type").and_then(Value::as_str).unwrap_or("broadcast").to_string();
        let frame = OutboundFrame::broadcast_no_session(frame_type, payload);
        for handle in self.clients.read().values() {
            let subscribed = handle.client.lock().subscribed;
            if subscribed {
                handle.queue.push(frame.clone());
            }
        }
    }

    /// `rotate_token`'s fan-out: every other client authenticated on the
    /// same listener is sent `token_invalidated` and has its authenticated
    /// flag cleared, forcing it to re-authenticate with the new token. The
    /// requesting client (already told the new token in its response) and
    /// clients on other listeners are untouched.
    fn invalidate_other_tokens(&self, listener_port: u16, requester: ClientId) {
        let payload = serde_json::to_value(Broadcast::TokenInvalidated).unwrap_or(Value::Null);
        let frame_type = payload.get("type").and_then(Value::as_str).unwrap_or("token_invalidated").to_string();
        let frame = OutboundFrame::broadcast_no_session(frame_type, payload);
        for handle in self.clients.read().values() {
            let mut client = handle.client.lock();
            if client.id == requester || client.listener_port != listener_port || !client.authenticated {
                continue;
            }
            client.authenticated = false;
            drop(client);
            handle.queue.push(frame.clone());
        }
    }

    /// Forward watcher events and the escalation engine's immediate tier to
    /// subscribed clients until `cancel` fires. One task per daemon, not per
    /// listener — every listener's clients share the same watcher.
    pub async fn relay_broadcasts(self: Arc<Self>, cancel: CancellationToken) {
        let mut watch_rx = self.daemon.watcher.subscribe();
        let mut immediate_rx =
            self.immediate_rx.lock().take().expect("relay_broadcasts called more than once");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = watch_rx.recv() => {
                    match event {
                        Ok(event) => self.handle_watch_event(event).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "hub lagged behind watcher broadcast channel");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                event = immediate_rx.recv() => {
                    match event {
                        Some(event) => self.handle_escalation_event(event),
                        None => break,
                    }
                }
            }
        }
    }

    /// Bind work-group workers to their discovered conversations on a timer
    /// and broadcast the groups [`WorkGroupManager::reconcile`] changed,
    /// until `cancel` fires. One task per daemon, mirroring
    /// [`Self::relay_broadcasts`]'s single shared loop rather than a
    /// per-group poller.
    pub async fn run_workgroup_reconciler(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(env::workgroup_poll_interval());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let changed = self.daemon.workgroups.reconcile(&self.daemon.watcher).await;
                    for group_id in changed {
                        if let Some(group) = self.daemon.workgroups.get(&group_id) {
                            self.broadcast_all(Broadcast::WorkGroupUpdate { group_id, group: work_group_view(&group) });
                        }
                    }
                }
            }
        }
    }

    async fn handle_watch_event(&self, event: relay_adapters::WatchEvent) {
        use relay_adapters::WatchEvent as E;
        match event {
            E::Updated(id) => {
                if let Some(conv) = self.daemon.watcher.get(&id) {
                    let tail = conv.tail.iter().rev().take(20).rev().cloned().collect();
                    self.broadcast(&id, Broadcast::ConversationUpdate { session_id: id, tail });
                }
            }
            E::Discovered(id) => {
                self.broadcast_all(Broadcast::TmuxSessionsChanged);
                debug!(session = %id, "discovered new conversation");
            }
            E::Demoted(_id) => {
                self.broadcast_all(Broadcast::TmuxSessionsChanged);
            }
            E::StatusChange(id, status) => {
                self.broadcast(&id, Broadcast::StatusChange { session_id: id.clone(), status });
                if status == relay_core::SessionStatus::Waiting {
                    let name = self.daemon.watcher.get(&id).map(|c| c.display_name).unwrap_or_default();
                    self.daemon.escalation.record_event(
                        id,
                        name,
                        EventType::WaitingForInput,
                        "waiting for input".to_string(),
                    );
                }
            }
            E::ErrorDetected(id, message) => {
                self.broadcast(&id, Broadcast::ErrorDetected { session_id: id.clone(), message: message.clone() });
                let name = self.daemon.watcher.get(&id).map(|c| c.display_name).unwrap_or_default();
                self.daemon.escalation.record_event(id, name, EventType::ErrorDetected, message);
            }
            E::SessionCompleted(id) => {
                self.broadcast(&id, Broadcast::SessionCompleted { session_id: id.clone() });
                let name = self.daemon.watcher.get(&id).map(|c| c.display_name).unwrap_or_default();
                self.daemon.escalation.record_event(
                    id,
                    name,
                    EventType::SessionCompleted,
                    "session completed".to_string(),
                );
            }
            E::Compaction(id) => {
                self.broadcast(&id, Broadcast::Compaction { session_id: id });
            }
        }
    }

    fn handle_escalation_event(&self, event: crate::escalation::EscalationEvent) {
        // The in-app tier is already broadcast by `handle_watch_event` for
        // session-scoped events; this channel exists for the escalation
        // engine's own bookkeeping (history, push scheduling) and for event
        // types with no corresponding watcher broadcast.
        debug!(session = %event.session_id, event_type = ?event.event_type, "escalation event scheduled for push");
    }

    pub async fn run_listener(self: Arc<Self>, listener: ListenerConfig, cancel: CancellationToken) {
        let addr = format!("{}:{}", listener.host, listener.port);
        let tcp = match TcpListener::bind(&addr).await {
            Ok(tcp) => tcp,
            Err(e) => {
                warn!(addr = %addr, error = %e, "failed to bind listener");
                return;
            }
        };
        info!(addr = %addr, "listening for websocket connections");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(addr = %addr, "listener shutting down");
                    break;
                }
                result = tcp.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let hub = self.clone();
                            let listener = listener.clone();
                            let cancel = cancel.clone();
                            tokio::spawn(async move {
                                if let Err(e) = hub.handle_connection(stream, listener, cancel).await {
                                    debug!(peer = %peer, error = %e, "connection ended with error");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "accept error"),
                    }
                }
            }
        }
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: tokio::net::TcpStream,
        listener: ListenerConfig,
        cancel: CancellationToken,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        let ws = tokio_tungstenite::accept_async(stream).await?;
        let (mut sink, mut stream) = ws.split();

        let client = Client::new(listener.port);
        let client_id = client.id;
        let handle = Arc::new(ClientHandle { client: Mutex::new(client), queue: Arc::new(OutboundQueue::new()) });
        self.clients.write().insert(client_id, handle.clone());

        handle.queue.push(OutboundFrame::ok(
            "connected",
            None,
            serde_json::to_value(ConnectedPayload { client_id }).unwrap_or(Value::Null),
        ));

        let auth_deadline = tokio::time::sleep(env::auth_timeout());
        tokio::pin!(auth_deadline);

        let result = loop {
            let authenticated = handle.client.lock().authenticated;
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                _ = &mut auth_deadline, if !authenticated => {
                    debug!(client = %client_id, "auth timeout elapsed");
                    break Ok(());
                }
                outbound = handle.queue.pop() => {
                    let text = serde_json::to_string(&outbound).unwrap_or_default();
                    if sink.send(WsMessage::Text(text.into())).await.is_err() {
                        break Ok(());
                    }
                }
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            let response = self.handle_text_frame(&handle, &listener, &text).await;
                            if let Some(response) = response {
                                handle.queue.push(response);
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break Err(e),
                    }
                }
            }
        };

        self.clients.write().remove(&client_id);
        result
    }

    async fn handle_text_frame(
        &self,
        handle: &Arc<ClientHandle>,
        listener: &ListenerConfig,
        text: &str,
    ) -> Option<OutboundFrame> {
        let frame: InboundFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(_) => return Some(OutboundFrame::protocol_error("Invalid JSON message")),
        };

        let request = match Request::decode(&frame.frame_type, &frame.payload, frame.token.as_deref()) {
            Ok(request) => request,
            Err(RequestDecodeError::UnknownType(t)) => {
                return Some(OutboundFrame::failure(frame.request_id, format!("Unknown message type: {t}")));
            }
            Err(RequestDecodeError::InvalidPayload(t, e)) => {
                return Some(OutboundFrame::failure(
                    frame.request_id,
                    format!("{}: {t}: {e}", ErrorTag::InvalidPayload.as_str()),
                ));
            }
        };

        let authenticated = handle.client.lock().authenticated;
        if !authenticated && !request.is_pre_auth() {
            return Some(OutboundFrame::protocol_error("Not authenticated"));
        }

        Some(self.dispatch(handle, listener, frame.request_id, request).await)
    }

    fn fail(request_id: Option<String>, err: RelayError) -> OutboundFrame {
        OutboundFrame::failure(request_id, format!("{}: {err}", err.tag().as_str()))
    }

    async fn dispatch(
        &self,
        handle: &Arc<ClientHandle>,
        listener: &ListenerConfig,
        request_id: Option<String>,
        request: Request,
    ) -> OutboundFrame {
        match request {
            Request::Authenticate { token, .. } => {
                let ok = token == listener.token;
                if ok {
                    handle.client.lock().authenticated = true;
                } else {
                    handle.client.lock().authenticated = false;
                }
                let mut frame = OutboundFrame::ok_no_payload("authenticated", request_id);
                frame.success = Some(ok);
                if !ok {
                    frame.error = Some(format!("{}: invalid token", ErrorTag::InvalidToken.as_str()));
                }
                frame
            }
            Request::Subscribe(p) => {
                let mut client = handle.client.lock();
                client.subscribed = true;
                client.subscribed_session = p.session_id;
                OutboundFrame::ok_no_payload("subscribed", request_id)
            }
            Request::Unsubscribe => {
                let mut client = handle.client.lock();
                client.subscribed = false;
                client.subscribed_session = None;
                OutboundFrame::ok_no_payload("unsubscribed", request_id)
            }
            Request::GetServerSummary(p) => {
                let tmux_sessions = if p.filter_to_live_sessions {
                    self.daemon.tmux.list_sessions().await.ok()
                } else {
                    None
                };
                let conversations = self.daemon.watcher.list_matching_tmux(tmux_sessions.as_deref());
                let sessions: Vec<SessionSummary> = conversations.into_iter().map(session_summary).collect();
                let waiting_count = sessions.iter().filter(|s| s.status == relay_core::SessionStatus::Waiting).count();
                let working_count = sessions.iter().filter(|s| s.status == relay_core::SessionStatus::Working).count();
                let payload = ServerSummaryPayload {
                    total_sessions: sessions.len(),
                    waiting_count,
                    working_count,
                    sessions,
                };
                OutboundFrame::ok("server_summary", request_id, serde_json::to_value(payload).unwrap_or(Value::Null))
            }
            Request::GetSessions => {
                let sessions: Vec<SessionSummary> = self.daemon.watcher.list().into_iter().map(session_summary).collect();
                OutboundFrame::ok("sessions", request_id, json!({ "sessions": sessions }))
            }
            Request::GetStatus => {
                let session_id = handle.client.lock().subscribed_session.clone();
                match session_id.and_then(|id| self.daemon.watcher.get(&id)) {
                    Some(conv) => OutboundFrame::ok(
                        "status",
                        request_id,
                        serde_json::to_value(StatusPayload { session_id: conv.id, status: conv.status })
                            .unwrap_or(Value::Null),
                    ),
                    None => Self::fail(request_id, RelayError::NotFound("no subscribed session".into())),
                }
            }
            Request::GetFull => {
                let session_id = handle.client.lock().subscribed_session.clone();
                match session_id.and_then(|id| self.daemon.watcher.get(&id)) {
                    Some(conv) => {
                        let (messages, has_more) =
                            match relay_adapters::chain_parse(&conv.log_files, usize::MAX, 0) {
                                Ok(r) => r,
                                Err(e) => return Self::fail(request_id, RelayError::Internal(e.to_string())),
                            };
                        OutboundFrame::ok(
                            "full",
                            request_id,
                            serde_json::to_value(HighlightsPayload { session_id: conv.id, messages, has_more })
                                .unwrap_or(Value::Null),
                        )
                    }
                    None => Self::fail(request_id, RelayError::NotFound("no subscribed session".into())),
                }
            }
            Request::GetHighlights(p) => {
                let session_id = handle.client.lock().subscribed_session.clone();
                match session_id.and_then(|id| self.daemon.watcher.get(&id)) {
                    Some(conv) => {
                        let limit = p.limit.unwrap_or(50);
                        let offset = p.offset.unwrap_or(0);
                        match relay_adapters::chain_parse(&conv.log_files, limit, offset) {
                            Ok((messages, has_more)) => OutboundFrame::ok(
                                "highlights",
                                request_id,
                                serde_json::to_value(HighlightsPayload { session_id: conv.id, messages, has_more })
                                    .unwrap_or(Value::Null),
                            ),
                            Err(e) => Self::fail(request_id, RelayError::Internal(e.to_string())),
                        }
                    }
                    None => Self::fail(request_id, RelayError::NotFound("no subscribed session".into())),
                }
            }
            Request::GetTasks(p) => {
                let session_id = p.session_id.or_else(|| handle.client.lock().subscribed_session.clone());
                match session_id.and_then(|id| self.daemon.watcher.get(&id)) {
                    Some(conv) => {
                        let (tasks, current_task) = relay_adapters::parser::tasks(&conv.tail);
                        let tasks = tasks.into_iter().map(|t| TaskEntry { text: t.text, completed: t.completed }).collect();
                        OutboundFrame::ok(
                            "tasks",
                            request_id,
                            serde_json::to_value(TasksPayload { session_id: conv.id, tasks, current_task })
                                .unwrap_or(Value::Null),
                        )
                    }
                    None => Self::fail(request_id, RelayError::NotFound("session not found".into())),
                }
            }
            Request::SwitchSession(p) => {
                handle.client.lock().subscribed_session = Some(p.session_id.clone());
                #[allow(deprecated)]
                self.daemon.watcher.set_active_session(p.session_id);
                OutboundFrame::ok_no_payload("switched_session", request_id)
            }
            Request::SendInput(p) => {
                let session_id = match p.session_id.or_else(|| handle.client.lock().subscribed_session.clone()) {
                    Some(id) => id,
                    None => return Self::fail(request_id, RelayError::NotFound("no session specified".into())),
                };
                let Some(session_name) = self.tmux_session_for(&session_id).await else {
                    return Self::fail(request_id, RelayError::Shell(ShellError::SessionNotFound(session_id.to_string())));
                };
                match send_input(self.daemon.tmux.as_ref(), &session_name, &p.input).await {
                    Ok(_) => OutboundFrame::ok_no_payload("input_sent", request_id),
                    Err(e) => Self::fail(request_id, RelayError::Shell(e)),
                }
            }
            Request::SendImage(p) | Request::UploadImage(p) => match save_image(&p.base64, &p.mime_type) {
                Ok(path) => OutboundFrame::ok("image_saved", request_id, json!({ "path": path })),
                Err(e) => Self::fail(request_id, e),
            },
            Request::SendWithImages(p) => {
                let session_id = handle.client.lock().subscribed_session.clone();
                let Some(session_id) = session_id else {
                    return Self::fail(request_id, RelayError::NotFound("no session specified".into()));
                };
                let Some(session_name) = self.tmux_session_for(&session_id).await else {
                    return Self::fail(request_id, RelayError::Shell(ShellError::SessionNotFound(session_id.to_string())));
                };
                let mut text = p.message;
                for path in &p.image_paths {
                    text.push(' ');
                    text.push_str(path);
                }
                match send_input(self.daemon.tmux.as_ref(), &session_name, &text).await {
                    Ok(_) => OutboundFrame::ok_no_payload("input_sent", request_id),
                    Err(e) => Self::fail(request_id, RelayError::Shell(e)),
                }
            }
            Request::ListTmuxSessions => match self.daemon.tmux.list_sessions().await {
                Ok(sessions) => {
                    let payload = json!({ "sessions": sessions.iter().map(tmux_session_view).collect::<Vec<_>>() });
                    OutboundFrame::ok("tmux_sessions", request_id, payload)
                }
                Err(e) => Self::fail(request_id, RelayError::Shell(e)),
            },
            Request::CreateTmuxSession(p) => {
                let name = p.name.unwrap_or_else(|| relay_core::generate_session_name(Path::new(&p.working_dir)).to_string());
                let working_dir = PathBuf::from(&p.working_dir);
                match self.daemon.tmux.create_session(&name, &working_dir).await {
                    Ok(()) => {
                        let _ = self.daemon.tmux.tag_session(&name).await;
                        if p.start_cli {
                            let session = TmuxSessionName::new(name.clone());
                            let _ = send_input(self.daemon.tmux.as_ref(), &session, &env::cli_command()).await;
                        }
                        self.broadcast_all(Broadcast::TmuxSessionsChanged);
                        OutboundFrame::ok("tmux_session_created", request_id, json!({ "sessionName": name }))
                    }
                    Err(e) => Self::fail(request_id, RelayError::Shell(e)),
                }
            }
            Request::KillTmuxSession(p) => match self.daemon.tmux.kill_session(&p.session_name).await {
                Ok(()) => {
                    self.broadcast_all(Broadcast::TmuxSessionsChanged);
                    OutboundFrame::ok_no_payload("tmux_session_killed", request_id)
                }
                Err(e) => Self::fail(request_id, RelayError::Shell(e)),
            },
            Request::SwitchTmuxSession(p) => {
                #[allow(deprecated)]
                self.daemon.watcher.set_active_session(ConversationId::new(p.session_name));
                OutboundFrame::ok_no_payload("switched_tmux_session", request_id)
            }
            Request::RecreateTmuxSession(p) => {
                let name = p.session_name.unwrap_or_else(|| {
                    self.daemon.config.tmux_session.clone().unwrap_or_else(|| "companion".to_string())
                });
                match self.daemon.tmux.create_session(&name, Path::new(".")).await {
                    Ok(()) => {
                        let _ = self.daemon.tmux.tag_session(&name).await;
                        self.broadcast_all(Broadcast::TmuxSessionsChanged);
                        OutboundFrame::ok("tmux_session_recreated", request_id, json!({ "sessionName": name }))
                    }
                    Err(e) => Self::fail(request_id, RelayError::Shell(e)),
                }
            }
            Request::CreateWorktreeSession(p) => {
                let parent_dir = PathBuf::from(&p.parent_dir);
                let branch = p.branch.unwrap_or_else(|| format!("companion-{}", nanoid::nanoid!(6)));
                let worktree_path = relay_core::WorkGroup::worktree_path(&parent_dir, &branch);
                match self.daemon.tmux.create_worktree(&parent_dir, &worktree_path, &branch).await {
                    Ok(()) => {
                        let session = relay_core::generate_session_name(&worktree_path);
                        match self.daemon.tmux.create_session(session.as_str(), &worktree_path).await {
                            Ok(()) => {
                                let _ = self.daemon.tmux.tag_session(session.as_str()).await;
                                if p.start_cli {
                                    let _ = send_input(self.daemon.tmux.as_ref(), &session, &env::cli_command()).await;
                                }
                                self.broadcast_all(Broadcast::TmuxSessionsChanged);
                                OutboundFrame::ok(
                                    "worktree_session_created",
                                    request_id,
                                    json!({ "sessionName": session.as_str(), "worktreePath": worktree_path, "branch": branch }),
                                )
                            }
                            Err(e) => Self::fail(request_id, RelayError::Shell(e)),
                        }
                    }
                    Err(e) => Self::fail(request_id, RelayError::Shell(e)),
                }
            }
            Request::ListWorktrees(p) => match self.daemon.tmux.list_worktrees(Path::new(&p.dir)).await {
                Ok(worktrees) => OutboundFrame::ok("worktrees", request_id, json!({ "worktrees": worktrees })),
                Err(e) => Self::fail(request_id, RelayError::Shell(e)),
            },
            Request::GetTerminalOutput(p) => {
                let lines = p.lines.unwrap_or(200) as usize;
                match self.daemon.tmux.capture_pane(&p.session_name, lines).await {
                    Ok(output) => OutboundFrame::ok("terminal_output", request_id, json!({ "output": output })),
                    Err(e) => Self::fail(request_id, RelayError::Shell(e)),
                }
            }
            Request::SendTerminalKeys(p) => {
                match self.daemon.tmux.send_raw_keys(&p.session_name, &p.keys).await {
                    Ok(()) => OutboundFrame::ok_no_payload("terminal_keys_sent", request_id),
                    Err(e) => Self::fail(request_id, RelayError::Shell(e)),
                }
            }
            Request::BrowseDirectories(p) => {
                let dir = p.path.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
                match std::fs::read_dir(&dir) {
                    Ok(entries) => {
                        let names: Vec<String> = entries
                            .filter_map(|e| e.ok())
                            .filter(|e| e.path().is_dir())
                            .filter_map(|e| e.file_name().into_string().ok())
                            .collect();
                        OutboundFrame::ok("directories", request_id, json!({ "path": dir, "directories": names }))
                    }
                    Err(e) => Self::fail(request_id, RelayError::FilesystemDenied(e.to_string())),
                }
            }
            Request::ReadFile(p) => match read_guarded_file(&p.path) {
                Ok(contents) => OutboundFrame::ok("file_contents", request_id, json!({ "path": p.path, "contents": contents })),
                Err(e) => Self::fail(request_id, e),
            },
            Request::DownloadFile(p) => match read_guarded_file(&p.path) {
                Ok(contents) => OutboundFrame::ok("file_downloaded", request_id, json!({ "path": p.path, "contents": contents })),
                Err(e) => Self::fail(request_id, e),
            },
            Request::OpenInEditor(p) => {
                let editor = std::env::var("VISUAL").or_else(|_| std::env::var("EDITOR")).unwrap_or_else(|_| "open".to_string());
                match tokio::process::Command::new(editor).arg(&p.path).spawn() {
                    Ok(_) => OutboundFrame::ok_no_payload("opened_in_editor", request_id),
                    Err(e) => Self::fail(request_id, RelayError::Internal(e.to_string())),
                }
            }
            Request::RegisterPush(p) => {
                let now = relay_core::SystemClock.epoch_ms();
                let device = Device::new(p.device_id, p.fcm_token, p.token_type.unwrap_or(relay_core::TokenKind::GatewayA), now);
                self.daemon.notifications.register_device(device);
                OutboundFrame::ok_no_payload("push_registered", request_id)
            }
            Request::UnregisterPush(p) => {
                self.daemon.notifications.remove_device(&p.device_id);
                OutboundFrame::ok_no_payload("push_unregistered", request_id)
            }
            Request::GetEscalationConfig => OutboundFrame::ok(
                "escalation_config",
                request_id,
                serde_json::to_value(self.daemon.notifications.escalation_config()).unwrap_or(Value::Null),
            ),
            Request::UpdateEscalationConfig(partial) => {
                let current = self.daemon.notifications.escalation_config();
                match apply_partial(&current, &partial) {
                    Ok(updated) => {
                        self.daemon.notifications.update_escalation_config(updated.clone());
                        OutboundFrame::ok("escalation_config", request_id, serde_json::to_value(updated).unwrap_or(Value::Null))
                    }
                    Err(e) => Self::fail(request_id, RelayError::InvalidPayload(e.to_string())),
                }
            }
            Request::GetPendingEvents => {
                let events: Vec<Value> = self
                    .daemon
                    .escalation
                    .pending_events()
                    .into_iter()
                    .map(|e| json!({ "sessionId": e.session_id, "eventType": e.event_type, "content": e.content }))
                    .collect();
                OutboundFrame::ok("pending_events", request_id, json!({ "events": events }))
            }
            Request::GetDevices => OutboundFrame::ok(
                "devices",
                request_id,
                serde_json::to_value(DevicesPayload { devices: self.daemon.notifications.devices() }).unwrap_or(Value::Null),
            ),
            Request::RemoveDevice(p) => {
                self.daemon.notifications.remove_device(&p.device_id);
                OutboundFrame::ok_no_payload("device_removed", request_id)
            }
            Request::SetSessionMuted(p) => {
                self.daemon.notifications.set_session_muted(p.session_id.clone(), p.muted);
                self.broadcast(&p.session_id.clone(), Broadcast::SessionMuteChanged { session_id: p.session_id, muted: p.muted });
                OutboundFrame::ok_no_payload("session_mute_changed", request_id)
            }
            Request::GetMutedSessions => {
                OutboundFrame::ok("muted_sessions", request_id, json!({ "sessions": self.daemon.notifications.muted_sessions() }))
            }
            Request::GetNotificationHistory(p) => {
                OutboundFrame::ok("notification_history", request_id, json!({ "history": self.daemon.notifications.history(p.limit) }))
            }
            Request::ClearNotificationHistory => {
                self.daemon.notifications.clear_history();
                OutboundFrame::ok_no_payload("notification_history_cleared", request_id)
            }
            Request::SendTestNotification => {
                self.daemon.escalation.record_event(
                    ConversationId::new("test"),
                    "test".to_string(),
                    EventType::ErrorDetected,
                    "this is a test notification".to_string(),
                );
                OutboundFrame::ok_no_payload("test_notification_sent", request_id)
            }
            Request::AcknowledgeSession(p) => {
                self.daemon.escalation.acknowledge_session(&p.session_id);
                OutboundFrame::ok_no_payload("session_acknowledged", request_id)
            }
            Request::SpawnWorkGroup(p) => {
                let specs: Vec<WorkerSpec> = p
                    .workers
                    .into_iter()
                    .map(|w| WorkerSpec {
                        task_slug: w.task_slug,
                        task_description: w.task_description,
                        plan_section: w.plan_section,
                        files: w.files,
                    })
                    .collect();
                let group_slug = p.name.to_ascii_lowercase().replace(' ', "-");
                match self
                    .daemon
                    .workgroups
                    .spawn(
                        p.name,
                        p.foreman_session_id,
                        TmuxSessionName::new(p.foreman_tmux_session),
                        PathBuf::from(&p.parent_dir),
                        p.plan_file.map(PathBuf::from),
                        relay_core::MergeStrategy::default(),
                        &group_slug,
                        specs,
                    )
                    .await
                {
                    Ok(id) => {
                        if let Some(group) = self.daemon.workgroups.get(&id) {
                            self.broadcast_all(Broadcast::WorkGroupUpdate { group_id: id, group: work_group_view(&group) });
                        }
                        OutboundFrame::ok("work_group_spawned", request_id, json!({ "groupId": id }))
                    }
                    Err(e) => Self::fail(request_id, RelayError::WorkGroup(e)),
                }
            }
            Request::GetWorkGroups => OutboundFrame::ok(
                "work_groups",
                request_id,
                serde_json::to_value(WorkGroupListPayload {
                    groups: self.daemon.workgroups.list().iter().map(work_group_view).collect(),
                })
                .unwrap_or(Value::Null),
            ),
            Request::GetWorkGroup(p) => match self.daemon.workgroups.get(&p.group_id) {
                Some(group) => OutboundFrame::ok("work_group", request_id, serde_json::to_value(work_group_view(&group)).unwrap_or(Value::Null)),
                None => Self::fail(request_id, RelayError::WorkGroup(WorkGroupError::NotFound)),
            },
            Request::MergeWorkGroup(p) => match self.daemon.workgroups.merge(&p.group_id).await {
                Ok(commit) => {
                    if let Some(group) = self.daemon.workgroups.get(&p.group_id) {
                        self.broadcast_all(Broadcast::WorkGroupUpdate { group_id: p.group_id, group: work_group_view(&group) });
                    }
                    OutboundFrame::ok("work_group_merged", request_id, json!({ "mergeCommit": commit }))
                }
                Err(e) => {
                    if let Some(group) = self.daemon.workgroups.get(&p.group_id) {
                        self.broadcast_all(Broadcast::WorkGroupUpdate { group_id: p.group_id, group: work_group_view(&group) });
                    }
                    Self::fail(request_id, RelayError::WorkGroup(e))
                }
            },
            Request::CancelWorkGroup(p) => match self.daemon.workgroups.cancel(&p.group_id).await {
                Ok(()) => {
                    if let Some(group) = self.daemon.workgroups.get(&p.group_id) {
                        self.broadcast_all(Broadcast::WorkGroupUpdate { group_id: p.group_id, group: work_group_view(&group) });
                    }
                    OutboundFrame::ok_no_payload("work_group_cancelled", request_id)
                }
                Err(e) => Self::fail(request_id, RelayError::WorkGroup(e)),
            },
            Request::RetryWorker(p) => match self.daemon.workgroups.retry_worker(&p.group_id, &p.worker_id) {
                Ok(session) => OutboundFrame::ok("worker_retried", request_id, json!({ "sessionName": session })),
                Err(e) => Self::fail(request_id, RelayError::WorkGroup(e)),
            },
            Request::SendWorkerInput(p) => {
                let Some(group) = self.daemon.workgroups.get(&p.group_id) else {
                    return Self::fail(request_id, RelayError::WorkGroup(WorkGroupError::NotFound));
                };
                let Some(worker) = group.workers.iter().find(|w| w.id == p.worker_id) else {
                    return Self::fail(request_id, RelayError::WorkGroup(WorkGroupError::WorkerNotFound));
                };
                match send_input(self.daemon.tmux.as_ref(), &worker.tmux_session, &p.text).await {
                    Ok(_) => OutboundFrame::ok_no_payload("worker_input_sent", request_id),
                    Err(e) => Self::fail(request_id, RelayError::Shell(e)),
                }
            }
            Request::DismissWorkGroup(p) => match self.daemon.workgroups.dismiss(&p.group_id) {
                Ok(()) => OutboundFrame::ok_no_payload("work_group_dismissed", request_id),
                Err(e) => Self::fail(request_id, RelayError::WorkGroup(e)),
            },
            Request::Ping => OutboundFrame::ok("pong", request_id, json!({ "version": env::PROTOCOL_VERSION })),
            Request::RotateToken => {
                let mut config = self.daemon_config_snapshot();
                match config.rotate_token(&listener.host, listener.port) {
                    Some(new_token) => {
                        if let Ok(state_dir) = env::state_dir() {
                            let _ = config.save(&state_dir);
                        }
                        self.invalidate_other_tokens(listener.port, handle.client.lock().id);
                        OutboundFrame::ok(
                            "token_rotated",
                            request_id,
                            serde_json::to_value(RotateTokenPayload { token: new_token }).unwrap_or(Value::Null),
                        )
                    }
                    None => Self::fail(request_id, RelayError::NotFound("listener not found".into())),
                }
            }
            Request::GetToolConfig => {
                OutboundFrame::ok("tool_config", request_id, json!({ "autoApproveTools": self.daemon.config.auto_approve_tools }))
            }
            Request::GetUsage => {
                let session_id = handle.client.lock().subscribed_session.clone();
                let messages = match session_id.and_then(|id| self.daemon.watcher.get(&id)) {
                    Some(conv) => conv.tail,
                    None => Vec::new(),
                };
                let usage = relay_adapters::usage_totals(&messages);
                OutboundFrame::ok("usage", request_id, serde_json::to_value(usage).unwrap_or(Value::Null))
            }
            Request::SetAutoApprove(p) => {
                self.auto_approve.lock().insert(p.session_id, p.enabled);
                OutboundFrame::ok_no_payload("auto_approve_set", request_id)
            }
            Request::GetOrphanedWorktrees => {
                let repo_dirs: Vec<PathBuf> = self
                    .daemon
                    .workgroups
                    .list()
                    .iter()
                    .map(|g| g.parent_dir.clone())
                    .collect();
                let worktrees = self.daemon.workgroups.orphaned_worktrees(&repo_dirs).await;
                OutboundFrame::ok(
                    "orphaned_worktrees",
                    request_id,
                    serde_json::to_value(OrphanedWorktreesPayload { worktrees }).unwrap_or(Value::Null),
                )
            }
        }
    }

    fn daemon_config_snapshot(&self) -> crate::config::DaemonConfig {
        self.daemon.config.clone()
    }

    /// Resolve a conversation id to the tmux session it's currently live
    /// in: list live sessions and find the tagged one whose working
    /// directory encodes to `session_id`, the same match
    /// `ConversationWatcher::reconcile_with_tmux` uses to decide whether a
    /// conversation is still live. Conversations with no matching tagged
    /// session (demoted, or never had one) resolve to `None`.
    async fn tmux_session_for(&self, session_id: &ConversationId) -> Option<TmuxSessionName> {
        self.daemon.watcher.get(session_id)?;
        let sessions = self.daemon.tmux.list_sessions().await.ok()?;
        relay_core::tmux_session_matching(&sessions, session_id).map(|s| s.name.clone())
    }
}

fn session_summary(conv: relay_core::Conversation) -> SessionSummary {
    SessionSummary {
        session_id: conv.id,
        display_name: conv.display_name,
        status: conv.status,
        last_activity: conv
            .last_activity
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0),
        project_path: conv.project_path,
    }
}

fn worker_view(worker: &relay_core::Worker) -> WorkerView {
    WorkerView {
        worker_id: worker.id,
        task_slug: worker.task_slug.clone(),
        task_description: worker.task_description.clone(),
        status: worker.status,
        last_activity: worker.last_activity.clone(),
        last_question: worker.last_question.clone(),
        commits: worker.commits.clone(),
        error: worker.error.clone(),
    }
}

fn work_group_view(group: &relay_core::WorkGroup) -> WorkGroupView {
    WorkGroupView {
        group_id: group.id,
        name: group.name.clone(),
        status: group.status,
        merge_strategy: group.merge_strategy,
        workers: group.workers.iter().map(worker_view).collect(),
        merge_commit: group.merge_commit.clone(),
        error: group.error.clone(),
    }
}

fn tmux_session_view(session: &relay_core::TmuxSession) -> Value {
    json!({
        "name": session.name,
        "attached": session.attached,
        "workingDir": session.working_dir,
        "tagged": session.tagged,
    })
}

/// Merge-patch `partial` over `current`'s serialized form, then parse the
/// result back into a full [`relay_core::EscalationConfig`] — the same
/// JSON merge-patch shape every other partial update in this wire protocol
/// uses.
fn apply_partial(
    current: &relay_core::EscalationConfig,
    partial: &Value,
) -> Result<relay_core::EscalationConfig, serde_json::Error> {
    let mut merged = serde_json::to_value(current)?;
    if let (Some(base), Some(patch)) = (merged.as_object_mut(), partial.as_object()) {
        for (key, value) in patch {
            base.insert(key.clone(), value.clone());
        }
    }
    serde_json::from_value(merged)
}

/// Guard against path traversal and oversized reads for `read_file` /
/// `download_file`: the path must resolve to an allow-listed extension and
/// fit under [`env::max_download_bytes`].
fn read_guarded_file(path: &str) -> Result<String, RelayError> {
    let path = PathBuf::from(path);
    let canonical = path.canonicalize().map_err(|e| RelayError::FilesystemDenied(format!("{}: {e}", path.display())))?;
    let ext = canonical.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase();
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(RelayError::FilesystemDenied(canonical.display().to_string()));
    }
    let meta = std::fs::metadata(&canonical).map_err(|e| RelayError::FilesystemDenied(e.to_string()))?;
    if meta.len() > env::max_download_bytes() {
        return Err(RelayError::FilesystemTooLarge(canonical.display().to_string()));
    }
    std::fs::read_to_string(&canonical).map_err(|e| RelayError::FilesystemDenied(e.to_string()))
}

/// Decode and write a base64 image payload to the system temp dir, the way
/// the wire's image-upload verbs describe. Returns the written path.
fn save_image(base64_data: &str, mime_type: &str) -> Result<PathBuf, RelayError> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    let ext = mime_type.split('/').next_back().unwrap_or("png");
    let bytes = STANDARD.decode(base64_data).map_err(|e| RelayError::InvalidPayload(e.to_string()))?;
    let now = relay_core::SystemClock.epoch_ms();
    let path = std::env::temp_dir().join(format!("companion-{now}.{ext}"));
    std::fs::write(&path, bytes).map_err(|e| RelayError::Internal(e.to_string()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_partial_overrides_only_named_fields() {
        let current = relay_core::EscalationConfig::default();
        let patch = json!({ "pushDelaySeconds": current.push_delay_seconds, "rateLimitSeconds": 120 });
        let updated = apply_partial(&current, &patch).unwrap();
        assert_eq!(updated.rate_limit_seconds, 120);
        assert_eq!(updated.waiting_for_input, current.waiting_for_input);
    }

    #[test]
    fn save_image_decodes_and_writes_payload() {
        // "hi" base64-encodes to "aGk="
        let path = save_image("aGk=", "image/png").unwrap();
        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, b"hi");
        let _ = std::fs::remove_file(&path);
    }
}
