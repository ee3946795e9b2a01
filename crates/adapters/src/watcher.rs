// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Polls the CLI's on-disk log tree and tmux for changes, and owns the
//! authoritative in-memory table of known conversations.
//!
//! Two nested poll periods, not an inotify watch: a fast tick re-reads the
//! tail of each known conversation's current log file, and a slower tick
//! walks the log tree for brand-new conversations and cross-references tmux
//! for sessions that have gone away. Poll-based because the CLI's log
//! directory can live on a network mount where inotify is unreliable, and
//! because the fast tick is cheap (an incremental `SessionLogParser::tail`
//! call per conversation, not a full re-read).

use parking_lot::{Mutex, RwLock};
use relay_core::{tmux_session_matching, Conversation, ConversationId, MessageRole, SessionStatus, TmuxSession};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::parser::{self, SessionLogParser};
use crate::tmux::TmuxAdapter;

/// Default fast tail-check period. Overridden by `RELAY_WATCHER_POLL_MS`.
pub const DEFAULT_FAST_POLL_MS: u64 = 500;
/// Default full-tree rescan period. Overridden by `RELAY_WATCHER_RESCAN_MS`.
pub const DEFAULT_SLOW_RESCAN_MS: u64 = 3_000;

fn env_duration_ms(var: &str, default_ms: u64) -> Duration {
    let ms = std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default_ms);
    Duration::from_millis(ms)
}

/// A change notification from the watcher. Carries no payload beyond the
/// affected conversation id; subscribers fetch the current snapshot via
/// [`ConversationWatcher::get`] rather than racing against a stale copy
/// bundled in the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A conversation's log grew and was re-parsed.
    Updated(ConversationId),
    /// A conversation directory appeared that wasn't previously known.
    Discovered(ConversationId),
    /// No tagged tmux session matches this conversation's project directory
    /// anymore. The conversation's history remains queryable; only its
    /// "live" affordances (send-input, tailing a pane) should be treated as
    /// unavailable until a session reappears.
    Demoted(ConversationId),
    /// Derived status changed since the last observation.
    StatusChange(ConversationId, SessionStatus),
    /// A tool-result carried an error marker or the assistant turn ended in
    /// a failure pattern. Carries a short preview of the failing content.
    ErrorDetected(ConversationId, String),
    /// The CLI's terminal "done" signal was observed on the assistant turn.
    SessionCompleted(ConversationId),
    /// The CLI's history-compaction marker appeared in the log.
    Compaction(ConversationId),
}

/// The CLI emits this `stop_reason` on the assistant turn that closes out a
/// unit of work; distinct from `waiting_for_input`, which asks for more.
const SESSION_COMPLETED_MARKER: &str = "session_completed";

#[derive(Debug, Clone, Copy, Default)]
pub struct ServerSummary {
    pub conversation_count: usize,
    pub tagged_tmux_sessions: usize,
}

pub struct ConversationWatcher {
    logs_root: PathBuf,
    tmux: Arc<dyn TmuxAdapter>,
    state: RwLock<HashMap<ConversationId, Conversation>>,
    parsers: Mutex<HashMap<ConversationId, SessionLogParser>>,
    events: broadcast::Sender<WatchEvent>,
    fast_poll: Duration,
    slow_rescan: Duration,
    /// Deprecated single-session pointer kept for clients that predate
    /// multi-session subscriptions. New code should subscribe with an
    /// explicit session filter instead.
    active_session: Mutex<Option<ConversationId>>,
}

impl ConversationWatcher {
    pub fn new(logs_root: PathBuf, tmux: Arc<dyn TmuxAdapter>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            logs_root,
            tmux,
            state: RwLock::new(HashMap::new()),
            parsers: Mutex::new(HashMap::new()),
            events,
            fast_poll: env_duration_ms("RELAY_WATCHER_POLL_MS", DEFAULT_FAST_POLL_MS),
            slow_rescan: env_duration_ms("RELAY_WATCHER_RESCAN_MS", DEFAULT_SLOW_RESCAN_MS),
            active_session: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    pub fn get(&self, id: &ConversationId) -> Option<Conversation> {
        self.state.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Conversation> {
        self.state.read().values().cloned().collect()
    }

    /// Summarize known conversations, optionally filtered to those with a
    /// live matching tagged tmux session — per `spec.md`'s
    /// `getServerSummary(tmuxSessions?)`, supplying `tmux_sessions` hides
    /// conversations without a live pane from the count.
    pub fn server_summary(&self, tmux_sessions: Option<&[TmuxSession]>) -> ServerSummary {
        let state = self.state.read();
        match tmux_sessions {
            None => ServerSummary { conversation_count: state.len(), tagged_tmux_sessions: 0 },
            Some(sessions) => {
                let tagged_count = sessions.iter().filter(|s| s.tagged).count();
                let conversation_count =
                    state.values().filter(|c| tmux_session_matching(sessions, &c.id).is_some()).count();
                ServerSummary { conversation_count, tagged_tmux_sessions: tagged_count }
            }
        }
    }

    /// The conversations matching `server_summary`'s filtering rule, for
    /// callers that need the full records rather than just counts (the
    /// `get_server_summary` wire handler).
    pub fn list_matching_tmux(&self, tmux_sessions: Option<&[TmuxSession]>) -> Vec<Conversation> {
        let state = self.state.read();
        match tmux_sessions {
            None => state.values().cloned().collect(),
            Some(sessions) => state
                .values()
                .filter(|c| tmux_session_matching(sessions, &c.id).is_some())
                .cloned()
                .collect(),
        }
    }

    #[deprecated(note = "use an explicit session filter on subscribe instead")]
    pub fn set_active_session(&self, id: ConversationId) {
        *self.active_session.lock() = Some(id);
    }

    #[deprecated(note = "use an explicit session filter on subscribe instead")]
    pub fn clear_active_session(&self) {
        *self.active_session.lock() = None;
    }

    #[allow(deprecated)]
    pub fn active_session(&self) -> Option<ConversationId> {
        self.active_session.lock().clone()
    }

    /// Run one rescan-and-tail cycle outside the poll loop. Exposed for
    /// callers that need a deterministic snapshot without waiting on
    /// `fast_poll`/`slow_rescan` timers (tests, and work-group reconciliation
    /// that wants the freshest state rather than whatever the last tick saw).
    #[cfg(any(test, feature = "test-support"))]
    pub async fn rescan_and_tail(&self) {
        self.rescan_tree().await;
        self.tail_known_conversations().await;
    }

    /// Run the poll loop until `cancel` fires. Intended to be spawned once
    /// as a long-lived background task.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut fast = tokio::time::interval(self.fast_poll);
        let mut slow = tokio::time::interval(self.slow_rescan);
        // Run one full rescan immediately so the table isn't empty while we
        // wait for the first slow tick.
        self.rescan_tree().await;
        self.reconcile_with_tmux().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("conversation watcher shutting down");
                    break;
                }
                _ = fast.tick() => {
                    self.tail_known_conversations().await;
                }
                _ = slow.tick() => {
                    self.rescan_tree().await;
                    self.reconcile_with_tmux().await;
                }
            }
        }
    }

    async fn tail_known_conversations(&self) {
        let ids: Vec<ConversationId> = self.state.read().keys().cloned().collect();
        for id in ids {
            let Some(last_log) = self.state.read().get(&id).and_then(|c| c.log_files.last().cloned())
            else {
                continue;
            };
            match self.tail_one(&id, &last_log).await {
                Ok(events) => {
                    for event in events {
                        let _ = self.events.send(event);
                    }
                }
                Err(e) => warn!(session = %id, error = %e, "failed to tail conversation log"),
            }
        }
    }

    /// Re-read `path` from the last known offset, fold any new messages into
    /// the conversation's tail, and return every event the update implies:
    /// always `Updated` when bytes were consumed, `StatusChange` when the
    /// derived status moved, and the dedicated `ErrorDetected` /
    /// `SessionCompleted` / `Compaction` events for whichever new messages
    /// trip those markers.
    async fn tail_one(&self, id: &ConversationId, path: &Path) -> std::io::Result<Vec<WatchEvent>> {
        let path = path.to_path_buf();
        let new_messages = {
            let mut parsers = self.parsers.lock();
            let parser = parsers.entry(id.clone()).or_default();
            parser.tail(&path)?
        };
        if new_messages.is_empty() {
            return Ok(Vec::new());
        }

        let mut events = vec![WatchEvent::Updated(id.clone())];
        let mut completed = false;
        for msg in &new_messages {
            if msg.carries_error() {
                let preview = match &msg.content {
                    relay_core::MessageContent::Text(t) => t.clone(),
                    relay_core::MessageContent::Blocks(_) => "tool result reported an error".to_string(),
                };
                events.push(WatchEvent::ErrorDetected(id.clone(), preview));
            }
            if msg.role == MessageRole::Assistant && msg.stop_reason.as_deref() == Some(SESSION_COMPLETED_MARKER) {
                events.push(WatchEvent::SessionCompleted(id.clone()));
                completed = true;
            }
            if msg.role == MessageRole::SystemNotice {
                if let relay_core::MessageContent::Text(text) = &msg.content {
                    if text.to_ascii_lowercase().contains("compact") {
                        events.push(WatchEvent::Compaction(id.clone()));
                    }
                }
            }
        }

        let mut state = self.state.write();
        if let Some(conv) = state.get_mut(id) {
            let previous_status = conv.status;
            conv.completed = conv.completed || completed;
            conv.tail.extend(new_messages);
            // Keep only a bounded tail in memory; full history is
            // reconstructed on demand from `log_files` via `parser::parse_file`.
            let keep_from = conv.tail.len().saturating_sub(500);
            conv.tail.drain(..keep_from);
            conv.status = parser::derive_status(&conv.tail);
            conv.last_activity = SystemTime::now();
            if conv.status != previous_status {
                events.push(WatchEvent::StatusChange(id.clone(), conv.status));
            }
        }
        Ok(events)
    }

    async fn rescan_tree(&self) {
        let root = self.logs_root.clone();
        let entries = match tokio::task::spawn_blocking(move || scan_log_directories(&root)).await {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => {
                warn!(error = %e, "failed to scan conversation log tree");
                return;
            }
            Err(e) => {
                warn!(error = %e, "log tree scan task panicked");
                return;
            }
        };

        for (id, log_files) in entries {
            let is_new = !self.state.read().contains_key(&id);
            {
                let mut state = self.state.write();
                let conv = state.entry(id.clone()).or_insert_with(|| Conversation {
                    id: id.clone(),
                    // Best-effort: the on-disk directory name is the CLI's
                    // own path-encoding of the project directory, which
                    // isn't reversible (both `/` and `_` collapse to `-`).
                    // A real path isn't persisted anywhere we can read, so
                    // the encoded id is the closest display name available
                    // until the first log line names the project itself.
                    display_name: id.as_str().to_string(),
                    project_path: PathBuf::from(id.as_str()),
                    log_files: Vec::new(),
                    status: relay_core::SessionStatus::Idle,
                    last_activity: SystemTime::now(),
                    tail: Vec::new(),
                    completed: false,
                });
                conv.log_files = log_files;
            }
            if is_new {
                let _ = self.events.send(WatchEvent::Discovered(id));
            }
        }
    }

    /// A conversation's directory name on disk already *is* the CLI's
    /// encoded project path, so matching it against a live tmux session
    /// can't decode the id back into a real path (the encoding collapses
    /// both `/` and `_` into `-` and is one-way); instead each tagged
    /// session's real working directory is re-encoded with the same
    /// function and compared as a string against the conversation id. Any
    /// match along the way also tells us the conversation's *real* project
    /// path for the first time, which is recorded on the conversation.
    async fn reconcile_with_tmux(&self) {
        let sessions = match self.tmux.list_sessions().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to list tmux sessions for reconciliation");
                return;
            }
        };

        let ids: Vec<ConversationId> = self.state.read().keys().cloned().collect();
        for id in ids {
            match tmux_session_matching(&sessions, &id) {
                Some(session) => {
                    let mut state = self.state.write();
                    if let Some(conv) = state.get_mut(&id) {
                        conv.project_path = session.working_dir.clone();
                    }
                }
                None => {
                    let _ = self.events.send(WatchEvent::Demoted(id));
                }
            }
        }
    }
}

/// Walk `root` for per-project subdirectories, each holding one or more
/// `*.jsonl` log files in chain order (oldest first, by filename — the CLI
/// names rotated logs so lexicographic order matches chronological order).
fn scan_log_directories(root: &Path) -> std::io::Result<Vec<(ConversationId, Vec<PathBuf>)>> {
    let mut results = Vec::new();
    if !root.exists() {
        return Ok(results);
    }
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let dir_name = entry.file_name().to_string_lossy().to_string();
        let mut files: Vec<PathBuf> = std::fs::read_dir(entry.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("jsonl"))
            .collect();
        if files.is_empty() {
            continue;
        }
        files.sort();
        results.push((ConversationId::new(dir_name), files));
    }
    Ok(results)
}
