// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persists escalation config, registered devices, and notification history
//! to a single JSON file, debouncing writes so a burst of updates (several
//! events acknowledged in a row) collapses into one flush.
//!
//! Deliberately plain `serde_json` + atomic write-then-rename, not a
//! write-ahead log or a compressed snapshot: these are a few kilobytes of
//! state, not the event stream itself, so the WAL/snapshot machinery a
//! durable event store would need is unwarranted here.

use relay_core::{Device, DeviceId, EscalationConfig, NotificationHistoryEntry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const DEBOUNCE: std::time::Duration = std::time::Duration::from_secs(3);
const MAX_HISTORY: usize = 500;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    escalation: EscalationConfig,
    #[serde(default)]
    devices: Vec<Device>,
    #[serde(default)]
    history: VecDeque<NotificationHistoryEntry>,
}

struct Inner {
    state: PersistedState,
    next_history_id: u64,
}

pub struct NotificationStore {
    path: PathBuf,
    inner: parking_lot::Mutex<Inner>,
    dirty: Notify,
}

impl NotificationStore {
    pub fn path(state_dir: &Path) -> PathBuf {
        state_dir.join("notifications.json")
    }

    pub fn load_or_init(state_dir: &Path) -> std::io::Result<Self> {
        let path = Self::path(state_dir);
        let state = match std::fs::read_to_string(&path) {
            Ok(raw) => Self::parse_with_migration(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(e) => return Err(e),
        };
        let next_history_id = state.history.iter().map(|h| h.id).max().unwrap_or(0) + 1;
        let store = Self { path, inner: parking_lot::Mutex::new(Inner { state, next_history_id }), dirty: Notify::new() };
        store.flush_now()?;
        Ok(store)
    }

    /// Parse the persisted file, migrating the legacy schema (a top-level
    /// `rules` field, predating the per-event-type `EscalationConfig`) by
    /// resetting escalation policy to the current default while preserving
    /// devices and muted sessions.
    fn parse_with_migration(raw: &str) -> PersistedState {
        let Ok(value) = serde_json::from_str::<Value>(raw) else {
            warn!("notification store file is not valid JSON; starting fresh");
            return PersistedState::default();
        };
        if value.get("rules").is_some() {
            warn!("migrating legacy notification store schema");
            let mut escalation = EscalationConfig::default();
            if let Some(muted) = value.get("mutedSessions").and_then(Value::as_array) {
                for id in muted.iter().filter_map(Value::as_str) {
                    escalation.muted_sessions.insert(relay_core::ConversationId::new(id));
                }
            }
            let devices = value
                .get("devices")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default();
            return PersistedState { escalation, devices, history: VecDeque::new() };
        }
        serde_json::from_value(value).unwrap_or_default()
    }

    fn flush_now(&self) -> std::io::Result<()> {
        let body = {
            let inner = self.inner.lock();
            serde_json::to_string_pretty(&inner.state)?
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(body.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn mark_dirty(&self) {
        self.dirty.notify_one();
    }

    /// Spawn the debounced flush loop. Flushes once immediately on
    /// cancellation so a clean shutdown never drops the last burst of
    /// changes.
    pub async fn run_flush_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = self.flush_now() {
                        warn!(error = %e, "failed to flush notification store on shutdown");
                    }
                    break;
                }
                _ = self.dirty.notified() => {
                    tokio::select! {
                        _ = tokio::time::sleep(DEBOUNCE) => {}
                        _ = cancel.cancelled() => {
                            if let Err(e) = self.flush_now() {
                                warn!(error = %e, "failed to flush notification store on shutdown");
                            }
                            break;
                        }
                    }
                    if let Err(e) = self.flush_now() {
                        warn!(error = %e, "failed to flush notification store");
                    }
                }
            }
        }
    }

    pub fn escalation_config(&self) -> EscalationConfig {
        self.inner.lock().state.escalation.clone()
    }

    pub fn update_escalation_config(&self, config: EscalationConfig) {
        self.inner.lock().state.escalation = config;
        self.mark_dirty();
    }

    pub fn set_session_muted(&self, session_id: relay_core::ConversationId, muted: bool) {
        let mut inner = self.inner.lock();
        if muted {
            inner.state.escalation.muted_sessions.insert(session_id);
        } else {
            inner.state.escalation.muted_sessions.remove(&session_id);
        }
        drop(inner);
        self.mark_dirty();
    }

    pub fn muted_sessions(&self) -> Vec<relay_core::ConversationId> {
        self.inner.lock().state.escalation.muted_sessions.iter().cloned().collect()
    }

    pub fn devices(&self) -> Vec<Device> {
        self.inner.lock().state.devices.clone()
    }

    pub fn register_device(&self, device: Device) {
        let mut inner = self.inner.lock();
        inner.state.devices.retain(|d| d.id != device.id);
        inner.state.devices.push(device);
        drop(inner);
        self.mark_dirty();
    }

    pub fn remove_device(&self, device_id: &DeviceId) {
        self.inner.lock().state.devices.retain(|d| &d.id != device_id);
        self.mark_dirty();
    }

    pub fn push_history(&self, mut entry: NotificationHistoryEntry) {
        let mut inner = self.inner.lock();
        entry.id = inner.next_history_id;
        inner.next_history_id += 1;
        inner.state.history.push_back(entry);
        while inner.state.history.len() > MAX_HISTORY {
            inner.state.history.pop_front();
        }
        drop(inner);
        self.mark_dirty();
    }

    pub fn history(&self, limit: Option<usize>) -> Vec<NotificationHistoryEntry> {
        let inner = self.inner.lock();
        let limit = limit.unwrap_or(inner.state.history.len()).min(inner.state.history.len());
        inner.state.history.iter().rev().take(limit).cloned().collect()
    }

    pub fn clear_history(&self) {
        self.inner.lock().state.history.clear();
        self.mark_dirty();
    }
}
