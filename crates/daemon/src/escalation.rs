// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Two-tier escalation: every enabled event broadcasts in-app immediately,
//! then (unless acknowledged first) escalates to a push notification after
//! `push_delay_seconds`, subject to per-session rate limiting and quiet
//! hours.
//!
//! One background task owns the pending-event table and wakes on the
//! nearest deadline rather than spawning a sleep task per event — the same
//! shape as a timer wheel, sized for the handful of concurrently-pending
//! events a single developer's sessions produce.

use chrono::{Local, TimeZone, Timelike};
use relay_core::{
    truncate_preview, Clock, ConversationId, EscalationConfig, EventType, NotificationHistoryEntry,
    NotificationTier, PendingEvent,
};
use relay_adapters::PushSender;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::notifications::NotificationStore;

/// An event that just happened and is enabled for escalation, handed to the
/// hub so it can broadcast the in-app (`Browser` tier) notification
/// immediately. The push tier, if it fires, is handled entirely inside the
/// engine.
#[derive(Debug, Clone)]
pub struct EscalationEvent {
    pub session_id: ConversationId,
    pub session_name: String,
    pub event_type: EventType,
    pub content: String,
}

pub struct EscalationEngine<C: Clock> {
    clock: C,
    store: Arc<NotificationStore>,
    push_sender: Arc<dyn PushSender>,
    pending: parking_lot::Mutex<HashMap<(ConversationId, EventType), PendingEvent>>,
    rate_limited_until: parking_lot::Mutex<HashMap<ConversationId, Instant>>,
    wake: Notify,
    immediate_tx: mpsc::UnboundedSender<EscalationEvent>,
}

impl<C: Clock + 'static> EscalationEngine<C> {
    pub fn new(
        clock: C,
        store: Arc<NotificationStore>,
        push_sender: Arc<dyn PushSender>,
    ) -> (Self, mpsc::UnboundedReceiver<EscalationEvent>) {
        let (immediate_tx, immediate_rx) = mpsc::unbounded_channel();
        let engine = Self {
            clock,
            store,
            push_sender,
            pending: parking_lot::Mutex::new(HashMap::new()),
            rate_limited_until: parking_lot::Mutex::new(HashMap::new()),
            wake: Notify::new(),
            immediate_tx,
        };
        (engine, immediate_rx)
    }

    /// Record that `event_type` just happened for `session_id`. No-op if
    /// that event type is disabled or the session is muted. If a pending
    /// event for this `(session_id, event_type)` already exists, its content
    /// and push deadline are updated in place and nothing is re-broadcast —
    /// per the invariant that at most one pending event exists per key.
    /// Otherwise broadcasts the in-app tier immediately (via the channel
    /// handed back from `new`) and schedules the push tier for
    /// `push_delay_seconds` from now.
    pub fn record_event(
        &self,
        session_id: ConversationId,
        session_name: String,
        event_type: EventType,
        content: String,
    ) {
        let config = self.store.escalation_config();
        if !config.enabled_for(event_type) || config.muted_sessions.contains(&session_id) {
            return;
        }

        let now = self.clock.now();
        let deadline = now + Duration::from_secs(config.push_delay_seconds);
        let key = (session_id.clone(), event_type);
        let mut pending = self.pending.lock();
        if let Some(existing) = pending.get_mut(&key) {
            existing.content = content;
            existing.push_deadline = deadline;
            self.wake.notify_one();
            return;
        }
        pending.insert(
            key,
            PendingEvent {
                session_id: session_id.clone(),
                session_name: session_name.clone(),
                event_type,
                content: content.clone(),
                first_seen: now,
                push_deadline: deadline,
            },
        );
        drop(pending);

        let _ = self.immediate_tx.send(EscalationEvent { session_id: session_id.clone(), session_name: session_name.clone(), event_type, content: content.clone() });
        self.store.push_history(NotificationHistoryEntry {
            id: 0,
            timestamp: self.clock.epoch_ms(),
            event_type,
            session_id: Some(session_id),
            session_name: Some(session_name),
            preview: truncate_preview(&content, 200),
            tier: NotificationTier::Browser,
            acknowledged: false,
        });
        self.wake.notify_one();
    }

    /// Cancel a pending push for `(session_id, event_type)` — e.g. the user
    /// already acted on it in-app before the push deadline arrived.
    pub fn ack_event(&self, session_id: &ConversationId, event_type: EventType) {
        self.pending.lock().remove(&(session_id.clone(), event_type));
    }

    /// Cancel every pending push for `session_id`, regardless of event type —
    /// the wire-level counterpart a client calls once it has looked at a
    /// session, rather than acking one event type at a time.
    pub fn acknowledge_session(&self, session_id: &ConversationId) {
        self.pending.lock().retain(|(id, _), _| id != session_id);
    }

    pub fn pending_events(&self) -> Vec<PendingEvent> {
        self.pending.lock().values().cloned().collect()
    }

    fn take_due(&self) -> Vec<PendingEvent> {
        let now = self.clock.now();
        let mut pending = self.pending.lock();
        let due_keys: Vec<(ConversationId, EventType)> =
            pending.iter().filter(|(_, e)| e.push_deadline <= now).map(|(k, _)| k.clone()).collect();
        due_keys.iter().filter_map(|k| pending.remove(k)).collect()
    }

    async fn deliver_push(&self, event: PendingEvent) {
        let config = self.store.escalation_config();
        if config.muted_sessions.contains(&event.session_id) {
            return;
        }
        if Self::in_quiet_hours(&config, self.clock.epoch_ms()) {
            debug!(session = %event.session_id, "push suppressed by quiet hours");
            return;
        }
        {
            let mut rate_limited = self.rate_limited_until.lock();
            if let Some(until) = rate_limited.get(&event.session_id) {
                if *until > self.clock.now() {
                    debug!(session = %event.session_id, "push suppressed by rate limit");
                    return;
                }
            }
            rate_limited
                .insert(event.session_id.clone(), self.clock.now() + Duration::from_secs(config.rate_limit_seconds));
        }

        let devices = self.store.devices();
        if devices.is_empty() {
            return;
        }
        let preview = truncate_preview(&event.content, 200);
        let outcomes = self.push_sender.send_to_all_devices(&devices, &event.session_name, &preview).await;
        let delivered = outcomes.iter().any(|o| o.result.is_ok());
        self.store.push_history(NotificationHistoryEntry {
            id: 0,
            timestamp: self.clock.epoch_ms(),
            event_type: event.event_type,
            session_id: Some(event.session_id),
            session_name: Some(event.session_name),
            preview,
            tier: if delivered { NotificationTier::Push } else { NotificationTier::Browser },
            acknowledged: false,
        });
    }

    fn in_quiet_hours(config: &EscalationConfig, epoch_ms: u64) -> bool {
        match Local.timestamp_millis_opt(epoch_ms as i64).single() {
            Some(dt) => config.quiet_hours.contains((dt.hour() as u8, dt.minute() as u8)),
            None => false,
        }
    }

    /// Run the deadline-scheduling loop until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let next_deadline = { self.pending.lock().values().map(|e| e.push_deadline).min() };
            match next_deadline {
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.wake.notified() => {}
                    }
                }
                Some(deadline) => {
                    let sleep_for = deadline.saturating_duration_since(self.clock.now());
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep(sleep_for) => {
                            for event in self.take_due() {
                                self.deliver_push(event).await;
                            }
                        }
                    }
                }
            }
        }
    }
}
