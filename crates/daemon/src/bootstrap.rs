// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup: resolve directories, load config and persisted state,
//! wire the watcher/work-group/escalation components together, spawn their
//! background tasks, and bind every configured listener. Mirrors the
//! teacher's numbered `lifecycle::startup` sequence, minus the WAL/snapshot
//! replay this daemon has no use for — nothing here is durable event-sourced
//! state, just a filesystem the watcher rediscovers on every boot.

use std::io::Write;
use std::sync::Arc;

use fs2::FileExt;
use parking_lot::Mutex;
use relay_adapters::{ConversationWatcher, GatewayPushSender, PushSender, RealTmuxAdapter, TmuxAdapter};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::DaemonConfig;
use crate::env;
use crate::escalation::{EscalationEngine, EscalationEvent};
use crate::hub::Hub;
use crate::notifications::NotificationStore;
use crate::workgroup::WorkGroupManager;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("could not resolve a state directory: set RELAY_STATE_DIR or HOME")]
    NoStateDir,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("another relay daemon instance already holds the lock in this state directory")]
    LockFailed(#[source] std::io::Error),
}

/// Acquire `<state_dir>/relayd.lock` exclusively and stamp it with our PID,
/// guarding against a second daemon starting against the same state
/// directory. Held for the process's lifetime via the returned `File`;
/// dropping it (or process exit) releases the OS-level lock.
fn acquire_pid_lock(state_dir: &std::path::Path) -> Result<std::fs::File, BootstrapError> {
    let lock_path = state_dir.join("relayd.lock");
    let lock_file = std::fs::OpenOptions::new().write(true).create(true).truncate(false).open(&lock_path)?;
    lock_file.try_lock_exclusive().map_err(BootstrapError::LockFailed)?;

    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    Ok(lock_file)
}

/// Every long-lived component the hub needs a handle to, plus the shutdown
/// signal every background task and accept loop selects against.
pub struct Daemon {
    pub config: DaemonConfig,
    pub watcher: Arc<ConversationWatcher>,
    pub tmux: Arc<dyn TmuxAdapter>,
    pub workgroups: Arc<WorkGroupManager>,
    pub escalation: Arc<EscalationEngine<relay_core::SystemClock>>,
    pub notifications: Arc<NotificationStore>,
    pub shutdown: CancellationToken,
    /// The escalation engine's immediate-broadcast channel, handed to the
    /// hub exactly once at `run` time. `Hub::new` takes it out; nothing
    /// else reads it.
    immediate_rx: Mutex<Option<tokio::sync::mpsc::UnboundedReceiver<EscalationEvent>>>,
    /// Holds the exclusive lock on `relayd.lock` for as long as this daemon
    /// is alive. Never read after bootstrap; its only job is to not be
    /// dropped until the process exits.
    _pid_lock: std::fs::File,
}

/// Bring up every component in dependency order and return them ready to
/// run. Does not bind listeners or spawn tasks yet — that's [`Daemon::run`],
/// kept separate so tests can construct a `Daemon` against a fake tmux
/// adapter without opening a socket.
pub async fn bootstrap() -> Result<Daemon, BootstrapError> {
    let state_dir = env::state_dir()?;
    std::fs::create_dir_all(&state_dir)?;
    info!(dir = %state_dir.display(), "using state directory");

    let pid_lock = acquire_pid_lock(&state_dir)?;

    let config = DaemonConfig::load_or_init(&state_dir)?;
    let logs_root = match &config.code_home {
        Some(dir) => dir.clone(),
        None => env::logs_root()?,
    };

    let tmux: Arc<dyn TmuxAdapter> = Arc::new(RealTmuxAdapter::new(env::shell_timeout()));
    let watcher = Arc::new(ConversationWatcher::new(logs_root, tmux.clone()));
    let workgroups = Arc::new(WorkGroupManager::new(tmux.clone()));
    let notifications = Arc::new(NotificationStore::load_or_init(&state_dir)?);

    let push_sender: Arc<dyn PushSender> = Arc::new(GatewayPushSender::default());
    let (escalation, immediate_rx) =
        EscalationEngine::new(relay_core::SystemClock, notifications.clone(), push_sender);

    info!(listeners = config.listeners.len(), "daemon bootstrapped");
    Ok(Daemon {
        config,
        watcher,
        tmux,
        workgroups,
        escalation: Arc::new(escalation),
        notifications,
        shutdown: CancellationToken::new(),
        immediate_rx: Mutex::new(Some(immediate_rx)),
        _pid_lock: pid_lock,
    })
}

impl Daemon {
    /// Take the escalation engine's immediate-broadcast receiver. Panics if
    /// called twice — there is exactly one hub per daemon and exactly one
    /// receiver to hand it.
    pub(crate) fn take_immediate_rx(&self) -> tokio::sync::mpsc::UnboundedReceiver<EscalationEvent> {
        self.immediate_rx.lock().take().expect("immediate_rx already taken")
    }

    /// Spawn every background task and accept loop, then block until
    /// `shutdown` is cancelled (by a signal handler in `main`, or by a test).
    /// Runs the graceful shutdown sequence before returning.
    pub async fn run(self: Arc<Self>) {
        let mut tasks = Vec::new();

        {
            let watcher = self.watcher.clone();
            let cancel = self.shutdown.clone();
            tasks.push(tokio::spawn(async move { watcher.run(cancel).await }));
        }
        {
            let notifications = self.notifications.clone();
            let cancel = self.shutdown.clone();
            tasks.push(tokio::spawn(async move { notifications.run_flush_loop(cancel).await }));
        }
        {
            let escalation = self.escalation.clone();
            let cancel = self.shutdown.clone();
            tasks.push(tokio::spawn(async move { escalation.run(cancel).await }));
        }

        let hub = Arc::new(Hub::new(self.clone()));
        {
            let hub = hub.clone();
            let cancel = self.shutdown.clone();
            tasks.push(tokio::spawn(async move { hub.relay_broadcasts(cancel).await }));
        }
        {
            let hub = hub.clone();
            let cancel = self.shutdown.clone();
            tasks.push(tokio::spawn(async move { hub.run_workgroup_reconciler(cancel).await }));
        }
        for listener in self.config.listeners.clone() {
            let hub = hub.clone();
            let cancel = self.shutdown.clone();
            tasks.push(tokio::spawn(async move { hub.run_listener(listener, cancel).await }));
        }

        self.shutdown.cancelled().await;
        info!("shutdown requested, draining background tasks");
        let drain = tokio::time::timeout(env::drain_timeout(), futures_util::future::join_all(tasks)).await;
        if drain.is_err() {
            warn!("drain timeout elapsed; forcing exit");
        }
        info!("relay daemon shutdown complete");
    }

    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[tokio::test]
    #[serial]
    async fn bootstrap_creates_state_dir_and_default_config() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("RELAY_STATE_DIR", dir.path());
        let daemon = bootstrap().await.unwrap();
        assert_eq!(daemon.config.listeners.len(), 1);
        std::env::remove_var("RELAY_STATE_DIR");
    }

    #[tokio::test]
    #[serial]
    async fn second_bootstrap_against_same_state_dir_fails_lock() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("RELAY_STATE_DIR", dir.path());
        let first = bootstrap().await.unwrap();
        let second = bootstrap().await;
        assert!(matches!(second, Err(BootstrapError::LockFailed(_))));
        drop(first);
        std::env::remove_var("RELAY_STATE_DIR");
    }
}
