// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

use crate::bootstrap::BootstrapError;

/// Protocol version advertised in the `hello` handshake response.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Resolve the daemon's state directory: `RELAY_STATE_DIR` >
/// `XDG_STATE_HOME/relay` > `~/.local/state/relay`.
pub fn state_dir() -> Result<PathBuf, BootstrapError> {
    if let Ok(dir) = std::env::var("RELAY_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("relay"));
    }
    let home = std::env::var("HOME").map_err(|_| BootstrapError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/relay"))
}

/// Root directory the CLI writes per-project JSONL conversation logs under.
/// Defaults to the CLI's own convention (`~/.claude/projects`); overridable
/// for tests and for CLIs that use a different tree.
pub fn logs_root() -> Result<PathBuf, BootstrapError> {
    if let Ok(dir) = std::env::var("RELAY_LOGS_ROOT") {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").map_err(|_| BootstrapError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".claude/projects"))
}

/// Per-request shell-out timeout for `tmux`/`git` calls.
pub fn shell_timeout() -> Duration {
    std::env::var("RELAY_SHELL_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(10))
}

/// Unauthenticated connection timeout: a client that doesn't complete the
/// auth handshake within this window is disconnected.
pub fn auth_timeout() -> Duration {
    std::env::var("RELAY_AUTH_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(30))
}

/// Shutdown drain timeout: how long to wait for in-flight shell-outs and
/// connections to finish before forcing process exit.
pub fn drain_timeout() -> Duration {
    std::env::var("RELAY_DRAIN_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}

/// The CLI binary `create_tmux_session`/`create_worktree_session` launch when
/// `startCli` is set.
pub fn cli_command() -> String {
    std::env::var("RELAY_CLI_COMMAND").unwrap_or_else(|_| "claude".to_string())
}

/// Upper bound on `download_file` payload size.
pub fn max_download_bytes() -> u64 {
    std::env::var("RELAY_MAX_DOWNLOAD_BYTES")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(10 * 1024 * 1024)
}

/// How often the work-group reconciler binds workers to their discovered
/// conversations and refreshes their status/commit counts.
pub fn workgroup_poll_interval() -> Duration {
    std::env::var("RELAY_WORKGROUP_POLL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(2))
}

