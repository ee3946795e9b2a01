// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Injects text into a tmux session's command line, the way a human typing
//! into that pane would.
//!
//! This is deliberately a free function rather than a type: it owns no
//! state of its own and just sequences two `TmuxAdapter` calls, with a short
//! pause between them so the target program (a shell, or the CLI itself)
//! has a chance to echo the pasted text before `Enter` lands. The pause is
//! a `tokio::time::sleep`, never a blocking one, so it never stalls the
//! task running alongside it.

use relay_core::{ShellError, TmuxSessionName};
use std::time::Duration;

use crate::tmux::TmuxAdapter;

const PASTE_SETTLE: Duration = Duration::from_millis(100);

/// Send `text` into `session`, then press Enter a short moment later.
/// Returns `Ok(true)` if the session was found and the keys were sent,
/// `Ok(false)` is never produced today (kept as a `bool` rather than `()`
/// so a future "session existed but was already closing" case can signal
/// without becoming an error) — callers should treat any `Err` as the
/// session not being available.
pub async fn send_input(
    tmux: &dyn TmuxAdapter,
    session: &TmuxSessionName,
    text: &str,
) -> Result<bool, ShellError> {
    tmux.send_keys(session.as_str(), text, false).await?;
    tokio::time::sleep(PASTE_SETTLE).await;
    tmux.send_raw_keys(session.as_str(), &["Enter".to_string()]).await?;
    Ok(true)
}
