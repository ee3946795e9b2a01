// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain view of a tmux session, as reported by the tmux controller.

use crate::ids::{ConversationId, TmuxSessionName};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;

/// Worktree metadata attached to a tmux session created for a work-group
/// worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeInfo {
    pub is_worktree: bool,
    pub main_repo_dir: PathBuf,
    pub branch: String,
}

/// One live tmux session, as enumerated by `listSessions`.
///
/// Only sessions with `tagged == true` receive broadcasts and appear in the
/// server summary; tagging is the explicit act of adoption.
#[derive(Debug, Clone)]
pub struct TmuxSession {
    pub name: TmuxSessionName,
    pub attached: bool,
    pub working_dir: PathBuf,
    pub tagged: bool,
    pub last_used: SystemTime,
    pub worktree: Option<WorktreeInfo>,
}

/// Find the tagged session among `sessions` whose working directory, once
/// encoded the same way the CLI encodes a project path into a conversation
/// id, matches `id`. `ConversationId`s derived from an on-disk log directory
/// can never be decoded back into a real path (the `/`/`_` -> `-` encoding
/// is lossy), so matching has to run in this direction: encode each
/// candidate session's real working directory and compare strings, never
/// the reverse.
pub fn tmux_session_matching<'a>(sessions: &'a [TmuxSession], id: &ConversationId) -> Option<&'a TmuxSession> {
    sessions.iter().filter(|s| s.tagged).find(|s| ConversationId::from_project_path(&s.working_dir) == *id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_tagged_session_by_encoded_working_dir() {
        let sessions = vec![
            TmuxSession {
                name: TmuxSessionName::new("companion-other-ab12"),
                attached: false,
                working_dir: PathBuf::from("/home/u/other"),
                tagged: true,
                last_used: SystemTime::now(),
                worktree: None,
            },
            TmuxSession {
                name: TmuxSessionName::new("companion-proj-cd34"),
                attached: true,
                working_dir: PathBuf::from("/home/u/proj"),
                tagged: true,
                last_used: SystemTime::now(),
                worktree: None,
            },
        ];
        let id = ConversationId::from_project_path(&PathBuf::from("/home/u/proj"));
        let found = tmux_session_matching(&sessions, &id).expect("should match");
        assert_eq!(found.name.as_str(), "companion-proj-cd34");
    }

    #[test]
    fn untagged_session_never_matches_even_with_equal_working_dir() {
        let sessions = vec![TmuxSession {
            name: TmuxSessionName::new("companion-proj-cd34"),
            attached: true,
            working_dir: PathBuf::from("/home/u/proj"),
            tagged: false,
            last_used: SystemTime::now(),
            worktree: None,
        }];
        let id = ConversationId::from_project_path(&PathBuf::from("/home/u/proj"));
        assert!(tmux_session_matching(&sessions, &id).is_none());
    }

    #[test]
    fn untagged_session_has_no_worktree_by_default() {
        let session = TmuxSession {
            name: TmuxSessionName::new("companion-proj-ab12"),
            attached: false,
            working_dir: PathBuf::from("/home/u/proj"),
            tagged: false,
            last_used: SystemTime::now(),
            worktree: None,
        };
        assert!(!session.tagged);
        assert!(session.worktree.is_none());
    }
}
