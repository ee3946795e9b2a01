// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work-group and worker domain model.
//!
//! A work group fans a plan out into N worker CLIs, each running in its own
//! git worktree on its own branch, merged back into the foreman's branch on
//! completion.

use crate::ids::{ConversationId, TmuxSessionName, WorkGroupId, WorkerId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkGroupStatus {
    Active,
    Merging,
    Completed,
    Cancelled,
    Error,
}

crate::simple_display! {
    WorkGroupStatus {
        Active => "active",
        Merging => "merging",
        Completed => "completed",
        Cancelled => "cancelled",
        Error => "error",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Spawning,
    Working,
    Waiting,
    Completed,
    Error,
}

crate::simple_display! {
    WorkerStatus {
        Spawning => "spawning",
        Working => "working",
        Waiting => "waiting",
        Completed => "completed",
        Error => "error",
    }
}

/// Merge conflict policy for [`crate::workgroup::WorkGroup::merge_strategy`].
///
/// Resolves the source's open question on merge strategy: the source
/// performs a sequential fast-forward-or-merge per worker branch with no
/// explicit conflict policy. Made configurable per group, defaulting to
/// `AbortOnConflict` (the source's implied current behavior).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    AbortOnConflict,
    ContinueAndReport,
}

impl Default for MergeStrategy {
    fn default() -> Self {
        MergeStrategy::AbortOnConflict
    }
}

/// A pending question a worker has asked that blocks its progress, with
/// optional structured option labels (e.g. for a yes/no/cancel prompt).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerQuestion {
    pub text: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Worker {
    pub id: WorkerId,
    pub task_slug: String,
    pub task_description: String,
    pub plan_section: Option<String>,
    pub files: Vec<String>,
    pub branch: String,
    pub worktree_path: PathBuf,
    pub tmux_session: TmuxSessionName,
    pub conversation_id: Option<ConversationId>,
    pub status: WorkerStatus,
    pub last_activity: String,
    pub last_question: Option<WorkerQuestion>,
    pub commits: Vec<String>,
    pub error: Option<String>,
}

impl Worker {
    /// Branch names for work-group workers always carry the `wg-` prefix.
    pub fn branch_name(group_slug: &str, task_slug: &str) -> String {
        format!("wg-{group_slug}-{task_slug}")
    }
}

#[derive(Debug, Clone)]
pub struct WorkGroup {
    pub id: WorkGroupId,
    pub name: String,
    pub foreman_session_id: ConversationId,
    pub foreman_tmux_session: TmuxSessionName,
    pub parent_dir: PathBuf,
    pub plan_file: Option<PathBuf>,
    pub status: WorkGroupStatus,
    pub merge_strategy: MergeStrategy,
    pub workers: Vec<Worker>,
    pub merge_commit: Option<String>,
    pub error: Option<String>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl WorkGroup {
    /// A worker's worktree path under `<parentDir>/.wg-worktrees/<branch>/`.
    pub fn worktree_path(parent_dir: &std::path::Path, branch: &str) -> PathBuf {
        parent_dir.join(".wg-worktrees").join(branch)
    }
}

#[cfg(any(test, feature = "test-support"))]
mod test_support {
    use super::*;

    crate::builder! {
        pub struct WorkerBuilder => Worker {
            into {
                task_slug: String = "task-a",
                task_description: String = "do the thing",
                branch: String = "wg-g-task-a",
                last_activity: String = "spawned",
            }
            set {
                files: Vec<String> = Vec::new(),
            }
            option {
                plan_section: String = None,
                error: String = None,
            }
            computed {
                id: WorkerId = WorkerId::new(),
                worktree_path: PathBuf = PathBuf::from("/repo/.wg-worktrees/wg-g-task-a"),
                tmux_session: TmuxSessionName = TmuxSessionName::new("companion-task-a-ab12"),
                conversation_id: Option<ConversationId> = None,
                status: WorkerStatus = WorkerStatus::Spawning,
                last_question: Option<WorkerQuestion> = None,
                commits: Vec<String> = Vec::new(),
            }
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use test_support::WorkerBuilder;
