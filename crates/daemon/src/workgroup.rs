// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work-group lifecycle: spawning a fan-out of worker CLIs into their own
//! git worktrees and tmux sessions, tracking their progress, and merging
//! completed branches back into the foreman's checkout.
//!
//! All mutable state lives behind one `RwLock` over the group table — groups
//! are created and merged rarely enough next to however often their status
//! is read that a single lock with short critical sections is simpler than
//! splitting state out further, and nothing here is ever awaited while the
//! lock is held.

use relay_adapters::{ConversationWatcher, TmuxAdapter};
use relay_core::{
    ConversationId, MergeStrategy, SessionStatus, TmuxSessionName, WorkGroup, WorkGroupError, WorkGroupId,
    WorkGroupStatus, Worker, WorkerId, WorkerQuestion, WorkerStatus,
};
use relay_wire::OrphanedWorktree;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{info, warn};

/// One worker to spawn as part of a new work group.
pub struct WorkerSpec {
    pub task_slug: String,
    pub task_description: String,
    pub plan_section: Option<String>,
    pub files: Vec<String>,
}

pub struct WorkGroupManager {
    tmux: Arc<dyn TmuxAdapter>,
    groups: parking_lot::RwLock<HashMap<WorkGroupId, WorkGroup>>,
}

impl WorkGroupManager {
    pub fn new(tmux: Arc<dyn TmuxAdapter>) -> Self {
        Self { tmux, groups: parking_lot::RwLock::new(HashMap::new()) }
    }

    pub fn get(&self, id: &WorkGroupId) -> Option<WorkGroup> {
        self.groups.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<WorkGroup> {
        self.groups.read().values().cloned().collect()
    }

    /// Create worktrees and tmux sessions for every worker and register the
    /// group as `Active`. Any worker whose worktree/session creation fails
    /// aborts the whole spawn — partial fan-outs are cleaned up before the
    /// error is returned, mirroring the all-or-nothing merge default.
    pub async fn spawn(
        &self,
        name: String,
        foreman_session_id: ConversationId,
        foreman_tmux_session: TmuxSessionName,
        parent_dir: PathBuf,
        plan_file: Option<PathBuf>,
        merge_strategy: MergeStrategy,
        group_slug: &str,
        worker_specs: Vec<WorkerSpec>,
    ) -> Result<WorkGroupId, WorkGroupError> {
        let mut workers = Vec::with_capacity(worker_specs.len());
        let mut spawned_paths: Vec<PathBuf> = Vec::new();

        for spec in worker_specs {
            let branch = Worker::branch_name(group_slug, &spec.task_slug);
            let worktree_path = WorkGroup::worktree_path(&parent_dir, &branch);

            if let Err(e) = self.tmux.create_worktree(&parent_dir, &worktree_path, &branch).await {
                self.cleanup_paths(&parent_dir, &spawned_paths).await;
                return Err(e.into());
            }
            spawned_paths.push(worktree_path.clone());

            let tmux_session = relay_core::generate_session_name(&worktree_path);
            if let Err(e) = self.tmux.create_session(tmux_session.as_str(), &worktree_path).await {
                self.cleanup_paths(&parent_dir, &spawned_paths).await;
                return Err(e.into());
            }
            let _ = self.tmux.tag_session(tmux_session.as_str()).await;

            workers.push(Worker {
                id: WorkerId::new(),
                task_slug: spec.task_slug,
                task_description: spec.task_description,
                plan_section: spec.plan_section,
                files: spec.files,
                branch,
                worktree_path,
                tmux_session,
                conversation_id: None,
                status: WorkerStatus::Spawning,
                last_activity: "spawned".to_string(),
                last_question: None,
                commits: Vec::new(),
                error: None,
            });
        }

        let id = WorkGroupId::new();
        let now = SystemTime::now();
        let group = WorkGroup {
            id,
            name,
            foreman_session_id,
            foreman_tmux_session,
            parent_dir,
            plan_file,
            status: WorkGroupStatus::Active,
            merge_strategy,
            workers,
            merge_commit: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        info!(group = %id, workers = group.workers.len(), "work group spawned");
        self.groups.write().insert(id, group);
        Ok(id)
    }

    async fn cleanup_paths(&self, parent_dir: &Path, paths: &[PathBuf]) {
        for path in paths {
            if let Err(e) = self.tmux.remove_worktree(parent_dir, path).await {
                warn!(path = %path.display(), error = %e, "failed to clean up worktree after aborted spawn");
            }
        }
    }

    pub fn update_worker_status(
        &self,
        group_id: &WorkGroupId,
        worker_id: &WorkerId,
        status: WorkerStatus,
        last_activity: String,
    ) -> Result<(), WorkGroupError> {
        let mut groups = self.groups.write();
        let group = groups.get_mut(group_id).ok_or(WorkGroupError::NotFound)?;
        let worker = group.workers.iter_mut().find(|w| w.id == worker_id.clone()).ok_or(WorkGroupError::WorkerNotFound)?;
        worker.status = status;
        worker.last_activity = last_activity;
        group.updated_at = SystemTime::now();
        Ok(())
    }

    pub fn record_worker_question(
        &self,
        group_id: &WorkGroupId,
        worker_id: &WorkerId,
        question: WorkerQuestion,
    ) -> Result<(), WorkGroupError> {
        let mut groups = self.groups.write();
        let group = groups.get_mut(group_id).ok_or(WorkGroupError::NotFound)?;
        let worker = group.workers.iter_mut().find(|w| w.id == worker_id.clone()).ok_or(WorkGroupError::WorkerNotFound)?;
        worker.status = WorkerStatus::Waiting;
        worker.last_question = Some(question);
        Ok(())
    }

    pub fn record_worker_error(
        &self,
        group_id: &WorkGroupId,
        worker_id: &WorkerId,
        error: String,
    ) -> Result<(), WorkGroupError> {
        let mut groups = self.groups.write();
        let group = groups.get_mut(group_id).ok_or(WorkGroupError::NotFound)?;
        let worker = group.workers.iter_mut().find(|w| w.id == worker_id.clone()).ok_or(WorkGroupError::WorkerNotFound)?;
        worker.status = WorkerStatus::Error;
        worker.error = Some(error);
        Ok(())
    }

    /// Clear a worker's error state so a follow-up instruction can be sent.
    /// The hub is responsible for actually injecting the retry input after
    /// this succeeds.
    pub fn retry_worker(&self, group_id: &WorkGroupId, worker_id: &WorkerId) -> Result<TmuxSessionName, WorkGroupError> {
        let mut groups = self.groups.write();
        let group = groups.get_mut(group_id).ok_or(WorkGroupError::NotFound)?;
        let worker = group.workers.iter_mut().find(|w| w.id == worker_id.clone()).ok_or(WorkGroupError::WorkerNotFound)?;
        if worker.status != WorkerStatus::Error {
            return Err(WorkGroupError::WorkerNotErrored);
        }
        worker.status = WorkerStatus::Working;
        worker.error = None;
        Ok(worker.tmux_session.clone())
    }

    /// Merge every `Completed` worker's branch into the foreman's checkout in
    /// worker order. Under [`MergeStrategy::AbortOnConflict`] (the default)
    /// the first conflicting branch stops the merge and leaves the group in
    /// `Error`; under `ContinueAndReport` every worker is attempted and the
    /// group ends `Error` only if none merged cleanly, carrying the combined
    /// failure list.
    pub async fn merge(&self, group_id: &WorkGroupId) -> Result<String, WorkGroupError> {
        let (repo_dir, strategy, branches): (PathBuf, MergeStrategy, Vec<(WorkerId, String)>) = {
            let groups = self.groups.read();
            let group = groups.get(group_id).ok_or(WorkGroupError::NotFound)?;
            (
                group.parent_dir.clone(),
                group.merge_strategy,
                group
                    .workers
                    .iter()
                    .filter(|w| w.status == WorkerStatus::Completed)
                    .map(|w| (w.id, w.branch.clone()))
                    .collect(),
            )
        };

        {
            let mut groups = self.groups.write();
            if let Some(group) = groups.get_mut(group_id) {
                group.status = WorkGroupStatus::Merging;
            }
        }

        let mut last_commit = None;
        let mut failures = Vec::new();
        for (worker_id, branch) in &branches {
            match self.tmux.merge_branch(&repo_dir, branch).await {
                Ok(commit) => {
                    last_commit = Some(commit);
                    self.cleanup_worker_worktree(group_id, worker_id, &repo_dir).await;
                }
                Err(e) => {
                    failures.push(format!("{branch}: {e}"));
                    if strategy == MergeStrategy::AbortOnConflict {
                        break;
                    }
                }
            }
        }

        let mut groups = self.groups.write();
        let group = groups.get_mut(group_id).ok_or(WorkGroupError::NotFound)?;
        group.updated_at = SystemTime::now();

        if failures.is_empty() {
            group.status = WorkGroupStatus::Completed;
            group.merge_commit = last_commit.clone();
            Ok(last_commit.unwrap_or_default())
        } else {
            let message = failures.join("; ");
            group.status = WorkGroupStatus::Error;
            group.error = Some(message.clone());
            Err(WorkGroupError::PartialMerge(message))
        }
    }

    async fn cleanup_worker_worktree(&self, group_id: &WorkGroupId, worker_id: &WorkerId, repo_dir: &Path) {
        let (path, branch) = {
            let groups = self.groups.read();
            let Some(group) = groups.get(group_id) else { return };
            let Some(worker) = group.workers.iter().find(|w| w.id == *worker_id) else { return };
            (worker.worktree_path.clone(), worker.branch.clone())
        };
        if let Err(e) = self.tmux.remove_worktree(repo_dir, &path).await {
            warn!(path = %path.display(), error = %e, "failed to remove worktree after merge");
        }
        if let Err(e) = self.tmux.delete_branch(repo_dir, &branch).await {
            warn!(branch = %branch, error = %e, "failed to delete branch after merge");
        }
    }

    /// Kill every worker's tmux session and remove its worktree/branch,
    /// marking the group `Cancelled`.
    pub async fn cancel(&self, group_id: &WorkGroupId) -> Result<(), WorkGroupError> {
        let (repo_dir, workers): (PathBuf, Vec<Worker>) = {
            let groups = self.groups.read();
            let group = groups.get(group_id).ok_or(WorkGroupError::NotFound)?;
            (group.parent_dir.clone(), group.workers.clone())
        };

        for worker in &workers {
            let _ = self.tmux.kill_session(worker.tmux_session.as_str()).await;
            if let Err(e) = self.tmux.remove_worktree(&repo_dir, &worker.worktree_path).await {
                warn!(worker = %worker.id, error = %e, "failed to remove worktree on cancel");
            }
            let _ = self.tmux.delete_branch(&repo_dir, &worker.branch).await;
        }

        let mut groups = self.groups.write();
        let group = groups.get_mut(group_id).ok_or(WorkGroupError::NotFound)?;
        group.status = WorkGroupStatus::Cancelled;
        group.updated_at = SystemTime::now();
        Ok(())
    }

    /// Remove a group from the table once it has reached a terminal state.
    /// Worktrees are already cleaned up by [`Self::merge`]/[`Self::cancel`];
    /// this just drops the bookkeeping entry.
    pub fn dismiss(&self, group_id: &WorkGroupId) -> Result<(), WorkGroupError> {
        let mut groups = self.groups.write();
        let group = groups.get(group_id).ok_or(WorkGroupError::NotFound)?;
        if !matches!(group.status, WorkGroupStatus::Completed | WorkGroupStatus::Cancelled | WorkGroupStatus::Error) {
            return Err(WorkGroupError::NotDismissable);
        }
        groups.remove(group_id);
        Ok(())
    }

    /// Bind each unbound worker to the conversation discovered at its
    /// worktree path, then track every bound worker's status off its
    /// conversation's derived status and commit count: `waiting`/`working`
    /// mirror the conversation directly, `completed` additionally requires
    /// the CLI's completion marker *and* at least one commit (a worker that
    /// says it's done but never touched a file stays `working`), and
    /// anything else the conversation reports as `error` becomes `error`.
    /// Workers already `completed` or `error` are left alone — this is a
    /// one-way ratchet forward, not a continuous mirror. Returns the ids of
    /// groups with at least one worker that changed, so the caller can
    /// broadcast just those.
    pub async fn reconcile(&self, watcher: &ConversationWatcher) -> Vec<WorkGroupId> {
        let snapshot: Vec<(WorkGroupId, PathBuf, Vec<Worker>)> = {
            let groups = self.groups.read();
            groups
                .values()
                .filter(|g| g.status == WorkGroupStatus::Active)
                .map(|g| (g.id, g.parent_dir.clone(), g.workers.clone()))
                .collect()
        };
        if snapshot.is_empty() {
            return Vec::new();
        }

        let mut changed_groups = Vec::new();

        for (group_id, parent_dir, workers) in snapshot {
            let mut group_changed = false;
            for worker in &workers {
                if matches!(worker.status, WorkerStatus::Completed | WorkerStatus::Error) {
                    continue;
                }

                // The CLI names its own log directory by encoding the
                // project path it was launched in, so the conversation a
                // worker belongs to can be looked up directly rather than
                // matched by a (lossy, unreconstructable) stored path.
                let bind_target =
                    worker.conversation_id.clone().unwrap_or_else(|| ConversationId::from_project_path(&worker.worktree_path));
                let newly_bound = worker.conversation_id.is_none();

                let Some(conv) = watcher.get(&bind_target) else { continue };
                let conversation_id = conv.id.clone();

                let commits = match self.tmux.commits_ahead(&parent_dir, &worker.branch).await {
                    Ok(commits) => commits,
                    Err(e) => {
                        warn!(worker = %worker.id, error = %e, "failed to list worker commits during reconciliation");
                        worker.commits.clone()
                    }
                };

                // Priority: waiting, then completed (marker + commit), then
                // working; anything else the conversation reports becomes
                // error.
                let new_status = if conv.status == SessionStatus::Waiting {
                    WorkerStatus::Waiting
                } else if conv.completed && !commits.is_empty() {
                    WorkerStatus::Completed
                } else if conv.status == SessionStatus::Working {
                    WorkerStatus::Working
                } else {
                    WorkerStatus::Error
                };

                if newly_bound || new_status != worker.status || commits != worker.commits {
                    let mut groups = self.groups.write();
                    if let Some(group) = groups.get_mut(&group_id) {
                        if let Some(w) = group.workers.iter_mut().find(|w| w.id == worker.id) {
                            if newly_bound {
                                w.conversation_id = Some(conversation_id.clone());
                            }
                            w.status = new_status;
                            w.commits = commits;
                            if new_status == WorkerStatus::Error && w.error.is_none() {
                                w.error = Some("conversation reported an error".to_string());
                            }
                            group.updated_at = SystemTime::now();
                            group_changed = true;
                        }
                    }
                }
            }
            if group_changed {
                changed_groups.push(group_id);
            }
        }
        changed_groups
    }

    /// Worktrees under `<repo_dir>/.wg-worktrees/` that `git worktree list`
    /// still reports but no tracked worker claims — left behind by a daemon
    /// crash between worktree creation and group bookkeeping, or by a crash
    /// mid-merge/cancel before cleanup ran.
    pub async fn orphaned_worktrees(&self, repo_dirs: &[PathBuf]) -> Vec<OrphanedWorktree> {
        let known: std::collections::HashSet<PathBuf> =
            self.groups.read().values().flat_map(|g| g.workers.iter().map(|w| w.worktree_path.clone())).collect();

        let mut orphans = Vec::new();
        for repo_dir in repo_dirs {
            let Ok(worktrees) = self.tmux.list_worktrees(repo_dir).await else { continue };
            for path in worktrees {
                if known.contains(&path) {
                    continue;
                }
                if !path.starts_with(repo_dir.join(".wg-worktrees")) {
                    continue;
                }
                let branch = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
                orphans.push(OrphanedWorktree { path, branch, repo_dir: repo_dir.clone() });
            }
        }
        orphans
    }
}
