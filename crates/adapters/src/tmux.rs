// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The tmux and git worktree adapter: the only place in the daemon that
//! shells out to `tmux` and `git`.
//!
//! [`TmuxAdapter`] is stateless from the caller's point of view — every
//! method takes `&self` and is safe to call concurrently from multiple
//! tasks. Each shell-out enforces its own timeout so a hung `tmux` or `git`
//! process can never wedge a caller holding a lock; the rule enforced
//! throughout the daemon is that nothing is awaited while a `parking_lot`
//! guard is held, and this adapter's timeout is how that rule stays true for
//! shell-outs specifically.

use async_trait::async_trait;
use relay_core::{ShellError, TmuxSession, WorktreeInfo};
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::{Duration, SystemTime};
use tokio::process::Command;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Marker tmux stores in a session's environment to record that the daemon
/// has adopted it. Cross-referenced with `tmux show-environment` rather than
/// tracked only in memory, so a daemon restart can rediscover which sessions
/// it already owns.
const TAGGED_ENV_VAR: &str = "RELAY_TAGGED";

#[async_trait]
pub trait TmuxAdapter: Send + Sync {
    async fn list_sessions(&self) -> Result<Vec<TmuxSession>, ShellError>;
    async fn session_exists(&self, name: &str) -> Result<bool, ShellError>;
    async fn create_session(&self, name: &str, working_dir: &Path) -> Result<(), ShellError>;
    async fn kill_session(&self, name: &str) -> Result<(), ShellError>;
    async fn tag_session(&self, name: &str) -> Result<(), ShellError>;
    async fn send_keys(&self, name: &str, keys: &str, enter: bool) -> Result<(), ShellError>;
    async fn send_raw_keys(&self, name: &str, keys: &[String]) -> Result<(), ShellError>;
    async fn capture_pane(&self, name: &str, lines: usize) -> Result<String, ShellError>;

    async fn is_git_repo(&self, dir: &Path) -> Result<bool, ShellError>;
    async fn create_worktree(&self, repo_dir: &Path, path: &Path, branch: &str) -> Result<(), ShellError>;
    async fn remove_worktree(&self, repo_dir: &Path, path: &Path) -> Result<(), ShellError>;
    async fn list_worktrees(&self, repo_dir: &Path) -> Result<Vec<PathBuf>, ShellError>;
    async fn delete_branch(&self, repo_dir: &Path, branch: &str) -> Result<(), ShellError>;
    async fn merge_branch(&self, repo_dir: &Path, branch: &str) -> Result<String, ShellError>;

    /// Commit subjects on `branch` not reachable from `HEAD`, oldest first —
    /// how the work-group manager tells a worker that has produced real
    /// changes from one that has only chattered in its pane.
    async fn commits_ahead(&self, repo_dir: &Path, branch: &str) -> Result<Vec<String>, ShellError>;
}

/// The real adapter: shells out to the `tmux` and `git` binaries on `PATH`.
pub struct RealTmuxAdapter {
    timeout: Duration,
}

impl Default for RealTmuxAdapter {
    fn default() -> Self {
        Self { timeout: DEFAULT_TIMEOUT }
    }
}

impl RealTmuxAdapter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn run(&self, program: &str, args: &[&str], cwd: Option<&Path>) -> Result<Output, ShellError> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let fut = cmd.output();
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(io_err)) => Err(ShellError::Io(io_err)),
            Err(_) => Err(ShellError::Timeout(self.timeout)),
        }
    }

    async fn run_tmux(&self, args: &[&str]) -> Result<Output, ShellError> {
        self.run("tmux", args, None).await
    }

    async fn run_git(&self, repo_dir: &Path, args: &[&str]) -> Result<Output, ShellError> {
        self.run("git", args, Some(repo_dir)).await
    }

    fn check_status(output: Output) -> Result<Output, ShellError> {
        if output.status.success() {
            Ok(output)
        } else {
            Err(ShellError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl TmuxAdapter for RealTmuxAdapter {
    async fn list_sessions(&self) -> Result<Vec<TmuxSession>, ShellError> {
        let format = "#{session_name}\t#{session_attached}\t#{session_path}\t#{session_activity}";
        let output = match self.run_tmux(&["list-sessions", "-F", format]).await {
            Ok(out) => out,
            // No server running means no sessions, not an error.
            Err(ShellError::Failed { stderr, .. }) if stderr.contains("no server running") => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        let output = Self::check_status(output)?;
        let text = String::from_utf8_lossy(&output.stdout);

        let mut sessions = Vec::new();
        for line in text.lines() {
            let mut parts = line.splitn(4, '\t');
            let (Some(name), Some(attached), Some(path), Some(activity)) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let tagged = self.tag_is_set(name).await.unwrap_or(false);
            sessions.push(TmuxSession {
                name: relay_core::TmuxSessionName::new(name),
                attached: attached == "1",
                working_dir: PathBuf::from(path),
                tagged,
                last_used: activity
                    .parse::<u64>()
                    .ok()
                    .map(|secs| SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
                    .unwrap_or_else(SystemTime::now),
                worktree: None,
            });
        }
        Ok(sessions)
    }

    async fn session_exists(&self, name: &str) -> Result<bool, ShellError> {
        match self.run_tmux(&["has-session", "-t", name]).await {
            Ok(output) => Ok(output.status.success()),
            Err(ShellError::Timeout(d)) => Err(ShellError::Timeout(d)),
            Err(_) => Ok(false),
        }
    }

    async fn create_session(&self, name: &str, working_dir: &Path) -> Result<(), ShellError> {
        let dir = working_dir.to_string_lossy();
        let output = self.run_tmux(&["new-session", "-d", "-s", name, "-c", &dir]).await?;
        Self::check_status(output)?;
        Ok(())
    }

    async fn kill_session(&self, name: &str) -> Result<(), ShellError> {
        let output = self.run_tmux(&["kill-session", "-t", name]).await?;
        Self::check_status(output)?;
        Ok(())
    }

    async fn tag_session(&self, name: &str) -> Result<(), ShellError> {
        let output = self
            .run_tmux(&["set-environment", "-t", name, TAGGED_ENV_VAR, "1"])
            .await?;
        Self::check_status(output)?;
        Ok(())
    }

    /// Sends `keys` with tmux's `-l` (literal) flag, so the text is typed
    /// verbatim rather than looked up against tmux's key-name table first —
    /// without `-l`, a payload that happens to equal a key name (`"Enter"`,
    /// `"Up"`, `"Tab"`) would be interpreted as that key instead of typed.
    /// `Enter` itself is always sent as a second, non-literal `send-keys`
    /// call, since the literal flag would otherwise type the four
    /// characters `Enter` instead of pressing it.
    async fn send_keys(&self, name: &str, keys: &str, enter: bool) -> Result<(), ShellError> {
        let output = self.run_tmux(&["send-keys", "-t", name, "-l", keys]).await?;
        Self::check_status(output)?;
        if enter {
            let output = self.run_tmux(&["send-keys", "-t", name, "Enter"]).await?;
            Self::check_status(output)?;
        }
        Ok(())
    }

    /// Sends each of `keys` as a symbolic tmux key specifier (`C-c`, `Up`,
    /// ...), with no literal flag — this is the escape hatch for control
    /// sequences the literal path in [`Self::send_keys`] can never produce.
    async fn send_raw_keys(&self, name: &str, keys: &[String]) -> Result<(), ShellError> {
        let mut args: Vec<&str> = vec!["send-keys", "-t", name];
        args.extend(keys.iter().map(String::as_str));
        let output = self.run_tmux(&args).await?;
        Self::check_status(output)?;
        Ok(())
    }

    async fn capture_pane(&self, name: &str, lines: usize) -> Result<String, ShellError> {
        let start = format!("-{lines}");
        let output = self.run_tmux(&["capture-pane", "-t", name, "-p", "-S", &start]).await?;
        let output = Self::check_status(output)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn is_git_repo(&self, dir: &Path) -> Result<bool, ShellError> {
        match self.run_git(dir, &["rev-parse", "--is-inside-work-tree"]).await {
            Ok(output) => Ok(output.status.success()),
            Err(ShellError::Timeout(d)) => Err(ShellError::Timeout(d)),
            Err(_) => Ok(false),
        }
    }

    async fn create_worktree(&self, repo_dir: &Path, path: &Path, branch: &str) -> Result<(), ShellError> {
        let path_str = path.to_string_lossy();
        let output = self
            .run_git(repo_dir, &["worktree", "add", "-b", branch, &path_str])
            .await?;
        Self::check_status(output)?;
        Ok(())
    }

    async fn remove_worktree(&self, repo_dir: &Path, path: &Path) -> Result<(), ShellError> {
        let path_str = path.to_string_lossy();
        let output = self.run_git(repo_dir, &["worktree", "remove", "--force", &path_str]).await?;
        Self::check_status(output)?;
        Ok(())
    }

    async fn list_worktrees(&self, repo_dir: &Path) -> Result<Vec<PathBuf>, ShellError> {
        let output = self.run_git(repo_dir, &["worktree", "list", "--porcelain"]).await?;
        let output = Self::check_status(output)?;
        let text = String::from_utf8_lossy(&output.stdout);
        let mut paths = Vec::new();
        for line in text.lines() {
            if let Some(path) = line.strip_prefix("worktree ") {
                paths.push(PathBuf::from(path));
            }
        }
        Ok(paths)
    }

    async fn delete_branch(&self, repo_dir: &Path, branch: &str) -> Result<(), ShellError> {
        let output = self.run_git(repo_dir, &["branch", "-D", branch]).await?;
        Self::check_status(output)?;
        Ok(())
    }

    async fn merge_branch(&self, repo_dir: &Path, branch: &str) -> Result<String, ShellError> {
        let output = self.run_git(repo_dir, &["merge", "--no-edit", branch]).await?;
        let output = Self::check_status(output)?;
        let head = self.run_git(repo_dir, &["rev-parse", "HEAD"]).await?;
        let head = Self::check_status(head)?;
        let _ = output;
        Ok(String::from_utf8_lossy(&head.stdout).trim().to_string())
    }

    async fn commits_ahead(&self, repo_dir: &Path, branch: &str) -> Result<Vec<String>, ShellError> {
        let output = self.run_git(repo_dir, &["log", branch, "--not", "HEAD", "--format=%s", "--reverse"]).await?;
        let output = Self::check_status(output)?;
        Ok(String::from_utf8_lossy(&output.stdout).lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
    }
}

impl RealTmuxAdapter {
    async fn tag_is_set(&self, name: &str) -> Result<bool, ShellError> {
        let output = self.run_tmux(&["show-environment", "-t", name, TAGGED_ENV_VAR]).await?;
        Ok(output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == format!("{TAGGED_ENV_VAR}=1"))
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Debug, Clone)]
    struct FakeSession {
        working_dir: PathBuf,
        tagged: bool,
        attached: bool,
    }

    /// In-memory double for [`TmuxAdapter`], used by daemon-side unit and
    /// integration tests so they never shell out.
    #[derive(Default)]
    pub struct FakeTmuxAdapter {
        sessions: Mutex<HashMap<String, FakeSession>>,
        worktrees: Mutex<HashMap<PathBuf, Vec<PathBuf>>>,
        commits: Mutex<HashMap<String, Vec<String>>>,
        pub fail_next: Mutex<Option<ShellError>>,
    }

    impl FakeTmuxAdapter {
        pub fn new() -> Self {
            Self::default()
        }

        fn take_failure(&self) -> Option<ShellError> {
            self.fail_next.lock().take()
        }

        /// Test hook: seed the commit subjects `commits_ahead` will report
        /// for `branch`, simulating a worker that has committed work.
        pub fn set_commits(&self, branch: &str, commits: Vec<String>) {
            self.commits.lock().insert(branch.to_string(), commits);
        }
    }

    #[async_trait]
    impl TmuxAdapter for FakeTmuxAdapter {
        async fn list_sessions(&self) -> Result<Vec<TmuxSession>, ShellError> {
            if let Some(e) = self.take_failure() {
                return Err(e);
            }
            Ok(self
                .sessions
                .lock()
                .iter()
                .map(|(name, s)| TmuxSession {
                    name: relay_core::TmuxSessionName::new(name.clone()),
                    attached: s.attached,
                    working_dir: s.working_dir.clone(),
                    tagged: s.tagged,
                    last_used: SystemTime::now(),
                    worktree: None,
                })
                .collect())
        }

        async fn session_exists(&self, name: &str) -> Result<bool, ShellError> {
            Ok(self.sessions.lock().contains_key(name))
        }

        async fn create_session(&self, name: &str, working_dir: &Path) -> Result<(), ShellError> {
            if let Some(e) = self.take_failure() {
                return Err(e);
            }
            self.sessions.lock().insert(
                name.to_string(),
                FakeSession { working_dir: working_dir.to_path_buf(), tagged: false, attached: false },
            );
            Ok(())
        }

        async fn kill_session(&self, name: &str) -> Result<(), ShellError> {
            self.sessions
                .lock()
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| ShellError::SessionNotFound(name.to_string()))
        }

        async fn tag_session(&self, name: &str) -> Result<(), ShellError> {
            let mut sessions = self.sessions.lock();
            let session =
                sessions.get_mut(name).ok_or_else(|| ShellError::SessionNotFound(name.to_string()))?;
            session.tagged = true;
            Ok(())
        }

        async fn send_keys(&self, name: &str, _keys: &str, _enter: bool) -> Result<(), ShellError> {
            if !self.sessions.lock().contains_key(name) {
                return Err(ShellError::SessionNotFound(name.to_string()));
            }
            Ok(())
        }

        async fn send_raw_keys(&self, name: &str, _keys: &[String]) -> Result<(), ShellError> {
            if !self.sessions.lock().contains_key(name) {
                return Err(ShellError::SessionNotFound(name.to_string()));
            }
            Ok(())
        }

        async fn capture_pane(&self, name: &str, _lines: usize) -> Result<String, ShellError> {
            if !self.sessions.lock().contains_key(name) {
                return Err(ShellError::SessionNotFound(name.to_string()));
            }
            Ok(String::new())
        }

        async fn is_git_repo(&self, _dir: &Path) -> Result<bool, ShellError> {
            Ok(true)
        }

        async fn create_worktree(&self, repo_dir: &Path, path: &Path, _branch: &str) -> Result<(), ShellError> {
            if let Some(e) = self.take_failure() {
                return Err(e);
            }
            self.worktrees.lock().entry(repo_dir.to_path_buf()).or_default().push(path.to_path_buf());
            Ok(())
        }

        async fn remove_worktree(&self, repo_dir: &Path, path: &Path) -> Result<(), ShellError> {
            if let Some(list) = self.worktrees.lock().get_mut(repo_dir) {
                list.retain(|p| p != path);
            }
            Ok(())
        }

        async fn list_worktrees(&self, repo_dir: &Path) -> Result<Vec<PathBuf>, ShellError> {
            Ok(self.worktrees.lock().get(repo_dir).cloned().unwrap_or_default())
        }

        async fn delete_branch(&self, _repo_dir: &Path, _branch: &str) -> Result<(), ShellError> {
            Ok(())
        }

        async fn merge_branch(&self, _repo_dir: &Path, branch: &str) -> Result<String, ShellError> {
            if let Some(e) = self.take_failure() {
                return Err(e);
            }
            Ok(format!("merged-{branch}"))
        }

        async fn commits_ahead(&self, _repo_dir: &Path, branch: &str) -> Result<Vec<String>, ShellError> {
            if let Some(e) = self.take_failure() {
                return Err(e);
            }
            Ok(self.commits.lock().get(branch).cloned().unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeTmuxAdapter;
    use super::*;

    #[tokio::test]
    async fn fake_adapter_round_trips_session_lifecycle() {
        let tmux = FakeTmuxAdapter::new();
        tmux.create_session("companion-proj-ab12", Path::new("/tmp/proj")).await.unwrap();
        assert!(tmux.session_exists("companion-proj-ab12").await.unwrap());
        tmux.tag_session("companion-proj-ab12").await.unwrap();

        let sessions = tmux.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].tagged);

        tmux.kill_session("companion-proj-ab12").await.unwrap();
        assert!(!tmux.session_exists("companion-proj-ab12").await.unwrap());
    }

    #[tokio::test]
    async fn killing_unknown_session_is_not_found() {
        let tmux = FakeTmuxAdapter::new();
        let err = tmux.kill_session("nope").await.unwrap_err();
        assert!(matches!(err, ShellError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn worktrees_are_tracked_per_repo() {
        let tmux = FakeTmuxAdapter::new();
        let repo = Path::new("/repo");
        tmux.create_worktree(repo, Path::new("/repo/.wg-worktrees/wg-a"), "wg-a").await.unwrap();
        let list = tmux.list_worktrees(repo).await.unwrap();
        assert_eq!(list, vec![PathBuf::from("/repo/.wg-worktrees/wg-a")]);

        tmux.remove_worktree(repo, Path::new("/repo/.wg-worktrees/wg-a")).await.unwrap();
        assert!(tmux.list_worktrees(repo).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commits_ahead_defaults_to_empty() {
        let tmux = FakeTmuxAdapter::new();
        let commits = tmux.commits_ahead(Path::new("/repo"), "wg-a-task").await.unwrap();
        assert!(commits.is_empty());

        tmux.set_commits("wg-a-task", vec!["did the thing".to_string()]);
        let commits = tmux.commits_ahead(Path::new("/repo"), "wg-a-task").await.unwrap();
        assert_eq!(commits, vec!["did the thing".to_string()]);
    }
}
