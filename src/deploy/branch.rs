//! Deploy branch lifecycle
//!
//! The deploy branch is never checked out under its own name. Work happens
//! on a local scratch branch tracking `<remote>/<branch>`, which is pushed
//! with an explicit `scratch:branch` refspec and deleted afterwards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};

use crate::operations::branch::{
    add_paths, checkout, checkout_new_branch, checkout_orphan, clean_untracked, commit,
    delete_branch, force_checkout, has_staged_changes, index_is_empty, remove_all_tracked,
    unstage_removed,
};
use crate::operations::push::{PushAttempt, pull_prefer_ours, push_branch};
use crate::operations::remote::fetch;
use crate::operations::status::{
    CheckoutPoint, checkout_point, local_branch_exists, remote_branch_exists,
};
use crate::operations::{CommandRunner, open_repo};
use crate::{DeployError, DeployResult};

/// Local branch the deploy branch is checked out into
pub const SCRATCH_BRANCH: &str = "docs_deploy_working";

/// File committed to a newly created deploy branch so GitHub Pages serves it as-is
pub const SENTINEL_FILE: &str = ".nojekyll";

const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

/// Where the deploy branch stands in this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployBranchState {
    Missing,
    ExistsRemotely,
    CheckedOutLocally { scratch: String },
}

/// Drives the deploy branch through creation, checkout, commit and push
#[derive(Debug)]
pub struct DeployBranchController<'a> {
    runner: &'a CommandRunner,
    remote: String,
    scratch: String,
    backoff: Duration,
    state: DeployBranchState,
}

impl<'a> DeployBranchController<'a> {
    pub fn new(runner: &'a CommandRunner, remote: impl Into<String>) -> Self {
        Self {
            runner,
            remote: remote.into(),
            scratch: SCRATCH_BRANCH.to_string(),
            backoff: DEFAULT_BACKOFF,
            state: DeployBranchState::Missing,
        }
    }

    /// Base delay between push attempts; attempt `n` waits `n * backoff`
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn state(&self) -> &DeployBranchState {
        &self.state
    }

    pub fn scratch(&self) -> &str {
        &self.scratch
    }

    /// Whether the remote has `name`, judged by the remote-tracking ref
    pub async fn branch_exists(&self, name: &str) -> DeployResult<bool> {
        remote_branch_exists(self.runner.work_dir(), &self.remote, name).await
    }

    /// Create `name` on the remote if it does not exist.
    ///
    /// The new branch has no history and holds only [`SENTINEL_FILE`]. It is
    /// pushed only when `push_allowed`; otherwise it stays local to this run
    /// and [`Self::checkout_for_sync`] starts from an empty tree. Returns
    /// whether the branch was created.
    pub async fn ensure_branch(&mut self, name: &str, push_allowed: bool) -> DeployResult<bool> {
        if self.branch_exists(name).await? {
            self.state = DeployBranchState::ExistsRemotely;
            return Ok(false);
        }

        info!("Creating {name} branch on {}", self.remote);
        let start = checkout_point(&open_repo(self.runner.work_dir()).await?).await?;

        checkout_orphan(self.runner, &self.scratch).await?;
        remove_all_tracked(self.runner).await?;
        std::fs::write(self.runner.work_dir().join(SENTINEL_FILE), b"")?;
        add_paths(self.runner, &[Path::new(SENTINEL_FILE)]).await?;
        commit(
            self.runner,
            &format!("Create new {name} branch with {SENTINEL_FILE}"),
        )
        .await?;

        if push_allowed {
            info!("Pushing {name} branch");
            match push_branch(self.runner, &self.remote, &self.scratch, name, true).await {
                PushAttempt::Success => {}
                PushAttempt::Conflict(msg) => {
                    return Err(DeployError::CommandFailed {
                        command: format!("git push {} {}:{name}", self.remote, self.scratch),
                        code: None,
                        stderr: msg,
                    });
                }
                PushAttempt::Fatal(e) => return Err(e),
            }
        } else {
            info!("Don't have push access. Not pushing the new {name} branch");
        }

        checkout(self.runner, start.target()).await?;
        delete_branch(self.runner, &self.scratch).await?;
        fetch(self.runner, &self.remote).await?;

        self.state = if push_allowed {
            DeployBranchState::ExistsRemotely
        } else {
            DeployBranchState::Missing
        };
        Ok(true)
    }

    /// Check the deploy branch out into the scratch branch.
    ///
    /// A scratch branch left over from an earlier run is deleted first.
    /// When the remote has no such branch (creation was not pushed) the
    /// scratch branch starts as an empty orphan.
    pub async fn checkout_for_sync(&mut self, name: &str) -> DeployResult<()> {
        if local_branch_exists(self.runner.work_dir(), &self.scratch).await? {
            warn!("Deleting stale {} branch", self.scratch);
            delete_branch(self.runner, &self.scratch).await?;
        }

        if self.branch_exists(name).await? {
            let upstream = format!("{}/{name}", self.remote);
            checkout_new_branch(self.runner, &self.scratch, Some(&upstream)).await?;
        } else {
            checkout_orphan(self.runner, &self.scratch).await?;
            remove_all_tracked(self.runner).await?;
        }

        self.state = DeployBranchState::CheckedOutLocally {
            scratch: self.scratch.clone(),
        };
        Ok(())
    }

    /// Stage `added` and `removed` and commit if anything changed.
    ///
    /// Returns whether a commit was made.
    pub async fn commit(
        &self,
        added: &[PathBuf],
        removed: &[PathBuf],
        message: &str,
    ) -> DeployResult<bool> {
        let added: Vec<&Path> = added.iter().map(PathBuf::as_path).collect();
        let removed: Vec<&Path> = removed.iter().map(PathBuf::as_path).collect();
        add_paths(self.runner, &added).await?;
        unstage_removed(self.runner, &removed).await?;

        let changed = if self.has_head().await? {
            has_staged_changes(self.runner).await?
        } else {
            !index_is_empty(self.runner).await?
        };
        if changed {
            commit(self.runner, message).await?;
            Ok(true)
        } else {
            info!("The docs have not changed. Not committing.");
            Ok(false)
        }
    }

    /// Push the scratch branch to `name`, pulling first.
    ///
    /// Makes at most `attempts` attempts (at least one). A rejected push
    /// waits and retries; authentication and other failures stop at once.
    /// Returns the number of attempts used.
    pub async fn push(&self, name: &str, attempts: u32) -> DeployResult<u32> {
        let attempts = attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                fetch(self.runner, &self.remote).await?;
            }
            let remote_exists = self.branch_exists(name).await?;
            if remote_exists {
                match pull_prefer_ours(self.runner, &self.remote, name).await {
                    PushAttempt::Success => {}
                    PushAttempt::Fatal(e) => return Err(e),
                    PushAttempt::Conflict(msg) => {
                        last_error = msg;
                        self.wait_before_retry(name, attempt, attempts, &last_error).await;
                        continue;
                    }
                }
            }

            match push_branch(self.runner, &self.remote, &self.scratch, name, !remote_exists).await {
                PushAttempt::Success => {
                    info!("Pushed {} to {}/{name}", self.scratch, self.remote);
                    return Ok(attempt);
                }
                PushAttempt::Fatal(e) => return Err(e),
                PushAttempt::Conflict(msg) => {
                    last_error = msg;
                    self.wait_before_retry(name, attempt, attempts, &last_error).await;
                }
            }
        }

        Err(DeployError::PushRetriesExhausted {
            branch: name.to_string(),
            attempts,
            last_error,
        })
    }

    async fn wait_before_retry(&self, name: &str, attempt: u32, attempts: u32, reason: &str) {
        if attempt >= attempts {
            return;
        }
        let delay = self.backoff * attempt;
        warn!(
            "Push to {name} failed ({reason}), retrying in {}s ({attempt}/{attempts})",
            delay.as_secs()
        );
        tokio::time::sleep(delay).await;
    }

    /// Return to `start` and delete the scratch branch if it exists.
    ///
    /// Those of `written` that were never committed are deleted first, so
    /// files synced by a failed run do not stay behind in the checkout.
    pub async fn teardown(
        &mut self,
        start: &CheckoutPoint,
        written: &[PathBuf],
    ) -> DeployResult<()> {
        let written: Vec<&Path> = written.iter().map(PathBuf::as_path).collect();
        clean_untracked(self.runner, &written).await?;
        force_checkout(self.runner, start.target()).await?;
        if local_branch_exists(self.runner.work_dir(), &self.scratch).await? {
            delete_branch(self.runner, &self.scratch).await?;
        }
        self.state = DeployBranchState::Missing;
        Ok(())
    }

    /// Whether the current branch has any commit
    async fn has_head(&self) -> DeployResult<bool> {
        let output = self.runner.try_git(&["rev-parse", "--verify", "-q", "HEAD"]).await?;
        Ok(output.success())
    }
}
