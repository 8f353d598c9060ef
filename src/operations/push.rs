//! Git pull and push operations
//!
//! Each function here performs a single attempt and reports its outcome as
//! a [`PushAttempt`]; retrying is the caller's business.
//!
//! # Authentication
//!
//! These run through [`CommandRunner`], which sets `GIT_TERMINAL_PROMPT=0`:
//! a push without configured credentials fails immediately instead of
//! waiting for a password. Credentials come from the remote URL (token) or
//! from `GIT_SSH_COMMAND` (deploy key) set up by the remote configuration.

use log::warn;

use crate::DeployError;
use crate::operations::command::{CommandOutput, CommandRunner, is_auth_error};

/// Outcome of one pull/push attempt
#[derive(Debug)]
pub enum PushAttempt {
    /// The remote accepted the update
    Success,
    /// The remote moved underneath us; pulling again and retrying may succeed
    Conflict(String),
    /// Retrying cannot help (authentication, missing remote, ...)
    Fatal(DeployError),
}

/// Merge the remote branch into the current branch, preferring our side of any conflict
pub async fn pull_prefer_ours(runner: &CommandRunner, remote: &str, branch: &str) -> PushAttempt {
    let args = [
        "pull",
        "--quiet",
        "--no-rebase",
        "--no-edit",
        "-s",
        "recursive",
        "-X",
        "ours",
        remote,
        branch,
    ];

    let output = match runner.try_git(&args).await {
        Ok(output) => output,
        Err(e) => return PushAttempt::Fatal(e),
    };
    if output.success() {
        return PushAttempt::Success;
    }

    if is_auth_error(&output.stderr) {
        return PushAttempt::Fatal(failure(runner, &args, &output));
    }

    // Leave the branch as it was so the next attempt starts clean
    match runner.try_git(&["merge", "--abort"]).await {
        Ok(abort) if !abort.success() => {
            warn!("git merge --abort failed: {}", abort.stderr.trim());
        }
        Err(e) => warn!("git merge --abort failed: {e}"),
        Ok(_) => {}
    }
    PushAttempt::Conflict(format!("pull failed: {}", output.stderr.trim()))
}

/// Push `local_branch` onto `remote_branch` of `remote`
pub async fn push_branch(
    runner: &CommandRunner,
    remote: &str,
    local_branch: &str,
    remote_branch: &str,
    set_upstream: bool,
) -> PushAttempt {
    let refspec = format!("{local_branch}:{remote_branch}");
    let mut args = vec!["push", "--quiet"];
    if set_upstream {
        args.push("--set-upstream");
    }
    args.push(remote);
    args.push(&refspec);

    let output = match runner.try_git(&args).await {
        Ok(output) => output,
        Err(e) => return PushAttempt::Fatal(e),
    };
    if output.success() {
        return PushAttempt::Success;
    }

    if is_push_conflict(&output.stderr) {
        PushAttempt::Conflict(output.stderr.trim().to_string())
    } else {
        PushAttempt::Fatal(failure(runner, &args, &output))
    }
}

/// Whether a failed push was rejected because the remote ref moved
pub fn is_push_conflict(stderr: &str) -> bool {
    if is_auth_error(stderr) {
        return false;
    }
    let s = stderr.to_lowercase();
    // Rejected by a server-side hook: policy, not a race
    if s.contains("hook declined") {
        return false;
    }
    s.contains("[rejected]")
        || s.contains("non-fast-forward")
        || s.contains("fetch first")
        || s.contains("cannot lock ref")
        || s.contains("failed to update ref")
        || s.contains("stale info")
        || s.contains("remote rejected")
}

fn failure(runner: &CommandRunner, args: &[&str], output: &CommandOutput) -> DeployError {
    DeployError::CommandFailed {
        command: runner.display_command("git", args),
        code: output.code,
        stderr: output.stderr.trim().to_string(),
    }
}
