//! Git stash operations

use crate::operations::command::CommandRunner;
use crate::{DeployError, DeployResult};

/// Stash local modifications to tracked files.
///
/// Returns `false` when there was nothing to stash.
pub async fn stash_save(runner: &CommandRunner, message: &str) -> DeployResult<bool> {
    let output = runner.git(&["stash", "push", "-m", message]).await?;

    // git exits 0 with this message when the tree is clean
    let nothing = "No local changes to save";
    Ok(!output.stdout.contains(nothing) && !output.stderr.contains(nothing))
}

/// Apply and remove the most recent stash entry
pub async fn stash_pop(runner: &CommandRunner) -> DeployResult<()> {
    runner.git(&["stash", "pop"]).await.map_err(|e| match e {
        DeployError::CommandFailed {
            command,
            code,
            stderr,
        } => DeployError::CommandFailed {
            command,
            code,
            stderr: format!("Failed to pop stash: {stderr}"),
        },
        other => other,
    })?;
    Ok(())
}
