//! Branch and checkout operations

use std::path::Path;

use crate::{DeployError, DeployResult};
use crate::operations::command::CommandRunner;

/// Check out an existing branch or commit
pub async fn checkout(runner: &CommandRunner, target: &str) -> DeployResult<()> {
    runner.git(&["checkout", "--quiet", target]).await?;
    Ok(())
}

/// Check out `target`, discarding local modifications to tracked files
pub async fn force_checkout(runner: &CommandRunner, target: &str) -> DeployResult<()> {
    runner.git(&["checkout", "--quiet", "--force", target]).await?;
    Ok(())
}

/// Create `name` from the current HEAD and check it out.
///
/// With `upstream` (e.g. `origin/gh-pages`) the new branch starts at and
/// tracks that ref instead.
pub async fn checkout_new_branch(
    runner: &CommandRunner,
    name: &str,
    upstream: Option<&str>,
) -> DeployResult<()> {
    match upstream {
        Some(upstream) => {
            runner
                .git(&["checkout", "--quiet", "-b", name, "--track", upstream])
                .await?
        }
        None => runner.git(&["checkout", "--quiet", "-b", name]).await?,
    };
    Ok(())
}

/// Create and check out a branch with no history
pub async fn checkout_orphan(runner: &CommandRunner, name: &str) -> DeployResult<()> {
    runner.git(&["checkout", "--quiet", "--orphan", name]).await?;
    Ok(())
}

/// Force-delete a local branch
pub async fn delete_branch(runner: &CommandRunner, name: &str) -> DeployResult<()> {
    runner.git(&["branch", "-D", name]).await?;
    Ok(())
}

/// Remove every tracked file from the index and the working tree
pub async fn remove_all_tracked(runner: &CommandRunner) -> DeployResult<()> {
    runner
        .git(&["rm", "-r", "-f", "-q", "--ignore-unmatch", "."])
        .await?;
    Ok(())
}

/// Stage paths, including ones matched by `.gitignore`
pub async fn add_paths(runner: &CommandRunner, paths: &[&Path]) -> DeployResult<()> {
    if paths.is_empty() {
        return Ok(());
    }
    let mut args = vec!["add", "-f", "--"];
    let rendered = render_paths(paths);
    args.extend(rendered.iter().map(String::as_str));
    runner.git(&args).await?;
    Ok(())
}

/// Remove paths from the index, leaving the working tree alone
pub async fn unstage_removed(runner: &CommandRunner, paths: &[&Path]) -> DeployResult<()> {
    if paths.is_empty() {
        return Ok(());
    }
    let mut args = vec!["rm", "--cached", "-r", "-q", "--ignore-unmatch", "--"];
    let rendered = render_paths(paths);
    args.extend(rendered.iter().map(String::as_str));
    runner.git(&args).await?;
    Ok(())
}

/// Whether the index differs from HEAD
pub async fn has_staged_changes(runner: &CommandRunner) -> DeployResult<bool> {
    let output = runner
        .try_git(&["diff-index", "--quiet", "--cached", "HEAD", "--"])
        .await?;
    match output.code {
        Some(0) => Ok(false),
        Some(1) => Ok(true),
        _ => Err(DeployError::CommandFailed {
            command: runner.display_command("git", &["diff-index", "--quiet", "--cached", "HEAD"]),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        }),
    }
}

/// Whether the index has no entries at all
pub async fn index_is_empty(runner: &CommandRunner) -> DeployResult<bool> {
    let output = runner.git(&["ls-files", "--cached", "-z"]).await?;
    Ok(output.stdout.is_empty())
}

/// Delete those of `paths` that git does not track, ignored or not.
///
/// Tracked paths are left alone. Pathspecs are taken literally.
pub async fn clean_untracked(runner: &CommandRunner, paths: &[&Path]) -> DeployResult<()> {
    if paths.is_empty() {
        return Ok(());
    }
    let mut args = vec!["--literal-pathspecs", "clean", "-f", "-x", "-q", "--"];
    let rendered = render_paths(paths);
    args.extend(rendered.iter().map(String::as_str));
    runner.git(&args).await?;
    Ok(())
}

/// Commit the index with `message`
pub async fn commit(runner: &CommandRunner, message: &str) -> DeployResult<()> {
    runner.git(&["commit", "--quiet", "-m", message]).await?;
    Ok(())
}

fn render_paths(paths: &[&Path]) -> Vec<String> {
    paths
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect()
}
