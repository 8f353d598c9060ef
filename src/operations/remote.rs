//! Git remote and config operations
//!
//! Remotes are managed through the git CLI so that the configuration is
//! written to `.git/config` where later git subprocesses (fetch, push) see it.

use crate::operations::command::CommandRunner;
use crate::{DeployError, DeployResult};

/// Names of the configured remotes
pub async fn list_remotes(runner: &CommandRunner) -> DeployResult<Vec<String>> {
    let output = runner.git(&["remote"]).await?;
    Ok(output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Whether a remote with this name is configured
pub async fn remote_exists(runner: &CommandRunner, name: &str) -> DeployResult<bool> {
    Ok(list_remotes(runner).await?.iter().any(|r| r == name))
}

/// Add a new remote
pub async fn add_remote(runner: &CommandRunner, name: &str, url: &str) -> DeployResult<()> {
    if !is_valid_git_url(url) {
        return Err(DeployError::InvalidInput(format!(
            "Invalid Git URL format: {}",
            runner.mask(url)
        )));
    }

    runner.git(&["remote", "add", name, url]).await?;
    Ok(())
}

/// Remove a remote and its remote-tracking refs
pub async fn remove_remote(runner: &CommandRunner, name: &str) -> DeployResult<()> {
    if !remote_exists(runner, name).await? {
        return Err(DeployError::RemoteNotFound(name.to_string()));
    }

    runner.git(&["remote", "remove", name]).await?;
    Ok(())
}

/// Fetch all branches of a remote
pub async fn fetch(runner: &CommandRunner, remote: &str) -> DeployResult<()> {
    runner.git(&["fetch", "--quiet", remote]).await?;
    Ok(())
}

/// Effective value of a git config key (local, global or system), if set
pub async fn git_config_get(runner: &CommandRunner, key: &str) -> DeployResult<Option<String>> {
    let output = runner.try_git(&["config", "--get", key]).await?;
    if !output.success() {
        return Ok(None);
    }
    let value = output.stdout.trim().to_string();
    Ok(if value.is_empty() { None } else { Some(value) })
}

/// Set a key in the user's global git config
pub async fn git_config_set_global(
    runner: &CommandRunner,
    key: &str,
    value: &str,
) -> DeployResult<()> {
    runner.git(&["config", "--global", key, value]).await?;
    Ok(())
}

/// Validate Git URL format
pub fn is_valid_git_url(url: &str) -> bool {
    url.starts_with("https://")
        || url.starts_with("http://")
        || url.starts_with("git://")
        || url.starts_with("ssh://")
        || url.starts_with("file://")
        || url.starts_with('/')
        || (url.contains('@') && url.contains(':')) // SSH format like git@github.com:user/repo.git
}
