//! Remote URL introspection.
//!
//! Parses git URLs (https, ssh, scp-like) into their parts and derives the
//! `owner/repo` slug the hosting provider uses to address a repository.

use gix::bstr::{BStr, ByteSlice};

use crate::{DeployError, DeployResult, RepoHandle};

/// Parsed Git URL information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitUrl {
    pub scheme: String,
    pub host: String,
    pub path: String,
    pub owner: Option<String>,
    pub repo: Option<String>,
}

impl GitUrl {
    /// `owner/repo`, when both parts could be extracted
    pub fn slug(&self) -> Option<String> {
        match (&self.owner, &self.repo) {
            (Some(owner), Some(repo)) => Some(format!("{owner}/{repo}")),
            _ => None,
        }
    }
}

/// Parse a Git URL into its components.
///
/// Supports `https://host/owner/repo.git`, `ssh://git@host/owner/repo` and
/// scp-like `git@host:owner/repo.git`.
pub fn parse_git_url(url: &str) -> DeployResult<GitUrl> {
    let parsed = gix_url::parse(BStr::new(url.trim().as_bytes()))
        .map_err(|e| DeployError::Parse(format!("Failed to parse Git URL: {e}")))?;
    Ok(from_gix_url(&parsed))
}

fn from_gix_url(parsed: &gix::Url) -> GitUrl {
    let scheme = parsed.scheme.as_str().to_string();
    let host = parsed.host().map(|h| h.to_string()).unwrap_or_default();
    let path = parsed.path.to_str_lossy().to_string();

    let (owner, repo) = extract_owner_repo(&path);

    GitUrl {
        scheme,
        host,
        path,
        owner,
        repo,
    }
}

/// `owner/repo` slug of the `origin` remote's fetch URL.
pub async fn origin_repo_slug(repo: &RepoHandle) -> DeployResult<String> {
    remote_repo_slug(repo, "origin").await
}

/// `owner/repo` slug of a named remote's fetch URL.
pub async fn remote_repo_slug(repo: &RepoHandle, remote: &str) -> DeployResult<String> {
    let repo_clone = repo.clone_inner();
    let remote = remote.to_string();

    tokio::task::spawn_blocking(move || {
        let found = repo_clone
            .find_remote(remote.as_bytes().as_bstr())
            .map_err(|_| DeployError::RemoteNotFound(remote.clone()))?;
        let url = found
            .url(gix::remote::Direction::Fetch)
            .ok_or_else(|| DeployError::RemoteNotFound(remote.clone()))?;
        let parsed = from_gix_url(url);
        parsed.slug().ok_or_else(|| {
            DeployError::Parse(format!(
                "Cannot determine owner/repo from the URL of remote `{remote}` ({})",
                parsed.path
            ))
        })
    })
    .await
    .map_err(|e| DeployError::Gix(Box::new(e)))?
}

/// Extract owner and repo from a Git path.
fn extract_owner_repo(path: &str) -> (Option<String>, Option<String>) {
    // Remove leading slash
    let path = path.trim_start_matches('/');

    // Remove trailing slash and .git suffix
    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);

    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();

    if parts.len() == 2 {
        (Some(parts[0].to_string()), Some(parts[1].to_string()))
    } else {
        (None, None)
    }
}
