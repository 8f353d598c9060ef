//! Read-only repository queries backed by gix
//!
//! These never modify the repository. Anything that mutates refs, the index
//! or the working tree goes through the git CLI in [`super::command`].

use std::path::{Path, PathBuf};

use gix::bstr::ByteSlice;

use crate::{DeployError, DeployResult, RepoHandle};

/// Where HEAD points: a branch, or a detached commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutPoint {
    Branch(String),
    Detached(String),
}

impl CheckoutPoint {
    /// Argument for `git checkout` that returns to this point
    pub fn target(&self) -> &str {
        match self {
            CheckoutPoint::Branch(name) => name,
            CheckoutPoint::Detached(commit) => commit,
        }
    }
}

/// Discover the repository containing `path`
pub async fn open_repo(path: impl AsRef<Path>) -> DeployResult<RepoHandle> {
    let path = path.as_ref().to_path_buf();

    tokio::task::spawn_blocking(move || {
        if !path.exists() {
            return Err(DeployError::RepoNotFound(path));
        }
        let repo = gix::discover(&path)?;
        Ok(RepoHandle::new(repo))
    })
    .await
    .map_err(|e| DeployError::Gix(Box::new(e)))?
}

/// Name of the checked-out branch, `None` when HEAD is detached
pub async fn current_branch(repo: &RepoHandle) -> DeployResult<Option<String>> {
    let repo_clone = repo.clone_inner();

    tokio::task::spawn_blocking(move || {
        let head = repo_clone.head().map_err(|e| DeployError::Gix(Box::new(e)))?;
        Ok(head.referent_name().and_then(|name| {
            name.shorten()
                .to_str()
                .ok()
                .map(std::string::ToString::to_string)
        }))
    })
    .await
    .map_err(|e| DeployError::Gix(Box::new(e)))?
}

/// Full hex id of the commit HEAD points to
pub async fn head_commit(repo: &RepoHandle) -> DeployResult<String> {
    let repo_clone = repo.clone_inner();

    tokio::task::spawn_blocking(move || {
        let id = repo_clone
            .head_id()
            .map_err(|e| DeployError::Gix(Box::new(e)))?;
        Ok(id.to_string())
    })
    .await
    .map_err(|e| DeployError::Gix(Box::new(e)))?
}

/// Author email of the commit HEAD points to
pub async fn head_author_email(repo: &RepoHandle) -> DeployResult<String> {
    let repo_clone = repo.clone_inner();

    tokio::task::spawn_blocking(move || {
        let commit = repo_clone
            .head_commit()
            .map_err(|e| DeployError::Gix(Box::new(e)))?;
        let author = commit.author().map_err(|e| DeployError::Gix(Box::new(e)))?;
        Ok(author.email.to_string())
    })
    .await
    .map_err(|e| DeployError::Gix(Box::new(e)))?
}

/// Current checkout: the branch if HEAD is attached, otherwise the commit id
pub async fn checkout_point(repo: &RepoHandle) -> DeployResult<CheckoutPoint> {
    match current_branch(repo).await? {
        Some(branch) => Ok(CheckoutPoint::Branch(branch)),
        None => Ok(CheckoutPoint::Detached(head_commit(repo).await?)),
    }
}

/// Whether tracked files differ from HEAD (untracked files are ignored)
pub async fn is_dirty(repo: &RepoHandle) -> DeployResult<bool> {
    let repo_clone = repo.clone_inner();

    tokio::task::spawn_blocking(move || {
        repo_clone
            .is_dirty()
            .map_err(|e| DeployError::Gix(Box::new(e)))
    })
    .await
    .map_err(|e| DeployError::Gix(Box::new(e)))?
}

/// Whether `refs/remotes/<remote>/<branch>` exists.
///
/// Only remote-tracking refs are consulted, so the remote must have been
/// fetched first. The repository is opened fresh so refs written by git
/// subprocesses since the last query are visible.
pub async fn remote_branch_exists(
    work_dir: impl AsRef<Path>,
    remote: &str,
    branch: &str,
) -> DeployResult<bool> {
    let work_dir = work_dir.as_ref().to_path_buf();
    let name = format!("refs/remotes/{remote}/{branch}");
    reference_exists(work_dir, name).await
}

/// Whether the local branch `refs/heads/<branch>` exists
pub async fn local_branch_exists(work_dir: impl AsRef<Path>, branch: &str) -> DeployResult<bool> {
    let work_dir = work_dir.as_ref().to_path_buf();
    let name = format!("refs/heads/{branch}");
    reference_exists(work_dir, name).await
}

async fn reference_exists(work_dir: PathBuf, name: String) -> DeployResult<bool> {
    tokio::task::spawn_blocking(move || {
        let repo = gix::open(&work_dir)?;
        let found = repo
            .try_find_reference(name.as_str())
            .map_err(|e| DeployError::Gix(Box::new(e)))?;
        Ok(found.is_some())
    })
    .await
    .map_err(|e| DeployError::Gix(Box::new(e)))?
}
