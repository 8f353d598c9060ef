//! `docs_deploy` - publish built documentation from CI to a hosting branch
//!
//! This library implements the deployment protocol used by the `docs-deploy`
//! binary: deciding whether a CI job may publish, configuring a secured git
//! remote, syncing a build directory into the deploy branch against a
//! manifest of previously deployed files, and committing and pushing the
//! result with retry. Git plumbing lives in [`operations`], the deployment
//! protocol in [`deploy`].

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

// Module declarations
pub mod deploy;
pub mod operations;

// Re-export deployment protocol types
pub use deploy::{
    AuthMode, Authenticator, BranchWhitelist, CiContext, CiFacts, CiProvider, CliOverrides,
    DeployBranchController, DeployBranchState, DeployConfig, DeployReport, ExcludeSet,
    FernetDecryptor, FileConfig, GithubActions, KeyDecryptor, Orchestrator, PushDecision,
    PushRightsInput, Refusal, RemoteHandle, SyncPlan, TravisCi, configure_remote,
    determine_push_rights, sync,
};

// Re-export Git operations
pub use operations::{
    CommandOutput, CommandRunner, GitUrl, Secret, current_branch, head_author_email, head_commit,
    is_dirty, open_repo, parse_git_url, quote_command_line, remote_branch_exists,
};

/// Error types for deployment operations
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Gix error: {0}")]
    Gix(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Repository not found at path: {0}")]
    RepoNotFound(PathBuf),

    #[error("Remote `{0}` not found")]
    RemoteNotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unrecognized keys in the `{section}` configuration section: {}", .keys.join(", "))]
    UnknownConfigKeys { section: String, keys: Vec<String> },

    #[error("Invalid branch whitelist pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid exclude glob `{pattern}`: {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error(
        "The {env_name} environment variable is not set. Add the encrypted secret to the CI \
         configuration (or pass --secure-env-name if it uses a different name)"
    )]
    MissingSecret { env_name: String },

    #[error("Could not decrypt deploy key `{}`: {reason}", .path.display())]
    InvalidKey { path: PathBuf, reason: String },

    #[error("Command `{command}` failed ({}): {stderr}", describe_exit(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Pushing to `{branch}` failed after {attempts} attempts: {last_error}")]
    PushRetriesExhausted {
        branch: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Deploy step `{step}` failed (command: {command_line}): {source}")]
    StepFailed {
        step: DeployStep,
        command_line: String,
        #[source]
        source: Box<DeployError>,
    },
}

impl From<gix::open::Error> for DeployError {
    fn from(e: gix::open::Error) -> Self {
        DeployError::Gix(Box::new(e))
    }
}

impl From<gix::discover::Error> for DeployError {
    fn from(e: gix::discover::Error) -> Self {
        DeployError::Gix(Box::new(e))
    }
}

impl DeployError {
    /// Whether this error comes from configuration rather than from running the deploy.
    pub fn is_configuration(&self) -> bool {
        match self {
            DeployError::Config(_)
            | DeployError::UnknownConfigKeys { .. }
            | DeployError::InvalidPattern { .. }
            | DeployError::InvalidGlob { .. }
            | DeployError::MissingSecret { .. }
            | DeployError::InvalidKey { .. } => true,
            DeployError::StepFailed { source, .. } => source.is_configuration(),
            _ => false,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// The step of a deploy run an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStep {
    Prepare,
    RemoteSetup,
    EnsureBranch,
    Checkout,
    Sync,
    Command,
    Commit,
    Push,
    Restore,
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeployStep::Prepare => "prepare",
            DeployStep::RemoteSetup => "remote setup",
            DeployStep::EnsureBranch => "ensure deploy branch",
            DeployStep::Checkout => "checkout deploy branch",
            DeployStep::Sync => "sync files",
            DeployStep::Command => "post-sync command",
            DeployStep::Commit => "commit",
            DeployStep::Push => "push",
            DeployStep::Restore => "restore checkout",
        };
        f.write_str(name)
    }
}

/// Convenience result alias.
pub type DeployResult<T> = Result<T, DeployError>;

/// Strong-typed repository wrapper with cheap cloning.
///
/// Wraps a single `gix::Repository` instance. Cloning this handle creates
/// a new repository instance that shares underlying data structures (refs, objects)
/// but has independent thread-local buffers, making it Send-safe.
#[derive(Debug, Clone)]
pub struct RepoHandle {
    inner: gix::Repository,
}

impl RepoHandle {
    /// Create from an existing `gix::Repository`.
    #[inline]
    pub fn new(inner: gix::Repository) -> Self {
        Self { inner }
    }

    /// Access the underlying `gix::Repository` with zero cost.
    #[inline]
    pub fn raw(&self) -> &gix::Repository {
        &self.inner
    }

    /// Clone the underlying repository for use in `spawn_blocking`.
    #[inline]
    pub fn clone_inner(&self) -> gix::Repository {
        self.inner.clone()
    }

    /// Working tree root of the repository.
    pub fn work_dir(&self) -> DeployResult<&Path> {
        self.inner.workdir().ok_or_else(|| {
            DeployError::InvalidInput("Repository has no working directory".to_string())
        })
    }
}
