//! Secure remote setup
//!
//! Configures the deploy remote fresh for every run. Write access uses
//! either a GitHub token embedded in the HTTPS URL or a decrypted deploy key
//! used through `GIT_SSH_COMMAND`. Every secret is registered with the
//! [`CommandRunner`] before it can appear in a command.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::deploy::config::is_repo_url;
use crate::deploy::keys::{KeyDecryptor, KeyStore};
use crate::operations::remote::{
    add_remote, fetch, git_config_get, git_config_set_global, remote_exists, remove_remote,
};
use crate::operations::{CommandRunner, Secret};
use crate::{DeployError, DeployResult};

/// Name of the remote the deploy pushes to
pub const REMOTE_NAME: &str = "docs_deploy_remote";

/// Environment variable holding a GitHub token for token authentication
pub const TOKEN_ENV: &str = "GH_TOKEN";

/// Identity used for deploy commits; also how self-authored commits are recognized
pub const BOT_NAME: &str = "Docs Deploy (CI)";
pub const BOT_EMAIL: &str = "docs-deploy@users.noreply.github.com";

/// Placeholder identity Travis CI configures on its build machines
const CI_PLACEHOLDER_NAMES: &[&str] = &["Travis CI User"];
const CI_PLACEHOLDER_EMAILS: &[&str] = &["travis@example.org"];

/// How the deploy remote authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Token,
    DeployKey,
}

/// Credentials for write access, resolved from the environment
#[derive(Debug, Clone)]
pub enum Authenticator {
    Token(Secret),
    DeployKey {
        key_path: PathBuf,
        encryption_key: Secret,
    },
}

impl Authenticator {
    /// Read the secret for `mode` through `lookup`.
    ///
    /// Token mode reads [`TOKEN_ENV`]; deploy key mode reads `secure_env_name`.
    pub fn resolve(
        mode: AuthMode,
        key_path: &Path,
        secure_env_name: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> DeployResult<Self> {
        let read = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .map(Secret::new)
                .ok_or_else(|| DeployError::MissingSecret {
                    env_name: name.to_string(),
                })
        };
        match mode {
            AuthMode::Token => Ok(Authenticator::Token(read(TOKEN_ENV)?)),
            AuthMode::DeployKey => Ok(Authenticator::DeployKey {
                key_path: key_path.to_path_buf(),
                encryption_key: read(secure_env_name)?,
            }),
        }
    }

    pub fn mode(&self) -> AuthMode {
        match self {
            Authenticator::Token(_) => AuthMode::Token,
            Authenticator::DeployKey { .. } => AuthMode::DeployKey,
        }
    }
}

/// The configured deploy remote.
///
/// Owns the installed deploy key, if any; dropping the handle deletes it.
#[derive(Debug)]
pub struct RemoteHandle {
    pub name: String,
    /// `None` for a read-only remote
    pub auth_mode: Option<AuthMode>,
    pub write_enabled: bool,
    keystore: Option<KeyStore>,
}

impl RemoteHandle {
    pub fn key_path(&self) -> Option<&Path> {
        self.keystore.as_ref().map(KeyStore::key_path)
    }
}

/// URL of `deploy_repo` for the given credentials.
///
/// `deploy_repo` is normally `owner/repo` on GitHub; a full URL or local
/// path is used as given (a token is only embedded into HTTPS URLs).
pub fn remote_url(deploy_repo: &str, auth: Option<&Authenticator>) -> String {
    if is_repo_url(deploy_repo) {
        return match (auth, deploy_repo.strip_prefix("https://")) {
            (Some(Authenticator::Token(token)), Some(rest)) => {
                format!("https://{}@{rest}", token.expose())
            }
            _ => deploy_repo.to_string(),
        };
    }

    let repo = deploy_repo.trim_end_matches(".git");
    match auth {
        None => format!("https://github.com/{repo}.git"),
        Some(Authenticator::Token(token)) => {
            format!("https://{}@github.com/{repo}.git", token.expose())
        }
        Some(Authenticator::DeployKey { .. }) => format!("git@github.com:{repo}.git"),
    }
}

/// Configure [`REMOTE_NAME`] for `deploy_repo` and fetch it.
///
/// Without push rights the remote is read-only and `auth` is ignored. With
/// push rights the deploy key is decrypted before the remote is touched, so
/// a bad key leaves the repository unchanged.
pub async fn configure_remote(
    runner: &mut CommandRunner,
    deploy_repo: &str,
    can_push: bool,
    auth: Option<&Authenticator>,
    decryptor: &dyn KeyDecryptor,
) -> DeployResult<RemoteHandle> {
    let auth = if can_push { auth } else { None };
    if can_push && auth.is_none() {
        warn!("Push rights granted but no credentials given, configuring a read-only remote");
    }

    let mut keystore = None;
    match auth {
        Some(Authenticator::Token(token)) => runner.register_secret(token),
        Some(Authenticator::DeployKey {
            key_path,
            encryption_key,
        }) => {
            runner.register_secret(encryption_key);
            let path = runner.work_dir().join(key_path);
            let ciphertext = std::fs::read(&path).map_err(|e| DeployError::InvalidKey {
                path: key_path.clone(),
                reason: e.to_string(),
            })?;
            let private_key = decryptor
                .decrypt(&ciphertext, encryption_key)
                .map_err(|reason| DeployError::InvalidKey {
                    path: key_path.clone(),
                    reason: runner.mask(&reason),
                })?;
            let store = KeyStore::install(&private_key)?;
            runner.set_env("GIT_SSH_COMMAND", store.ssh_command());
            keystore = Some(store);
        }
        None => {}
    }

    if remote_exists(runner, REMOTE_NAME).await? {
        info!("Removing existing remote {REMOTE_NAME}");
        remove_remote(runner, REMOTE_NAME).await?;
    }

    let url = remote_url(deploy_repo, auth);
    add_remote(runner, REMOTE_NAME, &url).await?;
    fetch(runner, REMOTE_NAME).await?;

    info!(
        "Configured remote {REMOTE_NAME} for {} ({})",
        runner.mask(deploy_repo),
        match auth {
            Some(Authenticator::Token(_)) => "token",
            Some(Authenticator::DeployKey { .. }) => "deploy key",
            None => "read-only",
        }
    );

    Ok(RemoteHandle {
        name: REMOTE_NAME.to_string(),
        auth_mode: auth.map(Authenticator::mode),
        write_enabled: auth.is_some(),
        keystore,
    })
}

/// Set the global git identity to the bot unless a real one is configured
pub async fn ensure_git_identity(runner: &CommandRunner) -> DeployResult<()> {
    let name = git_config_get(runner, "user.name").await?;
    if name
        .as_deref()
        .is_none_or(|n| CI_PLACEHOLDER_NAMES.contains(&n))
    {
        git_config_set_global(runner, "user.name", BOT_NAME).await?;
    }

    let email = git_config_get(runner, "user.email").await?;
    if email
        .as_deref()
        .is_none_or(|e| CI_PLACEHOLDER_EMAILS.contains(&e))
    {
        git_config_set_global(runner, "user.email", BOT_EMAIL).await?;
    }
    Ok(())
}
