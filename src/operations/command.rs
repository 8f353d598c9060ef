//! Centralized process execution for git and helper commands
//!
//! Single source of truth for:
//! - Running git with a fixed argument vector and a controlled environment
//! - Masking registered secrets in every logged command, captured output and error
//! - Turning non-zero exits into [`DeployError::CommandFailed`]
//! - Generating helpful error messages for auth failures

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::{debug, info};
use tokio::process::Command as TokioCommand;

use crate::{DeployError, DeployResult};

/// Replacement written wherever a registered secret would appear.
///
/// The mask has a fixed length so that it does not reveal the length of the secret.
pub const SECRET_MASK: &str = "~~~~~~~~";

/// A secret value (token, encryption key) that must never be printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw secret. Only pass this to code that builds command arguments or decrypts.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({SECRET_MASK})")
    }
}

/// Output of a finished command, with secrets already masked.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs external commands inside a working tree.
///
/// Every command is logged before it runs. Captured stdout/stderr pass
/// through [`CommandRunner::mask`] before they are logged, returned or
/// embedded in an error.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    work_dir: PathBuf,
    env: Vec<(String, String)>,
    secrets: Vec<Secret>,
}

impl CommandRunner {
    /// Create a runner for `work_dir` with no extra environment and no secrets
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            env: Vec::new(),
            secrets: Vec::new(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Add an environment variable for every command run by this runner
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_env(key, value);
        self
    }

    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.env.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.env.push((key, value));
        }
    }

    /// Register a secret so it is masked from now on. Empty secrets are ignored.
    pub fn register_secret(&mut self, secret: &Secret) {
        if !secret.is_empty() && !self.secrets.contains(secret) {
            self.secrets.push(secret.clone());
        }
    }

    /// Replace every registered secret in `text` with [`SECRET_MASK`].
    pub fn mask(&self, text: &str) -> String {
        self.secrets
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret.expose(), SECRET_MASK))
    }

    /// Shell-quoted, masked rendering of a command for logs and errors
    pub fn display_command(&self, program: &str, args: &[&str]) -> String {
        let mut parts = Vec::with_capacity(args.len() + 1);
        parts.push(quote(&self.mask(program)));
        parts.extend(args.iter().map(|arg| quote(&self.mask(arg))));
        parts.join(" ")
    }

    /// Run git and fail with [`DeployError::CommandFailed`] on a non-zero exit
    pub async fn git(&self, args: &[&str]) -> DeployResult<CommandOutput> {
        self.run("git", args).await
    }

    /// Run git and return its output whatever the exit status.
    ///
    /// Only failing to spawn git is an error.
    pub async fn try_git(&self, args: &[&str]) -> DeployResult<CommandOutput> {
        self.execute("git", args).await
    }

    /// Run `program` and fail on a non-zero exit
    pub async fn run(&self, program: &str, args: &[&str]) -> DeployResult<CommandOutput> {
        let output = self.execute(program, args).await?;
        if output.success() {
            return Ok(output);
        }

        let mut stderr = output.stderr.trim().to_string();
        if is_auth_error(&stderr) {
            let url = args
                .iter()
                .find(|a| a.contains('@') || a.starts_with("http"))
                .map(|s| self.mask(s))
                .unwrap_or_else(|| "remote".to_string());
            stderr.push_str("\n\n");
            stderr.push_str(&auth_error_message(&url));
        }

        Err(DeployError::CommandFailed {
            command: self.display_command(program, args),
            code: output.code,
            stderr,
        })
    }

    /// Run a trusted command line through `sh -c`.
    ///
    /// Used only for the post-sync command from the CI configuration.
    pub async fn shell(&self, command_line: &str) -> DeployResult<CommandOutput> {
        self.run("sh", &["-c", command_line]).await
    }

    async fn execute(&self, program: &str, args: &[&str]) -> DeployResult<CommandOutput> {
        info!("$ {}", self.display_command(program, args));

        let mut cmd = TokioCommand::new(program);
        cmd.current_dir(&self.work_dir);
        cmd.args(args);

        // Prevent credential prompts from hanging in automation
        cmd.env("GIT_TERMINAL_PROMPT", "0");

        // Force English output for consistent parsing
        cmd.env("LC_ALL", "C");
        cmd.env("LANG", "C");

        cmd.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let output = cmd.output().await.map_err(|e| {
            DeployError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to run `{}`: {e}", self.mask(program)),
            ))
        })?;

        let stdout = self.mask(&String::from_utf8_lossy(&output.stdout));
        let stderr = self.mask(&String::from_utf8_lossy(&output.stderr));

        if !stdout.trim().is_empty() {
            debug!("{}", stdout.trim_end());
        }
        if !stderr.trim().is_empty() {
            debug!("{}", stderr.trim_end());
        }

        Ok(CommandOutput {
            code: output.status.code(),
            stdout,
            stderr,
        })
    }
}

fn quote(arg: &str) -> String {
    shell_escape::escape(Cow::Borrowed(arg)).into_owned()
}

/// Shell-quoted rendering of an argv, e.g. the command line that started this process.
pub fn quote_command_line<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .map(|arg| quote(arg.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Check if an error message indicates an authentication failure
pub fn is_auth_error(stderr: &str) -> bool {
    let s = stderr.to_lowercase();
    s.contains("authentication")
        || s.contains("permission denied")
        || s.contains("could not read username")
        || s.contains("could not read password")
        || s.contains("host key verification failed")
        || s.contains("repository not found") // Often means no access
}

/// Generate helpful error message for authentication failures
pub fn auth_error_message(url: &str) -> String {
    let is_ssh = url.contains("git@") || url.starts_with("ssh://");

    if is_ssh {
        format!(
            r#"SSH authentication failed for '{url}'.

Check the deploy key:

1. The public half must be added to the deploy repository with write access
   (Settings > Deploy keys > "Allow write access").

2. The encrypted key file must be committed and match the key path used
   (see --key-path).

3. The encryption key environment variable must be the one the key file was
   encrypted with (see --secure-env-name).
"#
        )
    } else {
        format!(
            r#"HTTPS authentication failed for '{url}'.

Check the token:

1. The GH_TOKEN secret must be set for this build.

2. The token needs the `public_repo` scope (or `repo` for private repositories)
   and must not be revoked.
"#
        )
    }
}
