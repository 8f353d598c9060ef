//! Deploy orchestration
//!
//! Runs one deploy: gate, remote setup, branch checkout, sync, optional
//! command, commit and push. The starting checkout is recorded before
//! anything is modified and restored on every exit path, including errors.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{error, info, warn};

use crate::deploy::branch::DeployBranchController;
use crate::deploy::ci::{CiContext, CiFacts};
use crate::deploy::config::DeployConfig;
use crate::deploy::gate::{PushRightsInput, evaluate};
use crate::deploy::keys::{FernetDecryptor, KeyDecryptor};
use crate::deploy::remote::{
    Authenticator, BOT_EMAIL, REMOTE_NAME, configure_remote, ensure_git_identity,
};
use crate::deploy::sync::{MANIFEST_FILE, SyncPlan, copy_tree, sync};
use crate::operations::status::CheckoutPoint;
use crate::operations::{
    CommandRunner, checkout_point, head_author_email, is_dirty, open_repo, origin_repo_slug,
    stash_pop, stash_save,
};
use crate::{DeployError, DeployResult, DeployStep, RepoHandle};

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// What a deploy run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployReport {
    pub can_push: bool,
    /// The deploy branch did not exist and was created
    pub branch_created: bool,
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub committed: bool,
    pub pushed: bool,
}

/// The checkout to return to after the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartPoint {
    pub checkout: CheckoutPoint,
    /// Whether local changes were stashed and must be popped
    pub stashed: bool,
}

type StepResult<T> = Result<T, (DeployStep, DeployError)>;

trait AtStep<T> {
    fn at(self, step: DeployStep) -> StepResult<T>;
}

impl<T> AtStep<T> for DeployResult<T> {
    fn at(self, step: DeployStep) -> StepResult<T> {
        self.map_err(|e| (step, e))
    }
}

/// Sequences a deploy run for one CI job
pub struct Orchestrator<C: CiContext> {
    config: DeployConfig,
    ci: C,
    work_dir: PathBuf,
    command_line: String,
    decryptor: Box<dyn KeyDecryptor>,
    lookup: Lookup,
    env: Vec<(String, String)>,
    backoff: Option<Duration>,
}

impl<C: CiContext> Orchestrator<C> {
    /// `command_line` is the shell-quoted invocation, recorded in the
    /// commit message and in error reports.
    pub fn new(
        config: DeployConfig,
        ci: C,
        work_dir: impl Into<PathBuf>,
        command_line: impl Into<String>,
    ) -> Self {
        Self {
            config,
            ci,
            work_dir: work_dir.into(),
            command_line: command_line.into(),
            decryptor: Box::new(FernetDecryptor),
            lookup: Box::new(|name| std::env::var(name).ok()),
            env: Vec::new(),
            backoff: None,
        }
    }

    pub fn with_decryptor(mut self, decryptor: impl KeyDecryptor + 'static) -> Self {
        self.decryptor = Box::new(decryptor);
        self
    }

    /// Read secrets through `lookup` instead of the process environment
    pub fn with_secret_lookup(
        mut self,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.lookup = Box::new(lookup);
        self
    }

    /// Extra environment for every git command of the run
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_push_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Run the deploy and restore the starting checkout.
    ///
    /// A job without push rights is not an error: the report has
    /// `can_push == false` and nothing is pushed.
    pub async fn run(&self) -> DeployResult<DeployReport> {
        let repo = open_repo(&self.work_dir)
            .await
            .map_err(|e| self.fail(DeployStep::Prepare, e))?;
        let root = repo
            .work_dir()
            .map_err(|e| self.fail(DeployStep::Prepare, e))?
            .to_path_buf();

        let mut runner = CommandRunner::new(&root);
        for (key, value) in &self.env {
            runner.set_env(key.clone(), value.clone());
        }

        let start = prepare(&repo, &runner)
            .await
            .map_err(|e| self.fail(DeployStep::Prepare, e))?;

        let mut written = Vec::new();
        let outcome = self.deploy(&repo, &root, &mut runner, &mut written).await;
        let restored = restore(&runner, &start, &written).await;

        match (outcome, restored) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(e)) => Err(self.fail(DeployStep::Restore, e)),
            (Err((step, e)), restored) => {
                if let Err(re) = restored {
                    error!("Restoring the original checkout also failed: {re}");
                }
                Err(self.fail(step, e))
            }
        }
    }

    async fn deploy(
        &self,
        repo: &RepoHandle,
        root: &Path,
        runner: &mut CommandRunner,
        written: &mut Vec<PathBuf>,
    ) -> StepResult<DeployReport> {
        let facts = self.ci.facts();
        info!(
            "{} build {} of {} (branch `{}`, tag `{}`)",
            self.ci.name(),
            facts.build_number,
            facts.repo_slug,
            facts.branch,
            facts.tag
        );

        let can_push = self.can_push(repo, &facts).await.at(DeployStep::Prepare)?;

        let deploy_repo = match self.config.deploy_repo() {
            Some(repo) => repo.to_string(),
            None => origin_repo_slug(repo).await.at(DeployStep::Prepare)?,
        };
        let deploy_branch = self.config.deploy_branch(&deploy_repo);
        let deploy_dir = self.config.deploy_directory(&deploy_repo, &deploy_branch);

        let auth = if can_push {
            Some(
                Authenticator::resolve(
                    self.config.auth_mode(),
                    &self.config.key_path(&deploy_repo),
                    self.config.secure_env_name(),
                    |name| (self.lookup)(name),
                )
                .at(DeployStep::RemoteSetup)?,
            )
        } else {
            None
        };

        ensure_git_identity(runner).await.at(DeployStep::RemoteSetup)?;
        let remote = configure_remote(
            runner,
            &deploy_repo,
            can_push,
            auth.as_ref(),
            self.decryptor.as_ref(),
        )
        .await
        .at(DeployStep::RemoteSetup)?;

        // The checkout below may replace the built docs, so take a copy first
        let (_staging, source) = self.stage_built_docs(root).at(DeployStep::Prepare)?;

        let runner: &CommandRunner = runner;
        let mut controller = DeployBranchController::new(runner, remote.name.clone());
        if let Some(backoff) = self.backoff {
            controller = controller.with_backoff(backoff);
        }
        let push_enabled = can_push && self.config.push();

        let branch_created = controller
            .ensure_branch(&deploy_branch, push_enabled)
            .await
            .at(DeployStep::EnsureBranch)?;
        controller
            .checkout_for_sync(&deploy_branch)
            .await
            .at(DeployStep::Checkout)?;

        let plan = match &source {
            Some(source) => sync(
                root,
                source,
                &deploy_dir,
                &deploy_dir.join(MANIFEST_FILE),
                self.config.exclude(),
            )
            .at(DeployStep::Sync)?,
            None => SyncPlan::default(),
        };
        written.clone_from(&plan.added);

        if let Some(command) = self.config.command() {
            info!("Running command: {command}");
            runner.shell(command).await.at(DeployStep::Command)?;
        }

        let message = self.ci.commit_message(&facts, &self.command_line);
        let committed = controller
            .commit(&plan.added, &plan.removed, &message)
            .await
            .at(DeployStep::Commit)?;

        let pushed = if committed && push_enabled {
            controller
                .push(&deploy_branch, self.config.push_retries())
                .await
                .at(DeployStep::Push)?;
            info!("Docs deployed to {deploy_branch}");
            true
        } else {
            if committed && can_push {
                info!("Pushing is disabled. Not pushing the docs");
            } else if committed {
                info!("Don't have push access. Not pushing the docs");
            }
            false
        };

        drop(remote);
        Ok(DeployReport {
            can_push,
            branch_created,
            added: plan.added,
            removed: plan.removed,
            committed,
            pushed,
        })
    }

    async fn can_push(&self, repo: &RepoHandle, facts: &CiFacts) -> DeployResult<bool> {
        let author = head_author_email(repo).await?;
        let decision = evaluate(&PushRightsInput {
            whitelist: self.config.branch_whitelist(),
            branch: &facts.branch,
            is_pull_request: facts.is_pull_request,
            tag: &facts.tag,
            is_fork: facts.is_fork,
            build_tags_allowed: self.config.build_tags(),
            last_commit_is_self_authored: author.eq_ignore_ascii_case(BOT_EMAIL),
        });
        if decision.allowed {
            info!("This job may push the docs");
        } else {
            warn!("This job will not push the docs");
        }
        Ok(decision.allowed)
    }

    /// Source tree to sync: a temporary copy of the built docs, the built
    /// docs themselves with `temp-dir` off, or nothing with sync off.
    fn stage_built_docs(
        &self,
        root: &Path,
    ) -> DeployResult<(Option<tempfile::TempDir>, Option<PathBuf>)> {
        if !self.config.sync() {
            return Ok((None, None));
        }
        let built = self
            .config
            .built_docs()
            .ok_or_else(|| DeployError::Config("no built docs directory given".to_string()))?;
        let built_abs = root.join(built);
        if !built_abs.exists() {
            return Err(DeployError::InvalidInput(format!(
                "Built docs `{}` do not exist",
                built.display()
            )));
        }
        if !self.config.temp_dir() {
            return Ok((None, Some(built.to_path_buf())));
        }

        let staging = tempfile::Builder::new().prefix("docs-deploy").tempdir()?;
        let name = built_abs
            .file_name()
            .unwrap_or_else(|| OsStr::new("docs"));
        let staged = staging.path().join(name);
        info!("Copying {} to {}", built.display(), staged.display());
        copy_tree(&built_abs, &staged)?;
        Ok((Some(staging), Some(staged)))
    }

    fn fail(&self, step: DeployStep, source: DeployError) -> DeployError {
        let err = DeployError::StepFailed {
            step,
            command_line: self.command_line.clone(),
            source: Box::new(source),
        };
        error!("{err}");
        err
    }
}

/// Record the current checkout and stash local changes
pub async fn prepare(repo: &RepoHandle, runner: &CommandRunner) -> DeployResult<StartPoint> {
    let checkout = checkout_point(repo).await?;
    let stashed = if is_dirty(repo).await? {
        info!("Stashing local changes");
        stash_save(runner, "docs-deploy: local changes before deploying").await?
    } else {
        false
    };
    Ok(StartPoint { checkout, stashed })
}

/// Return to the starting checkout, drop the scratch branch and pop the stash.
///
/// `written` are the paths synced in this run; any left uncommitted are deleted.
pub async fn restore(
    runner: &CommandRunner,
    start: &StartPoint,
    written: &[PathBuf],
) -> DeployResult<()> {
    info!("Checking out {}", start.checkout.target());
    DeployBranchController::new(runner, REMOTE_NAME)
        .teardown(&start.checkout, written)
        .await?;
    if start.stashed {
        stash_pop(runner).await?;
    }
    Ok(())
}
