// Command line entry point: `docs-deploy deploy` publishes built docs from a CI job.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use docs_deploy::deploy::config::{CONFIG_SECTION, DEFAULT_CONFIG_FILE};
use docs_deploy::{CiProvider, CliOverrides, DeployConfig, FileConfig, Orchestrator, quote_command_line};
use env_logger::Env;

#[derive(Parser)]
#[command(
    name = "docs-deploy",
    version,
    about = "Deploy built documentation from CI to a GitHub Pages branch"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sync the built docs into the deploy branch, commit, and push if allowed
    Deploy(DeployArgs),
}

#[derive(Args)]
struct DeployArgs {
    /// Directory of the deploy branch to put the docs in
    deploy_directory: Option<PathBuf>,

    /// Location of the built docs, relative to the repository root
    #[arg(long)]
    built_docs: Option<PathBuf>,

    /// Repository to deploy to, as owner/repo (default: the origin remote)
    #[arg(long)]
    deploy_repo: Option<String>,

    /// Branch to deploy to (default: gh-pages, or master for *.github.io)
    #[arg(long)]
    deploy_branch_name: Option<String>,

    /// Authenticate with the GH_TOKEN secret instead of a deploy key
    #[arg(long)]
    token: bool,

    /// Encrypted deploy key file
    #[arg(long)]
    key_path: Option<PathBuf>,

    /// Environment variable holding the key file's encryption key
    #[arg(long)]
    secure_env_name: Option<String>,

    /// Regex of a branch that may deploy (repeatable)
    #[arg(long = "branch-whitelist")]
    branch_whitelist: Vec<String>,

    /// Don't add master to the branch whitelist
    #[arg(long)]
    no_require_master: bool,

    /// Deploy on tag builds
    #[arg(long)]
    build_tags: bool,

    /// Glob of files to leave out of the deploy (repeatable)
    #[arg(long)]
    exclude: Vec<String>,

    /// Shell command to run after syncing, before committing
    #[arg(long)]
    command: Option<String>,

    /// Don't sync the built docs (use with --command)
    #[arg(long)]
    no_sync: bool,

    /// Commit but don't push
    #[arg(long)]
    no_push: bool,

    /// Sync straight from the built docs instead of a temporary copy
    #[arg(long)]
    no_temp_dir: bool,

    /// Maximum push attempts when the remote branch moves
    #[arg(long)]
    push_retries: Option<u32>,

    /// CI provider: travis, github-actions or auto
    #[arg(long)]
    ci: Option<CiProvider>,

    /// YAML file holding a `docs-deploy` section
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Repository to deploy from
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,
}

impl DeployArgs {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            deploy_directory: self.deploy_directory.clone(),
            built_docs: self.built_docs.clone(),
            deploy_repo: self.deploy_repo.clone(),
            deploy_branch_name: self.deploy_branch_name.clone(),
            token: self.token.then_some(true),
            key_path: self.key_path.clone(),
            secure_env_name: self.secure_env_name.clone(),
            branch_whitelist: self.branch_whitelist.clone(),
            require_master: self.no_require_master.then_some(false),
            build_tags: self.build_tags.then_some(true),
            exclude: self.exclude.clone(),
            command: self.command.clone(),
            sync: self.no_sync.then_some(false),
            push: self.no_push.then_some(false),
            temp_dir: self.no_temp_dir.then_some(false),
            push_retries: self.push_retries,
            ci: self.ci,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let command_line = quote_command_line(std::env::args());

    match cli.cmd {
        Command::Deploy(args) => {
            let config_path = args.work_dir.join(&args.config);
            let file = FileConfig::load(&config_path, CONFIG_SECTION)?;
            let config = DeployConfig::merge(args.overrides(), file)?;
            let ci = config
                .ci()
                .context_from_env()
                .context("could not determine the CI provider")?;

            let report = Orchestrator::new(config, ci, &args.work_dir, command_line)
                .run()
                .await?;

            if !report.can_push {
                log::info!("Finished without pushing (this job may not deploy)");
            }
        }
    }
    Ok(())
}
