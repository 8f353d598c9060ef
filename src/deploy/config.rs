//! Deploy configuration
//!
//! Two read-only sources are merged once into an immutable [`DeployConfig`]:
//! command line overrides and a section of a YAML file (the CI configuration
//! file by default). Command line values win, then the file, then built-in
//! defaults. List values from both sources are combined.

use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Deserialize;

use crate::deploy::ci::CiProvider;
use crate::deploy::gate::BranchWhitelist;
use crate::deploy::remote::AuthMode;
use crate::deploy::sync::ExcludeSet;
use crate::{DeployError, DeployResult};

/// Default configuration file
pub const DEFAULT_CONFIG_FILE: &str = ".travis.yml";

/// Section of the configuration file holding the deploy settings
pub const CONFIG_SECTION: &str = "docs-deploy";

/// Default name of the environment variable holding the key file's encryption key
pub const DEFAULT_SECURE_ENV_NAME: &str = "DOCS_DEPLOY_ENCRYPTION_KEY";

pub const DEFAULT_PUSH_RETRIES: u32 = 3;

/// Settings read from the configuration file section
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileConfig {
    pub deploy_directory: Option<PathBuf>,
    pub built_docs: Option<PathBuf>,
    pub deploy_repo: Option<String>,
    pub deploy_branch_name: Option<String>,
    pub token: Option<bool>,
    pub key_path: Option<PathBuf>,
    pub secure_env_name: Option<String>,
    #[serde(default)]
    pub branch_whitelist: Vec<String>,
    pub require_master: Option<bool>,
    pub build_tags: Option<bool>,
    #[serde(default)]
    pub exclude: Vec<String>,
    pub command: Option<String>,
    pub sync: Option<bool>,
    pub push: Option<bool>,
    pub temp_dir: Option<bool>,
    pub push_retries: Option<u32>,
    pub ci: Option<CiProvider>,
}

impl FileConfig {
    /// Keys accepted in the configuration section
    pub const KNOWN_KEYS: &'static [&'static str] = &[
        "deploy-directory",
        "built-docs",
        "deploy-repo",
        "deploy-branch-name",
        "token",
        "key-path",
        "secure-env-name",
        "branch-whitelist",
        "require-master",
        "build-tags",
        "exclude",
        "command",
        "sync",
        "push",
        "temp-dir",
        "push-retries",
        "ci",
    ];

    /// Load `section` from the YAML file at `path`.
    ///
    /// A missing file or a file without the section yields the empty config.
    pub fn load(path: &Path, section: &str) -> DeployResult<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} not found, using command line settings only", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(DeployError::Io(e)),
        };
        let config = Self::from_yaml_str(&text, section).map_err(|e| match e {
            DeployError::Config(msg) => {
                DeployError::Config(format!("{}: {msg}", path.display()))
            }
            other => other,
        })?;
        info!("Read `{section}` settings from {}", path.display());
        Ok(config)
    }

    /// Parse `section` out of a YAML document
    pub fn from_yaml_str(yaml: &str, section: &str) -> DeployResult<Self> {
        let document: serde_yaml::Value = serde_yaml::from_str(yaml)
            .map_err(|e| DeployError::Config(format!("invalid YAML: {e}")))?;

        let Some(raw) = document.get(section) else {
            return Ok(Self::default());
        };
        if raw.is_null() {
            return Ok(Self::default());
        }
        let Some(mapping) = raw.as_mapping() else {
            return Err(DeployError::Config(format!(
                "the `{section}` section must be a mapping"
            )));
        };

        // Report every unknown key at once instead of failing on the first
        let unknown: Vec<String> = mapping
            .keys()
            .map(|k| match k.as_str() {
                Some(s) => s.to_string(),
                None => format!("{k:?}"),
            })
            .filter(|k| !Self::KNOWN_KEYS.contains(&k.as_str()))
            .collect();
        if !unknown.is_empty() {
            return Err(DeployError::UnknownConfigKeys {
                section: section.to_string(),
                keys: unknown,
            });
        }

        serde_yaml::from_value(raw.clone())
            .map_err(|e| DeployError::Config(format!("invalid `{section}` section: {e}")))
    }
}

/// Values given on the command line; `None` means "not given"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    pub deploy_directory: Option<PathBuf>,
    pub built_docs: Option<PathBuf>,
    pub deploy_repo: Option<String>,
    pub deploy_branch_name: Option<String>,
    pub token: Option<bool>,
    pub key_path: Option<PathBuf>,
    pub secure_env_name: Option<String>,
    pub branch_whitelist: Vec<String>,
    pub require_master: Option<bool>,
    pub build_tags: Option<bool>,
    pub exclude: Vec<String>,
    pub command: Option<String>,
    pub sync: Option<bool>,
    pub push: Option<bool>,
    pub temp_dir: Option<bool>,
    pub push_retries: Option<u32>,
    pub ci: Option<CiProvider>,
}

/// Fully merged settings for one deploy run
#[derive(Debug, Clone)]
pub struct DeployConfig {
    deploy_directory: Option<PathBuf>,
    built_docs: Option<PathBuf>,
    deploy_repo: Option<String>,
    deploy_branch_name: Option<String>,
    auth_mode: AuthMode,
    key_path: Option<PathBuf>,
    secure_env_name: String,
    branch_whitelist: BranchWhitelist,
    build_tags: bool,
    exclude: ExcludeSet,
    command: Option<String>,
    sync: bool,
    push: bool,
    temp_dir: bool,
    push_retries: u32,
    ci: CiProvider,
}

impl DeployConfig {
    /// Merge both sources and validate the result
    pub fn merge(cli: CliOverrides, file: FileConfig) -> DeployResult<Self> {
        let require_master = cli.require_master.or(file.require_master).unwrap_or(true);

        let mut patterns: Vec<String> = Vec::new();
        if require_master {
            patterns.push("master".to_string());
        }
        for pattern in file.branch_whitelist.into_iter().chain(cli.branch_whitelist) {
            if !patterns.contains(&pattern) {
                patterns.push(pattern);
            }
        }
        let branch_whitelist = BranchWhitelist::new(&patterns)?;

        let mut excludes: Vec<String> = Vec::new();
        for pattern in file.exclude.into_iter().chain(cli.exclude) {
            if !excludes.contains(&pattern) {
                excludes.push(pattern);
            }
        }
        let exclude = ExcludeSet::new(&excludes)?;

        let auth_mode = if cli.token.or(file.token).unwrap_or(false) {
            AuthMode::Token
        } else {
            AuthMode::DeployKey
        };

        let sync = cli.sync.or(file.sync).unwrap_or(true);
        let built_docs = cli.built_docs.or(file.built_docs);
        if sync && built_docs.is_none() {
            return Err(DeployError::Config(
                "--built-docs is required unless syncing is disabled with --no-sync".to_string(),
            ));
        }

        let push_retries = cli
            .push_retries
            .or(file.push_retries)
            .unwrap_or(DEFAULT_PUSH_RETRIES);
        if push_retries == 0 {
            return Err(DeployError::Config(
                "push-retries must be at least 1".to_string(),
            ));
        }

        let deploy_repo = cli.deploy_repo.or(file.deploy_repo);
        if let Some(repo) = &deploy_repo
            && !is_repo_url(repo)
            && repo.split('/').filter(|p| !p.is_empty()).count() != 2
        {
            return Err(DeployError::Config(format!(
                "deploy-repo `{repo}` must be of the form owner/repo"
            )));
        }

        Ok(Self {
            deploy_directory: cli.deploy_directory.or(file.deploy_directory),
            built_docs,
            deploy_repo,
            deploy_branch_name: cli.deploy_branch_name.or(file.deploy_branch_name),
            auth_mode,
            key_path: cli.key_path.or(file.key_path),
            secure_env_name: cli
                .secure_env_name
                .or(file.secure_env_name)
                .unwrap_or_else(|| DEFAULT_SECURE_ENV_NAME.to_string()),
            branch_whitelist,
            build_tags: cli.build_tags.or(file.build_tags).unwrap_or(false),
            exclude,
            command: cli.command.or(file.command),
            sync,
            push: cli.push.or(file.push).unwrap_or(true),
            temp_dir: cli.temp_dir.or(file.temp_dir).unwrap_or(true),
            push_retries,
            ci: cli.ci.or(file.ci).unwrap_or_default(),
        })
    }

    /// Configured deploy repository, if any (otherwise `origin` is used)
    pub fn deploy_repo(&self) -> Option<&str> {
        self.deploy_repo.as_deref()
    }

    /// Deploy branch for `deploy_repo`: `master` for `*.github.io` repositories, else `gh-pages`
    pub fn deploy_branch(&self, deploy_repo: &str) -> String {
        match &self.deploy_branch_name {
            Some(name) => name.clone(),
            None if is_github_io(deploy_repo) => "master".to_string(),
            None => "gh-pages".to_string(),
        }
    }

    /// Directory inside the deploy branch that receives the docs
    pub fn deploy_directory(&self, deploy_repo: &str, deploy_branch: &str) -> PathBuf {
        match &self.deploy_directory {
            Some(dir) => dir.clone(),
            None if is_github_io(deploy_repo) && deploy_branch == "master" => PathBuf::from("."),
            None => PathBuf::from("docs"),
        }
    }

    pub fn built_docs(&self) -> Option<&Path> {
        self.built_docs.as_deref()
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    /// Encrypted deploy key file, `github_deploy_key_<owner>_<repo>.enc` by default
    pub fn key_path(&self, deploy_repo: &str) -> PathBuf {
        match &self.key_path {
            Some(path) => path.clone(),
            None => {
                let slug: String = deploy_repo
                    .trim_end_matches(".git")
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
                    .collect();
                PathBuf::from(format!("github_deploy_key_{slug}.enc"))
            }
        }
    }

    pub fn secure_env_name(&self) -> &str {
        &self.secure_env_name
    }

    pub fn branch_whitelist(&self) -> &BranchWhitelist {
        &self.branch_whitelist
    }

    pub fn build_tags(&self) -> bool {
        self.build_tags
    }

    pub fn exclude(&self) -> &ExcludeSet {
        &self.exclude
    }

    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    pub fn sync(&self) -> bool {
        self.sync
    }

    pub fn push(&self) -> bool {
        self.push
    }

    pub fn temp_dir(&self) -> bool {
        self.temp_dir
    }

    pub fn push_retries(&self) -> u32 {
        self.push_retries
    }

    pub fn ci(&self) -> CiProvider {
        self.ci
    }
}

/// Whether the repository part of `owner/repo` ends in `.github.io`
pub fn is_github_io(deploy_repo: &str) -> bool {
    deploy_repo
        .trim_end_matches(".git")
        .rsplit('/')
        .next()
        .is_some_and(|name| name.ends_with(".github.io"))
}

/// Whether `deploy_repo` is a full git URL or a local path rather than `owner/repo`
pub fn is_repo_url(deploy_repo: &str) -> bool {
    deploy_repo.contains("://") || deploy_repo.starts_with('/') || deploy_repo.contains('@')
}
