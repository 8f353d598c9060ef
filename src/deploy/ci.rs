//! CI provider abstraction
//!
//! A [`CiContext`] turns the provider's environment into [`CiFacts`] once per
//! run. Environment access goes through a lookup function so the providers
//! can be driven from a plain map in tests.

use std::collections::HashMap;
use std::fmt::Write as _;

use log::debug;
use serde::Deserialize;

use crate::{DeployError, DeployResult};

const UNKNOWN: &str = "<unknown>";

/// Immutable snapshot of the CI job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CiFacts {
    /// Branch being built; for pull requests, the branch the PR comes from
    pub branch: String,
    /// Tag being built, empty when this is not a tag build
    pub tag: String,
    pub is_pull_request: bool,
    pub is_fork: bool,
    /// `owner/repo` of the repository being built
    pub repo_slug: String,
    pub build_number: String,
    pub commit: String,
    pub job_url: String,
}

/// A CI provider the deploy runs under
pub trait CiContext {
    /// Human readable provider name, used in messages
    fn name(&self) -> &'static str;

    fn facts(&self) -> CiFacts;

    /// Commit message for the deploy commit
    fn commit_message(&self, facts: &CiFacts, command_line: &str) -> String {
        default_commit_message(self.name(), facts, command_line)
    }
}

impl<C: CiContext + ?Sized> CiContext for Box<C> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn facts(&self) -> CiFacts {
        (**self).facts()
    }

    fn commit_message(&self, facts: &CiFacts, command_line: &str) -> String {
        (**self).commit_message(facts, command_line)
    }
}

fn default_commit_message(provider: &str, facts: &CiFacts, command_line: &str) -> String {
    let (kind, name) = if facts.tag.is_empty() {
        ("branch", facts.branch.as_str())
    } else {
        ("tag", facts.tag.as_str())
    };

    let mut msg = String::new();
    let _ = writeln!(
        msg,
        "Update docs after building {provider} build {} of {}",
        facts.build_number, facts.repo_slug
    );
    let _ = writeln!(msg);
    let _ = writeln!(msg, "The docs were built from the {kind} '{name}' against the commit");
    let _ = writeln!(msg, "{}.", facts.commit);
    let _ = writeln!(msg);
    let _ = writeln!(msg, "The {provider} build that generated this commit is at");
    let _ = writeln!(msg, "{}.", facts.job_url);
    let _ = writeln!(msg);
    let _ = writeln!(msg, "The docs-deploy command that was run is");
    let _ = writeln!(msg);
    let _ = writeln!(msg, "    {command_line}");
    msg
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

fn env_lookup() -> Lookup {
    Box::new(|name| std::env::var(name).ok())
}

fn map_lookup<I, K, V>(vars: I) -> Lookup
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let map: HashMap<String, String> = vars
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    Box::new(move |name| map.get(name).cloned())
}

/// Travis CI, configured through `TRAVIS_*` variables
pub struct TravisCi {
    lookup: Lookup,
}

impl TravisCi {
    pub fn from_env() -> Self {
        Self {
            lookup: env_lookup(),
        }
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            lookup: map_lookup(vars),
        }
    }

    fn var(&self, name: &str) -> String {
        (self.lookup)(name).unwrap_or_default()
    }
}

impl CiContext for TravisCi {
    fn name(&self) -> &'static str {
        "Travis CI"
    }

    fn facts(&self) -> CiFacts {
        // TRAVIS_PULL_REQUEST is "false" or the PR number
        let pr = self.var("TRAVIS_PULL_REQUEST");
        let is_pull_request = !pr.is_empty() && pr != "false";

        // On PR builds TRAVIS_BRANCH is the target branch
        let branch = if is_pull_request {
            self.var("TRAVIS_PULL_REQUEST_BRANCH")
        } else {
            self.var("TRAVIS_BRANCH")
        };

        let repo_slug = self.var("TRAVIS_REPO_SLUG");
        let pr_slug = self.var("TRAVIS_PULL_REQUEST_SLUG");
        let is_fork = !pr_slug.is_empty() && pr_slug != repo_slug;

        CiFacts {
            branch,
            tag: self.var("TRAVIS_TAG"),
            is_pull_request,
            is_fork,
            repo_slug,
            build_number: or_unknown(self.var("TRAVIS_BUILD_NUMBER")),
            commit: or_unknown(self.var("TRAVIS_COMMIT")),
            job_url: or_unknown(self.var("TRAVIS_JOB_WEB_URL")),
        }
    }
}

/// GitHub Actions, configured through `GITHUB_*` variables
pub struct GithubActions {
    lookup: Lookup,
}

#[derive(Debug, Deserialize)]
struct PullRequestEvent {
    pull_request: Option<PullRequestPayload>,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    head: PullRequestHead,
}

#[derive(Debug, Deserialize)]
struct PullRequestHead {
    repo: Option<EventRepo>,
}

#[derive(Debug, Deserialize)]
struct EventRepo {
    full_name: String,
}

impl GithubActions {
    pub fn from_env() -> Self {
        Self {
            lookup: env_lookup(),
        }
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            lookup: map_lookup(vars),
        }
    }

    fn var(&self, name: &str) -> String {
        (self.lookup)(name).unwrap_or_default()
    }

    /// Repository the pull request comes from, read from the event payload
    fn head_repo(&self) -> Option<String> {
        let path = (self.lookup)("GITHUB_EVENT_PATH")?;
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                debug!("Could not read event payload {path}: {e}");
                return None;
            }
        };
        match serde_json::from_str::<PullRequestEvent>(&text) {
            Ok(event) => event.pull_request?.head.repo.map(|r| r.full_name),
            Err(e) => {
                debug!("Could not parse event payload {path}: {e}");
                None
            }
        }
    }
}

impl CiContext for GithubActions {
    fn name(&self) -> &'static str {
        "GitHub Actions"
    }

    fn facts(&self) -> CiFacts {
        let git_ref = self.var("GITHUB_REF");
        let head_ref = self.var("GITHUB_HEAD_REF");
        let branch = if head_ref.is_empty() {
            git_ref
                .strip_prefix("refs/heads/")
                .unwrap_or_default()
                .to_string()
        } else {
            head_ref
        };
        let tag = git_ref
            .strip_prefix("refs/tags/")
            .unwrap_or_default()
            .to_string();

        let event = self.var("GITHUB_EVENT_NAME");
        let is_pull_request = event == "pull_request" || event == "pull_request_target";

        let repo_slug = self.var("GITHUB_REPOSITORY");
        let is_fork = is_pull_request
            && self
                .head_repo()
                .is_some_and(|head| !head.is_empty() && head != repo_slug);

        let run_id = self.var("GITHUB_RUN_ID");
        let server = self.var("GITHUB_SERVER_URL");
        let job_url = if run_id.is_empty() || repo_slug.is_empty() {
            UNKNOWN.to_string()
        } else {
            let server = if server.is_empty() {
                "https://github.com"
            } else {
                server.as_str()
            };
            format!("{server}/{repo_slug}/actions/runs/{run_id}")
        };

        CiFacts {
            branch,
            tag,
            is_pull_request,
            is_fork,
            repo_slug,
            build_number: or_unknown(self.var("GITHUB_RUN_NUMBER")),
            commit: or_unknown(self.var("GITHUB_SHA")),
            job_url,
        }
    }
}

fn or_unknown(value: String) -> String {
    if value.is_empty() {
        UNKNOWN.to_string()
    } else {
        value
    }
}

/// Which CI provider to read facts from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CiProvider {
    Travis,
    GithubActions,
    #[default]
    Auto,
}

impl std::str::FromStr for CiProvider {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "travis" => Ok(CiProvider::Travis),
            "github-actions" => Ok(CiProvider::GithubActions),
            "auto" => Ok(CiProvider::Auto),
            other => Err(DeployError::Config(format!(
                "Unknown CI provider `{other}` (expected travis, github-actions or auto)"
            ))),
        }
    }
}

impl CiProvider {
    /// Resolve `Auto` from the `TRAVIS` / `GITHUB_ACTIONS` markers
    pub fn detect(self, lookup: impl Fn(&str) -> Option<String>) -> DeployResult<CiProvider> {
        if self != CiProvider::Auto {
            return Ok(self);
        }
        if lookup("TRAVIS").as_deref() == Some("true") {
            Ok(CiProvider::Travis)
        } else if lookup("GITHUB_ACTIONS").as_deref() == Some("true") {
            Ok(CiProvider::GithubActions)
        } else {
            Err(DeployError::Config(
                "Not running on a supported CI provider (neither TRAVIS nor GITHUB_ACTIONS is set). \
                 Use --ci to choose one"
                    .to_string(),
            ))
        }
    }

    /// The context for this provider, reading the process environment
    pub fn context_from_env(self) -> DeployResult<Box<dyn CiContext>> {
        match self.detect(|name| std::env::var(name).ok())? {
            CiProvider::Travis => Ok(Box::new(TravisCi::from_env())),
            CiProvider::GithubActions => Ok(Box::new(GithubActions::from_env())),
            CiProvider::Auto => Err(DeployError::Config("CI provider not resolved".to_string())),
        }
    }
}
