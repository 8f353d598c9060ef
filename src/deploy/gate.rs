//! Push-rights gate
//!
//! Decides from CI facts whether the current job may publish. A refusal is
//! not an error: most CI jobs (feature branches, pull requests) are expected
//! to be refused, and the deploy still syncs and commits locally so the
//! build output can be inspected.

use std::fmt;

use log::warn;
use regex::Regex;

use crate::{DeployError, DeployResult};

/// Regex patterns naming the branches allowed to publish.
///
/// Each pattern must match the whole branch name; a plain branch name is a
/// valid pattern matching only itself.
#[derive(Debug, Clone, Default)]
pub struct BranchWhitelist {
    patterns: Vec<Regex>,
}

impl BranchWhitelist {
    pub fn new<I, S>(patterns: I) -> DeployResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                Regex::new(&format!("^(?:{p})$")).map_err(|source| DeployError::InvalidPattern {
                    pattern: p.to_string(),
                    source,
                })
            })
            .collect::<DeployResult<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, branch: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(branch))
    }
}

/// Inputs to [`evaluate`]
#[derive(Debug, Clone, Copy)]
pub struct PushRightsInput<'a> {
    pub whitelist: &'a BranchWhitelist,
    pub branch: &'a str,
    pub is_pull_request: bool,
    pub tag: &'a str,
    pub is_fork: bool,
    pub build_tags_allowed: bool,
    pub last_commit_is_self_authored: bool,
}

/// A reason the job may not publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refusal {
    TagBuildsDisabled { tag: String },
    BranchNotWhitelisted { branch: String },
    PullRequest,
    Fork,
    SelfAuthoredCommit,
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refusal::TagBuildsDisabled { tag } => write!(
                f,
                "The docs are not pushed on tag builds (this is tag `{tag}`). To push on tag builds, use --build-tags"
            ),
            Refusal::BranchNotWhitelisted { branch } => write!(
                f,
                "The docs are only pushed from whitelisted branches, and `{branch}` is not one. \
                 Use --branch-whitelist to add it"
            ),
            Refusal::PullRequest => {
                f.write_str("The docs are not pushed on pull request builds")
            }
            Refusal::Fork => f.write_str("The docs are not pushed on builds of forks"),
            Refusal::SelfAuthoredCommit => f.write_str(
                "The last commit on this branch was made by this tool. Not pushing to avoid an infinite build loop",
            ),
        }
    }
}

/// The gate's verdict together with every reason for refusal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushDecision {
    pub allowed: bool,
    pub refusals: Vec<Refusal>,
}

/// Evaluate every condition and collect all refusals.
///
/// Tag builds follow their own policy: only `build_tags_allowed` counts and
/// the branch checks do not apply.
pub fn evaluate(input: &PushRightsInput<'_>) -> PushDecision {
    let mut refusals = Vec::new();

    if !input.tag.is_empty() {
        if !input.build_tags_allowed {
            refusals.push(Refusal::TagBuildsDisabled {
                tag: input.tag.to_string(),
            });
        }
    } else {
        if !input.whitelist.matches(input.branch) {
            refusals.push(Refusal::BranchNotWhitelisted {
                branch: input.branch.to_string(),
            });
        }
        if input.is_pull_request {
            refusals.push(Refusal::PullRequest);
        }
        if input.is_fork {
            refusals.push(Refusal::Fork);
        }
        if input.last_commit_is_self_authored {
            refusals.push(Refusal::SelfAuthoredCommit);
        }
    }

    for refusal in &refusals {
        warn!("{refusal}");
    }

    PushDecision {
        allowed: refusals.is_empty(),
        refusals,
    }
}

/// Whether the current job may push to the deploy branch.
pub fn determine_push_rights(
    branch_whitelist: &BranchWhitelist,
    branch: &str,
    is_pull_request: bool,
    tag: &str,
    is_fork: bool,
    build_tags_allowed: bool,
    last_commit_is_self_authored: bool,
) -> bool {
    evaluate(&PushRightsInput {
        whitelist: branch_whitelist,
        branch,
        is_pull_request,
        tag,
        is_fork,
        build_tags_allowed,
        last_commit_is_self_authored,
    })
    .allowed
}
