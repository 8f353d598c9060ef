//! Deployment protocol
//!
//! Built on the git plumbing in [`crate::operations`]. The pieces are usable
//! on their own; [`Orchestrator`] runs them in order for one CI job.

pub mod branch;
pub mod ci;
pub mod config;
pub mod gate;
pub mod keys;
pub mod orchestrator;
pub mod remote;
pub mod sync;

pub use branch::{DeployBranchController, DeployBranchState, SCRATCH_BRANCH, SENTINEL_FILE};
pub use ci::{CiContext, CiFacts, CiProvider, GithubActions, TravisCi};
pub use config::{CliOverrides, DeployConfig, FileConfig};
pub use gate::{BranchWhitelist, PushDecision, PushRightsInput, Refusal, determine_push_rights, evaluate};
pub use keys::{FernetDecryptor, KeyDecryptor, KeyStore};
pub use orchestrator::{DeployReport, Orchestrator, StartPoint};
pub use remote::{
    AuthMode, Authenticator, BOT_EMAIL, BOT_NAME, REMOTE_NAME, RemoteHandle, configure_remote,
    ensure_git_identity,
};
pub use sync::{ExcludeSet, MANIFEST_FILE, SyncPlan, sync};
