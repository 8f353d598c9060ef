//! Git operations module
//!
//! Read-only queries go through the gix (Gitoxide) library; everything that
//! mutates the repository or talks to a remote runs the git CLI through
//! [`CommandRunner`].

pub mod branch;
pub mod command;
pub mod introspection;
pub mod push;
pub mod remote;
pub mod stash;
pub mod status;

// Re-export operation functions
pub use command::{
    CommandOutput, CommandRunner, SECRET_MASK, Secret, auth_error_message, is_auth_error,
    quote_command_line,
};
pub use introspection::{GitUrl, origin_repo_slug, parse_git_url, remote_repo_slug};
pub use push::{PushAttempt, is_push_conflict, pull_prefer_ours, push_branch};
pub use remote::{add_remote, fetch, list_remotes, remote_exists, remove_remote};
pub use stash::{stash_pop, stash_save};
pub use status::{
    CheckoutPoint, checkout_point, current_branch, head_author_email, head_commit, is_dirty,
    local_branch_exists, open_repo, remote_branch_exists,
};
