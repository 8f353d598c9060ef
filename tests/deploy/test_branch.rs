//! Tests for the deploy branch controller against a local bare remote.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use docs_deploy::deploy::{REMOTE_NAME, SCRATCH_BRANCH};
use docs_deploy::operations::{CheckoutPoint, PushAttempt, pull_prefer_ours};
use docs_deploy::{
    DeployBranchController, DeployBranchState, DeployError, FernetDecryptor, configure_remote,
};

use super::support::{Fixture, install_hook, write_file};

async fn with_remote(fixture: &Fixture) -> docs_deploy::CommandRunner {
    let mut runner = fixture.runner();
    configure_remote(
        &mut runner,
        &fixture.remote_url(),
        false,
        None,
        &FernetDecryptor,
    )
    .await
    .unwrap();
    runner
}

#[tokio::test]
async fn test_ensure_branch_creates_and_pushes() {
    let fixture = Fixture::new();
    let runner = with_remote(&fixture).await;
    let mut controller = DeployBranchController::new(&runner, REMOTE_NAME);

    assert!(!controller.branch_exists("gh-pages").await.unwrap());
    assert!(controller.ensure_branch("gh-pages", true).await.unwrap());

    assert!(fixture.remote_has_branch("gh-pages"));
    assert_eq!(fixture.remote_files("gh-pages"), vec![".nojekyll".to_string()]);
    assert!(controller.branch_exists("gh-pages").await.unwrap());
    assert_eq!(controller.state(), &DeployBranchState::ExistsRemotely);

    // Back where we started, without the scratch branch
    assert_eq!(fixture.current_branch(), "master");
    assert!(!fixture.local_branches().contains(&SCRATCH_BRANCH.to_string()));
    assert!(fixture.path().join("README.md").exists());

    // Second call finds the branch
    assert!(!controller.ensure_branch("gh-pages", true).await.unwrap());
}

#[tokio::test]
async fn test_ensure_branch_without_push() {
    let fixture = Fixture::new();
    let runner = with_remote(&fixture).await;
    let mut controller = DeployBranchController::new(&runner, REMOTE_NAME);

    assert!(controller.ensure_branch("gh-pages", false).await.unwrap());
    assert!(!fixture.remote_has_branch("gh-pages"));
    assert_eq!(controller.state(), &DeployBranchState::Missing);

    // Checkout starts from an empty tree
    controller.checkout_for_sync("gh-pages").await.unwrap();
    assert!(!fixture.path().join("README.md").exists());
    write_file(fixture.path(), "docs/index.html", "<h1>docs</h1>");
    let committed = controller
        .commit(&[PathBuf::from("docs/index.html")], &[], "Deploy docs")
        .await
        .unwrap();
    assert!(committed);
}

#[tokio::test]
async fn test_checkout_tracks_remote_branch() {
    let fixture = Fixture::new();
    let runner = with_remote(&fixture).await;
    let mut controller = DeployBranchController::new(&runner, REMOTE_NAME);
    controller.ensure_branch("gh-pages", true).await.unwrap();

    // A scratch branch left behind by an earlier run
    fixture.git(&["branch", SCRATCH_BRANCH]);

    controller.checkout_for_sync("gh-pages").await.unwrap();
    assert_eq!(fixture.current_branch(), SCRATCH_BRANCH);
    assert!(fixture.path().join(".nojekyll").exists());
    assert!(!fixture.path().join("README.md").exists());
    assert_eq!(
        controller.state(),
        &DeployBranchState::CheckedOutLocally {
            scratch: SCRATCH_BRANCH.to_string()
        }
    );
}

#[tokio::test]
async fn test_commit_only_when_changed() {
    let fixture = Fixture::new();
    let runner = with_remote(&fixture).await;
    let mut controller = DeployBranchController::new(&runner, REMOTE_NAME);
    controller.ensure_branch("gh-pages", true).await.unwrap();
    controller.checkout_for_sync("gh-pages").await.unwrap();

    write_file(fixture.path(), "docs/index.html", "v1");
    let added = vec![PathBuf::from("docs/index.html")];
    assert!(controller.commit(&added, &[], "first").await.unwrap());
    assert!(!controller.commit(&added, &[], "again").await.unwrap());

    fs::remove_file(fixture.path().join("docs/index.html")).unwrap();
    assert!(controller.commit(&[], &added, "remove").await.unwrap());
    assert!(fixture.git(&["ls-files", "docs"]).is_empty());
}

#[tokio::test]
async fn test_push_updates_remote() {
    let fixture = Fixture::new();
    let runner = with_remote(&fixture).await;
    let mut controller =
        DeployBranchController::new(&runner, REMOTE_NAME).with_backoff(Duration::ZERO);
    controller.ensure_branch("gh-pages", true).await.unwrap();
    controller.checkout_for_sync("gh-pages").await.unwrap();

    write_file(fixture.path(), "docs/index.html", "hello");
    controller
        .commit(&[PathBuf::from("docs/index.html")], &[], "Deploy docs")
        .await
        .unwrap();
    let attempts = controller.push("gh-pages", 3).await.unwrap();

    assert_eq!(attempts, 1);
    assert_eq!(
        fixture.remote_files("gh-pages"),
        vec![".nojekyll".to_string(), "docs/index.html".to_string()]
    );
    assert_eq!(
        fixture.remote_git(&["log", "-1", "--format=%s", "gh-pages"]),
        "Deploy docs"
    );
}

#[tokio::test]
async fn test_push_merges_concurrent_update_preferring_ours() {
    let fixture = Fixture::new();
    let runner = with_remote(&fixture).await;
    let mut controller =
        DeployBranchController::new(&runner, REMOTE_NAME).with_backoff(Duration::ZERO);
    controller.ensure_branch("gh-pages", true).await.unwrap();
    controller.checkout_for_sync("gh-pages").await.unwrap();

    // Another job deploys to the same branch after our checkout
    let other = fixture.other_clone();
    fixture.run_in(other.path(), &["checkout", "-q", "gh-pages"]);
    write_file(other.path(), "docs/index.html", "theirs");
    write_file(other.path(), "other/page.html", "other project");
    fixture.run_in(other.path(), &["add", "-A"]);
    fixture.run_in(other.path(), &["commit", "-q", "-m", "Other deploy"]);
    fixture.run_in(other.path(), &["push", "-q", "origin", "gh-pages"]);

    write_file(fixture.path(), "docs/index.html", "ours");
    controller
        .commit(&[PathBuf::from("docs/index.html")], &[], "Our deploy")
        .await
        .unwrap();
    controller.push("gh-pages", 3).await.unwrap();

    assert_eq!(
        fixture.remote_git(&["show", "gh-pages:docs/index.html"]),
        "ours"
    );
    assert_eq!(
        fixture.remote_git(&["show", "gh-pages:other/page.html"]),
        "other project"
    );
}

#[tokio::test]
async fn test_teardown_restores_start() {
    let fixture = Fixture::new();
    let runner = with_remote(&fixture).await;
    let mut controller = DeployBranchController::new(&runner, REMOTE_NAME);
    controller.ensure_branch("gh-pages", true).await.unwrap();
    controller.checkout_for_sync("gh-pages").await.unwrap();

    // Synced but never committed
    write_file(fixture.path(), "docs/index.html", "unfinished");
    write_file(fixture.path(), "docs/.docs-deploy-files", "docs/index.html");

    controller
        .teardown(
            &CheckoutPoint::Branch("master".to_string()),
            &[
                PathBuf::from("docs/index.html"),
                PathBuf::from("docs/.docs-deploy-files"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(fixture.current_branch(), "master");
    assert!(!fixture.local_branches().contains(&SCRATCH_BRANCH.to_string()));
    assert_eq!(controller.state(), &DeployBranchState::Missing);
    assert!(!fixture.path().join("docs/index.html").exists());
    assert!(!fixture.path().join("docs/.docs-deploy-files").exists());
    assert_eq!(fixture.git(&["status", "--porcelain", "--untracked-files=all"]), "");
}

#[tokio::test]
async fn test_empty_orphan_is_not_committed() {
    let fixture = Fixture::new();
    let runner = with_remote(&fixture).await;
    let mut controller = DeployBranchController::new(&runner, REMOTE_NAME);
    controller.ensure_branch("gh-pages", false).await.unwrap();
    controller.checkout_for_sync("gh-pages").await.unwrap();

    assert!(!controller.commit(&[], &[], "Deploy docs").await.unwrap());
}

#[tokio::test]
async fn test_failed_pull_leaves_branch_clean() {
    let fixture = Fixture::new();
    let runner = with_remote(&fixture).await;
    let mut controller = DeployBranchController::new(&runner, REMOTE_NAME);
    controller.ensure_branch("gh-pages", true).await.unwrap();
    controller.checkout_for_sync("gh-pages").await.unwrap();

    // Nothing to merge and nothing to abort
    let attempt = pull_prefer_ours(&runner, REMOTE_NAME, "no-such-branch").await;
    assert!(matches!(attempt, PushAttempt::Conflict(_)));
    assert_eq!(fixture.current_branch(), SCRATCH_BRANCH);
    assert_eq!(fixture.git(&["status", "--porcelain"]), "");
}

/// Make every push from the working repository lose a race against another
/// job, or only the first one with `once`
fn race_pushes(fixture: &Fixture, other: &Path, once: bool) {
    let marker = fixture.home.path().join("raced");
    let guard = if once {
        format!("[ -e \"{0}\" ] && exit 0\ntouch \"{0}\"\n", marker.display())
    } else {
        String::new()
    };
    install_hook(
        &fixture.path().join(".git"),
        "pre-push",
        &format!(
            "{guard}unset GIT_DIR GIT_WORK_TREE GIT_INDEX_FILE\n\
             cd \"{}\" || exit 1\n\
             git commit -q --allow-empty -m \"Concurrent deploy\" || exit 1\n\
             git push -q origin gh-pages || exit 1\n",
            other.display()
        ),
    );
}

async fn prepared_controller<'a>(
    fixture: &Fixture,
    runner: &'a docs_deploy::CommandRunner,
) -> (DeployBranchController<'a>, tempfile::TempDir) {
    let mut controller =
        DeployBranchController::new(runner, REMOTE_NAME).with_backoff(Duration::ZERO);
    controller.ensure_branch("gh-pages", true).await.unwrap();
    controller.checkout_for_sync("gh-pages").await.unwrap();

    let other = fixture.other_clone();
    fixture.run_in(other.path(), &["checkout", "-q", "gh-pages"]);

    write_file(fixture.path(), "docs/index.html", "ours");
    controller
        .commit(&[PathBuf::from("docs/index.html")], &[], "Our deploy")
        .await
        .unwrap();
    (controller, other)
}

#[tokio::test]
async fn test_push_retries_after_losing_a_race() {
    let fixture = Fixture::new();
    let runner = with_remote(&fixture).await;
    let (controller, other) = prepared_controller(&fixture, &runner).await;
    race_pushes(&fixture, other.path(), true);

    let attempts = controller.push("gh-pages", 3).await.unwrap();

    assert_eq!(attempts, 2);
    let log = fixture.remote_git(&["log", "--format=%s", "gh-pages"]);
    assert!(log.contains("Concurrent deploy"));
    assert_eq!(
        fixture.remote_git(&["show", "gh-pages:docs/index.html"]),
        "ours"
    );
}

#[tokio::test]
async fn test_push_gives_up_after_bounded_attempts() {
    let fixture = Fixture::new();
    let runner = with_remote(&fixture).await;
    let (controller, other) = prepared_controller(&fixture, &runner).await;
    race_pushes(&fixture, other.path(), false);

    let err = controller.push("gh-pages", 3).await.unwrap_err();

    match &err {
        DeployError::PushRetriesExhausted {
            branch, attempts, ..
        } => {
            assert_eq!(branch, "gh-pages");
            assert_eq!(*attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(
        !fixture
            .remote_files("gh-pages")
            .contains(&"docs/index.html".to_string())
    );
}

#[tokio::test]
async fn test_hook_rejection_is_not_retried() {
    let fixture = Fixture::new();
    let runner = with_remote(&fixture).await;
    let (controller, _other) = prepared_controller(&fixture, &runner).await;
    let attempts_log = fixture.home.path().join("attempts");
    install_hook(
        fixture.remote.path(),
        "pre-receive",
        &format!(
            "echo attempt >> \"{}\"\necho \"branch is protected\" >&2\nexit 1\n",
            attempts_log.display()
        ),
    );

    let err = controller.push("gh-pages", 3).await.unwrap_err();

    assert!(
        matches!(err, DeployError::CommandFailed { .. }),
        "unexpected error: {err}"
    );
    assert_eq!(fs::read_to_string(attempts_log).unwrap().lines().count(), 1);
}
