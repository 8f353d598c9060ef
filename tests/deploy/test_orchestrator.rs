//! End-to-end deploy runs against a local bare remote.

use std::fs;
use std::time::Duration;

use docs_deploy::deploy::{BOT_EMAIL, BOT_NAME, SCRATCH_BRANCH};
use docs_deploy::{
    CiContext, CiFacts, CliOverrides, DeployConfig, DeployError, DeployStep, FileConfig,
    Orchestrator,
};

use super::support::{Fixture, write_file};

struct FakeCi {
    facts: CiFacts,
}

impl FakeCi {
    fn on_branch(branch: &str) -> Self {
        Self {
            facts: CiFacts {
                branch: branch.to_string(),
                repo_slug: "owner/project".to_string(),
                build_number: "7".to_string(),
                commit: "0123abcd".to_string(),
                job_url: "https://ci.example.com/7".to_string(),
                ..Default::default()
            },
        }
    }
}

impl CiContext for FakeCi {
    fn name(&self) -> &'static str {
        "Fake CI"
    }

    fn facts(&self) -> CiFacts {
        self.facts.clone()
    }
}

fn config(fixture: &Fixture, cli: CliOverrides) -> DeployConfig {
    DeployConfig::merge(
        CliOverrides {
            built_docs: Some("build/html".into()),
            deploy_repo: Some(fixture.remote_url()),
            token: Some(true),
            ..cli
        },
        FileConfig::default(),
    )
    .unwrap()
}

fn orchestrator(fixture: &Fixture, cli: CliOverrides, ci: FakeCi) -> Orchestrator<FakeCi> {
    Orchestrator::new(
        config(fixture, cli),
        ci,
        fixture.path(),
        "docs-deploy deploy --built-docs build/html",
    )
    .with_secret_lookup(|name| (name == "GH_TOKEN").then(|| "test-token".to_string()))
    .with_env("GIT_CONFIG_GLOBAL", fixture.global_config().to_string_lossy())
    .with_env("GIT_CONFIG_NOSYSTEM", "1")
    .with_env("HOME", fixture.home.path().to_string_lossy())
    .with_push_backoff(Duration::ZERO)
}

fn build_docs(fixture: &Fixture, index: &str) {
    write_file(fixture.path(), "build/html/index.html", index);
    write_file(fixture.path(), "build/html/_static/style.css", "body {}");
}

#[tokio::test]
async fn test_first_deploy_creates_branch_and_pushes() {
    let fixture = Fixture::new();
    build_docs(&fixture, "<h1>v1</h1>");

    let report = orchestrator(&fixture, CliOverrides::default(), FakeCi::on_branch("master"))
        .run()
        .await
        .unwrap();

    assert!(report.can_push);
    assert!(report.branch_created);
    assert!(report.committed);
    assert!(report.pushed);

    assert_eq!(
        fixture.remote_files("gh-pages"),
        vec![
            ".nojekyll".to_string(),
            "docs/.docs-deploy-files".to_string(),
            "docs/_static/style.css".to_string(),
            "docs/index.html".to_string(),
        ]
    );
    assert_eq!(
        fixture.remote_git(&["show", "gh-pages:docs/index.html"]),
        "<h1>v1</h1>"
    );

    let message = fixture.remote_git(&["log", "-1", "--format=%B", "gh-pages"]);
    assert!(message.starts_with("Update docs after building Fake CI build 7 of owner/project"));
    assert!(message.contains("docs-deploy deploy --built-docs build/html"));

    // The source checkout is untouched
    assert_eq!(fixture.current_branch(), "master");
    assert!(!fixture.local_branches().contains(&SCRATCH_BRANCH.to_string()));
    assert!(fixture.path().join("build/html/index.html").exists());
    assert!(!fixture.path().join("docs").exists());
}

#[tokio::test]
async fn test_redeploy_without_changes_does_not_commit() {
    let fixture = Fixture::new();
    build_docs(&fixture, "<h1>v1</h1>");
    let deploy = orchestrator(&fixture, CliOverrides::default(), FakeCi::on_branch("master"));

    deploy.run().await.unwrap();
    let second = deploy.run().await.unwrap();

    assert!(!second.branch_created);
    assert!(!second.committed);
    assert!(!second.pushed);
    assert!(second.removed.is_empty());
}

#[tokio::test]
async fn test_redeploy_removes_stale_files() {
    let fixture = Fixture::new();
    build_docs(&fixture, "<h1>v1</h1>");
    let deploy = orchestrator(&fixture, CliOverrides::default(), FakeCi::on_branch("master"));
    deploy.run().await.unwrap();

    fs::remove_dir_all(fixture.path().join("build/html/_static")).unwrap();
    write_file(fixture.path(), "build/html/index.html", "<h1>v2</h1>");
    let report = deploy.run().await.unwrap();

    assert!(report.pushed);
    assert_eq!(report.removed, vec![std::path::PathBuf::from("docs/_static/style.css")]);
    assert!(
        !fixture
            .remote_files("gh-pages")
            .contains(&"docs/_static/style.css".to_string())
    );
    assert_eq!(
        fixture.remote_git(&["show", "gh-pages:docs/index.html"]),
        "<h1>v2</h1>"
    );
}

#[tokio::test]
async fn test_unlisted_branch_does_not_push() {
    let fixture = Fixture::new();
    build_docs(&fixture, "<h1>v1</h1>");

    let report = orchestrator(&fixture, CliOverrides::default(), FakeCi::on_branch("feature"))
        .run()
        .await
        .unwrap();

    assert!(!report.can_push);
    assert!(report.committed);
    assert!(!report.pushed);
    assert!(!fixture.remote_has_branch("gh-pages"));
    assert_eq!(fixture.current_branch(), "master");
    assert!(fixture.path().join("README.md").exists());
}

#[tokio::test]
async fn test_no_push_commits_only() {
    let fixture = Fixture::new();
    build_docs(&fixture, "<h1>v1</h1>");

    let report = orchestrator(
        &fixture,
        CliOverrides {
            push: Some(false),
            ..Default::default()
        },
        FakeCi::on_branch("master"),
    )
    .run()
    .await
    .unwrap();

    assert!(report.can_push);
    assert!(report.committed);
    assert!(!report.pushed);
    assert!(!fixture.remote_has_branch("gh-pages"));
}

#[tokio::test]
async fn test_self_authored_commit_does_not_push() {
    let fixture = Fixture::new();
    fs::write(fixture.path().join("README.md"), "# Project\n\nUpdated\n").unwrap();
    fixture.git(&[
        "commit",
        "-q",
        "-a",
        "-m",
        "Bot commit",
        &format!("--author={BOT_NAME} <{BOT_EMAIL}>"),
    ]);
    build_docs(&fixture, "<h1>v1</h1>");

    let report = orchestrator(&fixture, CliOverrides::default(), FakeCi::on_branch("master"))
        .run()
        .await
        .unwrap();
    assert!(!report.can_push);
    assert!(!report.pushed);
}

#[tokio::test]
async fn test_missing_token_is_a_configuration_error() {
    let fixture = Fixture::new();
    build_docs(&fixture, "<h1>v1</h1>");

    let err = orchestrator(&fixture, CliOverrides::default(), FakeCi::on_branch("master"))
        .with_secret_lookup(|_| None)
        .run()
        .await
        .unwrap_err();

    assert!(err.is_configuration());
    assert!(matches!(
        err,
        DeployError::StepFailed {
            step: DeployStep::RemoteSetup,
            ..
        }
    ));
    assert_eq!(fixture.git(&["remote"]), "");
}

#[tokio::test]
async fn test_failed_command_restores_checkout_and_stash() {
    let fixture = Fixture::new();
    build_docs(&fixture, "<h1>v1</h1>");
    fs::write(fixture.path().join("README.md"), "# Local edits\n").unwrap();

    let err = orchestrator(
        &fixture,
        CliOverrides {
            command: Some("exit 3".to_string()),
            ..Default::default()
        },
        FakeCi::on_branch("master"),
    )
    .run()
    .await
    .unwrap_err();

    match &err {
        DeployError::StepFailed {
            step, command_line, ..
        } => {
            assert_eq!(*step, DeployStep::Command);
            assert_eq!(command_line, "docs-deploy deploy --built-docs build/html");
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(fixture.current_branch(), "master");
    assert!(!fixture.local_branches().contains(&SCRATCH_BRANCH.to_string()));
    assert_eq!(
        fs::read_to_string(fixture.path().join("README.md")).unwrap(),
        "# Local edits\n"
    );
    assert_eq!(fixture.git(&["stash", "list"]), "");

    // Only the local edit and the built docs remain; nothing synced is left behind
    let mut status: Vec<String> = fixture
        .git(&["status", "--porcelain", "--untracked-files=all"])
        .lines()
        .map(|l| l.trim().to_string())
        .collect();
    status.sort();
    assert_eq!(
        status,
        vec![
            "?? build/html/_static/style.css".to_string(),
            "?? build/html/index.html".to_string(),
            "M README.md".to_string(),
        ]
    );
    assert!(!fixture.path().join("docs/.docs-deploy-files").exists());
}

#[tokio::test]
async fn test_nothing_to_deploy_on_new_branch() {
    let fixture = Fixture::new();

    let report = orchestrator(
        &fixture,
        CliOverrides {
            sync: Some(false),
            push: Some(false),
            ..Default::default()
        },
        FakeCi::on_branch("master"),
    )
    .run()
    .await
    .unwrap();

    assert!(report.branch_created);
    assert!(!report.committed);
    assert!(!report.pushed);
    assert_eq!(fixture.current_branch(), "master");
}

#[tokio::test]
async fn test_detached_head_is_restored() {
    let fixture = Fixture::new();
    let commit = fixture.git(&["rev-parse", "HEAD"]);
    fixture.git(&["checkout", "-q", "--detach", "HEAD"]);
    build_docs(&fixture, "<h1>v1</h1>");

    orchestrator(&fixture, CliOverrides::default(), FakeCi::on_branch("master"))
        .run()
        .await
        .unwrap();

    assert_eq!(fixture.current_branch(), "HEAD");
    assert_eq!(fixture.git(&["rev-parse", "HEAD"]), commit);
}
