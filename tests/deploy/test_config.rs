//! Tests for configuration loading and merging.

use std::path::{Path, PathBuf};

use docs_deploy::deploy::config::CONFIG_SECTION;
use docs_deploy::{AuthMode, CiProvider, CliOverrides, DeployConfig, DeployError, FileConfig};
use tempfile::TempDir;

const TRAVIS_YML: &str = r#"
language: python
script:
  - make -C docs html
docs-deploy:
  built-docs: docs/_build/html
  deploy-repo: owner/docs
  branch-whitelist:
    - stable
  exclude:
    - _sources
  push-retries: 5
  ci: travis
"#;

#[test]
fn test_section_is_parsed() {
    let file = FileConfig::from_yaml_str(TRAVIS_YML, CONFIG_SECTION).unwrap();
    assert_eq!(file.built_docs, Some(PathBuf::from("docs/_build/html")));
    assert_eq!(file.deploy_repo.as_deref(), Some("owner/docs"));
    assert_eq!(file.branch_whitelist, vec!["stable".to_string()]);
    assert_eq!(file.push_retries, Some(5));
    assert_eq!(file.ci, Some(CiProvider::Travis));
}

#[test]
fn test_missing_section_is_empty() {
    let file = FileConfig::from_yaml_str("language: rust\n", CONFIG_SECTION).unwrap();
    assert_eq!(file, FileConfig::default());
}

#[test]
fn test_unknown_keys_are_reported_together() {
    let yaml = "docs-deploy:\n  built-docs: out\n  deploy-dir: docs\n  pushh: false\n";
    let err = FileConfig::from_yaml_str(yaml, CONFIG_SECTION).unwrap_err();
    match err {
        DeployError::UnknownConfigKeys { section, keys } => {
            assert_eq!(section, CONFIG_SECTION);
            assert_eq!(keys, vec!["deploy-dir".to_string(), "pushh".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_wrong_value_type_is_a_config_error() {
    let yaml = "docs-deploy:\n  push-retries: many\n";
    let err = FileConfig::from_yaml_str(yaml, CONFIG_SECTION).unwrap_err();
    assert!(matches!(err, DeployError::Config(_)));
}

#[test]
fn test_load_missing_file() {
    let dir = TempDir::new().unwrap();
    let file = FileConfig::load(&dir.path().join(".travis.yml"), CONFIG_SECTION).unwrap();
    assert_eq!(file, FileConfig::default());
}

#[test]
fn test_load_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".travis.yml");
    std::fs::write(&path, TRAVIS_YML).unwrap();
    let file = FileConfig::load(&path, CONFIG_SECTION).unwrap();
    assert_eq!(file.deploy_repo.as_deref(), Some("owner/docs"));
}

#[test]
fn test_cli_overrides_file() {
    let file = FileConfig::from_yaml_str(TRAVIS_YML, CONFIG_SECTION).unwrap();
    let cli = CliOverrides {
        built_docs: Some("site".into()),
        push_retries: Some(2),
        token: Some(true),
        ..Default::default()
    };

    let config = DeployConfig::merge(cli, file).unwrap();
    assert_eq!(config.built_docs(), Some(Path::new("site")));
    assert_eq!(config.push_retries(), 2);
    assert_eq!(config.auth_mode(), AuthMode::Token);
    assert_eq!(config.deploy_repo(), Some("owner/docs"));
    assert_eq!(config.ci(), CiProvider::Travis);
}

#[test]
fn test_lists_are_combined() {
    let file = FileConfig::from_yaml_str(TRAVIS_YML, CONFIG_SECTION).unwrap();
    let cli = CliOverrides {
        branch_whitelist: vec!["release/.*".to_string()],
        exclude: vec!["*.map".to_string()],
        ..Default::default()
    };

    let config = DeployConfig::merge(cli, file).unwrap();
    let whitelist = config.branch_whitelist();
    assert!(whitelist.matches("master"));
    assert!(whitelist.matches("stable"));
    assert!(whitelist.matches("release/1.0"));
    assert!(!whitelist.matches("feature"));

    assert_eq!(
        config.exclude().patterns(),
        &["_sources".to_string(), "*.map".to_string()]
    );
}

#[test]
fn test_defaults() {
    let config = DeployConfig::merge(
        CliOverrides {
            built_docs: Some("out".into()),
            ..Default::default()
        },
        FileConfig::default(),
    )
    .unwrap();

    assert_eq!(config.auth_mode(), AuthMode::DeployKey);
    assert_eq!(config.secure_env_name(), "DOCS_DEPLOY_ENCRYPTION_KEY");
    assert_eq!(config.push_retries(), 3);
    assert!(config.sync());
    assert!(config.push());
    assert!(config.temp_dir());
    assert!(!config.build_tags());
    assert_eq!(config.ci(), CiProvider::Auto);
    assert!(config.branch_whitelist().matches("master"));
}

#[test]
fn test_no_require_master() {
    let config = DeployConfig::merge(
        CliOverrides {
            built_docs: Some("out".into()),
            require_master: Some(false),
            ..Default::default()
        },
        FileConfig::default(),
    )
    .unwrap();
    assert!(config.branch_whitelist().is_empty());
}

#[test]
fn test_built_docs_required_when_syncing() {
    let err = DeployConfig::merge(CliOverrides::default(), FileConfig::default()).unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn test_invalid_whitelist_pattern() {
    let err = DeployConfig::merge(
        CliOverrides {
            built_docs: Some("out".into()),
            branch_whitelist: vec!["release/[".to_string()],
            ..Default::default()
        },
        FileConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, DeployError::InvalidPattern { .. }));
}

#[test]
fn test_bad_deploy_repo() {
    let err = DeployConfig::merge(
        CliOverrides {
            built_docs: Some("out".into()),
            deploy_repo: Some("just-a-name".to_string()),
            ..Default::default()
        },
        FileConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, DeployError::Config(_)));
}
