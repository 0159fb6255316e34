use super::*;

fn write_config(root: &Path, contents: &str) {
    fs::write(root.join(CONFIG_FILE_NAME), contents.as_bytes()).expect("write config");
}

#[test]
fn missing_default_config_yields_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = load_config(dir.path(), None).expect("load defaults");
    assert_eq!(config.paths.lockfile, "pnpm-lock.yaml");
    assert_eq!(config.cache.ttl_secs, 3600);
    assert_eq!(config.changesets.stale_warn_days, 7);
    assert_eq!(config.changesets.stale_error_days, 30);
    assert_eq!(config.audit.retry_backoff_ms, vec![1000, 2000, 3000]);
    assert!(config.checks.is_empty());
}

#[test]
fn missing_explicit_config_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = load_config(dir.path(), Some(&dir.path().join("nope.toml")))
        .expect_err("explicit path must exist");
    assert!(err.to_string().contains("not found"));
}

#[test]
fn partial_config_keeps_unnamed_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_config(
        dir.path(),
        r#"
[paths]
lockfile = "yarn.lock"

[changesets.duplicates]
max_descriptors = 50

[checks.typecheck]
tier = "dependent"
command = "pnpm run typecheck"
timeout_ms = 60000
"#,
    );
    let config = load_config(dir.path(), None).expect("load");
    assert_eq!(config.paths.lockfile, "yarn.lock");
    assert_eq!(config.paths.changeset_dir, ".changeset");
    assert_eq!(config.changesets.duplicates.max_descriptors, 50);
    assert_eq!(config.changesets.duplicates.short_summary_chars, 40);
    let typecheck = config.checks.get("typecheck").expect("typecheck entry");
    assert_eq!(typecheck.tier, Some(Tier::Dependent));
    assert_eq!(typecheck.timeout_ms, Some(60000));
}

#[test]
fn unknown_keys_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_config(dir.path(), "[paths]\nlockfiel = \"x\"\n");
    assert!(load_config(dir.path(), None).is_err());
}

#[test]
fn inverted_staleness_window_is_rejected() {
    let mut config = GuardrailsConfig::default();
    config.changesets.stale_warn_days = 10;
    config.changesets.stale_error_days = 5;
    assert!(validate_config(&config).is_err());
}

#[test]
fn empty_check_command_is_rejected() {
    let mut config = GuardrailsConfig::default();
    config.checks.insert(
        "blank".to_string(),
        CheckOverride {
            command: Some("   ".to_string()),
            ..CheckOverride::default()
        },
    );
    let err = validate_config(&config).expect_err("blank command");
    assert!(err.to_string().contains("checks.blank.command"));
}

#[test]
fn workspace_paths_resolve_under_root() {
    let paths = WorkspacePaths::new(PathBuf::from("/repo"), &PathsConfig::default());
    assert_eq!(paths.lockfile(), PathBuf::from("/repo/pnpm-lock.yaml"));
    assert_eq!(paths.changeset_dir(), PathBuf::from("/repo/.changeset"));
    assert_eq!(
        paths.baseline_file(),
        PathBuf::from("/repo/.guardrails/audit-baseline.json")
    );
}
