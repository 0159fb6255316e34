//! End-to-end runs of `guardrails run` against throwaway workspaces.

mod common;

use common::{have_tools, report_json, status_of, stderr, stdout, TestWorkspace};

/// Builtins that need git or a package manager are disabled; the remaining
/// checks are plain programs.
const LOCAL_CONFIG: &str = r#"
[checks.changesets]
enabled = false

[checks.audit]
enabled = false

[checks.exports]
command = "true"

[checks.lint]
command = "false"
fix = "true"
"#;

#[test]
fn quick_warn_only_is_rejected_in_ci_before_anything_runs() {
    let workspace = TestWorkspace::new();
    let output = workspace.run_ci(&["run", "--quick", "--warn-only"]);
    assert_eq!(output.status.code(), Some(1), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("cannot be combined with --warn-only"), "{}", stderr(&output));
    assert!(!workspace.path(".guardrails/report.json").exists());
}

#[test]
fn skipping_the_audit_is_rejected_in_ci() {
    let workspace = TestWorkspace::new();
    let output = workspace.run_ci(&["run", "--skip-audit"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!workspace.path(".guardrails/report.json").exists());

    let generic = workspace.run_ci(&["run", "--skip", "audit"]);
    assert_eq!(generic.status.code(), Some(1));
    assert!(!workspace.path(".guardrails/report.json").exists());
}

#[test]
fn invalid_config_fails_before_any_check() {
    let workspace = TestWorkspace::new();
    workspace.config("[changesets]\nstale_warn_days = 10\nstale_error_days = 3\n");
    let output = workspace.run(&["run"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("stale_error_days"), "{}", stderr(&output));
    assert!(!workspace.path(".guardrails/report.json").exists());
}

#[test]
fn failing_dependent_check_fails_the_run_and_warn_only_downgrades_it() {
    if !have_tools(&["true", "false"]) {
        return;
    }
    let workspace = TestWorkspace::new();
    workspace.config(LOCAL_CONFIG);

    let output = workspace.run(&["run", "--json", "--no-cache"]);
    assert_eq!(output.status.code(), Some(1), "stderr: {}", stderr(&output));
    let report = report_json(&output);
    assert_eq!(status_of(&report, "governance"), "pass");
    assert_eq!(status_of(&report, "exports"), "pass");
    assert_eq!(status_of(&report, "lint"), "fail");
    assert_eq!(report["summary"]["failed"], 1);
    assert_eq!(report["fromCache"], false);
    assert!(workspace.path(".guardrails/report.json").is_file());

    let output = workspace.run(&["run", "--json", "--no-cache", "--warn-only"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    let report = report_json(&output);
    assert_eq!(status_of(&report, "lint"), "warn");
    assert_eq!(report["packageQualityScore"], 83);
}

#[test]
fn critical_failure_short_circuits_dependents() {
    if !have_tools(&["true", "false"]) {
        return;
    }
    let workspace = TestWorkspace::new();
    workspace.config(
        r#"
[checks.changesets]
enabled = false

[checks.audit]
enabled = false

[checks.exports]
command = "false"
tier = "critical"

[checks.lint]
command = "true"
"#,
    );
    let output = workspace.run(&["run", "--json", "--no-cache"]);
    assert_eq!(output.status.code(), Some(1));
    let report = report_json(&output);
    assert_eq!(report["shortCircuit"]["failedCheck"], "exports");
    assert_eq!(report["shortCircuit"]["notRun"], serde_json::json!(["lint"]));
    assert!(report["results"]
        .as_array()
        .expect("results")
        .iter()
        .all(|result| result["name"] != "lint"));

    let diagnosed = workspace.run(&["run", "--json", "--no-cache", "--diagnose"]);
    assert_eq!(diagnosed.status.code(), Some(1));
    let report = report_json(&diagnosed);
    assert_eq!(status_of(&report, "lint"), "pass");
    let lint = report["results"]
        .as_array()
        .expect("results")
        .iter()
        .find(|result| result["name"] == "lint")
        .expect("lint result");
    assert_eq!(lint["isDiagnostic"], true);
}

#[test]
fn missing_dependent_tool_is_skipped() {
    if !have_tools(&["true"]) {
        return;
    }
    let workspace = TestWorkspace::new();
    workspace.config(
        r#"
[checks.changesets]
enabled = false

[checks.audit]
enabled = false

[checks.exports]
command = "scripts/check-exports.sh"

[checks.lint]
command = "true"
"#,
    );
    let output = workspace.run(&["run", "--json", "--no-cache"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    let report = report_json(&output);
    assert_eq!(status_of(&report, "exports"), "skip");
}

#[test]
fn passing_runs_are_replayed_identically_from_the_cache() {
    if !have_tools(&["true"]) {
        return;
    }
    let workspace = TestWorkspace::new();
    workspace.config(
        r#"
[checks.changesets]
enabled = false

[checks.audit]
enabled = false

[checks.exports]
command = "true"

[checks.lint]
command = "true"
"#,
    );
    let first = report_json(&workspace.run(&["run", "--json"]));
    assert_eq!(first["fromCache"], false);
    assert!(workspace.path(".guardrails/cache.json").is_file());

    let second = workspace.run(&["run", "--json"]);
    let third = workspace.run(&["run", "--json"]);
    assert_eq!(second.status.code(), Some(0));
    assert_eq!(stdout(&second), stdout(&third));
    let second = report_json(&second);
    assert_eq!(second["fromCache"], true);
    assert_eq!(second["results"], first["results"]);
    assert_eq!(second["timestamp"], first["timestamp"]);

    // A manifest edit invalidates the entry.
    workspace.write(
        "packages/core/package.json",
        r#"{"name": "core", "version": "1.0.1", "license": "MIT", "description": "Core library", "repository": "github:acme/mono"}"#,
    );
    let edited = report_json(&workspace.run(&["run", "--json"]));
    assert_eq!(edited["fromCache"], false);

    let cleared = workspace.run(&["cache", "clear"]);
    assert_eq!(cleared.status.code(), Some(0));
    assert!(stdout(&cleared).contains("Removed"));
    assert!(!workspace.path(".guardrails/cache.json").exists());
}

#[test]
fn fix_mode_runs_fixes_without_changing_the_verdict() {
    if !have_tools(&["true", "false"]) {
        return;
    }
    let workspace = TestWorkspace::new();
    workspace.config(LOCAL_CONFIG);
    let output = workspace.run(&["run", "--no-cache", "--fix"]);
    assert_eq!(output.status.code(), Some(1));
    let text = stdout(&output);
    assert!(text.contains("fixed lint: true"), "{text}");
    assert!(text.contains("Verdict: FAIL"), "{text}");
}
