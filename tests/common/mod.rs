//! Shared test infrastructure for integration tests.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Variables that make the runner believe it is in CI.
const CI_MARKERS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "BUILDKITE",
    "CIRCLECI",
    "JENKINS_URL",
    "TF_BUILD",
];

/// A throwaway package monorepo.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    /// Root manifest, one publishable package, and a lockfile.
    pub fn new() -> Self {
        let workspace = Self {
            dir: tempfile::tempdir().expect("tempdir"),
        };
        workspace.write("package.json", r#"{"name": "mono", "private": true}"#);
        workspace.write(
            "packages/core/package.json",
            r#"{
  "name": "core",
  "version": "1.0.0",
  "license": "MIT",
  "description": "Core library",
  "repository": "github:acme/mono"
}
"#,
        );
        workspace.write("pnpm-lock.yaml", "lockfileVersion: '9.0'\n");
        workspace
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(path, contents).expect("write fixture file");
    }

    pub fn config(&self, toml: &str) {
        self.write("guardrails.toml", toml);
    }

    /// Run the binary against this workspace outside CI.
    pub fn run(&self, args: &[&str]) -> Output {
        self.command(args, false)
    }

    /// Run the binary against this workspace as a CI job would.
    pub fn run_ci(&self, args: &[&str]) -> Output {
        self.command(args, true)
    }

    fn command(&self, args: &[&str], ci: bool) -> Output {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_guardrails"));
        cmd.args(args)
            .arg("--root")
            .arg(self.root())
            .current_dir(self.root())
            .env("NO_COLOR", "1")
            .env_remove("RUST_LOG")
            .env_remove("GUARDRAILS_BASE_REF")
            .env_remove("GITHUB_BASE_REF");
        for marker in CI_MARKERS {
            cmd.env_remove(marker);
        }
        if ci {
            cmd.env("CI", "true");
        }
        cmd.output().expect("spawn guardrails")
    }

    pub fn git(&self, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(self.root())
            .env("GIT_AUTHOR_NAME", "Test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "Test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .status()
            .expect("spawn git");
        assert!(status.success(), "git {args:?} failed");
    }
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

pub fn report_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|err| {
        panic!(
            "stdout is not a JSON report ({err}):\n{}\nstderr:\n{}",
            stdout(output),
            stderr(output)
        )
    })
}

pub fn status_of<'a>(report: &'a serde_json::Value, check: &str) -> &'a str {
    report["results"]
        .as_array()
        .and_then(|results| results.iter().find(|r| r["name"] == check))
        .and_then(|result| result["status"].as_str())
        .unwrap_or_else(|| panic!("no result for {check} in {report}"))
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// True when every named program is available; tests skip otherwise.
pub fn have_tools(names: &[&str]) -> bool {
    let missing: Vec<_> = names
        .iter()
        .filter(|name| find_in_path(name).is_none())
        .collect();
    if !missing.is_empty() {
        eprintln!("Skipping: {missing:?} not on PATH");
    }
    missing.is_empty()
}
