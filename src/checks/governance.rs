//! Publishing metadata rules for workspace packages.
use crate::catalog::GOVERNANCE;
use crate::report::{CheckResult, CheckStatus};
use crate::workspace::{discover_manifests, rel_string};
use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

const RUNTIME_DEPENDENCY_FIELDS: &[&str] =
    &["dependencies", "peerDependencies", "optionalDependencies"];
const UNPINNED_RANGES: &[&str] = &["*", "latest", ""];

fn semver() -> &'static Regex {
    static SEMVER: OnceLock<Regex> = OnceLock::new();
    SEMVER.get_or_init(|| {
        Regex::new(r"^\d+\.\d+\.\d+(-[0-9A-Za-z.-]+)?(\+[0-9A-Za-z.-]+)?$")
            .expect("regex for semver versions")
    })
}

#[derive(Debug, Default)]
struct Findings {
    errors: Vec<String>,
    warnings: Vec<String>,
}

pub fn check_governance(root: &Path) -> Result<CheckResult> {
    let mut findings = Findings::default();
    let mut checked = 0usize;
    for path in discover_manifests(root)? {
        let rel = rel_string(root, &path);
        let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        let manifest: Value = match serde_json::from_slice(&bytes) {
            Ok(manifest) => manifest,
            Err(err) => {
                findings.errors.push(format!("{rel}: invalid JSON ({err})"));
                continue;
            }
        };
        let private = manifest
            .get("private")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let is_root = rel == crate::workspace::MANIFEST_FILE_NAME;
        if private || (is_root && manifest.get("name").is_none()) {
            continue;
        }
        checked += 1;
        inspect_manifest(&rel, &manifest, &mut findings);
    }

    let status = if !findings.errors.is_empty() {
        CheckStatus::Fail
    } else if !findings.warnings.is_empty() {
        CheckStatus::Warn
    } else {
        CheckStatus::Pass
    };
    let message = match findings.errors.first().or(findings.warnings.first()) {
        Some(first) => {
            let others = findings.errors.len() + findings.warnings.len() - 1;
            if others == 0 {
                first.clone()
            } else {
                format!("{first} (+{others} more)")
            }
        }
        None => format!("{checked} publishable packages follow the publishing rules"),
    };
    let details = findings
        .errors
        .iter()
        .map(|line| format!("error: {line}"))
        .chain(findings.warnings.iter().map(|line| format!("warning: {line}")))
        .collect();
    Ok(CheckResult::new(GOVERNANCE, status, message).with_details(details))
}

fn inspect_manifest(rel: &str, manifest: &Value, findings: &mut Findings) {
    let text = |key: &str| {
        manifest
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };
    let label = text("name").unwrap_or(rel).to_string();

    if text("name").is_none() {
        findings.errors.push(format!("{rel}: missing `name`"));
    }
    match text("version") {
        None => findings.errors.push(format!("{label}: missing `version`")),
        Some(version) if !semver().is_match(version) => findings
            .errors
            .push(format!("{label}: version {version:?} is not semver")),
        Some(_) => {}
    }
    if text("license").is_none() {
        findings.errors.push(format!("{label}: missing `license`"));
    }
    if label.starts_with('@') && manifest.pointer("/publishConfig/access").is_none() {
        findings
            .errors
            .push(format!("{label}: scoped package needs `publishConfig.access`"));
    }
    if text("description").is_none() {
        findings.warnings.push(format!("{label}: missing `description`"));
    }
    if manifest.get("repository").is_none() {
        findings.warnings.push(format!("{label}: missing `repository`"));
    }
    for field in RUNTIME_DEPENDENCY_FIELDS {
        let Some(dependencies) = manifest.get(*field).and_then(Value::as_object) else {
            continue;
        };
        for (dependency, range) in dependencies {
            let range = range.as_str().unwrap_or_default().trim();
            if UNPINNED_RANGES.contains(&range) {
                findings.errors.push(format!(
                    "{label}: {field} entry {dependency} uses unbounded range {range:?}"
                ));
            }
        }
    }
}
