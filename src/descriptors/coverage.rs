//! Which changed packages need a change descriptor.
//!
//! A package needs one when it has changed source files, or when its manifest
//! changed in a way that reaches consumers: runtime dependency edits or a new
//! entry point. Build-only edits (`devDependencies`, `scripts`) do not count.
use super::ChangeDescriptor;
use crate::workspace::{owning_package, WorkspacePackage};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

const RUNTIME_DEPENDENCY_FIELDS: &[&str] =
    &["dependencies", "peerDependencies", "optionalDependencies"];
const ENTRY_POINT_FIELDS: &[&str] = &["exports", "main", "module", "types", "bin"];

/// Files that never require a descriptor.
#[derive(Debug, Clone)]
pub struct CoverageRules {
    pub ignore: Vec<Regex>,
    /// Workspace-relative descriptor directory; its own files are exempt.
    pub changeset_dir: String,
}

impl CoverageRules {
    fn ignores(&self, rel_path: &str) -> bool {
        let dir = self.changeset_dir.trim_end_matches('/');
        if !dir.is_empty() && rel_path.starts_with(&format!("{dir}/")) {
            return true;
        }
        self.ignore.iter().any(|pattern| pattern.is_match(rel_path))
    }
}

/// A publishable package touched since the merge base.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageChange {
    pub package: String,
    pub files: Vec<String>,
    pub manifest_changes: Vec<String>,
}

impl PackageChange {
    /// Short human reason this package needs a descriptor.
    pub fn reason(&self) -> String {
        if let Some(first) = self.manifest_changes.first() {
            if self.manifest_changes.len() == 1 {
                return format!("package.json {first}");
            }
            return format!(
                "package.json {first} (+{} more)",
                self.manifest_changes.len() - 1
            );
        }
        match self.files.as_slice() {
            [only] => format!("changed {only}"),
            files => format!("{} changed files", files.len()),
        }
    }
}

/// Group `changed` files by owning package and keep only the changes that
/// require a descriptor. `base_manifest` returns the manifest text at the
/// merge base for a workspace-relative path.
pub fn changed_packages<F>(
    packages: &[WorkspacePackage],
    changed: &[String],
    rules: &CoverageRules,
    base_manifest: F,
) -> Vec<PackageChange>
where
    F: Fn(&str) -> Option<String>,
{
    let mut by_package: BTreeMap<String, PackageChange> = BTreeMap::new();
    for rel_path in changed {
        let Some(package) = owning_package(packages, rel_path) else {
            continue;
        };
        if package.private {
            continue;
        }
        if rel_path == &package.manifest_rel {
            let base = base_manifest(rel_path)
                .and_then(|text| serde_json::from_str::<Value>(&text).ok());
            let significant = significant_manifest_changes(base.as_ref(), &package.manifest);
            if significant.is_empty() {
                tracing::debug!(package = %package.name, "manifest change is build-only");
                continue;
            }
            by_package
                .entry(package.name.clone())
                .or_insert_with(|| PackageChange {
                    package: package.name.clone(),
                    ..PackageChange::default()
                })
                .manifest_changes
                .extend(significant);
            continue;
        }
        if rules.ignores(rel_path) {
            continue;
        }
        by_package
            .entry(package.name.clone())
            .or_insert_with(|| PackageChange {
                package: package.name.clone(),
                ..PackageChange::default()
            })
            .files
            .push(rel_path.clone());
    }
    by_package.into_values().collect()
}

/// Consumer-visible differences between two manifests. A missing base means
/// the package is new.
pub fn significant_manifest_changes(base: Option<&Value>, current: &Value) -> Vec<String> {
    let Some(base) = base else {
        return vec!["adds a new package".to_string()];
    };
    let mut changes = Vec::new();
    for field in RUNTIME_DEPENDENCY_FIELDS {
        let before = dependency_map(base.get(*field));
        let after = dependency_map(current.get(*field));
        for (name, range) in &after {
            match before.get(name) {
                None => changes.push(format!("adds {field} entry {name}@{range}")),
                Some(old) if old != range => {
                    changes.push(format!("changes {field} entry {name} from {old} to {range}"))
                }
                Some(_) => {}
            }
        }
        for name in before.keys().filter(|name| !after.contains_key(*name)) {
            changes.push(format!("removes {field} entry {name}"));
        }
    }
    for field in ENTRY_POINT_FIELDS {
        if base.get(*field) != current.get(*field) {
            changes.push(format!("changes `{field}`"));
        }
    }
    changes
}

fn dependency_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(name, range)| {
                    let range = range
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| range.to_string());
                    (name.clone(), range)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Changes whose package no descriptor mentions.
pub fn uncovered<'a>(
    changes: &'a [PackageChange],
    descriptors: &[ChangeDescriptor],
) -> Vec<&'a PackageChange> {
    let covered: BTreeSet<&str> = descriptors
        .iter()
        .flat_map(|descriptor| descriptor.packages.iter().map(String::as_str))
        .collect();
    changes
        .iter()
        .filter(|change| !covered.contains(change.package.as_str()))
        .collect()
}

/// `(descriptor file, package)` pairs naming packages outside the workspace.
pub fn unknown_packages(
    packages: &[WorkspacePackage],
    descriptors: &[ChangeDescriptor],
) -> Vec<(String, String)> {
    let known: BTreeSet<&str> = packages.iter().map(|package| package.name.as_str()).collect();
    descriptors
        .iter()
        .flat_map(|descriptor| {
            descriptor
                .packages
                .iter()
                .filter(|name| !known.contains(name.as_str()))
                .map(|name| (descriptor.filename.clone(), name.clone()))
        })
        .collect()
}
