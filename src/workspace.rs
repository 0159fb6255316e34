//! Workspace package discovery.
//!
//! A package is any directory holding a `package.json`. The root manifest is
//! included so single-package repositories work the same way as monorepos.
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

pub const MANIFEST_FILE_NAME: &str = "package.json";

const SKIPPED_DIRS: &[&str] = &["node_modules", "target", "dist", "build", "coverage"];

/// One workspace package and its parsed manifest.
#[derive(Debug, Clone)]
pub struct WorkspacePackage {
    pub name: String,
    /// Package directory relative to the workspace root (`""` for the root).
    pub dir: String,
    pub manifest_rel: String,
    pub private: bool,
    pub manifest: Value,
}

/// Find every package manifest under `root`, sorted by relative path.
pub fn discover_manifests(root: &Path) -> Result<Vec<PathBuf>> {
    let mut manifests = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry));
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if entry.file_type().is_file() && entry.file_name() == MANIFEST_FILE_NAME {
            manifests.push(entry.into_path());
        }
    }
    manifests.sort();
    Ok(manifests)
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}

/// Load all named workspace packages. Manifests without a `name` are tooling
/// roots, not publishable packages, and are left out.
pub fn load_packages(root: &Path) -> Result<Vec<WorkspacePackage>> {
    let mut packages = Vec::new();
    for manifest_path in discover_manifests(root)? {
        let bytes =
            fs::read(&manifest_path).with_context(|| format!("read {}", manifest_path.display()))?;
        let manifest: Value = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse {}", manifest_path.display()))?;
        let Some(name) = manifest.get("name").and_then(Value::as_str) else {
            continue;
        };
        let manifest_rel = rel_string(root, &manifest_path);
        let dir = manifest_path
            .parent()
            .map(|dir| rel_string(root, dir))
            .unwrap_or_default();
        let private = manifest
            .get("private")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        packages.push(WorkspacePackage {
            name: name.to_string(),
            dir,
            manifest_rel,
            private,
            manifest,
        });
    }
    Ok(packages)
}

/// Map a workspace-relative file path to the package that owns it, picking
/// the deepest package directory containing the file.
pub fn owning_package<'a>(
    packages: &'a [WorkspacePackage],
    rel_path: &str,
) -> Option<&'a WorkspacePackage> {
    packages
        .iter()
        .filter(|package| {
            package.dir.is_empty()
                || rel_path == package.dir
                || rel_path.starts_with(&format!("{}/", package.dir))
        })
        .max_by_key(|package| package.dir.len())
}

pub fn rel_string(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write");
    }

    #[test]
    fn discovers_packages_and_skips_vendored_trees() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        write(root, "package.json", r#"{"private": true}"#);
        write(root, "packages/core/package.json", r#"{"name": "@acme/core"}"#);
        write(
            root,
            "packages/cli/package.json",
            r#"{"name": "@acme/cli", "private": true}"#,
        );
        write(root, "node_modules/left-pad/package.json", r#"{"name": "left-pad"}"#);
        write(root, ".cache/x/package.json", r#"{"name": "hidden"}"#);

        let manifests = discover_manifests(root).expect("discover");
        assert_eq!(manifests.len(), 3);

        let packages = load_packages(root).expect("load");
        let names: Vec<_> = packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["@acme/cli", "@acme/core"]);
        assert!(packages[0].private);
        assert_eq!(packages[1].dir, "packages/core");
        assert_eq!(packages[1].manifest_rel, "packages/core/package.json");
    }

    #[test]
    fn owning_package_prefers_deepest_directory() {
        let make = |name: &str, dir: &str| WorkspacePackage {
            name: name.to_string(),
            dir: dir.to_string(),
            manifest_rel: format!("{dir}/package.json"),
            private: false,
            manifest: Value::Null,
        };
        let packages = vec![
            make("root", ""),
            make("core", "packages/core"),
            make("core-utils", "packages/core/utils"),
        ];
        let owner = |rel: &str| owning_package(&packages, rel).map(|p| p.name.clone());
        assert_eq!(owner("packages/core/src/index.ts").as_deref(), Some("core"));
        assert_eq!(
            owner("packages/core/utils/a.ts").as_deref(),
            Some("core-utils")
        );
        assert_eq!(owner("packages/core-extra/a.ts").as_deref(), Some("root"));
    }
}
