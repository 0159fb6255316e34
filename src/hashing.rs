//! Content hashing for cache-key derivation.
//!
//! The key ties a cached run to the exact dependency lockfile and package
//! manifests it was computed from, so a single edited manifest invalidates it.
use crate::util::sha256_hex;
use crate::workspace::{discover_manifests, rel_string};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Marker hash for a lockfile that does not exist yet.
const MISSING_LOCKFILE_HASH: &str = "missing";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentHashes {
    pub lockfile_hash: String,
    pub manifest_hashes: BTreeMap<String, String>,
}

pub fn hash_lockfile(lockfile: &Path) -> Result<String> {
    if !lockfile.is_file() {
        return Ok(MISSING_LOCKFILE_HASH.to_string());
    }
    let bytes = fs::read(lockfile).with_context(|| format!("read {}", lockfile.display()))?;
    Ok(sha256_hex(&bytes))
}

/// Hash every discovered package manifest, keyed by workspace-relative path.
pub fn hash_manifests(root: &Path) -> Result<BTreeMap<String, String>> {
    let mut hashes = BTreeMap::new();
    for manifest in discover_manifests(root)? {
        let bytes = fs::read(&manifest).with_context(|| format!("read {}", manifest.display()))?;
        hashes.insert(rel_string(root, &manifest), sha256_hex(&bytes));
    }
    Ok(hashes)
}

pub fn compute_content_hashes(root: &Path, lockfile: &Path) -> Result<ContentHashes> {
    Ok(ContentHashes {
        lockfile_hash: hash_lockfile(lockfile)?,
        manifest_hashes: hash_manifests(root)?,
    })
}
