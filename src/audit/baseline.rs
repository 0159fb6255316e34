//! The operator-accepted vulnerability snapshot.
use super::VulnerabilityCounts;
use crate::util::write_json_atomic;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilityBaseline {
    pub timestamp: String,
    pub counts: VulnerabilityCounts,
    /// Scanner that produced the counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanner: Option<String>,
}

pub fn load_baseline(path: &Path) -> Result<Option<VulnerabilityBaseline>> {
    if !path.is_file() {
        return Ok(None);
    }
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let baseline =
        serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(baseline))
}

pub fn save_baseline(path: &Path, baseline: &VulnerabilityBaseline) -> Result<()> {
    write_json_atomic(path, baseline).with_context(|| format!("write {}", path.display()))
}
