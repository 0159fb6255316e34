//! Workspace configuration loaded from `guardrails.toml`.
//!
//! Every field has a default so an unconfigured monorepo gets the standard
//! catalog. The file only needs to name what differs.
use crate::audit::AuditThresholds;
use crate::catalog::Tier;
use crate::descriptors::duplicates::DuplicatePolicy;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "guardrails.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardrailsConfig {
    pub paths: PathsConfig,
    pub git: GitConfig,
    pub cache: CacheConfig,
    pub changesets: ChangesetConfig,
    pub audit: AuditConfig,
    pub checks: BTreeMap<String, CheckOverride>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub lockfile: String,
    pub changeset_dir: String,
    pub cache_file: String,
    pub baseline_file: String,
    pub report_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            lockfile: "pnpm-lock.yaml".to_string(),
            changeset_dir: ".changeset".to_string(),
            cache_file: ".guardrails/cache.json".to_string(),
            baseline_file: ".guardrails/audit-baseline.json".to_string(),
            report_file: ".guardrails/report.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GitConfig {
    pub base_branch: String,
    pub remote: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            base_branch: "main".to_string(),
            remote: "origin".to_string(),
        }
    }
}

impl GitConfig {
    /// Base branch after applying `GUARDRAILS_BASE_REF` / `GITHUB_BASE_REF`.
    pub fn effective_base_branch(&self) -> String {
        ["GUARDRAILS_BASE_REF", "GITHUB_BASE_REF"]
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
            .unwrap_or_else(|| self.base_branch.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 3600 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChangesetConfig {
    pub stale_warn_days: i64,
    pub stale_error_days: i64,
    /// Regular expressions over workspace-relative paths; matching changed
    /// files never require a change descriptor.
    pub ignore_patterns: Vec<String>,
    pub duplicates: DuplicatePolicy,
}

impl Default for ChangesetConfig {
    fn default() -> Self {
        Self {
            stale_warn_days: 7,
            stale_error_days: 30,
            ignore_patterns: vec![
                r"(^|/)__tests__/".to_string(),
                r"(^|/)tests?/".to_string(),
                r"\.(test|spec)\.[cm]?[jt]sx?$".to_string(),
                r"\.md$".to_string(),
                r"(^|/)CHANGELOG".to_string(),
            ],
            duplicates: DuplicatePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    pub primary: String,
    pub secondary: String,
    /// Run the secondary scanner even when the primary succeeds.
    pub corroborate: bool,
    pub retry_backoff_ms: Vec<u64>,
    pub scan_timeout_ms: u64,
    pub thresholds: AuditThresholds,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            primary: "pnpm audit --json".to_string(),
            secondary: "osv-scanner --format json --lockfile pnpm-lock.yaml".to_string(),
            corroborate: true,
            retry_backoff_ms: vec![1000, 2000, 3000],
            scan_timeout_ms: 120_000,
            thresholds: AuditThresholds::default(),
        }
    }
}

/// Per-check override or definition of an additional external check.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckOverride {
    pub tier: Option<Tier>,
    pub command: Option<String>,
    pub timeout_ms: Option<u64>,
    pub quick_timeout_ms: Option<u64>,
    pub skip_in_quick: Option<bool>,
    pub fix: Option<String>,
    pub enabled: Option<bool>,
}

/// Resolved locations of persisted state inside a workspace.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    root: PathBuf,
    paths: PathsConfig,
}

impl WorkspacePaths {
    pub fn new(root: PathBuf, paths: &PathsConfig) -> Self {
        Self {
            root,
            paths: paths.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lockfile(&self) -> PathBuf {
        self.root.join(&self.paths.lockfile)
    }

    pub fn changeset_dir(&self) -> PathBuf {
        self.root.join(&self.paths.changeset_dir)
    }

    pub fn changeset_dir_rel(&self) -> &str {
        &self.paths.changeset_dir
    }

    pub fn cache_file(&self) -> PathBuf {
        self.root.join(&self.paths.cache_file)
    }

    pub fn baseline_file(&self) -> PathBuf {
        self.root.join(&self.paths.baseline_file)
    }

    pub fn report_file(&self) -> PathBuf {
        self.root.join(&self.paths.report_file)
    }
}

/// Load config from an explicit path, or from `guardrails.toml` under `root`
/// when present. A missing default file yields the defaults.
pub fn load_config(root: &Path, explicit: Option<&Path>) -> Result<GuardrailsConfig> {
    let (path, required) = match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => (root.join(CONFIG_FILE_NAME), false),
    };
    if !path.is_file() {
        if required {
            return Err(anyhow!("config file {} not found", path.display()));
        }
        return Ok(GuardrailsConfig::default());
    }
    let text = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let config: GuardrailsConfig =
        toml::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
    validate_config(&config).with_context(|| format!("validate {}", path.display()))?;
    Ok(config)
}

/// Reject configurations that would make a run meaningless.
pub fn validate_config(config: &GuardrailsConfig) -> Result<()> {
    if config.paths.lockfile.trim().is_empty() {
        return Err(anyhow!("paths.lockfile must be non-empty"));
    }
    if config.git.base_branch.trim().is_empty() {
        return Err(anyhow!("git.base_branch must be non-empty"));
    }
    let changesets = &config.changesets;
    if changesets.stale_warn_days < 0 || changesets.stale_error_days < changesets.stale_warn_days
    {
        return Err(anyhow!(
            "changesets.stale_error_days ({}) must be >= stale_warn_days ({}) >= 0",
            changesets.stale_error_days,
            changesets.stale_warn_days
        ));
    }
    for pattern in &changesets.ignore_patterns {
        regex::Regex::new(pattern)
            .with_context(|| format!("changesets.ignore_patterns entry {pattern:?}"))?;
    }
    changesets.duplicates.validate()?;
    if config.audit.primary.trim().is_empty() {
        return Err(anyhow!("audit.primary must be non-empty"));
    }
    for (name, entry) in &config.checks {
        if name.trim().is_empty() {
            return Err(anyhow!("check names must be non-empty"));
        }
        if let Some(command) = &entry.command {
            let argv = shell_words::split(command)
                .with_context(|| format!("checks.{name}.command {command:?}"))?;
            if argv.is_empty() {
                return Err(anyhow!("checks.{name}.command must not be empty"));
            }
        }
        if entry.timeout_ms == Some(0) || entry.quick_timeout_ms == Some(0) {
            return Err(anyhow!("checks.{name} timeouts must be positive"));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
