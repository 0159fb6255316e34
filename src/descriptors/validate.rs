//! The `changesets` check: every changed publishable package has a valid,
//! fresh, non-conflicting change descriptor.
use super::coverage::{changed_packages, uncovered, unknown_packages, CoverageRules};
use super::duplicates::{find_duplicates, Severity};
use super::git::GitHistory;
use super::{load_descriptors, staleness, Staleness};
use crate::catalog::CHANGESETS;
use crate::config::{ChangesetConfig, WorkspacePaths};
use crate::report::{CheckResult, CheckStatus, SubTask};
use crate::workspace::{load_packages, rel_string};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;

pub struct DescriptorValidation<'a> {
    pub paths: &'a WorkspacePaths,
    pub config: &'a ChangesetConfig,
    pub base_branch: &'a str,
    pub history: &'a dyn GitHistory,
    pub now: DateTime<Utc>,
}

/// Problems found by one validation phase.
#[derive(Debug, Default)]
struct Phase {
    name: &'static str,
    errors: Vec<String>,
    warnings: Vec<String>,
    summary: String,
}

impl Phase {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    fn status(&self) -> CheckStatus {
        if !self.errors.is_empty() {
            CheckStatus::Fail
        } else if !self.warnings.is_empty() {
            CheckStatus::Warn
        } else {
            CheckStatus::Pass
        }
    }

    fn sub_task(&self) -> SubTask {
        let message = match (self.errors.first(), self.warnings.first()) {
            (Some(error), _) => error.clone(),
            (None, Some(warning)) => warning.clone(),
            (None, None) => self.summary.clone(),
        };
        SubTask {
            name: self.name.to_string(),
            status: self.status(),
            message,
        }
    }
}

impl DescriptorValidation<'_> {
    /// Run every phase. Infrastructure problems (no git history, unreadable
    /// workspace) come back as a failed result rather than an error.
    pub fn run(&self) -> CheckResult {
        match self.run_phases() {
            Ok(result) => result,
            Err(err) => CheckResult::new(
                CHANGESETS,
                CheckStatus::Fail,
                format!("cannot validate change descriptors: {err:#}"),
            ),
        }
    }

    fn run_phases(&self) -> Result<CheckResult> {
        let root = self.paths.root();
        let packages = load_packages(root).context("load workspace packages")?;
        let merge_base = self
            .history
            .merge_base(self.base_branch)
            .context("determine changes since the base branch")?;
        let changed = self
            .history
            .changed_files(&merge_base)
            .context("list changed files")?;
        let loaded = load_descriptors(&self.paths.changeset_dir(), |path| {
            self.history.file_added_at(&rel_string(root, path))
        })?;
        let rules = CoverageRules {
            ignore: self
                .config
                .ignore_patterns
                .iter()
                .map(|pattern| Regex::new(pattern))
                .collect::<Result<_, _>>()
                .context("compile changesets.ignore_patterns")?,
            changeset_dir: self.paths.changeset_dir_rel().to_string(),
        };
        tracing::debug!(
            packages = packages.len(),
            changed = changed.len(),
            descriptors = loaded.descriptors.len(),
            "validating change descriptors"
        );

        let mut parse = Phase::new("parse");
        parse.errors = loaded.errors.iter().map(ToString::to_string).collect();
        parse.summary = format!("{} descriptors parsed", loaded.descriptors.len());
        for (file, package) in unknown_packages(&packages, &loaded.descriptors) {
            parse
                .errors
                .push(format!("{file}: {package} is not a workspace package"));
        }

        let mut coverage = Phase::new("coverage");
        let changes = changed_packages(&packages, &changed, &rules, |rel| {
            self.history.file_at(&merge_base, rel).ok().flatten()
        });
        for change in uncovered(&changes, &loaded.descriptors) {
            coverage.errors.push(format!(
                "missing change descriptor for {} ({})",
                change.package,
                change.reason()
            ));
        }
        coverage.summary = format!("{} changed packages covered", changes.len());

        let mut duplicates = Phase::new("duplicates");
        for warning in find_duplicates(&loaded.descriptors, &self.config.duplicates) {
            let line = if warning.files.is_empty() {
                warning.message
            } else {
                format!("{} [{}]", warning.message, warning.files.join(", "))
            };
            match warning.severity {
                Severity::Error => duplicates.errors.push(line),
                Severity::Warning => duplicates.warnings.push(line),
            }
        }
        duplicates.summary = "no duplicate descriptors".to_string();

        let mut freshness = Phase::new("staleness");
        for descriptor in &loaded.descriptors {
            match staleness(
                descriptor.created_at,
                self.now,
                self.config.stale_warn_days,
                self.config.stale_error_days,
            ) {
                Staleness::Fresh => {}
                Staleness::Stale { age_days } => freshness.warnings.push(format!(
                    "{} is {age_days} days old; release or remove it",
                    descriptor.filename
                )),
                Staleness::Expired { age_days } => freshness.errors.push(format!(
                    "{} is {age_days} days old (limit {} days)",
                    descriptor.filename, self.config.stale_error_days
                )),
            }
        }
        freshness.summary = "all descriptors are recent".to_string();

        Ok(combine(&[parse, coverage, duplicates, freshness]))
    }
}

fn combine(phases: &[Phase]) -> CheckResult {
    let status = phases
        .iter()
        .map(Phase::status)
        .fold(CheckStatus::Pass, CheckStatus::worst);
    let errors: Vec<&String> = phases.iter().flat_map(|phase| phase.errors.iter()).collect();
    let warnings: Vec<&String> = phases
        .iter()
        .flat_map(|phase| phase.warnings.iter())
        .collect();
    let headline = errors.first().or(warnings.first());
    let message = match headline {
        Some(first) => {
            let others = errors.len() + warnings.len() - 1;
            if others == 0 {
                first.to_string()
            } else {
                format!("{first} (+{others} more)")
            }
        }
        None => phases
            .iter()
            .map(|phase| phase.summary.as_str())
            .take(2)
            .collect::<Vec<_>>()
            .join(", "),
    };
    let details = errors
        .iter()
        .map(|line| format!("error: {line}"))
        .chain(warnings.iter().map(|line| format!("warning: {line}")))
        .collect();
    CheckResult::new(CHANGESETS, status, message)
        .with_details(details)
        .with_sub_tasks(phases.iter().map(Phase::sub_task).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;
    use crate::descriptors::git::FakeHistory;
    use chrono::{Duration, TimeZone};
    use std::fs;
    use std::path::Path;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).single().expect("time")
    }

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write");
    }

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "package.json", r#"{"name": "mono", "private": true}"#);
        write(
            dir.path(),
            "packages/core/package.json",
            r#"{"name": "@acme/core", "version": "1.0.0", "dependencies": {"left-pad": "^1.3.0"}}"#,
        );
        write(
            dir.path(),
            "packages/cli/package.json",
            r#"{"name": "@acme/cli", "version": "1.0.0"}"#,
        );
        dir
    }

    fn validate(root: &Path, history: &FakeHistory) -> CheckResult {
        let paths = WorkspacePaths::new(root.to_path_buf(), &PathsConfig::default());
        let config = ChangesetConfig::default();
        DescriptorValidation {
            paths: &paths,
            config: &config,
            base_branch: "main",
            history,
            now: now(),
        }
        .run()
    }

    #[test]
    fn new_runtime_dependency_without_descriptor_fails_naming_the_package() {
        let dir = workspace();
        let history = FakeHistory {
            changed: vec!["packages/core/package.json".to_string()],
            base_files: [(
                "packages/core/package.json".to_string(),
                r#"{"name": "@acme/core", "version": "1.0.0"}"#.to_string(),
            )]
            .into(),
            ..FakeHistory::default()
        };
        let result = validate(dir.path(), &history);
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.message.contains("@acme/core"), "{}", result.message);
        assert!(result.message.contains("left-pad"));
        let coverage = result
            .sub_tasks
            .iter()
            .find(|task| task.name == "coverage")
            .expect("coverage sub-task");
        assert_eq!(coverage.status, CheckStatus::Fail);
    }

    #[test]
    fn covered_changes_pass() {
        let dir = workspace();
        write(
            dir.path(),
            ".changeset/brave-cats.md",
            "---\n\"@acme/cli\": patch\n---\n\nFix flag parsing.\n",
        );
        let history = FakeHistory {
            changed: vec![
                "packages/cli/src/flags.ts".to_string(),
                ".changeset/brave-cats.md".to_string(),
            ],
            added: [(".changeset/brave-cats.md".to_string(), now() - Duration::days(1))].into(),
            ..FakeHistory::default()
        };
        let result = validate(dir.path(), &history);
        assert_eq!(result.status, CheckStatus::Pass, "{:?}", result.details);
        assert!(result.details.is_empty());
        assert_eq!(result.sub_tasks.len(), 4);
    }

    #[test]
    fn stale_and_expired_descriptors() {
        let dir = workspace();
        write(dir.path(), ".changeset/old.md", "---\n\"@acme/cli\": patch\n---\n\nOld fix.\n");
        let mut history = FakeHistory {
            added: [(".changeset/old.md".to_string(), now() - Duration::days(10))].into(),
            ..FakeHistory::default()
        };
        assert_eq!(validate(dir.path(), &history).status, CheckStatus::Warn);
        history
            .added
            .insert(".changeset/old.md".to_string(), now() - Duration::days(45));
        let result = validate(dir.path(), &history);
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.message.contains("45 days old"));
    }

    #[test]
    fn duplicate_summaries_warn_and_collisions_fail() {
        let dir = workspace();
        write(dir.path(), ".changeset/a.md", "---\n\"@acme/cli\": patch\n---\n\nFixed bug\n");
        write(dir.path(), ".changeset/b.md", "---\n\"@acme/core\": patch\n---\n\nFixed bug\n");
        let history = FakeHistory::default();
        let result = validate(dir.path(), &history);
        assert_eq!(result.status, CheckStatus::Warn);
        assert!(result.details.iter().any(|d| d.contains("identical summary")));

        write(dir.path(), ".changeset/c.md", "---\n\"@acme/cli\": patch\n---\n\nOther fix\n");
        let result = validate(dir.path(), &history);
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.message.contains("patch bump of @acme/cli"));
    }

    #[test]
    fn unknown_packages_and_parse_errors_fail() {
        let dir = workspace();
        write(dir.path(), ".changeset/ghost.md", "---\nghost: minor\n---\n\nBoo.\n");
        write(dir.path(), ".changeset/broken.md", "not a descriptor\n");
        let result = validate(dir.path(), &FakeHistory::default());
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.details.iter().any(|d| d.contains("ghost is not a workspace package")));
        assert!(result.details.iter().any(|d| d.contains("broken.md")));
    }

    #[test]
    fn missing_git_history_is_a_failure() {
        let dir = workspace();
        let history = FakeHistory {
            unavailable: true,
            ..FakeHistory::default()
        };
        let result = validate(dir.path(), &history);
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.message.starts_with("cannot validate change descriptors"));
    }
}
