//! Check results and the aggregated guardrail report.
//!
//! A `CheckResult` is produced once per check per run and never mutated
//! afterwards; the orchestrator builds new values when it needs a different
//! status. The report is the terminal artifact of a run.
use crate::util::write_json_atomic;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const REPORT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skip,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skip => "skip",
        }
    }

    /// Combine two statuses, keeping the more severe one. `Skip` only wins
    /// over nothing.
    pub fn worst(self, other: CheckStatus) -> CheckStatus {
        fn rank(status: CheckStatus) -> u8 {
            match status {
                CheckStatus::Skip => 0,
                CheckStatus::Pass => 1,
                CheckStatus::Warn => 2,
                CheckStatus::Fail => 3,
            }
        }
        if rank(other) > rank(self) {
            other
        } else {
            self
        }
    }
}

/// A named step inside a check (for example one scanner of the audit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTask {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub details: Vec<String>,
    #[serde(default)]
    pub is_diagnostic: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_tasks: Vec<SubTask>,
}

impl CheckResult {
    pub fn new(name: &str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
            duration_ms: 0,
            details: Vec::new(),
            is_diagnostic: false,
            sub_tasks: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }

    pub fn with_sub_tasks(mut self, sub_tasks: Vec<SubTask>) -> Self {
        self.sub_tasks = sub_tasks;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub passed: usize,
    pub warned: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_duration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitInfo {
    pub branch: String,
    pub base_branch: String,
    pub commit_range: String,
}

/// Which critical check stopped the run and what never started because of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortCircuit {
    pub failed_check: String,
    pub not_run: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailReport {
    pub timestamp: String,
    pub version: String,
    pub summary: Summary,
    pub results: Vec<CheckResult>,
    #[serde(default)]
    pub from_cache: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_circuit: Option<ShortCircuit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_info: Option<GitInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_quality_score: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Warn,
    Fail,
}

impl Verdict {
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Pass | Verdict::Warn => 0,
            Verdict::Fail => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Warn => "warn",
            Verdict::Fail => "fail",
        }
    }
}

impl GuardrailReport {
    pub fn new(timestamp: String, results: Vec<CheckResult>) -> Self {
        let summary = summarize(&results);
        let package_quality_score = quality_score(&results);
        Self {
            timestamp,
            version: REPORT_VERSION.to_string(),
            summary,
            results,
            from_cache: false,
            short_circuit: None,
            git_info: None,
            package_quality_score,
        }
    }

    /// Overall decision. Diagnostic results are informational and never
    /// count toward it.
    pub fn verdict(&self) -> Verdict {
        let mut verdict = Verdict::Pass;
        for result in self.results.iter().filter(|r| !r.is_diagnostic) {
            match result.status {
                CheckStatus::Fail => return Verdict::Fail,
                CheckStatus::Warn => verdict = Verdict::Warn,
                CheckStatus::Pass | CheckStatus::Skip => {}
            }
        }
        verdict
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }
}

pub fn summarize(results: &[CheckResult]) -> Summary {
    let mut summary = Summary::default();
    for result in results {
        match result.status {
            CheckStatus::Pass => summary.passed += 1,
            CheckStatus::Warn => summary.warned += 1,
            CheckStatus::Fail => summary.failed += 1,
            CheckStatus::Skip => summary.skipped += 1,
        }
        summary.total_duration += result.duration_ms;
    }
    summary
}

/// Percentage score over counted (non-diagnostic, non-skipped) results where
/// a warning earns half credit.
pub fn quality_score(results: &[CheckResult]) -> Option<u32> {
    let counted: Vec<_> = results
        .iter()
        .filter(|r| !r.is_diagnostic && r.status != CheckStatus::Skip)
        .collect();
    if counted.is_empty() {
        return None;
    }
    let points: f64 = counted
        .iter()
        .map(|r| match r.status {
            CheckStatus::Pass => 1.0,
            CheckStatus::Warn => 0.5,
            CheckStatus::Fail | CheckStatus::Skip => 0.0,
        })
        .sum();
    Some((100.0 * points / counted.len() as f64).round() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, status: CheckStatus, duration_ms: u64) -> CheckResult {
        CheckResult::new(name, status, "").with_duration_ms(duration_ms)
    }

    #[test]
    fn summary_counts_every_status() {
        let results = vec![
            result("a", CheckStatus::Pass, 10),
            result("b", CheckStatus::Warn, 5),
            result("c", CheckStatus::Fail, 1),
            result("d", CheckStatus::Skip, 0),
            result("e", CheckStatus::Pass, 4),
        ];
        let summary = summarize(&results);
        assert_eq!(
            summary,
            Summary {
                passed: 2,
                warned: 1,
                failed: 1,
                skipped: 1,
                total_duration: 20,
            }
        );
    }

    #[test]
    fn diagnostic_failures_do_not_flip_the_verdict() {
        let mut diagnostic = result("lint", CheckStatus::Fail, 1);
        diagnostic.is_diagnostic = true;
        let report = GuardrailReport::new(
            "t".to_string(),
            vec![result("changesets", CheckStatus::Pass, 1), diagnostic],
        );
        assert_eq!(report.verdict(), Verdict::Pass);
    }

    #[test]
    fn verdict_and_exit_codes() {
        let warn = GuardrailReport::new("t".into(), vec![result("a", CheckStatus::Warn, 0)]);
        assert_eq!(warn.verdict(), Verdict::Warn);
        assert_eq!(warn.verdict().exit_code(), 0);
        let fail = GuardrailReport::new(
            "t".into(),
            vec![
                result("a", CheckStatus::Warn, 0),
                result("b", CheckStatus::Fail, 0),
            ],
        );
        assert_eq!(fail.verdict().exit_code(), 1);
    }

    #[test]
    fn quality_score_gives_half_credit_for_warnings() {
        let results = vec![
            result("a", CheckStatus::Pass, 0),
            result("b", CheckStatus::Warn, 0),
            result("c", CheckStatus::Skip, 0),
        ];
        assert_eq!(quality_score(&results), Some(75));
        assert_eq!(quality_score(&[result("s", CheckStatus::Skip, 0)]), None);
    }

    #[test]
    fn report_json_uses_camel_case_fields() {
        let mut report = GuardrailReport::new(
            "2026-01-01T00:00:00.000Z".into(),
            vec![result("a", CheckStatus::Pass, 3)],
        );
        report.git_info = Some(GitInfo {
            branch: "feature".into(),
            base_branch: "main".into(),
            commit_range: "abc1234..def5678".into(),
        });
        let value = serde_json::to_value(&report).expect("serialize");
        assert_eq!(value["summary"]["totalDuration"], 3);
        assert_eq!(value["results"][0]["durationMs"], 3);
        assert_eq!(value["results"][0]["isDiagnostic"], false);
        assert_eq!(value["gitInfo"]["commitRange"], "abc1234..def5678");
        assert_eq!(value["packageQualityScore"], 100);
        assert!(value.get("shortCircuit").is_none());
    }

    #[test]
    fn worst_status_prefers_failures() {
        assert_eq!(CheckStatus::Pass.worst(CheckStatus::Warn), CheckStatus::Warn);
        assert_eq!(CheckStatus::Fail.worst(CheckStatus::Warn), CheckStatus::Fail);
        assert_eq!(CheckStatus::Skip.worst(CheckStatus::Pass), CheckStatus::Pass);
    }
}
