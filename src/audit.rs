//! Security audit with scanner fallback and baseline diffing.
//!
//! The primary scanner is retried on transient errors and abandoned for the
//! secondary when it is missing, unparseable, or deprecated. A hard tool error
//! fails the audit. Gating looks only at vulnerabilities that are new since
//! the accepted baseline.
pub mod baseline;
pub mod parser;
pub mod scanner;

use crate::catalog::AUDIT;
use crate::report::{CheckResult, CheckStatus, SubTask};
use anyhow::{anyhow, Result};
use baseline::VulnerabilityBaseline;
use scanner::{ScanOutcome, Scanner};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Attempts with less time than this left are not started.
const MIN_SCAN_TIME: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VulnerabilityCounts {
    pub critical: u64,
    pub high: u64,
    pub moderate: u64,
    pub low: u64,
    pub info: u64,
}

impl VulnerabilityCounts {
    pub fn total(&self) -> u64 {
        self.critical + self.high + self.moderate + self.low + self.info
    }

    /// Per-severity increase over `baseline`, floored at zero.
    pub fn delta(&self, baseline: &VulnerabilityCounts) -> VulnerabilityCounts {
        VulnerabilityCounts {
            critical: self.critical.saturating_sub(baseline.critical),
            high: self.high.saturating_sub(baseline.high),
            moderate: self.moderate.saturating_sub(baseline.moderate),
            low: self.low.saturating_sub(baseline.low),
            info: self.info.saturating_sub(baseline.info),
        }
    }

    pub fn describe(&self) -> String {
        let parts: Vec<String> = [
            ("critical", self.critical),
            ("high", self.high),
            ("moderate", self.moderate),
            ("low", self.low),
            ("info", self.info),
        ]
        .iter()
        .filter(|(_, count)| *count > 0)
        .map(|(label, count)| format!("{count} {label}"))
        .collect();
        if parts.is_empty() {
            "none".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// New-vulnerability counts at which the audit warns. Any new critical or
/// high finding always fails.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditThresholds {
    pub moderate_warn: u64,
    pub low_warn: u64,
    pub total_warn: u64,
}

impl Default for AuditThresholds {
    fn default() -> Self {
        Self {
            moderate_warn: 5,
            low_warn: 15,
            total_warn: 20,
        }
    }
}

/// Gate on new vulnerabilities.
pub fn gate(delta: &VulnerabilityCounts, thresholds: &AuditThresholds) -> (CheckStatus, String) {
    if delta.critical > 0 || delta.high > 0 {
        return (
            CheckStatus::Fail,
            format!(
                "{} new critical and {} new high vulnerabilities",
                delta.critical, delta.high
            ),
        );
    }
    let mut reasons = Vec::new();
    if delta.moderate >= thresholds.moderate_warn {
        reasons.push(format!("{} new moderate", delta.moderate));
    }
    if delta.low >= thresholds.low_warn {
        reasons.push(format!("{} new low", delta.low));
    }
    if delta.total() >= thresholds.total_warn {
        reasons.push(format!("{} new in total", delta.total()));
    }
    if reasons.is_empty() {
        return (CheckStatus::Pass, String::new());
    }
    (
        CheckStatus::Warn,
        format!("{} vulnerabilities", reasons.join(", ")),
    )
}

/// How the audit resolved which counts to gate on.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    Counts {
        counts: VulnerabilityCounts,
        scanner: String,
    },
    Failed(String),
    /// Neither scanner could run.
    Unavailable(String),
}

pub struct SecurityAudit<'a> {
    pub primary: &'a dyn Scanner,
    pub secondary: Option<&'a dyn Scanner>,
    pub baseline: Option<VulnerabilityBaseline>,
    pub thresholds: AuditThresholds,
    /// Waits before each retry of a transient primary failure.
    pub retry_backoff: Vec<Duration>,
    /// Run the secondary scanner even when the primary succeeds.
    pub corroborate: bool,
    /// Wall-clock allowance for the whole scanner chain. Retries stop and
    /// attempts shrink so the chain ends inside it.
    pub budget: Option<Duration>,
}

/// Cut-off instants for one pass over the scanner chain.
#[derive(Debug, Clone, Copy)]
struct ScanClock {
    end: Option<Instant>,
    /// The primary and its retries stop here so the secondary keeps half.
    primary_end: Option<Instant>,
}

impl ScanClock {
    fn start(budget: Option<Duration>, has_secondary: bool) -> Self {
        let now = Instant::now();
        let primary_share = if has_secondary {
            budget.map(|budget| budget / 2)
        } else {
            budget
        };
        Self {
            end: budget.map(|budget| now + budget),
            primary_end: primary_share.map(|share| now + share),
        }
    }
}

fn time_left(until: Option<Instant>) -> Option<Duration> {
    until.map(|end| end.saturating_duration_since(Instant::now()))
}

fn scan_until(scanner: &dyn Scanner, until: Option<Instant>) -> ScanOutcome {
    let limit = time_left(until);
    if limit.is_some_and(|limit| limit < MIN_SCAN_TIME) {
        return ScanOutcome::Transient(format!(
            "no time left to run {} before the audit deadline",
            scanner.name()
        ));
    }
    scanner.scan(limit)
}

impl SecurityAudit<'_> {
    pub fn run(&self) -> CheckResult {
        let mut tasks = Vec::new();
        let clock = self.clock();
        let resolution = self.resolve(&clock, &mut tasks);
        let (status, message, details) = match resolution {
            Resolution::Counts { counts, scanner } => {
                self.evaluate(counts, &scanner, &clock, &mut tasks)
            }
            Resolution::Failed(reason) => (
                CheckStatus::Fail,
                format!("security audit failed: {reason}"),
                Vec::new(),
            ),
            Resolution::Unavailable(reason) => match &self.baseline {
                Some(baseline) => {
                    tracing::warn!(
                        baseline = %baseline.timestamp,
                        "no scanner available; carrying the baseline forward"
                    );
                    (
                        CheckStatus::Pass,
                        format!(
                            "no scanner could run; security status carried forward from the \
                             baseline of {} (new vulnerabilities could not be detected)",
                            baseline.timestamp
                        ),
                        vec![reason, format!("baseline: {}", baseline.counts.describe())],
                    )
                }
                None => (
                    CheckStatus::Fail,
                    "security audit could not run and no baseline exists".to_string(),
                    vec![reason],
                ),
            },
        };
        CheckResult::new(AUDIT, status, message)
            .with_details(details)
            .with_sub_tasks(tasks)
    }

    /// Counts from the scanner chain, for recording a new baseline.
    pub fn current_counts(&self) -> Result<(VulnerabilityCounts, String)> {
        let mut tasks = Vec::new();
        match self.resolve(&self.clock(), &mut tasks) {
            Resolution::Counts { counts, scanner } => Ok((counts, scanner)),
            Resolution::Failed(reason) | Resolution::Unavailable(reason) => {
                Err(anyhow!("cannot scan dependencies: {reason}"))
            }
        }
    }

    fn clock(&self) -> ScanClock {
        ScanClock::start(self.budget, self.secondary.is_some())
    }

    fn resolve(&self, clock: &ScanClock, tasks: &mut Vec<SubTask>) -> Resolution {
        let primary_name = self.primary.name().to_string();
        let fallback_reason = match self.scan_primary(clock) {
            ScanOutcome::Counts(counts) => {
                tasks.push(SubTask {
                    name: primary_name.clone(),
                    status: CheckStatus::Pass,
                    message: format!("found {}", counts.describe()),
                });
                return Resolution::Counts {
                    counts,
                    scanner: primary_name,
                };
            }
            ScanOutcome::Hard(message) => {
                tasks.push(SubTask {
                    name: primary_name.clone(),
                    status: CheckStatus::Fail,
                    message: message.clone(),
                });
                return Resolution::Failed(format!("{primary_name}: {message}"));
            }
            ScanOutcome::Deprecated(message) => format!("{primary_name} is deprecated: {message}"),
            ScanOutcome::Transient(message) => {
                format!("{primary_name} kept failing: {message}")
            }
            ScanOutcome::Unavailable(message) => format!("{primary_name} unavailable: {message}"),
        };
        tasks.push(SubTask {
            name: primary_name,
            status: CheckStatus::Skip,
            message: fallback_reason.clone(),
        });

        let Some(secondary) = self.secondary else {
            return Resolution::Unavailable(fallback_reason);
        };
        tracing::warn!(
            reason = %fallback_reason,
            secondary = secondary.name(),
            "falling back to secondary scanner"
        );
        let secondary_name = secondary.name().to_string();
        match scan_until(secondary, clock.end) {
            ScanOutcome::Counts(counts) => {
                tasks.push(SubTask {
                    name: secondary_name.clone(),
                    status: CheckStatus::Pass,
                    message: format!("found {}", counts.describe()),
                });
                Resolution::Counts {
                    counts,
                    scanner: secondary_name,
                }
            }
            ScanOutcome::Hard(message) => {
                tasks.push(SubTask {
                    name: secondary_name.clone(),
                    status: CheckStatus::Fail,
                    message: message.clone(),
                });
                Resolution::Failed(format!("{secondary_name}: {message}"))
            }
            ScanOutcome::Deprecated(message)
            | ScanOutcome::Transient(message)
            | ScanOutcome::Unavailable(message) => {
                tasks.push(SubTask {
                    name: secondary_name.clone(),
                    status: CheckStatus::Skip,
                    message: message.clone(),
                });
                Resolution::Unavailable(format!(
                    "{fallback_reason}; {secondary_name} unavailable: {message}"
                ))
            }
        }
    }

    fn scan_primary(&self, clock: &ScanClock) -> ScanOutcome {
        let mut attempt = 0usize;
        loop {
            let outcome = scan_until(self.primary, clock.primary_end);
            let ScanOutcome::Transient(message) = &outcome else {
                return outcome;
            };
            let Some(wait) = self.retry_backoff.get(attempt) else {
                return outcome;
            };
            if time_left(clock.primary_end).is_some_and(|left| left < *wait + MIN_SCAN_TIME) {
                tracing::debug!(
                    scanner = self.primary.name(),
                    attempt,
                    "no time left for another attempt"
                );
                return outcome;
            }
            attempt += 1;
            tracing::warn!(
                scanner = self.primary.name(),
                attempt,
                wait_ms = wait.as_millis() as u64,
                error = %message,
                "transient scanner failure; retrying"
            );
            std::thread::sleep(*wait);
        }
    }

    fn evaluate(
        &self,
        counts: VulnerabilityCounts,
        scanner: &str,
        clock: &ScanClock,
        tasks: &mut Vec<SubTask>,
    ) -> (CheckStatus, String, Vec<String>) {
        let delta = match &self.baseline {
            Some(baseline) => counts.delta(&baseline.counts),
            None => counts,
        };
        let mut details = vec![format!("{scanner}: {}", counts.describe())];
        if let Some(baseline) = &self.baseline {
            details.push(format!(
                "baseline ({}): {}",
                baseline.timestamp,
                baseline.counts.describe()
            ));
            details.push(format!("new: {}", delta.describe()));
        }
        let (mut status, mut message) = gate(&delta, &self.thresholds);
        if status == CheckStatus::Pass {
            message = if self.baseline.is_some() {
                "no new vulnerabilities since baseline".to_string()
            } else if counts.total() == 0 {
                "no vulnerabilities found".to_string()
            } else {
                format!("{} below thresholds", counts.describe())
            };
        }

        let primary_succeeded = scanner == self.primary.name();
        if let (true, true, Some(secondary)) = (primary_succeeded, self.corroborate, self.secondary)
        {
            match scan_until(secondary, clock.end) {
                ScanOutcome::Counts(second) => {
                    let missed = second.critical.saturating_sub(counts.critical);
                    let task_status = if missed > 0 {
                        CheckStatus::Fail
                    } else {
                        CheckStatus::Pass
                    };
                    tasks.push(SubTask {
                        name: secondary.name().to_string(),
                        status: task_status,
                        message: format!("corroboration found {}", second.describe()),
                    });
                    if missed > 0 {
                        status = CheckStatus::Fail;
                        message = format!(
                            "{} found {missed} critical vulnerabilities that {scanner} missed",
                            secondary.name()
                        );
                    }
                }
                ScanOutcome::Transient(reason)
                | ScanOutcome::Deprecated(reason)
                | ScanOutcome::Hard(reason)
                | ScanOutcome::Unavailable(reason) => {
                    tracing::debug!(scanner = secondary.name(), %reason, "corroboration skipped");
                    tasks.push(SubTask {
                        name: secondary.name().to_string(),
                        status: CheckStatus::Skip,
                        message: format!("corroboration skipped: {reason}"),
                    });
                }
            }
        }
        (status, message, details)
    }
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;
