//! Tiered guardrail execution.
//!
//! Critical checks run one at a time and stop the run on the first failure.
//! Dependent checks only start after every critical check has settled and run
//! concurrently, one worker thread each. After a critical failure the
//! dependent checks can be re-run in diagnostic mode: their results are kept
//! for context but never count toward the verdict.
use crate::cache::{self, CacheEntry, CacheKey, CacheLookup, ResultCache};
use crate::catalog::{GuardrailCheck, Tier, AUDIT};
use crate::environment::Environment;
use crate::hashing::ContentHashes;
use crate::report::{CheckResult, CheckStatus, GuardrailReport, ShortCircuit, Verdict};
use crate::util::{now_epoch_ms, rfc3339_from_epoch_ms, sha256_hex};
use std::collections::BTreeSet;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Extra time granted past a check's own timeout before the orchestrator
/// stops waiting for it.
pub const DEFAULT_DEADLINE_GRACE: Duration = Duration::from_secs(5);

/// Raw outcome of executing one check, before tier and option policy.
#[derive(Debug, Clone)]
pub enum Execution {
    Completed(CheckResult),
    TimedOut { after: Duration, details: Vec<String> },
    /// The invocation target (tool or script) does not exist.
    Missing { target: String },
}

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub quick: bool,
    pub verbose: bool,
    pub diagnostic: bool,
    pub timeout: Duration,
    pub environment: Environment,
}

/// Runs a single catalog entry. Implementations must be shareable across the
/// dependent-tier worker threads.
pub trait CheckExecutor: Send + Sync {
    fn execute(&self, check: &GuardrailCheck, ctx: &ExecutionContext) -> Execution;
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub quick: bool,
    pub verbose: bool,
    pub warn_only: bool,
    pub no_cache: bool,
    /// Re-run dependent checks diagnostically after a critical failure.
    pub diagnose: bool,
    pub skip: BTreeSet<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("--quick cannot be combined with --warn-only in a CI environment")]
    QuickWarnOnlyInCi,
    #[error("the security audit cannot be skipped in a CI environment")]
    AuditSkippedInCi,
}

impl RunOptions {
    pub fn validate(&self, environment: Environment) -> Result<(), OptionsError> {
        if !environment.ci {
            return Ok(());
        }
        if self.quick && self.warn_only {
            return Err(OptionsError::QuickWarnOnlyInCi);
        }
        if self.skip.contains(AUDIT) {
            return Err(OptionsError::AuditSkippedInCi);
        }
        Ok(())
    }

    /// Digest of the options that change what a run produces.
    pub fn cache_digest(&self) -> String {
        let skip: Vec<&str> = self.skip.iter().map(String::as_str).collect();
        sha256_hex(
            format!(
                "quick={};warn_only={};skip={}",
                self.quick,
                self.warn_only,
                skip.join(",")
            )
            .as_bytes(),
        )
    }
}

/// Where cached runs live and the workspace content they are keyed on.
pub struct CacheBinding {
    pub store: Arc<dyn ResultCache>,
    pub hashes: ContentHashes,
    pub ttl: Duration,
}

enum Planned<'a> {
    Run(&'a GuardrailCheck),
    Skipped(CheckResult),
}

pub struct Orchestrator {
    catalog: Vec<GuardrailCheck>,
    executor: Arc<dyn CheckExecutor>,
    cache: Option<CacheBinding>,
    environment: Environment,
    deadline_grace: Duration,
}

impl Orchestrator {
    pub fn new(
        catalog: Vec<GuardrailCheck>,
        executor: Arc<dyn CheckExecutor>,
        environment: Environment,
    ) -> Self {
        Self {
            catalog,
            executor,
            cache: None,
            environment,
            deadline_grace: DEFAULT_DEADLINE_GRACE,
        }
    }

    pub fn with_cache(mut self, cache: CacheBinding) -> Self {
        self.cache = Some(cache);
        self
    }

    #[cfg(test)]
    pub fn with_deadline_grace(mut self, grace: Duration) -> Self {
        self.deadline_grace = grace;
        self
    }

    /// Tier a check runs in for this environment. The audit is always
    /// critical in CI.
    pub fn effective_tier(&self, check: &GuardrailCheck) -> Tier {
        if self.environment.ci && check.name == AUDIT {
            Tier::Critical
        } else {
            check.tier
        }
    }

    pub fn run(&self, options: &RunOptions) -> Result<GuardrailReport, OptionsError> {
        options.validate(self.environment)?;
        for name in &options.skip {
            if !self.catalog.iter().any(|check| &check.name == name) {
                tracing::warn!(check = %name, "skip requested for a check not in the catalog");
            }
        }

        let cache = self
            .cache
            .as_ref()
            .filter(|_| !options.no_cache && !self.environment.ci);
        let cache_key = cache.map(|binding| CacheKey {
            hashes: binding.hashes.clone(),
            options_digest: options.cache_digest(),
        });
        if let (Some(binding), Some(key)) = (cache, cache_key.as_ref()) {
            match cache::lookup(binding.store.as_ref(), key, binding.ttl, now_epoch_ms()) {
                CacheLookup::Hit(entry) => {
                    tracing::info!(checks = entry.results.len(), "replaying cached results");
                    let mut report =
                        GuardrailReport::new(rfc3339_from_epoch_ms(entry.timestamp), entry.results);
                    report.from_cache = true;
                    return Ok(report);
                }
                CacheLookup::Miss(reason) => {
                    tracing::debug!(reason = reason.as_str(), "cache miss");
                }
            }
        }

        let started_ms = now_epoch_ms();
        let plan = self.plan(options);
        let mut results: Vec<CheckResult> = Vec::new();
        let mut critical = Vec::new();
        let mut dependent = Vec::new();
        for (tier, planned) in plan {
            match planned {
                Planned::Skipped(result) => results.push(result),
                Planned::Run(check) if tier == Tier::Critical => critical.push(check),
                Planned::Run(check) => dependent.push(check),
            }
        }

        let mut short_circuit = None;
        for (index, check) in critical.iter().enumerate() {
            let result = self.run_check(check, Tier::Critical, options, false);
            let failed = result.status == CheckStatus::Fail;
            results.push(result);
            if failed && !options.warn_only {
                let mut not_run: Vec<String> = critical[index + 1..]
                    .iter()
                    .map(|check| check.name.clone())
                    .collect();
                if !options.diagnose {
                    not_run.extend(dependent.iter().map(|check| check.name.clone()));
                }
                tracing::warn!(
                    check = %check.name,
                    not_run = not_run.len(),
                    "critical check failed; short-circuiting"
                );
                short_circuit = Some(ShortCircuit {
                    failed_check: check.name.clone(),
                    not_run,
                });
                break;
            }
        }

        let diagnostic = short_circuit.is_some();
        if !diagnostic || options.diagnose {
            results.extend(self.run_dependents(&dependent, options, diagnostic));
        }

        results.sort_by_key(|result| self.order_key(&result.name));
        let mut report = GuardrailReport::new(rfc3339_from_epoch_ms(started_ms), results);
        report.short_circuit = short_circuit;

        let cacheable = !diagnostic && report.verdict() != Verdict::Fail;
        if let (Some(binding), Some(key), true) = (cache, cache_key.as_ref(), cacheable) {
            let entry = CacheEntry::new(key, report.results.clone(), started_ms);
            if let Err(err) = binding.store.store(&entry) {
                tracing::warn!(error = %err, "failed to persist guardrail cache");
            }
        }
        Ok(report)
    }

    fn plan(&self, options: &RunOptions) -> Vec<(Tier, Planned<'_>)> {
        let mut plan: Vec<(Tier, Planned<'_>)> = self
            .catalog
            .iter()
            .map(|check| {
                let tier = self.effective_tier(check);
                let audit_pinned = self.environment.ci && check.name == AUDIT;
                let planned = if options.skip.contains(&check.name) {
                    Planned::Skipped(CheckResult::new(
                        &check.name,
                        CheckStatus::Skip,
                        format!("skipped by --skip-{}", check.name),
                    ))
                } else if options.quick && check.skip_in_quick && !audit_pinned {
                    Planned::Skipped(CheckResult::new(
                        &check.name,
                        CheckStatus::Skip,
                        "skipped in quick mode",
                    ))
                } else {
                    Planned::Run(check)
                };
                (tier, planned)
            })
            .collect();
        // Critical checks keep catalog order ahead of dependents.
        plan.sort_by_key(|(tier, _)| tier_rank(*tier));
        plan
    }

    /// Report position: effective tier first, then catalog order.
    fn order_key(&self, name: &str) -> (u8, usize) {
        self.catalog
            .iter()
            .position(|check| check.name == name)
            .map(|index| (tier_rank(self.effective_tier(&self.catalog[index])), index))
            .unwrap_or((u8::MAX, usize::MAX))
    }

    fn run_dependents(
        &self,
        checks: &[&GuardrailCheck],
        options: &RunOptions,
        diagnostic: bool,
    ) -> Vec<CheckResult> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = checks
                .iter()
                .map(|check| {
                    let handle = scope
                        .spawn(move || self.run_check(check, Tier::Dependent, options, diagnostic));
                    (check, handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(check, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        self.apply_policy(
                            CheckResult::new(
                                &check.name,
                                CheckStatus::Fail,
                                "check worker panicked",
                            ),
                            check,
                            options,
                            diagnostic,
                        )
                    })
                })
                .collect()
        })
    }

    fn run_check(
        &self,
        check: &GuardrailCheck,
        tier: Tier,
        options: &RunOptions,
        diagnostic: bool,
    ) -> CheckResult {
        let timeout = check.timeout_for(options.quick);
        let ctx = ExecutionContext {
            quick: options.quick,
            verbose: options.verbose,
            diagnostic,
            timeout,
            environment: self.environment,
        };
        let start = Instant::now();
        let execution = self.execute_with_deadline(check, ctx, timeout + self.deadline_grace);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let raw = match execution {
            Execution::Completed(result) => result,
            Execution::TimedOut { after, details } => CheckResult::new(
                &check.name,
                CheckStatus::Fail,
                format!("timed out after {}ms", after.as_millis()),
            )
            .with_details(details),
            Execution::Missing { target } => match tier {
                Tier::Critical => CheckResult::new(
                    &check.name,
                    CheckStatus::Fail,
                    format!("required tooling not found: {target}"),
                ),
                Tier::Dependent => CheckResult::new(
                    &check.name,
                    CheckStatus::Skip,
                    format!("{target} not found; check skipped"),
                ),
            },
        };
        let result = self
            .apply_policy(raw, check, options, diagnostic)
            .with_duration_ms(elapsed_ms);
        tracing::info!(
            check = %check.name,
            tier = tier.as_str(),
            status = result.status.as_str(),
            diagnostic,
            elapsed_ms,
            "check finished"
        );
        result
    }

    fn execute_with_deadline(
        &self,
        check: &GuardrailCheck,
        ctx: ExecutionContext,
        deadline: Duration,
    ) -> Execution {
        let (tx, rx) = mpsc::channel();
        let executor = Arc::clone(&self.executor);
        let owned = check.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("guardrail-{}", check.name))
            .spawn(move || {
                let _ = tx.send(executor.execute(&owned, &ctx));
            });
        if let Err(err) = spawned {
            return Execution::Completed(CheckResult::new(
                &check.name,
                CheckStatus::Fail,
                format!("could not start check worker: {err}"),
            ));
        }
        match rx.recv_timeout(deadline) {
            Ok(execution) => execution,
            Err(mpsc::RecvTimeoutError::Timeout) => Execution::TimedOut {
                after: deadline,
                details: vec!["check did not finish before its deadline".to_string()],
            },
            Err(mpsc::RecvTimeoutError::Disconnected) => Execution::Completed(CheckResult::new(
                &check.name,
                CheckStatus::Fail,
                "check worker exited without a result",
            )),
        }
    }

    fn apply_policy(
        &self,
        result: CheckResult,
        check: &GuardrailCheck,
        options: &RunOptions,
        diagnostic: bool,
    ) -> CheckResult {
        let mut result = result;
        if diagnostic {
            result.is_diagnostic = true;
            if result.status == CheckStatus::Fail {
                result.status = CheckStatus::Warn;
            }
            return result;
        }
        if options.warn_only && !check.hard && result.status == CheckStatus::Fail {
            result.status = CheckStatus::Warn;
            result
                .details
                .push("downgraded from fail by --warn-only".to_string());
        }
        result
    }
}

fn tier_rank(tier: Tier) -> u8 {
    match tier {
        Tier::Critical => 0,
        Tier::Dependent => 1,
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
