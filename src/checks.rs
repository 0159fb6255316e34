//! Executes catalog entries: builtins in-process, everything else as a
//! timeout-bounded subprocess.
pub mod governance;

use crate::audit::baseline::load_baseline;
use crate::audit::scanner::{ProcessScanner, Scanner};
use crate::audit::SecurityAudit;
use crate::catalog::GuardrailCheck;
use crate::config::{GuardrailsConfig, WorkspacePaths};
use crate::descriptors::git::{GitCli, GitHistory};
use crate::descriptors::validate::DescriptorValidation;
use crate::invocation::{
    resolve_program, run_process, Builtin, Capture, CheckInvocation, ProcessSpec,
};
use crate::orchestrator::{CheckExecutor, Execution, ExecutionContext};
use crate::report::{CheckResult, CheckStatus};
use anyhow::{Context, Result};
use chrono::Utc;
use std::time::Duration;

/// Slack kept between the scanner chain and the audit check's deadline.
const AUDIT_DEADLINE_MARGIN: Duration = Duration::from_secs(2);

/// The production `CheckExecutor`.
pub struct CatalogExecutor {
    paths: WorkspacePaths,
    config: GuardrailsConfig,
}

impl CatalogExecutor {
    pub fn new(paths: WorkspacePaths, config: GuardrailsConfig) -> Self {
        Self { paths, config }
    }

    fn run_builtin(
        &self,
        check: &GuardrailCheck,
        builtin: Builtin,
        ctx: &ExecutionContext,
    ) -> Execution {
        let outcome = match builtin {
            Builtin::ChangeDescriptors => Ok(self.change_descriptors()),
            Builtin::SecurityAudit => self.security_audit(ctx.timeout),
            Builtin::Governance => governance::check_governance(self.paths.root()),
        };
        Execution::Completed(outcome.unwrap_or_else(|err| {
            CheckResult::new(&check.name, CheckStatus::Fail, format!("{err:#}"))
        }))
    }

    /// Change-descriptor validation; usable outside a full run.
    pub fn change_descriptors(&self) -> CheckResult {
        let base_branch = self.config.git.effective_base_branch();
        let history = match GitCli::locate(self.paths.root(), &self.config.git.remote) {
            Ok(history) => history,
            Err(err) => {
                return CheckResult::new(
                    crate::catalog::CHANGESETS,
                    CheckStatus::Fail,
                    format!("cannot validate change descriptors: {err:#}"),
                )
            }
        };
        DescriptorValidation {
            paths: &self.paths,
            config: &self.config.changesets,
            base_branch: &base_branch,
            history: &history as &dyn GitHistory,
            now: Utc::now(),
        }
        .run()
    }

    /// The configured primary and secondary scanners, each attempt capped at
    /// `audit.scan_timeout_ms`.
    pub fn scanners(&self) -> Result<(ProcessScanner, Option<ProcessScanner>)> {
        let audit = &self.config.audit;
        let timeout = Duration::from_millis(audit.scan_timeout_ms);
        let root = self.paths.root().to_path_buf();
        let primary = ProcessScanner::from_command(&audit.primary, root.clone(), timeout)
            .context("audit.primary")?;
        let secondary = if audit.secondary.trim().is_empty() {
            None
        } else {
            Some(
                ProcessScanner::from_command(&audit.secondary, root, timeout)
                    .context("audit.secondary")?,
            )
        };
        Ok((primary, secondary))
    }

    pub fn security_audit_with<'a>(
        &self,
        primary: &'a dyn Scanner,
        secondary: Option<&'a dyn Scanner>,
        budget: Option<Duration>,
    ) -> Result<SecurityAudit<'a>> {
        let audit = &self.config.audit;
        Ok(SecurityAudit {
            primary,
            secondary,
            baseline: load_baseline(&self.paths.baseline_file())?,
            thresholds: audit.thresholds.clone(),
            retry_backoff: audit
                .retry_backoff_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            corroborate: audit.corroborate,
            budget,
        })
    }

    /// The scanner chain must finish before the orchestrator gives up on
    /// the check, so it runs on `timeout` minus a margin.
    fn security_audit(&self, timeout: Duration) -> Result<CheckResult> {
        let (primary, secondary) = self.scanners()?;
        let budget = timeout.saturating_sub(AUDIT_DEADLINE_MARGIN.min(timeout / 10));
        let audit = self.security_audit_with(
            &primary,
            secondary.as_ref().map(|scanner| scanner as &dyn Scanner),
            Some(budget),
        )?;
        Ok(audit.run())
    }

    fn run_program(
        &self,
        check: &GuardrailCheck,
        program: &str,
        args: &[String],
        ctx: &ExecutionContext,
    ) -> Execution {
        let Some(resolved) = resolve_program(program, self.paths.root()) else {
            return Execution::Missing {
                target: program.to_string(),
            };
        };
        let spec = ProcessSpec {
            program: resolved,
            args: args.to_vec(),
            cwd: self.paths.root().to_path_buf(),
            timeout: ctx.timeout,
            capture: Capture::Bounded,
        };
        let output = match run_process(&spec) {
            Ok(output) => output,
            Err(err) => {
                return Execution::Completed(CheckResult::new(
                    &check.name,
                    CheckStatus::Fail,
                    format!("{err:#}"),
                ))
            }
        };
        if output.timed_out {
            return Execution::TimedOut {
                after: ctx.timeout,
                details: output.detail_lines(),
            };
        }
        let command = check.invoke.describe();
        let result = if output.success() {
            CheckResult::new(&check.name, CheckStatus::Pass, format!("{command} passed"))
        } else {
            CheckResult::new(
                &check.name,
                CheckStatus::Fail,
                format!("{command} failed ({})", output.status_label()),
            )
        };
        let details = if output.success() && !ctx.verbose {
            Vec::new()
        } else {
            output.detail_lines()
        };
        Execution::Completed(result.with_details(details))
    }
}

impl CheckExecutor for CatalogExecutor {
    fn execute(&self, check: &GuardrailCheck, ctx: &ExecutionContext) -> Execution {
        tracing::debug!(
            check = %check.name,
            invoke = %check.invoke.describe(),
            timeout_ms = ctx.timeout.as_millis() as u64,
            diagnostic = ctx.diagnostic,
            quick = ctx.quick,
            ci = ctx.environment.ci,
            "starting check"
        );
        match &check.invoke {
            CheckInvocation::Builtin(builtin) => self.run_builtin(check, *builtin, ctx),
            CheckInvocation::Program { program, args } => {
                self.run_program(check, program, args, ctx)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Tier;
    use crate::config::PathsConfig;
    use crate::environment::Environment;

    fn executor(root: &std::path::Path) -> CatalogExecutor {
        CatalogExecutor::new(
            WorkspacePaths::new(root.to_path_buf(), &PathsConfig::default()),
            GuardrailsConfig::default(),
        )
    }

    fn program_check(command: &str) -> GuardrailCheck {
        GuardrailCheck {
            name: "custom".to_string(),
            tier: Tier::Dependent,
            invoke: CheckInvocation::from_command(command).expect("command"),
            timeout: Duration::from_secs(10),
            quick_timeout: Duration::from_secs(5),
            skip_in_quick: false,
            hard: false,
            fix: None,
        }
    }

    fn ctx(timeout: Duration) -> ExecutionContext {
        ExecutionContext {
            quick: false,
            verbose: false,
            diagnostic: false,
            timeout,
            environment: Environment::local(),
        }
    }

    #[test]
    fn missing_programs_are_reported_as_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let execution = executor(dir.path()).execute(
            &program_check("scripts/check-exports.sh --strict"),
            &ctx(Duration::from_secs(5)),
        );
        assert!(matches!(
            execution,
            Execution::Missing { target } if target == "scripts/check-exports.sh"
        ));
    }

    #[cfg(unix)]
    #[test]
    fn exit_codes_map_to_pass_and_fail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (Ok(_), Ok(_)) = (which::which("true"), which::which("false")) else {
            return;
        };
        let executor = executor(dir.path());
        let Execution::Completed(pass) =
            executor.execute(&program_check("true"), &ctx(Duration::from_secs(5)))
        else {
            panic!("true should complete");
        };
        assert_eq!(pass.status, CheckStatus::Pass);
        let Execution::Completed(fail) =
            executor.execute(&program_check("false"), &ctx(Duration::from_secs(5)))
        else {
            panic!("false should complete");
        };
        assert_eq!(fail.status, CheckStatus::Fail);
        assert!(fail.message.contains("exit code 1"));
    }

    #[cfg(unix)]
    #[test]
    fn slow_programs_time_out() {
        if which::which("sleep").is_err() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let execution = executor(dir.path())
            .execute(&program_check("sleep 5"), &ctx(Duration::from_millis(100)));
        assert!(matches!(execution, Execution::TimedOut { .. }));
    }

    #[test]
    fn governance_runs_in_process() {
        let dir = tempfile::tempdir().expect("tempdir");
        let check = GuardrailCheck {
            invoke: CheckInvocation::Builtin(Builtin::Governance),
            ..program_check("unused")
        };
        let Execution::Completed(result) =
            executor(dir.path()).execute(&check, &ctx(Duration::from_secs(5)))
        else {
            panic!("builtin should complete");
        };
        assert_eq!(result.status, CheckStatus::Pass);
    }

    #[cfg(unix)]
    #[test]
    fn hung_scanners_fall_back_to_the_baseline_inside_the_check_timeout() {
        use crate::audit::baseline::{save_baseline, VulnerabilityBaseline};
        use crate::audit::VulnerabilityCounts;
        use std::os::unix::fs::PermissionsExt;

        if which::which("sleep").is_err() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("slow.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");

        let mut config = GuardrailsConfig::default();
        config.audit.primary = "./slow.sh".to_string();
        config.audit.secondary = "./slow.sh".to_string();
        config.audit.retry_backoff_ms = vec![100, 200, 300];
        let paths = WorkspacePaths::new(dir.path().to_path_buf(), &PathsConfig::default());
        save_baseline(
            &paths.baseline_file(),
            &VulnerabilityBaseline {
                timestamp: "2026-01-01T00:00:00.000Z".to_string(),
                counts: VulnerabilityCounts::default(),
                scanner: None,
            },
        )
        .expect("save baseline");
        let executor = CatalogExecutor::new(paths, config);
        let check = GuardrailCheck {
            name: crate::catalog::AUDIT.to_string(),
            invoke: CheckInvocation::Builtin(Builtin::SecurityAudit),
            ..program_check("unused")
        };

        let start = std::time::Instant::now();
        let Execution::Completed(result) = executor.execute(&check, &ctx(Duration::from_secs(1)))
        else {
            panic!("audit should complete");
        };
        assert!(
            start.elapsed() < Duration::from_millis(1500),
            "took {:?}",
            start.elapsed()
        );
        assert_eq!(result.status, CheckStatus::Pass, "{}", result.message);
        assert!(result.message.contains("carried forward"), "{}", result.message);
    }
}
