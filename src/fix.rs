//! Best-effort fix commands run after a report is produced.
//!
//! Fix outcomes are reported to the operator but never change the report or
//! the verdict; the next run observes whatever the fix changed.
use crate::catalog::GuardrailCheck;
use crate::invocation::{resolve_program, run_process, Capture, CheckInvocation, ProcessSpec};
use crate::report::{CheckStatus, GuardrailReport};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixStatus {
    Applied,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixOutcome {
    pub check: String,
    pub command: String,
    pub status: FixStatus,
}

/// Checks that failed or warned (outside diagnostics) and declare a fix.
pub fn fixable<'a>(
    catalog: &'a [GuardrailCheck],
    report: &GuardrailReport,
) -> Vec<&'a GuardrailCheck> {
    catalog
        .iter()
        .filter(|check| check.fix.is_some())
        .filter(|check| {
            report.results.iter().any(|result| {
                result.name == check.name
                    && !result.is_diagnostic
                    && matches!(result.status, CheckStatus::Fail | CheckStatus::Warn)
            })
        })
        .collect()
}

pub fn run_fixes(
    catalog: &[GuardrailCheck],
    report: &GuardrailReport,
    root: &Path,
) -> Vec<FixOutcome> {
    fixable(catalog, report)
        .into_iter()
        .filter_map(|check| {
            let fix = check.fix.as_ref()?;
            Some(FixOutcome {
                check: check.name.clone(),
                command: fix.describe(),
                status: apply_fix(fix, root, check.timeout),
            })
        })
        .collect()
}

fn apply_fix(fix: &CheckInvocation, root: &Path, timeout: Duration) -> FixStatus {
    let CheckInvocation::Program { program, args } = fix else {
        return FixStatus::Failed("built-in checks have no fix command".to_string());
    };
    let Some(resolved) = resolve_program(program, root) else {
        return FixStatus::Failed(format!("{program} not found"));
    };
    let spec = ProcessSpec {
        program: resolved,
        args: args.clone(),
        cwd: root.to_path_buf(),
        timeout,
        capture: Capture::Bounded,
    };
    match run_process(&spec) {
        Ok(output) if output.success() => FixStatus::Applied,
        Ok(output) => {
            tracing::warn!(
                command = %fix.describe(),
                status = %output.status_label(),
                "fix command failed"
            );
            FixStatus::Failed(output.status_label())
        }
        Err(err) => FixStatus::Failed(format!("{err:#}")),
    }
}
