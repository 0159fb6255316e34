//! The static guardrail catalog.
//!
//! The catalog is built once at startup from the defaults below plus any
//! `[checks.<name>]` tables in `guardrails.toml`, and is immutable for the
//! rest of the run.
use crate::config::{CheckOverride, GuardrailsConfig};
use crate::invocation::{Builtin, CheckInvocation};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const CHANGESETS: &str = "changesets";
pub const GOVERNANCE: &str = "governance";
pub const AUDIT: &str = "audit";
pub const EXPORTS: &str = "exports";
pub const LINT: &str = "lint";

/// Checks whose failures can never be downgraded by warn-only.
pub const HARD_CHECKS: &[&str] = &[CHANGESETS, AUDIT];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Critical,
    Dependent,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Critical => "critical",
            Tier::Dependent => "dependent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardrailCheck {
    pub name: String,
    pub tier: Tier,
    pub invoke: CheckInvocation,
    pub timeout: Duration,
    pub quick_timeout: Duration,
    pub skip_in_quick: bool,
    /// Failures are never downgraded to warnings.
    pub hard: bool,
    pub fix: Option<CheckInvocation>,
}

impl GuardrailCheck {
    pub fn timeout_for(&self, quick: bool) -> Duration {
        if quick {
            self.quick_timeout
        } else {
            self.timeout
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self.invoke, CheckInvocation::Builtin(_))
    }
}

fn builtin(name: &str, tier: Tier, builtin: Builtin, timeout_secs: u64) -> GuardrailCheck {
    GuardrailCheck {
        name: name.to_string(),
        tier,
        invoke: CheckInvocation::Builtin(builtin),
        timeout: Duration::from_secs(timeout_secs),
        quick_timeout: Duration::from_secs(timeout_secs / 2),
        skip_in_quick: false,
        hard: HARD_CHECKS.contains(&name),
        fix: None,
    }
}

fn external(name: &str, command: &str, timeout_secs: u64) -> Result<GuardrailCheck> {
    Ok(GuardrailCheck {
        name: name.to_string(),
        tier: Tier::Dependent,
        invoke: CheckInvocation::from_command(command)?,
        timeout: Duration::from_secs(timeout_secs),
        quick_timeout: Duration::from_secs(timeout_secs / 3),
        skip_in_quick: false,
        hard: false,
        fix: None,
    })
}

/// The catalog every workspace starts from.
pub fn default_catalog() -> Result<Vec<GuardrailCheck>> {
    let mut audit = builtin(AUDIT, Tier::Dependent, Builtin::SecurityAudit, 600);
    audit.skip_in_quick = true;

    let mut exports = external(EXPORTS, "pnpm -r --no-bail exec publint", 300)?;
    exports.skip_in_quick = true;

    let mut lint = external(LINT, "pnpm run lint", 300)?;
    lint.fix = Some(CheckInvocation::from_command("pnpm run lint --fix")?);

    Ok(vec![
        builtin(CHANGESETS, Tier::Critical, Builtin::ChangeDescriptors, 120),
        builtin(GOVERNANCE, Tier::Critical, Builtin::Governance, 60),
        audit,
        exports,
        lint,
    ])
}

/// Apply `[checks.<name>]` overrides to the default catalog.
pub fn build_catalog(config: &GuardrailsConfig) -> Result<Vec<GuardrailCheck>> {
    let mut catalog = default_catalog()?;
    for (name, entry) in &config.checks {
        let position = catalog.iter().position(|check| &check.name == name);
        match position {
            Some(index) => {
                if entry.enabled == Some(false) {
                    catalog.remove(index);
                    continue;
                }
                apply_override(&mut catalog[index], entry)
                    .with_context(|| format!("checks.{name}"))?;
            }
            None => {
                if entry.enabled == Some(false) {
                    continue;
                }
                let command = entry
                    .command
                    .as_deref()
                    .ok_or_else(|| anyhow!("checks.{name}: new checks need a command"))?;
                let mut check = external(name, command, 300)?;
                apply_override(&mut check, entry).with_context(|| format!("checks.{name}"))?;
                catalog.push(check);
            }
        }
    }
    Ok(catalog)
}

fn apply_override(check: &mut GuardrailCheck, entry: &CheckOverride) -> Result<()> {
    if let Some(tier) = entry.tier {
        if check.hard && tier != check.tier {
            return Err(anyhow!("the tier of {} cannot be changed", check.name));
        }
        check.tier = tier;
    }
    if let Some(command) = &entry.command {
        if check.is_builtin() {
            return Err(anyhow!("{} is built in and has no command", check.name));
        }
        check.invoke = CheckInvocation::from_command(command)?;
    }
    if let Some(ms) = entry.timeout_ms {
        check.timeout = Duration::from_millis(ms);
        if entry.quick_timeout_ms.is_none() {
            check.quick_timeout = check.quick_timeout.min(check.timeout);
        }
    }
    if let Some(ms) = entry.quick_timeout_ms {
        check.quick_timeout = Duration::from_millis(ms);
    }
    if let Some(skip) = entry.skip_in_quick {
        check.skip_in_quick = skip;
    }
    if let Some(fix) = &entry.fix {
        check.fix = Some(CheckInvocation::from_command(fix)?);
    }
    Ok(())
}
