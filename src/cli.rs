//! CLI argument parsing for the guardrail runner.
//!
//! The CLI stays thin: it converts flags into `RunOptions` and leaves every
//! policy decision to the orchestrator.
use crate::catalog::{AUDIT, CHANGESETS, EXPORTS, GOVERNANCE, LINT};
use crate::orchestrator::RunOptions;
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "guardrails",
    version,
    about = "Release-gating guardrails for package monorepos",
    after_help = "Examples:\n  guardrails run\n  guardrails run --quick --warn-only\n  guardrails run --json --no-cache\n  guardrails update-baseline\n  guardrails changesets\n  guardrails cache clear",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Run(RunArgs),
    UpdateBaseline(BaselineArgs),
    Changesets(ChangesetsArgs),
    /// Manage the result cache
    #[command(subcommand)]
    Cache(CacheCommand),
}

/// Options shared by every command that touches a workspace.
#[derive(Args, Debug, Clone)]
pub struct WorkspaceArgs {
    /// Workspace root containing the lockfile and package manifests
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub root: PathBuf,

    /// Explicit config file (defaults to guardrails.toml under the root)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Run the guardrail catalog and write a report")]
pub struct RunArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,

    /// Shorter timeouts; expensive checks are skipped outside CI
    #[arg(long)]
    pub quick: bool,

    /// Show full check output and debug logs
    #[arg(long)]
    pub verbose: bool,

    /// Downgrade failures of non-hard checks to warnings
    #[arg(long)]
    pub warn_only: bool,

    /// Print the report as JSON instead of the human summary
    #[arg(long)]
    pub json: bool,

    /// Run fix commands for failed or warned checks after the report
    #[arg(long)]
    pub fix: bool,

    /// Ignore the result cache for this run
    #[arg(long)]
    pub no_cache: bool,

    /// Run dependent checks diagnostically after a critical failure
    #[arg(long)]
    pub diagnose: bool,

    /// Write the report here instead of the configured location
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Skip change-descriptor validation
    #[arg(long)]
    pub skip_changesets: bool,

    /// Skip the security audit (rejected in CI)
    #[arg(long)]
    pub skip_audit: bool,

    /// Skip package governance rules
    #[arg(long)]
    pub skip_governance: bool,

    /// Skip export validation
    #[arg(long)]
    pub skip_exports: bool,

    /// Skip lint
    #[arg(long)]
    pub skip_lint: bool,

    /// Skip a check by name (repeatable)
    #[arg(long = "skip", value_name = "CHECK")]
    pub skip: Vec<String>,
}

impl RunArgs {
    pub fn run_options(&self) -> RunOptions {
        let mut skip: BTreeSet<String> =
            self.skip.iter().map(|name| name.trim().to_string()).collect();
        for (flag, name) in [
            (self.skip_changesets, CHANGESETS),
            (self.skip_audit, AUDIT),
            (self.skip_governance, GOVERNANCE),
            (self.skip_exports, EXPORTS),
            (self.skip_lint, LINT),
        ] {
            if flag {
                skip.insert(name.to_string());
            }
        }
        skip.remove("");
        RunOptions {
            quick: self.quick,
            verbose: self.verbose,
            warn_only: self.warn_only,
            no_cache: self.no_cache,
            diagnose: self.diagnose,
            skip,
        }
    }
}

#[derive(Parser, Debug)]
#[command(about = "Scan dependencies and accept the current counts as the audit baseline")]
pub struct BaselineArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,

    /// Emit debug logs
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Validate change descriptors without running the full catalog")]
pub struct ChangesetsArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,

    /// Emit debug logs
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Delete the cache file
    Clear(WorkspaceArgs),
}

impl Command {
    pub fn verbose(&self) -> bool {
        match self {
            Command::Run(args) => args.verbose,
            Command::UpdateBaseline(args) => args.verbose,
            Command::Changesets(args) => args.verbose,
            Command::Cache(_) => false,
        }
    }
}
