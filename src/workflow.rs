//! Command implementations behind the CLI.
//!
//! Each command returns the process exit code; errors that escape are
//! reported by `main` and also exit with 1.
use crate::audit::baseline::{save_baseline, VulnerabilityBaseline};
use crate::audit::scanner::Scanner;
use crate::cache::{FileCache, ResultCache};
use crate::catalog::build_catalog;
use crate::checks::CatalogExecutor;
use crate::cli::{BaselineArgs, ChangesetsArgs, RunArgs, WorkspaceArgs};
use crate::config::{load_config, GuardrailsConfig, WorkspacePaths};
use crate::descriptors::git::{GitCli, GitHistory};
use crate::environment::Environment;
use crate::fix::{run_fixes, FixStatus};
use crate::hashing::compute_content_hashes;
use crate::orchestrator::{CacheBinding, Orchestrator};
use crate::render::{render_check, render_report};
use crate::report::{CheckStatus, GitInfo, GuardrailReport};
use crate::util::{display_path, now_rfc3339};
use anyhow::{Context, Result};
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;

/// Resolved workspace root, configuration, and state locations.
struct Workspace {
    paths: WorkspacePaths,
    config: GuardrailsConfig,
}

impl Workspace {
    fn load(args: &WorkspaceArgs) -> Result<Self> {
        let root = args
            .root
            .canonicalize()
            .with_context(|| format!("workspace root {}", args.root.display()))?;
        let config = load_config(&root, args.config.as_deref())?;
        let paths = WorkspacePaths::new(root, &config.paths);
        Ok(Self { paths, config })
    }

    fn executor(&self) -> CatalogExecutor {
        CatalogExecutor::new(self.paths.clone(), self.config.clone())
    }

    fn display(&self, path: &std::path::Path) -> String {
        display_path(path, Some(self.paths.root()))
    }
}

pub fn run_guardrails(args: RunArgs) -> Result<i32> {
    let workspace = Workspace::load(&args.workspace)?;
    let catalog = build_catalog(&workspace.config)?;
    let environment = Environment::detect();
    let options = args.run_options();
    tracing::debug!(ci = environment.ci, checks = catalog.len(), "starting guardrail run");

    let mut orchestrator = Orchestrator::new(
        catalog.clone(),
        Arc::new(workspace.executor()),
        environment,
    );
    if !options.no_cache && !environment.ci {
        match compute_content_hashes(workspace.paths.root(), &workspace.paths.lockfile()) {
            Ok(hashes) => {
                orchestrator = orchestrator.with_cache(CacheBinding {
                    store: Arc::new(FileCache::new(workspace.paths.cache_file())),
                    hashes,
                    ttl: Duration::from_secs(workspace.config.cache.ttl_secs),
                });
            }
            Err(err) => tracing::warn!(
                error = %format!("{err:#}"),
                "cannot hash workspace; running without cache"
            ),
        }
    }

    let mut report = match orchestrator.run(&options) {
        Ok(report) => report,
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            return Ok(1);
        }
    };
    report.git_info = git_info(&workspace);

    let report_path = args
        .report
        .clone()
        .unwrap_or_else(|| workspace.paths.report_file());
    report
        .write(&report_path)
        .with_context(|| format!("write report {}", report_path.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report, args.verbose));
        println!("Report written to {}", workspace.display(&report_path));
    }

    if args.fix {
        print_fixes(&workspace, &catalog, &report, args.json);
    }
    Ok(report.verdict().exit_code())
}

fn print_fixes(
    workspace: &Workspace,
    catalog: &[crate::catalog::GuardrailCheck],
    report: &GuardrailReport,
    json: bool,
) {
    let outcomes = run_fixes(catalog, report, workspace.paths.root());
    for outcome in outcomes {
        let line = match &outcome.status {
            FixStatus::Applied => format!(
                "{} {}: {}",
                "fixed".green(),
                outcome.check,
                outcome.command
            ),
            FixStatus::Failed(reason) => format!(
                "{} {}: {} ({reason})",
                "fix failed".red(),
                outcome.check,
                outcome.command
            ),
        };
        tracing::info!(
            check = %outcome.check,
            command = %outcome.command,
            status = ?outcome.status,
            "fix attempted"
        );
        // JSON output owns stdout.
        if json {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
    }
}

/// Branch and commit range of the current run; `None` outside a usable
/// git checkout.
fn git_info(workspace: &Workspace) -> Option<GitInfo> {
    let history = GitCli::locate(workspace.paths.root(), &workspace.config.git.remote).ok()?;
    let base_branch = workspace.config.git.effective_base_branch();
    let lookup = || -> Result<GitInfo> {
        let merge_base = history.merge_base(&base_branch)?;
        Ok(GitInfo {
            branch: history.current_branch()?,
            commit_range: format!(
                "{}..{}",
                history.short_sha(&merge_base)?,
                history.short_sha("HEAD")?
            ),
            base_branch: base_branch.clone(),
        })
    };
    match lookup() {
        Ok(info) => Some(info),
        Err(err) => {
            tracing::debug!(error = %format!("{err:#}"), "git info unavailable");
            None
        }
    }
}

pub fn run_update_baseline(args: BaselineArgs) -> Result<i32> {
    let workspace = Workspace::load(&args.workspace)?;
    let executor = workspace.executor();
    let (primary, secondary) = executor.scanners()?;
    let audit = executor.security_audit_with(
        &primary,
        secondary.as_ref().map(|scanner| scanner as &dyn Scanner),
        None,
    )?;
    let (counts, scanner) = audit.current_counts()?;
    let baseline = VulnerabilityBaseline {
        timestamp: now_rfc3339(),
        counts,
        scanner: Some(scanner.clone()),
    };
    let path = workspace.paths.baseline_file();
    save_baseline(&path, &baseline)?;
    tracing::info!(scanner = %scanner, total = counts.total(), "recorded audit baseline");
    println!(
        "Recorded baseline from {scanner}: {} ({})",
        counts.describe(),
        workspace.display(&path)
    );
    Ok(0)
}

pub fn run_changesets(args: ChangesetsArgs) -> Result<i32> {
    let workspace = Workspace::load(&args.workspace)?;
    let result = workspace.executor().change_descriptors();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render_check(&result, args.verbose));
    }
    Ok(i32::from(result.status == CheckStatus::Fail))
}

pub fn run_cache_clear(args: WorkspaceArgs) -> Result<i32> {
    let workspace = Workspace::load(&args)?;
    let cache = FileCache::new(workspace.paths.cache_file());
    let existed = cache.path().exists();
    cache.clear()?;
    if existed {
        println!("Removed {}", workspace.display(cache.path()));
    } else {
        println!("No cache at {}", workspace.display(cache.path()));
    }
    Ok(0)
}
