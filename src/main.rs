//! Release-gating guardrails for package monorepos.
//!
//! `guardrails run` executes a catalog of checks in two tiers, writes a JSON
//! report, and exits non-zero when the release should be blocked.
mod audit;
mod cache;
mod catalog;
mod checks;
mod cli;
mod config;
mod descriptors;
mod environment;
mod fix;
mod hashing;
mod invocation;
mod orchestrator;
mod render;
mod report;
mod util;
mod workflow;
mod workspace;

use clap::Parser;
use colored::Colorize;
use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() {
    let args = cli::RootArgs::parse();
    init_logging(args.command.verbose());
    if !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    let outcome = match args.command {
        cli::Command::Run(args) => workflow::run_guardrails(args),
        cli::Command::UpdateBaseline(args) => workflow::run_update_baseline(args),
        cli::Command::Changesets(args) => workflow::run_changesets(args),
        cli::Command::Cache(cli::CacheCommand::Clear(args)) => workflow::run_cache_clear(args),
    };
    let code = match outcome {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            1
        }
    };
    std::process::exit(code);
}
