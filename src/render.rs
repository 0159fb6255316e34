//! Human-readable rendering of guardrail reports.
use crate::report::{CheckResult, CheckStatus, GuardrailReport, Verdict};
use colored::{ColoredString, Colorize};
use std::fmt::Write as _;

/// Detail lines shown per check unless `--verbose` is set.
pub const DETAIL_PREVIEW_LINES: usize = 8;

fn icon(status: CheckStatus) -> ColoredString {
    match status {
        CheckStatus::Pass => "✔".green(),
        CheckStatus::Warn => "⚠".yellow(),
        CheckStatus::Fail => "✖".red(),
        CheckStatus::Skip => "○".dimmed(),
    }
}

fn verdict_label(verdict: Verdict) -> ColoredString {
    match verdict {
        Verdict::Pass => "PASS".green().bold(),
        Verdict::Warn => "PASS WITH WARNINGS".yellow().bold(),
        Verdict::Fail => "FAIL".red().bold(),
    }
}

/// One check with its message, details, and sub-tasks.
pub fn render_check(result: &CheckResult, verbose: bool) -> String {
    let mut out = String::new();
    let mut header = format!("{} {}", icon(result.status), result.name.bold());
    if result.is_diagnostic {
        header.push_str(&format!(" {}", "[diagnostic]".magenta()));
    }
    if result.duration_ms > 0 {
        header.push_str(&format!(" {}", format!("({}ms)", result.duration_ms).dimmed()));
    }
    let _ = writeln!(out, "{header}");
    if !result.message.is_empty() {
        let _ = writeln!(out, "    {}", result.message);
    }
    for task in &result.sub_tasks {
        let _ = writeln!(out, "    {} {}: {}", icon(task.status), task.name, task.message);
    }
    let limit = if verbose {
        result.details.len()
    } else {
        DETAIL_PREVIEW_LINES
    };
    for line in result.details.iter().take(limit) {
        let _ = writeln!(out, "      {}", line.dimmed());
    }
    if result.details.len() > limit {
        let _ = writeln!(
            out,
            "      {}",
            format!("... {} more lines (use --verbose)", result.details.len() - limit).dimmed()
        );
    }
    out
}

pub fn render_report(report: &GuardrailReport, verbose: bool) -> String {
    let mut out = String::new();
    let mut title = "Release guardrails".bold().to_string();
    if report.from_cache {
        title.push_str(&format!(
            " {}",
            format!("(cached result from {})", report.timestamp).cyan()
        ));
    }
    let _ = writeln!(out, "{title}");
    if let Some(git) = &report.git_info {
        let _ = writeln!(
            out,
            "{}",
            format!("{} against {} ({})", git.branch, git.base_branch, git.commit_range).dimmed()
        );
    }
    let _ = writeln!(out);
    for result in &report.results {
        out.push_str(&render_check(result, verbose));
    }
    if let Some(short) = &report.short_circuit {
        let _ = writeln!(out);
        let not_run = if short.not_run.is_empty() {
            "nothing".to_string()
        } else {
            short.not_run.join(", ")
        };
        let _ = writeln!(
            out,
            "{} critical check {} failed; not run: {}",
            "Stopped:".red().bold(),
            short.failed_check,
            not_run
        );
    }

    let summary = &report.summary;
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} passed, {} warned, {} failed, {} skipped in {}ms",
        summary.passed.to_string().green(),
        summary.warned.to_string().yellow(),
        summary.failed.to_string().red(),
        summary.skipped,
        summary.total_duration
    );
    if let Some(score) = report.package_quality_score {
        let _ = writeln!(out, "Package quality score: {score}/100");
    }
    let _ = writeln!(out, "Verdict: {}", verdict_label(report.verdict()));
    out
}
