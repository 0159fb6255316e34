use super::parser::{parser_for, ToolErrorKind, ToolReport, ToolResultParser};
use super::VulnerabilityCounts;
use crate::invocation::{resolve_program, run_process, Capture, CheckInvocation, ProcessSpec};
use crate::util::truncate_string;
use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Tool error messages end up in sub-task lines; registries can return whole
/// HTML pages.
const MAX_TOOL_MESSAGE_BYTES: usize = 300;

/// What one scanner attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Counts(VulnerabilityCounts),
    Transient(String),
    Deprecated(String),
    /// The tool ran and reported an error that retrying will not fix.
    Hard(String),
    /// The tool is missing or its output could not be understood.
    Unavailable(String),
}

pub trait Scanner: Send + Sync {
    fn name(&self) -> &str;
    /// Run one scan. `limit` caps this attempt below the scanner's own
    /// timeout when the audit is running out of time.
    fn scan(&self, limit: Option<Duration>) -> ScanOutcome;
}

/// A scanner run as a subprocess and read through a `ToolResultParser`.
pub struct ProcessScanner {
    name: String,
    program: String,
    args: Vec<String>,
    root: PathBuf,
    timeout: Duration,
    parser: Box<dyn ToolResultParser>,
}

impl ProcessScanner {
    pub fn from_command(command: &str, root: PathBuf, timeout: Duration) -> Result<Self> {
        let CheckInvocation::Program { program, args } = CheckInvocation::from_command(command)?
        else {
            return Err(anyhow!("scanner command must name a program"));
        };
        let name = std::path::Path::new(&program)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.clone());
        Ok(Self {
            parser: parser_for(&program),
            name,
            program,
            args,
            root,
            timeout,
        })
    }
}

impl Scanner for ProcessScanner {
    fn name(&self) -> &str {
        &self.name
    }

    fn scan(&self, limit: Option<Duration>) -> ScanOutcome {
        let Some(program) = resolve_program(&self.program, &self.root) else {
            return ScanOutcome::Unavailable(format!("{} is not installed", self.program));
        };
        let timeout = limit.map_or(self.timeout, |limit| limit.min(self.timeout));
        let output = match run_process(&ProcessSpec {
            program,
            args: self.args.clone(),
            cwd: self.root.clone(),
            timeout,
            capture: Capture::Full,
        }) {
            Ok(output) => output,
            Err(err) => return ScanOutcome::Unavailable(format!("{err:#}")),
        };
        if output.timed_out {
            return ScanOutcome::Transient(format!(
                "{} timed out after {}ms",
                self.name,
                timeout.as_millis()
            ));
        }
        // Audit tools exit non-zero when they find vulnerabilities, so the
        // exit code says nothing on its own.
        match self.parser.parse(&output.stdout, &output.stderr) {
            Ok(ToolReport::Counts(counts)) => ScanOutcome::Counts(counts),
            Ok(ToolReport::ToolError { kind, message }) => {
                let message = truncate_string(message.trim(), MAX_TOOL_MESSAGE_BYTES);
                match kind {
                    ToolErrorKind::Transient => ScanOutcome::Transient(message),
                    ToolErrorKind::Deprecated => ScanOutcome::Deprecated(message),
                    ToolErrorKind::Hard => ScanOutcome::Hard(message),
                }
            }
            Err(err) => ScanOutcome::Unavailable(format!(
                "{} ({}, {})",
                err,
                self.parser.tool(),
                output.status_label()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_scanner_is_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let scanner = ProcessScanner::from_command(
            "definitely-not-a-scanner-xyz --json",
            dir.path().to_path_buf(),
            Duration::from_secs(5),
        )
        .expect("scanner");
        assert_eq!(scanner.name(), "definitely-not-a-scanner-xyz");
        assert!(matches!(scanner.scan(None), ScanOutcome::Unavailable(_)));
    }

    #[cfg(unix)]
    fn write_script(dir: &std::path::Path, name: &str, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        let script = dir.join(name);
        std::fs::write(&script, body).expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    }

    #[cfg(unix)]
    #[test]
    fn script_output_is_parsed() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(
            dir.path(),
            "fake-audit.sh",
            "#!/bin/sh\necho '{\"metadata\":{\"vulnerabilities\":{\"critical\":1,\"high\":0,\"moderate\":2,\"low\":0,\"info\":0}}}'\nexit 1\n",
        );
        let scanner = ProcessScanner::from_command(
            "./fake-audit.sh",
            dir.path().to_path_buf(),
            Duration::from_secs(10),
        )
        .expect("scanner");
        assert_eq!(
            scanner.scan(None),
            ScanOutcome::Counts(VulnerabilityCounts {
                critical: 1,
                moderate: 2,
                ..VulnerabilityCounts::default()
            })
        );
    }

    #[cfg(unix)]
    #[test]
    fn large_reports_are_read_whole() {
        if which::which("cat").is_err() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let overview = format!(
            "Requests may hit a timeout; the deprecated API returns 500 errors. {}",
            "x".repeat(40 * 1024)
        );
        let report = serde_json::json!({
            "advisories": {
                "1001": {"severity": "critical", "overview": overview},
                "1002": {"severity": "critical", "overview": "gone"}
            },
            "metadata": {
                "vulnerabilities": {"critical": 2, "high": 0, "moderate": 0, "low": 0, "info": 0}
            }
        })
        .to_string();
        assert!(report.len() > 40 * 1024);
        std::fs::write(dir.path().join("report.json"), report).expect("write report");
        write_script(dir.path(), "fake-audit.sh", "#!/bin/sh\ncat report.json\nexit 1\n");
        let scanner = ProcessScanner::from_command(
            "./fake-audit.sh",
            dir.path().to_path_buf(),
            Duration::from_secs(10),
        )
        .expect("scanner");
        assert_eq!(
            scanner.scan(None),
            ScanOutcome::Counts(VulnerabilityCounts {
                critical: 2,
                ..VulnerabilityCounts::default()
            })
        );
    }

    #[cfg(unix)]
    #[test]
    fn limit_shortens_the_attempt() {
        if which::which("sleep").is_err() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(dir.path(), "slow.sh", "#!/bin/sh\nsleep 30\n");
        let scanner = ProcessScanner::from_command(
            "./slow.sh",
            dir.path().to_path_buf(),
            Duration::from_secs(60),
        )
        .expect("scanner");
        let start = std::time::Instant::now();
        let outcome = scanner.scan(Some(Duration::from_millis(200)));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(
            outcome,
            ScanOutcome::Transient("slow.sh timed out after 200ms".to_string())
        );
    }
}
