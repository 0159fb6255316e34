//! Typed readers for vulnerability scanner output.
//!
//! Each supported tool gets a `ToolResultParser`; nothing outside this module
//! looks at raw scanner text.
use super::VulnerabilityCounts;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("scanner produced no output")]
    Empty,
    #[error("scanner output is not JSON: {0}")]
    NotJson(String),
    #[error("scanner output has an unexpected shape: {0}")]
    UnexpectedShape(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorKind {
    /// Worth retrying: network blips, registry 5xx, timeouts.
    Transient,
    /// The tool's backend is gone for good; use another scanner.
    Deprecated,
    Hard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolReport {
    Counts(VulnerabilityCounts),
    ToolError { kind: ToolErrorKind, message: String },
}

pub trait ToolResultParser: Send + Sync {
    fn tool(&self) -> &'static str;
    fn parse(&self, stdout: &str, stderr: &str) -> Result<ToolReport, ParseError>;
}

const DEPRECATION_MARKERS: &[&str] = &[" 410", "410 ", "gone", "deprecated", "retired"];
const TRANSIENT_MARKERS: &[&str] = &[
    "econnreset",
    "etimedout",
    "enotfound",
    "eai_again",
    "econnrefused",
    "socket hang up",
    "timed out",
    "timeout",
    " 500",
    " 502",
    " 503",
    " 504",
];

/// Classify a tool's error text.
pub fn classify_error(text: &str) -> ToolErrorKind {
    let lower = text.to_ascii_lowercase();
    if DEPRECATION_MARKERS.iter().any(|marker| lower.contains(marker)) {
        ToolErrorKind::Deprecated
    } else if TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker)) {
        ToolErrorKind::Transient
    } else {
        ToolErrorKind::Hard
    }
}

/// Pick the parser for a scanner program by its file name.
pub fn parser_for(program: &str) -> Box<dyn ToolResultParser> {
    let name = std::path::Path::new(program)
        .file_name()
        .map(|name| name.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if name.starts_with("osv") {
        Box::new(OsvScannerParser)
    } else {
        Box::new(PackageManagerAuditParser)
    }
}

/// Parse `stdout` as JSON, or explain why the run produced none.
fn json_or_tool_error(
    stdout: &str,
    stderr: &str,
) -> Result<Result<Value, ToolReport>, ParseError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        let stderr = stderr.trim();
        if stderr.is_empty() {
            return Err(ParseError::Empty);
        }
        return Ok(Err(ToolReport::ToolError {
            kind: classify_error(stderr),
            message: first_line(stderr),
        }));
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => Ok(Ok(value)),
        Err(err) => {
            // A broken report still carries advisory prose ("timeout",
            // "deprecated"); only stderr is searched for error markers then.
            let looks_like_report = trimmed.starts_with('{') || trimmed.starts_with('[');
            let text = if looks_like_report {
                stderr.trim().to_string()
            } else {
                format!("{stderr}\n{stdout}")
            };
            match classify_error(&text) {
                ToolErrorKind::Hard => Err(ParseError::NotJson(err.to_string())),
                kind => Ok(Err(ToolReport::ToolError {
                    kind,
                    message: first_line(text.trim()),
                })),
            }
        }
    }
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().trim().to_string()
}

/// `pnpm audit --json` (and the npm/yarn audit report shape it shares).
#[derive(Debug, Default, Clone, Copy)]
pub struct PackageManagerAuditParser;

impl ToolResultParser for PackageManagerAuditParser {
    fn tool(&self) -> &'static str {
        "package-manager audit"
    }

    fn parse(&self, stdout: &str, stderr: &str) -> Result<ToolReport, ParseError> {
        let value = match json_or_tool_error(stdout, stderr)? {
            Ok(value) => value,
            Err(report) => return Ok(report),
        };
        if let Some(error) = value.get("error") {
            let code = error.get("code").and_then(Value::as_str).unwrap_or_default();
            let message = error
                .get("message")
                .or_else(|| error.get("summary"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let text = format!("{code}: {message}");
            return Ok(ToolReport::ToolError {
                kind: classify_error(&text),
                message: text,
            });
        }
        let vulnerabilities = value
            .pointer("/metadata/vulnerabilities")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                ParseError::UnexpectedShape("missing metadata.vulnerabilities".to_string())
            })?;
        let count = |key: &str| {
            vulnerabilities
                .get(key)
                .and_then(Value::as_u64)
                .unwrap_or(0)
        };
        Ok(ToolReport::Counts(VulnerabilityCounts {
            critical: count("critical"),
            high: count("high"),
            moderate: count("moderate"),
            low: count("low"),
            info: count("info"),
        }))
    }
}

/// `osv-scanner --format json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsvScannerParser;

impl ToolResultParser for OsvScannerParser {
    fn tool(&self) -> &'static str {
        "osv-scanner"
    }

    fn parse(&self, stdout: &str, stderr: &str) -> Result<ToolReport, ParseError> {
        let value = match json_or_tool_error(stdout, stderr)? {
            Ok(value) => value,
            Err(report) => return Ok(report),
        };
        let results = value
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| ParseError::UnexpectedShape("missing results array".to_string()))?;
        let mut counts = VulnerabilityCounts::default();
        for package in results
            .iter()
            .filter_map(|result| result.get("packages").and_then(Value::as_array))
            .flatten()
        {
            let vulnerabilities: Vec<&Value> = package
                .get("vulnerabilities")
                .and_then(Value::as_array)
                .map(|list| list.iter().collect())
                .unwrap_or_default();
            match package.get("groups").and_then(Value::as_array) {
                // A group is one finding reported under several aliases.
                Some(groups) if !groups.is_empty() => {
                    for group in groups {
                        counts.record(group_severity(group, &vulnerabilities));
                    }
                }
                _ => {
                    for vulnerability in &vulnerabilities {
                        counts.record(label_severity(vulnerability));
                    }
                }
            }
        }
        Ok(ToolReport::Counts(counts))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Critical,
    High,
    Moderate,
    Low,
    Info,
}

impl VulnerabilityCounts {
    fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Moderate => self.moderate += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
    }
}

/// CVSS base score bands.
pub fn severity_from_score(score: f64) -> Severity {
    if score >= 9.0 {
        Severity::Critical
    } else if score >= 7.0 {
        Severity::High
    } else if score >= 4.0 {
        Severity::Moderate
    } else if score > 0.0 {
        Severity::Low
    } else {
        Severity::Info
    }
}

fn group_severity(group: &Value, vulnerabilities: &[&Value]) -> Severity {
    let score = group.get("max_severity").and_then(|value| match value {
        Value::String(text) => text.trim().parse::<f64>().ok(),
        Value::Number(number) => number.as_f64(),
        _ => None,
    });
    if let Some(score) = score {
        return severity_from_score(score);
    }
    let ids: Vec<&str> = group
        .get("ids")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    vulnerabilities
        .iter()
        .filter(|vulnerability| {
            vulnerability
                .get("id")
                .and_then(Value::as_str)
                .is_some_and(|id| ids.contains(&id))
        })
        .map(|vulnerability| label_severity(vulnerability))
        .min_by_key(|severity| *severity as u8)
        .unwrap_or(Severity::Info)
}

fn label_severity(vulnerability: &Value) -> Severity {
    let label = vulnerability
        .pointer("/database_specific/severity")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase();
    match label.as_str() {
        "critical" => Severity::Critical,
        "high" => Severity::High,
        "moderate" | "medium" => Severity::Moderate,
        "low" => Severity::Low,
        _ => Severity::Info,
    }
}
