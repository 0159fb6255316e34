//! Change descriptors: the pending release notes under `.changeset/`.
//!
//! Each descriptor is a markdown file whose YAML frontmatter maps package
//! names to a bump type, followed by a free-text summary:
//!
//! ```text
//! ---
//! "@acme/widgets": minor
//! "@acme/core": patch
//! ---
//!
//! Add the compact widget layout.
//! ```
//!
//! Descriptors are read-only here; they are authored before a run starts.
pub mod coverage;
pub mod duplicates;
pub mod git;
pub mod validate;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

const FRONTMATTER_FENCE: &str = "---";
const IGNORED_FILES: &[&str] = &["README.md"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BumpType {
    Patch,
    Minor,
    Major,
}

impl BumpType {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "patch" => Some(BumpType::Patch),
            "minor" => Some(BumpType::Minor),
            "major" => Some(BumpType::Major),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BumpType::Patch => "patch",
            BumpType::Minor => "minor",
            BumpType::Major => "major",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub name: String,
    pub bump_type: BumpType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDescriptor {
    pub filename: String,
    pub packages: Vec<String>,
    pub summary: String,
    pub releases: Vec<Release>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("{file}: does not start with a `---` frontmatter block")]
    MissingFrontmatter { file: String },
    #[error("{file}: frontmatter is never closed with `---`")]
    UnterminatedFrontmatter { file: String },
    #[error("{file}: frontmatter is not a package-to-bump map: {message}")]
    InvalidFrontmatter { file: String, message: String },
    #[error("{file}: {package} has bump type {bump:?}; expected major, minor or patch")]
    InvalidBump {
        file: String,
        package: String,
        bump: String,
    },
    #[error("{file}: summary is empty")]
    EmptySummary { file: String },
}

/// Parse one descriptor file. `created_at` comes from the caller because it
/// lives in git history, not in the file.
pub fn parse_descriptor(
    filename: &str,
    text: &str,
    created_at: DateTime<Utc>,
) -> Result<ChangeDescriptor, DescriptorError> {
    let text = text.trim_start_matches('\u{feff}');
    let mut lines = text.lines();
    if lines.next().map(str::trim_end) != Some(FRONTMATTER_FENCE) {
        return Err(DescriptorError::MissingFrontmatter {
            file: filename.to_string(),
        });
    }
    let mut frontmatter = Vec::new();
    let mut closed = false;
    for line in lines.by_ref() {
        if line.trim_end() == FRONTMATTER_FENCE {
            closed = true;
            break;
        }
        frontmatter.push(line);
    }
    if !closed {
        return Err(DescriptorError::UnterminatedFrontmatter {
            file: filename.to_string(),
        });
    }
    let summary = lines.collect::<Vec<_>>().join("\n").trim().to_string();
    if summary.is_empty() {
        return Err(DescriptorError::EmptySummary {
            file: filename.to_string(),
        });
    }

    let frontmatter = frontmatter.join("\n");
    let raw: BTreeMap<String, String> = if frontmatter.trim().is_empty() {
        BTreeMap::new()
    } else {
        serde_yaml::from_str(&frontmatter).map_err(|err| DescriptorError::InvalidFrontmatter {
            file: filename.to_string(),
            message: err.to_string(),
        })?
    };

    let mut releases = Vec::with_capacity(raw.len());
    for (package, bump) in raw {
        let bump_type = BumpType::parse(&bump).ok_or_else(|| DescriptorError::InvalidBump {
            file: filename.to_string(),
            package: package.clone(),
            bump: bump.clone(),
        })?;
        releases.push(Release {
            name: package,
            bump_type,
        });
    }
    Ok(ChangeDescriptor {
        filename: filename.to_string(),
        packages: releases.iter().map(|release| release.name.clone()).collect(),
        summary,
        releases,
        created_at,
    })
}

/// Descriptors that parsed, plus the files that did not.
#[derive(Debug, Default)]
pub struct LoadedDescriptors {
    pub descriptors: Vec<ChangeDescriptor>,
    pub errors: Vec<DescriptorError>,
}

/// Read every `*.md` descriptor in `dir`, sorted by filename. `added_at`
/// supplies the creation time for a file path; when it has no answer the
/// file modification time is used.
pub fn load_descriptors<F>(dir: &Path, added_at: F) -> Result<LoadedDescriptors>
where
    F: Fn(&Path) -> Option<DateTime<Utc>>,
{
    let mut loaded = LoadedDescriptors::default();
    if !dir.is_dir() {
        return Ok(loaded);
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !path.is_file() || !name.ends_with(".md") || IGNORED_FILES.contains(&name) {
            continue;
        }
        paths.push(path);
    }
    paths.sort();

    for path in paths {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let text = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let created_at = added_at(&path)
            .or_else(|| modified_at(&path))
            .unwrap_or_else(Utc::now);
        match parse_descriptor(&filename, &text, created_at) {
            Ok(descriptor) => loaded.descriptors.push(descriptor),
            Err(err) => {
                tracing::debug!(file = %filename, error = %err, "unparseable change descriptor");
                loaded.errors.push(err);
            }
        }
    }
    Ok(loaded)
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    /// Older than the warning threshold.
    Stale { age_days: i64 },
    /// Older than the error threshold; must be released or removed.
    Expired { age_days: i64 },
}

pub fn staleness(
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    warn_days: i64,
    error_days: i64,
) -> Staleness {
    let age_days = now.signed_duration_since(created_at).num_days();
    if age_days > error_days {
        Staleness::Expired { age_days }
    } else if age_days > warn_days {
        Staleness::Stale { age_days }
    } else {
        Staleness::Fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid time")
    }

    #[test]
    fn parses_frontmatter_and_summary() {
        let text = "---\n\"@acme/widgets\": minor\ncore: patch\n---\n\nAdd the compact layout.\n";
        let descriptor = parse_descriptor("brave-cats.md", text, at()).expect("parse");
        assert_eq!(descriptor.summary, "Add the compact layout.");
        assert_eq!(descriptor.packages, vec!["@acme/widgets", "core"]);
        assert_eq!(
            descriptor.releases[0],
            Release {
                name: "@acme/widgets".to_string(),
                bump_type: BumpType::Minor,
            }
        );
        assert_eq!(descriptor.releases[1].bump_type, BumpType::Patch);
    }

    #[test]
    fn empty_frontmatter_is_an_empty_release() {
        let descriptor =
            parse_descriptor("empty.md", "---\n---\n\nDocs only.\n", at()).expect("parse");
        assert!(descriptor.releases.is_empty());
        assert!(descriptor.packages.is_empty());
    }

    #[test]
    fn malformed_descriptors_name_the_problem() {
        assert!(matches!(
            parse_descriptor("a.md", "no frontmatter", at()),
            Err(DescriptorError::MissingFrontmatter { .. })
        ));
        assert!(matches!(
            parse_descriptor("b.md", "---\ncore: patch\n", at()),
            Err(DescriptorError::UnterminatedFrontmatter { .. })
        ));
        assert!(matches!(
            parse_descriptor("c.md", "---\ncore: huge\n---\nText\n", at()),
            Err(DescriptorError::InvalidBump { .. })
        ));
        assert!(matches!(
            parse_descriptor("d.md", "---\n- core\n---\nText\n", at()),
            Err(DescriptorError::InvalidFrontmatter { .. })
        ));
        let err = parse_descriptor("e.md", "---\ncore: patch\n---\n\n", at()).expect_err("empty");
        assert_eq!(err.to_string(), "e.md: summary is empty");
    }

    #[test]
    fn load_skips_readme_and_collects_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("README.md"), "# Changesets\n").expect("readme");
        fs::write(dir.path().join("config.json"), "{}").expect("config");
        fs::write(dir.path().join("b.md"), "---\ncore: patch\n---\nFix\n").expect("b");
        fs::write(dir.path().join("a.md"), "broken").expect("a");
        let loaded = load_descriptors(dir.path(), |_| Some(at())).expect("load");
        assert_eq!(loaded.descriptors.len(), 1);
        assert_eq!(loaded.descriptors[0].filename, "b.md");
        assert_eq!(loaded.descriptors[0].created_at, at());
        assert_eq!(loaded.errors.len(), 1);

        let missing = load_descriptors(&dir.path().join("nope"), |_| None).expect("missing dir");
        assert!(missing.descriptors.is_empty());
    }

    #[test]
    fn staleness_thresholds() {
        let now = at();
        assert_eq!(staleness(now - Duration::days(7), now, 7, 30), Staleness::Fresh);
        assert_eq!(
            staleness(now - Duration::days(8), now, 7, 30),
            Staleness::Stale { age_days: 8 }
        );
        assert_eq!(
            staleness(now - Duration::days(31), now, 7, 30),
            Staleness::Expired { age_days: 31 }
        );
    }
}
