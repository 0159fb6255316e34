//! Duplicate and conflicting change descriptors.
//!
//! Two independent passes: exact `(package, bump)` collisions, and summary
//! similarity. The similarity pass is bounded: short summaries only match when
//! identical, pairs are only compared when their lengths are close, and the
//! whole pass gives up (with a warning) past a descriptor cap or a wall-clock
//! budget.
use super::{BumpType, ChangeDescriptor};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DuplicatePolicy {
    /// Pairs strictly above this similarity are flagged.
    pub similarity_threshold: f64,
    /// Summaries shorter than this (in characters) only match when identical.
    pub short_summary_chars: usize,
    /// Largest length difference, as a fraction of the longer summary, worth
    /// comparing.
    pub max_length_delta: f64,
    pub bucket_width: usize,
    /// Edit distance is not computed when lengths differ by more than this
    /// fraction; the distance is taken as the longer length.
    pub edit_distance_cutoff: f64,
    pub budget_ms: u64,
    pub max_descriptors: usize,
}

impl Default for DuplicatePolicy {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.90,
            short_summary_chars: 40,
            max_length_delta: 0.15,
            bucket_width: 20,
            edit_distance_cutoff: 0.30,
            budget_ms: 5_000,
            max_descriptors: 200,
        }
    }
}

impl DuplicatePolicy {
    pub fn validate(&self) -> Result<()> {
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(anyhow!(
                "changesets.duplicates.similarity_threshold must be in (0, 1]"
            ));
        }
        if !(0.0..1.0).contains(&self.max_length_delta) {
            return Err(anyhow!(
                "changesets.duplicates.max_length_delta must be in [0, 1)"
            ));
        }
        if !(0.0..=1.0).contains(&self.edit_distance_cutoff) {
            return Err(anyhow!(
                "changesets.duplicates.edit_distance_cutoff must be in [0, 1]"
            ));
        }
        if self.bucket_width == 0 || self.max_descriptors == 0 {
            return Err(anyhow!(
                "changesets.duplicates.bucket_width and max_descriptors must be positive"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateKind {
    /// Several descriptors bump the same package by the same amount.
    ExactCollision,
    /// Several descriptors bump the same package by different amounts.
    MixedBumps,
    IdenticalSummary,
    SimilarSummary,
    /// The similarity pass stopped early.
    Incomplete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateWarning {
    pub severity: Severity,
    pub kind: DuplicateKind,
    pub files: Vec<String>,
    pub message: String,
}

pub fn find_duplicates(
    descriptors: &[ChangeDescriptor],
    policy: &DuplicatePolicy,
) -> Vec<DuplicateWarning> {
    let mut warnings = bump_collisions(descriptors);
    warnings.extend(similar_summaries(descriptors, policy));
    warnings
}

fn bump_collisions(descriptors: &[ChangeDescriptor]) -> Vec<DuplicateWarning> {
    let mut by_package: BTreeMap<&str, BTreeMap<BumpType, BTreeSet<&str>>> = BTreeMap::new();
    for descriptor in descriptors {
        for release in &descriptor.releases {
            by_package
                .entry(release.name.as_str())
                .or_default()
                .entry(release.bump_type)
                .or_default()
                .insert(descriptor.filename.as_str());
        }
    }

    let mut warnings = Vec::new();
    for (package, bumps) in by_package {
        for (bump, files) in &bumps {
            if files.len() > 1 {
                warnings.push(DuplicateWarning {
                    severity: Severity::Error,
                    kind: DuplicateKind::ExactCollision,
                    files: files.iter().map(|file| file.to_string()).collect(),
                    message: format!(
                        "{} descriptors each request a {} bump of {package}",
                        files.len(),
                        bump.as_str()
                    ),
                });
            }
        }
        if bumps.len() > 1 {
            let files: BTreeSet<&str> = bumps.values().flatten().copied().collect();
            let kinds: Vec<&str> = bumps.keys().map(BumpType::as_str).collect();
            warnings.push(DuplicateWarning {
                severity: Severity::Warning,
                kind: DuplicateKind::MixedBumps,
                files: files.into_iter().map(str::to_string).collect(),
                message: format!("{package} has conflicting bumps: {}", kinds.join(", ")),
            });
        }
    }
    warnings
}

fn similar_summaries(
    descriptors: &[ChangeDescriptor],
    policy: &DuplicatePolicy,
) -> Vec<DuplicateWarning> {
    let mut warnings = Vec::new();

    // Identical summaries are flagged at any length.
    let mut identical: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for descriptor in descriptors {
        identical
            .entry(descriptor.summary.trim())
            .or_default()
            .insert(descriptor.filename.as_str());
    }
    for (summary, files) in &identical {
        if files.len() > 1 {
            warnings.push(DuplicateWarning {
                severity: Severity::Warning,
                kind: DuplicateKind::IdenticalSummary,
                files: files.iter().map(|file| file.to_string()).collect(),
                message: format!("identical summary {:?}", preview(summary)),
            });
        }
    }

    // One representative per distinct long summary.
    let candidates: Vec<(&str, usize, &str)> = identical
        .iter()
        .map(|(summary, files)| (*summary, summary.chars().count(), files.iter().next()))
        .filter(|(_, len, _)| *len >= policy.short_summary_chars)
        .filter_map(|(summary, len, file)| file.map(|file| (summary, len, *file)))
        .collect();
    if descriptors.len() > policy.max_descriptors {
        tracing::warn!(
            count = descriptors.len(),
            cap = policy.max_descriptors,
            "too many descriptors for similarity check"
        );
        warnings.push(DuplicateWarning {
            severity: Severity::Warning,
            kind: DuplicateKind::Incomplete,
            files: Vec::new(),
            message: format!(
                "{} descriptors exceed the similarity-check cap of {}; \
                 near-duplicates were not checked",
                descriptors.len(),
                policy.max_descriptors
            ),
        });
        return warnings;
    }

    let width = policy.bucket_width.max(1);
    let mut buckets: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (index, (_, len, _)) in candidates.iter().enumerate() {
        buckets.entry(len / width).or_default().push(index);
    }

    let budget = Duration::from_millis(policy.budget_ms);
    let start = Instant::now();
    let mut compared = 0usize;
    for (&bucket, members) in &buckets {
        for (position, &i) in members.iter().enumerate() {
            let (summary_a, len_a, file_a) = candidates[i];
            // Longest partner still within the length delta of this summary.
            let reach = (len_a as f64 / (1.0 - policy.max_length_delta)).floor() as usize;
            let last_bucket = (reach / width).max(bucket + 1);
            let partners = members[position + 1..].iter().chain(
                buckets
                    .range(bucket + 1..=last_bucket)
                    .flat_map(|(_, others)| others.iter()),
            );
            for &j in partners {
                if start.elapsed() > budget {
                    tracing::warn!(
                        compared,
                        budget_ms = policy.budget_ms,
                        "similarity budget exhausted"
                    );
                    warnings.push(DuplicateWarning {
                        severity: Severity::Warning,
                        kind: DuplicateKind::Incomplete,
                        files: Vec::new(),
                        message: format!(
                            "similarity check stopped after {} ms ({compared} pairs compared)",
                            policy.budget_ms
                        ),
                    });
                    return warnings;
                }
                let (summary_b, len_b, file_b) = candidates[j];
                if !within_length_delta(len_a, len_b, policy.max_length_delta) {
                    continue;
                }
                compared += 1;
                let score = bounded_similarity(summary_a, summary_b, policy.edit_distance_cutoff);
                if score > policy.similarity_threshold {
                    let mut files = vec![file_a.to_string(), file_b.to_string()];
                    files.sort();
                    warnings.push(DuplicateWarning {
                        severity: Severity::Warning,
                        kind: DuplicateKind::SimilarSummary,
                        message: format!(
                            "{} and {} have {:.0}% similar summaries",
                            files[0],
                            files[1],
                            score * 100.0
                        ),
                        files,
                    });
                }
            }
        }
    }
    tracing::debug!(
        candidates = candidates.len(),
        compared,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "similarity check finished"
    );
    warnings
}

fn within_length_delta(a: usize, b: usize, max_delta: f64) -> bool {
    let longer = a.max(b);
    if longer == 0 {
        return true;
    }
    (a.abs_diff(b) as f64) <= max_delta * longer as f64
}

/// `1 - distance / max(len)`, in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    bounded_similarity(a, b, 1.0)
}

fn bounded_similarity(a: &str, b: &str, cutoff: f64) -> f64 {
    let longer = a.chars().count().max(b.chars().count());
    if longer == 0 {
        return 1.0;
    }
    1.0 - bounded_levenshtein(a, b, cutoff) as f64 / longer as f64
}

/// Levenshtein distance, or the longer length when the lengths differ by more
/// than `cutoff` of it.
pub fn bounded_levenshtein(a: &str, b: &str, cutoff: f64) -> usize {
    let (len_a, len_b) = (a.chars().count(), b.chars().count());
    let longer = len_a.max(len_b);
    if len_a.abs_diff(len_b) as f64 > cutoff * longer as f64 {
        return longer;
    }
    strsim::levenshtein(a, b)
}

fn preview(summary: &str) -> String {
    let first_line = summary.lines().next().unwrap_or_default();
    if first_line.chars().count() > 60 {
        let cut: String = first_line.chars().take(57).collect();
        format!("{cut}...")
    } else {
        first_line.to_string()
    }
}

#[cfg(test)]
#[path = "duplicates_tests.rs"]
mod tests;
