//! Execution-environment signals consumed by the orchestrator.
//!
//! Detection happens once in `main`; everything downstream receives an
//! explicit `Environment` so tests can pin CI behavior without touching
//! process-wide variables.

/// Vendor-specific variables whose mere presence marks a CI runner.
const CI_MARKER_VARS: &[&str] = &[
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "BUILDKITE",
    "CIRCLECI",
    "JENKINS_URL",
    "TF_BUILD",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Environment {
    pub ci: bool,
}

impl Environment {
    #[cfg(test)]
    pub fn local() -> Self {
        Self { ci: false }
    }

    #[cfg(test)]
    pub fn ci() -> Self {
        Self { ci: true }
    }

    pub fn detect() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Detect CI from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let generic = lookup("CI").is_some_and(|value| is_truthy(&value));
        let vendor = CI_MARKER_VARS
            .iter()
            .any(|key| lookup(key).is_some_and(|value| !value.trim().is_empty()));
        Self {
            ci: generic || vendor,
        }
    }
}

fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    !(value.is_empty() || value == "0" || value.eq_ignore_ascii_case("false"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn detect(vars: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn generic_ci_variable_must_be_truthy() {
        assert!(detect(&[("CI", "true")]).ci);
        assert!(detect(&[("CI", "1")]).ci);
        assert!(!detect(&[("CI", "false")]).ci);
        assert!(!detect(&[("CI", "0")]).ci);
        assert!(!detect(&[("CI", "")]).ci);
        assert!(!detect(&[]).ci);
    }

    #[test]
    fn vendor_markers_imply_ci() {
        assert!(detect(&[("GITHUB_ACTIONS", "true")]).ci);
        assert!(detect(&[("JENKINS_URL", "http://jenkins")]).ci);
    }
}
