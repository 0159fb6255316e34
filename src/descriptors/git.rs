//! Git history queries used by change-descriptor validation.
use crate::invocation::{run_process, Capture, ProcessSpec};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;

const GIT_TIMEOUT: Duration = Duration::from_secs(30);

pub trait GitHistory: Send + Sync {
    /// Merge base of `HEAD` and the base branch.
    fn merge_base(&self, base_branch: &str) -> Result<String>;
    /// Workspace-relative paths changed since `rev`, including uncommitted
    /// and untracked files.
    fn changed_files(&self, rev: &str) -> Result<Vec<String>>;
    /// Contents of `path` at `rev`, or `None` if it did not exist there.
    fn file_at(&self, rev: &str, path: &str) -> Result<Option<String>>;
    /// Commit time of the commit that added `path`.
    fn file_added_at(&self, path: &str) -> Option<DateTime<Utc>>;
    fn current_branch(&self) -> Result<String>;
    fn short_sha(&self, rev: &str) -> Result<String>;
}

/// `GitHistory` backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    git: PathBuf,
    root: PathBuf,
    remote: String,
}

impl GitCli {
    pub fn locate(root: &Path, remote: &str) -> Result<Self> {
        let git = which::which("git").context("git is not installed")?;
        Ok(Self {
            git,
            root: root.to_path_buf(),
            remote: remote.to_string(),
        })
    }

    fn git(&self, args: &[&str]) -> Result<GitOutput> {
        let output = run_process(&ProcessSpec {
            program: self.git.clone(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            cwd: self.root.clone(),
            timeout: GIT_TIMEOUT,
            capture: Capture::Full,
        })
        .with_context(|| format!("run git {}", args.join(" ")))?;
        Ok(GitOutput {
            success: output.success(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn git_ok(&self, args: &[&str]) -> Result<String> {
        let output = self.git(args)?;
        if !output.success {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                output.stderr.trim()
            ));
        }
        Ok(output.stdout)
    }
}

struct GitOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl GitHistory for GitCli {
    fn merge_base(&self, base_branch: &str) -> Result<String> {
        let remote_ref = format!("{}/{}", self.remote, base_branch);
        for candidate in [remote_ref.as_str(), base_branch] {
            let output = self.git(&["merge-base", "HEAD", candidate])?;
            if output.success {
                let sha = output.stdout.trim().to_string();
                if !sha.is_empty() {
                    tracing::debug!(base = candidate, merge_base = %sha, "resolved merge base");
                    return Ok(sha);
                }
            }
        }
        Err(anyhow!(
            "cannot find a merge base with {remote_ref} or {base_branch}"
        ))
    }

    fn changed_files(&self, rev: &str) -> Result<Vec<String>> {
        let diff = self.git_ok(&["diff", "--name-only", "--no-renames", rev])?;
        let untracked = self.git_ok(&["ls-files", "--others", "--exclude-standard"])?;
        let mut files: Vec<String> = diff
            .lines()
            .chain(untracked.lines())
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        files.sort();
        files.dedup();
        Ok(files)
    }

    fn file_at(&self, rev: &str, path: &str) -> Result<Option<String>> {
        let spec = format!("{rev}:{path}");
        let output = self.git(&["show", &spec])?;
        Ok(output.success.then_some(output.stdout))
    }

    fn file_added_at(&self, path: &str) -> Option<DateTime<Utc>> {
        let output = self
            .git(&["log", "--diff-filter=A", "--format=%cI", "--", path])
            .ok()?;
        if !output.success {
            return None;
        }
        // Oldest add wins when a file was deleted and re-added.
        let stamp = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .next_back()?;
        DateTime::parse_from_rfc3339(stamp)
            .ok()
            .map(|time| time.with_timezone(&Utc))
    }

    fn current_branch(&self) -> Result<String> {
        Ok(self
            .git_ok(&["rev-parse", "--abbrev-ref", "HEAD"])?
            .trim()
            .to_string())
    }

    fn short_sha(&self, rev: &str) -> Result<String> {
        Ok(self
            .git_ok(&["rev-parse", "--short", rev])?
            .trim()
            .to_string())
    }
}

/// In-memory history for validation tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FakeHistory {
    pub changed: Vec<String>,
    pub base_files: std::collections::BTreeMap<String, String>,
    pub added: std::collections::BTreeMap<String, DateTime<Utc>>,
    pub unavailable: bool,
}

#[cfg(test)]
impl GitHistory for FakeHistory {
    fn merge_base(&self, _base_branch: &str) -> Result<String> {
        if self.unavailable {
            return Err(anyhow!("not a git repository"));
        }
        Ok("base".to_string())
    }

    fn changed_files(&self, _rev: &str) -> Result<Vec<String>> {
        Ok(self.changed.clone())
    }

    fn file_at(&self, _rev: &str, path: &str) -> Result<Option<String>> {
        Ok(self.base_files.get(path).cloned())
    }

    fn file_added_at(&self, path: &str) -> Option<DateTime<Utc>> {
        self.added.get(path).copied()
    }

    fn current_branch(&self) -> Result<String> {
        Ok("feature".to_string())
    }

    fn short_sha(&self, rev: &str) -> Result<String> {
        Ok(rev.chars().take(7).collect())
    }
}
