//! Typed check invocations and the timeout-bounded process runner.
//!
//! Commands are argv vectors, never shell strings: configuration text is
//! tokenised once with `shell-words` and the program is resolved on `PATH`
//! (or relative to the workspace for script references) before spawning.
use anyhow::{anyhow, Context, Result};
use std::collections::VecDeque;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Bytes kept from each end of a captured stream.
pub const CAPTURE_EDGE_BYTES: usize = 8 * 1024;

/// Lines kept in a result's `details` for a noisy tool.
pub const MAX_DETAIL_LINES: usize = 40;

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const READER_GRACE: Duration = Duration::from_secs(2);

/// In-process checks dispatched by name instead of by subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    ChangeDescriptors,
    SecurityAudit,
    Governance,
}

impl Builtin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Builtin::ChangeDescriptors => "builtin:changesets",
            Builtin::SecurityAudit => "builtin:audit",
            Builtin::Governance => "builtin:governance",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckInvocation {
    Builtin(Builtin),
    /// An executable on `PATH`, or a script path relative to the workspace
    /// root when it contains a `/`.
    Program { program: String, args: Vec<String> },
}

impl CheckInvocation {
    pub fn from_command(command: &str) -> Result<Self> {
        let mut argv =
            shell_words::split(command).with_context(|| format!("parse command {command:?}"))?;
        if argv.is_empty() {
            return Err(anyhow!("command is empty"));
        }
        let program = argv.remove(0);
        Ok(CheckInvocation::Program {
            program,
            args: argv,
        })
    }

    pub fn describe(&self) -> String {
        match self {
            CheckInvocation::Builtin(builtin) => builtin.as_str().to_string(),
            CheckInvocation::Program { program, args } => {
                let mut parts = vec![program.clone()];
                parts.extend(args.iter().cloned());
                shell_words::join(parts)
            }
        }
    }
}

/// Resolve a program reference to an executable path, or `None` when the
/// target does not exist.
pub fn resolve_program(program: &str, root: &Path) -> Option<PathBuf> {
    if program.contains('/') {
        let candidate = Path::new(program);
        let candidate = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            root.join(candidate)
        };
        return candidate.is_file().then_some(candidate);
    }
    which::which(program).ok()
}

/// How much of each output stream `run_process` keeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Capture {
    /// First and last `CAPTURE_EDGE_BYTES`; for text shown to people.
    #[default]
    Bounded,
    /// Every byte; for output that gets parsed.
    Full,
}

#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
    pub capture: Capture,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    pub fn status_label(&self) -> String {
        if self.timed_out {
            return "timed out".to_string();
        }
        match self.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        }
    }

    /// Combined stderr + stdout, trimmed to head and tail lines.
    pub fn detail_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .stderr
            .lines()
            .chain(self.stdout.lines())
            .map(str::trim_end)
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect();
        elide_middle(&mut lines, MAX_DETAIL_LINES);
        lines
    }
}

/// Keep the first and last `max / 2` entries of `lines`, replacing the middle
/// with a single marker.
pub fn elide_middle(lines: &mut Vec<String>, max: usize) {
    if lines.len() <= max || max < 2 {
        return;
    }
    let keep = max / 2;
    let omitted = lines.len() - keep * 2;
    let tail = lines.split_off(lines.len() - keep);
    lines.truncate(keep);
    lines.push(format!("[... {omitted} lines omitted ...]"));
    lines.extend(tail);
}

/// Run a process to completion or until its timeout, whichever comes first.
/// A timed-out process (and its process group on Unix) is killed.
pub fn run_process(spec: &ProcessSpec) -> Result<ProcessOutput> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.cwd)
        .env("NO_COLOR", "1")
        .env("FORCE_COLOR", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let start = Instant::now();
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn {}", spec.program.display()))?;
    let stdout_rx = spawn_reader(child.stdout.take(), spec.capture);
    let stderr_rx = spawn_reader(child.stderr.take(), Capture::Bounded);

    let mut timed_out = false;
    let status = loop {
        if let Some(status) = child.try_wait().context("check process status")? {
            break Some(status);
        }
        if start.elapsed() > spec.timeout {
            timed_out = true;
            kill_tree(&mut child);
            break child.wait().ok();
        }
        std::thread::sleep(POLL_INTERVAL);
    };
    let duration = start.elapsed();

    if timed_out {
        tracing::warn!(
            program = %spec.program.display(),
            timeout_ms = spec.timeout.as_millis() as u64,
            "process timed out and was killed"
        );
    }

    Ok(ProcessOutput {
        exit_code: status.and_then(|status| status.code()),
        stdout: collect_reader(stdout_rx),
        stderr: collect_reader(stderr_rx),
        timed_out,
        duration,
    })
}

fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = i32::try_from(child.id()) {
            kill_process_group(pid);
        }
    }
    let _ = child.kill();
}

/// SIGKILL every process in the group led by `leader`. Children are spawned
/// with `process_group(0)`, so the group id is the child's pid.
#[cfg(unix)]
fn kill_process_group(leader: i32) {
    if leader <= 0 {
        return;
    }
    // SAFETY: kill(2) takes no pointers; a group that already exited only
    // makes the call fail with ESRCH.
    let rc = unsafe { libc::kill(-leader, libc::SIGKILL) };
    if rc != 0 {
        tracing::debug!(group = leader, "process group already gone");
    }
}

fn spawn_reader<R>(stream: Option<R>, mode: Capture) -> mpsc::Receiver<BoundedCapture>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut capture = match mode {
            Capture::Bounded => BoundedCapture::new(CAPTURE_EDGE_BYTES),
            Capture::Full => BoundedCapture::unbounded(),
        };
        if let Some(mut stream) = stream {
            let mut buf = [0u8; 8192];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => capture.push(&buf[..n]),
                }
            }
        }
        let _ = tx.send(capture);
    });
    rx
}

fn collect_reader(rx: mpsc::Receiver<BoundedCapture>) -> String {
    // A grandchild that escaped the kill can hold the pipe open; give up on
    // it rather than hang the run.
    match rx.recv_timeout(READER_GRACE) {
        Ok(capture) => capture.render(),
        Err(_) => String::from("[output unavailable: stream did not close]"),
    }
}

/// Keeps the first and last `edge` bytes of a stream and counts the rest.
#[derive(Debug)]
pub struct BoundedCapture {
    edge: usize,
    head: Vec<u8>,
    tail: VecDeque<u8>,
    total: usize,
}

impl BoundedCapture {
    pub fn new(edge: usize) -> Self {
        Self {
            edge,
            head: Vec::new(),
            tail: VecDeque::new(),
            total: 0,
        }
    }

    /// A capture that never drops bytes.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    pub fn push(&mut self, mut bytes: &[u8]) {
        self.total += bytes.len();
        if self.head.len() < self.edge {
            let take = (self.edge - self.head.len()).min(bytes.len());
            self.head.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
        }
        self.tail.extend(bytes.iter().copied());
        while self.tail.len() > self.edge {
            self.tail.pop_front();
        }
    }

    pub fn omitted(&self) -> usize {
        self.total - self.head.len() - self.tail.len()
    }

    pub fn render(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.head).into_owned();
        let omitted = self.omitted();
        if omitted > 0 {
            text.push_str(&format!("\n[... {omitted} bytes truncated ...]\n"));
        }
        let tail: Vec<u8> = self.tail.iter().copied().collect();
        text.push_str(&String::from_utf8_lossy(&tail));
        text
    }
}
