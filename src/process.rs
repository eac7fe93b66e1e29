//! Subprocess runner for external tools
//!
//! Runs `keytool`, the index builder, and object-store CLIs with:
//! - streaming of stdout/stderr into an optional log file and `debug` events
//! - a wall-clock deadline; on expiry SIGTERM, then SIGKILL after a grace period
//! - a short stderr tail kept for diagnostics
//!
//! Secrets are passed through the child environment and never appear in the
//! logged command line.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::timeout::Deadline;

/// Lines of stderr kept for error messages
const STDERR_TAIL_LINES: usize = 20;

/// Grace period between SIGTERM and SIGKILL
const TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// Errors from running a subprocess
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A command to run
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Extra environment; values are never logged
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Command line for logs (environment omitted)
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// How a subprocess ended
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    /// Exit code, if the process exited normally
    pub exit_code: Option<i32>,
    /// Terminating signal name, if any
    pub signal: Option<String>,
    /// True when the deadline expired and the process was terminated
    pub timed_out: bool,
    /// Wall-clock duration
    pub duration: Duration,
    /// Last lines written to stderr
    pub stderr_tail: Vec<String>,
}

impl ProcessOutcome {
    /// Exited with status zero within the deadline
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// One-line description of a failure
    pub fn describe_failure(&self) -> String {
        let cause = if self.timed_out {
            format!("timed out after {}s", self.duration.as_secs())
        } else if let Some(sig) = &self.signal {
            format!("killed by {}", sig)
        } else {
            format!("exit code {}", self.exit_code.unwrap_or(-1))
        };

        match self.stderr_tail.last() {
            Some(line) => format!("{}: {}", cause, line),
            None => cause,
        }
    }
}

/// Run `spec` to completion or until `timeout`, appending output to `log_path`
pub fn run(
    spec: &CommandSpec,
    timeout: Duration,
    log_path: Option<&Path>,
) -> Result<ProcessOutcome, ProcessError> {
    let log_file = match log_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "=== {} ===", Utc::now().to_rfc3339())?;
            writeln!(file, "command: {}", spec.display())?;
            Some(file)
        }
        None => None,
    };
    let log_file: Arc<Mutex<Option<File>>> = Arc::new(Mutex::new(log_file));

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group, so termination reaches the tool's descendants
        command.process_group(0);
    }

    debug!(command = %spec.display(), "spawning");
    let deadline = Deadline::after(timeout);
    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: spec.program.clone(),
        source,
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let tail: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::new()));

    let program = spec.program.clone();
    let log_clone = Arc::clone(&log_file);
    let stdout_handle = std::thread::spawn(move || {
        if let Some(stdout) = stdout {
            for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                debug!(program = %program, "{}", line);
                append_line(&log_clone, &line);
            }
        }
    });

    let program = spec.program.clone();
    let log_clone = Arc::clone(&log_file);
    let tail_clone = Arc::clone(&tail);
    let stderr_handle = std::thread::spawn(move || {
        if let Some(stderr) = stderr {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                debug!(program = %program, stream = "stderr", "{}", line);
                append_line(&log_clone, &format!("[stderr] {}", line));
                if let Ok(mut tail) = tail_clone.lock() {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
        }
    });

    let mut timed_out = false;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if deadline.is_expired() {
            warn!(
                command = %spec.display(),
                limit_secs = deadline.limit().as_secs(),
                "deadline expired, terminating"
            );
            timed_out = true;
            break terminate(&mut child)?;
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    // Descendants can outlive the child and keep its output pipes open
    while !(stdout_handle.is_finished() && stderr_handle.is_finished()) {
        if timed_out || deadline.is_expired() {
            warn!(
                command = %spec.display(),
                "descendants still hold output open, killing process group"
            );
            kill_group(&child);
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    let _ = stdout_handle.join();
    let _ = stderr_handle.join();

    let stderr_tail = tail
        .lock()
        .map(|t| t.iter().cloned().collect())
        .unwrap_or_default();

    let outcome = ProcessOutcome {
        exit_code: status.code(),
        signal: signal_name(&status),
        timed_out,
        duration: deadline.elapsed(),
        stderr_tail,
    };

    append_line(
        &log_file,
        &format!(
            "exit: code={:?} signal={:?} timed_out={} duration_ms={}",
            outcome.exit_code,
            outcome.signal,
            outcome.timed_out,
            outcome.duration.as_millis()
        ),
    );

    Ok(outcome)
}

fn append_line(log: &Arc<Mutex<Option<File>>>, line: &str) {
    if let Ok(mut guard) = log.lock() {
        if let Some(file) = guard.as_mut() {
            let _ = writeln!(file, "{}", line);
        }
    }
}

/// Terminate the whole process group gracefully, then forcefully
fn terminate(child: &mut Child) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let _ = killpg(Pid::from_raw(child.id() as i32), Signal::SIGTERM);
    }
    #[cfg(not(unix))]
    {
        let _ = child.kill();
    }

    let grace = Deadline::after(TERMINATION_GRACE);
    let mut status = None;
    while !grace.is_expired() {
        if let Some(exited) = child.try_wait()? {
            status = Some(exited);
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    // Descendants that ignored SIGTERM go down with the group either way
    kill_group(child);
    match status {
        Some(status) => Ok(status),
        None => {
            let _ = child.kill();
            child.wait()
        }
    }
}

/// SIGKILL every process left in the child's group
fn kill_group(child: &Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
            debug!(pid = child.id(), error = %e, "process group already gone");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child;
    }
}

fn signal_name(status: &ExitStatus) -> Option<String> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal().map(|s| format!("SIG{}", s))
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}
